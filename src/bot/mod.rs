//! The command router, its chat-state contract, and the Telegram renderer.

pub mod commands;
pub mod extract;
pub mod render;
pub mod response;
pub mod router;
pub mod state;
pub mod store;
pub mod telegram;
pub mod voice;


pub use commands::Command;
pub use response::{BotResponse, BotResult, TextFormat};
pub use router::{BotCore, CoreConfig, Intent};
pub use state::{ChatState, ParaphraseRecord};
pub use store::StateStore;
pub use telegram::TelegramClient;
