pub mod bot;
pub mod config;
pub mod error;
pub mod services;
pub mod telegram_log;
