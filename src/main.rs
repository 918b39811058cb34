use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::User;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use notetaker::bot::commands::{self, CLEAR_TEXT, HELP_TEXT, NOT_VOICE_TEXT, START_TEXT};
use notetaker::bot::render::preview;
use notetaker::bot::{BotCore, BotResponse, ChatState, Command, CoreConfig, StateStore, TelegramClient};
use notetaker::config::Config;
use notetaker::error::BotError;
use notetaker::services::Services;
use notetaker::telegram_log;

struct App {
    config: Config,
    core: BotCore,
    store: Arc<StateStore>,
    telegram: TelegramClient,
}

impl App {
    /// The sender, if they may use the bot. Denied users are told so.
    async fn authorize<'a>(&self, msg: &'a Message) -> Option<&'a User> {
        let user = msg.from.as_ref()?;
        let full_name = user.full_name();
        if self.config.is_allowed(user.id, &full_name) {
            return Some(user);
        }
        info!("⛔ Denied {} ({})", full_name, user.id);
        self.reply(msg, vec![BotResponse::text(commands::denied_reply(&full_name))]).await;
        None
    }

    fn load_state(&self, user: &User) -> Result<ChatState, BotError> {
        let mut state = self.store.load(user.id.0)?;
        state.ensure_user(user.id.0, &user.full_name());
        Ok(state)
    }

    fn save_state(&self, user: &User, state: &ChatState) {
        if let Err(e) = self.store.save(user.id.0, state) {
            warn!("Failed to save state for {}: {}", user.id, e);
        }
    }

    /// Log an inbound message so later replies can walk back to it.
    fn record_inbound(&self, msg: &Message, text: &str) {
        let reply_to = msg.reply_to_message().map(|r| r.id.0);
        if let Err(e) = self.store.record_message(msg.chat.id.0, msg.id.0, reply_to, text) {
            warn!("Failed to record message {}: {}", msg.id, e);
        }
    }

    /// The replied-to message and its logged ancestors, oldest first.
    fn reply_chain(&self, msg: &Message) -> Vec<String> {
        let Some(parent) = msg.reply_to_message() else {
            return Vec::new();
        };
        let chain = self.store.reply_chain(msg.chat.id.0, parent.id.0).unwrap_or_else(|e| {
            warn!("Failed to read reply chain: {}", e);
            Vec::new()
        });
        if chain.is_empty() {
            // Not logged (e.g. sent before the bot started): use what Telegram gives us.
            return parent.text().map(|t| vec![t.to_string()]).unwrap_or_default();
        }
        chain
    }

    async fn reply(&self, msg: &Message, responses: Vec<BotResponse>) {
        if let Err(e) = self.telegram.send_responses(msg.chat.id, msg.id, &responses).await {
            warn!("Failed to send reply in chat {}: {}", msg.chat.id, e);
        }
    }

    /// Handler boundary: a failed operation becomes one text reply.
    async fn reply_error(&self, msg: &Message, e: BotError) {
        warn!("Handling message {} failed: {}", msg.id, e);
        self.reply(msg, vec![BotResponse::text(format!("Error: {}", e))]).await;
    }
}

fn reply_text(msg: &Message) -> Option<String> {
    msg.reply_to_message().and_then(|r| r.text()).map(str::to_string)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "notetaker.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("notetaker.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(bot.clone(), log_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting notetaker...");
    info!("Loaded config from {config_path}");
    info!(
        "Allowed users: {:?} {:?}",
        config.allowed_user_ids, config.allowed_user_names
    );
    if config.rapidapi_key.is_none() {
        info!("No rapidapi_key, `search` is disabled");
    }

    let store = match StateStore::open(&config.data_dir.join("notetaker.db")) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Failed to open database: {e}");
            std::process::exit(1);
        }
    };
    let services = match Services::from_config(&config) {
        Ok(services) => services,
        Err(e) => {
            eprintln!("Failed to set up services: {e}");
            std::process::exit(1);
        }
    };

    let telegram = TelegramClient::new(bot.clone(), store.clone());
    if let Err(e) = telegram.register_commands().await {
        warn!("Failed to register bot commands: {e}");
    }

    let app = Arc::new(App {
        core: BotCore::new(services, CoreConfig::from_config(&config)),
        config,
        store,
        telegram,
    });

    let handler = Update::filter_message()
        .branch(dptree::entry().filter_command::<Command>().endpoint(handle_command))
        .branch(dptree::filter(|msg: Message| msg.voice().is_some()).endpoint(handle_voice))
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text))
        .branch(dptree::endpoint(handle_other));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![app])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(msg: Message, cmd: Command, app: Arc<App>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    info!("⌨️ /{:?} from {} ({})", cmd, user.full_name(), user.id);

    if cmd.requires_auth() && app.authorize(&msg).await.is_none() {
        return Ok(());
    }

    let response = match cmd {
        Command::Start => BotResponse::text(START_TEXT),
        Command::Help => BotResponse::html(HELP_TEXT),
        Command::Data => match app.store.load(user.id.0) {
            Ok(state) => BotResponse::text(commands::data_reply(&state)),
            Err(e) => return reply_error(&app, &msg, e).await,
        },
        Command::Clear => match app.store.clear(user.id.0, msg.chat.id.0) {
            Ok(()) => BotResponse::text(CLEAR_TEXT),
            Err(e) => return reply_error(&app, &msg, e).await,
        },
        Command::ToggleWriter => match app.load_state(user) {
            Ok(mut state) => {
                let value = app.core.toggle_writer(&mut state);
                app.save_state(user, &state);
                BotResponse::text(commands::writer_reply(value))
            }
            Err(e) => return reply_error(&app, &msg, e).await,
        },
        Command::ToggleContextSummary => match app.load_state(user) {
            Ok(mut state) => {
                let value = app.core.toggle_context_summary(&mut state);
                app.save_state(user, &state);
                BotResponse::text(commands::context_summary_reply(value))
            }
            Err(e) => return reply_error(&app, &msg, e).await,
        },
    };

    app.reply(&msg, vec![response]).await;
    Ok(())
}

async fn reply_error(app: &App, msg: &Message, e: BotError) -> ResponseResult<()> {
    app.reply_error(msg, e).await;
    Ok(())
}

async fn handle_text(msg: Message, app: Arc<App>) -> ResponseResult<()> {
    let Some(user) = app.authorize(&msg).await else {
        return Ok(());
    };
    let text = msg.text().unwrap_or_default();
    info!("📨 Text from {} ({}): \"{}\"", user.full_name(), user.id, preview(text, 100));
    app.record_inbound(&msg, text);

    let mut state = match app.load_state(user) {
        Ok(state) => state,
        Err(e) => return reply_error(&app, &msg, e).await,
    };
    let reply_text = reply_text(&msg);
    let chain = app.reply_chain(&msg);

    let result = app
        .core
        .handle_text(&mut state, text, reply_text.as_deref(), &chain)
        .await;
    app.save_state(user, &state);

    match result {
        Ok(responses) => app.reply(&msg, responses).await,
        Err(e) => app.reply_error(&msg, e).await,
    }
    Ok(())
}

async fn handle_voice(msg: Message, app: Arc<App>) -> ResponseResult<()> {
    let Some(user) = app.authorize(&msg).await else {
        return Ok(());
    };
    let Some(voice) = msg.voice() else {
        return Ok(());
    };
    info!("🎤 Voice from {} ({})", user.full_name(), user.id);

    let audio = match app.telegram.download_file(&voice.file.id).await {
        Ok(audio) => audio,
        Err(e) => return reply_error(&app, &msg, e).await,
    };
    let mut state = match app.load_state(user) {
        Ok(state) => state,
        Err(e) => return reply_error(&app, &msg, e).await,
    };
    let reply_text = reply_text(&msg);

    let result = app
        .core
        .handle_voice(&mut state, &audio, reply_text.as_deref(), msg.date)
        .await;
    app.save_state(user, &state);

    match result {
        Ok(result) => {
            if let Some(query) = &result.research_query {
                info!("🔬 Research query for {}: \"{}\"", user.id, preview(query, 200));
            }
            if let Some(transcribed) = &result.transcribed_text {
                app.record_inbound(&msg, transcribed);
            }
            app.reply(&msg, result.responses).await;
        }
        Err(e) => app.reply_error(&msg, e).await,
    }
    Ok(())
}

async fn handle_other(msg: Message, app: Arc<App>) -> ResponseResult<()> {
    app.reply(&msg, vec![BotResponse::text(NOT_VOICE_TEXT)]).await;
    Ok(())
}
