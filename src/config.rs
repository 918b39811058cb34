use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::{ChatId, UserId};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    /// Falls back to TELEGRAM_BOT_TOKEN when empty.
    #[serde(default)]
    telegram_bot_token: String,
    #[serde(default)]
    allowed_user_ids: Vec<u64>,
    /// Telegram full names ("First Last") allowed to use the bot.
    #[serde(default)]
    allowed_user_names: Vec<String>,
    /// Falls back to GEMINI_API_KEY when empty.
    #[serde(default)]
    gemini_api_key: String,
    #[serde(default = "default_model")]
    default_model: String,
    /// Model used to paraphrase notes tagged as chat.
    #[serde(default = "default_model")]
    chat_model: String,
    /// Model used to paraphrase every other note.
    #[serde(default = "default_writing_model")]
    writing_model: String,
    #[serde(default = "default_chat_tag")]
    chat_tag: String,
    /// RapidAPI key for the Twitter search behind `search <query>`.
    #[serde(default)]
    rapidapi_key: String,
    /// Directory for state files (database, logs, paper sources). Defaults to current directory.
    data_dir: Option<String>,
    log_chat_id: Option<i64>,
    #[serde(default = "default_ytdlp")]
    ytdlp_path: String,
    youtube_cookies: Option<String>,
    #[serde(default = "default_ffmpeg")]
    ffmpeg_path: String,
    #[serde(default = "default_audio_format")]
    audio_format: String,
    #[serde(default)]
    deep_research: DeepResearchFile,
}

#[derive(Deserialize, Default)]
struct DeepResearchFile {
    dir: Option<String>,
    env_file: Option<String>,
    model: Option<String>,
    python: Option<String>,
    timeout_secs: Option<u64>,
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_writing_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_chat_tag() -> String {
    "聊天".to_string()
}

fn default_ytdlp() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

/// Settings for the out-of-process deep research runner.
#[derive(Debug, Clone)]
pub struct DeepResearchConfig {
    /// Directory containing `run_deep_research.py`; also the working directory.
    pub dir: PathBuf,
    /// Optional dotenv file merged into the child environment.
    pub env_file: Option<PathBuf>,
    pub model: Option<String>,
    pub python: String,
    /// No timeout when unset.
    pub timeout: Option<Duration>,
}

pub struct Config {
    pub telegram_bot_token: String,
    pub allowed_user_ids: HashSet<UserId>,
    pub allowed_user_names: HashSet<String>,
    pub gemini_api_key: String,
    pub default_model: String,
    pub chat_model: String,
    pub writing_model: String,
    pub chat_tag: String,
    pub rapidapi_key: Option<String>,
    /// Directory for state files (database, logs, paper sources).
    pub data_dir: PathBuf,
    pub log_chat_id: Option<ChatId>,
    pub ytdlp_path: String,
    pub youtube_cookies: Option<PathBuf>,
    pub ffmpeg_path: String,
    pub audio_format: String,
    pub deep_research: DeepResearchConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load with an explicit environment lookup so fallbacks are testable.
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        let non_empty = |value: String, key: &str| -> String {
            if value.is_empty() {
                env(key).unwrap_or_default()
            } else {
                value
            }
        };

        let telegram_bot_token = non_empty(file.telegram_bot_token, "TELEGRAM_BOT_TOKEN");
        if telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }

        if file.allowed_user_ids.is_empty() && file.allowed_user_names.is_empty() {
            return Err(ConfigError::Validation(
                "allowed_user_ids or allowed_user_names must contain at least one user".into(),
            ));
        }

        let gemini_api_key = non_empty(file.gemini_api_key, "GEMINI_API_KEY");
        if gemini_api_key.is_empty() {
            return Err(ConfigError::Validation("gemini_api_key is required".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let research = file.deep_research;
        let research_dir = research
            .dir
            .or_else(|| env("DEEP_RESEARCH_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("deep_research"));
        let deep_research = DeepResearchConfig {
            dir: research_dir,
            env_file: research.env_file.or_else(|| env("DEEP_RESEARCH_ENV_FILE")).map(PathBuf::from),
            model: research
                .model
                .or_else(|| env("DEEP_RESEARCH_MODEL"))
                .filter(|m| !m.is_empty()),
            python: research.python.unwrap_or_else(|| "python".to_string()),
            timeout: research.timeout_secs.map(Duration::from_secs),
        };

        Ok(Self {
            telegram_bot_token,
            allowed_user_ids: file.allowed_user_ids.into_iter().map(UserId).collect(),
            allowed_user_names: file.allowed_user_names.into_iter().collect(),
            gemini_api_key,
            default_model: file.default_model,
            chat_model: file.chat_model,
            writing_model: file.writing_model,
            chat_tag: file.chat_tag,
            rapidapi_key: Some(file.rapidapi_key).filter(|k| !k.is_empty()),
            data_dir,
            log_chat_id: file.log_chat_id.map(ChatId),
            ytdlp_path: file.ytdlp_path,
            youtube_cookies: file.youtube_cookies.map(PathBuf::from),
            ffmpeg_path: file.ffmpeg_path,
            audio_format: file.audio_format,
            deep_research,
        })
    }

    /// Check whether a Telegram user may talk to the bot.
    pub fn is_allowed(&self, user_id: UserId, full_name: &str) -> bool {
        self.allowed_user_ids.contains(&user_id) || self.allowed_user_names.contains(full_name)
    }
}
