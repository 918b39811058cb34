//! External collaborators behind traits, with their production implementations.

pub mod arxiv;
pub mod llm;
pub mod media;
pub mod research;
pub mod sentiment;

use std::sync::Arc;

pub use arxiv::{ArxivClient, Paper, PaperSource};
pub use llm::{GeminiClient, LlmGateway, TaggedText};
pub use media::{AudioDownloader, AudioTranscoder, Ffmpeg, YtDlp};
pub use research::{DeepResearch, SubprocessResearch};
pub use sentiment::{SentimentSource, SentimentUnavailable, TwitterSentiment};

use crate::config::Config;
use crate::error::BotError;

/// Every collaborator the router talks to.
#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn LlmGateway>,
    pub papers: Arc<dyn PaperSource>,
    pub sentiment: Arc<dyn SentimentSource>,
    pub downloader: Arc<dyn AudioDownloader>,
    pub transcoder: Arc<dyn AudioTranscoder>,
    pub research: Arc<dyn DeepResearch>,
}

impl Services {
    /// Wire up the production implementations from config.
    pub fn from_config(config: &Config) -> Result<Self, BotError> {
        let gemini = Arc::new(GeminiClient::new(
            config.gemini_api_key.clone(),
            config.default_model.clone(),
        )?);

        let sentiment: Arc<dyn SentimentSource> = match &config.rapidapi_key {
            Some(key) => Arc::new(TwitterSentiment::new(key.clone(), gemini.clone())?),
            None => Arc::new(SentimentUnavailable),
        };

        Ok(Self {
            llm: gemini,
            papers: Arc::new(ArxivClient::new(config.data_dir.join("papers"))?),
            sentiment,
            downloader: Arc::new(YtDlp::new(
                config.ytdlp_path.clone(),
                config.youtube_cookies.clone(),
                config.data_dir.join("downloads"),
            )),
            transcoder: Arc::new(Ffmpeg::new(config.ffmpeg_path.clone())),
            research: Arc::new(SubprocessResearch::new(&config.deep_research)),
        })
    }
}
