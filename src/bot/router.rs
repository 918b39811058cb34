//! Text routing: pick one intent per message and build the reply list.

use tracing::{info, warn};

use crate::bot::render::{bold_brackets, html_escape, preview};
use crate::bot::response::BotResponse;
use crate::bot::state::ChatState;
use crate::config::Config;
use crate::error::BotError;
use crate::services::arxiv::arxiv_id_from_link;
use crate::services::{Paper, Services};

pub const ARXIV_PREFIX: &str = "https://arxiv.org/";
pub const YOUTUBE_PREFIXES: [&str; 2] = ["https://www.youtube.com/watch?", "https://youtu.be/"];

pub const UNKNOWN_REPLY: &str = "I don't understand";
pub const NO_REPLY_CHAIN_REPLY: &str = "No reply chain found for brainstorming.";
pub const YOUTUBE_FAILED_REPLY: &str = "Failed to extract audio from youtube link.";
pub const EMPTY_SEARCH_REPLY: &str = "Nothing to search for. Usage: search <query>";

/// What a text message asks for. Matched in declaration order; first hit wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent<'a> {
    ArxivLink(&'a str),
    YoutubeLink(&'a str),
    PaperSearch(Vec<&'a str>),
    Brainstorm,
    Sentiment(&'a str),
    Unknown,
}

impl<'a> Intent<'a> {
    pub fn parse(text: &'a str) -> Self {
        if text.starts_with(ARXIV_PREFIX) {
            Self::ArxivLink(text)
        } else if YOUTUBE_PREFIXES.iter().any(|p| text.starts_with(p)) {
            Self::YoutubeLink(text)
        } else if let Some(keywords) = text.strip_prefix("a:") {
            Self::PaperSearch(keywords.split_whitespace().collect())
        } else if text == "bs" {
            Self::Brainstorm
        } else if text.starts_with("search") {
            let query = text.split_once(' ').map(|(_, q)| q.trim()).unwrap_or("");
            Self::Sentiment(query)
        } else {
            Self::Unknown
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ArxivLink(_) => "arxiv",
            Self::YoutubeLink(_) => "youtube",
            Self::PaperSearch(_) => "paper search",
            Self::Brainstorm => "brainstorm",
            Self::Sentiment(_) => "sentiment",
            Self::Unknown => "unknown",
        }
    }
}

/// Router settings that are not collaborators.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// A note with this tag is paraphrased with `chat_model`.
    pub chat_tag: String,
    pub chat_model: String,
    /// Used for every other tag.
    pub writing_model: String,
    /// Container the voice pipeline transcodes to before transcription.
    pub audio_format: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            chat_tag: "聊天".to_string(),
            chat_model: "gemini-2.5-flash".to_string(),
            writing_model: "gemini-2.5-pro".to_string(),
            audio_format: "mp3".to_string(),
        }
    }
}

impl CoreConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chat_tag: config.chat_tag.clone(),
            chat_model: config.chat_model.clone(),
            writing_model: config.writing_model.clone(),
            audio_format: config.audio_format.clone(),
        }
    }
}

/// The command router. Holds collaborators only; all per-chat data lives in
/// the [`ChatState`] passed to each call.
pub struct BotCore {
    pub(crate) services: Services,
    pub(crate) config: CoreConfig,
}

fn html_messages(paper: &Paper) -> Vec<BotResponse> {
    paper.to_messages().into_iter().map(BotResponse::html).collect()
}

impl BotCore {
    pub fn new(services: Services, config: CoreConfig) -> Self {
        Self { services, config }
    }

    /// Route one text message.
    ///
    /// The text (and the text it replied to) is appended to the chat history
    /// before any intent runs.
    pub async fn handle_text(
        &self,
        state: &mut ChatState,
        text: &str,
        reply_text: Option<&str>,
        reply_chain: &[String],
    ) -> Result<Vec<BotResponse>, BotError> {
        state.append_chat_history(text, reply_text);

        let intent = Intent::parse(text);
        info!("🧭 Intent {} for \"{}\"", intent.name(), preview(text, 50));

        match intent {
            Intent::ArxivLink(link) => self.summarize_arxiv_link(link).await,
            Intent::YoutubeLink(url) => self.extract_youtube_audio(url).await,
            Intent::PaperSearch(keywords) => self.search_papers(&keywords).await,
            Intent::Brainstorm => self.brainstorm(reply_chain).await,
            Intent::Sentiment(query) => self.sentiment(query).await,
            Intent::Unknown => Ok(vec![BotResponse::text(UNKNOWN_REPLY)]),
        }
    }

    async fn summarize_arxiv_link(&self, link: &str) -> Result<Vec<BotResponse>, BotError> {
        let id = arxiv_id_from_link(link);
        let mut paper = self.services.papers.fetch_paper(&id).await?;
        self.services.papers.load_sections(&mut paper).await?;

        let summary = self.services.llm.summarize_paper_sections(&paper, None).await?;
        paper.summary = Some(summary);
        Ok(html_messages(&paper))
    }

    async fn extract_youtube_audio(&self, url: &str) -> Result<Vec<BotResponse>, BotError> {
        match self.services.downloader.download_audio(url).await? {
            Some(path) => {
                info!("🎵 Extracted audio: {:?}", path);
                Ok(vec![BotResponse::Audio {
                    path,
                    delete_after_send: true,
                }])
            }
            None => {
                warn!("yt-dlp reported no output file for {}", url);
                Ok(vec![BotResponse::text(YOUTUBE_FAILED_REPLY)])
            }
        }
    }

    async fn search_papers(&self, keywords: &[&str]) -> Result<Vec<BotResponse>, BotError> {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
        let papers = self.services.papers.search_papers(&keywords).await?;
        Ok(papers.iter().flat_map(html_messages).collect())
    }

    /// Keywords from the reply chain, a paper search, then per-paper section
    /// summaries compared against the chain text.
    async fn brainstorm(&self, reply_chain: &[String]) -> Result<Vec<BotResponse>, BotError> {
        if reply_chain.is_empty() {
            return Ok(vec![BotResponse::text(NO_REPLY_CHAIN_REPLY)]);
        }

        let keywords = self.services.llm.summarize_keywords(reply_chain).await?;
        let papers = self.services.papers.search_papers(&keywords).await?;

        let mut responses = vec![BotResponse::text(format!(
            "Keywords: {:?}. Find {} papers",
            keywords,
            papers.len()
        ))];

        let reference_idea = reply_chain.join(" ");
        for mut paper in papers {
            if let Err(e) = self.services.papers.load_sections(&mut paper).await {
                warn!("Could not load sections of {}: {}", paper.id, e);
            }
            let summary = self
                .services
                .llm
                .summarize_paper_sections(&paper, Some(reference_idea.as_str()))
                .await?;
            paper.summary = Some(summary);
            responses.extend(html_messages(&paper));
        }
        Ok(responses)
    }

    async fn sentiment(&self, query: &str) -> Result<Vec<BotResponse>, BotError> {
        if query.is_empty() {
            return Ok(vec![BotResponse::text(EMPTY_SEARCH_REPLY)]);
        }
        let report = self.services.sentiment.summarize(query).await?;
        Ok(vec![BotResponse::html(bold_brackets(&html_escape(&report)))])
    }

    /// Build the deep research query for `text`.
    ///
    /// The last few history entries are condensed into a context blurb
    /// (unless disabled or there is no history), then `text` is appended to
    /// the history. A failed summary falls back to the plain text.
    pub async fn build_research_query(
        &self,
        state: &mut ChatState,
        text: &str,
        reply_text: Option<&str>,
    ) -> String {
        let snippets = state.recent_history().to_vec();

        let mut summary = String::new();
        if state.use_context_summary && !snippets.is_empty() {
            match self.services.llm.summarize_past_discussions(&snippets).await {
                Ok(s) => summary = s,
                Err(e) => warn!("Context summary failed, using plain query: {}", e),
            }
        }

        state.append_chat_history(text, reply_text);

        if summary.is_empty() {
            text.to_string()
        } else {
            format!(
                "Context summary of prior discussions:\n{}\n\nCurrent query:\n{}",
                summary, text
            )
        }
    }

    pub fn toggle_writer(&self, state: &mut ChatState) -> bool {
        let value = state.toggle_writer();
        info!("✍️ Writer mode: {}", value);
        value
    }

    pub fn toggle_context_summary(&self, state: &mut ChatState) -> bool {
        let value = state.toggle_context_summary();
        info!("🧠 Context summary: {}", value);
        value
    }
}
