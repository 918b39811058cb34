//! Structured replies produced by the router and consumed by the renderer.

use std::path::PathBuf;

/// Markup the renderer should apply to a text reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Html,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotResponse {
    Text {
        body: String,
        format: Option<TextFormat>,
    },
    Audio {
        path: PathBuf,
        delete_after_send: bool,
    },
}

impl BotResponse {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text {
            body: body.into(),
            format: None,
        }
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self::Text {
            body: body.into(),
            format: Some(TextFormat::Html),
        }
    }

    /// Text body, if this is a text reply.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { body, .. } => Some(body),
            Self::Audio { .. } => None,
        }
    }
}

/// Outcome of the voice pipeline.
#[derive(Debug, Clone, Default)]
pub struct BotResult {
    pub responses: Vec<BotResponse>,
    /// The query handed to deep research, context summary included.
    pub research_query: Option<String>,
    pub transcribed_text: Option<String>,
}
