//! Errors raised by the router and its collaborators.

use std::time::Duration;

/// Anything that can go wrong while handling a message.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Never carries the request URL; see the `From` impl.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{program} exited with {status}: {stderr}")]
    Subprocess {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("empty response from {0}")]
    Empty(&'static str),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("state store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("Telegram download error: {0}")]
    Download(#[from] teloxide::DownloadError),
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

impl BotError {
    pub fn parse(what: &'static str, reason: impl ToString) -> Self {
        Self::Parse {
            what,
            reason: reason.to_string(),
        }
    }

    /// Build a subprocess error from a finished process.
    pub fn subprocess(program: &str, output: &std::process::Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Self::Subprocess {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: stderr.trim().chars().take(500).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = BotError::parse("keywords", "expected value at line 1");
        assert_eq!(err.to_string(), "failed to parse keywords: expected value at line 1");

        let err = BotError::Api {
            status: 429,
            body: "quota".to_string(),
        };
        assert_eq!(err.to_string(), "API error 429: quota");
    }
}
