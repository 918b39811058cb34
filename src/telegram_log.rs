//! Forwards log events to a Telegram chat: warnings at once, info in batches.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::bot::render::{TELEGRAM_MESSAGE_LIMIT, split_message};

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BUFFERED: usize = 50;

#[derive(Debug)]
enum LogMessage {
    /// WARN/ERROR, sent as soon as it arrives.
    Urgent(String),
    /// INFO, held for the next batch.
    Info(String),
}

/// INFO lines waiting for the next flush.
#[derive(Default)]
struct InfoBatch {
    lines: Vec<String>,
}

impl InfoBatch {
    /// Queue `line`. Returns the batch text once [`MAX_BUFFERED`] lines are
    /// waiting.
    fn push(&mut self, line: String) -> Option<String> {
        self.lines.push(line);
        if self.lines.len() >= MAX_BUFFERED {
            self.take()
        } else {
            None
        }
    }

    /// Everything queued, one line each, or `None` when idle.
    fn take(&mut self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let text = self.lines.join("\n");
        self.lines.clear();
        Some(text)
    }
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl TelegramLogLayer {
    /// Spawns the forwarding task; needs a running tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(bot, chat_id, rx));
        Self { tx }
    }
}

async fn forward(bot: Bot, chat_id: ChatId, mut rx: mpsc::UnboundedReceiver<LogMessage>) {
    let mut batch = InfoBatch::default();
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let ready = tokio::select! {
            received = rx.recv() => match received {
                Some(LogMessage::Urgent(text)) => Some(text),
                Some(LogMessage::Info(text)) => batch.push(text),
                None => break,
            },
            _ = ticker.tick() => batch.take(),
        };
        if let Some(text) = ready {
            send_log(&bot, chat_id, &text).await;
        }
    }

    if let Some(text) = batch.take() {
        send_log(&bot, chat_id, &text).await;
    }
}

/// Send as plain text, split like any other outbound message.
async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    for chunk in split_message(text, TELEGRAM_MESSAGE_LIMIT) {
        if chunk.is_empty() {
            continue;
        }
        // Logging from here would feed back into this layer.
        if let Err(e) = bot.send_message(chat_id, chunk).await {
            eprintln!("Failed to send log to Telegram: {e}");
        }
    }
}

/// Collects an event's `message` plus any other fields as `name = value`.
#[derive(Default)]
struct EventText {
    message: Option<String>,
    fields: Vec<String>,
}

impl Visit for EventText {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push(format!("{} = {:?}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.push(format!("{} = {:?}", field.name(), value));
        }
    }
}

impl EventText {
    fn into_text(self) -> String {
        match self.message {
            Some(message) if self.fields.is_empty() => message,
            Some(message) => format!("{} ({})", message, self.fields.join(", ")),
            None => self.fields.join(", "),
        }
    }
}

/// Decide whether and how an event is forwarded.
///
/// Only this crate's events at INFO or above are sent. Events from the HTTP
/// and Telegram stacks are skipped since sending a log produces more of them.
fn route(level: Level, target: &str, message: String) -> Option<LogMessage> {
    if level > Level::INFO || !target.starts_with(env!("CARGO_CRATE_NAME")) {
        return None;
    }
    Some(match level {
        Level::ERROR => LogMessage::Urgent(format!("❌ {}", message)),
        Level::WARN => LogMessage::Urgent(format!("⚠️ {}", message)),
        _ => LogMessage::Info(message),
    })
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > Level::INFO {
            return;
        }

        let mut text = EventText::default();
        event.record(&mut text);

        let Some(msg) = route(*metadata.level(), metadata.target(), text.into_text()) else {
            return;
        };
        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWN: &str = concat!(env!("CARGO_CRATE_NAME"), "::bot::router");

    #[test]
    fn test_route_levels() {
        assert!(matches!(
            route(Level::WARN, OWN, "slow".into()),
            Some(LogMessage::Urgent(m)) if m == "⚠️ slow"
        ));
        assert!(matches!(
            route(Level::ERROR, OWN, "down".into()),
            Some(LogMessage::Urgent(m)) if m == "❌ down"
        ));
        assert!(matches!(route(Level::INFO, OWN, "hi".into()), Some(LogMessage::Info(m)) if m == "hi"));
        assert!(route(Level::DEBUG, OWN, "noise".into()).is_none());
    }

    #[test]
    fn test_route_skips_foreign_targets() {
        assert!(route(Level::WARN, "teloxide::dispatching", "x".into()).is_none());
        assert!(route(Level::INFO, "reqwest::connect", "x".into()).is_none());
    }

    #[test]
    fn test_batch_flushes_when_full() {
        let mut batch = InfoBatch::default();
        assert_eq!(batch.take(), None);

        for i in 1..MAX_BUFFERED {
            assert_eq!(batch.push(format!("line {}", i)), None);
        }
        let text = batch.push("last".into()).unwrap();
        assert_eq!(text.lines().count(), MAX_BUFFERED);
        assert!(text.starts_with("line 1\nline 2\n"));
        assert!(text.ends_with("\nlast"));
        assert_eq!(batch.take(), None);
    }

    #[test]
    fn test_batch_take_drains() {
        let mut batch = InfoBatch::default();
        batch.push("a".into());
        batch.push("b".into());
        assert_eq!(batch.take().as_deref(), Some("a\nb"));
        assert_eq!(batch.take(), None);
    }

    #[test]
    fn test_event_text() {
        let text = EventText {
            message: Some("Saved".into()),
            fields: vec!["user = 7".into()],
        };
        assert_eq!(text.into_text(), "Saved (user = 7)");

        let text = EventText {
            message: None,
            fields: vec!["a = 1".into(), "b = 2".into()],
        };
        assert_eq!(text.into_text(), "a = 1, b = 2");
        assert_eq!(EventText::default().into_text(), "");
    }
}
