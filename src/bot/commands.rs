//! Slash commands and their replies.

use teloxide::utils::command::BotCommands;

use crate::bot::render::TELEGRAM_MESSAGE_LIMIT;
use crate::bot::state::ChatState;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "Start the bot.")]
    Start,
    #[command(description = "Display the help message.")]
    Help,
    #[command(description = "Display any information we have about you.")]
    Data,
    #[command(description = "Clear any information we have about you.")]
    Clear,
    #[command(description = "Switch writer's mode.")]
    ToggleWriter,
    #[command(description = "Switch the context summary for deep research queries.")]
    ToggleContextSummary,
}

impl Command {
    /// Commands that need an allowed user.
    pub fn requires_auth(&self) -> bool {
        matches!(self, Self::ToggleWriter | Self::ToggleContextSummary)
    }
}

pub const START_TEXT: &str = "Send me a voice message, and I will transcribe it for you. \
Note I am not a QA bot, and will not answer your questions. I will only listen to you, \
transcribe your voice message, and hand it to deep research. In writer's mode I also \
paraphrase it. Type /help for more information.";

pub const HELP_TEXT: &str = "<b>Voice Note Taker Bot</b>

<b>Usage</b>: send me a voice message and I will transcribe it, run deep research on it, \
and in writer's mode paraphrase it.

<b>Text messages</b>:
• an arXiv link: summarize the paper section by section
• a YouTube link: extract the audio track
• <code>a:keyword1 keyword2</code>: search arXiv
• <code>bs</code> as a reply: brainstorm papers related to the reply chain
• <code>search &lt;query&gt;</code>: recent social sentiment

<b>Data and privacy</b>: I log your transcriptions and paraphrased texts. \
You can check what is logged with /data and clear it with /clear.

<b>Commands</b>:
/help: Display this help message.
/data: Display any information we have about you.
/clear: Clear any information we have about you.
/toggle_writer: Switch writer's mode.
/toggle_context_summary: Switch the context summary for deep research queries.";

pub const CLEAR_TEXT: &str = "Your data has been cleared.";

/// Reply to anything that is neither text, voice, nor a command.
pub const NOT_VOICE_TEXT: &str =
    "Please send me a voice message. I will transcribe it and paraphrase for you.";

/// The state as pretty JSON, or a short summary when that would not fit in
/// one message.
pub fn data_reply(state: &ChatState) -> String {
    let json = serde_json::to_string_pretty(state).unwrap_or_else(|e| format!("Failed to serialize data: {}", e));
    if json.chars().count() <= TELEGRAM_MESSAGE_LIMIT {
        return json;
    }

    let (Some(first), Some(last)) = (state.history.first(), state.history.last()) else {
        return format!(
            "Your data is too long to be displayed. It contains {} chat history entries.",
            state.chat_history.len()
        );
    };
    format!(
        "Your data is too long to be displayed. It contains {} entries. The last message is {}. \
         It records across the time period from {} to {}.",
        state.history.len(),
        last.paraphrased,
        first.timestamp.to_rfc3339(),
        last.timestamp.to_rfc3339()
    )
}

pub fn writer_reply(value: bool) -> String {
    format!("Writer's mode is set to be {}", value)
}

pub fn context_summary_reply(value: bool) -> String {
    format!("Context summary is set to be {}", value)
}

pub fn denied_reply(full_name: &str) -> String {
    format!("You ({}) are not in the allowed user list.", full_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::state::ParaphraseRecord;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/start", "bot").unwrap(), Command::Start);
        assert_eq!(Command::parse("/toggle_writer", "bot").unwrap(), Command::ToggleWriter);
        assert_eq!(
            Command::parse("/toggle_context_summary@bot", "bot").unwrap(),
            Command::ToggleContextSummary
        );
        assert!(Command::parse("/unknown", "bot").is_err());
    }

    #[test]
    fn test_requires_auth() {
        assert!(Command::ToggleWriter.requires_auth());
        assert!(!Command::Data.requires_auth());
        assert!(!Command::Clear.requires_auth());
    }

    #[test]
    fn test_data_reply_small_is_json() {
        let mut state = ChatState::default();
        state.append_chat_history("hi", None);
        let reply = data_reply(&state);
        let parsed: ChatState = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed, state);
    }

    fn record(day: u32, text: &str) -> ParaphraseRecord {
        ParaphraseRecord {
            tag: "思考".into(),
            content: text.into(),
            model: "gemini-2.5-pro".into(),
            transcribed: text.into(),
            paraphrased: text.into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_data_reply_large_is_summary() {
        let mut state = ChatState::default();
        for day in 1..=20 {
            state.history.push(record(day, &"x".repeat(300)));
        }
        state.history.push(record(21, "last note"));

        let reply = data_reply(&state);
        assert!(reply.starts_with("Your data is too long to be displayed. It contains 21 entries."));
        assert!(reply.contains("The last message is last note."));
        assert!(reply.contains("from 2024-03-01T08:00:00+00:00 to 2024-03-21T08:00:00+00:00"));
    }

    #[test]
    fn test_data_reply_large_without_notes() {
        let mut state = ChatState::default();
        for _ in 0..10 {
            state.append_chat_history(&"y".repeat(500), None);
        }
        assert_eq!(
            data_reply(&state),
            "Your data is too long to be displayed. It contains 10 chat history entries."
        );
    }

    #[test]
    fn test_toggle_replies() {
        assert_eq!(writer_reply(true), "Writer's mode is set to be true");
        assert_eq!(context_summary_reply(false), "Context summary is set to be false");
        assert_eq!(denied_reply("Ann Lee"), "You (Ann Lee) are not in the allowed user list.");
    }
}
