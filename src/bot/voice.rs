//! Voice pipeline: transcode, transcribe, deep research, writer-mode paraphrase.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::bot::render::preview;
use crate::bot::response::{BotResponse, BotResult};
use crate::bot::router::BotCore;
use crate::bot::state::{ChatState, ParaphraseRecord};
use crate::error::BotError;

pub const NO_RESEARCH_ANSWER_REPLY: &str = "Deep research returned no answer.";

impl BotCore {
    /// Handle one voice message.
    ///
    /// Transcoding and transcription failures are returned as errors. Once
    /// the transcription exists, later stages report their failures as
    /// replies so the transcription always reaches the user.
    pub async fn handle_voice(
        &self,
        state: &mut ChatState,
        voice: &[u8],
        reply_text: Option<&str>,
        message_date: DateTime<Utc>,
    ) -> Result<BotResult, BotError> {
        let transcribed = self.transcribe(voice).await?;
        info!("🎤 Transcribed: \"{}\"", preview(&transcribed, 100));

        let mut responses = vec![
            BotResponse::text("Transcribed text:"),
            BotResponse::text(transcribed.clone()),
        ];

        let research_query = self.build_research_query(state, &transcribed, reply_text).await;

        match self.services.research.run(&research_query).await {
            Ok(answer) if answer.trim().is_empty() => {
                responses.push(BotResponse::text(NO_RESEARCH_ANSWER_REPLY));
            }
            Ok(answer) => {
                responses.push(BotResponse::text("Starting deep research..."));
                responses.push(BotResponse::text(answer.clone()));
                state.append_chat_history(&answer, None);
            }
            Err(e) => {
                warn!("Deep research failed: {}", e);
                responses.push(BotResponse::text(format!("Deep research failed: {}", e)));
            }
        }

        if state.writer_mode {
            match self.paraphrase(&transcribed, message_date).await {
                Ok(record) => {
                    responses.push(BotResponse::text(format!("Paraphrased using {}:", record.model)));
                    responses.push(BotResponse::text(record.paraphrased.clone()));
                    state.history.push(record);
                }
                Err(e) => {
                    warn!("Paraphrase failed: {}", e);
                    responses.push(BotResponse::text(format!("Paraphrase failed: {}", e)));
                }
            }
        }

        Ok(BotResult {
            responses,
            research_query: Some(research_query),
            transcribed_text: Some(transcribed),
        })
    }

    /// Transcode to the gateway's audio format and transcribe. Both temp
    /// files are removed when this returns, on every path.
    async fn transcribe(&self, voice: &[u8]) -> Result<String, BotError> {
        let input = tempfile::Builder::new().suffix(".ogg").tempfile()?;
        tokio::fs::write(input.path(), voice).await?;

        let output = tempfile::Builder::new()
            .suffix(&format!(".{}", self.config.audio_format))
            .tempfile()?;

        self.services
            .transcoder
            .transcode(input.path(), output.path(), &self.config.audio_format)
            .await?;
        self.services.llm.transcribe_audio(output.path()).await
    }

    /// Tag the note, pick the model for its tag, and rewrite it.
    async fn paraphrase(
        &self,
        transcribed: &str,
        message_date: DateTime<Utc>,
    ) -> Result<ParaphraseRecord, BotError> {
        let tagged = self.services.llm.preprocess_text(transcribed).await?;
        let model = if tagged.tag == self.config.chat_tag {
            &self.config.chat_model
        } else {
            &self.config.writing_model
        };
        info!("✍️ Tag \"{}\", paraphrasing with {}", tagged.tag, model);

        let paraphrased = self.services.llm.paraphrase_text(&tagged.content, model).await?;
        Ok(ParaphraseRecord {
            tag: tagged.tag,
            content: tagged.content,
            model: model.clone(),
            transcribed: transcribed.to_string(),
            paraphrased,
            timestamp: message_date,
        })
    }
}
