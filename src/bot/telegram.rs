//! Telegram client: turns [`BotResponse`]s into sent messages.

use std::path::Path;
use std::sync::Arc;

use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, MessageId, ParseMode, ReplyParameters};
use teloxide::utils::command::BotCommands;
use teloxide::{ApiError, RequestError};
use tracing::{info, warn};

use crate::bot::commands::Command;
use crate::bot::render::{TELEGRAM_MESSAGE_LIMIT, preview, split_message, strip_html};
use crate::bot::response::{BotResponse, TextFormat};
use crate::bot::store::StateStore;
use crate::error::BotError;

fn parse_mode(format: TextFormat) -> ParseMode {
    match format {
        TextFormat::Html => ParseMode::Html,
    }
}

/// Telegram refused the message's markup.
fn is_markup_error(e: &RequestError) -> bool {
    matches!(e, RequestError::Api(ApiError::CantParseEntities(_)))
}

/// Chunks of `text` that are worth sending.
pub fn outbound_chunks(text: &str) -> Vec<String> {
    split_message(text, TELEGRAM_MESSAGE_LIMIT)
        .into_iter()
        .filter(|chunk| !chunk.trim().is_empty())
        .collect()
}

pub struct TelegramClient {
    bot: Bot,
    store: Arc<StateStore>,
}

impl TelegramClient {
    pub fn new(bot: Bot, store: Arc<StateStore>) -> Self {
        Self { bot, store }
    }

    /// Register the command list shown in Telegram's menu.
    pub async fn register_commands(&self) -> Result<(), BotError> {
        self.bot.set_my_commands(Command::bot_commands()).await?;
        Ok(())
    }

    /// Send `text` as replies to `reply_to`, split to fit. Each sent chunk is
    /// recorded in the message log. A chunk whose markup Telegram rejects is
    /// resent as plain text.
    pub async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        format: Option<TextFormat>,
        reply_to: MessageId,
    ) -> Result<(), BotError> {
        for chunk in outbound_chunks(text) {
            let mut request = self
                .bot
                .send_message(chat_id, chunk.clone())
                .reply_parameters(ReplyParameters::new(reply_to));
            if let Some(format) = format {
                request = request.parse_mode(parse_mode(format));
            }

            let sent = match request.await {
                Ok(sent) => sent,
                Err(e) if format.is_some() && is_markup_error(&e) => {
                    warn!("Markup rejected ({}), resending \"{}\" as plain text", e, preview(&chunk, 50));
                    self.bot
                        .send_message(chat_id, strip_html(&chunk))
                        .reply_parameters(ReplyParameters::new(reply_to))
                        .await?
                }
                Err(e) => return Err(e.into()),
            };
            self.record(chat_id, sent.id, Some(reply_to), &chunk);
        }
        Ok(())
    }

    /// Upload an audio file. With `delete_after_send`, the file is removed
    /// after the upload attempt whether or not it succeeded.
    pub async fn send_audio(
        &self,
        chat_id: ChatId,
        path: &Path,
        delete_after_send: bool,
        reply_to: MessageId,
    ) -> Result<(), BotError> {
        info!("🎵 Sending audio {:?} to chat {}", path, chat_id);
        let result = self
            .bot
            .send_audio(chat_id, InputFile::file(path))
            .reply_parameters(ReplyParameters::new(reply_to))
            .await;

        if delete_after_send {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!("Failed to delete {:?}: {}", path, e);
            }
        }

        result?;
        Ok(())
    }

    /// Render every response in order. Stops at the first failed send.
    pub async fn send_responses(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        responses: &[BotResponse],
    ) -> Result<(), BotError> {
        for response in responses {
            match response {
                BotResponse::Text { body, format } => {
                    self.send_text(chat_id, body, *format, reply_to).await?;
                }
                BotResponse::Audio {
                    path,
                    delete_after_send,
                } => {
                    self.send_audio(chat_id, path, *delete_after_send, reply_to).await?;
                }
            }
        }
        Ok(())
    }

    /// Download a file (e.g. a voice note) into memory.
    pub async fn download_file(&self, file_id: &FileId) -> Result<Vec<u8>, BotError> {
        let file = self.bot.get_file(file_id.clone()).await?;
        let mut data = Vec::new();
        self.bot.download_file(&file.path, &mut data).await?;
        info!("📥 Downloaded file ({} bytes)", data.len());
        Ok(data)
    }

    fn record(&self, chat_id: ChatId, message_id: MessageId, reply_to: Option<MessageId>, text: &str) {
        if let Err(e) = self
            .store
            .record_message(chat_id.0, message_id.0, reply_to.map(|id| id.0), text)
        {
            warn!("Failed to record message \"{}\": {}", preview(text, 50), e);
        }
    }
}
