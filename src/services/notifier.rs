//! Outbound chat delivery

use crate::error::DeliveryError;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::RequestError;
use tracing::debug;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` to the user's private chat
    async fn send(&self, user_id: i64, text: &str) -> Result<(), DeliveryError>;
}

/// Sends messages through the Telegram Bot API
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot: Bot::new(bot_token),
        }
    }

    pub fn from_bot(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, user_id: i64, text: &str) -> Result<(), DeliveryError> {
        self.bot
            .send_message(ChatId(user_id), text)
            .await
            .map_err(|e| match e {
                // Blocked bot, deleted chat and similar permanent refusals
                RequestError::Api(api) => DeliveryError::Rejected {
                    user_id,
                    reason: api.to_string(),
                },
                other => DeliveryError::Transport {
                    user_id,
                    reason: other.to_string(),
                },
            })?;

        debug!(user_id = user_id, "Delivered chat message");
        Ok(())
    }
}
