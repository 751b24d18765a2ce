// Serenity-backed implementations of the core moderation action ports.

use crate::core::moderation::{ActionError, MessageRef, ModerationActions, NotifySink};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use std::sync::Arc;

fn action_err(err: serenity::Error) -> ActionError {
    // A 403 means the bot lacks the permission or stands too low in the
    // role hierarchy; everything else is treated as transport trouble.
    if let serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(ref resp)) = err {
        if resp.status_code.as_u16() == 403 {
            return ActionError::Forbidden(err.to_string());
        }
    }
    ActionError::Transport(err.to_string())
}

pub struct SerenityModerationActions {
    http: Arc<serenity::Http>,
}

impl SerenityModerationActions {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ModerationActions for SerenityModerationActions {
    async fn remove_message(&self, message: &MessageRef) -> Result<(), ActionError> {
        serenity::ChannelId::new(message.channel_id)
            .delete_message(&self.http, serenity::MessageId::new(message.message_id))
            .await
            .map_err(action_err)
    }

    async fn timeout_member(
        &self,
        guild_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), ActionError> {
        let timestamp = serenity::Timestamp::from_unix_timestamp(until.timestamp())
            .map_err(|e| ActionError::Transport(format!("bad timeout timestamp: {e}")))?;

        serenity::GuildId::new(guild_id)
            .edit_member(
                &self.http,
                serenity::UserId::new(user_id),
                serenity::EditMember::new()
                    .disable_communication_until_datetime(timestamp)
                    .audit_log_reason(reason),
            )
            .await
            .map(|_| ())
            .map_err(action_err)
    }

    async fn ban_member(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), ActionError> {
        // Never delete message history on an automated ban.
        serenity::GuildId::new(guild_id)
            .ban_with_reason(&self.http, serenity::UserId::new(user_id), 0, reason)
            .await
            .map_err(action_err)
    }

    async fn kick_member(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), ActionError> {
        serenity::GuildId::new(guild_id)
            .kick_with_reason(&self.http, serenity::UserId::new(user_id), reason)
            .await
            .map_err(action_err)
    }
}

/// Posts decision summaries to configured log channels.
pub struct SerenityNotifySink {
    http: Arc<serenity::Http>,
}

impl SerenityNotifySink {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NotifySink for SerenityNotifySink {
    async fn send(&self, channel_id: u64, text: &str) -> Result<(), ActionError> {
        serenity::ChannelId::new(channel_id)
            .say(&self.http, text)
            .await
            .map(|_| ())
            .map_err(action_err)
    }
}
