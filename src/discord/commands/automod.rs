// Automod configuration slash commands.

use crate::core::moderation::{GuildPolicy, ModerationError, PolicyUpdate};
use crate::discord::{Data, Error};
use poise::serenity_prelude as serenity;

type Context<'a> = poise::Context<'a, Data, Error>;

fn on_off(flag: bool) -> &'static str {
    if flag {
        "✅ on"
    } else {
        "❌ off"
    }
}

fn channel_mention(id: Option<u64>) -> String {
    match id {
        Some(id) => format!("<#{id}>"),
        None => "not set".to_string(),
    }
}

fn threshold(value: u32, unit: &str) -> String {
    if value == 0 {
        "disabled".to_string()
    } else {
        format!("{value} {unit}")
    }
}

/// Apply a policy update, translating validation failures into a
/// user-facing refusal instead of a command error.
async fn apply_update(
    ctx: Context<'_>,
    guild_id: serenity::GuildId,
    update: PolicyUpdate,
    success: impl FnOnce(&GuildPolicy) -> String,
) -> Result<(), Error> {
    match ctx.data().moderation.update_policy(guild_id.get(), update).await {
        Ok(policy) => {
            ctx.say(success(&policy)).await?;
            Ok(())
        }
        Err(ModerationError::InvalidPolicy(msg)) => {
            ctx.say(format!("❌ {msg}")).await?;
            Ok(())
        }
        Err(other) => Err(other.into()),
    }
}

/// Automod configuration commands.
#[poise::command(
    slash_command,
    subcommands("status", "enable", "disable", "rules", "escalation", "logchannels", "bypass"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn automod(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

/// Show the current automod policy.
#[poise::command(slash_command, guild_only)]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let policy = ctx.data().moderation.policy(guild_id.get()).await?;

    let bypass = if policy.bypass_role_ids.is_empty() {
        "none".to_string()
    } else {
        policy
            .bypass_role_ids
            .iter()
            .map(|id| format!("<@&{id}>"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let embed = serenity::CreateEmbed::new()
        .title("🛡️ Automod Status")
        .color(if policy.automod_enabled { 0x00FF00 } else { 0xFF0000 })
        .field("Engine", on_off(policy.automod_enabled), false)
        .field(
            "Rules",
            format!(
                "Anti-spam: {} ({} msgs / {} sec)\nAnti-link: {}\nMention flood: {} (limit {})",
                on_off(policy.anti_spam),
                policy.spam_max_messages,
                policy.spam_interval_seconds,
                on_off(policy.anti_link),
                on_off(policy.anti_mention_flood),
                policy.mention_limit
            ),
            false,
        )
        .field(
            "Escalation",
            format!(
                "Timeout: {} → {} minutes\nBan: {}\nWarnings expire: {}",
                threshold(policy.warn_timeout_threshold, "active warnings"),
                policy.warn_timeout_duration_minutes,
                threshold(policy.warn_ban_threshold, "active warnings"),
                threshold(policy.warn_expiration_days, "days")
            ),
            false,
        )
        .field(
            "Log Channels",
            format!(
                "Mod log: {}\nAutomod log: {}",
                channel_mention(policy.mod_log_channel_id),
                channel_mention(policy.automod_log_channel_id)
            ),
            false,
        )
        .field("Bypass Roles", bypass, false);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Enable the automod engine.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn enable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let update = PolicyUpdate {
        automod_enabled: Some(true),
        ..Default::default()
    };
    apply_update(ctx, guild_id, update, |_| {
        "✅ Automod has been **enabled**.".to_string()
    })
    .await
}

/// Disable the automod engine.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn disable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let update = PolicyUpdate {
        automod_enabled: Some(false),
        ..Default::default()
    };
    apply_update(ctx, guild_id, update, |_| {
        "❌ Automod has been **disabled**.".to_string()
    })
    .await
}

/// Configure individual automod rules.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn rules(
    ctx: Context<'_>,
    #[description = "Toggle the anti-spam rule"] anti_spam: Option<bool>,
    #[description = "Toggle the anti-link rule"] anti_link: Option<bool>,
    #[description = "Toggle the mention flood rule"] anti_mention_flood: Option<bool>,
    #[description = "Messages allowed inside the spam window (default: 5)"] spam_max_messages: Option<u32>,
    #[description = "Spam window length in seconds (default: 8)"] spam_interval_seconds: Option<u32>,
    #[description = "Mentions allowed per message (default: 5)"] mention_limit: Option<u32>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let update = PolicyUpdate {
        anti_spam,
        anti_link,
        anti_mention_flood,
        spam_max_messages,
        spam_interval_seconds,
        mention_limit,
        ..Default::default()
    };
    apply_update(ctx, guild_id, update, |policy| {
        format!(
            "✅ Rules updated.\n\
             • Anti-spam: {} ({} msgs / {} sec)\n\
             • Anti-link: {}\n\
             • Mention flood: {} (limit {})",
            on_off(policy.anti_spam),
            policy.spam_max_messages,
            policy.spam_interval_seconds,
            on_off(policy.anti_link),
            on_off(policy.anti_mention_flood),
            policy.mention_limit
        )
    })
    .await
}

/// Configure warning escalation thresholds.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn escalation(
    ctx: Context<'_>,
    #[description = "Active warnings before a timeout, 0 disables (default: 3)"]
    timeout_threshold: Option<u32>,
    #[description = "Active warnings before a ban, 0 disables (default: 5)"] ban_threshold: Option<u32>,
    #[description = "Days until a warning expires, 0 means never (default: 60)"]
    expiration_days: Option<u32>,
    #[description = "Timeout length in minutes (default: 60)"] timeout_minutes: Option<u32>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let update = PolicyUpdate {
        warn_timeout_threshold: timeout_threshold,
        warn_ban_threshold: ban_threshold,
        warn_expiration_days: expiration_days,
        warn_timeout_duration_minutes: timeout_minutes,
        ..Default::default()
    };
    apply_update(ctx, guild_id, update, |policy| {
        format!(
            "✅ Escalation updated.\n\
             • Timeout: {} → {} minutes\n\
             • Ban: {}\n\
             • Warnings expire: {}",
            threshold(policy.warn_timeout_threshold, "active warnings"),
            policy.warn_timeout_duration_minutes,
            threshold(policy.warn_ban_threshold, "active warnings"),
            threshold(policy.warn_expiration_days, "days")
        )
    })
    .await
}

/// Set or clear the moderation log channels.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn logchannels(
    ctx: Context<'_>,
    #[description = "Channel for manual moderation summaries"] mod_log: Option<serenity::GuildChannel>,
    #[description = "Channel for automod summaries"] automod_log: Option<serenity::GuildChannel>,
    #[description = "Clear both log channels"] clear: Option<bool>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let update = if clear.unwrap_or(false) {
        PolicyUpdate {
            mod_log_channel_id: Some(None),
            automod_log_channel_id: Some(None),
            ..Default::default()
        }
    } else {
        PolicyUpdate {
            mod_log_channel_id: mod_log.map(|c| Some(c.id.get())),
            automod_log_channel_id: automod_log.map(|c| Some(c.id.get())),
            ..Default::default()
        }
    };

    apply_update(ctx, guild_id, update, |policy| {
        format!(
            "✅ Log channels updated.\n• Mod log: {}\n• Automod log: {}",
            channel_mention(policy.mod_log_channel_id),
            channel_mention(policy.automod_log_channel_id)
        )
    })
    .await
}

/// Add or remove an automod bypass role.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn bypass(
    ctx: Context<'_>,
    #[description = "Role to add to the bypass list"] add: Option<serenity::Role>,
    #[description = "Role to remove from the bypass list"] remove: Option<serenity::Role>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let current = ctx.data().moderation.policy(guild_id.get()).await?;
    let mut roles = current.bypass_role_ids;
    if let Some(role) = add {
        roles.push(role.id.get());
    }
    if let Some(role) = remove {
        roles.retain(|id| *id != role.id.get());
    }

    let update = PolicyUpdate {
        bypass_role_ids: Some(roles),
        ..Default::default()
    };
    apply_update(ctx, guild_id, update, |policy| {
        if policy.bypass_role_ids.is_empty() {
            "✅ Bypass list updated. No roles bypass automod.".to_string()
        } else {
            format!(
                "✅ Bypass list updated: {}",
                policy
                    .bypass_role_ids
                    .iter()
                    .map(|id| format!("<@&{id}>"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        }
    })
    .await
}
