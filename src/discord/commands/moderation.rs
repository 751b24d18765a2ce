// Manual moderation slash commands: warn, warnings, clearwarns,
// infractions, clear, kick, ban.

use crate::core::moderation::{sanitize_reason, ModerationService, Warning};
use crate::discord::automod_handler::member_meta;
use crate::discord::guild_actions::{SerenityModerationActions, SerenityNotifySink};
use crate::infra::moderation::SqliteModStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

pub struct Data {
    pub moderation:
        Arc<ModerationService<SqliteModStore, SerenityModerationActions, SerenityNotifySink>>,
}

/// Check the role hierarchy before a manual action. Returns a user-facing
/// refusal message when the action is not allowed.
fn can_moderate(
    guild: &serenity::Guild,
    actor: &serenity::Member,
    target: &serenity::Member,
    bot_id: serenity::UserId,
) -> Result<(), String> {
    fn top_position(guild: &serenity::Guild, roles: &[serenity::RoleId]) -> i64 {
        roles
            .iter()
            .filter_map(|id| guild.roles.get(id))
            .map(|role| i64::from(role.position))
            .max()
            .unwrap_or(0)
    }

    if actor.user.id == target.user.id {
        return Err("You cannot moderate yourself.".to_string());
    }
    if guild.owner_id == target.user.id {
        return Err("You cannot moderate the server owner.".to_string());
    }
    if guild.owner_id != actor.user.id
        && top_position(guild, &actor.roles) <= top_position(guild, &target.roles)
    {
        return Err("You need a role higher than the target's to do that.".to_string());
    }
    match guild.members.get(&bot_id) {
        None => Err("Could not validate my role hierarchy.".to_string()),
        Some(bot) if top_position(guild, &bot.roles) <= top_position(guild, &target.roles) => {
            Err("My highest role must be above the target's.".to_string())
        }
        Some(_) => Ok(()),
    }
}

/// Attribute a manual action to the operator in the audit-log reason.
fn build_reason(base: &str, actor: &serenity::User) -> String {
    format!("{} | Action by {} ({})", base, actor.name, actor.id)
}

async fn resolve_member(
    ctx: Context<'_>,
    guild_id: serenity::GuildId,
    user_id: serenity::UserId,
) -> Result<serenity::Member, String> {
    guild_id
        .member(ctx.serenity_context(), user_id)
        .await
        .map_err(|_| "That user is not a member of this server.".to_string())
}

/// Run the hierarchy check against the cached guild. The cache guard is
/// dropped before any await.
fn hierarchy_check(
    ctx: Context<'_>,
    guild_id: serenity::GuildId,
    actor: &serenity::Member,
    target: &serenity::Member,
) -> Result<(), String> {
    let cache = &ctx.serenity_context().cache;
    let bot_id = cache.current_user().id;
    match cache.guild(guild_id) {
        Some(guild) => can_moderate(&guild, actor, target, bot_id),
        None => Err("Could not validate my role hierarchy.".to_string()),
    }
}

fn format_warning_line(warning: &Warning) -> String {
    let expiry = match warning.expires_at {
        Some(at) => format!("expires <t:{}:R>", at.timestamp()),
        None => "never expires".to_string(),
    };
    format!(
        "• `#{}` <t:{}:d> by <@{}> ({}): {}",
        warning.id,
        warning.created_at.timestamp(),
        warning.moderator_id,
        expiry,
        warning.reason
    )
}

/// Warn a member and record it in the warning ledger.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn warn(
    ctx: Context<'_>,
    #[description = "Member to warn"] user: serenity::User,
    #[description = "Reason for the warning"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let actor = ctx.author_member().await.ok_or("Must be used in a server")?;

    let target = match resolve_member(ctx, guild_id, user.id).await {
        Ok(member) => member,
        Err(msg) => {
            ctx.say(format!("❌ {msg}")).await?;
            return Ok(());
        }
    };
    if let Err(msg) = hierarchy_check(ctx, guild_id, &actor, &target) {
        ctx.say(format!("❌ {msg}")).await?;
        return Ok(());
    }

    let meta = member_meta(ctx.serenity_context(), guild_id, &target);
    let result = ctx
        .data()
        .moderation
        .warn_member(
            guild_id.get(),
            user.id.get(),
            ctx.author().id.get(),
            reason.as_deref().unwrap_or_default(),
            &meta,
        )
        .await?;

    let expiry = match result.expires_at {
        Some(at) => format!("expires <t:{}:R>", at.timestamp()),
        None => "never expires".to_string(),
    };
    ctx.say(format!(
        "⚠️ Warned <@{}> (warning `#{}`, {}). Active warnings: {}/{} total. Escalation: {}.",
        user.id,
        result.warning_id,
        expiry,
        result.active_count,
        result.total_count,
        result.escalation.status()
    ))
    .await?;
    Ok(())
}

/// List a member's warnings.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn warnings(
    ctx: Context<'_>,
    #[description = "Member to look up"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let (total, active, rows) = ctx
        .data()
        .moderation
        .warnings(guild_id.get(), user.id.get(), 10)
        .await?;

    if rows.is_empty() {
        ctx.say(format!("<@{}> has no warnings.", user.id)).await?;
        return Ok(());
    }

    let lines: Vec<String> = rows.iter().map(format_warning_line).collect();
    ctx.say(format!(
        "Warnings for <@{}> ({} active / {} total):\n{}",
        user.id,
        active,
        total,
        lines.join("\n")
    ))
    .await?;
    Ok(())
}

/// Remove all warnings for a member.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn clearwarns(
    ctx: Context<'_>,
    #[description = "Member to clear"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let removed = ctx
        .data()
        .moderation
        .clear_warnings(guild_id.get(), user.id.get())
        .await?;

    if removed == 0 {
        ctx.say(format!("<@{}> had no warnings to clear.", user.id))
            .await?;
    } else {
        ctx.say(format!("✅ Cleared {} warning(s) for <@{}>.", removed, user.id))
            .await?;
    }
    Ok(())
}

/// Show a member's moderation history.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS"
)]
pub async fn infractions(
    ctx: Context<'_>,
    #[description = "Member to look up"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let rows = ctx
        .data()
        .moderation
        .infractions(guild_id.get(), user.id.get(), 15)
        .await?;

    if rows.is_empty() {
        ctx.say(format!("<@{}> has a clean record.", user.id)).await?;
        return Ok(());
    }

    let lines: Vec<String> = rows
        .iter()
        .map(|inf| {
            format!(
                "• <t:{}:d> **{}** by <@{}>: {}",
                inf.created_at.timestamp(),
                inf.action,
                inf.actor_id,
                inf.reason
            )
        })
        .collect();
    ctx.say(format!(
        "Infractions for <@{}>:\n{}",
        user.id,
        lines.join("\n")
    ))
    .await?;
    Ok(())
}

/// Purge sizes outside the bulk-delete endpoint's bounds are clamped,
/// not rejected.
fn clamp_clear_amount(amount: u32) -> u8 {
    amount.clamp(1, 100) as u8
}

/// Delete recent messages from the current channel.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn clear(
    ctx: Context<'_>,
    #[description = "Number of messages to delete (1 to 100)"]
    #[min = 1]
    #[max = 100]
    amount: u32,
) -> Result<(), Error> {
    ctx.guild_id().ok_or("Must be used in a server")?;
    let amount = clamp_clear_amount(amount);

    ctx.defer_ephemeral().await?;

    let http = &ctx.serenity_context().http;
    let channel_id = ctx.channel_id();
    let messages = channel_id
        .messages(http, serenity::GetMessages::new().limit(amount))
        .await?;
    let ids: Vec<serenity::MessageId> = messages.iter().map(|m| m.id).collect();

    // Bulk delete needs at least two ids; a single message goes through the
    // plain delete endpoint.
    match ids.len() {
        0 => {}
        1 => channel_id.delete_message(http, ids[0]).await?,
        _ => channel_id.delete_messages(http, &ids).await?,
    }

    tracing::info!(
        guild_id = ctx.guild_id().map(|g| g.get()).unwrap_or(0),
        channel_id = channel_id.get(),
        actor_id = ctx.author().id.get(),
        deleted = ids.len(),
        "bulk message clear"
    );
    ctx.say(format!("🧹 Deleted {} message(s).", ids.len())).await?;
    Ok(())
}

/// Kick a member from the server.
#[poise::command(slash_command, guild_only, required_permissions = "KICK_MEMBERS")]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Member to kick"] user: serenity::User,
    #[description = "Reason for the kick"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let actor = ctx.author_member().await.ok_or("Must be used in a server")?;

    let target = match resolve_member(ctx, guild_id, user.id).await {
        Ok(member) => member,
        Err(msg) => {
            ctx.say(format!("❌ {msg}")).await?;
            return Ok(());
        }
    };
    if let Err(msg) = hierarchy_check(ctx, guild_id, &actor, &target) {
        ctx.say(format!("❌ {msg}")).await?;
        return Ok(());
    }

    let base = sanitize_reason(reason.as_deref().unwrap_or_default());
    let audit_reason = build_reason(&base, ctx.author());
    if let Err(err) = ctx
        .data()
        .moderation
        .kick_member(
            guild_id.get(),
            user.id.get(),
            ctx.author().id.get(),
            &base,
            &audit_reason,
        )
        .await
    {
        ctx.say(format!("❌ Kick failed: {err}")).await?;
        return Ok(());
    }

    ctx.say(format!("👢 Kicked <@{}>: {}", user.id, base)).await?;
    Ok(())
}

/// Ban a member from the server.
#[poise::command(slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "Member to ban"] user: serenity::User,
    #[description = "Reason for the ban"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let actor = ctx.author_member().await.ok_or("Must be used in a server")?;

    let target = match resolve_member(ctx, guild_id, user.id).await {
        Ok(member) => member,
        Err(msg) => {
            ctx.say(format!("❌ {msg}")).await?;
            return Ok(());
        }
    };
    if let Err(msg) = hierarchy_check(ctx, guild_id, &actor, &target) {
        ctx.say(format!("❌ {msg}")).await?;
        return Ok(());
    }

    let base = sanitize_reason(reason.as_deref().unwrap_or_default());
    let audit_reason = build_reason(&base, ctx.author());
    if let Err(err) = ctx
        .data()
        .moderation
        .ban_member(
            guild_id.get(),
            user.id.get(),
            ctx.author().id.get(),
            &base,
            &audit_reason,
        )
        .await
    {
        ctx.say(format!("❌ Ban failed: {err}")).await?;
        return Ok(());
    }

    ctx.say(format!("🔨 Banned <@{}>: {}", user.id, base)).await?;
    Ok(())
}
