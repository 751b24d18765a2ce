// Translates incoming Discord messages into moderation events.

use crate::core::moderation::{Decision, MemberMeta, MessageEvent};
use crate::discord::{Data, Error};
use chrono::Utc;
use poise::serenity_prelude as serenity;

/// Highest role position a member holds, 0 when they hold none.
fn top_role_position(guild: &serenity::Guild, role_ids: &[serenity::RoleId]) -> i64 {
    role_ids
        .iter()
        .filter_map(|id| guild.roles.get(id))
        .map(|role| i64::from(role.position))
        .max()
        .unwrap_or(0)
}

/// Compute moderation-relevant member facts from cached guild state.
///
/// When the bot's own member entry is missing from the cache we report
/// `bot_outranks: false` so automated actions are skipped rather than
/// attempted blind.
pub fn member_meta_from_guild(
    guild: &serenity::Guild,
    bot_id: serenity::UserId,
    user_id: serenity::UserId,
    role_ids: &[serenity::RoleId],
) -> MemberMeta {
    let is_owner = guild.owner_id == user_id;
    let is_admin = is_owner
        || role_ids.iter().any(|id| {
            guild
                .roles
                .get(id)
                .is_some_and(|role| role.permissions.administrator())
        });

    let bot_outranks = guild
        .members
        .get(&bot_id)
        .map(|bot| top_role_position(guild, &bot.roles) > top_role_position(guild, role_ids))
        .unwrap_or(false);

    MemberMeta {
        is_admin,
        is_owner,
        bot_outranks,
        role_ids: role_ids.iter().map(|id| id.get()).collect(),
    }
}

/// Member facts for a fully-resolved member, used by the slash commands.
pub fn member_meta(
    ctx: &serenity::Context,
    guild_id: serenity::GuildId,
    member: &serenity::Member,
) -> MemberMeta {
    let bot_id = ctx.cache.current_user().id;
    match ctx.cache.guild(guild_id) {
        Some(guild) => member_meta_from_guild(&guild, bot_id, member.user.id, &member.roles),
        None => MemberMeta::default(),
    }
}

/// Run a guild message through the moderation pipeline.
pub async fn handle_message(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    data: &Data,
) -> Result<(), Error> {
    if msg.author.bot {
        return Ok(());
    }

    let guild_id = match msg.guild_id {
        Some(id) => id,
        None => return Ok(()),
    };

    // Users and roles both count toward the mention limit.
    let mention_count = (msg.mentions.len() + msg.mention_roles.len()) as u32;

    // Cache reads stay inside this block; the guard must not be held
    // across an await point.
    let member = {
        let bot_id = ctx.cache.current_user().id;
        let role_ids: Vec<serenity::RoleId> = msg
            .member
            .as_ref()
            .map(|m| m.roles.clone())
            .unwrap_or_default();
        match ctx.cache.guild(guild_id) {
            Some(guild) => member_meta_from_guild(&guild, bot_id, msg.author.id, &role_ids),
            None => MemberMeta::default(),
        }
    };

    let event = MessageEvent {
        guild_id: guild_id.get(),
        user_id: msg.author.id.get(),
        channel_id: msg.channel_id.get(),
        message_id: msg.id.get(),
        content: msg.content.clone(),
        mention_count,
        member,
        timestamp: Utc::now(),
    };

    match data.moderation.handle_message(event).await? {
        Decision::NoAction => {}
        Decision::Violation { rule, escalation, .. } => {
            tracing::debug!(
                guild_id = guild_id.get(),
                user_id = msg.author.id.get(),
                rule = %rule,
                escalation = %escalation.status(),
                "automod violation handled"
            );
        }
    }

    Ok(())
}
