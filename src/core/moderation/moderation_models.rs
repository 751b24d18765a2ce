// Moderation domain models - data structures for automod and the warning ledger.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts these to Discord-specific actions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Storage limit for warning/infraction reasons.
pub const MAX_REASON_LEN: usize = 512;

/// Placeholder used when a reason is empty after trimming.
pub const DEFAULT_REASON: &str = "No reason provided.";

/// Per-guild moderation policy.
///
/// One row per guild in the persistent store. All detection and escalation
/// behavior is driven by this struct; thresholds of 0 disable their stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildPolicy {
    pub guild_id: u64,
    /// Channel for manual moderation summaries (warn/kick/ban).
    pub mod_log_channel_id: Option<u64>,
    /// Channel for automod decision summaries.
    pub automod_log_channel_id: Option<u64>,
    /// Active warnings needed before an automatic timeout. 0 = disabled.
    pub warn_timeout_threshold: u32,
    /// Active warnings needed before an automatic ban. 0 = disabled.
    pub warn_ban_threshold: u32,
    /// Days until a warning stops counting as active. 0 = never expires.
    pub warn_expiration_days: u32,
    pub warn_timeout_duration_minutes: u32,
    /// Master switch for the automod engine.
    pub automod_enabled: bool,
    pub anti_spam: bool,
    pub anti_link: bool,
    pub anti_mention_flood: bool,
    pub spam_max_messages: u32,
    pub spam_interval_seconds: u32,
    pub mention_limit: u32,
    /// Roles exempt from all automod rules.
    pub bypass_role_ids: Vec<u64>,
}

impl GuildPolicy {
    /// Default policy for a guild that has never been configured.
    pub fn defaults(guild_id: u64) -> Self {
        Self {
            guild_id,
            mod_log_channel_id: None,
            automod_log_channel_id: None,
            warn_timeout_threshold: 3,
            warn_ban_threshold: 5,
            warn_expiration_days: 60,
            warn_timeout_duration_minutes: 60,
            automod_enabled: true,
            anti_spam: true,
            anti_link: true,
            anti_mention_flood: true,
            spam_max_messages: 5,
            spam_interval_seconds: 8,
            mention_limit: 5,
            bypass_role_ids: Vec::new(),
        }
    }

    /// Check the cross-field invariant: when both escalation thresholds are
    /// nonzero, the ban threshold must not be below the timeout threshold.
    pub fn validate(&self) -> Result<(), String> {
        if self.warn_ban_threshold > 0
            && self.warn_timeout_threshold > 0
            && self.warn_ban_threshold < self.warn_timeout_threshold
        {
            return Err(format!(
                "ban threshold ({}) must be greater than or equal to the timeout threshold ({})",
                self.warn_ban_threshold, self.warn_timeout_threshold
            ));
        }
        Ok(())
    }

    /// Expiration timestamp for a warning issued at `now`, or `None` when
    /// warnings never expire under this policy.
    pub fn warning_expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.warn_expiration_days == 0 {
            None
        } else {
            Some(now + Duration::days(i64::from(self.warn_expiration_days)))
        }
    }
}

/// A typed, partial policy update.
///
/// Replaces the original loosely-typed settings dictionary: every field is a
/// known, typed setter, so an unknown field name is a compile error rather
/// than a runtime check. `None` leaves the current value untouched; channel
/// fields use a nested `Option` so `Some(None)` explicitly unsets them.
#[derive(Debug, Clone, Default)]
pub struct PolicyUpdate {
    pub mod_log_channel_id: Option<Option<u64>>,
    pub automod_log_channel_id: Option<Option<u64>>,
    pub warn_timeout_threshold: Option<u32>,
    pub warn_ban_threshold: Option<u32>,
    pub warn_expiration_days: Option<u32>,
    pub warn_timeout_duration_minutes: Option<u32>,
    pub automod_enabled: Option<bool>,
    pub anti_spam: Option<bool>,
    pub anti_link: Option<bool>,
    pub anti_mention_flood: Option<bool>,
    pub spam_max_messages: Option<u32>,
    pub spam_interval_seconds: Option<u32>,
    pub mention_limit: Option<u32>,
    pub bypass_role_ids: Option<Vec<u64>>,
}

impl PolicyUpdate {
    /// Apply the update on top of an existing policy.
    pub fn apply(&self, policy: &mut GuildPolicy) {
        if let Some(v) = self.mod_log_channel_id {
            policy.mod_log_channel_id = v;
        }
        if let Some(v) = self.automod_log_channel_id {
            policy.automod_log_channel_id = v;
        }
        if let Some(v) = self.warn_timeout_threshold {
            policy.warn_timeout_threshold = v;
        }
        if let Some(v) = self.warn_ban_threshold {
            policy.warn_ban_threshold = v;
        }
        if let Some(v) = self.warn_expiration_days {
            policy.warn_expiration_days = v;
        }
        if let Some(v) = self.warn_timeout_duration_minutes {
            policy.warn_timeout_duration_minutes = v;
        }
        if let Some(v) = self.automod_enabled {
            policy.automod_enabled = v;
        }
        if let Some(v) = self.anti_spam {
            policy.anti_spam = v;
        }
        if let Some(v) = self.anti_link {
            policy.anti_link = v;
        }
        if let Some(v) = self.anti_mention_flood {
            policy.anti_mention_flood = v;
        }
        if let Some(v) = self.spam_max_messages {
            policy.spam_max_messages = v;
        }
        if let Some(v) = self.spam_interval_seconds {
            policy.spam_interval_seconds = v;
        }
        if let Some(v) = self.mention_limit {
            policy.mention_limit = v;
        }
        if let Some(v) = &self.bypass_role_ids {
            let mut roles = v.clone();
            roles.sort_unstable();
            roles.dedup();
            policy.bypass_role_ids = roles;
        }
    }
}

/// A durable warning record. Immutable once created, except for ledger-wide
/// deletion via `clear_warnings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub id: i64,
    pub guild_id: u64,
    pub user_id: u64,
    /// Issuer. The bot's own id for automatic warnings.
    pub moderator_id: u64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    /// `None` means the warning never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Warning {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Action tag for an audit-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfractionAction {
    Warn,
    AutomodSpam,
    AutomodLink,
    AutomodMentionFlood,
    AutoTimeoutWarns,
    AutoBanWarns,
    Kick,
    Ban,
}

impl InfractionAction {
    pub fn as_tag(self) -> &'static str {
        match self {
            InfractionAction::Warn => "warn",
            InfractionAction::AutomodSpam => "automod_spam",
            InfractionAction::AutomodLink => "automod_link",
            InfractionAction::AutomodMentionFlood => "automod_mention_flood",
            InfractionAction::AutoTimeoutWarns => "auto_timeout_warns",
            InfractionAction::AutoBanWarns => "auto_ban_warns",
            InfractionAction::Kick => "kick",
            InfractionAction::Ban => "ban",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "warn" => Some(InfractionAction::Warn),
            "automod_spam" => Some(InfractionAction::AutomodSpam),
            "automod_link" => Some(InfractionAction::AutomodLink),
            "automod_mention_flood" => Some(InfractionAction::AutomodMentionFlood),
            "auto_timeout_warns" => Some(InfractionAction::AutoTimeoutWarns),
            "auto_ban_warns" => Some(InfractionAction::AutoBanWarns),
            "kick" => Some(InfractionAction::Kick),
            "ban" => Some(InfractionAction::Ban),
            _ => None,
        }
    }
}

impl std::fmt::Display for InfractionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// An append-only audit entry for a moderation decision, manual or automatic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Infraction {
    pub id: i64,
    pub guild_id: u64,
    pub user_id: u64,
    pub actor_id: u64,
    pub action: InfractionAction,
    pub reason: String,
    pub related_warning_id: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Write model for a new audit entry.
#[derive(Debug, Clone)]
pub struct NewInfraction {
    pub guild_id: u64,
    pub user_id: u64,
    pub actor_id: u64,
    pub action: InfractionAction,
    pub reason: String,
    pub related_warning_id: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

/// Which automod rule a message violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Link,
    MentionFlood,
    Spam,
}

impl ViolationKind {
    pub fn action(self) -> InfractionAction {
        match self {
            ViolationKind::Link => InfractionAction::AutomodLink,
            ViolationKind::MentionFlood => InfractionAction::AutomodMentionFlood,
            ViolationKind::Spam => InfractionAction::AutomodSpam,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            ViolationKind::Link => "Automod: posted a blocked link",
            ViolationKind::MentionFlood => "Automod: too many mentions in one message",
            ViolationKind::Spam => "Automod: sending messages too quickly",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationKind::Link => write!(f, "link"),
            ViolationKind::MentionFlood => write!(f, "mention flood"),
            ViolationKind::Spam => write!(f, "spam"),
        }
    }
}

/// Privilege facts about a member, resolved by the platform layer.
///
/// Escalation gating needs these up front so a denied action never leaves
/// partial state behind.
#[derive(Debug, Clone, Default)]
pub struct MemberMeta {
    /// Holds the administrator capability (or is the owner).
    pub is_admin: bool,
    /// Is the guild owner / top authority.
    pub is_owner: bool,
    /// The bot's top role outranks the member's top role.
    pub bot_outranks: bool,
    pub role_ids: Vec<u64>,
}

/// Reference to a message that may need to be removed.
#[derive(Debug, Clone, Copy)]
pub struct MessageRef {
    pub channel_id: u64,
    pub message_id: u64,
}

/// An inbound message event, stripped down to what classification needs.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub guild_id: u64,
    pub user_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub content: String,
    /// User + role mentions combined.
    pub mention_count: u32,
    pub member: MemberMeta,
    pub timestamp: DateTime<Utc>,
}

impl MessageEvent {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            channel_id: self.channel_id,
            message_id: self.message_id,
        }
    }
}

/// What escalation did (or why it did not act). Expected conditions like
/// hierarchy denial are outcomes here, never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationOutcome {
    /// No threshold met or both stages disabled.
    None,
    Banned {
        status: String,
    },
    TimedOut {
        until: DateTime<Utc>,
        status: String,
    },
    /// A threshold was met but the action was not performed (hierarchy,
    /// admin exemption, or the external actor rejected it).
    Skipped {
        status: String,
    },
}

impl EscalationOutcome {
    pub fn status(&self) -> &str {
        match self {
            EscalationOutcome::None => "no escalation",
            EscalationOutcome::Banned { status } => status,
            EscalationOutcome::TimedOut { status, .. } => status,
            EscalationOutcome::Skipped { status } => status,
        }
    }
}

/// Outcome of processing one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NoAction,
    Violation {
        rule: ViolationKind,
        warning_id: i64,
        total_count: u32,
        active_count: u32,
        escalation: EscalationOutcome,
    },
}

/// Structured result of a manual warning.
#[derive(Debug, Clone)]
pub struct WarningResult {
    pub warning_id: i64,
    pub total_count: u32,
    pub active_count: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub escalation: EscalationOutcome,
}

/// Trim and cap a reason at the storage limit, falling back to a placeholder.
pub fn sanitize_reason(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_REASON.to_string();
    }
    trimmed.chars().take(MAX_REASON_LEN).collect()
}
