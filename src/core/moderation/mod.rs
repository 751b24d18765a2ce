// Moderation domain: automod classification, the warning ledger, and
// warning-count escalation.

pub mod classifier;
pub mod escalation;
mod moderation_models;
mod moderation_service;
pub mod policy_cache;
pub mod spam_window;

pub use moderation_models::{
    sanitize_reason, Decision, EscalationOutcome, GuildPolicy, Infraction, InfractionAction,
    MemberMeta, MessageEvent, MessageRef, NewInfraction, PolicyUpdate, ViolationKind, Warning,
    WarningResult, DEFAULT_REASON, MAX_REASON_LEN,
};
pub use moderation_service::{
    ActionError, ModStore, ModerationActions, ModerationError, ModerationService, NotifySink,
};
