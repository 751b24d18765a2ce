// Moderation service - core business logic for the abuse-mitigation engine.
//
// This service ties together:
// - Policy lookups through a TTL cache (write-through on update)
// - Rule classification (link, mention flood, sliding-window spam)
// - The durable warning ledger with expiration semantics
// - Warning-count escalation (timeout -> ban) with hierarchy gating
// - Best-effort audit logging and channel notifications
//
// NO Discord dependencies here - just pure domain logic over three ports.

use super::classifier;
use super::escalation::{decide, EscalationDecision};
use super::moderation_models::{
    sanitize_reason, Decision, EscalationOutcome, GuildPolicy, Infraction, InfractionAction,
    MemberMeta, MessageEvent, MessageRef, NewInfraction, PolicyUpdate, Warning, WarningResult,
};
use super::policy_cache::PolicyCache;
use super::spam_window::SpamTracker;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid policy update: {0}")]
    InvalidPolicy(String),
}

/// Failure of an external moderation action or notification send.
///
/// These are expected conditions, reported as outcomes by the caller rather
/// than propagated as system errors.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

// ============================================================================
// PORTS
// ============================================================================

/// Persistent store for policy, warnings and the infraction audit log.
#[async_trait]
pub trait ModStore: Send + Sync {
    async fn get_policy(&self, guild_id: u64) -> Result<GuildPolicy, ModerationError>;

    /// Replace the stored policy wholesale.
    async fn save_policy(&self, policy: &GuildPolicy) -> Result<(), ModerationError>;

    /// Insert a warning and return `(id, total, active)` for the user,
    /// read immediately after the insert.
    async fn insert_warning(
        &self,
        guild_id: u64,
        user_id: u64,
        moderator_id: u64,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(i64, u32, u32), ModerationError>;

    async fn count_warnings(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<(u32, u32), ModerationError>;

    async fn list_warnings(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: u32,
    ) -> Result<Vec<Warning>, ModerationError>;

    /// Delete all warnings for the user, active or not. Returns the number
    /// removed; 0 is a valid outcome.
    async fn delete_warnings(&self, guild_id: u64, user_id: u64) -> Result<u64, ModerationError>;

    async fn insert_infraction(&self, infraction: NewInfraction) -> Result<i64, ModerationError>;

    async fn list_infractions(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: u32,
    ) -> Result<Vec<Infraction>, ModerationError>;
}

/// External moderation-action executor (the chat platform).
#[async_trait]
pub trait ModerationActions: Send + Sync {
    async fn remove_message(&self, message: &MessageRef) -> Result<(), ActionError>;

    async fn timeout_member(
        &self,
        guild_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), ActionError>;

    async fn ban_member(&self, guild_id: u64, user_id: u64, reason: &str)
        -> Result<(), ActionError>;

    async fn kick_member(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), ActionError>;
}

/// Notification sink for human-readable decision summaries.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn send(&self, channel_id: u64, text: &str) -> Result<(), ActionError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ModerationService<S: ModStore, A: ModerationActions, N: NotifySink> {
    store: S,
    actions: A,
    notifier: N,
    policies: PolicyCache,
    spam: SpamTracker,
    /// Issuer id for automatic warnings; set once the gateway session is up.
    bot_user_id: AtomicU64,
}

impl<S: ModStore, A: ModerationActions, N: NotifySink> ModerationService<S, A, N> {
    pub fn new(store: S, actions: A, notifier: N) -> Self {
        Self {
            store,
            actions,
            notifier,
            policies: PolicyCache::new(),
            spam: SpamTracker::new(),
            bot_user_id: AtomicU64::new(0),
        }
    }

    pub fn set_bot_identity(&self, user_id: u64) {
        self.bot_user_id.store(user_id, Ordering::Relaxed);
    }

    fn bot_id(&self) -> u64 {
        self.bot_user_id.load(Ordering::Relaxed)
    }

    /// Guild policy, served from cache when fresh.
    pub async fn policy(&self, guild_id: u64) -> Result<GuildPolicy, ModerationError> {
        if let Some(policy) = self.policies.get(guild_id) {
            return Ok(policy);
        }
        let policy = self.store.get_policy(guild_id).await?;
        self.policies.put(policy.clone());
        Ok(policy)
    }

    /// Validate and persist a policy change, then refresh the cache with the
    /// post-write value. An invariant violation fails before any write.
    pub async fn update_policy(
        &self,
        guild_id: u64,
        update: PolicyUpdate,
    ) -> Result<GuildPolicy, ModerationError> {
        let mut merged = self.store.get_policy(guild_id).await?;
        update.apply(&mut merged);
        merged
            .validate()
            .map_err(ModerationError::InvalidPolicy)?;

        self.store.save_policy(&merged).await?;
        self.policies.put(merged.clone());
        Ok(merged)
    }

    /// Entry point for inbound messages: classify, and on violation remove
    /// the content, audit, record a warning and evaluate escalation.
    pub async fn handle_message(&self, event: MessageEvent) -> Result<Decision, ModerationError> {
        let policy = self.policy(event.guild_id).await?;

        let Some(rule) = classifier::classify(&event, &policy, &self.spam) else {
            return Ok(Decision::NoAction);
        };

        tracing::info!(
            guild_id = event.guild_id,
            user_id = event.user_id,
            rule = %rule,
            "automod violation detected"
        );

        // Content removal is best-effort; the warning stands either way.
        if let Err(err) = self.actions.remove_message(&event.message_ref()).await {
            tracing::warn!(
                guild_id = event.guild_id,
                message_id = event.message_id,
                "failed to remove offending message: {err}"
            );
        }

        let bot_id = self.bot_id();
        self.record_infraction(NewInfraction {
            guild_id: event.guild_id,
            user_id: event.user_id,
            actor_id: bot_id,
            action: rule.action(),
            reason: rule.reason().to_string(),
            related_warning_id: None,
            expires_at: None,
            metadata: Some(serde_json::json!({
                "channel_id": event.channel_id,
                "message_id": event.message_id,
                "mention_count": event.mention_count,
            })),
        })
        .await;

        // A failed ledger write aborts the event here: escalation must never
        // run without a successfully recorded warning.
        let expires_at = policy.warning_expiry_from(Utc::now());
        let (warning_id, total_count, active_count) = self
            .store
            .insert_warning(
                event.guild_id,
                event.user_id,
                bot_id,
                rule.reason(),
                expires_at,
            )
            .await?;

        let escalation = self
            .apply_escalation(
                event.guild_id,
                event.user_id,
                &event.member,
                active_count,
                &policy,
            )
            .await;

        let summary = format!(
            "🛡️ <@{}> — {}. Active warnings: {}/{} total. Escalation: {}.",
            event.user_id,
            rule.reason(),
            active_count,
            total_count,
            escalation.status()
        );
        self.notify(policy.automod_log_channel_id, &summary).await;

        Ok(Decision::Violation {
            rule,
            warning_id,
            total_count,
            active_count,
            escalation,
        })
    }

    /// Operator-issued warning through the same ledger and escalation path,
    /// bypassing the classifier.
    pub async fn warn_member(
        &self,
        guild_id: u64,
        user_id: u64,
        issuer_id: u64,
        reason: &str,
        member: &MemberMeta,
    ) -> Result<WarningResult, ModerationError> {
        let policy = self.policy(guild_id).await?;
        let reason = sanitize_reason(reason);
        let expires_at = policy.warning_expiry_from(Utc::now());

        let (warning_id, total_count, active_count) = self
            .store
            .insert_warning(guild_id, user_id, issuer_id, &reason, expires_at)
            .await?;

        self.record_infraction(NewInfraction {
            guild_id,
            user_id,
            actor_id: issuer_id,
            action: InfractionAction::Warn,
            reason: reason.clone(),
            related_warning_id: Some(warning_id),
            expires_at,
            metadata: None,
        })
        .await;

        let escalation = self
            .apply_escalation(guild_id, user_id, member, active_count, &policy)
            .await;

        let summary = format!(
            "⚠️ <@{user_id}> warned by <@{issuer_id}>: {reason} \
             (active warnings: {active_count}). Escalation: {}.",
            escalation.status()
        );
        self.notify(policy.mod_log_channel_id, &summary).await;

        Ok(WarningResult {
            warning_id,
            total_count,
            active_count,
            expires_at,
            escalation,
        })
    }

    /// `(total, active, rows)` for a user's warnings, newest first.
    pub async fn warnings(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: u32,
    ) -> Result<(u32, u32, Vec<Warning>), ModerationError> {
        let (total, active) = self.store.count_warnings(guild_id, user_id).await?;
        let rows = self.store.list_warnings(guild_id, user_id, limit).await?;
        Ok((total, active, rows))
    }

    /// Remove all warnings for a user, expired or not. Returns the count.
    pub async fn clear_warnings(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<u64, ModerationError> {
        self.store.delete_warnings(guild_id, user_id).await
    }

    pub async fn infractions(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: u32,
    ) -> Result<Vec<Infraction>, ModerationError> {
        self.store.list_infractions(guild_id, user_id, limit).await
    }

    /// Operator-issued kick. `audit_reason` (with actor attribution) goes to
    /// the platform; the plain reason goes to the infraction log, where the
    /// actor is already a first-class column.
    pub async fn kick_member(
        &self,
        guild_id: u64,
        user_id: u64,
        actor_id: u64,
        reason: &str,
        audit_reason: &str,
    ) -> Result<(), ActionError> {
        self.actions
            .kick_member(guild_id, user_id, audit_reason)
            .await?;
        self.log_manual_action(guild_id, user_id, actor_id, InfractionAction::Kick, reason)
            .await;
        Ok(())
    }

    /// Operator-issued ban. Same split between platform and ledger reasons
    /// as `kick_member`.
    pub async fn ban_member(
        &self,
        guild_id: u64,
        user_id: u64,
        actor_id: u64,
        reason: &str,
        audit_reason: &str,
    ) -> Result<(), ActionError> {
        self.actions
            .ban_member(guild_id, user_id, audit_reason)
            .await?;
        self.log_manual_action(guild_id, user_id, actor_id, InfractionAction::Ban, reason)
            .await;
        Ok(())
    }

    /// Audit a manual action (kick/ban issued by an operator) and post the
    /// mod-log summary. Fire-and-forget, like every audit write.
    pub async fn log_manual_action(
        &self,
        guild_id: u64,
        user_id: u64,
        actor_id: u64,
        action: InfractionAction,
        reason: &str,
    ) {
        let reason = sanitize_reason(reason);
        self.record_infraction(NewInfraction {
            guild_id,
            user_id,
            actor_id,
            action,
            reason: reason.clone(),
            related_warning_id: None,
            expires_at: None,
            metadata: None,
        })
        .await;

        if let Ok(policy) = self.policy(guild_id).await {
            let summary =
                format!("📋 {action} — <@{user_id}> by <@{actor_id}>: {reason}");
            self.notify(policy.mod_log_channel_id, &summary).await;
        }
    }

    /// Drop stale rate-limit buckets. Called from the maintenance task.
    pub fn sweep_rate_state(&self) {
        self.spam.sweep(Utc::now());
    }

    // ========================================================================
    // ESCALATION
    // ========================================================================

    /// Apply the escalation decision for the current active count.
    ///
    /// Hierarchy denial and rejected actions come back as outcomes, never as
    /// errors; no partial state is left behind when a gate fails. Callers
    /// invoke this at most once per warning event.
    async fn apply_escalation(
        &self,
        guild_id: u64,
        user_id: u64,
        member: &MemberMeta,
        active_count: u32,
        policy: &GuildPolicy,
    ) -> EscalationOutcome {
        match decide(active_count, policy) {
            EscalationDecision::None => EscalationOutcome::None,
            EscalationDecision::Ban => {
                self.apply_ban(guild_id, user_id, member, active_count, policy)
                    .await
            }
            EscalationDecision::Timeout { minutes } => {
                self.apply_timeout(guild_id, user_id, member, active_count, policy, minutes)
                    .await
            }
        }
    }

    async fn apply_ban(
        &self,
        guild_id: u64,
        user_id: u64,
        member: &MemberMeta,
        active_count: u32,
        policy: &GuildPolicy,
    ) -> EscalationOutcome {
        if member.is_owner {
            return EscalationOutcome::Skipped {
                status: "ban skipped: cannot act on the server owner".to_string(),
            };
        }
        if !member.bot_outranks {
            return EscalationOutcome::Skipped {
                status: "ban skipped: target's top role is at or above mine".to_string(),
            };
        }

        let reason = format!(
            "Reached {active_count} active warnings (ban threshold {})",
            policy.warn_ban_threshold
        );
        match self.actions.ban_member(guild_id, user_id, &reason).await {
            Ok(()) => {
                tracing::info!(guild_id, user_id, active_count, "auto-ban applied");
                self.record_infraction(NewInfraction {
                    guild_id,
                    user_id,
                    actor_id: self.bot_id(),
                    action: InfractionAction::AutoBanWarns,
                    reason,
                    related_warning_id: None,
                    expires_at: None,
                    metadata: Some(serde_json::json!({
                        "active_warnings": active_count,
                        "threshold": policy.warn_ban_threshold,
                    })),
                })
                .await;
                EscalationOutcome::Banned {
                    status: format!(
                        "banned after reaching {active_count} active warnings (threshold {})",
                        policy.warn_ban_threshold
                    ),
                }
            }
            Err(err) => {
                tracing::warn!(guild_id, user_id, "auto-ban rejected: {err}");
                EscalationOutcome::Skipped {
                    status: format!("ban not applied: {err}"),
                }
            }
        }
    }

    async fn apply_timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        member: &MemberMeta,
        active_count: u32,
        policy: &GuildPolicy,
        minutes: u32,
    ) -> EscalationOutcome {
        if member.is_owner {
            return EscalationOutcome::Skipped {
                status: "timeout skipped: cannot act on the server owner".to_string(),
            };
        }
        if member.is_admin {
            return EscalationOutcome::Skipped {
                status: "timeout skipped: target has administrator permissions".to_string(),
            };
        }
        if !member.bot_outranks {
            return EscalationOutcome::Skipped {
                status: "timeout skipped: target's top role is at or above mine".to_string(),
            };
        }

        let until = Utc::now() + Duration::minutes(i64::from(minutes));
        let reason = format!(
            "Reached {active_count} active warnings (timeout threshold {})",
            policy.warn_timeout_threshold
        );
        match self
            .actions
            .timeout_member(guild_id, user_id, until, &reason)
            .await
        {
            Ok(()) => {
                tracing::info!(guild_id, user_id, active_count, minutes, "auto-timeout applied");
                self.record_infraction(NewInfraction {
                    guild_id,
                    user_id,
                    actor_id: self.bot_id(),
                    action: InfractionAction::AutoTimeoutWarns,
                    reason,
                    related_warning_id: None,
                    expires_at: Some(until),
                    metadata: Some(serde_json::json!({
                        "active_warnings": active_count,
                        "threshold": policy.warn_timeout_threshold,
                        "minutes": minutes,
                    })),
                })
                .await;
                EscalationOutcome::TimedOut {
                    until,
                    status: format!(
                        "timed out for {minutes} minutes after reaching {active_count} \
                         active warnings (threshold {})",
                        policy.warn_timeout_threshold
                    ),
                }
            }
            Err(err) => {
                tracing::warn!(guild_id, user_id, "auto-timeout rejected: {err}");
                EscalationOutcome::Skipped {
                    status: format!("timeout not applied: {err}"),
                }
            }
        }
    }

    // ========================================================================
    // BEST-EFFORT SIDE EFFECTS
    // ========================================================================

    /// Audit write that never propagates failure: the moderation decision
    /// stands even if its trail cannot be recorded.
    async fn record_infraction(&self, infraction: NewInfraction) {
        let (guild_id, user_id, action) =
            (infraction.guild_id, infraction.user_id, infraction.action);
        if let Err(err) = self.store.insert_infraction(infraction).await {
            tracing::error!(
                guild_id,
                user_id,
                action = %action,
                "failed to write infraction audit entry: {err}"
            );
        }
    }

    /// Post a summary to a configured channel; unset channel is a no-op and
    /// delivery failure is swallowed, never retried.
    async fn notify(&self, channel_id: Option<u64>, text: &str) {
        let Some(channel_id) = channel_id else {
            return;
        };
        if let Err(err) = self.notifier.send(channel_id, text).await {
            tracing::warn!(channel_id, "failed to post moderation summary: {err}");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::ViolationKind;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, AtomicI64};
    use std::sync::{Arc, Mutex};

    /// In-memory store for testing. Cloning shares the underlying state so
    /// tests keep a handle after moving a clone into the service.
    #[derive(Clone, Default)]
    struct MockStore {
        policies: Arc<DashMap<u64, GuildPolicy>>,
        warnings: Arc<DashMap<(u64, u64), Vec<Warning>>>,
        infractions: Arc<Mutex<Vec<NewInfraction>>>,
        next_id: Arc<AtomicI64>,
        fail_warning_insert: Arc<AtomicBool>,
        fail_infraction_insert: Arc<AtomicBool>,
    }

    impl MockStore {
        fn infraction_actions(&self) -> Vec<InfractionAction> {
            self.infractions
                .lock()
                .unwrap()
                .iter()
                .map(|i| i.action)
                .collect()
        }
    }

    #[async_trait]
    impl ModStore for MockStore {
        async fn get_policy(&self, guild_id: u64) -> Result<GuildPolicy, ModerationError> {
            Ok(self
                .policies
                .get(&guild_id)
                .map(|p| p.clone())
                .unwrap_or_else(|| GuildPolicy::defaults(guild_id)))
        }

        async fn save_policy(&self, policy: &GuildPolicy) -> Result<(), ModerationError> {
            self.policies.insert(policy.guild_id, policy.clone());
            Ok(())
        }

        async fn insert_warning(
            &self,
            guild_id: u64,
            user_id: u64,
            moderator_id: u64,
            reason: &str,
            expires_at: Option<DateTime<Utc>>,
        ) -> Result<(i64, u32, u32), ModerationError> {
            if self.fail_warning_insert.load(Ordering::Relaxed) {
                return Err(ModerationError::Storage("insert failed".to_string()));
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            self.warnings
                .entry((guild_id, user_id))
                .or_default()
                .push(Warning {
                    id,
                    guild_id,
                    user_id,
                    moderator_id,
                    reason: reason.to_string(),
                    created_at: Utc::now(),
                    expires_at,
                });
            let (total, active) = self.count_warnings(guild_id, user_id).await?;
            Ok((id, total, active))
        }

        async fn count_warnings(
            &self,
            guild_id: u64,
            user_id: u64,
        ) -> Result<(u32, u32), ModerationError> {
            let now = Utc::now();
            let rows = self.warnings.get(&(guild_id, user_id));
            let total = rows.as_ref().map(|r| r.len()).unwrap_or(0) as u32;
            let active = rows
                .as_ref()
                .map(|r| r.iter().filter(|w| w.is_active(now)).count())
                .unwrap_or(0) as u32;
            Ok((total, active))
        }

        async fn list_warnings(
            &self,
            guild_id: u64,
            user_id: u64,
            limit: u32,
        ) -> Result<Vec<Warning>, ModerationError> {
            let mut rows = self
                .warnings
                .get(&(guild_id, user_id))
                .map(|r| r.clone())
                .unwrap_or_default();
            rows.reverse();
            rows.truncate(limit as usize);
            Ok(rows)
        }

        async fn delete_warnings(
            &self,
            guild_id: u64,
            user_id: u64,
        ) -> Result<u64, ModerationError> {
            Ok(self
                .warnings
                .remove(&(guild_id, user_id))
                .map(|(_, rows)| rows.len() as u64)
                .unwrap_or(0))
        }

        async fn insert_infraction(
            &self,
            infraction: NewInfraction,
        ) -> Result<i64, ModerationError> {
            if self.fail_infraction_insert.load(Ordering::Relaxed) {
                return Err(ModerationError::Storage("insert failed".to_string()));
            }
            self.infractions.lock().unwrap().push(infraction);
            Ok(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
        }

        async fn list_infractions(
            &self,
            guild_id: u64,
            user_id: u64,
            limit: u32,
        ) -> Result<Vec<Infraction>, ModerationError> {
            let rows = self
                .infractions
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.guild_id == guild_id && i.user_id == user_id)
                .rev()
                .take(limit as usize)
                .enumerate()
                .map(|(idx, i)| Infraction {
                    id: idx as i64,
                    guild_id: i.guild_id,
                    user_id: i.user_id,
                    actor_id: i.actor_id,
                    action: i.action,
                    reason: i.reason.clone(),
                    related_warning_id: i.related_warning_id,
                    expires_at: i.expires_at,
                    metadata: i.metadata.clone(),
                    created_at: Utc::now(),
                })
                .collect();
            Ok(rows)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum ActionCall {
        Remove(u64),
        Timeout(u64),
        Ban(u64),
        Kick(u64),
    }

    #[derive(Clone, Default)]
    struct MockActions {
        deny_all: Arc<AtomicBool>,
        calls: Arc<Mutex<Vec<ActionCall>>>,
    }

    impl MockActions {
        fn calls(&self) -> Vec<ActionCall> {
            self.calls.lock().unwrap().clone()
        }

        fn check(&self) -> Result<(), ActionError> {
            if self.deny_all.load(Ordering::Relaxed) {
                Err(ActionError::Forbidden("missing permissions".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ModerationActions for MockActions {
        async fn remove_message(&self, message: &MessageRef) -> Result<(), ActionError> {
            self.check()?;
            self.calls
                .lock()
                .unwrap()
                .push(ActionCall::Remove(message.message_id));
            Ok(())
        }

        async fn timeout_member(
            &self,
            _guild_id: u64,
            user_id: u64,
            _until: DateTime<Utc>,
            _reason: &str,
        ) -> Result<(), ActionError> {
            self.check()?;
            self.calls.lock().unwrap().push(ActionCall::Timeout(user_id));
            Ok(())
        }

        async fn ban_member(
            &self,
            _guild_id: u64,
            user_id: u64,
            _reason: &str,
        ) -> Result<(), ActionError> {
            self.check()?;
            self.calls.lock().unwrap().push(ActionCall::Ban(user_id));
            Ok(())
        }

        async fn kick_member(
            &self,
            _guild_id: u64,
            user_id: u64,
            _reason: &str,
        ) -> Result<(), ActionError> {
            self.check()?;
            self.calls.lock().unwrap().push(ActionCall::Kick(user_id));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MockNotifier {
        sent: Arc<Mutex<Vec<(u64, String)>>>,
    }

    #[async_trait]
    impl NotifySink for MockNotifier {
        async fn send(&self, channel_id: u64, text: &str) -> Result<(), ActionError> {
            self.sent
                .lock()
                .unwrap()
                .push((channel_id, text.to_string()));
            Ok(())
        }
    }

    type TestService = ModerationService<MockStore, MockActions, MockNotifier>;

    fn service() -> (TestService, MockStore, MockActions, MockNotifier) {
        let store = MockStore::default();
        let actions = MockActions::default();
        let notifier = MockNotifier::default();
        let svc = ModerationService::new(store.clone(), actions.clone(), notifier.clone());
        svc.set_bot_identity(999);
        (svc, store, actions, notifier)
    }

    fn rankable() -> MemberMeta {
        MemberMeta {
            bot_outranks: true,
            ..Default::default()
        }
    }

    fn event_at(user_id: u64, ts: DateTime<Utc>) -> MessageEvent {
        MessageEvent {
            guild_id: 1,
            user_id,
            channel_id: 10,
            message_id: 100,
            content: "hello".to_string(),
            mention_count: 0,
            member: rankable(),
            timestamp: ts,
        }
    }

    /// Run one full spam burst (policy default: 5 messages / 8 s) and return
    /// the violation decision from the final message.
    async fn run_burst(svc: &TestService, user_id: u64, base: DateTime<Utc>) -> Decision {
        let mut last = Decision::NoAction;
        for i in 0..5 {
            last = svc
                .handle_message(event_at(user_id, base + Duration::seconds(i)))
                .await
                .unwrap();
        }
        last
    }

    #[tokio::test]
    async fn manual_warning_counts_are_monotonic() {
        let (svc, _store, _actions, _notifier) = service();
        // Disable escalation so only the ledger is exercised.
        svc.update_policy(
            1,
            PolicyUpdate {
                warn_timeout_threshold: Some(0),
                warn_ban_threshold: Some(0),
                warn_expiration_days: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        for n in 1..=4u32 {
            let result = svc
                .warn_member(1, 2, 50, "being rude", &rankable())
                .await
                .unwrap();
            assert_eq!(result.total_count, n);
            assert_eq!(result.active_count, n);
            assert!(result.active_count <= result.total_count);
            // warn_expiration_days = 0: the warning never expires.
            assert_eq!(result.expires_at, None);
            assert_eq!(result.escalation, EscalationOutcome::None);
        }
    }

    #[tokio::test]
    async fn burst_scenario_escalates_to_timeout_then_ban() {
        let (svc, store, actions, _notifier) = service();
        let base = Utc::now();

        // Bursts are spaced far apart so windows never overlap.
        let burst = |n: i64| base + Duration::seconds(n * 100);

        // Warnings 1 and 2: violation, no escalation.
        for n in 0..2 {
            match run_burst(&svc, 2, burst(n)).await {
                Decision::Violation {
                    rule,
                    active_count,
                    escalation,
                    ..
                } => {
                    assert_eq!(rule, ViolationKind::Spam);
                    assert_eq!(active_count, n as u32 + 1);
                    assert_eq!(escalation, EscalationOutcome::None);
                }
                other => panic!("expected violation, got {other:?}"),
            }
        }

        // Warning 3 crosses the timeout threshold.
        match run_burst(&svc, 2, burst(2)).await {
            Decision::Violation { escalation, .. } => {
                assert!(matches!(escalation, EscalationOutcome::TimedOut { .. }));
            }
            other => panic!("expected violation, got {other:?}"),
        }
        assert!(actions.calls().contains(&ActionCall::Timeout(2)));

        // Warning 4 is still in timeout territory; warning 5 crosses the ban
        // threshold, which overrides timeout.
        run_burst(&svc, 2, burst(3)).await;
        match run_burst(&svc, 2, burst(4)).await {
            Decision::Violation {
                active_count,
                escalation,
                ..
            } => {
                assert_eq!(active_count, 5);
                assert!(matches!(escalation, EscalationOutcome::Banned { .. }));
            }
            other => panic!("expected violation, got {other:?}"),
        }
        assert!(actions.calls().contains(&ActionCall::Ban(2)));

        let tags = store.infraction_actions();
        assert!(tags.contains(&InfractionAction::AutomodSpam));
        assert!(tags.contains(&InfractionAction::AutoTimeoutWarns));
        assert!(tags.contains(&InfractionAction::AutoBanWarns));
    }

    #[tokio::test]
    async fn bypassed_user_produces_no_side_effects() {
        let (svc, store, actions, notifier) = service();
        let base = Utc::now();

        for i in 0..10 {
            let mut event = event_at(2, base + Duration::seconds(i));
            event.member.is_admin = true;
            let decision = svc.handle_message(event).await.unwrap();
            assert_eq!(decision, Decision::NoAction);
        }

        assert_eq!(store.count_warnings(1, 2).await.unwrap(), (0, 0));
        assert!(actions.calls().is_empty());
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn hierarchy_denied_ban_is_an_outcome_not_an_error() {
        let (svc, store, actions, _notifier) = service();
        svc.update_policy(
            1,
            PolicyUpdate {
                warn_timeout_threshold: Some(0),
                warn_ban_threshold: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let meta = MemberMeta {
            bot_outranks: false,
            ..Default::default()
        };
        let result = svc.warn_member(1, 2, 50, "test", &meta).await.unwrap();

        match result.escalation {
            EscalationOutcome::Skipped { status } => {
                assert!(status.contains("top role"), "status: {status}")
            }
            other => panic!("expected skip, got {other:?}"),
        }
        assert!(!actions.calls().contains(&ActionCall::Ban(2)));
        assert!(!store
            .infraction_actions()
            .contains(&InfractionAction::AutoBanWarns));
    }

    #[tokio::test]
    async fn admin_target_is_exempt_from_timeout() {
        let (svc, _store, actions, _notifier) = service();
        svc.update_policy(
            1,
            PolicyUpdate {
                warn_timeout_threshold: Some(1),
                warn_ban_threshold: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let meta = MemberMeta {
            is_admin: true,
            bot_outranks: true,
            ..Default::default()
        };
        let result = svc.warn_member(1, 2, 50, "test", &meta).await.unwrap();

        match result.escalation {
            EscalationOutcome::Skipped { status } => {
                assert!(status.contains("administrator"), "status: {status}")
            }
            other => panic!("expected skip, got {other:?}"),
        }
        assert!(actions.calls().is_empty());
    }

    #[tokio::test]
    async fn rejected_action_is_reported_and_warning_stands() {
        let store = MockStore::default();
        let denied = MockActions::default();
        denied.deny_all.store(true, Ordering::Relaxed);
        let svc = ModerationService::new(store.clone(), denied, MockNotifier::default());
        svc.set_bot_identity(999);

        svc.update_policy(
            1,
            PolicyUpdate {
                warn_timeout_threshold: Some(0),
                warn_ban_threshold: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let result = svc.warn_member(1, 2, 50, "test", &rankable()).await.unwrap();

        assert!(matches!(result.escalation, EscalationOutcome::Skipped { .. }));
        // The warning itself was committed and is not rolled back.
        assert_eq!(store.count_warnings(1, 2).await.unwrap(), (1, 1));
    }

    #[tokio::test]
    async fn ledger_failure_aborts_before_escalation() {
        let (svc, store, actions, _notifier) = service();
        store.fail_warning_insert.store(true, Ordering::Relaxed);
        let base = Utc::now();

        let mut result = Ok(Decision::NoAction);
        for i in 0..5 {
            result = svc.handle_message(event_at(2, base + Duration::seconds(i))).await;
        }

        assert!(matches!(result, Err(ModerationError::Storage(_))));
        // The content-removal attempt happened, but no restriction did.
        assert!(!actions
            .calls()
            .iter()
            .any(|c| matches!(c, ActionCall::Ban(_) | ActionCall::Timeout(_))));
    }

    #[tokio::test]
    async fn audit_failure_never_blocks_the_flow() {
        let (svc, store, _actions, _notifier) = service();
        store.fail_infraction_insert.store(true, Ordering::Relaxed);

        let result = svc.warn_member(1, 2, 50, "test", &rankable()).await.unwrap();
        assert_eq!(result.total_count, 1);
    }

    #[tokio::test]
    async fn invalid_policy_update_is_rejected_before_any_write() {
        let (svc, store, _actions, _notifier) = service();

        let err = svc
            .update_policy(
                1,
                PolicyUpdate {
                    warn_timeout_threshold: Some(4),
                    warn_ban_threshold: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ModerationError::InvalidPolicy(_)));
        // Nothing was persisted.
        assert!(store.policies.get(&1).is_none());
        // The effective policy is untouched.
        assert_eq!(svc.policy(1).await.unwrap(), GuildPolicy::defaults(1));
    }

    #[tokio::test]
    async fn policy_update_refreshes_the_cache_write_through() {
        let (svc, store, _actions, _notifier) = service();

        let updated = svc
            .update_policy(
                1,
                PolicyUpdate {
                    mention_limit: Some(9),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.mention_limit, 9);

        // Mutate the store behind the cache's back; a fresh cache entry from
        // the write-through still wins within the TTL.
        store.policies.insert(1, GuildPolicy::defaults(1));
        assert_eq!(svc.policy(1).await.unwrap().mention_limit, 9);
    }

    #[tokio::test]
    async fn manual_kick_and_ban_are_executed_and_audited() {
        let (svc, store, actions, notifier) = service();
        svc.update_policy(
            1,
            PolicyUpdate {
                mod_log_channel_id: Some(Some(444)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        svc.kick_member(1, 2, 50, "trolling", "trolling | Action by mod (50)")
            .await
            .unwrap();
        svc.ban_member(1, 3, 50, "raiding", "raiding | Action by mod (50)")
            .await
            .unwrap();

        assert!(actions.calls().contains(&ActionCall::Kick(2)));
        assert!(actions.calls().contains(&ActionCall::Ban(3)));

        let tags = store.infraction_actions();
        assert!(tags.contains(&InfractionAction::Kick));
        assert!(tags.contains(&InfractionAction::Ban));

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.iter().filter(|(ch, _)| *ch == 444).count(), 2);
    }

    #[tokio::test]
    async fn denied_manual_action_writes_no_audit_entry() {
        let store = MockStore::default();
        let denied = MockActions::default();
        denied.deny_all.store(true, Ordering::Relaxed);
        let svc = ModerationService::new(store.clone(), denied, MockNotifier::default());
        svc.set_bot_identity(999);

        let err = svc.kick_member(1, 2, 50, "x", "x").await.unwrap_err();
        assert!(matches!(err, ActionError::Forbidden(_)));
        assert!(store.infraction_actions().is_empty());
    }

    #[tokio::test]
    async fn clear_warnings_on_clean_user_returns_zero() {
        let (svc, _store, actions, _notifier) = service();
        assert_eq!(svc.clear_warnings(1, 2).await.unwrap(), 0);
        assert!(actions.calls().is_empty());
    }

    #[tokio::test]
    async fn automod_summary_is_posted_to_the_configured_channel() {
        let (svc, _store, _actions, notifier) = service();
        svc.update_policy(
            1,
            PolicyUpdate {
                automod_log_channel_id: Some(Some(555)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        run_burst(&svc, 2, Utc::now()).await;

        let sent = notifier.sent.lock().unwrap();
        assert!(sent.iter().any(|(ch, _)| *ch == 555));
    }
}
