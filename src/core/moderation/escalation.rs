// Escalation decision table: active warning count vs. policy thresholds.
//
// The decision is pure so the priority and mutual exclusivity of the stages
// can be tested without I/O. Applying the decision (hierarchy gating, the
// actual restriction call, the audit write) lives in the service.

use super::moderation_models::GuildPolicy;

/// Discord caps communication timeouts at 28 days.
pub const MAX_TIMEOUT_MINUTES: u32 = 28 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDecision {
    None,
    Timeout { minutes: u32 },
    Ban,
}

/// Evaluate the stages in fixed order: ban first, then timeout, then none.
/// A threshold of 0 disables its stage.
pub fn decide(active_count: u32, policy: &GuildPolicy) -> EscalationDecision {
    if policy.warn_ban_threshold > 0 && active_count >= policy.warn_ban_threshold {
        return EscalationDecision::Ban;
    }

    if policy.warn_timeout_threshold > 0 && active_count >= policy.warn_timeout_threshold {
        return EscalationDecision::Timeout {
            minutes: policy.warn_timeout_duration_minutes.min(MAX_TIMEOUT_MINUTES),
        };
    }

    EscalationDecision::None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(timeout: u32, ban: u32) -> GuildPolicy {
        let mut p = GuildPolicy::defaults(1);
        p.warn_timeout_threshold = timeout;
        p.warn_ban_threshold = ban;
        p
    }

    #[test]
    fn below_both_thresholds_does_nothing() {
        assert_eq!(decide(2, &policy(3, 5)), EscalationDecision::None);
        assert_eq!(decide(0, &policy(3, 5)), EscalationDecision::None);
    }

    #[test]
    fn timeout_triggers_exactly_at_its_threshold() {
        let p = policy(3, 5);
        assert_eq!(decide(2, &p), EscalationDecision::None);
        assert_eq!(decide(3, &p), EscalationDecision::Timeout { minutes: 60 });
        assert_eq!(decide(4, &p), EscalationDecision::Timeout { minutes: 60 });
    }

    #[test]
    fn ban_takes_priority_over_timeout() {
        let p = policy(3, 5);
        assert_eq!(decide(5, &p), EscalationDecision::Ban);
        assert_eq!(decide(9, &p), EscalationDecision::Ban);
    }

    #[test]
    fn zero_threshold_disables_its_stage() {
        assert_eq!(decide(100, &policy(0, 0)), EscalationDecision::None);
        assert_eq!(decide(100, &policy(3, 0)), EscalationDecision::Timeout { minutes: 60 });
        assert_eq!(decide(100, &policy(0, 5)), EscalationDecision::Ban);
    }

    #[test]
    fn timeout_duration_is_clamped_to_the_platform_ceiling() {
        let mut p = policy(3, 0);
        p.warn_timeout_duration_minutes = MAX_TIMEOUT_MINUTES + 1;
        assert_eq!(
            decide(3, &p),
            EscalationDecision::Timeout {
                minutes: MAX_TIMEOUT_MINUTES
            }
        );
    }
}
