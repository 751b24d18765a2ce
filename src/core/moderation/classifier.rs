// Rule classification for inbound messages.
//
// Rules run in fixed priority order - link, mention flood, spam - and only
// the first match is reported. Bypass (admin capability or a bypass role) is
// checked before any rule, so exempt users never feed detector state; a
// disabled spam rule likewise never touches the tracker.

use super::moderation_models::{GuildPolicy, MessageEvent, ViolationKind};
use super::spam_window::SpamTracker;
use once_cell::sync::Lazy;
use regex::Regex;

static LINK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:https?://|www\.|discord\.gg/)\S+").expect("invalid link regex")
});

/// Classify a message against the guild's policy. `None` means no violation
/// and guarantees no downstream side effects.
pub fn classify(
    event: &MessageEvent,
    policy: &GuildPolicy,
    tracker: &SpamTracker,
) -> Option<ViolationKind> {
    if !policy.automod_enabled {
        return None;
    }

    if event.member.is_admin
        || event
            .member
            .role_ids
            .iter()
            .any(|role| policy.bypass_role_ids.contains(role))
    {
        return None;
    }

    if policy.anti_link && LINK_REGEX.is_match(&event.content) {
        return Some(ViolationKind::Link);
    }

    if policy.anti_mention_flood && event.mention_count > policy.mention_limit {
        return Some(ViolationKind::MentionFlood);
    }

    if policy.anti_spam
        && tracker.record(
            event.guild_id,
            event.user_id,
            event.timestamp,
            policy.spam_max_messages,
            policy.spam_interval_seconds,
        )
    {
        return Some(ViolationKind::Spam);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::MemberMeta;
    use chrono::Utc;

    fn event(content: &str, mentions: u32) -> MessageEvent {
        MessageEvent {
            guild_id: 1,
            user_id: 2,
            channel_id: 3,
            message_id: 4,
            content: content.to_string(),
            mention_count: mentions,
            member: MemberMeta::default(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn plain_message_is_clean() {
        let tracker = SpamTracker::new();
        let policy = GuildPolicy::defaults(1);
        assert_eq!(classify(&event("hello there", 0), &policy, &tracker), None);
    }

    #[test]
    fn link_rule_matches_common_forms() {
        let tracker = SpamTracker::new();
        let policy = GuildPolicy::defaults(1);
        for content in [
            "check https://example.com/x",
            "HTTP://caps.example",
            "visit www.example.com now",
            "join discord.gg/abc123",
        ] {
            assert_eq!(
                classify(&event(content, 0), &policy, &tracker),
                Some(ViolationKind::Link),
                "content: {content}"
            );
        }
    }

    #[test]
    fn mention_flood_is_strictly_above_the_limit() {
        let tracker = SpamTracker::new();
        let policy = GuildPolicy::defaults(1); // mention_limit = 5
        assert_eq!(classify(&event("hi", 5), &policy, &tracker), None);
        assert_eq!(
            classify(&event("hi", 6), &policy, &tracker),
            Some(ViolationKind::MentionFlood)
        );
    }

    #[test]
    fn first_matching_rule_wins() {
        let tracker = SpamTracker::new();
        let policy = GuildPolicy::defaults(1);
        // Both link and mention flood apply; link has priority.
        assert_eq!(
            classify(&event("https://example.com", 20), &policy, &tracker),
            Some(ViolationKind::Link)
        );
    }

    #[test]
    fn spam_rule_trips_via_the_tracker() {
        let tracker = SpamTracker::new();
        let policy = GuildPolicy::defaults(1); // 5 msgs / 8 s
        for _ in 0..4 {
            assert_eq!(classify(&event("hi", 0), &policy, &tracker), None);
        }
        assert_eq!(
            classify(&event("hi", 0), &policy, &tracker),
            Some(ViolationKind::Spam)
        );
    }

    #[test]
    fn engine_toggle_disables_everything() {
        let tracker = SpamTracker::new();
        let mut policy = GuildPolicy::defaults(1);
        policy.automod_enabled = false;
        assert_eq!(
            classify(&event("https://example.com", 20), &policy, &tracker),
            None
        );
        assert!(!tracker.has_bucket(1, 2));
    }

    #[test]
    fn disabled_spam_rule_accumulates_no_rate_state() {
        let tracker = SpamTracker::new();
        let mut policy = GuildPolicy::defaults(1);
        policy.anti_spam = false;
        for _ in 0..10 {
            assert_eq!(classify(&event("hi", 0), &policy, &tracker), None);
        }
        assert!(!tracker.has_bucket(1, 2));
    }

    #[test]
    fn admin_bypass_skips_rules_and_rate_state() {
        let tracker = SpamTracker::new();
        let policy = GuildPolicy::defaults(1);
        let mut ev = event("https://example.com", 20);
        ev.member.is_admin = true;
        for _ in 0..10 {
            assert_eq!(classify(&ev, &policy, &tracker), None);
        }
        assert!(!tracker.has_bucket(1, 2));
    }

    #[test]
    fn bypass_role_skips_rules_and_rate_state() {
        let tracker = SpamTracker::new();
        let mut policy = GuildPolicy::defaults(1);
        policy.bypass_role_ids = vec![777];
        let mut ev = event("hi", 0);
        ev.member.role_ids = vec![111, 777];
        for _ in 0..10 {
            assert_eq!(classify(&ev, &policy, &tracker), None);
        }
        // Spam detection is enabled, but the exemption happens at the
        // classifier layer before the detector is ever fed.
        assert!(!tracker.has_bucket(1, 2));
    }

    #[test]
    fn disabled_link_rule_falls_through_to_later_rules() {
        let tracker = SpamTracker::new();
        let mut policy = GuildPolicy::defaults(1);
        policy.anti_link = false;
        assert_eq!(
            classify(&event("https://example.com", 6), &policy, &tracker),
            Some(ViolationKind::MentionFlood)
        );
    }
}
