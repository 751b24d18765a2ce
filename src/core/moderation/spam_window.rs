// Sliding-window message-rate tracking, one bucket per (guild, user).
//
// Buckets hold only timestamps inside the configured interval, so memory per
// key is bounded by the message threshold. A bucket is cleared entirely when
// it trips: the same burst cannot immediately re-trigger until the threshold
// accumulates again from empty.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Policy floors. Values below these are clamped, not rejected, so the
/// detector stays well-defined whatever the stored policy says.
pub const MIN_SPAM_MAX_MESSAGES: u32 = 2;
pub const MIN_SPAM_INTERVAL_SECONDS: u32 = 1;

/// Key count above which `record` opportunistically sweeps stale buckets.
const SWEEP_TRIGGER_KEYS: usize = 4096;

/// A bucket whose newest timestamp is older than this is dead weight;
/// several interval-widths beyond any realistic spam window.
const STALE_BUCKET_SECONDS: i64 = 600;

pub struct SpamTracker {
    buckets: DashMap<(u64, u64), Vec<DateTime<Utc>>>,
}

impl SpamTracker {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Record one message and report whether it tripped the rate limit.
    ///
    /// The whole read-modify-write happens under the bucket's entry guard, so
    /// concurrent handlers for the same (guild, user) are serialized.
    pub fn record(
        &self,
        guild_id: u64,
        user_id: u64,
        now: DateTime<Utc>,
        max_messages: u32,
        interval_seconds: u32,
    ) -> bool {
        let max_messages = max_messages.max(MIN_SPAM_MAX_MESSAGES) as usize;
        let interval = i64::from(interval_seconds.max(MIN_SPAM_INTERVAL_SECONDS));
        let cutoff = now - Duration::seconds(interval);

        let tripped = {
            let mut bucket = self.buckets.entry((guild_id, user_id)).or_default();
            bucket.retain(|ts| *ts > cutoff);
            bucket.push(now);
            if bucket.len() >= max_messages {
                bucket.clear();
                true
            } else {
                false
            }
        };

        if self.buckets.len() > SWEEP_TRIGGER_KEYS {
            self.sweep(now);
        }

        tripped
    }

    /// Drop buckets with no recent activity. Called on a size trigger from
    /// `record` and periodically from the maintenance task.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(STALE_BUCKET_SECONDS);
        self.buckets
            .retain(|_, bucket| bucket.last().is_some_and(|ts| *ts > cutoff));
    }

    /// Number of timestamps currently held for a key (0 if absent).
    #[cfg(test)]
    pub fn bucket_len(&self, guild_id: u64, user_id: u64) -> usize {
        self.buckets
            .get(&(guild_id, user_id))
            .map(|b| b.len())
            .unwrap_or(0)
    }

    /// Whether any state exists for a key at all.
    pub fn has_bucket(&self, guild_id: u64, user_id: u64) -> bool {
        self.buckets.contains_key(&(guild_id, user_id))
    }
}

impl Default for SpamTracker {
    fn default() -> Self {
        Self::new()
    }
}
