// Time-bounded cache of per-guild policy.
//
// Every message event needs the guild's policy; this keeps the common path
// off the database. Entries are replaced wholesale so concurrent readers
// never observe a partially-updated policy.

use super::moderation_models::GuildPolicy;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// How long a cached policy is served before the store is consulted again.
pub const POLICY_CACHE_TTL: Duration = Duration::from_secs(30);

struct CacheEntry {
    policy: GuildPolicy,
    fetched_at: Instant,
}

pub struct PolicyCache {
    entries: DashMap<u64, CacheEntry>,
    ttl: Duration,
}

impl PolicyCache {
    pub fn new() -> Self {
        Self::with_ttl(POLICY_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Return the cached policy if its age is within the TTL.
    pub fn get(&self, guild_id: u64) -> Option<GuildPolicy> {
        let entry = self.entries.get(&guild_id)?;
        if entry.fetched_at.elapsed() <= self.ttl {
            Some(entry.policy.clone())
        } else {
            None
        }
    }

    /// Store the authoritative value for a guild, resetting its age.
    ///
    /// Used both after a fetch and after a write (write-through), so a stale
    /// read can never race a just-committed update.
    pub fn put(&self, policy: GuildPolicy) {
        self.entries.insert(
            policy.guild_id,
            CacheEntry {
                policy,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, guild_id: u64) {
        self.entries.remove(&guild_id);
    }
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_served() {
        let cache = PolicyCache::new();
        let policy = GuildPolicy::defaults(1);
        cache.put(policy.clone());
        assert_eq!(cache.get(1), Some(policy));
    }

    #[test]
    fn missing_guild_returns_none() {
        let cache = PolicyCache::new();
        assert_eq!(cache.get(99), None);
    }

    #[test]
    fn expired_entry_is_not_served() {
        let cache = PolicyCache::with_ttl(Duration::ZERO);
        cache.put(GuildPolicy::defaults(1));
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get(1), None);
    }

    #[test]
    fn put_replaces_the_entry_wholesale() {
        let cache = PolicyCache::new();
        cache.put(GuildPolicy::defaults(1));

        let mut updated = GuildPolicy::defaults(1);
        updated.warn_ban_threshold = 9;
        cache.put(updated.clone());

        assert_eq!(cache.get(1), Some(updated));
    }

    #[test]
    fn invalidate_drops_the_entry() {
        let cache = PolicyCache::new();
        cache.put(GuildPolicy::defaults(1));
        cache.invalidate(1);
        assert_eq!(cache.get(1), None);
    }
}
