//! Short-lived record of moderation actions taken through the bot, so that
//! audit-log announcements can credit the moderator who issued them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;

pub const DEFAULT_MOD_ACTION_TTL_SECONDS: i64 = 45;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModAction {
    pub guild_id: String,
    pub action: String,
    pub actor_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub at: DateTime<Utc>,
}

/// Storage seam for recent moderation actions. Entries older than the
/// store's TTL are pruned from a `(guild, action)` bucket whenever that
/// bucket is touched.
pub trait ModActionStore: Send + Sync {
    fn record(&self, action: ModAction);

    /// Newest entry in the bucket whose `data` satisfies `matcher`.
    fn find_recent(
        &self,
        guild_id: &str,
        action: &str,
        now: DateTime<Utc>,
        matcher: &dyn Fn(&Map<String, Value>) -> bool,
    ) -> Option<ModAction>;
}

pub struct InMemoryModActionStore {
    ttl: Duration,
    buckets: Mutex<HashMap<(String, String), Vec<ModAction>>>,
}

impl InMemoryModActionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn prune(&self, entries: &mut Vec<ModAction>, now: DateTime<Utc>) {
        let cutoff = now - self.ttl;
        entries.retain(|entry| entry.at >= cutoff);
    }
}

impl Default for InMemoryModActionStore {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_MOD_ACTION_TTL_SECONDS))
    }
}

impl ModActionStore for InMemoryModActionStore {
    fn record(&self, action: ModAction) {
        if action.guild_id.is_empty() || action.action.is_empty() || action.actor_id.is_empty() {
            return;
        }
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = (action.guild_id.clone(), action.action.clone());
        let entries = buckets.entry(key).or_default();
        self.prune(entries, action.at);
        entries.push(action);
    }

    fn find_recent(
        &self,
        guild_id: &str,
        action: &str,
        now: DateTime<Utc>,
        matcher: &dyn Fn(&Map<String, Value>) -> bool,
    ) -> Option<ModAction> {
        if guild_id.is_empty() || action.is_empty() {
            return None;
        }
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = (guild_id.to_string(), action.to_string());
        let entries = buckets.get_mut(&key)?;
        self.prune(entries, now);
        let found = entries.iter().rev().find(|entry| matcher(&entry.data)).cloned();
        if entries.is_empty() {
            buckets.remove(&key);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
            + Duration::seconds(offset_secs)
    }

    fn action(actor: &str, target: &str, offset_secs: i64) -> ModAction {
        let mut data = Map::new();
        data.insert("target_id".to_string(), Value::String(target.to_string()));
        ModAction {
            guild_id: "g1".to_string(),
            action: "timeout".to_string(),
            actor_id: actor.to_string(),
            data,
            at: at(offset_secs),
        }
    }

    fn targets(target: &'static str) -> impl Fn(&Map<String, Value>) -> bool {
        move |data| data.get("target_id").and_then(Value::as_str) == Some(target)
    }

    #[test]
    fn newest_matching_entry_wins() {
        let store = InMemoryModActionStore::default();
        store.record(action("mod-a", "u1", 0));
        store.record(action("mod-b", "u1", 5));
        store.record(action("mod-c", "u2", 6));

        let found = store
            .find_recent("g1", "timeout", at(10), &targets("u1"))
            .expect("recent action");
        assert_eq!(found.actor_id, "mod-b");
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let store = InMemoryModActionStore::default();
        store.record(action("mod-a", "u1", 0));

        assert!(store
            .find_recent("g1", "timeout", at(46), &targets("u1"))
            .is_none());
        assert!(store
            .find_recent("g1", "timeout", at(1), &targets("u1"))
            .is_none());
    }

    #[test]
    fn buckets_are_scoped_by_guild_and_action() {
        let store = InMemoryModActionStore::default();
        store.record(action("mod-a", "u1", 0));

        assert!(store.find_recent("g2", "timeout", at(1), &|_| true).is_none());
        assert!(store.find_recent("g1", "kick", at(1), &|_| true).is_none());
        assert!(store.find_recent("g1", "timeout", at(1), &|_| true).is_some());
    }

    #[test]
    fn incomplete_actions_are_ignored() {
        let store = InMemoryModActionStore::default();
        store.record(action("", "u1", 0));
        assert!(store.find_recent("g1", "timeout", at(1), &|_| true).is_none());
    }
}
