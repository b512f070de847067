// In-process store used by tests and by `storage = "memory"` deployments.
// Expiry is measured on tokio's clock so paused-time tests can fast-forward TTLs.
// Expired entries are dropped when touched, and every SWEEP_INTERVAL writes the whole
// map is swept so keys that are never read again do not accumulate.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{ceil_secs, parse_counter, KeyTtl, KvResult, KvStore};

const SWEEP_INTERVAL: u64 = 256;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: &str, ttl_secs: Option<u64>) -> Self {
        Entry {
            value: value.to_string(),
            expires_at: ttl_secs.map(|secs| Instant::now() + Duration::from_secs(secs)),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct OrderedSet {
    scores: HashMap<String, i64>,
    order: BTreeSet<(i64, String)>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    sets: HashMap<String, OrderedSet>,
    writes: u64,
}

impl Inner {
    /// Live entry for `key`, reaping it first if it has expired
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn note_write(&mut self) {
        self.writes = self.writes.wrapping_add(1);
        if self.writes % SWEEP_INTERVAL == 0 {
            let now = Instant::now();
            let before = self.entries.len();
            self.entries.retain(|_, e| e.is_live(now));
            let swept = before - self.entries.len();
            if swept > 0 {
                debug!("swept {} expired keys", swept);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut inner = self.inner.lock();
        Ok(inner.live(key).map(|e| e.value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()> {
        let mut inner = self.inner.lock();
        inner.note_write();
        inner.entries.insert(key.to_string(), Entry::new(value, Some(ttl_secs)));
        Ok(())
    }

    async fn set_permanent(&self, key: &str, value: &str) -> KvResult<()> {
        let mut inner = self.inner.lock();
        inner.note_write();
        inner.entries.insert(key.to_string(), Entry::new(value, None));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KvResult<bool> {
        let mut inner = self.inner.lock();
        inner.note_write();
        if inner.live(key).is_some() {
            return Ok(false);
        }
        inner.entries.insert(key.to_string(), Entry::new(value, ttl_secs));
        Ok(true)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> KvResult<bool> {
        let mut inner = self.inner.lock();
        inner.note_write();
        match inner.live(key) {
            Some(entry) if entry.value == expected => {
                *entry = Entry::new(value, ttl_secs);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let mut inner = self.inner.lock();
        let existed = inner.live(key).is_some();
        inner.entries.remove(key);
        Ok(existed)
    }

    async fn ttl_remaining(&self, key: &str) -> KvResult<KeyTtl> {
        let mut inner = self.inner.lock();
        let ttl = match inner.live(key) {
            None => KeyTtl::Missing,
            Some(Entry { expires_at: None, .. }) => KeyTtl::Persistent,
            Some(Entry { expires_at: Some(at), .. }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                KeyTtl::Expires(ceil_secs(remaining.as_millis()))
            }
        };
        Ok(ttl)
    }

    async fn increment(&self, key: &str) -> KvResult<i64> {
        let mut inner = self.inner.lock();
        inner.note_write();
        match inner.live(key) {
            Some(entry) => {
                let next = parse_counter(key, &entry.value)? + 1;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                inner.entries.insert(key.to_string(), Entry::new("1", None));
                Ok(1)
            }
        }
    }

    async fn append_to_ordered_set(&self, set_key: &str, member: &str, score: i64) -> KvResult<bool> {
        let mut inner = self.inner.lock();
        let set = inner.sets.entry(set_key.to_string()).or_default();
        if set.scores.contains_key(member) {
            return Ok(false);
        }
        set.scores.insert(member.to_string(), score);
        set.order.insert((score, member.to_string()));
        Ok(true)
    }

    async fn range_ordered_set(&self, set_key: &str) -> KvResult<Vec<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .sets
            .get(set_key)
            .map(|set| set.order.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_only_writes_once() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "a", Some(60)).await.unwrap());
        assert!(!store.set_if_absent("k", "b", Some(60)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_keys_are_absent() {
        let store = MemoryStore::new();
        store.set_with_ttl("k", "a", 10).await.unwrap();
        assert_eq!(store.ttl_remaining("k").await.unwrap(), KeyTtl::Expires(10));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(store.ttl_remaining("k").await.unwrap(), KeyTtl::Expires(6));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl_remaining("k").await.unwrap(), KeyTtl::Missing);
        assert!(store.set_if_absent("k", "b", None).await.unwrap());
        assert_eq!(store.ttl_remaining("k").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn compare_and_set_requires_expected_value() {
        let store = MemoryStore::new();
        assert!(!store.compare_and_set("k", "a", "b", None).await.unwrap());
        store.set_permanent("k", "a").await.unwrap();
        assert!(!store.compare_and_set("k", "x", "b", None).await.unwrap());
        assert!(store.compare_and_set("k", "a", "b", Some(30)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.ttl_remaining("k").await.unwrap(), KeyTtl::Expires(30));
    }

    #[tokio::test]
    async fn increment_starts_at_one_and_keeps_counting() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("c").await.unwrap(), 1);
        assert_eq!(store.increment("c").await.unwrap(), 2);
        assert!(store.delete("c").await.unwrap());
        assert!(!store.delete("c").await.unwrap());
        assert_eq!(store.increment("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ordered_set_keeps_first_score() {
        let store = MemoryStore::new();
        assert!(store.append_to_ordered_set("s", "b", 20).await.unwrap());
        assert!(store.append_to_ordered_set("s", "a", 10).await.unwrap());
        assert!(!store.append_to_ordered_set("s", "a", 30).await.unwrap());
        assert!(store.append_to_ordered_set("s", "c", 20).await.unwrap());
        assert_eq!(store.range_ordered_set("s").await.unwrap(), vec!["a", "b", "c"]);
        assert!(store.range_ordered_set("missing").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn untouched_expired_keys_are_swept_by_later_writes() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.set_with_ttl(&format!("abandoned{i}"), "x", 1).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(2)).await;

        for _ in 0..SWEEP_INTERVAL {
            store.set_permanent("live", "y").await.unwrap();
        }
        let inner = store.inner.lock();
        assert_eq!(inner.entries.len(), 1);
        assert!(inner.entries.contains_key("live"));
    }
}
