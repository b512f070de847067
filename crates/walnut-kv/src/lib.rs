// KEY-VALUE ABSTRACTION
// Storage contract the name registry is written against.
//
// ATOMICITY GUARANTEES:
// 1. Every single-key operation is atomic with respect to every other operation on that key
// 2. `set_if_absent` and `compare_and_set` are the only conditional writes; callers must
//    never emulate them with a get followed by a set
// 3. An expired key is indistinguishable from a missing key
// 4. Multi-key sequences are NOT atomic as a group

pub mod errors;
pub mod memory;
pub mod sled_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use errors::KvError;
pub use memory::MemoryStore;
pub use sled_store::SledStore;

pub type KvResult<T> = Result<T, KvError>;

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyTtl {
    /// Key does not exist (or has already expired)
    Missing,
    /// Key exists and never expires
    Persistent,
    /// Key expires in the given number of whole seconds (rounded up, never 0)
    Expires(u64),
}

impl KeyTtl {
    pub fn seconds(&self) -> Option<u64> {
        match self {
            KeyTtl::Expires(secs) => Some(*secs),
            _ => None,
        }
    }
}

/// Async key-value store with per-key expiry, counters and insertion-scored sets.
///
/// Values are UTF-8 strings. `ttl` arguments are whole seconds; `None` means the
/// written key never expires.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()>;

    async fn set_permanent(&self, key: &str, value: &str) -> KvResult<()>;

    /// Writes `value` only if `key` is absent. Returns `true` if this call wrote it.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KvResult<bool>;

    /// Replaces the value only if it currently equals `expected`. Returns `true` on swap.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> KvResult<bool>;

    /// Returns `true` if a live key was removed.
    async fn delete(&self, key: &str) -> KvResult<bool>;

    async fn ttl_remaining(&self, key: &str) -> KvResult<KeyTtl>;

    /// Atomically adds one to an integer value (missing keys start at 0) and
    /// returns the new value. The key's expiry, if any, is preserved.
    async fn increment(&self, key: &str) -> KvResult<i64>;

    /// Inserts `member` with `score` unless it is already present. Returns `true`
    /// if the member was newly inserted; an existing member keeps its first score.
    async fn append_to_ordered_set(&self, set_key: &str, member: &str, score: i64) -> KvResult<bool>;

    /// All members ordered by ascending score, ties broken by member.
    async fn range_ordered_set(&self, set_key: &str) -> KvResult<Vec<String>>;
}

pub(crate) fn parse_counter(key: &str, raw: &str) -> KvResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| KvError::Corrupt(format!("value at '{}' is not an integer", key)))
}

/// Whole seconds left until `remaining_ms` elapses, rounded up so that a live key
/// never reports zero.
pub(crate) fn ceil_secs(remaining_ms: u128) -> u64 {
    let secs = (remaining_ms + 999) / 1000;
    secs.max(1) as u64
}
