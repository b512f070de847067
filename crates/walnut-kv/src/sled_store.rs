// Durable store on top of sled.
//
// Every value is wrapped in an `Envelope` that carries its absolute expiry.
// Conditional writes are sled compare-and-swap loops over the raw envelope bytes,
// so a concurrent writer always forces a re-read instead of being overwritten.
// Ordered sets live in two trees updated in one sled transaction:
//   members: "{set}\0{member}"          -> score (i64 BE)
//   order:   "{set}\0{score key}{member}" -> ()

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use sled::transaction::{TransactionError, TransactionResult};
use sled::{IVec, Transactional, Tree};

use crate::{ceil_secs, parse_counter, KeyTtl, KvError, KvResult, KvStore};

const VALUES_TREE: &str = "values";
const MEMBERS_TREE: &str = "zset_members";
const ORDER_TREE: &str = "zset_order";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    value: String,
    /// Absolute expiry, milliseconds since the unix epoch
    expires_at_ms: Option<i64>,
}

impl Envelope {
    fn new(value: &str, ttl_secs: Option<u64>) -> Self {
        Envelope {
            value: value.to_string(),
            expires_at_ms: ttl_secs.map(|secs| now_ms().saturating_add(secs as i64 * 1000)),
        }
    }

    fn is_live(&self, now: i64) -> bool {
        self.expires_at_ms.map_or(true, |at| at > now)
    }

    fn encode(&self) -> KvResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn decode(raw: &[u8]) -> KvResult<Self> {
        Ok(bincode::deserialize(raw)?)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Order-preserving big-endian encoding of a signed score
fn score_key(score: i64) -> [u8; 8] {
    ((score as u64) ^ (1u64 << 63)).to_be_bytes()
}

fn set_prefix(set_key: &str) -> Vec<u8> {
    let mut prefix = set_key.as_bytes().to_vec();
    prefix.push(0);
    prefix
}

pub struct SledStore {
    db: sled::Db,
    values: Tree,
    members: Tree,
    order: Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Store backed by a throwaway directory, removed on drop
    pub fn temporary() -> KvResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> KvResult<Self> {
        Ok(SledStore {
            values: db.open_tree(VALUES_TREE)?,
            members: db.open_tree(MEMBERS_TREE)?,
            order: db.open_tree(ORDER_TREE)?,
            db,
        })
    }

    pub async fn flush(&self) -> KvResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Raw bytes plus decoded envelope, `None` for both missing and expired keys
    fn load(&self, key: &str) -> KvResult<(Option<IVec>, Option<Envelope>)> {
        let raw = self.values.get(key)?;
        let envelope = match &raw {
            Some(bytes) => {
                let envelope = Envelope::decode(bytes)?;
                envelope.is_live(now_ms()).then_some(envelope)
            }
            None => None,
        };
        Ok((raw, envelope))
    }

    /// Removes an expired entry unless somebody replaced it in the meantime
    fn reap(&self, key: &str, raw: IVec) -> KvResult<()> {
        if self.values.compare_and_swap(key, Some(raw), None as Option<&[u8]>)?.is_ok() {
            debug!("reaped expired key {}", key);
        }
        Ok(())
    }

    /// Swaps `current` for `next`; `false` means another writer got there first
    fn swap(&self, key: &str, current: Option<IVec>, next: Option<Vec<u8>>) -> KvResult<bool> {
        Ok(self.values.compare_and_swap(key, current, next)?.is_ok())
    }
}

#[async_trait]
impl KvStore for SledStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        match self.load(key)? {
            (_, Some(envelope)) => Ok(Some(envelope.value)),
            (Some(raw), None) => {
                self.reap(key, raw)?;
                Ok(None)
            }
            (None, None) => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()> {
        self.values.insert(key, Envelope::new(value, Some(ttl_secs)).encode()?)?;
        Ok(())
    }

    async fn set_permanent(&self, key: &str, value: &str) -> KvResult<()> {
        self.values.insert(key, Envelope::new(value, None).encode()?)?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> KvResult<bool> {
        let next = Envelope::new(value, ttl_secs).encode()?;
        loop {
            let (raw, live) = self.load(key)?;
            if live.is_some() {
                return Ok(false);
            }
            if self.swap(key, raw, Some(next.clone()))? {
                return Ok(true);
            }
        }
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> KvResult<bool> {
        let next = Envelope::new(value, ttl_secs).encode()?;
        loop {
            let (raw, live) = self.load(key)?;
            match live {
                Some(envelope) if envelope.value == expected => {
                    if self.swap(key, raw, Some(next.clone()))? {
                        return Ok(true);
                    }
                }
                _ => return Ok(false),
            }
        }
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        loop {
            let (raw, live) = self.load(key)?;
            if raw.is_none() {
                return Ok(false);
            }
            if self.swap(key, raw, None)? {
                return Ok(live.is_some());
            }
        }
    }

    async fn ttl_remaining(&self, key: &str) -> KvResult<KeyTtl> {
        let ttl = match self.load(key)?.1 {
            None => KeyTtl::Missing,
            Some(Envelope { expires_at_ms: None, .. }) => KeyTtl::Persistent,
            Some(Envelope { expires_at_ms: Some(at), .. }) => {
                let remaining = at.saturating_sub(now_ms()).max(0) as u128;
                KeyTtl::Expires(ceil_secs(remaining))
            }
        };
        Ok(ttl)
    }

    async fn increment(&self, key: &str) -> KvResult<i64> {
        loop {
            let (raw, live) = self.load(key)?;
            let (next_value, expires_at_ms) = match live {
                Some(envelope) => (parse_counter(key, &envelope.value)? + 1, envelope.expires_at_ms),
                None => (1, None),
            };
            let next = Envelope {
                value: next_value.to_string(),
                expires_at_ms,
            }
            .encode()?;
            if self.swap(key, raw, Some(next))? {
                return Ok(next_value);
            }
        }
    }

    async fn append_to_ordered_set(&self, set_key: &str, member: &str, score: i64) -> KvResult<bool> {
        let prefix = set_prefix(set_key);

        let mut member_key = prefix.clone();
        member_key.extend_from_slice(member.as_bytes());

        let mut order_key = prefix;
        order_key.extend_from_slice(&score_key(score));
        order_key.extend_from_slice(member.as_bytes());

        let result: TransactionResult<bool, ()> =
            (&self.members, &self.order).transaction(|(members, order)| {
                if members.get(member_key.as_slice())?.is_some() {
                    return Ok(false);
                }
                members.insert(member_key.as_slice(), &score.to_be_bytes()[..])?;
                order.insert(order_key.as_slice(), Vec::<u8>::new())?;
                Ok(true)
            });

        match result {
            Ok(inserted) => Ok(inserted),
            Err(TransactionError::Storage(err)) => Err(err.into()),
            Err(TransactionError::Abort(())) => {
                Err(KvError::Unavailable("ordered set transaction aborted".to_string()))
            }
        }
    }

    async fn range_ordered_set(&self, set_key: &str) -> KvResult<Vec<String>> {
        let prefix = set_prefix(set_key);
        let skip = prefix.len() + 8;
        let mut members = Vec::new();
        for item in self.order.scan_prefix(&prefix) {
            let (key, _) = item?;
            let member = key
                .get(skip..)
                .ok_or_else(|| KvError::Corrupt(format!("short ordered-set key in '{}'", set_key)))?;
            let member = String::from_utf8(member.to_vec())
                .map_err(|e| KvError::Corrupt(e.to_string()))?;
            members.push(member);
        }
        Ok(members)
    }
}
