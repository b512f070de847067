// NAME REGISTRY
// Canonical per-name state over the KV store: Available -> Held -> Claimed.
//
// SAFETY INVARIANTS:
// 1. At most one live hold per name; created only through set_if_absent
// 2. The owner marker is checked before the hold key; a claimed name is never reported as held
// 3. Claims are written with set_if_absent and never deleted; the claimed hold is pinned by
//    compare_and_set first and a hold won after the owner marker appears is withdrawn
// 4. Founding names short-circuit every operation and are never written
// 5. Only credential digests are stored, never raw credentials
// 6. The index and its count move together: the count grows only on a new index member

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use walnut_kv::{KeyTtl, KvError, KvStore};

use crate::credential::CredentialHash;
use crate::errors::{RegistryError, RegistryResult};
use crate::keys;
use crate::policy::{HoldPolicy, Name, FOUNDING_NAMES};

/// Bounded retries when a hold vanishes between the conditional write and the follow-up read
const MAX_HOLD_ATTEMPTS: usize = 3;
/// Lifetime of a hold pinned by an in-flight claim; bounds the damage if the claim dies midway
const CLAIM_LOCK_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TakenKind {
    Founding,
    Claimed,
    /// Normalizes to nothing
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameStatus {
    Available,
    Held {
        /// Digest of the holder credential
        holder: String,
        expires_in: u64,
    },
    Taken(TakenKind),
}

/// Result of a successful `place_hold`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldGrant {
    pub hold_seconds: u64,
    /// The same holder already had the hold and its TTL was extended
    pub refreshed: bool,
}

pub struct NameRegistry {
    store: Arc<dyn KvStore>,
    policy: HoldPolicy,
}

impl NameRegistry {
    pub fn new(store: Arc<dyn KvStore>, policy: HoldPolicy) -> Self {
        NameRegistry { store, policy }
    }

    pub fn policy(&self) -> &HoldPolicy {
        &self.policy
    }

    async fn read_counter(&self, key: &str) -> RegistryResult<u64> {
        match self.store.get(key).await? {
            Some(raw) => {
                let value = raw
                    .parse::<i64>()
                    .map_err(|_| KvError::Corrupt(format!("value at '{}' is not an integer", key)))?;
                Ok(value.max(0) as u64)
            }
            None => Ok(0),
        }
    }

    pub async fn lookup(&self, name: &Name) -> RegistryResult<NameStatus> {
        if name.is_founding() {
            return Ok(NameStatus::Taken(TakenKind::Founding));
        }
        if self.store.get(&keys::owner(name)).await?.is_some() {
            return Ok(NameStatus::Taken(TakenKind::Claimed));
        }
        let hold_key = keys::hold(name);
        let Some(holder) = self.store.get(&hold_key).await? else {
            return Ok(NameStatus::Available);
        };
        let status = match self.store.ttl_remaining(&hold_key).await? {
            KeyTtl::Missing => NameStatus::Available,
            ttl => NameStatus::Held {
                holder,
                expires_in: ttl.seconds().unwrap_or(0),
            },
        };
        Ok(status)
    }

    pub async fn lapse_count(&self, name: &Name) -> RegistryResult<u64> {
        self.read_counter(&keys::lapses(name)).await
    }

    /// Places or refreshes a hold for `holder`.
    ///
    /// A new hold lasts `policy.hold_duration(lapses)` and bumps the lapse counter.
    /// The same holder re-placing a live hold extends it by the duration it was
    /// originally granted, without counting another lapse.
    pub async fn place_hold(
        &self,
        name: &Name,
        holder: &CredentialHash,
        pin: Option<&CredentialHash>,
    ) -> RegistryResult<HoldGrant> {
        if name.is_founding() {
            return Err(RegistryError::taken());
        }
        let hold_key = keys::hold(name);

        for _ in 0..MAX_HOLD_ATTEMPTS {
            if self.store.get(&keys::owner(name)).await?.is_some() {
                return Err(RegistryError::taken());
            }
            let lapses = self.lapse_count(name).await?;
            let hold_seconds = self.policy.hold_duration(lapses);

            if self
                .store
                .set_if_absent(&hold_key, holder.as_str(), Some(hold_seconds))
                .await?
            {
                // A claim may have completed between the owner check and the write
                if self.store.get(&keys::owner(name)).await?.is_some() {
                    self.store.delete(&hold_key).await?;
                    debug!("hold on {} withdrawn, claimed concurrently", name);
                    return Err(RegistryError::taken());
                }
                self.record_lapse(name).await?;
                if let Some(pin) = pin {
                    self.store
                        .set_with_ttl(&keys::pin(name), pin.as_str(), hold_seconds)
                        .await?;
                }
                self.record_reservation(name).await?;
                info!("hold placed on {} for {}s", name, hold_seconds);
                return Ok(HoldGrant {
                    hold_seconds,
                    refreshed: false,
                });
            }

            match self.store.get(&hold_key).await? {
                Some(current) if holder.matches(&current) => {
                    let hold_seconds = self.policy.hold_duration(lapses.saturating_sub(1));
                    if self
                        .store
                        .compare_and_set(&hold_key, &current, &current, Some(hold_seconds))
                        .await?
                    {
                        if let Some(pin) = pin {
                            self.store
                                .set_with_ttl(&keys::pin(name), pin.as_str(), hold_seconds)
                                .await?;
                        }
                        debug!("hold on {} refreshed for {}s", name, hold_seconds);
                        return Ok(HoldGrant {
                            hold_seconds,
                            refreshed: true,
                        });
                    }
                }
                Some(_) => {
                    let retry_in = self.store.ttl_remaining(&hold_key).await?.seconds();
                    debug!("hold on {} rejected, held for {:?}s", name, retry_in);
                    return Err(RegistryError::held(retry_in));
                }
                // Expired since the conditional write, or claimed: the owner check at the
                // top of the next attempt reports the claim
                None => {}
            }
        }

        warn!("hold on {} still contended after {} attempts", name, MAX_HOLD_ATTEMPTS);
        let retry_in = self.store.ttl_remaining(&hold_key).await?.seconds();
        Err(RegistryError::held(retry_in))
    }

    /// Counts a hold placement against the name. Only a claim resets it.
    async fn record_lapse(&self, name: &Name) -> RegistryResult<u64> {
        let lapses = self.store.increment(&keys::lapses(name)).await?;
        Ok(lapses.max(0) as u64)
    }

    /// Adds the name to the index on its first reservation. Returns whether it was new.
    async fn record_reservation(&self, name: &Name) -> RegistryResult<bool> {
        let now = Utc::now();
        let inserted = self
            .store
            .append_to_ordered_set(keys::ALL_NAMES, name.as_str(), now.timestamp_millis())
            .await?;
        if inserted {
            self.store
                .set_if_absent(&keys::reserved_at(name), &now.to_rfc3339(), None)
                .await?;
            let count = self.store.increment(keys::NAME_COUNT).await?;
            info!("{} added to the registry index ({} reserved)", name, count);
        }
        Ok(inserted)
    }

    /// Converts a live hold into a permanent claim.
    ///
    /// A missing hold and a mismatched credential are indistinguishable to the caller.
    pub async fn confirm_claim(&self, name: &Name, presented: &CredentialHash) -> RegistryResult<()> {
        if name.is_founding() {
            return Err(RegistryError::taken());
        }
        if self.store.get(&keys::owner(name)).await?.is_some() {
            return Err(RegistryError::taken());
        }
        let Some(stored) = self.store.get(&keys::hold(name)).await? else {
            return Err(RegistryError::WrongCredential);
        };
        if !presented.matches(&stored) {
            debug!("claim on {} rejected: credential mismatch", name);
            return Err(RegistryError::WrongCredential);
        }

        // Pin this exact hold; fails if it expired or was replaced after the read above
        let hold_key = keys::hold(name);
        if !self
            .store
            .compare_and_set(&hold_key, &stored, &stored, Some(CLAIM_LOCK_SECS))
            .await?
        {
            debug!("claim on {} rejected: hold changed during claim", name);
            return Err(RegistryError::WrongCredential);
        }

        let claimed_at = Utc::now().to_rfc3339();
        if !self
            .store
            .set_if_absent(&keys::owner(name), &claimed_at, None)
            .await?
        {
            return Err(RegistryError::taken());
        }

        let pin_key = keys::pin(name);
        if let Some(pin) = self.store.get(&pin_key).await? {
            self.store.set_permanent(&pin_key, &pin).await?;
        }
        self.store.delete(&hold_key).await?;
        self.store.delete(&keys::lapses(name)).await?;
        self.record_reservation(name).await?;

        info!("{} claimed", name);
        Ok(())
    }

    /// Stores a recovery question and hashed answer after checking the PIN digest.
    pub async fn set_recovery(
        &self,
        name: &Name,
        pin: &CredentialHash,
        question: &str,
        answer: &CredentialHash,
    ) -> RegistryResult<()> {
        let Some(stored) = self.store.get(&keys::pin(name)).await? else {
            return Err(RegistryError::WrongCredential);
        };
        if !pin.matches(&stored) {
            return Err(RegistryError::WrongCredential);
        }
        self.store
            .set_permanent(&keys::security_question(name), question)
            .await?;
        self.store
            .set_permanent(&keys::security_answer(name), answer.as_str())
            .await?;
        info!("recovery question set for {}", name);
        Ok(())
    }

    /// Records `inviter` as the referrer of `invitee` and returns the inviter's new count.
    pub async fn record_referral(&self, invitee: &Name, inviter: &Name) -> RegistryResult<u64> {
        self.store
            .set_permanent(&keys::invited_by(invitee), inviter.as_str())
            .await?;
        let count = self.store.increment(&keys::invite_count(inviter)).await?;
        Ok(count.max(0) as u64)
    }

    pub async fn invite_count(&self, name: &Name) -> RegistryResult<u64> {
        self.read_counter(&keys::invite_count(name)).await
    }

    pub async fn invited_by(&self, name: &Name) -> RegistryResult<Option<String>> {
        Ok(self.store.get(&keys::invited_by(name)).await?)
    }

    /// Founding names followed by the index in reservation order
    pub async fn names(&self) -> RegistryResult<Vec<String>> {
        let indexed = self.store.range_ordered_set(keys::ALL_NAMES).await?;
        Ok(FOUNDING_NAMES
            .iter()
            .map(|n| n.to_string())
            .chain(indexed)
            .collect())
    }

    /// Reserved names including the founding set
    pub async fn total_count(&self) -> RegistryResult<u64> {
        let indexed = self.read_counter(keys::NAME_COUNT).await?;
        Ok(indexed + FOUNDING_NAMES.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{Credential, CredentialHasher};
    use std::future::Future;
    use std::pin::Pin;

    use async_trait::async_trait;
    use walnut_kv::{KvResult, MemoryStore};

    fn registry() -> (Arc<MemoryStore>, NameRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = NameRegistry::new(store.clone(), HoldPolicy::default());
        (store, registry)
    }

    fn digest(pin: &str) -> CredentialHash {
        CredentialHasher::new("test").hash_credential(&Credential::pin(pin).unwrap())
    }

    fn name(raw: &str) -> Name {
        Name::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_founding_names_are_never_written() {
        let (store, registry) = registry();
        for founding in FOUNDING_NAMES {
            let n = name(founding);
            assert_eq!(registry.lookup(&n).await.unwrap(), NameStatus::Taken(TakenKind::Founding));
            assert_eq!(registry.place_hold(&n, &digest("1234"), None).await.unwrap_err().code(), "taken");
            assert_eq!(registry.confirm_claim(&n, &digest("1234")).await.unwrap_err().code(), "taken");
            assert_eq!(store.get(&keys::hold(&n)).await.unwrap(), None);
            assert_eq!(store.get(&keys::lapses(&n)).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_hold_stores_only_digests() {
        let (store, registry) = registry();
        let n = name("secret");
        let pin = digest("4821");
        registry.place_hold(&n, &pin, Some(&pin)).await.unwrap();

        let hold = store.get(&keys::hold(&n)).await.unwrap().unwrap();
        let stored_pin = store.get(&keys::pin(&n)).await.unwrap().unwrap();
        assert_eq!(hold, pin.as_str());
        assert_eq!(stored_pin, pin.as_str());
        assert!(!hold.contains("4821"));
    }

    #[tokio::test]
    async fn test_same_holder_refresh_does_not_count_a_lapse() {
        let (_, registry) = registry();
        let n = name("refresh");
        let pin = digest("1111");

        let first = registry.place_hold(&n, &pin, Some(&pin)).await.unwrap();
        assert_eq!(first, HoldGrant { hold_seconds: 1800, refreshed: false });
        let again = registry.place_hold(&n, &pin, Some(&pin)).await.unwrap();
        assert_eq!(again, HoldGrant { hold_seconds: 1800, refreshed: true });
        assert_eq!(registry.lapse_count(&n).await.unwrap(), 1);
        assert_eq!(registry.total_count().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_claim_resets_lapses_and_keeps_pin() {
        let (store, registry) = registry();
        let n = name("keeper");
        let pin = digest("2468");
        registry.place_hold(&n, &pin, Some(&pin)).await.unwrap();
        registry.confirm_claim(&n, &pin).await.unwrap();

        assert_eq!(registry.lapse_count(&n).await.unwrap(), 0);
        assert_eq!(store.get(&keys::hold(&n)).await.unwrap(), None);
        assert_eq!(store.ttl_remaining(&keys::pin(&n)).await.unwrap(), KeyTtl::Persistent);
        assert_eq!(registry.lookup(&n).await.unwrap(), NameStatus::Taken(TakenKind::Claimed));
        // indexed once despite reservation and claim
        assert_eq!(registry.names().await.unwrap().last().map(String::as_str), Some("keeper"));
        assert_eq!(registry.total_count().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_claim_without_hold_is_a_credential_error() {
        let (_, registry) = registry();
        let err = registry.confirm_claim(&name("ghost"), &digest("1234")).await.unwrap_err();
        assert!(matches!(err, RegistryError::WrongCredential));
    }

    #[tokio::test]
    async fn test_recovery_requires_matching_pin() {
        let (store, registry) = registry();
        let n = name("recover");
        let pin = digest("1357");
        let answer = CredentialHasher::new("test").hash_answer("rex");

        let err = registry.set_recovery(&n, &pin, "pet?", &answer).await.unwrap_err();
        assert!(matches!(err, RegistryError::WrongCredential));

        registry.place_hold(&n, &pin, Some(&pin)).await.unwrap();
        let err = registry
            .set_recovery(&n, &digest("0000"), "pet?", &answer)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::WrongCredential));

        registry.set_recovery(&n, &pin, "pet?", &answer).await.unwrap();
        assert_eq!(
            store.get(&keys::security_question(&n)).await.unwrap().as_deref(),
            Some("pet?")
        );
        assert_eq!(
            store.get(&keys::security_answer(&n)).await.unwrap().as_deref(),
            Some(answer.as_str())
        );
    }

    #[tokio::test]
    async fn test_corrupt_counter_surfaces_as_storage_error() {
        let (store, registry) = registry();
        let n = name("broken");
        store.set_permanent(&keys::lapses(&n), "many").await.unwrap();
        let err = registry.place_hold(&n, &digest("1234"), None).await.unwrap_err();
        assert!(matches!(err, RegistryError::StorageUnavailable(_)));
    }

    type StepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
    type Step = Box<dyn FnOnce() -> StepFuture + Send>;

    /// Runs `step` once, right after the first read of `trigger` has been answered
    struct Interleaved {
        inner: Arc<MemoryStore>,
        trigger: String,
        step: tokio::sync::Mutex<Option<Step>>,
    }

    impl Interleaved {
        fn new(inner: Arc<MemoryStore>, trigger: String, step: Step) -> Self {
            Interleaved {
                inner,
                trigger,
                step: tokio::sync::Mutex::new(Some(step)),
            }
        }
    }

    #[async_trait]
    impl KvStore for Interleaved {
        async fn get(&self, key: &str) -> KvResult<Option<String>> {
            let value = self.inner.get(key).await?;
            if key == self.trigger {
                let step = self.step.lock().await.take();
                if let Some(step) = step {
                    step().await;
                }
            }
            Ok(value)
        }
        async fn set_with_ttl(&self, key: &str, value: &str, ttl: u64) -> KvResult<()> {
            self.inner.set_with_ttl(key, value, ttl).await
        }
        async fn set_permanent(&self, key: &str, value: &str) -> KvResult<()> {
            self.inner.set_permanent(key, value).await
        }
        async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<u64>) -> KvResult<bool> {
            self.inner.set_if_absent(key, value, ttl).await
        }
        async fn compare_and_set(&self, key: &str, expected: &str, value: &str, ttl: Option<u64>) -> KvResult<bool> {
            self.inner.compare_and_set(key, expected, value, ttl).await
        }
        async fn delete(&self, key: &str) -> KvResult<bool> {
            self.inner.delete(key).await
        }
        async fn ttl_remaining(&self, key: &str) -> KvResult<KeyTtl> {
            self.inner.ttl_remaining(key).await
        }
        async fn increment(&self, key: &str) -> KvResult<i64> {
            self.inner.increment(key).await
        }
        async fn append_to_ordered_set(&self, set: &str, member: &str, score: i64) -> KvResult<bool> {
            self.inner.append_to_ordered_set(set, member, score).await
        }
        async fn range_ordered_set(&self, set: &str) -> KvResult<Vec<String>> {
            self.inner.range_ordered_set(set).await
        }
    }

    #[tokio::test]
    async fn test_hold_racing_a_claim_is_withdrawn() {
        let (store, registry) = registry();
        let n = name("contested");
        let first = digest("1111");
        registry.place_hold(&n, &first, Some(&first)).await.unwrap();

        // The first holder's claim lands just after the second holder's owner check
        let claim: Step = {
            let claimant = NameRegistry::new(store.clone(), HoldPolicy::default());
            let (n, first) = (n.clone(), first.clone());
            Box::new(move || -> StepFuture {
                Box::pin(async move {
                    claimant.confirm_claim(&n, &first).await.unwrap();
                })
            })
        };
        let racing = NameRegistry::new(
            Arc::new(Interleaved::new(store.clone(), keys::owner(&n), claim)),
            HoldPolicy::default(),
        );

        let err = racing.place_hold(&n, &digest("2222"), None).await.unwrap_err();
        assert_eq!(err.code(), "taken");
        assert_eq!(store.get(&keys::hold(&n)).await.unwrap(), None);
        assert_eq!(store.get(&keys::lapses(&n)).await.unwrap(), None);
        assert_eq!(registry.lookup(&n).await.unwrap(), NameStatus::Taken(TakenKind::Claimed));
        assert_eq!(registry.total_count().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_claim_on_replaced_hold_is_rejected() {
        let (store, registry) = registry();
        let n = name("turnover");
        let first = digest("1111");
        let second = digest("2222");
        registry.place_hold(&n, &first, Some(&first)).await.unwrap();

        // After the claim reads the hold, it lapses and another holder takes the name
        let turnover: Step = {
            let store = store.clone();
            let (n, second) = (n.clone(), second.clone());
            Box::new(move || -> StepFuture {
                Box::pin(async move {
                    store.delete(&keys::hold(&n)).await.unwrap();
                    let rival = NameRegistry::new(store, HoldPolicy::default());
                    rival.place_hold(&n, &second, Some(&second)).await.unwrap();
                })
            })
        };
        let claiming = NameRegistry::new(
            Arc::new(Interleaved::new(store.clone(), keys::hold(&n), turnover)),
            HoldPolicy::default(),
        );

        let err = claiming.confirm_claim(&n, &first).await.unwrap_err();
        assert!(matches!(err, RegistryError::WrongCredential));
        assert_eq!(store.get(&keys::owner(&n)).await.unwrap(), None);
        match registry.lookup(&n).await.unwrap() {
            NameStatus::Held { holder, expires_in } => {
                assert_eq!(holder, second.as_str());
                assert!(expires_in > 0);
            }
            other => panic!("expected the second holder's hold, got {:?}", other),
        }
        registry.confirm_claim(&n, &second).await.unwrap();
    }
}
