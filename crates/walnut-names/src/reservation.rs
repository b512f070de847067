// RESERVATION SERVICE
// Entry points used by the HTTP layer: validate with the policy, then drive the registry.
//
// FAILURE POLICY:
// 1. Validation happens before any storage access
// 2. Read paths never fail on storage: they fall back to the founding list and say so
// 3. Write paths fail closed on storage errors
// 4. Referral bookkeeping is best-effort and never fails a reservation

use std::sync::Arc;

use log::{info, warn};
use walnut_kv::KvStore;

use crate::credential::{Credential, CredentialHasher};
use crate::errors::{RegistryError, RegistryResult};
use crate::policy::{self, HoldPolicy, Name, Pin, FOUNDING_NAMES};
use crate::registry::{NameRegistry, NameStatus, TakenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub status: NameStatus,
    /// Storage was unreachable and the answer comes from the founding list only
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub name: String,
    pub credential: Credential,
    pub invited_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveOutcome {
    pub name: Name,
    pub hold_seconds: u64,
    pub refreshed: bool,
    /// Registry total after the reservation, when it could be read
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameListing {
    pub names: Vec<String>,
    pub count: u64,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteSummary {
    pub name: String,
    pub invite_count: u64,
    pub degraded: bool,
}

pub struct ReservationService {
    registry: NameRegistry,
    hasher: CredentialHasher,
}

impl ReservationService {
    pub fn new(store: Arc<dyn KvStore>, policy: HoldPolicy, hasher: CredentialHasher) -> Self {
        ReservationService {
            registry: NameRegistry::new(store, policy),
            hasher,
        }
    }

    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    pub async fn check(&self, raw_name: &str) -> CheckOutcome {
        let Ok(name) = Name::parse(raw_name) else {
            return CheckOutcome {
                status: NameStatus::Taken(TakenKind::Invalid),
                degraded: false,
            };
        };
        match self.registry.lookup(&name).await {
            Ok(status) => CheckOutcome {
                status,
                degraded: false,
            },
            Err(err) => {
                warn!("check for {} degraded to founding list: {}", name, err);
                // lookup() already answers founding names without storage
                CheckOutcome {
                    status: NameStatus::Available,
                    degraded: true,
                }
            }
        }
    }

    pub async fn reserve(&self, request: ReserveRequest) -> RegistryResult<ReserveOutcome> {
        let name = Name::parse(&request.name)?;
        let holder = self.hasher.hash_credential(&request.credential);
        let pin = match &request.credential {
            Credential::Pin(_) => Some(&holder),
            Credential::Client(_) => None,
        };

        let grant = self.registry.place_hold(&name, &holder, pin).await?;

        if !grant.refreshed {
            self.credit_referral(&name, request.invited_by.as_deref()).await;
        }

        let count = match self.registry.total_count().await {
            Ok(count) => Some(count),
            Err(err) => {
                warn!("reservation of {} succeeded but count is unavailable: {}", name, err);
                None
            }
        };

        Ok(ReserveOutcome {
            name,
            hold_seconds: grant.hold_seconds,
            refreshed: grant.refreshed,
            count,
        })
    }

    async fn credit_referral(&self, invitee: &Name, raw_inviter: Option<&str>) {
        let Some(inviter) = policy::referral_target(invitee, raw_inviter) else {
            return;
        };
        match self.registry.record_referral(invitee, &inviter).await {
            Ok(count) => info!("{} credited with invite #{} ({})", inviter, count, invitee),
            Err(err) => warn!("referral {} -> {} dropped: {}", inviter, invitee, err),
        }
    }

    pub async fn claim(&self, raw_name: &str, credential: &Credential) -> RegistryResult<Name> {
        let name = Name::parse(raw_name)?;
        let presented = self.hasher.hash_credential(credential);
        self.registry.confirm_claim(&name, &presented).await?;
        Ok(name)
    }

    pub async fn set_recovery_question(
        &self,
        raw_name: &str,
        raw_pin: &str,
        question: &str,
        answer: &str,
    ) -> RegistryResult<()> {
        let name = Name::parse(raw_name)?;
        let pin = Pin::parse(raw_pin)?;
        let (question, answer) = policy::validate_recovery(question, answer)?;
        if name.is_founding() {
            return Err(RegistryError::WrongCredential);
        }
        self.registry
            .set_recovery(
                &name,
                &self.hasher.hash_pin(&pin),
                question,
                &self.hasher.hash_answer(answer),
            )
            .await
    }

    pub async fn list(&self) -> NameListing {
        let listing = async {
            let names = self.registry.names().await?;
            let count = self.registry.total_count().await?;
            Ok::<_, RegistryError>((names, count))
        };
        match listing.await {
            Ok((names, count)) => NameListing {
                names,
                count,
                degraded: false,
            },
            Err(err) => {
                warn!("listing degraded to founding names: {}", err);
                NameListing {
                    names: FOUNDING_NAMES.iter().map(|n| n.to_string()).collect(),
                    count: FOUNDING_NAMES.len() as u64,
                    degraded: true,
                }
            }
        }
    }

    pub async fn invite_count(&self, raw_name: &str) -> InviteSummary {
        let normalized = policy::normalize(raw_name);
        let Ok(name) = Name::parse(&normalized) else {
            return InviteSummary {
                name: normalized,
                invite_count: 0,
                degraded: false,
            };
        };
        match self.registry.invite_count(&name).await {
            Ok(invite_count) => InviteSummary {
                name: normalized,
                invite_count,
                degraded: false,
            },
            Err(err) => {
                warn!("invite count for {} unavailable: {}", name, err);
                InviteSummary {
                    name: normalized,
                    invite_count: 0,
                    degraded: true,
                }
            }
        }
    }
}
