//! Name reservation core for walnut.world links.
//!
//! A visitor checks a short handle, places a time-bounded hold on it with a PIN
//! (or, without one, with an identity derived from their connection), and later
//! confirms the hold into a permanent claim. Abandoned holds escalate the next
//! hold's duration for that name.

pub mod credential;
pub mod errors;
pub mod keys;
pub mod policy;
pub mod registry;
pub mod reservation;

pub use credential::{Credential, CredentialHash, CredentialHasher};
pub use errors::{ConflictReason, RegistryError, RegistryResult, ValidationError};
pub use policy::{normalize, HoldPolicy, Name, Pin, FOUNDING_NAMES};
pub use registry::{HoldGrant, NameRegistry, NameStatus, TakenKind};
pub use reservation::{
    CheckOutcome, InviteSummary, NameListing, ReservationService, ReserveOutcome, ReserveRequest,
};
