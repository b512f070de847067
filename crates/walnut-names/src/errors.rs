use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use walnut_kv::KvError;

/// Input rejected before any storage access
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid name")]
    InvalidName,

    #[error("PIN must be 4 digits")]
    InvalidPin,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} exceeds {max} characters")]
    FieldTooLong { field: &'static str, max: usize },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidName => "invalid-name",
            ValidationError::InvalidPin => "invalid-pin",
            ValidationError::MissingField(_) => "missing-field",
            ValidationError::FieldTooLong { .. } => "field-too-long",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictReason {
    /// Founding or permanently claimed
    Taken,
    /// A live hold belongs to somebody else
    Held,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::Taken => "taken",
            ConflictReason::Held => "held",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Name conflict: {reason}")]
    Conflict {
        reason: ConflictReason,
        /// Seconds until the blocking hold expires, when known
        retry_in: Option<u64>,
    },

    /// Deliberately silent about whether the name exists
    #[error("Credential does not match")]
    WrongCredential,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] KvError),
}

impl RegistryError {
    pub fn taken() -> Self {
        RegistryError::Conflict {
            reason: ConflictReason::Taken,
            retry_in: None,
        }
    }

    pub fn held(retry_in: Option<u64>) -> Self {
        RegistryError::Conflict {
            reason: ConflictReason::Held,
            retry_in,
        }
    }

    /// Stable machine-readable reason for API payloads
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::Validation(err) => err.code(),
            RegistryError::Conflict { reason, .. } => reason.as_str(),
            RegistryError::WrongCredential => "wrong-credential",
            RegistryError::StorageUnavailable(_) => "storage-unavailable",
        }
    }

    pub fn retry_in(&self) -> Option<u64> {
        match self {
            RegistryError::Conflict { retry_in, .. } => *retry_in,
            _ => None,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
