// JSON request and response bodies for the name API.

use serde::{Deserialize, Serialize};
use walnut_names::{
    CheckOutcome, InviteSummary, NameListing, NameStatus, RegistryError, ReserveOutcome, TakenKind,
};

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveBody {
    pub name: Option<String>,
    pub pin: Option<String>,
    pub invited_by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClaimBody {
    pub name: Option<String>,
    pub pin: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SecurityBody {
    pub name: Option<String>,
    pub pin: Option<String>,
    pub question: Option<String>,
    pub answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CheckStatus {
    Available,
    Taken,
    Held {
        #[serde(rename = "expiresIn")]
        expires_in: u64,
    },
    /// Claimed by a visitor (founding names report `taken`)
    Reserved,
}

impl From<&NameStatus> for CheckStatus {
    fn from(status: &NameStatus) -> Self {
        match status {
            NameStatus::Available => CheckStatus::Available,
            NameStatus::Held { expires_in, .. } => CheckStatus::Held {
                expires_in: *expires_in,
            },
            NameStatus::Taken(TakenKind::Claimed) => CheckStatus::Reserved,
            NameStatus::Taken(TakenKind::Founding | TakenKind::Invalid) => CheckStatus::Taken,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    #[serde(flatten)]
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "is_false")]
    pub degraded: bool,
}

impl From<CheckOutcome> for CheckResponse {
    fn from(outcome: CheckOutcome) -> Self {
        CheckResponse {
            status: CheckStatus::from(&outcome.status),
            degraded: outcome.degraded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    pub names: Vec<String>,
    pub count: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub degraded: bool,
}

impl From<NameListing> for ListResponse {
    fn from(listing: NameListing) -> Self {
        ListResponse {
            names: listing.names,
            count: listing.count,
            degraded: listing.degraded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteResponse {
    pub name: String,
    pub invite_count: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub degraded: bool,
}

impl From<InviteSummary> for InviteResponse {
    fn from(summary: InviteSummary) -> Self {
        InviteResponse {
            name: summary.name,
            invite_count: summary.invite_count,
            degraded: summary.degraded,
        }
    }
}

/// `{ok, ...}` envelope shared by the write routes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_in: Option<u64>,
}

impl OkResponse {
    pub fn success() -> Self {
        OkResponse {
            ok: true,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        OkResponse {
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

impl From<ReserveOutcome> for OkResponse {
    fn from(outcome: ReserveOutcome) -> Self {
        OkResponse {
            ok: true,
            hold_seconds: Some(outcome.hold_seconds),
            count: outcome.count,
            ..Default::default()
        }
    }
}

impl From<&RegistryError> for OkResponse {
    fn from(err: &RegistryError) -> Self {
        OkResponse {
            ok: false,
            error: Some(err.code().to_string()),
            retry_in: err.retry_in(),
            ..Default::default()
        }
    }
}

/// Bare error payload for malformed requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorResponse { error: error.into() }
    }
}
