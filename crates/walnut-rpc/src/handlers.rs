use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use warp::http::StatusCode;
use warp::reply::{Reply, Response};
use walnut_names::{Credential, RegistryError, ReservationService, ReserveRequest, ValidationError};

use crate::api::{
    CheckResponse, ClaimBody, ErrorResponse, InviteResponse, ListResponse, OkResponse, ReserveBody,
    SecurityBody,
};

/// Transport metadata used to identify PIN-less holders
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub user_agent: Option<String>,
    pub remote: Option<SocketAddr>,
}

impl ClientMeta {
    /// First hop of `x-forwarded-for`, then `x-real-ip`, then the socket peer
    pub fn ip(&self) -> String {
        let forwarded = self
            .forwarded_for
            .as_deref()
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real_ip = self.real_ip.as_deref().map(str::trim).filter(|v| !v.is_empty());
        forwarded
            .or(real_ip)
            .map(str::to_string)
            .or_else(|| self.remote.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn credential(&self) -> Credential {
        Credential::client(&self.ip(), self.user_agent.as_deref().unwrap_or(""))
    }
}

fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

/// Lenient body parsing: malformed JSON is treated like an empty body
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> T {
    serde_json::from_slice(body).unwrap_or_default()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Holder credential: the PIN when one is supplied, else the transport identity
fn credential_for(pin: Option<String>, meta: &ClientMeta) -> Result<Credential, ValidationError> {
    match non_empty(pin) {
        Some(pin) => Credential::pin(&pin),
        None => Ok(meta.credential()),
    }
}

fn error_status(err: &RegistryError, wrong_credential: StatusCode) -> StatusCode {
    match err {
        RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
        RegistryError::Conflict { .. } => StatusCode::CONFLICT,
        RegistryError::WrongCredential => wrong_credential,
        RegistryError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_reply(err: &RegistryError, wrong_credential: StatusCode) -> Response {
    if let RegistryError::StorageUnavailable(cause) = err {
        warn!("write rejected, storage unavailable: {}", cause);
    }
    json_reply(&OkResponse::from(err), error_status(err, wrong_credential))
}

pub async fn health() -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&"ok"))
}

pub async fn check_name(
    params: HashMap<String, String>,
    service: Arc<ReservationService>,
) -> Result<Response, Infallible> {
    let Some(name) = params.get("name").filter(|n| !n.is_empty()) else {
        return Ok(json_reply(
            &ErrorResponse::new("Missing name parameter"),
            StatusCode::BAD_REQUEST,
        ));
    };
    let outcome = service.check(name).await;
    Ok(json_reply(&CheckResponse::from(outcome), StatusCode::OK))
}

pub async fn list_names(service: Arc<ReservationService>) -> Result<Response, Infallible> {
    let listing = service.list().await;
    Ok(json_reply(&ListResponse::from(listing), StatusCode::OK))
}

pub async fn reserve_name(
    meta: ClientMeta,
    body: Bytes,
    service: Arc<ReservationService>,
) -> Result<Response, Infallible> {
    let body: ReserveBody = parse_body(&body);
    let Some(name) = non_empty(body.name) else {
        return Ok(json_reply(&OkResponse::failure("Missing name"), StatusCode::BAD_REQUEST));
    };
    let credential = match credential_for(body.pin, &meta) {
        Ok(credential) => credential,
        Err(err) => return Ok(error_reply(&RegistryError::from(err), StatusCode::FORBIDDEN)),
    };

    let request = ReserveRequest {
        name,
        credential,
        invited_by: non_empty(body.invited_by),
    };
    match service.reserve(request).await {
        Ok(outcome) => {
            debug!("reserved {} for {}s", outcome.name, outcome.hold_seconds);
            Ok(json_reply(&OkResponse::from(outcome), StatusCode::OK))
        }
        Err(err) => Ok(error_reply(&err, StatusCode::FORBIDDEN)),
    }
}

pub async fn claim_name(
    meta: ClientMeta,
    body: Bytes,
    service: Arc<ReservationService>,
) -> Result<Response, Infallible> {
    let body: ClaimBody = parse_body(&body);
    let Some(name) = non_empty(body.name) else {
        return Ok(json_reply(&OkResponse::failure("Missing name"), StatusCode::BAD_REQUEST));
    };
    let credential = match credential_for(body.pin, &meta) {
        Ok(credential) => credential,
        Err(err) => return Ok(error_reply(&RegistryError::from(err), StatusCode::FORBIDDEN)),
    };
    match service.claim(&name, &credential).await {
        Ok(name) => {
            debug!("claimed {}", name);
            Ok(json_reply(&OkResponse::success(), StatusCode::OK))
        }
        Err(err) => Ok(error_reply(&err, StatusCode::FORBIDDEN)),
    }
}

pub async fn set_security(
    body: Bytes,
    service: Arc<ReservationService>,
) -> Result<Response, Infallible> {
    let body: SecurityBody = parse_body(&body);
    let (Some(name), Some(pin), Some(question), Some(answer)) = (
        non_empty(body.name),
        non_empty(body.pin),
        non_empty(body.question),
        non_empty(body.answer),
    ) else {
        return Ok(json_reply(&OkResponse::failure("Missing fields"), StatusCode::BAD_REQUEST));
    };
    match service
        .set_recovery_question(&name, &pin, &question, &answer)
        .await
    {
        Ok(()) => Ok(json_reply(&OkResponse::success(), StatusCode::OK)),
        Err(err) => Ok(error_reply(&err, StatusCode::BAD_REQUEST)),
    }
}

pub async fn invite_count(
    name: String,
    service: Arc<ReservationService>,
) -> Result<Response, Infallible> {
    let summary = service.invite_count(&name).await;
    Ok(json_reply(&InviteResponse::from(summary), StatusCode::OK))
}
