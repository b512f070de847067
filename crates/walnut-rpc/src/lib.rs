//! HTTP surface of the walnut.world name registry.
//!
//! | route                  | handler                       |
//! |------------------------|-------------------------------|
//! | `GET  /health`         | liveness                      |
//! | `GET  /name/check`     | availability of `?name=`      |
//! | `GET  /name/list`      | founding + reserved names     |
//! | `POST /name/reserve`   | place or refresh a hold       |
//! | `POST /name/claim`     | confirm a hold permanently    |
//! | `POST /name/security`  | set a recovery question       |
//! | `GET  /invite/{name}`  | inviter's referral count      |

pub mod api;
pub mod handlers;

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use tracing::debug;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};
use walnut_names::ReservationService;

use crate::api::ErrorResponse;
use crate::handlers::ClientMeta;

/// Request bodies are tiny; anything bigger is rejected before parsing
pub const MAX_BODY_BYTES: u64 = 16 * 1024;

fn with_service(
    service: Arc<ReservationService>,
) -> impl Filter<Extract = (Arc<ReservationService>,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

fn client_meta() -> impl Filter<Extract = (ClientMeta,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-forwarded-for")
        .and(warp::header::optional::<String>("x-real-ip"))
        .and(warp::header::optional::<String>("user-agent"))
        .and(warp::addr::remote())
        .map(|forwarded_for, real_ip, user_agent, remote| ClientMeta {
            forwarded_for,
            real_ip,
            user_agent,
            remote,
        })
}

fn body() -> impl Filter<Extract = (bytes::Bytes,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::bytes())
}

pub fn routes(
    service: Arc<ReservationService>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .and_then(handlers::health);

    let check = warp::path!("name" / "check")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_service(service.clone()))
        .and_then(handlers::check_name);

    let list = warp::path!("name" / "list")
        .and(warp::get())
        .and(with_service(service.clone()))
        .and_then(handlers::list_names);

    let reserve = warp::path!("name" / "reserve")
        .and(warp::post())
        .and(client_meta())
        .and(body())
        .and(with_service(service.clone()))
        .and_then(handlers::reserve_name);

    let claim = warp::path!("name" / "claim")
        .and(warp::post())
        .and(client_meta())
        .and(body())
        .and(with_service(service.clone()))
        .and_then(handlers::claim_name);

    let security = warp::path!("name" / "security")
        .and(warp::post())
        .and(body())
        .and(with_service(service.clone()))
        .and_then(handlers::set_security);

    let invite = warp::path!("invite" / String)
        .and(warp::get())
        .and(with_service(service))
        .and_then(handlers::invite_count);

    health
        .or(check)
        .or(list)
        .or(reserve)
        .or(claim)
        .or(security)
        .or(invite)
        .recover(handle_rejection)
        .with(warp::log("walnut_rpc"))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required")
    } else {
        debug!("unhandled rejection: {:?}", err);
        (StatusCode::BAD_REQUEST, "Bad request")
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorResponse::new(message)),
        status,
    ))
}
