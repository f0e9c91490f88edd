//! HTTP surface. Every handler returns `Json<ApiResponse>` with status 200;
//! failures are carried in the `success: false` envelope rather than the
//! status line. This was an open question (the predecessor service
//! returned a 500 from one handler on success by mistake) and is resolved
//! here in favor of the uniform-200 contract, documented as a deliberate
//! choice rather than left as an inconsistency.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use log::info;
use serde::{Deserialize, Serialize};

use devid_protocol::challenge::make_credential;
use devid_protocol::codec::SigningRequest;
use devid_protocol::verify::verify_request;

use crate::allowlist::Allowlist;
use crate::issuance::issue_devid_certificate;
use crate::session::{SessionCache, SessionStep, SessionToken};
use crate::spire_notify::notify_workload_tokens;

pub struct ProvisionerState {
    pub sessions: SessionCache,
    pub allowlist: Allowlist,
    pub manufacturer_roots: Vec<Vec<u8>>,
    pub provider_ca_der: Vec<u8>,
    pub provider_key: rsa::RsaPrivateKey,
    pub spire_tokens_url: Option<String>,
}

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        reason: None,
        data: Some(data),
    })
}

fn fail(reason: impl std::fmt::Display) -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: false,
        reason: Some(reason.to_string()),
        data: None,
    })
}

const SESSION_COOKIE: &str = "session";

fn session_token_from_headers(headers: &axum::http::HeaderMap) -> Result<SessionToken, String> {
    let cookie_header = headers
        .get(axum::http::header::COOKIE)
        .ok_or_else(|| "missing session cookie".to_string())?
        .to_str()
        .map_err(|_| "invalid session cookie".to_string())?;

    cookie_header
        .split(';')
        .map(str::trim)
        .find_map(|kv| kv.strip_prefix(&format!("{SESSION_COOKIE}=")))
        .ok_or_else(|| "missing session cookie".to_string())
        .and_then(|raw| SessionToken::parse(raw).map_err(|e| e.to_string()))
}

#[derive(Deserialize)]
pub struct AuthorizeQuery {
    pub xname: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

pub async fn authorize(
    State(state): State<Arc<ProvisionerState>>,
    axum::extract::Query(query): axum::extract::Query<AuthorizeQuery>,
) -> Response {
    if !state.allowlist.is_allowed(&query.xname) {
        return (StatusCode::OK, fail("xname is not on the allowlist")).into_response();
    }

    let token = state.sessions.create(query.xname, query.node_type);
    let cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly");
    let mut response = ok(()).into_response();
    response
        .headers_mut()
        .insert(axum::http::header::SET_COOKIE, cookie.parse().unwrap());
    response
}

#[derive(Deserialize)]
pub struct ChallengeRequestBody {
    pub data: String,
    pub sig: String,
}

#[derive(Serialize)]
pub struct ChallengeResponseBody {
    pub blob: String,
    pub secret: String,
}

pub async fn request_challenge(
    State(state): State<Arc<ProvisionerState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<ChallengeRequestBody>,
) -> Response {
    let token = match session_token_from_headers(&headers) {
        Ok(t) => t,
        Err(reason) => return (StatusCode::OK, fail(reason)).into_response(),
    };

    if let Err(e) = state.sessions.advance(token, SessionStep::Created) {
        return (StatusCode::OK, fail(e)).into_response();
    }

    let raw = match STANDARD.decode(&body.data) {
        Ok(r) => r,
        Err(_) => return (StatusCode::OK, fail("invalid base64 signing request")).into_response(),
    };
    let sig = match STANDARD.decode(&body.sig) {
        Ok(s) => s,
        Err(_) => return (StatusCode::OK, fail("invalid base64 signature")).into_response(),
    };

    let signing_request = match SigningRequest::from_bytes(&raw) {
        Ok(r) => r,
        Err(e) => return (StatusCode::OK, fail(e)).into_response(),
    };

    if let Err(e) = verify_request(&signing_request, &raw, &sig, &state.manufacturer_roots) {
        return (StatusCode::OK, fail(e)).into_response();
    }

    let challenge = match make_credential(&signing_request) {
        Ok(c) => c,
        Err(e) => return (StatusCode::OK, fail(e)).into_response(),
    };

    if let Err(e) = state
        .sessions
        .set_challenge_state(token, challenge.nonce.clone(), raw)
    {
        return (StatusCode::OK, fail(e)).into_response();
    }

    ok(ChallengeResponseBody {
        blob: STANDARD_NO_PAD.encode(&challenge.blob),
        secret: STANDARD_NO_PAD.encode(&challenge.secret),
    })
    .into_response()
}

#[derive(Deserialize)]
pub struct SubmitChallengeBody {
    pub data: String,
}

#[derive(Serialize)]
pub struct SubmitChallengeResponseBody {
    pub dev_id_certificate: String,
}

pub async fn submit_challenge(
    State(state): State<Arc<ProvisionerState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<SubmitChallengeBody>,
) -> Response {
    let token = match session_token_from_headers(&headers) {
        Ok(t) => t,
        Err(reason) => return (StatusCode::OK, fail(reason)).into_response(),
    };

    let session = match state.sessions.advance(token, SessionStep::AwaitingChallenge) {
        Ok(s) => s,
        Err(e) => return (StatusCode::OK, fail(e)).into_response(),
    };

    let submitted_nonce = match STANDARD.decode(&body.data) {
        Ok(n) => n,
        Err(_) => return (StatusCode::OK, fail("invalid base64 nonce")).into_response(),
    };

    let expected_nonce = session.nonce.unwrap_or_default();
    if submitted_nonce != expected_nonce {
        return (
            StatusCode::OK,
            fail("challenge response does not match nonce"),
        )
            .into_response();
    }

    let req_data = session.req_data.unwrap_or_default();
    let signing_request = match SigningRequest::from_bytes(&req_data) {
        Ok(r) => r,
        Err(e) => return (StatusCode::OK, fail(e)).into_response(),
    };

    let cert_der = match issue_devid_certificate(
        &signing_request,
        &state.provider_ca_der,
        &state.provider_key,
    ) {
        Ok(c) => c,
        Err(e) => return (StatusCode::OK, fail(e.to_string())).into_response(),
    };

    let response = ok(SubmitChallengeResponseBody {
        dev_id_certificate: STANDARD_NO_PAD.encode(&cert_der),
    })
    .into_response();

    if let Some(url) = state.spire_tokens_url.clone() {
        let xname = session.xname.clone();
        let node_type = session.node_type.clone();
        tokio::spawn(async move {
            notify_workload_tokens(&url, &xname, &node_type).await;
        });
    }

    response
}

pub async fn whitelist_get(State(state): State<Arc<ProvisionerState>>) -> Response {
    ok(state.allowlist.list()).into_response()
}

#[derive(Deserialize)]
pub struct WhitelistPatternBody {
    pub pattern: String,
}

pub async fn whitelist_add(
    State(state): State<Arc<ProvisionerState>>,
    Json(body): Json<WhitelistPatternBody>,
) -> Response {
    match state.allowlist.add(&body.pattern) {
        Ok(()) => ok(()).into_response(),
        Err(e) => (StatusCode::OK, fail(e.to_string())).into_response(),
    }
}

pub async fn whitelist_remove(
    State(state): State<Arc<ProvisionerState>>,
    Json(body): Json<WhitelistPatternBody>,
) -> Response {
    match state.allowlist.remove(&body.pattern) {
        Ok(()) => ok(()).into_response(),
        Err(e) => (StatusCode::OK, fail(e.to_string())).into_response(),
    }
}

async fn log_requests(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    info!(
        "{method} {path} -> {} ({:?})",
        response.status(),
        start.elapsed()
    );
    response
}

pub fn router(state: Arc<ProvisionerState>) -> Router {
    Router::new()
        .route("/apis/tpm-provisioner/authorize", get(authorize))
        .route(
            "/apis/tpm-provisioner/challenge/request",
            post(request_challenge),
        )
        .route(
            "/apis/tpm-provisioner/challenge/submit",
            post(submit_challenge),
        )
        .route("/apis/tpm-provisioner/whitelist/get", get(whitelist_get))
        .route("/apis/tpm-provisioner/whitelist/add", post(whitelist_add))
        .route(
            "/apis/tpm-provisioner/whitelist/remove",
            post(whitelist_remove),
        )
        .layer(middleware::from_fn(log_requests))
        .layer(tower_http::timeout::TimeoutLayer::new(Duration::from_secs(10)))
        .with_state(state)
}
