//! The three HTTP calls that make up the client side of the protocol.
//! Every failure here returns a `Result`; the predecessor client used to
//! call `log.Fatalf` on a missing session cookie, which took the whole
//! process down on a condition a caller might reasonably want to retry.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

pub struct AuthorizedSession {
    pub cookie: String,
}

pub async fn authorize(client: &Client, base_url: &str, xname: &str, node_type: &str) -> Result<AuthorizedSession> {
    let url = format!("{base_url}/apis/tpm-provisioner/authorize");
    let resp = client
        .get(&url)
        .query(&[("xname", xname), ("type", node_type)])
        .send()
        .await
        .context("sending authorize request")?;

    let cookie = resp
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .context("missing session cookie")?
        .to_str()
        .context("invalid session cookie")?
        .split(';')
        .next()
        .context("invalid session cookie")?
        .to_string();

    let body: GenericResponse = resp.json().await.context("parsing authorize response")?;
    if !body.success {
        bail!(body.reason.unwrap_or_else(|| "authorize failed".into()));
    }

    Ok(AuthorizedSession { cookie })
}

#[derive(Deserialize)]
struct GenericResponse {
    success: bool,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct ChallengeResponseBody {
    success: bool,
    reason: Option<String>,
    blob: Option<String>,
    secret: Option<String>,
}

pub struct Challenge {
    pub blob: Vec<u8>,
    pub secret: Vec<u8>,
}

pub async fn request_challenge(
    client: &Client,
    base_url: &str,
    session: &AuthorizedSession,
    signing_request: &[u8],
    sig: &[u8],
) -> Result<Challenge> {
    let url = format!("{base_url}/apis/tpm-provisioner/challenge/request");
    let resp = client
        .post(&url)
        .header(reqwest::header::COOKIE, &session.cookie)
        .json(&serde_json::json!({
            "data": STANDARD.encode(signing_request),
            "sig": STANDARD.encode(sig),
        }))
        .send()
        .await
        .context("sending challenge request")?;

    let body: ChallengeResponseBody = resp.json().await.context("parsing challenge response")?;
    if !body.success {
        bail!(body.reason.unwrap_or_else(|| "challenge request failed".into()));
    }

    let blob = STANDARD_NO_PAD
        .decode(body.blob.context("missing blob in challenge response")?)
        .context("decoding challenge blob")?;
    let secret = STANDARD_NO_PAD
        .decode(body.secret.context("missing secret in challenge response")?)
        .context("decoding challenge secret")?;

    Ok(Challenge { blob, secret })
}

#[derive(Deserialize)]
struct SubmitResponseBody {
    success: bool,
    reason: Option<String>,
    dev_id_certificate: Option<String>,
}

pub async fn submit_challenge(
    client: &Client,
    base_url: &str,
    session: &AuthorizedSession,
    recovered_nonce: &[u8],
) -> Result<Vec<u8>> {
    let url = format!("{base_url}/apis/tpm-provisioner/challenge/submit");
    let resp = client
        .post(&url)
        .header(reqwest::header::COOKIE, &session.cookie)
        .json(&serde_json::json!({ "data": STANDARD.encode(recovered_nonce) }))
        .send()
        .await
        .context("sending challenge submission")?;

    let body: SubmitResponseBody = resp.json().await.context("parsing submit response")?;
    if !body.success {
        bail!(body.reason.unwrap_or_else(|| "challenge submission failed".into()));
    }

    STANDARD_NO_PAD
        .decode(body.dev_id_certificate.context("missing certificate in submit response")?)
        .context("decoding issued certificate")
}
