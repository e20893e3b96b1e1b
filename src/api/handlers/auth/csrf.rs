//! Anti-forgery tokens bound to the session.
//!
//! Each session carries a random secret. Tokens handed to clients are
//! `base64url(nonce || HMAC-SHA256(secret, nonce))`, so every render yields a
//! fresh value and any of them validates for the life of the session. The
//! secret itself never leaves the server.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header::CONTENT_TYPE, Method},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::utils::random_bytes;

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FORM_FIELD: &str = "csrf_token";

const CSRF_SECRET_BYTES: usize = 32;
const CSRF_NONCE_BYTES: usize = 16;
const CSRF_TAG_BYTES: usize = 32;
/// Upper bound for buffering a form body while looking for the token.
const MAX_FORM_BYTES: usize = 2 * 1024 * 1024;

/// Methods that never change state skip the check.
pub(crate) fn requires_csrf(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

pub(crate) fn generate_secret() -> Result<String> {
    let bytes = random_bytes::<CSRF_SECRET_BYTES>().context("failed to generate CSRF secret")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

fn keyed_mac(secret: &str) -> Result<HmacSha256> {
    let key = Base64UrlUnpadded::decode_vec(secret).map_err(|e| anyhow!("invalid CSRF secret: {e}"))?;
    HmacSha256::new_from_slice(&key).map_err(|e| anyhow!("invalid CSRF key: {e}"))
}

/// Mint a token for embedding in a form or header.
pub(crate) fn mint_token(secret: &str) -> Result<String> {
    let nonce = random_bytes::<CSRF_NONCE_BYTES>().context("failed to generate CSRF nonce")?;
    let mut mac = keyed_mac(secret)?;
    mac.update(&nonce);
    let tag = mac.finalize().into_bytes();

    let mut token = Vec::with_capacity(CSRF_NONCE_BYTES + CSRF_TAG_BYTES);
    token.extend_from_slice(&nonce);
    token.extend_from_slice(&tag);
    Ok(Base64UrlUnpadded::encode_string(&token))
}

/// Check a submitted token against the session secret in constant time.
pub(crate) fn verify_token(secret: &str, token: &str) -> bool {
    let Ok(raw) = Base64UrlUnpadded::decode_vec(token.trim()) else {
        return false;
    };
    if raw.len() != CSRF_NONCE_BYTES + CSRF_TAG_BYTES {
        return false;
    }
    let (nonce, tag) = raw.split_at(CSRF_NONCE_BYTES);
    let Ok(mut mac) = keyed_mac(secret) else {
        return false;
    };
    mac.update(nonce);
    mac.verify_slice(tag).is_ok()
}

/// Pull the submitted token from the `X-CSRF-Token` header, falling back to the
/// `csrf_token` field of an urlencoded form. The body is buffered and put back
/// so the handler still sees it.
pub(crate) async fn submitted_token(req: Request) -> (Request, Option<String>) {
    if let Some(token) = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
    {
        let token = token.trim().to_string();
        return (req, Some(token));
    }

    let is_form = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .to_ascii_lowercase()
                .starts_with("application/x-www-form-urlencoded")
        });
    if !is_form {
        return (req, None);
    }

    let (parts, body) = req.into_parts();
    let Ok(bytes) = to_bytes(body, MAX_FORM_BYTES).await else {
        return (Request::from_parts(parts, Body::empty()), None);
    };
    let token = url::form_urlencoded::parse(&bytes)
        .find(|(key, _)| key == CSRF_FORM_FIELD)
        .map(|(_, value)| value.into_owned());
    (Request::from_parts(parts, Body::from(bytes)), token)
}
