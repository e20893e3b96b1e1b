//! # Snippetbox
//!
//! `snippetbox` is a small service for creating and viewing short text
//! snippets, gated by user signup and login.
//!
//! ## Authentication
//!
//! Passwords are hashed with **Argon2id** using a fixed work factor and a
//! per-call random salt. Raw passwords travel as `SecretString` and are never
//! logged or persisted. Login failures never reveal whether the email exists;
//! an unknown email still pays for a dummy hash verification.
//!
//! ## Sessions
//!
//! Sessions are server-side records keyed by the SHA-256 of a random 256-bit
//! token carried in the `snippetbox_session` cookie. Every request passes
//! through one pipeline:
//!
//! 1. **Session attach:** load the record behind the cookie, or start a fresh one.
//! 2. **CSRF guard:** unsafe methods must present a token minted from the
//!    session's CSRF secret (`X-CSRF-Token` header or `csrf_token` form field).
//! 3. **Authentication context:** the stored user id is re-checked against the
//!    users table on every request, so deleted users lose access immediately.
//! 4. **Access control:** protected routes reject anonymous requests with `401`.
//! 5. **Persist:** session mutations are written back on every exit path,
//!    including handler panics and client disconnects.
//!
//! The session token is renewed on login, logout and password change to defeat
//! session fixation.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
