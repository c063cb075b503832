//! # Helpdesk (Inquiry Tracking Backend)
//!
//! `helpdesk` is the API behind the inquiry dashboard. This crate covers the
//! parts of it that carry state: two-factor login and live notifications to
//! signed-in browser sessions.
//!
//! ## Login
//!
//! Login is a two step exchange. The password is checked against an Argon2
//! hash, then a numeric code is emailed and a verification id is returned.
//! Trading the id and the code for a session is handled by [`otp::OtpService`];
//! codes are single use, expire after a fixed window and allow a small number
//! of wrong guesses.
//!
//! ## Notifications
//!
//! Every open `GET /v1/events` stream is registered in a
//! [`notify::ConnectionRegistry`] under the user id of its session. Server
//! code pushes to all streams of a user without tracking them itself. Delivery
//! is best effort: a stream that cannot accept an event is dropped from the
//! registry and closed.
//!
//! ## Authorization
//!
//! Users carry one of three roles (`admin`, `manager`, `user`). Admin routes
//! answer `404 Not Found` instead of `403 Forbidden` to callers without the
//! required role.

pub mod api;
pub mod cli;
pub mod notify;
pub mod otp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
