//! Auth handlers and supporting modules.
//!
//! This module coordinates the two step login, session management and the
//! role checks used by admin routes.
//!
//! ## Rate Limiting
//!
//! Login, code verification and resend are rate limited per client IP and per
//! key (email or verification id) before any credential or code work happens.
//!
//! - **Per IP:** 30 attempts per action within 10 minutes.
//! - **Per key:** 10 attempts per action within 10 minutes.
//!
//! ## Sessions
//!
//! Sessions are opaque 32-byte tokens sent as an `HttpOnly` cookie. Only the
//! SHA-256 of the token is stored, so a database dump cannot be replayed.

pub(crate) mod login;
mod password;
pub(crate) mod principal;
mod rate_limit;
pub(crate) mod session;
mod state;
pub(crate) mod storage;
pub(crate) mod types;
pub(crate) mod utils;

pub use principal::{Principal, Role};
pub use rate_limit::{NoopRateLimiter, RateLimiter, WindowRateLimiter};
pub use state::{AuthConfig, AuthState};
