//! API handlers for helpdesk.
//!
//! Auth (login, second factor, sessions), the notification stream, role
//! gated admin routes and health.

pub mod admin;
pub mod auth;
pub mod events;
pub mod health;
pub mod root;

#[cfg(test)]
pub(crate) mod test_support;
