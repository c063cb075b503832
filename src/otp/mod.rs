//! # Login verification codes
//!
//! Second factor of the login flow. After the password check succeeds a
//! short numeric code is emailed to the user and a verification id is handed
//! to the client. The client trades `(verification id, code)` for a session.
//!
//! - **Window:** codes are valid for 10 minutes by default; a check strictly
//!   after the window fails with `Expired` and discards the record.
//! - **Attempts:** 5 by default; every wrong code costs one attempt and the
//!   last one leaves an exhausted tombstone until the window would have closed.
//! - **Single use:** a correct code consumes the record.
//! - **Resend:** replaces the code, restarts the window and the attempt budget.
//!
//! Expired records are also purged by a background sweeper.

pub mod models;
pub mod service;

pub use models::{IssuedVerification, OtpConfig, VerifiedLogin};
pub use service::{spawn_sweeper, CodeDelivery, OtpError, OtpService};
