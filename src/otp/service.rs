use anyhow::Result;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::models::{
    generate_code, IssuedVerification, OtpConfig, PendingVerification, VerificationEntry,
    VerifiedLogin,
};

/// Out-of-band channel for the one-time code (email in production).
pub trait CodeDelivery: Send + Sync {
    /// Hand the code to the delivery channel.
    ///
    /// # Errors
    /// Returns an error if the code could not be queued for delivery.
    fn deliver(&self, email: &str, code: &str, expires_in: Duration) -> Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("verification not found")]
    NotFound,
    #[error("verification code expired")]
    Expired,
    #[error("invalid verification code, {attempts_left} attempts left")]
    InvalidCode { attempts_left: u32 },
    #[error("too many failed attempts")]
    AttemptsExhausted,
    #[error("a code was sent recently, retry in {retry_after_seconds}s")]
    Cooldown { retry_after_seconds: u64 },
    #[error("failed to deliver verification code")]
    Delivery(#[source] anyhow::Error),
}

enum Check {
    Expired,
    Matched,
    Mismatch { attempts_left: u32 },
    Exhausted { until: Instant },
}

/// In-memory store of pending second-factor verifications.
///
/// Lifecycle of a verification id: `create` puts it in *pending*; `verify`
/// with the right code consumes it (*verified*); a check after the window
/// discards it (*expired*); running out of attempts turns it into an
/// *exhausted* tombstone. Only pending records accept code checks.
///
/// State is process-local: a restart drops every pending verification.
pub struct OtpService {
    config: OtpConfig,
    delivery: Arc<dyn CodeDelivery>,
    entries: Mutex<HashMap<Uuid, VerificationEntry>>,
}

impl OtpService {
    #[must_use]
    pub fn new(config: OtpConfig, delivery: Arc<dyn CodeDelivery>) -> Self {
        Self {
            config: config.normalize(),
            delivery,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Issue a code for a user who passed the primary credential check.
    ///
    /// # Errors
    /// Returns `OtpError::Delivery` if the code could not be dispatched; no
    /// record is kept in that case.
    #[instrument(skip_all, fields(%user_id))]
    pub async fn create(&self, user_id: Uuid, email: &str) -> Result<IssuedVerification, OtpError> {
        let now = Instant::now();
        let code = generate_code(&mut OsRng, self.config.code_length());

        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| !entry.is_stale(now));

        self.delivery
            .deliver(email, &code, self.config.ttl())
            .map_err(OtpError::Delivery)?;

        let verification_id = Uuid::now_v7();
        entries.insert(
            verification_id,
            VerificationEntry::Pending(PendingVerification::issue(
                user_id,
                email.to_string(),
                code,
                now,
                &self.config,
            )),
        );

        info!(%verification_id, "verification code issued");

        Ok(IssuedVerification {
            verification_id,
            email: email.to_string(),
            expires_in: self.config.ttl(),
        })
    }

    /// Check a submitted code.
    ///
    /// # Errors
    /// - `NotFound`: unknown or already consumed id.
    /// - `Expired`: the window closed; the record is discarded.
    /// - `InvalidCode`: wrong code, attempts left reported.
    /// - `AttemptsExhausted`: the last attempt was used, now or before.
    #[instrument(skip_all, fields(%verification_id))]
    pub async fn verify(
        &self,
        verification_id: Uuid,
        submitted: &str,
    ) -> Result<VerifiedLogin, OtpError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let check = match entries.get_mut(&verification_id) {
            None => return Err(OtpError::NotFound),
            Some(VerificationEntry::Exhausted { until }) => {
                if now > *until {
                    entries.remove(&verification_id);
                    return Err(OtpError::NotFound);
                }
                return Err(OtpError::AttemptsExhausted);
            }
            Some(VerificationEntry::Pending(pending)) => {
                if pending.is_expired(now) {
                    Check::Expired
                } else if pending.matches(submitted) {
                    Check::Matched
                } else {
                    pending.attempts_remaining = pending.attempts_remaining.saturating_sub(1);
                    if pending.attempts_remaining == 0 {
                        Check::Exhausted {
                            until: pending.expires_at,
                        }
                    } else {
                        Check::Mismatch {
                            attempts_left: pending.attempts_remaining,
                        }
                    }
                }
            }
        };

        match check {
            Check::Expired => {
                entries.remove(&verification_id);
                debug!("verification expired");
                Err(OtpError::Expired)
            }
            Check::Matched => match entries.remove(&verification_id) {
                Some(VerificationEntry::Pending(pending)) => {
                    info!(user_id = %pending.user_id, "verification succeeded");
                    Ok(VerifiedLogin {
                        user_id: pending.user_id,
                        email: pending.email,
                    })
                }
                _ => Err(OtpError::NotFound),
            },
            Check::Mismatch { attempts_left } => {
                debug!(attempts_left, "verification code mismatch");
                Err(OtpError::InvalidCode { attempts_left })
            }
            Check::Exhausted { until } => {
                entries.insert(verification_id, VerificationEntry::Exhausted { until });
                warn!("verification attempts exhausted");
                Err(OtpError::AttemptsExhausted)
            }
        }
    }

    /// Issue a new code for the same verification id, resetting the window
    /// and the attempt budget. The previous code stops working.
    ///
    /// # Errors
    /// `NotFound` and `Expired` follow `verify`; `AttemptsExhausted` for
    /// exhausted records; `Cooldown` when called again too soon; `Delivery`
    /// if the new code could not be dispatched (the old code stays valid).
    #[instrument(skip_all, fields(%verification_id))]
    pub async fn resend(&self, verification_id: Uuid) -> Result<IssuedVerification, OtpError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let pending = match entries.get_mut(&verification_id) {
            None => return Err(OtpError::NotFound),
            Some(VerificationEntry::Exhausted { until }) => {
                if now > *until {
                    entries.remove(&verification_id);
                    return Err(OtpError::NotFound);
                }
                return Err(OtpError::AttemptsExhausted);
            }
            Some(VerificationEntry::Pending(pending)) => pending,
        };

        if pending.is_expired(now) {
            entries.remove(&verification_id);
            return Err(OtpError::Expired);
        }

        let ready_at = pending.issued_at + self.config.resend_cooldown();
        if now < ready_at {
            let remaining = ready_at.duration_since(now);
            return Err(OtpError::Cooldown {
                retry_after_seconds: remaining.as_secs().max(1),
            });
        }

        let code = generate_code(&mut OsRng, self.config.code_length());
        self.delivery
            .deliver(&pending.email, &code, self.config.ttl())
            .map_err(OtpError::Delivery)?;
        pending.reissue(code, now, &self.config);

        info!("verification code reissued");

        Ok(IssuedVerification {
            verification_id,
            email: pending.email.clone(),
            expires_in: self.config.ttl(),
        })
    }

    /// Drop expired records and tombstones. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_stale(now));
        before - entries.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| matches!(entry, VerificationEntry::Pending(_)))
            .count()
    }
}

/// Periodically purge verifications nobody came back for.
pub fn spawn_sweeper(service: Arc<OtpService>, every: Duration) -> JoinHandle<()> {
    let every = if every.is_zero() {
        Duration::from_secs(1)
    } else {
        every
    };
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = service.purge_expired().await;
            if removed > 0 {
                debug!(removed, "purged stale verifications");
            }
        }
    })
}
