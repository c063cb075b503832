use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

pub const DEFAULT_CODE_TTL_SECONDS: u64 = 10 * 60;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_CODE_LENGTH: usize = 6;
pub const DEFAULT_RESEND_COOLDOWN_SECONDS: u64 = 30;
pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtpConfig {
    ttl: Duration,
    max_attempts: u32,
    code_length: usize,
    resend_cooldown: Duration,
}

impl OtpConfig {
    /// 10 minute validity, 5 attempts, 6 digits, 30s between resends.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CODE_TTL_SECONDS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            code_length: DEFAULT_CODE_LENGTH,
            resend_cooldown: Duration::from_secs(DEFAULT_RESEND_COOLDOWN_SECONDS),
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: u64) -> Self {
        self.ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_code_length(mut self, code_length: usize) -> Self {
        self.code_length = code_length;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: u64) -> Self {
        self.resend_cooldown = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let ttl = if self.ttl.is_zero() {
            Duration::from_secs(1)
        } else {
            self.ttl
        };
        Self {
            ttl,
            max_attempts: self.max_attempts.max(1),
            code_length: self.code_length.clamp(MIN_CODE_LENGTH, MAX_CODE_LENGTH),
            resend_cooldown: self.resend_cooldown.min(ttl),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn code_length(&self) -> usize {
        self.code_length
    }

    #[must_use]
    pub fn resend_cooldown(&self) -> Duration {
        self.resend_cooldown
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Outstanding second-factor check for one login attempt.
pub(super) struct PendingVerification {
    pub(super) user_id: Uuid,
    pub(super) email: String,
    pub(super) code: SecretString,
    pub(super) issued_at: Instant,
    pub(super) expires_at: Instant,
    pub(super) attempts_remaining: u32,
}

impl PendingVerification {
    pub(super) fn issue(
        user_id: Uuid,
        email: String,
        code: String,
        now: Instant,
        config: &OtpConfig,
    ) -> Self {
        Self {
            user_id,
            email,
            code: SecretString::from(code),
            issued_at: now,
            expires_at: now + config.ttl(),
            attempts_remaining: config.max_attempts(),
        }
    }

    /// New code, fresh window and full attempt budget for the same record.
    pub(super) fn reissue(&mut self, code: String, now: Instant, config: &OtpConfig) {
        self.code = SecretString::from(code);
        self.issued_at = now;
        self.expires_at = now + config.ttl();
        self.attempts_remaining = config.max_attempts();
    }

    /// Strictly after the window; `now == expires_at` is still valid.
    pub(super) fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    pub(super) fn matches(&self, submitted: &str) -> bool {
        constant_time_eq(self.code.expose_secret().as_bytes(), submitted.as_bytes())
    }
}

pub(super) enum VerificationEntry {
    Pending(PendingVerification),
    /// Attempt budget used up; kept until the issued window closes so
    /// repeated checks keep reporting exhaustion instead of `NotFound`.
    Exhausted { until: Instant },
}

impl VerificationEntry {
    pub(super) fn is_stale(&self, now: Instant) -> bool {
        match self {
            Self::Pending(pending) => pending.is_expired(now),
            Self::Exhausted { until } => now > *until,
        }
    }
}

/// Returned by `create`; the code itself never leaves the service except
/// through `CodeDelivery`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedVerification {
    pub verification_id: Uuid,
    pub email: String,
    pub expires_in: Duration,
}

/// Returned by a successful `verify`; authorizes session issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedLogin {
    pub user_id: Uuid,
    pub email: String,
}

pub(super) fn generate_code<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

fn constant_time_eq(expected: &[u8], submitted: &[u8]) -> bool {
    if expected.len() != submitted.len() {
        return false;
    }
    expected
        .iter()
        .zip(submitted)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
