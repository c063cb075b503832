//! Database helpers for users and sessions.

use anyhow::{anyhow, Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::principal::Role;
use super::utils::{generate_session_token, hash_session_token, is_unique_violation};

/// Minimal fields needed for the password step of login.
pub(super) struct LoginRecord {
    pub(super) user_id: Uuid,
    pub(super) email: String,
    pub(super) status: String,
    pub(super) password_hash: String,
}

/// User fields needed after the second factor and by admin routes.
#[derive(Clone, Debug)]
pub(crate) struct UserRecord {
    pub(crate) user_id: Uuid,
    pub(crate) email: String,
    pub(crate) role: Role,
    pub(crate) active: bool,
}

/// Minimal data returned for a valid session cookie.
#[derive(Clone, Debug)]
pub(crate) struct SessionRecord {
    pub(crate) user_id: Uuid,
    pub(crate) email: String,
    pub(crate) role: Role,
}

/// Look up login data by normalized email.
pub(super) async fn lookup_login_record(pool: &PgPool, email: &str) -> Result<Option<LoginRecord>> {
    let query = "SELECT id, email, status::text AS status, password_hash FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup login record")?;

    Ok(row.map(|row| LoginRecord {
        user_id: row.get("id"),
        email: row.get("email"),
        status: row.get("status"),
        password_hash: row.get("password_hash"),
    }))
}

pub(crate) async fn lookup_user(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, email, role::text AS role, status::text AS status
        FROM users
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let role: String = row.get("role");
    let status: String = row.get("status");
    Ok(Some(UserRecord {
        user_id: row.get("id"),
        email: row.get("email"),
        role: role.parse()?,
        active: status == "active",
    }))
}

pub(super) async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    // Generate a random token, store only its hash, and return the raw value
    // so the caller can set the session cookie.
    let query = r"
        INSERT INTO user_sessions (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_session_token()?;
        let token_hash = hash_session_token(&token);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

pub(super) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionRecord>> {
    // Only accept active users and unexpired sessions.
    let query = r"
        UPDATE user_sessions
        SET last_seen_at = NOW()
        FROM users
        WHERE users.id = user_sessions.user_id
          AND user_sessions.token_hash = $1
          AND user_sessions.expires_at > NOW()
          AND users.status = 'active'
        RETURNING users.id, users.email, users.role::text AS role
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let role: String = row.get("role");
    Ok(Some(SessionRecord {
        user_id: row.get("id"),
        email: row.get("email"),
        role: role.parse()?,
    }))
}

pub(super) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Logout is idempotent; it's fine if no rows are deleted.
    let query = "DELETE FROM user_sessions WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

/// Remove every session of a user; returns how many were removed.
pub(crate) async fn delete_user_sessions(pool: &PgPool, user_id: Uuid) -> Result<u64> {
    let query = "DELETE FROM user_sessions WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete user sessions")?;
    Ok(result.rows_affected())
}
