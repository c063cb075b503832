//! Authenticated principal extraction and role checks.
//!
//! Read the session cookie (or bearer token), resolve it to an active user and
//! hand handlers a `Principal`. Role gates answer 404 so callers without the
//! role cannot tell the route exists.

use anyhow::{anyhow, Error};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

use super::session::authenticate_session;

#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    User,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::User => "user",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "user" => Ok(Self::User),
            other => Err(anyhow!("unknown user role: {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated user context derived from the session cookie.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl Principal {
    #[must_use]
    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }
}

/// Resolve a session into a principal, or return 401 for missing sessions.
pub async fn require_auth(headers: &HeaderMap, pool: &PgPool) -> Result<Principal, StatusCode> {
    match authenticate_session(headers, pool).await {
        Ok(Some(record)) => Ok(Principal {
            user_id: record.user_id,
            email: record.email,
            role: record.role,
        }),
        Ok(None) => Err(StatusCode::UNAUTHORIZED),
        Err(status) => Err(status),
    }
}

/// Resolve a principal holding one of `roles`; anything else is 404.
pub async fn require_role(
    headers: &HeaderMap,
    pool: &PgPool,
    roles: &[Role],
) -> Result<Principal, StatusCode> {
    match require_auth(headers, pool).await {
        Ok(principal) if principal.has_any_role(roles) => Ok(principal),
        Ok(_) | Err(StatusCode::UNAUTHORIZED) => Err(StatusCode::NOT_FOUND),
        Err(status) => Err(status),
    }
}
