//! Two step login: password check, then emailed one-time code.
//!
//! Flow Overview:
//! 1) `POST /v1/auth/login` checks the password and emails a code; the client
//!    gets a verification id.
//! 2) `POST /v1/auth/login/verify` trades `(verificationId, otp)` for a session
//!    cookie.
//! 3) `POST /v1/auth/login/resend` issues a fresh code for the same id.
//!
//! Unknown users, wrong passwords and disabled accounts all answer the same
//! 401 so the endpoint cannot be used to enumerate accounts.

use axum::{
    extract::Extension,
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, warn};

use super::{
    password::{verify_dummy, verify_password},
    rate_limit::{RateLimitAction, RateLimitDecision},
    session::session_cookie,
    state::AuthState,
    storage::{insert_session, lookup_login_record, lookup_user},
    types::{
        ErrorResponse, LoginRequest, LoginResponse, ResendOtpRequest, SessionResponse,
        VerifyOtpRequest,
    },
    utils::{extract_client_ip, normalize_email, parse_verification_id, valid_email},
};
use crate::api::audit::{self, AuditAction, AuditEvent};
use crate::otp::OtpError;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Password accepted, code sent", body = LoginResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 503, description = "Code could not be sent", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login_start(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Missing payload");
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) || request.password.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid email or password");
    }

    // Rate limits are enforced before any credential work to avoid amplification.
    if is_limited(&auth_state, &headers, &email, RateLimitAction::Login) {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "Rate limited");
    }

    let record = match lookup_login_record(&pool, &email).await {
        Ok(record) => record,
        Err(err) => {
            error!("Failed to lookup login record: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Login failed");
        }
    };

    let password = request.password;
    let Some(record) = record else {
        let _ = tokio::task::spawn_blocking(move || verify_dummy(&password)).await;
        return error_response(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS);
    };

    let hash = record.password_hash.clone();
    let password_ok = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .unwrap_or(false);

    if !password_ok || record.status != "active" {
        let reason = if password_ok { "disabled" } else { "password" };
        let event = AuditEvent::from_request(AuditAction::LoginFailed, &headers)
            .target(record.user_id)
            .details(json!({"step": "password", "reason": reason}));
        audit::record(&pool, event).await;
        return error_response(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS);
    }

    match auth_state.otp().create(record.user_id, &record.email).await {
        Ok(issued) => {
            let event = AuditEvent::from_request(AuditAction::LoginStarted, &headers)
                .actor(record.user_id)
                .details(json!({"verification_id": issued.verification_id}));
            audit::record(&pool, event).await;

            let response = LoginResponse {
                verification_id: issued.verification_id.to_string(),
                email: issued.email,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => otp_error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/verify",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Code accepted, session cookie set", body = SessionResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Wrong code", body = ErrorResponse),
        (status = 404, description = "Unknown or consumed verification", body = ErrorResponse),
        (status = 410, description = "Code expired", body = ErrorResponse),
        (status = 429, description = "Attempts exhausted or rate limited", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login_verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Missing payload");
    };
    let Some(verification_id) = parse_verification_id(&request.verification_id) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid verification id");
    };
    // Compared exactly as submitted.
    let otp = request.otp.as_str();
    if otp.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing code");
    }

    if is_limited(
        &auth_state,
        &headers,
        &verification_id.to_string(),
        RateLimitAction::VerifyOtp,
    ) {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "Rate limited");
    }

    let login = match auth_state.otp().verify(verification_id, otp).await {
        Ok(login) => login,
        Err(err) => {
            let event = AuditEvent::from_request(AuditAction::LoginFailed, &headers).details(json!({
                "step": "otp",
                "verification_id": verification_id,
                "reason": err.to_string(),
            }));
            audit::record(&pool, event).await;
            return otp_error_response(&err);
        }
    };

    // The account may have been disabled while the code was in flight.
    let user = match lookup_user(&pool, login.user_id).await {
        Ok(Some(user)) if user.active => user,
        Ok(_) => return error_response(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS),
        Err(err) => {
            error!("Failed to lookup user after verification: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Login failed");
        }
    };

    let token = match insert_session(&pool, user.user_id, auth_state.config().session_ttl_seconds()).await {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create session: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Login failed");
        }
    };

    let mut response_headers = HeaderMap::new();
    match session_cookie(auth_state.config(), &token) {
        Ok(cookie) => {
            response_headers.insert(axum::http::header::SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Login failed");
        }
    }

    let event = AuditEvent::from_request(AuditAction::LoginSucceeded, &headers).actor(user.user_id);
    audit::record(&pool, event).await;

    let response = SessionResponse {
        user_id: user.user_id.to_string(),
        email: user.email,
        role: user.role.to_string(),
    };
    (StatusCode::OK, response_headers, Json(response)).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/resend",
    request_body = ResendOtpRequest,
    responses(
        (status = 204, description = "New code sent"),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 404, description = "Unknown or consumed verification", body = ErrorResponse),
        (status = 410, description = "Verification expired", body = ErrorResponse),
        (status = 429, description = "Cooldown, exhausted or rate limited", body = ErrorResponse),
        (status = 503, description = "Code could not be sent", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login_resend(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendOtpRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Missing payload");
    };
    let Some(verification_id) = parse_verification_id(&request.verification_id) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid verification id");
    };

    if is_limited(
        &auth_state,
        &headers,
        &verification_id.to_string(),
        RateLimitAction::ResendOtp,
    ) {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "Rate limited");
    }

    match auth_state.otp().resend(verification_id).await {
        Ok(issued) => {
            let event = AuditEvent::from_request(AuditAction::OtpResent, &headers)
                .details(json!({"verification_id": issued.verification_id}));
            audit::record(&pool, event).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => otp_error_response(&err),
    }
}

fn is_limited(
    auth_state: &AuthState,
    headers: &HeaderMap,
    key: &str,
    action: RateLimitAction,
) -> bool {
    let client_ip = extract_client_ip(headers);
    let limiter = auth_state.rate_limiter();
    limiter.check_ip(client_ip.as_deref(), action) == RateLimitDecision::Limited
        || limiter.check_key(key, action) == RateLimitDecision::Limited
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// Map a verification failure onto the HTTP contract of the login flow.
pub(super) fn otp_error_response(err: &OtpError) -> Response {
    match err {
        OtpError::NotFound => error_response(StatusCode::NOT_FOUND, "Verification not found"),
        OtpError::Expired => error_response(StatusCode::GONE, "Verification code expired"),
        OtpError::InvalidCode { attempts_left } => {
            let body = ErrorResponse {
                attempts_left: Some(*attempts_left),
                ..ErrorResponse::new("Invalid verification code")
            };
            (StatusCode::UNAUTHORIZED, Json(body)).into_response()
        }
        OtpError::AttemptsExhausted => {
            error_response(StatusCode::TOO_MANY_REQUESTS, "Too many failed attempts")
        }
        OtpError::Cooldown {
            retry_after_seconds,
        } => {
            let body = ErrorResponse {
                retry_after: Some(*retry_after_seconds),
                ..ErrorResponse::new("A code was sent recently")
            };
            let mut headers = HeaderMap::new();
            headers.insert(RETRY_AFTER, HeaderValue::from(*retry_after_seconds));
            (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
        }
        OtpError::Delivery(source) => {
            warn!("Failed to send verification code: {source:#}");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Could not send verification code")
        }
    }
}
