use crate::{
    api::handlers::{auth, events::EventsConfig, health, root},
    notify::ConnectionRegistry,
    otp::{spawn_sweeper, OtpConfig, OtpService},
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, options},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

pub mod audit;
pub mod email;
pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the full axum router: documented routes, Swagger UI, and the
/// undocumented `/` and preflight-only `OPTIONS /health` routes.
#[must_use]
pub fn router() -> Router {
    let (router, openapi) = openapi::split_api_router();
    router
        .route("/", get(root::root))
        .route("/health", options(health::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
}

/// Everything the server needs besides the listener and the database.
pub struct ServerOptions {
    pub auth: auth::AuthConfig,
    pub otp: OtpConfig,
    pub otp_sweep_interval: Duration,
    pub events: EventsConfig,
    pub email_sender: Arc<dyn email::EmailSender>,
    pub email_worker: email::EmailWorkerConfig,
    pub rate_limiter: Arc<dyn auth::RateLimiter>,
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, server: ServerOptions) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    // Background worker drains the in-process email outbox and retries
    // failed deliveries with exponential backoff.
    let (outbox, _email_worker) =
        email::spawn_outbox_worker(server.email_sender, server.email_worker);

    let otp = Arc::new(OtpService::new(server.otp, Arc::new(outbox)));
    let _sweeper = spawn_sweeper(otp.clone(), server.otp_sweep_interval);

    let registry = ConnectionRegistry::new();

    let frontend_origin = frontend_origin(server.auth.frontend_base_url())?;
    let auth_state = Arc::new(auth::AuthState::new(
        server.auth,
        otp,
        server.rate_limiter,
    ));

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = router().layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state))
                .layer(Extension(registry.clone()))
                .layer(Extension(server.events))
                .layer(Extension(pool)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Open event streams would otherwise keep the server alive
            // until their timeout.
            let closed = registry.close_all();
            info!(closed, "Gracefully shutdown");
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::test_support::lazy_pool;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[test]
    fn frontend_origin_strips_path_and_keeps_port() -> Result<()> {
        let origin = frontend_origin("http://localhost:5173/app/")?;
        assert_eq!(origin.to_str()?, "http://localhost:5173");

        let origin = frontend_origin("https://helpdesk.dev")?;
        assert_eq!(origin.to_str()?, "https://helpdesk.dev");

        assert!(frontend_origin("not a url").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn router_serves_root_preflight_and_rejects_anonymous_streams() -> Result<()> {
        let app = router()
            .layer(Extension(ConnectionRegistry::new()))
            .layer(Extension(EventsConfig::new()))
            .layer(Extension(lazy_pool()?));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        // Unreachable database, but the preflight route is wired and has no body.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await?;
        assert!(bytes.is_empty());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api-docs/openapi.json").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/v1/events").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
