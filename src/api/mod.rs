use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, options},
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod email;
pub mod gateway;
pub mod handlers;
mod openapi;
pub mod registry;
pub mod sweeper;

pub use openapi::openapi;

use handlers::auth::{AuthConfig, AuthState};
use handlers::auth::store::PgAuthStore;

/// Upper bound on any single request, so slow storage cannot pin the
/// per-account lockout or per-session rotation serialization point.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server.
///
/// # Errors
///
/// Returns an error if the database is unreachable, the listener cannot bind,
/// or the CORS origin is malformed.
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: AuthConfig,
    cors_origin: Option<String>,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let store = Arc::new(PgAuthStore::new(pool));
    let auth_state = Arc::new(AuthState::new(
        auth_config,
        store.clone(),
        Arc::new(email::LogEmailSender),
    ));

    // One sweeper per process; stopped on graceful shutdown.
    let sweeper_handle =
        sweeper::SessionSweeper::new(store, auth_state.config()).spawn();
    let channel_gateway = Arc::new(gateway::ChannelGateway::new());

    let cors = cors_origin
        .map(|origin| cors_layer(&origin))
        .transpose()?;

    // Build the router from OpenAPI-wired routes, then extend it with
    // non-doc routes like the WebSocket endpoint and preflight `OPTIONS`.
    let (router, _openapi) = router().split_for_parts();
    let mut app = router
        .route("/v1/realtime", get(gateway::realtime))
        .route("/health", options(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(Extension(auth_state))
                .layer(Extension(channel_gateway)),
        );
    if let Some(cors) = cors {
        app = app.layer(cors);
    }

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    sweeper_handle.stop().await;

    Ok(())
}

fn cors_layer(origin: &str) -> Result<CorsLayer> {
    Ok(CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(exact_origin(origin)?))
        .allow_credentials(true))
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

fn exact_origin(origin: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(origin).with_context(|| format!("Invalid CORS origin: {origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("CORS origin must include a valid host: {origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let normalized = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&normalized).context("Failed to build CORS origin header")
}
