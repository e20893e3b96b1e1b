use crate::api::handlers::{
    account,
    auth::{
        require_authentication, session_pipeline, spawn_session_cleanup, users, AuthConfig,
        AuthState, PgSessionRepository, PgUserRepository,
    },
    health,
    snippets::{self, PgSnippetRepository, Snippets},
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{
            CONTENT_SECURITY_POLICY, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
            X_XSS_PROTECTION,
        },
        HeaderName, HeaderValue, Request,
    },
    middleware,
    routing::{get, post},
    Extension, Router,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

/// Connect to the database, start the session sweeper and serve until a
/// shutdown signal arrives.
///
/// # Errors
/// Fails when the database is unreachable or the port cannot be bound.
pub async fn new(port: u16, dsn: SecretString, auth_config: AuthConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let auth_state = Arc::new(AuthState::new(
        auth_config,
        Arc::new(PgUserRepository::new(pool.clone())),
        Arc::new(PgSessionRepository::new(pool.clone())),
    ));
    let snippets: Snippets = Arc::new(PgSnippetRepository::new(pool));

    let sweeper = spawn_session_cleanup(
        auth_state.sessions().clone(),
        auth_state.config().session_cleanup_interval(),
    );

    let app = router(auth_state, snippets);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Gracefully shutdown");
        })
        .await?;

    sweeper.abort();

    Ok(())
}

/// Build the application router.
///
/// `/ping` and `/health` sit outside the session pipeline; every other route
/// goes through it, and the protected group also passes the access gate.
pub fn router(auth_state: Arc<AuthState>, snippet_store: Snippets) -> Router {
    let protected = Router::new()
        .route("/account/view", get(account::view))
        .route(
            "/account/password/update",
            get(account::password_form).post(account::update_password),
        )
        .route(
            "/snippet/create",
            get(snippets::create_form).post(snippets::create),
        )
        .route("/user/logout", post(users::logout))
        .route_layer(middleware::from_fn(require_authentication));

    let dynamic = Router::new()
        .route("/", get(snippets::home))
        .route("/snippet/view/:id", get(snippets::view))
        .route("/about", get(snippets::about))
        .route("/user/signup", get(users::signup_form).post(users::signup))
        .route("/user/login", get(users::login_form).post(users::login))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            session_pipeline,
        ));

    Router::new()
        .route("/ping", get(health::ping))
        .route("/health", get(health::health).options(health::health))
        .merge(dynamic)
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
                .layer(SetResponseHeaderLayer::overriding(
                    CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static("default-src 'self'"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    REFERRER_POLICY,
                    HeaderValue::from_static("origin-when-cross-origin"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    X_FRAME_OPTIONS,
                    HeaderValue::from_static("deny"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    X_XSS_PROTECTION,
                    HeaderValue::from_static("0"),
                ))
                .layer(Extension(auth_state))
                .layer(Extension(snippet_store)),
        )
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
