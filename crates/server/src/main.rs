mod api;
mod config;
mod cors;
mod db;
mod error;
mod game;
mod live;
mod metrics;
mod store;
mod validation;

use std::{sync::Arc, time::Instant};

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::{
    config::ServerConfig,
    db::{migrations::run_migrations, pool},
    error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope},
    game::GameCoordinator,
    live::SessionRegistry,
    metrics::ServerMetrics,
    store::GameStore,
};

const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let server_metrics = Arc::new(ServerMetrics::default());
    metrics::set_global_metrics(Arc::clone(&server_metrics));

    let store = match &config.database_url {
        Some(database_url) => {
            let pool = pool::connect(database_url, pool::PoolSettings::from_env())
                .await
                .context("failed to create postgres pool")?;
            pool::ping(&pool).await?;
            run_migrations(&pool).await?;
            info!("using postgres store");
            GameStore::Postgres(pool)
        }
        None => {
            info!("QUIZCAST_DATABASE_URL unset, using in-memory store");
            GameStore::memory()
        }
    };

    let coordinator = GameCoordinator::new(store, Arc::new(SessionRegistry::new()));
    let app = build_router(coordinator, &config, server_metrics);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting quizcast server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("quizcast server exited unexpectedly")
}

fn build_router(
    coordinator: GameCoordinator,
    config: &ServerConfig,
    server_metrics: Arc<ServerMetrics>,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/metrics",
            get(move || {
                let server_metrics = Arc::clone(&server_metrics);
                async move { server_metrics.render() }
            }),
        )
        .merge(api::router(coordinator))
        .layer(cors::cors_layer(config.cors_origins.as_deref()))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response =
        with_request_id_scope(request_id.clone(), next.run(request)).await;

    let latency_ms = started_at.elapsed().as_millis() as u64;
    attach_request_id_header(&mut response, &request_id);
    metrics::record_http_request(method.as_str(), &path, response.status().as_u16(), latency_ms);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}
