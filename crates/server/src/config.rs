// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The database pool reads its own tuning vars — this module
// covers the core server settings.

use std::net::SocketAddr;

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string. When unset the server runs on the
    /// in-memory store (development and tests only).
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `quizcast_server=debug`).
    pub log_filter: String,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `QUIZCAST_HOST` | `0.0.0.0` |
    /// | `QUIZCAST_PORT` | `8080` |
    /// | `QUIZCAST_DATABASE_URL` | *(none — in-memory store)* |
    /// | `QUIZCAST_CORS_ORIGINS` | *(none — dev defaults)* |
    /// | `QUIZCAST_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("QUIZCAST_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("QUIZCAST_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let database_url = env("QUIZCAST_DATABASE_URL").ok();
        let cors_origins = env("QUIZCAST_CORS_ORIGINS").ok();

        let log_filter = env("QUIZCAST_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, database_url, cors_origins, log_filter }
    }
}
