// PostgreSQL connection pooling.
//
// The connection string must request TLS (`sslmode=require` or stricter);
// plaintext modes are refused at startup instead of silently downgraded.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;

/// Pool tuning knobs, read from `QUIZCAST_DB_*` with development defaults.
///
/// The pool stays small: every request holds a connection only for a few
/// short queries, and SSE subscribers hold none at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    /// | Variable | Default |
    /// |---|---|
    /// | `QUIZCAST_DB_MAX_CONNECTIONS` | `16` |
    /// | `QUIZCAST_DB_ACQUIRE_TIMEOUT_SECS` | `5` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let max_connections = env("QUIZCAST_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(16);
        let acquire_timeout_secs: u64 = env("QUIZCAST_DB_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(5);

        Self { max_connections, acquire_timeout: Duration::from_secs(acquire_timeout_secs) }
    }
}

/// Open a pool against `database_url`, refusing plaintext connections.
pub async fn connect(database_url: &str, settings: PoolSettings) -> Result<PgPool> {
    let options: PgConnectOptions =
        database_url.parse().context("invalid QUIZCAST_DATABASE_URL")?;
    reject_plaintext(&options)?;

    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_with(options)
        .await
        .context("could not open postgres pool")
}

fn reject_plaintext(options: &PgConnectOptions) -> Result<()> {
    match options.get_ssl_mode() {
        PgSslMode::Require | PgSslMode::VerifyCa | PgSslMode::VerifyFull => Ok(()),
        mode => bail!(
            "refusing plaintext postgres connection (sslmode={mode:?}); \
             use sslmode=require or stricter"
        ),
    }
}

/// Round-trip one trivial query, for startup verification.
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .context("postgres ping failed")?;
    Ok(())
}
