//! PostgreSQL access: existing-state snapshots, batched persistence and
//! the CUPS query surface.

pub mod cups;
pub mod solicitudes;

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::config::DatabaseConfig;

/// Open the connection for one run.
///
/// One connection per run: migration runs are strictly sequential, and the
/// pool is dropped at run end on both the success and the error path.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user);
    if let Some(password) = &config.password {
        options = options.password(password);
    }

    PgPoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| {
            format!(
                "could not connect to {}:{}/{}",
                config.host, config.port, config.database
            )
        })
}

/// Round-trip check used by the `test-connection` command.
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("connection check failed")?;
    Ok(())
}
