//! The `test-connection` command.

use anyhow::Result;
use colored::*;

use crate::cli::ensure_password;
use crate::config::Config;
use crate::db;

pub async fn handle(mut config: Config) -> Result<()> {
    ensure_password(&mut config)?;

    println!(
        "Connecting to {}:{}/{} as {}...",
        config.database.host, config.database.port, config.database.database, config.database.user
    );

    let pool = db::connect(&config.database).await?;
    db::ping(&pool).await?;
    pool.close().await;

    println!("{}", "Connection OK".green().bold());
    Ok(())
}
