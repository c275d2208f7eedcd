//! The `migrate` command: one authorization migration run.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Result, bail};
use colored::*;
use dialoguer::Confirm;

use crate::cli::{ensure_password, watch_run};
use crate::config::Config;
use crate::migrate::progress::RunContext;
use crate::migrate::runner::run_request_migration;

pub async fn handle(mut config: Config, file: PathBuf, yes: bool) -> Result<()> {
    if !file.exists() {
        bail!("workbook does not exist: {}", file.display());
    }

    ensure_password(&mut config)?;

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Start migration of {}?", file.display()))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let (ctx, rx, cancel) = RunContext::channel();

    // Ctrl-C requests cooperative cancellation; the run stops at the next
    // page boundary, a dispatched batch always runs to completion.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Stopping after the current batch...".yellow());
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let worker = tokio::spawn(run_request_migration(
        config.database,
        config.migration,
        file,
        ctx,
    ));

    let success = watch_run(rx).await;
    let _ = worker.await;

    if success {
        Ok(())
    } else {
        bail!("migration finished with errors");
    }
}
