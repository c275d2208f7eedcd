//! The CUPS commands: bulk load, search and single-code upsert.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Result, bail};
use colored::*;
use dialoguer::Confirm;

use crate::cli::{ensure_password, watch_run};
use crate::config::Config;
use crate::db;
use crate::db::cups::{CupsFilter, Upserted};
use crate::migrate::progress::{ProgressEvent, RunContext};
use crate::migrate::runner::{run_cups_load, run_cups_search};
use crate::migrate::types::CupsCode;

pub async fn handle_load(
    mut config: Config,
    preparation: Option<PathBuf>,
    referral: Option<PathBuf>,
    yes: bool,
) -> Result<()> {
    if preparation.is_none() && referral.is_none() {
        bail!("provide at least one source file (--preparation and/or --referral)");
    }
    for path in [&preparation, &referral].into_iter().flatten() {
        if !path.exists() {
            bail!("source file does not exist: {}", path.display());
        }
    }

    ensure_password(&mut config)?;

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Load CUPS codes into the database?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let (ctx, rx, cancel) = RunContext::channel();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Stopping after the current batch...".yellow());
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let worker = tokio::spawn(run_cups_load(
        config.database,
        config.migration,
        preparation,
        referral,
        ctx,
    ));

    let success = watch_run(rx).await;
    let _ = worker.await;

    if success {
        Ok(())
    } else {
        bail!("CUPS load finished with errors");
    }
}

pub async fn handle_search(
    mut config: Config,
    code: Option<String>,
    name: Option<String>,
    preparation: bool,
    referred: bool,
    limit: i64,
) -> Result<()> {
    ensure_password(&mut config)?;

    let filter = CupsFilter {
        codigo: code,
        nombre: name,
        // Unchecked filters put no constraint on the column.
        preparacion_especial: preparation.then_some(true),
        remitido: referred.then_some(true),
    };

    let (ctx, mut rx, _cancel) = RunContext::channel();
    let worker = tokio::spawn(run_cups_search(config.database, filter, limit, ctx));

    let outcome = rx.recv().await;
    let _ = worker.await;

    match outcome {
        Some(ProgressEvent::SearchResult { rows, total }) => {
            render_search_results(&rows, total, limit);
            Ok(())
        }
        Some(ProgressEvent::SearchError(message)) => bail!("search failed: {}", message),
        _ => bail!("search worker ended without a result"),
    }
}

pub async fn handle_upsert(
    mut config: Config,
    code: String,
    name: Option<String>,
    preparation: bool,
    referred: bool,
) -> Result<()> {
    ensure_password(&mut config)?;

    let record = CupsCode {
        codigo_cups: code.trim().to_string(),
        nombre_estudio: name,
        preparacion_especial: preparation,
        remitido: referred,
    };
    if record.codigo_cups.is_empty() {
        bail!("the CUPS code must not be empty");
    }

    let pool = db::connect(&config.database).await?;
    // No snapshot here: the point query guarantees correctness against the
    // live table at the cost of one extra round trip.
    let outcome = db::cups::upsert_code(&pool, &record, None).await?;
    pool.close().await;

    match outcome {
        Upserted::Inserted => println!(
            "{} code {} inserted",
            "OK".green().bold(),
            record.codigo_cups
        ),
        Upserted::Updated => println!(
            "{} code {} updated",
            "OK".green().bold(),
            record.codigo_cups
        ),
    }
    Ok(())
}

fn render_search_results(rows: &[CupsCode], total: i64, limit: i64) {
    if rows.is_empty() {
        println!("{}", "No matching codes".yellow());
        return;
    }

    println!(
        "{:<10} {:<6} {:<9} {}",
        "CODE".bold(),
        "PREP".bold(),
        "REFERRED".bold(),
        "STUDY".bold()
    );
    for row in rows {
        println!(
            "{:<10} {:<6} {:<9} {}",
            row.codigo_cups,
            if row.preparacion_especial { "Sí" } else { "No" },
            if row.remitido { "Sí" } else { "No" },
            row.nombre_estudio.as_deref().unwrap_or("")
        );
    }
    println!();
    println!("{} of {} records (limit {})", rows.len(), total, limit);
}
