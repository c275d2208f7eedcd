//! The `lookup` command: affiliate search against the workbook index.
//!
//! This is a read-only path that never touches the database; it answers
//! from the same parsed (and cached) table the migration uses.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use colored::*;

use crate::excel;
use crate::migrate::types::ServiceRequest;

pub async fn handle(file: PathBuf, document: String) -> Result<()> {
    let document = document.trim().to_string();
    if document.is_empty() {
        bail!("the affiliate document must not be empty");
    }

    println!("{}", "Loading workbook...".dimmed());
    let loaded = {
        let file = file.clone();
        tokio::task::spawn_blocking(move || excel::load_requests(&file, true))
            .await
            .context("workbook load task panicked")??
    };

    let hits = loaded.lookup_by_afiliado(&document);
    if hits.is_empty() {
        println!("{}", format!("No records for {}", document).yellow());
        return Ok(());
    }

    render_requests(&hits);
    println!();
    println!(
        "{} record(s) for {}",
        hits.len().to_string().green().bold(),
        document
    );
    Ok(())
}

fn render_requests(rows: &[&ServiceRequest]) {
    println!(
        "{:<12} {:<14} {:<16} {:<20} {}",
        "SOLICITUD".bold(),
        "AUTORIZACION".bold(),
        "ESTADO".bold(),
        "IPS".bold(),
        "SERVICIO".bold()
    );
    for row in rows {
        println!(
            "{:<12} {:<14} {:<16} {:<20} {}",
            row.numero_solicitud,
            row.num_autorizacion.as_deref().unwrap_or(""),
            row.estado_solicitud.as_deref().unwrap_or(""),
            row.ips_asignada.as_deref().unwrap_or(""),
            row.descr_servicio_1.as_deref().unwrap_or("")
        );
    }
}
