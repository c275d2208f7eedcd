//! Queries for the `solicitudes_servicios` table.
//!
//! Uniqueness of `numero_solicitud` is enforced by the application's
//! pre-check against the existing-keys snapshot, not by a database
//! constraint, so the insert path must never run for a key the reconciler
//! classified as existing.

use std::collections::HashSet;

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::migrate::types::ServiceRequest;

const INSERT_SQL: &str = "INSERT INTO solicitudes_servicios (codigo_servicio_completo, \
     doc_afiliado, numero_solicitud, cod_diag, desc_diag, clasificacion_servicios_acceso, \
     descr_servicio_1, estado_solicitud, num_autorizacion, fecha_autorizacion_1, ips_asignada, \
     ciudad_ips_asignada, cantidad, primer_nom, segundo_nom, primer_ape, segundo_ape, \
     edad_anios, estado_solicitud_2, ips_solicitante) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
     $19, $20)";

const UPDATE_SQL: &str = "UPDATE solicitudes_servicios SET codigo_servicio_completo = $1, \
     doc_afiliado = $2, cod_diag = $4, desc_diag = $5, clasificacion_servicios_acceso = $6, \
     descr_servicio_1 = $7, estado_solicitud = $8, num_autorizacion = $9, \
     fecha_autorizacion_1 = $10, ips_asignada = $11, ciudad_ips_asignada = $12, cantidad = $13, \
     primer_nom = $14, segundo_nom = $15, primer_ape = $16, segundo_ape = $17, \
     edad_anios = $18, estado_solicitud_2 = $19, ips_solicitante = $20 \
     WHERE numero_solicitud = $3";

/// Snapshot of all request keys currently stored, fetched once per run.
///
/// Keys are stringified on read so classification never trips over a
/// numeric column type on the database side. NULL keys are skipped.
pub async fn fetch_existing_keys(pool: &PgPool) -> Result<HashSet<String>> {
    let rows: Vec<(Option<String>,)> =
        sqlx::query_as("SELECT numero_solicitud::text FROM solicitudes_servicios")
            .fetch_all(pool)
            .await
            .context("failed to fetch existing request keys")?;

    Ok(rows
        .into_iter()
        .filter_map(|(key,)| key)
        .map(|key| key.trim().to_string())
        .collect())
}

fn bind_request<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    record: &'q ServiceRequest,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(&record.codigo_servicio_completo)
        .bind(&record.doc_afiliado)
        .bind(&record.numero_solicitud)
        .bind(&record.cod_diag)
        .bind(&record.desc_diag)
        .bind(&record.clasificacion_servicios_acceso)
        .bind(&record.descr_servicio_1)
        .bind(&record.estado_solicitud)
        .bind(&record.num_autorizacion)
        .bind(&record.fecha_autorizacion_1)
        .bind(&record.ips_asignada)
        .bind(&record.ciudad_ips_asignada)
        .bind(record.cantidad)
        .bind(&record.primer_nom)
        .bind(&record.segundo_nom)
        .bind(&record.primer_ape)
        .bind(&record.segundo_ape)
        .bind(record.edad_anios)
        .bind(&record.estado_solicitud_2)
        .bind(&record.ips_solicitante)
}

/// Insert one page of new requests inside a single transaction.
///
/// On any error the whole page rolls back (the transaction is dropped
/// without commit) and the error propagates to the caller, which counts
/// the full page as failed.
pub async fn insert_page(pool: &PgPool, records: &[ServiceRequest]) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    for record in records {
        bind_request(sqlx::query(INSERT_SQL), record)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("insert failed for solicitud {}", record.numero_solicitud))?;
    }

    tx.commit().await.context("failed to commit insert page")?;
    Ok(())
}

/// Re-write one page of existing requests inside a single transaction.
///
/// Every field is overwritten (last write wins); there is no field-level
/// diff against the stored row.
pub async fn update_page(pool: &PgPool, records: &[ServiceRequest]) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    for record in records {
        bind_request(sqlx::query(UPDATE_SQL), record)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("update failed for solicitud {}", record.numero_solicitud))?;
    }

    tx.commit().await.context("failed to commit update page")?;
    Ok(())
}
