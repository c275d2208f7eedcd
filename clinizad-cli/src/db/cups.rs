//! Queries for the `codigos_cups` table.

use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::migrate::types::CupsCode;

const INSERT_SQL: &str = "INSERT INTO codigos_cups (codigo_cups, nombre_estudio, \
     preparacion_especial, remitido) VALUES ($1, $2, $3, $4)";

const UPDATE_SQL: &str = "UPDATE codigos_cups SET nombre_estudio = $2, \
     preparacion_especial = $3, remitido = $4 WHERE codigo_cups = $1";

/// Snapshot of all stored CUPS codes, fetched once per run.
pub async fn fetch_existing_codes(pool: &PgPool) -> Result<HashMap<String, CupsCode>> {
    let rows: Vec<(String, Option<String>, bool, bool)> = sqlx::query_as(
        "SELECT codigo_cups, nombre_estudio, preparacion_especial, remitido FROM codigos_cups",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch existing CUPS codes")?;

    Ok(rows
        .into_iter()
        .map(|(codigo_cups, nombre_estudio, preparacion_especial, remitido)| {
            (
                codigo_cups.trim().to_string(),
                CupsCode {
                    codigo_cups: codigo_cups.trim().to_string(),
                    nombre_estudio,
                    preparacion_especial,
                    remitido,
                },
            )
        })
        .collect())
}

/// Insert one page of new codes inside a single transaction.
pub async fn insert_page(pool: &PgPool, codes: &[CupsCode]) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    for code in codes {
        sqlx::query(INSERT_SQL)
            .bind(&code.codigo_cups)
            .bind(&code.nombre_estudio)
            .bind(code.preparacion_especial)
            .bind(code.remitido)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("insert failed for CUPS code {}", code.codigo_cups))?;
    }

    tx.commit().await.context("failed to commit insert page")?;
    Ok(())
}

/// Re-write one page of existing codes inside a single transaction.
pub async fn update_page(pool: &PgPool, codes: &[CupsCode]) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    for code in codes {
        sqlx::query(UPDATE_SQL)
            .bind(&code.codigo_cups)
            .bind(&code.nombre_estudio)
            .bind(code.preparacion_especial)
            .bind(code.remitido)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("update failed for CUPS code {}", code.codigo_cups))?;
    }

    tx.commit().await.context("failed to commit update page")?;
    Ok(())
}

/// What a single-record upsert ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Updated,
}

/// Insert-or-update one code, the interactive path outside bulk runs.
///
/// When a snapshot is supplied the existence check is a map lookup; without
/// one the code pays an extra round trip for a point query, trading latency
/// for correctness against whatever the table holds right now.
pub async fn upsert_code(
    pool: &PgPool,
    code: &CupsCode,
    existing: Option<&HashMap<String, CupsCode>>,
) -> Result<Upserted> {
    let key = code.codigo_cups.trim();

    let already_stored = match existing {
        Some(snapshot) => snapshot.contains_key(key),
        None => {
            let row: Option<(i32,)> =
                sqlx::query_as("SELECT 1 FROM codigos_cups WHERE codigo_cups = $1 LIMIT 1")
                    .bind(key)
                    .fetch_optional(pool)
                    .await
                    .with_context(|| format!("existence check failed for CUPS code {}", key))?;
            row.is_some()
        }
    };

    if already_stored {
        sqlx::query(UPDATE_SQL)
            .bind(key)
            .bind(&code.nombre_estudio)
            .bind(code.preparacion_especial)
            .bind(code.remitido)
            .execute(pool)
            .await
            .with_context(|| format!("update failed for CUPS code {}", key))?;
        Ok(Upserted::Updated)
    } else {
        sqlx::query(INSERT_SQL)
            .bind(key)
            .bind(&code.nombre_estudio)
            .bind(code.preparacion_especial)
            .bind(code.remitido)
            .execute(pool)
            .await
            .with_context(|| format!("insert failed for CUPS code {}", key))?;
        Ok(Upserted::Inserted)
    }
}

/// Search filters for the CUPS query surface. All fields are conjunctive;
/// `None` means "no constraint".
#[derive(Debug, Clone, Default)]
pub struct CupsFilter {
    /// Exact code match.
    pub codigo: Option<String>,
    /// Case-insensitive substring match on the study name.
    pub nombre: Option<String>,
    pub preparacion_especial: Option<bool>,
    pub remitido: Option<bool>,
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a CupsFilter) {
    if let Some(codigo) = &filter.codigo {
        builder.push(" AND codigo_cups = ").push_bind(codigo.trim());
    }
    if let Some(nombre) = &filter.nombre {
        builder
            .push(" AND LOWER(nombre_estudio) LIKE LOWER(")
            .push_bind(format!("%{}%", nombre.trim()))
            .push(")");
    }
    if let Some(preparacion) = filter.preparacion_especial {
        builder
            .push(" AND preparacion_especial = ")
            .push_bind(preparacion);
    }
    if let Some(remitido) = filter.remitido {
        builder.push(" AND remitido = ").push_bind(remitido);
    }
}

/// Filtered search, ordered by code, capped at `limit` rows.
pub async fn search(pool: &PgPool, filter: &CupsFilter, limit: i64) -> Result<Vec<CupsCode>> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT codigo_cups, nombre_estudio, preparacion_especial, remitido \
         FROM codigos_cups WHERE 1=1",
    );
    push_filters(&mut builder, filter);
    builder.push(" ORDER BY codigo_cups LIMIT ").push_bind(limit);

    let rows: Vec<(String, Option<String>, bool, bool)> = builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .context("CUPS search failed")?;

    Ok(rows
        .into_iter()
        .map(|(codigo_cups, nombre_estudio, preparacion_especial, remitido)| CupsCode {
            codigo_cups,
            nombre_estudio,
            preparacion_especial,
            remitido,
        })
        .collect())
}

/// Unlimited count of rows matching the same filters as [`search`].
pub async fn count(pool: &PgPool, filter: &CupsFilter) -> Result<i64> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM codigos_cups WHERE 1=1");
    push_filters(&mut builder, filter);

    let (count,): (i64,) = builder
        .build_query_as()
        .fetch_one(pool)
        .await
        .context("CUPS count failed")?;

    Ok(count)
}
