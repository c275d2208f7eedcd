//! Worker orchestration for migration runs.
//!
//! One worker task per run: load the spreadsheet(s) in a blocking task,
//! snapshot the existing keys, classify, then persist page by page. The
//! presentation side only ever sees [`ProgressEvent`]s; run-level failures
//! are reported once through an error log event plus `Finished`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use sqlx::PgPool;

use crate::config::{DatabaseConfig, RunOptions};
use crate::db;
use crate::db::cups::CupsFilter;
use crate::excel;
use crate::migrate::merge::merge_cups_sources;
use crate::migrate::progress::{ProgressEvent, RunContext};
use crate::migrate::reconcile::{Classified, classify};
use crate::migrate::types::{CupsCode, RunStats, ServiceRequest};

/// Individual page failures logged before falling back to counters only.
const MAX_LOGGED_PAGE_FAILURES: usize = 5;

/// Migrate the authorization workbook at `path` into the database.
///
/// Never returns an error: the outcome is reported through the progress
/// channel, ending with a `Finished` event.
pub async fn run_request_migration(
    db_config: DatabaseConfig,
    options: RunOptions,
    path: PathBuf,
    ctx: RunContext,
) {
    match request_migration(&db_config, &options, &path, &ctx).await {
        Ok(stats) => {
            ctx.success(format!(
                "Done. Inserted: {}, updated: {}, errors: {}",
                stats.inserted, stats.updated, stats.errors
            ));
            ctx.finish(true);
        }
        Err(e) => {
            ctx.error(format!("Migration failed: {:#}", e));
            ctx.finish(false);
        }
    }
}

/// Merge the two CUPS source lists and upsert them into the database.
pub async fn run_cups_load(
    db_config: DatabaseConfig,
    options: RunOptions,
    preparation: Option<PathBuf>,
    referral: Option<PathBuf>,
    ctx: RunContext,
) {
    match cups_load(&db_config, &options, preparation, referral, &ctx).await {
        Ok(stats) => {
            ctx.success(format!(
                "Done. Inserted: {}, updated: {}, errors: {}",
                stats.inserted, stats.updated, stats.errors
            ));
            ctx.finish(true);
        }
        Err(e) => {
            ctx.error(format!("CUPS load failed: {:#}", e));
            ctx.finish(false);
        }
    }
}

/// Run a filtered CUPS search and post the result as a single event.
pub async fn run_cups_search(
    db_config: DatabaseConfig,
    filter: CupsFilter,
    limit: i64,
    ctx: RunContext,
) {
    match cups_search(&db_config, &filter, limit).await {
        Ok((rows, total)) => ctx.send(ProgressEvent::SearchResult { rows, total }),
        Err(e) => ctx.send(ProgressEvent::SearchError(format!("{:#}", e))),
    }
}

/// Apply the fail-open policy to an existing-state fetch result.
///
/// Under fail-open a fetch failure degrades to an empty index, which makes
/// every incoming record classify as new. That is the historical behavior
/// and keeps a run going through transient fetch errors, at the cost of
/// insert failures if the table was not actually empty. Fail-closed aborts
/// instead.
pub fn resolve_existing_index<T: Default>(
    fetched: Result<T>,
    fail_open: bool,
    ctx: &RunContext,
) -> Result<T> {
    match fetched {
        Ok(index) => Ok(index),
        Err(e) if fail_open => {
            log::warn!("existing-state fetch failed, continuing with empty index: {:#}", e);
            ctx.warning(format!(
                "Could not fetch existing records ({}); treating every record as new",
                e
            ));
            Ok(T::default())
        }
        Err(e) => Err(e.context("existing-state fetch failed and fail-open is disabled")),
    }
}

async fn request_migration(
    db_config: &DatabaseConfig,
    options: &RunOptions,
    path: &Path,
    ctx: &RunContext,
) -> Result<RunStats> {
    let mut stats = RunStats::default();

    ctx.info("Starting migration...");
    ctx.info(format!("Reading: {}", file_name(path)));
    ctx.state("Loading workbook...");

    let loaded = {
        let path = path.to_path_buf();
        let use_cache = options.use_cache;
        tokio::task::spawn_blocking(move || excel::load_requests(&path, use_cache))
            .await
            .context("workbook load task panicked")??
    };

    if loaded.is_empty() {
        bail!("the workbook has no data rows");
    }

    stats.total = loaded.len() as u64;
    ctx.stat("Total records", stats.total);
    ctx.success(format!("Found {} records", stats.total));

    ctx.state("Connecting to database...");
    let pool = db::connect(db_config).await?;
    ctx.success("Connection established");

    ctx.info("Checking existing records...");
    let existing = resolve_existing_index(
        db::solicitudes::fetch_existing_keys(&pool).await,
        options.fail_open_on_fetch,
        ctx,
    )?;

    let classified = classify(loaded.into_records(), &existing);
    record_classification(ctx, &mut stats, &classified);
    if classified.is_empty() {
        ctx.warning("Nothing to persist");
        return Ok(stats);
    }

    ctx.info("Persisting records...");
    persist_requests(&pool, options, &classified, &mut stats, ctx).await;

    pool.close().await;
    Ok(stats)
}

async fn cups_load(
    db_config: &DatabaseConfig,
    options: &RunOptions,
    preparation: Option<PathBuf>,
    referral: Option<PathBuf>,
    ctx: &RunContext,
) -> Result<RunStats> {
    let mut stats = RunStats::default();

    ctx.info("Reading CUPS source files...");
    ctx.state("Loading workbooks...");

    let (preparation_rows, referral_rows) =
        tokio::task::spawn_blocking(move || -> Result<_, excel::LoadError> {
            let preparation_rows = match preparation {
                Some(path) => excel::load_preparation(&path)?,
                None => Vec::new(),
            };
            let referral_rows = match referral {
                Some(path) => excel::load_referral(&path)?,
                None => Vec::new(),
            };
            Ok((preparation_rows, referral_rows))
        })
        .await
        .context("workbook load task panicked")??;

    let merged = merge_cups_sources(&preparation_rows, &referral_rows);
    if merged.is_empty() {
        bail!("no CUPS rows could be loaded from the source files");
    }

    stats.total = merged.len() as u64;
    ctx.stat("Total records", stats.total);
    ctx.success(format!(
        "Loaded {} unique codes ({} preparation rows, {} referral rows)",
        stats.total,
        preparation_rows.len(),
        referral_rows.len()
    ));

    ctx.state("Connecting to database...");
    let pool = db::connect(db_config).await?;
    ctx.success("Connection established");

    ctx.info("Checking existing codes...");
    let existing_codes = resolve_existing_index(
        db::cups::fetch_existing_codes(&pool).await,
        options.fail_open_on_fetch,
        ctx,
    )?;
    let existing_keys: HashSet<String> = existing_codes.into_keys().collect();

    let classified = classify(merged, &existing_keys);
    record_classification(ctx, &mut stats, &classified);
    if classified.is_empty() {
        ctx.warning("Nothing to persist");
        return Ok(stats);
    }

    ctx.info("Persisting codes...");
    persist_cups(&pool, options, &classified, &mut stats, ctx).await;

    pool.close().await;
    Ok(stats)
}

async fn cups_search(
    db_config: &DatabaseConfig,
    filter: &CupsFilter,
    limit: i64,
) -> Result<(Vec<CupsCode>, i64)> {
    let pool = db::connect(db_config).await?;
    let rows = db::cups::search(&pool, filter, limit).await?;
    let total = db::cups::count(&pool, filter).await?;
    pool.close().await;
    Ok((rows, total))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Record classification results into the stats and the event stream.
fn record_classification<T>(ctx: &RunContext, stats: &mut RunStats, classified: &Classified<T>) {
    stats.new = classified.to_insert.len() as u64;
    stats.existing = classified.to_update.len() as u64;
    stats.errors += classified.invalid;

    ctx.stat("New records", stats.new);
    ctx.stat("Already existing", stats.existing);
    ctx.info(format!(
        "New: {}, existing: {}",
        stats.new, stats.existing
    ));
    if classified.invalid > 0 {
        ctx.stat("Errors", stats.errors);
        ctx.warning(format!(
            "{} rows without a key were skipped",
            classified.invalid
        ));
    }
}

/// Tracks persist progress across both batch groups of a run.
struct PersistProgress {
    processed: u64,
    grand_total: u64,
    logged_failures: usize,
}

impl PersistProgress {
    fn new(grand_total: u64) -> Self {
        PersistProgress {
            processed: 0,
            grand_total,
            logged_failures: 0,
        }
    }

    fn page_done(&mut self, ctx: &RunContext, page_len: u64, verb: &str) {
        self.processed += page_len;
        let percent = if self.grand_total == 0 {
            100
        } else {
            (self.processed * 100 / self.grand_total) as u8
        };
        ctx.progress(
            percent,
            format!("{}: {}/{}", verb, self.processed, self.grand_total),
        );
    }

    fn page_failed(&mut self, ctx: &RunContext, page_len: u64, error: &anyhow::Error) {
        // Flood control: only the first few failures are logged in full.
        if self.logged_failures < MAX_LOGGED_PAGE_FAILURES {
            ctx.error(format!("Batch of {} rows failed: {:#}", page_len, error));
        } else {
            log::debug!("batch of {} rows failed: {:#}", page_len, error);
        }
        self.logged_failures += 1;
    }
}

fn emit_persist_stats(ctx: &RunContext, stats: &RunStats) {
    ctx.stat("Inserted", stats.inserted);
    ctx.stat("Updated", stats.updated);
    ctx.stat("Errors", stats.errors);
}

/// Cancellation is checked between pages, never mid-page: a dispatched
/// page always runs to commit or rollback.
fn cancelled(ctx: &RunContext) -> bool {
    if ctx.is_cancelled() {
        ctx.warning("Cancelled by operator");
        true
    } else {
        false
    }
}

async fn persist_requests(
    pool: &PgPool,
    options: &RunOptions,
    classified: &Classified<ServiceRequest>,
    stats: &mut RunStats,
    ctx: &RunContext,
) {
    let page_size = options.page_size.max(1);
    let mut progress = PersistProgress::new(
        (classified.to_insert.len() + classified.to_update.len()) as u64,
    );
    let mut stop = false;

    for page in classified.to_insert.chunks(page_size) {
        if cancelled(ctx) {
            stop = true;
            break;
        }
        match db::solicitudes::insert_page(pool, page).await {
            Ok(()) => stats.inserted += page.len() as u64,
            Err(e) => {
                stats.errors += page.len() as u64;
                progress.page_failed(ctx, page.len() as u64, &e);
            }
        }
        progress.page_done(ctx, page.len() as u64, "Inserting");
        emit_persist_stats(ctx, stats);
    }

    // The update group proceeds even when insert pages failed; the two
    // groups fail independently.
    if !stop {
        for page in classified.to_update.chunks(page_size) {
            if cancelled(ctx) {
                break;
            }
            match db::solicitudes::update_page(pool, page).await {
                Ok(()) => stats.updated += page.len() as u64,
                Err(e) => {
                    stats.errors += page.len() as u64;
                    progress.page_failed(ctx, page.len() as u64, &e);
                }
            }
            progress.page_done(ctx, page.len() as u64, "Updating");
            emit_persist_stats(ctx, stats);
        }
    }

    emit_persist_stats(ctx, stats);
}

async fn persist_cups(
    pool: &PgPool,
    options: &RunOptions,
    classified: &Classified<CupsCode>,
    stats: &mut RunStats,
    ctx: &RunContext,
) {
    let page_size = options.page_size.max(1);
    let mut progress = PersistProgress::new(
        (classified.to_insert.len() + classified.to_update.len()) as u64,
    );
    let mut stop = false;

    for page in classified.to_insert.chunks(page_size) {
        if cancelled(ctx) {
            stop = true;
            break;
        }
        match db::cups::insert_page(pool, page).await {
            Ok(()) => stats.inserted += page.len() as u64,
            Err(e) => {
                stats.errors += page.len() as u64;
                progress.page_failed(ctx, page.len() as u64, &e);
            }
        }
        progress.page_done(ctx, page.len() as u64, "Inserting");
        emit_persist_stats(ctx, stats);
    }

    if !stop {
        for page in classified.to_update.chunks(page_size) {
            if cancelled(ctx) {
                break;
            }
            match db::cups::update_page(pool, page).await {
                Ok(()) => stats.updated += page.len() as u64,
                Err(e) => {
                    stats.errors += page.len() as u64;
                    progress.page_failed(ctx, page.len() as u64, &e);
                }
            }
            progress.page_done(ctx, page.len() as u64, "Updating");
            emit_persist_stats(ctx, stats);
        }
    }

    emit_persist_stats(ctx, stats);
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::HashMap;

    use crate::migrate::progress::LogLevel;
    use crate::migrate::types::CupsCode;

    #[tokio::test]
    async fn test_fail_open_degrades_to_empty_index() {
        let (ctx, mut rx, _cancel) = RunContext::channel();

        let fetched: Result<HashSet<String>> = Err(anyhow!("connection reset"));
        let index = resolve_existing_index(fetched, true, &ctx).unwrap();
        assert!(index.is_empty());

        // The degradation is surfaced to the operator as a warning.
        let event = rx.try_recv().expect("warning event");
        assert!(matches!(
            event,
            ProgressEvent::Log { level: LogLevel::Warning, .. }
        ));

        // With an empty index every record classifies as new.
        let records = vec![
            CupsCode {
                codigo_cups: "001".to_string(),
                ..Default::default()
            },
            CupsCode {
                codigo_cups: "002".to_string(),
                ..Default::default()
            },
        ];
        let classified = classify(records, &index);
        assert_eq!(classified.to_insert.len(), 2);
        assert!(classified.to_update.is_empty());
    }

    #[tokio::test]
    async fn test_fail_closed_propagates_fetch_error() {
        let (ctx, _rx, _cancel) = RunContext::channel();

        let fetched: Result<HashSet<String>> = Err(anyhow!("connection reset"));
        let result = resolve_existing_index(fetched, false, &ctx);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fail_open_passes_successful_fetch_through() {
        let (ctx, mut rx, _cancel) = RunContext::channel();

        let mut keys = HashSet::new();
        keys.insert("B".to_string());
        let index = resolve_existing_index(Ok(keys), true, &ctx).unwrap();

        assert!(index.contains("B"));
        assert!(rx.try_recv().is_err(), "no warning on success");
    }

    #[test]
    fn test_classification_stats_match_expected_scenario() {
        // Input keys {A, B, C}, database already contains {B}.
        let (ctx, _rx, _cancel) = RunContext::channel();
        let existing: HashSet<String> = ["B".to_string()].into_iter().collect();
        let records: Vec<CupsCode> = ["A", "B", "C"]
            .iter()
            .map(|k| CupsCode {
                codigo_cups: k.to_string(),
                ..Default::default()
            })
            .collect();

        let mut stats = RunStats {
            total: 3,
            ..Default::default()
        };
        let classified = classify(records, &existing);
        record_classification(&ctx, &mut stats, &classified);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.existing, 1);
        assert_eq!(stats.new, 2);
        assert_eq!(stats.errors, 0);
        assert_eq!(classified.to_insert.len(), 2);
        assert_eq!(classified.to_update.len(), 1);
    }

    #[tokio::test]
    async fn test_existing_codes_map_defaults_empty() {
        // HashMap form of the index degrades the same way as the set form.
        let (ctx, _rx, _cancel) = RunContext::channel();
        let fetched: Result<HashMap<String, CupsCode>> = Err(anyhow!("timeout"));
        let index = resolve_existing_index(fetched, true, &ctx).unwrap();
        assert!(index.is_empty());
    }
}
