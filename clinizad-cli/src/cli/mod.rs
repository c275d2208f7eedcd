//! Command-line interface: argument definitions, dispatch and the
//! presentation loop that drains the progress channel.

pub mod commands;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use colored::*;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use crate::config::Config;
use crate::migrate::progress::{LogLevel, ProgressEvent};

/// How often the presentation loop polls the progress channel.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(
    name = "clinizad-cli",
    version,
    about = "Migrates Clinizad service authorizations and CUPS codes from Excel workbooks into PostgreSQL"
)]
pub struct Cli {
    /// Alternate config file (default: clinizad/config.toml in the
    /// platform config directory)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub db: DbArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Per-run overrides of the configured connection parameters.
#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// Database host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Database port
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Database name
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Database user
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Database password (prompted when needed and not configured)
    #[arg(long, global = true)]
    pub password: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Migrate an authorization workbook into solicitudes_servicios
    Migrate {
        /// Excel workbook with the authorization export
        file: PathBuf,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,

        /// Ignore the on-disk parse cache and re-read the workbook
        #[arg(long)]
        no_cache: bool,

        /// Rows per batch transaction
        #[arg(long)]
        page_size: Option<usize>,

        /// Abort the run when the existing-keys fetch fails, instead of
        /// treating the table as empty
        #[arg(long)]
        fail_closed: bool,
    },

    /// Merge the CUPS source lists and upsert them into codigos_cups
    LoadCups {
        /// "Requires special preparation" workbook
        #[arg(long, value_name = "FILE")]
        preparation: Option<PathBuf>,

        /// "Refer to reference laboratory" workbook
        #[arg(long, value_name = "FILE")]
        referral: Option<PathBuf>,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,

        /// Rows per batch transaction
        #[arg(long)]
        page_size: Option<usize>,

        /// Abort the run when the existing-codes fetch fails
        #[arg(long)]
        fail_closed: bool,
    },

    /// Search stored CUPS codes
    SearchCups {
        /// Exact code
        #[arg(long)]
        code: Option<String>,

        /// Substring of the study name (case-insensitive)
        #[arg(long)]
        name: Option<String>,

        /// Only codes that require special preparation
        #[arg(long)]
        preparation: bool,

        /// Only codes referred to a reference laboratory
        #[arg(long)]
        referred: bool,

        /// Maximum rows to display
        #[arg(long, default_value_t = 1000)]
        limit: i64,
    },

    /// Insert or update a single CUPS code
    UpsertCups {
        /// The CUPS code
        code: String,

        /// Study name
        #[arg(long)]
        name: Option<String>,

        /// Requires special preparation
        #[arg(long)]
        preparation: bool,

        /// Referred to a reference laboratory
        #[arg(long)]
        referred: bool,
    },

    /// Look up an affiliate's requests in a workbook (no database)
    Lookup {
        /// Excel workbook with the authorization export
        file: PathBuf,

        /// Affiliate document number
        document: String,
    },

    /// Verify database connectivity
    TestConnection,
}

/// Parse config, apply overrides and dispatch to the command handlers.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    apply_db_overrides(&mut config, &cli.db);

    match cli.command {
        Commands::Migrate {
            file,
            yes,
            no_cache,
            page_size,
            fail_closed,
        } => {
            if no_cache {
                config.migration.use_cache = false;
            }
            apply_run_overrides(&mut config, page_size, fail_closed);
            commands::migrate::handle(config, file, yes).await
        }
        Commands::LoadCups {
            preparation,
            referral,
            yes,
            page_size,
            fail_closed,
        } => {
            apply_run_overrides(&mut config, page_size, fail_closed);
            commands::cups::handle_load(config, preparation, referral, yes).await
        }
        Commands::SearchCups {
            code,
            name,
            preparation,
            referred,
            limit,
        } => commands::cups::handle_search(config, code, name, preparation, referred, limit).await,
        Commands::UpsertCups {
            code,
            name,
            preparation,
            referred,
        } => commands::cups::handle_upsert(config, code, name, preparation, referred).await,
        Commands::Lookup { file, document } => commands::lookup::handle(file, document).await,
        Commands::TestConnection => commands::connection::handle(config).await,
    }
}

fn apply_db_overrides(config: &mut Config, args: &DbArgs) {
    if let Some(host) = &args.host {
        config.database.host = host.clone();
    }
    if let Some(port) = args.port {
        config.database.port = port;
    }
    if let Some(database) = &args.database {
        config.database.database = database.clone();
    }
    if let Some(user) = &args.user {
        config.database.user = user.clone();
    }
    if let Some(password) = &args.password {
        config.database.password = Some(password.clone());
    }
}

fn apply_run_overrides(config: &mut Config, page_size: Option<usize>, fail_closed: bool) {
    if let Some(page_size) = page_size {
        config.migration.page_size = page_size;
    }
    if fail_closed {
        config.migration.fail_open_on_fetch = false;
    }
}

/// Make sure a password is available before opening a connection,
/// prompting interactively as a last resort.
pub(crate) fn ensure_password(config: &mut Config) -> Result<()> {
    if config.database.password.is_none() {
        let prompt = format!(
            "Password for {}@{}: ",
            config.database.user, config.database.host
        );
        let password = rpassword::prompt_password(prompt).context("could not read password")?;
        config.database.password = Some(password);
    }
    Ok(())
}

pub(crate) fn render_log(level: LogLevel, message: &str) {
    let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), message);
    match level {
        LogLevel::Info => println!("{}", line),
        LogLevel::Success => println!("{}", line.green()),
        LogLevel::Warning => println!("{}", line.yellow()),
        LogLevel::Error => eprintln!("{}", line.red()),
    }
}

/// Drain the progress channel on a fixed interval until the run finishes.
///
/// Stat events update an in-order map rendered once as the final summary;
/// log, state and progress events render as they arrive. Returns the
/// run's success flag.
pub(crate) async fn watch_run(mut rx: UnboundedReceiver<ProgressEvent>) -> bool {
    let mut stats: Vec<(String, String)> = Vec::new();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        ticker.tick().await;
        loop {
            match rx.try_recv() {
                Ok(ProgressEvent::Log { level, message }) => render_log(level, &message),
                Ok(ProgressEvent::State(message)) => println!("{}", message.dimmed()),
                Ok(ProgressEvent::Progress { percent, message }) => {
                    println!("{}", format!("  {:>3}% {}", percent, message).dimmed());
                }
                Ok(ProgressEvent::Stat { label, value }) => {
                    match stats.iter_mut().find(|(l, _)| *l == label) {
                        Some((_, v)) => *v = value,
                        None => stats.push((label, value)),
                    }
                }
                Ok(ProgressEvent::Finished { success }) => {
                    render_summary(&stats);
                    return success;
                }
                // Search events do not occur on migration runs.
                Ok(ProgressEvent::SearchResult { .. }) | Ok(ProgressEvent::SearchError(_)) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    render_summary(&stats);
                    return false;
                }
            }
        }
    }
}

fn render_summary(stats: &[(String, String)]) {
    if stats.is_empty() {
        return;
    }
    println!();
    println!("{}", "Run summary".bold());
    for (label, value) in stats {
        println!("  {:<18} {}", format!("{}:", label), value);
    }
}
