mod cli;
mod config;
mod db;
mod excel;
mod migrate;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = cli::Cli::parse();
    cli::run(args).await
}
