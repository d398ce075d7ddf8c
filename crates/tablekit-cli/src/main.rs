//! tablekit: generic CRUD over any SQL table from the command line

use anyhow::{Context, Result};
use clap::Parser;
use tablekit_cli::Cli;
use tablekit_db::QueryHelper;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tablekit_obs::init("tablekit");

    let config = cli.db_config()?;
    info!(driver = %config.driver, dbname = %config.dbname, "Loaded configuration");

    let mut helper = QueryHelper::connect(&config)
        .await
        .context("Failed to connect to database")?;
    helper.ping().await.context("Database ping failed")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = tablekit_cli::run(&mut helper, cli.command, &mut out).await;

    let closed = helper.close().await;
    tablekit_cli::finish_session(result, closed)
}
