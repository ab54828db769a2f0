use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use zwift_scout::config;
use zwift_scout::db::{self, TableRef};
use zwift_scout::report::{self, RiderFilter, REQUIRED_COLUMNS};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Filter the curated riders table and print summary metrics"
)]
struct Args {
    /// Path to YAML config file; built-in defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite URL of the store; overrides config and DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    #[arg(long, default_value = "core")]
    dataset: String,

    #[arg(long, default_value = "riders")]
    table: String,

    /// Keep riders with this id (repeatable)
    #[arg(long = "rider-id")]
    rider_ids: Vec<i64>,

    /// Keep riders with this name (repeatable)
    #[arg(long = "name")]
    names: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(args.config.as_deref())?;
    let database_url = args.database_url.unwrap_or_else(|| cfg.database_url());

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let source = TableRef::new(&args.dataset, &args.table);
    let table = db::scan_table(&pool, &source).await?;
    report::check_columns(&table)?;

    let filter = RiderFilter {
        rider_ids: args.rider_ids,
        names: args.names,
    };
    let selected = filter.apply(&table.rows);
    let summary = report::summarize(&selected, table.rows.len());

    println!("{summary}");
    println!();
    println!("{}", REQUIRED_COLUMNS.join("\t"));
    for row in &selected {
        println!("{}", report::format_row(row));
    }
    println!();
    println!("Showing {} of {} riders", summary.shown, summary.total);
    Ok(())
}
