use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use zwift_scout::config::{self, Config};
use zwift_scout::db;
use zwift_scout::pipeline::Pipeline;
use zwift_scout::resource::{ClubRiders, Resource, RiderBatch};
use zwift_scout::zr::{self, ZrClient};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load ZwiftRacing rider rankings into the local analytical store"
)]
struct Args {
    /// Path to YAML config file; built-in defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upsert the members of one club, keyed by rider id
    Club {
        /// Club id; defaults to the configured sample club
        club_id: Option<i64>,

        /// Fetch and print the normalized records without writing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Replace the destination table with one batch lookup of rider ids
    Riders {
        /// Rider ids; defaults to the configured sample riders
        rider_ids: Vec<i64>,

        /// Fetch and print the normalized records without writing them
        #[arg(long)]
        dry_run: bool,
    },
    /// List the most recent loads
    Loads {
        #[arg(long, default_value = "10")]
        limit: i64,
    },
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

    match args.command {
        Command::Club { club_id, dry_run } => {
            let resource = ClubRiders::new(club_id.unwrap_or(cfg.defaults.club_id));
            ingest(&cfg, "zwift_club", &resource, dry_run).await
        }
        Command::Riders { rider_ids, dry_run } => {
            let supplied = (!rider_ids.is_empty()).then_some(rider_ids);
            let resource = RiderBatch::or_fallback(supplied, &cfg.defaults.rider_ids);
            ingest(&cfg, "zwift_riders", &resource, dry_run).await
        }
        Command::Loads { limit } => {
            let pool = db::init_pool(&cfg.database_url()).await?;
            db::run_migrations(&pool).await?;
            for load in db::recent_loads(&pool, limit).await? {
                println!(
                    "{}\t{}\t{}\t{}.{}\t{}\t{} written\t{} deleted\t{}",
                    load.finished_at.format("%Y-%m-%d %H:%M:%S"),
                    load.pipeline_name,
                    load.resource,
                    load.dataset,
                    load.table_name,
                    load.disposition,
                    load.rows_written,
                    load.rows_deleted,
                    load.load_id,
                );
            }
            Ok(())
        }
    }
}

async fn ingest(
    cfg: &Config,
    pipeline_name: &str,
    resource: &dyn Resource,
    dry_run: bool,
) -> Result<()> {
    let client = ZrClient::from_config(cfg, zr::api_key_from_env())?;

    if dry_run {
        let normalized = resource.records(&client).await?;
        info!(
            resource = resource.name(),
            base_url = %client.base_url(),
            outcome = normalized.outcome().as_str(),
            records = normalized.len(),
            "dry run, nothing written"
        );
        for record in normalized.into_records() {
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        return Ok(());
    }

    let database_url = cfg.database_url();
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let mut pipeline = Pipeline::new(pipeline_name, pool, Arc::new(client), cfg.destination());
    info!(
        %database_url,
        destination = %pipeline.destination(),
        "starting {}",
        pipeline.name()
    );
    let summary = pipeline.run(resource).await?;
    println!("Pipeline completed: {summary}");
    Ok(())
}
