use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use review_analytics::{
    AnalyticsConfig, DedupeTags, MaintenanceJob, PruneOrphanTags, StoreSet, SwapCoordinator,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "review-analytics")]
#[command(about = "Recompute and inspect double-buffered review analytics", long_about = None)]
struct Cli {
    /// Directory holding the active pointer and both stores
    #[arg(long, env = "REVIEW_ANALYTICS_ROOT", default_value = "./analytics")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync, recompute every product in the standby store, and flip
    Cycle {
        /// Abandon the cycle if recompute runs longer than this
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Run a maintenance job through the same sync and flip
    Maintain {
        #[command(subcommand)]
        job: JobCommands,
    },
    /// Print the current analytics of a product as JSON
    Show { asin: String },
    /// Print the active store
    Active,
}

#[derive(Subcommand)]
enum JobCommands {
    DedupeTags,
    PruneOrphanTags,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let mut config = AnalyticsConfig::with_root(&cli.root);
    if let Commands::Cycle { timeout_secs: Some(secs) } = &cli.command {
        config.cycle_timeout = Some(Duration::from_secs(*secs));
    }

    let stores = Arc::new(
        StoreSet::open(&config)
            .with_context(|| format!("Failed to open stores under {}", cli.root.display()))?,
    );

    match cli.command {
        Commands::Cycle { .. } => {
            let coordinator = SwapCoordinator::new(Arc::clone(&stores), &config);
            let report = coordinator.run_cycle().context("Analytics cycle failed")?;

            println!(
                "active: {} (was {}), products: {}, failed: {}, carried over: {}",
                report.active,
                report.previous,
                report.processed,
                report.failures.len(),
                report.carried_over
            );
            for failure in &report.failures {
                println!("  skipped {}: {}", failure.asin, failure.reason);
            }
        }
        Commands::Maintain { job } => {
            let job: Box<dyn MaintenanceJob> = match job {
                JobCommands::DedupeTags => Box::new(DedupeTags),
                JobCommands::PruneOrphanTags => Box::new(PruneOrphanTags),
            };
            let coordinator = SwapCoordinator::new(Arc::clone(&stores), &config);
            let report = coordinator
                .run_maintenance_job(job.as_ref())
                .with_context(|| format!("Maintenance job {} failed", job.name()))?;

            println!(
                "{}: examined {}, removed {}, active: {}",
                report.job, report.outcome.rows_examined, report.outcome.rows_removed, report.active
            );
        }
        Commands::Show { asin } => {
            let stats = stores.get_analytics(&asin).context("Failed to read analytics")?;
            match stats {
                Some(stats) => {
                    let json = serde_json::to_string_pretty(&stats.analytics)?;
                    println!("{}", json);
                }
                None => println!("{}: recompute pending", asin),
            }
        }
        Commands::Active => {
            let active = stores.resolve_active().context("Failed to read active pointer")?;
            println!("{}", active);
        }
    }

    stores.flush()?;
    Ok(())
}
