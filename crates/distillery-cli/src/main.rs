mod training;

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use distillery_core::{AppConfig, IndustryRegistry};
use distillery_db::{PgStore, TemporaryScrapeStore};
use distillery_learning::VersionControl;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "distillery-cli")]
#[command(about = "Distillery operator command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Delete expired and flagged temporary scrapes now
    Sweep,
    /// Print the markdown changelog of a learned pattern
    Changelog {
        /// Training-data id
        id: Uuid,
    },
    /// Restore a learned pattern to an earlier version
    Rollback {
        /// Training-data id
        id: Uuid,
        /// Version to restore
        version: i64,
        /// Operator recorded in the version log
        #[arg(long)]
        user: Option<String>,
    },
    /// Rewrite a corrupted pattern from its newest sound history snapshot
    Recover {
        /// Training-data id
        id: Uuid,
    },
    /// Show learning analytics for a tenant
    Analytics {
        tenant: String,
        /// Emit JSON instead of a text summary
        #[arg(long)]
        json: bool,
    },
    /// Retry feedback that was stored but never applied
    Reprocess { tenant: String },
    /// Apply time decay to stale patterns now
    Decay {
        /// Restrict to one tenant
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Parse and validate an industries YAML file without touching the database
    ValidateIndustries { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("distillery-cli: no command given; see --help");
        return Ok(());
    };

    tracing::debug!(?command, "running command");
    if let Commands::ValidateIndustries { path } = &command {
        println!("{}", validate_industries(path)?);
        return Ok(());
    }

    let config = distillery_core::load_app_config()?;
    let pool_config = distillery_db::PoolConfig::from_app_config(&config);
    let pool = distillery_db::connect_pool(&config.database_url, pool_config).await?;

    if matches!(command, Commands::Migrate) {
        let applied = distillery_db::run_migrations(&pool).await?;
        tracing::info!(applied, "migrations complete");
        println!("applied {applied} migration(s)");
        return Ok(());
    }

    let store = Arc::new(PgStore::new(pool));
    let versions = VersionControl::new(store.clone());
    let output = match command {
        Commands::Sweep => run_sweep(&store, &config).await?,
        Commands::Changelog { id } => training::changelog(&versions, id).await?,
        Commands::Rollback { id, version, user } => {
            training::rollback(&versions, id, version, user.as_deref(), Utc::now()).await?
        }
        Commands::Recover { id } => training::recover(&versions, id, Utc::now()).await?,
        Commands::Analytics { tenant, json } => {
            training::analytics(&training::manager(store, &config), &tenant, json).await?
        }
        Commands::Reprocess { tenant } => {
            training::reprocess(&training::manager(store, &config), &tenant, Utc::now()).await?
        }
        Commands::Decay { tenant } => {
            training::decay(&training::manager(store, &config), tenant.as_deref(), Utc::now())
                .await?
        }
        Commands::Migrate | Commands::ValidateIndustries { .. } => String::new(),
    };
    println!("{output}");
    Ok(())
}

async fn run_sweep(store: &Arc<PgStore>, config: &AppConfig) -> anyhow::Result<String> {
    let scrapes = TemporaryScrapeStore::new(store.clone(), config.scrape_ttl_days);
    let removed = scrapes.sweep_expired().await?;
    Ok(format!("swept {removed} expired scrape(s)"))
}

/// Render a per-industry summary table, or fail on the first invalid entry.
fn validate_industries(path: &Path) -> anyhow::Result<String> {
    let registry = distillery_core::load_industries(path)?;
    industry_table(&registry)
}

fn industry_table(registry: &IndustryRegistry) -> anyhow::Result<String> {
    if registry.is_empty() {
        anyhow::bail!("no industries defined");
    }

    let mut out = format!("{:<20}{:<10}{:<8}RULES", "INDUSTRY", "SIGNALS", "FLUFF");
    for key in registry.keys() {
        let Some(industry) = registry.get(key) else {
            continue;
        };
        let _ = write!(
            out,
            "\n{:<20}{:<10}{:<8}{}",
            key,
            industry.signal_definitions.len(),
            industry.fluff_patterns.len(),
            industry.scoring_rules.len()
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests;
