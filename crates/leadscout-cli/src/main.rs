mod cycle;
mod webhooks;

use clap::{Parser, Subcommand};
use leadscout_core::{validate_query, AppConfig, Platform};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "leadscout-cli")]
#[command(about = "leadscout operator command line")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Check a boolean monitor query and print the parsed terms
    ValidateQuery {
        /// Query text, e.g. `crm AND (salesforce OR hubspot) NOT jobs`
        query: String,
    },
    /// Run one ingestion cycle now
    RunCycle {
        /// Platform to scan; all platforms when omitted
        #[arg(long, value_parser = parse_platform)]
        platform: Option<Platform>,
        /// Show how monitors would be gated without fetching or writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Re-attempt webhook deliveries whose retry time has passed
    SweepWebhooks {
        /// Maximum deliveries to attempt
        #[arg(long, default_value = "200")]
        limit: usize,
    },
    /// Delete webhook deliveries older than the retention window
    PurgeDeliveries {
        /// Override `LEADSCOUT_WEBHOOK_RETENTION_DAYS`
        #[arg(long)]
        days: Option<u32>,
    },
    /// List enrichment events still waiting for the analysis worker
    PendingEnrichment {
        /// Maximum events to list
        #[arg(long, default_value = "50")]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check database connectivity
    Ping,
    /// Apply pending migrations
    Migrate,
}

fn parse_platform(raw: &str) -> Result<Platform, String> {
    raw.parse::<Platform>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("leadscout-cli: no command given, see --help");
        return Ok(());
    };

    // Pure commands run without configuration or a database.
    if let Commands::ValidateQuery { query } = &command {
        tracing_subscriber::fmt::init();
        return run_validate_query(query);
    }

    let config = leadscout_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool = connect(&config).await?;

    match command {
        Commands::Db { command } => match command {
            DbCommands::Ping => {
                leadscout_db::health_check(&pool).await?;
                println!("database: ok");
            }
            DbCommands::Migrate => {
                let applied = leadscout_db::run_migrations(&pool).await?;
                println!("migrations applied: {applied}");
            }
        },
        Commands::RunCycle { platform, dry_run } => {
            cycle::run_cycle(pool, &config, platform, dry_run).await?;
        }
        Commands::SweepWebhooks { limit } => webhooks::sweep(pool, &config, limit).await?,
        Commands::PurgeDeliveries { days } => {
            let days = days.unwrap_or(config.webhook_retention_days);
            webhooks::purge(pool, &config, days).await?;
        }
        Commands::PendingEnrichment { limit } => {
            let events = leadscout_db::list_pending_enrichment_events(&pool, limit).await?;
            for event in &events {
                println!(
                    "{}\t{}\t{}\t{}",
                    event.id,
                    event.created_at.to_rfc3339(),
                    event.tenant_id,
                    event.kind
                );
            }
            println!("{} pending", events.len());
        }
        Commands::ValidateQuery { .. } => {}
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool_config = leadscout_db::PoolConfig::from_app_config(config);
    Ok(leadscout_db::connect_pool(&config.database_url, pool_config).await?)
}

fn run_validate_query(query: &str) -> anyhow::Result<()> {
    let validation = validate_query(query);
    if !validation.valid {
        anyhow::bail!(
            "invalid query: {}",
            validation.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let parsed = leadscout_core::parse_query(query);
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}
