use anyhow::Result;
use clap::{Parser, Subcommand};
use parc_storage::PgProjectStore;
use parc_sync::{backfill_window, build_service, current_year, maybe_build_scheduler, SyncConfig};
use parc_web::AppState;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "parc-cli")]
#[command(about = "Program archive cache command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the JSON API (and the cron scheduler when enabled).
    Serve,
    /// Fetch and upsert one (program, year) edition.
    Sync {
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        year: Option<i32>,
    },
    /// Sync every year in the configured backfill window.
    Backfill {
        #[arg(long)]
        program: Option<String>,
    },
    /// Apply pending database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let (service, registry) = build_service(&config).await?;
            if let Some(scheduler) =
                maybe_build_scheduler(service.clone(), &registry, &config).await?
            {
                scheduler.start().await?;
            }
            let state = AppState::new(service, registry, &config);
            parc_web::serve(state, config.web_port).await?;
        }
        Commands::Sync { program, year } => {
            let (service, _registry) = build_service(&config).await?;
            let program = program.unwrap_or_else(|| config.default_program.clone());
            let year = year.unwrap_or_else(current_year);
            let count = service.sync_year(&program, year).await?;
            println!("sync complete: program={program} year={year} upserted={count}");
        }
        Commands::Backfill { program } => {
            let (service, _registry) = build_service(&config).await?;
            let program = program.unwrap_or_else(|| config.default_program.clone());
            let years = backfill_window(current_year(), config.backfill_window_years);
            let outcomes = service.backfill_years(&program, &years).await?;
            for outcome in &outcomes {
                match &outcome.error {
                    Some(error) => println!("{}: failed ({error})", outcome.year),
                    None => println!("{}: {} projects", outcome.year, outcome.count),
                }
            }
        }
        Commands::Migrate => {
            let store = PgProjectStore::connect(&config.database_url).await?;
            store.run_migrations().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
