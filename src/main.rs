use clap::Parser;
use paygate_core::cli::{self, Cli, Commands};
use paygate_core::config::{Config, LogFormat};
use paygate_core::services::{run_sweeper, sweep_once};
use paygate_core::{create_app, startup};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(cli::DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config).await,
        Commands::Events(command) => {
            let stores = startup::connect_stores(&config).await?;
            cli::handle_events_list(stores.ledger.as_ref(), command).await
        }
        Commands::Sweep => {
            let stores = startup::connect_stores(&config).await?;
            let state = startup::build_state(&config, &stores)?;
            let summary = sweep_once(&state.engine, state.ledger.as_ref()).await?;
            println!(
                "✓ Sweep finished: examined={} reconciled={} anomalies={} failed={}",
                summary.examined, summary.reconciled, summary.anomalies, summary.failed
            );
            Ok(())
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let stores = startup::connect_stores(&config).await?;
    let state = startup::build_state(&config, &stores)?;

    tokio::spawn(run_sweeper(
        state.engine.clone(),
        state.ledger.clone(),
        config.sweep_interval(),
    ));

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
