use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::ports::EventLedger;

#[derive(Parser)]
#[command(name = "paygate-core")]
#[command(about = "Paygate Core - Payment Gateway Reconciliation Service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Inbound event ledger commands
    #[command(subcommand)]
    Events(EventCommands),

    /// Replay unprocessed events once and exit
    Sweep,

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum EventCommands {
    /// List events awaiting automatic retry
    Pending {
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
    /// List events that exhausted their attempts
    Stalled {
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let Some(url) = config.database_url.as_deref() else {
        anyhow::bail!("DATABASE_URL is not set");
    };

    let pool = crate::db::create_pool(url).await?;
    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!(
        "  Database URL: {}",
        config
            .database_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(in-memory)".to_string())
    );
    println!("  Public Base URL: {}", config.public_base_url.as_deref().unwrap_or("-"));
    println!("  Billing URL: {}", config.billing_url.as_deref().unwrap_or("(log only)"));
    println!("  Provider Timeout: {}s", config.provider_timeout_secs);
    for channel in &config.channels {
        println!(
            "  Channel {}: {:?}, {}, secret {}",
            channel.id,
            channel.provider,
            if channel.enabled { "enabled" } else { "disabled" },
            mask_secret(&channel.secret_key)
        );
    }

    let pool = match config.database_url.as_deref() {
        Some(url) => Some(crate::db::create_pool(url).await?),
        None => None,
    };
    let report = crate::startup::validate_environment(config, pool.as_ref()).await;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Configuration is invalid");
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

pub async fn handle_events_list(ledger: &dyn EventLedger, command: EventCommands) -> anyhow::Result<()> {
    let events = match command {
        EventCommands::Pending { limit } => ledger.list_unprocessed(limit).await?,
        EventCommands::Stalled { limit } => ledger.list_stalled(limit).await?,
    };

    if events.is_empty() {
        println!("No events");
        return Ok(());
    }

    for event in events {
        println!(
            "{}  {}  {}  attempts={}  received={}  error={}",
            event.id,
            event.channel_id,
            event.event_type,
            event.processing_attempts,
            event.received_at.to_rfc3339(),
            event.processing_error.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

pub fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return "(unset)".to_string();
    }
    let prefix: String = secret.chars().take_while(|c| *c != '_').collect();
    if prefix.len() < secret.len() && prefix.len() <= 4 {
        format!("{}_****", prefix)
    } else {
        "****".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://paygate:hunter2@db:5432/paygate"),
            "postgres://paygate:****@db:5432/paygate"
        );
        assert_eq!(mask_password("postgres://db/paygate"), "postgres://db/paygate");
    }

    #[test]
    fn test_mask_secret_keeps_key_kind_only() {
        assert_eq!(mask_secret("sk_live_abcdef"), "sk_****");
        assert_eq!(mask_secret("plainsecret"), "****");
        assert_eq!(mask_secret(""), "(unset)");
    }

    #[test]
    fn test_parse_events_command() {
        let cli = Cli::try_parse_from(["paygate-core", "events", "stalled", "--limit", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Events(EventCommands::Stalled { limit: 5 }))
        ));
    }
}
