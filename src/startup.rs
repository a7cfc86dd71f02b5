use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;

use crate::adapters::{
    BillingClient, InMemoryEventLedger, InMemoryTransactionStore, LoggingBilling,
    PostgresEventLedger, PostgresTransactionStore,
};
use crate::config::Config;
use crate::ports::{EventLedger, InvoiceSettler, ServiceActivator, TransactionStore};
use crate::providers::ProviderRegistry;
use crate::AppState;

pub struct ValidationReport {
    pub environment: bool,
    /// `None` when running on the in-memory stores.
    pub database: Option<bool>,
    pub channels: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database.unwrap_or(true) && self.channels
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        match self.database {
            Some(ok) => println!("Database Connectivity: {}", status(ok)),
            None => println!("Database Connectivity: in-memory store"),
        }
        println!("Payment Channels:      {}", status(self.channels));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: Option<&PgPool>) -> ValidationReport {
    let mut report = ValidationReport {
        environment: true,
        database: None,
        channels: true,
        errors: Vec::new(),
    };

    if let Err(e) = config.validate() {
        report.environment = false;
        report.errors.push(format!("Environment: {:#}", e));
    }

    if let Some(pool) = pool {
        match validate_database(pool).await {
            Ok(()) => report.database = Some(true),
            Err(e) => {
                report.database = Some(false);
                report.errors.push(format!("Database: {:#}", e));
            }
        }
    }

    if let Err(e) = ProviderRegistry::from_config(config) {
        report.channels = false;
        report.errors.push(format!("Channels: {}", e));
    } else if config.channels.is_empty() {
        report.channels = false;
        report
            .errors
            .push("Channels: no payment channel configured (GATEWAY_CHANNELS or PAYSTACK_SECRET_KEY)".to_string());
    }

    report
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

/// Stores backing the application: Postgres when `DATABASE_URL` is set,
/// in-memory otherwise.
pub struct Stores {
    pub transactions: Arc<dyn TransactionStore>,
    pub ledger: Arc<dyn EventLedger>,
    pub pool: Option<PgPool>,
}

pub async fn connect_stores(config: &Config) -> Result<Stores> {
    match &config.database_url {
        Some(url) => {
            let pool = crate::db::create_pool(url)
                .await
                .context("Failed to connect to database")?;
            crate::db::run_migrations(&pool).await?;
            Ok(Stores {
                transactions: Arc::new(PostgresTransactionStore::new(pool.clone())),
                ledger: Arc::new(PostgresEventLedger::new(pool.clone())),
                pool: Some(pool),
            })
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores, data is lost on restart");
            Ok(Stores {
                transactions: Arc::new(InMemoryTransactionStore::new()),
                ledger: Arc::new(InMemoryEventLedger::new()),
                pool: None,
            })
        }
    }
}

pub fn build_state(config: &Config, stores: &Stores) -> Result<AppState> {
    let providers = Arc::new(
        ProviderRegistry::from_config(config).context("Failed to configure payment channels")?,
    );

    let (settler, activator): (Arc<dyn InvoiceSettler>, Arc<dyn ServiceActivator>) =
        match &config.billing_url {
            Some(url) => {
                let client = Arc::new(BillingClient::new(url.clone(), config.provider_timeout()));
                (client.clone(), client)
            }
            None => {
                tracing::warn!("BILLING_URL not set; settlement side effects are only logged");
                let billing = Arc::new(LoggingBilling);
                (billing.clone(), billing)
            }
        };

    Ok(AppState::new(
        stores.transactions.clone(),
        stores.ledger.clone(),
        providers,
        settler,
        activator,
        config.public_base_url.clone(),
    ))
}
