use anyhow::Context;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::services::signature::SignatureAlgorithm;

const DEFAULT_PAYSTACK_CHANNEL: &str = "paystack";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Paystack,
}

/// Per-channel provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    pub provider: ProviderKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub secret_key: String,
    /// Falls back to `secret_key`, which is what Paystack signs webhooks with.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub signature_header: Option<String>,
    #[serde(default)]
    pub signature_algorithm: Option<SignatureAlgorithm>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl ChannelConfig {
    pub fn webhook_secret(&self) -> &str {
        self.webhook_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.secret_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server_port: u16,
    /// No URL means the in-memory stores are used.
    pub database_url: Option<String>,
    pub public_base_url: Option<String>,
    pub billing_url: Option<String>,
    pub provider_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub log_format: LogFormat,
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let channels = match env::var("GATEWAY_CHANNELS") {
            Ok(raw) => parse_channels(&raw)?,
            Err(_) => match env::var("PAYSTACK_SECRET_KEY") {
                Ok(secret_key) => vec![ChannelConfig {
                    id: DEFAULT_PAYSTACK_CHANNEL.to_string(),
                    provider: ProviderKind::Paystack,
                    enabled: true,
                    secret_key,
                    webhook_secret: env::var("PAYSTACK_WEBHOOK_SECRET").ok(),
                    base_url: env::var("PAYSTACK_BASE_URL").ok(),
                    signature_header: None,
                    signature_algorithm: None,
                    callback_url: env::var("PAYSTACK_CALLBACK_URL").ok(),
                }],
                Err(_) => Vec::new(),
            },
        };

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("SERVER_PORT must be a port number")?,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            public_base_url: env::var("PUBLIC_BASE_URL").ok(),
            billing_url: env::var("BILLING_URL").ok().filter(|s| !s.is_empty()),
            provider_timeout_secs: env::var("PROVIDER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("PROVIDER_TIMEOUT_SECS must be a number of seconds")?,
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("SWEEP_INTERVAL_SECS must be a number of seconds")?,
            log_format,
            channels,
        })
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Rejects configurations that would silently refuse every webhook.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_port == 0 {
            anyhow::bail!("SERVER_PORT must be greater than 0");
        }
        if self.provider_timeout_secs == 0 {
            anyhow::bail!("PROVIDER_TIMEOUT_SECS must be greater than 0");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("SWEEP_INTERVAL_SECS must be greater than 0");
        }
        for (name, value) in [
            ("PUBLIC_BASE_URL", &self.public_base_url),
            ("BILLING_URL", &self.billing_url),
        ] {
            if let Some(value) = value {
                url::Url::parse(value).with_context(|| format!("{} is not a valid URL", name))?;
            }
        }

        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.id.as_str()) {
                anyhow::bail!("channel '{}' is configured more than once", channel.id);
            }
            if let Some(base_url) = &channel.base_url {
                url::Url::parse(base_url)
                    .with_context(|| format!("channel '{}' base_url is not a valid URL", channel.id))?;
            }
            if channel.enabled && channel.secret_key.trim().is_empty() {
                anyhow::bail!("channel '{}' is enabled but has no secret key", channel.id);
            }
            if channel.enabled && channel.webhook_secret().trim().is_empty() {
                anyhow::bail!("channel '{}' is enabled but has no webhook secret", channel.id);
            }
        }
        Ok(())
    }
}

fn parse_channels(raw: &str) -> anyhow::Result<Vec<ChannelConfig>> {
    serde_json::from_str(raw).context("GATEWAY_CHANNELS must be a JSON array of channel configurations")
}
