//! Upstream payment providers.
//!
//! Each provider knows how to authenticate and parse its own webhooks, how to
//! map its status vocabulary onto [`ProviderSignal`], and how to initialize and
//! verify a charge. The [`ProviderRegistry`] selects one per channel.

pub mod paystack;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{ChannelConfig, Config, ProviderKind};
use crate::error::AppError;

pub use paystack::PaystackProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("provider did not answer within the timeout")]
    Timeout,
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),
    #[error("malformed event payload: {0}")]
    MalformedEvent(String),
    #[error("provider misconfigured: {0}")]
    Misconfigured(String),
}

/// Outcome a provider reports for a charge, normalized across providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSignal {
    Completed,
    Failed,
    Pending,
    Unrecognized(String),
}

/// A provider's view of one transaction, from a webhook or a verify call.
#[derive(Debug, Clone)]
pub struct ProviderUpdate {
    pub event_type: String,
    /// Absent only for event types the gateway does not act on.
    pub reference: Option<String>,
    pub signal: ProviderSignal,
    pub provider_reference: Option<String>,
    /// Major units.
    pub amount: Option<BigDecimal>,
    pub currency: Option<String>,
    pub payment_method: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct InitializeRequest {
    pub reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub email: String,
    pub callback_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct InitializeResponse {
    pub authorization_url: String,
    pub access_code: Option<String>,
    pub provider_reference: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Header carrying the webhook signature.
    fn signature_header(&self) -> &str;

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool;

    fn parse_event(&self, payload: &[u8]) -> Result<ProviderUpdate, ProviderError>;

    fn map_status(&self, raw_status: &str) -> ProviderSignal;

    async fn initialize(&self, request: &InitializeRequest) -> Result<InitializeResponse, ProviderError>;

    async fn verify(&self, reference: &str) -> Result<ProviderUpdate, ProviderError>;
}

#[derive(Clone)]
pub struct Channel {
    pub config: ChannelConfig,
    pub provider: Arc<dyn PaymentProvider>,
}

/// Channel id → configured provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    channels: HashMap<String, Channel>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let mut registry = Self::new();
        for channel in &config.channels {
            let provider: Arc<dyn PaymentProvider> = match channel.provider {
                ProviderKind::Paystack => {
                    Arc::new(PaystackProvider::new(channel, config.provider_timeout())?)
                }
            };
            registry.register(channel.clone(), provider);
        }
        Ok(registry)
    }

    pub fn register(&mut self, config: ChannelConfig, provider: Arc<dyn PaymentProvider>) {
        tracing::info!(channel_id = %config.id, provider = provider.name(), enabled = config.enabled, "Registered payment channel");
        self.channels
            .insert(config.id.clone(), Channel { config, provider });
    }

    /// Looks up a channel regardless of whether it accepts new charges.
    pub fn channel(&self, channel_id: &str) -> Result<&Channel, AppError> {
        self.channels
            .get(channel_id)
            .ok_or_else(|| AppError::NotFound(format!("Channel {} not found", channel_id)))
    }

    /// Looks up a channel that may start new charges.
    pub fn enabled_channel(&self, channel_id: &str) -> Result<&Channel, AppError> {
        let channel = self.channel(channel_id)?;
        if !channel.config.enabled {
            return Err(AppError::Configuration(format!(
                "Channel {} is disabled",
                channel_id
            )));
        }
        Ok(channel)
    }

    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Converts minor units (kobo, cents) to major units.
pub fn from_minor_units(minor: i64) -> BigDecimal {
    BigDecimal::from(minor) / BigDecimal::from(100)
}

/// Converts major units to whole minor units.
pub fn to_minor_units(amount: &BigDecimal) -> Result<i64, ProviderError> {
    (amount.clone() * BigDecimal::from(100))
        .round(0)
        .with_scale(0)
        .to_string()
        .parse::<i64>()
        .map_err(|_| ProviderError::InvalidResponse(format!("amount {} is out of range", amount)))
}

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}
