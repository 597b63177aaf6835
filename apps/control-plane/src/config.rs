// [apps/control-plane/src/config.rs]
//! Environment-driven configuration, loaded once at startup.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::time::Duration;

pub struct Config {
    pub database_url: String,
    pub database_token: Option<String>,
    pub bind_addr: String,
    pub profile_store_dir: String,
    pub vault_secret: Vec<u8>,
    pub webhook_secret: String,
    pub command_bus_token: String,
    pub command_bus_timeout: Duration,
    pub default_bot_image: String,
    pub payment_processor_url: String,
    pub payment_processor_api_key: String,
    pub provider_base_urls: HashMap<String, String>,
}

fn default_provider_base_urls() -> HashMap<String, String> {
    [
        ("openai", "https://api.openai.com"),
        ("anthropic", "https://api.anthropic.com"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Config {
    /// Reads every setting from the process environment, applying the
    /// same defaults a local single-node deployment would want.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| ":memory:".to_string());
        let database_token = std::env::var("DATABASE_AUTH_TOKEN").ok();
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let profile_store_dir = std::env::var("PROFILE_STORE_DIR").unwrap_or_else(|_| "./data/profiles".to_string());

        let vault_secret = std::env::var("VAULT_SECRET")
            .context("VAULT_SECRET must be set (symmetric key material for credential encryption)")?
            .into_bytes();

        let webhook_secret = std::env::var("WEBHOOK_SECRET")
            .context("WEBHOOK_SECRET must be set (payment processor signing secret)")?;

        let command_bus_token = std::env::var("NODE_AGENT_BEARER_TOKEN")
            .unwrap_or_else(|_| "dev-node-agent-token".to_string());

        let command_bus_timeout_s: u64 = std::env::var("COMMAND_BUS_TIMEOUT_S")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let default_bot_image =
            std::env::var("DEFAULT_BOT_IMAGE").unwrap_or_else(|_| "ghcr.io/wopr/bot-default:latest".to_string());

        let payment_processor_url = std::env::var("PAYMENT_PROCESSOR_URL")
            .unwrap_or_else(|_| "https://api.stripe.com/v1/payment_intents".to_string());

        let payment_processor_api_key = std::env::var("PAYMENT_PROCESSOR_API_KEY")
            .context("PAYMENT_PROCESSOR_API_KEY must be set (payment processor secret key)")?;

        let provider_base_urls = match std::env::var("PROVIDER_BASE_URLS") {
            Ok(raw) => serde_json::from_str(&raw).context("PROVIDER_BASE_URLS must be a JSON object of provider -> base URL")?,
            Err(_) => default_provider_base_urls(),
        };

        Ok(Self {
            database_url,
            database_token,
            bind_addr,
            profile_store_dir,
            vault_secret,
            webhook_secret,
            command_bus_token,
            command_bus_timeout: Duration::from_secs(command_bus_timeout_s),
            default_bot_image,
            payment_processor_url,
            payment_processor_api_key,
            provider_base_urls,
        })
    }
}
