//! Configuration.
//!
//! One immutable `AppConfig` is built from the environment at startup and
//! handed into constructors; nothing reads env vars after that. Agent
//! definitions live in the database — the TOML roster file here is only the
//! input to the operator-run `sync-agents` subcommand.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::domain::ports::{ModelEndpoint, ProviderKind};
use crate::domain::types::{AgentConfig, RiskProfile};

const MAINNET_URL: &str = "https://api.hyperliquid.xyz";
const TESTNET_URL: &str = "https://api.hyperliquid-testnet.xyz";
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";

/// Application execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Mock,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(Mode::Live),
            "mock" => Ok(Mode::Mock),
            _ => anyhow::bail!("Invalid MODE: {}. Must be 'live' or 'mock'", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: Mode,

    // Venue
    pub venue_base_url: String,
    pub is_testnet: bool,
    /// Exchange signing key; held in memory only, never logged.
    pub signing_key: String,
    pub is_cross_margin: bool,
    pub venue_requests_per_minute: u32,
    /// Aggressive-IOC offset from mid for market-style orders.
    pub slippage_pct: Decimal,

    // Scheduling
    pub cycle_period_secs: u64,
    pub shutdown_timeout_secs: u64,

    // Risk
    pub global_max_leverage: u32,

    // Model providers
    pub official_base_url: String,
    pub official_api_key: String,
    pub openrouter_base_url: String,
    pub openrouter_api_key: String,
    pub model_timeout_secs: u64,

    // Persistence
    pub database_url: String,

    // Observability
    pub observability_enabled: bool,
    pub observability_interval_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mode: Mode = env_or("MODE", Mode::Mock)?;
        let is_testnet: bool = env_or("IS_TESTNET", false)?;

        let venue_base_url = env::var("VENUE_BASE_URL").unwrap_or_else(|_| {
            if is_testnet { TESTNET_URL } else { MAINNET_URL }.to_string()
        });

        let signing_key = env::var("EXCHANGE_SIGNING_KEY").unwrap_or_default();
        if mode == Mode::Live && signing_key.is_empty() {
            anyhow::bail!("EXCHANGE_SIGNING_KEY is required in live mode");
        }

        let official_api_key = env::var("OPENAI_COMPAT_API_KEY").unwrap_or_default();
        let openrouter_api_key = env::var("OPENROUTER_API_KEY").unwrap_or_default();
        if mode == Mode::Live && official_api_key.is_empty() && openrouter_api_key.is_empty() {
            anyhow::bail!(
                "At least one of OPENAI_COMPAT_API_KEY / OPENROUTER_API_KEY is required in live mode"
            );
        }

        let slippage_pct: Decimal = env_or("SLIPPAGE_PCT", Decimal::new(5, 2))?;
        if slippage_pct < Decimal::ZERO || slippage_pct >= Decimal::ONE {
            anyhow::bail!("SLIPPAGE_PCT must be in [0, 1), got {}", slippage_pct);
        }

        let cycle_period_secs: u64 = env_or("CYCLE_PERIOD_SECS", 180)?;
        if cycle_period_secs == 0 {
            anyhow::bail!("CYCLE_PERIOD_SECS must be positive");
        }

        Ok(Self {
            mode,
            venue_base_url,
            is_testnet,
            signing_key,
            is_cross_margin: env_or("CROSS_MARGIN", true)?,
            venue_requests_per_minute: env_or("VENUE_RATE_LIMIT_PER_MIN", 60)?,
            slippage_pct,
            cycle_period_secs,
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 60)?,
            global_max_leverage: env_or("GLOBAL_MAX_LEVERAGE", 10)?,
            official_base_url: env::var("OPENAI_COMPAT_BASE_URL")
                .unwrap_or_else(|_| "https://api.deepseek.com/v1".to_string()),
            official_api_key,
            openrouter_base_url: env::var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|_| OPENROUTER_URL.to_string()),
            openrouter_api_key,
            model_timeout_secs: env_or("MODEL_TIMEOUT_SECS", 30)?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/hypermind.db".to_string()),
            observability_enabled: env_or("OBSERVABILITY_ENABLED", true)?,
            observability_interval_secs: env_or("OBSERVABILITY_INTERVAL", 60)?,
        })
    }
}

/// Maps a model identifier to its endpoint. Identifiers prefixed
/// `openrouter:` route to the aggregator; everything else goes to the
/// provider's own OpenAI-compatible endpoint. Both share one wire protocol,
/// so the distinction is purely configuration.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    official_base_url: String,
    official_api_key: String,
    openrouter_base_url: String,
    openrouter_api_key: String,
}

impl ModelRouter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            official_base_url: config.official_base_url.clone(),
            official_api_key: config.official_api_key.clone(),
            openrouter_base_url: config.openrouter_base_url.clone(),
            openrouter_api_key: config.openrouter_api_key.clone(),
        }
    }

    pub fn resolve(&self, model_id: &str) -> ModelEndpoint {
        match model_id.strip_prefix("openrouter:") {
            Some(model) => ModelEndpoint {
                kind: ProviderKind::OpenRouter,
                base_url: self.openrouter_base_url.clone(),
                api_key: self.openrouter_api_key.clone(),
                model: model.to_string(),
            },
            None => ModelEndpoint {
                kind: ProviderKind::Official,
                base_url: self.official_base_url.clone(),
                api_key: self.official_api_key.clone(),
                model: model_id.to_string(),
            },
        }
    }
}

/// TOML roster consumed by `sync-agents`.
#[derive(Debug, Deserialize)]
pub struct AgentRosterFile {
    pub agents: Vec<AgentRosterEntry>,
}

#[derive(Debug, Deserialize)]
pub struct AgentRosterEntry {
    pub agent_id: String,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub primary_model: String,
    pub fallback_model: String,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    #[serde(default = "default_max_position_fraction")]
    pub max_position_fraction: Decimal,
    #[serde(default = "default_max_gross_exposure_fraction")]
    pub max_gross_exposure_fraction: Decimal,
    #[serde(default = "default_true")]
    pub stop_loss_required: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_leverage() -> u32 {
    10
}

fn default_max_position_fraction() -> Decimal {
    Decimal::new(20, 2)
}

fn default_max_gross_exposure_fraction() -> Decimal {
    Decimal::new(80, 2)
}

impl AgentRosterEntry {
    pub fn into_agent_config(self) -> AgentConfig {
        AgentConfig {
            agent_id: self.agent_id,
            display_name: self.display_name,
            is_active: self.is_active,
            primary_model: self.primary_model,
            fallback_model: self.fallback_model,
            risk_profile: RiskProfile {
                max_leverage: self.max_leverage,
                max_position_fraction: self.max_position_fraction,
                max_gross_exposure_fraction: self.max_gross_exposure_fraction,
                stop_loss_required: self.stop_loss_required,
            },
        }
    }
}

pub fn parse_agent_roster(raw: &str) -> Result<AgentRosterFile> {
    toml::from_str(raw).context("Failed to parse agent roster TOML")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn router_splits_on_prefix() {
        let router = ModelRouter {
            official_base_url: "https://api.deepseek.com/v1".to_string(),
            official_api_key: "official-key".to_string(),
            openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
            openrouter_api_key: "or-key".to_string(),
        };

        let endpoint = router.resolve("openrouter:deepseek/deepseek-chat");
        assert_eq!(endpoint.kind, ProviderKind::OpenRouter);
        assert_eq!(endpoint.model, "deepseek/deepseek-chat");
        assert_eq!(endpoint.api_key, "or-key");

        let endpoint = router.resolve("deepseek-chat");
        assert_eq!(endpoint.kind, ProviderKind::Official);
        assert_eq!(endpoint.model, "deepseek-chat");
    }

    #[test]
    fn roster_parses_with_defaults() {
        let raw = r#"
            [[agents]]
            agent_id = "deepseek-chat"
            display_name = "DeepSeek Chat"
            primary_model = "openrouter:deepseek/deepseek-chat"
            fallback_model = "deepseek-chat"

            [[agents]]
            agent_id = "qwen-max"
            display_name = "Qwen Max"
            is_active = false
            primary_model = "openrouter:qwen/qwen-max"
            fallback_model = "openrouter:qwen/qwen-plus"
            max_leverage = 5
            max_position_fraction = 0.10
        "#;

        let roster = parse_agent_roster(raw).unwrap();
        assert_eq!(roster.agents.len(), 2);

        let first = &roster.agents[0];
        assert!(first.is_active);
        assert_eq!(first.max_leverage, 10);
        assert_eq!(first.max_position_fraction, dec!(0.20));

        let second = &roster.agents[1];
        assert!(!second.is_active);
        assert_eq!(second.max_leverage, 5);
        assert_eq!(second.max_position_fraction, dec!(0.10));
    }
}
