//! Configuration for the account guardian.
//!
//! Loads settings from environment variables and an optional config file.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Exchange API credentials.
    pub exchange: ExchangeConfig,
    /// Portfolio-margin risk bands.
    pub pm_risk: PmRiskConfig,
    /// Poll/loop tuning.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Secret key for signing requests.
    pub secret_key: String,
    /// Use testnet instead of production.
    #[serde(default)]
    pub testnet: bool,
}

/// The portfolio-margin account's risk bands: UniMMR and VIP-loan LTV,
/// each as `(min, balanced, max)`.
#[derive(Debug, Clone, Deserialize)]
pub struct PmRiskConfig {
    #[serde(default = "default_min_uni_mmr")]
    pub min_uni_mmr: Decimal,
    #[serde(default = "default_balanced_uni_mmr")]
    pub balanced_uni_mmr: Decimal,
    #[serde(default = "default_max_uni_mmr")]
    pub max_uni_mmr: Decimal,

    #[serde(default = "default_min_vip_loan_ltv")]
    pub min_vip_loan_ltv: Decimal,
    #[serde(default = "default_balanced_vip_loan_ltv")]
    pub balanced_vip_loan_ltv: Decimal,
    #[serde(default = "default_max_vip_loan_ltv")]
    pub max_vip_loan_ltv: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Watcher poll period, in seconds.
    #[serde(default = "default_poll_period_secs")]
    pub poll_period_secs: u64,
    /// If true, compute remediation plans but never submit mutating calls.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_period_secs: default_poll_period_secs(),
            dry_run: false,
        }
    }
}

fn default_poll_period_secs() -> u64 {
    2
}

fn default_min_uni_mmr() -> Decimal {
    Decimal::new(2, 0) // 2.0
}

fn default_balanced_uni_mmr() -> Decimal {
    Decimal::new(25, 1) // 2.5
}

fn default_max_uni_mmr() -> Decimal {
    Decimal::new(3, 0) // 3.0
}

fn default_min_vip_loan_ltv() -> Decimal {
    Decimal::new(55, 2) // 0.55
}

fn default_balanced_vip_loan_ltv() -> Decimal {
    Decimal::new(60, 2) // 0.60
}

fn default_max_vip_loan_ltv() -> Decimal {
    Decimal::new(65, 2) // 0.65
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("GUARDIAN"),
            )
            .build()
            .context("failed to build configuration")?;

        config
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.exchange.api_key.is_empty() && !self.exchange.secret_key.is_empty(),
            "exchange credentials must be set"
        );

        anyhow::ensure!(
            self.pm_risk.min_uni_mmr < self.pm_risk.balanced_uni_mmr
                && self.pm_risk.balanced_uni_mmr < self.pm_risk.max_uni_mmr,
            "pm_risk uni_mmr band must be strictly increasing (min < balanced < max)"
        );

        anyhow::ensure!(
            self.pm_risk.min_vip_loan_ltv < self.pm_risk.balanced_vip_loan_ltv
                && self.pm_risk.balanced_vip_loan_ltv < self.pm_risk.max_vip_loan_ltv,
            "pm_risk vip_loan_ltv band must be strictly increasing (min < balanced < max)"
        );

        anyhow::ensure!(
            self.runtime.poll_period_secs > 0,
            "poll_period_secs must be positive"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig {
                api_key: String::new(),
                secret_key: String::new(),
                testnet: true,
            },
            pm_risk: PmRiskConfig {
                min_uni_mmr: default_min_uni_mmr(),
                balanced_uni_mmr: default_balanced_uni_mmr(),
                max_uni_mmr: default_max_uni_mmr(),
                min_vip_loan_ltv: default_min_vip_loan_ltv(),
                balanced_vip_loan_ltv: default_balanced_vip_loan_ltv(),
                max_vip_loan_ltv: default_max_vip_loan_ltv(),
            },
            runtime: RuntimeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation_without_credentials() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_config_with_credentials_is_valid() {
        let mut config = Config::default();
        config.exchange.api_key = "key".to_string();
        config.exchange.secret_key = "secret".to_string();
        assert!(config.validate().is_ok());
    }
}
