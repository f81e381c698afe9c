//! Layered configuration.
//!
//! Sources, lowest priority first: built-in defaults, an optional TOML file
//! (`paper-sniper.toml` in the working directory, or an explicit path), then
//! `SNIPER_`-prefixed environment variables with `__` between nested keys,
//! e.g. `SNIPER_TRADING__BUY_SIZE=0.05`.

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::jupiter::{JupiterPriceClient, JUPITER_PRICE_API, MAX_BATCH_SIZE, SOL_MINT};
use crate::execution::{EngineConfig, FeeSchedule, TakeProfitRule};
use crate::persistence::Ledger;

pub const DEFAULT_CONFIG_NAME: &str = "paper-sniper";
pub const ENV_PREFIX: &str = "SNIPER";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_filter: String,
    pub ledger: LedgerSettings,
    pub oracle: OracleSettings,
    pub trading: TradingSettings,
    pub monitor: MonitorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_filter: "paper_sniper=info".to_string(),
            ledger: LedgerSettings::default(),
            oracle: OracleSettings::default(),
            trading: TradingSettings::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub path: PathBuf,
    /// IANA zone used for the timestamp column
    pub timezone: String,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("trades.csv"),
            timezone: "Asia/Jakarta".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    pub base_url: String,
    pub base_asset: String,
    pub batch_size: usize,
    pub timeout_ms: u64,
    pub proxy_url: Option<String>,
    pub requests_per_minute: u32,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            base_url: JUPITER_PRICE_API.to_string(),
            base_asset: SOL_MINT.to_string(),
            batch_size: MAX_BATCH_SIZE,
            timeout_ms: 5000,
            proxy_url: None,
            requests_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    pub initial_balance: f64,
    pub buy_size: f64,
    pub fee_pct: f64,
    pub fixed_fee: f64,
    pub take_profit_multiplier: f64,
    pub near_target_ratio: f64,
    pub restore_balance: bool,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            initial_balance: 2.0,
            buy_size: 0.02,
            fee_pct: 0.01,
            fixed_fee: 0.0007,
            take_profit_multiplier: 2.0,
            near_target_ratio: 0.9,
            restore_balance: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
        }
    }
}

impl Settings {
    /// Load and validate settings
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let builder = Config::builder();

        let builder = match path {
            Some(p) => builder.add_source(File::from(p).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.trading;

        if !(t.buy_size > 0.0) {
            bail!("trading.buy_size must be positive, got {}", t.buy_size);
        }
        if !(0.0..1.0).contains(&t.fee_pct) {
            bail!("trading.fee_pct must be in [0, 1), got {}", t.fee_pct);
        }
        if !(t.fixed_fee >= 0.0) {
            bail!("trading.fixed_fee must not be negative, got {}", t.fixed_fee);
        }
        if !(t.take_profit_multiplier > 0.0) {
            bail!(
                "trading.take_profit_multiplier must be positive, got {}",
                t.take_profit_multiplier
            );
        }
        if !(t.near_target_ratio > 0.0 && t.near_target_ratio <= 1.0) {
            bail!(
                "trading.near_target_ratio must be in (0, 1], got {}",
                t.near_target_ratio
            );
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.oracle.batch_size) {
            bail!(
                "oracle.batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE,
                self.oracle.batch_size
            );
        }
        if self.monitor.poll_interval_ms == 0 {
            bail!("monitor.poll_interval_ms must be positive");
        }
        self.timezone()?;

        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.ledger
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Unknown ledger.timezone '{}': {}", self.ledger.timezone, e))
    }

    pub fn engine_config(&self) -> EngineConfig {
        let t = &self.trading;
        EngineConfig {
            initial_balance: t.initial_balance,
            buy_size: t.buy_size,
            fees: FeeSchedule {
                pct: t.fee_pct,
                fixed: t.fixed_fee,
            },
            take_profit: TakeProfitRule {
                multiplier: t.take_profit_multiplier,
                near_target_ratio: t.near_target_ratio,
            },
            restore_balance: t.restore_balance,
            poll_interval: Duration::from_millis(self.monitor.poll_interval_ms),
        }
    }

    pub fn ledger(&self) -> Result<Ledger> {
        Ok(Ledger::new(self.ledger.path.clone(), self.timezone()?))
    }

    pub fn price_client(&self) -> Result<JupiterPriceClient> {
        let o = &self.oracle;
        JupiterPriceClient::builder()
            .base_url(o.base_url.clone())
            .base_asset(o.base_asset.clone())
            .batch_size(o.batch_size)
            .timeout(Duration::from_millis(o.timeout_ms))
            .proxy(o.proxy_url.clone())
            .requests_per_minute(o.requests_per_minute)
            .build()
            .context("Failed to build price client")
    }
}
