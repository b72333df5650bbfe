//! Layered configuration loading utilities.

use std::path::Path;

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use quantra_risk::RiskLimits;
use quantra_strategy::{AdverseConfig, ArbConfig, ObiConfig, PairsConfig, VolConfig};

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Everything the coordinator needs to assemble the decision core.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub strategies: StrategySet,
    pub risk: RiskLimits,
    pub sizing: SizingConfig,
}

/// Per-strategy enable flags and tuning blocks.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StrategySet {
    pub enable_obi: bool,
    pub enable_latency_arb: bool,
    pub enable_pairs: bool,
    pub enable_adverse_filter: bool,
    pub enable_vol_regime: bool,

    pub obi: ObiConfig,
    pub latency_arb: ArbConfig,
    /// One entry per traded pair.
    pub pairs: Vec<PairsConfig>,
    pub adverse: AdverseConfig,
    pub vol_regime: VolConfig,
    /// Symbols that get a volatility-regime instance each.
    pub vol_symbols: Vec<String>,
}

impl Default for StrategySet {
    fn default() -> Self {
        Self {
            enable_obi: true,
            enable_latency_arb: true,
            enable_pairs: true,
            enable_adverse_filter: true,
            enable_vol_regime: true,
            obi: ObiConfig::default(),
            latency_arb: ArbConfig::default(),
            pairs: vec![PairsConfig::default()],
            adverse: AdverseConfig::default(),
            vol_regime: VolConfig::default(),
            vol_symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        }
    }
}

/// Per-strategy notional policy used when sizing candidates.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    pub obi_notional_usd: f64,
    pub vol_regime_notional_usd: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            obi_notional_usd: 3_000.0,
            vol_regime_notional_usd: 4_000.0,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `QUANTRA_`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    let base_path = Path::new("config");

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(false));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }
    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));
    builder = builder.add_source(
        Environment::with_prefix("QUANTRA")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_every_strategy() {
        let config = EngineConfig::default();
        assert!(config.strategies.enable_obi);
        assert!(config.strategies.enable_latency_arb);
        assert!(config.strategies.enable_pairs);
        assert!(config.strategies.enable_adverse_filter);
        assert!(config.strategies.enable_vol_regime);
        assert_eq!(config.strategies.pairs.len(), 1);
        assert!(config.risk.validate().is_ok());
    }

    #[test]
    fn partial_toml_overlays_defaults() {
        let raw = r#"
            [strategies]
            enable_latency_arb = false

            [strategies.obi]
            num_levels = 8
            imbalance_threshold = 0.4

            [risk]
            max_daily_loss = 2500.0
        "#;
        let config: EngineConfig = toml::from_str(raw).expect("valid overlay");
        assert!(!config.strategies.enable_latency_arb);
        assert!(config.strategies.enable_obi, "untouched flag keeps default");
        assert_eq!(config.strategies.obi.num_levels, 8);
        assert_eq!(config.strategies.obi.imbalance_threshold, 0.4);
        assert_eq!(config.risk.max_daily_loss, 2_500.0);
        assert_eq!(config.risk.max_order_notional, 10_000.0);
    }

    #[test]
    fn pair_list_round_trips() {
        let raw = r#"
            [[strategies.pairs]]
            symbol1 = "SOLUSDT"
            symbol2 = "BTCUSDT"
            lookback = 300

            [[strategies.pairs]]
            symbol1 = "ETHUSDT"
            symbol2 = "BTCUSDT"
        "#;
        let config: EngineConfig = toml::from_str(raw).expect("valid pairs");
        assert_eq!(config.strategies.pairs.len(), 2);
        assert_eq!(config.strategies.pairs[0].symbol1, "SOLUSDT");
        assert_eq!(config.strategies.pairs[0].lookback, 300);
        assert_eq!(config.strategies.pairs[1].lookback, 200);
    }
}
