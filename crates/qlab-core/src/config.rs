use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metric::Metric;
use crate::params::{ParamRange, Params};

/// Top-level config, parsed from one or more TOML files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub strategy: StrategySection,
    #[serde(default)]
    pub optimization: OptimizationConfig,
    #[serde(default)]
    pub genetic: GeneticConfig,
    #[serde(default)]
    pub walk_forward: WalkForwardSection,
    #[serde(default)]
    pub monte_carlo: MonteCarloConfig,
}

impl AppConfig {
    /// Load config from a TOML file path.
    pub fn from_toml(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse config from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load and merge multiple TOML files (later files override earlier).
    pub fn from_toml_files(paths: &[&Path]) -> Result<Self, ConfigError> {
        let (first, rest) = paths
            .split_first()
            .ok_or_else(|| ConfigError::Invalid("no config files provided".into()))?;

        let mut base: toml::Value = toml::from_str(&std::fs::read_to_string(first)?)?;
        for path in rest {
            let overlay: toml::Value = toml::from_str(&std::fs::read_to_string(path)?)?;
            merge_toml(&mut base, overlay);
        }

        Ok(base.try_into()?)
    }

    /// Walk-forward config with the shared optimization section filled in.
    pub fn walk_forward_config(&self) -> WalkForwardConfig {
        WalkForwardConfig {
            window_type: self.walk_forward.window_type,
            train_ratio: self.walk_forward.train_ratio,
            num_windows: self.walk_forward.num_windows,
            optimization: self.optimization.clone(),
        }
    }
}

fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    if let (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) = (base, overlay) {
        for (key, value) in overlay_table {
            if let Some(base_value) = base_table.get_mut(&key) {
                if base_value.is_table() && value.is_table() {
                    merge_toml(base_value, value);
                    continue;
                }
            }
            base_table.insert(key, value);
        }
    }
}

/// Account and execution-cost settings for one engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_10000")]
    pub initial_capital: f64,
    /// Fraction of notional charged on entry and again on exit.
    #[serde(default)]
    pub commission: f64,
    /// Slippage in pips, applied against the trader on signal fills.
    #[serde(default)]
    pub slippage: f64,
    /// Price value of one pip.
    #[serde(default = "default_0_01")]
    pub pip_size: f64,
    #[serde(default = "default_1")]
    pub leverage: f64,
    /// Fraction of equity a single position may commit (before leverage).
    #[serde(default = "default_1")]
    pub max_position_size: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            commission: 0.0,
            slippage: 0.0,
            pip_size: 0.01,
            leverage: 1.0,
            max_position_size: 1.0,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.initial_capital > 0.0) {
            return Err(ConfigError::Invalid("initial_capital must be > 0".into()));
        }
        let non_negative = |x: f64| x >= 0.0 && x.is_finite();
        if !non_negative(self.commission)
            || !non_negative(self.slippage)
            || !non_negative(self.pip_size)
        {
            return Err(ConfigError::Invalid(
                "commission, slippage and pip_size must be finite and non-negative".into(),
            ));
        }
        if !(self.leverage > 0.0) || !(self.max_position_size > 0.0) {
            return Err(ConfigError::Invalid(
                "leverage and max_position_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Slippage converted from pips to price units.
    #[inline]
    pub fn slippage_price(&self) -> f64 {
        self.slippage * self.pip_size
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySection {
    #[serde(default = "default_strategy")]
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            name: default_strategy(),
            params: Params::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    #[serde(default)]
    pub param_ranges: BTreeMap<String, ParamRange>,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_true")]
    pub maximize: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            param_ranges: BTreeMap::new(),
            metric: Metric::SharpeRatio,
            maximize: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneticConfig {
    #[serde(default = "default_50")]
    pub population_size: usize,
    #[serde(default = "default_30")]
    pub generations: usize,
    #[serde(default = "default_2")]
    pub elite_count: usize,
    #[serde(default = "default_3")]
    pub tournament_size: usize,
    #[serde(default = "default_0_8")]
    pub crossover_rate: f64,
    #[serde(default = "default_0_1")]
    pub mutation_rate: f64,
    /// Generations without improvement before stopping early.
    #[serde(default = "default_10")]
    pub stagnation_limit: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            generations: 30,
            elite_count: 2,
            tournament_size: 3,
            crossover_rate: 0.8,
            mutation_rate: 0.1,
            stagnation_limit: 10,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    #[default]
    Rolling,
    Anchored,
}

/// The `[walk_forward]` TOML section; the optimization part is shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardSection {
    #[serde(default)]
    pub window_type: WindowType,
    #[serde(default = "default_0_7")]
    pub train_ratio: f64,
    #[serde(default = "default_5")]
    pub num_windows: usize,
}

impl Default for WalkForwardSection {
    fn default() -> Self {
        Self {
            window_type: WindowType::Rolling,
            train_ratio: 0.7,
            num_windows: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub window_type: WindowType,
    pub train_ratio: f64,
    pub num_windows: usize,
    pub optimization: OptimizationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    #[serde(default = "default_1000")]
    pub simulations: usize,
    #[serde(default = "default_10000")]
    pub initial_capital: f64,
    /// Drawdown fraction (0..1) that counts as ruin.
    #[serde(default = "default_0_5")]
    pub ruin_threshold: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            simulations: 1000,
            initial_capital: 10_000.0,
            ruin_threshold: 0.5,
            seed: 42,
        }
    }
}

// Default value helpers
fn default_true() -> bool { true }
fn default_2() -> usize { 2 }
fn default_3() -> usize { 3 }
fn default_5() -> usize { 5 }
fn default_10() -> usize { 10 }
fn default_30() -> usize { 30 }
fn default_50() -> usize { 50 }
fn default_1000() -> usize { 1000 }
fn default_seed() -> u64 { 42 }
fn default_0_01() -> f64 { 0.01 }
fn default_0_1() -> f64 { 0.1 }
fn default_0_5() -> f64 { 0.5 }
fn default_0_7() -> f64 { 0.7 }
fn default_0_8() -> f64 { 0.8 }
fn default_1() -> f64 { 1.0 }
fn default_10000() -> f64 { 10_000.0 }
fn default_strategy() -> String { "sma_crossover".into() }

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[backtest]
initial_capital = 25000.0
commission = 0.001
slippage = 2.0

[strategy]
name = "rsi_reversion"

[strategy.params]
period = 14.0
oversold = 25.0

[optimization]
metric = "profit_factor"
maximize = true

[optimization.param_ranges.period]
min = 7.0
max = 21.0
step = 7.0

[walk_forward]
window_type = "anchored"
num_windows = 4

[monte_carlo]
simulations = 500
ruin_threshold = 0.3
"#;

        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert!((config.backtest.initial_capital - 25_000.0).abs() < 1e-10);
        assert!((config.backtest.slippage_price() - 0.02).abs() < 1e-12);
        assert!((config.backtest.leverage - 1.0).abs() < 1e-10);
        assert_eq!(config.strategy.name, "rsi_reversion");
        assert_eq!(config.strategy.params.get("oversold"), Some(&25.0));
        assert_eq!(config.optimization.metric, Metric::ProfitFactor);
        assert_eq!(config.optimization.param_ranges["period"].count(), 3);
        assert_eq!(config.walk_forward.window_type, WindowType::Anchored);
        assert!((config.walk_forward.train_ratio - 0.7).abs() < 1e-10);
        assert_eq!(config.monte_carlo.simulations, 500);
        assert_eq!(config.genetic, GeneticConfig::default());

        let wf = config.walk_forward_config();
        assert_eq!(wf.num_windows, 4);
        assert_eq!(wf.optimization.metric, Metric::ProfitFactor);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.backtest, BacktestConfig::default());
        assert_eq!(config.strategy.name, "sma_crossover");
        assert!(config.optimization.maximize);
        assert_eq!(config.monte_carlo, MonteCarloConfig::default());
    }

    #[test]
    fn test_merge_toml_overrides_nested() {
        let mut base: toml::Value =
            toml::from_str("[backtest]\ninitial_capital = 1.0\ncommission = 0.5\n").unwrap();
        let overlay: toml::Value = toml::from_str("[backtest]\ncommission = 0.1\n").unwrap();
        merge_toml(&mut base, overlay);
        let config: AppConfig = base.try_into().unwrap();
        assert!((config.backtest.initial_capital - 1.0).abs() < 1e-12);
        assert!((config.backtest.commission - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_backtest_config_validate() {
        assert!(BacktestConfig::default().validate().is_ok());
        let bad = BacktestConfig {
            initial_capital: 0.0,
            ..BacktestConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad_leverage = BacktestConfig {
            leverage: 0.0,
            ..BacktestConfig::default()
        };
        assert!(bad_leverage.validate().is_err());
    }

    #[test]
    fn test_backtest_config_rejects_nan_costs() {
        for config in [
            BacktestConfig {
                commission: f64::NAN,
                ..BacktestConfig::default()
            },
            BacktestConfig {
                slippage: f64::NAN,
                ..BacktestConfig::default()
            },
            BacktestConfig {
                pip_size: f64::NAN,
                ..BacktestConfig::default()
            },
            BacktestConfig {
                commission: f64::INFINITY,
                ..BacktestConfig::default()
            },
        ] {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }
}
