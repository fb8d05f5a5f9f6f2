use crate::error::{KpiEngineError, Result};
use serde::{Deserialize, Serialize};

/// Tunable thresholds for the normalization pipeline.
///
/// Every field has a default, so a partial JSON document (or `{}`) is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ceiling applied by the finance rules when runway is first computed.
    pub technical_runway_cap_months: f64,
    /// Tighter ceiling applied by the sanity post-processor.
    pub sanity_runway_cap_months: f64,
    /// Growth series with a standard deviation above this (in percent points) is volatile.
    pub growth_volatility_stddev: f64,
    /// Month-over-month MRR change (percent) that breaks an observed ARR window.
    pub structural_break_pct: f64,
    /// Number of trailing months averaged for an observed ARR.
    pub arr_observed_window: usize,
    /// Negative net-cash-flow periods needed before a zero burn is distrusted.
    pub min_negative_periods: usize,
    /// Negative periods needed before the burn proxy uses the median.
    pub median_min_periods: usize,
    /// Consecutive rows without a period marker that end the data region.
    pub max_consecutive_blank_periods: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            technical_runway_cap_months: 999.0,
            sanity_runway_cap_months: 36.0,
            growth_volatility_stddev: 15.0,
            structural_break_pct: 50.0,
            arr_observed_window: 3,
            min_negative_periods: 2,
            median_min_periods: 3,
            max_consecutive_blank_periods: 2,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sanity_runway_cap_months > 0.0) {
            return Err(KpiEngineError::InvalidConfig(format!(
                "sanity_runway_cap_months must be positive, got {}",
                self.sanity_runway_cap_months
            )));
        }

        if self.technical_runway_cap_months < self.sanity_runway_cap_months {
            return Err(KpiEngineError::InvalidConfig(format!(
                "technical_runway_cap_months ({}) must not be below sanity_runway_cap_months ({})",
                self.technical_runway_cap_months, self.sanity_runway_cap_months
            )));
        }

        if !(self.growth_volatility_stddev >= 0.0) {
            return Err(KpiEngineError::InvalidConfig(format!(
                "growth_volatility_stddev must be non-negative, got {}",
                self.growth_volatility_stddev
            )));
        }

        if !(self.structural_break_pct > 0.0) {
            return Err(KpiEngineError::InvalidConfig(format!(
                "structural_break_pct must be positive, got {}",
                self.structural_break_pct
            )));
        }

        if self.arr_observed_window < 2 {
            return Err(KpiEngineError::InvalidConfig(format!(
                "arr_observed_window must be at least 2, got {}",
                self.arr_observed_window
            )));
        }

        if self.min_negative_periods == 0 || self.median_min_periods == 0 {
            return Err(KpiEngineError::InvalidConfig(
                "min_negative_periods and median_min_periods must be at least 1".to_string(),
            ));
        }

        if self.max_consecutive_blank_periods == 0 {
            return Err(KpiEngineError::InvalidConfig(
                "max_consecutive_blank_periods must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
