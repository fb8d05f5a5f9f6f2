use crate::config::EngineConfig;
use crate::error::{KpiEngineError, Result};
use crate::schema::{FieldName, KpiStatus, PeriodRow};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

pub const LABEL_CASH_FLOW_POSITIVE: &str = "cash-flow positive";
pub const LABEL_BREAKING_EVEN: &str = "breaking even";
pub const LABEL_CASH_EXHAUSTED: &str = "cash exhausted";

/// Burn and runway after the sign and applicability rules.
///
/// Convention: burn is clamped to `>= 0` and a positive burn is a cash
/// outflow. A profitable or flat month has burn 0 and no runway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinanceOutcome {
    pub burn: Option<f64>,
    pub runway: Option<f64>,
    pub runway_status: KpiStatus,
    pub runway_label: Option<String>,
    pub warnings: Vec<String>,
}

pub fn apply_finance_rules(
    net_cash_flow: Option<f64>,
    reported_burn: Option<f64>,
    cash_balance: Option<f64>,
    config: &EngineConfig,
) -> FinanceOutcome {
    let mut warnings = Vec::new();

    let burn = match (net_cash_flow, reported_burn) {
        (Some(ncf), reported) => {
            let burn = if ncf < 0.0 { -ncf } else { 0.0 };
            if let Some(r) = reported {
                if (r.abs() - burn).abs() > 0.5 {
                    warnings.push(format!(
                        "Reported burn {:.2} disagrees with net cash flow {:.2}; using {:.2}",
                        r, ncf, burn
                    ));
                }
            }
            Some(burn)
        }
        (None, Some(r)) => {
            if r < 0.0 {
                warnings.push(format!(
                    "Reported burn {:.2} was negative; sign corrected to {:.2}",
                    r,
                    r.abs()
                ));
            }
            Some(r.abs())
        }
        (None, None) => None,
    };

    let (runway, runway_status, runway_label) = match burn {
        None => (None, KpiStatus::Missing, None),
        Some(b) if b <= 0.0 => {
            let label = match net_cash_flow {
                Some(ncf) if ncf > 0.0 => LABEL_CASH_FLOW_POSITIVE,
                _ => LABEL_BREAKING_EVEN,
            };
            (None, KpiStatus::NotApplicable, Some(label.to_string()))
        }
        Some(b) => match cash_balance {
            None => (None, KpiStatus::Missing, None),
            Some(cash) if cash <= 0.0 => {
                warnings.push(format!(
                    "Burning {:.2} per month with cash balance {:.2}; runway not computed",
                    b, cash
                ));
                (None, KpiStatus::Missing, Some(LABEL_CASH_EXHAUSTED.to_string()))
            }
            Some(cash) => {
                let mut months = cash / b;
                if months > config.technical_runway_cap_months {
                    warnings.push(format!(
                        "Runway {:.1} months capped at {:.0}",
                        months, config.technical_runway_cap_months
                    ));
                    months = config.technical_runway_cap_months;
                }
                (Some(months), KpiStatus::Active, None)
            }
        },
    };

    FinanceOutcome {
        burn,
        runway,
        runway_status,
        runway_label,
        warnings,
    }
}

/// Applies the finance rules to a row in place.
///
/// A reported runway survives only while burn is unknown, so the derived
/// metrics step can still back out burn from it.
pub fn apply_to_row(row: &mut PeriodRow, config: &EngineConfig) {
    if let Some(reported) = row.get(FieldName::RunwayMonths) {
        if reported <= 0.0 {
            row.warnings.push(format!(
                "Reported runway {:.2} is not positive; dropped",
                reported
            ));
            row.set(FieldName::RunwayMonths, None);
        }
    }

    let outcome = apply_finance_rules(
        row.net_cash_flow,
        row.get(FieldName::BurnRate),
        row.get(FieldName::CashBalance),
        config,
    );

    if outcome.burn.is_some() {
        if row.get(FieldName::BurnRate).is_none() {
            row.derived.insert(FieldName::BurnRate);
        }
        row.set(FieldName::BurnRate, outcome.burn);
    }

    let overwrite_runway = match outcome.runway_status {
        KpiStatus::Active | KpiStatus::NotApplicable => true,
        _ => outcome.runway_label.is_some(),
    };
    if overwrite_runway {
        let previous = row.get(FieldName::RunwayMonths);
        let unchanged = matches!(
            (previous, outcome.runway),
            (Some(p), Some(r)) if (p - r).abs() < 1e-9
        );
        if outcome.runway.is_some() && !unchanged {
            row.derived.insert(FieldName::RunwayMonths);
        }
        row.set(FieldName::RunwayMonths, outcome.runway);
        row.runway_status = Some(outcome.runway_status);
        row.runway_label = outcome.runway_label;
    } else if row.get(FieldName::RunwayMonths).is_some() {
        row.runway_status = Some(KpiStatus::Active);
    } else if row.runway_status == Some(KpiStatus::NotApplicable) {
        row.runway_status = Some(KpiStatus::Missing);
        row.runway_label = None;
    }

    for warning in outcome.warnings {
        if !row.warnings.contains(&warning) {
            debug!("{}: {}", row.period_date, warning);
            row.warnings.push(warning);
        }
    }
}

/// The figures the invariant check looks at.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FinanceMetrics {
    pub net_cash_flow: Option<f64>,
    pub burn_rate: Option<f64>,
    pub runway_months: Option<f64>,
    pub runway_status: Option<KpiStatus>,
}

impl FinanceMetrics {
    pub fn from_row(row: &PeriodRow) -> Self {
        Self {
            net_cash_flow: row.net_cash_flow,
            burn_rate: row.get(FieldName::BurnRate),
            runway_months: row.get(FieldName::RunwayMonths),
            runway_status: row.runway_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn into_result(self, period: NaiveDate) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(KpiEngineError::InvariantViolation {
                period,
                errors: self.errors,
            })
        }
    }
}

/// Re-checks the finance invariants after the fact.
pub fn validate(metrics: &FinanceMetrics) -> ValidationResult {
    let mut errors = Vec::new();

    if let (Some(burn), Some(ncf)) = (metrics.burn_rate, metrics.net_cash_flow) {
        if burn > 0.0 && ncf > 0.0 {
            errors.push(format!(
                "positive burn {:.2} with positive net cash flow {:.2}",
                burn, ncf
            ));
        }
    }

    if let Some(runway) = metrics.runway_months {
        if let Some(burn) = metrics.burn_rate {
            if burn <= 0.0 {
                errors.push(format!(
                    "runway {:.2} reported while burn is {:.2}",
                    runway, burn
                ));
            }
        }
        if runway <= 0.0 || !runway.is_finite() {
            errors.push(format!("runway {:.2} is not a positive number", runway));
        }
    }

    if metrics.runway_status == Some(KpiStatus::NotApplicable) {
        if let Some(burn) = metrics.burn_rate.filter(|b| *b > 0.0) {
            errors.push(format!(
                "runway marked not applicable while burning {:.2}",
                burn
            ));
        }
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}
