//! Retrospective corrections over a whole company series.
//!
//! Runs after merging, when every period is known. Values are only added or
//! lowered and confidence is only downgraded; the audit trail lives in
//! [`RowMeta`], never in the values themselves.

use crate::config::EngineConfig;
use crate::finance_rules::{LABEL_BREAKING_EVEN, LABEL_CASH_EXHAUSTED, LABEL_CASH_FLOW_POSITIVE};
use crate::schema::{Confidence, FieldName, KpiStatus, PeriodRow, RawCell, RowMeta};
use crate::utils::{mean_and_stddev, median, months_between};
use log::{debug, info};

const ONE_OFF_MARKERS: [&str; 6] = [
    "oneoff",
    "onetime",
    "nonrecurring",
    "nonrecur",
    "exceptional",
    "extraordinary",
];

const CUSTOMER_MARKERS: [&str; 3] = ["customer", "subscriber", "client"];

pub const PROXY_MEDIAN_NEGATIVE: &str = "median negative net cash flow";
pub const PROXY_LATEST_NEGATIVE: &str = "latest negative net cash flow";
pub const PROXY_CASH_DECLINE: &str = "average monthly cash decline";
pub const PROXY_UNCORROBORATED_CHURN: &str = "uncorroborated churn";

/// Side information the corrections may consult: the labels of every
/// column in the source sheet, mapped or not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evidence {
    pub column_labels: Vec<String>,
}

impl Evidence {
    pub fn new(column_labels: Vec<String>) -> Self {
        Self { column_labels }
    }

    /// Labels from one header row of a grid.
    pub fn from_grid(grid: &[Vec<RawCell>], header_row: usize) -> Self {
        let column_labels = grid
            .get(header_row)
            .map(|row| {
                row.iter()
                    .map(|cell| cell.as_text())
                    .filter(|label| !label.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self { column_labels }
    }

    pub fn one_off_column(&self) -> Option<&str> {
        self.column_labels
            .iter()
            .find(|label| {
                let key = squash(label);
                ONE_OFF_MARKERS.iter().any(|marker| key.contains(marker))
            })
            .map(|label| label.as_str())
    }

    pub fn has_customer_column(&self) -> bool {
        self.column_labels.iter().any(|label| {
            let key = squash(label);
            CUSTOMER_MARKERS.iter().any(|marker| key.contains(marker))
        })
    }
}

fn squash(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostProcessed {
    pub rows: Vec<PeriodRow>,
    pub row_meta: Vec<RowMeta>,
    pub warnings: Vec<String>,
}

pub fn post_process(
    mut rows: Vec<PeriodRow>,
    evidence: &Evidence,
    config: &EngineConfig,
) -> PostProcessed {
    rows.sort_by_key(|row| row.period_date);

    let mut meta: Vec<RowMeta> = rows.iter().map(initial_meta).collect();
    let mut warnings = Vec::new();

    correct_zero_burn(&mut rows, &mut meta, &mut warnings, config);
    enforce_runway_applicability(&mut rows, &mut meta);
    bound_runway(&mut rows, &mut meta, config);
    enforce_runway_monotonicity(&mut rows, &mut meta);
    flag_one_off_revenue(&rows, &mut meta, &mut warnings, evidence);
    flag_volatile_growth(&rows, &mut meta, &mut warnings, config);
    check_churn_provenance(&rows, &mut meta, evidence);

    info!(
        "Sanity pass over {} periods produced {} series warnings",
        rows.len(),
        warnings.len()
    );

    PostProcessed {
        rows,
        row_meta: meta,
        warnings,
    }
}

fn initial_meta(row: &PeriodRow) -> RowMeta {
    let mut meta = RowMeta::new(row.period_date);
    for field in FieldName::KPI_FIELDS {
        if row.get(field).is_some() {
            let entry = meta.field_mut(field);
            if row.derived.contains(&field) {
                entry.downgrade(Confidence::Medium);
            }
            if let Some(source) = row.proxies.get(&field) {
                entry.mark_proxy(source.clone(), Confidence::Medium);
            }
        }
    }
    meta
}

fn push_field_warning(meta: &mut RowMeta, field: FieldName, warning: String) {
    let entry = meta.field_mut(field);
    if !entry.warnings.contains(&warning) {
        entry.warnings.push(warning);
    }
}

/// A burn of zero (or none) is not believable while the company is visibly
/// losing cash.
fn correct_zero_burn(
    rows: &mut [PeriodRow],
    meta: &mut [RowMeta],
    warnings: &mut Vec<String>,
    config: &EngineConfig,
) {
    let negatives: Vec<(usize, f64)> = rows
        .iter()
        .enumerate()
        .filter_map(|(idx, row)| row.net_cash_flow.filter(|n| *n < 0.0).map(|n| (idx, -n)))
        .collect();

    let cash: Vec<(usize, f64)> = rows
        .iter()
        .enumerate()
        .filter_map(|(idx, row)| row.get(FieldName::CashBalance).map(|c| (idx, c)))
        .collect();

    let cash_declining = cash.len() >= 2
        && cash.windows(2).all(|pair| pair[1].1 <= pair[0].1)
        && cash[cash.len() - 1].1 < cash[0].1;

    let triggered = negatives.len() >= config.min_negative_periods || cash_declining;
    if !triggered {
        return;
    }

    let proxy = if negatives.len() >= config.median_min_periods {
        let magnitudes: Vec<f64> = negatives.iter().map(|(_, m)| *m).collect();
        median(&magnitudes).map(|m| (m, PROXY_MEDIAN_NEGATIVE))
    } else if let Some((_, latest)) = negatives.last() {
        Some((*latest, PROXY_LATEST_NEGATIVE))
    } else if cash_declining {
        let (first_idx, first_cash) = cash[0];
        let (last_idx, last_cash) = cash[cash.len() - 1];
        let months = months_between(rows[first_idx].period_date, rows[last_idx].period_date);
        if months > 0 {
            Some(((first_cash - last_cash) / months as f64, PROXY_CASH_DECLINE))
        } else {
            None
        }
    } else {
        None
    };

    let Some((proxy, source)) = proxy.filter(|(value, _)| *value > 0.0 && value.is_finite())
    else {
        return;
    };

    let mut corrected = 0;
    for (row, row_meta) in rows.iter_mut().zip(meta.iter_mut()) {
        let burn_is_zero = row.get(FieldName::BurnRate).map_or(true, |b| b == 0.0);
        let own_flow_positive = row.net_cash_flow.map_or(false, |n| n >= 0.0);
        if !burn_is_zero || own_flow_positive {
            continue;
        }

        row.set(FieldName::BurnRate, Some(proxy));
        row.derived.insert(FieldName::BurnRate);
        row.proxies.insert(FieldName::BurnRate, source.to_string());
        row_meta.field_mut(FieldName::BurnRate).mark_proxy(source, Confidence::Medium);
        push_field_warning(
            row_meta,
            FieldName::BurnRate,
            format!("Burn of zero overridden with {:.2} ({})", proxy, source),
        );

        // The row is burning now, so a not-applicable runway cannot stand.
        match row.get(FieldName::CashBalance) {
            Some(cash) if cash > 0.0 => {
                let runway = (cash / proxy).min(config.sanity_runway_cap_months);
                row.set(FieldName::RunwayMonths, Some(runway));
                row.derived.insert(FieldName::RunwayMonths);
                row.runway_status = Some(KpiStatus::Active);
                row.runway_label = None;
                row.proxies.insert(FieldName::RunwayMonths, source.to_string());
                row_meta
                    .field_mut(FieldName::RunwayMonths)
                    .mark_proxy(source, Confidence::Medium);
            }
            cash => {
                row.set(FieldName::RunwayMonths, None);
                row.derived.remove(&FieldName::RunwayMonths);
                row.proxies.remove(&FieldName::RunwayMonths);
                row.runway_status = Some(KpiStatus::Missing);
                row.runway_label = cash.map(|_| LABEL_CASH_EXHAUSTED.to_string());
                row_meta.fields.remove(&FieldName::RunwayMonths);
            }
        }
        corrected += 1;
    }

    if corrected > 0 {
        debug!("Burn proxy {:.2} ({}) applied to {} periods", proxy, source, corrected);
        warnings.push(format!(
            "Cash is declining but burn was reported as zero in {} period(s); used {} of {:.2}",
            corrected, source, proxy
        ));
    }
}

fn enforce_runway_applicability(rows: &mut [PeriodRow], meta: &mut [RowMeta]) {
    for (row, row_meta) in rows.iter_mut().zip(meta.iter_mut()) {
        let Some(runway) = row.get(FieldName::RunwayMonths) else {
            continue;
        };
        let burn = row.get(FieldName::BurnRate);
        let not_burning = burn.map_or(false, |b| b <= 0.0);

        if not_burning {
            let label = match row.net_cash_flow {
                Some(n) if n > 0.0 => LABEL_CASH_FLOW_POSITIVE,
                _ => LABEL_BREAKING_EVEN,
            };
            row.set(FieldName::RunwayMonths, None);
            row.proxies.remove(&FieldName::RunwayMonths);
            row.runway_status = Some(KpiStatus::NotApplicable);
            row.runway_label = Some(label.to_string());
            row_meta.fields.remove(&FieldName::RunwayMonths);
            push_field_warning(
                row_meta,
                FieldName::RunwayMonths,
                format!("Runway {:.1} cleared: company is not burning cash", runway),
            );
        } else if runway <= 0.0 {
            row.set(FieldName::RunwayMonths, None);
            row.proxies.remove(&FieldName::RunwayMonths);
            row.runway_status = Some(KpiStatus::Missing);
            row_meta.fields.remove(&FieldName::RunwayMonths);
            push_field_warning(
                row_meta,
                FieldName::RunwayMonths,
                format!("Runway {:.1} cleared: not positive", runway),
            );
        }
    }
}

fn bound_runway(rows: &mut [PeriodRow], meta: &mut [RowMeta], config: &EngineConfig) {
    let cap = config.sanity_runway_cap_months;
    for (row, row_meta) in rows.iter_mut().zip(meta.iter_mut()) {
        if let Some(runway) = row.get(FieldName::RunwayMonths).filter(|r| *r > cap) {
            row.set(FieldName::RunwayMonths, Some(cap));
            let entry = row_meta.field_mut(FieldName::RunwayMonths);
            entry.downgrade(Confidence::Medium);
            push_field_warning(
                row_meta,
                FieldName::RunwayMonths,
                format!("Runway {:.1} months capped at {:.0}", runway, cap),
            );
        }
    }
}

/// With cash never rising, runway cannot grow either.
fn enforce_runway_monotonicity(rows: &mut [PeriodRow], meta: &mut [RowMeta]) {
    let cash: Vec<f64> = rows
        .iter()
        .filter_map(|row| row.get(FieldName::CashBalance))
        .collect();
    let non_increasing = cash.len() >= 2 && cash.windows(2).all(|pair| pair[1] <= pair[0]);
    if !non_increasing {
        return;
    }

    let mut previous: Option<f64> = None;
    for (row, row_meta) in rows.iter_mut().zip(meta.iter_mut()) {
        let Some(runway) = row.get(FieldName::RunwayMonths) else {
            continue;
        };
        match previous {
            Some(prev) if runway > prev => {
                row.set(FieldName::RunwayMonths, Some(prev));
                row_meta
                    .field_mut(FieldName::RunwayMonths)
                    .downgrade(Confidence::Medium);
                push_field_warning(
                    row_meta,
                    FieldName::RunwayMonths,
                    format!(
                        "Runway {:.1} exceeds prior {:.1} while cash is not increasing; clamped",
                        runway, prev
                    ),
                );
            }
            _ => previous = Some(runway),
        }
    }
}

fn flag_one_off_revenue(
    rows: &[PeriodRow],
    meta: &mut [RowMeta],
    warnings: &mut Vec<String>,
    evidence: &Evidence,
) {
    let Some(label) = evidence.one_off_column() else {
        return;
    };

    let warning = format!(
        "Column \"{}\" suggests one-off revenue; recurring revenue may be overstated",
        label
    );
    for (row, row_meta) in rows.iter().zip(meta.iter_mut()) {
        for field in [FieldName::Mrr, FieldName::Arr, FieldName::MrrGrowthMom] {
            if row.get(field).is_some() {
                row_meta.field_mut(field).downgrade(Confidence::Medium);
                push_field_warning(row_meta, field, warning.clone());
            }
        }
    }
    warnings.push(warning);
}

fn flag_volatile_growth(
    rows: &[PeriodRow],
    meta: &mut [RowMeta],
    warnings: &mut Vec<String>,
    config: &EngineConfig,
) {
    let growth: Vec<f64> = rows
        .iter()
        .filter_map(|row| row.get(FieldName::MrrGrowthMom))
        .collect();
    if growth.len() < 2 {
        return;
    }

    let Some((_, stddev)) = mean_and_stddev(&growth) else {
        return;
    };
    let sign_flip = growth
        .windows(2)
        .any(|pair| (pair[0] > 0.0 && pair[1] < 0.0) || (pair[0] < 0.0 && pair[1] > 0.0));

    if stddev <= config.growth_volatility_stddev && !sign_flip {
        return;
    }

    let warning = if sign_flip {
        "MRR growth changes sign across the series; growth confidence lowered".to_string()
    } else {
        format!(
            "MRR growth standard deviation {:.1} exceeds {:.1}; growth confidence lowered",
            stddev, config.growth_volatility_stddev
        )
    };
    for (row, row_meta) in rows.iter().zip(meta.iter_mut()) {
        if row.get(FieldName::MrrGrowthMom).is_some() {
            row_meta
                .field_mut(FieldName::MrrGrowthMom)
                .downgrade(Confidence::Low);
            push_field_warning(row_meta, FieldName::MrrGrowthMom, warning.clone());
        }
    }
    warnings.push(warning);
}

fn check_churn_provenance(rows: &[PeriodRow], meta: &mut [RowMeta], evidence: &Evidence) {
    let customer_column = evidence.has_customer_column();
    for (row, row_meta) in rows.iter().zip(meta.iter_mut()) {
        if row.get(FieldName::Churn).is_none() {
            continue;
        }
        let corroborated = customer_column || row.get(FieldName::Customers).is_some();
        if corroborated {
            row_meta.field_mut(FieldName::Churn).downgrade(Confidence::Medium);
        } else {
            row_meta
                .field_mut(FieldName::Churn)
                .mark_proxy(PROXY_UNCORROBORATED_CHURN, Confidence::Low);
            push_field_warning(
                row_meta,
                FieldName::Churn,
                "Churn has no customer count to corroborate it".to_string(),
            );
        }
    }
}
