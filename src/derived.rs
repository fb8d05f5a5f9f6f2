use crate::config::EngineConfig;
use crate::finance_rules::apply_to_row;
use crate::schema::{Confidence, FieldName, KpiSnapshot, KpiSource, KpiStatus, KpiValue, PeriodRow};
use crate::utils::is_consecutive_month;
use chrono::{DateTime, Utc};
use log::debug;

/// Month-over-month growth in percent. `None` unless the prior month is positive.
pub fn growth_pct(current: f64, prior: f64) -> Option<f64> {
    if prior > 0.0 && current.is_finite() {
        Some((current - prior) / prior * 100.0)
    } else {
        None
    }
}

/// Fills unknown fields of one period from the known ones.
///
/// Values that already exist are never overwritten. Every filled field is
/// recorded in `derived`. ARR is only a `mrr × 12` placeholder here; the
/// series-level ARR classification replaces it later.
pub fn fill_gaps(row: &PeriodRow, prior_mrr: Option<f64>, config: &EngineConfig) -> PeriodRow {
    let mut out = row.clone();

    if out.get(FieldName::Mrr).is_none() {
        if let Some(arr) = out.get(FieldName::Arr) {
            fill(&mut out, FieldName::Mrr, arr / 12.0);
        }
    }

    if out.get(FieldName::Arr).is_none() {
        if let Some(mrr) = out.get(FieldName::Mrr) {
            fill(&mut out, FieldName::Arr, mrr * 12.0);
        }
    }

    if out.get(FieldName::MrrGrowthMom).is_none() {
        if let (Some(mrr), Some(prior)) = (out.get(FieldName::Mrr), prior_mrr) {
            if let Some(growth) = growth_pct(mrr, prior) {
                fill(&mut out, FieldName::MrrGrowthMom, growth);
            }
        }
    }

    if out.get(FieldName::BurnRate).is_none() && out.net_cash_flow.is_none() {
        if let (Some(cash), Some(runway)) = (
            out.get(FieldName::CashBalance),
            out.get(FieldName::RunwayMonths),
        ) {
            if cash > 0.0 && runway > 0.0 {
                fill(&mut out, FieldName::BurnRate, cash / runway);
            }
        }
    }

    apply_to_row(&mut out, config);
    out
}

fn fill(row: &mut PeriodRow, field: FieldName, value: f64) {
    debug!("{}: derived {} = {:.2}", row.period_date, field, value);
    row.set(field, Some(value));
    row.derived.insert(field);
}

/// Runs `fill_gaps` over a chronologically sorted series, feeding each row
/// the MRR of the immediately preceding calendar month.
pub fn fill_series(rows: &[PeriodRow], config: &EngineConfig) -> Vec<PeriodRow> {
    let mut out: Vec<PeriodRow> = Vec::with_capacity(rows.len());
    for row in rows {
        let prior_mrr = out
            .last()
            .filter(|prev| is_consecutive_month(prev.period_date, row.period_date))
            .and_then(|prev| prev.get(FieldName::Mrr));
        out.push(fill_gaps(row, prior_mrr, config));
    }
    out
}

/// Recomputes growth on merged snapshots whose growth was not reported,
/// so it reflects the MRR that actually won the merge.
pub fn refresh_series_growth(snapshots: &mut [KpiSnapshot], updated_at: DateTime<Utc>) {
    for idx in 1..snapshots.len() {
        let (before, after) = snapshots.split_at_mut(idx);
        let prev = &before[idx - 1];
        let current = &mut after[0];

        if !is_consecutive_month(prev.period_date, current.period_date) {
            continue;
        }
        if current
            .kpi(FieldName::MrrGrowthMom)
            .map(|k| k.is_reported())
            .unwrap_or(false)
        {
            continue;
        }

        let (Some(mrr), Some(prior)) = (current.value(FieldName::Mrr), prev.value(FieldName::Mrr))
        else {
            continue;
        };

        if let Some(growth) = growth_pct(mrr, prior) {
            current.kpis.insert(
                FieldName::MrrGrowthMom,
                KpiValue {
                    value: Some(growth),
                    source: KpiSource::Computed,
                    updated_at: Some(updated_at),
                    status: Some(KpiStatus::Derived),
                    label: None,
                    confidence: Some(Confidence::Medium),
                },
            );
        }
    }
}
