use crate::config::EngineConfig;
use crate::schema::{ArrMethod, Confidence, FieldName, KpiSnapshot, KpiSource, KpiStatus, KpiValue};
use crate::utils::is_consecutive_month;
use log::debug;

/// Sets ARR on every snapshot whose ARR was not reported.
///
/// With a full trailing window of consecutive months of known MRR and no
/// structural break inside it, ARR is the observed average × 12. Otherwise it
/// falls back to the current run rate. Snapshots must be sorted by period.
pub fn classify_arr(snapshots: &mut [KpiSnapshot], config: &EngineConfig) {
    for idx in 0..snapshots.len() {
        if snapshots[idx]
            .kpi(FieldName::Arr)
            .map(|k| k.is_reported())
            .unwrap_or(false)
        {
            snapshots[idx].arr_method = None;
            continue;
        }
        let Some(mrr) = snapshots[idx].value(FieldName::Mrr) else {
            continue;
        };

        let window = trailing_window(snapshots, idx, config.arr_observed_window);
        let stable = window.len() == config.arr_observed_window
            && !has_structural_break(&window, config.structural_break_pct);

        let (method, arr) = if stable {
            let mean = window.iter().sum::<f64>() / window.len() as f64;
            (
                ArrMethod::Observed {
                    months_used: window.len(),
                },
                mean * 12.0,
            )
        } else {
            (ArrMethod::RunRate, mrr * 12.0)
        };

        debug!(
            "{}: ARR {:.2} via {:?}",
            snapshots[idx].period_date, arr, method
        );

        let snapshot = &mut snapshots[idx];
        let updated_at = snapshot.kpi(FieldName::Mrr).and_then(|k| k.updated_at);
        snapshot.kpis.insert(
            FieldName::Arr,
            KpiValue {
                value: Some(arr),
                source: KpiSource::Computed,
                updated_at,
                status: Some(KpiStatus::Derived),
                label: None,
                confidence: Some(Confidence::Medium),
            },
        );
        snapshot.arr_method = Some(method);
    }
}

/// MRR values of up to `size` consecutive months ending at `idx`, oldest first.
fn trailing_window(snapshots: &[KpiSnapshot], idx: usize, size: usize) -> Vec<f64> {
    let mut window = Vec::with_capacity(size);
    let mut cursor = idx;
    loop {
        let Some(mrr) = snapshots[cursor].value(FieldName::Mrr) else {
            break;
        };
        window.push(mrr);
        if window.len() == size || cursor == 0 {
            break;
        }
        if !is_consecutive_month(snapshots[cursor - 1].period_date, snapshots[cursor].period_date) {
            break;
        }
        cursor -= 1;
    }
    window.reverse();
    window
}

fn has_structural_break(window: &[f64], threshold_pct: f64) -> bool {
    window.windows(2).any(|pair| {
        let (prev, current) = (pair[0], pair[1]);
        if prev <= 0.0 {
            return true;
        }
        ((current - prev) / prev * 100.0).abs() > threshold_pct
    })
}
