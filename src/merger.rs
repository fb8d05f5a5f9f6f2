use crate::schema::{
    CollectionMethod, Confidence, FieldName, KpiSnapshot, KpiSource, KpiStatus, KpiValue,
    ManualEntry, PeriodRow, ProcessorPeriod,
};
use chrono::{DateTime, NaiveDate, Utc};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Sheet,
    Processor,
}

/// Per-field source ranking. Manual entries sit above all of these.
fn priority(field: FieldName, method: CollectionMethod) -> [Origin; 2] {
    use Origin::*;
    match field {
        FieldName::Mrr | FieldName::Arr => match method {
            CollectionMethod::Billing => [Processor, Sheet],
            CollectionMethod::Payments => [Sheet, Processor],
        },
        FieldName::MrrGrowthMom | FieldName::Customers => [Processor, Sheet],
        _ => [Sheet, Processor],
    }
}

/// Merges the sources of one period into a snapshot.
///
/// Every run starts from an empty snapshot: nothing previously persisted is
/// consulted, so stale values cannot leak into a fresh result.
#[derive(Debug, Clone)]
pub struct SourceMerger {
    company_id: String,
    method: CollectionMethod,
    updated_at: DateTime<Utc>,
}

impl SourceMerger {
    pub fn new(
        company_id: impl Into<String>,
        method: CollectionMethod,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            company_id: company_id.into(),
            method,
            updated_at,
        }
    }

    pub fn merge(
        &self,
        period_date: NaiveDate,
        sheet: Option<&PeriodRow>,
        processor: Option<&ProcessorPeriod>,
    ) -> KpiSnapshot {
        self.merge_with_manual(period_date, sheet, processor, &[])
    }

    /// Like `merge`, with manual entries outranking every other source.
    /// Entries for other periods are ignored.
    pub fn merge_with_manual(
        &self,
        period_date: NaiveDate,
        sheet: Option<&PeriodRow>,
        processor: Option<&ProcessorPeriod>,
        manual: &[ManualEntry],
    ) -> KpiSnapshot {
        let mut snapshot = KpiSnapshot::empty(self.company_id.clone(), period_date);

        for field in FieldName::KPI_FIELDS {
            let manual_value = manual
                .iter()
                .rev()
                .find(|entry| entry.period_date == period_date && entry.field == field);
            if let Some(entry) = manual_value {
                snapshot.kpis.insert(field, self.manual_value(entry.value));
                continue;
            }

            if field == FieldName::RunwayMonths {
                if let Some(row) = sheet {
                    if row.runway_status == Some(KpiStatus::NotApplicable) {
                        snapshot.kpis.insert(
                            field,
                            KpiValue::not_applicable(row.runway_label.clone(), self.updated_at),
                        );
                        continue;
                    }
                }
            }

            let winner = priority(field, self.method)
                .into_iter()
                .find_map(|origin| match origin {
                    Origin::Sheet => sheet.and_then(|row| self.sheet_value(row, field)),
                    Origin::Processor => processor.and_then(|p| self.processor_value(p, field)),
                });

            match winner {
                Some(kpi) => {
                    snapshot.kpis.insert(field, kpi);
                }
                None if field == FieldName::RunwayMonths => {
                    if let Some(label) = sheet.and_then(|row| row.runway_label.clone()) {
                        let mut kpi = KpiValue::missing();
                        kpi.label = Some(label);
                        snapshot.kpis.insert(field, kpi);
                    }
                }
                None => {}
            }
        }

        debug!(
            "Merged {} {}: {} of {} KPIs populated",
            self.company_id,
            period_date,
            snapshot.kpis.values().filter(|k| k.value.is_some()).count(),
            FieldName::KPI_FIELDS.len()
        );

        snapshot
    }

    /// Net cash flow for one period under the same ranking as the KPIs. It is
    /// never persisted; it only feeds the finance rules and the sanity pass.
    pub fn net_cash_flow(
        &self,
        period_date: NaiveDate,
        sheet: Option<&PeriodRow>,
        processor: Option<&ProcessorPeriod>,
        manual: &[ManualEntry],
    ) -> Option<f64> {
        let manual_value = manual.iter().rev().find(|entry| {
            entry.period_date == period_date && entry.field == FieldName::NetCashFlow
        });
        if let Some(entry) = manual_value {
            return Some(entry.value);
        }

        priority(FieldName::NetCashFlow, self.method)
            .into_iter()
            .find_map(|origin| match origin {
                Origin::Sheet => sheet.and_then(|row| row.net_cash_flow),
                Origin::Processor => processor
                    .and_then(|p| p.values.get(&FieldName::NetCashFlow))
                    .copied(),
            })
    }

    fn sheet_value(&self, row: &PeriodRow, field: FieldName) -> Option<KpiValue> {
        let value = row.get(field)?;
        let derived = row.derived.contains(&field);
        Some(KpiValue {
            value: Some(value),
            source: if derived {
                KpiSource::Computed
            } else {
                KpiSource::Sheet
            },
            updated_at: Some(self.updated_at),
            status: Some(if derived {
                KpiStatus::Derived
            } else {
                KpiStatus::Active
            }),
            label: None,
            confidence: Some(if derived {
                Confidence::Medium
            } else {
                Confidence::High
            }),
        })
    }

    fn processor_value(&self, period: &ProcessorPeriod, field: FieldName) -> Option<KpiValue> {
        let value = *period.values.get(&field)?;
        let estimated = self.method == CollectionMethod::Payments
            && matches!(field, FieldName::Mrr | FieldName::Arr);
        Some(KpiValue {
            value: Some(value),
            source: KpiSource::PaymentProcessor,
            updated_at: Some(self.updated_at),
            status: Some(KpiStatus::Active),
            label: None,
            confidence: Some(if estimated {
                Confidence::Medium
            } else {
                Confidence::High
            }),
        })
    }

    fn manual_value(&self, value: f64) -> KpiValue {
        KpiValue {
            value: Some(value),
            source: KpiSource::Manual,
            updated_at: Some(self.updated_at),
            status: Some(KpiStatus::Active),
            label: None,
            confidence: Some(Confidence::High),
        }
    }
}

/// One-shot merge of a sheet row and processor values for a single period.
pub fn merge(
    company_id: &str,
    period_date: NaiveDate,
    sheet: Option<&PeriodRow>,
    processor: Option<&ProcessorPeriod>,
    method: CollectionMethod,
    updated_at: DateTime<Utc>,
) -> KpiSnapshot {
    SourceMerger::new(company_id, method, updated_at).merge(period_date, sheet, processor)
}
