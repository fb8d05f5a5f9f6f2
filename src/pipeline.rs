use crate::arr::classify_arr;
use crate::column_mapper::ColumnMapper;
use crate::config::EngineConfig;
use crate::derived::{fill_series, refresh_series_growth};
use crate::error::Result;
use crate::finance_rules::{apply_to_row, validate, FinanceMetrics};
use crate::merger::SourceMerger;
use crate::sanity::{post_process, Evidence};
use crate::schema::{
    CollectionMethod, ColumnMappingHint, Confidence, FieldName, Grid, KpiSeries, KpiSnapshot,
    KpiSource, KpiStatus, KpiValue, ManualEntry, PeriodRow, ProcessorPeriod, RowMeta,
};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Proposes how a grid is laid out. Implementations may be wrong; every
/// proposal is validated before a single number is read.
pub trait SemanticInterpreter: Send + Sync {
    fn propose_mapping(&self, grid: &Grid) -> Result<ColumnMappingHint>;
}

/// Always proposes the same hint.
#[derive(Debug, Clone)]
pub struct StaticInterpreter {
    hint: ColumnMappingHint,
}

impl StaticInterpreter {
    pub fn new(hint: ColumnMappingHint) -> Self {
        Self { hint }
    }
}

impl SemanticInterpreter for StaticInterpreter {
    fn propose_mapping(&self, _grid: &Grid) -> Result<ColumnMappingHint> {
        Ok(self.hint.clone())
    }
}

/// Replays a hint captured in the interpreter's JSON wire format.
#[derive(Debug, Clone)]
pub struct JsonHintInterpreter {
    json: String,
}

impl JsonHintInterpreter {
    pub fn new(json: impl Into<String>) -> Self {
        Self { json: json.into() }
    }
}

impl SemanticInterpreter for JsonHintInterpreter {
    fn propose_mapping(&self, _grid: &Grid) -> Result<ColumnMappingHint> {
        ColumnMappingHint::from_json_str(&self.json)
    }
}

/// External services the pipeline depends on, passed in per call.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub interpreter: &'a dyn SemanticInterpreter,
}

impl<'a> Collaborators<'a> {
    pub fn new(interpreter: &'a dyn SemanticInterpreter) -> Self {
        Self { interpreter }
    }
}

/// Everything known about one company for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyInput {
    pub company_id: String,
    #[serde(default)]
    pub grid: Grid,
    #[serde(default)]
    pub processor: Vec<ProcessorPeriod>,
    #[serde(default)]
    pub processor_method: CollectionMethod,
    #[serde(default)]
    pub manual: Vec<ManualEntry>,
}

impl CompanyInput {
    pub fn new(company_id: impl Into<String>, grid: Grid) -> Self {
        Self {
            company_id: company_id.into(),
            grid,
            ..Default::default()
        }
    }

    pub fn with_processor(mut self, method: CollectionMethod, periods: Vec<ProcessorPeriod>) -> Self {
        self.processor_method = method;
        self.processor = periods;
        self
    }

    pub fn with_manual(mut self, entries: Vec<ManualEntry>) -> Self {
        self.manual = entries;
        self
    }
}

pub struct KpiPipeline {
    config: EngineConfig,
}

impl KpiPipeline {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, input: &CompanyInput, collaborators: &Collaborators) -> Result<KpiSeries> {
        self.run_at(input, collaborators, Utc::now())
    }

    /// Runs one company with a fixed `updated_at` stamp.
    pub fn run_at(
        &self,
        input: &CompanyInput,
        collaborators: &Collaborators,
        updated_at: DateTime<Utc>,
    ) -> Result<KpiSeries> {
        info!("Processing KPIs for company: {}", input.company_id);

        let mut warnings = Vec::new();
        let (sheet_rows, evidence) = self.read_sheet(input, collaborators, &mut warnings);
        debug!(
            "{}: {} sheet periods, {} processor periods, {} manual entries",
            input.company_id,
            sheet_rows.len(),
            input.processor.len(),
            input.manual.len()
        );

        let (mut snapshots, flows) = self.merge_sources(input, &sheet_rows, updated_at);
        refresh_series_growth(&mut snapshots, updated_at);
        classify_arr(&mut snapshots, &self.config);

        let rows: Vec<PeriodRow> = snapshots
            .iter()
            .map(|snapshot| self.reconcile(snapshot, flows.get(&snapshot.period_date).copied()))
            .collect();

        let processed = post_process(rows, &evidence, &self.config);
        warnings.extend(processed.warnings);

        for row in &processed.rows {
            let result = validate(&FinanceMetrics::from_row(row));
            if !result.valid {
                warn!(
                    "{} {}: invariant check failed: {}",
                    input.company_id,
                    row.period_date,
                    result.errors.join("; ")
                );
            }
            result.into_result(row.period_date)?;
        }

        for (snapshot, (row, meta)) in snapshots
            .iter_mut()
            .zip(processed.rows.iter().zip(&processed.row_meta))
        {
            apply_row(snapshot, row, meta, updated_at);
        }

        info!(
            "Finished {}: {} periods, {} warnings",
            input.company_id,
            snapshots.len(),
            warnings.len()
        );

        Ok(KpiSeries {
            company_id: input.company_id.clone(),
            snapshots,
            row_meta: processed.row_meta,
            warnings,
        })
    }

    /// Runs independent companies on scoped threads. Results keep input order.
    pub fn run_many(
        &self,
        inputs: &[CompanyInput],
        collaborators: &Collaborators,
    ) -> Vec<Result<KpiSeries>> {
        let updated_at = Utc::now();
        std::thread::scope(|scope| {
            let handles: Vec<_> = inputs
                .iter()
                .map(|input| scope.spawn(move || self.run_at(input, collaborators, updated_at)))
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                })
                .collect()
        })
    }

    fn read_sheet(
        &self,
        input: &CompanyInput,
        collaborators: &Collaborators,
        warnings: &mut Vec<String>,
    ) -> (Vec<PeriodRow>, Evidence) {
        if input.grid.is_empty() {
            debug!("{}: no sheet grid supplied", input.company_id);
            return (Vec::new(), Evidence::default());
        }

        let hint = match collaborators.interpreter.propose_mapping(&input.grid) {
            Ok(hint) => hint,
            Err(e) => {
                warn!("{}: interpreter failed: {}", input.company_id, e);
                warnings.push(format!("Sheet ignored: {}", e));
                return (Vec::new(), Evidence::default());
            }
        };

        let mapped = ColumnMapper::new(&input.grid, &self.config).map(&hint);
        warnings.extend(mapped.rejections);

        let Some(mapping) = mapped.mapping else {
            return (Vec::new(), Evidence::default());
        };
        let evidence = Evidence::from_grid(&input.grid, mapping.header_row);

        let mut rows = mapped.rows;
        for row in rows.iter_mut() {
            apply_to_row(row, &self.config);
        }
        (fill_series(&rows, &self.config), evidence)
    }

    fn merge_sources(
        &self,
        input: &CompanyInput,
        sheet_rows: &[PeriodRow],
        updated_at: DateTime<Utc>,
    ) -> (Vec<KpiSnapshot>, BTreeMap<NaiveDate, f64>) {
        let periods: BTreeSet<NaiveDate> = sheet_rows
            .iter()
            .map(|row| row.period_date)
            .chain(input.processor.iter().map(|p| p.period_date))
            .chain(input.manual.iter().map(|m| m.period_date))
            .collect();

        let merger = SourceMerger::new(input.company_id.clone(), input.processor_method, updated_at);
        let mut flows = BTreeMap::new();
        let snapshots = periods
            .into_iter()
            .map(|period| {
                let sheet = sheet_rows.iter().find(|row| row.period_date == period);
                let processor = input.processor.iter().find(|p| p.period_date == period);
                if let Some(ncf) = merger.net_cash_flow(period, sheet, processor, &input.manual) {
                    flows.insert(period, ncf);
                }
                merger.merge_with_manual(period, sheet, processor, &input.manual)
            })
            .collect();
        (snapshots, flows)
    }

    /// Re-applies the finance rules to a merged snapshot. Manual values are
    /// restored afterwards; they only yield to the invariant checks.
    fn reconcile(&self, snapshot: &KpiSnapshot, net_cash_flow: Option<f64>) -> PeriodRow {
        let mut row = PeriodRow::new(snapshot.period_date);
        let mut manual = Vec::new();

        for (field, kpi) in &snapshot.kpis {
            row.set(*field, kpi.value);
            if kpi.value.is_some() && kpi.source == KpiSource::Computed {
                row.derived.insert(*field);
            }
            if let (Some(value), KpiSource::Manual) = (kpi.value, kpi.source) {
                manual.push((*field, value));
            }
        }

        if let Some(runway) = snapshot.kpi(FieldName::RunwayMonths) {
            row.runway_status = runway.status;
            row.runway_label = runway.label.clone();
        }

        let manual_burn = manual.iter().any(|(f, _)| *f == FieldName::BurnRate);
        row.net_cash_flow = if manual_burn { None } else { net_cash_flow };

        apply_to_row(&mut row, &self.config);

        for (field, value) in manual {
            row.set(field, Some(value));
            row.derived.remove(&field);
            if field == FieldName::RunwayMonths {
                row.runway_status = Some(KpiStatus::Active);
                row.runway_label = None;
            }
        }
        row
    }
}

/// Copies corrected values and downgraded confidence back onto a snapshot.
fn apply_row(snapshot: &mut KpiSnapshot, row: &PeriodRow, meta: &RowMeta, updated_at: DateTime<Utc>) {
    for field in FieldName::KPI_FIELDS {
        let new_value = row.get(field);
        let field_meta = meta.field(field);
        let Some(kpi) = snapshot.kpis.get_mut(&field) else {
            continue;
        };

        let changed = match (kpi.value, new_value) {
            (Some(old), Some(new)) => (old - new).abs() > 1e-9,
            (None, None) => false,
            _ => true,
        };

        if changed {
            *kpi = match new_value {
                Some(value) => KpiValue {
                    value: Some(value),
                    source: KpiSource::Computed,
                    updated_at: Some(updated_at),
                    status: Some(KpiStatus::Derived),
                    label: None,
                    confidence: Some(Confidence::Medium),
                },
                None => KpiValue {
                    updated_at: Some(updated_at),
                    ..KpiValue::missing()
                },
            };
        }

        if field == FieldName::RunwayMonths && new_value.is_none() {
            if let Some(status) = row.runway_status {
                kpi.status = Some(status);
                kpi.label = row.runway_label.clone();
            }
        }

        if kpi.value.is_some() {
            if let Some(field_meta) = field_meta {
                let current = kpi.confidence.unwrap_or(Confidence::High);
                kpi.confidence = Some(current.capped_at(field_meta.confidence));
            }
        }
    }
}

/// Convenience wrapper over [`KpiPipeline::run`] with the default configuration.
pub fn normalize_company(input: &CompanyInput, interpreter: &dyn SemanticInterpreter) -> Result<KpiSeries> {
    let pipeline = KpiPipeline::new(EngineConfig::default())?;
    pipeline.run(input, &Collaborators::new(interpreter))
}
