use crate::error::{KpiEngineError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A single spreadsheet cell as it arrives from an export or an API payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCell {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

impl RawCell {
    pub fn is_blank(&self) -> bool {
        match self {
            RawCell::Empty => true,
            RawCell::Number(_) => false,
            RawCell::Text(text) => text.trim().is_empty(),
        }
    }

    /// Text form of the cell, used for labels and period markers.
    pub fn as_text(&self) -> String {
        match self {
            RawCell::Empty => String::new(),
            RawCell::Number(n) => n.to_string(),
            RawCell::Text(text) => text.trim().to_string(),
        }
    }
}

impl From<&str> for RawCell {
    fn from(value: &str) -> Self {
        if value.trim().is_empty() {
            RawCell::Empty
        } else {
            RawCell::Text(value.to_string())
        }
    }
}

impl From<String> for RawCell {
    fn from(value: String) -> Self {
        RawCell::from(value.as_str())
    }
}

impl From<f64> for RawCell {
    fn from(value: f64) -> Self {
        RawCell::Number(value)
    }
}

pub type Grid = Vec<Vec<RawCell>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    #[schemars(description = "Monthly recurring revenue")]
    Mrr,
    #[schemars(description = "Annual recurring revenue")]
    Arr,
    #[schemars(description = "Month-over-month MRR growth in percent")]
    MrrGrowthMom,
    #[schemars(description = "Monthly net cash outflow")]
    BurnRate,
    #[schemars(description = "Cash in the bank at period end")]
    CashBalance,
    #[schemars(description = "Months of cash left at the current burn")]
    RunwayMonths,
    #[schemars(description = "Customer or revenue churn in percent")]
    Churn,
    #[schemars(description = "Active paying customers")]
    Customers,
    #[schemars(description = "Signed monthly cash change, positive is inflow. Input only.")]
    NetCashFlow,
}

impl FieldName {
    pub const ALL: [FieldName; 9] = [
        FieldName::Mrr,
        FieldName::Arr,
        FieldName::MrrGrowthMom,
        FieldName::BurnRate,
        FieldName::CashBalance,
        FieldName::RunwayMonths,
        FieldName::Churn,
        FieldName::Customers,
        FieldName::NetCashFlow,
    ];

    /// Fields that are persisted as KPIs. `NetCashFlow` only feeds the finance rules.
    pub const KPI_FIELDS: [FieldName; 8] = [
        FieldName::Mrr,
        FieldName::Arr,
        FieldName::MrrGrowthMom,
        FieldName::BurnRate,
        FieldName::CashBalance,
        FieldName::RunwayMonths,
        FieldName::Churn,
        FieldName::Customers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::Mrr => "mrr",
            FieldName::Arr => "arr",
            FieldName::MrrGrowthMom => "mrr_growth_mom",
            FieldName::BurnRate => "burn_rate",
            FieldName::CashBalance => "cash_balance",
            FieldName::RunwayMonths => "runway_months",
            FieldName::Churn => "churn",
            FieldName::Customers => "customers",
            FieldName::NetCashFlow => "net_cash_flow",
        }
    }

    pub fn is_percentage(&self) -> bool {
        matches!(self, FieldName::MrrGrowthMom | FieldName::Churn)
    }

    /// Resolves a field name proposed by an interpreter.
    ///
    /// Matching ignores case, whitespace and punctuation, so `"Burn Rate"`,
    /// `"burn-rate"` and `"burn_rate"` all resolve. Anything outside the alias
    /// table is `None`.
    pub fn from_alias(raw: &str) -> Option<FieldName> {
        let key: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(|c| c.to_lowercase())
            .collect();

        let field = match key.as_str() {
            "mrr" | "monthlyrecurringrevenue" | "monthlyrevenue" => FieldName::Mrr,
            "arr" | "annualrecurringrevenue" | "annualrunrate" => FieldName::Arr,
            "mrrgrowthmom" | "mrrgrowth" | "momgrowth" | "growthmom" | "growth"
            | "mrrgrowthrate" => FieldName::MrrGrowthMom,
            "burnrate" | "burn" | "netburn" | "monthlyburn" => FieldName::BurnRate,
            "cashbalance" | "cash" | "cashonhand" | "cashinbank" | "bankbalance" => {
                FieldName::CashBalance
            }
            "runwaymonths" | "runway" | "monthsofrunway" => FieldName::RunwayMonths,
            "churn" | "churnrate" | "customerchurn" | "revenuechurn" => FieldName::Churn,
            "customers" | "customercount" | "activecustomers" | "payingcustomers" => {
                FieldName::Customers
            }
            "netcashflow" | "ncf" | "cashflow" | "netcashchange" | "netcash" => {
                FieldName::NetCashFlow
            }
            _ => return None,
        };

        Some(field)
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column-to-field claim made by the semantic interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnClaim {
    #[schemars(description = "Zero-based column index in the grid")]
    pub column: i64,
    #[schemars(
        description = "Canonical field name: mrr, arr, mrr_growth_mom, burn_rate, cash_balance, runway_months, churn, customers or net_cash_flow"
    )]
    pub field: String,
}

/// Layout proposal from the external semantic interpreter.
///
/// Nothing in here is trusted. Indices are signed so out-of-range proposals
/// survive decoding and are rejected by the column mapper instead.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ColumnMappingHint {
    #[schemars(description = "Zero-based index of the row holding column headers")]
    pub header_row_index: i64,

    #[schemars(description = "Zero-based index of the column holding the reporting month")]
    pub month_column: Option<i64>,

    #[serde(default)]
    #[schemars(description = "Which column holds which KPI field")]
    pub claims: Vec<ColumnClaim>,

    #[serde(default)]
    #[schemars(description = "Short justifications for the chosen columns")]
    pub rationale: Vec<String>,

    #[serde(default)]
    #[schemars(description = "Columns deliberately left unmapped, with reasons")]
    pub rejected: Vec<String>,
}

impl ColumnMappingHint {
    pub fn new(header_row_index: i64, month_column: Option<i64>) -> Self {
        Self {
            header_row_index,
            month_column,
            ..Default::default()
        }
    }

    pub fn with_claim(mut self, column: i64, field: impl Into<String>) -> Self {
        self.claims.push(ColumnClaim {
            column,
            field: field.into(),
        });
        self
    }

    /// Decodes an interpreter reply. Two shapes are accepted, and may be mixed:
    ///
    /// ```json
    /// { "header_row_index": 0, "month_column": 0, "1": "mrr", "2": "burn_rate",
    ///   "mapping_rationale": ["..."], "rejected_columns": ["..."] }
    ///
    /// { "header_row_index": 0, "month_column": 0,
    ///   "claims": [{ "column": 1, "field": "mrr" }],
    ///   "rationale": ["..."], "rejected": ["..."] }
    /// ```
    ///
    /// The second is the shape described by [`ColumnMappingHint::response_schema`].
    /// Keys that are neither known metadata nor column indices are ignored, as
    /// are malformed claim entries.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            KpiEngineError::MappingRejected("mapping hint is not a JSON object".to_string())
        })?;

        let header_row_index = object
            .get("header_row_index")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| {
                KpiEngineError::MappingRejected(
                    "mapping hint has no integer header_row_index".to_string(),
                )
            })?;

        let month_column = object
            .get("month_column")
            .or_else(|| object.get("month_column_index"))
            .and_then(|v| v.as_i64());

        let mut hint = ColumnMappingHint::new(header_row_index, month_column);

        if let Some(claims) = object.get("claims").and_then(|v| v.as_array()) {
            hint.claims.extend(claims.iter().filter_map(|claim| {
                Some(ColumnClaim {
                    column: claim.get("column")?.as_i64()?,
                    field: claim.get("field")?.as_str()?.to_string(),
                })
            }));
        }

        for (key, field) in object {
            let Ok(column) = key.trim().parse::<i64>() else {
                continue;
            };
            if let Some(name) = field.as_str() {
                hint.claims.push(ColumnClaim {
                    column,
                    field: name.to_string(),
                });
            }
        }
        hint.claims.sort_by_key(|c| c.column);

        hint.rationale = string_list(
            object
                .get("mapping_rationale")
                .or_else(|| object.get("rationale")),
        );
        hint.rejected = string_list(
            object
                .get("rejected_columns")
                .or_else(|| object.get("rejected")),
        );

        Ok(hint)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_json(&value)
    }

    /// JSON schema for interpreters that support structured output.
    /// Inline only: no `$schema` or `definitions` keys.
    pub fn response_schema() -> serde_json::Result<serde_json::Value> {
        let mut settings = schemars::gen::SchemaSettings::draft07();
        settings.inline_subschemas = true;
        let generator = settings.into_generator();
        let root = generator.into_root_schema_for::<ColumnMappingHint>();

        let mut value = serde_json::to_value(root)?;
        if let Some(object) = value.as_object_mut() {
            object.remove("$schema");
            object.remove("definitions");
        }
        Ok(value)
    }
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    match value.and_then(|v| v.as_array()) {
        Some(items) => items
            .iter()
            .map(|item| match item.as_str() {
                Some(s) => s.to_string(),
                None => item.to_string(),
            })
            .collect(),
        None => Vec::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum KpiSource {
    Sheet,
    PaymentProcessor,
    Manual,
    Computed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum KpiStatus {
    Active,
    NotApplicable,
    Derived,
    Missing,
}

/// Ordered so that `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Lowers confidence to at most `ceiling`. Never raises it.
    pub fn capped_at(self, ceiling: Confidence) -> Confidence {
        self.min(ceiling)
    }
}

/// How a payment processor's figures were collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMethod {
    /// Read from subscription billing: MRR and ARR are authoritative.
    #[default]
    Billing,
    /// Aggregated from raw payments: recurring revenue is only an estimate.
    Payments,
}

/// How ARR was obtained when it was not reported directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ArrMethod {
    RunRate,
    Observed { months_used: usize },
}

/// One reporting period extracted from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRow {
    pub period_date: NaiveDate,
    pub values: BTreeMap<FieldName, Option<f64>>,
    pub net_cash_flow: Option<f64>,

    /// Fields filled by formula rather than read from the source.
    #[serde(default)]
    pub derived: BTreeSet<FieldName>,

    #[serde(default)]
    pub runway_status: Option<KpiStatus>,

    #[serde(default)]
    pub runway_label: Option<String>,

    /// Fields holding a proxy estimate, with the proxy's source.
    #[serde(default)]
    pub proxies: BTreeMap<FieldName, String>,

    #[serde(default)]
    pub warnings: Vec<String>,
}

impl PeriodRow {
    pub fn new(period_date: NaiveDate) -> Self {
        Self {
            period_date,
            values: BTreeMap::new(),
            net_cash_flow: None,
            derived: BTreeSet::new(),
            runway_status: None,
            runway_label: None,
            proxies: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn get(&self, field: FieldName) -> Option<f64> {
        if field == FieldName::NetCashFlow {
            return self.net_cash_flow;
        }
        self.values.get(&field).copied().flatten()
    }

    pub fn set(&mut self, field: FieldName, value: Option<f64>) {
        if field == FieldName::NetCashFlow {
            self.net_cash_flow = value;
        } else {
            self.values.insert(field, value);
        }
    }

    pub fn with_value(mut self, field: FieldName, value: f64) -> Self {
        self.set(field, Some(value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.net_cash_flow.is_none() && self.values.values().all(|v| v.is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KpiValue {
    pub value: Option<f64>,
    pub source: KpiSource,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<KpiStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
}

impl KpiValue {
    pub fn missing() -> Self {
        Self {
            value: None,
            source: KpiSource::Computed,
            updated_at: None,
            status: Some(KpiStatus::Missing),
            label: None,
            confidence: None,
        }
    }

    pub fn not_applicable(label: Option<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            value: None,
            source: KpiSource::Computed,
            updated_at: Some(updated_at),
            status: Some(KpiStatus::NotApplicable),
            label,
            confidence: None,
        }
    }

    pub fn is_reported(&self) -> bool {
        self.value.is_some() && self.source != KpiSource::Computed
    }
}

/// Canonical KPIs for one company and one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KpiSnapshot {
    pub company_id: String,
    pub period_date: NaiveDate,
    pub kpis: BTreeMap<FieldName, KpiValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arr_method: Option<ArrMethod>,
}

impl KpiSnapshot {
    /// A snapshot with every KPI field present and missing.
    pub fn empty(company_id: impl Into<String>, period_date: NaiveDate) -> Self {
        let kpis = FieldName::KPI_FIELDS
            .iter()
            .map(|field| (*field, KpiValue::missing()))
            .collect();

        Self {
            company_id: company_id.into(),
            period_date,
            kpis,
            arr_method: None,
        }
    }

    pub fn value(&self, field: FieldName) -> Option<f64> {
        self.kpis.get(&field).and_then(|kpi| kpi.value)
    }

    pub fn kpi(&self, field: FieldName) -> Option<&KpiValue> {
        self.kpis.get(&field)
    }
}

/// Audit entry for one field of one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub confidence: Confidence,
    pub is_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_source: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Default for FieldMeta {
    fn default() -> Self {
        Self {
            confidence: Confidence::High,
            is_proxy: false,
            proxy_source: None,
            warnings: Vec::new(),
        }
    }
}

impl FieldMeta {
    pub fn downgrade(&mut self, ceiling: Confidence) {
        self.confidence = self.confidence.capped_at(ceiling);
    }

    pub fn mark_proxy(&mut self, source: impl Into<String>, ceiling: Confidence) {
        self.is_proxy = true;
        self.proxy_source = Some(source.into());
        self.downgrade(ceiling);
    }
}

/// Per-period audit trail kept alongside, never inside, the numeric values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowMeta {
    pub period_date: NaiveDate,
    pub fields: BTreeMap<FieldName, FieldMeta>,
}

impl RowMeta {
    pub fn new(period_date: NaiveDate) -> Self {
        Self {
            period_date,
            fields: BTreeMap::new(),
        }
    }

    pub fn field_mut(&mut self, field: FieldName) -> &mut FieldMeta {
        self.fields.entry(field).or_default()
    }

    pub fn field(&self, field: FieldName) -> Option<&FieldMeta> {
        self.fields.get(&field)
    }
}

/// Partial KPI values for one period from a payment processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorPeriod {
    pub period_date: NaiveDate,
    pub values: BTreeMap<FieldName, f64>,
}

impl ProcessorPeriod {
    pub fn new(period_date: NaiveDate) -> Self {
        Self {
            period_date,
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, field: FieldName, value: f64) -> Self {
        self.values.insert(field, value);
        self
    }
}

/// A value typed in by a person for one field of one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualEntry {
    pub period_date: NaiveDate,
    pub field: FieldName,
    pub value: f64,
}

/// Engine output for one company: ordered snapshots plus the parallel audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSeries {
    pub company_id: String,
    pub snapshots: Vec<KpiSnapshot>,
    pub row_meta: Vec<RowMeta>,
    pub warnings: Vec<String>,
}

impl KpiSeries {
    pub fn latest(&self) -> Option<&KpiSnapshot> {
        self.snapshots.last()
    }

    pub fn snapshot(&self, period_date: NaiveDate) -> Option<&KpiSnapshot> {
        self.snapshots.iter().find(|s| s.period_date == period_date)
    }

    pub fn meta(&self, period_date: NaiveDate) -> Option<&RowMeta> {
        self.row_meta.iter().find(|m| m.period_date == period_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_aliases() {
        assert_eq!(FieldName::from_alias("Burn Rate"), Some(FieldName::BurnRate));
        assert_eq!(FieldName::from_alias("burn-rate"), Some(FieldName::BurnRate));
        assert_eq!(FieldName::from_alias("MRR"), Some(FieldName::Mrr));
        assert_eq!(
            FieldName::from_alias("net_cash_flow"),
            Some(FieldName::NetCashFlow)
        );
        assert_eq!(FieldName::from_alias("EBITDA"), None);
        assert_eq!(FieldName::from_alias(""), None);
    }

    #[test]
    fn test_field_serialization_is_snake_case() {
        let json = serde_json::to_string(&FieldName::MrrGrowthMom).unwrap();
        assert_eq!(json, "\"mrr_growth_mom\"");
        for field in FieldName::ALL {
            assert_eq!(json_name(field), field.as_str());
        }
    }

    fn json_name(field: FieldName) -> String {
        serde_json::to_value(field)
            .unwrap()
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_raw_cell_untagged() {
        let cells: Vec<RawCell> = serde_json::from_str(r#"[null, 12.5, "Jan 2024"]"#).unwrap();
        assert_eq!(cells[0], RawCell::Empty);
        assert_eq!(cells[1], RawCell::Number(12.5));
        assert_eq!(cells[2], RawCell::Text("Jan 2024".to_string()));
    }

    #[test]
    fn test_hint_from_wire_format() {
        let hint = ColumnMappingHint::from_json_str(
            r#"{
                "header_row_index": 1,
                "month_column": 0,
                "2": "burn_rate",
                "1": "mrr",
                "mapping_rationale": ["col 1 is labelled MRR"],
                "rejected_columns": [{"column": 3, "reason": "notes"}]
            }"#,
        )
        .unwrap();

        assert_eq!(hint.header_row_index, 1);
        assert_eq!(hint.month_column, Some(0));
        assert_eq!(hint.claims.len(), 2);
        assert_eq!(hint.claims[0].column, 1);
        assert_eq!(hint.claims[0].field, "mrr");
        assert_eq!(hint.rationale.len(), 1);
        assert_eq!(hint.rejected.len(), 1);
    }

    #[test]
    fn test_hint_in_response_schema_shape() {
        let mut hint = ColumnMappingHint::new(0, Some(0))
            .with_claim(2, "burn_rate")
            .with_claim(1, "mrr");
        hint.rationale.push("col 1 is labelled MRR".to_string());
        hint.rejected.push("col 3 holds notes".to_string());

        let json = serde_json::to_string(&hint).unwrap();
        let decoded = ColumnMappingHint::from_json_str(&json).unwrap();
        assert_eq!(decoded.header_row_index, 0);
        assert_eq!(decoded.month_column, Some(0));
        assert_eq!(decoded.claims.len(), 2);
        assert_eq!(decoded.claims[0].column, 1);
        assert_eq!(decoded.claims[0].field, "mrr");
        assert_eq!(decoded.claims[1].field, "burn_rate");
        assert_eq!(decoded.rationale, hint.rationale);
        assert_eq!(decoded.rejected, hint.rejected);

        let schema = ColumnMappingHint::response_schema().unwrap();
        for key in decoded_keys(&json) {
            assert!(
                schema["properties"].get(&key).is_some(),
                "{} not described by the schema",
                key
            );
        }
    }

    fn decoded_keys(json: &str) -> Vec<String> {
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        value.as_object().unwrap().keys().cloned().collect()
    }

    #[test]
    fn test_malformed_claims_are_skipped() {
        let hint = ColumnMappingHint::from_json_str(
            r#"{
                "header_row_index": 0,
                "claims": [{"column": 1, "field": "mrr"}, {"column": "two"}, 7]
            }"#,
        )
        .unwrap();
        assert_eq!(hint.claims.len(), 1);
        assert_eq!(hint.month_column, None);
    }

    #[test]
    fn test_hint_without_header_is_rejected() {
        let result = ColumnMappingHint::from_json_str(r#"{ "1": "mrr" }"#);
        assert!(matches!(result, Err(KpiEngineError::MappingRejected(_))));
    }

    #[test]
    fn test_response_schema_is_inline() {
        let schema = ColumnMappingHint::response_schema().unwrap();
        let text = schema.to_string();
        assert!(text.contains("header_row_index"));
        assert!(text.contains("claims"));
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("definitions").is_none());
    }

    #[test]
    fn test_confidence_never_raised_by_cap() {
        assert_eq!(Confidence::Low.capped_at(Confidence::High), Confidence::Low);
        assert_eq!(
            Confidence::High.capped_at(Confidence::Medium),
            Confidence::Medium
        );
    }

    #[test]
    fn test_empty_snapshot_excludes_net_cash_flow() {
        let snapshot = KpiSnapshot::empty("acme", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(snapshot.kpis.len(), 8);
        assert!(!snapshot.kpis.contains_key(&FieldName::NetCashFlow));
        assert!(snapshot
            .kpis
            .values()
            .all(|k| k.value.is_none() && k.source == KpiSource::Computed));
    }
}
