//! # Startup KPI Engine
//!
//! Turns messy company reporting data (spreadsheet exports, payment-processor
//! aggregates, hand-entered corrections) into a canonical monthly series of
//! startup KPIs with provenance, confidence and hard financial invariants.
//!
//! ## Core Concepts
//!
//! - **Untrusted layout hints**: a semantic interpreter proposes which column
//!   holds which field. It never supplies numbers, and every claim is
//!   validated against the grid before anything is read.
//! - **Mechanical numbers**: every value is parsed from a cell, taken from a
//!   processor or manual entry, or derived by a fixed formula.
//! - **Source priority**: each field has a fixed ranking of which origin wins.
//! - **Finance invariants**: burn is never negative, and runway is never
//!   shown for a company that is not burning cash.
//! - **Sanity pass**: retrospective corrections over the whole series that
//!   only add values or lower confidence.
//!
//! ## Example
//!
//! ```rust,ignore
//! use startup_kpi_engine::*;
//!
//! let grid: Grid = vec![
//!     vec!["Month".into(), "MRR".into(), "Net cash flow".into(), "Cash".into()],
//!     vec!["Jan 2024".into(), "$10,000".into(), "(45,000)".into(), "900,000".into()],
//!     vec!["Feb 2024".into(), "$11,200".into(), "(47,500)".into(), "852,500".into()],
//! ];
//!
//! let interpreter = StaticInterpreter::new(
//!     ColumnMappingHint::new(0, Some(0))
//!         .with_claim(1, "mrr")
//!         .with_claim(2, "net_cash_flow")
//!         .with_claim(3, "cash_balance"),
//! );
//!
//! let pipeline = KpiPipeline::new(EngineConfig::default())?;
//! let series = pipeline.run(
//!     &CompanyInput::new("acme", grid),
//!     &Collaborators::new(&interpreter),
//! )?;
//!
//! let latest = series.latest().unwrap();
//! println!("burn {:?}", latest.value(FieldName::BurnRate));
//! ```

pub mod arr;
pub mod column_mapper;
pub mod config;
pub mod derived;
pub mod error;
pub mod finance_rules;
pub mod merger;
pub mod parser;
pub mod pipeline;
pub mod sanity;
pub mod schema;
pub mod utils;

pub use arr::classify_arr;
pub use column_mapper::{map_columns, ColumnMapper, MappedGrid, ValidatedMapping};
pub use config::EngineConfig;
pub use derived::{fill_gaps, fill_series, growth_pct, refresh_series_growth};
pub use error::{KpiEngineError, Result};
pub use finance_rules::{
    apply_finance_rules, apply_to_row, validate, FinanceMetrics, FinanceOutcome, ValidationResult,
};
pub use merger::{merge, SourceMerger};
pub use parser::{parse_cell, parse_value, ParsedNumber, PercentMode, Sign};
pub use pipeline::{
    normalize_company, Collaborators, CompanyInput, JsonHintInterpreter, KpiPipeline,
    SemanticInterpreter, StaticInterpreter,
};
pub use sanity::{post_process, Evidence, PostProcessed};
pub use schema::*;
