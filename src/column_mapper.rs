use crate::config::EngineConfig;
use crate::error::{KpiEngineError, Result};
use crate::parser::{parse_value, PercentMode};
use crate::schema::{ColumnMappingHint, FieldName, PeriodRow, RawCell};
use crate::utils::{
    excel_serial_to_date, find_year, first_of_month, parse_period_marker, resolve_month_only,
    PeriodMarker,
};
use chrono::{Datelike, NaiveDate};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};

/// A hint that survived validation. Only these indices are ever read.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedMapping {
    pub header_row: usize,
    pub month_column: usize,
    pub columns: BTreeMap<usize, FieldName>,
    /// Human-readable notes on every claim that was dropped.
    pub rejections: Vec<String>,
}

/// Result of running a hint against a grid.
#[derive(Debug, Clone, Default)]
pub struct MappedGrid {
    pub rows: Vec<PeriodRow>,
    pub mapping: Option<ValidatedMapping>,
    pub rejections: Vec<String>,
}

pub struct ColumnMapper<'a> {
    grid: &'a [Vec<RawCell>],
    config: &'a EngineConfig,
}

impl<'a> ColumnMapper<'a> {
    pub fn new(grid: &'a [Vec<RawCell>], config: &'a EngineConfig) -> Self {
        Self { grid, config }
    }

    fn width(&self) -> usize {
        self.grid.iter().map(|row| row.len()).max().unwrap_or(0)
    }

    fn cell(&self, row: usize, column: usize) -> &RawCell {
        static EMPTY: RawCell = RawCell::Empty;
        self.grid
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&EMPTY)
    }

    /// Checks a hint against the grid.
    ///
    /// Invalid claims are dropped and noted in `rejections`. The hint as a
    /// whole is rejected when its header row or month column is unusable, or
    /// when no data column survives.
    pub fn validate(&self, hint: &ColumnMappingHint) -> Result<ValidatedMapping> {
        let height = self.grid.len();
        let width = self.width();

        if hint.header_row_index < 0 || hint.header_row_index as usize >= height {
            return Err(KpiEngineError::MappingRejected(format!(
                "header row {} is outside the grid ({} rows)",
                hint.header_row_index, height
            )));
        }
        let header_row = hint.header_row_index as usize;

        let month_column = match hint.month_column {
            Some(col) if col >= 0 && (col as usize) < width => col as usize,
            Some(col) => {
                return Err(KpiEngineError::MappingRejected(format!(
                    "month column {} is outside the grid ({} columns)",
                    col, width
                )))
            }
            None => {
                return Err(KpiEngineError::MappingRejected(
                    "hint does not name a month column".to_string(),
                ))
            }
        };

        let mut columns: BTreeMap<usize, FieldName> = BTreeMap::new();
        let mut claimed_fields: BTreeSet<FieldName> = BTreeSet::new();
        let mut rejections = Vec::new();

        for claim in &hint.claims {
            if claim.column < 0 || claim.column as usize >= width {
                rejections.push(format!(
                    "column {} ({}) is outside the grid",
                    claim.column, claim.field
                ));
                continue;
            }
            let column = claim.column as usize;

            let Some(field) = FieldName::from_alias(&claim.field) else {
                rejections.push(format!(
                    "column {} claims unknown field '{}'",
                    column, claim.field
                ));
                continue;
            };

            if column == month_column {
                rejections.push(format!(
                    "column {} is the month column and cannot also be {}",
                    column, field
                ));
                continue;
            }

            if let Some(existing) = columns.get(&column) {
                rejections.push(format!(
                    "column {} already mapped to {}; dropped duplicate claim for {}",
                    column, existing, field
                ));
                continue;
            }

            if !claimed_fields.insert(field) {
                rejections.push(format!(
                    "{} already mapped to another column; dropped column {}",
                    field, column
                ));
                continue;
            }

            columns.insert(column, field);
        }

        for note in &rejections {
            warn!("Mapping hint claim dropped: {}", note);
        }

        if columns.is_empty() {
            return Err(KpiEngineError::MappingRejected(format!(
                "no usable data column left after validation ({} claims dropped)",
                rejections.len()
            )));
        }

        Ok(ValidatedMapping {
            header_row,
            month_column,
            columns,
            rejections,
        })
    }

    /// Reads one `PeriodRow` per resolvable period below the header row.
    pub fn extract(&self, mapping: &ValidatedMapping) -> Vec<PeriodRow> {
        let fallback_year = self.context_year(mapping);
        let limit = self.config.max_consecutive_blank_periods;

        let mut rows = Vec::new();
        let mut seen: BTreeSet<NaiveDate> = BTreeSet::new();
        let mut previous: Option<NaiveDate> = None;
        let mut misses = 0usize;

        for row_idx in (mapping.header_row + 1)..self.grid.len() {
            let marker = self.cell(row_idx, mapping.month_column);
            let Some(period) = resolve_period(marker, previous, fallback_year) else {
                misses += 1;
                if misses >= limit {
                    debug!(
                        "Data region ends at row {} after {} rows without a period",
                        row_idx, misses
                    );
                    break;
                }
                continue;
            };
            misses = 0;
            previous = Some(period);

            if !seen.insert(period) {
                warn!(
                    "Row {} repeats period {}; keeping the first occurrence",
                    row_idx, period
                );
                continue;
            }

            let mut period_row = PeriodRow::new(period);
            for (&column, &field) in &mapping.columns {
                let mode = if field.is_percentage() {
                    PercentMode::Percent
                } else {
                    PercentMode::Plain
                };
                period_row.set(field, parse_value(self.cell(row_idx, column), mode));
            }

            if period_row.is_empty() {
                debug!("Row {} ({}) has no values; dropped", row_idx, period);
                continue;
            }

            rows.push(period_row);
        }

        rows
    }

    /// Validates and extracts in one step. A rejected hint yields no rows.
    pub fn map(&self, hint: &ColumnMappingHint) -> MappedGrid {
        match self.validate(hint) {
            Ok(mapping) => {
                let rows = self.extract(&mapping);
                debug!(
                    "Mapped {} columns into {} period rows",
                    mapping.columns.len(),
                    rows.len()
                );
                MappedGrid {
                    rows,
                    rejections: mapping.rejections.clone(),
                    mapping: Some(mapping),
                }
            }
            Err(e) => {
                warn!("{}", e);
                MappedGrid {
                    rows: Vec::new(),
                    mapping: None,
                    rejections: vec![e.to_string()],
                }
            }
        }
    }

    /// Year used for bare month names when no earlier period exists: the
    /// header row first, then the first dated marker in the month column.
    fn context_year(&self, mapping: &ValidatedMapping) -> Option<i32> {
        let header_year = self
            .grid
            .get(mapping.header_row)
            .and_then(|row| row.iter().find_map(|cell| find_year(&cell.as_text())));
        if header_year.is_some() {
            return header_year;
        }

        ((mapping.header_row + 1)..self.grid.len()).find_map(|row_idx| {
            resolve_period(self.cell(row_idx, mapping.month_column), None, None)
                .map(|date| date.year())
        })
    }
}

fn resolve_period(
    cell: &RawCell,
    previous: Option<NaiveDate>,
    fallback_year: Option<i32>,
) -> Option<NaiveDate> {
    match cell {
        RawCell::Empty => None,
        RawCell::Number(n) => excel_serial_to_date(*n).ok().map(first_of_month),
        RawCell::Text(text) => match parse_period_marker(text)? {
            PeriodMarker::Dated(date) => Some(date),
            PeriodMarker::MonthOnly(month) => resolve_month_only(month, previous, fallback_year),
        },
    }
}

/// Maps a grid with an untrusted hint. Returns no rows when the hint is unusable.
pub fn map_columns(grid: &[Vec<RawCell>], hint: &ColumnMappingHint) -> Vec<PeriodRow> {
    let config = EngineConfig::default();
    ColumnMapper::new(grid, &config).map(hint).rows
}
