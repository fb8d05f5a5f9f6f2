use crate::error::{KpiEngineError, Result};
use chrono::{Datelike, Duration, NaiveDate};

const MONTH_NAMES: [(&str, u32); 12] = [
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

/// Spreadsheet serials outside this range are treated as plain numbers.
const SERIAL_RANGE: std::ops::RangeInclusive<f64> = 20_000.0..=80_000.0;

pub fn month_start(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn next_month_start(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    month_start(year, month).unwrap_or(date)
}

pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let year_diff = end.year() - start.year();
    let month_diff = end.month() as i32 - start.month() as i32;
    year_diff * 12 + month_diff
}

/// True when `later` is the calendar month right after `earlier`.
pub fn is_consecutive_month(earlier: NaiveDate, later: NaiveDate) -> bool {
    months_between(earlier, later) == 1
}

/// Converts a spreadsheet serial day number using the 1899-12-30 epoch.
pub fn excel_serial_to_date(serial: f64) -> Result<NaiveDate> {
    if !serial.is_finite() || !SERIAL_RANGE.contains(&serial) {
        return Err(KpiEngineError::DateError(format!(
            "{} is not a plausible spreadsheet serial date",
            serial
        )));
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)
        .ok_or_else(|| KpiEngineError::DateError("bad serial epoch".to_string()))?;
    Ok(base + Duration::days(serial.floor() as i64))
}

pub fn month_from_name(token: &str) -> Option<u32> {
    let lower = token.trim().trim_end_matches('.').to_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTH_NAMES.iter().find_map(|(prefix, month)| {
        let full = full_month_name(*month);
        if lower == *prefix || full.starts_with(&lower) || (lower == "sept" && *month == 9) {
            Some(*month)
        } else {
            None
        }
    })
}

fn full_month_name(month: u32) -> &'static str {
    match month {
        1 => "january",
        2 => "february",
        3 => "march",
        4 => "april",
        5 => "may",
        6 => "june",
        7 => "july",
        8 => "august",
        9 => "september",
        10 => "october",
        11 => "november",
        _ => "december",
    }
}

/// A period marker resolved from a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodMarker {
    /// Month and year were both present.
    Dated(NaiveDate),
    /// Only a month name was present; the year comes from context.
    MonthOnly(u32),
}

/// Parses the text of a period cell.
///
/// Accepted: `2024-03`, `2024-03-15`, `2024/03`, `03/2024`, `March 2024`,
/// `Mar 2024`, `Mar-24`, `Mar '24`, `FY2024 Mar`, a bare month name, and
/// spreadsheet serial numbers given as text.
pub fn parse_period_marker(text: &str) -> Option<PeriodMarker> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(serial) = trimmed.parse::<f64>() {
        return excel_serial_to_date(serial)
            .ok()
            .map(|d| PeriodMarker::Dated(first_of_month(d)));
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(PeriodMarker::Dated(first_of_month(date)));
        }
    }

    // Longer forms carry a time component ("2024-03-01T00:00:00").
    if let Some(prefix) = trimmed.get(..10).filter(|_| trimmed.len() > 10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(PeriodMarker::Dated(first_of_month(date)));
        }
    }

    let tokens: Vec<&str> = trimmed
        .split(|c: char| c.is_whitespace() || matches!(c, '-' | '/' | '.' | ',' | '\'' | '’'))
        .filter(|t| !t.is_empty())
        .collect();

    let mut year: Option<i32> = None;
    let mut month: Option<u32> = None;
    let mut numeric: Vec<u32> = Vec::new();

    for token in &tokens {
        if let Some(m) = month_from_name(token) {
            if month.is_none() {
                month = Some(m);
            }
            continue;
        }

        let digits = token.trim_start_matches(|c: char| c.is_ascii_alphabetic());
        let prefix = &token[..token.len() - digits.len()];
        if !prefix.is_empty() && !prefix.eq_ignore_ascii_case("fy") {
            continue;
        }
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Ok(n) = digits.parse::<u32>() else {
            continue;
        };

        if digits.len() == 4 && (1900..=2200).contains(&n) {
            year = Some(n as i32);
        } else {
            numeric.push(n);
        }
    }

    match (month, year) {
        (Some(m), Some(y)) => month_start(y, m).map(PeriodMarker::Dated),
        (Some(m), None) => match numeric.as_slice() {
            // "Mar-24" / "Mar '24"
            [yy] if *yy < 100 => month_start(2000 + *yy as i32, m).map(PeriodMarker::Dated),
            [] => Some(PeriodMarker::MonthOnly(m)),
            _ => None,
        },
        (None, Some(y)) => match numeric.as_slice() {
            // "2024-03", "03/2024"
            [mm] if (1..=12).contains(mm) => month_start(y, *mm).map(PeriodMarker::Dated),
            _ => None,
        },
        (None, None) => None,
    }
}

/// Resolves a month-only marker against the previous period, rolling into
/// the next year when the month goes backwards (Dec → Jan).
pub fn resolve_month_only(month: u32, previous: Option<NaiveDate>, fallback_year: Option<i32>) -> Option<NaiveDate> {
    match previous {
        Some(prev) => {
            let year = if month < prev.month() {
                prev.year() + 1
            } else {
                prev.year()
            };
            month_start(year, month)
        }
        None => fallback_year.and_then(|y| month_start(y, month)),
    }
}

/// Finds the first explicit four-digit year in a piece of text ("FY2024", "2024 actuals").
pub fn find_year(text: &str) -> Option<i32> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i - start == 4 {
                let s: String = chars[start..i].iter().collect();
                if let Ok(y) = s.parse::<i32>() {
                    if (1900..=2200).contains(&y) {
                        return Some(y);
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    None
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Mean and population standard deviation.
pub fn mean_and_stddev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}
