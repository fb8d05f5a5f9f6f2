//! Numeric cell parsing.
//!
//! Spreadsheet exports mix accounting notation, locale separators and currency
//! decorations. The rules here resolve all of them without ever flipping a
//! sign: any negative marker makes the value negative, and markers never
//! cancel each other out.

use crate::schema::RawCell;
use serde::{Deserialize, Serialize};

const NEGATIVE_MARKERS: [char; 4] = ['-', '\u{2212}', '\u{2013}', '\u{2014}'];

const CURRENCY_SYMBOLS: [char; 15] = [
    '$', '€', '£', '¥', '₹', '₩', '₽', '₺', '₪', '₫', '฿', '₦', '₱', '₴', '¢',
];

/// Characters used to group thousands besides `,` and `.`.
const GROUPING_CHARS: [char; 5] = [' ', '\u{00A0}', '\u{202F}', '\u{2009}', '\''];

const CURRENCY_CODES: [&str; 8] = ["usd", "eur", "gbp", "chf", "inr", "kr", "rs", "sek"];

const PLACEHOLDERS: [&str; 7] = ["n/a", "na", "null", "none", "nil", "#n/a", "tbd"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    pub fn factor(&self) -> f64 {
        match self {
            Sign::Positive => 1.0,
            Sign::Negative => -1.0,
        }
    }
}

/// Whether the caller expects a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PercentMode {
    #[default]
    Plain,
    /// Fractions in `(0, 1]` are scaled to percent points; `"5%"` stays 5.
    Percent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedNumber {
    pub magnitude: f64,
    pub sign: Sign,
    pub signed_value: f64,
    pub original_text: String,
}

impl ParsedNumber {
    fn new(magnitude: f64, sign: Sign, original_text: String) -> Self {
        Self {
            magnitude,
            sign,
            signed_value: magnitude * sign.factor(),
            original_text,
        }
    }
}

/// Parses one cell. `None` means "no value", which is a normal outcome.
pub fn parse_cell(cell: &RawCell, mode: PercentMode) -> Option<ParsedNumber> {
    match cell {
        RawCell::Empty => None,
        RawCell::Number(n) => parse_native(*n, mode),
        RawCell::Text(text) => parse_text(text, mode),
    }
}

/// Shorthand for the signed value of a cell.
pub fn parse_value(cell: &RawCell, mode: PercentMode) -> Option<f64> {
    parse_cell(cell, mode).map(|p| p.signed_value)
}

fn parse_native(n: f64, mode: PercentMode) -> Option<ParsedNumber> {
    if !n.is_finite() {
        return None;
    }
    let sign = if n < 0.0 { Sign::Negative } else { Sign::Positive };
    let mut magnitude = n.abs();
    if mode == PercentMode::Percent && magnitude > 0.0 && magnitude <= 1.0 {
        magnitude *= 100.0;
    }
    Some(ParsedNumber::new(magnitude, sign, n.to_string()))
}

pub fn parse_text(text: &str, mode: PercentMode) -> Option<ParsedNumber> {
    let original = text.to_string();
    let mut body = text.trim().to_string();

    if body.is_empty() || is_placeholder(&body) {
        return None;
    }

    let mut negative = false;

    // Accounting parentheses: "(1,234.56)", also with currency inside or outside.
    let stripped = strip_currency(&body);
    if stripped.starts_with('(') && stripped.ends_with(')') && stripped.len() >= 2 {
        negative = true;
        body = stripped[1..stripped.len() - 1].to_string();
    } else {
        body = stripped;
    }

    // Trailing minus: "1,234 -" or "1,234-".
    let trimmed_end = body.trim_end();
    if let Some(last) = trimmed_end.chars().last() {
        if NEGATIVE_MARKERS.contains(&last) {
            negative = true;
            body = trimmed_end[..trimmed_end.len() - last.len_utf8()].to_string();
        }
    }

    body = strip_currency(&body);

    // Leading minus, possibly repeated or separated by spaces ("- 8,000").
    loop {
        let trimmed_start = body.trim_start();
        match trimmed_start.chars().next() {
            Some(first) if NEGATIVE_MARKERS.contains(&first) => {
                negative = true;
                body = trimmed_start[first.len_utf8()..].to_string();
            }
            Some('+') => {
                body = trimmed_start[1..].to_string();
            }
            _ => break,
        }
        body = strip_currency(&body);
    }

    let mut is_percent = false;
    let trimmed_end = body.trim_end();
    if let Some(rest) = trimmed_end.strip_suffix('%') {
        is_percent = true;
        body = rest.to_string();
    }

    let compact: String = body
        .chars()
        .filter(|c| !GROUPING_CHARS.contains(c))
        .collect();

    if compact.is_empty() || !compact.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.') {
        return None;
    }
    if !compact.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = normalize_separators(&compact)?;
    let mut magnitude: f64 = normalized.parse().ok()?;
    if !magnitude.is_finite() {
        return None;
    }

    if mode == PercentMode::Percent && !is_percent && magnitude > 0.0 && magnitude <= 1.0 {
        magnitude *= 100.0;
    }

    let sign = if negative && magnitude != 0.0 {
        Sign::Negative
    } else {
        Sign::Positive
    };

    Some(ParsedNumber::new(magnitude, sign, original))
}

fn is_placeholder(text: &str) -> bool {
    let lower = text.to_lowercase();
    PLACEHOLDERS.contains(&lower.as_str())
        || text.chars().all(|c| NEGATIVE_MARKERS.contains(&c) || c.is_whitespace())
}

/// Removes currency symbols and currency codes at either end.
fn strip_currency(text: &str) -> String {
    let mut s = text.trim();
    loop {
        let before = s;
        s = s
            .trim_start_matches(|c: char| CURRENCY_SYMBOLS.contains(&c))
            .trim_end_matches(|c: char| CURRENCY_SYMBOLS.contains(&c))
            .trim();

        let lead = s.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        if lead > 0 && is_currency_code(&s[..lead]) {
            s = s[lead..].trim();
        }

        let trail = s.chars().rev().take_while(|c| c.is_ascii_alphabetic()).count();
        if trail > 0 && is_currency_code(&s[s.len() - trail..]) {
            s = s[..s.len() - trail].trim();
        }

        if s == before {
            break;
        }
    }
    s.to_string()
}

fn is_currency_code(code: &str) -> bool {
    (code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()))
        || CURRENCY_CODES.contains(&code.to_lowercase().as_str())
}

/// Rewrites a digit string with `,`/`.` separators into Rust float syntax.
///
/// Both present: the later one is the decimal separator. One kind repeated:
/// thousands. A single comma followed by exactly two digits: decimal,
/// otherwise thousands. A single period: decimal.
fn normalize_separators(s: &str) -> Option<String> {
    let commas = s.matches(',').count();
    let periods = s.matches('.').count();

    let normalized = match (commas, periods) {
        (0, 0) => s.to_string(),
        (c, p) if c > 0 && p > 0 => {
            let last_comma = s.rfind(',')?;
            let last_period = s.rfind('.')?;
            if last_comma > last_period {
                if c > 1 {
                    return None;
                }
                s.replace('.', "").replace(',', ".")
            } else {
                if p > 1 {
                    return None;
                }
                s.replace(',', "")
            }
        }
        (c, 0) if c > 1 => s.replace(',', ""),
        (1, 0) => {
            let idx = s.find(',')?;
            let trailing = &s[idx + 1..];
            if trailing.len() == 2 {
                s.replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
        (0, p) if p > 1 => s.replace('.', ""),
        _ => s.to_string(),
    };

    if normalized.starts_with('.') {
        Some(format!("0{}", normalized))
    } else {
        Some(normalized)
    }
}
