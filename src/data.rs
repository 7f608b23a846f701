use std::{fmt, sync::OnceLock};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Canonical storage form of a single imported cell.
///
/// Serialized untagged so stored records read as plain JSON objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Tags(Vec<String>),
    Date(NaiveDate),
    String(String),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Number(f) => format_number(*f),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Tags(tags) => tags.join(", "),
        }
    }

    /// Key used when comparing values for duplicate detection.
    pub fn match_key(&self) -> String {
        self.as_display().trim().to_lowercase()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

fn iso_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("valid ISO date pattern")
    })
}

fn month_first_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,2})[/-](\d{1,2})[/-](\d{2,4})$").expect("valid numeric date pattern")
    })
}

/// Two-digit years pivot at 50: `24` is 2024, `87` is 1987.
fn expand_year(raw: &str) -> Option<i32> {
    let year: i32 = raw.parse().ok()?;
    Some(match raw.len() {
        2 if year < 50 => 2000 + year,
        2 => 1900 + year,
        _ => year,
    })
}

fn numeric_date(value: &str) -> Option<NaiveDate> {
    if let Some(caps) = iso_date_pattern().captures(value) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    let caps = month_first_pattern().captures(value)?;
    let month = caps[1].parse().ok()?;
    let day = caps[2].parse().ok()?;
    let year = expand_year(&caps[3])?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parses the date spellings spreadsheets commonly carry.
///
/// Numeric forms are read month-first (`02/05/2024` is the 5th of February).
/// Textual months (`5 Feb 2024`, `February 5, 2024`) and date-times are
/// accepted as a fallback. Years outside 1..=9999 are rejected so the ISO
/// rendering always parses back.
pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    parse_any_date(value.trim())
        .filter(|date| (1..=9999).contains(&date.year()))
        .ok_or_else(|| anyhow!("Failed to parse '{value}' as date"))
}

fn parse_any_date(trimmed: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &[
        "%Y/%m/%d",
        "%d %b %Y",
        "%d-%b-%Y",
        "%b %d %Y",
        "%b %d, %Y",
        "%A, %b %d, %Y",
        "%a %b %d %Y",
    ];
    if let Some(date) = numeric_date(trimmed) {
        return Some(date);
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .or_else(|| parse_naive_datetime(trimmed).ok().map(|dt| dt.date()))
        .or_else(|| {
            DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| dt.date_naive())
        })
        .or_else(|| {
            DateTime::parse_from_rfc2822(trimmed)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
        "%m/%d/%Y %H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

pub fn is_currency_symbol(ch: char) -> bool {
    matches!(
        ch,
        '$' | '€' | '£' | '¥' | '₹' | '₩' | '₽' | '₺' | '₫' | '₱' | '¢' | '₦' | '₪' | '฿' | '₴'
    )
}

/// Removes currency symbols, thousands separators and whitespace.
pub fn strip_currency(value: &str) -> String {
    value
        .chars()
        .filter(|c| !(is_currency_symbol(*c) || *c == ',' || c.is_whitespace()))
        .collect()
}

/// Removes percent signs, thousands separators and whitespace.
pub fn strip_numeric(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '%' | ',') && !c.is_whitespace())
        .collect()
}

/// `f64` parse that rejects `inf`/`NaN` spellings.
pub fn parse_finite(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|parsed| parsed.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parse_naive_date_supports_numeric_formats() {
        assert_eq!(parse_naive_date("2024-02-05").unwrap(), ymd(2024, 2, 5));
        assert_eq!(parse_naive_date("2024-2-5").unwrap(), ymd(2024, 2, 5));
        assert_eq!(parse_naive_date("02/05/2024").unwrap(), ymd(2024, 2, 5));
        assert_eq!(parse_naive_date("2-5-2024").unwrap(), ymd(2024, 2, 5));
        assert_eq!(parse_naive_date("2/5/24").unwrap(), ymd(2024, 2, 5));
        assert_eq!(parse_naive_date("2/5/87").unwrap(), ymd(1987, 2, 5));
    }

    #[test]
    fn parse_naive_date_supports_textual_months() {
        assert_eq!(parse_naive_date("5 Feb 2024").unwrap(), ymd(2024, 2, 5));
        assert_eq!(parse_naive_date("5 February 2024").unwrap(), ymd(2024, 2, 5));
        assert_eq!(parse_naive_date("Feb 5, 2024").unwrap(), ymd(2024, 2, 5));
        assert_eq!(
            parse_naive_date("2024-02-05T09:30:00").unwrap(),
            ymd(2024, 2, 5)
        );
        assert_eq!(
            parse_naive_date("2024-02-05T09:30:00+02:00").unwrap(),
            ymd(2024, 2, 5)
        );
    }

    #[test]
    fn parse_naive_date_rejects_impossible_dates() {
        assert!(parse_naive_date("13/45/2024").is_err());
        assert!(parse_naive_date("next tuesday").is_err());
        assert!(parse_naive_date("").is_err());
    }

    #[test]
    fn strip_helpers_remove_decoration() {
        assert_eq!(strip_currency("$ 1,234.50"), "1234.50");
        assert_eq!(strip_currency("€99"), "99");
        assert_eq!(strip_numeric("12.5 %"), "12.5");
        assert_eq!(strip_numeric("1,000"), "1000");
    }

    #[test]
    fn parse_finite_rejects_non_finite_spellings() {
        assert_eq!(parse_finite("42.5"), Some(42.5));
        assert_eq!(parse_finite("inf"), None);
        assert_eq!(parse_finite("NaN"), None);
        assert_eq!(parse_finite("abc"), None);
    }

    #[test]
    fn value_display_drops_integral_fraction() {
        assert_eq!(Value::Number(1500.0).as_display(), "1500");
        assert_eq!(Value::Number(12.25).as_display(), "12.25");
        assert_eq!(
            Value::Tags(vec!["vip".into(), "2024".into()]).as_display(),
            "vip, 2024"
        );
        assert_eq!(Value::Date(ymd(2024, 2, 5)).to_string(), "2024-02-05");
    }

    #[test]
    fn untagged_values_round_trip_through_json() {
        let values = vec![
            Value::Number(3.5),
            Value::Tags(vec!["a".into()]),
            Value::Date(ymd(2024, 1, 31)),
            Value::String("hello".into()),
        ];
        let json = serde_json::to_string(&values).unwrap();
        let decoded: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, values);
    }
}
