use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    data::{format_number, parse_finite, parse_naive_date, strip_currency},
    mapping::MappingSet,
    parser::Row,
    schema::{EntityType, FieldDefinition, FieldType, field_by_name, required_fields_for},
};

const DEFAULT_PERCENT_MIN: f64 = 0.0;
const DEFAULT_PERCENT_MAX: f64 = 100.0;

/// One rejected cell. `row` is 1-based into the parsed file's data rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError {
    pub row: usize,
    pub field: String,
    pub value: String,
    pub message: String,
}

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("valid validation pattern"))
}

fn email_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"^[^\s@]+@[^\s@]+\.[^\s@]+$")
}

fn phone_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"^[0-9 +\-().]{7,20}$")
}

fn url_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(
        &CELL,
        r"(?i)^(https?://)?([a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9-]{2,}(:\d+)?(/\S*)?$",
    )
}

fn date_shape_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(
        &CELL,
        r"^(\d{4}-\d{1,2}-\d{1,2}|\d{1,2}/\d{1,2}/\d{2,4}|\d{1,2}-\d{1,2}-\d{2,4})$",
    )
}

fn is_valid_date(value: &str) -> bool {
    date_shape_pattern().is_match(value) || parse_naive_date(value).is_ok()
}

fn check_bounds(parsed: f64, min: Option<f64>, max: Option<f64>) -> Option<String> {
    if let Some(min) = min
        && parsed < min
    {
        return Some(format!("Must be at least {}", format_number(min)));
    }
    if let Some(max) = max
        && parsed > max
    {
        return Some(format!("Must be at most {}", format_number(max)));
    }
    None
}

fn check_type(value: &str, field: &FieldDefinition) -> Option<String> {
    match field.field_type {
        FieldType::Email => {
            (!email_pattern().is_match(value)).then(|| "Invalid email address".to_string())
        }
        FieldType::Phone => {
            (!phone_pattern().is_match(value)).then(|| "Invalid phone number".to_string())
        }
        FieldType::Url => (!url_pattern().is_match(value)).then(|| "Invalid URL".to_string()),
        FieldType::Date => (!is_valid_date(value))
            .then(|| "Invalid date; use YYYY-MM-DD or MM/DD/YYYY".to_string()),
        FieldType::Number => {
            let cleaned = value
                .chars()
                .filter(|c| *c != ',' && !c.is_whitespace())
                .collect::<String>();
            match parse_finite(&cleaned) {
                Some(parsed) => check_bounds(parsed, field.min_value, field.max_value),
                None => Some("Must be a number".to_string()),
            }
        }
        FieldType::Currency => parse_finite(&strip_currency(value))
            .is_none()
            .then(|| "Must be a valid amount".to_string()),
        FieldType::Percentage => {
            let cleaned = value
                .chars()
                .filter(|c| *c != '%' && !c.is_whitespace())
                .collect::<String>();
            let min = field.min_value.unwrap_or(DEFAULT_PERCENT_MIN);
            let max = field.max_value.unwrap_or(DEFAULT_PERCENT_MAX);
            match parse_finite(&cleaned) {
                Some(parsed) if parsed >= min && parsed <= max => None,
                _ => Some(format!(
                    "Must be a percentage between {} and {}",
                    format_number(min),
                    format_number(max)
                )),
            }
        }
        FieldType::Enum => {
            let known = field
                .enum_values
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(value));
            (!known).then(|| format!("Must be one of: {}", field.enum_values.join(", ")))
        }
        FieldType::String | FieldType::Tags => None,
    }
}

/// Checks one raw cell against its field; `None` means acceptable.
///
/// The value is trimmed first. A type error wins over a length error, which
/// is only reported once the type check has passed.
pub fn validate_value(raw: &str, field: &FieldDefinition) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        return field
            .required
            .then(|| format!("{} is required", field.label));
    }
    if let Some(message) = check_type(value, field) {
        return Some(message);
    }
    if let Some(max_length) = field.max_length
        && value.chars().count() > max_length
    {
        return Some(format!("Must be at most {max_length} characters"));
    }
    None
}

/// Validates one data row against the mapped fields of `entity`.
///
/// Required fields are checked for presence first, using whichever column is
/// mapped to them; then every mapped column is type-checked on its own. The
/// two passes are independent, so an empty required cell is reported by both.
pub fn validate_row(
    row: &Row,
    mappings: &MappingSet,
    entity: EntityType,
    row_index: usize,
) -> Vec<ValidationError> {
    debug_assert_eq!(mappings.entity, entity, "mapping set belongs to another entity");
    let mut errors: Vec<ValidationError> = Vec::new();
    for field in required_fields_for(entity) {
        let value = mappings
            .column_for(field.name)
            .and_then(|column| row.get(column))
            .map(String::as_str)
            .unwrap_or_default();
        if value.trim().is_empty() {
            errors.push(ValidationError {
                row: row_index,
                field: field.name.to_string(),
                value: value.to_string(),
                message: format!("{} is required", field.label),
            });
        }
    }

    for (column, field_name) in mappings.mapped() {
        let Some(field) = field_by_name(entity, field_name) else {
            continue;
        };
        let raw = row.get(column).map(String::as_str).unwrap_or_default();
        let Some(message) = validate_value(raw, field) else {
            continue;
        };
        errors.push(ValidationError {
            row: row_index,
            field: field.name.to_string(),
            value: raw.to_string(),
            message,
        });
    }
    errors
}
