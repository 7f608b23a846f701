//! Raw cell text to canonical storage values.
//!
//! Transformation never fails: anything that cannot be coerced becomes
//! `None` (numbers) or is kept verbatim (dates), and validation is expected to
//! have rejected such cells already when it matters.

use std::collections::BTreeMap;

use crate::{
    data::{Value, parse_finite, parse_naive_date, strip_currency, strip_numeric},
    mapping::MappingSet,
    parser::Row,
    schema::{EntityType, FieldType, field_by_name},
};

/// Field name to canonical value; `None` stands for an explicit null.
pub type CanonicalRow = BTreeMap<String, Option<Value>>;

fn normalize_phone(value: &str) -> Option<Value> {
    let mut phone = String::with_capacity(value.len());
    if value.starts_with('+') {
        phone.push('+');
    }
    phone.extend(value.chars().filter(char::is_ascii_digit));
    (phone.len() > usize::from(phone.starts_with('+'))).then_some(Value::String(phone))
}

fn normalize_url(value: &str) -> Value {
    if value.contains("://") {
        Value::String(value.to_string())
    } else {
        Value::String(format!("https://{value}"))
    }
}

fn split_tags(value: &str) -> Option<Value> {
    let tags = value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    (!tags.is_empty()).then_some(Value::Tags(tags))
}

/// Converts one raw cell. Empty or whitespace-only input yields `None`.
pub fn transform_value(raw: &str, field_type: FieldType) -> Option<Value> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    match field_type {
        FieldType::String => Some(Value::String(value.to_string())),
        FieldType::Email | FieldType::Enum => Some(Value::String(value.to_lowercase())),
        FieldType::Phone => normalize_phone(value),
        FieldType::Url => Some(normalize_url(value)),
        FieldType::Date => Some(match parse_naive_date(value) {
            Ok(date) => Value::Date(date),
            Err(_) => Value::String(value.to_string()),
        }),
        FieldType::Number | FieldType::Percentage => {
            parse_finite(&strip_numeric(value)).map(Value::Number)
        }
        FieldType::Currency => parse_finite(&strip_currency(value)).map(Value::Number),
        FieldType::Tags => split_tags(value),
    }
}

/// Transforms every mapped column of `row`; unmapped columns are dropped.
pub fn transform_row(row: &Row, mappings: &MappingSet, entity: EntityType) -> CanonicalRow {
    mappings
        .mapped()
        .filter_map(|(column, field_name)| {
            let field = field_by_name(entity, field_name)?;
            let raw = row.get(column).map(String::as_str).unwrap_or_default();
            Some((
                field.name.to_string(),
                transform_value(raw, field.field_type),
            ))
        })
        .collect()
}
