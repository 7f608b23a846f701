//! Plain-text tables for terminal output.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::{
    mapping::MappingSet,
    parser::ParsedFile,
    schema::{EntityType, fields_for},
    validate::ValidationError,
};

/// Cells longer than this are cut and end in `…`.
pub const MAX_CELL_CHARS: usize = 48;

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let headers = headers.iter().map(|h| clip(h)).collect::<Vec<_>>();
    let rows = rows
        .iter()
        .map(|row| row.iter().take(column_count).map(|c| clip(c)).collect())
        .collect::<Vec<Vec<Cow<'_, str>>>>();

    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }
    for width in &mut widths {
        *width = (*width).max(1);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(&headers, &widths));

    let separator_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<usize>>();
    let separator_cells = separator_widths
        .iter()
        .map(|w| Cow::Owned("-".repeat(*w)))
        .collect::<Vec<_>>();
    let _ = writeln!(
        output,
        "{}",
        format_row(&separator_cells, &separator_widths)
    );

    for row in &rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

/// Registry fields of `entity`, one line each.
pub fn render_fields(entity: EntityType) -> String {
    let headers = ["Field", "Label", "Type", "Required", "Constraints"]
        .map(String::from)
        .to_vec();
    let rows = fields_for(entity)
        .iter()
        .map(|field| {
            let mut constraints = Vec::new();
            if !field.enum_values.is_empty() {
                constraints.push(field.enum_values.join("|"));
            }
            if let Some(max) = field.max_length {
                constraints.push(format!("max {max} chars"));
            }
            match (field.min_value, field.max_value) {
                (Some(min), Some(max)) => constraints.push(format!("{min}..{max}")),
                (Some(min), None) => constraints.push(format!(">= {min}")),
                (None, Some(max)) => constraints.push(format!("<= {max}")),
                (None, None) => {}
            }
            vec![
                field.name.to_string(),
                field.label.to_string(),
                field.field_type.to_string(),
                if field.required { "yes" } else { "" }.to_string(),
                constraints.join(", "),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

pub fn render_mapping(mappings: &MappingSet) -> String {
    let headers = ["Column", "Field", "Confidence", "Samples"]
        .map(String::from)
        .to_vec();
    let rows = mappings
        .iter()
        .map(|m| {
            vec![
                m.csv_column.clone(),
                m.db_field.clone().unwrap_or_else(|| "(skip)".to_string()),
                m.confidence
                    .map(|c| format!("{:.0}%", c * 100.0))
                    .unwrap_or_default(),
                m.sample_values.join(", "),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

/// At most `limit` errors; a trailing line counts the rest.
pub fn render_errors(errors: &[ValidationError], limit: usize) -> String {
    let headers = ["Row", "Field", "Value", "Error"].map(String::from).to_vec();
    let rows = errors
        .iter()
        .take(limit)
        .map(|e| {
            vec![
                e.row.to_string(),
                e.field.clone(),
                e.value.clone(),
                e.message.clone(),
            ]
        })
        .collect::<Vec<_>>();
    let mut rendered = render_table(&headers, &rows);
    if errors.len() > limit {
        let _ = writeln!(rendered, "... {} more", errors.len() - limit);
    }
    rendered
}

/// First `limit` data rows in header order.
pub fn render_preview(parsed: &ParsedFile, limit: usize) -> String {
    let rows = (0..parsed.rows.len().min(limit))
        .map(|idx| {
            parsed
                .headers
                .iter()
                .map(|h| parsed.value(idx, h).unwrap_or_default().to_string())
                .collect()
        })
        .collect::<Vec<Vec<String>>>();
    render_table(&parsed.headers, &rows)
}

fn clip(value: &str) -> Cow<'_, str> {
    let sanitized = sanitize_cell(value);
    if sanitized.chars().count() <= MAX_CELL_CHARS {
        return sanitized;
    }
    let mut clipped = sanitized
        .chars()
        .take(MAX_CELL_CHARS - 1)
        .collect::<String>();
    clipped.push('…');
    Cow::Owned(clipped)
}

fn format_row(values: &[Cow<'_, str>], widths: &[usize]) -> String {
    let mut cells = Vec::with_capacity(values.len());
    for (value, width) in values.iter().zip(widths) {
        let padding = width.saturating_sub(display_width(value));
        let mut cell = value.to_string();
        cell.push_str(&" ".repeat(padding));
        cells.push(cell);
    }
    let mut line = cells.join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn display_width(value: &str) -> usize {
    let mut width = 0usize;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            // ANSI escape, e.g. \x1b[31m
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            width += 1;
        }
    }
    width
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(
            value
                .chars()
                .map(|ch| match ch {
                    '\n' | '\r' | '\t' => ' ',
                    other => other,
                })
                .collect(),
        )
    } else {
        Cow::Borrowed(value)
    }
}
