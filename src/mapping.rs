//! Column mapping: raw spreadsheet headers onto canonical fields.
//!
//! Matching is a greedy heuristic rather than an optimal assignment. Each
//! header's best field is scored once against every field's name, label and
//! aliases; a first pass lets confident matches (≥ [`HIGH_CONFIDENCE_THRESHOLD`])
//! claim their field in header order, and a second pass lets the remaining
//! acceptable matches (≥ [`MATCH_THRESHOLD`]) claim whatever is still free.
//! A header whose best field was already claimed stays unmapped. With many
//! near-threshold ties the outcome depends on header order; that is accepted.

use std::{collections::HashSet, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, anyhow, bail, ensure};
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    config::ImportSettings,
    parser::Row,
    schema::{EntityType, FieldDefinition, field_by_name, fields_for, required_fields_for},
};

/// Minimum similarity for a header to be mapped at all.
pub const MATCH_THRESHOLD: f64 = 0.60;
/// Scores at or above this claim their field in the first pass.
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.80;
/// Score given when one normalized string contains the other.
pub const CONTAINMENT_SCORE: f64 = 0.80;
pub const MAPPING_SAMPLE_ROWS: usize = 10;
pub const MAX_SAMPLE_VALUES: usize = 3;

/// Lower-cases and collapses runs of `_`, `-` and whitespace into one space.
pub fn normalize(value: &str) -> String {
    let mut normalized = String::with_capacity(value.len());
    let mut pending_space = false;
    for ch in value.chars() {
        if ch == '_' || ch == '-' || ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !normalized.is_empty() {
            normalized.push(' ');
        }
        pending_space = false;
        normalized.extend(ch.to_lowercase());
    }
    normalized
}

/// Similarity in `[0, 1]` between two raw strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    normalized_similarity(&normalize(a), &normalize(b))
}

fn normalized_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(b) || b.contains(a) {
        return CONTAINMENT_SCORE;
    }
    let longest = a.chars().count().max(b.chars().count());
    1.0 - strsim::levenshtein(a, b) as f64 / longest as f64
}

/// Best score of a normalized header against a field's name, label and aliases.
pub fn field_score(normalized_header: &str, field: &FieldDefinition) -> f64 {
    std::iter::once(field.name)
        .chain(std::iter::once(field.label))
        .chain(field.aliases.iter().copied())
        .map(|candidate| normalized_similarity(normalized_header, &normalize(candidate)))
        .fold(0.0, f64::max)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnMapping {
    pub csv_column: String,
    #[serde(default)]
    pub db_field: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ColumnMapping {
    pub fn unmapped(csv_column: impl Into<String>) -> Self {
        Self {
            csv_column: csv_column.into(),
            db_field: None,
            sample_values: Vec::new(),
            confidence: None,
        }
    }
}

/// Ordered mappings for one entity; no two columns share a target field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingSet {
    pub entity: EntityType,
    columns: Vec<ColumnMapping>,
}

impl MappingSet {
    pub fn new(entity: EntityType, columns: Vec<ColumnMapping>) -> Result<Self> {
        let set = Self { entity, columns };
        set.ensure_consistent()?;
        Ok(set)
    }

    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnMapping> {
        self.columns.iter()
    }

    /// Mapped `(column, field)` pairs in column order.
    pub fn mapped(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().filter_map(|m| {
            m.db_field
                .as_deref()
                .map(|field| (m.csv_column.as_str(), field))
        })
    }

    pub fn field_for(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|m| m.csv_column == column)
            .and_then(|m| m.db_field.as_deref())
    }

    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|m| m.db_field.as_deref() == Some(field))
            .map(|m| m.csv_column.as_str())
    }

    /// Points `column` at `field` (or skips it when `None`).
    ///
    /// Whichever column held `field` before is unmapped first, so a manual
    /// edit never leaves two columns on the same field.
    pub fn assign(&mut self, column: &str, field: Option<&str>) -> Result<()> {
        if let Some(name) = field
            && field_by_name(self.entity, name).is_none()
        {
            bail!("'{name}' is not a {} field", self.entity.as_str());
        }
        let target = self
            .columns
            .iter()
            .position(|m| m.csv_column == column)
            .ok_or_else(|| anyhow!("Column '{column}' is not present in the upload"))?;
        if let Some(name) = field {
            for (idx, mapping) in self.columns.iter_mut().enumerate() {
                if idx != target && mapping.db_field.as_deref() == Some(name) {
                    debug!("Unmapping '{}' from {name}", mapping.csv_column);
                    mapping.db_field = None;
                    mapping.confidence = None;
                }
            }
        }
        let mapping = &mut self.columns[target];
        mapping.db_field = field.map(str::to_string);
        mapping.confidence = None;
        Ok(())
    }

    pub fn ensure_consistent(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (column, field) in self.mapped() {
            ensure!(
                field_by_name(self.entity, field).is_some(),
                "Column '{column}' targets unknown {} field '{field}'",
                self.entity.as_str()
            );
            ensure!(
                seen.insert(field),
                "Field '{field}' is mapped by more than one column"
            );
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating mapping file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing mapping YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening mapping file {path:?}"))?;
        let reader = BufReader::new(file);
        let set: MappingSet = serde_yaml::from_reader(reader).context("Parsing mapping YAML")?;
        set.ensure_consistent()
            .with_context(|| format!("Validating mapping file {path:?}"))?;
        Ok(set)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MappingValidation {
    pub valid: bool,
    /// Labels of required fields no column is mapped to.
    pub missing_required: Vec<String>,
}

/// A mapping is complete when every required field has a source column.
pub fn validate_mapping(mappings: &MappingSet, entity: EntityType) -> MappingValidation {
    let mapped = mappings.mapped().map(|(_, field)| field).collect::<HashSet<_>>();
    let missing_required = required_fields_for(entity)
        .into_iter()
        .filter(|field| !mapped.contains(field.name))
        .map(|field| field.label.to_string())
        .collect::<Vec<_>>();
    MappingValidation {
        valid: missing_required.is_empty(),
        missing_required,
    }
}

/// First few distinct, non-empty, trimmed values of `header`.
pub fn sample_values(rows: &[Row], header: &str, scan_rows: usize) -> Vec<String> {
    rows.iter()
        .take(scan_rows)
        .filter_map(|row| row.get(header))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .unique()
        .take(MAX_SAMPLE_VALUES)
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct ColumnMapper {
    pub match_threshold: f64,
    pub high_confidence_threshold: f64,
    pub sample_rows: usize,
}

impl Default for ColumnMapper {
    fn default() -> Self {
        Self {
            match_threshold: MATCH_THRESHOLD,
            high_confidence_threshold: HIGH_CONFIDENCE_THRESHOLD,
            sample_rows: MAPPING_SAMPLE_ROWS,
        }
    }
}

impl ColumnMapper {
    pub fn from_settings(settings: &ImportSettings) -> Self {
        Self {
            match_threshold: settings.match_threshold,
            high_confidence_threshold: settings.high_confidence_threshold,
            sample_rows: settings.mapping_sample_rows,
        }
    }

    /// Best field index and score for one header; ties keep the earlier field.
    fn best_field(&self, header: &str, fields: &[FieldDefinition]) -> Option<(usize, f64)> {
        let normalized = normalize(header);
        if normalized.is_empty() {
            return None;
        }
        let mut best: Option<(usize, f64)> = None;
        for (idx, field) in fields.iter().enumerate() {
            let score = field_score(&normalized, field);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((idx, score));
            }
        }
        best
    }

    pub fn auto_map(&self, headers: &[String], rows: &[Row], entity: EntityType) -> MappingSet {
        let fields = fields_for(entity);
        let best = headers
            .iter()
            .map(|header| self.best_field(header, fields))
            .collect::<Vec<_>>();

        let mut claimed = vec![false; fields.len()];
        let mut assigned: Vec<Option<(usize, f64)>> = vec![None; headers.len()];
        for high_confidence_pass in [true, false] {
            for (idx, candidate) in best.iter().enumerate() {
                let Some((field_idx, score)) = *candidate else {
                    continue;
                };
                let eligible = if high_confidence_pass {
                    score >= self.high_confidence_threshold
                } else {
                    score >= self.match_threshold && score < self.high_confidence_threshold
                };
                if !eligible || assigned[idx].is_some() {
                    continue;
                }
                if claimed[field_idx] {
                    debug!(
                        "'{}' best matches {} ({score:.2}) but it is already claimed",
                        headers[idx], fields[field_idx].name
                    );
                    continue;
                }
                claimed[field_idx] = true;
                assigned[idx] = Some((field_idx, score));
                debug!(
                    "Mapped '{}' -> {} ({score:.2})",
                    headers[idx], fields[field_idx].name
                );
            }
        }

        let columns = headers
            .iter()
            .zip(assigned)
            .map(|(header, assignment)| ColumnMapping {
                csv_column: header.clone(),
                db_field: assignment.map(|(field_idx, _)| fields[field_idx].name.to_string()),
                sample_values: sample_values(rows, header, self.sample_rows),
                confidence: assignment.map(|(_, score)| score),
            })
            .collect();
        MappingSet { entity, columns }
    }
}

/// [`ColumnMapper::auto_map`] with the default thresholds.
pub fn auto_map(headers: &[String], rows: &[Row], entity: EntityType) -> MappingSet {
    ColumnMapper::default().auto_map(headers, rows, entity)
}
