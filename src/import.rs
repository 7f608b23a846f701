//! Sample validation and full import execution.
//!
//! Both passes share one preparation step: every row is validated, and rows
//! that pass are transformed into canonical values. Preparation is pure and
//! runs on the rayon pool when [`ImportSettings::parallel`] is set; results
//! are collected back in input order. Writes then happen strictly in row
//! order against the [`RecordStore`], one row at a time, so a store failure
//! only ever affects the row being written.

use std::fmt;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::ImportSettings,
    data::Value,
    mapping::MappingSet,
    parser::{ParsedFile, Row},
    schema::{EntityType, default_duplicate_key, field_by_name},
    store::{Fields, RecordStore},
    transform::{CanonicalRow, transform_row},
    validate::{ValidationError, validate_row},
};

pub const SAMPLE_VALIDATION_ROWS: usize = 100;
/// Field name used on errors raised by the store rather than by a cell.
pub const RECORD_ERROR_FIELD: &str = "record";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateHandling {
    #[default]
    Skip,
    Update,
    CreateNew,
}

impl DuplicateHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateHandling::Skip => "skip",
            DuplicateHandling::Update => "update",
            DuplicateHandling::CreateNew => "create_new",
        }
    }
}

impl fmt::Display for DuplicateHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Duplicate key '{key}' is not a {entity} field")]
    UnknownDuplicateKey { key: String, entity: EntityType },
    #[error("Mapping is for {mapping}, not {entity}")]
    EntityMismatch {
        mapping: EntityType,
        entity: EntityType,
    },
}

fn ensure_same_entity(mappings: &MappingSet, entity: EntityType) -> Result<(), ConfigError> {
    if mappings.entity != entity {
        return Err(ConfigError::EntityMismatch {
            mapping: mappings.entity,
            entity,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportConfig {
    pub duplicate_handling: DuplicateHandling,
    pub duplicate_key: String,
    pub skip_invalid_rows: bool,
}

impl ImportConfig {
    /// Skip duplicates, match on the entity's default key, fail invalid rows.
    pub fn for_entity(entity: EntityType) -> Self {
        Self {
            duplicate_handling: DuplicateHandling::default(),
            duplicate_key: default_duplicate_key(entity).to_string(),
            skip_invalid_rows: false,
        }
    }

    pub fn validate(&self, entity: EntityType) -> Result<(), ConfigError> {
        if field_by_name(entity, &self.duplicate_key).is_none() {
            return Err(ConfigError::UnknownDuplicateKey {
                key: self.duplicate_key.clone(),
                entity,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SampleReport {
    pub rows_checked: usize,
    /// Rows without errors, duplicates included.
    pub valid: usize,
    pub invalid: usize,
    /// Valid rows whose key matches an existing record.
    pub duplicates: usize,
    pub errors: Vec<ValidationError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Imported,
    Updated,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowOutcome {
    pub row: usize,
    pub status: RowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImportResult {
    pub imported: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
    pub errors: Vec<ValidationError>,
    pub outcomes: Vec<RowOutcome>,
}

impl ImportResult {
    fn record(&mut self, row: usize, status: RowStatus, record_id: Option<Uuid>) {
        match status {
            RowStatus::Imported => self.imported += 1,
            RowStatus::Updated => self.updated += 1,
            RowStatus::Skipped => self.skipped += 1,
            RowStatus::Failed => self.failed += 1,
        }
        debug!("Row {row}: {status:?}");
        self.outcomes.push(RowOutcome {
            row,
            status,
            record_id,
        });
    }

    fn record_store_failure(&mut self, row: usize, value: String, message: String) {
        warn!("Row {row}: {message}");
        self.errors.push(ValidationError {
            row,
            field: RECORD_ERROR_FIELD.to_string(),
            value,
            message,
        });
        self.record(row, RowStatus::Failed, None);
    }
}

struct PreparedRow {
    row: usize,
    errors: Vec<ValidationError>,
    canonical: Option<CanonicalRow>,
}

fn prepare_row(idx: usize, row: &Row, mappings: &MappingSet, entity: EntityType) -> PreparedRow {
    let row_index = idx + 1;
    let errors = validate_row(row, mappings, entity, row_index);
    let canonical = errors
        .is_empty()
        .then(|| transform_row(row, mappings, entity));
    PreparedRow {
        row: row_index,
        errors,
        canonical,
    }
}

fn prepare(
    rows: &[Row],
    mappings: &MappingSet,
    entity: EntityType,
    parallel: bool,
) -> Vec<PreparedRow> {
    if parallel {
        rows.par_iter()
            .enumerate()
            .map(|(idx, row)| prepare_row(idx, row, mappings, entity))
            .collect()
    } else {
        rows.iter()
            .enumerate()
            .map(|(idx, row)| prepare_row(idx, row, mappings, entity))
            .collect()
    }
}

/// Non-empty value of the duplicate key, if the row carries one.
fn key_value<'a>(canonical: &'a CanonicalRow, key: &str) -> Option<&'a Value> {
    canonical
        .get(key)
        .and_then(Option::as_ref)
        .filter(|value| !value.match_key().is_empty())
}

/// Non-null canonical values; nulls never overwrite stored data.
fn present_fields(canonical: CanonicalRow) -> Fields {
    canonical
        .into_iter()
        .filter_map(|(field, value)| value.map(|value| (field, value)))
        .collect()
}

/// Validates the first `settings.sample_size` rows and counts duplicates.
///
/// Duplicates are only looked up against existing records, never between
/// rows of the same file. Store lookup failures are logged and the row is
/// counted as valid but not duplicate. Fails only when `mappings` belongs to
/// another entity.
pub fn validate_sample<S>(
    parsed: &ParsedFile,
    mappings: &MappingSet,
    entity: EntityType,
    duplicate_key: &str,
    store: &S,
    settings: &ImportSettings,
) -> Result<SampleReport, ConfigError>
where
    S: RecordStore + ?Sized,
{
    ensure_same_entity(mappings, entity)?;
    let sample = &parsed.rows[..parsed.rows.len().min(settings.sample_size)];
    let mut report = SampleReport {
        rows_checked: sample.len(),
        ..SampleReport::default()
    };
    for prepared in prepare(sample, mappings, entity, settings.parallel) {
        let Some(canonical) = prepared.canonical else {
            report.invalid += 1;
            report.errors.extend(prepared.errors);
            continue;
        };
        report.valid += 1;
        let Some(value) = key_value(&canonical, duplicate_key) else {
            continue;
        };
        match store.find_by_key(entity, duplicate_key, value) {
            Ok(Some(_)) => report.duplicates += 1,
            Ok(None) => {}
            Err(err) => warn!("Row {}: duplicate lookup failed: {err}", prepared.row),
        }
    }
    info!(
        "Sample of {} row(s): {} valid, {} invalid, {} duplicate(s)",
        report.rows_checked, report.valid, report.invalid, report.duplicates
    );
    Ok(report)
}

/// Imports every row of `parsed`, tolerating per-row failures.
///
/// Only an invalid `config`, or `mappings` built for another entity, aborts
/// the run; everything else is recorded on the returned [`ImportResult`].
pub fn execute<S>(
    parsed: &ParsedFile,
    mappings: &MappingSet,
    entity: EntityType,
    config: &ImportConfig,
    store: &mut S,
    settings: &ImportSettings,
) -> Result<ImportResult, ConfigError>
where
    S: RecordStore + ?Sized,
{
    config.validate(entity)?;
    ensure_same_entity(mappings, entity)?;
    info!(
        "Importing {} {} row(s) from {} (duplicates: {}, key: {})",
        parsed.rows.len(),
        entity.as_str(),
        parsed.file_name,
        config.duplicate_handling,
        config.duplicate_key
    );

    let prepared = prepare(&parsed.rows, mappings, entity, settings.parallel);
    let mut result = ImportResult {
        total: prepared.len(),
        ..ImportResult::default()
    };

    for PreparedRow {
        row,
        errors,
        canonical,
    } in prepared
    {
        let Some(canonical) = canonical else {
            result.errors.extend(errors);
            let status = if config.skip_invalid_rows {
                RowStatus::Skipped
            } else {
                RowStatus::Failed
            };
            result.record(row, status, None);
            continue;
        };

        let key = key_value(&canonical, &config.duplicate_key).cloned();
        let existing = match &key {
            Some(value) => match store.find_by_key(entity, &config.duplicate_key, value) {
                Ok(existing) => existing,
                Err(err) => {
                    result.record_store_failure(
                        row,
                        value.as_display(),
                        format!("Duplicate lookup failed: {err}"),
                    );
                    continue;
                }
            },
            None => None,
        };
        let key_display = key.as_ref().map(Value::as_display).unwrap_or_default();
        let fields = present_fields(canonical);

        let written = match (existing, config.duplicate_handling) {
            (Some(existing), DuplicateHandling::Skip) => {
                debug!(
                    "Row {row}: {} '{key_display}' already exists as {}",
                    config.duplicate_key, existing.id
                );
                result.record(row, RowStatus::Skipped, Some(existing.id));
                continue;
            }
            (Some(existing), DuplicateHandling::Update) => store
                .update(entity, existing.id, fields)
                .map(|record| (RowStatus::Updated, record.id)),
            (Some(_), DuplicateHandling::CreateNew) | (None, _) => store
                .insert(entity, fields)
                .map(|record| (RowStatus::Imported, record.id)),
        };
        match written {
            Ok((status, id)) => result.record(row, status, Some(id)),
            Err(err) => result.record_store_failure(
                row,
                key_display,
                format!("Failed to write record: {err}"),
            ),
        }
    }

    info!(
        "Import finished: {} imported, {} updated, {} skipped, {} failed of {}",
        result.imported, result.updated, result.skipped, result.failed, result.total
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mapping::auto_map,
        parser::SourceFormat,
        store::{MemoryStore, Record, StoreError},
    };

    fn parsed(headers: &[&str], rows: &[&[&str]]) -> ParsedFile {
        ParsedFile::from_records(
            "upload.csv",
            SourceFormat::Csv,
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
        .unwrap()
    }

    /// Accepts lookups but refuses every write.
    struct ReadOnlyStore;

    impl RecordStore for ReadOnlyStore {
        fn find_by_key(
            &self,
            _: EntityType,
            _: &str,
            _: &Value,
        ) -> Result<Option<Record>, StoreError> {
            Ok(None)
        }

        fn insert(&mut self, _: EntityType, _: Fields) -> Result<Record, StoreError> {
            Err(StoreError::Rejected("read only".into()))
        }

        fn update(&mut self, _: EntityType, _: Uuid, _: Fields) -> Result<Record, StoreError> {
            Err(StoreError::Rejected("read only".into()))
        }
    }

    #[test]
    fn config_rejects_unknown_duplicate_key() {
        let mut config = ImportConfig::for_entity(EntityType::Lead);
        assert_eq!(config.duplicate_key, "name");
        config.validate(EntityType::Lead).unwrap();
        config.duplicate_key = "shoe_size".into();
        assert_eq!(
            config.validate(EntityType::Lead),
            Err(ConfigError::UnknownDuplicateKey {
                key: "shoe_size".into(),
                entity: EntityType::Lead
            })
        );
    }

    #[test]
    fn duplicate_handling_uses_snake_case_names() {
        let yaml = serde_yaml::to_string(&DuplicateHandling::CreateNew).unwrap();
        assert_eq!(yaml.trim(), "create_new");
        let parsed: DuplicateHandling = serde_json::from_str("\"update\"").unwrap();
        assert_eq!(parsed, DuplicateHandling::Update);
    }

    #[test]
    fn failed_writes_are_recorded_and_do_not_stop_the_batch() {
        let file = parsed(&["Name"], &[&["Acme"], &["Globex"]]);
        let mappings = auto_map(&file.headers, &file.rows, EntityType::Client);
        let config = ImportConfig::for_entity(EntityType::Client);
        let result = execute(
            &file,
            &mappings,
            EntityType::Client,
            &config,
            &mut ReadOnlyStore,
            &ImportSettings::default(),
        )
        .unwrap();
        assert_eq!(result.failed, 2);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().all(|e| e.field == RECORD_ERROR_FIELD));
        assert_eq!(result.errors[1].row, 2);
        assert_eq!(result.errors[1].value, "Globex");
    }

    #[test]
    fn sequential_and_parallel_preparation_agree() {
        let file = parsed(
            &["Name", "Lead Score"],
            &[&["A", "10"], &["B", "x"], &["C", "101"], &["D", "55"]],
        );
        let mappings = auto_map(&file.headers, &file.rows, EntityType::Lead);
        let run = |parallel: bool| {
            let settings = ImportSettings {
                parallel,
                ..ImportSettings::default()
            };
            let mut store = MemoryStore::new();
            let result = execute(
                &file,
                &mappings,
                EntityType::Lead,
                &ImportConfig::for_entity(EntityType::Lead),
                &mut store,
                &settings,
            )
            .unwrap();
            (
                result.errors,
                result
                    .outcomes
                    .iter()
                    .map(|o| (o.row, o.status))
                    .collect::<Vec<_>>(),
            )
        };
        assert_eq!(run(true), run(false));
    }

    #[test]
    fn sample_only_checks_configured_row_count() {
        let file = parsed(
            &["Name", "Email"],
            &[&["A", "a@x.io"], &["B", "bad"], &["C", "c@x.io"]],
        );
        let mappings = auto_map(&file.headers, &file.rows, EntityType::Lead);
        let settings = ImportSettings {
            sample_size: 2,
            ..ImportSettings::default()
        };
        let report = validate_sample(
            &file,
            &mappings,
            EntityType::Lead,
            "name",
            &MemoryStore::new(),
            &settings,
        )
        .unwrap();
        assert_eq!(report.rows_checked, 2);
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.errors[0].row, 2);
    }

    #[test]
    fn mapping_for_another_entity_is_rejected() {
        let file = parsed(&["Name", "Email"], &[&["Acme", "a@x.io"]]);
        let mappings = auto_map(&file.headers, &file.rows, EntityType::Lead);
        let mut store = MemoryStore::new();
        let err = execute(
            &file,
            &mappings,
            EntityType::Client,
            &ImportConfig::for_entity(EntityType::Client),
            &mut store,
            &ImportSettings::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::EntityMismatch {
                mapping: EntityType::Lead,
                entity: EntityType::Client
            }
        );
        assert!(store.is_empty());

        let sample = validate_sample(
            &file,
            &mappings,
            EntityType::Client,
            "name",
            &store,
            &ImportSettings::default(),
        );
        assert!(sample.is_err());
    }
}
