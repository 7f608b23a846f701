//! Record persistence behind the [`RecordStore`] trait.
//!
//! The import executor only ever looks records up by a single key field,
//! inserts new ones, or merges fields into an existing one. Two
//! implementations ship with the crate:
//!
//! - [`MemoryStore`]: a plain vector of records, used by tests and embedders.
//! - [`JournalStore`]: the same in-memory view backed by a JSON-lines journal.
//!   Every write appends and flushes one line, and opening a journal replays
//!   it, so an interrupted import leaves exactly the rows written so far.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{data::Value, schema::EntityType};

/// Canonical field values of a stored record.
pub type Fields = BTreeMap<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: Uuid,
    pub entity: EntityType,
    pub fields: Fields,
}

impl Record {
    /// Whether `field` holds a value equal to `key` under duplicate matching.
    pub fn matches(&self, field: &str, key: &str) -> bool {
        self.fields
            .get(field)
            .is_some_and(|value| value.match_key() == key)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No {entity} record with id {id}")]
    NotFound { entity: EntityType, id: Uuid },
    #[error("I/O error on record journal {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed journal entry at line {line}: {source}")]
    Serde {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Record rejected: {0}")]
    Rejected(String),
}

pub trait RecordStore {
    /// First record of `entity` whose `field` matches `value`.
    ///
    /// Matching is case-insensitive on the trimmed display form; an empty key
    /// never matches anything.
    fn find_by_key(
        &self,
        entity: EntityType,
        field: &str,
        value: &Value,
    ) -> Result<Option<Record>, StoreError>;

    fn insert(&mut self, entity: EntityType, fields: Fields) -> Result<Record, StoreError>;

    /// Overwrites the given fields on an existing record, keeping the rest.
    fn update(&mut self, entity: EntityType, id: Uuid, fields: Fields)
    -> Result<Record, StoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Vec<Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, entity: EntityType) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(move |r| r.entity == entity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn apply(&mut self, record: Record) {
        match self.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    fn merged(&self, entity: EntityType, id: Uuid, fields: Fields) -> Result<Record, StoreError> {
        let mut record = self
            .records
            .iter()
            .find(|r| r.id == id && r.entity == entity)
            .cloned()
            .ok_or(StoreError::NotFound { entity, id })?;
        record.fields.extend(fields);
        Ok(record)
    }
}

impl RecordStore for MemoryStore {
    fn find_by_key(
        &self,
        entity: EntityType,
        field: &str,
        value: &Value,
    ) -> Result<Option<Record>, StoreError> {
        let key = value.match_key();
        if key.is_empty() {
            return Ok(None);
        }
        Ok(self
            .records(entity)
            .find(|record| record.matches(field, &key))
            .cloned())
    }

    fn insert(&mut self, entity: EntityType, fields: Fields) -> Result<Record, StoreError> {
        if fields.is_empty() {
            return Err(StoreError::Rejected("record has no fields".to_string()));
        }
        let record = Record {
            id: Uuid::new_v4(),
            entity,
            fields,
        };
        self.records.push(record.clone());
        Ok(record)
    }

    fn update(
        &mut self,
        entity: EntityType,
        id: Uuid,
        fields: Fields,
    ) -> Result<Record, StoreError> {
        let record = self.merged(entity, id, fields)?;
        self.apply(record.clone());
        Ok(record)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum JournalOp {
    Insert,
    Update,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    op: JournalOp,
    record: Record,
}

/// A [`MemoryStore`] persisted as an append-only JSON-lines journal.
#[derive(Debug)]
pub struct JournalStore {
    path: PathBuf,
    memory: MemoryStore,
    file: File,
}

impl JournalStore {
    /// Opens (or creates) the journal at `path` and replays its entries.
    ///
    /// A final line without a trailing newline that fails to parse is the
    /// remains of an interrupted write: it is cut off and the complete
    /// entries before it are kept. A malformed terminated line is an error.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let io_error = |source: io::Error| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut memory = MemoryStore::new();
        let mut truncate_to = None;
        let mut missing_newline = false;
        if path.exists() {
            let contents = fs::read(path).map_err(io_error)?;
            let mut offset = 0usize;
            for (idx, line) in contents.split_inclusive(|b| *b == b'\n').enumerate() {
                let start = offset;
                offset += line.len();
                let terminated = line.ends_with(b"\n");
                let text = line.trim_ascii();
                if text.is_empty() {
                    continue;
                }
                match serde_json::from_slice::<JournalEntry>(text) {
                    Ok(entry) => {
                        missing_newline = !terminated;
                        match entry.op {
                            JournalOp::Insert => memory.records.push(entry.record),
                            JournalOp::Update => memory.apply(entry.record),
                        }
                    }
                    Err(source) if !terminated => {
                        warn!(
                            "Discarding incomplete entry at line {} of journal {path:?}: {source}",
                            idx + 1
                        );
                        truncate_to = Some(start as u64);
                    }
                    Err(source) => {
                        return Err(StoreError::Serde {
                            line: idx + 1,
                            source,
                        });
                    }
                }
            }
            debug!(
                "Replayed {} record(s) from journal {path:?}",
                memory.len()
            );
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_error)?;
        if let Some(len) = truncate_to {
            file.set_len(len).map_err(io_error)?;
        }
        if missing_newline {
            file.write_all(b"\n")
                .and_then(|_| file.flush())
                .map_err(io_error)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            memory,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    fn append(&mut self, op: JournalOp, record: &Record) -> Result<(), StoreError> {
        let entry = JournalEntry {
            op,
            record: record.clone(),
        };
        let mut line =
            serde_json::to_vec(&entry).map_err(|source| StoreError::Serde { line: 0, source })?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .and_then(|_| self.file.flush())
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

impl RecordStore for JournalStore {
    fn find_by_key(
        &self,
        entity: EntityType,
        field: &str,
        value: &Value,
    ) -> Result<Option<Record>, StoreError> {
        self.memory.find_by_key(entity, field, value)
    }

    fn insert(&mut self, entity: EntityType, fields: Fields) -> Result<Record, StoreError> {
        if fields.is_empty() {
            return Err(StoreError::Rejected("record has no fields".to_string()));
        }
        let record = Record {
            id: Uuid::new_v4(),
            entity,
            fields,
        };
        self.append(JournalOp::Insert, &record)?;
        self.memory.apply(record.clone());
        Ok(record)
    }

    fn update(
        &mut self,
        entity: EntityType,
        id: Uuid,
        fields: Fields,
    ) -> Result<Record, StoreError> {
        let record = self.memory.merged(entity, id, fields)?;
        self.append(JournalOp::Update, &record)?;
        self.memory.apply(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn find_by_key_is_case_insensitive_and_trimmed() {
        let mut store = MemoryStore::new();
        store
            .insert(EntityType::Contact, fields(&[("email", "Ada@Example.com")]))
            .unwrap();
        let hit = store
            .find_by_key(
                EntityType::Contact,
                "email",
                &Value::String("  ada@example.COM ".into()),
            )
            .unwrap();
        assert!(hit.is_some());
        let other_entity = store
            .find_by_key(
                EntityType::Lead,
                "email",
                &Value::String("ada@example.com".into()),
            )
            .unwrap();
        assert!(other_entity.is_none());
    }

    #[test]
    fn empty_key_never_matches() {
        let mut store = MemoryStore::new();
        store
            .insert(EntityType::Lead, fields(&[("name", ""), ("email", "x@y.z")]))
            .unwrap();
        let hit = store
            .find_by_key(EntityType::Lead, "name", &Value::String("   ".into()))
            .unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn update_merges_fields() {
        let mut store = MemoryStore::new();
        let record = store
            .insert(
                EntityType::Client,
                fields(&[("name", "Acme"), ("city", "Paris")]),
            )
            .unwrap();
        let updated = store
            .update(EntityType::Client, record.id, fields(&[("city", "Lyon")]))
            .unwrap();
        assert_eq!(updated.fields["name"], Value::String("Acme".into()));
        assert_eq!(updated.fields["city"], Value::String("Lyon".into()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_unknown_record_is_not_found() {
        let mut store = MemoryStore::new();
        let err = store
            .update(EntityType::Contact, Uuid::new_v4(), fields(&[("city", "x")]))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn journal_replays_inserts_and_updates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let id = {
            let mut store = JournalStore::open(&path).unwrap();
            let record = store
                .insert(EntityType::Contact, fields(&[("email", "a@b.co")]))
                .unwrap();
            store
                .update(
                    EntityType::Contact,
                    record.id,
                    fields(&[("first_name", "Ada")]),
                )
                .unwrap();
            store
                .insert(EntityType::Contact, fields(&[("email", "c@d.co")]))
                .unwrap();
            record.id
        };

        let reopened = JournalStore::open(&path).unwrap();
        assert_eq!(reopened.memory().len(), 2);
        let record = reopened
            .find_by_key(
                EntityType::Contact,
                "email",
                &Value::String("A@B.CO".into()),
            )
            .unwrap()
            .unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.fields["first_name"], Value::String("Ada".into()));
    }

    #[test]
    fn journal_reports_malformed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        std::fs::write(&path, "{\"op\":\"insert\"}\n").unwrap();
        let err = JournalStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Serde { line: 1, .. }));
    }

    #[test]
    fn journal_drops_interrupted_final_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        {
            let mut store = JournalStore::open(&path).unwrap();
            store
                .insert(EntityType::Contact, fields(&[("email", "a@b.co")]))
                .unwrap();
        }
        let complete = fs::read_to_string(&path).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"op":"insert","record":{"id":""#).unwrap();
        drop(file);

        let mut store = JournalStore::open(&path).unwrap();
        assert_eq!(store.memory().len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), complete);

        store
            .insert(EntityType::Contact, fields(&[("email", "c@d.co")]))
            .unwrap();
        drop(store);
        let reopened = JournalStore::open(&path).unwrap();
        assert_eq!(reopened.memory().len(), 2);
    }

    #[test]
    fn journal_completes_unterminated_valid_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        {
            let mut store = JournalStore::open(&path).unwrap();
            store
                .insert(EntityType::Lead, fields(&[("name", "Acme")]))
                .unwrap();
        }
        let trimmed = fs::read_to_string(&path).unwrap().trim_end().to_string();
        fs::write(&path, &trimmed).unwrap();

        let mut store = JournalStore::open(&path).unwrap();
        store
            .insert(EntityType::Lead, fields(&[("name", "Globex")]))
            .unwrap();
        drop(store);
        let reopened = JournalStore::open(&path).unwrap();
        assert_eq!(reopened.memory().len(), 2);
    }

    #[test]
    fn journal_rejects_malformed_line_before_valid_ones() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        {
            let mut store = JournalStore::open(&path).unwrap();
            store
                .insert(EntityType::Client, fields(&[("name", "Acme")]))
                .unwrap();
        }
        let valid = fs::read_to_string(&path).unwrap();
        fs::write(&path, format!("{{\"op\":\"ins\n{valid}")).unwrap();
        let err = JournalStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Serde { line: 1, .. }));
    }
}
