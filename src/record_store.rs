//! Record store for one job's extracted labels.
//!
//! The job controller appends while any number of editors list, update and
//! delete. Every operation takes the single lock only for its own duration.
//!
//! Records are addressed by *position*, the current index in `list()` order.
//! Deleting a record shifts every later position down by one, so callers must
//! re-list before addressing by position again. Each record also carries a
//! `record_id` assigned at append time that never shifts and is never reused;
//! [`RecordStore::position_of`] maps it back to the current position.

use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::record::{FieldValue, Record, RecordField};

/// A record as seen by a reader, with its current position and stable id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordView {
    pub position: usize,
    pub record_id: u64,
    pub has_region: bool,
    #[serde(flatten)]
    pub record: Record,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<(u64, Record)>,
    next_id: u64,
}

impl Inner {
    fn view(&self, position: usize) -> Option<RecordView> {
        self.entries.get(position).map(|(id, record)| RecordView {
            position,
            record_id: *id,
            has_region: record.has_region(),
            record: record.clone(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    inner: Arc<RwLock<Inner>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, returning its position.
    pub fn append(&self, record: Record) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push((id, record));
        let position = inner.entries.len() - 1;
        tracing::trace!("RecordStore: appended record {} at position {}", id, position);
        position
    }

    /// Ordered snapshot of all records with their current positions.
    pub fn list(&self) -> Vec<RecordView> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        (0..inner.entries.len())
            .filter_map(|position| inner.view(position))
            .collect()
    }

    /// Plain records in list order, for export and statistics.
    pub fn snapshot(&self) -> Vec<Record> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.iter().map(|(_, record)| record.clone()).collect()
    }

    pub fn get(&self, position: usize) -> Option<RecordView> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.view(position)
    }

    /// Current position of the record with the given stable id.
    pub fn position_of(&self, record_id: u64) -> Option<usize> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.iter().position(|(id, _)| *id == record_id)
    }

    /// Set one field of the record at `position`.
    ///
    /// Fails with [`Error::InvalidFieldName`] for an unknown field and
    /// [`Error::RecordNotFound`] for an unknown position; nothing changes on
    /// failure.
    pub fn update(&self, position: usize, field: &str, value: FieldValue) -> Result<RecordView> {
        let field: RecordField = field.parse()?;
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let (_, record) = inner
            .entries
            .get_mut(position)
            .ok_or(Error::RecordNotFound(position))?;
        record.set(field, value)?;

        tracing::debug!("RecordStore: updated {} at position {}", field, position);
        inner.view(position).ok_or(Error::RecordNotFound(position))
    }

    /// Remove the record at `position`, compacting the positions after it.
    pub fn delete(&self, position: usize) -> Result<RecordView> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let removed = inner.view(position).ok_or(Error::RecordNotFound(position))?;
        inner.entries.remove(position);
        tracing::debug!(
            "RecordStore: deleted record {} at position {}",
            removed.record_id,
            position
        );
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sample_record;

    fn store_with(tags: &[&str]) -> RecordStore {
        let store = RecordStore::new();
        for (i, tag) in tags.iter().enumerate() {
            store.append(sample_record(tag, i as u32 + 1));
        }
        store
    }

    #[test]
    fn test_append_and_list() {
        let store = store_with(&["MSBAA110", "MDPAA110"]);

        let records = store.list();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].position, 0);
        assert_eq!(records[1].record.device_tag, "MDPAA110");
        assert_eq!(records[1].record.source_page, 2);
    }

    #[test]
    fn test_update_visible_on_next_list() {
        let store = store_with(&["EDC ATL11 MSBBA110"]);

        store.update(0, "device_tag", "MSBAA110".into()).unwrap();

        assert_eq!(store.list()[0].record.device_tag, "MSBAA110");
    }

    #[test]
    fn test_update_unknown_position() {
        let store = store_with(&["A", "B", "C"]);

        let err = store.update(99, "device_tag", "X".into()).unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(99)));
        assert!(store.list().iter().all(|r| r.record.device_tag != "X"));
    }

    #[test]
    fn test_update_unknown_field() {
        let store = store_with(&["A"]);

        let err = store.update(0, "voltage", "480V".into()).unwrap_err();
        assert!(matches!(err, Error::InvalidFieldName(_)));
        assert_eq!(store.snapshot()[0], sample_record("A", 1));
    }

    #[test]
    fn test_delete_compacts_positions() {
        let store = store_with(&["A", "B", "C"]);

        let removed = store.delete(1).unwrap();
        assert_eq!(removed.record.device_tag, "B");

        let records = store.list();
        assert_eq!(records.len(), 2);
        let positions: Vec<usize> = records.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0, 1]);
        assert_eq!(records[1].record.device_tag, "C");

        assert!(matches!(store.delete(2), Err(Error::RecordNotFound(2))));
    }

    #[test]
    fn test_record_ids_survive_delete() {
        let store = store_with(&["A", "B", "C"]);
        let c_id = store.list()[2].record_id;

        store.delete(0).unwrap();
        assert_eq!(store.position_of(c_id), Some(1));

        // Ids are not reused after a delete.
        store.append(sample_record("D", 4));
        let ids: Vec<u64> = store.list().iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_concurrent_append_and_edit() {
        let store = RecordStore::new();
        store.append(sample_record("SEED", 1));

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    store.append(sample_record(&format!("W{}", i), 2));
                }
            })
        };
        let editor = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    store.update(0, "specs", format!("{}A 480V", i).into()).unwrap();
                    let list = store.list();
                    for (expected, view) in list.iter().enumerate() {
                        assert_eq!(view.position, expected);
                    }
                }
            })
        };

        writer.join().unwrap();
        editor.join().unwrap();
        assert_eq!(store.len(), 201);
        assert_eq!(store.list()[0].record.specs.as_deref(), Some("199A 480V"));
    }
}
