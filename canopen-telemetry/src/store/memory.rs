//! In-process trial store

use super::{StoredFrame, TrialStore};
use crate::types::{AcquisitionError, DecodedFrame, Result};
use std::collections::BTreeMap;

/// Keeps every trial in memory and records the size of each stored batch
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: BTreeMap<u32, Vec<StoredFrame>>,
    last_issued: u32,
    batch_sizes: Vec<usize>,
    failing_stores: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes of the batches passed to `store_data_for_trial`, in call order
    pub fn batch_sizes(&self) -> &[usize] {
        &self.batch_sizes
    }

    /// Make the next `count` store calls fail
    pub fn fail_next_stores(&mut self, count: u32) {
        self.failing_stores = count;
    }
}

impl TrialStore for MemoryStore {
    fn next_trial_number(&mut self) -> Result<u32> {
        let highest = self.tables.keys().next_back().copied().unwrap_or(0);
        self.last_issued = self.last_issued.max(highest) + 1;
        Ok(self.last_issued)
    }

    fn create_table_for_trial(&mut self, trial_number: u32) -> Result<()> {
        self.tables.entry(trial_number).or_default();
        Ok(())
    }

    fn store_data_for_trial(&mut self, batch: &[DecodedFrame], trial_number: u32) -> Result<()> {
        if self.failing_stores > 0 {
            self.failing_stores -= 1;
            return Err(AcquisitionError::Storage("injected store failure".to_string()));
        }

        let table = self.tables.get_mut(&trial_number).ok_or_else(|| {
            AcquisitionError::Storage(format!("no table for trial {}", trial_number))
        })?;
        table.extend(batch.iter().map(|f| StoredFrame::from_decoded(f, trial_number)));
        self.batch_sizes.push(batch.len());
        Ok(())
    }

    fn load_trial(&self, trial_number: u32) -> Result<Vec<StoredFrame>> {
        self.tables
            .get(&trial_number)
            .cloned()
            .ok_or(AcquisitionError::TrialNotFound(trial_number))
    }

    fn list_trials(&self) -> Result<Vec<u32>> {
        Ok(self.tables.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DecodedValues;

    fn frame(id: u32) -> DecodedFrame {
        DecodedFrame {
            pdo_label: "PDO1".to_string(),
            message_id: id,
            values: DecodedValues::new(),
            payload: vec![1, 2, 3],
            dlc: 3,
            flags: 0,
            timestamp_seconds: 1.0,
        }
    }

    #[test]
    fn test_trial_numbers_increase() {
        let mut store = MemoryStore::new();
        let first = store.next_trial_number().unwrap();
        let second = store.next_trial_number().unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);

        store.create_table_for_trial(10).unwrap();
        assert_eq!(store.next_trial_number().unwrap(), 11);
    }

    #[test]
    fn test_create_table_is_idempotent() {
        let mut store = MemoryStore::new();
        store.create_table_for_trial(1).unwrap();
        store.store_data_for_trial(&[frame(390)], 1).unwrap();
        store.create_table_for_trial(1).unwrap();

        assert_eq!(store.list_trials().unwrap(), vec![1]);
        assert_eq!(store.load_trial(1).unwrap().len(), 1);
    }

    #[test]
    fn test_store_requires_table() {
        let mut store = MemoryStore::new();
        assert!(store.store_data_for_trial(&[frame(390)], 7).is_err());
        assert!(matches!(
            store.load_trial(7),
            Err(AcquisitionError::TrialNotFound(7))
        ));
    }

    #[test]
    fn test_rows_keep_raw_payload() {
        let mut store = MemoryStore::new();
        store.create_table_for_trial(3).unwrap();
        store.store_data_for_trial(&[frame(390), frame(646)], 3).unwrap();

        let rows = store.load_trial(3).unwrap();
        assert_eq!(rows[0].message_id, 390);
        assert_eq!(rows[1].message_id, 646);
        assert_eq!(rows[1].payload, vec![1, 2, 3]);
        assert_eq!(rows[1].trial_number, 3);
        assert_eq!(store.batch_sizes(), &[2]);
    }
}
