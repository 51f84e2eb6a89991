//! Directory-backed trial store
//!
//! Each trial is one `trial_<n>.jsonl` file holding one JSON row per frame.
//! Trial numbers continue from the highest file found in the directory, so
//! numbering survives restarts.

use super::{StoredFrame, TrialStore};
use crate::types::{AcquisitionError, DecodedFrame, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const TABLE_PREFIX: &str = "trial_";
const TABLE_EXTENSION: &str = "jsonl";

/// Trial store writing JSON-lines files into a directory
#[derive(Debug)]
pub struct JsonlStore {
    dir: PathBuf,
    last_issued: u32,
}

impl JsonlStore {
    /// Open (and create if needed) a store directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        log::info!("Trial store at {:?}", dir);
        Ok(Self { dir, last_issued: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a trial's table
    pub fn table_path(&self, trial_number: u32) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", TABLE_PREFIX, trial_number, TABLE_EXTENSION))
    }

    fn trial_number_of(path: &Path) -> Option<u32> {
        if path.extension()?.to_str()? != TABLE_EXTENSION {
            return None;
        }
        path.file_stem()?
            .to_str()?
            .strip_prefix(TABLE_PREFIX)?
            .parse()
            .ok()
    }
}

impl TrialStore for JsonlStore {
    fn next_trial_number(&mut self) -> Result<u32> {
        let highest = self.list_trials()?.last().copied().unwrap_or(0);
        self.last_issued = self.last_issued.max(highest) + 1;
        Ok(self.last_issued)
    }

    fn create_table_for_trial(&mut self, trial_number: u32) -> Result<()> {
        let path = self.table_path(trial_number);
        OpenOptions::new().create(true).append(true).open(&path)?;
        log::debug!("Table ready: {:?}", path);
        Ok(())
    }

    fn store_data_for_trial(&mut self, batch: &[DecodedFrame], trial_number: u32) -> Result<()> {
        let path = self.table_path(trial_number);
        let file = OpenOptions::new().append(true).open(&path).map_err(|e| {
            AcquisitionError::Storage(format!("no table for trial {}: {}", trial_number, e))
        })?;

        let mut writer = BufWriter::new(file);
        for frame in batch {
            serde_json::to_writer(&mut writer, &StoredFrame::from_decoded(frame, trial_number))?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        log::debug!("Stored {} frames for trial {}", batch.len(), trial_number);
        Ok(())
    }

    fn load_trial(&self, trial_number: u32) -> Result<Vec<StoredFrame>> {
        let path = self.table_path(trial_number);
        if !path.exists() {
            return Err(AcquisitionError::TrialNotFound(trial_number));
        }

        let mut rows = Vec::new();
        for line in BufReader::new(File::open(&path)?).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str(&line)?);
        }
        Ok(rows)
    }

    fn list_trials(&self) -> Result<Vec<u32>> {
        let mut trials = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            if let Some(number) = Self::trial_number_of(&entry?.path()) {
                trials.push(number);
            }
        }
        trials.sort_unstable();
        Ok(trials)
    }
}
