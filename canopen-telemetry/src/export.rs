//! CSV export of stored trials
//!
//! Rows are read back from the store and re-decoded through the field map.
//! Columns: trial number, timestamp, message id, PDO label, DLC, flags, then
//! one column per field name (blank when the field is absent in a frame).

use crate::decoder::decode;
use crate::field_map::FieldMap;
use crate::store::TrialStore;
use crate::types::{AcquisitionError, Result};
use chrono::Local;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const FIXED_COLUMNS: [&str; 6] = [
    "Trial Number",
    "Timestamp",
    "Message ID",
    "PDO Label",
    "DLC",
    "Flags",
];

/// Write one trial as CSV; returns the number of data rows written
pub fn export_trial<S, W>(store: &S, field_map: &FieldMap, trial_number: u32, writer: W) -> Result<usize>
where
    S: TrialStore + ?Sized,
    W: Write,
{
    let rows = store.load_trial(trial_number)?;
    let field_names = field_map.field_names();
    let mut writer = BufWriter::new(writer);

    let header: Vec<&str> = FIXED_COLUMNS.iter().copied().chain(field_names.iter().copied()).collect();
    write_record(&mut writer, header)?;

    for row in &rows {
        let values = decode(field_map, row.message_id, &row.payload);

        let mut record = vec![
            row.trial_number.to_string(),
            row.timestamp_seconds.to_string(),
            row.message_id.to_string(),
            field_map.pdo_label(row.message_id).to_string(),
            row.payload.len().to_string(),
            // Flags are not persisted
            "0".to_string(),
        ];
        record.extend(field_names.iter().map(|name| {
            values
                .get(*name)
                .map(|v| v.value.to_string())
                .unwrap_or_default()
        }));

        write_record(&mut writer, record)?;
    }

    writer.flush()?;
    Ok(rows.len())
}

/// Export a trial to `<dir>/trial_<n>_<YYYYmmdd_HHMMSS>.csv`
pub fn export_trial_to_dir<S>(store: &S, field_map: &FieldMap, trial_number: u32, dir: &Path) -> Result<PathBuf>
where
    S: TrialStore + ?Sized,
{
    fs::create_dir_all(dir)?;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("trial_{}_{}.csv", trial_number, timestamp));

    let file = File::create(&path)
        .map_err(|e| AcquisitionError::Export(format!("cannot create {:?}: {}", path, e)))?;
    let rows = export_trial(store, field_map, trial_number, file)?;

    log::info!("Exported trial {} ({} rows) to {:?}", trial_number, rows, path);
    Ok(path)
}

fn write_record<W, I, T>(writer: &mut W, fields: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let line = fields
        .into_iter()
        .map(|f| escape(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(writer, "{}", line)?;
    Ok(())
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
