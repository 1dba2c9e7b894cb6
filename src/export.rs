//! CSV export of completed reports.
//!
//! Records are flattened through `serde_json` (with `preserve_order`), so the
//! header follows the first record's field order. Each report gets its own
//! file, named after its token.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Export error types.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("report has no rows to export")]
    EmptyResult,
    #[error("record {0} is not a flat object")]
    NotFlat(usize),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A written export and the CSV it holds.
#[derive(Debug)]
pub struct Export {
    pub path: PathBuf,
    pub csv: String,
}

/// Location of the exported file for a report.
pub fn artifact_path(dir: &Path, report_id: &str) -> PathBuf {
    dir.join(format!("report-{}.csv", report_id))
}

/// Render records as CSV text: a header row, then one row per record.
pub fn render_csv<T: Serialize>(records: &[T]) -> Result<String, ExportError> {
    let rows = records
        .iter()
        .enumerate()
        .map(|(i, record)| match serde_json::to_value(record)? {
            Value::Object(map) => Ok(map),
            _ => Err(ExportError::NotFlat(i)),
        })
        .collect::<Result<Vec<Map<String, Value>>, ExportError>>()?;

    let header: Vec<String> = rows
        .first()
        .ok_or(ExportError::EmptyResult)?
        .keys()
        .cloned()
        .collect();

    let mut csv = String::new();
    push_row(&mut csv, header.iter().map(|h| escape_csv(h)).collect());

    for (i, row) in rows.iter().enumerate() {
        let cells = header
            .iter()
            .map(|key| match row.get(key) {
                None | Some(Value::Null) => Ok(String::new()),
                Some(v) => format_cell(v).ok_or(ExportError::NotFlat(i)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        push_row(&mut csv, cells);
    }

    Ok(csv)
}

/// Write a report's CSV to `<dir>/report-<id>.csv`.
///
/// The file is written under a unique temporary name and renamed into place,
/// so a reader never observes a partially written export.
pub fn export_report<T: Serialize>(
    dir: &Path,
    report_id: &str,
    records: &[T],
) -> Result<Export, ExportError> {
    let csv = render_csv(records)?;

    fs::create_dir_all(dir)?;
    let path = artifact_path(dir, report_id);
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let tmp = dir.join(format!("report-{}.csv.{}.tmp", report_id, suffix));

    if let Err(e) = fs::write(&tmp, &csv).and_then(|_| fs::rename(&tmp, &path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    tracing::debug!("Exported {} rows to {}", records.len(), path.display());
    Ok(Export { path, csv })
}

fn push_row(csv: &mut String, cells: Vec<String>) {
    csv.push_str(&cells.join(","));
    csv.push_str("\r\n");
}

fn format_cell(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(escape_csv(s)),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
