//! Rewrites catalog exports so image cells point at stored assets.
//!
//! Untouched rows are copied byte for byte from the original file; only rows
//! with at least one substituted cell are re-serialized. The file is replaced
//! through a temp file and a rename.

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::catalog::ItemKind;
use crate::error::{Result, SyncError};
use crate::mapping::MappingEntry;
use crate::util::fs::write_atomic;

/// source URL -> asset URL, borrowed from a mapping snapshot.
pub fn url_index(entries: &[MappingEntry]) -> HashMap<&str, &str> {
    entries
        .iter()
        .map(|e| (e.source_url.as_str(), e.asset_url.as_str()))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    pub rows: usize,
    pub rows_updated: usize,
    pub cells_updated: usize,
}

/// The row with every mapped cell replaced, or `None` when nothing matched.
fn substitute(row: &StringRecord, mapping: &HashMap<&str, &str>) -> Option<(StringRecord, usize)> {
    let mut hits = 0;
    let out: StringRecord = row
        .iter()
        .map(|cell| match mapping.get(cell.trim()) {
            Some(asset) => {
                hits += 1;
                *asset
            }
            None => cell,
        })
        .collect();
    (hits > 0).then_some((out, hits))
}

/// Rewritten rows plus the number of rows that changed.
pub fn apply(mapping: &HashMap<&str, &str>, rows: &[StringRecord]) -> (Vec<StringRecord>, usize) {
    let mut updated = 0;
    let out = rows
        .iter()
        .map(|row| match substitute(row, mapping) {
            Some((new_row, _)) => {
                updated += 1;
                new_row
            }
            None => row.clone(),
        })
        .collect();
    (out, updated)
}

fn serialize_row(row: &StringRecord, original: &[u8]) -> Result<Vec<u8>> {
    let crlf = original.ends_with(b"\r\n");
    let terminator = if crlf { Terminator::CRLF } else { Terminator::Any(b'\n') };
    let mut wtr = WriterBuilder::new()
        .flexible(true)
        .terminator(terminator)
        .from_writer(Vec::new());
    wtr.write_record(row)?;
    let mut bytes = wtr.into_inner().map_err(|e| SyncError::Io(e.into_error()))?;
    if !original.ends_with(b"\n") {
        while bytes.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            bytes.pop();
        }
    }
    Ok(bytes)
}

/// Substitute mapped URLs in CSV text. Header and unchanged rows keep their
/// exact original bytes.
pub fn rewrite_csv(original: &[u8], mapping: &HashMap<&str, &str>) -> Result<(Vec<u8>, PropagationReport)> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(original);
    rdr.headers()?;

    let mut rows: Vec<(usize, StringRecord)> = Vec::new();
    let mut record = StringRecord::new();
    while rdr.read_record(&mut record)? {
        let start = record
            .position()
            .map(|p| p.byte() as usize)
            .unwrap_or(original.len());
        rows.push((start, record.clone()));
    }

    let mut report = PropagationReport {
        rows: rows.len(),
        ..PropagationReport::default()
    };
    let Some((first_start, _)) = rows.first() else {
        return Ok((original.to_vec(), report));
    };

    let mut out = Vec::with_capacity(original.len());
    out.extend_from_slice(&original[..*first_start]);
    for (i, (start, row)) in rows.iter().enumerate() {
        let end = rows.get(i + 1).map(|(s, _)| *s).unwrap_or(original.len());
        let raw = &original[*start..end];
        match substitute(row, mapping) {
            Some((new_row, hits)) => {
                report.rows_updated += 1;
                report.cells_updated += hits;
                out.extend(serialize_row(&new_row, raw)?);
            }
            None => out.extend_from_slice(raw),
        }
    }
    Ok((out, report))
}

/// Rewrite one catalog file in place. Nothing is written when no row changes.
pub fn propagate_file(path: &Path, mapping: &HashMap<&str, &str>) -> Result<PropagationReport> {
    let original = std::fs::read(path)?;
    let (rewritten, report) = rewrite_csv(&original, mapping)?;
    if report.rows_updated > 0 {
        write_atomic(path, &rewritten)?;
    }
    debug!(path = %path.display(), rows = report.rows, updated = report.rows_updated, "catalog file propagated");
    Ok(report)
}

/// Propagate into `sets.csv` and `minifigs.csv` of the catalog directory.
pub fn propagate_catalog(
    catalog_dir: &Path,
    entries: &[MappingEntry],
) -> Result<Vec<(ItemKind, PropagationReport)>> {
    let mapping = url_index(entries);
    let mut out = Vec::new();
    for kind in ItemKind::ALL {
        let path = catalog_dir.join(kind.csv_file_name());
        if !path.exists() {
            continue;
        }
        let report = propagate_file(&path, &mapping)?;
        info!(
            file = kind.csv_file_name(),
            rows_updated = report.rows_updated,
            cells_updated = report.cells_updated,
            "catalog updated with asset urls"
        );
        out.push((kind, report));
    }
    Ok(out)
}
