//! The partition metadata file.
//!
//! A partition directory carries a plain-text `-part.txt` describing the
//! table and its columns. This module owns both directions: the emitter
//! used by [`PartitionBuilder::write`](crate::PartitionBuilder::write) and
//! a parser that serves as the reader surface the writer reconciles
//! against when appending to an existing partition.

use crate::config;
use crate::data::column::Column;
use crate::data::DataType;
use crate::{GranaryError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;

/// Name of the metadata file inside a partition directory.
pub const META_FILE: &str = "-part.txt";

/// One column block of a partition metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub dtype: DataType,
    pub description: Option<String>,
    pub index: Option<String>,
}

/// Parsed content of a partition metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub name: String,
    pub description: String,
    pub nrows: u64,
    pub timestamp: i64,
    pub index: Option<String>,
    pub columns: Vec<ColumnMeta>,
}

impl PartitionMeta {
    /// Read the metadata file of a partition directory. `Ok(None)` when the
    /// directory holds no metadata file.
    pub fn read(dir: &Path) -> Result<Option<PartitionMeta>> {
        let path = dir.join(META_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        parse(&path, &text).map(Some)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Default)]
struct PendingColumn {
    name: Option<String>,
    dtype: Option<DataType>,
    description: Option<String>,
    index: Option<String>,
}

fn parse(path: &Path, text: &str) -> Result<PartitionMeta> {
    let bad = |reason: &str| GranaryError::InvalidMetadata {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let mut meta = PartitionMeta {
        name: String::new(),
        description: String::new(),
        nrows: 0,
        timestamp: 0,
        index: None,
        columns: Vec::new(),
    };
    let mut in_header = false;
    let mut pending: Option<PendingColumn> = None;
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.eq_ignore_ascii_case("BEGIN HEADER") {
            in_header = true;
            continue;
        }
        if line.eq_ignore_ascii_case("END HEADER") {
            in_header = false;
            continue;
        }
        if line.eq_ignore_ascii_case("Begin Column") {
            pending = Some(PendingColumn::default());
            continue;
        }
        if line.eq_ignore_ascii_case("End Column") {
            let p = pending.take().ok_or_else(|| bad("End Column without Begin Column"))?;
            let name = p.name.ok_or_else(|| bad("column block without a name"))?;
            let dtype = p
                .dtype
                .ok_or_else(|| bad("column block without a data_type"))?;
            meta.columns.push(ColumnMeta {
                name,
                dtype,
                description: p.description,
                index: p.index,
            });
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if let Some(p) = pending.as_mut() {
            match key {
                "name" => p.name = Some(value.to_string()),
                "data_type" => {
                    p.dtype = Some(
                        DataType::from_name(value)
                            .ok_or_else(|| bad(&format!("unknown data_type {value:?}")))?,
                    )
                }
                "description" => p.description = Some(value.to_string()),
                "index" => p.index = Some(value.to_string()),
                _ => {}
            }
        } else if in_header {
            match key {
                "Name" => meta.name = value.to_string(),
                "Description" => meta.description = value.to_string(),
                "Number_of_rows" => {
                    meta.nrows = value
                        .parse()
                        .map_err(|_| bad(&format!("bad Number_of_rows {value:?}")))?
                }
                "Timestamp" => meta.timestamp = value.parse().unwrap_or(0),
                "index" => meta.index = Some(value.to_string()),
                _ => {}
            }
        }
    }
    if pending.is_some() {
        return Err(bad("unterminated column block"));
    }
    Ok(meta)
}

/// Emit a complete metadata file. Per-column index hints fall back to the
/// process-wide registry; a TEXT column without an explicit hint is marked
/// `index = none`.
pub(crate) fn write_meta_file(
    path: &Path,
    tname: &str,
    tdesc: &str,
    nrows: u64,
    index: Option<&str>,
    columns: &[Column],
) -> io::Result<()> {
    let mut md = BufWriter::new(File::create(path)?);
    let now = Utc::now();
    writeln!(
        md,
        "# meta data for data partition {tname} written by granary on {}",
        now.format("%a %b %e %H:%M:%S %Y")
    )?;
    writeln!(md)?;
    writeln!(md, "BEGIN HEADER")?;
    writeln!(md, "Name = {tname}")?;
    writeln!(md, "Description = {tdesc}")?;
    writeln!(md, "Number_of_rows = {nrows}")?;
    writeln!(md, "Number_of_columns = {}", columns.len())?;
    writeln!(md, "Timestamp = {}", now.timestamp())?;
    if let Some(ix) = index {
        writeln!(md, "index = {ix}")?;
    }
    writeln!(md, "END HEADER")?;
    for col in columns {
        writeln!(md)?;
        writeln!(md, "Begin Column")?;
        writeln!(md, "name = {}", col.name())?;
        writeln!(md, "data_type = {}", col.dtype())?;
        if !col.description().is_empty() {
            writeln!(md, "description = {}", col.description())?;
        }
        if !col.index_spec().is_empty() {
            writeln!(md, "index = {}", col.index_spec())?;
        } else if col.dtype() == DataType::Text {
            writeln!(md, "index = none")?;
        } else if let Some(ix) = config::column_index_hint(tname, col.name()) {
            writeln!(md, "index = {ix}")?;
        }
        writeln!(md, "End Column")?;
    }
    md.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(META_FILE);
        let columns = vec![
            Column::new("flow", DataType::UInt, "flow id", "bitmap"),
            Column::new("note", DataType::Text, "", ""),
            Column::new("kind", DataType::Category, "", ""),
        ];
        write_meta_file(&path, "traffic", "test partition", 12, Some("default"), &columns)
            .unwrap();

        let meta = PartitionMeta::read(dir.path()).unwrap().unwrap();
        assert_eq!(meta.name, "traffic");
        assert_eq!(meta.description, "test partition");
        assert_eq!(meta.nrows, 12);
        assert_eq!(meta.index.as_deref(), Some("default"));
        assert_eq!(meta.columns.len(), 3);

        let flow = meta.column("flow").unwrap();
        assert_eq!(flow.dtype, DataType::UInt);
        assert_eq!(flow.description.as_deref(), Some("flow id"));
        assert_eq!(flow.index.as_deref(), Some("bitmap"));

        // TEXT defaults to index = none; CATEGORY gets no index line
        assert_eq!(meta.column("note").unwrap().index.as_deref(), Some("none"));
        assert_eq!(meta.column("kind").unwrap().index, None);
        assert!(meta.timestamp > 0);
    }

    #[test]
    fn test_column_index_hint_from_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(META_FILE);
        crate::config::set("ibis.hinted.val.index", "interval");
        let columns = vec![Column::new("val", DataType::Int, "", "")];
        write_meta_file(&path, "hinted", "d", 0, None, &columns).unwrap();
        crate::config::unset("ibis.hinted.val.index");

        let meta = PartitionMeta::read(dir.path()).unwrap().unwrap();
        assert_eq!(
            meta.column("val").unwrap().index.as_deref(),
            Some("interval")
        );
    }

    #[test]
    fn test_read_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PartitionMeta::read(dir.path()).unwrap().is_none());

        fs::write(
            dir.path().join(META_FILE),
            "BEGIN HEADER\nName = x\nEND HEADER\n\nBegin Column\nname = a\ndata_type = WAT\nEnd Column\n",
        )
        .unwrap();
        assert!(matches!(
            PartitionMeta::read(dir.path()),
            Err(GranaryError::InvalidMetadata { .. })
        ));
    }
}
