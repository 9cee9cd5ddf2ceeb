//! Partition writing: reconcile the staged columns with whatever already
//! lives in the output directory, then append one file per column plus its
//! mask sidecar, and rewrite the metadata file.
//!
//! Column data files are fixed-stride host-byte-order binaries with no
//! header; string columns are NUL-terminated UTF-8 runs. Each file grows
//! monotonically, so an interrupted write leaves the partition in a
//! forward-progressable state.

use super::{cache, meta, PartitionMeta, META_FILE};
use crate::data::buffer::Element;
use crate::data::{ColumnData, PresenceMask};
use crate::table::PartitionBuilder;
use crate::{config, GranaryError, Result};
use chrono::Utc;
use log::{debug, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Seek, SeekFrom, Write};
use std::path::Path;

impl PartitionBuilder {
    /// Write the staged rows into a partition directory, appending to an
    /// existing partition when one is present.
    ///
    /// A no-op when nothing is staged. The existing partition supplies the
    /// table name, description, and index hint when none are given; its
    /// column types must be compatible with the staged ones (exact match,
    /// or the signed/unsigned pair of equal width).
    pub fn write(
        &self,
        dir: impl AsRef<Path>,
        name: Option<&str>,
        desc: Option<&str>,
        index: Option<&str>,
    ) -> Result<()> {
        let dir = dir.as_ref();
        if self.columns.is_empty() || self.mrows == 0 {
            return Ok(());
        }
        if dir.as_os_str().is_empty() {
            warn!("write needs a valid output directory name");
            return Err(GranaryError::NoOutputDir);
        }
        fs::create_dir_all(dir)?;

        let mut nold: u64 = 0;
        let mut old_name = None;
        let mut old_desc = None;
        let mut old_index = None;
        if let Some(prior) = PartitionMeta::read(dir)? {
            if prior.nrows > 0 && !prior.columns.is_empty() {
                let mut nconflicts = 0u32;
                let mut first = None;
                for col in &self.columns {
                    if let Some(old) = prior.column(col.name()) {
                        if !old.dtype.compatible_with(col.dtype()) {
                            nconflicts += 1;
                            warn!(
                                "write({}): column {} has conflicting types, previously {}, currently {}",
                                dir.display(),
                                col.name(),
                                old.dtype,
                                col.dtype()
                            );
                            if first.is_none() {
                                first = Some((col.name().to_string(), old.dtype, col.dtype()));
                            }
                        }
                    }
                }
                if let Some((column, existing, staged)) = first {
                    warn!(
                        "write({}) cannot proceed: {nconflicts} column(s) have conflicting type specifications",
                        dir.display()
                    );
                    return Err(GranaryError::TypeConflict {
                        column,
                        existing,
                        staged,
                    });
                }
                debug!(
                    "write({}) found existing partition {} with {} row(s), will append {}",
                    dir.display(),
                    prior.name,
                    prior.nrows,
                    self.mrows
                );
                nold = prior.nrows;
                old_name = Some(prior.name);
                old_desc = Some(prior.description);
                old_index = prior.index;
            }
        }

        let now = Utc::now();
        let nnew = self.mrows as u64;
        let tdesc = match desc {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => old_desc.unwrap_or_else(|| {
                format!(
                    "Data partition assembled by granary on {} with {} column(s) and {} row(s)",
                    now.format("%a %b %e %H:%M:%S %Y"),
                    self.columns.len(),
                    nold + nnew
                )
            }),
        };
        let tname = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => match old_name {
                Some(n) if !n.is_empty() => n,
                _ => derive_name(dir, &tdesc),
            },
        };
        let tindex = match index {
            Some(ix) if !ix.is_empty() => Some(ix.to_string()),
            _ => old_index.or_else(|| config::partition_index_hint(&tname)),
        };

        let mdpath = dir.join(META_FILE);
        meta::write_meta_file(
            &mdpath,
            &tname,
            &tdesc,
            nold + nnew,
            tindex.as_deref(),
            &self.columns,
        )
        .map_err(|source| GranaryError::MetadataCreate {
            path: mdpath.clone(),
            source,
        })?;

        for col in &self.columns {
            let cpath = dir.join(col.name());
            let mskpath = dir.join(format!("{}.msk", col.name()));
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .open(&cpath)
                .map_err(|source| GranaryError::ColumnFileOpen {
                    path: cpath.clone(),
                    source,
                })?;
            debug!(
                "write opened {} for column {}",
                cpath.display(),
                col.name()
            );
            // absent sidecar means every existing row is valid
            let mut totmask = PresenceMask::read_file(&mskpath)?.unwrap_or_default();
            match col.data() {
                ColumnData::Byte(v) => {
                    write_fixed(&mut file, col.name(), nold, nnew, v, &mut totmask, col.mask())?
                }
                ColumnData::UByte(v) => {
                    write_fixed(&mut file, col.name(), nold, nnew, v, &mut totmask, col.mask())?
                }
                ColumnData::Short(v) => {
                    write_fixed(&mut file, col.name(), nold, nnew, v, &mut totmask, col.mask())?
                }
                ColumnData::UShort(v) => {
                    write_fixed(&mut file, col.name(), nold, nnew, v, &mut totmask, col.mask())?
                }
                ColumnData::Int(v) => {
                    write_fixed(&mut file, col.name(), nold, nnew, v, &mut totmask, col.mask())?
                }
                ColumnData::UInt(v) => {
                    write_fixed(&mut file, col.name(), nold, nnew, v, &mut totmask, col.mask())?
                }
                ColumnData::Long(v) => {
                    write_fixed(&mut file, col.name(), nold, nnew, v, &mut totmask, col.mask())?
                }
                ColumnData::ULong(v) => {
                    write_fixed(&mut file, col.name(), nold, nnew, v, &mut totmask, col.mask())?
                }
                ColumnData::Float(v) => {
                    write_fixed(&mut file, col.name(), nold, nnew, v, &mut totmask, col.mask())?
                }
                ColumnData::Double(v) => {
                    write_fixed(&mut file, col.name(), nold, nnew, v, &mut totmask, col.mask())?
                }
                ColumnData::Strings(v) => {
                    write_strings(&mut file, nold, nnew, v, &mut totmask, col.mask())?
                }
            }
            drop(file);

            if totmask.is_full() {
                match fs::remove_file(&mskpath) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            } else {
                totmask.write_file(&mskpath)?;
            }
            cache::flush_file(&cpath);
            cache::flush_file(&mskpath);
        }
        cache::flush_dir(dir);

        info!(
            "write completed partition {tname} with {} column(s) and {} row(s) (total {})",
            self.columns.len(),
            nnew,
            nold + nnew
        );
        Ok(())
    }

    /// Write only the metadata file, and only when the directory holds none
    /// yet. Returns the number of column blocks written, or 0 when a
    /// metadata file already exists (its content is not checked).
    pub fn write_metadata(
        &self,
        dir: impl AsRef<Path>,
        name: Option<&str>,
        desc: Option<&str>,
        index: Option<&str>,
    ) -> Result<usize> {
        let dir = dir.as_ref();
        if self.columns.is_empty() {
            return Ok(0);
        }
        if dir.as_os_str().is_empty() {
            warn!("write_metadata needs a valid output directory name");
            return Err(GranaryError::NoOutputDir);
        }
        fs::create_dir_all(dir)?;
        let mdpath = dir.join(META_FILE);
        if fs::metadata(&mdpath).map(|m| m.len() > 0).unwrap_or(false) {
            debug!(
                "write_metadata detects an existing {META_FILE} in {}",
                dir.display()
            );
            return Ok(0);
        }

        let now = Utc::now();
        let tdesc = match desc {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => format!(
                "Metadata written by granary on {} with {} column(s)",
                now.format("%a %b %e %H:%M:%S %Y"),
                self.columns.len()
            ),
        };
        let tname = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => derive_name(dir, &tdesc),
        };
        let tindex = match index {
            Some(ix) if !ix.is_empty() => Some(ix.to_string()),
            _ => config::partition_index_hint(&tname),
        };
        meta::write_meta_file(&mdpath, &tname, &tdesc, 0, tindex.as_deref(), &self.columns)
            .map_err(|source| GranaryError::MetadataCreate {
                path: mdpath,
                source,
            })?;
        cache::flush_dir(dir);
        Ok(self.columns.len())
    }
}

/// Append one fixed-width column. Reconciles the file with `nold` prior
/// rows first: a short file is sentinel-padded (those rows are absent in
/// the merged mask); a long one is overwritten from row `nold` on. Then
/// writes `min(|vals|, nnew)` staged elements, sentinel-pads to `nnew`, and
/// concatenates the staged mask after the prior rows' bits.
fn write_fixed<T: Element>(
    file: &mut File,
    colname: &str,
    nold: u64,
    nnew: u64,
    vals: &[T],
    totmask: &mut PresenceMask,
    newmask: &PresenceMask,
) -> Result<()> {
    let elem = T::WIDTH as u64;
    let pos = file.seek(SeekFrom::End(0))?;
    if pos < nold * elem {
        let n1 = pos / elem;
        totmask.adjust_size(n1, nold);
        let mut out = BufWriter::new(&mut *file);
        for _ in n1..nold {
            T::SENTINEL.write_native(&mut out)?;
        }
        out.flush()?;
    } else if pos > nold * elem {
        file.seek(SeekFrom::Start(nold * elem))?;
        totmask.adjust_size(nold, nold);
    } else {
        totmask.adjust_size(nold, nold);
    }

    {
        let mut out = BufWriter::new(&mut *file);
        let take = vals.len().min(nnew as usize);
        for v in &vals[..take] {
            v.write_native(&mut out)?;
        }
        for _ in take as u64..nnew {
            T::SENTINEL.write_native(&mut out)?;
        }
        out.flush()?;
    }
    totmask.append_mask(newmask);
    totmask.adjust_size(totmask.len(), nold + nnew);

    let endpos = file.stream_position()?;
    if endpos != (nold + nnew) * elem {
        return Err(GranaryError::ShortWrite {
            column: colname.to_string(),
            expected: (nold + nnew) * elem,
            actual: endpos,
        });
    }
    Ok(())
}

/// Append one string column: each value as its UTF-8 bytes plus a NUL, a
/// single NUL per missing row. The prior rows cannot be stride-checked, so
/// the file is appended at its end and prior mask bits are taken as valid.
fn write_strings(
    file: &mut File,
    nold: u64,
    nnew: u64,
    vals: &[String],
    totmask: &mut PresenceMask,
    newmask: &PresenceMask,
) -> Result<()> {
    file.seek(SeekFrom::End(0))?;
    totmask.adjust_size(nold, nold);
    let mut out = BufWriter::new(&mut *file);
    let take = vals.len().min(nnew as usize);
    for s in &vals[..take] {
        out.write_all(s.as_bytes())?;
        out.write_all(&[0])?;
    }
    if (take as u64) < nnew {
        let zeros = [0u8; 256];
        let mut left = nnew - take as u64;
        while left > 0 {
            let n = left.min(zeros.len() as u64) as usize;
            out.write_all(&zeros[..n])?;
            left -= n as u64;
        }
    }
    out.flush()?;
    totmask.append_mask(newmask);
    totmask.adjust_size(totmask.len(), nold + nnew);
    Ok(())
}

/// Table name fallback: the last path component of the output directory,
/// or an alphabetic base-36 rendering of the description's checksum.
fn derive_name(dir: &Path, desc: &str) -> String {
    if let Some(name) = dir.file_name().and_then(|s| s.to_str()) {
        if !name.is_empty() && name != "." && name != ".." {
            return name.to_string();
        }
    }
    let sum = crc32fast::hash(desc.as_bytes());
    let name = base36(sum);
    let first = name.as_bytes()[0];
    if first.is_ascii_alphabetic() {
        name
    } else {
        format!("{}{}", (b'a' + first % 26) as char, &name[1..])
    }
}

fn base36(mut v: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(DIGITS[(v % 36) as usize]);
        v /= 36;
        if v == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8(out).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataType, ValueSlice};
    use crate::table::PartitionBuilder;
    use tempfile::tempdir;

    fn i32s_of(path: &Path) -> Vec<i32> {
        fs::read(path)
            .unwrap()
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes(c.try_into().unwrap()))
            .collect()
    }

    fn strings_of(path: &Path) -> Vec<String> {
        let bytes = fs::read(path).unwrap();
        let mut out = Vec::new();
        for chunk in bytes.split(|&b| b == 0) {
            out.push(String::from_utf8(chunk.to_vec()).unwrap());
        }
        // the trailing NUL yields one empty tail entry
        assert_eq!(out.pop().as_deref(), Some(""));
        out
    }

    fn sample_builder() -> PartitionBuilder {
        let mut b = PartitionBuilder::new();
        b.parse_names_and_types("n:int, s:text");
        assert_eq!(b.append_line("1,alpha", ","), 2);
        assert_eq!(b.append_line("2,beta", ","), 2);
        assert_eq!(b.append_line("3,gamma", ","), 2);
        b
    }

    #[test]
    fn test_write_round_trip() {
        let dir = tempdir().unwrap();
        let b = sample_builder();
        b.write(dir.path(), Some("trip"), Some("round trip"), None)
            .unwrap();

        let meta = PartitionMeta::read(dir.path()).unwrap().unwrap();
        assert_eq!(meta.name, "trip");
        assert_eq!(meta.nrows, 3);
        assert_eq!(meta.columns.len(), 2);
        assert_eq!(meta.column("n").unwrap().dtype, DataType::Int);
        assert_eq!(meta.column("s").unwrap().dtype, DataType::Text);

        assert_eq!(i32s_of(&dir.path().join("n")), vec![1, 2, 3]);
        assert_eq!(strings_of(&dir.path().join("s")), vec!["alpha", "beta", "gamma"]);
        // every bit set: no mask sidecars
        assert!(!dir.path().join("n.msk").exists());
        assert!(!dir.path().join("s.msk").exists());
    }

    #[test]
    fn test_write_nothing_staged() {
        let dir = tempdir().unwrap();
        let b = PartitionBuilder::new();
        b.write(dir.path(), None, None, None).unwrap();
        assert!(!dir.path().join(META_FILE).exists());
    }

    #[test]
    fn test_write_mask_sidecar_and_sentinels() {
        let dir = tempdir().unwrap();
        let mut b = PartitionBuilder::new();
        b.parse_names_and_types("n:int, s:text");
        b.append_line("1", ","); // partial: s missing
        b.append_line("2,two", ",");
        b.write(dir.path(), None, None, None).unwrap();

        // where the mask is 0 the raw value is the null sentinel
        assert_eq!(i32s_of(&dir.path().join("n")), vec![1, 2]);
        assert_eq!(strings_of(&dir.path().join("s")), vec!["", "two"]);
        assert!(!dir.path().join("n.msk").exists());
        let smask = PresenceMask::read_file(&dir.path().join("s.msk"))
            .unwrap()
            .unwrap();
        assert_eq!(smask.len(), 2);
        assert!(!smask.get(0));
        assert!(smask.get(1));
    }

    #[test]
    fn test_append_associativity() {
        let once = tempdir().unwrap();
        let twice = tempdir().unwrap();

        let b = sample_builder();
        b.write(once.path(), Some("t"), Some("d"), None).unwrap();

        let mut first = PartitionBuilder::new();
        first.parse_names_and_types("n:int, s:text");
        first.append_line("1,alpha", ",");
        first.append_line("2,beta", ",");
        first.write(twice.path(), Some("t"), Some("d"), None).unwrap();
        let mut second = PartitionBuilder::new();
        second.parse_names_and_types("n:int, s:text");
        second.append_line("3,gamma", ",");
        second.write(twice.path(), None, None, None).unwrap();

        assert_eq!(
            fs::read(once.path().join("n")).unwrap(),
            fs::read(twice.path().join("n")).unwrap()
        );
        assert_eq!(
            fs::read(once.path().join("s")).unwrap(),
            fs::read(twice.path().join("s")).unwrap()
        );
        let meta = PartitionMeta::read(twice.path()).unwrap().unwrap();
        assert_eq!(meta.nrows, 3);
        // the second write adopted the first one's name and description
        assert_eq!(meta.name, "t");
        assert_eq!(meta.description, "d");
    }

    #[test]
    fn test_write_type_conflict_leaves_partition_alone() {
        let dir = tempdir().unwrap();
        let mut b = PartitionBuilder::new();
        b.add_column("x", DataType::Int, None, None).unwrap();
        b.append("x", 0, 1, ValueSlice::Int(&[1])).unwrap();
        b.write(dir.path(), None, None, None).unwrap();
        let md_before = fs::read(dir.path().join(META_FILE)).unwrap();
        let x_before = fs::read(dir.path().join("x")).unwrap();

        let mut c = PartitionBuilder::new();
        c.add_column("x", DataType::Float, None, None).unwrap();
        c.append("x", 0, 1, ValueSlice::Float(&[2.0])).unwrap();
        assert!(matches!(
            c.write(dir.path(), None, None, None),
            Err(GranaryError::TypeConflict { .. })
        ));
        assert_eq!(fs::read(dir.path().join(META_FILE)).unwrap(), md_before);
        assert_eq!(fs::read(dir.path().join("x")).unwrap(), x_before);
    }

    #[test]
    fn test_write_signed_unsigned_relaxation() {
        let dir = tempdir().unwrap();
        let mut b = PartitionBuilder::new();
        b.add_column("x", DataType::Int, None, None).unwrap();
        b.append("x", 0, 1, ValueSlice::Int(&[1])).unwrap();
        b.write(dir.path(), None, None, None).unwrap();

        let mut c = PartitionBuilder::new();
        c.add_column("x", DataType::UInt, None, None).unwrap();
        c.append("x", 0, 1, ValueSlice::UInt(&[2])).unwrap();
        c.write(dir.path(), None, None, None).unwrap();
        assert_eq!(i32s_of(&dir.path().join("x")), vec![1, 2]);
        assert_eq!(PartitionMeta::read(dir.path()).unwrap().unwrap().nrows, 2);
    }

    #[test]
    fn test_additive_column_pads_prior_rows() {
        let dir = tempdir().unwrap();
        let mut b = PartitionBuilder::new();
        b.add_column("x", DataType::Int, None, None).unwrap();
        b.append("x", 0, 2, ValueSlice::Int(&[1, 2])).unwrap();
        b.write(dir.path(), None, None, None).unwrap();

        let mut c = PartitionBuilder::new();
        c.add_column("x", DataType::Int, None, None).unwrap();
        c.add_column("y", DataType::Int, None, None).unwrap();
        c.append("x", 0, 1, ValueSlice::Int(&[3])).unwrap();
        c.append("y", 0, 1, ValueSlice::Int(&[30])).unwrap();
        c.write(dir.path(), None, None, None).unwrap();

        assert_eq!(i32s_of(&dir.path().join("x")), vec![1, 2, 3]);
        // y did not exist for the first two rows: sentinel-padded, mask 0
        assert_eq!(i32s_of(&dir.path().join("y")), vec![i32::MAX, i32::MAX, 30]);
        assert!(!dir.path().join("x.msk").exists());
        let ymask = PresenceMask::read_file(&dir.path().join("y.msk"))
            .unwrap()
            .unwrap();
        let bits: Vec<bool> = ymask.iter().collect();
        assert_eq!(bits, vec![false, false, true]);
    }

    #[test]
    fn test_mask_merge_across_appends() {
        let dir = tempdir().unwrap();
        let mut b = PartitionBuilder::new();
        b.parse_names_and_types("n:int, s:text");
        b.append_line("1", ","); // s missing in row 0
        b.append_line("2,two", ",");
        b.write(dir.path(), None, None, None).unwrap();

        let mut c = PartitionBuilder::new();
        c.parse_names_and_types("n:int, s:text");
        c.append_line("3,three", ",");
        c.write(dir.path(), None, None, None).unwrap();

        let smask = PresenceMask::read_file(&dir.path().join("s.msk"))
            .unwrap()
            .unwrap();
        let bits: Vec<bool> = smask.iter().collect();
        assert_eq!(bits, vec![false, true, true]);
        assert_eq!(strings_of(&dir.path().join("s")), vec!["", "two", "three"]);
    }

    #[test]
    fn test_write_metadata_only_once() {
        let dir = tempdir().unwrap();
        let mut b = PartitionBuilder::new();
        b.parse_names_and_types("a:int, b:double");
        assert_eq!(
            b.write_metadata(dir.path(), Some("meta"), None, None).unwrap(),
            2
        );
        let meta = PartitionMeta::read(dir.path()).unwrap().unwrap();
        assert_eq!(meta.name, "meta");
        // a metadata-only write records no rows
        assert_eq!(meta.nrows, 0);
        // second call is skipped
        assert_eq!(
            b.write_metadata(dir.path(), Some("other"), None, None).unwrap(),
            0
        );
        assert_eq!(
            PartitionMeta::read(dir.path()).unwrap().unwrap().name,
            "meta"
        );
    }

    #[test]
    fn test_partition_index_hint_lookup() {
        let dir = tempdir().unwrap();
        crate::config::set("ibis.hints.index", "precise");
        let mut b = PartitionBuilder::new();
        b.add_column("v", DataType::Int, None, None).unwrap();
        b.append("v", 0, 1, ValueSlice::Int(&[1])).unwrap();
        b.write(dir.path(), Some("hints"), None, None).unwrap();
        crate::config::unset("ibis.hints.index");

        let meta = PartitionMeta::read(dir.path()).unwrap().unwrap();
        assert_eq!(meta.index.as_deref(), Some("precise"));
    }

    #[test]
    fn test_derived_table_name() {
        let dir = tempdir().unwrap();
        let part = dir.path().join("events");
        let mut b = PartitionBuilder::new();
        b.add_column("v", DataType::Int, None, None).unwrap();
        b.append("v", 0, 1, ValueSlice::Int(&[1])).unwrap();
        b.write(&part, None, None, None).unwrap();
        let meta = PartitionMeta::read(&part).unwrap().unwrap();
        assert_eq!(meta.name, "events");
    }

    #[test]
    fn test_base36_name_fallback() {
        let name = derive_name(Path::new(""), "whatever");
        assert!(name.as_bytes()[0].is_ascii_alphabetic());
    }

    #[test]
    fn test_short_staged_column_padded_to_mrows() {
        // a column that stays shorter than mrows is sentinel-padded on disk
        let dir = tempdir().unwrap();
        let mut b = PartitionBuilder::new();
        b.add_column("a", DataType::Int, None, None).unwrap();
        b.add_column("z", DataType::Int, None, None).unwrap();
        b.append("a", 0, 3, ValueSlice::Int(&[1, 2, 3])).unwrap();
        b.append("z", 0, 1, ValueSlice::Int(&[9])).unwrap();
        // no normalize: the writer itself pads the short column
        b.write(dir.path(), None, None, None).unwrap();
        assert_eq!(i32s_of(&dir.path().join("z")), vec![9, i32::MAX, i32::MAX]);
        let zmask = PresenceMask::read_file(&dir.path().join("z.msk"))
            .unwrap()
            .unwrap();
        let bits: Vec<bool> = zmask.iter().collect();
        assert_eq!(bits, vec![true, false, false]);
    }
}
