//! The in-memory staging table.
//!
//! A [`PartitionBuilder`] collects typed columns and grows them through
//! chunk appends, typed row appends, and parsed text lines (see
//! [`text`](self::text) for the latter). Individual operations may leave
//! column lengths ragged; [`PartitionBuilder::normalize`] re-aligns every
//! buffer and mask to the declared row count before anything that consumes
//! row alignment runs.

mod text;

use crate::data::buffer::Element;
use crate::data::column::{is_valid_name, Column};
use crate::data::{ColumnData, DataType, NamedValues, PresenceMask, TableRow, ValueSlice};
use crate::{GranaryError, Result};
use ahash::AHashMap;
use log::{debug, warn};
use std::collections::TryReserveError;
use std::fmt::Write as _;

/// Outcome of [`PartitionBuilder::add_column`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddColumnStatus {
    /// A fresh column was created.
    Created,
    /// The name already existed with the same type; description and index
    /// hint were updated if supplied.
    Updated,
    /// The name already existed with a different type; no structural
    /// change was made.
    TypeConflict,
}

/// When does a typed row bump the declared row count?
///
/// `Complete` counts a row only when it supplies at least as many values as
/// the table has columns, which under-counts partially-named rows; `Any`
/// treats every row that lands at least one value as a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RowPolicy {
    #[default]
    Complete,
    Any,
}

/// In-memory staging area for a column-oriented data partition.
pub struct PartitionBuilder {
    pub(crate) columns: Vec<Column>,
    pub(crate) index: AHashMap<String, usize>,
    /// Declared number of rows.
    pub(crate) mrows: u32,
    row_policy: RowPolicy,
}

impl Default for PartitionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionBuilder {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            index: AHashMap::new(),
            mrows: 0,
            row_policy: RowPolicy::Complete,
        }
    }

    pub fn with_row_policy(mut self, policy: RowPolicy) -> Self {
        self.row_policy = policy;
        self
    }

    pub fn row_policy(&self) -> RowPolicy {
        self.row_policy
    }

    /// Declared row count.
    pub fn row_count(&self) -> u32 {
        self.mrows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    /// Declare a column. Redeclaring an existing name updates its
    /// description and index hint (when supplied non-empty) and reports
    /// whether the requested type agrees with the declared one.
    pub fn add_column(
        &mut self,
        name: &str,
        dtype: DataType,
        desc: Option<&str>,
        index_spec: Option<&str>,
    ) -> Result<AddColumnStatus> {
        if !is_valid_name(name) {
            warn!("add_column rejected invalid column name {name:?}");
            return Err(GranaryError::InvalidColumnName(name.to_string()));
        }
        if let Some(&ci) = self.index.get(name) {
            let col = &mut self.columns[ci];
            debug!("add_column: {name} is already declared as {}", col.dtype());
            if let Some(d) = desc {
                if !d.is_empty() {
                    col.desc = d.to_string();
                }
            }
            if let Some(ix) = index_spec {
                if !ix.is_empty() {
                    col.index_spec = ix.to_string();
                }
            }
            return Ok(if col.dtype() == dtype {
                AddColumnStatus::Updated
            } else {
                AddColumnStatus::TypeConflict
            });
        }
        self.index.insert(name.to_string(), self.columns.len());
        self.columns.push(Column::new(
            name,
            dtype,
            desc.unwrap_or(""),
            index_spec.unwrap_or(""),
        ));
        Ok(AddColumnStatus::Created)
    }

    /// Copy `values` into rows `[begin, end)` of the named column.
    ///
    /// Rows below `begin` that do not exist yet are padded with the null
    /// sentinel and left absent in the presence mask; the mask bits for
    /// `[begin, end)` are OR-ed in. Other columns are not touched, so a
    /// sequence of chunk appends may leave lengths ragged until
    /// [`normalize`](Self::normalize) runs.
    pub fn append(&mut self, name: &str, begin: u64, end: u64, values: ValueSlice<'_>) -> Result<()> {
        if u32::try_from(begin).is_err() || u32::try_from(end).is_err() || begin >= end {
            return Err(GranaryError::InvalidRange { begin, end });
        }
        let need = (end - begin) as usize;
        if values.len() < need {
            warn!(
                "append({name}, {begin}, {end}) received only {} value(s)",
                values.len()
            );
            return Err(GranaryError::InvalidRange { begin, end });
        }
        if name.is_empty() {
            return Err(GranaryError::InvalidColumnName(String::new()));
        }
        let ci = *self
            .index
            .get(name)
            .ok_or_else(|| GranaryError::UnknownColumn(name.to_string()))?;
        let col = &mut self.columns[ci];
        let dtype = col.dtype();
        let Column { data, mask, .. } = col;
        let (be, en) = (begin as usize, end as usize);
        match (data, values) {
            (ColumnData::Byte(out), ValueSlice::Byte(inp)) => {
                append_fixed(&inp[..need], be, en, out, mask)
            }
            (ColumnData::UByte(out), ValueSlice::UByte(inp)) => {
                append_fixed(&inp[..need], be, en, out, mask)
            }
            (ColumnData::Short(out), ValueSlice::Short(inp)) => {
                append_fixed(&inp[..need], be, en, out, mask)
            }
            (ColumnData::UShort(out), ValueSlice::UShort(inp)) => {
                append_fixed(&inp[..need], be, en, out, mask)
            }
            (ColumnData::Int(out), ValueSlice::Int(inp)) => {
                append_fixed(&inp[..need], be, en, out, mask)
            }
            (ColumnData::UInt(out), ValueSlice::UInt(inp)) => {
                append_fixed(&inp[..need], be, en, out, mask)
            }
            (ColumnData::Long(out), ValueSlice::Long(inp)) => {
                append_fixed(&inp[..need], be, en, out, mask)
            }
            (ColumnData::ULong(out), ValueSlice::ULong(inp)) => {
                append_fixed(&inp[..need], be, en, out, mask)
            }
            (ColumnData::Float(out), ValueSlice::Float(inp)) => {
                append_fixed(&inp[..need], be, en, out, mask)
            }
            (ColumnData::Double(out), ValueSlice::Double(inp)) => {
                append_fixed(&inp[..need], be, en, out, mask)
            }
            (ColumnData::Strings(out), ValueSlice::Str(inp)) => {
                append_strings(&inp[..need], be, en, out, mask)
            }
            (_, v) => {
                return Err(GranaryError::TypeMismatch {
                    column: name.to_string(),
                    expected: dtype,
                    actual: v.dtype(),
                })
            }
        }
        if en as u32 > self.mrows {
            self.mrows = en as u32;
        }
        Ok(())
    }

    /// Re-align every column to the declared row count.
    ///
    /// Pass one finds the longest buffer or mask (never shrinking below the
    /// current count); pass two pads short buffers with the null sentinel
    /// and zero-extends their masks, and truncates long ones.
    pub fn normalize(&mut self) {
        if self.columns.is_empty() {
            return;
        }
        let mut mrows = self.mrows;
        let mut need2nd = false;
        for col in &self.columns {
            let n = col.data.len() as u32;
            if n > mrows {
                mrows = n;
                need2nd = true;
            } else if mrows > n {
                need2nd = true;
            }
            if col.mask.len() > mrows as u64 {
                warn!(
                    "normalize: column {} mask({} out of {}) is longer than the declared {} row(s)",
                    col.name,
                    col.mask.cardinality(),
                    col.mask.len(),
                    mrows
                );
                mrows = col.mask.len() as u32;
                need2nd = true;
            }
        }
        self.mrows = mrows;
        if !need2nd {
            return;
        }
        let target = mrows as usize;
        for col in &mut self.columns {
            let n = col.data.len();
            if n < target {
                col.mask.adjust_size(n as u64, target as u64);
                col.data.pad_to(target);
            } else if n > target {
                col.mask.adjust_size(target as u64, target as u64);
                col.data.truncate(target);
            } else {
                col.mask.adjust_size(target as u64, target as u64);
            }
        }
    }

    /// Column indices (in declaration order) holding the given type; the
    /// per-position slot cache used by the row appenders.
    fn locate(&self, dtype: DataType) -> Vec<Option<usize>> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.dtype() == dtype)
            .map(|(i, _)| Some(i))
            .collect()
    }

    fn append_values<T: Clone>(
        columns: &mut [Column],
        index: &AHashMap<String, usize>,
        nv: &NamedValues<T>,
        slots: &mut Vec<Option<usize>>,
        push: fn(&mut ColumnData, T) -> bool,
    ) {
        let n1 = nv.names.len().min(nv.values.len());
        for i in 0..n1 {
            let target = if nv.names[i].is_empty() {
                slots.get(i).copied().flatten()
            } else if let Some(&ci) = index.get(nv.names[i].as_str()) {
                if slots.len() <= i {
                    slots.resize(i + 1, None);
                }
                slots[i] = Some(ci);
                Some(ci)
            } else {
                debug!("append_row: no column named {}", nv.names[i]);
                None
            };
            if let Some(ci) = target {
                if push(&mut columns[ci].data, nv.values[i].clone()) {
                    columns[ci].mask.push_one();
                }
            }
        }
        // unnamed tail beyond the named prefix: pure positional matching
        let n2 = nv.values.len().min(slots.len());
        for i in n1..n2 {
            if let Some(ci) = slots[i] {
                if push(&mut columns[ci].data, nv.values[i].clone()) {
                    columns[ci].mask.push_one();
                }
            }
        }
    }

    /// Append one heterogeneous typed row. Returns the number of values the
    /// row presented.
    ///
    /// The declared row count grows according to the configured
    /// [`RowPolicy`]. A row naming at least as many columns as the table
    /// holds triggers [`normalize`](Self::normalize) first, guarding
    /// against a preceding partial row.
    pub fn append_row(&mut self, row: &TableRow) -> usize {
        if row.column_count() >= self.columns.len() {
            self.normalize();
        }
        let mut cnt = 0usize;
        if !row.bytes.is_empty() {
            let mut slots = self.locate(DataType::Byte);
            cnt += row.bytes.len();
            Self::append_values(
                &mut self.columns,
                &self.index,
                &row.bytes,
                &mut slots,
                ColumnData::push_i8,
            );
        }
        if !row.ubytes.is_empty() {
            let mut slots = self.locate(DataType::UByte);
            cnt += row.ubytes.len();
            Self::append_values(
                &mut self.columns,
                &self.index,
                &row.ubytes,
                &mut slots,
                ColumnData::push_u8,
            );
        }
        if !row.shorts.is_empty() {
            let mut slots = self.locate(DataType::Short);
            cnt += row.shorts.len();
            Self::append_values(
                &mut self.columns,
                &self.index,
                &row.shorts,
                &mut slots,
                ColumnData::push_i16,
            );
        }
        if !row.ushorts.is_empty() {
            let mut slots = self.locate(DataType::UShort);
            cnt += row.ushorts.len();
            Self::append_values(
                &mut self.columns,
                &self.index,
                &row.ushorts,
                &mut slots,
                ColumnData::push_u16,
            );
        }
        if !row.ints.is_empty() {
            let mut slots = self.locate(DataType::Int);
            cnt += row.ints.len();
            Self::append_values(
                &mut self.columns,
                &self.index,
                &row.ints,
                &mut slots,
                ColumnData::push_i32,
            );
        }
        if !row.uints.is_empty() {
            let mut slots = self.locate(DataType::UInt);
            cnt += row.uints.len();
            Self::append_values(
                &mut self.columns,
                &self.index,
                &row.uints,
                &mut slots,
                ColumnData::push_u32,
            );
        }
        if !row.longs.is_empty() {
            let mut slots = self.locate(DataType::Long);
            cnt += row.longs.len();
            Self::append_values(
                &mut self.columns,
                &self.index,
                &row.longs,
                &mut slots,
                ColumnData::push_i64,
            );
        }
        if !row.ulongs.is_empty() {
            let mut slots = self.locate(DataType::ULong);
            cnt += row.ulongs.len();
            Self::append_values(
                &mut self.columns,
                &self.index,
                &row.ulongs,
                &mut slots,
                ColumnData::push_u64,
            );
        }
        if !row.floats.is_empty() {
            let mut slots = self.locate(DataType::Float);
            cnt += row.floats.len();
            Self::append_values(
                &mut self.columns,
                &self.index,
                &row.floats,
                &mut slots,
                ColumnData::push_f32,
            );
        }
        if !row.doubles.is_empty() {
            let mut slots = self.locate(DataType::Double);
            cnt += row.doubles.len();
            Self::append_values(
                &mut self.columns,
                &self.index,
                &row.doubles,
                &mut slots,
                ColumnData::push_f64,
            );
        }
        if !row.categories.is_empty() {
            let mut slots = self.locate(DataType::Category);
            cnt += row.categories.len();
            Self::append_values(
                &mut self.columns,
                &self.index,
                &row.categories,
                &mut slots,
                ColumnData::push_string,
            );
        }
        if !row.texts.is_empty() {
            let mut slots = self.locate(DataType::Text);
            cnt += row.texts.len();
            Self::append_values(
                &mut self.columns,
                &self.index,
                &row.texts,
                &mut slots,
                ColumnData::push_string,
            );
        }
        let counts = match self.row_policy {
            RowPolicy::Complete => cnt >= self.columns.len(),
            RowPolicy::Any => cnt > 0,
        };
        if counts {
            self.mrows += 1;
        }
        cnt
    }

    /// Append a batch of typed rows, hoisting the per-type slot lookups out
    /// of the row loop. Returns the number of rows that landed at least one
    /// value; each such row bumps the declared row count.
    pub fn append_rows(&mut self, rows: &[TableRow]) -> usize {
        if rows.is_empty() {
            return 0;
        }
        let mut byte_slots = self.locate(DataType::Byte);
        let mut ubyte_slots = self.locate(DataType::UByte);
        let mut short_slots = self.locate(DataType::Short);
        let mut ushort_slots = self.locate(DataType::UShort);
        let mut int_slots = self.locate(DataType::Int);
        let mut uint_slots = self.locate(DataType::UInt);
        let mut long_slots = self.locate(DataType::Long);
        let mut ulong_slots = self.locate(DataType::ULong);
        let mut float_slots = self.locate(DataType::Float);
        let mut double_slots = self.locate(DataType::Double);
        let mut cat_slots = self.locate(DataType::Category);
        let mut text_slots = self.locate(DataType::Text);

        let ncols = self.columns.len();
        let mut cnt = 0usize;
        let mut appended = 0usize;
        for row in rows {
            // a partial previous row leaves the columns ragged
            if cnt < ncols {
                self.normalize();
            }
            cnt = 0;
            if !row.bytes.is_empty() {
                cnt += row.bytes.len();
                Self::append_values(
                    &mut self.columns,
                    &self.index,
                    &row.bytes,
                    &mut byte_slots,
                    ColumnData::push_i8,
                );
            }
            if !row.ubytes.is_empty() {
                cnt += row.ubytes.len();
                Self::append_values(
                    &mut self.columns,
                    &self.index,
                    &row.ubytes,
                    &mut ubyte_slots,
                    ColumnData::push_u8,
                );
            }
            if !row.shorts.is_empty() {
                cnt += row.shorts.len();
                Self::append_values(
                    &mut self.columns,
                    &self.index,
                    &row.shorts,
                    &mut short_slots,
                    ColumnData::push_i16,
                );
            }
            if !row.ushorts.is_empty() {
                cnt += row.ushorts.len();
                Self::append_values(
                    &mut self.columns,
                    &self.index,
                    &row.ushorts,
                    &mut ushort_slots,
                    ColumnData::push_u16,
                );
            }
            if !row.ints.is_empty() {
                cnt += row.ints.len();
                Self::append_values(
                    &mut self.columns,
                    &self.index,
                    &row.ints,
                    &mut int_slots,
                    ColumnData::push_i32,
                );
            }
            if !row.uints.is_empty() {
                cnt += row.uints.len();
                Self::append_values(
                    &mut self.columns,
                    &self.index,
                    &row.uints,
                    &mut uint_slots,
                    ColumnData::push_u32,
                );
            }
            if !row.longs.is_empty() {
                cnt += row.longs.len();
                Self::append_values(
                    &mut self.columns,
                    &self.index,
                    &row.longs,
                    &mut long_slots,
                    ColumnData::push_i64,
                );
            }
            if !row.ulongs.is_empty() {
                cnt += row.ulongs.len();
                Self::append_values(
                    &mut self.columns,
                    &self.index,
                    &row.ulongs,
                    &mut ulong_slots,
                    ColumnData::push_u64,
                );
            }
            if !row.floats.is_empty() {
                cnt += row.floats.len();
                Self::append_values(
                    &mut self.columns,
                    &self.index,
                    &row.floats,
                    &mut float_slots,
                    ColumnData::push_f32,
                );
            }
            if !row.doubles.is_empty() {
                cnt += row.doubles.len();
                Self::append_values(
                    &mut self.columns,
                    &self.index,
                    &row.doubles,
                    &mut double_slots,
                    ColumnData::push_f64,
                );
            }
            if !row.categories.is_empty() {
                cnt += row.categories.len();
                Self::append_values(
                    &mut self.columns,
                    &self.index,
                    &row.categories,
                    &mut cat_slots,
                    ColumnData::push_string,
                );
            }
            if !row.texts.is_empty() {
                cnt += row.texts.len();
                Self::append_values(
                    &mut self.columns,
                    &self.index,
                    &row.texts,
                    &mut text_slots,
                    ColumnData::push_string,
                );
            }
            if cnt > 0 {
                self.mrows += 1;
                appended += 1;
            }
        }
        appended
    }

    fn do_reserve(&mut self, maxr: u32) -> std::result::Result<u32, TryReserveError> {
        if self.mrows >= maxr {
            return Ok(self.mrows);
        }
        let mut ret = u32::MAX;
        for col in &mut self.columns {
            col.mask.clear();
            let curr = col.data.capacity().min(u32::MAX as usize) as u32;
            if self.mrows == 0 && curr as u64 > (maxr as u64 >> 1) * 3 {
                // shrink an over-provisioned buffer before a bulk import
                col.data.shrink_replace(maxr as usize)?;
                ret = maxr;
            } else if curr < maxr {
                col.data.try_reserve_total(maxr as usize)?;
                ret = maxr;
            } else if ret > curr {
                ret = curr;
            }
        }
        debug!("do_reserve({maxr}) completed with actual capacity {ret}");
        Ok(ret)
    }

    /// Reserve room for `max_rows` rows in every column, clipped to 2^30.
    ///
    /// On allocation failure the request is halved and retried, five
    /// attempts in all. If the table held rows when the first attempt
    /// failed the staged content is declared lost (`mrows` resets to 0)
    /// and no retry is made. Returns the minimum capacity attained.
    pub fn reserve_space(&mut self, max_rows: u32) -> Result<u32> {
        if self.columns.is_empty() {
            return Ok(max_rows);
        }
        if self.mrows >= max_rows {
            return Ok(self.mrows);
        }
        let mut maxr = max_rows.min(0x4000_0000);
        let had_rows = self.mrows > 0;
        match self.do_reserve(maxr) {
            Ok(n) => return Ok(n),
            Err(e) => warn!("reserve_space({maxr}) failed: {e}"),
        }
        if had_rows {
            warn!("reserve_space({maxr}) failed while mrows={}, existing content has been lost", self.mrows);
            self.mrows = 0;
            return Err(GranaryError::ReserveContentLost);
        }
        for shift in [1u32, 2, 2, 2] {
            maxr >>= shift;
            match self.do_reserve(maxr) {
                Ok(n) => return Ok(n),
                Err(e) => warn!("reserve_space retry at {maxr} failed: {e}"),
            }
        }
        Err(GranaryError::ReserveFailed { attempts: 5 })
    }

    /// Minimum buffer capacity across all columns, in rows.
    pub fn capacity(&self) -> u32 {
        if self.columns.is_empty() {
            return 0;
        }
        let mut cap = u32::MAX;
        for col in &self.columns {
            let c = col.data.capacity().min(u32::MAX as usize) as u32;
            if c == 0 {
                return 0;
            }
            if c < cap {
                cap = c;
            }
        }
        cap
    }

    /// Drop all staged values and masks; the schema stays.
    pub fn clear_data(&mut self) {
        self.mrows = 0;
        for col in &mut self.columns {
            col.data.clear();
            col.mask.clear();
        }
    }

    /// Drop everything, schema included.
    pub fn clear(&mut self) {
        self.columns.clear();
        self.index.clear();
        self.mrows = 0;
    }

    /// Human-readable summary of the staged content.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "in-memory data partition with {} row{} and {} column{}",
            self.mrows,
            if self.mrows == 1 { "" } else { "s" },
            self.columns.len(),
            if self.columns.len() == 1 { "" } else { "s" }
        );
        for col in &self.columns {
            let _ = write!(
                out,
                "\n  {}, {}, mask({} out of {})",
                col.name,
                col.dtype(),
                col.mask.cardinality(),
                col.mask.len()
            );
        }
        out
    }
}

/// Copy `input` into `out[be..en]`, sentinel-padding any gap below `be` and
/// OR-ing the freshly covered range into `mask`.
fn append_fixed<T: Element>(
    input: &[T],
    be: usize,
    en: usize,
    out: &mut Vec<T>,
    mask: &mut PresenceMask,
) {
    let mut inmsk = PresenceMask::new();
    inmsk.append_fill(false, be as u64);
    inmsk.append_fill(true, (en - be) as u64);
    if out.len() > en {
        inmsk.append_fill(false, (out.len() - en) as u64);
    }
    if out.len() < be {
        out.resize(be, T::SENTINEL);
    }
    if out.len() < en {
        out.resize(en, T::SENTINEL);
        mask.adjust_size(0, en as u64);
    }
    out[be..en].copy_from_slice(input);
    mask.union(&inmsk);
}

fn append_strings(
    input: &[String],
    be: usize,
    en: usize,
    out: &mut Vec<String>,
    mask: &mut PresenceMask,
) {
    let mut inmsk = PresenceMask::new();
    inmsk.append_fill(false, be as u64);
    inmsk.append_fill(true, (en - be) as u64);
    if out.len() > en {
        inmsk.append_fill(false, (out.len() - en) as u64);
    }
    if out.len() < be {
        out.resize(be, String::new());
    }
    if out.len() < en {
        out.resize(en, String::new());
        mask.adjust_size(0, en as u64);
    }
    out[be..en].clone_from_slice(input);
    mask.union(&inmsk);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_bits(b: &PartitionBuilder, name: &str) -> Vec<bool> {
        b.column(name).unwrap().mask().iter().collect()
    }

    #[test]
    fn test_add_column_statuses() {
        let mut b = PartitionBuilder::new();
        assert_eq!(
            b.add_column("a", DataType::Int, None, None).unwrap(),
            AddColumnStatus::Created
        );
        assert_eq!(
            b.add_column("a", DataType::Int, Some("count"), None).unwrap(),
            AddColumnStatus::Updated
        );
        assert_eq!(b.column("a").unwrap().description(), "count");
        assert_eq!(
            b.add_column("a", DataType::Float, None, Some("bitmap"))
                .unwrap(),
            AddColumnStatus::TypeConflict
        );
        // type conflict still updates the index hint, never the type
        assert_eq!(b.column("a").unwrap().index_spec(), "bitmap");
        assert_eq!(b.column("a").unwrap().dtype(), DataType::Int);

        assert!(b.add_column("", DataType::Int, None, None).is_err());
        assert!(b.add_column("2x", DataType::Int, None, None).is_err());
    }

    #[test]
    fn test_chunk_append_fresh_table() {
        let mut b = PartitionBuilder::new();
        b.add_column("v", DataType::Int, None, None).unwrap();
        b.append("v", 0, 3, ValueSlice::Int(&[4, 5, 6])).unwrap();
        assert_eq!(b.row_count(), 3);
        assert_eq!(b.column("v").unwrap().data().as_i32(), Some(&[4, 5, 6][..]));
        assert_eq!(mask_bits(&b, "v"), vec![true, true, true]);
    }

    #[test]
    fn test_chunk_append_with_gap() {
        // byte column: [1,2,3] at rows 0..3, then [9,9] at rows 5..7
        let mut b = PartitionBuilder::new();
        b.add_column("a", DataType::Byte, None, None).unwrap();
        b.append("a", 0, 3, ValueSlice::Byte(&[1, 2, 3])).unwrap();
        b.append("a", 5, 7, ValueSlice::Byte(&[9, 9])).unwrap();
        b.normalize();
        assert_eq!(b.row_count(), 7);
        assert_eq!(
            b.column("a").unwrap().data().as_i8(),
            Some(&[1, 2, 3, 0x7F, 0x7F, 9, 9][..])
        );
        assert_eq!(
            mask_bits(&b, "a"),
            vec![true, true, true, false, false, true, true]
        );
    }

    #[test]
    fn test_chunk_append_overlap_and_overwrite() {
        let mut b = PartitionBuilder::new();
        b.add_column("a", DataType::UInt, None, None).unwrap();
        b.append("a", 0, 4, ValueSlice::UInt(&[1, 2, 3, 4])).unwrap();
        b.append("a", 2, 5, ValueSlice::UInt(&[30, 40, 50])).unwrap();
        assert_eq!(b.row_count(), 5);
        assert_eq!(
            b.column("a").unwrap().data().as_u32(),
            Some(&[1, 2, 30, 40, 50][..])
        );
        assert_eq!(mask_bits(&b, "a"), vec![true; 5]);
    }

    #[test]
    fn test_chunk_append_errors() {
        let mut b = PartitionBuilder::new();
        b.add_column("a", DataType::Int, None, None).unwrap();
        assert!(matches!(
            b.append("a", 3, 3, ValueSlice::Int(&[])),
            Err(GranaryError::InvalidRange { .. })
        ));
        assert!(matches!(
            b.append("nope", 0, 1, ValueSlice::Int(&[1])),
            Err(GranaryError::UnknownColumn(_))
        ));
        assert!(matches!(
            b.append("a", 0, 2, ValueSlice::Int(&[1])),
            Err(GranaryError::InvalidRange { .. })
        ));
        assert!(matches!(
            b.append("a", 0, 1, ValueSlice::Float(&[1.0])),
            Err(GranaryError::TypeMismatch { .. })
        ));
        // nothing changed
        assert_eq!(b.row_count(), 0);
        assert_eq!(b.column("a").unwrap().data().len(), 0);
    }

    #[test]
    fn test_normalize_pads_and_truncates() {
        let mut b = PartitionBuilder::new();
        b.add_column("x", DataType::Int, None, None).unwrap();
        b.add_column("s", DataType::Text, None, None).unwrap();
        b.append("x", 0, 2, ValueSlice::Int(&[7, 8])).unwrap();
        b.normalize();
        assert_eq!(b.row_count(), 2);
        assert_eq!(
            b.column("s").unwrap().data().as_strings(),
            Some(&[String::new(), String::new()][..])
        );
        assert_eq!(mask_bits(&b, "s"), vec![false, false]);
        assert_eq!(b.column("x").unwrap().mask().len(), 2);
    }

    #[test]
    fn test_normalize_idempotent() {
        let mut b = PartitionBuilder::new();
        b.add_column("x", DataType::Short, None, None).unwrap();
        b.add_column("y", DataType::Double, None, None).unwrap();
        b.append("x", 0, 3, ValueSlice::Short(&[1, 2, 3])).unwrap();
        b.append("y", 1, 2, ValueSlice::Double(&[0.5])).unwrap();
        b.normalize();
        let rows = b.row_count();
        let x_vals = b.column("x").unwrap().data().as_i16().unwrap().to_vec();
        let x_mask = mask_bits(&b, "x");
        let y_mask = mask_bits(&b, "y");
        b.normalize();
        assert_eq!(b.row_count(), rows);
        assert_eq!(b.column("x").unwrap().data().as_i16().unwrap(), &x_vals[..]);
        assert_eq!(mask_bits(&b, "x"), x_mask);
        assert_eq!(mask_bits(&b, "y"), y_mask);
    }

    #[test]
    fn test_append_row_positional_and_named() {
        let mut b = PartitionBuilder::new();
        b.add_column("a", DataType::Int, None, None).unwrap();
        b.add_column("b", DataType::Int, None, None).unwrap();
        b.add_column("s", DataType::Text, None, None).unwrap();

        // positional: first int value lands in a, second in b
        let row = TableRow::new()
            .add_int("", 1)
            .add_int("", 2)
            .add_text("", "one");
        assert_eq!(b.append_row(&row), 3);
        assert_eq!(b.row_count(), 1);
        assert_eq!(b.column("a").unwrap().data().as_i32(), Some(&[1][..]));
        assert_eq!(b.column("b").unwrap().data().as_i32(), Some(&[2][..]));
        assert_eq!(
            b.column("s").unwrap().data().as_strings().unwrap(),
            &["one".to_string()]
        );

        // named entries address columns directly, in any order
        let row = TableRow::new()
            .add_int("b", 20)
            .add_int("a", 10)
            .add_text("s", "two");
        assert_eq!(b.append_row(&row), 3);
        assert_eq!(b.row_count(), 2);
        assert_eq!(b.column("a").unwrap().data().as_i32(), Some(&[1, 10][..]));
        assert_eq!(b.column("b").unwrap().data().as_i32(), Some(&[2, 20][..]));
    }

    #[test]
    fn test_append_row_partial_policies() {
        let mut b = PartitionBuilder::new();
        b.add_column("a", DataType::Int, None, None).unwrap();
        b.add_column("s", DataType::Text, None, None).unwrap();

        let partial = TableRow::new().add_int("a", 5);
        assert_eq!(b.append_row(&partial), 1);
        // incomplete: the declared row count does not move
        assert_eq!(b.row_count(), 0);

        // the next complete row re-aligns the table first
        let full = TableRow::new().add_int("a", 6).add_text("s", "x");
        assert_eq!(b.append_row(&full), 2);
        assert_eq!(b.row_count(), 2);
        assert_eq!(b.column("a").unwrap().data().as_i32(), Some(&[5, 6][..]));
        assert_eq!(
            b.column("s").unwrap().data().as_strings().unwrap(),
            &[String::new(), "x".to_string()]
        );
        assert_eq!(mask_bits(&b, "s"), vec![false, true]);

        let mut any = PartitionBuilder::new().with_row_policy(RowPolicy::Any);
        any.add_column("a", DataType::Int, None, None).unwrap();
        any.add_column("s", DataType::Text, None, None).unwrap();
        assert_eq!(any.append_row(&partial), 1);
        assert_eq!(any.row_count(), 1);
    }

    #[test]
    fn test_append_rows_batch() {
        let mut b = PartitionBuilder::new();
        b.add_column("n", DataType::Long, None, None).unwrap();
        b.add_column("k", DataType::Category, None, None).unwrap();
        let rows: Vec<TableRow> = (0..4)
            .map(|i| {
                TableRow::new()
                    .add_long("", i as i64)
                    .add_category("", format!("k{i}"))
            })
            .collect();
        assert_eq!(b.append_rows(&rows), 4);
        assert_eq!(b.row_count(), 4);
        assert_eq!(
            b.column("n").unwrap().data().as_i64(),
            Some(&[0, 1, 2, 3][..])
        );
        assert_eq!(b.column("k").unwrap().mask().cardinality(), 4);
    }

    #[test]
    fn test_append_rows_with_partial_row() {
        let mut b = PartitionBuilder::new();
        b.add_column("n", DataType::Int, None, None).unwrap();
        b.add_column("s", DataType::Text, None, None).unwrap();
        let rows = vec![
            TableRow::new().add_int("", 1).add_text("", "a"),
            TableRow::new().add_int("", 2), // partial
            TableRow::new().add_int("", 3).add_text("", "c"),
        ];
        assert_eq!(b.append_rows(&rows), 3);
        assert_eq!(b.row_count(), 3);
        b.normalize();
        assert_eq!(b.column("n").unwrap().data().as_i32(), Some(&[1, 2, 3][..]));
        assert_eq!(
            b.column("s").unwrap().data().as_strings().unwrap(),
            &["a".to_string(), String::new(), "c".to_string()]
        );
        assert_eq!(mask_bits(&b, "s"), vec![true, false, true]);
    }

    #[test]
    fn test_reserve_and_capacity() {
        let mut b = PartitionBuilder::new();
        for i in 0..10 {
            b.add_column(&format!("c{i}"), DataType::Int, None, None)
                .unwrap();
        }
        let got = b.reserve_space(10).unwrap();
        assert!(got >= 10);
        assert!(b.capacity() >= 10);
        let cap_before = b.capacity();
        let vals: Vec<i32> = (0..10).collect();
        for i in 0..10 {
            b.append(&format!("c{i}"), 0, 10, ValueSlice::Int(&vals))
                .unwrap();
        }
        // ten staged rows fit in the reservation without reallocating
        assert_eq!(b.row_count(), 10);
        assert_eq!(b.capacity(), cap_before);
    }

    #[test]
    fn test_reserve_empty_table() {
        let mut b = PartitionBuilder::new();
        assert_eq!(b.reserve_space(64).unwrap(), 64);
        assert_eq!(b.capacity(), 0);
    }

    #[test]
    fn test_clear_data_keeps_schema() {
        let mut b = PartitionBuilder::new();
        b.add_column("a", DataType::Int, None, None).unwrap();
        b.append("a", 0, 2, ValueSlice::Int(&[1, 2])).unwrap();
        b.clear_data();
        assert_eq!(b.row_count(), 0);
        assert_eq!(b.column_count(), 1);
        assert_eq!(b.column("a").unwrap().data().len(), 0);
        b.clear();
        assert_eq!(b.column_count(), 0);
    }

    #[test]
    fn test_describe() {
        let mut b = PartitionBuilder::new();
        b.add_column("a", DataType::Int, None, None).unwrap();
        b.add_column("s", DataType::Text, None, None).unwrap();
        b.append("a", 0, 1, ValueSlice::Int(&[1])).unwrap();
        b.normalize();
        let d = b.describe();
        assert!(d.contains("1 row"));
        assert!(d.contains("2 columns"));
        assert!(d.contains("a, INT, mask(1 out of 1)"));
        assert!(d.contains("s, TEXT, mask(0 out of 1)"));
    }
}
