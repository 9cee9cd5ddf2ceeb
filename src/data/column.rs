//! Column definitions: schema metadata plus the owned value buffer and
//! presence mask.

use super::{ColumnData, DataType, PresenceMask};

/// A single staged column. The builder owns its columns exclusively; a
/// column owns its buffer and mask.
#[derive(Debug, Clone)]
pub struct Column {
    pub(crate) name: String,
    pub(crate) desc: String,
    pub(crate) index_spec: String,
    dtype: DataType,
    pub(crate) data: ColumnData,
    pub(crate) mask: PresenceMask,
}

impl Column {
    pub(crate) fn new(name: &str, dtype: DataType, desc: &str, index_spec: &str) -> Self {
        Self {
            name: name.to_string(),
            // the column name doubles as the description when none is given
            desc: if desc.is_empty() { name } else { desc }.to_string(),
            index_spec: index_spec.to_string(),
            dtype,
            data: ColumnData::new(dtype),
            mask: PresenceMask::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.desc
    }

    pub fn index_spec(&self) -> &str {
        &self.index_spec
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn mask(&self) -> &PresenceMask {
        &self.mask
    }
}

/// A legal column name is an ASCII identifier: a letter or underscore
/// followed by letters, digits, or underscores.
pub(crate) fn is_valid_name(name: &str) -> bool {
    let mut chars = name.as_bytes().iter();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || *c == b'_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || *c == b'_')
}
