//! Heterogeneous typed rows.
//!
//! A [`TableRow`] carries one row's worth of values as twelve parallel
//! (name, value) sequences grouped by type. An empty name means "the next
//! column of this type in declaration order"; a non-empty name addresses a
//! column directly and rebinds the positional slot for subsequent rows.

/// Parallel name/value sequences for a single logical type.
#[derive(Debug, Clone, Default)]
pub struct NamedValues<T> {
    pub names: Vec<String>,
    pub values: Vec<T>,
}

impl<T> NamedValues<T> {
    pub fn push(&mut self, name: impl Into<String>, value: T) {
        self.names.push(name.into());
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.names.clear();
        self.values.clear();
    }
}

/// One heterogeneous row, grouped by type.
#[derive(Debug, Clone, Default)]
pub struct TableRow {
    pub bytes: NamedValues<i8>,
    pub ubytes: NamedValues<u8>,
    pub shorts: NamedValues<i16>,
    pub ushorts: NamedValues<u16>,
    pub ints: NamedValues<i32>,
    pub uints: NamedValues<u32>,
    pub longs: NamedValues<i64>,
    pub ulongs: NamedValues<u64>,
    pub floats: NamedValues<f32>,
    pub doubles: NamedValues<f64>,
    pub categories: NamedValues<String>,
    pub texts: NamedValues<String>,
}

impl TableRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of values carried by this row.
    pub fn column_count(&self) -> usize {
        self.bytes.len()
            + self.ubytes.len()
            + self.shorts.len()
            + self.ushorts.len()
            + self.ints.len()
            + self.uints.len()
            + self.longs.len()
            + self.ulongs.len()
            + self.floats.len()
            + self.doubles.len()
            + self.categories.len()
            + self.texts.len()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.ubytes.clear();
        self.shorts.clear();
        self.ushorts.clear();
        self.ints.clear();
        self.uints.clear();
        self.longs.clear();
        self.ulongs.clear();
        self.floats.clear();
        self.doubles.clear();
        self.categories.clear();
        self.texts.clear();
    }

    // Builder helpers. Pass an empty name for positional matching.

    pub fn add_byte(mut self, name: impl Into<String>, v: i8) -> Self {
        self.bytes.push(name, v);
        self
    }

    pub fn add_ubyte(mut self, name: impl Into<String>, v: u8) -> Self {
        self.ubytes.push(name, v);
        self
    }

    pub fn add_short(mut self, name: impl Into<String>, v: i16) -> Self {
        self.shorts.push(name, v);
        self
    }

    pub fn add_ushort(mut self, name: impl Into<String>, v: u16) -> Self {
        self.ushorts.push(name, v);
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, v: i32) -> Self {
        self.ints.push(name, v);
        self
    }

    pub fn add_uint(mut self, name: impl Into<String>, v: u32) -> Self {
        self.uints.push(name, v);
        self
    }

    pub fn add_long(mut self, name: impl Into<String>, v: i64) -> Self {
        self.longs.push(name, v);
        self
    }

    pub fn add_ulong(mut self, name: impl Into<String>, v: u64) -> Self {
        self.ulongs.push(name, v);
        self
    }

    pub fn add_float(mut self, name: impl Into<String>, v: f32) -> Self {
        self.floats.push(name, v);
        self
    }

    pub fn add_double(mut self, name: impl Into<String>, v: f64) -> Self {
        self.doubles.push(name, v);
        self
    }

    pub fn add_category(mut self, name: impl Into<String>, v: impl Into<String>) -> Self {
        self.categories.push(name, v.into());
        self
    }

    pub fn add_text(mut self, name: impl Into<String>, v: impl Into<String>) -> Self {
        self.texts.push(name, v.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_count() {
        let row = TableRow::new()
            .add_int("", 1)
            .add_int("other", 2)
            .add_text("", "x");
        assert_eq!(row.column_count(), 3);
    }

    #[test]
    fn test_clear() {
        let mut row = TableRow::new().add_double("d", 1.5).add_category("c", "k");
        row.clear();
        assert_eq!(row.column_count(), 0);
        assert!(row.doubles.is_empty());
    }
}
