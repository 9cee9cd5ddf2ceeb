//! Presence bitmaps.
//!
//! A [`PresenceMask`] records which rows of a column carry a real value; the
//! null sentinel in the value buffer is purely a stride filler and the mask
//! is the authoritative validity indicator. The set is kept in a Roaring
//! bitmap with an explicit logical bit length alongside, since positions
//! beyond the last set bit are meaningful zeros here.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use roaring::RoaringBitmap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceMask {
    bits: RoaringBitmap,
    len: u64,
}

impl Default for PresenceMask {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceMask {
    pub fn new() -> Self {
        Self {
            bits: RoaringBitmap::new(),
            len: 0,
        }
    }

    /// Logical number of bits.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> u64 {
        self.bits.len()
    }

    /// All bits set (and at least one bit present)? An empty mask counts as
    /// full, matching a column with no rows.
    pub fn is_full(&self) -> bool {
        self.cardinality() == self.len
    }

    pub fn get(&self, index: u64) -> bool {
        index < self.len && self.bits.contains(index as u32)
    }

    /// Append `count` copies of `bit`.
    pub fn append_fill(&mut self, bit: bool, count: u64) {
        if bit && count > 0 {
            self.bits
                .insert_range(self.len as u32..(self.len + count) as u32);
        }
        self.len += count;
    }

    /// Append a single set bit.
    pub fn push_one(&mut self) {
        self.bits.insert(self.len as u32);
        self.len += 1;
    }

    /// Adjust the logical size: one-fill from the current length up to
    /// `populated`, zero-fill up to `total`, truncate beyond `total`.
    pub fn adjust_size(&mut self, populated: u64, total: u64) {
        if self.len > total {
            self.bits.remove_range(total as u32..self.len as u32);
            self.len = total;
        }
        if self.len < populated {
            self.bits.insert_range(self.len as u32..populated as u32);
            self.len = populated;
        }
        if self.len < total {
            self.len = total;
        }
    }

    /// Bitwise OR with another mask; the logical length becomes the longer
    /// of the two.
    pub fn union(&mut self, other: &PresenceMask) {
        self.bits |= &other.bits;
        if other.len > self.len {
            self.len = other.len;
        }
    }

    /// Concatenate another mask after this one's logical end.
    pub fn append_mask(&mut self, other: &PresenceMask) {
        let base = self.len as u32;
        for b in &other.bits {
            self.bits.insert(base + b);
        }
        self.len += other.len;
    }

    pub fn clear(&mut self) {
        self.bits.clear();
        self.len = 0;
    }

    /// Iterate bits as booleans over the logical length.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.bits.contains(i as u32))
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u64::<LittleEndian>(self.len)?;
        self.bits.serialize_into(out)
    }

    pub fn read_from<R: Read>(input: &mut R) -> io::Result<Self> {
        let len = input.read_u64::<LittleEndian>()?;
        let bits = RoaringBitmap::deserialize_from(input)?;
        Ok(Self { bits, len })
    }

    /// Serialize to a sidecar file.
    pub fn write_file(&self, path: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        out.flush()
    }

    /// Read a sidecar file; `Ok(None)` when the file does not exist.
    pub fn read_file(path: &Path) -> io::Result<Option<Self>> {
        match File::open(path) {
            Ok(f) => {
                let mut input = BufReader::new(f);
                Ok(Some(Self::read_from(&mut input)?))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
