//! Text ingestion: delimited-line parsing, CSV import, and the
//! "name:type" schema declaration vocabulary.
//!
//! Malformed tokens are logged and skipped; they never abort an import.
//! Row alignment survives because [`PartitionBuilder::normalize`] null-pads
//! the skipped column when the next complete row arrives or when the
//! partition is written.

use super::{PartitionBuilder, RowPolicy};
use crate::data::DataType;
use crate::{GranaryError, Result};
use log::{debug, info};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Read an optionally signed radix-10 integer, advancing the cursor past
/// the digits on success. Returns `None` without consuming anything when no
/// digits are present; a too-large magnitude consumes the digits but still
/// reports `None`.
pub(crate) fn read_int(cursor: &mut &str) -> Option<i64> {
    let s = cursor.trim_start();
    let b = s.as_bytes();
    let mut i = 0;
    let mut neg = false;
    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        neg = b[i] == b'-';
        i += 1;
    }
    let start = i;
    let mut val: i64 = 0;
    let mut overflow = false;
    while i < b.len() && b[i].is_ascii_digit() {
        if !overflow {
            let d = (b[i] - b'0') as i64;
            match val.checked_mul(10).and_then(|v| v.checked_add(d)) {
                Some(v) => val = v,
                None => overflow = true,
            }
        }
        i += 1;
    }
    if i == start {
        return None;
    }
    *cursor = &s[i..];
    if overflow {
        return None;
    }
    Some(if neg { -val } else { val })
}

/// Read a floating-point token (sign, scientific notation, `nan`, `inf`),
/// advancing the cursor on success. The token ends at whitespace or a
/// delimiter character.
pub(crate) fn read_double(cursor: &mut &str, delims: &str) -> Option<f64> {
    let s = cursor.trim_start();
    let end = s
        .find(|c: char| c.is_whitespace() || delims.contains(c))
        .unwrap_or(s.len());
    let tok = &s[..end];
    if tok.is_empty() {
        return None;
    }
    match tok.parse::<f64>() {
        Ok(v) => {
            *cursor = &s[end..];
            Some(v)
        }
        Err(_) => None,
    }
}

/// Read a string token: either a `"…"`/`'…'` quoted run (which may contain
/// delimiters) or an unquoted run ending at a delimiter, right-trimmed.
/// Always advances the cursor; an empty result means a missing value.
pub(crate) fn read_token(cursor: &mut &str, delims: &str) -> String {
    let s = cursor.trim_start();
    let b = s.as_bytes();
    if !b.is_empty() && (b[0] == b'"' || b[0] == b'\'') {
        let quote = b[0] as char;
        let rest = &s[1..];
        match rest.find(quote) {
            Some(pos) => {
                let tok = rest[..pos].to_string();
                *cursor = &rest[pos + 1..];
                tok
            }
            None => {
                // unterminated quote: take the remainder of the line
                let tok = rest.to_string();
                *cursor = "";
                tok
            }
        }
    } else {
        let end = s.find(|c: char| delims.contains(c)).unwrap_or(s.len());
        let tok = s[..end].trim_end().to_string();
        *cursor = &s[end..];
        tok
    }
}

/// Skip trailing whitespace and at most one delimiter character.
fn skip_separator(cursor: &mut &str, delims: &str) {
    let s = cursor.trim_start();
    if let Some(c) = s.chars().next() {
        if delims.contains(c) {
            *cursor = &s[c.len_utf8()..];
            return;
        }
    }
    *cursor = s;
}

/// Map a (lowercased) type word from a schema declaration to a logical
/// type. `unsigned` is set when the word was prefixed by "unsigned".
fn type_from_word(word: &str, unsigned: bool) -> DataType {
    let b = word.as_bytes();
    if unsigned {
        return match b.first() {
            Some(b'b') => DataType::UByte,
            Some(b's') => DataType::UShort,
            Some(b'l') => DataType::ULong,
            _ => DataType::UInt,
        };
    }
    match b.first() {
        None => DataType::Int,
        Some(b'a') => DataType::UByte,
        Some(b'b') => DataType::Byte,
        Some(b'h') => DataType::Short,
        Some(b'g') => DataType::UShort,
        Some(b'i') => DataType::Int,
        Some(b'l') => DataType::Long,
        Some(b'u') => match b.get(1) {
            Some(b'b') => DataType::UByte,
            Some(b's') => DataType::UShort,
            Some(b'l') => DataType::ULong,
            _ => DataType::UInt,
        },
        Some(b'v') => DataType::ULong,
        Some(b'f') | Some(b'r') => DataType::Float,
        Some(b'd') => DataType::Double,
        Some(b'c') | Some(b'k') => DataType::Category,
        Some(b't') => DataType::Text,
        Some(b's') => {
            if b.get(1) == Some(&b't') {
                DataType::Text
            } else {
                DataType::Short
            }
        }
        _ => DataType::Int,
    }
}

impl PartitionBuilder {
    /// Digest one delimited line, pushing each token into the matching
    /// column in declaration order. Returns the number of values pushed.
    ///
    /// Integer tokens are parsed through a 64-bit intermediate and narrowed
    /// to the column's width; a value that does not round-trip is skipped.
    /// Empty string tokens are treated as missing. A skipped column stays
    /// short until the next normalize pass null-pads it.
    pub(crate) fn parse_line(&mut self, line: &str, delims: &str, row_id: &str) -> usize {
        let mut cursor = line;
        let mut cnt = 0usize;
        let ncol = self.columns.len();
        for i in 0..ncol {
            let col = &mut self.columns[i];
            match col.dtype() {
                DataType::Byte => match read_int(&mut cursor) {
                    Some(v) => match i8::try_from(v) {
                        Ok(x) => {
                            col.data.push_i8(x);
                            col.mask.push_one();
                            cnt += 1;
                        }
                        Err(_) => debug!(
                            "{row_id}: column {} value {v} does not fit into a byte",
                            i + 1
                        ),
                    },
                    None => debug!("{row_id}: column {} cannot be parsed as an integer", i + 1),
                },
                DataType::UByte => match read_int(&mut cursor) {
                    Some(v) => match u8::try_from(v) {
                        Ok(x) => {
                            col.data.push_u8(x);
                            col.mask.push_one();
                            cnt += 1;
                        }
                        Err(_) => debug!(
                            "{row_id}: column {} value {v} does not fit into an unsigned byte",
                            i + 1
                        ),
                    },
                    None => debug!("{row_id}: column {} cannot be parsed as an integer", i + 1),
                },
                DataType::Short => match read_int(&mut cursor) {
                    Some(v) => match i16::try_from(v) {
                        Ok(x) => {
                            col.data.push_i16(x);
                            col.mask.push_one();
                            cnt += 1;
                        }
                        Err(_) => debug!(
                            "{row_id}: column {} value {v} does not fit into a two-byte integer",
                            i + 1
                        ),
                    },
                    None => debug!("{row_id}: column {} cannot be parsed as an integer", i + 1),
                },
                DataType::UShort => match read_int(&mut cursor) {
                    Some(v) => match u16::try_from(v) {
                        Ok(x) => {
                            col.data.push_u16(x);
                            col.mask.push_one();
                            cnt += 1;
                        }
                        Err(_) => debug!(
                            "{row_id}: column {} value {v} does not fit into a two-byte integer",
                            i + 1
                        ),
                    },
                    None => debug!("{row_id}: column {} cannot be parsed as an integer", i + 1),
                },
                DataType::Int => match read_int(&mut cursor) {
                    Some(v) => match i32::try_from(v) {
                        Ok(x) => {
                            col.data.push_i32(x);
                            col.mask.push_one();
                            cnt += 1;
                        }
                        Err(_) => debug!(
                            "{row_id}: column {} value {v} does not fit into a four-byte integer",
                            i + 1
                        ),
                    },
                    None => debug!("{row_id}: column {} cannot be parsed as an integer", i + 1),
                },
                DataType::UInt => match read_int(&mut cursor) {
                    Some(v) => match u32::try_from(v) {
                        Ok(x) => {
                            col.data.push_u32(x);
                            col.mask.push_one();
                            cnt += 1;
                        }
                        Err(_) => debug!(
                            "{row_id}: column {} value {v} does not fit into a four-byte integer",
                            i + 1
                        ),
                    },
                    None => debug!("{row_id}: column {} cannot be parsed as an integer", i + 1),
                },
                DataType::Long => match read_int(&mut cursor) {
                    Some(v) => {
                        col.data.push_i64(v);
                        col.mask.push_one();
                        cnt += 1;
                    }
                    None => debug!("{row_id}: column {} cannot be parsed as an integer", i + 1),
                },
                DataType::ULong => match read_int(&mut cursor) {
                    Some(v) => match u64::try_from(v) {
                        Ok(x) => {
                            col.data.push_u64(x);
                            col.mask.push_one();
                            cnt += 1;
                        }
                        Err(_) => debug!(
                            "{row_id}: column {} value {v} is negative, not an unsigned integer",
                            i + 1
                        ),
                    },
                    None => debug!("{row_id}: column {} cannot be parsed as an integer", i + 1),
                },
                DataType::Float => match read_double(&mut cursor, delims) {
                    Some(v) => {
                        col.data.push_f32(v as f32);
                        col.mask.push_one();
                        cnt += 1;
                    }
                    None => debug!(
                        "{row_id}: column {} cannot be parsed as a floating-point number",
                        i + 1
                    ),
                },
                DataType::Double => match read_double(&mut cursor, delims) {
                    Some(v) => {
                        col.data.push_f64(v);
                        col.mask.push_one();
                        cnt += 1;
                    }
                    None => debug!(
                        "{row_id}: column {} cannot be parsed as a floating-point number",
                        i + 1
                    ),
                },
                DataType::Category | DataType::Text => {
                    let tok = read_token(&mut cursor, delims);
                    if !tok.is_empty() {
                        col.data.push_string(tok);
                        col.mask.push_one();
                        cnt += 1;
                    }
                }
            }
            if cursor.is_empty() {
                break;
            }
            skip_separator(&mut cursor, delims);
        }
        cnt
    }

    /// Append one line of delimited text as a row. Blank lines and lines
    /// starting with `#` or `--` are no-ops returning 0. Returns the number
    /// of values pushed.
    pub fn append_line(&mut self, line: &str, delims: &str) -> usize {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("--") {
            return 0;
        }
        let delims = if delims.is_empty() { "," } else { delims };
        let preview: String = trimmed.chars().take(10).collect();
        let id = format!("line \"{preview} ...\"");
        self.normalize();
        let cnt = self.parse_line(trimmed.trim_end(), delims, &id);
        let counts = match self.row_policy() {
            RowPolicy::Complete => cnt >= self.column_count(),
            RowPolicy::Any => cnt > 0,
        };
        if counts {
            self.mrows += 1;
        }
        cnt
    }

    /// Import a delimited text file. `max_rows > 1` reserves capacity up
    /// front (best effort; a failed reservation aborts the import before
    /// any line is read). Returns the number of rows extracted.
    pub fn read_csv(&mut self, path: impl AsRef<Path>, max_rows: u32, delims: &str) -> Result<u64> {
        let path = path.as_ref();
        if self.columns.is_empty() {
            return Err(GranaryError::EmptySchema);
        }
        let delims = if delims.is_empty() { "," } else { delims };
        let file = File::open(path)?;
        if max_rows > 1 {
            self.reserve_space(max_rows)?;
        }
        let mut reader = BufReader::new(file);
        let mut line = String::with_capacity(256);
        let ncol = self.column_count();
        let mut cnt = 0usize;
        let mut iline = 0u64;
        let mut nrows = 0u64;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            iline += 1;
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("--") {
                continue;
            }
            // the previous line was partial; re-align before pushing more
            if cnt != ncol {
                self.normalize();
            }
            let id = format!("{}:{}", path.display(), iline);
            cnt = self.parse_line(trimmed.trim_end(), delims, &id);
            if cnt > 0 {
                self.mrows += 1;
                nrows += 1;
            }
            if iline % 1_000_000 == 0 {
                debug!("read_csv({}) processed line {iline} ...", path.display());
            }
        }
        info!(
            "read_csv({}) processed {iline} line(s) of text and extracted {nrows} record(s)",
            path.display()
        );
        Ok(nrows)
    }

    /// Extract "name:type" pairs from a piece of text and declare a column
    /// for each, tolerant of punctuation between pairs. `#` or `--` starts
    /// a comment. Returns the number of pairs consumed.
    pub fn parse_names_and_types(&mut self, text: &str) -> usize {
        let b = text.as_bytes();
        let mut i = 0;
        let mut ret = 0;
        loop {
            // find the start of a name
            while i < b.len() {
                if b[i] == b'#' || (b[i] == b'-' && b.get(i + 1) == Some(&b'-')) {
                    return ret;
                }
                if b[i] == b'_' || b[i].is_ascii_alphabetic() {
                    break;
                }
                i += 1;
            }
            let start = i;
            while i < b.len() && (b[i] == b'_' || b[i].is_ascii_alphanumeric()) {
                i += 1;
            }
            if i == start {
                return ret;
            }
            let name = &text[start..i];
            // skip punctuation to the type word; a comment blanks the rest
            while i < b.len() {
                if b[i] == b'#' || (b[i] == b'-' && b.get(i + 1) == Some(&b'-')) {
                    i = b.len();
                    break;
                }
                if b[i].is_ascii_alphabetic() {
                    break;
                }
                i += 1;
            }
            let tstart = i;
            while i < b.len() && b[i].is_ascii_alphabetic() {
                i += 1;
            }
            let mut word = text[tstart..i].to_ascii_lowercase();
            let mut unsigned = false;
            if word == "unsigned" || word == "signed" {
                unsigned = word == "unsigned";
                while i < b.len() && b[i].is_ascii_whitespace() {
                    i += 1;
                }
                let wstart = i;
                while i < b.len() && b[i].is_ascii_alphabetic() {
                    i += 1;
                }
                word = text[wstart..i].to_ascii_lowercase();
            }
            let dtype = type_from_word(&word, unsigned);
            debug!("parse_names_and_types: {name}:{word} -> {dtype}");
            let _ = self.add_column(name, dtype, None, None);
            ret += 1;
        }
    }

    /// Read a schema declaration file line by line through
    /// [`parse_names_and_types`](Self::parse_names_and_types). Returns the
    /// total number of pairs consumed.
    pub fn read_names_and_types(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut total = 0usize;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            total += self.parse_names_and_types(&line);
        }
        debug!(
            "read_names_and_types({}) parsed {total} name-type pair(s)",
            path.display()
        );
        Ok(total)
    }
}
