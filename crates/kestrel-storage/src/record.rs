//! Record identifiers and the on-page record format.
//!
//! Callers exchange tuples in the wire format: a null bitmap of
//! `ceil(n / 8)` bytes (most significant bit first) followed by the
//! non-null values in schema order. On a page a record is stored as:
//!
//! ```text
//! +-------------+----------------------+-----------------+---------+
//! | count (i16) | end offsets (i16 x n)| payload         | padding |
//! +-------------+----------------------+-----------------+---------+
//! ```
//!
//! End offsets are measured from the record start. A NULL field has zero
//! width, so its end offset equals its predecessor's. The payload is the
//! wire payload without the bitmap; VarChar values keep their length prefix.
//!
//! A forwarding record replaces a record that had to move to another page:
//! a count of -1 followed by the new page (u32) and slot (u16).

use crate::heap::constants::{FORWARD_MARKER, MAX_RECORD_SIZE, MIN_RECORD_SIZE, RELOCATED_FLAG};
use kestrel_common::page::PageNum;
use kestrel_common::types::VARCHAR_PREFIX_SIZE;
use kestrel_common::{AttrType, Attribute, KestrelError, Result, Value};
use std::fmt::Write as _;
use std::ops::Range;

/// Unique identifier for a record within a record file.
///
/// Ordered by page, then slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Rid {
    /// Page containing the record.
    pub page_num: PageNum,
    /// Slot number within the page.
    pub slot_num: u16,
}

impl Rid {
    /// Size of an encoded RID in bytes.
    pub const SIZE: usize = 6;

    /// Creates a new RID.
    pub fn new(page_num: PageNum, slot_num: u16) -> Self {
        Self { page_num, slot_num }
    }

    /// Serializes the RID to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page_num.to_le_bytes());
        buf[4..6].copy_from_slice(&self.slot_num.to_le_bytes());
        buf
    }

    /// Deserializes a RID from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_num: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot_num: u16::from_le_bytes([buf[4], buf[5]]),
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.page_num, self.slot_num)
    }
}

/// Size of the null bitmap for `num_attrs` attributes.
#[inline]
pub fn null_bitmap_size(num_attrs: usize) -> usize {
    num_attrs.div_ceil(8)
}

#[inline]
fn is_null(bitmap: &[u8], i: usize) -> bool {
    bitmap[i / 8] & (1 << (7 - i % 8)) != 0
}

#[inline]
fn set_null(bitmap: &mut [u8], i: usize) {
    bitmap[i / 8] |= 1 << (7 - i % 8);
}

/// Builds a wire tuple from optional values.
pub fn encode_tuple(values: &[Option<Value>]) -> Vec<u8> {
    let bitmap_len = null_bitmap_size(values.len());
    let mut out = vec![0u8; bitmap_len];
    for (i, value) in values.iter().enumerate() {
        match value {
            Some(v) => v.encode_into(&mut out),
            None => set_null(&mut out[..bitmap_len], i),
        }
    }
    out
}

/// Parses a wire tuple into optional values.
pub fn decode_tuple(schema: &[Attribute], wire: &[u8]) -> Result<Vec<Option<Value>>> {
    let layout = RecordLayout::of_wire(schema, wire)?;
    schema
        .iter()
        .zip(&layout.fields)
        .map(|(attr, field)| match field {
            Some(range) => Ok(Some(Value::decode(attr.attr_type, &wire[range.clone()])?.0)),
            None => Ok(None),
        })
        .collect()
}

/// Renders a wire tuple as `name: value, name: NULL, ...`.
pub fn format_record(schema: &[Attribute], wire: &[u8]) -> Result<String> {
    let values = decode_tuple(schema, wire)?;
    let mut out = String::new();
    for (i, (attr, value)) in schema.iter().zip(values).enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let written = match value {
            Some(v) => write!(out, "{}: {}", attr.name, v),
            None => write!(out, "{}: NULL", attr.name),
        };
        written.map_err(|e| KestrelError::Internal(e.to_string()))?;
    }
    Ok(out)
}

/// Where each field of a wire tuple lives and how long its record will be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    /// Byte range of each non-null field within the wire tuple.
    pub fields: Vec<Option<Range<usize>>>,
    /// Encoded record length, padding included.
    pub record_len: usize,
}

impl RecordLayout {
    /// Computes the layout of a wire tuple.
    ///
    /// Bytes after the last field are ignored.
    pub fn of_wire(schema: &[Attribute], wire: &[u8]) -> Result<Self> {
        let bitmap_len = null_bitmap_size(schema.len());
        if wire.len() < bitmap_len {
            return Err(KestrelError::SchemaMismatch(format!(
                "tuple of {} bytes is shorter than its {}-byte null bitmap",
                wire.len(),
                bitmap_len
            )));
        }
        let bitmap = &wire[..bitmap_len];

        let mut pos = bitmap_len;
        let mut fields = Vec::with_capacity(schema.len());
        for (i, attr) in schema.iter().enumerate() {
            if is_null(bitmap, i) {
                fields.push(None);
                continue;
            }
            let len = field_len(attr, &wire[pos..])?;
            fields.push(Some(pos..pos + len));
            pos += len;
        }

        let payload = pos - bitmap_len;
        let record_len = (header_size(schema.len()) + payload).max(MIN_RECORD_SIZE);
        Ok(Self { fields, record_len })
    }
}

/// Wire length of one non-null field at the front of `buf`.
fn field_len(attr: &Attribute, buf: &[u8]) -> Result<usize> {
    let len = match attr.attr_type.fixed_size() {
        Some(size) => size,
        None => {
            let prefix = buf.get(..VARCHAR_PREFIX_SIZE).ok_or_else(|| truncated(attr))?;
            VARCHAR_PREFIX_SIZE
                + u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize
        }
    };
    if len > buf.len() {
        return Err(truncated(attr));
    }
    Ok(len)
}

fn truncated(attr: &Attribute) -> KestrelError {
    KestrelError::SchemaMismatch(format!("tuple ends inside attribute {}", attr.name))
}

#[inline]
fn header_size(num_attrs: usize) -> usize {
    2 + 2 * num_attrs
}

/// Classification of the bytes stored in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredRecord {
    /// The record moved; it now lives at the given RID.
    Forward(Rid),
    /// A data record. `relocated` is set when it is the target of a forward.
    Data { relocated: bool },
}

impl StoredRecord {
    /// Classifies raw record bytes.
    pub fn parse(record: &[u8]) -> Result<Self> {
        if record.len() < 2 {
            return Err(KestrelError::Internal(format!(
                "record of {} bytes has no header",
                record.len()
            )));
        }
        let count = i16::from_le_bytes([record[0], record[1]]);
        if count == FORWARD_MARKER {
            if record.len() < 2 + Rid::SIZE {
                return Err(KestrelError::Internal(
                    "truncated forwarding record".to_string(),
                ));
            }
            return Ok(StoredRecord::Forward(Rid::from_bytes(&record[2..])));
        }
        Ok(StoredRecord::Data {
            relocated: count & RELOCATED_FLAG != 0,
        })
    }
}

/// Encodes a forwarding record pointing at `target`.
pub fn encode_forward(target: Rid) -> [u8; MIN_RECORD_SIZE] {
    let mut buf = [0u8; MIN_RECORD_SIZE];
    buf[0..2].copy_from_slice(&FORWARD_MARKER.to_le_bytes());
    buf[2..8].copy_from_slice(&target.to_bytes());
    buf
}

/// Converts between wire tuples and on-page records for one schema.
#[derive(Debug, Clone, Copy)]
pub struct RecordCodec<'a> {
    schema: &'a [Attribute],
}

impl<'a> RecordCodec<'a> {
    /// Creates a codec for the given schema.
    pub fn new(schema: &'a [Attribute]) -> Result<Self> {
        if schema.len() >= RELOCATED_FLAG as usize {
            return Err(KestrelError::SchemaMismatch(format!(
                "schema has {} attributes",
                schema.len()
            )));
        }
        Ok(Self { schema })
    }

    /// Returns the schema.
    pub fn schema(&self) -> &'a [Attribute] {
        self.schema
    }

    /// Index of the attribute with the given name.
    pub fn attribute_index(&self, name: &str) -> Result<usize> {
        self.schema
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| KestrelError::AttributeNotFound(name.to_string()))
    }

    /// Encodes a wire tuple as an on-page record.
    pub fn encode(&self, wire: &[u8], relocated: bool) -> Result<Vec<u8>> {
        let layout = RecordLayout::of_wire(self.schema, wire)?;
        if layout.record_len > MAX_RECORD_SIZE {
            return Err(KestrelError::RecordTooLarge {
                size: layout.record_len,
                max: MAX_RECORD_SIZE,
            });
        }

        let mut count = self.schema.len() as i16;
        if relocated {
            count |= RELOCATED_FLAG;
        }
        let mut out = Vec::with_capacity(layout.record_len);
        out.extend_from_slice(&count.to_le_bytes());

        let mut end = header_size(self.schema.len());
        for field in &layout.fields {
            if let Some(range) = field {
                end += range.len();
            }
            out.extend_from_slice(&(end as i16).to_le_bytes());
        }
        for range in layout.fields.iter().flatten() {
            out.extend_from_slice(&wire[range.clone()]);
        }
        out.resize(layout.record_len, 0);
        Ok(out)
    }

    /// Reads the end offsets of a data record.
    fn end_offsets(&self, record: &[u8]) -> Result<Vec<usize>> {
        if record.len() < 2 {
            return Err(KestrelError::SchemaMismatch("empty record".to_string()));
        }
        let raw = i16::from_le_bytes([record[0], record[1]]);
        let count = (raw & !RELOCATED_FLAG) as usize;
        if raw < 0 || count != self.schema.len() {
            return Err(KestrelError::SchemaMismatch(format!(
                "record has {} fields, schema has {}",
                raw,
                self.schema.len()
            )));
        }
        let header = header_size(count);
        if record.len() < header {
            return Err(KestrelError::SchemaMismatch(
                "record shorter than its header".to_string(),
            ));
        }
        let mut prev = header;
        let mut ends = Vec::with_capacity(count);
        for i in 0..count {
            let end = i16::from_le_bytes([record[2 + 2 * i], record[3 + 2 * i]]) as usize;
            if end < prev || end > record.len() {
                return Err(KestrelError::SchemaMismatch(format!(
                    "bad end offset {} for field {}",
                    end, i
                )));
            }
            ends.push(end);
            prev = end;
        }
        Ok(ends)
    }

    /// Byte range of field `index` within the record, None for NULL.
    fn field_range(&self, ends: &[usize], index: usize) -> Option<Range<usize>> {
        let start = if index == 0 {
            header_size(self.schema.len())
        } else {
            ends[index - 1]
        };
        (ends[index] > start).then(|| start..ends[index])
    }

    /// Decodes an on-page record back into a wire tuple.
    pub fn decode(&self, record: &[u8]) -> Result<Vec<u8>> {
        let all: Vec<usize> = (0..self.schema.len()).collect();
        self.project(record, &all)
    }

    /// Decodes only the given fields, in the given order, as a wire tuple.
    pub fn project(&self, record: &[u8], indices: &[usize]) -> Result<Vec<u8>> {
        let ends = self.end_offsets(record)?;
        let bitmap_len = null_bitmap_size(indices.len());
        let mut out = vec![0u8; bitmap_len];
        for (i, &index) in indices.iter().enumerate() {
            if index >= self.schema.len() {
                return Err(KestrelError::AttributeNotFound(format!("#{}", index)));
            }
            match self.field_range(&ends, index) {
                Some(range) => out.extend_from_slice(&record[range]),
                None => set_null(&mut out[..bitmap_len], i),
            }
        }
        Ok(out)
    }

    /// Decodes one field of an on-page record.
    pub fn field(&self, record: &[u8], index: usize) -> Result<Option<Value>> {
        let attr = self
            .schema
            .get(index)
            .ok_or_else(|| KestrelError::AttributeNotFound(format!("#{}", index)))?;
        let ends = self.end_offsets(record)?;
        match self.field_range(&ends, index) {
            Some(range) => Ok(Some(Value::decode(attr.attr_type, &record[range])?.0)),
            None => Ok(None),
        }
    }
}

/// Decodes a single wire-encoded literal of the given type.
pub fn decode_literal(attr_type: AttrType, wire: &[u8]) -> Result<Value> {
    Ok(Value::decode(attr_type, wire)?.0)
}
