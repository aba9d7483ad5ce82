//! The primitive stream decoder.
//!
//! Every record in a RAW file is decoded by walking an ordered list of
//! [`FieldTemplate`]s against a seekable byte source. The decoder records the
//! absolute offset and encoded size of every field it reads, so errors can
//! name the exact spot in the file and callers can re-seek to any decoded
//! region.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{RawFileError, Result};

/// Upper bound on any counted string, in characters.
const MAX_STRING_LEN: u32 = 1 << 20;

/// A seekable byte source the decoder reads from.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// A named sub-decoder invoked for composite template fields.
pub type SubDecoder = fn(&mut Stream<'_>, u32) -> Result<Record>;

/// Primitive field type codes. All multi-byte values are little-endian.
#[derive(Debug, Clone, Copy)]
pub enum Ty {
    U16,
    I16,
    U32,
    I32,
    U64,
    F32,
    F64,
    /// `u32` byte count followed by that many ASCII bytes.
    AsciiCounted,
    /// `u32` character count followed by `2·n` bytes of UTF-16LE; embedded
    /// NUL code units are stripped on decode.
    Utf16Counted,
    /// Composite field decoded by a named sub-decoder.
    Struct(SubDecoder),
}

/// One declarative field in a record template.
#[derive(Debug, Clone, Copy)]
pub struct FieldTemplate {
    pub name: &'static str,
    pub ty: Ty,
    pub label: &'static str,
}

pub const fn t(name: &'static str, ty: Ty, label: &'static str) -> FieldTemplate {
    FieldTemplate { name, ty, label }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    F32(f32),
    F64(f64),
    Text(String),
    Record(Record),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::U16(_) => "u16",
            Value::I16(_) => "i16",
            Value::U32(_) => "u32",
            Value::I32(_) => "i32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Text(_) => "text",
            Value::Record(_) => "record",
        }
    }
}

/// A decoded field together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    /// Absolute offset of the field in the file.
    pub offset: u64,
    /// Encoded size in bytes.
    pub size: u64,
    pub value: Value,
}

/// An ordered, keyed record decoded from a template list.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    name: &'static str,
    fields: Vec<(&'static str, FieldValue)>,
    /// Absolute offset the record started at.
    pub offset: u64,
    /// Total bytes consumed by the record.
    pub size: u64,
}

impl Record {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[(&'static str, FieldValue)] {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Result<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, fv)| fv)
            .ok_or_else(|| {
                RawFileError::format(format!("{}.{field}", self.name), "missing field")
            })
    }

    fn mismatch(&self, field: &str, expected: &str, got: &Value) -> RawFileError {
        RawFileError::format(
            format!("{}.{field}", self.name),
            format!("expected {expected}, found {}", got.type_name()),
        )
    }

    pub fn u16(&self, field: &str) -> Result<u16> {
        match &self.get(field)?.value {
            Value::U16(v) => Ok(*v),
            other => Err(self.mismatch(field, "u16", other)),
        }
    }

    pub fn u32(&self, field: &str) -> Result<u32> {
        match &self.get(field)?.value {
            Value::U32(v) => Ok(*v),
            other => Err(self.mismatch(field, "u32", other)),
        }
    }

    pub fn i32(&self, field: &str) -> Result<i32> {
        match &self.get(field)?.value {
            Value::I32(v) => Ok(*v),
            other => Err(self.mismatch(field, "i32", other)),
        }
    }

    pub fn f32(&self, field: &str) -> Result<f32> {
        match &self.get(field)?.value {
            Value::F32(v) => Ok(*v),
            other => Err(self.mismatch(field, "f32", other)),
        }
    }

    pub fn f64(&self, field: &str) -> Result<f64> {
        match &self.get(field)?.value {
            Value::F64(v) => Ok(*v),
            other => Err(self.mismatch(field, "f64", other)),
        }
    }

    pub fn text(&self, field: &str) -> Result<&str> {
        match &self.get(field)?.value {
            Value::Text(v) => Ok(v.as_str()),
            other => Err(self.mismatch(field, "text", other)),
        }
    }

    pub fn record(&self, field: &str) -> Result<&Record> {
        match &self.get(field)?.value {
            Value::Record(v) => Ok(v),
            other => Err(self.mismatch(field, "record", other)),
        }
    }

    /// A file offset stored as either `u32` or `u64`, widened to `u64`.
    /// Offset widths are version-gated; this spares callers the distinction.
    pub fn addr(&self, field: &str) -> Result<u64> {
        match &self.get(field)?.value {
            Value::U32(v) => Ok(u64::from(*v)),
            Value::U64(v) => Ok(*v),
            other => Err(self.mismatch(field, "u32 or u64", other)),
        }
    }
}

/// The decoder proper: a borrowed seekable source plus the current absolute
/// position. Positions advance as a side effect of every read.
pub struct Stream<'a> {
    src: &'a mut dyn ReadSeek,
    pos: u64,
}

impl<'a> Stream<'a> {
    pub fn new(src: &'a mut dyn ReadSeek) -> Result<Self> {
        let pos = src.stream_position().map_err(|e| RawFileError::Io {
            path: "<stream>".to_string(),
            offset: 0,
            source: e,
        })?;
        Ok(Self { src, pos })
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.src
            .seek(SeekFrom::Start(offset))
            .map_err(|e| RawFileError::Io {
                path: "<seek>".to_string(),
                offset,
                source: e,
            })?;
        self.pos = offset;
        Ok(())
    }

    pub fn skip(&mut self, n: u64) -> Result<()> {
        let target = self.pos + n;
        self.seek(target)
    }

    fn fill(&mut self, path: &str, buf: &mut [u8]) -> Result<()> {
        let offset = self.pos;
        self.src.read_exact(buf).map_err(|e| RawFileError::Io {
            path: path.to_string(),
            offset,
            source: e,
        })?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn read_bytes(&mut self, path: &str, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.fill(path, &mut buf)?;
        Ok(buf)
    }

    pub fn read_u16(&mut self, path: &str) -> Result<u16> {
        let mut b = [0u8; 2];
        self.fill(path, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn read_i16(&mut self, path: &str) -> Result<i16> {
        let mut b = [0u8; 2];
        self.fill(path, &mut b)?;
        Ok(i16::from_le_bytes(b))
    }

    pub fn read_u32(&mut self, path: &str) -> Result<u32> {
        let mut b = [0u8; 4];
        self.fill(path, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn read_i32(&mut self, path: &str) -> Result<i32> {
        let mut b = [0u8; 4];
        self.fill(path, &mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    pub fn read_u64(&mut self, path: &str) -> Result<u64> {
        let mut b = [0u8; 8];
        self.fill(path, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    pub fn read_u8(&mut self, path: &str) -> Result<u8> {
        let mut b = [0u8; 1];
        self.fill(path, &mut b)?;
        Ok(b[0])
    }

    pub fn read_f32(&mut self, path: &str) -> Result<f32> {
        let mut b = [0u8; 4];
        self.fill(path, &mut b)?;
        Ok(f32::from_le_bytes(b))
    }

    pub fn read_f64(&mut self, path: &str) -> Result<f64> {
        let mut b = [0u8; 8];
        self.fill(path, &mut b)?;
        Ok(f64::from_le_bytes(b))
    }

    /// A `u32` count validated against an upper bound before anything is
    /// allocated for it.
    pub fn read_count(&mut self, path: &str, max: u32) -> Result<u32> {
        let n = self.read_u32(path)?;
        if n > max {
            return Err(RawFileError::format(
                path,
                format!("count {n} exceeds the plausible maximum {max}"),
            ));
        }
        Ok(n)
    }

    /// A counted ASCII string: `u32` byte count, then the bytes.
    pub fn read_ascii(&mut self, path: &str) -> Result<String> {
        let n = self.read_count(path, MAX_STRING_LEN)?;
        let bytes = self.read_bytes(path, n as usize)?;
        Ok(String::from_utf8_lossy(&bytes)
            .trim_end_matches('\0')
            .to_string())
    }

    /// A counted UTF-16LE string: `u32` character count, then `2·n` bytes.
    /// Embedded NUL code units are stripped.
    pub fn read_utf16(&mut self, path: &str) -> Result<String> {
        let n = self.read_count(path, MAX_STRING_LEN)?;
        let bytes = self.read_bytes(path, 2 * n as usize)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .filter(|&u| u != 0)
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// Fixed-width UTF-16LE text of `n` characters, NUL-stripped.
    pub fn read_utf16_fixed(&mut self, path: &str, n: usize) -> Result<String> {
        let bytes = self.read_bytes(path, 2 * n)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .filter(|&u| u != 0)
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// Positional read: consume the template list sequentially from the
    /// current position into a keyed [`Record`].
    pub fn read_record(
        &mut self,
        name: &'static str,
        templates: &[FieldTemplate],
        version: u32,
    ) -> Result<Record> {
        let start = self.pos;
        let mut fields = Vec::with_capacity(templates.len());
        for ft in templates {
            let offset = self.pos;
            let path = format!("{name}.{}", ft.name);
            let value = match ft.ty {
                Ty::U16 => Value::U16(self.read_u16(&path)?),
                Ty::I16 => Value::I16(self.read_i16(&path)?),
                Ty::U32 => Value::U32(self.read_u32(&path)?),
                Ty::I32 => Value::I32(self.read_i32(&path)?),
                Ty::U64 => Value::U64(self.read_u64(&path)?),
                Ty::F32 => Value::F32(self.read_f32(&path)?),
                Ty::F64 => Value::F64(self.read_f64(&path)?),
                Ty::AsciiCounted => Value::Text(self.read_ascii(&path)?),
                Ty::Utf16Counted => Value::Text(self.read_utf16(&path)?),
                Ty::Struct(sub) => Value::Record(sub(self, version)?),
            };
            let size = self.pos - offset;
            fields.push((ft.name, FieldValue { offset, size, value }));
        }
        Ok(Record {
            name,
            fields,
            offset: start,
            size: self.pos - start,
        })
    }

    /// Iterate-object mode: having just read a count, decode that many
    /// instances of a record into an ordered sequence.
    pub fn read_records(
        &mut self,
        count: u32,
        name: &'static str,
        templates: &[FieldTemplate],
        version: u32,
    ) -> Result<Vec<Record>> {
        (0..count)
            .map(|_| self.read_record(name, templates, version))
            .collect()
    }
}
