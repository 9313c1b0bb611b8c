//! Minimal FlatBuffers-compatible table builder and reader.
//!
//! # Builder
//! The buffer is built back to front, exactly like the reference FlatBuffers
//! builders: every object is prepended, and an [`Offset`] is the object's
//! distance from the *end* of the buffer.  Children must therefore be
//! finished before the table or vector that refers to them, which keeps all
//! references (`uoffset`) pointing forward.
//!
//! Supported shapes: tables with scalar and reference fields, strings, and
//! vectors of references.  No vtable deduplication is performed.
//!
//! # Reader
//! [`Table`] and [`Vector`] are zero-copy views over a byte slice.  Every
//! access is bounds-checked and reports [`FlatError`] instead of panicking,
//! because the bytes come straight from disk.
//!
//! # Endianness
//! All scalars are little-endian.  Scalars are aligned to their size
//! relative to the end of the buffer; `finish` pads the front so the whole
//! buffer is a multiple of the largest alignment seen.

use std::collections::VecDeque;
use thiserror::Error;

/// Byte offset of a field's entry inside a vtable: `4 + 2 * field_id`.
pub type VOffset = u16;

const SIZE_UOFFSET: usize = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FlatError {
    #[error("Read of {needed} bytes at offset {offset} exceeds buffer of {len} bytes")]
    OutOfBounds { offset: usize, needed: usize, len: usize },
    #[error("Vtable offset out of range for table at {0}")]
    BadVtable(usize),
    #[error("String at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),
}

// ── Scalars ──────────────────────────────────────────────────────────────────

/// Fixed-size little-endian value storable in a table slot.
pub trait Scalar: Copy {
    const SIZE: usize;
    fn to_le(self, out: &mut [u8]);
    fn from_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {$(
        impl Scalar for $t {
            const SIZE: usize = std::mem::size_of::<$t>();
            #[inline]
            fn to_le(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }
            #[inline]
            fn from_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_le_bytes(raw)
            }
        }
    )*};
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl Scalar for bool {
    const SIZE: usize = 1;
    #[inline]
    fn to_le(self, out: &mut [u8]) { out[0] = self as u8; }
    #[inline]
    fn from_le(bytes: &[u8]) -> Self { bytes[0] != 0 }
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Position of a finished object, measured from the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset(usize);

impl Offset {
    pub fn value(self) -> usize { self.0 }
}

pub struct Builder {
    buf:         VecDeque<u8>,
    min_align:   usize,
    /// (vtable slot, position of the field) for the table under construction.
    fields:      Vec<(VOffset, usize)>,
    table_start: Option<usize>,
}

impl Default for Builder {
    fn default() -> Self { Self::with_capacity(1024) }
}

impl Builder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf:         VecDeque::with_capacity(capacity),
            min_align:   1,
            fields:      Vec::new(),
            table_start: None,
        }
    }

    /// Bytes written so far.
    #[inline]
    pub fn used(&self) -> usize { self.buf.len() }

    fn prepend(&mut self, bytes: &[u8]) {
        for &b in bytes.iter().rev() {
            self.buf.push_front(b);
        }
    }

    /// Pad so that, after `len` more bytes, the buffer is `alignment`-aligned.
    fn align(&mut self, len: usize, alignment: usize) {
        self.min_align = self.min_align.max(alignment);
        let pad = (alignment - (self.used() + len) % alignment) % alignment;
        for _ in 0..pad {
            self.buf.push_front(0);
        }
    }

    fn push_scalar<T: Scalar>(&mut self, value: T) -> usize {
        self.align(T::SIZE, T::SIZE);
        let mut raw = [0u8; 8];
        value.to_le(&mut raw[..T::SIZE]);
        self.prepend(&raw[..T::SIZE]);
        self.used()
    }

    /// Prepend a forward reference to `target`.
    fn push_uoffset(&mut self, target: Offset) -> usize {
        self.align(SIZE_UOFFSET, SIZE_UOFFSET);
        debug_assert!(target.0 <= self.used(), "reference to an unfinished object");
        let rel = (self.used() + SIZE_UOFFSET - target.0) as u32;
        self.prepend(&rel.to_le_bytes());
        self.used()
    }

    /// Length-prefixed, NUL-terminated UTF-8 string.
    pub fn create_string(&mut self, s: &str) -> Offset {
        debug_assert!(self.table_start.is_none(), "strings cannot nest in a table");
        self.align(s.len() + 1, SIZE_UOFFSET);
        self.buf.push_front(0);
        self.prepend(s.as_bytes());
        Offset(self.push_scalar(s.len() as u32))
    }

    /// Vector of references to already finished objects, in the given order.
    pub fn create_vector(&mut self, items: &[Offset]) -> Offset {
        debug_assert!(self.table_start.is_none(), "vectors cannot nest in a table");
        self.align(items.len() * SIZE_UOFFSET, SIZE_UOFFSET);
        for &item in items.iter().rev() {
            self.push_uoffset(item);
        }
        Offset(self.push_scalar(items.len() as u32))
    }

    pub fn start_table(&mut self) {
        debug_assert!(self.table_start.is_none(), "tables cannot nest");
        self.fields.clear();
        self.table_start = Some(self.used());
    }

    pub fn add_scalar<T: Scalar>(&mut self, slot: VOffset, value: T) {
        let pos = self.push_scalar(value);
        self.fields.push((slot, pos));
    }

    pub fn add_offset(&mut self, slot: VOffset, target: Offset) {
        let pos = self.push_uoffset(target);
        self.fields.push((slot, pos));
    }

    /// Close the current table: write its soffset and a fresh vtable.
    pub fn end_table(&mut self) -> Offset {
        let start = self.table_start.take().unwrap_or_else(|| self.used());

        // soffset placeholder, patched once the vtable position is known.
        let object = self.push_scalar(0i32);
        let object_size = (object - start) as u16;

        let num_slots = self
            .fields
            .iter()
            .map(|&(slot, _)| (slot as usize - 4) / 2 + 1)
            .max()
            .unwrap_or(0);
        let mut entries = vec![0u16; num_slots];
        for &(slot, pos) in &self.fields {
            entries[(slot as usize - 4) / 2] = (object - pos) as u16;
        }
        self.fields.clear();

        for &entry in entries.iter().rev() {
            self.push_scalar(entry);
        }
        self.push_scalar(object_size);
        let vtable = self.push_scalar((4 + 2 * num_slots) as u16);

        let soffset = (vtable - object) as i32;
        let at = self.used() - object;
        for (i, b) in soffset.to_le_bytes().into_iter().enumerate() {
            self.buf[at + i] = b;
        }
        Offset(object)
    }

    /// Write the root reference and hand back the finished buffer.
    pub fn finish(mut self, root: Offset) -> Vec<u8> {
        let alignment = self.min_align.max(SIZE_UOFFSET);
        self.align(SIZE_UOFFSET, alignment);
        self.push_uoffset(root);
        Vec::from(self.buf)
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

fn read<T: Scalar>(buf: &[u8], offset: usize) -> Result<T, FlatError> {
    offset
        .checked_add(T::SIZE)
        .and_then(|end| buf.get(offset..end))
        .map(T::from_le)
        .ok_or(FlatError::OutOfBounds { offset, needed: T::SIZE, len: buf.len() })
}

/// Follow the uoffset stored at `at`.
fn deref(buf: &[u8], at: usize) -> Result<usize, FlatError> {
    let rel = read::<u32>(buf, at)? as usize;
    Ok(at + rel)
}

/// Root table of a buffer whose root uoffset sits at `offset`.
pub fn root(buf: &[u8], offset: usize) -> Result<Table<'_>, FlatError> {
    Ok(Table { buf, pos: deref(buf, offset)? })
}

#[derive(Debug, Clone, Copy)]
pub struct Table<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Table<'a> {
    pub fn position(&self) -> usize { self.pos }

    fn vtable(&self) -> Result<usize, FlatError> {
        let soffset = read::<i32>(self.buf, self.pos)? as i64;
        let vtable = self.pos as i64 - soffset;
        if vtable < 0 {
            return Err(FlatError::BadVtable(self.pos));
        }
        Ok(vtable as usize)
    }

    /// Absolute position of a field, or `None` when it is absent.
    fn field(&self, slot: VOffset) -> Result<Option<usize>, FlatError> {
        let vtable = self.vtable()?;
        let vtable_len = read::<u16>(self.buf, vtable)?;
        if slot + 2 > vtable_len {
            return Ok(None);
        }
        match read::<u16>(self.buf, vtable + slot as usize)? {
            0   => Ok(None),
            rel => Ok(Some(self.pos + rel as usize)),
        }
    }

    pub fn get<T: Scalar>(&self, slot: VOffset, default: T) -> Result<T, FlatError> {
        match self.field(slot)? {
            Some(at) => read::<T>(self.buf, at),
            None     => Ok(default),
        }
    }

    pub fn get_table(&self, slot: VOffset) -> Result<Option<Table<'a>>, FlatError> {
        self.field(slot)?
            .map(|at| Ok(Table { buf: self.buf, pos: deref(self.buf, at)? }))
            .transpose()
    }

    pub fn get_str(&self, slot: VOffset) -> Result<Option<&'a str>, FlatError> {
        self.field(slot)?.map(|at| read_str(self.buf, deref(self.buf, at)?)).transpose()
    }

    pub fn get_vector(&self, slot: VOffset) -> Result<Option<Vector<'a>>, FlatError> {
        self.field(slot)?
            .map(|at| {
                let pos = deref(self.buf, at)?;
                let len = read::<u32>(self.buf, pos)? as usize;
                Ok(Vector { buf: self.buf, pos, len })
            })
            .transpose()
    }
}

fn read_str(buf: &[u8], pos: usize) -> Result<&str, FlatError> {
    let len = read::<u32>(buf, pos)? as usize;
    let start = pos + SIZE_UOFFSET;
    let bytes = start
        .checked_add(len)
        .and_then(|end| buf.get(start..end))
        .ok_or(FlatError::OutOfBounds { offset: start, needed: len, len: buf.len() })?;
    std::str::from_utf8(bytes).map_err(|_| FlatError::InvalidUtf8(pos))
}

/// Vector of table references.
#[derive(Debug, Clone, Copy)]
pub struct Vector<'a> {
    buf: &'a [u8],
    pos: usize,
    len: usize,
}

impl<'a> Vector<'a> {
    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub fn table(&self, index: usize) -> Result<Table<'a>, FlatError> {
        let at = self.pos + SIZE_UOFFSET + index * SIZE_UOFFSET;
        Ok(Table { buf: self.buf, pos: deref(self.buf, at)? })
    }

    pub fn tables(&self) -> impl Iterator<Item = Result<Table<'a>, FlatError>> + 'a {
        let this = *self;
        (0..self.len).map(move |i| this.table(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VT_NAME: VOffset = 4;
    const VT_FLAG: VOffset = 6;
    const VT_BIG:  VOffset = 8;
    const VT_KIDS: VOffset = 10;

    fn sample() -> Vec<u8> {
        let mut b = Builder::default();
        let mut kids = Vec::new();
        for i in 0..3u32 {
            b.start_table();
            b.add_scalar(VT_FLAG, i);
            kids.push(b.end_table());
        }
        let kids = b.create_vector(&kids);
        let name = b.create_string("root");
        b.start_table();
        b.add_offset(VT_NAME, name);
        b.add_scalar(VT_FLAG, true);
        b.add_scalar(VT_BIG, u64::MAX - 1);
        b.add_offset(VT_KIDS, kids);
        let root = b.end_table();
        b.finish(root)
    }

    #[test]
    fn builds_and_reads_nested_tables() {
        let buf = sample();
        let t = root(&buf, 0).unwrap();
        assert_eq!(t.get_str(VT_NAME).unwrap(), Some("root"));
        assert!(t.get::<bool>(VT_FLAG, false).unwrap());
        assert_eq!(t.get::<u64>(VT_BIG, 0).unwrap(), u64::MAX - 1);

        let kids = t.get_vector(VT_KIDS).unwrap().unwrap();
        assert_eq!(kids.len(), 3);
        for (i, kid) in kids.tables().enumerate() {
            assert_eq!(kid.unwrap().get::<u32>(VT_FLAG, 99).unwrap(), i as u32);
        }
    }

    #[test]
    fn buffer_is_aligned_for_its_widest_scalar() {
        let buf = sample();
        assert_eq!(buf.len() % 8, 0);
        let t = root(&buf, 0).unwrap();
        assert_eq!(t.position() % 4, 0);
    }

    #[test]
    fn absent_fields_use_defaults() {
        let mut b = Builder::default();
        b.start_table();
        b.add_scalar(VT_FLAG, 7u16);
        let root_off = b.end_table();
        let buf = b.finish(root_off);
        let t = root(&buf, 0).unwrap();
        assert_eq!(t.get::<u16>(VT_FLAG, 0).unwrap(), 7);
        assert_eq!(t.get::<u64>(VT_BIG, 5).unwrap(), 5);
        assert_eq!(t.get_str(VT_NAME).unwrap(), None);
        assert!(t.get_vector(VT_KIDS).unwrap().is_none());
    }

    #[test]
    fn root_can_sit_at_an_offset() {
        let mut framed = vec![0xEEu8; 16];
        framed.extend(sample());
        let t = root(&framed, 16).unwrap();
        assert_eq!(t.get_str(VT_NAME).unwrap(), Some("root"));
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let buf = sample();
        let cut = &buf[..buf.len() / 2];
        let result = root(cut, 0).and_then(|t| t.get_str(VT_NAME));
        assert!(result.is_err());
        assert!(matches!(root(&[1, 2], 0), Err(FlatError::OutOfBounds { .. })));
    }

    #[test]
    fn empty_vector() {
        let mut b = Builder::default();
        let v = b.create_vector(&[]);
        b.start_table();
        b.add_offset(VT_KIDS, v);
        let r = b.end_table();
        let buf = b.finish(r);
        let kids = root(&buf, 0).unwrap().get_vector(VT_KIDS).unwrap().unwrap();
        assert!(kids.is_empty());
    }
}
