//! Header codec: the table-structured index that follows the prologue.
//!
//! Schema (field ids in brackets):
//!
//! ```text
//! LiteRTLMMetaData { system_metadata[0]: SystemMetadata, section_metadata[1]: SectionMetadata }
//! SystemMetadata   { entries[0]: [KeyValuePair] }
//! SectionMetadata  { objects[0]: [SectionObject] }
//! SectionObject    { items[0]: [KeyValuePair], begin_offset[1]: u64, end_offset[2]: u64, data_type[3]: u8 }
//! KeyValuePair     { key[0]: string, value_type[1]: u8, value[2]: VData }
//! VData            = one-field table { value[0]: <scalar or string> }
//! ```

use crate::flatbuf::{self, Builder, FlatError, Offset, Scalar, Table, VOffset, Vector};
use crate::metadata::{KeyValuePair, Value};
use crate::section::SectionDataType;
use thiserror::Error;

// ── Schema ───────────────────────────────────────────────────────────────────

/// `VData` union tags.  0 means "no value".
pub mod vdata {
    pub const NONE:         u8 = 0;
    pub const UINT8:        u8 = 1;
    pub const INT8:         u8 = 2;
    pub const UINT16:       u8 = 3;
    pub const INT16:        u8 = 4;
    pub const UINT32:       u8 = 5;
    pub const INT32:        u8 = 6;
    pub const FLOAT32:      u8 = 7;
    pub const BOOL:         u8 = 8;
    pub const STRING_VALUE: u8 = 9;
    pub const UINT64:       u8 = 10;
    pub const INT64:        u8 = 11;
    pub const DOUBLE:       u8 = 12;
}

const VT_VALUE: VOffset = 4;

const VT_KV_KEY:        VOffset = 4;
const VT_KV_VALUE_TYPE: VOffset = 6;
const VT_KV_VALUE:      VOffset = 8;

const VT_SECTION_ITEMS:     VOffset = 4;
const VT_SECTION_BEGIN:     VOffset = 6;
const VT_SECTION_END:       VOffset = 8;
const VT_SECTION_DATA_TYPE: VOffset = 10;

const VT_OBJECTS: VOffset = 4;
const VT_ENTRIES: VOffset = 4;

const VT_SYSTEM_METADATA:  VOffset = 4;
const VT_SECTION_METADATA: VOffset = 6;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Header truncated: need {needed} bytes at offset {offset}, header is {len} bytes")]
    Truncated { offset: usize, needed: usize, len: usize },
    #[error("Header string at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),
    #[error("Header table at offset {0} has an invalid vtable")]
    BadVtable(usize),
    #[error("Header has no root table")]
    MissingRoot,
    #[error("Value with unknown type tag {0} cannot be encoded")]
    UnencodableValue(u8),
}

impl From<FlatError> for HeaderError {
    fn from(e: FlatError) -> Self {
        match e {
            FlatError::OutOfBounds { offset, needed, len } => HeaderError::Truncated { offset, needed, len },
            FlatError::BadVtable(at)                       => HeaderError::BadVtable(at),
            FlatError::InvalidUtf8(at)                     => HeaderError::InvalidUtf8(at),
        }
    }
}

// ── Model ────────────────────────────────────────────────────────────────────

/// One entry of the section table.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SectionRecord {
    pub data_type: SectionDataType,
    /// Absolute offset of the first payload byte.
    pub begin_offset: u64,
    /// Absolute offset one past the last payload byte.
    pub end_offset: u64,
    pub items: Vec<KeyValuePair>,
}

impl SectionRecord {
    pub fn len(&self) -> u64 {
        self.end_offset.saturating_sub(self.begin_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Header {
    pub system_metadata: Vec<KeyValuePair>,
    pub sections: Vec<SectionRecord>,
}

// ── Encode ───────────────────────────────────────────────────────────────────

fn scalar_value<T: Scalar>(b: &mut Builder, tag: u8, v: T) -> (u8, Offset) {
    b.start_table();
    b.add_scalar(VT_VALUE, v);
    (tag, b.end_table())
}

fn encode_value(b: &mut Builder, value: &Value) -> Result<(u8, Offset), HeaderError> {
    let encoded = match *value {
        Value::UInt8(v)   => scalar_value(b, vdata::UINT8, v),
        Value::Int8(v)    => scalar_value(b, vdata::INT8, v),
        Value::UInt16(v)  => scalar_value(b, vdata::UINT16, v),
        Value::Int16(v)   => scalar_value(b, vdata::INT16, v),
        Value::UInt32(v)  => scalar_value(b, vdata::UINT32, v),
        Value::Int32(v)   => scalar_value(b, vdata::INT32, v),
        Value::Float32(v) => scalar_value(b, vdata::FLOAT32, v),
        Value::Bool(v)    => scalar_value(b, vdata::BOOL, v),
        Value::UInt64(v)  => scalar_value(b, vdata::UINT64, v),
        Value::Int64(v)   => scalar_value(b, vdata::INT64, v),
        Value::Double(v)  => scalar_value(b, vdata::DOUBLE, v),
        Value::String(ref s) => {
            let s = b.create_string(s);
            b.start_table();
            b.add_offset(VT_VALUE, s);
            (vdata::STRING_VALUE, b.end_table())
        }
        Value::Unknown(t) => return Err(HeaderError::UnencodableValue(t)),
    };
    Ok(encoded)
}

fn encode_pair(b: &mut Builder, kv: &KeyValuePair) -> Result<Offset, HeaderError> {
    let key = b.create_string(&kv.key);
    let (tag, value) = encode_value(b, &kv.value)?;
    b.start_table();
    b.add_offset(VT_KV_KEY, key);
    b.add_scalar(VT_KV_VALUE_TYPE, tag);
    b.add_offset(VT_KV_VALUE, value);
    Ok(b.end_table())
}

fn encode_pairs(b: &mut Builder, items: &[KeyValuePair]) -> Result<Offset, HeaderError> {
    let pairs = items
        .iter()
        .map(|kv| encode_pair(b, kv))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(b.create_vector(&pairs))
}

/// Serialize `header` into a standalone byte buffer.  The buffer's first
/// four bytes are the root reference.
pub fn encode_header(header: &Header) -> Result<Vec<u8>, HeaderError> {
    let mut b = Builder::with_capacity(1024);

    let entries = encode_pairs(&mut b, &header.system_metadata)?;
    b.start_table();
    b.add_offset(VT_ENTRIES, entries);
    let system_metadata = b.end_table();

    let mut objects = Vec::with_capacity(header.sections.len());
    for section in &header.sections {
        let items = encode_pairs(&mut b, &section.items)?;
        b.start_table();
        b.add_offset(VT_SECTION_ITEMS, items);
        b.add_scalar(VT_SECTION_BEGIN, section.begin_offset);
        b.add_scalar(VT_SECTION_END, section.end_offset);
        b.add_scalar(VT_SECTION_DATA_TYPE, section.data_type.tag());
        objects.push(b.end_table());
    }
    let objects = b.create_vector(&objects);
    b.start_table();
    b.add_offset(VT_OBJECTS, objects);
    let section_metadata = b.end_table();

    b.start_table();
    b.add_offset(VT_SYSTEM_METADATA, system_metadata);
    b.add_offset(VT_SECTION_METADATA, section_metadata);
    let root = b.end_table();

    Ok(b.finish(root))
}

// ── Decode ───────────────────────────────────────────────────────────────────

fn decode_value(tag: u8, table: Option<Table<'_>>) -> Result<Value, HeaderError> {
    let Some(t) = table else {
        return Ok(Value::Unknown(tag));
    };
    let value = match tag {
        vdata::UINT8        => Value::UInt8(t.get(VT_VALUE, 0)?),
        vdata::INT8         => Value::Int8(t.get(VT_VALUE, 0)?),
        vdata::UINT16       => Value::UInt16(t.get(VT_VALUE, 0)?),
        vdata::INT16        => Value::Int16(t.get(VT_VALUE, 0)?),
        vdata::UINT32       => Value::UInt32(t.get(VT_VALUE, 0)?),
        vdata::INT32        => Value::Int32(t.get(VT_VALUE, 0)?),
        vdata::FLOAT32      => Value::Float32(t.get(VT_VALUE, 0.0)?),
        vdata::BOOL         => Value::Bool(t.get(VT_VALUE, false)?),
        vdata::STRING_VALUE => Value::String(t.get_str(VT_VALUE)?.unwrap_or_default().to_owned()),
        vdata::UINT64       => Value::UInt64(t.get(VT_VALUE, 0)?),
        vdata::INT64        => Value::Int64(t.get(VT_VALUE, 0)?),
        vdata::DOUBLE       => Value::Double(t.get(VT_VALUE, 0.0)?),
        other               => Value::Unknown(other),
    };
    Ok(value)
}

fn decode_pairs(vector: Option<Vector<'_>>) -> Result<Vec<KeyValuePair>, HeaderError> {
    let Some(vector) = vector else {
        return Ok(Vec::new());
    };
    vector
        .tables()
        .map(|t| -> Result<KeyValuePair, HeaderError> {
            let t = t?;
            let key = t.get_str(VT_KV_KEY)?.unwrap_or_default().to_owned();
            let tag = t.get::<u8>(VT_KV_VALUE_TYPE, vdata::NONE)?;
            let value = decode_value(tag, t.get_table(VT_KV_VALUE)?)?;
            Ok(KeyValuePair { key, value })
        })
        .collect()
}

fn decode_section(t: Table<'_>) -> Result<SectionRecord, HeaderError> {
    Ok(SectionRecord {
        data_type:    SectionDataType::from_tag(t.get(VT_SECTION_DATA_TYPE, 0)?),
        begin_offset: t.get(VT_SECTION_BEGIN, 0)?,
        end_offset:   t.get(VT_SECTION_END, 0)?,
        items:        decode_pairs(t.get_vector(VT_SECTION_ITEMS)?)?,
    })
}

/// Decode a header whose root reference sits at `offset` in `buf`.
///
/// Absent sub-tables decode as empty lists.  Unknown value tags decode to
/// [`Value::Unknown`] rather than failing.
pub fn decode_header(buf: &[u8], offset: usize) -> Result<Header, HeaderError> {
    if buf.len() <= offset {
        return Err(HeaderError::MissingRoot);
    }
    let root = flatbuf::root(buf, offset)?;

    let system_metadata = match root.get_table(VT_SYSTEM_METADATA)? {
        Some(t) => decode_pairs(t.get_vector(VT_ENTRIES)?)?,
        None    => Vec::new(),
    };

    let objects = match root.get_table(VT_SECTION_METADATA)? {
        Some(t) => t.get_vector(VT_OBJECTS)?,
        None    => None,
    };
    let sections = match objects {
        Some(objects) => objects
            .tables()
            .map(|t| -> Result<SectionRecord, HeaderError> { decode_section(t?) })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    Ok(Header { system_metadata, sections })
}
