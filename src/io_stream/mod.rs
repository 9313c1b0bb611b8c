//! Streaming container engine: writer and reader.
//!
//! # Writer
//! [`LitertlmWriter`] writes the prologue, then accepts sections one at a
//! time.  Each payload starts on a block boundary and is followed by zero
//! padding up to the next one, so the first section always begins at
//! `BLOCK_SIZE`.  The header is only known once every section offset is,
//! so `finalize()` writes it into the reserved first block at
//! `HEADER_BEGIN_OFFSET` and then patches the header end slot in place.
//!
//! # Reader
//! [`LitertlmReader`] validates the prologue, reads exactly the header
//! bytes and decodes them.  Section payloads are read lazily by index;
//! typed accessors check the recorded data type first.
//!
//! # Endianness
//! All fixed-width integers are little-endian; see `preamble.rs`.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use prost::Message;
use thiserror::Error;
use tracing::{debug, info};

use crate::header::{decode_header, encode_header, Header, HeaderError, SectionRecord};
use crate::metadata::{KeyValuePair, MetadataError};
use crate::preamble::{
    patch_header_end, write_padding, Preamble, PreambleError, Version, BLOCK_SIZE,
    HEADER_BEGIN_OFFSET,
};
use crate::proto::{LlmMetadata, ProtoTextError};
use crate::section::SectionDataType;

/// zlib level used for HF tokenizer payloads.
pub const DEFAULT_ZLIB_LEVEL: u32 = 6;

/// System metadata entry stamped into every container.
pub const AUTHOR_KEY: &str = "author";
pub const AUTHOR: &str = "The ODML Authors";

/// Width of the uncompressed-size prefix of an HF tokenizer payload.
const HF_SIZE_PREFIX: usize = 8;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("No input files provided")]
    NoInputFiles,
    #[error("Section name mismatch at index {index}: expected '{expected}', found '{found}'")]
    SectionNameMismatch { index: usize, expected: String, found: String },
    #[error("Header too large: ends at {header_end}, limit is {limit}")]
    HeaderTooLarge { header_end: u64, limit: u64 },
    #[error("{0}")]
    Metadata(#[from] MetadataError),
    #[error("Header encoding failed: {0}")]
    Header(#[from] HeaderError),
    #[error("Failed to parse {}: {source}", path.display())]
    ProtoText { path: PathBuf, source: ProtoTextError },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Invalid magic number: {0:?}")]
    InvalidMagic(Vec<u8>),
    #[error("Unsupported major version {major}")]
    UnsupportedVersion { major: u32 },
    #[error("Invalid header end offset {0}")]
    InvalidHeaderEnd(u64),
    #[error("Header decode failed: {0}")]
    Header(#[from] HeaderError),
    #[error("Section index {index} out of range ({count} sections)")]
    SectionIndex { index: usize, count: usize },
    #[error("Section {index} is {found}, expected {expected}")]
    SectionType { index: usize, expected: SectionDataType, found: SectionDataType },
    #[error("Section {0} is empty")]
    EmptySection(usize),
    #[error("No section of type {0}")]
    SectionNotFound(SectionDataType),
    #[error("Section {index}: decompressed {actual} bytes, size prefix says {expected}")]
    TokenizerSize { index: usize, expected: u64, actual: u64 },
    #[error("LlmMetadata decode failed: {0}")]
    ProtoDecode(#[from] prost::DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<PreambleError> for ReadError {
    fn from(e: PreambleError) -> Self {
        match e {
            PreambleError::InvalidMagic(m)             => ReadError::InvalidMagic(m),
            PreambleError::UnsupportedVersion { major } => ReadError::UnsupportedVersion { major },
            PreambleError::InvalidHeaderEnd(end)       => ReadError::InvalidHeaderEnd(end),
            PreambleError::Io(e)                       => ReadError::Io(e),
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct LitertlmWriter<W: Write + Seek> {
    writer:              W,
    pub version:         Version,
    pub system_metadata: Vec<KeyValuePair>,
    pub sections:        Vec<SectionRecord>,
    pub zlib_level:      u32,
}

impl<W: Write + Seek> LitertlmWriter<W> {
    pub fn new(writer: W) -> io::Result<Self> {
        Self::with_level(writer, DEFAULT_ZLIB_LEVEL)
    }

    pub fn with_level(mut writer: W, zlib_level: u32) -> io::Result<Self> {
        let version = Version::CURRENT;
        writer.seek(SeekFrom::Start(0))?;
        Preamble::write_start(&mut writer, version)?;
        // Header end slot and header area; filled in on finalize.
        write_padding(&mut writer)?;
        Ok(Self {
            writer,
            version,
            system_metadata: vec![KeyValuePair::new(AUTHOR_KEY, AUTHOR)],
            sections:        Vec::new(),
            zlib_level:      zlib_level.min(9),
        })
    }

    // ── Sections ─────────────────────────────────────────────────────────────

    /// Stream `payload` verbatim as a new section, then pad to the next block.
    pub fn add_section<R: Read>(
        &mut self,
        data_type: SectionDataType,
        mut payload: R,
        items: Vec<KeyValuePair>,
    ) -> io::Result<&SectionRecord> {
        let begin_offset = self.writer.stream_position()?;
        io::copy(&mut payload, &mut self.writer)?;
        let end_offset = self.writer.stream_position()?;
        write_padding(&mut self.writer)?;

        debug!(
            index = self.sections.len(),
            data_type = %data_type,
            begin_offset,
            end_offset,
            "section written"
        );
        self.sections.push(SectionRecord { data_type, begin_offset, end_offset, items });
        Ok(&self.sections[self.sections.len() - 1])
    }

    /// Store `meta` in its binary wire form.
    pub fn add_llm_metadata(
        &mut self,
        meta: &LlmMetadata,
        items: Vec<KeyValuePair>,
    ) -> io::Result<&SectionRecord> {
        let bytes = meta.encode_to_vec();
        self.add_section(SectionDataType::LlmMetadataProto, bytes.as_slice(), items)
    }

    /// Store a HuggingFace tokenizer JSON as an 8-byte little-endian
    /// uncompressed size followed by the zlib stream.
    pub fn add_hf_tokenizer(
        &mut self,
        json: &[u8],
        items: Vec<KeyValuePair>,
    ) -> io::Result<&SectionRecord> {
        let mut prefix = Vec::with_capacity(HF_SIZE_PREFIX + json.len() / 4);
        prefix.write_u64::<LittleEndian>(json.len() as u64)?;
        let mut encoder = ZlibEncoder::new(prefix, Compression::new(self.zlib_level));
        encoder.write_all(json)?;
        let payload = encoder.finish()?;
        self.add_section(SectionDataType::HfTokenizerZlib, payload.as_slice(), items)
    }

    // ── Finalization ─────────────────────────────────────────────────────────

    /// Encode the header into the reserved first block and patch the header
    /// end offset.  Returns the underlying writer, positioned at the end.
    pub fn finalize(mut self) -> Result<W, WriteError> {
        let header = Header {
            system_metadata: std::mem::take(&mut self.system_metadata),
            sections:        std::mem::take(&mut self.sections),
        };
        let bytes = encode_header(&header)?;
        let header_end = HEADER_BEGIN_OFFSET + bytes.len() as u64;
        if header_end > BLOCK_SIZE {
            return Err(WriteError::HeaderTooLarge { header_end, limit: BLOCK_SIZE });
        }

        let end = self.writer.stream_position()?;
        self.writer.seek(SeekFrom::Start(HEADER_BEGIN_OFFSET))?;
        self.writer.write_all(&bytes)?;
        patch_header_end(&mut self.writer, header_end)?;
        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;

        info!(
            sections = header.sections.len(),
            header_bytes = bytes.len(),
            file_size = end,
            "container finalized"
        );
        Ok(self.writer)
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct LitertlmReader<R: Read + Seek> {
    reader:         R,
    pub version:    Version,
    pub header_end: u64,
    pub header:     Header,
}

impl<R: Read + Seek> LitertlmReader<R> {
    /// Validate the prologue and decode the header.  Payloads are not read.
    pub fn new(mut reader: R) -> Result<Self, ReadError> {
        let preamble = Preamble::read(&mut reader)?;
        let raw = read_up_to(&mut reader, preamble.header_len())?;
        let header = decode_header(&raw, 0)?;

        info!(
            version = %preamble.version,
            sections = header.sections.len(),
            "container opened"
        );
        Ok(Self {
            reader,
            version:    preamble.version,
            header_end: preamble.header_end,
            header,
        })
    }

    pub fn sections(&self) -> &[SectionRecord] {
        &self.header.sections
    }

    pub fn section(&self, index: usize) -> Result<&SectionRecord, ReadError> {
        self.header.sections.get(index).ok_or(ReadError::SectionIndex {
            index,
            count: self.header.sections.len(),
        })
    }

    /// Index of the first section of `data_type`, if any.
    pub fn find_section(&self, data_type: SectionDataType) -> Option<usize> {
        self.header.sections.iter().position(|s| s.data_type == data_type)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    // ── Section payloads ─────────────────────────────────────────────────────

    /// Raw bytes of section `index`, exactly `end_offset - begin_offset` long.
    pub fn read_section_bytes(&mut self, index: usize) -> Result<Vec<u8>, ReadError> {
        let record = self.section(index)?;
        let (begin, len) = (record.begin_offset, record.len());
        self.reader.seek(SeekFrom::Start(begin))?;
        let bytes = read_up_to(&mut self.reader, len)?;
        debug!(index, begin_offset = begin, len, "section read");
        Ok(bytes)
    }

    fn read_typed(&mut self, index: usize, expected: SectionDataType) -> Result<Vec<u8>, ReadError> {
        let record = self.section(index)?;
        if record.data_type != expected {
            return Err(ReadError::SectionType { index, expected, found: record.data_type });
        }
        if record.is_empty() {
            return Err(ReadError::EmptySection(index));
        }
        self.read_section_bytes(index)
    }

    pub fn read_llm_metadata(&mut self, index: usize) -> Result<LlmMetadata, ReadError> {
        let bytes = self.read_typed(index, SectionDataType::LlmMetadataProto)?;
        Ok(LlmMetadata::decode(bytes.as_slice())?)
    }

    pub fn read_binary_data(&mut self, index: usize) -> Result<Vec<u8>, ReadError> {
        self.read_typed(index, SectionDataType::GenericBinaryData)
    }

    pub fn read_tflite_model(&mut self, index: usize) -> Result<Vec<u8>, ReadError> {
        self.read_typed(index, SectionDataType::TfliteModel)
    }

    pub fn read_sp_tokenizer(&mut self, index: usize) -> Result<Vec<u8>, ReadError> {
        self.read_typed(index, SectionDataType::SpTokenizer)
    }

    /// Inflated tokenizer JSON.  The size prefix must match the inflated
    /// length.
    pub fn read_hf_tokenizer(&mut self, index: usize) -> Result<Vec<u8>, ReadError> {
        let bytes = self.read_typed(index, SectionDataType::HfTokenizerZlib)?;
        let mut payload = bytes.as_slice();
        let expected = payload.read_u64::<LittleEndian>()?;

        let mut json = Vec::new();
        // One extra byte is enough to detect an overlong stream.
        ZlibDecoder::new(payload).take(expected.saturating_add(1)).read_to_end(&mut json)?;
        let actual = json.len() as u64;
        if actual != expected {
            return Err(ReadError::TokenizerSize { index, expected, actual });
        }
        Ok(json)
    }

    // ── First section of a type ──────────────────────────────────────────────

    fn require(&self, data_type: SectionDataType) -> Result<usize, ReadError> {
        self.find_section(data_type).ok_or(ReadError::SectionNotFound(data_type))
    }

    pub fn read_any_llm_metadata(&mut self) -> Result<LlmMetadata, ReadError> {
        let index = self.require(SectionDataType::LlmMetadataProto)?;
        self.read_llm_metadata(index)
    }

    pub fn read_any_binary_data(&mut self) -> Result<Vec<u8>, ReadError> {
        let index = self.require(SectionDataType::GenericBinaryData)?;
        self.read_binary_data(index)
    }

    pub fn read_any_tflite_model(&mut self) -> Result<Vec<u8>, ReadError> {
        let index = self.require(SectionDataType::TfliteModel)?;
        self.read_tflite_model(index)
    }

    pub fn read_any_sp_tokenizer(&mut self) -> Result<Vec<u8>, ReadError> {
        let index = self.require(SectionDataType::SpTokenizer)?;
        self.read_sp_tokenizer(index)
    }

    pub fn read_any_hf_tokenizer(&mut self) -> Result<Vec<u8>, ReadError> {
        let index = self.require(SectionDataType::HfTokenizerZlib)?;
        self.read_hf_tokenizer(index)
    }
}

/// Read exactly `len` bytes without trusting `len` for the allocation.
fn read_up_to<R: Read>(reader: &mut R, len: u64) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len.min(BLOCK_SIZE) as usize);
    reader.take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes, found {}", buf.len()),
        ));
    }
    Ok(buf)
}
