//! Fixed-offset prologue of a LiteRT-LM container.
//!
//! ```text
//! 0      8      12     16     20     24            32
//! +------+------+------+------+------+-------------+----------------------+
//! |MAGIC |major |minor |patch | pad  | header_end  | header (<= one block)|
//! +------+------+------+------+------+-------------+----------------------+
//! ```
//!
//! All integers are little-endian.  `header_end` is the absolute offset one
//! past the last header byte; it is only known after the header is encoded,
//! so the writer patches it in place as the very last step.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;

pub const MAGIC: &[u8; 8] = b"LITERTLM";

pub const MAJOR_VERSION: u32 = 1;
pub const MINOR_VERSION: u32 = 3;
pub const PATCH_VERSION: u32 = 0;

/// Alignment unit for the header reservation and every section start.
pub const BLOCK_SIZE: u64 = 16 * 1024;
/// Absolute offset of the u64 holding the header end offset.
pub const HEADER_END_LOCATION_OFFSET: u64 = 24;
/// Absolute offset at which the encoded header starts.
pub const HEADER_BEGIN_OFFSET: u64 = 32;

#[derive(Error, Debug)]
pub enum PreambleError {
    #[error("Invalid magic number: {0:?}")]
    InvalidMagic(Vec<u8>),
    #[error("Unsupported major version {major}, expected {MAJOR_VERSION}")]
    UnsupportedVersion { major: u32 },
    #[error("Invalid header end offset {0}: smaller than {HEADER_BEGIN_OFFSET}")]
    InvalidHeaderEnd(u64),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Semantic version triple stored at bytes 8..20.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const CURRENT: Version = Version {
        major: MAJOR_VERSION,
        minor: MINOR_VERSION,
        patch: PATCH_VERSION,
    };
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone)]
pub struct Preamble {
    pub version: Version,
    pub header_end: u64,
}

impl Preamble {
    /// Write magic and version.  The header end slot is left for
    /// [`patch_header_end`] once the header has been laid out.
    pub fn write_start<W: Write>(mut writer: W, version: Version) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(version.major)?;
        writer.write_u32::<LittleEndian>(version.minor)?;
        writer.write_u32::<LittleEndian>(version.patch)?;
        Ok(())
    }

    /// Read and validate the prologue.  Leaves the stream positioned at
    /// [`HEADER_BEGIN_OFFSET`].
    pub fn read<R: Read + Seek>(mut reader: R) -> Result<Self, PreambleError> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(PreambleError::InvalidMagic(magic.to_vec()));
        }
        let major = reader.read_u32::<LittleEndian>()?;
        let minor = reader.read_u32::<LittleEndian>()?;
        let patch = reader.read_u32::<LittleEndian>()?;
        if major != MAJOR_VERSION {
            return Err(PreambleError::UnsupportedVersion { major });
        }

        reader.seek(SeekFrom::Start(HEADER_END_LOCATION_OFFSET))?;
        let header_end = reader.read_u64::<LittleEndian>()?;
        if header_end < HEADER_BEGIN_OFFSET {
            return Err(PreambleError::InvalidHeaderEnd(header_end));
        }
        reader.seek(SeekFrom::Start(HEADER_BEGIN_OFFSET))?;

        Ok(Self {
            version: Version { major, minor, patch },
            header_end,
        })
    }

    /// Number of header bytes following [`HEADER_BEGIN_OFFSET`].
    pub fn header_len(&self) -> u64 {
        self.header_end - HEADER_BEGIN_OFFSET
    }
}

/// Overwrite the header end slot at offset 24.  Restores the stream
/// position afterwards.
pub fn patch_header_end<W: Write + Seek>(mut writer: W, header_end: u64) -> io::Result<()> {
    let pos = writer.stream_position()?;
    writer.seek(SeekFrom::Start(HEADER_END_LOCATION_OFFSET))?;
    writer.write_u64::<LittleEndian>(header_end)?;
    writer.seek(SeekFrom::Start(pos))?;
    Ok(())
}

/// Zero bytes needed to bring `pos` up to the next multiple of [`BLOCK_SIZE`].
#[inline]
pub fn padding_for(pos: u64) -> u64 {
    (BLOCK_SIZE - pos % BLOCK_SIZE) % BLOCK_SIZE
}

/// Write zero padding up to the next block boundary.  Returns the new
/// stream position.
pub fn write_padding<W: Write + Seek>(mut writer: W) -> io::Result<u64> {
    let pos = writer.stream_position()?;
    let pad = padding_for(pos);
    if pad > 0 {
        io::copy(&mut io::repeat(0).take(pad), &mut writer)?;
    }
    Ok(pos + pad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn prologue(magic: &[u8; 8], major: u32, header_end: u64) -> Cursor<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(magic);
        buf.extend_from_slice(&major.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&header_end.to_le_bytes());
        Cursor::new(buf)
    }

    #[test]
    fn padding_rounds_to_block() {
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(20), BLOCK_SIZE - 20);
        assert_eq!(padding_for(BLOCK_SIZE), 0);
        assert_eq!(padding_for(BLOCK_SIZE + 1), BLOCK_SIZE - 1);
    }

    #[test]
    fn write_padding_reaches_boundary() {
        let mut cur = Cursor::new(Vec::new());
        cur.write_all(b"abc").unwrap();
        let end = write_padding(&mut cur).unwrap();
        assert_eq!(end, BLOCK_SIZE);
        assert_eq!(cur.get_ref().len() as u64, BLOCK_SIZE);
        assert!(cur.get_ref()[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn read_valid_prologue() {
        let mut cur = prologue(MAGIC, 1, 100);
        let p = Preamble::read(&mut cur).unwrap();
        assert_eq!(p.version, Version::CURRENT);
        assert_eq!(p.header_end, 100);
        assert_eq!(p.header_len(), 68);
        assert_eq!(cur.position(), HEADER_BEGIN_OFFSET);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = Preamble::read(prologue(b"NOTLITER", 1, 100)).unwrap_err();
        assert!(matches!(err, PreambleError::InvalidMagic(_)));
    }

    #[test]
    fn rejects_other_major_version() {
        let err = Preamble::read(prologue(MAGIC, 2, 100)).unwrap_err();
        assert!(matches!(err, PreambleError::UnsupportedVersion { major: 2 }));
    }

    #[test]
    fn rejects_header_end_before_header_start() {
        let err = Preamble::read(prologue(MAGIC, 1, 8)).unwrap_err();
        assert!(matches!(err, PreambleError::InvalidHeaderEnd(8)));
    }

    #[test]
    fn patch_keeps_position() {
        let mut cur = Cursor::new(vec![0u8; 64]);
        cur.seek(SeekFrom::Start(40)).unwrap();
        patch_header_end(&mut cur, 0x1122).unwrap();
        assert_eq!(cur.position(), 40);
        assert_eq!(&cur.get_ref()[24..32], &0x1122u64.to_le_bytes());
    }
}
