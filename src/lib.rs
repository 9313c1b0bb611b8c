pub mod preamble;
pub mod section;
pub mod metadata;
pub mod flatbuf;
pub mod header;
pub mod proto;
pub mod io_stream;
pub mod archive;
pub mod inspect;

pub use preamble::{Preamble, Version, BLOCK_SIZE};
pub use section::{classify, SectionDataType};
pub use metadata::{parse_section_metadata, KeyValuePair, SectionMetadata, Value};
pub use header::{decode_header, encode_header, Header, SectionRecord};
pub use io_stream::{LitertlmReader, LitertlmWriter, ReadError, WriteError};
pub use archive::{write_container, Container, WriteOptions};
