//! Section data types and the filename classifier.
//!
//! The tag values are the on-disk `AnySectionDataType` enum of the header
//! schema.  They are frozen: a value is never reused.

use std::fmt;
use std::path::Path;

pub const TFLITE_SECTION_NAME: &str = "tflite";
pub const LLM_METADATA_SECTION_NAME: &str = "llm_metadata";
pub const TOKENIZER_SECTION_NAME: &str = "tokenizer";
pub const HF_TOKENIZER_ZLIB_SECTION_NAME: &str = "hf_tokenizer_zlib";
pub const BINARY_DATA_SECTION_NAME: &str = "binary_data";

/// Extensions whose payload is LlmMetadata protobuf text, converted to the
/// binary wire form before being stored.
pub const TEXT_PROTO_EXTENSIONS: [&str; 2] = ["pbtext", "prototext"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionDataType {
    None,
    GenericBinaryData,
    Deprecated,
    TfliteModel,
    SpTokenizer,
    LlmMetadataProto,
    HfTokenizerZlib,
    /// A tag this build does not know about.  Only produced by the decoder.
    Unknown(u8),
}

impl SectionDataType {
    pub fn tag(self) -> u8 {
        match self {
            SectionDataType::None              => 0,
            SectionDataType::GenericBinaryData => 1,
            SectionDataType::Deprecated        => 2,
            SectionDataType::TfliteModel       => 3,
            SectionDataType::SpTokenizer       => 4,
            SectionDataType::LlmMetadataProto  => 5,
            SectionDataType::HfTokenizerZlib   => 6,
            SectionDataType::Unknown(t)        => t,
        }
    }

    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0 => SectionDataType::None,
            1 => SectionDataType::GenericBinaryData,
            2 => SectionDataType::Deprecated,
            3 => SectionDataType::TfliteModel,
            4 => SectionDataType::SpTokenizer,
            5 => SectionDataType::LlmMetadataProto,
            6 => SectionDataType::HfTokenizerZlib,
            t => SectionDataType::Unknown(t),
        }
    }

    /// Schema enumerator name, as shown by the inspector.
    pub fn name(self) -> &'static str {
        match self {
            SectionDataType::None              => "NONE",
            SectionDataType::GenericBinaryData => "GenericBinaryData",
            SectionDataType::Deprecated        => "Deprecated",
            SectionDataType::TfliteModel       => "TFLiteModel",
            SectionDataType::SpTokenizer       => "SP_Tokenizer",
            SectionDataType::LlmMetadataProto  => "LlmMetadataProto",
            SectionDataType::HfTokenizerZlib   => "HF_Tokenizer_Zlib",
            SectionDataType::Unknown(_)        => "Unknown",
        }
    }

    /// Canonical section name used in the metadata mini-language.
    pub fn section_name(self) -> &'static str {
        match self {
            SectionDataType::TfliteModel      => TFLITE_SECTION_NAME,
            SectionDataType::LlmMetadataProto => LLM_METADATA_SECTION_NAME,
            SectionDataType::SpTokenizer      => TOKENIZER_SECTION_NAME,
            SectionDataType::HfTokenizerZlib  => HF_TOKENIZER_ZLIB_SECTION_NAME,
            _                                 => BINARY_DATA_SECTION_NAME,
        }
    }
}

impl fmt::Display for SectionDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionDataType::Unknown(t) => write!(f, "Unknown AnySectionDataType value ({t})"),
            other => f.write_str(other.name()),
        }
    }
}

impl serde::Serialize for SectionDataType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Extension of `path` without the leading dot, if any.
pub fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

/// Map an input file name to its section type and canonical name.
///
/// Total: names matching no rule fall through to generic binary data.  Only
/// the name is inspected, never the contents.
pub fn classify<P: AsRef<Path>>(path: P) -> (SectionDataType, &'static str) {
    let path = path.as_ref();
    let data_type = match extension(path) {
        Some("tflite") => SectionDataType::TfliteModel,
        Some("pb" | "proto" | "pbtext" | "prototext") => SectionDataType::LlmMetadataProto,
        Some("spiece") => SectionDataType::SpTokenizer,
        _ if path.to_string_lossy().ends_with("tokenizer.json") => SectionDataType::HfTokenizerZlib,
        _ => SectionDataType::GenericBinaryData,
    };
    (data_type, data_type.section_name())
}

/// Whether an LlmMetadata input must go through the text parser.
pub fn is_text_proto<P: AsRef<Path>>(path: P) -> bool {
    extension(path.as_ref()).is_some_and(|e| TEXT_PROTO_EXTENSIONS.contains(&e))
}
