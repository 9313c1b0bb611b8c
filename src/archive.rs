//! High-level file API: the primary embedding surface.
//!
//! ```no_run
//! use litertlm::archive::{write_container, Container, WriteOptions};
//!
//! // Write
//! let opts = WriteOptions::default().with_metadata_str("tflite:quantized=true")?;
//! write_container("model.litertlm", &["model.tflite", "tokenizer.spiece"], &opts)?;
//!
//! // Read
//! let mut c = Container::open("model.litertlm")?;
//! let model = c.read_section_bytes(0)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::io_stream::{LitertlmReader, LitertlmWriter, ReadError, WriteError, DEFAULT_ZLIB_LEVEL};
use crate::metadata::{parse_section_metadata, MetadataError, SectionMetadata};
use crate::proto::parse_text;
use crate::section::{classify, is_text_proto, SectionDataType};

// ── WriteOptions ──────────────────────────────────────────────────────────────

/// Configuration for [`write_container`].
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Matched to the inputs by position; entry `i` describes input `i`.
    pub section_metadata: Vec<SectionMetadata>,
    /// zlib level for HF tokenizer payloads, 0..=9.
    pub zlib_level:       u32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            section_metadata: Vec::new(),
            zlib_level:       DEFAULT_ZLIB_LEVEL,
        }
    }
}

impl WriteOptions {
    /// Replace the section metadata with the parse of `text`, written in the
    /// `name:key=value,...;name:...` mini-language.
    pub fn with_metadata_str(mut self, text: &str) -> Result<Self, MetadataError> {
        self.section_metadata = parse_section_metadata(text)?;
        Ok(self)
    }
}

// ── Writing ───────────────────────────────────────────────────────────────────

/// Check the positional pairing of metadata entries with classified inputs.
fn check_metadata_names(
    inputs: &[(PathBuf, SectionDataType, &'static str)],
    metadata: &[SectionMetadata],
) -> Result<(), WriteError> {
    for (index, (meta, (_, _, name))) in metadata.iter().zip(inputs).enumerate() {
        if meta.section_name != *name {
            return Err(WriteError::SectionNameMismatch {
                index,
                expected: (*name).to_owned(),
                found: meta.section_name.clone(),
            });
        }
    }
    if metadata.len() > inputs.len() {
        warn!(
            extra = metadata.len() - inputs.len(),
            "more section metadata entries than input files; extras ignored"
        );
    }
    Ok(())
}

/// Build a container at `output` from `inputs`, one section per input in
/// the given order.
///
/// Nothing is created at `output` when the inputs are empty, the metadata
/// does not line up with the inputs, or an input does not exist.
pub fn write_container<P, Q>(output: P, inputs: &[Q], opts: &WriteOptions) -> Result<(), WriteError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    if inputs.is_empty() {
        return Err(WriteError::NoInputFiles);
    }
    let inputs: Vec<_> = inputs
        .iter()
        .map(|p| {
            let (data_type, name) = classify(p);
            (p.as_ref().to_path_buf(), data_type, name)
        })
        .collect();
    check_metadata_names(&inputs, &opts.section_metadata)?;
    for (path, _, _) in &inputs {
        if let Err(e) = fs::metadata(path) {
            error!(path = %path.display(), "cannot access input file: {e}");
            return Err(e.into());
        }
    }

    let file = BufWriter::new(File::create(output.as_ref())?);
    let mut writer = LitertlmWriter::with_level(file, opts.zlib_level)?;

    for (index, (path, data_type, _)) in inputs.iter().enumerate() {
        let items = opts
            .section_metadata
            .get(index)
            .map(|m| m.items.clone())
            .unwrap_or_default();

        match data_type {
            SectionDataType::LlmMetadataProto if is_text_proto(path) => {
                let text = fs::read_to_string(path)?;
                let meta = parse_text(&text)
                    .map_err(|source| WriteError::ProtoText { path: path.clone(), source })?;
                writer.add_llm_metadata(&meta, items)?;
            }
            SectionDataType::HfTokenizerZlib => {
                writer.add_hf_tokenizer(&fs::read(path)?, items)?;
            }
            _ => {
                writer.add_section(*data_type, BufReader::new(File::open(path)?), items)?;
            }
        }
    }

    writer.finalize()?.into_inner().map_err(|e| e.into_error())?;
    Ok(())
}

// ── Container ─────────────────────────────────────────────────────────────────

/// An open container file.  Dereferences to its [`LitertlmReader`].
pub struct Container {
    path:   PathBuf,
    reader: LitertlmReader<BufReader<File>>,
}

impl Container {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReadError> {
        let path = path.as_ref().to_owned();
        let reader = LitertlmReader::new(BufReader::new(File::open(&path)?))?;
        Ok(Self { path, reader })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Deref for Container {
    type Target = LitertlmReader<BufReader<File>>;

    fn deref(&self) -> &Self::Target {
        &self.reader
    }
}

impl DerefMut for Container {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.reader
    }
}
