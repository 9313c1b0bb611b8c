//! Human-readable and JSON dumps of a container.

use std::io::{Read, Seek, Write};

use prost::Message;

use crate::header::SectionRecord;
use crate::io_stream::{LitertlmReader, ReadError};
use crate::metadata::{KeyValuePair, Value};
use crate::preamble::Version;
use crate::proto::{to_text, LlmMetadata};
use crate::section::SectionDataType;

const INDENT: &str = "  ";
const BOX_WIDTH: usize = 50;
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Dump settings.  `color` wraps labels in ANSI bold.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeekOptions {
    pub color: bool,
}

struct Style {
    bold:  &'static str,
    reset: &'static str,
}

impl From<PeekOptions> for Style {
    fn from(o: PeekOptions) -> Self {
        if o.color {
            Style { bold: BOLD, reset: RESET }
        } else {
            Style { bold: "", reset: "" }
        }
    }
}

/// `title` centred in a `+---+` box `width` columns wide.
pub fn boxed_title<W: Write>(out: &mut W, title: &str, width: usize) -> std::io::Result<()> {
    let inner = width.saturating_sub(2);
    let left = inner.saturating_sub(title.len()) / 2;
    let right = inner.saturating_sub(title.len() + left);
    let edge = format!("+{}+", "-".repeat(inner));
    writeln!(out, "{edge}")?;
    writeln!(out, "|{}{title}{}|", " ".repeat(left), " ".repeat(right))?;
    writeln!(out, "{edge}")
}

fn write_pair<W: Write>(out: &mut W, kv: &KeyValuePair, depth: usize, s: &Style) -> std::io::Result<()> {
    let (b, r) = (s.bold, s.reset);
    write!(out, "{}{b}Key{r}: {}, ", INDENT.repeat(depth), kv.key)?;
    match &kv.value {
        Value::Unknown(_) => writeln!(out, "{b}Value{r} (Unknown Type)"),
        v => writeln!(out, "{b}Value{r} ({}): {v}", v.type_name()),
    }
}

/// Decode an LlmMetadata section as stored.  A zero-length payload is an
/// all-default message, not an error.
fn decode_llm_metadata<R: Read + Seek>(
    reader: &mut LitertlmReader<R>,
    index: usize,
) -> Result<LlmMetadata, ReadError> {
    let bytes = reader.read_section_bytes(index)?;
    Ok(LlmMetadata::decode(bytes.as_slice())?)
}

fn write_section<R, W>(
    reader: &mut LitertlmReader<R>,
    out: &mut W,
    index: usize,
    record: &SectionRecord,
    s: &Style,
) -> Result<(), ReadError>
where
    R: Read + Seek,
    W: Write,
{
    writeln!(out, "\n{}Section {index}:{}", s.bold, s.reset)?;
    writeln!(out, "{INDENT}Items:")?;
    if record.items.is_empty() {
        writeln!(out, "{INDENT}{INDENT}<None>")?;
    }
    for kv in &record.items {
        write_pair(out, kv, 2, s)?;
    }
    writeln!(out, "{INDENT}Begin Offset: {}", record.begin_offset)?;
    writeln!(out, "{INDENT}End Offset:   {}", record.end_offset)?;
    writeln!(out, "{INDENT}Data Type:    {}", record.data_type)?;

    if record.data_type == SectionDataType::LlmMetadataProto {
        let meta = decode_llm_metadata(reader, index)?;
        writeln!(out, "{INDENT}<<<<<<<< start of LlmMetadata")?;
        for line in to_text(&meta).lines() {
            writeln!(out, "{INDENT}{INDENT}{line}")?;
        }
        writeln!(out, "{INDENT}>>>>>>>> end of LlmMetadata")?;
    }
    writeln!(out)?;
    Ok(())
}

/// Write the full human-readable dump: version, system metadata, then each
/// section with its items, offsets, type and, for LlmMetadata sections, the
/// decoded message in text format.
pub fn peek<R, W>(reader: &mut LitertlmReader<R>, out: &mut W, opts: PeekOptions) -> Result<(), ReadError>
where
    R: Read + Seek,
    W: Write,
{
    let style = Style::from(opts);
    writeln!(out, "LiteRT-LM Version: {}\n", reader.version)?;

    boxed_title(out, "System Metadata", BOX_WIDTH)?;
    if reader.header.system_metadata.is_empty() {
        writeln!(out, "{INDENT}No system metadata entries.")?;
    }
    for kv in &reader.header.system_metadata {
        write_pair(out, kv, 1, &style)?;
    }
    writeln!(out)?;

    let sections = reader.sections().to_vec();
    boxed_title(out, &format!("Sections ({})", sections.len()), BOX_WIDTH)?;
    if sections.is_empty() {
        writeln!(out, "{INDENT}<None>")?;
    }
    for (index, record) in sections.iter().enumerate() {
        write_section(reader, out, index, record, &style)?;
    }
    Ok(())
}

// ── JSON ─────────────────────────────────────────────────────────────────────

#[derive(serde::Serialize)]
struct SectionReport<'a> {
    #[serde(flatten)]
    record: &'a SectionRecord,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    llm_metadata: Option<String>,
}

#[derive(serde::Serialize)]
struct Report<'a> {
    version: Version,
    header_end: u64,
    system_metadata: &'a [KeyValuePair],
    sections: Vec<SectionReport<'a>>,
}

/// Write the same information as [`peek`] as pretty-printed JSON.
pub fn peek_json<R, W>(reader: &mut LitertlmReader<R>, out: &mut W) -> Result<(), ReadError>
where
    R: Read + Seek,
    W: Write,
{
    let mut decoded = Vec::with_capacity(reader.sections().len());
    for (index, record) in reader.sections().to_vec().iter().enumerate() {
        decoded.push(match record.data_type {
            SectionDataType::LlmMetadataProto => Some(to_text(&decode_llm_metadata(reader, index)?)),
            _ => None,
        });
    }

    let report = Report {
        version: reader.version,
        header_end: reader.header_end,
        system_metadata: &reader.header.system_metadata,
        sections: reader
            .sections()
            .iter()
            .zip(decoded)
            .map(|(record, llm_metadata)| SectionReport { record, size: record.len(), llm_metadata })
            .collect(),
    };
    serde_json::to_writer_pretty(&mut *out, &report).map_err(std::io::Error::from)?;
    writeln!(out)?;
    Ok(())
}
