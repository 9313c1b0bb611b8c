use flate2::read::ZlibDecoder;
use litertlm::archive::{write_container, Container, WriteOptions};
use litertlm::inspect::{peek, PeekOptions};
use litertlm::io_stream::{ReadError, WriteError};
use litertlm::metadata::{KeyValuePair, Value};
use litertlm::preamble::{BLOCK_SIZE, MAGIC};
use litertlm::proto::TokenUnion;
use litertlm::SectionDataType;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, NamedTempFile};

fn write_input(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

const METADATA_PBTEXT: &str = r#"
start_token { token_ids { ids: 2 } }
stop_tokens { token_str: "<eos>" }
max_num_tokens: 1024
"#;

#[test]
fn test_write_and_read_back() {
    let dir = tempdir().unwrap();
    let tflite = write_input(dir.path(), "model.tflite", b"TFL3-model");
    let spm = write_input(dir.path(), "sp.spiece", b"sentencepiece");
    let out = dir.path().join("out.litertlm");

    let opts = WriteOptions::default()
        .with_metadata_str("tflite:quantized=true,size=1024;tokenizer:lang=en")
        .unwrap();
    write_container(&out, &[&tflite, &spm], &opts).unwrap();

    let bytes = fs::read(&out).unwrap();
    assert_eq!(&bytes[..8], MAGIC);
    assert_eq!(&bytes[8..20], &[1u8, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0]);

    let mut c = Container::open(&out).unwrap();
    assert_eq!(c.version.to_string(), "1.3.0");
    assert_eq!(c.header.system_metadata, vec![KeyValuePair::new("author", "The ODML Authors")]);

    let s = c.sections().to_vec();
    assert_eq!(s.len(), 2);
    assert_eq!(s[0].data_type, SectionDataType::TfliteModel);
    assert_eq!(s[0].begin_offset, 16384);
    assert_eq!(s[0].end_offset, 16384 + 10);
    assert_eq!(s[1].data_type, SectionDataType::SpTokenizer);
    assert_eq!(s[1].begin_offset, 32768);
    assert_eq!(
        s[0].items,
        vec![KeyValuePair::new("quantized", true), KeyValuePair::new("size", 1024i64)]
    );
    assert_eq!(s[1].items, vec![KeyValuePair::new("lang", "en")]);

    assert_eq!(c.read_section_bytes(0).unwrap(), b"TFL3-model");
    assert_eq!(c.read_any_sp_tokenizer().unwrap(), b"sentencepiece");
}

#[test]
fn test_sections_are_block_aligned_and_padded() {
    let dir = tempdir().unwrap();
    let a = write_input(dir.path(), "a.bin", &vec![7u8; 20_000]);
    let b = write_input(dir.path(), "b.bin", b"x");
    let out = dir.path().join("out.litertlm");
    write_container(&out, &[a, b], &WriteOptions::default()).unwrap();

    let bytes = fs::read(&out).unwrap();
    assert_eq!(bytes.len() as u64 % BLOCK_SIZE, 0);

    let c = Container::open(&out).unwrap();
    for s in c.sections() {
        assert_eq!(s.begin_offset % BLOCK_SIZE, 0);
    }
    assert_eq!(c.sections()[1].begin_offset, 3 * BLOCK_SIZE);
    // Padding after a payload is zeroed.
    let end = c.sections()[0].end_offset as usize;
    assert!(bytes[end..3 * BLOCK_SIZE as usize].iter().all(|&b| b == 0));
    assert!(c.header_end <= BLOCK_SIZE);
}

#[test]
fn test_empty_inputs_create_nothing() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out.litertlm");
    let inputs: [PathBuf; 0] = [];
    let err = write_container(&out, &inputs, &WriteOptions::default()).unwrap_err();
    assert!(matches!(err, WriteError::NoInputFiles));
    assert!(!out.exists());
}

#[test]
fn test_section_name_mismatch() {
    let dir = tempdir().unwrap();
    let tflite = write_input(dir.path(), "model.tflite", b"m");
    let out = dir.path().join("out.litertlm");
    let opts = WriteOptions::default().with_metadata_str("tokenizer:lang=en").unwrap();

    let err = write_container(&out, &[tflite], &opts).unwrap_err();
    match err {
        WriteError::SectionNameMismatch { index, expected, found } => {
            assert_eq!(index, 0);
            assert_eq!(expected, "tflite");
            assert_eq!(found, "tokenizer");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!out.exists());
}

#[test]
fn test_fewer_metadata_entries_than_inputs() {
    let dir = tempdir().unwrap();
    let tflite = write_input(dir.path(), "model.tflite", b"m");
    let data = write_input(dir.path(), "extra.bin", b"d");
    let out = dir.path().join("out.litertlm");
    let opts = WriteOptions::default().with_metadata_str("tflite:v=1;binary_data:x=y;tflite:z=0").unwrap();
    let short = WriteOptions::default().with_metadata_str("tflite:v=1").unwrap();

    // Extra trailing entries are ignored.
    write_container(&out, &[&tflite, &data], &opts).unwrap();
    let c = Container::open(&out).unwrap();
    assert_eq!(c.sections()[1].items, vec![KeyValuePair::new("x", "y")]);

    // Missing entries leave sections without items.
    write_container(&out, &[&tflite, &data], &short).unwrap();
    let c = Container::open(&out).unwrap();
    assert_eq!(c.sections()[0].items, vec![KeyValuePair::new("v", 1i64)]);
    assert!(c.sections()[1].items.is_empty());
}

#[test]
fn test_hf_tokenizer_is_zlib_compressed() {
    let dir = tempdir().unwrap();
    let json = br#"{"version":"1.0","model":{"type":"BPE","vocab":{"a":0,"b":1}}}"#.repeat(50);
    let tok = write_input(dir.path(), "tokenizer.json", &json);
    let out = dir.path().join("out.litertlm");
    write_container(&out, &[tok], &WriteOptions::default()).unwrap();

    let mut c = Container::open(&out).unwrap();
    assert_eq!(c.sections()[0].data_type, SectionDataType::HfTokenizerZlib);

    let raw = c.read_section_bytes(0).unwrap();
    assert_eq!(u64::from_le_bytes(raw[..8].try_into().unwrap()), json.len() as u64);
    assert!(raw.len() < json.len());
    let mut inflated = Vec::new();
    ZlibDecoder::new(&raw[8..]).read_to_end(&mut inflated).unwrap();
    assert_eq!(inflated, json);

    assert_eq!(c.read_hf_tokenizer(0).unwrap(), json);
}

#[test]
fn test_pbtext_is_stored_as_binary_proto() {
    let dir = tempdir().unwrap();
    let meta = write_input(dir.path(), "llm_metadata.pbtext", METADATA_PBTEXT.as_bytes());
    let out = dir.path().join("out.litertlm");
    write_container(&out, &[meta], &WriteOptions::default()).unwrap();

    let mut c = Container::open(&out).unwrap();
    let raw = c.read_section_bytes(0).unwrap();
    assert!(!raw.starts_with(b"\nstart_token"));

    let decoded = c.read_any_llm_metadata().unwrap();
    assert_eq!(decoded.start_token, Some(TokenUnion::ids([2])));
    assert_eq!(decoded.stop_tokens, vec![TokenUnion::text("<eos>")]);
    assert_eq!(decoded.max_num_tokens, 1024);
}

#[test]
fn test_binary_proto_is_copied_verbatim() {
    let dir = tempdir().unwrap();
    // field 5 (max_num_tokens) = 7
    let meta = write_input(dir.path(), "llm_metadata.pb", &[0x28, 0x07]);
    let out = dir.path().join("out.litertlm");
    write_container(&out, &[meta], &WriteOptions::default()).unwrap();

    let mut c = Container::open(&out).unwrap();
    assert_eq!(c.read_section_bytes(0).unwrap(), [0x28u8, 0x07]);
    assert_eq!(c.read_llm_metadata(0).unwrap().max_num_tokens, 7);
}

#[test]
fn test_bad_pbtext_reports_the_file() {
    let dir = tempdir().unwrap();
    let meta = write_input(dir.path(), "bad.pbtext", b"no_such_field: 1\n");
    let out = dir.path().join("out.litertlm");
    let err = write_container(&out, &[&meta], &WriteOptions::default()).unwrap_err();
    match err {
        WriteError::ProtoText { path, .. } => assert_eq!(path, meta),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_input_is_not_found() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out.litertlm");
    let err = write_container(&out, &[dir.path().join("nope.tflite")], &WriteOptions::default())
        .unwrap_err();
    match err {
        WriteError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!out.exists());
}

/// Log sink shared between a test and the subscriber it installs.
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_missing_input_is_logged_with_its_path() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out.litertlm");
    let missing = dir.path().join("absent.spiece");

    let log = CapturedLog::default();
    let sink = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .finish();
    let err = tracing::subscriber::with_default(subscriber, || {
        write_container(&out, &[&missing], &WriteOptions::default()).unwrap_err()
    });

    assert!(matches!(&err, WriteError::Io(e) if e.kind() == io::ErrorKind::NotFound));
    let logged = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
    assert!(logged.contains(&missing.display().to_string()), "log was: {logged}");
}

#[test]
fn test_comment_only_pbtext_peeks_as_empty_metadata() {
    let dir = tempdir().unwrap();
    let meta = write_input(dir.path(), "meta.pbtext", b"# defaults only\n");
    let out = dir.path().join("out.litertlm");
    write_container(&out, &[meta], &WriteOptions::default()).unwrap();

    let mut c = Container::open(&out).unwrap();
    assert!(c.sections()[0].is_empty());

    let mut buf = Vec::new();
    peek(&mut *c, &mut buf, PeekOptions::default()).unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.contains("Data Type:    LlmMetadataProto"));
    assert!(text.contains("<<<<<<<< start of LlmMetadata\n  >>>>>>>> end of LlmMetadata"));

    // The typed accessor still refuses an empty section.
    assert!(matches!(c.read_any_llm_metadata(), Err(ReadError::EmptySection(0))));
}

#[test]
fn test_header_overflow_is_rejected() {
    let dir = tempdir().unwrap();
    let data = write_input(dir.path(), "blob.bin", b"d");
    let out = dir.path().join("out.litertlm");
    let big = "v".repeat(BLOCK_SIZE as usize);
    let opts = WriteOptions::default()
        .with_metadata_str(&format!("binary_data:huge={big}"))
        .unwrap();
    let err = write_container(&out, &[data], &opts).unwrap_err();
    assert!(matches!(err, WriteError::HeaderTooLarge { limit: BLOCK_SIZE, .. }));
}

#[test]
fn test_invalid_magic_is_rejected() {
    let tmp = NamedTempFile::new().unwrap();
    fs::write(tmp.path(), [b'X'; 64]).unwrap();
    assert!(matches!(Container::open(tmp.path()), Err(ReadError::InvalidMagic(_))));
}

#[test]
fn test_peek_output() {
    let dir = tempdir().unwrap();
    let tflite = write_input(dir.path(), "model.tflite", b"m");
    let meta = write_input(dir.path(), "meta.pbtext", METADATA_PBTEXT.as_bytes());
    let spm = write_input(dir.path(), "sp.spiece", b"s");
    let out = dir.path().join("out.litertlm");
    let opts = WriteOptions::default()
        .with_metadata_str("tflite:temp=0.5;llm_metadata:;tokenizer:ok=TRUE")
        .unwrap();
    write_container(&out, &[tflite, meta, spm], &opts).unwrap();

    let mut c = Container::open(&out).unwrap();
    let mut buf = Vec::new();
    peek(&mut *c, &mut buf, PeekOptions::default()).unwrap();
    let text = String::from_utf8(buf).unwrap();

    assert!(text.contains("LiteRT-LM Version: 1.3.0"));
    assert!(text.contains("System Metadata"));
    assert!(text.contains("Sections (3)"));
    assert!(text.contains("TFLiteModel"));
    assert!(text.contains("LlmMetadataProto"));
    assert!(text.contains("SP_Tokenizer"));
    assert!(text.contains("Key: temp, Value (Double): 0.5000"));
    assert!(text.contains("Key: ok, Value (Bool): True"));
    assert!(text.contains("<<<<<<<< start of LlmMetadata"));
    assert!(text.contains("max_num_tokens: 1024"));
}

#[test]
fn test_typed_item_values() {
    let dir = tempdir().unwrap();
    let data = write_input(dir.path(), "d.bin", b"d");
    let out = dir.path().join("out.litertlm");
    let opts = WriteOptions::default()
        .with_metadata_str("binary_data:i=-3,f=2.5,b=false,s=hello world")
        .unwrap();
    write_container(&out, &[data], &opts).unwrap();

    let c = Container::open(&out).unwrap();
    let values: Vec<_> = c.sections()[0].items.iter().map(|kv| kv.value.clone()).collect();
    assert_eq!(
        values,
        vec![
            Value::Int64(-3),
            Value::Double(2.5),
            Value::Bool(false),
            Value::String("hello world".into())
        ]
    );
}
