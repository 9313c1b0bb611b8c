use criterion::{black_box, criterion_group, criterion_main, Criterion};
use litertlm::header::{decode_header, encode_header, Header, SectionRecord};
use litertlm::io_stream::{LitertlmReader, LitertlmWriter};
use litertlm::metadata::{parse_section_metadata, KeyValuePair};
use litertlm::SectionDataType;
use std::io::Cursor;

fn build_container(payload: &[u8], sections: usize) -> Vec<u8> {
    let mut writer = LitertlmWriter::new(Cursor::new(Vec::new())).unwrap();
    for i in 0..sections {
        writer
            .add_section(
                SectionDataType::GenericBinaryData,
                payload,
                vec![KeyValuePair::new("index", i as i64)],
            )
            .unwrap();
    }
    writer.finalize().unwrap().into_inner()
}

fn bench_write(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];

    c.bench_function("write_4x1mb_sections", |b| {
        b.iter(|| build_container(black_box(&data), 4))
    });

    let json = br#"{"model":{"type":"BPE","vocab":{"hello":0,"world":1}}}"#.repeat(4096);
    c.bench_function("write_hf_tokenizer_zlib", |b| {
        b.iter(|| {
            let mut writer = LitertlmWriter::new(Cursor::new(Vec::new())).unwrap();
            writer.add_hf_tokenizer(black_box(&json), Vec::new()).unwrap();
            writer.finalize().unwrap();
        })
    });
}

fn bench_read(c: &mut Criterion) {
    let bytes = build_container(&vec![7u8; 256 * 1024], 8);

    c.bench_function("open_and_read_8_sections", |b| {
        b.iter(|| {
            let mut reader = LitertlmReader::new(Cursor::new(black_box(bytes.as_slice()))).unwrap();
            for i in 0..reader.sections().len() {
                black_box(reader.read_section_bytes(i).unwrap());
            }
        })
    });
}

fn bench_header(c: &mut Criterion) {
    let header = Header {
        system_metadata: vec![KeyValuePair::new("author", "The ODML Authors")],
        sections: (0..64u64)
            .map(|i| SectionRecord {
                data_type: SectionDataType::TfliteModel,
                begin_offset: i * 16384,
                end_offset: i * 16384 + 100,
                items: vec![KeyValuePair::new("quantized", true), KeyValuePair::new("temp", 0.7f64)],
            })
            .collect(),
    };
    let encoded = encode_header(&header).unwrap();

    c.bench_function("encode_header_64_sections", |b| b.iter(|| encode_header(black_box(&header))));
    c.bench_function("decode_header_64_sections", |b| b.iter(|| decode_header(black_box(&encoded), 0)));
    c.bench_function("parse_section_metadata", |b| {
        b.iter(|| parse_section_metadata(black_box("tokenizer:lang=en,vocab=256000;tflite:quantized=true,size=1024,temp=0.7")))
    });
}

criterion_group!(benches, bench_write, bench_read, bench_header);
criterion_main!(benches);
