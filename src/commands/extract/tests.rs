use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::bail;
use flate2::Compression;
use flate2::write::GzEncoder;

use super::archive::{ArchiveCounts, walk_archive};
use super::corpus::{CorpusWriter, append_normalized, verify_store_parity};
use super::records::{RecordScanner, ScanCounts, ScanRules};
use crate::engine::TextNormalizer;
use crate::model::DocumentRecord;

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn build_archive(path: &Path, members: &[(&str, Vec<u8>)]) {
    let file = File::create(path).unwrap();
    let mut builder = tar::Builder::new(file);
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, *name, data.as_slice()).unwrap();
    }
    builder.finish().unwrap();
}

fn extract_archive(archive: &Path, store: &Path) -> (ArchiveCounts, ScanCounts) {
    let scanner = RecordScanner::new(&ScanRules::default()).unwrap();
    let mut writer = CorpusWriter::create(store).unwrap();
    let mut scan_counts = ScanCounts::default();

    let archive_counts = walk_archive(archive, ".gz", |member| {
        scanner.scan(&member.text, &mut scan_counts, |record| writer.append(&record))
    })
    .unwrap();
    writer.finish().unwrap();

    (archive_counts, scan_counts)
}

fn read_records(path: &Path) -> Vec<DocumentRecord> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn doc(id: &str, body: &str) -> String {
    format!("<DOC>\n<DOCNO> {id} </DOCNO>\n<TEXT>\n{body}\n</TEXT>\n</DOC>\n")
}

#[test]
fn round_trip_extraction_keeps_every_record_with_collapsed_bodies() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("collection.tar");
    let store = dir.path().join("corpus.jsonl");

    let member_a = format!(
        "{}{}",
        doc("FBIS3-0001", "First   body\ntext"),
        doc("FBIS3-0002", "Second body")
    );
    let member_b = doc("FBIS3-0003", "Third\n\n  body");
    build_archive(
        &archive,
        &[
            ("fbis/part1.gz", gzip(member_a.as_bytes())),
            ("fbis/part2.gz", gzip(member_b.as_bytes())),
        ],
    );

    let (archive_counts, scan_counts) = extract_archive(&archive, &store);

    assert_eq!(archive_counts.members_seen, 2);
    assert_eq!(archive_counts.members_matched, 2);
    assert_eq!(archive_counts.decompress_fallbacks, 0);
    assert_eq!(scan_counts.blocks_seen, 3);

    let records = read_records(&store);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].id, "FBIS3-0001");
    assert_eq!(records[0].contents, "First body text");
    assert_eq!(records[2].id, "FBIS3-0003");
    assert_eq!(records[2].contents, "Third body");
}

#[test]
fn block_missing_identifier_is_dropped_without_affecting_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("collection.tar");
    let store = dir.path().join("corpus.jsonl");

    let member = format!(
        "{}<DOC>\n<TEXT>orphan body</TEXT>\n</DOC>\n{}",
        doc("FBIS3-0001", "kept"),
        doc("FBIS3-0002", "also kept")
    );
    build_archive(&archive, &[("part.gz", gzip(member.as_bytes()))]);

    let (_, scan_counts) = extract_archive(&archive, &store);

    assert_eq!(scan_counts.blocks_seen, 3);
    assert_eq!(scan_counts.blocks_dropped_missing_id, 1);

    let ids: Vec<String> = read_records(&store).into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["FBIS3-0001", "FBIS3-0002"]);
}

#[test]
fn member_without_gzip_magic_is_decoded_as_raw_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("collection.tar");
    let store = dir.path().join("corpus.jsonl");

    build_archive(
        &archive,
        &[("plain.gz", doc("FBIS3-0009", "stored uncompressed").into_bytes())],
    );

    let (archive_counts, _) = extract_archive(&archive, &store);

    assert_eq!(archive_counts.decompress_fallbacks, 1);
    assert_eq!(archive_counts.decompress_failures, 0);
    assert_eq!(read_records(&store)[0].id, "FBIS3-0009");
}

#[test]
fn corrupt_gzip_member_is_skipped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("collection.tar");
    let store = dir.path().join("corpus.jsonl");

    let mut corrupt = vec![0x1f, 0x8b];
    corrupt.extend_from_slice(b"definitely not a deflate stream");
    build_archive(
        &archive,
        &[
            ("bad.gz", corrupt),
            ("good.gz", gzip(doc("FBIS3-0010", "survives").as_bytes())),
        ],
    );

    let (archive_counts, _) = extract_archive(&archive, &store);

    assert_eq!(archive_counts.decompress_failures, 1);
    assert_eq!(archive_counts.members_matched, 2);
    assert_eq!(read_records(&store).len(), 1);
}

#[test]
fn members_without_the_expected_suffix_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("collection.tar");
    let store = dir.path().join("corpus.jsonl");

    build_archive(
        &archive,
        &[
            ("readme.txt", b"not a collection member".to_vec()),
            ("part.gz", gzip(doc("FBIS3-0011", "kept").as_bytes())),
        ],
    );

    let (archive_counts, _) = extract_archive(&archive, &store);

    assert_eq!(archive_counts.members_seen, 2);
    assert_eq!(archive_counts.members_skipped, 1);
    assert_eq!(archive_counts.members_matched, 1);
    assert_eq!(read_records(&store).len(), 1);
}

#[test]
fn missing_body_yields_an_empty_record_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("collection.tar");
    let store = dir.path().join("corpus.jsonl");

    let member = "<DOC>\n<DOCNO> FBIS3-0012 </DOCNO>\n</DOC>\n";
    build_archive(&archive, &[("part.gz", gzip(member.as_bytes()))]);

    let (_, scan_counts) = extract_archive(&archive, &store);

    assert_eq!(scan_counts.empty_bodies, 1);
    let records = read_records(&store);
    assert_eq!(records[0].id, "FBIS3-0012");
    assert_eq!(records[0].contents, "");
}

#[test]
fn duplicate_closing_tags_bind_to_the_first_close() {
    let scanner = RecordScanner::new(&ScanRules::default()).unwrap();
    let mut counts = ScanCounts::default();
    let mut records = Vec::new();

    let text = "<DOC>\n<DOCNO>A</DOCNO>\n<TEXT>first</TEXT> stray </TEXT>\n</DOC>";
    scanner
        .scan(text, &mut counts, |record| {
            records.push(record);
            Ok(())
        })
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].contents, "first");
}

struct FlakyNormalizer {
    fail_on: String,
}

impl TextNormalizer for FlakyNormalizer {
    fn normalize(&mut self, text: &str) -> anyhow::Result<String> {
        if text.contains(&self.fail_on) {
            bail!("normalizer rejected input");
        }
        Ok(text.to_ascii_lowercase())
    }
}

#[test]
fn normalization_failure_keeps_store_parity_with_empty_contents() {
    let dir = tempfile::tempdir().unwrap();
    let raw_path = dir.path().join("corpus_raw.jsonl");
    let norm_path = dir.path().join("corpus_norm.jsonl");

    let mut raw_writer = CorpusWriter::create(&raw_path).unwrap();
    let mut norm_writer = CorpusWriter::create(&norm_path).unwrap();
    let mut normalizer = FlakyNormalizer {
        fail_on: "POISON".to_string(),
    };
    let mut failed_ids = Vec::new();

    let records = vec![
        DocumentRecord {
            id: "D1".to_string(),
            contents: "Clean Text".to_string(),
        },
        DocumentRecord {
            id: "D2".to_string(),
            contents: "POISON text".to_string(),
        },
    ];
    for record in &records {
        raw_writer.append(record).unwrap();
        append_normalized(&mut norm_writer, &mut normalizer, record, &mut failed_ids).unwrap();
    }
    raw_writer.finish().unwrap();
    norm_writer.finish().unwrap();

    assert_eq!(failed_ids, vec!["D2".to_string()]);
    verify_store_parity(&raw_path, &norm_path).unwrap();

    let normalized = read_records(&norm_path);
    assert_eq!(normalized[0].contents, "clean text");
    assert_eq!(normalized[1].id, "D2");
    assert_eq!(normalized[1].contents, "");
}

#[test]
fn store_parity_violation_is_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    let raw_path = dir.path().join("corpus_raw.jsonl");
    let norm_path = dir.path().join("corpus_norm.jsonl");

    let mut raw_writer = CorpusWriter::create(&raw_path).unwrap();
    raw_writer
        .append(&DocumentRecord {
            id: "D1".to_string(),
            contents: "body".to_string(),
        })
        .unwrap();
    raw_writer
        .append(&DocumentRecord {
            id: "D2".to_string(),
            contents: "body".to_string(),
        })
        .unwrap();
    raw_writer.finish().unwrap();

    let mut norm_writer = CorpusWriter::create(&norm_path).unwrap();
    norm_writer
        .append(&DocumentRecord {
            id: "D1".to_string(),
            contents: "body".to_string(),
        })
        .unwrap();
    norm_writer.finish().unwrap();

    let err = verify_store_parity(&raw_path, &norm_path).unwrap_err();
    assert!(err.to_string().contains("disagree"));
}
