use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::engine::TextNormalizer;
use crate::model::DocumentRecord;
use crate::util::ensure_directory;

pub const MAX_VERBOSE_NORMALIZATION_ERRORS: usize = 3;

/// Append-only line-oriented record store, one JSON object per line. The
/// writer must be finished before any downstream reader (index build) may
/// open the file.
#[derive(Debug)]
pub struct CorpusWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    records_written: usize,
}

impl CorpusWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }

        let file = File::create(path)
            .with_context(|| format!("failed to create corpus store: {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            records_written: 0,
        })
    }

    pub fn append(&mut self, record: &DocumentRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .with_context(|| format!("failed to serialize record {}", record.id))?;
        writeln!(self.writer, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;

        self.records_written += 1;
        Ok(())
    }

    /// Flushes and closes the store, returning the record count.
    pub fn finish(mut self) -> Result<usize> {
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(self.records_written)
    }
}

/// Normalizes and appends one record to the normalized store. A
/// normalization failure keeps the record id with empty contents so the
/// two stores stay in referential parity; the failed id is collected and
/// the first few are logged verbosely.
pub fn append_normalized<N: TextNormalizer>(
    writer: &mut CorpusWriter,
    normalizer: &mut N,
    record: &DocumentRecord,
    failed_ids: &mut Vec<String>,
) -> Result<()> {
    let contents = match normalizer.normalize(&record.contents) {
        Ok(contents) => contents,
        Err(err) => {
            failed_ids.push(record.id.clone());
            if failed_ids.len() <= MAX_VERBOSE_NORMALIZATION_ERRORS {
                warn!(doc_id = %record.id, error = %err, "record normalization failed");
            }
            String::new()
        }
    };

    writer.append(&DocumentRecord {
        id: record.id.clone(),
        contents,
    })
}

pub fn read_store_ids(path: &Path) -> Result<BTreeSet<String>> {
    let file =
        File::open(path).with_context(|| format!("failed to open corpus store: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut ids = BTreeSet::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line
            .with_context(|| format!("failed to read line {} of {}", number + 1, path.display()))?;
        if line.trim().is_empty() {
            continue;
        }

        let record: DocumentRecord = serde_json::from_str(&line)
            .with_context(|| format!("malformed record at line {} of {}", number + 1, path.display()))?;
        ids.insert(record.id);
    }

    Ok(ids)
}

pub fn count_store_records(path: &Path) -> Result<usize> {
    let file =
        File::open(path).with_context(|| format!("failed to open corpus store: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut count = 0usize;
    for line in reader.lines() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if !line.trim().is_empty() {
            count += 1;
        }
    }

    Ok(count)
}

/// Raw and normalized stores must carry identical id sets; a disagreement
/// is surfaced as an error, never tolerated silently.
pub fn verify_store_parity(raw_path: &Path, normalized_path: &Path) -> Result<()> {
    let raw_ids = read_store_ids(raw_path)?;
    let normalized_ids = read_store_ids(normalized_path)?;

    if raw_ids == normalized_ids {
        return Ok(());
    }

    let missing = raw_ids.difference(&normalized_ids).count();
    let unexpected = normalized_ids.difference(&raw_ids).count();
    bail!(
        "corpus stores disagree on ids: {} missing from and {} unexpected in {} (raw: {})",
        missing,
        unexpected,
        normalized_path.display(),
        raw_path.display()
    );
}
