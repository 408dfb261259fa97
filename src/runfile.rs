use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::util::ensure_directory;

/// One (query, retrieved document) pair in the standard six-field run
/// format: `query_id Q0 doc_id rank score run_tag`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunEntry {
    pub query_id: String,
    pub doc_id: String,
    pub rank: usize,
    pub score: f64,
    pub run_tag: String,
}

impl RunEntry {
    pub fn to_line(&self) -> String {
        format!(
            "{} Q0 {} {} {:.6} {}",
            self.query_id, self.doc_id, self.rank, self.score, self.run_tag
        )
    }
}

/// Writes the whole run in one batch and flushes before returning, so the
/// file is complete once this call succeeds.
pub fn write_run_file(path: &Path, entries: &[RunEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let file =
        File::create(path).with_context(|| format!("failed to create run file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    for entry in entries {
        writeln!(writer, "{}", entry.to_line())
            .with_context(|| format!("failed to write run file: {}", path.display()))?;
    }

    writer
        .flush()
        .with_context(|| format!("failed to flush run file: {}", path.display()))?;

    Ok(())
}

/// Ranked lists per query in file order, which the engine contract
/// guarantees is rank order.
#[derive(Debug, Default)]
pub struct ParsedRun {
    pub rankings: BTreeMap<String, Vec<(String, f64)>>,
    pub run_tag: Option<String>,
    pub malformed_lines: usize,
}

/// Lines must carry exactly six whitespace-separated fields with a numeric
/// rank and score; anything else is counted and skipped, never fatal.
pub fn parse_run_file(path: &Path) -> Result<ParsedRun> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&raw);

    let mut parsed = ParsedRun::default();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 {
            parsed.malformed_lines += 1;
            continue;
        }

        if fields[3].parse::<usize>().is_err() {
            parsed.malformed_lines += 1;
            continue;
        }
        let Ok(score) = fields[4].parse::<f64>() else {
            parsed.malformed_lines += 1;
            continue;
        };

        if parsed.run_tag.is_none() {
            parsed.run_tag = Some(fields[5].to_string());
        }

        parsed
            .rankings
            .entry(fields[0].to_string())
            .or_default()
            .push((fields[2].to_string(), score));
    }

    Ok(parsed)
}
