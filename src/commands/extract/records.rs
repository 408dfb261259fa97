use anyhow::{Context, Result};
use regex::Regex;

use crate::model::DocumentRecord;
use crate::util::collapse_whitespace;

/// Tag names bounding a record block and its fields. The collections use
/// pseudo-markup, not well-formed XML, so matching is delimiter-bounded
/// and non-greedy: each opening tag pairs with the first closing tag that
/// follows it.
#[derive(Debug, Clone)]
pub struct ScanRules {
    pub record_tag: String,
    pub id_tag: String,
    pub body_tag: String,
}

impl Default for ScanRules {
    fn default() -> Self {
        Self {
            record_tag: "DOC".to_string(),
            id_tag: "DOCNO".to_string(),
            body_tag: "TEXT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanCounts {
    pub blocks_seen: usize,
    pub blocks_dropped_missing_id: usize,
    pub empty_bodies: usize,
}

#[derive(Debug)]
pub struct RecordScanner {
    block: Regex,
    id: Regex,
    body: Regex,
}

impl RecordScanner {
    pub fn new(rules: &ScanRules) -> Result<Self> {
        let record_tag = regex::escape(&rules.record_tag);
        let id_tag = regex::escape(&rules.id_tag);
        let body_tag = regex::escape(&rules.body_tag);

        Ok(Self {
            block: Regex::new(&format!(r"(?s)<{record_tag}>(.*?)</{record_tag}>"))
                .context("failed to compile record block regex")?,
            id: Regex::new(&format!(r"(?s)<{id_tag}>\s*(.*?)\s*</{id_tag}>"))
                .context("failed to compile record id regex")?,
            body: Regex::new(&format!(r"(?s)<{body_tag}>(.*?)</{body_tag}>"))
                .context("failed to compile record body regex")?,
        })
    }

    /// Emits one record per well-formed block. A block without an
    /// identifier is dropped and counted; a block without a body yields an
    /// empty body. Body whitespace runs, newlines included, are collapsed
    /// to single spaces before the record leaves the scanner.
    pub fn scan<F>(&self, text: &str, counts: &mut ScanCounts, mut emit: F) -> Result<()>
    where
        F: FnMut(DocumentRecord) -> Result<()>,
    {
        for captures in self.block.captures_iter(text) {
            counts.blocks_seen += 1;
            let block = captures.get(1).map(|m| m.as_str()).unwrap_or_default();

            let id = self
                .id
                .captures(block)
                .and_then(|c| c.get(1))
                .map(|m| collapse_whitespace(m.as_str()))
                .filter(|id| !id.is_empty());
            let Some(id) = id else {
                counts.blocks_dropped_missing_id += 1;
                continue;
            };

            let contents = self
                .body
                .captures(block)
                .and_then(|c| c.get(1))
                .map(|m| collapse_whitespace(m.as_str()))
                .unwrap_or_default();
            if contents.is_empty() {
                counts.empty_bodies += 1;
            }

            emit(DocumentRecord { id, contents })?;
        }

        Ok(())
    }
}
