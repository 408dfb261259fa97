use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info};

/// Relevance judgments keyed by query id, then document id. Loaded once
/// per evaluation session and never mutated afterwards.
#[derive(Debug, Default)]
pub struct Qrels {
    pub judgments: BTreeMap<String, BTreeMap<String, i32>>,
    pub entries_loaded: usize,
    pub negatives_dropped: usize,
    pub malformed_lines: usize,
    pub collisions: usize,
    pub file_failures: usize,
}

impl Qrels {
    /// An unreadable file aborts only its own load: siblings still merge.
    pub fn load(paths: &[PathBuf]) -> Self {
        let mut qrels = Self::default();
        for path in paths {
            qrels.load_file(path);
        }
        qrels
    }

    /// Expects whitespace-delimited `query_id unused doc_id relevance`
    /// lines. Negative relevance grades are discarded; on a duplicate
    /// (query, doc) pair the earlier file wins and the collision is
    /// counted.
    fn load_file(&mut self, path: &Path) {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to read judgment file");
                self.file_failures += 1;
                return;
            }
        };
        let text = String::from_utf8_lossy(&raw);

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                self.malformed_lines += 1;
                continue;
            }

            let Ok(relevance) = fields[3].parse::<i32>() else {
                self.malformed_lines += 1;
                continue;
            };
            if relevance < 0 {
                self.negatives_dropped += 1;
                continue;
            }

            let query = self.judgments.entry(fields[0].to_string()).or_default();
            if query.contains_key(fields[2]) {
                self.collisions += 1;
                continue;
            }

            query.insert(fields[2].to_string(), relevance);
            self.entries_loaded += 1;
        }

        info!(
            path = %path.display(),
            entries = self.entries_loaded,
            malformed = self.malformed_lines,
            "loaded judgment file"
        );
    }

    pub fn for_query(&self, query_id: &str) -> Option<&BTreeMap<String, i32>> {
        self.judgments.get(query_id)
    }

    pub fn is_empty(&self) -> bool {
        self.judgments.is_empty()
    }
}
