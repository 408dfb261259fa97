use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{error, info};

use crate::util::collapse_whitespace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryVariant {
    Short,
    Long,
}

impl QueryVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Long => "long",
        }
    }
}

/// Topics merged across all input files, keyed by id.
#[derive(Debug, Default)]
pub struct TopicSet {
    pub topics: BTreeMap<String, Topic>,
    pub collisions: usize,
    pub dropped: usize,
    pub file_failures: usize,
}

impl TopicSet {
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Derives the query text for every topic; the key set always equals
    /// the full topic id set, whatever the variant.
    pub fn query_map(&self, variant: QueryVariant) -> BTreeMap<String, String> {
        self.topics
            .iter()
            .map(|(id, topic)| {
                let text = match variant {
                    QueryVariant::Short => topic.title.clone(),
                    QueryVariant::Long => {
                        if topic.description.is_empty() {
                            topic.title.clone()
                        } else {
                            format!("{} {}", topic.title, topic.description)
                        }
                    }
                };
                (id.clone(), text)
            })
            .collect()
    }
}

/// Tolerant scanner for topic definition files. The format is pseudo-markup:
/// fields are bounded by their marker and the next tag, not by matching
/// close tags.
#[derive(Debug)]
pub struct TopicParser {
    block: Regex,
    number: Regex,
    title: Regex,
    description: Regex,
}

impl TopicParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            block: Regex::new(r"(?s)<top>(.*?)</top>")
                .context("failed to compile topic block regex")?,
            number: Regex::new(r"<num>\s*(?:Number:)?\s*(\d+)")
                .context("failed to compile topic number regex")?,
            title: Regex::new(r"<title>\s*(?:Topic:)?\s*([^<]*)")
                .context("failed to compile topic title regex")?,
            description: Regex::new(r"<desc>\s*(?:Description:)?\s*([^<]*)")
                .context("failed to compile topic description regex")?,
        })
    }

    /// Parses and merges all files in order. Later files overwrite earlier
    /// ones on id collision; collisions and dropped records are counted.
    /// An unreadable file aborts only its own parse: siblings still merge.
    pub fn parse_files(&self, paths: &[PathBuf]) -> TopicSet {
        let mut set = TopicSet::default();

        for path in paths {
            let raw = match fs::read(path) {
                Ok(raw) => raw,
                Err(err) => {
                    error!(path = %path.display(), error = %err, "failed to read topic file");
                    set.file_failures += 1;
                    continue;
                }
            };
            let text = String::from_utf8_lossy(&raw);

            let (topics, dropped) = self.parse_text(&text);
            set.dropped += dropped;

            let parsed = topics.len();
            let mut collisions = 0usize;
            for topic in topics {
                if set.topics.insert(topic.id.clone(), topic).is_some() {
                    collisions += 1;
                }
            }
            set.collisions += collisions;

            info!(
                path = %path.display(),
                parsed,
                dropped,
                collisions,
                "parsed topic file"
            );
        }

        set
    }

    /// A record lacking a numeric id or a non-empty title is dropped.
    /// A missing description yields an empty description.
    pub fn parse_text(&self, text: &str) -> (Vec<Topic>, usize) {
        let mut topics = Vec::new();
        let mut dropped = 0usize;

        for captures in self.block.captures_iter(text) {
            let block = captures.get(1).map(|m| m.as_str()).unwrap_or_default();

            let id = self
                .number
                .captures(block)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            let Some(id) = id else {
                dropped += 1;
                continue;
            };

            let title = self
                .title
                .captures(block)
                .and_then(|c| c.get(1))
                .map(|m| collapse_whitespace(m.as_str()))
                .unwrap_or_default();
            if title.is_empty() {
                dropped += 1;
                continue;
            }

            let description = self
                .description
                .captures(block)
                .and_then(|c| c.get(1))
                .map(|m| collapse_whitespace(m.as_str()))
                .unwrap_or_default();

            topics.push(Topic {
                id,
                title,
                description,
            });
        }

        (topics, dropped)
    }
}
