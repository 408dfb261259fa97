use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use crate::engine::{RankingModel, SearchEngine, SearchSession, TextNormalizer};
use crate::model::ConfigCounts;
use crate::runfile::{RunEntry, write_run_file};
use crate::topics::QueryVariant;

const MAX_VERBOSE_QUERY_ERRORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusVariant {
    Raw,
    Normalized,
}

impl CorpusVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Normalized => "norm",
        }
    }
}

/// One fully determined orchestrator execution.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    pub corpus: CorpusVariant,
    pub query_variant: QueryVariant,
    pub model: RankingModel,
    pub model_name: String,
    pub model_fallback: bool,
    pub index_dir: PathBuf,
}

impl RunConfiguration {
    /// The tag is a pure function of (corpus variant, query variant,
    /// model); re-running the same configuration targets the same file.
    pub fn run_tag(&self) -> String {
        format!(
            "{}_{}_{}",
            self.corpus.as_str(),
            self.query_variant.as_str(),
            self.model_name
        )
    }

    pub fn run_path(&self, run_dir: &Path) -> PathBuf {
        run_dir.join(format!("run_{}.txt", self.run_tag()))
    }
}

/// Query text per topic id and variant. `short` and `long` always cover
/// the full topic key set; the pre-normalized maps exist only when topics
/// were normalized up front, and then cover the same key set too.
#[derive(Debug, Clone, Default)]
pub struct QueryMaps {
    pub short: BTreeMap<String, String>,
    pub long: BTreeMap<String, String>,
    pub short_normalized: Option<BTreeMap<String, String>>,
    pub long_normalized: Option<BTreeMap<String, String>>,
}

impl QueryMaps {
    /// Picks the query map for a configuration along with whether its text
    /// is already normalized. Raw-corpus configurations always search the
    /// raw text; normalized-corpus configurations prefer the pre-normalized
    /// map so query text is never normalized twice.
    fn select(&self, config: &RunConfiguration) -> (&BTreeMap<String, String>, bool) {
        match (config.corpus, config.query_variant) {
            (CorpusVariant::Raw, QueryVariant::Short) => (&self.short, false),
            (CorpusVariant::Raw, QueryVariant::Long) => (&self.long, false),
            (CorpusVariant::Normalized, QueryVariant::Short) => match &self.short_normalized {
                Some(map) => (map, true),
                None => (&self.short, false),
            },
            (CorpusVariant::Normalized, QueryVariant::Long) => match &self.long_normalized {
                Some(map) => (map, true),
                None => (&self.long, false),
            },
        }
    }
}

/// Terminal state of one configuration. `Failed` absorbs unrecoverable
/// collaborator errors from session open or model configuration; it never
/// propagates past the configuration that hit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigStatus {
    Completed,
    NoResults,
    Failed { stage: &'static str, reason: String },
}

impl ConfigStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::NoResults => "no_results",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug)]
pub struct ConfigExecution {
    pub status: ConfigStatus,
    pub counts: ConfigCounts,
    pub run_path: Option<PathBuf>,
}

/// Builds the configuration cross-product: available corpus variants ×
/// query variants × requested models. Unrecognized model names fall back
/// to the default model; a fallback that collides with an already-planned
/// run tag is dropped so no two configurations target the same run file.
pub fn build_configurations(
    raw_index: &Path,
    normalized_index: Option<&Path>,
    model_names: &[String],
) -> (Vec<RunConfiguration>, usize) {
    let mut variants = vec![(CorpusVariant::Raw, raw_index.to_path_buf())];
    if let Some(dir) = normalized_index {
        variants.push((CorpusVariant::Normalized, dir.to_path_buf()));
    }

    let mut configurations = Vec::new();
    let mut seen_tags = BTreeSet::<String>::new();
    let mut fallbacks = 0usize;

    for (corpus, index_dir) in &variants {
        for query_variant in [QueryVariant::Short, QueryVariant::Long] {
            for name in model_names {
                let (model, fallback) = RankingModel::resolve(name);
                if fallback {
                    fallbacks += 1;
                    warn!(
                        requested = %name,
                        fallback = %model.name(),
                        "unrecognized ranking model, using default"
                    );
                }

                let config = RunConfiguration {
                    corpus: *corpus,
                    query_variant,
                    model: model.clone(),
                    model_name: model.name(),
                    model_fallback: fallback,
                    index_dir: index_dir.clone(),
                };

                if !seen_tags.insert(config.run_tag()) {
                    warn!(run_tag = %config.run_tag(), "duplicate run tag, configuration dropped");
                    continue;
                }
                configurations.push(config);
            }
        }
    }

    (configurations, fallbacks)
}

/// Runs one configuration to its terminal state:
/// open session → configure model → query loop → flush.
///
/// The session lives exactly as long as this call and is dropped on
/// return, never pooled; the engine holds process-wide state and must not
/// see overlapping sessions. Per-query failures are isolated: they are
/// counted, the first few logged verbosely, and the loop always continues.
pub fn execute_configuration<E, N>(
    engine: &E,
    mut normalizer: Option<&mut N>,
    config: &RunConfiguration,
    queries: &QueryMaps,
    top_k: usize,
    run_dir: &Path,
) -> Result<ConfigExecution>
where
    E: SearchEngine,
    N: TextNormalizer,
{
    let run_tag = config.run_tag();
    let mut counts = ConfigCounts::default();

    let mut session = match engine.open_session(&config.index_dir) {
        Ok(session) => session,
        Err(err) => return Ok(failed("engine_open", err, counts)),
    };

    if let Err(err) = session.configure_model(&config.model) {
        return Ok(failed("model_configure", err, counts));
    }

    let (map, pre_normalized) = queries.select(config);
    let needs_query_norm = config.corpus == CorpusVariant::Normalized && !pre_normalized;

    counts.queries_total = map.len();
    let mut entries = Vec::<RunEntry>::new();

    for (query_id, text) in map {
        let query_text = match normalizer.as_mut() {
            Some(normalizer) if needs_query_norm => match normalizer.normalize(text) {
                Ok(normalized) => normalized,
                Err(err) => {
                    counts.normalization_failures += 1;
                    if counts.normalization_failures <= MAX_VERBOSE_QUERY_ERRORS {
                        warn!(
                            run_tag = %run_tag,
                            query_id = %query_id,
                            error = %err,
                            "query normalization failed"
                        );
                    }
                    continue;
                }
            },
            _ => text.clone(),
        };

        if query_text.trim().is_empty() {
            counts.queries_skipped_empty += 1;
            continue;
        }

        let hits = match session.search(&query_text, top_k) {
            Ok(hits) => hits,
            Err(err) => {
                counts.query_failures += 1;
                if counts.query_failures <= MAX_VERBOSE_QUERY_ERRORS {
                    warn!(
                        run_tag = %run_tag,
                        query_id = %query_id,
                        error = %err,
                        "search failed"
                    );
                }
                continue;
            }
        };

        counts.queries_searched += 1;
        let mut rank = 1usize;
        for hit in hits {
            let Some(doc_id) = hit.doc_id else {
                counts.null_doc_hits += 1;
                continue;
            };
            let Some(score) = hit.score else {
                counts.null_score_hits += 1;
                continue;
            };

            entries.push(RunEntry {
                query_id: query_id.clone(),
                doc_id,
                rank,
                score,
                run_tag: run_tag.clone(),
            });
            rank += 1;
        }
    }

    let run_path = config.run_path(run_dir);
    write_run_file(&run_path, &entries)?;
    counts.entries_written = entries.len();

    let status = if entries.is_empty() {
        warn!(run_tag = %run_tag, "configuration produced no results");
        ConfigStatus::NoResults
    } else {
        ConfigStatus::Completed
    };

    info!(
        run_tag = %run_tag,
        entries = counts.entries_written,
        searched = counts.queries_searched,
        skipped_empty = counts.queries_skipped_empty,
        failed = counts.query_failures,
        "configuration finished"
    );

    Ok(ConfigExecution {
        status,
        counts,
        run_path: Some(run_path),
    })
}

fn failed(stage: &'static str, err: anyhow::Error, counts: ConfigCounts) -> ConfigExecution {
    ConfigExecution {
        status: ConfigStatus::Failed {
            stage,
            reason: format!("{err:#}"),
        },
        counts,
        run_path: None,
    }
}
