use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use super::orchestrate::{
    ConfigStatus, CorpusVariant, QueryMaps, RunConfiguration, build_configurations,
    execute_configuration,
};
use crate::engine::{RankingModel, SearchEngine, SearchHit, SearchSession, TextNormalizer};
use crate::runfile::parse_run_file;
use crate::topics::QueryVariant;

#[derive(Debug, Default, Clone)]
struct FakeEngine {
    hits: BTreeMap<String, Vec<SearchHit>>,
    fail_queries: BTreeSet<String>,
    fail_open: bool,
    fail_configure: bool,
}

struct FakeSession {
    hits: BTreeMap<String, Vec<SearchHit>>,
    fail_queries: BTreeSet<String>,
    fail_configure: bool,
}

impl SearchEngine for FakeEngine {
    type Session = FakeSession;

    fn open_session(&self, _index_dir: &Path) -> Result<FakeSession> {
        if self.fail_open {
            bail!("index unavailable");
        }
        Ok(FakeSession {
            hits: self.hits.clone(),
            fail_queries: self.fail_queries.clone(),
            fail_configure: self.fail_configure,
        })
    }
}

impl SearchSession for FakeSession {
    fn configure_model(&mut self, _model: &RankingModel) -> Result<()> {
        if self.fail_configure {
            bail!("requested model missing from engine build");
        }
        Ok(())
    }

    fn search(&mut self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if self.fail_queries.contains(query) {
            bail!("native runtime error");
        }
        Ok(self
            .hits
            .get(query)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .take(k)
            .collect())
    }
}

struct LowercaseNormalizer;

impl TextNormalizer for LowercaseNormalizer {
    fn normalize(&mut self, text: &str) -> Result<String> {
        Ok(text.to_ascii_lowercase())
    }
}

struct StopStrippingNormalizer;

impl TextNormalizer for StopStrippingNormalizer {
    fn normalize(&mut self, text: &str) -> Result<String> {
        Ok(text
            .split_whitespace()
            .filter(|word| !word.eq_ignore_ascii_case("the"))
            .map(|word| word.to_ascii_lowercase())
            .collect::<Vec<String>>()
            .join(" "))
    }
}

#[derive(Default)]
struct CountingNormalizer {
    calls: usize,
}

impl TextNormalizer for CountingNormalizer {
    fn normalize(&mut self, text: &str) -> Result<String> {
        self.calls += 1;
        Ok(text.to_ascii_lowercase())
    }
}

fn hit(doc_id: &str, score: f64) -> SearchHit {
    SearchHit {
        doc_id: Some(doc_id.to_string()),
        score: Some(score),
    }
}

fn config(corpus: CorpusVariant, variant: QueryVariant, model_name: &str) -> RunConfiguration {
    let (model, fallback) = RankingModel::resolve(model_name);
    let resolved_name = model.name();
    RunConfiguration {
        corpus,
        query_variant: variant,
        model,
        model_name: resolved_name,
        model_fallback: fallback,
        index_dir: PathBuf::from("index"),
    }
}

fn short_queries(pairs: &[(&str, &str)]) -> QueryMaps {
    let map: BTreeMap<String, String> = pairs
        .iter()
        .map(|(id, text)| (id.to_string(), text.to_string()))
        .collect();
    QueryMaps {
        short: map.clone(),
        long: map,
        short_normalized: None,
        long_normalized: None,
    }
}

#[test]
fn writes_run_file_with_increasing_ranks_and_deterministic_tag() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = FakeEngine::default();
    engine
        .hits
        .insert("alpha".to_string(), vec![hit("d1", 2.0), hit("d2", 1.5)]);

    let config = config(CorpusVariant::Raw, QueryVariant::Short, "bm25");
    let queries = short_queries(&[("Q1", "alpha")]);

    let execution = execute_configuration::<_, LowercaseNormalizer>(
        &engine,
        None,
        &config,
        &queries,
        10,
        dir.path(),
    )
    .unwrap();

    assert_eq!(execution.status, ConfigStatus::Completed);
    assert_eq!(execution.counts.entries_written, 2);

    let run_path = dir.path().join("run_raw_short_bm25.txt");
    assert_eq!(execution.run_path.as_deref(), Some(run_path.as_path()));

    let contents = std::fs::read_to_string(&run_path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines[0], "Q1 Q0 d1 1 2.000000 raw_short_bm25");
    assert_eq!(lines[1], "Q1 Q0 d2 2 1.500000 raw_short_bm25");
}

#[test]
fn rerunning_the_same_configuration_targets_the_same_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = FakeEngine::default();
    engine.hits.insert("alpha".to_string(), vec![hit("d1", 1.0)]);

    let config = config(CorpusVariant::Raw, QueryVariant::Long, "ql");
    let queries = short_queries(&[("Q1", "alpha")]);

    let first = execute_configuration::<_, LowercaseNormalizer>(
        &engine,
        None,
        &config,
        &queries,
        10,
        dir.path(),
    )
    .unwrap();
    let second = execute_configuration::<_, LowercaseNormalizer>(
        &engine,
        None,
        &config,
        &queries,
        10,
        dir.path(),
    )
    .unwrap();

    assert_eq!(config.run_tag(), "raw_long_ql");
    assert_eq!(first.run_path, second.run_path);

    let parsed = parse_run_file(first.run_path.as_deref().unwrap()).unwrap();
    assert_eq!(parsed.rankings["Q1"].len(), 1);
}

#[test]
fn hits_without_doc_id_or_score_are_dropped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = FakeEngine::default();
    engine.hits.insert(
        "alpha".to_string(),
        vec![
            hit("d1", 3.0),
            SearchHit {
                doc_id: None,
                score: Some(2.5),
            },
            SearchHit {
                doc_id: Some("d3".to_string()),
                score: None,
            },
            hit("d4", 2.0),
        ],
    );

    let config = config(CorpusVariant::Raw, QueryVariant::Short, "bm25");
    let queries = short_queries(&[("Q1", "alpha")]);

    let execution = execute_configuration::<_, LowercaseNormalizer>(
        &engine,
        None,
        &config,
        &queries,
        10,
        dir.path(),
    )
    .unwrap();

    assert_eq!(execution.counts.null_doc_hits, 1);
    assert_eq!(execution.counts.null_score_hits, 1);
    assert_eq!(execution.counts.entries_written, 2);

    let parsed = parse_run_file(execution.run_path.as_deref().unwrap()).unwrap();
    assert_eq!(
        parsed.rankings["Q1"],
        vec![("d1".to_string(), 3.0), ("d4".to_string(), 2.0)]
    );
}

#[test]
fn one_failing_query_leaves_the_other_queries_scored() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = FakeEngine::default();
    engine.hits.insert("alpha".to_string(), vec![hit("d1", 1.0)]);
    engine.hits.insert("gamma".to_string(), vec![hit("d2", 1.0)]);
    engine.fail_queries.insert("boom".to_string());

    let config = config(CorpusVariant::Raw, QueryVariant::Short, "bm25");
    let queries = short_queries(&[("Q1", "alpha"), ("Q2", "boom"), ("Q3", "gamma")]);

    let execution = execute_configuration::<_, LowercaseNormalizer>(
        &engine,
        None,
        &config,
        &queries,
        10,
        dir.path(),
    )
    .unwrap();

    assert_eq!(execution.status, ConfigStatus::Completed);
    assert_eq!(execution.counts.queries_total, 3);
    assert_eq!(execution.counts.query_failures, 1);
    assert_eq!(execution.counts.queries_searched, 2);

    let parsed = parse_run_file(execution.run_path.as_deref().unwrap()).unwrap();
    assert!(parsed.rankings.contains_key("Q1"));
    assert!(!parsed.rankings.contains_key("Q2"));
    assert!(parsed.rankings.contains_key("Q3"));
}

#[test]
fn queries_empty_after_normalization_are_skipped_not_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = FakeEngine::default();
    engine
        .hits
        .insert("real query".to_string(), vec![hit("d1", 1.0)]);

    let config = config(CorpusVariant::Normalized, QueryVariant::Short, "bm25");
    let queries = short_queries(&[("Q1", "The THE"), ("Q2", "Real Query")]);
    let mut normalizer = StopStrippingNormalizer;

    let execution =
        execute_configuration(&engine, Some(&mut normalizer), &config, &queries, 10, dir.path())
            .unwrap();

    assert_eq!(execution.counts.queries_skipped_empty, 1);
    assert_eq!(execution.counts.queries_searched, 1);

    let parsed = parse_run_file(execution.run_path.as_deref().unwrap()).unwrap();
    assert!(parsed.rankings.contains_key("Q2"));
}

#[test]
fn pre_normalized_queries_are_not_normalized_twice() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = FakeEngine::default();
    engine.hits.insert("already".to_string(), vec![hit("d1", 1.0)]);

    let config = config(CorpusVariant::Normalized, QueryVariant::Short, "bm25");
    let mut queries = short_queries(&[("Q1", "ALREADY")]);
    queries.short_normalized = Some(
        [("Q1".to_string(), "already".to_string())]
            .into_iter()
            .collect(),
    );

    let mut normalizer = CountingNormalizer::default();
    let execution =
        execute_configuration(&engine, Some(&mut normalizer), &config, &queries, 10, dir.path())
            .unwrap();

    assert_eq!(normalizer.calls, 0);
    assert_eq!(execution.counts.entries_written, 1);
}

#[test]
fn raw_corpus_configurations_search_raw_query_text() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = FakeEngine::default();
    engine.hits.insert("Mixed Case".to_string(), vec![hit("d1", 1.0)]);

    let config = config(CorpusVariant::Raw, QueryVariant::Short, "bm25");
    let queries = short_queries(&[("Q1", "Mixed Case")]);

    let mut normalizer = CountingNormalizer::default();
    let execution =
        execute_configuration(&engine, Some(&mut normalizer), &config, &queries, 10, dir.path())
            .unwrap();

    assert_eq!(normalizer.calls, 0);
    assert_eq!(execution.counts.entries_written, 1);
}

#[test]
fn failed_model_configuration_is_contained_to_one_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let broken = FakeEngine {
        fail_configure: true,
        ..FakeEngine::default()
    };
    let mut working = FakeEngine::default();
    working.hits.insert("alpha".to_string(), vec![hit("d1", 1.0)]);

    let config_a = config(CorpusVariant::Raw, QueryVariant::Short, "ql-rm3");
    let config_b = config(CorpusVariant::Raw, QueryVariant::Short, "bm25");
    let queries = short_queries(&[("Q1", "alpha")]);

    let failed = execute_configuration::<_, LowercaseNormalizer>(
        &broken,
        None,
        &config_a,
        &queries,
        10,
        dir.path(),
    )
    .unwrap();
    assert!(matches!(
        failed.status,
        ConfigStatus::Failed {
            stage: "model_configure",
            ..
        }
    ));
    assert!(failed.run_path.is_none());

    let completed = execute_configuration::<_, LowercaseNormalizer>(
        &working,
        None,
        &config_b,
        &queries,
        10,
        dir.path(),
    )
    .unwrap();
    assert_eq!(completed.status, ConfigStatus::Completed);
}

#[test]
fn failed_session_open_reports_the_engine_open_stage() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine {
        fail_open: true,
        ..FakeEngine::default()
    };

    let config = config(CorpusVariant::Raw, QueryVariant::Short, "bm25");
    let queries = short_queries(&[("Q1", "alpha")]);

    let execution = execute_configuration::<_, LowercaseNormalizer>(
        &engine,
        None,
        &config,
        &queries,
        10,
        dir.path(),
    )
    .unwrap();

    assert!(matches!(
        execution.status,
        ConfigStatus::Failed {
            stage: "engine_open",
            ..
        }
    ));
}

#[test]
fn zero_entries_surface_a_no_results_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::default();

    let config = config(CorpusVariant::Raw, QueryVariant::Short, "bm25");
    let queries = short_queries(&[("Q1", "alpha")]);

    let execution = execute_configuration::<_, LowercaseNormalizer>(
        &engine,
        None,
        &config,
        &queries,
        10,
        dir.path(),
    )
    .unwrap();

    assert_eq!(execution.status, ConfigStatus::NoResults);

    let run_path = execution.run_path.unwrap();
    assert!(run_path.exists());
    assert_eq!(std::fs::read_to_string(run_path).unwrap(), "");
}

#[test]
fn build_configurations_crosses_variants_queries_and_models() {
    let raw = PathBuf::from("raw-index");
    let norm = PathBuf::from("norm-index");
    let models: Vec<String> = ["bm25", "ql", "tfidf", "bm25-rm3", "ql-rm3"]
        .into_iter()
        .map(str::to_string)
        .collect();

    let (configurations, fallbacks) = build_configurations(&raw, Some(&norm), &models);
    assert_eq!(configurations.len(), 20);
    assert_eq!(fallbacks, 0);

    let tags: BTreeSet<String> = configurations.iter().map(|c| c.run_tag()).collect();
    assert_eq!(tags.len(), 20);
    assert!(tags.contains("norm_long_bm25-rm3"));
}

#[test]
fn fallback_models_never_duplicate_a_run_tag() {
    let raw = PathBuf::from("raw-index");
    let models: Vec<String> = ["bm25", "mystery-model"]
        .into_iter()
        .map(str::to_string)
        .collect();

    let (configurations, fallbacks) = build_configurations(&raw, None, &models);
    assert_eq!(fallbacks, 2);
    assert_eq!(configurations.len(), 2);
    assert!(configurations.iter().all(|c| c.model_name == "bm25"));
}

#[test]
fn normalizer_contract_is_idempotent() {
    let mut normalizer = StopStrippingNormalizer;
    let once = normalizer.normalize("The Quick The Brown Fox").unwrap();
    let twice = normalizer.normalize(&once).unwrap();
    assert_eq!(once, twice);

    let mut lowercase = LowercaseNormalizer;
    let once = lowercase.normalize("MiXeD CaSe").unwrap();
    let twice = lowercase.normalize(&once).unwrap();
    assert_eq!(once, twice);
}
