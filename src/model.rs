use serde::{Deserialize, Serialize};

/// One document extracted from the collection, unique `id` per store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub contents: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractCounts {
    pub members_seen: usize,
    pub members_matched: usize,
    pub members_skipped: usize,
    pub decompress_fallbacks: usize,
    pub decompress_failures: usize,
    pub blocks_seen: usize,
    pub blocks_dropped_missing_id: usize,
    pub empty_bodies: usize,
    pub records_written: usize,
    pub normalized_records_written: usize,
    pub normalization_failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractPaths {
    pub cache_root: String,
    pub archive_path: String,
    pub raw_store_path: String,
    pub normalized_store_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolVersions {
    pub rustc: String,
    pub cargo: String,
    pub engine: Option<String>,
    pub normalizer: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub archive_sha256: String,
    pub tool_versions: ToolVersions,
    pub paths: ExtractPaths,
    pub counts: ExtractCounts,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigCounts {
    pub queries_total: usize,
    pub queries_searched: usize,
    pub queries_skipped_empty: usize,
    pub query_failures: usize,
    pub normalization_failures: usize,
    pub null_doc_hits: usize,
    pub null_score_hits: usize,
    pub entries_written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigReport {
    pub run_tag: String,
    pub corpus_variant: String,
    pub query_variant: String,
    pub model: String,
    pub model_fallback: bool,
    pub status: String,
    pub failure_stage: Option<String>,
    pub failure_reason: Option<String>,
    pub run_path: Option<String>,
    pub counts: ConfigCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunBatchPaths {
    pub cache_root: String,
    pub run_dir: String,
    pub topic_paths: Vec<String>,
    pub raw_index: String,
    pub normalized_index: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunBatchManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub tool_versions: ToolVersions,
    pub paths: RunBatchPaths,
    pub topics_total: usize,
    pub topic_collisions: usize,
    pub topics_dropped: usize,
    pub topic_file_failures: usize,
    pub model_fallbacks: usize,
    pub configurations_total: usize,
    pub configurations_completed: usize,
    pub configurations_no_results: usize,
    pub configurations_failed: usize,
    pub configurations: Vec<ConfigReport>,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalCounts {
    pub run_files_evaluated: usize,
    pub run_file_failures: usize,
    pub malformed_lines: usize,
    pub scored_queries: usize,
    pub ignored_queries: usize,
    pub qrel_entries: usize,
    pub qrel_negatives_dropped: usize,
    pub qrel_malformed_lines: usize,
    pub qrel_collisions: usize,
    pub qrel_file_failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRow {
    pub run_name: String,
    pub index_variant: String,
    pub query_type: String,
    pub weighting_scheme: String,
    pub map: f64,
    pub p_at_10: f64,
    pub scored_queries: usize,
    pub ignored_queries: usize,
    pub malformed_lines: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PivotRow {
    pub query_type: String,
    pub weighting_scheme: String,
    pub values: Vec<Option<f64>>,
}

/// MAP or P@10 pivoted by (query type, weighting scheme) against index
/// variant; a missing cell means no run file covered that combination.
#[derive(Debug, Clone, Serialize)]
pub struct PivotTable {
    pub metric: String,
    pub index_variants: Vec<String>,
    pub rows: Vec<PivotRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalPaths {
    pub cache_root: String,
    pub qrel_paths: Vec<String>,
    pub run_paths: Vec<String>,
    pub summary_csv_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub paths: EvalPaths,
    pub counts: EvalCounts,
    pub results: Vec<EvaluationRow>,
    pub map_pivot: PivotTable,
    pub p_at_10_pivot: PivotTable,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}
