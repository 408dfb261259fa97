use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::cli::EvalArgs;
use crate::model::{EvalCounts, EvalPaths, EvalRunManifest, EvaluationRow, PivotRow, PivotTable};
use crate::qrels::Qrels;
use crate::runfile::{ParsedRun, parse_run_file};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

use super::metrics::{average_precision, mean, precision_at_10};

pub fn run(args: EvalArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("eval-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;

    let summary_csv_path = args
        .summary_csv_path
        .clone()
        .unwrap_or_else(|| cache_root.join("summary.csv"));
    let manifest_path = args.eval_manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!("eval_run_{}.json", utc_compact_string(started_ts)))
    });

    let run_paths = if args.run_paths.is_empty() {
        let run_dir = args.run_dir.clone().unwrap_or_else(|| cache_root.join("runs"));
        discover_run_files(&run_dir)?
    } else {
        args.run_paths.clone()
    };
    if run_paths.is_empty() {
        bail!("no run files to evaluate");
    }

    info!(run_id = %run_id, run_files = run_paths.len(), "starting evaluation");

    let qrels = Qrels::load(&args.qrel_paths);
    if qrels.is_empty() {
        bail!(
            "no judgments loaded from {} qrel file(s)",
            args.qrel_paths.len()
        );
    }

    let mut counts = EvalCounts {
        qrel_entries: qrels.entries_loaded,
        qrel_negatives_dropped: qrels.negatives_dropped,
        qrel_malformed_lines: qrels.malformed_lines,
        qrel_collisions: qrels.collisions,
        qrel_file_failures: qrels.file_failures,
        ..EvalCounts::default()
    };
    let mut warnings = Vec::<String>::new();
    if qrels.file_failures > 0 {
        warnings.push(format!(
            "{} judgment file(s) could not be read; the remaining files were merged",
            qrels.file_failures
        ));
    }
    let mut rows = Vec::<EvaluationRow>::new();

    for path in &run_paths {
        let parsed = match parse_run_file(path) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to read run file");
                counts.run_file_failures += 1;
                warnings.push(format!("run file {} could not be read", path.display()));
                continue;
            }
        };
        let run_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("run")
            .to_string();

        let row = score_run(&run_name, &parsed, &qrels);

        counts.run_files_evaluated += 1;
        counts.malformed_lines += row.malformed_lines;
        counts.scored_queries += row.scored_queries;
        counts.ignored_queries += row.ignored_queries;

        if row.scored_queries == 0 {
            warn!(run = %run_name, "run has no queries present in the judgments");
            warnings.push(format!(
                "run {} has no queries present in the judgments",
                run_name
            ));
        }

        info!(
            run = %run_name,
            map = row.map,
            p_at_10 = row.p_at_10,
            scored = row.scored_queries,
            ignored = row.ignored_queries,
            "scored run file"
        );

        rows.push(row);
    }

    if counts.run_files_evaluated == 0 {
        bail!("none of the {} run file(s) could be read", run_paths.len());
    }

    let map_pivot = build_pivot("map", &rows, |row| row.map);
    let p_at_10_pivot = build_pivot("p_at_10", &rows, |row| row.p_at_10);

    write_summary_csv(&summary_csv_path, &rows)?;
    info!(path = %summary_csv_path.display(), "wrote evaluation summary");

    let manifest = EvalRunManifest {
        manifest_version: 1,
        run_id,
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_eval_command(&args),
        paths: EvalPaths {
            cache_root: cache_root.display().to_string(),
            qrel_paths: args
                .qrel_paths
                .iter()
                .map(|path| path.display().to_string())
                .collect(),
            run_paths: run_paths
                .iter()
                .map(|path| path.display().to_string())
                .collect(),
            summary_csv_path: summary_csv_path.display().to_string(),
        },
        counts,
        results: rows,
        map_pivot,
        p_at_10_pivot,
        warnings,
        notes: vec![
            "A run query absent from the judgments is excluded from scoring; there is no ground truth for it."
                .to_string(),
        ],
    };

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote evaluation manifest");

    Ok(())
}

/// Scores one parsed run against the judgments: queries without judgments
/// are excluded and counted, the rest contribute AP and P@10 values whose
/// arithmetic means become the run's MAP and mean P@10.
pub fn score_run(run_name: &str, parsed: &ParsedRun, qrels: &Qrels) -> EvaluationRow {
    let tag = parsed
        .run_tag
        .clone()
        .unwrap_or_else(|| run_name.to_string());
    let (index_variant, query_type, weighting_scheme) = decompose_run_tag(&tag);

    let mut ap_values = Vec::<f64>::new();
    let mut p10_values = Vec::<f64>::new();
    let mut ignored = 0usize;

    for (query_id, ranked) in &parsed.rankings {
        let Some(judgments) = qrels.for_query(query_id) else {
            ignored += 1;
            continue;
        };
        ap_values.push(average_precision(ranked, judgments));
        p10_values.push(precision_at_10(ranked, judgments));
    }

    EvaluationRow {
        run_name: run_name.to_string(),
        index_variant,
        query_type,
        weighting_scheme,
        map: mean(&ap_values),
        p_at_10: mean(&p10_values),
        scored_queries: ap_values.len(),
        ignored_queries: ignored,
        malformed_lines: parsed.malformed_lines,
    }
}

/// Recovers (index variant, query type, weighting scheme) from a run tag
/// of the form `<corpus>_<query>_<model>`. A tag that does not decompose
/// is reported as unknown rather than dropped.
pub fn decompose_run_tag(tag: &str) -> (String, String, String) {
    let tag = tag.strip_prefix("run_").unwrap_or(tag);
    let mut parts = tag.splitn(3, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(corpus), Some(query), Some(model))
            if !corpus.is_empty() && !query.is_empty() && !model.is_empty() =>
        {
            (corpus.to_string(), query.to_string(), model.to_string())
        }
        _ => (
            "unknown".to_string(),
            "unknown".to_string(),
            "unknown".to_string(),
        ),
    }
}

/// Pivots one metric by (query type, weighting scheme) against index
/// variant.
pub fn build_pivot<F>(metric: &str, rows: &[EvaluationRow], value: F) -> PivotTable
where
    F: Fn(&EvaluationRow) -> f64,
{
    let mut index_variants: Vec<String> = rows.iter().map(|row| row.index_variant.clone()).collect();
    index_variants.sort();
    index_variants.dedup();

    let mut keys: Vec<(String, String)> = rows
        .iter()
        .map(|row| (row.query_type.clone(), row.weighting_scheme.clone()))
        .collect();
    keys.sort();
    keys.dedup();

    let pivot_rows = keys
        .into_iter()
        .map(|(query_type, weighting_scheme)| {
            let values = index_variants
                .iter()
                .map(|variant| {
                    rows.iter()
                        .find(|row| {
                            row.index_variant == *variant
                                && row.query_type == query_type
                                && row.weighting_scheme == weighting_scheme
                        })
                        .map(&value)
                })
                .collect();
            PivotRow {
                query_type,
                weighting_scheme,
                values,
            }
        })
        .collect();

    PivotTable {
        metric: metric.to_string(),
        index_variants,
        rows: pivot_rows,
    }
}

pub fn write_summary_csv(path: &Path, rows: &[EvaluationRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let mut out = String::from("run_name,index_variant,query_type,weighting_scheme,map,p_at_10\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{:.4},{:.4}\n",
            row.run_name, row.index_variant, row.query_type, row.weighting_scheme, row.map, row.p_at_10
        ));
    }

    fs::write(path, out).with_context(|| format!("failed to write summary csv: {}", path.display()))
}

fn discover_run_files(run_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(run_dir)
        .with_context(|| format!("failed to read run directory: {}", run_dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", run_dir.display()))?;
        let path = entry.path();

        let is_run_file = entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("txt"))
                .unwrap_or(false);

        if is_run_file {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

fn render_eval_command(args: &EvalArgs) -> String {
    let mut command = vec![
        "irbench".to_string(),
        "eval".to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
    ];

    for path in &args.qrel_paths {
        command.push("--qrels".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.run_dir {
        command.push("--run-dir".to_string());
        command.push(path.display().to_string());
    }
    for path in &args.run_paths {
        command.push("--run-file".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.summary_csv_path {
        command.push("--summary-csv-path".to_string());
        command.push(path.display().to_string());
    }

    command.join(" ")
}
