use std::collections::BTreeMap;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::engine::{
    CommandEngine, CommandNormalizer, TextNormalizer, collect_tool_versions, default_model_names,
};
use crate::model::{ConfigReport, RunBatchManifest, RunBatchPaths};
use crate::topics::{QueryVariant, TopicParser};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

use super::orchestrate::{ConfigStatus, QueryMaps, build_configurations, execute_configuration};

pub fn run(args: RunArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    let run_dir = args.run_dir.clone().unwrap_or_else(|| cache_root.join("runs"));
    ensure_directory(&manifest_dir)?;
    ensure_directory(&run_dir)?;

    let manifest_path = args.run_manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!("run_batch_{}.json", utc_compact_string(started_ts)))
    });

    info!(run_id = %run_id, run_dir = %run_dir.display(), "starting run batch");

    let parser = TopicParser::new()?;
    let topic_set = parser.parse_files(&args.topic_paths);
    if topic_set.is_empty() {
        bail!(
            "no usable topics parsed from {} topic file(s)",
            args.topic_paths.len()
        );
    }
    info!(
        topics = topic_set.len(),
        collisions = topic_set.collisions,
        dropped = topic_set.dropped,
        file_failures = topic_set.file_failures,
        "merged topic files"
    );

    let engine = CommandEngine::new(args.engine_cmd.clone());
    let tool_versions = collect_tool_versions(Some(&engine), args.normalizer_cmd.as_deref())?;

    let mut normalizer = match &args.normalizer_cmd {
        Some(program) => Some(CommandNormalizer::spawn(program)?),
        None => None,
    };

    let mut warnings = Vec::<String>::new();
    if topic_set.file_failures > 0 {
        warnings.push(format!(
            "{} topic file(s) could not be read; the remaining files were merged",
            topic_set.file_failures
        ));
    }
    let mut queries = QueryMaps {
        short: topic_set.query_map(QueryVariant::Short),
        long: topic_set.query_map(QueryVariant::Long),
        short_normalized: None,
        long_normalized: None,
    };

    if args.normalize_topics {
        match normalizer.as_mut() {
            Some(normalizer) => {
                queries.short_normalized = Some(normalize_query_map(
                    &queries.short,
                    &mut *normalizer,
                    &mut warnings,
                )?);
                queries.long_normalized = Some(normalize_query_map(
                    &queries.long,
                    &mut *normalizer,
                    &mut warnings,
                )?);
            }
            None => {
                warn!("--normalize-topics requires --normalizer-cmd; topics left unnormalized");
                warnings
                    .push("--normalize-topics requested without --normalizer-cmd".to_string());
            }
        }
    }

    let model_names = if args.models.is_empty() {
        default_model_names()
    } else {
        args.models.clone()
    };

    let (configurations, model_fallbacks) = build_configurations(
        &args.raw_index,
        args.normalized_index.as_deref(),
        &model_names,
    );

    if args.normalized_index.is_some()
        && normalizer.is_none()
        && queries.short_normalized.is_none()
    {
        warn!("normalized-corpus configurations will search raw query text");
        warnings.push(
            "no normalizer available: normalized-corpus configurations searched raw query text"
                .to_string(),
        );
    }

    let mut reports = Vec::<ConfigReport>::new();
    // One configuration at a time, start to finish. The engine holds
    // process-wide native state; overlapping sessions corrupt it.
    for config in &configurations {
        let execution = execute_configuration(
            &engine,
            normalizer.as_mut(),
            config,
            &queries,
            args.top_k,
            &run_dir,
        )?;

        let (failure_stage, failure_reason) = match &execution.status {
            ConfigStatus::Failed { stage, reason } => {
                warn!(
                    run_tag = %config.run_tag(),
                    stage = %stage,
                    reason = %reason,
                    "configuration failed"
                );
                warnings.push(format!(
                    "configuration {} failed during {}: {}",
                    config.run_tag(),
                    stage,
                    reason
                ));
                (Some(stage.to_string()), Some(reason.clone()))
            }
            _ => (None, None),
        };

        reports.push(ConfigReport {
            run_tag: config.run_tag(),
            corpus_variant: config.corpus.as_str().to_string(),
            query_variant: config.query_variant.as_str().to_string(),
            model: config.model_name.clone(),
            model_fallback: config.model_fallback,
            status: execution.status.as_str().to_string(),
            failure_stage,
            failure_reason,
            run_path: execution
                .run_path
                .as_ref()
                .map(|path| path.display().to_string()),
            counts: execution.counts,
        });
    }

    let completed = reports.iter().filter(|r| r.status == "completed").count();
    let no_results = reports.iter().filter(|r| r.status == "no_results").count();
    let failed = reports.iter().filter(|r| r.status == "failed").count();

    let status = if !reports.is_empty() && failed == reports.len() {
        "failed".to_string()
    } else {
        "completed".to_string()
    };

    let manifest = RunBatchManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        status,
        started_at,
        updated_at: now_utc_string(),
        command: render_run_command(&args),
        tool_versions,
        paths: RunBatchPaths {
            cache_root: cache_root.display().to_string(),
            run_dir: run_dir.display().to_string(),
            topic_paths: args
                .topic_paths
                .iter()
                .map(|path| path.display().to_string())
                .collect(),
            raw_index: args.raw_index.display().to_string(),
            normalized_index: args
                .normalized_index
                .as_ref()
                .map(|path| path.display().to_string()),
        },
        topics_total: topic_set.len(),
        topic_collisions: topic_set.collisions,
        topics_dropped: topic_set.dropped,
        topic_file_failures: topic_set.file_failures,
        model_fallbacks,
        configurations_total: reports.len(),
        configurations_completed: completed,
        configurations_no_results: no_results,
        configurations_failed: failed,
        configurations: reports,
        warnings,
        notes: vec![
            "Configurations execute strictly sequentially; the engine never sees two sessions at once."
                .to_string(),
        ],
    };

    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote run batch manifest");
    info!(
        configurations = manifest.configurations_total,
        completed,
        no_results,
        failed,
        "run batch finished"
    );

    Ok(())
}

/// Pre-normalizes a query map while preserving its key set exactly; a
/// per-query normalization failure keeps the original text so the topic
/// still participates in every configuration.
fn normalize_query_map<N: TextNormalizer>(
    map: &BTreeMap<String, String>,
    normalizer: &mut N,
    warnings: &mut Vec<String>,
) -> Result<BTreeMap<String, String>> {
    let mut normalized = BTreeMap::new();
    for (query_id, text) in map {
        let value = match normalizer.normalize(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(query_id = %query_id, error = %err, "topic normalization failed");
                warnings.push(format!("topic {} failed normalization", query_id));
                text.clone()
            }
        };
        normalized.insert(query_id.clone(), value);
    }

    Ok(normalized)
}

fn render_run_command(args: &RunArgs) -> String {
    let mut command = vec![
        "irbench".to_string(),
        "run".to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
        "--engine-cmd".to_string(),
        args.engine_cmd.display().to_string(),
        "--raw-index".to_string(),
        args.raw_index.display().to_string(),
        "--top-k".to_string(),
        args.top_k.to_string(),
    ];

    for path in &args.topic_paths {
        command.push("--topics".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.normalized_index {
        command.push("--normalized-index".to_string());
        command.push(path.display().to_string());
    }
    for model in &args.models {
        command.push("--model".to_string());
        command.push(model.clone());
    }
    if let Some(path) = &args.run_dir {
        command.push("--run-dir".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.normalizer_cmd {
        command.push("--normalizer-cmd".to_string());
        command.push(path.display().to_string());
    }
    if args.normalize_topics {
        command.push("--normalize-topics".to_string());
    }

    command.join(" ")
}
