use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cli::ExtractArgs;
use crate::engine::{CommandNormalizer, collect_tool_versions};
use crate::model::{ExtractCounts, ExtractPaths, ExtractRunManifest};
use crate::util::{ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty};

use super::archive::walk_archive;
use super::corpus::{
    CorpusWriter, MAX_VERBOSE_NORMALIZATION_ERRORS, append_normalized, verify_store_parity,
};
use super::records::{RecordScanner, ScanCounts, ScanRules};

pub fn run(args: ExtractArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("extract-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    let corpus_dir = cache_root.join("corpus");
    ensure_directory(&manifest_dir)?;
    ensure_directory(&corpus_dir)?;

    let raw_store_path = args
        .raw_store_path
        .clone()
        .unwrap_or_else(|| corpus_dir.join("corpus_raw.jsonl"));
    let normalized_store_path = match (&args.normalized_store_path, &args.normalizer_cmd) {
        (Some(path), Some(_)) => Some(path.clone()),
        (None, Some(_)) => Some(corpus_dir.join("corpus_norm.jsonl")),
        (Some(path), None) => {
            warn!(path = %path.display(), "--normalized-store-path ignored without --normalizer-cmd");
            None
        }
        (None, None) => None,
    };
    let manifest_path = args.extract_manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!("extract_run_{}.json", utc_compact_string(started_ts)))
    });

    info!(archive = %args.archive.display(), run_id = %run_id, "starting extract");

    let archive_sha256 = sha256_file(&args.archive)?;
    let tool_versions = collect_tool_versions(None, args.normalizer_cmd.as_deref())?;

    let scanner = RecordScanner::new(&ScanRules {
        record_tag: args.record_tag.clone(),
        id_tag: args.id_tag.clone(),
        body_tag: args.body_tag.clone(),
    })?;

    let mut normalizer = match &args.normalizer_cmd {
        Some(program) => Some(CommandNormalizer::spawn(program)?),
        None => None,
    };

    let mut raw_writer = CorpusWriter::create(&raw_store_path)?;
    let mut normalized_writer = match &normalized_store_path {
        Some(path) => Some(CorpusWriter::create(path)?),
        None => None,
    };

    let mut scan_counts = ScanCounts::default();
    let mut normalization_failed_ids = Vec::<String>::new();

    // Records stream straight from the archive walk into the store writers;
    // the collection is never held in memory.
    let archive_counts = walk_archive(&args.archive, &args.member_suffix, |member| {
        debug!(member = %member.name, "scanning member");
        scanner.scan(&member.text, &mut scan_counts, |record| {
            raw_writer.append(&record)?;
            if let (Some(writer), Some(normalizer)) =
                (normalized_writer.as_mut(), normalizer.as_mut())
            {
                append_normalized(writer, normalizer, &record, &mut normalization_failed_ids)?;
            }
            Ok(())
        })
    })?;

    let records_written = raw_writer.finish()?;
    let normalized_records_written = match normalized_writer {
        Some(writer) => writer.finish()?,
        None => 0,
    };

    if let Some(path) = &normalized_store_path {
        verify_store_parity(&raw_store_path, path)?;
        info!(
            raw = %raw_store_path.display(),
            normalized = %path.display(),
            "corpus stores agree on record ids"
        );
    }

    let mut warnings = Vec::<String>::new();
    if archive_counts.decompress_fallbacks > 0 {
        warnings.push(format!(
            "{} members lacked a gzip stream and were decoded as raw bytes",
            archive_counts.decompress_fallbacks
        ));
    }
    if archive_counts.decompress_failures > 0 {
        warnings.push(format!(
            "{} members failed to decompress and were skipped",
            archive_counts.decompress_failures
        ));
    }
    if scan_counts.blocks_dropped_missing_id > 0 {
        warnings.push(format!(
            "{} blocks were dropped for a missing identifier",
            scan_counts.blocks_dropped_missing_id
        ));
    }
    let normalization_failures = normalization_failed_ids.len();
    if normalization_failures > 0 {
        let sample = normalization_failed_ids
            .iter()
            .take(MAX_VERBOSE_NORMALIZATION_ERRORS)
            .cloned()
            .collect::<Vec<String>>()
            .join(", ");
        warnings.push(format!(
            "{} records failed normalization and were stored with empty contents (first: {})",
            normalization_failures, sample
        ));
    }

    let status = if records_written == 0 {
        warn!(archive = %args.archive.display(), "archive produced no records");
        warnings.push("archive produced no records where records were expected".to_string());
        "no_records".to_string()
    } else {
        "completed".to_string()
    };

    let manifest = ExtractRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        status,
        started_at,
        updated_at: now_utc_string(),
        command: render_extract_command(&args),
        archive_sha256,
        tool_versions,
        paths: ExtractPaths {
            cache_root: cache_root.display().to_string(),
            archive_path: args.archive.display().to_string(),
            raw_store_path: raw_store_path.display().to_string(),
            normalized_store_path: normalized_store_path
                .as_ref()
                .map(|path| path.display().to_string()),
        },
        counts: ExtractCounts {
            members_seen: archive_counts.members_seen,
            members_matched: archive_counts.members_matched,
            members_skipped: archive_counts.members_skipped,
            decompress_fallbacks: archive_counts.decompress_fallbacks,
            decompress_failures: archive_counts.decompress_failures,
            blocks_seen: scan_counts.blocks_seen,
            blocks_dropped_missing_id: scan_counts.blocks_dropped_missing_id,
            empty_bodies: scan_counts.empty_bodies,
            records_written,
            normalized_records_written,
            normalization_failures,
        },
        warnings,
        notes: vec![
            "Corpus stores are flushed and closed before any index build may read them."
                .to_string(),
        ],
    };

    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote extract run manifest");
    info!(
        members = archive_counts.members_matched,
        records = records_written,
        dropped = scan_counts.blocks_dropped_missing_id,
        "extract completed"
    );

    Ok(())
}

fn render_extract_command(args: &ExtractArgs) -> String {
    let mut command = vec![
        "irbench".to_string(),
        "extract".to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
        "--archive".to_string(),
        args.archive.display().to_string(),
        "--member-suffix".to_string(),
        args.member_suffix.clone(),
        "--record-tag".to_string(),
        args.record_tag.clone(),
        "--id-tag".to_string(),
        args.id_tag.clone(),
        "--body-tag".to_string(),
        args.body_tag.clone(),
    ];

    if let Some(path) = &args.raw_store_path {
        command.push("--raw-store-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.normalized_store_path {
        command.push("--normalized-store-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.normalizer_cmd {
        command.push("--normalizer-cmd".to_string());
        command.push(path.display().to_string());
    }

    command.join(" ")
}
