use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::extract::count_store_records;

pub fn run(args: StatusArgs) -> Result<()> {
    let corpus_dir = args.cache_root.join("corpus");
    let run_dir = args.cache_root.join("runs");
    let manifest_dir = args.cache_root.join("manifests");
    let summary_path = args.cache_root.join("summary.csv");

    info!(cache_root = %args.cache_root.display(), "status requested");

    for store in ["corpus_raw.jsonl", "corpus_norm.jsonl"] {
        let path = corpus_dir.join(store);
        if path.exists() {
            let records = count_store_records(&path)?;
            info!(path = %path.display(), records, "corpus store");
        } else {
            warn!(path = %path.display(), "corpus store missing");
        }
    }

    match list_files_with_extension(&run_dir, "txt")? {
        Some(run_files) => {
            info!(
                run_dir = %run_dir.display(),
                run_files = run_files.len(),
                "run files present"
            );
            for name in run_files {
                info!(run = %name, "run file");
            }
        }
        None => warn!(run_dir = %run_dir.display(), "run directory missing"),
    }

    match list_files_with_extension(&manifest_dir, "json")? {
        Some(manifests) => {
            info!(
                manifest_dir = %manifest_dir.display(),
                manifests = manifests.len(),
                "manifests present"
            );
        }
        None => warn!(manifest_dir = %manifest_dir.display(), "manifest directory missing"),
    }

    if summary_path.exists() {
        let lines = fs::read_to_string(&summary_path)
            .with_context(|| format!("failed to read {}", summary_path.display()))?
            .lines()
            .count();
        info!(
            path = %summary_path.display(),
            result_rows = lines.saturating_sub(1),
            "evaluation summary"
        );
    } else {
        warn!(path = %summary_path.display(), "evaluation summary missing");
    }

    Ok(())
}

fn list_files_with_extension(dir: &Path, extension: &str) -> Result<Option<Vec<String>>> {
    if !dir.exists() {
        return Ok(None);
    }

    let entries = fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();

        let matches = entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(extension))
                .unwrap_or(false);

        if matches && let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            names.push(name.to_string());
        }
    }

    names.sort();
    Ok(Some(names))
}
