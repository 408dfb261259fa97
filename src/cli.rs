use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "irbench",
    version,
    about = "Local ad-hoc retrieval experiment and evaluation tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Extract(ExtractArgs),
    Run(RunArgs),
    Eval(EvalArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    #[arg(long, default_value = ".cache/irbench")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub archive: PathBuf,

    #[arg(long, default_value = ".gz")]
    pub member_suffix: String,

    #[arg(long, default_value = "DOC")]
    pub record_tag: String,

    #[arg(long, default_value = "DOCNO")]
    pub id_tag: String,

    #[arg(long, default_value = "TEXT")]
    pub body_tag: String,

    #[arg(long)]
    pub raw_store_path: Option<PathBuf>,

    #[arg(long)]
    pub normalized_store_path: Option<PathBuf>,

    #[arg(long)]
    pub normalizer_cmd: Option<PathBuf>,

    #[arg(long)]
    pub extract_manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = ".cache/irbench")]
    pub cache_root: PathBuf,

    #[arg(long = "topics", required = true)]
    pub topic_paths: Vec<PathBuf>,

    #[arg(long)]
    pub engine_cmd: PathBuf,

    #[arg(long)]
    pub raw_index: PathBuf,

    #[arg(long)]
    pub normalized_index: Option<PathBuf>,

    #[arg(long = "model")]
    pub models: Vec<String>,

    #[arg(long, default_value_t = 1000)]
    pub top_k: usize,

    #[arg(long)]
    pub run_dir: Option<PathBuf>,

    #[arg(long)]
    pub normalizer_cmd: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub normalize_topics: bool,

    #[arg(long)]
    pub run_manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EvalArgs {
    #[arg(long, default_value = ".cache/irbench")]
    pub cache_root: PathBuf,

    #[arg(long = "qrels", required = true)]
    pub qrel_paths: Vec<PathBuf>,

    #[arg(long)]
    pub run_dir: Option<PathBuf>,

    #[arg(long = "run-file")]
    pub run_paths: Vec<PathBuf>,

    #[arg(long)]
    pub summary_csv_path: Option<PathBuf>,

    #[arg(long)]
    pub eval_manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/irbench")]
    pub cache_root: PathBuf,
}
