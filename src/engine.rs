use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::model::ToolVersions;
use crate::util::collapse_whitespace;

// Fixed ranking parameters. Every run embeds these explicitly; nothing is
// read from ambient state.
pub const BM25_K1: f64 = 0.9;
pub const BM25_B: f64 = 0.4;
pub const DIRICHLET_MU: f64 = 1000.0;
pub const RM3_FB_DOCS: usize = 10;
pub const RM3_FB_TERMS: usize = 10;
pub const RM3_ORIG_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightingScheme {
    Bm25,
    QueryLikelihood,
    Tfidf,
}

impl WeightingScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bm25 => "bm25",
            Self::QueryLikelihood => "ql",
            Self::Tfidf => "tfidf",
        }
    }
}

/// A base weighting scheme, optionally wrapped in RM3-style
/// pseudo-relevance-feedback expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingModel {
    pub scheme: WeightingScheme,
    pub rm3_expansion: bool,
}

impl Default for RankingModel {
    fn default() -> Self {
        Self {
            scheme: WeightingScheme::Bm25,
            rm3_expansion: false,
        }
    }
}

impl RankingModel {
    /// Resolves a model name to a model. An unrecognized name yields the
    /// default model and a `true` fallback flag instead of an error, so a
    /// typo never fails the configuration.
    pub fn resolve(name: &str) -> (Self, bool) {
        let model = match name.trim().to_ascii_lowercase().as_str() {
            "bm25" => Some(Self {
                scheme: WeightingScheme::Bm25,
                rm3_expansion: false,
            }),
            "ql" => Some(Self {
                scheme: WeightingScheme::QueryLikelihood,
                rm3_expansion: false,
            }),
            "tfidf" => Some(Self {
                scheme: WeightingScheme::Tfidf,
                rm3_expansion: false,
            }),
            "bm25-rm3" => Some(Self {
                scheme: WeightingScheme::Bm25,
                rm3_expansion: true,
            }),
            "ql-rm3" => Some(Self {
                scheme: WeightingScheme::QueryLikelihood,
                rm3_expansion: true,
            }),
            _ => None,
        };

        match model {
            Some(model) => (model, false),
            None => (Self::default(), true),
        }
    }

    pub fn name(&self) -> String {
        if self.rm3_expansion {
            format!("{}-rm3", self.scheme.as_str())
        } else {
            self.scheme.as_str().to_string()
        }
    }

    /// Explicit parameter set handed to the engine, in a stable order.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = match self.scheme {
            WeightingScheme::Bm25 => vec![
                ("k1".to_string(), BM25_K1.to_string()),
                ("b".to_string(), BM25_B.to_string()),
            ],
            WeightingScheme::QueryLikelihood => {
                vec![("mu".to_string(), DIRICHLET_MU.to_string())]
            }
            WeightingScheme::Tfidf => Vec::new(),
        };

        if self.rm3_expansion {
            params.push(("fb_docs".to_string(), RM3_FB_DOCS.to_string()));
            params.push(("fb_terms".to_string(), RM3_FB_TERMS.to_string()));
            params.push(("orig_weight".to_string(), RM3_ORIG_WEIGHT.to_string()));
        }

        params
    }
}

pub fn default_model_names() -> Vec<String> {
    ["bm25", "ql", "tfidf", "bm25-rm3", "ql-rm3"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// One retrieved document. The engine may emit hits without a usable
/// document id or score; callers decide how to count and drop those.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: Option<String>,
    pub score: Option<f64>,
}

pub trait SearchSession {
    fn configure_model(&mut self, model: &RankingModel) -> Result<()>;
    fn search(&mut self, query: &str, k: usize) -> Result<Vec<SearchHit>>;
}

/// Ranked-retrieval collaborator over a prebuilt index. Sessions hold
/// engine-side state and must be used one at a time, never shared across
/// configurations.
pub trait SearchEngine {
    type Session: SearchSession;

    fn open_session(&self, index_dir: &Path) -> Result<Self::Session>;
}

/// Corpus/query normalization collaborator: tokenization, case-folding,
/// stopword removal, stemming. Must be idempotent on already-normalized
/// input.
pub trait TextNormalizer {
    fn normalize(&mut self, text: &str) -> Result<String>;
}

/// Drives an external search binary, one invocation per query:
/// `<program> search --index <dir> --model <name> [--param k=v]...
///  --hits <k> --query <text>`, expecting one `doc_id score` pair per
/// stdout line in rank order.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
}

impl CommandEngine {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    pub fn version(&self) -> Result<String> {
        command_version(&self.program, &["--version"])
    }
}

impl SearchEngine for CommandEngine {
    type Session = CommandSession;

    fn open_session(&self, index_dir: &Path) -> Result<CommandSession> {
        if !index_dir.is_dir() {
            bail!("index directory not found: {}", index_dir.display());
        }

        Ok(CommandSession {
            program: self.program.clone(),
            index_dir: index_dir.to_path_buf(),
            model_args: Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct CommandSession {
    program: PathBuf,
    index_dir: PathBuf,
    model_args: Vec<String>,
}

impl SearchSession for CommandSession {
    fn configure_model(&mut self, model: &RankingModel) -> Result<()> {
        let mut args = vec!["--model".to_string(), model.name()];
        for (key, value) in model.params() {
            args.push("--param".to_string());
            args.push(format!("{key}={value}"));
        }

        self.model_args = args;
        Ok(())
    }

    fn search(&mut self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let output = Command::new(&self.program)
            .arg("search")
            .arg("--index")
            .arg(&self.index_dir)
            .args(&self.model_args)
            .arg("--hits")
            .arg(k.to_string())
            .arg("--query")
            .arg(query)
            .output()
            .with_context(|| format!("failed to execute {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("search command returned non-zero exit status: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut hits = Vec::new();
        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split_whitespace();
            let doc_id = fields
                .next()
                .filter(|id| !id.eq_ignore_ascii_case("null"))
                .map(str::to_string);
            let score = fields.next().and_then(|raw| raw.parse::<f64>().ok());
            hits.push(SearchHit { doc_id, score });
        }

        Ok(hits)
    }
}

/// Long-running normalization child speaking a line protocol: one input
/// line in, one normalized line out. Record bodies and queries are
/// single-line after whitespace collapsing, so the framing is safe.
#[derive(Debug)]
pub struct CommandNormalizer {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    program: PathBuf,
}

impl CommandNormalizer {
    pub fn spawn(program: &Path) -> Result<Self> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn normalizer: {}", program.display()))?;

        let stdin = child
            .stdin
            .take()
            .with_context(|| format!("normalizer stdin unavailable: {}", program.display()))?;
        let stdout = child
            .stdout
            .take()
            .with_context(|| format!("normalizer stdout unavailable: {}", program.display()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            program: program.to_path_buf(),
        })
    }

    pub fn probe_version(program: &Path) -> Result<String> {
        command_version(program, &["--version"])
    }
}

impl TextNormalizer for CommandNormalizer {
    fn normalize(&mut self, text: &str) -> Result<String> {
        let line = collapse_whitespace(text);
        writeln!(self.stdin, "{line}")
            .with_context(|| format!("failed to write to normalizer: {}", self.program.display()))?;
        self.stdin
            .flush()
            .with_context(|| format!("failed to flush normalizer: {}", self.program.display()))?;

        let mut reply = String::new();
        let read = self
            .stdout
            .read_line(&mut reply)
            .with_context(|| format!("failed to read from normalizer: {}", self.program.display()))?;
        if read == 0 {
            bail!("normalizer exited before replying: {}", self.program.display());
        }

        Ok(reply.trim().to_string())
    }
}

impl Drop for CommandNormalizer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Captures toolchain and collaborator versions for the run manifest.
/// The Rust toolchain must be probeable; collaborator binaries without a
/// usable `--version` are recorded as unknown rather than failing the run.
pub fn collect_tool_versions(
    engine: Option<&CommandEngine>,
    normalizer_cmd: Option<&Path>,
) -> Result<ToolVersions> {
    let engine_version = engine.map(|engine| {
        engine.version().unwrap_or_else(|err| {
            warn!(error = %err, "engine version probe failed");
            "unknown".to_string()
        })
    });

    let normalizer_version = normalizer_cmd.map(|program| {
        CommandNormalizer::probe_version(program).unwrap_or_else(|err| {
            warn!(error = %err, "normalizer version probe failed");
            "unknown".to_string()
        })
    });

    Ok(ToolVersions {
        rustc: command_version(Path::new("rustc"), &["--version"])?,
        cargo: command_version(Path::new("cargo"), &["--version"])?,
        engine: engine_version,
        normalizer: normalizer_version,
    })
}

pub fn command_version(program: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run {} {}", program.display(), args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} {} failed: {}",
            program.display(),
            args.join(" "),
            stderr.trim()
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let source = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };

    let version_line = source
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .unwrap_or("unknown");

    Ok(version_line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_maps_known_model_names() {
        let (model, fallback) = RankingModel::resolve("ql-rm3");
        assert!(!fallback);
        assert_eq!(model.scheme, WeightingScheme::QueryLikelihood);
        assert!(model.rm3_expansion);
        assert_eq!(model.name(), "ql-rm3");
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let (model, fallback) = RankingModel::resolve(" BM25 ");
        assert!(!fallback);
        assert_eq!(model.scheme, WeightingScheme::Bm25);
    }

    #[test]
    fn resolve_falls_back_to_default_on_unknown_name() {
        let (model, fallback) = RankingModel::resolve("divergence-from-randomness");
        assert!(fallback);
        assert_eq!(model, RankingModel::default());
        assert_eq!(model.name(), "bm25");
    }

    #[test]
    fn params_carry_fixed_constants() {
        let (model, _) = RankingModel::resolve("bm25-rm3");
        let params = model.params();
        assert_eq!(params[0], ("k1".to_string(), "0.9".to_string()));
        assert_eq!(params[1], ("b".to_string(), "0.4".to_string()));
        assert!(params.contains(&("fb_docs".to_string(), "10".to_string())));
        assert!(params.contains(&("orig_weight".to_string(), "0.5".to_string())));
    }

    #[test]
    fn tfidf_has_no_tunable_params() {
        let (model, _) = RankingModel::resolve("tfidf");
        assert!(model.params().is_empty());
    }
}
