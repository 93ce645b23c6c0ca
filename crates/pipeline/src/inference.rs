//! Inference engine capability.
//!
//! The diffusion model is an opaque collaborator: it receives a canonical
//! content/mask/reference triple plus seed and guidance scale, and writes
//! `results/{content_stem}_{seed}.png` under the output directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use inpaint_core::scripting::{run_command, ProcessError, ProcessInput};
use tokio::process::Command;

/// Leading arguments for the Paint-by-Example inference script.
const DEFAULT_ARGS: &[&str] = &[
    "diffusion/scripts/inference.py",
    "--plms",
    "--config",
    "diffusion/configs/v1.yaml",
    "--ckpt",
    "diffusion/checkpoints/model.ckpt",
];

/// Sub-directory of the output directory the engine writes results to.
pub const RESULTS_DIR: &str = "results";

// ---------------------------------------------------------------------------
// Request / errors
// ---------------------------------------------------------------------------

/// One engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub content: PathBuf,
    pub mask: PathBuf,
    pub reference: PathBuf,
    pub seed: u64,
    pub scale: f64,
    pub output_dir: PathBuf,
}

impl InferenceRequest {
    /// Where the engine is expected to write its result image.
    pub fn expected_output(&self) -> PathBuf {
        let stem = self
            .content
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        self.output_dir
            .join(RESULTS_DIR)
            .join(format!("{stem}_{}.png", self.seed))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// The engine exited non-zero. `diagnostics` is its stderr verbatim.
    #[error("Inference engine exited with status {}: {diagnostics}", display_code(*code))]
    ExitStatus {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("Inference engine produced no output at {}: {diagnostics}", path.display())]
    MissingOutput { path: PathBuf, diagnostics: String },

    #[error("Inference engine could not run: {0}")]
    Process(#[from] ProcessError),
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

/// Runs the external model.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Run one inference; returns the produced image paths.
    async fn run(&self, request: &InferenceRequest) -> Result<Vec<PathBuf>, InferenceError>;
}

// ---------------------------------------------------------------------------
// Subprocess engine
// ---------------------------------------------------------------------------

/// How to launch the external inference process.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    pub program: String,
    /// Arguments placed before the per-request flags.
    pub base_args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            base_args: DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
            working_directory: None,
            timeout: None,
        }
    }
}

impl InferenceConfig {
    /// Load from environment variables.
    ///
    /// | Env Var                  | Default                   |
    /// |--------------------------|---------------------------|
    /// | `INFERENCE_PROGRAM`      | `python`                  |
    /// | `INFERENCE_ARGS`         | Paint-by-Example script   |
    /// | `INFERENCE_WORKDIR`      | inherit                   |
    /// | `INFERENCE_TIMEOUT_SECS` | none                      |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let program = std::env::var("INFERENCE_PROGRAM")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(defaults.program);

        let base_args = std::env::var("INFERENCE_ARGS")
            .map(|args| args.split_whitespace().map(String::from).collect())
            .unwrap_or(defaults.base_args);

        let working_directory = std::env::var("INFERENCE_WORKDIR").ok().map(PathBuf::from);

        let timeout = std::env::var("INFERENCE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs);

        Self {
            program,
            base_args,
            working_directory,
            timeout,
        }
    }
}

/// [`InferenceEngine`] that shells out to an external program.
#[derive(Debug, Clone)]
pub struct SubprocessEngine {
    config: InferenceConfig,
}

impl SubprocessEngine {
    pub fn new(config: InferenceConfig) -> Self {
        Self { config }
    }

    fn command(&self, request: &InferenceRequest) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.base_args)
            .arg("--outdir")
            .arg(&request.output_dir)
            .arg("--image_path")
            .arg(&request.content)
            .arg("--mask_path")
            .arg(&request.mask)
            .arg("--reference_path")
            .arg(&request.reference)
            .arg("--seed")
            .arg(request.seed.to_string())
            .arg("--scale")
            .arg(request.scale.to_string());
        cmd
    }
}

#[async_trait]
impl InferenceEngine for SubprocessEngine {
    async fn run(&self, request: &InferenceRequest) -> Result<Vec<PathBuf>, InferenceError> {
        let mut cmd = self.command(request);
        let output = run_command(
            &mut cmd,
            ProcessInput {
                working_directory: self.config.working_directory.clone(),
                timeout: self.config.timeout,
                ..Default::default()
            },
        )
        .await?;

        tracing::debug!(
            program = %self.config.program,
            exit_code = output.exit_code,
            duration_ms = output.duration_ms,
            "Inference engine finished",
        );

        if !output.success() {
            return Err(InferenceError::ExitStatus {
                code: (output.exit_code >= 0).then_some(output.exit_code),
                diagnostics: output.diagnostics().to_string(),
            });
        }

        let expected = request.expected_output();
        if !exists(&expected).await {
            return Err(InferenceError::MissingOutput {
                path: expected,
                diagnostics: output.diagnostics().to_string(),
            });
        }
        Ok(vec![expected])
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
