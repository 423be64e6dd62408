use std::path::PathBuf;

use clap::Args;

use crate::config::{ConfigOverrides, InferenceOverride, RuntimeOverride};

#[derive(Args, Debug, Clone, Default)]
pub struct CommonModelArgs {
    /// Directory holding `onnx/`, `config.json` and the tokenizer files.
    #[arg(long, value_name = "DIR", help_heading = "Application")]
    pub model_dir: Option<PathBuf>,

    /// Path to the ONNX Runtime shared library.
    #[arg(long, value_name = "PATH", help_heading = "Runtime")]
    pub library: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CommonRuntimeArgs {
    /// ONNX Runtime log level (verbose/info/warning/error/fatal).
    #[arg(long, value_name = "LEVEL", help_heading = "Runtime")]
    pub ort_log_level: Option<String>,

    /// Threads used inside a single operator.
    #[arg(long, help_heading = "Runtime")]
    pub intra_op_threads: Option<u16>,

    /// Threads used to run independent operators.
    #[arg(long, help_heading = "Runtime")]
    pub inter_op_threads: Option<u16>,

    /// Graph optimization level (disabled/basic/extended/all).
    #[arg(long, value_name = "LEVEL", help_heading = "Runtime")]
    pub graph_optimization: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CommonInferenceArgs {
    /// Maximum number of generated tokens.
    #[arg(long, help_heading = "Inference")]
    pub max_tokens: Option<usize>,

    /// Image preprocessing threads (0 = one per core).
    #[arg(long, help_heading = "Inference")]
    pub worker_threads: Option<usize>,

    /// Step after which three repeated tokens stop generation.
    #[arg(long, help_heading = "Inference")]
    pub repetition_guard_after: Option<usize>,

    /// Token id that is never generated. Repeatable.
    #[arg(long = "suppress-token", value_name = "ID", help_heading = "Inference")]
    pub suppress_tokens: Vec<u32>,
}

impl From<&CommonRuntimeArgs> for RuntimeOverride {
    fn from(value: &CommonRuntimeArgs) -> Self {
        Self {
            library_path: None,
            log_level: value.ort_log_level.clone(),
            intra_op_threads: value.intra_op_threads,
            inter_op_threads: value.inter_op_threads,
            graph_optimization: value.graph_optimization.clone(),
        }
    }
}

impl From<&CommonInferenceArgs> for InferenceOverride {
    fn from(value: &CommonInferenceArgs) -> Self {
        Self {
            max_tokens: value.max_tokens,
            worker_threads: value.worker_threads,
            repetition_guard_after: value.repetition_guard_after,
            suppress_tokens: (!value.suppress_tokens.is_empty())
                .then(|| value.suppress_tokens.clone()),
        }
    }
}

pub fn build_config_overrides(
    config_path: Option<PathBuf>,
    model: &CommonModelArgs,
    runtime: &CommonRuntimeArgs,
    inference: &CommonInferenceArgs,
) -> ConfigOverrides {
    ConfigOverrides {
        config_path,
        model_dir: model.model_dir.clone(),
        runtime: RuntimeOverride {
            library_path: model.library.clone(),
            ..RuntimeOverride::from(runtime)
        },
        inference: inference.into(),
    }
}
