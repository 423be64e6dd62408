use std::{io, path::PathBuf};

use fastvlm_core::ModelComponent;
use fastvlm_ort::OrtError;
use thiserror::Error;

/// Reasons a model load can fail.
///
/// The display string is what the executor stores as its last error.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Model directory not found")]
    ModelDirNotFound(PathBuf),
    #[error("ONNX Runtime not initialized")]
    RuntimeUnavailable(#[source] OrtError),
    #[error("ONNX models directory not found")]
    OnnxDirNotFound(PathBuf),
    #[error("Failed to read ONNX models directory")]
    ReadOnnxDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Missing required model type: {0}")]
    MissingModel(ModelComponent),
    #[error("Session creation failed for {component}")]
    SessionCreation {
        component: ModelComponent,
        #[source]
        source: OrtError,
    },
    #[error("Model config loading failed")]
    ModelConfig(#[source] anyhow::Error),
    #[error("Tokenizer loading failed")]
    Tokenizer(#[source] anyhow::Error),
}
