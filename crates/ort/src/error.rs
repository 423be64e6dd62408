use std::path::PathBuf;

use thiserror::Error;

use crate::tensor::ElementType;

/// Errors surfaced by the native runtime binding and the marshaling layer.
#[derive(Debug, Error)]
pub enum OrtError {
    #[error("failed to load onnxruntime library from {path}: {source}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("onnxruntime library at {path} does not export OrtGetApiBase: {source}")]
    MissingEntryPoint {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("onnxruntime {runtime_version} does not provide API version {requested}")]
    UnsupportedApiVersion {
        requested: u32,
        runtime_version: String,
    },
    #[error("onnxruntime binding is not initialized")]
    NotInitialized,
    /// A native call returned a non-null status. The message is the runtime's own.
    #[error("{message}")]
    Status { code: i32, message: String },
    #[error("native call `{call}` returned a null handle")]
    NullHandle { call: &'static str },
    #[error("path {0} cannot be passed to the native runtime")]
    InvalidPath(PathBuf),
    #[error("name `{0}` contains an interior NUL byte")]
    InvalidName(String),
    #[error("no session registered under `{0}`")]
    SessionNotFound(String),
    #[error("tensor shape {shape:?} describes {expected} elements but buffer holds {actual}")]
    ShapeMismatch {
        shape: Vec<i64>,
        expected: usize,
        actual: usize,
    },
    #[error("tensor element type {0} is not supported")]
    UnsupportedElementType(ElementType),
    #[error("no valid input tensors could be created for `{0}`")]
    NoInputs(String),
}

pub type Result<T> = std::result::Result<T, OrtError>;
