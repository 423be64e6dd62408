//! FastVLM executor built on the ONNX Runtime binding.
//!
//! [`FastVlmExecutor`] owns the load state machine and serves requests;
//! [`ExecutorHandle`] runs one executor on a dedicated thread.

pub mod api;
pub mod error;
pub mod executor;
pub mod handle;
pub mod loader;
pub mod model;
pub mod observer;
pub mod worker;

pub use api::{InferenceRequest, InferenceResult};
pub use error::LoadError;
pub use executor::{FastVlmExecutor, LoadState};
pub use handle::{ExecutorHandle, ExecutorStatus, TokenStream};
pub use loader::{ModelLoader, OrtModelLoader, RuntimeSettings};
pub use model::{ModelVariant, SelectedModel, SelectedModels, discover_model_files};
pub use observer::{ExecutorEvent, ExecutorObserver, NoopObserver};
pub use worker::ImageWorker;
