pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod generation;
pub mod inference;
pub mod metadata;
pub mod prompt_tokens;
pub mod sampling;
pub mod tensor;
pub mod tokenizer;
pub mod vision;

pub use backend::{InferenceBackend, ModelComponent};
pub use cache::KvCache;
pub use config::{ImageSize, ModelConfig, ModelConfigPatch};
pub use error::{ErrorKind, VlmError, VlmResult};
pub use generation::{DecodeHooks, Generator};
pub use inference::{
    CancellationToken, DecodeOutcome, DecodeParameters, DecodeParametersPatch, StreamCallback,
};
pub use metadata::{ModelMetadata, VisionInput};
pub use prompt_tokens::{IMAGE_PLACEHOLDER, PromptBuildOptions, render_chat_prompt};
pub use sampling::StopReason;
pub use tokenizer::Tokenizer;
