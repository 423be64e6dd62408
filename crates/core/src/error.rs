use fastvlm_ort::OrtError;
use serde::Serialize;
use thiserror::Error;

/// Coarse failure category reported alongside every failed inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotReady,
    InvalidInput,
    Image,
    Tokenization,
    Embedding,
    Decode,
    Cancelled,
    Backend,
}

/// Failures raised while running one inference request.
///
/// The display strings are the messages handed back to callers; the native
/// cause, when there is one, is kept as the error source.
#[derive(Debug, Error)]
pub enum VlmError {
    #[error("{0}")]
    NotReady(String),
    #[error("Empty text prompt provided")]
    EmptyPrompt,
    #[error("Failed to process image data: {0}")]
    ImageDecode(String),
    #[error("Vision encoder failed")]
    VisionEncoder(#[source] Option<OrtError>),
    #[error("Vision encoder output has incorrect dimensions")]
    VisionDimensions { features: usize, hidden_size: usize },
    #[error("Failed to tokenize text")]
    Tokenization,
    #[error("Token embedding failed")]
    Embedding(#[source] Option<OrtError>),
    #[error("Text embeddings do not match the token count")]
    EmbeddingDimensions {
        embeddings: usize,
        tokens: usize,
        hidden_size: usize,
    },
    #[error("Invalid input features")]
    EmptyVisionFeatures,
    #[error("No <image> tokens found in input")]
    NoImageToken,
    #[error("Incorrect number of <image> tokens")]
    ImageTokenCount(usize),
    #[error("Failed to generate initial logits")]
    InitialLogits(#[source] Option<OrtError>),
    #[error("Failed to get logits for step {step}")]
    StepLogits {
        step: usize,
        #[source]
        source: Option<OrtError>,
    },
    #[error("Generation cancelled after {0} tokens")]
    Cancelled(usize),
    #[error("inference backend failure")]
    Backend(#[from] OrtError),
}

impl VlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotReady(_) => ErrorKind::NotReady,
            Self::EmptyPrompt
            | Self::EmptyVisionFeatures
            | Self::NoImageToken
            | Self::ImageTokenCount(_) => {
                ErrorKind::InvalidInput
            }
            Self::ImageDecode(_) | Self::VisionEncoder(_) | Self::VisionDimensions { .. } => {
                ErrorKind::Image
            }
            Self::Tokenization => ErrorKind::Tokenization,
            Self::Embedding(_) | Self::EmbeddingDimensions { .. } => ErrorKind::Embedding,
            Self::InitialLogits(_) | Self::StepLogits { .. } => ErrorKind::Decode,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Backend(_) => ErrorKind::Backend,
        }
    }
}

pub type VlmResult<T> = std::result::Result<T, VlmError>;
