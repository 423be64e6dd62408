//! Request and result types exchanged with the executor.

use fastvlm_core::{
    CancellationToken, DecodeOutcome, ErrorKind, VlmResult, inference::DEFAULT_MAX_NEW_TOKENS,
};

/// One image-plus-prompt generation request.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Encoded image (PNG, JPEG, ...). Empty runs the prompt without vision features.
    pub image_bytes: Vec<u8>,
    pub prompt: String,
    pub max_tokens: usize,
    pub cancel: Option<CancellationToken>,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            image_bytes: Vec::new(),
            prompt: prompt.into(),
            max_tokens: DEFAULT_MAX_NEW_TOKENS,
            cancel: None,
        }
    }

    pub fn with_image(mut self, image_bytes: Vec<u8>) -> Self {
        self.image_bytes = image_bytes;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Outcome handed to the completion callback.
///
/// A failed result always carries a non-empty `error_message` and empty
/// `generated_text`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferenceResult {
    pub success: bool,
    pub generated_text: String,
    pub error_message: String,
    pub error_kind: Option<ErrorKind>,
    pub prompt_tokens: usize,
    pub response_tokens: usize,
}

impl From<VlmResult<DecodeOutcome>> for InferenceResult {
    fn from(result: VlmResult<DecodeOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                generated_text: outcome.text,
                prompt_tokens: outcome.prompt_tokens,
                response_tokens: outcome.response_tokens,
                ..Self::default()
            },
            Err(err) => Self {
                success: false,
                error_message: err.to_string(),
                error_kind: Some(err.kind()),
                ..Self::default()
            },
        }
    }
}
