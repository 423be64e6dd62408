use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::sampling::StopReason;

/// Callback invoked after every accepted token with the step index and all
/// tokens generated so far.
pub type StreamCallback<'a> = Option<&'a dyn Fn(usize, &[u32])>;

pub const DEFAULT_MAX_NEW_TOKENS: usize = 256;
pub const DEFAULT_REPETITION_GUARD_AFTER: usize = 100;

/// Greedy decoding knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeParameters {
    pub max_new_tokens: usize,
    /// Step after which three identical tokens in a row stop generation.
    pub repetition_guard_after: usize,
    /// Token ids never selected.
    pub suppress_tokens: Vec<u32>,
    pub add_generation_prompt: bool,
}

impl Default for DecodeParameters {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            repetition_guard_after: DEFAULT_REPETITION_GUARD_AFTER,
            suppress_tokens: Vec::new(),
            add_generation_prompt: true,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeParametersPatch {
    pub max_new_tokens: Option<usize>,
    pub repetition_guard_after: Option<usize>,
    pub suppress_tokens: Option<Vec<u32>>,
    pub add_generation_prompt: Option<bool>,
}

impl std::ops::AddAssign<&DecodeParametersPatch> for DecodeParameters {
    fn add_assign(&mut self, rhs: &DecodeParametersPatch) {
        if let Some(max_new_tokens) = rhs.max_new_tokens {
            self.max_new_tokens = max_new_tokens;
        }
        if let Some(guard) = rhs.repetition_guard_after {
            self.repetition_guard_after = guard;
        }
        if let Some(suppress) = &rhs.suppress_tokens {
            self.suppress_tokens = suppress.clone();
        }
        if let Some(enabled) = rhs.add_generation_prompt {
            self.add_generation_prompt = enabled;
        }
    }
}

impl std::ops::Add<&DecodeParametersPatch> for DecodeParameters {
    type Output = DecodeParameters;

    fn add(mut self, rhs: &DecodeParametersPatch) -> Self::Output {
        self += rhs;
        self
    }
}

/// Collected results from a decode call.
#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    pub text: String,
    pub prompt_tokens: usize,
    pub response_tokens: usize,
    pub generated_tokens: Vec<u32>,
    pub stop_reason: StopReason,
}

/// Shared flag checked between decode steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
