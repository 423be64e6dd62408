use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    prompt_tokens::{END_OF_TEXT, IM_END},
    tensor::SUPPRESSED_LOGIT,
    tokenizer::Tokenizer,
};

/// Logits given to end-of-sequence ids that only exist in the padded range.
pub const IM_END_PAD_LOGIT: f32 = 5.0;
pub const END_OF_TEXT_PAD_LOGIT: f32 = 3.0;

/// Index of the largest finite logit, ignoring `suppress`. Ties keep the
/// lowest index.
pub fn argmax(logits: &[f32], suppress: &[u32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in logits.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        let value = if suppress.contains(&(idx as u32)) {
            SUPPRESSED_LOGIT
        } else {
            value
        };
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Greedy next-token choice.
///
/// A pick that is neither a vocabulary nor a special id is replaced by
/// `<|endoftext|>`, then `<|im_end|>`, then the last vocabulary id.
pub fn select_next_token(logits: &[f32], suppress: &[u32], tokenizer: &Tokenizer) -> u32 {
    match argmax(logits, suppress) {
        Some(idx) => {
            let id = idx as u32;
            if tokenizer.is_known_id(id) {
                return id;
            }
            warn!(id, "greedy pick is not a known token; substituting end of sequence");
        }
        None => warn!("no selectable logits; substituting end of sequence"),
    }
    fallback_token(tokenizer)
}

fn fallback_token(tokenizer: &Tokenizer) -> u32 {
    tokenizer
        .special_token(END_OF_TEXT)
        .or_else(|| tokenizer.special_token(IM_END))
        .unwrap_or_else(|| tokenizer.vocab_size().saturating_sub(1) as u32)
}

/// End-of-sequence ids that should stay reachable after padding.
pub fn padding_boosts(tokenizer: &Tokenizer) -> Vec<(u32, f32)> {
    let mut boosts = Vec::with_capacity(2);
    if let Some(id) = tokenizer.special_token(IM_END) {
        boosts.push((id, IM_END_PAD_LOGIT));
    }
    if let Some(id) = tokenizer.special_token(END_OF_TEXT) {
        boosts.push((id, END_OF_TEXT_PAD_LOGIT));
    }
    boosts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "token")]
pub enum StopReason {
    EndOfSequence(u32),
    Repetition(u32),
    MaxTokens,
}

#[derive(Debug, Clone)]
pub struct StopCriteria {
    stop_ids: Vec<u32>,
    repetition_guard_after: usize,
}

impl StopCriteria {
    pub fn new(tokenizer: &Tokenizer, repetition_guard_after: usize) -> Self {
        Self {
            stop_ids: tokenizer.stop_token_ids(),
            repetition_guard_after,
        }
    }

    /// Decides whether `next`, picked at `step`, ends generation.
    ///
    /// Past the guard step a token equal to the last two generated tokens is
    /// treated as a repetition loop.
    pub fn check(&self, step: usize, next: u32, generated: &[u32]) -> Option<StopReason> {
        if self.stop_ids.contains(&next) {
            debug!(step, token = next, "end of sequence");
            return Some(StopReason::EndOfSequence(next));
        }
        if step > self.repetition_guard_after && generated.len() >= 3 {
            let last = generated[generated.len() - 1];
            let second_last = generated[generated.len() - 2];
            if next == last && next == second_last {
                warn!(step, token = next, "repetition detected; stopping");
                return Some(StopReason::Repetition(next));
            }
        }
        None
    }
}
