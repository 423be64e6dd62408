use std::borrow::Cow;

use tracing::{debug, warn};

use crate::error::{VlmError, VlmResult};

/// Logit assigned to padded or suppressed vocabulary slots.
pub const SUPPRESSED_LOGIT: f32 = -1e9;

/// Replaces the single image-token row of `text_embeddings` with every row of
/// `vision_features`.
///
/// `text_embeddings` must be `[tokens, hidden]` flattened and `vision_features`
/// `[visual_tokens, hidden]` flattened. The result has
/// `(tokens - 1 + visual_tokens) * hidden` elements. Exactly one image token and
/// at least one visual token are required.
pub fn splice_image_features(
    token_ids: &[u32],
    image_token_id: u32,
    text_embeddings: &[f32],
    vision_features: &[f32],
    hidden_size: usize,
) -> VlmResult<Vec<f32>> {
    if vision_features.is_empty() {
        return Err(VlmError::EmptyVisionFeatures);
    }
    if hidden_size == 0 || vision_features.len() % hidden_size != 0 {
        return Err(VlmError::VisionDimensions {
            features: vision_features.len(),
            hidden_size,
        });
    }
    if text_embeddings.len() != token_ids.len() * hidden_size {
        return Err(VlmError::EmbeddingDimensions {
            embeddings: text_embeddings.len(),
            tokens: token_ids.len(),
            hidden_size,
        });
    }

    let positions: Vec<usize> = token_ids
        .iter()
        .enumerate()
        .filter(|&(_, &id)| id == image_token_id)
        .map(|(idx, _)| idx)
        .collect();
    let image_pos = match positions.as_slice() {
        [] => return Err(VlmError::NoImageToken),
        [pos] => *pos,
        many => return Err(VlmError::ImageTokenCount(many.len())),
    };

    let split = image_pos * hidden_size;
    let mut spliced =
        Vec::with_capacity(text_embeddings.len() - hidden_size + vision_features.len());
    spliced.extend_from_slice(&text_embeddings[..split]);
    spliced.extend_from_slice(vision_features);
    spliced.extend_from_slice(&text_embeddings[split + hidden_size..]);

    debug!(
        text_tokens = token_ids.len(),
        vision_tokens = vision_features.len() / hidden_size,
        image_pos,
        sequence = spliced.len() / hidden_size,
        "spliced vision features into prompt"
    );
    Ok(spliced)
}

/// Logits of the final sequence position.
///
/// The decoder returns `[batch, seq, vocab]`; the vocabulary width is read from
/// the last dimension and `fallback_vocab` is used when the shape does not
/// carry it.
pub fn last_token_logits<'a>(logits: &'a [f32], shape: &[i64], fallback_vocab: usize) -> &'a [f32] {
    let vocab = shape
        .last()
        .and_then(|&dim| usize::try_from(dim).ok())
        .filter(|&dim| dim > 0 && dim <= logits.len())
        .unwrap_or(fallback_vocab);
    if vocab > 0 && logits.len() >= vocab {
        &logits[logits.len() - vocab..]
    } else {
        logits
    }
}

/// Extends `logits` to `full_vocab` entries.
///
/// Padded slots get [`SUPPRESSED_LOGIT`] except for the ids listed in
/// `boosts`, which receive the paired value.
pub fn pad_logits<'a>(logits: &'a [f32], full_vocab: usize, boosts: &[(u32, f32)]) -> Cow<'a, [f32]> {
    if logits.len() >= full_vocab {
        return Cow::Borrowed(logits);
    }
    warn!(
        model_vocab = logits.len(),
        tokenizer_vocab = full_vocab,
        "padding logits to the tokenizer vocabulary"
    );
    let mut padded = Vec::with_capacity(full_vocab);
    padded.extend_from_slice(logits);
    padded.resize(full_vocab, SUPPRESSED_LOGIT);
    for &(id, value) in boosts {
        let id = id as usize;
        if id >= logits.len() && id < full_vocab {
            padded[id] = value;
        }
    }
    Cow::Owned(padded)
}
