use tracing::debug;

use crate::{
    error::Result,
    tensor::{TensorData, TensorInputs, TensorMap, TensorValues},
};

/// Logical decoder name used by callers.
pub const DECODER_LOGICAL_NAME: &str = "decoder_model";
/// Session name of the exported merged decoder.
pub const DECODER_SESSION_NAME: &str = "decoder_model_merged";

pub const INPUTS_EMBEDS: &str = "inputs_embeds";
pub const POSITION_IDS: &str = "position_ids";
pub const ATTENTION_MASK: &str = "attention_mask";

/// Maps the logical decoder name onto the merged-decoder session.
pub fn resolve_session_name(model_name: &str) -> &str {
    if model_name == DECODER_LOGICAL_NAME {
        DECODER_SESSION_NAME
    } else {
        model_name
    }
}

/// One decoder invocation: new embeddings plus the cache carried from the previous step.
#[derive(Debug, Clone, Copy)]
pub struct DecoderStep<'a> {
    pub inputs_embeds: &'a [f32],
    pub hidden_size: usize,
    pub position_ids: &'a [i64],
    pub attention_mask: &'a [i64],
    pub past_key_values: &'a TensorMap,
}

fn embeds_tensor(values: &[f32], hidden_size: usize) -> TensorData {
    if hidden_size > 0 && values.len() % hidden_size == 0 {
        let shape = vec![1, (values.len() / hidden_size) as i64, hidden_size as i64];
        if let Ok(tensor) = TensorData::from_f32(values.to_vec(), shape) {
            return tensor;
        }
    }
    TensorData::row(TensorValues::F32(values.to_vec()))
}

/// Runs the decoder with its key/value cache through `run`.
///
/// `inputs_embeds` is shaped `[1, seq, hidden]` when the hidden size divides the
/// buffer, position ids and attention mask are passed as int64 `[1, n]` rows, and
/// every cache entry is forwarded under its own name. Only float outputs are
/// returned.
pub fn run_with_key_value_cache<F>(model_name: &str, step: &DecoderStep<'_>, run: F) -> Result<TensorMap>
where
    F: FnOnce(&str, &TensorInputs<'_>) -> Result<TensorMap>,
{
    let session_name = resolve_session_name(model_name);

    let embeds = (!step.inputs_embeds.is_empty())
        .then(|| embeds_tensor(step.inputs_embeds, step.hidden_size));
    let positions = (!step.position_ids.is_empty())
        .then(|| TensorData::row(TensorValues::I64(step.position_ids.to_vec())));
    let mask = (!step.attention_mask.is_empty())
        .then(|| TensorData::row(TensorValues::I64(step.attention_mask.to_vec())));

    let mut inputs = TensorInputs::new();
    if let Some(embeds) = embeds.as_ref() {
        inputs.insert(INPUTS_EMBEDS, embeds);
    }
    if let Some(positions) = positions.as_ref() {
        inputs.insert(POSITION_IDS, positions);
    }
    if let Some(mask) = mask.as_ref() {
        inputs.insert(ATTENTION_MASK, mask);
    }
    for (name, tensor) in step.past_key_values {
        inputs.insert(name.as_str(), tensor);
    }

    debug!(
        session = session_name,
        inputs = inputs.len(),
        cache_entries = step.past_key_values.len(),
        "running decoder step"
    );

    let outputs = run(session_name, &inputs)?;
    Ok(outputs
        .into_iter()
        .filter(|(_, tensor)| tensor.as_f32().is_some())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaps_logical_decoder_name_only() {
        assert_eq!(resolve_session_name("decoder_model"), "decoder_model_merged");
        assert_eq!(resolve_session_name("embed_tokens"), "embed_tokens");
        assert_eq!(
            resolve_session_name("decoder_model_merged"),
            "decoder_model_merged"
        );
    }

    #[test]
    fn shapes_decoder_inputs_and_keeps_float_outputs() {
        let mut cache = TensorMap::new();
        cache.insert(
            "past_key_values.0.key".to_string(),
            TensorData::from_f32(Vec::new(), vec![1, 2, 0, 4]).unwrap(),
        );
        let embeds = vec![0.0f32; 3 * 8];
        let positions = [0i64, 1, 2];
        let mask = [1i64; 3];
        let step = DecoderStep {
            inputs_embeds: &embeds,
            hidden_size: 8,
            position_ids: &positions,
            attention_mask: &mask,
            past_key_values: &cache,
        };

        let outputs = run_with_key_value_cache("decoder_model", &step, |session, inputs| {
            assert_eq!(session, "decoder_model_merged");
            assert_eq!(inputs[INPUTS_EMBEDS].shape(), &[1, 3, 8]);
            assert_eq!(inputs[POSITION_IDS].as_i64(), Some(&positions[..]));
            assert_eq!(inputs[ATTENTION_MASK].shape(), &[1, 3]);
            assert!(inputs.contains_key("past_key_values.0.key"));

            let mut out = TensorMap::new();
            out.insert(
                "logits".to_string(),
                TensorData::from_f32(vec![0.0; 6], vec![1, 3, 2]).unwrap(),
            );
            out.insert(
                "token_ids".to_string(),
                TensorData::row(TensorValues::I64(vec![7])),
            );
            Ok(out)
        })
        .unwrap();

        assert!(outputs.contains_key("logits"));
        assert!(!outputs.contains_key("token_ids"));
    }

    #[test]
    fn falls_back_to_flat_row_when_hidden_size_does_not_divide() {
        let tensor = embeds_tensor(&[1.0, 2.0, 3.0], 2);
        assert_eq!(tensor.shape(), &[1, 3]);
        let tensor = embeds_tensor(&[1.0, 2.0], 0);
        assert_eq!(tensor.shape(), &[1, 2]);
    }
}
