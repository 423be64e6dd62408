use std::time::Instant;

use fastvlm_ort::{
    DECODER_LOGICAL_NAME, DecoderStep, TensorData, TensorInputs, TensorMap, TensorValues,
};
use tracing::{debug, info, warn};

use crate::{
    backend::{InferenceBackend, ModelComponent},
    cache::KvCache,
    config::ModelConfig,
    error::{VlmError, VlmResult},
    inference::{CancellationToken, DecodeOutcome, DecodeParameters, StreamCallback},
    metadata::{IMAGE_FEATURES, INPUT_IDS, INPUTS_EMBEDS, LOGITS, PIXEL_VALUES, VisionInput},
    prompt_tokens::{PromptBuildOptions, render_chat_prompt},
    sampling::{StopCriteria, StopReason, padding_boosts, select_next_token},
    tensor::{last_token_logits, pad_logits, splice_image_features},
    tokenizer::Tokenizer,
};

/// Per-call hooks threaded through the decode loop.
#[derive(Clone, Copy, Default)]
pub struct DecodeHooks<'a> {
    pub cancel: Option<&'a CancellationToken>,
    pub stream: StreamCallback<'a>,
}

impl DecodeHooks<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(CancellationToken::is_cancelled)
    }
}

/// Drives the three model components of one loaded model.
pub struct Generator<'a> {
    backend: &'a dyn InferenceBackend,
    tokenizer: &'a Tokenizer,
    config: &'a ModelConfig,
    params: &'a DecodeParameters,
}

impl<'a> Generator<'a> {
    pub fn new(
        backend: &'a dyn InferenceBackend,
        tokenizer: &'a Tokenizer,
        config: &'a ModelConfig,
        params: &'a DecodeParameters,
    ) -> Self {
        Self {
            backend,
            tokenizer,
            config,
            params,
        }
    }

    /// Runs the vision encoder over a preprocessed `[1, C, H, W]` buffer.
    pub fn encode_image(&self, pixels: Vec<f32>, input: VisionInput) -> VlmResult<Vec<f32>> {
        let pixels = TensorData::from_f32(pixels, input.shape().to_vec())
            .map_err(|err| VlmError::VisionEncoder(Some(err)))?;
        let mut inputs = TensorInputs::new();
        inputs.insert(PIXEL_VALUES, &pixels);

        let mut outputs = self
            .backend
            .run(ModelComponent::VisionEncoder.session_name(), &inputs)
            .map_err(|err| VlmError::VisionEncoder(Some(err)))?;
        let features = outputs
            .remove(IMAGE_FEATURES)
            .and_then(TensorData::into_f32)
            .filter(|features| !features.is_empty())
            .ok_or(VlmError::VisionEncoder(None))?;

        let hidden = self.config.hidden_size;
        if hidden > 0 && features.len() % hidden == 0 {
            info!(tokens = features.len() / hidden, hidden, "vision features ready");
        } else {
            warn!(elements = features.len(), hidden, "vision features not divisible by hidden size");
        }
        Ok(features)
    }

    /// Applies the chat template and tokenizes the result.
    pub fn tokenize_prompt(&self, prompt: &str) -> VlmResult<Vec<u32>> {
        if prompt.is_empty() {
            return Err(VlmError::EmptyPrompt);
        }
        let options =
            PromptBuildOptions::default().with_generation_prompt(self.params.add_generation_prompt);
        let ids = self.tokenizer.tokenize(&render_chat_prompt(prompt, options));
        if ids.is_empty() {
            return Err(VlmError::Tokenization);
        }
        Ok(ids)
    }

    /// Embeds `ids` through the token embedder, returning `[n, hidden]` flattened.
    pub fn embed_tokens(&self, ids: &[u32]) -> VlmResult<Vec<f32>> {
        if ids.is_empty() {
            return Err(VlmError::Embedding(None));
        }
        let input_ids = TensorData::row(TensorValues::I64(
            ids.iter().map(|&id| i64::from(id)).collect(),
        ));
        let mut inputs = TensorInputs::new();
        inputs.insert(INPUT_IDS, &input_ids);

        let mut outputs = self
            .backend
            .run(ModelComponent::EmbedTokens.session_name(), &inputs)
            .map_err(|err| VlmError::Embedding(Some(err)))?;
        outputs
            .remove(INPUTS_EMBEDS)
            .and_then(TensorData::into_f32)
            .filter(|embeds| !embeds.is_empty())
            .ok_or(VlmError::Embedding(None))
    }

    /// Tokenizes and embeds `prompt`, then decodes with `vision_features`
    /// spliced in at the image token.
    pub fn generate(
        &self,
        prompt: &str,
        vision_features: &[f32],
        hooks: DecodeHooks<'_>,
    ) -> VlmResult<DecodeOutcome> {
        let token_ids = self.tokenize_prompt(prompt)?;
        let text_embeddings = self.embed_tokens(&token_ids)?;
        self.decode(&token_ids, &text_embeddings, vision_features, hooks)
    }

    /// Greedy autoregressive decode.
    ///
    /// The first step runs the full spliced sequence against an empty cache;
    /// each later step feeds only the newest token embedding, the next position
    /// id and a mask one longer than before, together with the cache the
    /// decoder returned last.
    pub fn decode(
        &self,
        token_ids: &[u32],
        text_embeddings: &[f32],
        vision_features: &[f32],
        hooks: DecodeHooks<'_>,
    ) -> VlmResult<DecodeOutcome> {
        let started = Instant::now();
        let hidden = self.config.hidden_size;
        let embeds = splice_image_features(
            token_ids,
            self.tokenizer.image_token_id(),
            text_embeddings,
            vision_features,
            hidden,
        )?;
        let prompt_len = embeds.len() / hidden;
        let max_tokens = self.params.max_new_tokens;
        info!(prompt_len, max_tokens, "starting decode");

        let mut cache = KvCache::empty(self.config)?;
        let stop = StopCriteria::new(self.tokenizer, self.params.repetition_guard_after);
        let boosts = padding_boosts(self.tokenizer);
        let full_vocab = self.tokenizer.full_vocab_size();

        if hooks.cancelled() {
            return Err(VlmError::Cancelled(0));
        }

        let positions: Vec<i64> = (0..prompt_len as i64).collect();
        let mask = vec![1i64; prompt_len];
        let mut outputs = self
            .backend
            .run_with_key_value_cache(
                DECODER_LOGICAL_NAME,
                &DecoderStep {
                    inputs_embeds: &embeds,
                    hidden_size: hidden,
                    position_ids: &positions,
                    attention_mask: &mask,
                    past_key_values: cache.entries(),
                },
            )
            .map_err(|err| VlmError::InitialLogits(Some(err)))?;
        let mut logits = take_logits(&mut outputs).ok_or(VlmError::InitialLogits(None))?;
        cache.replace_from(&mut outputs);

        let mut generated: Vec<u32> = Vec::new();
        let mut seq_len = prompt_len;
        let mut stop_reason = StopReason::MaxTokens;

        for step in 0..max_tokens {
            if hooks.cancelled() {
                info!(step, generated = generated.len(), "decode cancelled");
                return Err(VlmError::Cancelled(generated.len()));
            }

            let values = logits.as_f32().unwrap_or_default();
            let last = last_token_logits(values, logits.shape(), self.tokenizer.vocab_size());
            let last = pad_logits(last, full_vocab, &boosts);
            let next = select_next_token(&last, &self.params.suppress_tokens, self.tokenizer);

            if let Some(reason) = stop.check(step, next, &generated) {
                stop_reason = reason;
                break;
            }
            generated.push(next);
            if let Some(stream) = hooks.stream {
                stream(step, &generated);
            }
            if step + 1 >= max_tokens {
                break;
            }

            let token_embedding = self.embed_tokens(&[next])?;
            let positions = [seq_len as i64];
            seq_len += 1;
            let mask = vec![1i64; seq_len];
            outputs = self
                .backend
                .run_with_key_value_cache(
                    DECODER_LOGICAL_NAME,
                    &DecoderStep {
                        inputs_embeds: &token_embedding,
                        hidden_size: hidden,
                        position_ids: &positions,
                        attention_mask: &mask,
                        past_key_values: cache.entries(),
                    },
                )
                .map_err(|err| VlmError::StepLogits {
                    step: step + 1,
                    source: Some(err),
                })?;
            logits = take_logits(&mut outputs).ok_or(VlmError::StepLogits {
                step: step + 1,
                source: None,
            })?;
            cache.replace_from(&mut outputs);
            debug!(step, token = next, seq_len, "decode step complete");
        }

        let text = self.tokenizer.detokenize(&generated);
        info!(
            generated = generated.len(),
            ?stop_reason,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "decode finished"
        );
        Ok(DecodeOutcome {
            text,
            prompt_tokens: prompt_len,
            response_tokens: generated.len(),
            generated_tokens: generated,
            stop_reason,
        })
    }
}

fn take_logits(outputs: &mut TensorMap) -> Option<TensorData> {
    outputs.remove(LOGITS).filter(|logits| !logits.is_empty())
}
