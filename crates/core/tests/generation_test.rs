use std::{
    cell::RefCell,
    sync::{Mutex, atomic::{AtomicUsize, Ordering}},
};

use fastvlm_core::{
    CancellationToken, DecodeHooks, DecodeParameters, Generator, InferenceBackend, ModelComponent,
    ModelConfig, StopReason, Tokenizer, VisionInput, VlmError,
    metadata::{IMAGE_FEATURES, INPUTS_EMBEDS, LOGITS},
};
use fastvlm_ort::{OrtError, Result as OrtResult, SessionIo, TensorData, TensorInputs, TensorMap};
use serde_json::json;

const IM_END: u32 = 151_645;
const HELLO: u32 = 12;

fn tokenizer() -> Tokenizer {
    Tokenizer::from_json(
        &json!({
            "Describe": 0, "Ġthis": 2, "Ġimage.": 3, "Ġsystem": 4, "ĠYou": 5, "Ġare": 6,
            "Ġa": 7, "Ġhelpful": 8, "Ġassistant.": 9, "Ġuser": 10, "Ġassistant": 11,
            "Ġhello": 12, "ĠDescribe": 13
        }),
        &json!({"added_tokens_decoder": {
            "151643": {"content": "<|endoftext|>"},
            "151644": {"content": "<|im_start|>"},
            "151645": {"content": "<|im_end|>"},
            "151646": {"content": "<image>"}
        }}),
    )
    .unwrap()
}

fn small_config() -> ModelConfig {
    ModelConfig {
        hidden_size: 8,
        num_hidden_layers: 2,
        num_attention_heads: 2,
        num_key_value_heads: 1,
    }
}

#[derive(Debug, Clone)]
struct DecoderCall {
    seq: i64,
    positions: Vec<i64>,
    mask_len: usize,
    past_len: i64,
}

/// In-memory stand-in for the three model sessions.
///
/// The decoder emits a one-hot logit at `picks[call]` (the last pick repeats)
/// and grows every cache entry by the number of new positions.
struct StubBackend {
    config: ModelConfig,
    vision_tokens: usize,
    vocab: usize,
    picks: Vec<u32>,
    decoder_calls: Mutex<Vec<DecoderCall>>,
    embed_calls: AtomicUsize,
}

impl StubBackend {
    fn new(config: ModelConfig, vision_tokens: usize, picks: Vec<u32>) -> Self {
        Self {
            config,
            vision_tokens,
            vocab: 151_647,
            picks,
            decoder_calls: Mutex::new(Vec::new()),
            embed_calls: AtomicUsize::new(0),
        }
    }

    fn with_vocab(mut self, vocab: usize) -> Self {
        self.vocab = vocab;
        self
    }

    fn calls(&self) -> Vec<DecoderCall> {
        self.decoder_calls.lock().unwrap().clone()
    }

    fn vision_features(&self) -> Vec<f32> {
        vec![0.5; self.vision_tokens * self.config.hidden_size]
    }

    fn decoder(&self, inputs: &TensorInputs<'_>) -> OrtResult<TensorMap> {
        let seq = inputs[INPUTS_EMBEDS].shape()[1];
        let past_len = inputs["past_key_values.0.key"].shape()[2];
        let call = DecoderCall {
            seq,
            positions: inputs["position_ids"].as_i64().unwrap().to_vec(),
            mask_len: inputs["attention_mask"].len(),
            past_len,
        };
        let index = {
            let mut calls = self.decoder_calls.lock().unwrap();
            calls.push(call);
            calls.len() - 1
        };

        let pick = self.picks[index.min(self.picks.len() - 1)] as usize;
        let rows = seq as usize;
        let mut logits = vec![0.0f32; rows * self.vocab];
        if pick < self.vocab {
            logits[(rows - 1) * self.vocab + pick] = 1.0;
        }

        let mut outputs = TensorMap::new();
        outputs.insert(
            LOGITS.to_string(),
            TensorData::from_f32(logits, vec![1, seq, self.vocab as i64])?,
        );
        let kv_heads = self.config.num_key_value_heads as i64;
        let head_dim = self.config.head_dim() as i64;
        let total = past_len + seq;
        for layer in 0..self.config.num_hidden_layers {
            for kind in ["key", "value"] {
                let len = (kv_heads * total * head_dim) as usize;
                outputs.insert(
                    format!("present.{layer}.{kind}"),
                    TensorData::from_f32(vec![0.0; len], vec![1, kv_heads, total, head_dim])?,
                );
            }
        }
        Ok(outputs)
    }
}

impl InferenceBackend for StubBackend {
    fn run(&self, session: &str, inputs: &TensorInputs<'_>) -> OrtResult<TensorMap> {
        let hidden = self.config.hidden_size as i64;
        let mut outputs = TensorMap::new();
        match session {
            "vision_encoder" => {
                let tokens = self.vision_tokens as i64;
                outputs.insert(
                    IMAGE_FEATURES.to_string(),
                    TensorData::from_f32(self.vision_features(), vec![1, tokens, hidden])?,
                );
                Ok(outputs)
            }
            "embed_tokens" => {
                self.embed_calls.fetch_add(1, Ordering::SeqCst);
                let count = inputs["input_ids"].len() as i64;
                outputs.insert(
                    INPUTS_EMBEDS.to_string(),
                    TensorData::from_f32(
                        vec![0.1; (count * hidden) as usize],
                        vec![1, count, hidden],
                    )?,
                );
                Ok(outputs)
            }
            "decoder_model_merged" => self.decoder(inputs),
            other => Err(OrtError::SessionNotFound(other.to_string())),
        }
    }

    fn describe(&self, component: ModelComponent) -> OrtResult<SessionIo> {
        Err(OrtError::SessionNotFound(component.to_string()))
    }
}

fn params(max_new_tokens: usize) -> DecodeParameters {
    DecodeParameters {
        max_new_tokens,
        ..DecodeParameters::default()
    }
}

#[test]
fn immediate_end_of_sequence_yields_empty_text() {
    let config = ModelConfig::default();
    let backend = StubBackend::new(config, 576, vec![IM_END]);
    let tokenizer = tokenizer();
    let params = params(256);
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let features = backend.vision_features();
    assert_eq!(features.len(), 576 * 896);
    let outcome = generator
        .generate("Describe this image.", &features, DecodeHooks::default())
        .unwrap();

    assert_eq!(outcome.text, "");
    assert!(outcome.generated_tokens.is_empty());
    assert_eq!(outcome.stop_reason, StopReason::EndOfSequence(IM_END));

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    // 17 prompt tokens with the image token replaced by 576 feature rows.
    assert_eq!(outcome.prompt_tokens, 17 - 1 + 576);
    assert_eq!(calls[0].seq, outcome.prompt_tokens as i64);
    assert_eq!(calls[0].past_len, 0);
    assert_eq!(calls[0].positions.first(), Some(&0));
    assert_eq!(calls[0].positions.len(), outcome.prompt_tokens);
}

#[test]
fn stops_at_max_tokens_and_feeds_cache_forward() {
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![HELLO]);
    let tokenizer = tokenizer();
    let params = params(3);
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let outcome = generator
        .generate("Describe this image.", &backend.vision_features(), DecodeHooks::default())
        .unwrap();

    assert_eq!(outcome.generated_tokens, vec![HELLO; 3]);
    assert_eq!(outcome.response_tokens, 3);
    assert_eq!(outcome.text, "hello hello hello");
    assert_eq!(outcome.stop_reason, StopReason::MaxTokens);

    let prompt = outcome.prompt_tokens as i64;
    let calls = backend.calls();
    assert_eq!(calls.len(), 3);
    for (step, call) in calls.iter().enumerate().skip(1) {
        let offset = step as i64 - 1;
        assert_eq!(call.seq, 1);
        assert_eq!(call.positions, vec![prompt + offset]);
        assert_eq!(call.mask_len as i64, prompt + offset + 1);
        assert_eq!(call.past_len, prompt + offset);
    }
    // One prompt embedding plus one per fed-back token.
    assert_eq!(backend.embed_calls.load(Ordering::SeqCst), 3);
}

#[test]
fn zero_token_budget_still_runs_the_prompt() {
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![HELLO]);
    let tokenizer = tokenizer();
    let params = params(0);
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let outcome = generator
        .generate("Describe this image.", &backend.vision_features(), DecodeHooks::default())
        .unwrap();
    assert!(outcome.generated_tokens.is_empty());
    assert_eq!(outcome.stop_reason, StopReason::MaxTokens);
    assert_eq!(backend.calls().len(), 1);
}

#[test]
fn extra_image_placeholder_fails_before_decoding() {
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![HELLO]);
    let tokenizer = tokenizer();
    let params = params(8);
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let err = generator
        .generate("<image> Describe", &backend.vision_features(), DecodeHooks::default())
        .unwrap_err();
    assert!(matches!(err, VlmError::ImageTokenCount(2)));
    assert_eq!(err.to_string(), "Incorrect number of <image> tokens");
    assert!(backend.calls().is_empty());
}

#[test]
fn missing_image_placeholder_fails_before_decoding() {
    // Without an `<image>` special the placeholder text is dropped as unknown
    // characters, so the fallback id never appears in the prompt.
    let tokenizer = Tokenizer::from_json(
        &json!({"Describe": 0, "Ġthis": 2, "Ġimage.": 3, "Ġhello": 12}),
        &json!({"added_tokens_decoder": {
            "151643": {"content": "<|endoftext|>"},
            "151644": {"content": "<|im_start|>"},
            "151645": {"content": "<|im_end|>"}
        }}),
    )
    .unwrap();
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![HELLO]);
    let params = params(8);
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let err = generator
        .generate("Describe this image.", &backend.vision_features(), DecodeHooks::default())
        .unwrap_err();
    assert!(matches!(err, VlmError::NoImageToken));
    assert_eq!(err.to_string(), "No <image> tokens found in input");
    assert!(backend.calls().is_empty());
}

#[test]
fn empty_vision_features_fail_before_decoding() {
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![HELLO]);
    let tokenizer = tokenizer();
    let params = params(8);
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let err = generator
        .generate("Describe this image.", &[], DecodeHooks::default())
        .unwrap_err();
    assert!(matches!(err, VlmError::EmptyVisionFeatures));
    assert_eq!(err.to_string(), "Invalid input features");
    assert!(backend.calls().is_empty());
}

#[test]
fn mismatched_vision_features_are_rejected() {
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![HELLO]);
    let tokenizer = tokenizer();
    let params = params(8);
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let err = generator
        .generate("Describe this image.", &[0.0; 7], DecodeHooks::default())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Vision encoder output has incorrect dimensions"
    );
}

#[test]
fn padded_vocabulary_still_reaches_end_of_sequence() {
    // Model vocabulary stops at 14 ids, all logits zero; the padded <|im_end|>
    // slot carries the only positive logit.
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![u32::MAX]).with_vocab(14);
    let tokenizer = tokenizer();
    let params = params(8);
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let outcome = generator
        .generate("Describe this image.", &backend.vision_features(), DecodeHooks::default())
        .unwrap();
    assert_eq!(outcome.stop_reason, StopReason::EndOfSequence(IM_END));
    assert!(outcome.generated_tokens.is_empty());
}

#[test]
fn suppressed_tokens_are_never_selected() {
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![HELLO]);
    let tokenizer = tokenizer();
    let params = DecodeParameters {
        suppress_tokens: vec![HELLO],
        ..params(8)
    };
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let outcome = generator
        .generate("Describe this image.", &backend.vision_features(), DecodeHooks::default())
        .unwrap();
    // With the one-hot logit suppressed every slot ties and the lowest id wins.
    assert_eq!(outcome.generated_tokens, vec![0; 8]);
    assert_eq!(outcome.stop_reason, StopReason::MaxTokens);
}

#[test]
fn repeated_tokens_stop_after_the_guard_step() {
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![HELLO]);
    let tokenizer = tokenizer();
    let params = DecodeParameters {
        repetition_guard_after: 4,
        ..params(64)
    };
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let outcome = generator
        .generate("Describe this image.", &backend.vision_features(), DecodeHooks::default())
        .unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Repetition(HELLO));
    // Steps 0..=4 are accepted; step 5 is the first past the guard.
    assert_eq!(outcome.generated_tokens.len(), 5);
}

#[test]
fn stream_callback_sees_every_accepted_token() {
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![HELLO, 2, 3, IM_END]);
    let tokenizer = tokenizer();
    let params = params(16);
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let seen = RefCell::new(Vec::new());
    let stream = |step: usize, tokens: &[u32]| seen.borrow_mut().push((step, tokens.to_vec()));
    let hooks = DecodeHooks {
        stream: Some(&stream),
        ..DecodeHooks::default()
    };
    let outcome = generator
        .generate("Describe this image.", &backend.vision_features(), hooks)
        .unwrap();

    assert_eq!(outcome.text, "hello this image.");
    assert_eq!(
        seen.into_inner(),
        vec![
            (0, vec![HELLO]),
            (1, vec![HELLO, 2]),
            (2, vec![HELLO, 2, 3]),
        ]
    );
}

#[test]
fn cancellation_stops_between_steps() {
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![HELLO]);
    let tokenizer = tokenizer();
    let params = params(32);
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let cancel = CancellationToken::new();
    let stream = |_step: usize, tokens: &[u32]| {
        if tokens.len() == 2 {
            cancel.cancel();
        }
    };
    let hooks = DecodeHooks {
        cancel: Some(&cancel),
        stream: Some(&stream),
    };
    let err = generator
        .generate("Describe this image.", &backend.vision_features(), hooks)
        .unwrap_err();
    assert!(matches!(err, VlmError::Cancelled(2)));
}

#[test]
fn encodes_image_through_the_vision_session() {
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![IM_END]);
    let tokenizer = tokenizer();
    let params = params(8);
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let input = VisionInput::default();
    let features = generator
        .encode_image(vec![0.0; input.element_count()], input)
        .unwrap();
    assert_eq!(features.len(), 4 * 8);

    let err = generator.encode_image(vec![0.0; 3], input).unwrap_err();
    assert_eq!(err.to_string(), "Vision encoder failed");
}

#[test]
fn empty_prompt_is_rejected() {
    let config = small_config();
    let backend = StubBackend::new(config, 4, vec![IM_END]);
    let tokenizer = tokenizer();
    let params = params(8);
    let generator = Generator::new(&backend, &tokenizer, &config, &params);

    let err = generator
        .generate("", &backend.vision_features(), DecodeHooks::default())
        .unwrap_err();
    assert!(matches!(err, VlmError::EmptyPrompt));
}
