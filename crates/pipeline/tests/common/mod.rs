#![allow(dead_code)]

use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::Result;
use fastvlm_core::{InferenceBackend, ModelComponent};
use fastvlm_ort::{
    ElementType, OrtError, Result as OrtResult, SessionIo, TensorData, TensorInfo, TensorInputs,
    TensorMap,
};
use fastvlm_pipeline::{
    ExecutorEvent, ExecutorObserver, FastVlmExecutor, ImageWorker, LoadError, ModelLoader,
    SelectedModels,
};
use serde_json::json;

pub const HIDDEN: usize = 8;
pub const LAYERS: usize = 2;
pub const KV_HEADS: usize = 1;
pub const HEAD_DIM: usize = 4;
pub const VISION_TOKENS: usize = 4;
pub const IMAGE_SIDE: i64 = 32;
pub const FULL_VOCAB: usize = 151_647;

pub const IM_END: u32 = 151_645;
pub const HELLO: u32 = 12;

pub const MODEL_FILES: [&str; 3] = [
    "vision_encoder_q4.onnx",
    "embed_tokens.onnx",
    "decoder_model_merged_int8.onnx",
];

/// Lays out a model directory with small hyperparameters, a tokenizer and
/// placeholder model files.
pub fn write_model_dir(root: &Path, onnx_files: &[&str]) -> Result<PathBuf> {
    let dir = root.join("fastvlm");
    let onnx = dir.join("onnx");
    fs::create_dir_all(&onnx)?;
    for name in onnx_files {
        fs::write(onnx.join(name), b"onnx")?;
    }
    fs::write(
        dir.join("config.json"),
        json!({
            "hidden_size": HIDDEN,
            "num_hidden_layers": LAYERS,
            "num_attention_heads": 2,
            "num_key_value_heads": KV_HEADS
        })
        .to_string(),
    )?;
    fs::write(
        dir.join("vocab.json"),
        json!({
            "Describe": 0, "Ġthis": 2, "Ġimage.": 3, "Ġsystem": 4, "ĠYou": 5, "Ġare": 6,
            "Ġa": 7, "Ġhelpful": 8, "Ġassistant.": 9, "Ġuser": 10, "Ġassistant": 11,
            "Ġhello": 12, "ĠDescribe": 13
        })
        .to_string(),
    )?;
    fs::write(
        dir.join("tokenizer_config.json"),
        json!({"added_tokens_decoder": {
            "151643": {"content": "<|endoftext|>", "special": true},
            "151644": {"content": "<|im_start|>", "special": true},
            "151645": {"content": "<|im_end|>", "special": true},
            "151646": {"content": "<image>", "special": true}
        }})
        .to_string(),
    )?;
    Ok(dir)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 10]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn info(name: &str, dims: Vec<i64>) -> TensorInfo {
    TensorInfo {
        name: name.to_string(),
        element_type: ElementType::Float,
        dims,
    }
}

/// Session stand-in: fixed-size vision features, constant embeddings and a
/// decoder that emits `picks[call]` (the last pick repeats).
pub struct StubBackend {
    picks: Vec<u32>,
    decoder_calls: Arc<AtomicUsize>,
}

impl StubBackend {
    fn decoder(&self, inputs: &TensorInputs<'_>) -> OrtResult<TensorMap> {
        let call = self.decoder_calls.fetch_add(1, Ordering::SeqCst);
        let seq = inputs["inputs_embeds"].shape()[1];
        let past = inputs["past_key_values.0.key"].shape()[2];

        let pick = self.picks[call.min(self.picks.len() - 1)] as usize;
        let rows = seq as usize;
        let mut logits = vec![0.0f32; rows * FULL_VOCAB];
        logits[(rows - 1) * FULL_VOCAB + pick] = 1.0;

        let mut outputs = TensorMap::new();
        outputs.insert(
            "logits".to_string(),
            TensorData::from_f32(logits, vec![1, seq, FULL_VOCAB as i64])?,
        );
        let total = past + seq;
        for layer in 0..LAYERS {
            for kind in ["key", "value"] {
                outputs.insert(
                    format!("present.{layer}.{kind}"),
                    TensorData::from_f32(
                        vec![0.0; KV_HEADS * total as usize * HEAD_DIM],
                        vec![1, KV_HEADS as i64, total, HEAD_DIM as i64],
                    )?,
                );
            }
        }
        Ok(outputs)
    }
}

impl InferenceBackend for StubBackend {
    fn run(&self, session: &str, inputs: &TensorInputs<'_>) -> OrtResult<TensorMap> {
        let hidden = HIDDEN as i64;
        let mut outputs = TensorMap::new();
        match session {
            "vision_encoder" => {
                let pixels = inputs["pixel_values"];
                assert_eq!(pixels.shape(), &[1, 3, IMAGE_SIDE, IMAGE_SIDE]);
                let tokens = VISION_TOKENS as i64;
                outputs.insert(
                    "image_features".to_string(),
                    TensorData::from_f32(
                        vec![0.25; VISION_TOKENS * HIDDEN],
                        vec![1, tokens, hidden],
                    )?,
                );
            }
            "embed_tokens" => {
                let count = inputs["input_ids"].len() as i64;
                outputs.insert(
                    "inputs_embeds".to_string(),
                    TensorData::from_f32(
                        vec![0.1; count as usize * HIDDEN],
                        vec![1, count, hidden],
                    )?,
                );
            }
            "decoder_model_merged" => return self.decoder(inputs),
            other => return Err(OrtError::SessionNotFound(other.to_string())),
        }
        Ok(outputs)
    }

    fn describe(&self, component: ModelComponent) -> OrtResult<SessionIo> {
        match component {
            ModelComponent::VisionEncoder => Ok(SessionIo {
                inputs: vec![info("pixel_values", vec![1, 3, IMAGE_SIDE, IMAGE_SIDE])],
                outputs: vec![info("image_features", vec![1, -1, HIDDEN as i64])],
            }),
            ModelComponent::EmbedTokens => Ok(SessionIo {
                inputs: vec![info("input_ids", vec![1, -1])],
                outputs: vec![info("inputs_embeds", vec![1, -1, HIDDEN as i64])],
            }),
            ModelComponent::DecoderModelMerged => {
                Err(OrtError::SessionNotFound(component.to_string()))
            }
        }
    }
}

/// Loader handing out [`StubBackend`]s.
pub struct StubLoader {
    pub fail_initialize: bool,
    pub picks: Vec<u32>,
    pub initialized: Arc<AtomicUsize>,
    pub decoder_calls: Arc<AtomicUsize>,
    pub selected: Arc<Mutex<Option<SelectedModels>>>,
}

impl StubLoader {
    pub fn new(picks: Vec<u32>) -> Self {
        Self {
            fail_initialize: false,
            picks,
            initialized: Arc::default(),
            decoder_calls: Arc::default(),
            selected: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_initialize: true,
            ..Self::new(vec![IM_END])
        }
    }
}

impl ModelLoader for StubLoader {
    fn initialize(&mut self) -> Result<(), LoadError> {
        if self.fail_initialize {
            return Err(LoadError::RuntimeUnavailable(OrtError::NotInitialized));
        }
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_backend(
        &mut self,
        models: &SelectedModels,
    ) -> Result<Box<dyn InferenceBackend>, LoadError> {
        *self.selected.lock().unwrap() = Some(models.clone());
        Ok(Box::new(StubBackend {
            picks: self.picks.clone(),
            decoder_calls: Arc::clone(&self.decoder_calls),
        }))
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<ExecutorEvent>>,
}

impl RecordingObserver {
    pub fn kinds(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| serde_json::to_value(event).unwrap()["kind"].as_str().unwrap().to_string())
            .collect()
    }
}

impl ExecutorObserver for RecordingObserver {
    fn on_event(&self, event: &ExecutorEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn executor(loader: StubLoader) -> FastVlmExecutor {
    FastVlmExecutor::new(Box::new(loader), ImageWorker::new(1).unwrap())
}
