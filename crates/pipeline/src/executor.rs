use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use fastvlm_core::{
    DecodeHooks, DecodeOutcome, DecodeParameters, DecodeParametersPatch, Generator,
    InferenceBackend, ModelComponent, ModelConfig, ModelConfigPatch, ModelMetadata,
    StreamCallback, Tokenizer, VisionInput, VlmError, VlmResult,
};
use fastvlm_ort::SessionIo;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    api::{InferenceRequest, InferenceResult},
    error::LoadError,
    loader::ModelLoader,
    model::{ONNX_DIR, SelectedModels, discover_model_files},
    observer::{ExecutorEvent, ExecutorObserver, NoopObserver},
    worker::ImageWorker,
};

const NOT_READY: &str = "Model not ready";

/// Load state of a [`FastVlmExecutor`].
///
/// `Error` persists until the next load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    #[default]
    Uninitialized,
    LoadingModels,
    Ready,
    Error,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::LoadingModels => "loading_models",
            Self::Ready => "ready",
            Self::Error => "error",
        })
    }
}

struct LoadedModel {
    model_dir: PathBuf,
    backend: Box<dyn InferenceBackend>,
    tokenizer: Tokenizer,
    config: ModelConfig,
    vision: VisionInput,
    selected: SelectedModels,
}

/// Owns one loaded FastVLM model and serves requests against it.
///
/// Loading walks `Uninitialized -> LoadingModels -> Ready | Error`. A failed
/// inference leaves a `Ready` executor ready.
pub struct FastVlmExecutor {
    loader: Box<dyn ModelLoader>,
    worker: ImageWorker,
    params: DecodeParameters,
    observer: Arc<dyn ExecutorObserver>,
    state: LoadState,
    last_error: Option<String>,
    model: Option<LoadedModel>,
}

impl FastVlmExecutor {
    pub fn new(loader: Box<dyn ModelLoader>, worker: ImageWorker) -> Self {
        Self {
            loader,
            worker,
            params: DecodeParameters::default(),
            observer: Arc::new(NoopObserver),
            state: LoadState::Uninitialized,
            last_error: None,
            model: None,
        }
    }

    /// Decode defaults; a request's `max_tokens` still overrides
    /// `max_new_tokens`.
    pub fn with_params(mut self, params: DecodeParameters) -> Self {
        self.params = params;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutorObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }

    pub fn params(&self) -> &DecodeParameters {
        &self.params
    }

    pub fn model_dir(&self) -> Option<&Path> {
        self.model.as_ref().map(|model| model.model_dir.as_path())
    }

    pub fn selected_models(&self) -> Option<&SelectedModels> {
        self.model.as_ref().map(|model| &model.selected)
    }

    pub fn model_config(&self) -> Option<&ModelConfig> {
        self.model.as_ref().map(|model| &model.config)
    }

    pub fn vision_input(&self) -> Option<VisionInput> {
        self.model.as_ref().map(|model| model.vision)
    }

    pub fn tokenizer(&self) -> Option<&Tokenizer> {
        self.model.as_ref().map(|model| &model.tokenizer)
    }

    /// Loads the model in `model_dir` and reports success to `callback`.
    ///
    /// On failure the reason is kept in [`last_error`](Self::last_error).
    pub fn load_model(&mut self, model_dir: &Path, callback: impl FnOnce(bool)) {
        let loaded = self.load(model_dir).is_ok();
        callback(loaded);
    }

    pub fn load(&mut self, model_dir: &Path) -> Result<(), LoadError> {
        let started = Instant::now();
        let dir_label = model_dir.display().to_string();
        info!(model_dir = %dir_label, state = %self.state, "loading FastVLM model");
        self.observer.on_event(&ExecutorEvent::ModelLoadStarted {
            model_dir: dir_label.clone(),
        });

        self.model = None;
        self.last_error = None;
        match self.load_uncached(model_dir) {
            Ok(model) => {
                self.observer.on_event(&ExecutorEvent::ModelLoadFinished {
                    model_dir: dir_label,
                    hidden_size: model.config.hidden_size,
                    image_size: (model.vision.size.height, model.vision.size.width),
                    model_bytes: model.selected.total_bytes(),
                    duration: started.elapsed(),
                });
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "all FastVLM sessions loaded"
                );
                self.model = Some(model);
                self.state = LoadState::Ready;
                Ok(())
            }
            Err(err) => {
                error!(model_dir = %dir_label, error = %format!("{err:#}"), "model load failed");
                self.state = LoadState::Error;
                self.last_error = Some(err.to_string());
                self.observer.on_event(&ExecutorEvent::ModelLoadFailed {
                    model_dir: dir_label,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn load_uncached(&mut self, model_dir: &Path) -> Result<LoadedModel, LoadError> {
        if !model_dir.is_dir() {
            return Err(LoadError::ModelDirNotFound(model_dir.to_path_buf()));
        }
        self.loader.initialize()?;
        self.state = LoadState::LoadingModels;

        let selected = discover_model_files(&model_dir.join(ONNX_DIR))?;
        let backend = self.loader.create_backend(&selected)?;
        let metadata = extract_metadata(backend.as_ref());

        let mut config = ModelConfig::default();
        metadata.apply_to(&mut config);
        config += &ModelConfigPatch::load(model_dir);
        config.validate().map_err(LoadError::ModelConfig)?;
        let vision = metadata.vision_input(model_dir);
        info!(?config, ?vision, "model hyperparameters resolved");

        let tokenizer = Tokenizer::load(model_dir).map_err(LoadError::Tokenizer)?;

        Ok(LoadedModel {
            model_dir: model_dir.to_path_buf(),
            backend,
            tokenizer,
            config,
            vision,
            selected,
        })
    }

    fn ready_model(&self) -> VlmResult<&LoadedModel> {
        match (self.state, &self.model) {
            (LoadState::Ready, Some(model)) => Ok(model),
            (LoadState::Error, _) => Err(VlmError::NotReady(
                self.last_error
                    .clone()
                    .unwrap_or_else(|| NOT_READY.to_string()),
            )),
            _ => Err(VlmError::NotReady(NOT_READY.to_string())),
        }
    }

    /// Declared inputs and outputs of every loaded session.
    pub fn describe_sessions(&self) -> VlmResult<Vec<(ModelComponent, SessionIo)>> {
        let model = self.ready_model()?;
        ModelComponent::ALL
            .into_iter()
            .map(|component| -> VlmResult<_> {
                Ok((component, model.backend.describe(component)?))
            })
            .collect()
    }

    /// Runs `request` and hands the result to `callback`.
    ///
    /// A request made before the model is ready fails without touching any
    /// session.
    pub fn run_inference(&self, request: &InferenceRequest, callback: impl FnOnce(InferenceResult)) {
        callback(InferenceResult::from(self.infer(request, None)));
    }

    /// Runs `request`, reporting each accepted token to `stream`.
    pub fn infer(
        &self,
        request: &InferenceRequest,
        stream: StreamCallback<'_>,
    ) -> VlmResult<DecodeOutcome> {
        let model = match self.ready_model() {
            Ok(model) => model,
            Err(err) => {
                error!(state = %self.state, error = %err, "inference requested before model is ready");
                return Err(err);
            }
        };
        info!(prompt = %request.prompt, max_tokens = request.max_tokens, "running inference");

        let params = self.params.clone()
            + &DecodeParametersPatch {
                max_new_tokens: Some(request.max_tokens),
                ..DecodeParametersPatch::default()
            };
        let generator = Generator::new(
            model.backend.as_ref(),
            &model.tokenizer,
            &model.config,
            &params,
        );

        let started = Instant::now();
        self.observer.on_event(&ExecutorEvent::GenerationStarted {
            max_new_tokens: request.max_tokens,
            has_image: !request.image_bytes.is_empty(),
        });
        let result = self.generate(&generator, model.vision, request, stream);
        let duration = started.elapsed();
        match &result {
            Ok(outcome) => self.observer.on_event(&ExecutorEvent::GenerationFinished {
                prompt_tokens: outcome.prompt_tokens,
                response_tokens: outcome.response_tokens,
                stop_reason: outcome.stop_reason,
                duration,
            }),
            Err(err) => {
                warn!(kind = ?err.kind(), error = %err, "inference failed");
                self.observer.on_event(&ExecutorEvent::GenerationFailed {
                    error_kind: err.kind(),
                    error: err.to_string(),
                    duration,
                });
            }
        }
        result
    }

    fn generate(
        &self,
        generator: &Generator<'_>,
        vision: VisionInput,
        request: &InferenceRequest,
        stream: StreamCallback<'_>,
    ) -> VlmResult<DecodeOutcome> {
        // Without image bytes the features stay empty and the splice rejects
        // the request before any decoder call.
        let vision_features = if request.image_bytes.is_empty() {
            warn!("no image supplied");
            Vec::new()
        } else {
            let pixels = self.worker.preprocess(request.image_bytes.clone(), vision)?;
            generator.encode_image(pixels, vision)?
        };
        let hooks = DecodeHooks {
            cancel: request.cancel.as_ref(),
            stream,
        };
        generator.generate(&request.prompt, &vision_features, hooks)
    }
}

/// Reads static shapes from the vision encoder and the token embedder.
///
/// Sessions that cannot be described are skipped with a warning.
fn extract_metadata(backend: &dyn InferenceBackend) -> ModelMetadata {
    let mut metadata = ModelMetadata::default();
    for component in ModelComponent::ALL {
        let io = match backend.describe(component) {
            Ok(io) => io,
            Err(err) => {
                warn!(model = %component, error = %err, "metadata extraction failed");
                continue;
            }
        };
        info!(
            model = %component,
            inputs = io.inputs.len(),
            outputs = io.outputs.len(),
            "extracted model metadata"
        );
        match component {
            ModelComponent::VisionEncoder => metadata.observe_vision_encoder(&io),
            ModelComponent::EmbedTokens => metadata.observe_embed_tokens(&io),
            ModelComponent::DecoderModelMerged => {}
        }
    }
    metadata
}
