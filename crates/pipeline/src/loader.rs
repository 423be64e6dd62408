use std::{path::PathBuf, sync::Arc};

use fastvlm_core::InferenceBackend;
use fastvlm_ort::{
    Environment, LoggingLevel, OrtError, OrtRuntime, SessionRegistry, SessionSettings,
    sys::ORT_API_VERSION,
};
use tracing::info;

use crate::{error::LoadError, model::SelectedModels};

pub const DEFAULT_LOG_ID: &str = "fastvlm";

/// Where to find the native runtime and how to configure it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub library_path: PathBuf,
    pub api_version: u32,
    pub log_level: LoggingLevel,
    pub log_id: String,
    pub session: SessionSettings,
}

impl RuntimeSettings {
    pub fn new(library_path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: library_path.into(),
            api_version: ORT_API_VERSION,
            log_level: LoggingLevel::default(),
            log_id: DEFAULT_LOG_ID.to_string(),
            session: SessionSettings::default(),
        }
    }
}

/// Turns a set of selected model files into a runnable backend.
pub trait ModelLoader: Send {
    /// Makes the native runtime usable. Called on every load; implementations
    /// only do the work once.
    fn initialize(&mut self) -> Result<(), LoadError>;

    fn create_backend(
        &mut self,
        models: &SelectedModels,
    ) -> Result<Box<dyn InferenceBackend>, LoadError>;
}

/// Loads sessions through the dynamically loaded ONNX Runtime.
pub struct OrtModelLoader {
    settings: RuntimeSettings,
    env: Option<Arc<Environment>>,
}

impl OrtModelLoader {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            settings,
            env: None,
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }
}

impl ModelLoader for OrtModelLoader {
    fn initialize(&mut self) -> Result<(), LoadError> {
        if self.env.is_some() {
            return Ok(());
        }
        info!(
            library = %self.settings.library_path.display(),
            "initializing onnxruntime lazily for model loading"
        );
        let runtime =
            OrtRuntime::get_instance_with_api(&self.settings.library_path, self.settings.api_version)
                .map_err(LoadError::RuntimeUnavailable)?;
        let env = Environment::create(self.settings.log_level, &self.settings.log_id)
            .map_err(LoadError::RuntimeUnavailable)?;
        info!(version = runtime.version(), "onnxruntime environment ready");
        self.env = Some(env);
        Ok(())
    }

    fn create_backend(
        &mut self,
        models: &SelectedModels,
    ) -> Result<Box<dyn InferenceBackend>, LoadError> {
        let env = self
            .env
            .clone()
            .ok_or(LoadError::RuntimeUnavailable(OrtError::NotInitialized))?;
        let mut registry = SessionRegistry::new(env, self.settings.session);
        for model in models.iter() {
            info!(model = %model.component, file = %model.file_name, "creating session");
            registry
                .create_session(&model.path, model.component.session_name())
                .map_err(|source| LoadError::SessionCreation {
                    component: model.component,
                    source,
                })?;
        }
        info!(sessions = registry.len(), "all sessions created");
        Ok(Box::new(registry))
    }
}
