use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use fastvlm_core::{
    DecodeParameters,
    inference::{DEFAULT_MAX_NEW_TOKENS, DEFAULT_REPETITION_GUARD_AFTER},
};
use fastvlm_ort::{GraphOptimization, LoggingLevel, SessionSettings, sys::ORT_API_VERSION};
use serde::{Deserialize, Serialize};
use tracing::info;

#[cfg(target_os = "windows")]
pub const DEFAULT_LIBRARY: &str = "onnxruntime.dll";
#[cfg(target_os = "macos")]
pub const DEFAULT_LIBRARY: &str = "libonnxruntime.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const DEFAULT_LIBRARY: &str = "libonnxruntime.so";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub model: ModelSettings,
    pub inference: InferenceSettings,
}

/// Native runtime location and session options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bare file names are resolved by the platform loader's search path.
    pub library_path: PathBuf,
    pub api_version: u32,
    pub log_level: String,
    pub log_id: String,
    pub intra_op_threads: Option<u16>,
    pub inter_op_threads: Option<u16>,
    pub graph_optimization: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            library_path: PathBuf::from(DEFAULT_LIBRARY),
            api_version: ORT_API_VERSION,
            log_level: LoggingLevel::default().to_string(),
            log_id: "fastvlm".to_string(),
            intra_op_threads: None,
            inter_op_threads: None,
            graph_optimization: GraphOptimization::default().to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn log_level(&self) -> Result<LoggingLevel> {
        self.log_level
            .parse()
            .map_err(|err: String| anyhow!(err))
            .context("invalid [runtime].log_level")
    }

    pub fn graph_optimization(&self) -> Result<GraphOptimization> {
        self.graph_optimization
            .parse()
            .map_err(|err: String| anyhow!(err))
            .context("invalid [runtime].graph_optimization")
    }

    pub fn session_settings(&self) -> Result<SessionSettings> {
        Ok(SessionSettings {
            intra_op_threads: self.intra_op_threads,
            inter_op_threads: self.inter_op_threads,
            graph_optimization: self.graph_optimization()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelSettings {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub max_tokens: usize,
    /// Image preprocessing threads; `0` picks one per core.
    pub worker_threads: usize,
    pub repetition_guard_after: usize,
    pub suppress_tokens: Vec<u32>,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_NEW_TOKENS,
            worker_threads: 0,
            repetition_guard_after: DEFAULT_REPETITION_GUARD_AFTER,
            suppress_tokens: Vec::new(),
        }
    }
}

impl InferenceSettings {
    pub fn decode_parameters(&self) -> DecodeParameters {
        DecodeParameters {
            max_new_tokens: self.max_tokens,
            repetition_guard_after: self.repetition_guard_after,
            suppress_tokens: self.suppress_tokens.clone(),
            ..DecodeParameters::default()
        }
    }
}

impl AppConfig {
    /// Reads `path`, writing the defaults there first when it does not exist.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
            let cfg = AppConfig::default();
            cfg.save(path)?;
            info!(path = %path.display(), "wrote default configuration");
            return Ok(cfg);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse configuration at {}", path.display()))
    }

    /// File layer first, then command-line overrides. Without a config path
    /// the built-in defaults are the file layer.
    pub fn load_with_overrides(overrides: &ConfigOverrides) -> Result<Self> {
        let mut cfg = match overrides.config_path.as_deref() {
            Some(path) => Self::load_or_init(path)?,
            None => AppConfig::default(),
        };
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = toml::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write configuration to {}", path.display()))
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(dir) = overrides.model_dir.as_ref() {
            self.model.dir = Some(dir.clone());
        }
        self.runtime += &overrides.runtime;
        self.inference += &overrides.inference;
    }

    pub fn validate(&self) -> Result<()> {
        if self.runtime.library_path.as_os_str().is_empty() {
            bail!("[runtime].library_path must not be empty");
        }
        if self.runtime.log_id.is_empty() {
            bail!("[runtime].log_id must not be empty");
        }
        self.runtime.log_level()?;
        self.runtime.graph_optimization()?;
        Ok(())
    }

    pub fn model_dir(&self) -> Result<&Path> {
        self.model
            .dir
            .as_deref()
            .context("no model directory configured; pass --model-dir or set [model].dir")
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub runtime: RuntimeOverride,
    pub inference: InferenceOverride,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RuntimeOverride {
    pub library_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub intra_op_threads: Option<u16>,
    pub inter_op_threads: Option<u16>,
    pub graph_optimization: Option<String>,
}

impl std::ops::AddAssign<&RuntimeOverride> for RuntimeConfig {
    fn add_assign(&mut self, rhs: &RuntimeOverride) {
        if let Some(path) = rhs.library_path.as_ref() {
            self.library_path = path.clone();
        }
        if let Some(level) = rhs.log_level.as_ref() {
            self.log_level = level.clone();
        }
        if rhs.intra_op_threads.is_some() {
            self.intra_op_threads = rhs.intra_op_threads;
        }
        if rhs.inter_op_threads.is_some() {
            self.inter_op_threads = rhs.inter_op_threads;
        }
        if let Some(level) = rhs.graph_optimization.as_ref() {
            self.graph_optimization = level.clone();
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InferenceOverride {
    pub max_tokens: Option<usize>,
    pub worker_threads: Option<usize>,
    pub repetition_guard_after: Option<usize>,
    pub suppress_tokens: Option<Vec<u32>>,
}

impl std::ops::AddAssign<&InferenceOverride> for InferenceSettings {
    fn add_assign(&mut self, rhs: &InferenceOverride) {
        if let Some(max_tokens) = rhs.max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(threads) = rhs.worker_threads {
            self.worker_threads = threads;
        }
        if let Some(guard) = rhs.repetition_guard_after {
            self.repetition_guard_after = guard;
        }
        if let Some(tokens) = rhs.suppress_tokens.as_ref() {
            self.suppress_tokens = tokens.clone();
        }
    }
}
