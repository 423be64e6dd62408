pub mod args;
pub mod config;

pub use args::{CommonInferenceArgs, CommonModelArgs, CommonRuntimeArgs, build_config_overrides};
pub use config::{
    AppConfig, ConfigOverrides, DEFAULT_LIBRARY, InferenceOverride, InferenceSettings,
    ModelSettings, RuntimeConfig, RuntimeOverride,
};
