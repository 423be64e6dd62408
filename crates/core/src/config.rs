use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

pub const MODEL_CONFIG_FILE: &str = "config.json";
pub const PREPROCESSOR_CONFIG_FILE: &str = "preprocessor_config.json";

/// Square input resolution used when neither the model nor the preprocessor
/// config pins one.
pub const DEFAULT_IMAGE_SIZE: usize = 336;
pub const DEFAULT_IMAGE_CHANNELS: usize = 3;

/// Decoder hyperparameters of the exported language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: 896,
            num_hidden_layers: 24,
            num_attention_heads: 14,
            num_key_value_heads: 2,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.hidden_size > 0, "hidden_size must be > 0");
        ensure!(
            self.num_attention_heads > 0,
            "num_attention_heads must be > 0"
        );
        ensure!(
            self.num_key_value_heads > 0,
            "num_key_value_heads must be > 0"
        );
        ensure!(
            self.hidden_size % self.num_attention_heads == 0,
            "hidden_size {} is not divisible by num_attention_heads {}",
            self.hidden_size,
            self.num_attention_heads
        );
        Ok(())
    }

    /// Per-head width of the key/value cache.
    pub fn head_dim(&self) -> usize {
        if self.num_attention_heads == 0 {
            return 0;
        }
        self.hidden_size / self.num_attention_heads
    }
}

/// Fields found in `config.json`. Absent or non-positive fields stay `None`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfigPatch {
    pub hidden_size: Option<usize>,
    pub num_hidden_layers: Option<usize>,
    pub num_attention_heads: Option<usize>,
    pub num_key_value_heads: Option<usize>,
}

impl ModelConfigPatch {
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .context("model config must be a JSON object")?;
        Ok(Self {
            hidden_size: positive_field(map, "hidden_size"),
            num_hidden_layers: positive_field(map, "num_hidden_layers"),
            num_attention_heads: positive_field(map, "num_attention_heads"),
            num_key_value_heads: positive_field(map, "num_key_value_heads"),
        })
    }

    /// Reads `config.json` from `model_dir`.
    ///
    /// An unreadable or malformed file is not an error; it yields an empty
    /// patch so the current values are kept.
    pub fn load(model_dir: &Path) -> Self {
        let path = model_dir.join(MODEL_CONFIG_FILE);
        let parsed = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))
            .and_then(|raw| {
                serde_json::from_str::<Value>(&raw)
                    .with_context(|| format!("failed to parse {}", path.display()))
            })
            .and_then(|value| Self::from_json(&value));
        match parsed {
            Ok(patch) => {
                info!(path = %path.display(), ?patch, "loaded model config");
                patch
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "using default model hyperparameters");
                Self::default()
            }
        }
    }
}

impl std::ops::AddAssign<&ModelConfigPatch> for ModelConfig {
    fn add_assign(&mut self, rhs: &ModelConfigPatch) {
        if let Some(hidden_size) = rhs.hidden_size {
            self.hidden_size = hidden_size;
        }
        if let Some(layers) = rhs.num_hidden_layers {
            self.num_hidden_layers = layers;
        }
        if let Some(heads) = rhs.num_attention_heads {
            self.num_attention_heads = heads;
        }
        if let Some(kv_heads) = rhs.num_key_value_heads {
            self.num_key_value_heads = kv_heads;
        }
    }
}

fn positive_field(map: &Map<String, Value>, key: &str) -> Option<usize> {
    match map.get(key) {
        None => None,
        Some(value) => match value.as_u64().and_then(|v| usize::try_from(v).ok()) {
            Some(v) if v > 0 => Some(v),
            _ => {
                warn!(field = key, %value, "ignoring non-positive or non-integer config value");
                None
            }
        },
    }
}

/// Target resolution declared by `preprocessor_config.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub height: usize,
    pub width: usize,
}

impl ImageSize {
    pub const fn square(size: usize) -> Self {
        Self {
            height: size,
            width: size,
        }
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::square(DEFAULT_IMAGE_SIZE)
    }
}

/// Resolves the image size from a parsed preprocessor config.
///
/// `size` takes precedence over `image_size`; a `size` without usable fields
/// falls through to `image_size`. Each may be a square integer, a
/// `{height, width}` object, or an object carrying `shortest_edge`.
pub fn image_size_from_json(value: &Value) -> Option<ImageSize> {
    let root = value.as_object()?;
    ["size", "image_size"]
        .into_iter()
        .filter_map(|key| root.get(key))
        .find_map(parse_image_size)
}

fn parse_image_size(size: &Value) -> Option<ImageSize> {
    if let Some(square) = positive(size) {
        return Some(ImageSize::square(square));
    }
    let dims = size.as_object()?;
    if let (Some(height), Some(width)) = (
        dims.get("height").and_then(positive),
        dims.get("width").and_then(positive),
    ) {
        return Some(ImageSize { height, width });
    }
    dims.get("shortest_edge")
        .and_then(positive)
        .map(ImageSize::square)
}

/// Reads the image size from `preprocessor_config.json` in `model_dir`, if any.
pub fn load_preprocessor_image_size(model_dir: &Path) -> Option<ImageSize> {
    let path = model_dir.join(PREPROCESSOR_CONFIG_FILE);
    let raw = fs::read_to_string(&path).ok()?;
    let value: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring malformed preprocessor config");
            return None;
        }
    };
    let size = image_size_from_json(&value);
    if size.is_none() {
        warn!(path = %path.display(), "no usable image size in preprocessor config");
    }
    size
}

fn positive(value: &Value) -> Option<usize> {
    value
        .as_u64()
        .and_then(|v| usize::try_from(v).ok())
        .filter(|&v| v > 0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn patch_overrides_only_present_fields() {
        let patch = ModelConfigPatch::from_json(&json!({
            "hidden_size": 1536,
            "num_hidden_layers": "28",
            "num_key_value_heads": 0
        }))
        .unwrap();
        let mut config = ModelConfig::default();
        config += &patch;
        assert_eq!(config.hidden_size, 1536);
        assert_eq!(config.num_hidden_layers, 24);
        assert_eq!(config.num_attention_heads, 14);
        assert_eq!(config.num_key_value_heads, 2);
    }

    #[test]
    fn image_size_precedence() {
        assert_eq!(
            image_size_from_json(&json!({"size": 512, "image_size": 224})),
            Some(ImageSize::square(512))
        );
        assert_eq!(
            image_size_from_json(&json!({"image_size": {"height": 320, "width": 480}})),
            Some(ImageSize {
                height: 320,
                width: 480
            })
        );
        assert_eq!(
            image_size_from_json(&json!({"size": {"shortest_edge": 384}})),
            Some(ImageSize::square(384))
        );
        assert_eq!(
            image_size_from_json(&json!({"size": {"crop": true}, "image_size": 448})),
            Some(ImageSize::square(448))
        );
        assert_eq!(image_size_from_json(&json!({"size": -1})), None);
        assert_eq!(image_size_from_json(&json!({"crop_size": 224})), None);
    }

    #[test]
    fn head_dim_divides_hidden_size() {
        assert_eq!(ModelConfig::default().head_dim(), 64);
        assert!(ModelConfig::default().validate().is_ok());

        let ragged = ModelConfig {
            hidden_size: 900,
            ..ModelConfig::default()
        };
        let err = ragged.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "hidden_size 900 is not divisible by num_attention_heads 14"
        );
    }
}
