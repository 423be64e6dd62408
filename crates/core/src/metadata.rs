use std::path::Path;

use fastvlm_ort::{SessionIo, TensorInfo};
use tracing::{debug, info};

use crate::config::{
    DEFAULT_IMAGE_CHANNELS, ImageSize, ModelConfig, load_preprocessor_image_size,
};

pub const PIXEL_VALUES: &str = "pixel_values";
pub const IMAGE_FEATURES: &str = "image_features";
pub const INPUT_IDS: &str = "input_ids";
pub const INPUTS_EMBEDS: &str = "inputs_embeds";
pub const LAST_HIDDEN_STATE: &str = "last_hidden_state";
pub const LOGITS: &str = "logits";

/// Vision encoder input geometry: `[1, channels, height, width]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisionInput {
    pub channels: usize,
    pub size: ImageSize,
}

impl Default for VisionInput {
    fn default() -> Self {
        Self {
            channels: DEFAULT_IMAGE_CHANNELS,
            size: ImageSize::default(),
        }
    }
}

impl VisionInput {
    pub fn shape(&self) -> [i64; 4] {
        [
            1,
            self.channels as i64,
            self.size.height as i64,
            self.size.width as i64,
        ]
    }

    pub fn element_count(&self) -> usize {
        self.channels * self.size.height * self.size.width
    }
}

/// Facts read from the declared inputs and outputs of the loaded sessions.
///
/// Everything here is advisory; unknown values stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelMetadata {
    pub channels: Option<usize>,
    pub image_size: Option<ImageSize>,
    pub hidden_size: Option<usize>,
}

fn positive_dim(dim: i64) -> Option<usize> {
    usize::try_from(dim).ok().filter(|&d| d > 0)
}

impl ModelMetadata {
    /// Reads channel count and resolution from `pixel_values` `[b, c, h, w]`.
    pub fn observe_vision_encoder(&mut self, io: &SessionIo) {
        let Some(pixels) = find(&io.inputs, PIXEL_VALUES) else {
            debug!("vision encoder declares no pixel_values input");
            return;
        };
        let [_, channels, height, width] = pixels.dims[..] else {
            debug!(dims = ?pixels.dims, "pixel_values is not rank 4");
            return;
        };
        if let Some(channels) = positive_dim(channels) {
            self.channels = Some(channels);
        }
        match (positive_dim(height), positive_dim(width)) {
            (Some(height), Some(width)) => {
                info!(height, width, "vision input resolution fixed by the model");
                self.image_size = Some(ImageSize { height, width });
            }
            _ => debug!(height, width, "vision input resolution is dynamic"),
        }
    }

    /// Reads the hidden size from the third dimension of the embedder output.
    pub fn observe_embed_tokens(&mut self, io: &SessionIo) {
        let output = find(&io.outputs, LAST_HIDDEN_STATE).or_else(|| find(&io.outputs, INPUTS_EMBEDS));
        let Some(output) = output else {
            return;
        };
        if let Some(hidden) = output.dims.get(2).copied().and_then(positive_dim) {
            info!(hidden, output = %output.name, "hidden size declared by the embedder");
            self.hidden_size = Some(hidden);
        }
    }

    /// Geometry for the vision encoder input.
    ///
    /// A static model resolution wins, then `preprocessor_config.json`, then the
    /// 336x336 default.
    pub fn vision_input(&self, model_dir: &Path) -> VisionInput {
        let size = self
            .image_size
            .or_else(|| load_preprocessor_image_size(model_dir))
            .unwrap_or_default();
        VisionInput {
            channels: self.channels.unwrap_or(DEFAULT_IMAGE_CHANNELS),
            size,
        }
    }

    /// Applies the discovered hidden size under any explicit config values.
    pub fn apply_to(&self, config: &mut ModelConfig) {
        if let Some(hidden) = self.hidden_size {
            config.hidden_size = hidden;
        }
    }
}

fn find<'a>(infos: &'a [TensorInfo], name: &str) -> Option<&'a TensorInfo> {
    infos.iter().find(|info| info.name == name)
}
