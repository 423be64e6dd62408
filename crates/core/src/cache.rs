use fastvlm_ort::{Result, TensorData, TensorMap};
use tracing::{debug, trace};

use crate::config::ModelConfig;

pub fn past_key_name(layer: usize) -> String {
    format!("past_key_values.{layer}.key")
}

pub fn past_value_name(layer: usize) -> String {
    format!("past_key_values.{layer}.value")
}

pub fn present_key_name(layer: usize) -> String {
    format!("present.{layer}.key")
}

pub fn present_value_name(layer: usize) -> String {
    format!("present.{layer}.value")
}

/// Decoder key/value cache carried between steps.
///
/// Each step the decoder returns the full accumulated cache as
/// `present.{layer}.{key,value}`; those tensors replace the stored
/// `past_key_values.{layer}.{key,value}` entries outright.
#[derive(Debug, Clone)]
pub struct KvCache {
    entries: TensorMap,
    num_layers: usize,
}

impl KvCache {
    /// Zero-length cache for the first step, one key and one value per layer
    /// shaped `[1, kv_heads, 0, head_dim]`.
    pub fn empty(config: &ModelConfig) -> Result<Self> {
        let head_dim = config.head_dim();
        let shape = vec![1, config.num_key_value_heads as i64, 0, head_dim as i64];
        let mut entries = TensorMap::new();
        for layer in 0..config.num_hidden_layers {
            entries.insert(
                past_key_name(layer),
                TensorData::from_f32(Vec::new(), shape.clone())?,
            );
            entries.insert(
                past_value_name(layer),
                TensorData::from_f32(Vec::new(), shape.clone())?,
            );
        }
        Ok(Self {
            entries,
            num_layers: config.num_hidden_layers,
        })
    }

    pub fn entries(&self) -> &TensorMap {
        &self.entries
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    /// Sequence length held by layer 0, read from the key's third dimension.
    pub fn seq_len(&self) -> Option<usize> {
        self.entries
            .get(&past_key_name(0))
            .and_then(|key| key.shape().get(2).copied())
            .and_then(|dim| usize::try_from(dim).ok())
    }

    /// Moves every `present.*` tensor out of `outputs` into the cache.
    ///
    /// Layers the decoder did not return keep their previous entry. Returns
    /// the number of tensors replaced.
    pub fn replace_from(&mut self, outputs: &mut TensorMap) -> usize {
        let mut replaced = 0;
        for layer in 0..self.num_layers {
            for (present, past) in [
                (present_key_name(layer), past_key_name(layer)),
                (present_value_name(layer), past_value_name(layer)),
            ] {
                if let Some(tensor) = outputs.remove(&present) {
                    trace!(layer, name = %past, shape = ?tensor.shape(), "cache entry replaced");
                    self.entries.insert(past, tensor);
                    replaced += 1;
                }
            }
        }
        debug!(replaced, seq_len = ?self.seq_len(), "updated key/value cache");
        replaced
    }
}
