use std::sync::mpsc;

use anyhow::{Context, Result};
use fastvlm_core::{VisionInput, VlmError, VlmResult, vision::preprocess_image_bytes};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

/// Pool that decodes and rescales images off the calling thread.
pub struct ImageWorker {
    pool: ThreadPool,
}

impl ImageWorker {
    /// `threads == 0` lets rayon pick the thread count.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("fastvlm-image-{idx}"))
            .build()
            .context("failed to initialize image worker pool")?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queues preprocessing of `bytes`; the result arrives on the returned
    /// receiver.
    pub fn submit(&self, bytes: Vec<u8>, input: VisionInput) -> mpsc::Receiver<VlmResult<Vec<f32>>> {
        let (reply, result) = mpsc::channel();
        debug!(bytes = bytes.len(), "queueing image preprocessing");
        self.pool.spawn(move || {
            // The receiver may be gone if the caller stopped waiting.
            let _ = reply.send(preprocess_image_bytes(&bytes, input));
        });
        result
    }

    /// Runs [`submit`](Self::submit) and blocks for the reply.
    pub fn preprocess(&self, bytes: Vec<u8>, input: VisionInput) -> VlmResult<Vec<f32>> {
        self.submit(bytes, input)
            .recv()
            .map_err(|_| VlmError::ImageDecode("image worker stopped before replying".into()))?
    }
}
