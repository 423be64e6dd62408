use std::{
    path::PathBuf,
    sync::mpsc::{self, Receiver, Sender},
    thread::{self, JoinHandle},
};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error};

use crate::{
    api::{InferenceRequest, InferenceResult},
    executor::{FastVlmExecutor, LoadState},
};

pub type LoadCallback = Box<dyn FnOnce(bool) + Send>;
pub type InferenceCallback = Box<dyn FnOnce(InferenceResult) + Send>;
/// Owned counterpart of [`fastvlm_core::StreamCallback`] that can cross threads.
pub type TokenStream = Box<dyn Fn(usize, &[u32]) + Send>;

/// Snapshot of the executor's load state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorStatus {
    pub state: LoadState,
    pub last_error: Option<String>,
}

enum Command {
    Load {
        model_dir: PathBuf,
        callback: LoadCallback,
    },
    Infer {
        request: InferenceRequest,
        stream: Option<TokenStream>,
        callback: InferenceCallback,
    },
    Status {
        callback: Box<dyn FnOnce(ExecutorStatus) + Send>,
    },
}

/// Runs one executor on its own thread.
///
/// Commands execute strictly in the order they were posted and every
/// callback runs on the executor thread. Dropping the handle lets queued
/// commands finish, then joins the thread.
pub struct ExecutorHandle {
    commands: Option<Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl ExecutorHandle {
    pub fn spawn(executor: FastVlmExecutor) -> Result<Self> {
        let (commands, inbox) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("fastvlm-executor".to_string())
            .spawn(move || serve(executor, inbox))
            .context("failed to spawn executor thread")?;
        Ok(Self {
            commands: Some(commands),
            thread: Some(thread),
        })
    }

    fn post(&self, command: Command) -> Result<()> {
        self.commands
            .as_ref()
            .context("executor handle is shut down")?
            .send(command)
            .map_err(|_| anyhow!("executor thread has stopped"))
    }

    pub fn load_model(
        &self,
        model_dir: impl Into<PathBuf>,
        callback: impl FnOnce(bool) + Send + 'static,
    ) -> Result<()> {
        self.post(Command::Load {
            model_dir: model_dir.into(),
            callback: Box::new(callback),
        })
    }

    pub fn run_inference(
        &self,
        request: InferenceRequest,
        stream: Option<TokenStream>,
        callback: impl FnOnce(InferenceResult) + Send + 'static,
    ) -> Result<()> {
        self.post(Command::Infer {
            request,
            stream,
            callback: Box::new(callback),
        })
    }

    pub fn status(&self, callback: impl FnOnce(ExecutorStatus) + Send + 'static) -> Result<()> {
        self.post(Command::Status {
            callback: Box::new(callback),
        })
    }

    /// Posts a load and waits for its completion.
    pub fn load_model_blocking(&self, model_dir: impl Into<PathBuf>) -> Result<bool> {
        let (reply, done) = mpsc::channel();
        self.load_model(model_dir, move |loaded| {
            let _ = reply.send(loaded);
        })?;
        done.recv().context("executor dropped the load reply")
    }

    /// Posts a request and waits for its result.
    pub fn infer_blocking(
        &self,
        request: InferenceRequest,
        stream: Option<TokenStream>,
    ) -> Result<InferenceResult> {
        let (reply, done) = mpsc::channel();
        self.run_inference(request, stream, move |result| {
            let _ = reply.send(result);
        })?;
        done.recv().context("executor dropped the inference reply")
    }

    pub fn status_blocking(&self) -> Result<ExecutorStatus> {
        let (reply, done) = mpsc::channel();
        self.status(move |status| {
            let _ = reply.send(status);
        })?;
        done.recv().context("executor dropped the status reply")
    }
}

impl Drop for ExecutorHandle {
    fn drop(&mut self) {
        // Closing the channel ends the serve loop once the queue drains.
        drop(self.commands.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("executor thread panicked");
            }
        }
    }
}

fn serve(mut executor: FastVlmExecutor, inbox: Receiver<Command>) {
    debug!("executor thread started");
    for command in inbox {
        match command {
            Command::Load {
                model_dir,
                callback,
            } => executor.load_model(&model_dir, callback),
            Command::Infer {
                request,
                stream,
                callback,
            } => {
                let stream = stream
                    .as_deref()
                    .map(|stream| stream as &dyn Fn(usize, &[u32]));
                callback(InferenceResult::from(executor.infer(&request, stream)));
            }
            Command::Status { callback } => callback(ExecutorStatus {
                state: executor.state(),
                last_error: executor.last_error().map(str::to_string),
            }),
        }
    }
    debug!("executor thread exiting");
}
