use std::fmt;
use std::time::Duration;

use fastvlm_core::{ErrorKind, StopReason};

/// Executor lifecycle events for logging, profiling and tests.
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    ModelLoadStarted {
        model_dir: String,
    },

    ModelLoadFinished {
        model_dir: String,
        hidden_size: usize,
        image_size: (usize, usize),
        model_bytes: u64,
        duration: Duration,
    },

    ModelLoadFailed {
        model_dir: String,
        error: String,
    },

    GenerationStarted {
        max_new_tokens: usize,
        has_image: bool,
    },

    GenerationFinished {
        prompt_tokens: usize,
        response_tokens: usize,
        stop_reason: StopReason,
        duration: Duration,
    },

    GenerationFailed {
        error_kind: ErrorKind,
        error: String,
        duration: Duration,
    },
}

fn format_duration_s(duration: &Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}

impl serde::Serialize for ExecutorEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use ExecutorEvent::*;

        match self {
            ModelLoadStarted { model_dir } => {
                #[derive(serde::Serialize)]
                struct Event<'a> {
                    kind: &'static str,
                    model_dir: &'a str,
                }

                Event {
                    kind: "model_load_started",
                    model_dir,
                }
                .serialize(serializer)
            }
            ModelLoadFinished {
                model_dir,
                hidden_size,
                image_size,
                model_bytes,
                duration,
            } => {
                #[derive(serde::Serialize)]
                struct Event<'a> {
                    kind: &'static str,
                    model_dir: &'a str,
                    hidden_size: usize,
                    image_height: usize,
                    image_width: usize,
                    model_bytes: u64,
                    duration_s: String,
                }

                Event {
                    kind: "model_load_finished",
                    model_dir,
                    hidden_size: *hidden_size,
                    image_height: image_size.0,
                    image_width: image_size.1,
                    model_bytes: *model_bytes,
                    duration_s: format_duration_s(duration),
                }
                .serialize(serializer)
            }
            ModelLoadFailed { model_dir, error } => {
                #[derive(serde::Serialize)]
                struct Event<'a> {
                    kind: &'static str,
                    model_dir: &'a str,
                    error: &'a str,
                }

                Event {
                    kind: "model_load_failed",
                    model_dir,
                    error,
                }
                .serialize(serializer)
            }
            GenerationStarted {
                max_new_tokens,
                has_image,
            } => {
                #[derive(serde::Serialize)]
                struct Event {
                    kind: &'static str,
                    max_new_tokens: usize,
                    has_image: bool,
                }

                Event {
                    kind: "generation_started",
                    max_new_tokens: *max_new_tokens,
                    has_image: *has_image,
                }
                .serialize(serializer)
            }
            GenerationFinished {
                prompt_tokens,
                response_tokens,
                stop_reason,
                duration,
            } => {
                #[derive(serde::Serialize)]
                struct Event<'a> {
                    kind: &'static str,
                    prompt_tokens: usize,
                    response_tokens: usize,
                    stop_reason: &'a StopReason,
                    duration_s: String,
                }

                Event {
                    kind: "generation_finished",
                    prompt_tokens: *prompt_tokens,
                    response_tokens: *response_tokens,
                    stop_reason,
                    duration_s: format_duration_s(duration),
                }
                .serialize(serializer)
            }
            GenerationFailed {
                error_kind,
                error,
                duration,
            } => {
                #[derive(serde::Serialize)]
                struct Event<'a> {
                    kind: &'static str,
                    error_kind: ErrorKind,
                    error: &'a str,
                    duration_s: String,
                }

                Event {
                    kind: "generation_failed",
                    error_kind: *error_kind,
                    error,
                    duration_s: format_duration_s(duration),
                }
                .serialize(serializer)
            }
        }
    }
}

impl fmt::Display for ExecutorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ExecutorEvent::*;

        match self {
            ModelLoadStarted { model_dir } => write!(f, "ModelLoadStarted {model_dir}"),
            ModelLoadFinished {
                model_dir,
                hidden_size,
                image_size,
                model_bytes,
                duration,
            } => write!(
                f,
                "ModelLoadFinished {model_dir} hidden_size={hidden_size} image={}x{} bytes={model_bytes} in {}",
                image_size.1,
                image_size.0,
                format_duration_s(duration)
            ),
            ModelLoadFailed { model_dir, error } => {
                write!(f, "ModelLoadFailed {model_dir}: {error}")
            }
            GenerationStarted {
                max_new_tokens,
                has_image,
            } => write!(
                f,
                "GenerationStarted max_new_tokens={max_new_tokens} image={has_image}"
            ),
            GenerationFinished {
                prompt_tokens,
                response_tokens,
                stop_reason,
                duration,
            } => write!(
                f,
                "GenerationFinished prompt_tokens={prompt_tokens} response_tokens={response_tokens} stop={stop_reason:?} in {}",
                format_duration_s(duration)
            ),
            GenerationFailed {
                error_kind,
                error,
                duration,
            } => write!(
                f,
                "GenerationFailed {error_kind:?}: {error} after {}",
                format_duration_s(duration)
            ),
        }
    }
}

/// Receives executor events. Every method defaults to doing nothing.
pub trait ExecutorObserver: Send + Sync {
    fn on_event(&self, _event: &ExecutorEvent) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl ExecutorObserver for NoopObserver {}
