use std::{ffi::CString, fmt, str::FromStr, sync::Arc};

use tracing::info;

use crate::{
    error::{OrtError, Result},
    handle::ScopedEnv,
    runtime::runtime,
    sys::{self, OrtEnv},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingLevel {
    Verbose,
    Info,
    #[default]
    Warning,
    Error,
    Fatal,
}

impl LoggingLevel {
    fn as_raw(self) -> sys::OrtLoggingLevel {
        match self {
            Self::Verbose => sys::ORT_LOGGING_LEVEL_VERBOSE,
            Self::Info => sys::ORT_LOGGING_LEVEL_INFO,
            Self::Warning => sys::ORT_LOGGING_LEVEL_WARNING,
            Self::Error => sys::ORT_LOGGING_LEVEL_ERROR,
            Self::Fatal => sys::ORT_LOGGING_LEVEL_FATAL,
        }
    }
}

impl FromStr for LoggingLevel {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "verbose" => Ok(Self::Verbose),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(format!("unknown onnxruntime log level `{other}`")),
        }
    }
}

impl fmt::Display for LoggingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Verbose => "verbose",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Shared native runtime context.
///
/// Held behind an `Arc`; every session is created against it and the last
/// holder releases the native environment.
#[derive(Debug)]
pub struct Environment {
    handle: ScopedEnv,
    level: LoggingLevel,
}

impl Environment {
    pub fn create(level: LoggingLevel, log_id: &str) -> Result<Arc<Self>> {
        let runtime = runtime()?;
        let api = runtime.api();
        let log_id = CString::new(log_id).map_err(|_| OrtError::InvalidName(log_id.to_string()))?;

        let mut handle = ScopedEnv::invalid();
        runtime.check(unsafe { (api.create_env)(level.as_raw(), log_id.as_ptr(), handle.receiver()) })?;
        if !handle.is_valid() {
            return Err(OrtError::NullHandle { call: "CreateEnv" });
        }

        info!(%level, "onnxruntime environment created");
        Ok(Arc::new(Self { handle, level }))
    }

    pub fn as_ptr(&self) -> *const OrtEnv {
        self.handle.as_ptr()
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn level(&self) -> LoggingLevel {
        self.level
    }
}
