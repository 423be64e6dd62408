use std::{
    ffi::{CStr, c_char},
    path::{Path, PathBuf},
};

use libloading::Library;
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{
    error::{OrtError, Result},
    handle::ScopedStatus,
    sys::{self, GetApiBaseFn, OrtApi, OrtStatusPtr},
};

static RUNTIME: OnceCell<OrtRuntime> = OnceCell::new();

/// Process-wide handle on the loaded onnxruntime shared library.
///
/// The library is loaded at most once. Later calls to [`OrtRuntime::get_instance`]
/// return the cached instance even when a different path is supplied. A failed
/// load leaves the slot empty so that a later call may retry.
pub struct OrtRuntime {
    api: &'static OrtApi,
    version: String,
    library_path: PathBuf,
    _library: Library,
}

// The function table is immutable static data owned by the library, and the
// library itself lives for the rest of the process once stored in `RUNTIME`.
unsafe impl Send for OrtRuntime {}
unsafe impl Sync for OrtRuntime {}

impl OrtRuntime {
    pub fn get_instance(library_path: impl AsRef<Path>) -> Result<&'static OrtRuntime> {
        Self::get_instance_with_api(library_path, sys::ORT_API_VERSION)
    }

    pub fn get_instance_with_api(
        library_path: impl AsRef<Path>,
        api_version: u32,
    ) -> Result<&'static OrtRuntime> {
        let library_path = library_path.as_ref();
        let runtime = RUNTIME.get_or_try_init(|| Self::load(library_path, api_version))?;
        if runtime.library_path != library_path {
            debug!(
                loaded = %runtime.library_path.display(),
                requested = %library_path.display(),
                "onnxruntime already loaded; ignoring requested library path"
            );
        }
        Ok(runtime)
    }

    /// Returns the loaded runtime, if any call to `get_instance` has succeeded.
    pub fn instance() -> Option<&'static OrtRuntime> {
        RUNTIME.get()
    }

    pub fn is_initialized() -> bool {
        RUNTIME.get().is_some()
    }

    fn load(path: &Path, api_version: u32) -> Result<Self> {
        info!(path = %path.display(), api_version, "loading onnxruntime");

        let library = unsafe { Library::new(path) }.map_err(|source| OrtError::LibraryLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let get_api_base: GetApiBaseFn = {
            let symbol = unsafe { library.get::<GetApiBaseFn>(sys::GET_API_BASE_SYMBOL) }
                .map_err(|source| OrtError::MissingEntryPoint {
                    path: path.to_path_buf(),
                    source,
                })?;
            *symbol
        };

        let base = unsafe { get_api_base() };
        if base.is_null() {
            return Err(OrtError::NullHandle {
                call: "OrtGetApiBase",
            });
        }
        let base = unsafe { &*base };
        let version = unsafe { c_string((base.get_version_string)()) };

        let api = unsafe { (base.get_api)(api_version) };
        if api.is_null() {
            warn!(%version, api_version, "onnxruntime rejected the requested API version");
            return Err(OrtError::UnsupportedApiVersion {
                requested: api_version,
                runtime_version: version,
            });
        }

        info!(%version, "onnxruntime loaded");
        Ok(Self {
            api: unsafe { &*api },
            version,
            library_path: path.to_path_buf(),
            _library: library,
        })
    }

    pub fn api(&self) -> &'static OrtApi {
        self.api
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    /// Converts a status returned by a native call into a `Result`, releasing it.
    pub fn check(&self, status: OrtStatusPtr) -> Result<()> {
        if status.is_null() {
            return Ok(());
        }
        let status = unsafe { ScopedStatus::from_raw(status) };
        let code = unsafe { (self.api.get_error_code)(status.as_ptr()) };
        let message = unsafe { c_string((self.api.get_error_message)(status.as_ptr())) };
        Err(OrtError::Status { code, message })
    }
}

/// Accessor used by handle destructors and the session layer.
pub(crate) fn runtime() -> Result<&'static OrtRuntime> {
    OrtRuntime::instance().ok_or(OrtError::NotInitialized)
}

/// Copies a NUL-terminated string owned by the runtime.
///
/// # Safety
/// `ptr` must be null or point to a valid NUL-terminated string.
pub(crate) unsafe fn c_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}
