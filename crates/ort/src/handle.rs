use std::{fmt, marker::PhantomData, ptr};

use tracing::warn;

use crate::{
    runtime::runtime,
    sys::{
        OrtApi, OrtEnv, OrtMemoryInfo, OrtSession, OrtSessionOptions, OrtStatus,
        OrtTensorTypeAndShapeInfo, OrtTypeInfo, OrtValue, ReleaseFn,
    },
};

/// A native handle type paired with the runtime function that releases it.
pub trait NativeHandle: Sized {
    const NAME: &'static str;

    fn release_fn(api: &OrtApi) -> ReleaseFn<Self>;
}

macro_rules! native_handle {
    ($ty:ty, $name:literal, $release:ident) => {
        impl NativeHandle for $ty {
            const NAME: &'static str = $name;

            fn release_fn(api: &OrtApi) -> ReleaseFn<Self> {
                api.$release
            }
        }
    };
}

native_handle!(OrtEnv, "OrtEnv", release_env);
native_handle!(OrtStatus, "OrtStatus", release_status);
native_handle!(OrtMemoryInfo, "OrtMemoryInfo", release_memory_info);
native_handle!(OrtSession, "OrtSession", release_session);
native_handle!(OrtSessionOptions, "OrtSessionOptions", release_session_options);
native_handle!(OrtValue, "OrtValue", release_value);
native_handle!(OrtTypeInfo, "OrtTypeInfo", release_type_info);
native_handle!(
    OrtTensorTypeAndShapeInfo,
    "OrtTensorTypeAndShapeInfo",
    release_tensor_type_and_shape_info
);

/// Move-only owner of one native handle.
///
/// Starts out invalid (null). Native calls that produce a handle through an
/// output pointer write into [`Scoped::receiver`]; whatever the holder owns when
/// it is dropped or reset goes back through the type's release function.
pub struct Scoped<T: NativeHandle> {
    ptr: *mut T,
    _owns: PhantomData<T>,
}

pub type ScopedEnv = Scoped<OrtEnv>;
pub type ScopedStatus = Scoped<OrtStatus>;
pub type ScopedMemoryInfo = Scoped<OrtMemoryInfo>;
pub type ScopedSession = Scoped<OrtSession>;
pub type ScopedSessionOptions = Scoped<OrtSessionOptions>;
pub type ScopedValue = Scoped<OrtValue>;
pub type ScopedTypeInfo = Scoped<OrtTypeInfo>;
pub type ScopedTensorTypeAndShapeInfo = Scoped<OrtTensorTypeAndShapeInfo>;

impl<T: NativeHandle> Scoped<T> {
    pub const fn invalid() -> Self {
        Self {
            ptr: ptr::null_mut(),
            _owns: PhantomData,
        }
    }

    /// Takes ownership of a raw handle.
    ///
    /// # Safety
    /// `ptr` must be null or a live handle of type `T` that nothing else releases.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self {
            ptr,
            _owns: PhantomData,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.ptr.is_null()
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr
    }

    /// Output-pointer slot for a native call that populates this handle.
    ///
    /// Any handle currently held is released first.
    pub fn receiver(&mut self) -> *mut *mut T {
        self.reset();
        &mut self.ptr
    }

    pub fn reset(&mut self) {
        let ptr = std::mem::replace(&mut self.ptr, ptr::null_mut());
        if ptr.is_null() {
            return;
        }
        match runtime() {
            Ok(runtime) => unsafe { (T::release_fn(runtime.api()))(ptr) },
            Err(_) => warn!(handle = T::NAME, "runtime unavailable; leaking native handle"),
        }
    }

    /// Gives up ownership without releasing.
    pub fn into_raw(mut self) -> *mut T {
        std::mem::replace(&mut self.ptr, ptr::null_mut())
    }
}

impl<T: NativeHandle> Default for Scoped<T> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<T: NativeHandle> Drop for Scoped<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: NativeHandle> fmt::Debug for Scoped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoped")
            .field("type", &T::NAME)
            .field("ptr", &self.ptr)
            .finish()
    }
}

// Each holder is the unique owner of its handle.
unsafe impl<T: NativeHandle> Send for Scoped<T> {}
// Environments and sessions are documented as safe for concurrent use.
unsafe impl Sync for Scoped<OrtEnv> {}
unsafe impl Sync for Scoped<OrtSession> {}
