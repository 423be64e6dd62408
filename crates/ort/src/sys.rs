//! Raw declarations for the subset of the ONNX Runtime C API used by this crate.
//!
//! `OrtApi` is a versioned table of function pointers. Only a prefix of the table
//! is declared here; the layout of that prefix is frozen by the runtime's ABI
//! policy, so slots must never be reordered. Slots that are not called are kept
//! as opaque pointers purely to preserve offsets.

use std::ffi::{c_char, c_int, c_void};

/// Highest API version this binding is written against.
pub const ORT_API_VERSION: u32 = 16;

macro_rules! opaque {
    ($($name:ident),* $(,)?) => {
        $(
            #[repr(C)]
            pub struct $name {
                _private: [u8; 0],
            }
        )*
    };
}

opaque!(
    OrtEnv,
    OrtStatus,
    OrtMemoryInfo,
    OrtSession,
    OrtValue,
    OrtRunOptions,
    OrtTypeInfo,
    OrtTensorTypeAndShapeInfo,
    OrtSessionOptions,
    OrtAllocator,
);

#[cfg(windows)]
pub type OrtChar = u16;
#[cfg(not(windows))]
pub type OrtChar = c_char;

pub type OrtStatusPtr = *mut OrtStatus;
pub type OrtErrorCode = c_int;
pub type OrtLoggingLevel = c_int;
pub type OrtAllocatorType = c_int;
pub type OrtMemType = c_int;
pub type GraphOptimizationLevel = c_int;
pub type OnnxTensorElementDataType = c_int;

pub const ORT_LOGGING_LEVEL_VERBOSE: OrtLoggingLevel = 0;
pub const ORT_LOGGING_LEVEL_INFO: OrtLoggingLevel = 1;
pub const ORT_LOGGING_LEVEL_WARNING: OrtLoggingLevel = 2;
pub const ORT_LOGGING_LEVEL_ERROR: OrtLoggingLevel = 3;
pub const ORT_LOGGING_LEVEL_FATAL: OrtLoggingLevel = 4;

pub const ORT_ARENA_ALLOCATOR: OrtAllocatorType = 1;
pub const ORT_MEM_TYPE_DEFAULT: OrtMemType = 0;

pub const ORT_DISABLE_ALL: GraphOptimizationLevel = 0;
pub const ORT_ENABLE_BASIC: GraphOptimizationLevel = 1;
pub const ORT_ENABLE_EXTENDED: GraphOptimizationLevel = 2;
pub const ORT_ENABLE_ALL: GraphOptimizationLevel = 99;

pub const ONNX_TENSOR_ELEMENT_DATA_TYPE_FLOAT: OnnxTensorElementDataType = 1;
pub const ONNX_TENSOR_ELEMENT_DATA_TYPE_INT32: OnnxTensorElementDataType = 6;
pub const ONNX_TENSOR_ELEMENT_DATA_TYPE_INT64: OnnxTensorElementDataType = 7;

/// Placeholder for table entries that are never called.
pub type Slot = *const c_void;

pub type ReleaseFn<T> = unsafe extern "C" fn(*mut T);

#[repr(C)]
pub struct OrtApiBase {
    pub get_api: unsafe extern "C" fn(version: u32) -> *const OrtApi,
    pub get_version_string: unsafe extern "C" fn() -> *const c_char,
}

pub type GetApiBaseFn = unsafe extern "C" fn() -> *const OrtApiBase;

pub const GET_API_BASE_SYMBOL: &[u8] = b"OrtGetApiBase\0";

#[repr(C)]
pub struct OrtApi {
    // 0
    pub create_status: Slot,
    pub get_error_code: unsafe extern "C" fn(status: *const OrtStatus) -> OrtErrorCode,
    pub get_error_message: unsafe extern "C" fn(status: *const OrtStatus) -> *const c_char,
    pub create_env: unsafe extern "C" fn(
        level: OrtLoggingLevel,
        log_id: *const c_char,
        out: *mut *mut OrtEnv,
    ) -> OrtStatusPtr,
    pub create_env_with_custom_logger: Slot,
    pub enable_telemetry_events: Slot,
    pub disable_telemetry_events: Slot,
    pub create_session: unsafe extern "C" fn(
        env: *const OrtEnv,
        model_path: *const OrtChar,
        options: *const OrtSessionOptions,
        out: *mut *mut OrtSession,
    ) -> OrtStatusPtr,
    pub create_session_from_array: Slot,
    pub run: unsafe extern "C" fn(
        session: *mut OrtSession,
        run_options: *const OrtRunOptions,
        input_names: *const *const c_char,
        inputs: *const *const OrtValue,
        input_len: usize,
        output_names: *const *const c_char,
        output_names_len: usize,
        outputs: *mut *mut OrtValue,
    ) -> OrtStatusPtr,
    // 10
    pub create_session_options:
        unsafe extern "C" fn(out: *mut *mut OrtSessionOptions) -> OrtStatusPtr,
    pub set_optimized_model_file_path: Slot,
    pub clone_session_options: Slot,
    pub set_session_execution_mode: Slot,
    pub enable_profiling: Slot,
    pub disable_profiling: Slot,
    pub enable_mem_pattern: Slot,
    pub disable_mem_pattern: Slot,
    pub enable_cpu_mem_arena: Slot,
    pub disable_cpu_mem_arena: Slot,
    // 20
    pub set_session_log_id: Slot,
    pub set_session_log_verbosity_level: Slot,
    pub set_session_log_severity_level: Slot,
    pub set_session_graph_optimization_level: unsafe extern "C" fn(
        options: *mut OrtSessionOptions,
        level: GraphOptimizationLevel,
    ) -> OrtStatusPtr,
    pub set_intra_op_num_threads:
        unsafe extern "C" fn(options: *mut OrtSessionOptions, threads: c_int) -> OrtStatusPtr,
    pub set_inter_op_num_threads:
        unsafe extern "C" fn(options: *mut OrtSessionOptions, threads: c_int) -> OrtStatusPtr,
    pub create_custom_op_domain: Slot,
    pub custom_op_domain_add: Slot,
    pub add_custom_op_domain: Slot,
    pub register_custom_ops_library: Slot,
    // 30
    pub session_get_input_count:
        unsafe extern "C" fn(session: *const OrtSession, out: *mut usize) -> OrtStatusPtr,
    pub session_get_output_count:
        unsafe extern "C" fn(session: *const OrtSession, out: *mut usize) -> OrtStatusPtr,
    pub session_get_overridable_initializer_count: Slot,
    pub session_get_input_type_info: unsafe extern "C" fn(
        session: *const OrtSession,
        index: usize,
        out: *mut *mut OrtTypeInfo,
    ) -> OrtStatusPtr,
    pub session_get_output_type_info: unsafe extern "C" fn(
        session: *const OrtSession,
        index: usize,
        out: *mut *mut OrtTypeInfo,
    ) -> OrtStatusPtr,
    pub session_get_overridable_initializer_type_info: Slot,
    pub session_get_input_name: unsafe extern "C" fn(
        session: *const OrtSession,
        index: usize,
        allocator: *mut OrtAllocator,
        out: *mut *mut c_char,
    ) -> OrtStatusPtr,
    pub session_get_output_name: unsafe extern "C" fn(
        session: *const OrtSession,
        index: usize,
        allocator: *mut OrtAllocator,
        out: *mut *mut c_char,
    ) -> OrtStatusPtr,
    pub session_get_overridable_initializer_name: Slot,
    pub create_run_options: Slot,
    // 40
    pub run_options_set_run_log_verbosity_level: Slot,
    pub run_options_set_run_log_severity_level: Slot,
    pub run_options_set_run_tag: Slot,
    pub run_options_get_run_log_verbosity_level: Slot,
    pub run_options_get_run_log_severity_level: Slot,
    pub run_options_get_run_tag: Slot,
    pub run_options_set_terminate: Slot,
    pub run_options_unset_terminate: Slot,
    pub create_tensor_as_ort_value: Slot,
    pub create_tensor_with_data_as_ort_value: unsafe extern "C" fn(
        info: *const OrtMemoryInfo,
        data: *mut c_void,
        data_len: usize,
        shape: *const i64,
        shape_len: usize,
        element_type: OnnxTensorElementDataType,
        out: *mut *mut OrtValue,
    ) -> OrtStatusPtr,
    // 50
    pub is_tensor: Slot,
    pub get_tensor_mutable_data:
        unsafe extern "C" fn(value: *mut OrtValue, out: *mut *mut c_void) -> OrtStatusPtr,
    pub fill_string_tensor: Slot,
    pub get_string_tensor_data_length: Slot,
    pub get_string_tensor_content: Slot,
    pub cast_type_info_to_tensor_info: unsafe extern "C" fn(
        type_info: *const OrtTypeInfo,
        out: *mut *const OrtTensorTypeAndShapeInfo,
    ) -> OrtStatusPtr,
    pub get_onnx_type_from_type_info: Slot,
    pub create_tensor_type_and_shape_info: Slot,
    pub set_tensor_element_type: Slot,
    pub set_dimensions: Slot,
    // 60
    pub get_tensor_element_type: unsafe extern "C" fn(
        info: *const OrtTensorTypeAndShapeInfo,
        out: *mut OnnxTensorElementDataType,
    ) -> OrtStatusPtr,
    pub get_dimensions_count: unsafe extern "C" fn(
        info: *const OrtTensorTypeAndShapeInfo,
        out: *mut usize,
    ) -> OrtStatusPtr,
    pub get_dimensions: unsafe extern "C" fn(
        info: *const OrtTensorTypeAndShapeInfo,
        dims: *mut i64,
        dims_len: usize,
    ) -> OrtStatusPtr,
    pub get_symbolic_dimensions: Slot,
    pub get_tensor_shape_element_count: unsafe extern "C" fn(
        info: *const OrtTensorTypeAndShapeInfo,
        out: *mut usize,
    ) -> OrtStatusPtr,
    pub get_tensor_type_and_shape: unsafe extern "C" fn(
        value: *const OrtValue,
        out: *mut *mut OrtTensorTypeAndShapeInfo,
    ) -> OrtStatusPtr,
    pub get_type_info: Slot,
    pub get_value_type: Slot,
    pub create_memory_info: Slot,
    pub create_cpu_memory_info: unsafe extern "C" fn(
        allocator_type: OrtAllocatorType,
        mem_type: OrtMemType,
        out: *mut *mut OrtMemoryInfo,
    ) -> OrtStatusPtr,
    // 70
    pub compare_memory_info: Slot,
    pub memory_info_get_name: Slot,
    pub memory_info_get_id: Slot,
    pub memory_info_get_mem_type: Slot,
    pub memory_info_get_type: Slot,
    pub allocator_alloc: Slot,
    pub allocator_free:
        unsafe extern "C" fn(allocator: *mut OrtAllocator, ptr: *mut c_void) -> OrtStatusPtr,
    pub allocator_get_info: Slot,
    pub get_allocator_with_default_options:
        unsafe extern "C" fn(out: *mut *mut OrtAllocator) -> OrtStatusPtr,
    pub add_free_dimension_override: Slot,
    // 80
    pub get_value: Slot,
    pub get_value_count: Slot,
    pub create_value: Slot,
    pub create_opaque_value: Slot,
    pub get_opaque_value: Slot,
    pub kernel_info_get_attribute_float: Slot,
    pub kernel_info_get_attribute_int64: Slot,
    pub kernel_info_get_attribute_string: Slot,
    pub kernel_context_get_input_count: Slot,
    pub kernel_context_get_output_count: Slot,
    // 90
    pub kernel_context_get_input: Slot,
    pub kernel_context_get_output: Slot,
    pub release_env: ReleaseFn<OrtEnv>,
    pub release_status: ReleaseFn<OrtStatus>,
    pub release_memory_info: ReleaseFn<OrtMemoryInfo>,
    pub release_session: ReleaseFn<OrtSession>,
    pub release_value: ReleaseFn<OrtValue>,
    pub release_run_options: ReleaseFn<OrtRunOptions>,
    pub release_type_info: ReleaseFn<OrtTypeInfo>,
    pub release_tensor_type_and_shape_info: ReleaseFn<OrtTensorTypeAndShapeInfo>,
    // 100
    pub release_session_options: ReleaseFn<OrtSessionOptions>,
}
