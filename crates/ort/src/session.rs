use std::{
    borrow::Cow,
    ffi::{CString, c_char, c_void},
    fmt,
    path::{Path, PathBuf},
    ptr, slice,
    str::FromStr,
};

use tracing::{debug, error, info, warn};

use crate::{
    environment::Environment,
    error::{OrtError, Result},
    handle::{
        ScopedMemoryInfo, ScopedSession, ScopedSessionOptions, ScopedTensorTypeAndShapeInfo,
        ScopedTypeInfo, ScopedValue,
    },
    runtime::{OrtRuntime, c_string, runtime},
    sys::{self, OrtAllocator, OrtChar, OrtSession, OrtStatusPtr, OrtTensorTypeAndShapeInfo},
    tensor::{ElementType, TensorData, TensorInputs, TensorMap, TensorValues, element_count},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphOptimization {
    Disabled,
    Basic,
    Extended,
    #[default]
    All,
}

impl GraphOptimization {
    fn as_raw(self) -> sys::GraphOptimizationLevel {
        match self {
            Self::Disabled => sys::ORT_DISABLE_ALL,
            Self::Basic => sys::ORT_ENABLE_BASIC,
            Self::Extended => sys::ORT_ENABLE_EXTENDED,
            Self::All => sys::ORT_ENABLE_ALL,
        }
    }
}

impl FromStr for GraphOptimization {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" | "none" => Ok(Self::Disabled),
            "basic" => Ok(Self::Basic),
            "extended" => Ok(Self::Extended),
            "all" => Ok(Self::All),
            other => Err(format!("unknown graph optimization level `{other}`")),
        }
    }
}

impl fmt::Display for GraphOptimization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Basic => "basic",
            Self::Extended => "extended",
            Self::All => "all",
        })
    }
}

/// Options applied to every session before it is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSettings {
    pub intra_op_threads: Option<u16>,
    pub inter_op_threads: Option<u16>,
    pub graph_optimization: GraphOptimization,
}

impl SessionSettings {
    fn build(&self, runtime: &OrtRuntime) -> Result<ScopedSessionOptions> {
        let api = runtime.api();
        let mut options = ScopedSessionOptions::invalid();
        runtime.check(unsafe { (api.create_session_options)(options.receiver()) })?;
        if !options.is_valid() {
            return Err(OrtError::NullHandle {
                call: "CreateSessionOptions",
            });
        }
        runtime.check(unsafe {
            (api.set_session_graph_optimization_level)(
                options.as_ptr(),
                self.graph_optimization.as_raw(),
            )
        })?;
        if let Some(threads) = self.intra_op_threads {
            runtime.check(unsafe {
                (api.set_intra_op_num_threads)(options.as_ptr(), i32::from(threads))
            })?;
        }
        if let Some(threads) = self.inter_op_threads {
            runtime.check(unsafe {
                (api.set_inter_op_num_threads)(options.as_ptr(), i32::from(threads))
            })?;
        }
        Ok(options)
    }
}

/// Declared name, element type and dimensions of one model input or output.
///
/// Dynamic dimensions are reported as non-positive values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    pub name: String,
    pub element_type: ElementType,
    pub dims: Vec<i64>,
}

impl fmt::Display for TensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .dims
            .iter()
            .map(|dim| dim.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} {} [{dims}]", self.name, self.element_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIo {
    pub inputs: Vec<TensorInfo>,
    pub outputs: Vec<TensorInfo>,
}

#[derive(Debug, Clone, Copy)]
enum Port {
    Input,
    Output,
}

struct NativePath {
    #[cfg(windows)]
    wide: Vec<u16>,
    #[cfg(not(windows))]
    narrow: CString,
}

impl NativePath {
    #[cfg(windows)]
    fn new(path: &Path) -> Result<Self> {
        use std::os::windows::ffi::OsStrExt;
        let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
        if wide.contains(&0) {
            return Err(OrtError::InvalidPath(path.to_path_buf()));
        }
        wide.push(0);
        Ok(Self { wide })
    }

    #[cfg(unix)]
    fn new(path: &Path) -> Result<Self> {
        use std::os::unix::ffi::OsStrExt;
        let narrow = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| OrtError::InvalidPath(path.to_path_buf()))?;
        Ok(Self { narrow })
    }

    #[cfg(not(any(unix, windows)))]
    fn new(path: &Path) -> Result<Self> {
        let text = path
            .to_str()
            .ok_or_else(|| OrtError::InvalidPath(path.to_path_buf()))?;
        let narrow =
            CString::new(text).map_err(|_| OrtError::InvalidPath(path.to_path_buf()))?;
        Ok(Self { narrow })
    }

    fn as_ptr(&self) -> *const OrtChar {
        #[cfg(windows)]
        {
            self.wide.as_ptr()
        }
        #[cfg(not(windows))]
        {
            self.narrow.as_ptr()
        }
    }
}

/// One loaded model.
#[derive(Debug)]
pub struct Session {
    name: String,
    path: PathBuf,
    handle: ScopedSession,
}

impl Session {
    /// Builds session options and then a session for the model at `path`.
    ///
    /// The environment is only borrowed for the duration of this call.
    pub fn create(
        env: &Environment,
        path: &Path,
        name: &str,
        settings: &SessionSettings,
    ) -> Result<Self> {
        let runtime = runtime()?;
        let api = runtime.api();
        if !env.is_valid() {
            return Err(OrtError::NotInitialized);
        }

        info!(model = name, path = %path.display(), "creating onnxruntime session");
        let options = settings.build(runtime)?;
        let model_path = NativePath::new(path)?;

        let mut handle = ScopedSession::invalid();
        runtime.check(unsafe {
            (api.create_session)(
                env.as_ptr(),
                model_path.as_ptr(),
                options.as_ptr(),
                handle.receiver(),
            )
        })?;
        if !handle.is_valid() {
            return Err(OrtError::NullHandle {
                call: "CreateSession",
            });
        }

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn raw(&self) -> *mut OrtSession {
        self.handle.as_ptr()
    }

    fn port_count(&self, runtime: &OrtRuntime, port: Port) -> Result<usize> {
        let api = runtime.api();
        let mut count = 0usize;
        let status = unsafe {
            match port {
                Port::Input => (api.session_get_input_count)(self.raw(), &mut count),
                Port::Output => (api.session_get_output_count)(self.raw(), &mut count),
            }
        };
        runtime.check(status)?;
        Ok(count)
    }

    fn port_name(
        &self,
        runtime: &OrtRuntime,
        allocator: *mut OrtAllocator,
        port: Port,
        index: usize,
    ) -> Result<String> {
        let api = runtime.api();
        let mut raw: *mut c_char = ptr::null_mut();
        let status = unsafe {
            match port {
                Port::Input => (api.session_get_input_name)(self.raw(), index, allocator, &mut raw),
                Port::Output => {
                    (api.session_get_output_name)(self.raw(), index, allocator, &mut raw)
                }
            }
        };
        runtime.check(status)?;
        if raw.is_null() {
            return Err(OrtError::NullHandle {
                call: "SessionGetName",
            });
        }
        let name = unsafe { c_string(raw) };
        if let Err(err) =
            runtime.check(unsafe { (api.allocator_free)(allocator, raw.cast::<c_void>()) })
        {
            warn!(error = %err, "failed to free tensor name");
        }
        Ok(name)
    }

    fn port_info(
        &self,
        runtime: &OrtRuntime,
        allocator: *mut OrtAllocator,
        port: Port,
        index: usize,
    ) -> Result<TensorInfo> {
        let api = runtime.api();
        let name = self.port_name(runtime, allocator, port, index)?;

        let mut type_info = ScopedTypeInfo::invalid();
        let status = unsafe {
            match port {
                Port::Input => {
                    (api.session_get_input_type_info)(self.raw(), index, type_info.receiver())
                }
                Port::Output => {
                    (api.session_get_output_type_info)(self.raw(), index, type_info.receiver())
                }
            }
        };
        runtime.check(status)?;

        // Borrowed from `type_info`; not released separately.
        let mut tensor_info: *const OrtTensorTypeAndShapeInfo = ptr::null();
        runtime.check(unsafe {
            (api.cast_type_info_to_tensor_info)(type_info.as_ptr(), &mut tensor_info)
        })?;
        if tensor_info.is_null() {
            return Err(OrtError::NullHandle {
                call: "CastTypeInfoToTensorInfo",
            });
        }

        let (element_type, dims) = type_and_dims(runtime, tensor_info)?;
        Ok(TensorInfo {
            name,
            element_type,
            dims,
        })
    }

    fn ports(&self, port: Port) -> Result<Vec<TensorInfo>> {
        let runtime = runtime()?;
        let allocator = default_allocator(runtime)?;
        let count = self.port_count(runtime, port)?;
        let mut infos = Vec::with_capacity(count);
        for index in 0..count {
            match self.port_info(runtime, allocator, port, index) {
                Ok(info) => infos.push(info),
                Err(err) => warn!(
                    model = %self.name,
                    index,
                    ?port,
                    error = %err,
                    "skipping unreadable tensor metadata"
                ),
            }
        }
        Ok(infos)
    }

    /// Declared inputs. Entries whose metadata cannot be read are skipped.
    pub fn inputs(&self) -> Result<Vec<TensorInfo>> {
        self.ports(Port::Input)
    }

    /// Declared outputs. Entries whose metadata cannot be read are skipped.
    pub fn outputs(&self) -> Result<Vec<TensorInfo>> {
        self.ports(Port::Output)
    }

    pub fn io(&self) -> Result<SessionIo> {
        Ok(SessionIo {
            inputs: self.inputs()?,
            outputs: self.outputs()?,
        })
    }

    /// Runs the model.
    ///
    /// The element type of every declared input is taken from the model and the
    /// caller's buffer is presented in that type. Declared inputs without caller
    /// data are skipped with a warning. All outputs are read back in their native
    /// element type; empty outputs are left out of the result.
    pub fn run(&self, inputs: &TensorInputs<'_>) -> Result<TensorMap> {
        let runtime = runtime()?;
        let api = runtime.api();
        let allocator = default_allocator(runtime)?;

        let mut memory_info = ScopedMemoryInfo::invalid();
        runtime.check(unsafe {
            (api.create_cpu_memory_info)(
                sys::ORT_ARENA_ALLOCATOR,
                sys::ORT_MEM_TYPE_DEFAULT,
                memory_info.receiver(),
            )
        })?;

        let input_count = self.port_count(runtime, Port::Input)?;
        let mut input_names: Vec<CString> = Vec::with_capacity(input_count);
        let mut staged: Vec<Cow<'_, TensorData>> = Vec::with_capacity(input_count);
        let mut input_values: Vec<ScopedValue> = Vec::with_capacity(input_count);

        for index in 0..input_count {
            let info = match self.port_info(runtime, allocator, Port::Input, index) {
                Ok(info) => info,
                Err(err) => {
                    error!(model = %self.name, index, error = %err, "failed to read input metadata");
                    continue;
                }
            };
            let Some(&tensor) = inputs.get(info.name.as_str()) else {
                warn!(model = %self.name, input = %info.name, "no input data provided");
                continue;
            };
            let Some(tensor) = tensor.coerce_to(info.element_type) else {
                error!(
                    model = %self.name,
                    input = %info.name,
                    expected = %info.element_type,
                    provided = %tensor.element_type(),
                    "input element type does not match the model"
                );
                continue;
            };
            let value = match tensor_value(runtime, &memory_info, &tensor) {
                Ok(value) => value,
                Err(err) => {
                    error!(model = %self.name, input = %info.name, error = %err, "failed to create input tensor");
                    continue;
                }
            };
            let name = CString::new(info.name.as_str())
                .map_err(|_| OrtError::InvalidName(info.name.clone()))?;
            debug!(
                model = %self.name,
                input = %info.name,
                element_type = %info.element_type,
                elements = tensor.len(),
                "bound input tensor"
            );
            input_names.push(name);
            staged.push(tensor);
            input_values.push(value);
        }

        if input_values.is_empty() {
            return Err(OrtError::NoInputs(self.name.clone()));
        }

        let output_count = self.port_count(runtime, Port::Output)?;
        let mut output_names: Vec<CString> = Vec::with_capacity(output_count);
        for index in 0..output_count {
            match self.port_name(runtime, allocator, Port::Output, index) {
                Ok(name) => match CString::new(name.as_str()) {
                    Ok(name) => output_names.push(name),
                    Err(_) => warn!(model = %self.name, output = %name, "skipping output name"),
                },
                Err(err) => warn!(model = %self.name, index, error = %err, "skipping output"),
            }
        }

        let input_name_ptrs: Vec<*const c_char> =
            input_names.iter().map(|name| name.as_ptr()).collect();
        let input_value_ptrs: Vec<*const sys::OrtValue> = input_values
            .iter()
            .map(|value| value.as_ptr().cast_const())
            .collect();
        let output_name_ptrs: Vec<*const c_char> =
            output_names.iter().map(|name| name.as_ptr()).collect();
        let mut output_ptrs: Vec<*mut sys::OrtValue> = vec![ptr::null_mut(); output_names.len()];

        let status: OrtStatusPtr = unsafe {
            (api.run)(
                self.raw(),
                ptr::null(),
                input_name_ptrs.as_ptr(),
                input_value_ptrs.as_ptr(),
                input_value_ptrs.len(),
                output_name_ptrs.as_ptr(),
                output_name_ptrs.len(),
                output_ptrs.as_mut_ptr(),
            )
        };
        let output_values: Vec<ScopedValue> = output_ptrs
            .into_iter()
            .map(|raw| unsafe { ScopedValue::from_raw(raw) })
            .collect();
        runtime.check(status)?;
        drop(staged);

        let mut outputs = TensorMap::new();
        for (name, value) in output_names.iter().zip(&output_values) {
            let name = name.to_string_lossy().into_owned();
            if !value.is_valid() {
                continue;
            }
            match read_tensor(runtime, value) {
                Ok(Some(tensor)) => {
                    debug!(
                        model = %self.name,
                        output = %name,
                        elements = tensor.len(),
                        element_type = %tensor.element_type(),
                        "read output tensor"
                    );
                    outputs.insert(name, tensor);
                }
                Ok(None) => debug!(model = %self.name, output = %name, "omitting empty output"),
                Err(err) => warn!(model = %self.name, output = %name, error = %err, "skipping output"),
            }
        }
        Ok(outputs)
    }
}

fn default_allocator(runtime: &OrtRuntime) -> Result<*mut OrtAllocator> {
    let mut allocator: *mut OrtAllocator = ptr::null_mut();
    runtime.check(unsafe { (runtime.api().get_allocator_with_default_options)(&mut allocator) })?;
    if allocator.is_null() {
        return Err(OrtError::NullHandle {
            call: "GetAllocatorWithDefaultOptions",
        });
    }
    Ok(allocator)
}

fn type_and_dims(
    runtime: &OrtRuntime,
    info: *const OrtTensorTypeAndShapeInfo,
) -> Result<(ElementType, Vec<i64>)> {
    let api = runtime.api();
    let mut raw_type = 0;
    runtime.check(unsafe { (api.get_tensor_element_type)(info, &mut raw_type) })?;
    let mut rank = 0usize;
    runtime.check(unsafe { (api.get_dimensions_count)(info, &mut rank) })?;
    let mut dims = vec![0i64; rank];
    runtime.check(unsafe { (api.get_dimensions)(info, dims.as_mut_ptr(), rank) })?;
    Ok((ElementType::from_raw(raw_type), dims))
}

fn tensor_value(
    runtime: &OrtRuntime,
    memory_info: &ScopedMemoryInfo,
    tensor: &TensorData,
) -> Result<ScopedValue> {
    let (data, byte_len) = match tensor.values() {
        TensorValues::F32(values) => (
            values.as_ptr().cast::<c_void>(),
            std::mem::size_of_val(values.as_slice()),
        ),
        TensorValues::I64(values) => (
            values.as_ptr().cast::<c_void>(),
            std::mem::size_of_val(values.as_slice()),
        ),
        TensorValues::I32(values) => (
            values.as_ptr().cast::<c_void>(),
            std::mem::size_of_val(values.as_slice()),
        ),
    };
    let shape = tensor.shape();
    let mut value = ScopedValue::invalid();
    // The runtime only reads input buffers.
    runtime.check(unsafe {
        (runtime.api().create_tensor_with_data_as_ort_value)(
            memory_info.as_ptr(),
            data.cast_mut(),
            byte_len,
            shape.as_ptr(),
            shape.len(),
            tensor.element_type().to_raw(),
            value.receiver(),
        )
    })?;
    if !value.is_valid() {
        return Err(OrtError::NullHandle {
            call: "CreateTensorWithDataAsOrtValue",
        });
    }
    Ok(value)
}

fn read_tensor(runtime: &OrtRuntime, value: &ScopedValue) -> Result<Option<TensorData>> {
    let api = runtime.api();
    let mut info = ScopedTensorTypeAndShapeInfo::invalid();
    runtime.check(unsafe { (api.get_tensor_type_and_shape)(value.as_ptr(), info.receiver()) })?;
    let (element_type, dims) = type_and_dims(runtime, info.as_ptr())?;

    let mut count = 0usize;
    runtime.check(unsafe { (api.get_tensor_shape_element_count)(info.as_ptr(), &mut count) })?;
    if count == 0 {
        return Ok(None);
    }

    let mut data: *mut c_void = ptr::null_mut();
    runtime.check(unsafe { (api.get_tensor_mutable_data)(value.as_ptr(), &mut data) })?;
    if data.is_null() {
        return Ok(None);
    }

    let values = unsafe {
        match element_type {
            ElementType::Float => {
                TensorValues::F32(slice::from_raw_parts(data.cast::<f32>(), count).to_vec())
            }
            ElementType::Int64 => {
                TensorValues::I64(slice::from_raw_parts(data.cast::<i64>(), count).to_vec())
            }
            ElementType::Int32 => {
                TensorValues::I32(slice::from_raw_parts(data.cast::<i32>(), count).to_vec())
            }
            other => return Err(OrtError::UnsupportedElementType(other)),
        }
    };

    let shape = if element_count(&dims) == Some(count) {
        dims
    } else {
        vec![1, count as i64]
    };
    TensorData::new(values, shape).map(Some)
}
