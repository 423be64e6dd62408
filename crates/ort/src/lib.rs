//! Binding to the ONNX Runtime C API, loaded from a shared library at run time.
//!
//! Every native resource is owned by a [`handle::Scoped`] holder. Tensors cross
//! the boundary as [`TensorData`], which keeps its element type in the buffer
//! variant.

pub mod decoder;
pub mod environment;
pub mod error;
pub mod handle;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod sys;
pub mod tensor;

pub use decoder::{DECODER_LOGICAL_NAME, DECODER_SESSION_NAME, DecoderStep};
pub use environment::{Environment, LoggingLevel};
pub use error::{OrtError, Result};
pub use registry::SessionRegistry;
pub use runtime::OrtRuntime;
pub use session::{GraphOptimization, Session, SessionIo, SessionSettings, TensorInfo};
pub use tensor::{
    ElementType, TensorData, TensorInputs, TensorMap, TensorValues, borrow_inputs, element_count,
};
