//! WE VM Core Runtime
//!
//! This module provides the virtual machine runtime including:
//! - Object model (`Value`, `Buffer`, `Array`, `Table`)
//! - Bytecode interpreter with yield/resume and nested coroutine frames
//! - Process-global external function table
//! - Embedding API (`Vm`)

pub mod api;
pub mod array;
pub mod buffer;
pub mod builtins;
pub mod config;
pub mod external;
pub mod interpreter;
pub mod table;
pub mod value;

pub use api::Vm;
pub use array::{Array, ArrayRef};
pub use buffer::{Buffer, HeapBuffer, HeldBuffer};
pub use config::VmOptions;
pub use external::{register_external, unregister_external, ExtControl, ExternalFn};
pub use interpreter::{ExecutionResult, Interpreter};
pub use table::{Table, TableRef};
pub use value::{Handle, Value, ValueKind};

/// VM execution errors
///
/// Every variant maps onto the negative errno contract exposed by
/// [`VmError::code`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// Allocation failure for a heap object or container growth
    #[error("Out of memory")]
    OutOfMemory,

    /// Malformed program, bad register, or type mismatch on a built-in
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Division or modulo by zero
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Error code returned by an external function
    #[error("External function failed with code {0}")]
    External(i32),

    /// An external asked the host to resume once more in a new context
    #[error("Resume requested")]
    Again,

    /// An external terminated the call chain
    #[error("Cancelled")]
    Cancelled,
}

impl VmError {
    /// Negative errno value for this error.
    pub fn code(&self) -> i32 {
        match self {
            VmError::OutOfMemory => -12,
            VmError::InvalidArgument(_) => -22,
            VmError::OutOfRange(_) => -34,
            VmError::External(errno) => -errno.abs(),
            VmError::Again => -11,
            VmError::Cancelled => -125,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        VmError::InvalidArgument(msg.into())
    }

    pub(crate) fn busy() -> Self {
        VmError::InvalidArgument("container is already borrowed".to_string())
    }

    pub(crate) fn dangling() -> Self {
        VmError::InvalidArgument("weak reference to a released object".to_string())
    }
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(VmError::OutOfMemory.code(), -12);
        assert_eq!(VmError::invalid("x").code(), -22);
        assert_eq!(VmError::OutOfRange("div".into()).code(), -34);
        assert_eq!(VmError::External(5).code(), -5);
        assert_eq!(VmError::Again.code(), -11);
        assert_eq!(VmError::Cancelled.code(), -125);
    }

    #[test]
    fn test_error_display() {
        let err = VmError::invalid("register 9 out of bounds");
        assert_eq!(err.to_string(), "Invalid argument: register 9 out of bounds");
    }
}
