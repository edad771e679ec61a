//! WE Engine
//!
//! A small embeddable virtual machine for host-controlled bytecode programs:
//! - **VM**: value model, reference-counted buffers, arrays and tables, the
//!   interpreter with yield/resume and nested frames, external functions and
//!   the embedding API (`vm` module)
//! - **Compiler**: opcode table and disassembler (`compiler` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use we_engine::Vm;
//!
//! // num 11; num 39; add; hlt
//! let program: Rc<[u8]> = Rc::from(&[0x01, 11, 0x01, 39, 0x09, 0x15][..]);
//!
//! let mut vm = Vm::create(32)?;
//! vm.push_buffer(program)?;
//! vm.call(&mut ())?;
//! assert_eq!(vm.read_number(-1)?, Some(50));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::len_without_is_empty)]

// ============================================================================
// Core Modules
// ============================================================================

/// Compiler module: opcode table and disassembler
pub mod compiler;

/// VM module: object model, interpreter and embedding API
pub mod vm;

// ============================================================================
// Re-exports
// ============================================================================

pub use compiler::{disassemble, DisasmError, Instruction, Opcode};

pub use vm::{
    // Value and object model
    Array, ArrayRef, Buffer, HeldBuffer, Table, TableRef, Value, ValueKind,
    // Execution
    ExecutionResult, Vm, VmError, VmOptions, VmResult,
    // Externals
    register_external, unregister_external, ExtControl,
};
