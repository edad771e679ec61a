//! Bytecode interpreter
//!
//! The interpreter runs the program held in slot 0 of a frame array. It keeps
//! no state between calls: the program counter is saved back into the frame's
//! slot-0 view whenever control leaves the frame, so the next call resumes
//! where the last one halted.
//!
//! Opcode handlers are grouped by category under `opcodes` as methods on
//! [`Interpreter`].

mod core;
mod execution;
mod opcodes;

pub use self::core::Interpreter;
pub use execution::ExecutionResult;
