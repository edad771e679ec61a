//! Bytecode definitions
//!
//! The engine does not generate bytecode. This module holds the opcode table
//! shared by the interpreter and a disassembler for inspecting programs.

pub mod disasm;
pub mod opcode;

pub use disasm::{disassemble, disassemble_instruction, DisasmError, Instruction, Operand};
pub use opcode::Opcode;
