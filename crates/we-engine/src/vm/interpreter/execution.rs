//! Fetch/decode/execute loop and execution results

use std::rc::Rc;

use super::core::Cursor;
use super::Interpreter;
use crate::compiler::Opcode;
use crate::vm::array::ArrayRef;
use crate::vm::{VmError, VmResult};

/// How a run ended
///
/// Both outcomes return control to the host. A yielded frame still has
/// program bytes left and resumes on the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Halted with program bytes remaining
    Yielded,
    /// Halted at the end of the outermost program
    Finished,
}

impl ExecutionResult {
    /// Whether the program can be resumed
    pub fn is_yielded(&self) -> bool {
        matches!(self, ExecutionResult::Yielded)
    }
}

/// Result of executing a single opcode
pub(in crate::vm::interpreter) enum OpcodeResult {
    /// Continue with the next instruction
    Continue,
    /// Return to the host; the frame has more to run
    Yield,
    /// Return to the host; the outermost program is done
    Finish,
    /// Continue in another frame
    Switch(Cursor),
}

impl<'a> Interpreter<'a> {
    /// Run or resume the program of `state`
    ///
    /// On return `state` is the frame that was executing when control left
    /// the loop; it differs from the input after a nested frame yields.
    pub fn run(&mut self, state: &mut ArrayRef) -> VmResult<ExecutionResult> {
        let mut cursor = Cursor::load(Rc::clone(state))?;
        let outcome = self.dispatch(&mut cursor);
        *state = Rc::clone(&cursor.frame);
        outcome
    }

    /// Run a frame synchronously on behalf of `res` or a collection predicate
    pub(in crate::vm::interpreter) fn run_nested(
        &mut self,
        state: &mut ArrayRef,
    ) -> VmResult<ExecutionResult> {
        if self.depth >= self.options.max_nesting {
            return Err(VmError::InvalidArgument(format!(
                "nesting depth {} exceeds limit",
                self.depth + 1
            )));
        }
        self.depth += 1;
        let outcome = self.run(state);
        self.depth -= 1;
        outcome
    }

    fn dispatch(&mut self, cursor: &mut Cursor) -> VmResult<ExecutionResult> {
        loop {
            let at = cursor.pc;
            let byte = cursor.read_u8()?;
            let opcode = Opcode::from_u8(byte).ok_or_else(|| {
                VmError::InvalidArgument(format!(
                    "unassigned opcode {:#04x} at offset {}",
                    byte, at
                ))
            })?;
            tracing::trace!(pc = at, op = opcode.name(), depth = self.depth, "dispatch");

            let result = match opcode {
                Opcode::Nil
                | Opcode::Num
                | Opcode::Buf
                | Opcode::Tab
                | Opcode::Arr
                | Opcode::Get
                | Opcode::Set
                | Opcode::Mov
                | Opcode::Pop
                | Opcode::Csp
                | Opcode::Bin
                | Opcode::Lbf
                | Opcode::Lbt => self.exec_memory_ops(cursor, opcode, byte),

                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Cmp
                | Opcode::Div
                | Opcode::Mod
                | Opcode::And
                | Opcode::Ior
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Eql => self.exec_arithmetic_ops(cursor, opcode),

                Opcode::Hlt
                | Opcode::Jmp
                | Opcode::Brz
                | Opcode::Ext
                | Opcode::Res
                | Opcode::Eva => self.exec_control_flow_ops(cursor, opcode),

                Opcode::Tid
                | Opcode::Len
                | Opcode::Ref
                | Opcode::Siz
                | Opcode::Ord
                | Opcode::Chr
                | Opcode::Int
                | Opcode::Str
                | Opcode::Cat
                | Opcode::Com
                | Opcode::Sel
                | Opcode::Tie
                | Opcode::Off
                | Opcode::Oid => self.exec_builtin_ops(cursor, opcode),

                Opcode::Idx
                | Opcode::Val
                | Opcode::Gmt
                | Opcode::Smt
                | Opcode::Rsz
                | Opcode::Wea => self.exec_structural_ops(cursor, opcode),
            };

            match result? {
                OpcodeResult::Continue => {}
                OpcodeResult::Yield => return Ok(ExecutionResult::Yielded),
                OpcodeResult::Finish => return Ok(ExecutionResult::Finished),
                OpcodeResult::Switch(next) => *cursor = next,
            }
        }
    }
}
