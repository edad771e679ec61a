//! Control flow opcode handlers: Hlt, Jmp, Brz, Ext, Res, Eva

use std::rc::Rc;

use crate::compiler::Opcode;
use crate::vm::api::Vm;
use crate::vm::array::ArrayRef;
use crate::vm::external::{self, ExtControl};
use crate::vm::interpreter::core::Cursor;
use crate::vm::interpreter::execution::OpcodeResult;
use crate::vm::interpreter::Interpreter;
use crate::vm::value::{borrow_mut, Value};
use crate::vm::{VmError, VmResult};

/// Array on top of the stack, as required by `ext`, `res` and `eva`
fn top_array(cursor: &Cursor, opcode: Opcode) -> VmResult<ArrayRef> {
    match cursor.peek(0)? {
        Value::Array(h) => h.upgrade(),
        other => Err(VmError::InvalidArgument(format!(
            "{} expects an array on top of the stack, found {}",
            opcode.name(),
            other.kind().name()
        ))),
    }
}

/// Child frame operand of `res`/`eva`; a frame cannot run itself
fn child_frame(cursor: &Cursor, opcode: Opcode) -> VmResult<ArrayRef> {
    let child = top_array(cursor, opcode)?;
    if Rc::ptr_eq(&child, &cursor.frame) {
        return Err(VmError::InvalidArgument(format!(
            "{} cannot enter the running frame",
            opcode.name()
        )));
    }
    Ok(child)
}

impl<'a> Interpreter<'a> {
    pub(in crate::vm::interpreter) fn exec_control_flow_ops(
        &mut self,
        cursor: &mut Cursor,
        opcode: Opcode,
    ) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::Hlt => {
                cursor.save()?;
                if cursor.remaining() > 0 {
                    tracing::debug!(remaining = cursor.remaining(), "frame yielded");
                    return Ok(OpcodeResult::Yield);
                }
                let prev = borrow_mut(&cursor.frame)?.take_prev();
                match prev {
                    Some(link) => {
                        let caller = link.upgrade().ok_or_else(VmError::dangling)?;
                        tracing::debug!("returning to caller frame");
                        Ok(OpcodeResult::Switch(Cursor::load(caller)?))
                    }
                    None => Ok(OpcodeResult::Finish),
                }
            }

            Opcode::Jmp => {
                let offset = cursor.read_i32()?;
                cursor.jump(offset)?;
                Ok(OpcodeResult::Continue)
            }

            Opcode::Brz => {
                let offset = cursor.read_i32()?;
                let cond = cursor.peek(0)?.to_int()?;
                cursor.pop()?;
                if cond == 0 {
                    cursor.jump(offset)?;
                }
                Ok(OpcodeResult::Continue)
            }

            Opcode::Ext => {
                let id = cursor.read_u8()?;
                let target = top_array(cursor, opcode)?;
                let callback = external::lookup(id).ok_or_else(|| {
                    VmError::InvalidArgument(format!("no external registered at id {}", id))
                })?;
                let mut frame = Vm::attach(target, self.options.clone());
                match callback(&mut frame, &mut *self.host) {
                    ExtControl::Continue => Ok(OpcodeResult::Continue),
                    ExtControl::Error(errno) => {
                        tracing::warn!(id, errno, "external function failed");
                        Err(VmError::External(errno))
                    }
                    ExtControl::Again => Err(VmError::Again),
                    ExtControl::Cancel => Err(VmError::Cancelled),
                }
            }

            Opcode::Res => {
                let child = child_frame(cursor, opcode)?;
                borrow_mut(&child)?.reserve(self.options.predicate_stack)?;
                let mut state = child;
                self.run_nested(&mut state)?;
                Ok(OpcodeResult::Continue)
            }

            Opcode::Eva => {
                let child = child_frame(cursor, opcode)?;
                borrow_mut(&child)?.reserve(self.options.predicate_stack)?;
                let next = Cursor::load(Rc::clone(&child))?;
                borrow_mut(&child)?.set_prev(Some(Rc::downgrade(&cursor.frame)));
                cursor.save()?;
                tracing::debug!(depth = self.depth, "entering child frame");
                Ok(OpcodeResult::Switch(next))
            }

            _ => Err(VmError::InvalidArgument(format!(
                "unexpected opcode in control flow handler: {}",
                opcode.name()
            ))),
        }
    }
}
