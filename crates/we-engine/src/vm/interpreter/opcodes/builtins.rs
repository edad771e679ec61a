//! Built-in opcode handlers: Tid, Len, Ref, Siz, Ord, Chr, Int, Str, Cat, Com, Sel, Tie, Off, Oid

use std::cmp::Ordering;

use crate::compiler::Opcode;
use crate::vm::buffer::Buffer;
use crate::vm::builtins::{dyncast, join, slice, stringify};
use crate::vm::interpreter::core::Cursor;
use crate::vm::interpreter::execution::OpcodeResult;
use crate::vm::interpreter::Interpreter;
use crate::vm::value::{borrow, Value, ValueKind};
use crate::vm::{VmError, VmResult};

fn expect_buffer(value: &Value, opcode: Opcode) -> VmResult<Buffer> {
    match value {
        Value::Buffer(buf) => Ok(buf.clone()),
        other => Err(VmError::InvalidArgument(format!(
            "{} expects a buffer, found {}",
            opcode.name(),
            other.kind().name()
        ))),
    }
}

impl<'a> Interpreter<'a> {
    pub(in crate::vm::interpreter) fn exec_builtin_ops(
        &mut self,
        cursor: &mut Cursor,
        opcode: Opcode,
    ) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::Tid => {
                let kind = cursor.peek(0)?.kind();
                cursor.reduce(1, Value::Number(kind as i64))?;
            }

            Opcode::Len => {
                let len = cursor.peek(0)?.len()?;
                cursor.reduce(1, Value::Number(len as i64))?;
            }

            Opcode::Ref => {
                // Taken off the stack so the probe itself is not counted.
                let value = cursor.pop()?;
                let count = value.refcount();
                drop(value);
                cursor.push(Value::Number(count as i64))?;
            }

            Opcode::Siz => {
                let size = cursor.peek(0)?.size()?;
                cursor.reduce(1, Value::Number(size as i64))?;
            }

            Opcode::Ord => {
                let buf = expect_buffer(&cursor.peek(0)?, opcode)?;
                let first = buf.byte_at(0).unwrap_or(0);
                cursor.reduce(1, Value::Number(first as i64))?;
            }

            Opcode::Chr => {
                let code = match cursor.peek(0)? {
                    Value::Number(n) => n as u8,
                    other => {
                        return Err(VmError::InvalidArgument(format!(
                            "chr expects a number, found {}",
                            other.kind().name()
                        )))
                    }
                };
                cursor.reduce(1, Value::Buffer(Buffer::copy_from(&[code])?))?;
            }

            Opcode::Int => {
                let value = dyncast(cursor.peek(0)?, ValueKind::Number)?;
                cursor.reduce(1, value)?;
            }

            Opcode::Str => {
                let text = stringify(&cursor.peek(0)?)?;
                cursor.reduce(1, Value::Buffer(text))?;
            }

            Opcode::Cat => {
                let lhs = expect_buffer(&cursor.peek(1)?, opcode)?;
                let rhs = expect_buffer(&cursor.peek(0)?, opcode)?;
                let joined = lhs.concat(&rhs)?;
                cursor.reduce(2, Value::Buffer(joined))?;
            }

            Opcode::Com => {
                let lhs = expect_buffer(&cursor.peek(1)?, opcode)?;
                let rhs = expect_buffer(&cursor.peek(0)?, opcode)?;
                let order = match lhs.compare(&rhs) {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                };
                cursor.reduce(2, Value::Number(order))?;
            }

            Opcode::Sel => {
                let buf = expect_buffer(&cursor.peek(3)?, opcode)?;
                let start = cursor.peek(2)?;
                let stop = cursor.peek(1)?;
                let step = cursor.peek(0)?;
                let part = slice(&buf, &start, &stop, &step)?;
                cursor.reduce(4, Value::Buffer(part))?;
            }

            Opcode::Tie => {
                let items = match cursor.peek(1)? {
                    Value::Array(h) => h.upgrade()?,
                    other => {
                        return Err(VmError::InvalidArgument(format!(
                            "tie expects an array, found {}",
                            other.kind().name()
                        )))
                    }
                };
                let sep = expect_buffer(&cursor.peek(0)?, opcode)?;
                let joined = join(&*borrow(&items)?, &sep)?;
                cursor.reduce(2, Value::Buffer(joined))?;
            }

            Opcode::Off => {
                let off = cursor.peek(0)?.offset();
                cursor.reduce(1, Value::Number(off as i64))?;
            }

            Opcode::Oid => {
                let id = cursor.peek(0)?.identity();
                cursor.reduce(1, Value::Number(id))?;
            }

            _ => {
                return Err(VmError::InvalidArgument(format!(
                    "unexpected opcode in builtin handler: {}",
                    opcode.name()
                )))
            }
        }
        Ok(OpcodeResult::Continue)
    }
}
