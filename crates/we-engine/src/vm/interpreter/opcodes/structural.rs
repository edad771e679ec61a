//! Structural opcode handlers: Idx, Val, Gmt, Smt, Rsz, Wea

use crate::compiler::Opcode;
use crate::vm::builtins::{key_value, next_key};
use crate::vm::interpreter::core::Cursor;
use crate::vm::interpreter::execution::OpcodeResult;
use crate::vm::interpreter::Interpreter;
use crate::vm::table::TableRef;
use crate::vm::value::{borrow_mut, Value};
use crate::vm::{VmError, VmResult};

fn expect_table(value: &Value, opcode: Opcode) -> VmResult<TableRef> {
    match value {
        Value::Table(h) => h.upgrade(),
        other => Err(VmError::InvalidArgument(format!(
            "{} expects a table, found {}",
            opcode.name(),
            other.kind().name()
        ))),
    }
}

/// Resize a table or array; false for other kinds, negative sizes or failure
fn resize(container: &Value, size: i64) -> VmResult<bool> {
    if size < 0 {
        return Ok(false);
    }
    let resized = match container {
        Value::Table(h) => match u32::try_from(size) {
            Ok(n) => borrow_mut(&*h.upgrade()?)?.resize(n),
            Err(_) => return Ok(false),
        },
        Value::Array(h) => match usize::try_from(size) {
            Ok(n) => borrow_mut(&*h.upgrade()?)?.resize(n),
            Err(_) => return Ok(false),
        },
        _ => return Ok(false),
    };
    match resized {
        Ok(()) => Ok(true),
        Err(VmError::OutOfMemory) => Ok(false),
        Err(e) => Err(e),
    }
}

impl<'a> Interpreter<'a> {
    pub(in crate::vm::interpreter) fn exec_structural_ops(
        &mut self,
        cursor: &mut Cursor,
        opcode: Opcode,
    ) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::Idx => {
                let obj = cursor.read_u8()?;
                let at = cursor.read_u8()?;
                let next = next_key(&cursor.register(obj)?, &cursor.register(at)?)?;
                cursor.put(at, next)?;
            }

            Opcode::Val => {
                let obj = cursor.read_u8()?;
                let at = cursor.read_u8()?;
                let dst = cursor.read_u8()?;
                key_value(
                    &cursor.register(obj)?,
                    &cursor.register(at)?,
                    &cursor.register(dst)?,
                )?;
            }

            Opcode::Gmt => {
                let table = expect_table(&cursor.peek(0)?, opcode)?;
                let meta = {
                    let mut table = borrow_mut(&table)?;
                    if table.meta().is_nil() {
                        table.set_meta(Value::new_table());
                    }
                    table.meta().clone()
                };
                cursor.reduce(1, meta)?;
            }

            Opcode::Smt => {
                let table = expect_table(&cursor.peek(1)?, opcode)?;
                let meta = cursor.peek(0)?;
                if !matches!(meta, Value::Nil | Value::Table(_)) {
                    return Err(VmError::InvalidArgument(format!(
                        "meta must be a table or nil, found {}",
                        meta.kind().name()
                    )));
                }
                let previous = borrow_mut(&table)?.set_meta(meta);
                drop(previous);
                cursor.discard(1)?;
            }

            Opcode::Rsz => {
                let size = match cursor.peek(0)? {
                    Value::Number(n) => n,
                    other => {
                        return Err(VmError::InvalidArgument(format!(
                            "rsz expects a number, found {}",
                            other.kind().name()
                        )))
                    }
                };
                let ok = resize(&cursor.peek(1)?, size)?;
                cursor.reduce(2, Value::Number(ok as i64))?;
            }

            Opcode::Wea => {
                let weak = cursor.peek(0)?.downgrade();
                cursor.reduce(1, weak)?;
            }

            _ => {
                return Err(VmError::InvalidArgument(format!(
                    "unexpected opcode in structural handler: {}",
                    opcode.name()
                )))
            }
        }
        Ok(OpcodeResult::Continue)
    }
}
