//! Memory opcode handlers: Nil, Num, Buf, Tab, Arr, Get, Set, Mov, Pop, Csp, Bin, Lbf, Lbt

use crate::compiler::opcode::num_width;
use crate::compiler::Opcode;
use crate::vm::interpreter::core::Cursor;
use crate::vm::interpreter::execution::OpcodeResult;
use crate::vm::interpreter::Interpreter;
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};

impl<'a> Interpreter<'a> {
    pub(in crate::vm::interpreter) fn exec_memory_ops(
        &mut self,
        cursor: &mut Cursor,
        opcode: Opcode,
        byte: u8,
    ) -> VmResult<OpcodeResult> {
        match opcode {
            Opcode::Nil => cursor.push(Value::Nil)?,

            Opcode::Num => {
                let value = cursor.read_int(num_width(byte))?;
                cursor.push(Value::Number(value))?;
            }

            Opcode::Buf => {
                let len = cursor.read_u16()? as usize;
                let literal = cursor.literal(cursor.pc, len)?;
                cursor.pc += len;
                cursor.push(Value::Buffer(literal))?;
            }

            Opcode::Tab => cursor.push(Value::new_table())?,

            Opcode::Arr => cursor.push(Value::new_array())?,

            Opcode::Get => {
                let reg = cursor.read_u8()?;
                let container = cursor.register(reg)?;
                let key = cursor.peek(1)?;
                let default = cursor.peek(0)?;
                let found = self.container_get(&container, &key, &default)?;
                cursor.reduce(2, found)?;
            }

            Opcode::Set => {
                let reg = cursor.read_u8()?;
                let container = cursor.register(reg)?;
                let key = cursor.peek(1)?;
                let value = cursor.peek(0)?;
                self.container_set(&container, &key, value)?;
                cursor.discard(2)?;
            }

            Opcode::Mov => {
                let reg = cursor.read_u8()?;
                let value = cursor.register(reg)?;
                cursor.push(value)?;
            }

            Opcode::Pop => {
                let reg = cursor.read_u8()?;
                // The target must still be live once the top is gone
                let sp = cursor.sp()?;
                if u32::from(reg) + 1 >= sp {
                    return Err(VmError::InvalidArgument(format!(
                        "pop target {} out of range for {} items",
                        reg, sp
                    )));
                }
                let value = cursor.pop()?;
                cursor.put(reg, value)?;
            }

            Opcode::Csp => {
                let expected = cursor.read_u8()? as u32;
                let sp = cursor.sp()?;
                if expected != sp {
                    return Err(VmError::InvalidArgument(format!(
                        "stack height {} does not match expected {}",
                        sp, expected
                    )));
                }
                cursor.push(Value::Number(sp as i64))?;
            }

            Opcode::Bin => {
                let offset = cursor.read_i32()?;
                let mut at = cursor.target(offset)?;
                let len = {
                    let bytes = cursor.literal(at, 2)?.to_vec();
                    u16::from_be_bytes([bytes[0], bytes[1]]) as usize
                };
                at += 2;
                let literal = cursor.literal(at, len)?;
                cursor.push(Value::Buffer(literal))?;
            }

            Opcode::Lbf => cursor.push(Value::Number(0))?,

            Opcode::Lbt => cursor.push(Value::Number(1))?,

            _ => {
                return Err(VmError::InvalidArgument(format!(
                    "unexpected opcode in memory handler: {}",
                    opcode.name()
                )))
            }
        }
        Ok(OpcodeResult::Continue)
    }
}
