//! Arithmetic opcode handlers: Add, Sub, Mul, Cmp, Div, Mod, And, Ior, Xor, Shl, Shr, Eql
//!
//! All operate on the two topmost values and replace them with one number.
//! Nil reads as zero; arithmetic wraps on overflow.

use crate::compiler::Opcode;
use crate::vm::interpreter::core::Cursor;
use crate::vm::interpreter::execution::OpcodeResult;
use crate::vm::interpreter::Interpreter;
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};

/// Identity comparison as performed by `eql`
///
/// Nil and numbers compare by value (nil is zero); heap kinds compare by
/// referent; mixed kinds are unequal.
fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil | Value::Number(_), Value::Nil | Value::Number(_)) => {
            a.as_number().unwrap_or(0) == b.as_number().unwrap_or(0)
        }
        (Value::Buffer(x), Value::Buffer(y)) => x.same_heap(y),
        (Value::Table(x), Value::Table(y)) => x.ptr_eq(y),
        (Value::Array(x), Value::Array(y)) => x.ptr_eq(y),
        _ => false,
    }
}

impl<'a> Interpreter<'a> {
    pub(in crate::vm::interpreter) fn exec_arithmetic_ops(
        &mut self,
        cursor: &mut Cursor,
        opcode: Opcode,
    ) -> VmResult<OpcodeResult> {
        let lhs = cursor.peek(1)?;
        let rhs = cursor.peek(0)?;

        let result = if opcode == Opcode::Eql {
            identical(&lhs, &rhs) as i64
        } else {
            let a = lhs.to_int()?;
            let b = rhs.to_int()?;
            match opcode {
                Opcode::Add => a.wrapping_add(b),
                Opcode::Sub => a.wrapping_sub(b),
                Opcode::Mul => a.wrapping_mul(b),
                Opcode::Cmp => (a < b) as i64,
                Opcode::Div => {
                    if b == 0 {
                        return Err(VmError::OutOfRange("division by zero".to_string()));
                    }
                    a.wrapping_div(b)
                }
                Opcode::Mod => {
                    if b == 0 {
                        return Err(VmError::OutOfRange("modulo by zero".to_string()));
                    }
                    a.wrapping_rem(b)
                }
                Opcode::And => a & b,
                Opcode::Ior => a | b,
                Opcode::Xor => a ^ b,
                Opcode::Shl if (b as u64) < 64 => ((a as u64) << b) as i64,
                Opcode::Shr if (b as u64) < 64 => ((a as u64) >> b) as i64,
                Opcode::Shl | Opcode::Shr => 0,
                _ => {
                    return Err(VmError::InvalidArgument(format!(
                        "unexpected opcode in arithmetic handler: {}",
                        opcode.name()
                    )))
                }
            }
        };

        cursor.reduce(2, Value::Number(result))?;
        Ok(OpcodeResult::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::buffer::Buffer;

    #[test]
    fn test_identity_rules() {
        assert!(identical(&Value::Nil, &Value::Number(0)));
        assert!(identical(&Value::Number(5), &Value::Number(5)));
        assert!(!identical(&Value::Number(5), &Value::Number(6)));

        let buf = Buffer::copy_from(b"abc").unwrap();
        let a = Value::Buffer(buf.view(0, 1).unwrap());
        let b = Value::Buffer(buf.view(1, 2).unwrap());
        assert!(identical(&a, &b));
        let other = Value::Buffer(Buffer::copy_from(b"abc").unwrap());
        assert!(!identical(&Value::Buffer(buf), &other));

        let t = Value::new_table();
        assert!(identical(&t, &t.clone()));
        assert!(!identical(&t, &Value::new_table()));
        assert!(!identical(&t, &Value::Number(0)));
    }
}
