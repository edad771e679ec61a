//! Interpreter state, program cursor and shared helpers

use std::any::Any;
use std::rc::Rc;

use crate::vm::array::{Array, ArrayRef};
use crate::vm::buffer::Buffer;
use crate::vm::builtins::dyncast;
use crate::vm::config::VmOptions;
use crate::vm::table::TableRef;
use crate::vm::value::{borrow, borrow_mut, Value};
use crate::vm::{VmError, VmResult};

/// Smallest frame capacity accepted as a collection predicate
pub(crate) const COLLECTOR_MIN_CAPACITY: u32 = 32;

/// Dispatch core for one host `call`
///
/// Holds the options and host context for the duration of a run, plus the
/// nesting depth of synchronous sub-runs (`res` and collection predicates).
pub struct Interpreter<'a> {
    pub(in crate::vm::interpreter) options: &'a VmOptions,
    pub(in crate::vm::interpreter) host: &'a mut dyn Any,
    pub(in crate::vm::interpreter) depth: u32,
}

impl<'a> Interpreter<'a> {
    /// Create an interpreter for one run
    pub fn new(options: &'a VmOptions, host: &'a mut dyn Any) -> Self {
        Self {
            options,
            host,
            depth: 0,
        }
    }

    /// Current nesting depth (0 for a host-initiated run)
    pub fn depth(&self) -> u32 {
        self.depth
    }

    // =========================================================================
    // Container access
    // =========================================================================

    /// Get-or-default on a table or array held in a register
    ///
    /// Table lookups run the collection predicate and coerce an existing
    /// value to the kind of a non-nil default.
    pub(crate) fn container_get(
        &mut self,
        container: &Value,
        key: &Value,
        default: &Value,
    ) -> VmResult<Value> {
        match container {
            Value::Table(h) => {
                let table = h.upgrade()?;
                let found = match Self::collector(&table)? {
                    Some(predicate) => {
                        let mut gc = |v: &Value| self.evaluate_predicate(&predicate, v);
                        borrow_mut(&table)?.get_or_default(key, default, Some(&mut gc))?
                    }
                    None => borrow_mut(&table)?.get_or_default(key, default, None)?,
                };
                if default.is_nil() {
                    Ok(found)
                } else {
                    dyncast(found, default.kind())
                }
            }
            Value::Array(h) => {
                let idx = array_index(key)?;
                borrow_mut(&*h.upgrade()?)?.get(idx, default)
            }
            other => Err(VmError::InvalidArgument(format!(
                "cannot index into {}",
                other.kind().name()
            ))),
        }
    }

    /// Store into a table or array held in a register
    pub(crate) fn container_set(
        &mut self,
        container: &Value,
        key: &Value,
        value: Value,
    ) -> VmResult<()> {
        match container {
            Value::Table(h) => {
                let table = h.upgrade()?;
                match Self::collector(&table)? {
                    Some(predicate) => {
                        let mut gc = |v: &Value| self.evaluate_predicate(&predicate, v);
                        borrow_mut(&table)?.set(key, value, Some(&mut gc))
                    }
                    None => borrow_mut(&table)?.set(key, value, None),
                }
            }
            Value::Array(h) => {
                let idx = array_index(key)?;
                borrow_mut(&*h.upgrade()?)?.set(idx, value)
            }
            other => Err(VmError::InvalidArgument(format!(
                "cannot store into {}",
                other.kind().name()
            ))),
        }
    }

    // =========================================================================
    // Collection predicates
    // =========================================================================

    /// Predicate program attached to a table: array at key 0 of its meta table
    ///
    /// Arrays smaller than `COLLECTOR_MIN_CAPACITY` slots are not programs
    /// and leave the table uncollected.
    fn collector(table: &TableRef) -> VmResult<Option<ArrayRef>> {
        let meta = borrow(table)?.meta().clone();
        let Value::Table(h) = meta else {
            return Ok(None);
        };
        let meta = h.upgrade()?;
        let entry = borrow_mut(&meta)?.lookup(&Value::Number(0));
        let Some(Value::Array(a)) = entry else {
            return Ok(None);
        };
        let predicate = a.upgrade()?;
        if borrow(&predicate)?.capacity() < COLLECTOR_MIN_CAPACITY {
            tracing::debug!("meta predicate frame too small, skipping collection");
            return Ok(None);
        }
        Ok(Some(predicate))
    }

    /// Run `predicate` with `value` pushed on a private copy of its frame
    ///
    /// The answer is the truthiness of the top of stack afterwards. A failing
    /// predicate never evicts.
    pub(in crate::vm::interpreter) fn evaluate_predicate(
        &mut self,
        predicate: &ArrayRef,
        value: &Value,
    ) -> bool {
        match self.try_predicate(predicate, value) {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(error = %e, "collection predicate failed");
                false
            }
        }
    }

    fn try_predicate(&mut self, predicate: &ArrayRef, value: &Value) -> VmResult<bool> {
        let mut frame = borrow(predicate)?.clone_frame()?;
        frame.reserve(self.options.predicate_stack)?;
        frame.push(value.clone())?;
        let mut state = frame.into_ref();
        self.run_nested(&mut state)?;
        let verdict = borrow(&state)?.peek(0)?.is_truthy();
        Ok(verdict)
    }
}

fn array_index(key: &Value) -> VmResult<i64> {
    match key {
        Value::Number(n) => Ok(*n),
        other => Err(VmError::InvalidArgument(format!(
            "array index must be a number, found {}",
            other.kind().name()
        ))),
    }
}

// =============================================================================
// Operand decoding
// =============================================================================

fn truncated() -> VmError {
    VmError::invalid("Unexpected end of bytecode")
}

#[inline]
pub(in crate::vm::interpreter) fn read_u8(code: &[u8], ip: &mut usize) -> VmResult<u8> {
    let value = *code.get(*ip).ok_or_else(truncated)?;
    *ip += 1;
    Ok(value)
}

#[inline]
pub(in crate::vm::interpreter) fn read_u16(code: &[u8], ip: &mut usize) -> VmResult<u16> {
    let bytes = code.get(*ip..*ip + 2).ok_or_else(truncated)?;
    let value = u16::from_be_bytes([bytes[0], bytes[1]]);
    *ip += 2;
    Ok(value)
}

/// Sign-extended big-endian immediate of `width` bytes (1, 2, 4 or 8)
#[inline]
pub(in crate::vm::interpreter) fn read_int(code: &[u8], ip: &mut usize, width: usize) -> VmResult<i64> {
    let bytes = code.get(*ip..*ip + width).ok_or_else(truncated)?;
    let value = match width {
        1 => bytes[0] as i8 as i64,
        2 => i16::from_be_bytes([bytes[0], bytes[1]]) as i64,
        4 => i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            i64::from_be_bytes(raw)
        }
        _ => return Err(VmError::InvalidArgument(format!("bad immediate width {}", width))),
    };
    *ip += width;
    Ok(value)
}

// =============================================================================
// Program cursor
// =============================================================================

/// Execution position within one frame
///
/// `pc` is relative to the start of the frame's program view. The frame
/// itself is only borrowed for the duration of a single stack access.
pub(in crate::vm::interpreter) struct Cursor {
    pub(in crate::vm::interpreter) frame: ArrayRef,
    pub(in crate::vm::interpreter) program: Buffer,
    code: Rc<[u8]>,
    base: usize,
    end: usize,
    pub(in crate::vm::interpreter) pc: usize,
}

impl Cursor {
    /// Position at the saved program counter of `frame`
    pub(in crate::vm::interpreter) fn load(frame: ArrayRef) -> VmResult<Self> {
        let program = match borrow(&frame)?.slot(0)? {
            Value::Buffer(buf) if !buf.is_empty() => buf.clone(),
            Value::Buffer(_) => return Err(VmError::invalid("program is exhausted")),
            other => {
                return Err(VmError::InvalidArgument(format!(
                    "frame slot 0 holds {}, not a program",
                    other.kind().name()
                )))
            }
        };
        let base = program.offset() as usize;
        let end = base + program.len() as usize;
        Ok(Self {
            code: program.heap_data(),
            frame,
            program,
            base,
            end,
            pc: 0,
        })
    }

    fn code(&self) -> &[u8] {
        &self.code[self.base..self.end]
    }

    /// Bytes left after the program counter
    pub(in crate::vm::interpreter) fn remaining(&self) -> usize {
        (self.end - self.base).saturating_sub(self.pc)
    }

    pub(in crate::vm::interpreter) fn read_u8(&mut self) -> VmResult<u8> {
        read_u8(&self.code[self.base..self.end], &mut self.pc)
    }

    pub(in crate::vm::interpreter) fn read_u16(&mut self) -> VmResult<u16> {
        read_u16(&self.code[self.base..self.end], &mut self.pc)
    }

    pub(in crate::vm::interpreter) fn read_i32(&mut self) -> VmResult<i32> {
        read_int(&self.code[self.base..self.end], &mut self.pc, 4).map(|v| v as i32)
    }

    pub(in crate::vm::interpreter) fn read_int(&mut self, width: usize) -> VmResult<i64> {
        read_int(&self.code[self.base..self.end], &mut self.pc, width)
    }

    /// Move the program counter by `offset` from its current position
    pub(in crate::vm::interpreter) fn jump(&mut self, offset: i32) -> VmResult<()> {
        self.pc = self.target(offset)?;
        Ok(())
    }

    /// Position `offset` bytes from the program counter, checked against the program
    pub(in crate::vm::interpreter) fn target(&self, offset: i32) -> VmResult<usize> {
        let target = self.pc as i64 + offset as i64;
        if target < 0 || target > self.code().len() as i64 {
            return Err(VmError::InvalidArgument(format!(
                "jump target {} outside program of length {}",
                target,
                self.code().len()
            )));
        }
        Ok(target as usize)
    }

    /// Zero-copy view of `len` program bytes at `at`
    pub(in crate::vm::interpreter) fn literal(&self, at: usize, len: usize) -> VmResult<Buffer> {
        self.program.view(at, len)
    }

    /// Store the advanced program view back into slot 0
    pub(in crate::vm::interpreter) fn save(&self) -> VmResult<()> {
        let rest = self.program.view(self.pc, self.remaining())?;
        borrow_mut(&self.frame)?.put(0, Value::Buffer(rest))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Stack access
    // -------------------------------------------------------------------------

    /// Stack pointer (item count of the frame)
    pub(in crate::vm::interpreter) fn sp(&self) -> VmResult<u32> {
        Ok(borrow(&self.frame)?.len())
    }

    pub(in crate::vm::interpreter) fn push(&self, value: Value) -> VmResult<()> {
        borrow_mut(&self.frame)?.push(value)
    }

    pub(in crate::vm::interpreter) fn pop(&self) -> VmResult<Value> {
        borrow_mut(&self.frame)?.pop()
    }

    /// Copy of the value `depth` below the top
    pub(in crate::vm::interpreter) fn peek(&self, depth: u32) -> VmResult<Value> {
        borrow(&self.frame)?.peek(depth).cloned()
    }

    /// Drop `consumed` values from the top, then push `result`
    pub(in crate::vm::interpreter) fn reduce(&self, consumed: u32, result: Value) -> VmResult<()> {
        let mut frame = borrow_mut(&self.frame)?;
        for _ in 0..consumed {
            frame.pop()?;
        }
        frame.push(result)
    }

    /// Drop `count` values from the top
    pub(in crate::vm::interpreter) fn discard(&self, count: u32) -> VmResult<()> {
        let mut frame = borrow_mut(&self.frame)?;
        for _ in 0..count {
            frame.pop()?;
        }
        Ok(())
    }

    /// Copy of register `reg`, which must lie below the stack pointer
    pub(in crate::vm::interpreter) fn register(&self, reg: u8) -> VmResult<Value> {
        let frame = borrow(&self.frame)?;
        frame.slot(live(&frame, reg)?).cloned()
    }

    /// Overwrite register `reg`, releasing its old content
    pub(in crate::vm::interpreter) fn put(&self, reg: u8, value: Value) -> VmResult<()> {
        let mut frame = borrow_mut(&self.frame)?;
        let idx = live(&frame, reg)?;
        frame.put(idx, value)?;
        Ok(())
    }
}

fn live(frame: &Array, reg: u8) -> VmResult<usize> {
    let items = frame.len();
    if u32::from(reg) >= items {
        return Err(VmError::InvalidArgument(format!(
            "register {} out of range for {} items",
            reg, items
        )));
    }
    Ok(reg as usize)
}
