//! Embedding API
//!
//! A [`Vm`] is a handle on a frame array. The host pushes a program buffer
//! and its arguments, calls it, and reads results back out of the registers.
//!
//! Registers are frame slot indices. A negative register counts back from the
//! item count, so `-1` is the top of the stack. Every register operand is
//! validated against the item count before the stack is touched.

use std::any::Any;
use std::rc::Rc;

use super::array::{Array, ArrayRef};
use super::buffer::{Buffer, HeldBuffer};
use super::builtins::{key_value, next_key};
use super::config::VmOptions;
use super::interpreter::{ExecutionResult, Interpreter};
use super::table::{Table, TableRef};
use super::value::{borrow, borrow_mut, Handle, Value, ValueKind};
use super::{VmError, VmResult};

/// Embeddable VM instance
///
/// `state` is the frame the next [`call`](Vm::call) resumes. After a nested
/// frame yields it is that child frame; `root` keeps the outermost frame and
/// with it the whole caller chain alive.
pub struct Vm {
    root: ArrayRef,
    state: ArrayRef,
    options: VmOptions,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let items = self.state.try_borrow().map(|s| s.len()).ok();
        f.debug_struct("Vm")
            .field("items", &items)
            .field("nested", &!Rc::ptr_eq(&self.root, &self.state))
            .finish()
    }
}

impl Vm {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a VM with a register stack of `stack_size` slots
    pub fn create(stack_size: usize) -> VmResult<Self> {
        Self::with_options(VmOptions {
            stack_size,
            ..VmOptions::default()
        })
    }

    /// Create a VM from explicit options
    pub fn with_options(options: VmOptions) -> VmResult<Self> {
        if options.stack_size > VmOptions::MAX_STACK_SIZE {
            return Err(VmError::InvalidArgument(format!(
                "stack size {} exceeds {}",
                options.stack_size,
                VmOptions::MAX_STACK_SIZE
            )));
        }
        let frame = Array::with_capacity(options.stack_size)?.into_ref();
        Ok(Self {
            root: Rc::clone(&frame),
            state: frame,
            options,
        })
    }

    /// Handle on an existing array, as handed to external functions
    pub(crate) fn attach(frame: ArrayRef, options: VmOptions) -> Self {
        Self {
            root: Rc::clone(&frame),
            state: frame,
            options,
        }
    }

    /// Release the VM and everything only it references
    pub fn destroy(self) {
        drop(self);
    }

    /// New VM holding a copy of the live registers
    ///
    /// Every copied value is shared with this VM, not deep-copied.
    pub fn try_clone(&self) -> VmResult<Self> {
        let frame = borrow(&self.state)?.clone_frame()?.into_ref();
        Ok(Self {
            root: Rc::clone(&frame),
            state: frame,
            options: self.options.clone(),
        })
    }

    /// Frame the next call resumes
    pub fn frame(&self) -> &ArrayRef {
        &self.state
    }

    /// Options this VM runs with
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    // =========================================================================
    // Stack
    // =========================================================================

    fn reg(&self, reg: i32) -> VmResult<usize> {
        let items = borrow(&self.state)?.len() as i64;
        let idx = if reg < 0 { reg as i64 + items } else { reg as i64 };
        if idx < 0 || idx >= items {
            return Err(VmError::InvalidArgument(format!(
                "register {} out of range for {} items",
                reg, items
            )));
        }
        Ok(idx as usize)
    }

    fn slot(&self, reg: i32) -> VmResult<Value> {
        let idx = self.reg(reg)?;
        borrow(&self.state)?.slot(idx).cloned()
    }

    /// Index of the highest occupied slot (-1 when empty)
    pub fn top(&self) -> i32 {
        self.state
            .try_borrow()
            .map(|s| s.len() as i32 - 1)
            .unwrap_or(-1)
    }

    /// Push any value; returns the new top index
    pub fn push_value(&mut self, value: Value) -> VmResult<u32> {
        let mut frame = borrow_mut(&self.state)?;
        frame.push(value)?;
        Ok(frame.len() - 1)
    }

    /// Push nil; returns the new top index
    pub fn push_nil(&mut self) -> VmResult<u32> {
        self.push_value(Value::Nil)
    }

    /// Push a number; returns the new top index
    pub fn push_number(&mut self, n: i64) -> VmResult<u32> {
        self.push_value(Value::Number(n))
    }

    /// Push a copy of `bytes`
    pub fn push_string(&mut self, bytes: &[u8]) -> VmResult<u32> {
        self.push_value(Value::Buffer(Buffer::copy_from(bytes)?))
    }

    /// Push host bytes without copying
    pub fn push_buffer(&mut self, data: Rc<[u8]>) -> VmResult<u32> {
        self.push_value(Value::Buffer(Buffer::external(data)?))
    }

    /// Push a reference to `table`, or a new empty table
    pub fn push_table(&mut self, table: Option<&TableRef>) -> VmResult<u32> {
        let value = match table {
            Some(t) => Value::Table(Handle::Strong(Rc::clone(t))),
            None => Value::Table(Handle::new(Table::new())),
        };
        self.push_value(value)
    }

    /// Push a reference to `array`, or a new empty array
    pub fn push_array(&mut self, array: Option<&ArrayRef>) -> VmResult<u32> {
        let value = match array {
            Some(a) => Value::Array(Handle::Strong(Rc::clone(a))),
            None => Value::new_array(),
        };
        self.push_value(value)
    }

    /// Remove and return the top value
    pub fn pop(&mut self) -> VmResult<Value> {
        borrow_mut(&self.state)?.pop()
    }

    /// Pop the top into register `reg`, releasing its old content
    pub fn pop_into(&mut self, reg: i32) -> VmResult<()> {
        let idx = self.reg(reg)?;
        let mut frame = borrow_mut(&self.state)?;
        let value = frame.pop()?;
        frame.put(idx, value)?;
        Ok(())
    }

    /// Push a copy of register `reg`; returns the new top index
    pub fn mov(&mut self, reg: i32) -> VmResult<u32> {
        let value = self.slot(reg)?;
        self.push_value(value)
    }

    /// Append a copy of register `reg` through the array store path
    ///
    /// A nil register appends nothing. Returns the top index.
    pub fn dup(&mut self, reg: i32) -> VmResult<i32> {
        let value = self.slot(reg)?;
        {
            let mut frame = borrow_mut(&self.state)?;
            let end = frame.len() as i64;
            frame.set(end, value)?;
        }
        Ok(self.top())
    }

    // =========================================================================
    // Containers
    // =========================================================================

    /// Store: key at `top-1`, value at `top` into the container in `reg`; pops both
    pub fn set(&mut self, reg: i32) -> VmResult<()> {
        let container = self.slot(reg)?;
        let key = self.slot(-2)?;
        let value = self.slot(-1)?;
        let mut host = ();
        Interpreter::new(&self.options, &mut host).container_set(&container, &key, value)?;
        let mut frame = borrow_mut(&self.state)?;
        frame.pop()?;
        frame.pop()?;
        Ok(())
    }

    /// Lookup: replace the key at the top with its value in the container in `reg`
    ///
    /// A missing key yields nil.
    pub fn get(&mut self, reg: i32) -> VmResult<()> {
        let container = self.slot(reg)?;
        let key = self.slot(-1)?;
        let mut host = ();
        let found = Interpreter::new(&self.options, &mut host).container_get(
            &container,
            &key,
            &Value::Nil,
        )?;
        let mut frame = borrow_mut(&self.state)?;
        *frame.peek_mut(0)? = found;
        Ok(())
    }

    /// Iterate the container in `reg` using the cursor at the top
    ///
    /// The cursor (nil to begin) is advanced in place. When a slot is found a
    /// new `[key, value]` array is pushed and true returned.
    pub fn next(&mut self, reg: i32) -> VmResult<bool> {
        let container = self.slot(reg)?;
        let cursor = next_key(&container, &self.slot(-1)?)?;
        *borrow_mut(&self.state)?.peek_mut(0)? = cursor.clone();
        if cursor.is_nil() {
            return Ok(false);
        }
        let pair = Value::new_array();
        key_value(&container, &cursor, &pair)?;
        self.push_value(pair)?;
        Ok(true)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run or resume the program until it halts or fails
    pub fn call(&mut self, host: &mut dyn Any) -> VmResult<ExecutionResult> {
        let mut interpreter = Interpreter::new(&self.options, host);
        interpreter.run(&mut self.state)
    }

    /// Call, honouring the external control codes
    ///
    /// `Again` is answered with one more resume, after which the value it
    /// leaves on top is popped. `Cancelled` ends the call chain cleanly.
    pub fn drive(&mut self, host: &mut dyn Any) -> VmResult<ExecutionResult> {
        match self.call(host) {
            Err(VmError::Again) => {
                tracing::debug!("program replaced, resuming");
                let result = self.call(host)?;
                self.pop()?;
                Ok(result)
            }
            Err(VmError::Cancelled) => {
                tracing::debug!("program cancelled");
                Ok(ExecutionResult::Finished)
            }
            other => other,
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Kind of the value in `reg`
    pub fn kind(&self, reg: i32) -> VmResult<ValueKind> {
        Ok(self.slot(reg)?.kind())
    }

    /// Copy of `reg` if it holds `kind`, nil otherwise
    pub fn read(&self, reg: i32, kind: ValueKind) -> VmResult<Value> {
        let value = self.slot(reg)?;
        if value.kind() == kind {
            Ok(value)
        } else {
            Ok(Value::Nil)
        }
    }

    /// Number in `reg`, if it holds one
    pub fn read_number(&self, reg: i32) -> VmResult<Option<i64>> {
        Ok(self.read(reg, ValueKind::Number)?.as_number())
    }

    /// Buffer view in `reg`, if it holds one
    pub fn read_buffer(&self, reg: i32) -> VmResult<Option<Buffer>> {
        Ok(self.read(reg, ValueKind::Buffer)?.as_buffer().cloned())
    }

    /// Table in `reg`, if it holds one
    pub fn read_table(&self, reg: i32) -> VmResult<Option<TableRef>> {
        self.read(reg, ValueKind::Table)?.as_table()
    }

    /// Array in `reg`, if it holds one
    pub fn read_array(&self, reg: i32) -> VmResult<Option<ArrayRef>> {
        self.read(reg, ValueKind::Array)?.as_array()
    }

    /// Logical length of the value in `reg`
    pub fn len(&self, reg: i32) -> VmResult<u32> {
        self.slot(reg)?.len()
    }

    // =========================================================================
    // Buffers
    // =========================================================================

    /// Take a host reference to the heap buffer in `reg`
    pub fn hold(&self, reg: i32) -> VmResult<HeldBuffer> {
        match self.slot(reg)? {
            Value::Buffer(buf) => Ok(buf.hold()),
            other => Err(VmError::InvalidArgument(format!(
                "hold expects a buffer, found {}",
                other.kind().name()
            ))),
        }
    }

    /// Release a hold, detaching other aliases first; see [`HeldBuffer::sync`]
    pub fn sync(held: HeldBuffer) -> VmResult<bool> {
        held.sync()
    }

    /// Shrink the buffer view in `reg`; returns its new length
    pub fn trim(&mut self, reg: i32, n: i64) -> VmResult<u32> {
        let idx = self.reg(reg)?;
        let mut frame = borrow_mut(&self.state)?;
        match frame.slot(idx)?.clone() {
            Value::Buffer(mut buf) => {
                let len = buf.trim(n);
                frame.put(idx, Value::Buffer(buf))?;
                Ok(len)
            }
            other => Err(VmError::InvalidArgument(format!(
                "trim expects a buffer, found {}",
                other.kind().name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_limits() {
        assert!(Vm::create(255).is_ok());
        assert!(matches!(Vm::create(256), Err(VmError::InvalidArgument(_))));
    }

    #[test]
    fn test_create_destroy_releases() {
        let vm = Vm::create(16).unwrap();
        let probe = Rc::downgrade(vm.frame());
        vm.destroy();
        assert!(probe.upgrade().is_none());
    }

    #[test]
    fn test_push_returns_top() {
        let mut vm = Vm::create(4).unwrap();
        assert_eq!(vm.top(), -1);
        assert_eq!(vm.push_number(1).unwrap(), 0);
        assert_eq!(vm.push_string(b"x").unwrap(), 1);
        assert_eq!(vm.push_nil().unwrap(), 2);
        assert_eq!(vm.top(), 2);
    }

    #[test]
    fn test_negative_registers() {
        let mut vm = Vm::create(4).unwrap();
        vm.push_number(10).unwrap();
        vm.push_number(20).unwrap();
        assert_eq!(vm.read_number(-1).unwrap(), Some(20));
        assert_eq!(vm.read_number(-2).unwrap(), Some(10));
        assert!(vm.read_number(-3).is_err());
        assert!(vm.kind(2).is_err());
    }

    #[test]
    fn test_mov_out_of_range_keeps_stack() {
        let mut vm = Vm::create(4).unwrap();
        vm.push_number(1).unwrap();
        let err = vm.mov(5).unwrap_err();
        assert_eq!(err.code(), -22);
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_read_mismatch_is_nil() {
        let mut vm = Vm::create(4).unwrap();
        vm.push_number(3).unwrap();
        assert!(vm.read(0, ValueKind::Buffer).unwrap().is_nil());
        assert_eq!(vm.read_buffer(0).unwrap().map(|b| b.len()), None);
    }

    #[test]
    fn test_table_set_and_get() {
        let mut vm = Vm::create(8).unwrap();
        let t = vm.push_table(None).unwrap() as i32;
        vm.push_string(b"k").unwrap();
        vm.push_number(5).unwrap();
        vm.set(t).unwrap();
        assert_eq!(vm.top(), 0);
        vm.push_string(b"k").unwrap();
        vm.get(t).unwrap();
        assert_eq!(vm.read_number(-1).unwrap(), Some(5));
        vm.pop().unwrap();
        vm.push_string(b"missing").unwrap();
        vm.get(t).unwrap();
        assert_eq!(vm.kind(-1).unwrap(), ValueKind::Nil);
    }

    #[test]
    fn test_pop_into_and_dup() {
        let mut vm = Vm::create(8).unwrap();
        vm.push_number(1).unwrap();
        vm.push_number(2).unwrap();
        vm.push_number(3).unwrap();
        vm.pop_into(0).unwrap();
        assert_eq!(vm.top(), 1);
        assert_eq!(vm.read_number(0).unwrap(), Some(3));
        assert_eq!(vm.dup(1).unwrap(), 2);
        assert_eq!(vm.read_number(2).unwrap(), Some(2));
    }

    #[test]
    fn test_next_walks_array() {
        let mut vm = Vm::create(8).unwrap();
        let arr = vm.push_array(None).unwrap() as i32;
        vm.push_number(0).unwrap();
        vm.push_string(b"a").unwrap();
        vm.set(arr).unwrap();
        vm.push_number(2).unwrap();
        vm.push_string(b"c").unwrap();
        vm.set(arr).unwrap();

        vm.push_nil().unwrap();
        let mut keys = Vec::new();
        while vm.next(arr).unwrap() {
            let pair = vm.pop().unwrap();
            let pair = pair.as_array().unwrap().unwrap();
            keys.push(pair.borrow_mut().get(0, &Value::Nil).unwrap().as_number().unwrap());
        }
        assert_eq!(keys, vec![0, 2]);
        assert_eq!(vm.kind(-1).unwrap(), ValueKind::Nil);
    }

    #[test]
    fn test_trim() {
        let mut vm = Vm::create(4).unwrap();
        vm.push_string(b"hello world").unwrap();
        assert_eq!(vm.trim(0, 6).unwrap(), 5);
        assert_eq!(vm.read_buffer(0).unwrap().unwrap().to_vec(), b"world");
        assert_eq!(vm.trim(0, -2).unwrap(), 3);
        assert_eq!(vm.read_buffer(0).unwrap().unwrap().to_vec(), b"wor");
        assert_eq!(vm.trim(0, 99).unwrap(), 0);
        vm.push_number(1).unwrap();
        assert!(vm.trim(1, 1).is_err());
    }

    #[test]
    fn test_hold_and_sync_detaches() {
        let mut vm = Vm::create(4).unwrap();
        let host: Rc<[u8]> = Rc::from(&b"shared"[..]);
        vm.push_buffer(Rc::clone(&host)).unwrap();
        let held = vm.hold(0).unwrap();
        assert_eq!(held.refcount(), 2);
        assert!(Vm::sync(held).unwrap());
        // The VM now reads its own copy; the host is the only owner of its bytes.
        assert_eq!(Rc::strong_count(&host), 1);
        assert_eq!(vm.read_buffer(0).unwrap().unwrap().to_vec(), b"shared");
    }

    #[test]
    fn test_try_clone_shares_values() {
        let mut vm = Vm::create(4).unwrap();
        vm.push_table(None).unwrap();
        let copy = vm.try_clone().unwrap();
        assert_eq!(copy.top(), 0);
        let t = vm.read_table(0).unwrap().unwrap();
        let c = copy.read_table(0).unwrap().unwrap();
        assert!(Rc::ptr_eq(&t, &c));
    }
}
