//! Resizable arrays and VM frames
//!
//! An `Array` is a flat vector of value slots. A nil slot is empty and is not
//! counted by `items`. The same type doubles as a VM frame: slot 0 holds the
//! program view, the remaining slots are the register file, and `items` is
//! the stack pointer. `prev` links a nested frame back to its caller without
//! owning it.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::value::Value;
use super::{VmError, VmResult};

/// Shared array reference
pub type ArrayRef = Rc<RefCell<Array>>;

/// Upper bound on array capacity
pub const MAX_CAPACITY: usize = 1 << 24;

/// Smallest power of two that is `>= n` (0 stays 0)
pub(crate) fn next_pow2(n: u64) -> u64 {
    if n == 0 {
        0
    } else {
        n.checked_next_power_of_two().unwrap_or(u64::MAX)
    }
}

fn capacity_for(n: u64) -> VmResult<usize> {
    let n = usize::try_from(n).map_err(|_| VmError::OutOfMemory)?;
    if n > MAX_CAPACITY {
        return Err(VmError::OutOfMemory);
    }
    Ok(n)
}

fn underflow() -> VmError {
    VmError::invalid("stack underflow")
}

/// Ordered value container and frame
#[derive(Debug, Default)]
pub struct Array {
    slots: Vec<Value>,
    items: u32,
    prev: Option<Weak<RefCell<Array>>>,
}

impl Array {
    /// Create an empty array with no storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an array with `capacity` empty slots
    pub fn with_capacity(capacity: usize) -> VmResult<Self> {
        let mut arr = Self::new();
        arr.resize(capacity)?;
        Ok(arr)
    }

    /// Wrap in a shared reference
    pub fn into_ref(self) -> ArrayRef {
        Rc::new(RefCell::new(self))
    }

    /// Number of live items (the stack pointer for frames)
    pub fn len(&self) -> u32 {
        self.items
    }

    /// Whether the array holds no items
    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Allocated slot count
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Caller frame, when this frame was entered by a nested invocation
    pub fn prev(&self) -> Option<&Weak<RefCell<Array>>> {
        self.prev.as_ref()
    }

    /// Link this frame to its caller
    pub fn set_prev(&mut self, prev: Option<Weak<RefCell<Array>>>) {
        self.prev = prev;
    }

    /// Unlink and return the caller frame
    pub fn take_prev(&mut self) -> Option<Weak<RefCell<Array>>> {
        self.prev.take()
    }

    /// Set the capacity to exactly `capacity` slots
    ///
    /// Shrinking discards trailing slots; every occupied slot dropped
    /// decrements the item count, which never exceeds the new capacity.
    pub fn resize(&mut self, capacity: usize) -> VmResult<()> {
        let capacity = capacity_for(capacity as u64)?;
        let current = self.slots.len();
        if capacity == current {
            return Ok(());
        }
        if capacity > current {
            self.slots
                .try_reserve_exact(capacity - current)
                .map_err(|_| VmError::OutOfMemory)?;
            self.slots.resize_with(capacity, Value::default);
        } else {
            let dropped = self.slots[capacity..].iter().filter(|v| !v.is_nil()).count();
            self.items = self
                .items
                .saturating_sub(dropped as u32)
                .min(capacity as u32);
            self.slots.truncate(capacity);
            self.slots.shrink_to_fit();
        }
        Ok(())
    }

    /// Grow to at least `capacity` slots, never shrinking
    pub fn reserve(&mut self, capacity: usize) -> VmResult<()> {
        if capacity > self.slots.len() {
            self.resize(capacity)?;
        }
        Ok(())
    }

    /// Append at the stack pointer, growing geometrically
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        let cap = self.slots.len() as u64;
        if self.items as u64 + 2 >= cap {
            let grown = capacity_for(next_pow2(cap * 2 + 1))?;
            self.resize(grown)?;
        }
        self.slots[self.items as usize] = value;
        self.items += 1;
        Ok(())
    }

    /// Remove and return the value at the stack pointer
    pub fn pop(&mut self) -> VmResult<Value> {
        let top = self.items.checked_sub(1).ok_or_else(underflow)?;
        let value = self.slots.get_mut(top as usize).ok_or_else(underflow)?;
        let value = std::mem::take(value);
        self.items = top;
        Ok(value)
    }

    /// Value `depth` slots below the stack pointer (0 is the top)
    pub fn peek(&self, depth: u32) -> VmResult<&Value> {
        if depth >= self.items {
            return Err(underflow());
        }
        self.slots
            .get((self.items - 1 - depth) as usize)
            .ok_or_else(underflow)
    }

    /// Mutable access to the value `depth` slots below the stack pointer
    pub fn peek_mut(&mut self, depth: u32) -> VmResult<&mut Value> {
        if depth >= self.items {
            return Err(underflow());
        }
        self.slots
            .get_mut((self.items - 1 - depth) as usize)
            .ok_or_else(underflow)
    }

    /// Raw slot access by register number
    pub fn slot(&self, reg: usize) -> VmResult<&Value> {
        self.slots
            .get(reg)
            .ok_or_else(|| VmError::InvalidArgument(format!("register {} out of bounds", reg)))
    }

    /// Raw slot write by register number; the item count is not adjusted
    pub fn put(&mut self, reg: usize, value: Value) -> VmResult<Value> {
        let slot = self
            .slots
            .get_mut(reg)
            .ok_or_else(|| VmError::InvalidArgument(format!("register {} out of bounds", reg)))?;
        Ok(std::mem::replace(slot, value))
    }

    /// Wrap a negative index from the end; clamp past-the-front to `items`
    fn normalize(&self, idx: i64) -> i64 {
        if idx < 0 {
            let wrapped = idx + self.items as i64;
            if wrapped < 0 {
                return self.items as i64;
            }
            return wrapped;
        }
        idx
    }

    /// Get-or-default at `idx`
    ///
    /// A missing slot with a non-nil default is filled with the default.
    /// Out-of-range reads with a nil default return nil without growing.
    pub fn get(&mut self, idx: i64, default: &Value) -> VmResult<Value> {
        let i = self.normalize(idx) as u64;
        if i >= self.slots.len() as u64 {
            if default.is_nil() {
                return Ok(Value::Nil);
            }
            let grown = capacity_for(i * 2 + 1)?;
            self.resize(grown)?;
        }
        let slot = &mut self.slots[i as usize];
        if slot.is_nil() && !default.is_nil() {
            *slot = default.clone();
            self.items += 1;
        }
        Ok(slot.clone())
    }

    /// Store `value` at `idx`; nil deletes, leaving a hole
    pub fn set(&mut self, idx: i64, value: Value) -> VmResult<()> {
        let i = self.normalize(idx) as u64;
        if i >= self.slots.len() as u64 {
            if value.is_nil() {
                return Ok(());
            }
            let grown = capacity_for(next_pow2(i * 2 + 1))?;
            self.resize(grown)?;
        }
        let slot = &mut self.slots[i as usize];
        match (slot.is_nil(), value.is_nil()) {
            (true, false) => self.items += 1,
            (false, true) => self.items -= 1,
            _ => {}
        }
        *slot = value;
        Ok(())
    }

    /// First occupied slot after `cursor` (from the start when `None`)
    pub fn next_occupied(&self, cursor: Option<i64>) -> Option<u32> {
        if self.items == 0 {
            return None;
        }
        let start = cursor.map_or(0, |c| c.saturating_add(1).max(0)) as usize;
        self.slots
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, v)| !v.is_nil())
            .map(|(i, _)| i as u32)
    }

    /// Iterate over all slots, occupied or not
    pub fn slots(&self) -> impl Iterator<Item = &Value> {
        self.slots.iter()
    }

    /// Values of occupied slots in slot order
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.slots.iter().filter(|v| !v.is_nil())
    }

    /// Copy the live stack `[0, items)` into a new array of the same capacity
    ///
    /// Every copied value is acquired; the caller link is not carried over.
    pub fn clone_frame(&self) -> VmResult<Array> {
        let mut copy = Array::with_capacity(self.slots.len())?;
        let live = self.slots.iter().take(self.items as usize);
        for (dst, src) in copy.slots.iter_mut().zip(live) {
            *dst = src.clone();
        }
        copy.items = self.items;
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_grows_geometrically() {
        let mut arr = Array::new();
        arr.push(Value::Number(1)).unwrap();
        assert_eq!(arr.capacity(), 1);
        arr.push(Value::Number(2)).unwrap();
        arr.push(Value::Number(3)).unwrap();
        assert_eq!(arr.len(), 3);
        assert!(arr.capacity() >= 4);
        assert_eq!(arr.pop().unwrap(), Value::Number(3));
        assert_eq!(arr.len(), 2);
    }

    #[test]
    fn test_pop_empty_underflows() {
        let mut arr = Array::new();
        assert!(matches!(arr.pop(), Err(VmError::InvalidArgument(_))));
    }

    #[test]
    fn test_negative_index_wraps() {
        let mut arr = Array::new();
        for i in 0..3 {
            arr.set(i, Value::Number(i * 10)).unwrap();
        }
        assert_eq!(arr.get(-1, &Value::Nil).unwrap(), Value::Number(20));
        assert_eq!(arr.get(-3, &Value::Nil).unwrap(), Value::Number(0));
        // Past the front clamps to items rather than failing.
        arr.set(-10, Value::Number(99)).unwrap();
        assert_eq!(arr.get(3, &Value::Nil).unwrap(), Value::Number(99));
    }

    #[test]
    fn test_get_with_default_inserts() {
        let mut arr = Array::new();
        assert_eq!(arr.get(5, &Value::Nil).unwrap(), Value::Nil);
        assert_eq!(arr.capacity(), 0);
        assert_eq!(arr.get(5, &Value::Number(7)).unwrap(), Value::Number(7));
        assert_eq!(arr.len(), 1);
        assert_eq!(arr.get(5, &Value::Number(8)).unwrap(), Value::Number(7));
    }

    #[test]
    fn test_set_nil_leaves_hole() {
        let mut arr = Array::new();
        arr.set(0, Value::Number(1)).unwrap();
        arr.set(1, Value::Number(2)).unwrap();
        arr.set(0, Value::Nil).unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr.next_occupied(None), Some(1));
        assert_eq!(arr.next_occupied(Some(1)), None);
    }

    #[test]
    fn test_shrink_releases_trailing() {
        let mut arr = Array::with_capacity(8).unwrap();
        let shared = Value::new_table();
        arr.set(1, Value::Number(1)).unwrap();
        arr.set(6, shared.clone()).unwrap();
        assert_eq!(shared.refcount(), 1);
        arr.resize(4).unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr.capacity(), 4);
        assert_eq!(shared.refcount(), 0);
    }

    #[test]
    fn test_shrink_below_stack_pointer_clamps() {
        let mut arr = Array::with_capacity(8).unwrap();
        arr.push(Value::Number(1)).unwrap();
        arr.push(Value::Nil).unwrap();
        arr.push(Value::Nil).unwrap();
        assert_eq!(arr.len(), 3);
        // Only the number at slot 0 survives; the counted nils go with it.
        arr.resize(1).unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr.pop().unwrap(), Value::Number(1));
        arr.push(Value::Nil).unwrap();
        arr.push(Value::Nil).unwrap();
        arr.resize(0).unwrap();
        assert_eq!(arr.len(), 0);
        assert!(matches!(arr.pop(), Err(VmError::InvalidArgument(_))));
        assert!(matches!(arr.peek(0), Err(VmError::InvalidArgument(_))));
    }

    #[test]
    fn test_clone_frame_acquires() {
        let mut arr = Array::with_capacity(4).unwrap();
        let shared = Value::new_array();
        arr.push(shared.clone()).unwrap();
        let copy = arr.clone_frame().unwrap();
        assert_eq!(copy.len(), 1);
        assert_eq!(copy.capacity(), arr.capacity());
        assert_eq!(shared.refcount(), 2);
    }

    #[test]
    fn test_huge_index_is_out_of_memory() {
        let mut arr = Array::new();
        assert_eq!(arr.set(i64::MAX / 4, Value::Number(1)), Err(VmError::OutOfMemory));
    }

    #[test]
    fn test_next_pow2() {
        assert_eq!(next_pow2(0), 0);
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(5), 8);
        assert_eq!(next_pow2(16), 16);
    }
}
