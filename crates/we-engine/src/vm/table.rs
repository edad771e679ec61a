//! Open-addressing hash table
//!
//! Capacity is always zero or a power of two and the load is kept at or
//! below one half. Collisions use linear probing with wraparound.
//!
//! Slot states:
//! - free: nil key, nil value (ends a probe)
//! - tombstone: nil key, non-nil value (probing continues past it)
//! - live: non-nil key
//!
//! Non-negative integer keys are moved into their natural slot after
//! insertion, so small integer keys resolve in one probe.
//!
//! A lookup may carry a collection predicate. Every live entry the probe
//! visits is offered to the predicate and evicted when it answers true; no
//! other entries are examined.

use std::cell::RefCell;
use std::rc::Rc;

use super::array::{next_pow2, MAX_CAPACITY};
use super::value::Value;
use super::{VmError, VmResult};

/// Shared table reference
pub type TableRef = Rc<RefCell<Table>>;

/// Eviction predicate consulted while probing
pub type Collector<'a> = &'a mut dyn FnMut(&Value) -> bool;

#[derive(Debug, Clone, Default)]
struct Entry {
    key: Value,
    val: Value,
}

impl Entry {
    fn is_free(&self) -> bool {
        self.key.is_nil() && self.val.is_nil()
    }

    fn tombstone() -> Self {
        Entry {
            key: Value::Nil,
            val: Value::Number(0),
        }
    }
}

/// Outcome of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Key is present at this slot
    Found(usize),
    /// Key is absent; this is the first reusable slot on its chain
    Vacant(usize),
    /// Key is absent and no slot is available
    Full,
}

/// Hash map from value to value with an auxiliary meta slot
#[derive(Debug, Default)]
pub struct Table {
    slots: Vec<Entry>,
    items: u32,
    meta: Value,
}

impl Table {
    /// Create an empty table with no storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in a shared reference
    pub fn into_ref(self) -> TableRef {
        Rc::new(RefCell::new(self))
    }

    /// Number of live entries
    pub fn len(&self) -> u32 {
        self.items
    }

    /// Whether the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Bucket count
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Meta slot
    pub fn meta(&self) -> &Value {
        &self.meta
    }

    /// Replace the meta slot, returning the previous value
    pub fn set_meta(&mut self, meta: Value) -> Value {
        std::mem::replace(&mut self.meta, meta)
    }

    /// Locate `key`, offering each visited live entry to `gc`
    pub fn find(&mut self, key: &Value, mut gc: Option<Collector<'_>>) -> Probe {
        let cap = self.slots.len();
        if cap == 0 {
            return Probe::Full;
        }
        let mask = cap - 1;
        let start = key.hash32() as usize & mask;
        let mut idx = start;
        let mut reusable: Option<usize> = None;

        loop {
            let entry = &self.slots[idx];
            if entry.key.is_nil() {
                reusable.get_or_insert(idx);
                if entry.val.is_nil() {
                    break;
                }
            } else {
                let evict = match gc.as_deref_mut() {
                    Some(pred) => {
                        let val = entry.val.clone();
                        pred(&val)
                    }
                    None => false,
                };
                if evict {
                    let matched = self.slots[idx].key.equals(key);
                    self.slots[idx] = Entry::tombstone();
                    self.items -= 1;
                    tracing::debug!(slot = idx, "table entry collected");
                    if matched {
                        reusable.get_or_insert(idx);
                        break;
                    }
                } else if self.slots[idx].key.equals(key) {
                    return Probe::Found(idx);
                }
            }
            idx = (idx + 1) & mask;
            if idx == start {
                break;
            }
        }

        match reusable {
            Some(slot) => Probe::Vacant(slot),
            None => Probe::Full,
        }
    }

    /// Look up `key` without eviction
    pub fn lookup(&mut self, key: &Value) -> Option<Value> {
        match self.find(key, None) {
            Probe::Found(idx) => Some(self.slots[idx].val.clone()),
            _ => None,
        }
    }

    /// Get-or-default
    ///
    /// A present key returns its value. A missing key with a nil default
    /// returns nil and leaves the table untouched; with a non-nil default the
    /// pair is inserted and the default returned.
    pub fn get_or_default(
        &mut self,
        key: &Value,
        default: &Value,
        gc: Option<Collector<'_>>,
    ) -> VmResult<Value> {
        if let Probe::Found(idx) = self.find(key, gc) {
            return Ok(self.slots[idx].val.clone());
        }
        if default.is_nil() {
            return Ok(Value::Nil);
        }
        if key.is_nil() {
            return Err(VmError::invalid("nil table key"));
        }
        self.insert_new(key, default.clone())?;
        Ok(default.clone())
    }

    /// Insert or overwrite; a nil value deletes the key
    pub fn set(&mut self, key: &Value, value: Value, gc: Option<Collector<'_>>) -> VmResult<()> {
        if value.is_nil() {
            self.delete(key, gc);
            return Ok(());
        }
        if key.is_nil() {
            return Err(VmError::invalid("nil table key"));
        }
        if let Probe::Found(idx) = self.find(key, gc) {
            self.slots[idx].val = value;
            return Ok(());
        }
        self.insert_new(key, value)
    }

    /// Remove `key`, leaving a tombstone. Returns whether it was present.
    pub fn delete(&mut self, key: &Value, gc: Option<Collector<'_>>) -> bool {
        match self.find(key, gc) {
            Probe::Found(idx) => {
                self.slots[idx] = Entry::tombstone();
                self.items -= 1;
                true
            }
            _ => false,
        }
    }

    /// Rehash into the next power of two `>= n` buckets
    ///
    /// Every live entry is kept, so a table never ends up more than half
    /// loaded; a request below that grows to fit instead.
    pub fn resize(&mut self, n: u32) -> VmResult<()> {
        let fit = (self.items as u64).saturating_mul(2);
        let cap = next_pow2((n as u64).max(fit));
        if cap > MAX_CAPACITY as u64 {
            return Err(VmError::OutOfMemory);
        }
        self.rehash(cap as usize)
    }

    /// Double the bucket count when one more entry would exceed half load
    fn ensure_capacity(&mut self) -> VmResult<bool> {
        let cap = self.slots.len();
        if (self.items as usize + 1) * 2 <= cap {
            return Ok(false);
        }
        let grown = if cap == 0 { 2 } else { cap * 2 };
        self.rehash(grown)?;
        Ok(true)
    }

    fn rehash(&mut self, cap: usize) -> VmResult<()> {
        if cap > MAX_CAPACITY {
            return Err(VmError::OutOfMemory);
        }
        let mut fresh = Vec::new();
        fresh
            .try_reserve_exact(cap)
            .map_err(|_| VmError::OutOfMemory)?;
        fresh.resize_with(cap, Entry::default);
        let old = std::mem::replace(&mut self.slots, fresh);
        self.items = 0;
        for entry in old.into_iter().filter(|e| !e.key.is_nil()) {
            if let Probe::Vacant(idx) = self.find(&entry.key, None) {
                self.place(idx, entry.key, entry.val);
            }
        }
        Ok(())
    }

    fn insert_new(&mut self, key: &Value, value: Value) -> VmResult<()> {
        self.ensure_capacity()?;
        match self.find(key, None) {
            Probe::Vacant(idx) => {
                self.place(idx, key.clone(), value);
                Ok(())
            }
            Probe::Found(idx) => {
                self.slots[idx].val = value;
                Ok(())
            }
            Probe::Full => Err(VmError::OutOfMemory),
        }
    }

    /// Fill a vacant slot, then move small integer keys to their home slot
    fn place(&mut self, idx: usize, key: Value, val: Value) {
        let home = match key {
            Value::Number(n) if n >= 0 && (n as u64) < self.slots.len() as u64 => Some(n as usize),
            _ => None,
        };
        self.slots[idx] = Entry { key, val };
        self.items += 1;
        if let Some(home) = home {
            if home != idx {
                self.slots.swap(home, idx);
            }
        }
    }

    /// First live slot after `cursor` (from the start when `None`)
    pub fn next_occupied(&self, cursor: Option<i64>) -> Option<u32> {
        if self.items == 0 {
            return None;
        }
        let start = cursor.map_or(0, |c| c.saturating_add(1).max(0)) as usize;
        self.slots
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, e)| !e.key.is_nil())
            .map(|(i, _)| i as u32)
    }

    /// Raw `(key, value)` at a slot; nil pair for free slots and tombstones
    pub fn entry_at(&self, idx: usize) -> Option<(Value, Value)> {
        self.slots.get(idx).map(|e| match e.key {
            Value::Nil => (Value::Nil, Value::Nil),
            _ => (e.key.clone(), e.val.clone()),
        })
    }

    /// Live entries in slot order
    pub fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.slots
            .iter()
            .filter(|e| !e.key.is_nil())
            .map(|e| (&e.key, &e.val))
    }

    /// Slot index holding `key`, if present
    pub fn slot_of(&mut self, key: &Value) -> Option<usize> {
        match self.find(key, None) {
            Probe::Found(idx) => Some(idx),
            _ => None,
        }
    }

    /// Whether a slot is free (never used since the last rehash)
    pub fn is_free(&self, idx: usize) -> bool {
        self.slots.get(idx).is_some_and(Entry::is_free)
    }
}
