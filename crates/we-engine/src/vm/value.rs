//! Value representation
//!
//! A `Value` is one of five kinds: nil, number, buffer, table or array.
//! Numbers are carried by value; the three heap kinds are reference counted.
//! Cloning a `Value` acquires a reference and dropping it releases one.
//!
//! Tables and arrays are reached through a [`Handle`], which is either a
//! strong `Rc` or an explicit non-owning `Weak`. A weak handle never keeps its
//! referent alive; using it after the owner is gone is an `InvalidArgument`.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use super::array::Array;
use super::buffer::Buffer;
use super::table::Table;
use super::{VmError, VmResult};

/// Type identifier of a value, as reported by the `tid` opcode
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Absent value
    Nil = 0,
    /// 64-bit signed integer
    Number = 1,
    /// Byte view into a heap buffer
    Buffer = 2,
    /// Hash map
    Table = 3,
    /// Ordered sequence / VM frame
    Array = 4,
}

impl ValueKind {
    /// Decode a type identifier
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Nil),
            1 => Some(Self::Number),
            2 => Some(Self::Buffer),
            3 => Some(Self::Table),
            4 => Some(Self::Array),
            _ => None,
        }
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Number => "number",
            Self::Buffer => "buffer",
            Self::Table => "table",
            Self::Array => "array",
        }
    }
}

/// Shared reference to a heap container
///
/// `Strong` contributes to the referent's count, `Weak` does not.
pub enum Handle<T> {
    /// Owning reference
    Strong(Rc<RefCell<T>>),
    /// Non-owning alias
    Weak(Weak<RefCell<T>>),
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        match self {
            Handle::Strong(rc) => Handle::Strong(Rc::clone(rc)),
            Handle::Weak(weak) => Handle::Weak(Weak::clone(weak)),
        }
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Strong(_) => write!(f, "Strong({:p})", self.as_ptr()),
            Handle::Weak(_) => write!(f, "Weak({:p})", self.as_ptr()),
        }
    }
}

impl<T> Handle<T> {
    /// Allocate a new referent with a count of one
    pub fn new(inner: T) -> Self {
        Handle::Strong(Rc::new(RefCell::new(inner)))
    }

    /// Whether this handle is a non-owning alias
    pub fn is_weak(&self) -> bool {
        matches!(self, Handle::Weak(_))
    }

    /// Non-owning alias to the same referent
    pub fn downgrade(&self) -> Self {
        match self {
            Handle::Strong(rc) => Handle::Weak(Rc::downgrade(rc)),
            Handle::Weak(weak) => Handle::Weak(Weak::clone(weak)),
        }
    }

    /// Obtain an owning reference, failing when a weak referent is gone
    pub fn upgrade(&self) -> VmResult<Rc<RefCell<T>>> {
        match self {
            Handle::Strong(rc) => Ok(Rc::clone(rc)),
            Handle::Weak(weak) => weak.upgrade().ok_or_else(VmError::dangling),
        }
    }

    /// Address of the referent, used for identity and hashing
    pub fn as_ptr(&self) -> *const RefCell<T> {
        match self {
            Handle::Strong(rc) => Rc::as_ptr(rc),
            Handle::Weak(weak) => weak.as_ptr(),
        }
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        std::ptr::eq(self.as_ptr(), other.as_ptr())
    }

    /// Number of owning references to the referent
    pub fn strong_count(&self) -> usize {
        match self {
            Handle::Strong(rc) => Rc::strong_count(rc),
            Handle::Weak(weak) => weak.strong_count(),
        }
    }
}

/// Borrow a container without panicking on re-entrant access
pub(crate) fn borrow<T>(cell: &RefCell<T>) -> VmResult<Ref<'_, T>> {
    cell.try_borrow().map_err(|_| VmError::busy())
}

/// Mutably borrow a container without panicking on re-entrant access
pub(crate) fn borrow_mut<T>(cell: &RefCell<T>) -> VmResult<RefMut<'_, T>> {
    cell.try_borrow_mut().map_err(|_| VmError::busy())
}

/// A VM value
#[derive(Clone, Default)]
pub enum Value {
    /// Absent value; an empty container slot
    #[default]
    Nil,
    /// 64-bit signed integer
    Number(i64),
    /// View into a heap buffer
    Buffer(Buffer),
    /// Hash map
    Table(Handle<Table>),
    /// Ordered sequence / frame
    Array(Handle<Array>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::Buffer(buf) => write!(f, "Buffer({:?})", buf),
            Value::Table(h) => write!(f, "Table({:?})", h),
            Value::Array(h) => write!(f, "Array({:?})", h),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n)
    }
}

impl From<Buffer> for Value {
    fn from(buf: Buffer) -> Self {
        Value::Buffer(buf)
    }
}

impl From<Rc<RefCell<Table>>> for Value {
    fn from(rc: Rc<RefCell<Table>>) -> Self {
        Value::Table(Handle::Strong(rc))
    }
}

impl From<Rc<RefCell<Array>>> for Value {
    fn from(rc: Rc<RefCell<Array>>) -> Self {
        Value::Array(Handle::Strong(rc))
    }
}

impl Value {
    /// Type identifier
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Number(_) => ValueKind::Number,
            Value::Buffer(_) => ValueKind::Buffer,
            Value::Table(_) => ValueKind::Table,
            Value::Array(_) => ValueKind::Array,
        }
    }

    /// Check if this is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Number payload, if any
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Buffer payload, if any
    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Value::Buffer(buf) => Some(buf),
            _ => None,
        }
    }

    /// Upgraded table reference, if this is a live table
    pub fn as_table(&self) -> VmResult<Option<Rc<RefCell<Table>>>> {
        match self {
            Value::Table(h) => h.upgrade().map(Some),
            _ => Ok(None),
        }
    }

    /// Upgraded array reference, if this is a live array
    pub fn as_array(&self) -> VmResult<Option<Rc<RefCell<Array>>>> {
        match self {
            Value::Array(h) => h.upgrade().map(Some),
            _ => Ok(None),
        }
    }

    /// Integer operand for arithmetic: nil reads as zero
    pub fn to_int(&self) -> VmResult<i64> {
        match self {
            Value::Nil => Ok(0),
            Value::Number(n) => Ok(*n),
            other => Err(VmError::InvalidArgument(format!(
                "expected number, found {}",
                other.kind().name()
            ))),
        }
    }

    /// Truthiness as seen by predicate programs
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Number(n) => *n != 0,
            _ => true,
        }
    }

    /// Whether this value is a non-owning alias
    pub fn is_weak(&self) -> bool {
        match self {
            Value::Table(h) => h.is_weak(),
            Value::Array(h) => h.is_weak(),
            _ => false,
        }
    }

    /// Downgrade a table or array to a weak alias; other kinds are unchanged
    pub fn downgrade(&self) -> Value {
        match self {
            Value::Table(h) => Value::Table(h.downgrade()),
            Value::Array(h) => Value::Array(h.downgrade()),
            other => other.clone(),
        }
    }

    /// 32-bit hash used for table placement
    pub fn hash32(&self) -> u32 {
        match self {
            Value::Nil => 0,
            Value::Number(n) => *n as u32,
            Value::Buffer(buf) => buf.hash32(),
            Value::Table(h) => h.as_ptr() as usize as u32,
            Value::Array(h) => h.as_ptr() as usize as u32,
        }
    }

    /// Key equality: numbers by value, buffers by content, containers by identity
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => a.content_eq(b),
            (Value::Table(a), Value::Table(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Heap identity (0 for nil and numbers)
    pub fn identity(&self) -> i64 {
        match self {
            Value::Nil | Value::Number(_) => 0,
            Value::Buffer(buf) => buf.heap_ptr() as usize as i64,
            Value::Table(h) => h.as_ptr() as usize as i64,
            Value::Array(h) => h.as_ptr() as usize as i64,
        }
    }

    /// Buffer view offset (0 for other kinds)
    pub fn offset(&self) -> u32 {
        match self {
            Value::Buffer(buf) => buf.offset(),
            _ => 0,
        }
    }

    /// Logical length: view length, live entries or live items
    pub fn len(&self) -> VmResult<u32> {
        match self {
            Value::Nil => Ok(0),
            Value::Number(_) => Ok(std::mem::size_of::<i64>() as u32),
            Value::Buffer(buf) => Ok(buf.len()),
            Value::Table(h) => Ok(borrow(&*h.upgrade()?)?.len()),
            Value::Array(h) => Ok(borrow(&*h.upgrade()?)?.len()),
        }
    }

    /// Allocated size: heap buffer length or container capacity
    pub fn size(&self) -> VmResult<u32> {
        match self {
            Value::Nil => Ok(0),
            Value::Number(_) => Ok(std::mem::size_of::<i64>() as u32),
            Value::Buffer(buf) => Ok(buf.size()),
            Value::Table(h) => Ok(borrow(&*h.upgrade()?)?.capacity()),
            Value::Array(h) => Ok(borrow(&*h.upgrade()?)?.capacity()),
        }
    }

    /// Reference count excluding this value's own reference
    ///
    /// A weak value holds no reference, so every owner is counted.
    pub fn refcount(&self) -> u32 {
        let count = match self {
            Value::Nil | Value::Number(_) => return 0,
            Value::Buffer(buf) => buf.refcount().saturating_sub(1),
            Value::Table(h) if h.is_weak() => h.strong_count(),
            Value::Array(h) if h.is_weak() => h.strong_count(),
            Value::Table(h) => h.strong_count().saturating_sub(1),
            Value::Array(h) => h.strong_count().saturating_sub(1),
        };
        count as u32
    }

    /// Create a new empty table value
    pub fn new_table() -> Value {
        Value::Table(Handle::new(Table::new()))
    }

    /// Create a new empty array value
    pub fn new_array() -> Value {
        Value::Array(Handle::new(Array::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ids() {
        assert_eq!(Value::Nil.kind() as u8, 0);
        assert_eq!(Value::Number(1).kind() as u8, 1);
        assert_eq!(Value::Buffer(Buffer::copy_from(b"x").unwrap()).kind() as u8, 2);
        assert_eq!(Value::new_table().kind() as u8, 3);
        assert_eq!(Value::new_array().kind() as u8, 4);
        assert_eq!(ValueKind::from_u8(4), Some(ValueKind::Array));
        assert_eq!(ValueKind::from_u8(5), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Number(0).is_truthy());
        assert!(Value::Number(-3).is_truthy());
        assert!(Value::new_table().is_truthy());
    }

    #[test]
    fn test_acquire_release_counts() {
        let table = Value::new_table();
        assert_eq!(table.refcount(), 0);
        let copy = table.clone();
        assert_eq!(table.refcount(), 1);
        drop(copy);
        assert_eq!(table.refcount(), 0);
    }

    #[test]
    fn test_weak_does_not_own() {
        let table = Value::new_table();
        let weak = table.downgrade();
        assert!(weak.is_weak());
        assert_eq!(weak.refcount(), 1);
        assert!(weak.equals(&table));
        assert_eq!(weak.hash32(), table.hash32());
        drop(table);
        assert!(weak.as_table().is_err());
        assert!(weak.len().is_err());
    }

    #[test]
    fn test_key_equality() {
        let a = Value::Buffer(Buffer::copy_from(b"key").unwrap());
        let b = Value::Buffer(Buffer::copy_from(b"key").unwrap());
        assert!(a.equals(&b));
        assert_eq!(a.hash32(), b.hash32());
        assert!(!Value::new_table().equals(&Value::new_table()));
        assert!(!Value::Number(0).equals(&Value::Nil));
    }

    #[test]
    fn test_arith_operand() {
        assert_eq!(Value::Nil.to_int().unwrap(), 0);
        assert_eq!(Value::Number(7).to_int().unwrap(), 7);
        assert!(Value::new_array().to_int().is_err());
    }

    #[test]
    fn test_len_and_size_of_scalars() {
        assert_eq!(Value::Nil.len().unwrap(), 0);
        assert_eq!(Value::Number(5).len().unwrap(), 8);
        assert_eq!(Value::Number(5).size().unwrap(), 8);
        assert_eq!(Value::Number(5).identity(), 0);
    }
}
