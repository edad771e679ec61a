//! Reference-counted byte buffers
//!
//! A [`HeapBuffer`] owns (or borrows from the host) a contiguous byte slice.
//! A [`Buffer`] is a view `(offset, length)` into one heap buffer; any number
//! of views may share the same heap allocation, so slicing never copies.
//!
//! Host memory pushed with [`Buffer::external`] is shared, not copied. Before
//! the host mutates such memory it calls [`HeldBuffer::sync`], which moves
//! every remaining alias onto a private copy.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::{VmError, VmResult};

/// Largest byte length a heap buffer can hold (31-bit length field)
pub const MAX_BUFFER_LEN: usize = 0x7FFF_FFFF;

const FNV_OFFSET_BASIS: u32 = 2166136261;
const FNV_PRIME: u32 = 16777619;

#[derive(Debug, Clone)]
enum Storage {
    /// Bytes allocated by the engine
    Owned(Rc<[u8]>),
    /// Bytes shared with the host
    External(Rc<[u8]>),
}

impl Storage {
    fn bytes(&self) -> &Rc<[u8]> {
        match self {
            Storage::Owned(data) | Storage::External(data) => data,
        }
    }
}

/// Heap allocation shared by buffer views
#[derive(Debug)]
pub struct HeapBuffer {
    storage: RefCell<Storage>,
}

impl HeapBuffer {
    fn new(storage: Storage) -> Rc<Self> {
        Rc::new(HeapBuffer {
            storage: RefCell::new(storage),
        })
    }

    /// Current backing bytes
    pub fn data(&self) -> Rc<[u8]> {
        Rc::clone(self.storage.borrow().bytes())
    }

    /// Total length of the allocation
    pub fn len(&self) -> usize {
        self.storage.borrow().bytes().len()
    }

    /// Whether the allocation is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the bytes are still shared with the host
    pub fn is_external(&self) -> bool {
        matches!(*self.storage.borrow(), Storage::External(_))
    }

    /// Replace the storage with a private copy of the same bytes
    fn make_owned(&self) -> VmResult<()> {
        let copy = owned_copy(&self.data())?;
        *self.storage.borrow_mut() = Storage::Owned(copy);
        Ok(())
    }
}

fn check_len(len: usize) -> VmResult<()> {
    if len > MAX_BUFFER_LEN {
        return Err(VmError::InvalidArgument(format!(
            "buffer length {} exceeds {}",
            len, MAX_BUFFER_LEN
        )));
    }
    Ok(())
}

fn owned_copy(bytes: &[u8]) -> VmResult<Rc<[u8]>> {
    let mut data = Vec::new();
    data.try_reserve_exact(bytes.len())
        .map_err(|_| VmError::OutOfMemory)?;
    data.extend_from_slice(bytes);
    Ok(Rc::from(data))
}

/// A view into a heap buffer
#[derive(Clone)]
pub struct Buffer {
    obj: Rc<HeapBuffer>,
    off: u32,
    len: u32,
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.with_bytes(|b| b.escape_ascii().to_string());
        write!(f, "\"{}\"@{}+{}", text, self.off, self.len)
    }
}

impl Buffer {
    /// Allocate owned storage holding a copy of `bytes`
    pub fn copy_from(bytes: &[u8]) -> VmResult<Self> {
        check_len(bytes.len())?;
        let data = owned_copy(bytes)?;
        Ok(Self::whole(Storage::Owned(data)))
    }

    /// Take ownership of `bytes` without copying
    pub fn from_vec(bytes: Vec<u8>) -> VmResult<Self> {
        check_len(bytes.len())?;
        Ok(Self::whole(Storage::Owned(Rc::from(bytes))))
    }

    /// Wrap host bytes without copying; the engine never frees them
    pub fn external(data: Rc<[u8]>) -> VmResult<Self> {
        check_len(data.len())?;
        Ok(Self::whole(Storage::External(data)))
    }

    /// Empty owned buffer
    pub fn empty() -> Self {
        Self::whole(Storage::Owned(Rc::from(Vec::new())))
    }

    fn whole(storage: Storage) -> Self {
        let len = storage.bytes().len() as u32;
        Buffer {
            obj: HeapBuffer::new(storage),
            off: 0,
            len,
        }
    }

    /// Derive a sub-view relative to this view, sharing the heap buffer
    pub fn view(&self, off: usize, len: usize) -> VmResult<Self> {
        let end = off.checked_add(len).ok_or_else(|| VmError::invalid("view overflow"))?;
        if end > self.len as usize {
            return Err(VmError::InvalidArgument(format!(
                "view {}..{} outside buffer of length {}",
                off, end, self.len
            )));
        }
        Ok(Buffer {
            obj: Rc::clone(&self.obj),
            off: self.off + off as u32,
            len: len as u32,
        })
    }

    /// View length
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte offset of the view within its heap buffer
    pub fn offset(&self) -> u32 {
        self.off
    }

    /// Length of the underlying heap buffer
    pub fn size(&self) -> u32 {
        self.obj.len() as u32
    }

    /// Number of views (and holds) sharing the heap buffer
    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.obj)
    }

    /// Whether the bytes belong to the host rather than the engine
    pub fn is_external(&self) -> bool {
        self.obj.is_external()
    }

    /// Address of the heap buffer
    pub fn heap_ptr(&self) -> *const HeapBuffer {
        Rc::as_ptr(&self.obj)
    }

    /// Backing bytes of the whole heap buffer; the view starts at [`offset`](Self::offset)
    pub(crate) fn heap_data(&self) -> Rc<[u8]> {
        self.obj.data()
    }

    /// Whether both views share one heap buffer
    pub fn same_heap(&self, other: &Buffer) -> bool {
        Rc::ptr_eq(&self.obj, &other.obj)
    }

    /// Run `f` over the viewed bytes
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.obj.data();
        let start = self.off as usize;
        let end = start + self.len as usize;
        f(&data[start..end])
    }

    /// Copy the viewed bytes out
    pub fn to_vec(&self) -> Vec<u8> {
        self.with_bytes(|b| b.to_vec())
    }

    /// Byte at `idx` within the view
    pub fn byte_at(&self, idx: usize) -> Option<u8> {
        self.with_bytes(|b| b.get(idx).copied())
    }

    /// Content equality
    pub fn content_eq(&self, other: &Buffer) -> bool {
        self.len == other.len && self.compare(other) == Ordering::Equal
    }

    /// Lexicographic comparison; a proper prefix orders first
    pub fn compare(&self, other: &Buffer) -> Ordering {
        self.with_bytes(|a| other.with_bytes(|b| a.cmp(b)))
    }

    /// FNV-1a over the viewed bytes
    pub fn hash32(&self) -> u32 {
        self.with_bytes(|bytes| {
            bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
                (hash ^ b as u32).wrapping_mul(FNV_PRIME)
            })
        })
    }

    /// Concatenate two views
    ///
    /// When both views are byte-adjacent slices of the same heap buffer the
    /// left view is widened in place and nothing is allocated.
    pub fn concat(&self, other: &Buffer) -> VmResult<Buffer> {
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Ok(other.clone());
        }
        if self.same_heap(other) && self.off + self.len == other.off {
            return Ok(Buffer {
                obj: Rc::clone(&self.obj),
                off: self.off,
                len: self.len + other.len,
            });
        }
        let total = self.len as usize + other.len as usize;
        check_len(total)?;
        let mut data = Vec::new();
        data.try_reserve_exact(total).map_err(|_| VmError::OutOfMemory)?;
        self.with_bytes(|b| data.extend_from_slice(b));
        other.with_bytes(|b| data.extend_from_slice(b));
        Buffer::from_vec(data)
    }

    /// Shrink the view: positive `n` drops from the front, negative from the back
    ///
    /// Trimming more than the view holds leaves it empty.
    pub fn trim(&mut self, n: i64) -> u32 {
        let amount = n.unsigned_abs();
        if amount > self.len as u64 {
            self.len = 0;
        } else if n > 0 {
            self.off += amount as u32;
            self.len -= amount as u32;
        } else {
            self.len -= amount as u32;
        }
        self.len
    }

    /// Take an extra reference to the heap buffer for the host
    pub fn hold(&self) -> HeldBuffer {
        HeldBuffer {
            obj: Rc::clone(&self.obj),
        }
    }
}

/// Host-side reference to a heap buffer, obtained from [`Buffer::hold`]
#[derive(Debug)]
pub struct HeldBuffer {
    obj: Rc<HeapBuffer>,
}

impl HeldBuffer {
    /// References to the heap buffer, including this hold
    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.obj)
    }

    /// Current bytes of the heap buffer
    pub fn data(&self) -> Rc<[u8]> {
        self.obj.data()
    }

    /// Detach remaining aliases from the host's bytes and release the hold
    ///
    /// If any other reference survives and the buffer is non-empty, its bytes
    /// are copied into engine-owned storage. Returns whether a copy was made.
    /// Afterwards the host is the only owner of the memory it pushed.
    pub fn sync(self) -> VmResult<bool> {
        if self.refcount() > 1 && !self.obj.is_empty() {
            self.obj.make_owned()?;
            tracing::debug!(len = self.obj.len(), "buffer synced to owned storage");
            return Ok(true);
        }
        Ok(false)
    }
}
