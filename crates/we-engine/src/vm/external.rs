//! External function registry
//!
//! A process-wide table of 256 host callbacks addressed by the one-byte
//! operand of the `ext` opcode. Id 0 is reserved and never dispatched.
//! Registration is global, not per VM.

use std::any::Any;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::api::Vm;
use super::{VmError, VmResult};

/// Number of slots in the external table
pub const EXTERNAL_SLOTS: usize = 256;

/// Control code returned by an external function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtControl {
    /// Resume the program at the next instruction
    Continue,
    /// Unwind the call with this errno
    Error(i32),
    /// Ask the host to resume once more in a new context
    Again,
    /// Terminate the call chain
    Cancel,
}

/// Host callback
///
/// The first argument is a handle on the top-of-stack array, the second the
/// opaque host context passed to [`Vm::call`].
pub type ExternalFn = Arc<dyn Fn(&mut Vm, &mut dyn Any) -> ExtControl + Send + Sync>;

static EXTERNALS: Lazy<RwLock<Vec<Option<ExternalFn>>>> =
    Lazy::new(|| RwLock::new(vec![None; EXTERNAL_SLOTS]));

fn check_id(id: u32) -> VmResult<usize> {
    match id {
        1..=255 => Ok(id as usize),
        _ => Err(VmError::InvalidArgument(format!(
            "external id {} outside 1..=255",
            id
        ))),
    }
}

/// Install `f` at slot `id`, replacing any previous callback
pub fn register_external<F>(id: u32, f: F) -> VmResult<()>
where
    F: Fn(&mut Vm, &mut dyn Any) -> ExtControl + Send + Sync + 'static,
{
    let slot = check_id(id)?;
    let previous = EXTERNALS.write()[slot].replace(Arc::new(f));
    tracing::debug!(id, replaced = previous.is_some(), "external registered");
    Ok(())
}

/// Remove the callback at slot `id`. Returns whether one was installed.
pub fn unregister_external(id: u32) -> VmResult<bool> {
    let slot = check_id(id)?;
    let removed = EXTERNALS.write()[slot].take().is_some();
    if removed {
        tracing::debug!(id, "external unregistered");
    }
    Ok(removed)
}

/// Callback at slot `id`, cloned out so the lock is not held during the call
pub(crate) fn lookup(id: u8) -> Option<ExternalFn> {
    if id == 0 {
        return None;
    }
    EXTERNALS.read()[id as usize].clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_bounds() {
        assert!(register_external(0, |_, _| ExtControl::Continue).is_err());
        assert!(register_external(256, |_, _| ExtControl::Continue).is_err());
        assert!(unregister_external(0).is_err());
    }

    #[test]
    fn test_register_and_remove() {
        register_external(201, |_, _| ExtControl::Cancel).unwrap();
        let f = lookup(201).unwrap();
        let mut vm = Vm::create(4).unwrap();
        let mut host = ();
        assert_eq!(f(&mut vm, &mut host), ExtControl::Cancel);
        assert!(unregister_external(201).unwrap());
        assert!(lookup(201).is_none());
        assert!(!unregister_external(201).unwrap());
    }

    #[test]
    fn test_slot_zero_is_never_dispatched() {
        assert!(lookup(0).is_none());
    }
}
