//! VM configuration

use serde::Deserialize;

/// Options applied when a VM is created and while it runs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmOptions {
    /// Initial register stack capacity of a new VM (at most 255)
    pub stack_size: usize,
    /// Maximum depth of nested dispatch runs (`res` and collection predicates)
    pub max_nesting: u32,
    /// Minimum stack capacity given to nested and predicate frames
    pub predicate_stack: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            stack_size: 32,
            max_nesting: 64,
            predicate_stack: 32,
        }
    }
}

impl VmOptions {
    /// Largest stack a VM may be created with
    pub const MAX_STACK_SIZE: usize = 255;
}
