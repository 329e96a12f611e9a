//! Capture-to-compute interop.
//!
//! A two-slot ring of compute-device textures holds the "previous" and
//! "current" captured frames. `ingest` lands a captured D3D11 texture in the
//! write slot through one of two paths:
//!
//! - **fast**: the source texture already lives on the ring's D3D11On12 twin
//!   device, so the copy happens GPU-side through a wrapped resource;
//! - **staged**: the source lives on a foreign device, so it is read back
//!   through a CPU staging texture and re-uploaded via a persistently mapped
//!   upload buffer.
//!
//! The two physical textures are created once and never reallocated; the
//! downstream descriptor caches key on their pointers.

use serde::{Deserialize, Serialize};

/// Logical role of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotRole {
    Previous,
    Current,
}

/// Role bookkeeping for the two physical slots. `Current` is always the
/// slot most recently written; `rotate` retargets the write slot so the old
/// `Previous` becomes the next write destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRoles {
    write_index: usize,
}

impl SlotRoles {
    pub fn new() -> Self {
        Self { write_index: 0 }
    }

    /// Physical index of the write slot (== `Current`).
    pub fn current(&self) -> usize {
        self.write_index
    }

    /// Physical index of the `Previous` slot.
    pub fn previous(&self) -> usize {
        1 - self.write_index
    }

    /// Swap roles: `Current` becomes `Previous`.
    pub fn rotate(&mut self) {
        self.write_index = 1 - self.write_index;
    }

    pub fn index_of(&self, role: SlotRole) -> usize {
        match role {
            SlotRole::Current => self.current(),
            SlotRole::Previous => self.previous(),
        }
    }
}

impl Default for SlotRoles {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
mod ring;
#[cfg(windows)]
pub use ring::FrameRing;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_are_distinct() {
        let roles = SlotRoles::new();
        assert_ne!(roles.current(), roles.previous());
    }

    #[test]
    fn test_rotate_swaps_roles() {
        let mut roles = SlotRoles::new();
        let current = roles.current();
        roles.rotate();
        assert_eq!(roles.previous(), current);
        assert_ne!(roles.current(), current);
    }

    #[test]
    fn test_double_rotate_is_identity() {
        let mut roles = SlotRoles::new();
        let initial = roles;
        roles.rotate();
        roles.rotate();
        assert_eq!(roles, initial);
    }

    #[test]
    fn test_index_of() {
        let mut roles = SlotRoles::new();
        assert_eq!(roles.index_of(SlotRole::Current), 0);
        assert_eq!(roles.index_of(SlotRole::Previous), 1);
        roles.rotate();
        assert_eq!(roles.index_of(SlotRole::Current), 1);
        assert_eq!(roles.index_of(SlotRole::Previous), 0);
    }
}
