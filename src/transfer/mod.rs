//! Dual-GPU frame transfer.
//!
//! Moves captured frames from the capture adapter onto the compute adapter.
//! Two methods, probed at init:
//!
//! - **SharedHeap**: a cross-adapter placed heap visible to both devices
//!   plus a cross-adapter fence. The source queue copies into its placed
//!   resource and signals; the destination queue waits on the shared fence
//!   before reading its view of the same memory. No CPU round trip.
//! - **StagedCpu**: readback on the source device, `memcpy`, upload on the
//!   destination device. Works everywhere.
//!
//! Destination landing textures are triple-buffered; `destination_texture`
//! and `previous_destination_texture` expose the (Current, Previous) pair
//! the compute stages consume in dual-GPU mode.

use serde::{Deserialize, Serialize};

/// How frames cross the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMethod {
    SharedHeap,
    StagedCpu,
}

/// Transfer configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    pub source_adapter: u32,
    pub dest_adapter: u32,
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    pub prefer_peer_to_peer: bool,
    pub allow_cpu_fallback: bool,
}

impl TransferConfig {
    pub fn new(source_adapter: u32, dest_adapter: u32, width: u32, height: u32) -> Self {
        Self {
            source_adapter,
            dest_adapter,
            width,
            height,
            buffer_count: 3,
            prefer_peer_to_peer: true,
            allow_cpu_fallback: true,
        }
    }
}

/// Triple-buffer index bookkeeping, shared with the tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCursor {
    pub current: usize,
    pub previous: usize,
    count: usize,
}

impl BufferCursor {
    pub fn new(count: usize) -> Self {
        Self {
            current: 0,
            previous: 0,
            count: count.max(1),
        }
    }

    /// The just-written buffer becomes `previous`; the write target moves on.
    pub fn advance(&mut self) {
        self.previous = self.current;
        self.current = (self.current + 1) % self.count;
    }
}

#[cfg(windows)]
mod engine;
#[cfg(windows)]
pub use engine::CrossAdapterTransfer;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_walks_ring() {
        let mut cursor = BufferCursor::new(3);
        assert_eq!((cursor.current, cursor.previous), (0, 0));
        cursor.advance();
        assert_eq!((cursor.current, cursor.previous), (1, 0));
        cursor.advance();
        assert_eq!((cursor.current, cursor.previous), (2, 1));
        cursor.advance();
        assert_eq!((cursor.current, cursor.previous), (0, 2));
    }

    #[test]
    fn test_cursor_distinct_after_first_advance() {
        let mut cursor = BufferCursor::new(3);
        cursor.advance();
        for _ in 0..10 {
            assert_ne!(cursor.current, cursor.previous);
            cursor.advance();
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = TransferConfig::new(0, 1, 1920, 1080);
        assert_eq!(config.buffer_count, 3);
        assert!(config.prefer_peer_to_peer);
        assert!(config.allow_cpu_fallback);
    }
}
