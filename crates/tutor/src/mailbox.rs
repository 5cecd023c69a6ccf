use std::sync::Arc;

use parking_lot::RwLock;

use crate::capture::Frame;

/// Single-slot, overwrite-on-write cell holding the most recent frame.
///
/// Not a buffer: `set` replaces whatever is there. Readers get a shared
/// handle to a complete frame, so a concurrent `set` can never expose a
/// partially written one. Clones share the same slot.
#[derive(Clone, Default)]
pub struct FrameMailbox {
    slot: Arc<RwLock<Option<Arc<Frame>>>>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame. The previous frame is released here unless a
    /// reader still holds it.
    pub fn set(&self, frame: Arc<Frame>) {
        let previous = self.slot.write().replace(frame);
        drop(previous);
    }

    /// Latest frame, or `None` if nothing was ever captured.
    pub fn get(&self) -> Option<Arc<Frame>> {
        self.slot.read().clone()
    }
}
