use base::alloc::Layout;

use thiserror::Error;

/// The allocator could not provide memory for a control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("failed to allocate a shared block of {} bytes (align {})", .layout.size(), .layout.align())]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    pub(crate) fn new(layout: Layout) -> Self {
        AllocError { layout }
    }

    /// The layout of the block that could not be allocated.
    pub fn layout(&self) -> Layout {
        self.layout
    }
}
