// Control blocks: a type-erased header followed by whatever a concrete deleter needs.

use base::alloc::{alloc, dealloc, Layout};
use base::cell::Cell;
use base::mem::{self, MaybeUninit};
use base::ptr::{self, NonNull};

use base::prelude::v1::*;

use log::trace;

use crate::AllocError;

/// The part of a control block every handle can see, whatever the managed type is.
///
/// Concrete blocks are `#[repr(C)]` with a `BlockHeader` as their first field, so a pointer to
/// a block is also a pointer to its header.
#[repr(C)]
pub(crate) struct BlockHeader {
    count: Cell<usize>,
    drop_object: unsafe fn(NonNull<BlockHeader>),
    free: unsafe fn(NonNull<BlockHeader>),
}

/// A control block that knows how to destroy the object it governs.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, start with a header built by `BlockHeader::new::<Self>()`
/// and be allocated with `Layout::new::<Self>()`.
pub(crate) unsafe trait Deleter: Sized {
    /// Destroys the managed object, leaving the block itself allocated.
    unsafe fn drop_object(this: NonNull<Self>);
}

unsafe fn drop_object_erased<D: Deleter>(block: NonNull<BlockHeader>) {
    unsafe { D::drop_object(block.cast()) }
}

unsafe fn free_erased<D: Deleter>(block: NonNull<BlockHeader>) {
    trace!("freeing shared block at {:p}", block);
    unsafe { dealloc(block.as_ptr().cast(), Layout::new::<D>()) }
}

impl BlockHeader {
    fn new<D: Deleter>() -> Self {
        BlockHeader {
            count: Cell::new(1),
            drop_object: drop_object_erased::<D>,
            free: free_erased::<D>,
        }
    }

    // SAFETY: `block` must point to a block that has not been freed yet.
    #[inline]
    pub(crate) unsafe fn get<'a>(block: NonNull<BlockHeader>) -> &'a BlockHeader {
        unsafe { block.as_ref() }
    }

    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.count.get()
    }

    #[inline]
    pub(crate) fn acquire(&self) {
        let count = self.count();

        // Abort on overflow instead of wrapping around to a count that frees the block early.
        // A zero count means the object is already being destroyed.
        if count == 0 || count == usize::MAX {
            panic!();
        }
        self.count.set(count + 1);
    }

    /// Gives up one share. The release that brings the count to zero destroys the object and
    /// then frees the block.
    // SAFETY: `block` must be live and the caller must own one of its shares.
    pub(crate) unsafe fn release(block: NonNull<BlockHeader>) {
        let header = unsafe { Self::get(block) };
        let count = header.count() - 1;
        header.count.set(count);

        if count == 0 {
            let (drop_object, free) = (header.drop_object, header.free);
            unsafe {
                drop_object(block);
                free(block);
            }
        }
    }
}

fn allocate<D: Deleter>() -> Result<NonNull<D>, AllocError> {
    let layout = Layout::new::<D>();
    // SAFETY: every block starts with a `BlockHeader`, so the layout is never zero-sized.
    let raw = unsafe { alloc(layout) };
    NonNull::new(raw.cast::<D>()).ok_or_else(|| AllocError::new(layout))
}

/// Governs an object that lives in its own `Box` allocation.
#[repr(C)]
pub(crate) struct Detached<U: ?Sized> {
    header: BlockHeader,
    object: NonNull<U>,
}

unsafe impl<U: ?Sized> Deleter for Detached<U> {
    unsafe fn drop_object(this: NonNull<Self>) {
        let object = unsafe { this.as_ref() }.object;
        drop(unsafe { Box::from_raw(object.as_ptr()) });
    }
}

impl<U: ?Sized> Detached<U> {
    /// Allocates a block that takes over `object`.
    // SAFETY: `object` must come from `Box::into_raw` and must not be owned by another block.
    pub(crate) unsafe fn try_new(object: NonNull<U>) -> Result<NonNull<BlockHeader>, AllocError> {
        let block = allocate::<Self>()?;
        unsafe {
            block.as_ptr().write(Detached {
                header: BlockHeader::new::<Self>(),
                object,
            });
        }
        trace!("allocated detached block at {:p} for object at {:p}", block, object);
        Ok(block.cast())
    }
}

/// Holds the object inline after the header, so object and block share one allocation.
#[repr(C)]
pub(crate) struct Combined<T> {
    header: BlockHeader,
    value: MaybeUninit<T>,
}

unsafe impl<T> Deleter for Combined<T> {
    unsafe fn drop_object(this: NonNull<Self>) {
        unsafe { ptr::drop_in_place(Self::value_ptr(this).as_ptr()) }
    }
}

impl<T> Combined<T> {
    fn value_ptr(this: NonNull<Self>) -> NonNull<T> {
        // SAFETY: projecting to a field of a non-null block pointer stays non-null and in bounds.
        unsafe {
            let value = ptr::addr_of_mut!((*this.as_ptr()).value);
            NonNull::new_unchecked(value.cast::<T>())
        }
    }

    /// Allocates a block and constructs the object produced by `init` inside it.
    ///
    /// If `init` panics, the block's memory is released before the panic continues.
    pub(crate) fn try_new_with<F>(init: F) -> Result<(NonNull<BlockHeader>, NonNull<T>), AllocError>
    where
        F: FnOnce() -> T,
    {
        let block = allocate::<Self>()?;
        let guard = FreeOnUnwind {
            raw: block.cast(),
            layout: Layout::new::<Self>(),
        };

        let value = Self::value_ptr(block);
        unsafe {
            ptr::addr_of_mut!((*block.as_ptr()).header).write(BlockHeader::new::<Self>());
            value.as_ptr().write(init());
        }
        mem::forget(guard);

        trace!(
            "allocated combined block at {:p} ({} bytes)",
            block,
            Layout::new::<Self>().size()
        );
        Ok((block.cast(), value))
    }
}

/// Releases a half-built block's memory when the object's construction unwinds.
struct FreeOnUnwind {
    raw: NonNull<u8>,
    layout: Layout,
}

impl Drop for FreeOnUnwind {
    fn drop(&mut self) {
        unsafe { dealloc(self.raw.as_ptr(), self.layout) }
    }
}
