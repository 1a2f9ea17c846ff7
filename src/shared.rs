use base::alloc::handle_alloc_error;
use base::cmp::Ordering;
use base::fmt;
use base::hash::{Hash, Hasher};
use base::marker::{PhantomData, Unpin};
use base::mem;
use base::ops::Deref;
use base::ptr::{self, NonNull};

use base::prelude::v1::*;

use crate::block::{BlockHeader, Combined, Detached};
#[cfg(feature = "self-ref")]
use crate::EnableSharedFromThis;
use crate::{AllocError, ReferenceCounted};

/// One share of a control block, together with the address it hands out.
pub(crate) struct Share<T: ?Sized> {
    pub(crate) ptr: NonNull<T>,
    pub(crate) block: NonNull<BlockHeader>,
}

impl<T: ?Sized> Clone for Share<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Share<T> {}

/// A non-thread-safe pointer sharing ownership of a heap object.
///
/// All handles created from one another (by cloning, [`project`](SharedPtr::project) or
/// [`map`](SharedPtr::map)) share a single control block. The managed object is destroyed
/// once, when the last of them is dropped or reset.
///
/// A handle may also be empty: [`SharedPtr::null`], [`Default`], a handle that was
/// [`reset`](SharedPtr::reset) or [`take`](SharedPtr::take)n from.
pub struct SharedPtr<T: ?Sized> {
    share: Option<Share<T>>,
    phantom: PhantomData<T>,
}

impl<T: ?Sized> SharedPtr<T> {
    /// Creates an empty handle. Nothing is allocated.
    pub const fn null() -> Self {
        SharedPtr {
            share: None,
            phantom: PhantomData,
        }
    }

    pub(crate) fn from_share(share: Share<T>) -> Self {
        SharedPtr {
            share: Some(share),
            phantom: PhantomData,
        }
    }

    /// Creates a new handle managing the value in `value`, placing it and its control block in
    /// one allocation. Same as [`make_shared`].
    pub fn new(value: T) -> Self
    where
        T: Sized,
    {
        make_shared(value)
    }

    /// Takes ownership of a boxed object, allocating a separate control block for it.
    ///
    /// Works for unsized objects as well:
    ///
    /// ```
    /// use shared_ptr::SharedPtr;
    /// use std::fmt::Display;
    ///
    /// let boxed: Box<dyn Display> = Box::new(7);
    /// let shown = SharedPtr::from_box(boxed);
    /// assert_eq!(shown.to_string(), "7");
    /// ```
    pub fn from_box(object: Box<T>) -> Self {
        // SAFETY: a pointer from `Box::into_raw` is non-null and owned by nobody else.
        unsafe { Self::adopt(NonNull::new_unchecked(Box::into_raw(object))) }
    }

    /// Takes ownership of a raw pointer. A null pointer produces an empty handle.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must come from [`Box::into_raw`] and must not be owned by anything else,
    /// in particular not by another control block.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        match NonNull::new(ptr) {
            Some(ptr) => unsafe { Self::adopt(ptr) },
            None => Self::null(),
        }
    }

    unsafe fn adopt(ptr: NonNull<T>) -> Self {
        match unsafe { Detached::try_new(ptr) } {
            Ok(block) => Self::from_share(Share { ptr, block }),
            Err(err) => handle_alloc_error(err.layout()),
        }
    }

    /// Creates a handle sharing `owner`'s control block but pointing at `ptr`.
    ///
    /// If `owner` is empty, so is the result.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for reads for as long as `owner`'s object is alive, which usually
    /// means it points into that object. This is not checked.
    pub unsafe fn aliasing<U: ?Sized>(owner: &SharedPtr<U>, ptr: NonNull<T>) -> Self {
        match owner.share {
            Some(share) => {
                unsafe { BlockHeader::get(share.block) }.acquire();
                Self::from_share(Share {
                    ptr,
                    block: share.block,
                })
            }
            None => Self::null(),
        }
    }

    /// Creates a sibling handle to a part of the managed object, for example a field or an
    /// unsized view of it. The new handle keeps the whole object alive.
    ///
    /// ```
    /// use shared_ptr::make_shared;
    ///
    /// let pair = make_shared((1, String::from("two")));
    /// let second = pair.project(|pair| &pair.1);
    /// assert_eq!(*second, "two");
    /// assert_eq!(pair.use_count(), 2);
    ///
    /// drop(pair);
    /// assert_eq!(*second, "two");
    /// ```
    pub fn project<V: ?Sized, F>(&self, f: F) -> SharedPtr<V>
    where
        F: FnOnce(&T) -> &V,
    {
        match self.share {
            Some(share) => {
                let ptr = NonNull::from(f(unsafe { share.ptr.as_ref() }));
                unsafe { BlockHeader::get(share.block) }.acquire();
                SharedPtr::from_share(Share {
                    ptr,
                    block: share.block,
                })
            }
            None => SharedPtr::null(),
        }
    }

    /// Like [`project`](SharedPtr::project), but hands this handle's share over to the
    /// result instead of creating a new one.
    pub fn map<V: ?Sized, F>(this: Self, f: F) -> SharedPtr<V>
    where
        F: FnOnce(&T) -> &V,
    {
        match this.share {
            Some(share) => {
                let ptr = NonNull::from(f(unsafe { share.ptr.as_ref() }));
                mem::forget(this);
                SharedPtr::from_share(Share {
                    ptr,
                    block: share.block,
                })
            }
            None => SharedPtr::null(),
        }
    }

    /// Moves the share out of this handle, leaving it empty.
    pub fn take(&mut self) -> Self {
        mem::replace(self, Self::null())
    }

    /// Gives up this handle's share, destroying the object if it was the last one. The handle
    /// is empty afterwards. Does nothing on an empty handle.
    pub fn reset(&mut self) {
        if let Some(share) = self.share.take() {
            unsafe { BlockHeader::release(share.block) };
        }
    }

    /// Gives up this handle's share and takes ownership of `object` instead.
    pub fn reset_to(&mut self, object: Box<T>) {
        self.reset();
        *self = Self::from_box(object);
    }

    /// Gives up this handle's share and takes ownership of `ptr` instead. Does nothing if `ptr`
    /// is the address this handle already points to.
    ///
    /// # Safety
    ///
    /// Same as [`SharedPtr::from_raw`], unless `ptr` is the current address.
    pub unsafe fn reset_raw(&mut self, ptr: *mut T) {
        if self.addr() == ptr.cast::<u8>() as *const u8 {
            return;
        }
        self.reset();
        *self = unsafe { Self::from_raw(ptr) };
    }

    /// Exchanges the contents of two handles. No count changes.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.share, &mut other.share);
    }

    /// A reference to the managed object, or `None` for an empty handle.
    pub fn get(&self) -> Option<&T> {
        self.share.map(|share| unsafe { &*share.ptr.as_ptr() })
    }

    /// The address this handle points to, null for an empty handle.
    pub fn as_ptr(&self) -> *const T
    where
        T: Sized,
    {
        match self.share {
            Some(share) => share.ptr.as_ptr(),
            None => ptr::null(),
        }
    }

    /// The number of handles sharing this handle's control block, `0` for an empty handle.
    pub fn use_count(&self) -> usize {
        match self.share {
            Some(share) => unsafe { BlockHeader::get(share.block) }.count(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.share.is_none()
    }

    /// Whether both handles share one control block, even if they point at different parts of
    /// the object. Empty handles share with nothing.
    pub fn shares_with<U: ?Sized>(&self, other: &SharedPtr<U>) -> bool {
        match (self.block(), other.block()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn block(&self) -> Option<NonNull<BlockHeader>> {
        self.share.map(|share| share.block)
    }

    fn addr(&self) -> *const u8 {
        match self.share {
            Some(share) => share.ptr.as_ptr().cast::<u8>() as *const u8,
            None => ptr::null(),
        }
    }

    // Zero-sized objects adopted from a `Box` all sit at the same dangling address, so the
    // block is part of their identity.
    fn identity(&self) -> (*const u8, Option<NonNull<BlockHeader>>) {
        match self.share {
            Some(share) if mem::size_of_val(unsafe { share.ptr.as_ref() }) == 0 => {
                (self.addr(), Some(share.block))
            }
            _ => (self.addr(), None),
        }
    }
}

#[cfg(feature = "self-ref")]
impl<T: EnableSharedFromThis> SharedPtr<T> {
    /// Like [`from_box`](SharedPtr::from_box), and registers the new handle with the object so
    /// that [`shared_from_this`](EnableSharedFromThis::shared_from_this) works.
    pub fn from_box_enabled(object: Box<T>) -> Self {
        let this = Self::from_box(object);
        this.register();
        this
    }

    /// Like [`from_raw`](SharedPtr::from_raw), and registers the new handle with the object.
    ///
    /// # Safety
    ///
    /// Same as [`SharedPtr::from_raw`].
    pub unsafe fn from_raw_enabled(ptr: *mut T) -> Self {
        let this = unsafe { Self::from_raw(ptr) };
        this.register();
        this
    }

    /// Like [`reset_to`](SharedPtr::reset_to), and registers the new handle with the object.
    pub fn reset_to_enabled(&mut self, object: Box<T>) {
        self.reset();
        *self = Self::from_box_enabled(object);
    }

    fn register(&self) {
        if let Some(share) = self.share {
            unsafe { share.ptr.as_ref() }.self_ref().register(share);
        }
    }
}

/// Creates a handle to `value`, placing the object and its control block in a single
/// allocation.
///
/// ```
/// use shared_ptr::make_shared;
///
/// let answer = make_shared(42);
/// assert_eq!(*answer, 42);
/// assert_eq!(answer.use_count(), 1);
/// ```
pub fn make_shared<T>(value: T) -> SharedPtr<T> {
    make_shared_with(move || value)
}

/// Like [`make_shared`], but constructs the object with `init` once its storage is allocated.
///
/// If `init` panics, the storage is released and the panic propagates.
pub fn make_shared_with<T, F>(init: F) -> SharedPtr<T>
where
    F: FnOnce() -> T,
{
    match Combined::try_new_with(init) {
        Ok((block, ptr)) => SharedPtr::from_share(Share { ptr, block }),
        Err(err) => handle_alloc_error(err.layout()),
    }
}

/// Like [`make_shared`], but reports allocation failure instead of aborting.
pub fn try_make_shared<T>(value: T) -> Result<SharedPtr<T>, AllocError> {
    let (block, ptr) = Combined::try_new_with(move || value)?;
    Ok(SharedPtr::from_share(Share { ptr, block }))
}

/// Like [`make_shared`], and registers the new handle with the object so that
/// [`shared_from_this`](EnableSharedFromThis::shared_from_this) works.
#[cfg(feature = "self-ref")]
pub fn make_enabled_shared<T: EnableSharedFromThis>(value: T) -> SharedPtr<T> {
    make_enabled_shared_with(move || value)
}

/// Like [`make_shared_with`], and registers the new handle with the object.
#[cfg(feature = "self-ref")]
pub fn make_enabled_shared_with<T, F>(init: F) -> SharedPtr<T>
where
    T: EnableSharedFromThis,
    F: FnOnce() -> T,
{
    let this = make_shared_with(init);
    this.register();
    this
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    /// Makes a clone of the `SharedPtr`.
    ///
    /// This creates another handle to the same object, increasing the share count.
    #[inline]
    fn clone(&self) -> SharedPtr<T> {
        if let Some(share) = self.share {
            unsafe { BlockHeader::get(share.block) }.acquire();
        }
        SharedPtr {
            share: self.share,
            phantom: PhantomData,
        }
    }

    /// Does nothing if `source` already shares this handle's block and address.
    fn clone_from(&mut self, source: &Self) {
        if self.block() == source.block() && self.addr() == source.addr() {
            return;
        }
        *self = source.clone();
    }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    /// Drops the `SharedPtr`.
    ///
    /// This will decrement the share count, and destroy the object if it was the last share.
    ///
    /// ```
    /// use shared_ptr::make_shared;
    ///
    /// struct Foo;
    ///
    /// impl Drop for Foo {
    ///     fn drop(&mut self) {
    ///         println!("dropped!");
    ///     }
    /// }
    ///
    /// let foo  = make_shared(Foo);
    /// let foo2 = foo.clone();
    ///
    /// drop(foo);    // Doesn't print anything
    /// drop(foo2);   // Prints "dropped!"
    /// ```
    #[inline]
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for SharedPtr<T> {
    /// Creates an empty `SharedPtr`.
    fn default() -> SharedPtr<T> {
        SharedPtr::null()
    }
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[inline]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty SharedPtr"),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr(), f)
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<SharedPtr<U>> for SharedPtr<T> {
    /// Two handles are equal if they point to the same address, whatever their blocks. Two
    /// empty handles are equal.
    ///
    /// Handles to zero-sized objects also have to share a block: separately adopted
    /// `Box<()>`s have the same address but are distinct objects.
    #[inline]
    fn eq(&self, other: &SharedPtr<U>) -> bool {
        self.identity() == other.identity()
    }
}

impl<T: ?Sized> Eq for SharedPtr<T> {}

impl<T: ?Sized> PartialOrd for SharedPtr<T> {
    /// Orders handles by address.
    fn partial_cmp(&self, other: &SharedPtr<T>) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized> Ord for SharedPtr<T> {
    /// Orders handles by address, then by block for zero-sized objects.
    fn cmp(&self, other: &SharedPtr<T>) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl<T: ?Sized> Hash for SharedPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state)
    }
}

impl<T> From<T> for SharedPtr<T> {
    fn from(t: T) -> Self {
        make_shared(t)
    }
}

impl<T: ?Sized> From<Box<T>> for SharedPtr<T> {
    fn from(object: Box<T>) -> Self {
        SharedPtr::from_box(object)
    }
}

impl<T: ?Sized> ReferenceCounted<T> for SharedPtr<T> {
    fn reference_count(this: &Self) -> usize {
        this.use_count()
    }
}

impl<T: ?Sized> Unpin for SharedPtr<T> {}
