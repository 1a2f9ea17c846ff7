use base::cell::Cell;
use base::fmt;
use base::hash::{Hash, Hasher};

use crate::block::BlockHeader;
use crate::shared::{Share, SharedPtr};

/// The slot an object embeds to hand out handles to itself.
///
/// The slot records the control block of the first handle registered with it. It does not
/// hold a share of its own, so it never keeps its object alive.
///
/// A fresh slot (from [`SelfRef::new`], [`Default`] or [`Clone`]) is unregistered.
pub struct SelfRef<T> {
    this: Cell<Option<Share<T>>>,
}

impl<T> SelfRef<T> {
    pub const fn new() -> Self {
        SelfRef {
            this: Cell::new(None),
        }
    }

    /// Whether a handle has been registered with this slot.
    pub fn is_registered(&self) -> bool {
        self.this.get().is_some()
    }

    /// Records `share`, unless a handle has already been registered.
    pub(crate) fn register(&self, share: Share<T>) {
        if self.this.get().is_none() {
            self.this.set(Some(share));
        }
    }

    /// A new handle sharing the registered block, or an empty one if nothing is registered or
    /// the object is already being destroyed.
    pub(crate) fn upgrade(&self) -> SharedPtr<T> {
        match self.this.get() {
            Some(share) => {
                // The slot lives inside the managed object, so the block has not been freed.
                let header = unsafe { BlockHeader::get(share.block) };
                if header.count() == 0 {
                    return SharedPtr::null();
                }
                header.acquire();
                SharedPtr::from_share(share)
            }
            None => SharedPtr::null(),
        }
    }
}

impl<T> Default for SelfRef<T> {
    fn default() -> Self {
        SelfRef::new()
    }
}

impl<T> Clone for SelfRef<T> {
    /// A copy of an object is a different object, so the clone starts out unregistered.
    fn clone(&self) -> Self {
        SelfRef::new()
    }
}

impl<T> fmt::Debug for SelfRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfRef")
            .field("registered", &self.is_registered())
            .finish()
    }
}

// A slot never contributes to the identity of the object embedding it.
impl<T> PartialEq for SelfRef<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<T> Eq for SelfRef<T> {}

impl<T> Hash for SelfRef<T> {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

/// Lets an object obtain a [`SharedPtr`] to itself that shares ownership with the handles
/// already managing it.
///
/// Registration happens when the object is put under management with one of the `enabled`
/// creation paths: [`make_enabled_shared`](crate::make_enabled_shared),
/// [`make_enabled_shared_with`](crate::make_enabled_shared_with),
/// [`SharedPtr::from_box_enabled`], [`SharedPtr::from_raw_enabled`] or
/// [`SharedPtr::reset_to_enabled`].
///
/// The plain paths ([`make_shared`](crate::make_shared), [`make_shared_with`](crate::make_shared_with),
/// [`try_make_shared`](crate::try_make_shared), [`SharedPtr::new`], [`SharedPtr::from_box`],
/// [`SharedPtr::from_raw`], [`SharedPtr::reset_to`] and the `From` conversions) do **not**
/// register, even for types implementing this trait: `shared_from_this` on an object created
/// through them returns an empty handle.
///
/// ```
/// use shared_ptr::{make_enabled_shared, EnableSharedFromThis, SelfRef, SharedPtr};
///
/// struct Node {
///     value: u32,
///     this: SelfRef<Node>,
/// }
///
/// unsafe impl EnableSharedFromThis for Node {
///     fn self_ref(&self) -> &SelfRef<Node> {
///         &self.this
///     }
/// }
///
/// let node = make_enabled_shared(Node { value: 3, this: SelfRef::new() });
/// let again = node.shared_from_this();
/// assert!(again == node);
/// assert_eq!(node.use_count(), 2);
/// assert_eq!(again.value, 3);
/// ```
///
/// # Safety
///
/// `self_ref` must always return the same slot, stored inside `self`.
pub unsafe trait EnableSharedFromThis: Sized {
    fn self_ref(&self) -> &SelfRef<Self>;

    /// A new handle to `self`, sharing the block of the handles that manage it.
    ///
    /// Returns an empty handle if `self` was never registered (for example, if it lives on the
    /// stack), or if it is called while `self` is being dropped.
    fn shared_from_this(&self) -> SharedPtr<Self> {
        self.self_ref().upgrade()
    }
}
