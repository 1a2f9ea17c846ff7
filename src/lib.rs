#![no_std]
#![allow(unused_unsafe)]
//! A single-threaded, reference-counted handle with shared ownership.
//!
//! [`SharedPtr<T>`] keeps a count of the handles sharing one control block and destroys the
//! managed object exactly once, when the last of them goes away. A handle is created either
//! by adopting a boxed object ([`SharedPtr::from_box`]), which allocates a separate control
//! block, or by [`make_shared`], which places the object and its control block in a single
//! allocation.
//!
//! ```
//! use shared_ptr::{make_shared, SharedPtr};
//!
//! let a = make_shared(String::from("hello"));
//! let b = SharedPtr::clone(&a);
//! assert_eq!(a.use_count(), 2);
//! assert_eq!(*b, "hello");
//!
//! drop(a);
//! assert_eq!(b.use_count(), 1);
//! ```
extern crate maybe_std as base;

#[cfg(test)]
extern crate std;

/// A smart pointer that keeps track of how many pointers refer to the same allocation and
/// exposes this information in its API.
pub trait ReferenceCounted<T: ?Sized>: Clone {
    /// Get the number of owning pointers referring to the same allocation.
    ///
    /// Implementations return `0` for a pointer that does not refer to any allocation.
    fn reference_count(this: &Self) -> usize;
}

mod block;

mod error;
pub use error::*;

mod shared;
pub use shared::*;

#[cfg(feature = "self-ref")]
mod self_ref;
#[cfg(feature = "self-ref")]
pub use self_ref::*;
