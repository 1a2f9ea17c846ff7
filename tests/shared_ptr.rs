use std::cell::Cell;
use std::collections::HashSet;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::rc::Rc;

use shared_ptr::{make_shared, make_shared_with, try_make_shared, ReferenceCounted, SharedPtr};

/// Counts how often values of this type are dropped.
struct Tracked {
    id: u32,
    drops: Rc<Cell<usize>>,
}

impl Tracked {
    fn new(id: u32, drops: &Rc<Cell<usize>>) -> Self {
        Tracked {
            id,
            drops: drops.clone(),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Point {
    x: i64,
    y: i64,
    label: String,
}

#[repr(C)]
struct Outer {
    inner: Inner,
    extra: u64,
}

#[repr(C)]
struct Inner {
    value: u32,
}

trait Shape {
    fn area(&self) -> f64;
}

struct Square(f64);

impl Shape for Square {
    fn area(&self) -> f64 {
        self.0 * self.0
    }
}

fn as_shape(square: &Square) -> &(dyn Shape + 'static) {
    square
}

#[test]
fn empty_handle() {
    let empty: SharedPtr<u32> = SharedPtr::null();
    assert!(empty.is_empty());
    assert_eq!(empty.use_count(), 0);
    assert!(empty.get().is_none());
    assert!(empty.as_ptr().is_null());

    let default: SharedPtr<u32> = SharedPtr::default();
    assert!(default == empty);
    assert!(!default.shares_with(&empty));
    assert_eq!(format!("{:?}", default), "null");
}

#[test]
fn adopting_null_pointer_yields_empty_handle() {
    let handle: SharedPtr<Tracked> = unsafe { SharedPtr::from_raw(std::ptr::null_mut()) };
    assert!(handle.is_empty());
    assert_eq!(handle.use_count(), 0);
}

#[test]
fn clones_share_one_count() {
    let drops = Rc::new(Cell::new(0));
    let a = SharedPtr::from_box(Box::new(Tracked::new(1, &drops)));
    assert_eq!(a.use_count(), 1);

    let b = a.clone();
    let c = b.clone();
    assert_eq!(a.use_count(), 3);
    assert!(a.shares_with(&c));
    assert_eq!(ReferenceCounted::reference_count(&b), 3);

    drop(b);
    assert_eq!(a.use_count(), 2);
    drop(a);
    assert_eq!(c.use_count(), 1);
    assert_eq!(drops.get(), 0);

    drop(c);
    assert_eq!(drops.get(), 1);
}

#[test]
fn factory_forwards_construction() {
    let direct = Point {
        x: 3,
        y: -4,
        label: "p".to_string(),
    };
    let shared = make_shared(direct.clone());
    assert_eq!(*shared, direct);
    assert_eq!(shared.use_count(), 1);

    let built = make_shared_with(|| Point {
        x: 3,
        y: -4,
        label: "p".to_string(),
    });
    assert_eq!(*built, direct);

    let fallible = try_make_shared(direct.clone()).unwrap();
    assert_eq!(*fallible, direct);

    let converted: SharedPtr<Point> = direct.clone().into();
    assert_eq!(*converted, direct);
}

#[test]
fn panicking_factory_propagates() {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        make_shared_with(|| -> Tracked { panic!("constructor failed") })
    }));
    assert!(result.is_err());
}

#[test]
fn last_reset_destroys_exactly_once() {
    let drops = Rc::new(Cell::new(0));
    let mut a = make_shared(Tracked::new(7, &drops));
    let mut b = a.clone();

    a.reset();
    assert!(a.is_empty());
    assert_eq!(b.use_count(), 1);
    assert_eq!(drops.get(), 0);

    b.reset();
    assert_eq!(drops.get(), 1);

    b.reset();
    a.reset();
    assert_eq!(drops.get(), 1);
}

#[test]
fn projected_sibling_keeps_object_alive() {
    let drops = Rc::new(Cell::new(0));
    let a = make_shared((Tracked::new(1, &drops), 99u64));
    let b: SharedPtr<u64> = a.project(|pair| &pair.1);

    assert_eq!(a.use_count(), 2);
    assert_eq!(b.use_count(), 2);
    assert!(a.shares_with(&b));

    drop(a);
    assert_eq!(drops.get(), 0);
    assert_eq!(*b, 99);

    drop(b);
    assert_eq!(drops.get(), 1);
}

#[test]
fn aliasing_handle_shares_the_block() {
    let drops = Rc::new(Cell::new(0));
    let a = SharedPtr::from_box(Box::new(Tracked::new(5, &drops)));
    let id = NonNull::from(&a.id);
    let b = unsafe { SharedPtr::aliasing(&a, id) };

    assert_eq!(*b, 5);
    assert_eq!(b.use_count(), 2);

    drop(a);
    assert_eq!(drops.get(), 0);
    drop(b);
    assert_eq!(drops.get(), 1);

    let empty: SharedPtr<Tracked> = SharedPtr::null();
    let value = 1u32;
    let none = unsafe { SharedPtr::aliasing(&empty, NonNull::from(&value)) };
    assert!(none.is_empty());
}

#[test]
fn map_converts_to_trait_object() {
    let square = make_shared(Square(3.0));
    let shape: SharedPtr<dyn Shape> = SharedPtr::map(square, as_shape);
    assert_eq!(shape.use_count(), 1);
    assert_eq!(shape.area(), 9.0);
}

#[test]
fn adopts_unsized_box() {
    let boxed: Box<dyn Display> = Box::new("shown");
    let shown = SharedPtr::from_box(boxed);
    assert_eq!(shown.to_string(), "shown");

    let slice: SharedPtr<[u8]> = SharedPtr::from(vec![1u8, 2, 3].into_boxed_slice());
    assert_eq!(&*slice, &[1, 2, 3]);
}

#[test]
fn equality_compares_addresses() {
    let a = make_shared(5);
    let b = make_shared(5);
    assert!(a == a.clone());
    assert!(a != b);

    let outer = make_shared(Outer {
        inner: Inner { value: 1 },
        extra: 2,
    });
    let inner = outer.project(|outer| &outer.inner);
    let extra = outer.project(|outer| &outer.extra);
    assert!(outer == inner);
    assert!(outer != extra);
    assert_eq!(inner.value, 1);

    let mut set = HashSet::new();
    set.insert(a.clone());
    set.insert(a.clone());
    set.insert(b.clone());
    assert_eq!(set.len(), 2);
    assert_eq!(a.use_count(), 2);
}

#[test]
fn zero_sized_objects_compare_by_block() {
    let a = SharedPtr::from_box(Box::new(()));
    let b = SharedPtr::from_box(Box::new(()));
    assert!(!a.is_empty() && !b.is_empty());
    assert!(a != b);
    assert!(a == a.clone());
    assert_ne!(a.cmp(&b), std::cmp::Ordering::Equal);

    let c = make_shared(());
    let d = make_shared(());
    assert!(c != d);
    assert!(c == c.clone());

    let mut set = HashSet::new();
    set.insert(a.clone());
    set.insert(b.clone());
    set.insert(a.clone());
    assert_eq!(set.len(), 2);
}

#[test]
fn self_assignment_keeps_object() {
    let drops = Rc::new(Cell::new(0));
    let mut a = make_shared(Tracked::new(1, &drops));

    a = a.clone();
    assert_eq!(a.use_count(), 1);
    assert_eq!(drops.get(), 0);

    let b = a.clone();
    a.clone_from(&b);
    assert_eq!(a.use_count(), 2);
    assert_eq!(drops.get(), 0);
    assert_eq!(a.id, 1);
}

#[test]
fn assignment_releases_previous_share() {
    let drops = Rc::new(Cell::new(0));
    let mut a = make_shared(Tracked::new(1, &drops));
    let b = make_shared(Tracked::new(2, &drops));

    a.clone_from(&b);
    assert_eq!(drops.get(), 1);
    assert_eq!(a.id, 2);
    assert_eq!(b.use_count(), 2);
}

#[test]
fn take_moves_the_share() {
    let mut a = make_shared(10);
    let b = a.take();
    assert!(a.is_empty());
    assert_eq!(b.use_count(), 1);
    assert_eq!(*b, 10);
}

#[test]
fn reset_to_new_object() {
    let drops = Rc::new(Cell::new(0));
    let mut a = make_shared(Tracked::new(1, &drops));
    a.reset_to(Box::new(Tracked::new(2, &drops)));
    assert_eq!(drops.get(), 1);
    assert_eq!(a.id, 2);
    assert_eq!(a.use_count(), 1);
}

#[test]
fn reset_to_own_address_is_noop() {
    let drops = Rc::new(Cell::new(0));
    let raw = Box::into_raw(Box::new(Tracked::new(1, &drops)));
    let mut a = unsafe { SharedPtr::from_raw(raw) };
    let b = a.clone();

    unsafe { a.reset_raw(raw) };
    assert_eq!(drops.get(), 0);
    assert_eq!(a.use_count(), 2);
    assert!(a.shares_with(&b));

    unsafe { a.reset_raw(std::ptr::null_mut()) };
    assert!(a.is_empty());
    assert_eq!(b.use_count(), 1);
}

#[test]
fn swap_exchanges_handles() {
    let mut a = make_shared(1);
    let mut b = make_shared(2);
    let a2 = a.clone();

    a.swap(&mut b);
    assert_eq!(*a, 2);
    assert_eq!(*b, 1);
    assert_eq!(b.use_count(), 2);
    assert_eq!(a.use_count(), 1);
    assert!(b.shares_with(&a2));
}

#[test]
#[should_panic(expected = "dereferenced an empty SharedPtr")]
fn deref_of_empty_handle_panics() {
    let empty: SharedPtr<u32> = SharedPtr::null();
    let _ = *empty;
}
