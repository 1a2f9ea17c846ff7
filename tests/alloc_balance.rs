// Runs as its own test binary so the counting allocator only sees this file's single test.

use std::alloc::{GlobalAlloc, Layout, System};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicIsize, Ordering};

use shared_ptr::{make_shared, make_shared_with, SharedPtr};

struct Counting;

static LIVE_BYTES: AtomicIsize = AtomicIsize::new(0);

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let raw = unsafe { System.alloc(layout) };
        if !raw.is_null() {
            LIVE_BYTES.fetch_add(layout.size() as isize, Ordering::SeqCst);
        }
        raw
    }

    unsafe fn dealloc(&self, raw: *mut u8, layout: Layout) {
        unsafe { System.dealloc(raw, layout) };
        LIVE_BYTES.fetch_sub(layout.size() as isize, Ordering::SeqCst);
    }
}

#[global_allocator]
static GLOBAL: Counting = Counting;

fn live_bytes() -> isize {
    LIVE_BYTES.load(Ordering::SeqCst)
}

fn failed_construction() {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        make_shared_with(|| -> [u8; 256] { panic!("constructor failed") })
    }));
    assert!(result.is_err());
}

#[test]
fn blocks_are_returned_to_the_allocator() {
    // The first panics set up the runtime's lazily allocated state.
    panic::set_hook(Box::new(|_| {}));
    for _ in 0..4 {
        failed_construction();
    }

    let before = live_bytes();
    for _ in 0..100 {
        failed_construction();
    }
    assert_eq!(live_bytes(), before);

    for i in 0..100u64 {
        let combined = make_shared([i; 32]);
        let detached = SharedPtr::from_box(Box::new([i; 32]));
        let sibling = combined.project(|values| &values[1]);
        drop(combined);
        assert_eq!(*sibling, i);
        drop((sibling, detached));
    }
    assert_eq!(live_bytes(), before);

    let _ = panic::take_hook();
}
