use std::{
    alloc::{GlobalAlloc, Layout, System},
    ptr::NonNull,
};

use pgrx::*;

pub unsafe fn in_memory_context<T, F: FnOnce() -> T>(mctx: pg_sys::MemoryContext, f: F) -> T {
    let prev_ctx = pg_sys::CurrentMemoryContext;
    pg_sys::CurrentMemoryContext = mctx;
    let t = f();
    pg_sys::CurrentMemoryContext = prev_ctx;
    t
}

/// The typed pointer the `#[aggregate]`-generated bodies work with: a
/// non-null pointer to a `T` living in the current (aggregate) memory
/// context. Cheap to copy around since it's just the pointer; the
/// backing allocation is reclaimed when the context it was palloc'd in
/// is torn down.
pub struct Inner<T>(pub NonNull<T>);

impl<T> Inner<T> {
    pub fn new(t: T) -> Self {
        let ptr = PgMemoryContexts::CurrentMemoryContext.leak_and_drop_on_delete(t);
        Inner(NonNull::new(ptr).expect("palloc returned a null pointer"))
    }
}

impl<T> std::ops::Deref for Inner<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { self.0.as_ref() }
    }
}

impl<T> std::ops::DerefMut for Inner<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { self.0.as_mut() }
    }
}

impl<T> Clone for Inner<T> {
    fn clone(&self) -> Self {
        Inner(self.0)
    }
}

impl<T> Copy for Inner<T> {}

/// Converts the `internal`-typed Datum carrier into the pointer type
/// the aggregate bodies deref through.
pub trait InternalAsValue {
    unsafe fn to_inner<T>(self) -> Option<Inner<T>>;
}

impl InternalAsValue for pgrx::Internal {
    unsafe fn to_inner<T>(self) -> Option<Inner<T>> {
        self.unwrap().map(|datum| {
            let ptr = datum.cast_mut_ptr::<T>();
            Inner(
                NonNull::new(ptr)
                    .unwrap_or_else(|| panic!("Internal-type Datum flagged not null but its datum is zero")),
            )
        })
    }
}

/// The inverse of [`InternalAsValue::to_inner`]: hands a pointer back
/// across the `internal`-typed pg_extern boundary.
pub trait ToInternal {
    unsafe fn internal(self) -> pgrx::Internal;
}

impl<T> ToInternal for Option<Inner<T>> {
    unsafe fn internal(self) -> pgrx::Internal {
        match self {
            None => pgrx::Internal::from(None),
            Some(inner) => pgrx::Internal::from(Some(pg_sys::Datum::from(inner.0.as_ptr()))),
        }
    }
}

impl<T> ToInternal for Inner<T> {
    unsafe fn internal(self) -> pgrx::Internal {
        pgrx::Internal::from(Some(pg_sys::Datum::from(self.0.as_ptr())))
    }
}

// Rust aborts the process when the allocator returns NULL. Aborting takes
// the whole backend down with it; panicking instead unwinds to a clean
// transaction rollback. This shim turns an allocation failure into the
// latter whenever there's still enough memory left to unwind.
struct PanickingAllocator;

#[global_allocator]
static ALLOCATOR: PanickingAllocator = PanickingAllocator;

unsafe impl GlobalAlloc for PanickingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let p = System.alloc(layout);
        if p.is_null() {
            panic!("Out of memory")
        }
        p
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = System.alloc_zeroed(layout);
        if p.is_null() {
            panic!("Out of memory")
        }
        p
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let p = System.realloc(ptr, layout, new_size);
        if p.is_null() {
            panic!("Out of memory")
        }
        p
    }
}
