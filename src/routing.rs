//! Routing of collaborator heap memory to a [`DecoderAllocator`].
//!
//! The JPEG, PNG, GIF and bitmap crates the decoder delegates to take their
//! working buffers from the global heap. With [`RoutingAllocator`]
//! installed as the process `#[global_allocator]`, every global allocation
//! made on a thread while a [`RouteScope`] is entered goes to the scope's
//! allocator instead. [`Decoder`](crate::Decoder) enters a scope around each
//! collaborator call, so a decode takes no memory from the global heap.
//!
//! ```ignore
//! use pixalloc_rs::routing::RoutingAllocator;
//!
//! #[global_allocator]
//! static GLOBAL: RoutingAllocator = RoutingAllocator::system();
//! ```
//!
//! Without the adapter installed, scopes cost nothing and change nothing.
//!
//! Every block carries a 16-byte header naming its origin, so `dealloc`
//! returns it to the allocator that produced it wherever it is called.
//! Requests with an alignment above [`BLOCK_ALIGN`], and requests the
//! routed allocator refuses, go to the inner allocator: Rust collections
//! abort the process on allocation failure. A routed block freed after its
//! scope is dropped is leaked instead of being handed to an allocator that
//! may no longer exist. [`routing_stats`] counts all three cases.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::allocator::{BLOCK_ALIGN, DecoderAllocator};

const HEADER: usize = BLOCK_ALIGN;

static INSTALLED: AtomicBool = AtomicBool::new(false);
static ROUTED: AtomicUsize = AtomicUsize::new(0);
static FALLBACKS: AtomicUsize = AtomicUsize::new(0);
static LEAKED: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static ROUTE: Cell<Option<NonNull<Shared>>> = const { Cell::new(None) };
}

/// Process-wide routing counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RoutingStats {
    /// Blocks served by a routed allocator.
    pub routed: usize,
    /// Requests made inside a scope that went to the inner allocator.
    pub fallbacks: usize,
    /// Routed blocks freed after their scope closed.
    pub leaked: usize,
}

pub fn routing_stats() -> RoutingStats {
    RoutingStats {
        routed: ROUTED.load(Ordering::Relaxed),
        fallbacks: FALLBACKS.load(Ordering::Relaxed),
        leaked: LEAKED.load(Ordering::Relaxed),
    }
}

/// `GlobalAlloc` adapter that sends allocations made inside a
/// [`RouteScope`] to the scope's allocator and everything else to `G`.
#[derive(Debug, Default)]
pub struct RoutingAllocator<G = System> {
    inner: G,
}

impl RoutingAllocator<System> {
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<G> RoutingAllocator<G> {
    pub const fn new(inner: G) -> Self {
        Self { inner }
    }
}

/// Layout requested from the inner allocator and the offset of the
/// caller's block inside it.
fn padded(layout: Layout) -> Option<(Layout, usize)> {
    let offset = layout.align().max(HEADER);
    let size = layout.size().checked_add(offset)?;
    Some((Layout::from_size_align(size, offset).ok()?, offset))
}

unsafe fn write_origin(block: *mut u8, origin: *const Shared) {
    unsafe { block.sub(HEADER).cast::<*const Shared>().write(origin) }
}

unsafe fn read_origin(block: *mut u8) -> *const Shared {
    unsafe { block.sub(HEADER).cast::<*const Shared>().read() }
}

unsafe impl<G: GlobalAlloc> GlobalAlloc for RoutingAllocator<G> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !INSTALLED.load(Ordering::Relaxed) {
            INSTALLED.store(true, Ordering::Relaxed);
        }
        if let Some(route) = take_route() {
            let block = if layout.align() <= HEADER {
                unsafe { allocate_routed(route, layout.size()) }
            } else {
                ptr::null_mut()
            };
            put_route(route);
            if !block.is_null() {
                return block;
            }
            FALLBACKS.fetch_add(1, Ordering::Relaxed);
        }

        let Some((padded, offset)) = padded(layout) else {
            return ptr::null_mut();
        };
        let base = unsafe { self.inner.alloc(padded) };
        if base.is_null() {
            return base;
        }
        unsafe {
            let block = base.add(offset);
            write_origin(block, ptr::null());
            block
        }
    }

    unsafe fn dealloc(&self, block: *mut u8, layout: Layout) {
        let origin = unsafe { read_origin(block) };
        match NonNull::new(origin.cast_mut()) {
            Some(route) => unsafe { free_routed(route, block.sub(HEADER)) },
            None => {
                if let Some((padded, offset)) = padded(layout) {
                    unsafe { self.inner.dealloc(block.sub(offset), padded) }
                }
            }
        }
    }
}

/// Type-erased control block of one scope; lives in `System` memory until
/// the scope and every block it produced are gone.
struct Shared {
    allocate: unsafe fn(NonNull<Shared>, usize) -> *mut u8,
    free: unsafe fn(NonNull<Shared>, NonNull<u8>),
    destroy: unsafe fn(NonNull<Shared>),
    open: AtomicBool,
    refs: AtomicUsize,
}

#[repr(C)]
struct Route<A: ?Sized> {
    shared: Shared,
    allocator: *const A,
}

unsafe fn allocate_with<A: DecoderAllocator + ?Sized>(route: NonNull<Shared>, size: usize) -> *mut u8 {
    let allocator = unsafe { &*route.cast::<Route<A>>().as_ref().allocator };
    match allocator.allocate(size) {
        Some(block) if block.as_ptr() as usize % BLOCK_ALIGN == 0 => block.as_ptr(),
        Some(block) => {
            unsafe { allocator.free(block) };
            ptr::null_mut()
        }
        None => ptr::null_mut(),
    }
}

unsafe fn free_with<A: DecoderAllocator + ?Sized>(route: NonNull<Shared>, block: NonNull<u8>) {
    unsafe {
        let allocator = &*route.cast::<Route<A>>().as_ref().allocator;
        allocator.free(block);
    }
}

unsafe fn destroy<A: DecoderAllocator + ?Sized>(route: NonNull<Shared>) {
    unsafe { System.dealloc(route.as_ptr().cast(), Layout::new::<Route<A>>()) }
}

fn take_route() -> Option<NonNull<Shared>> {
    ROUTE.try_with(Cell::take).ok().flatten()
}

fn put_route(route: NonNull<Shared>) {
    let _ = ROUTE.try_with(|cell| cell.set(Some(route)));
}

fn release(route: NonNull<Shared>) {
    let shared = unsafe { route.as_ref() };
    if shared.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
        unsafe { (shared.destroy)(route) }
    }
}

/// Called with the route taken out of the thread-local slot, so memory the
/// routed allocator needs for itself comes from the inner allocator.
unsafe fn allocate_routed(route: NonNull<Shared>, size: usize) -> *mut u8 {
    let Some(total) = size.checked_add(HEADER) else {
        return ptr::null_mut();
    };
    let shared = unsafe { route.as_ref() };
    shared.refs.fetch_add(1, Ordering::Relaxed);
    let base = unsafe { (shared.allocate)(route, total) };
    if base.is_null() {
        release(route);
        return base;
    }
    ROUTED.fetch_add(1, Ordering::Relaxed);
    unsafe {
        let block = base.add(HEADER);
        write_origin(block, route.as_ptr());
        block
    }
}

unsafe fn free_routed(route: NonNull<Shared>, base: *mut u8) {
    let shared = unsafe { route.as_ref() };
    if shared.open.load(Ordering::Acquire) {
        let active = take_route();
        if let Some(base) = NonNull::new(base) {
            unsafe { (shared.free)(route, base) };
        }
        if let Some(active) = active {
            put_route(active);
        }
    } else {
        LEAKED.fetch_add(1, Ordering::Relaxed);
    }
    release(route);
}

/// Routes the current thread's global allocations to `allocator` while
/// [`RouteScope::enter`] runs.
///
/// Blocks allocated inside the scope may be freed after `enter` returns;
/// they go back to `allocator` as long as the scope itself is alive.
pub struct RouteScope<'a, A: DecoderAllocator + ?Sized> {
    route: Option<NonNull<Shared>>,
    _allocator: PhantomData<&'a A>,
}

impl<'a, A: DecoderAllocator + ?Sized> RouteScope<'a, A> {
    pub fn open(allocator: &'a A) -> Self {
        let route = if INSTALLED.load(Ordering::Relaxed) {
            Self::control_block(allocator)
        } else {
            None
        };
        Self {
            route,
            _allocator: PhantomData,
        }
    }

    fn control_block(allocator: &'a A) -> Option<NonNull<Shared>> {
        let layout = Layout::new::<Route<A>>();
        let route = NonNull::new(unsafe { System.alloc(layout) }.cast::<Route<A>>())?;
        unsafe {
            route.write(Route {
                shared: Shared {
                    allocate: allocate_with::<A>,
                    free: free_with::<A>,
                    destroy: destroy::<A>,
                    open: AtomicBool::new(true),
                    refs: AtomicUsize::new(1),
                },
                allocator: allocator as *const A,
            });
        }
        Some(route.cast())
    }

    /// Whether allocations made inside [`RouteScope::enter`] are routed.
    pub fn is_active(&self) -> bool {
        self.route.is_some()
    }

    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let Some(route) = self.route else {
            return f();
        };
        let Ok(previous) = ROUTE.try_with(|cell| cell.replace(Some(route))) else {
            return f();
        };
        let _restore = Restore(previous);
        f()
    }
}

impl<A: DecoderAllocator + ?Sized> Drop for RouteScope<'_, A> {
    fn drop(&mut self) {
        if let Some(route) = self.route {
            unsafe { route.as_ref() }.open.store(false, Ordering::Release);
            release(route);
        }
    }
}

struct Restore(Option<NonNull<Shared>>);

impl Drop for Restore {
    fn drop(&mut self) {
        let _ = ROUTE.try_with(|cell| cell.set(self.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counting::CountingAllocator;

    fn layout(size: usize, align: usize) -> Layout {
        Layout::from_size_align(size, align).unwrap()
    }

    #[test]
    fn unrouted_blocks_keep_their_alignment() {
        let global = RoutingAllocator::system();
        for align in [1, 8, 16, 64, 4096] {
            let layout = layout(40, align);
            unsafe {
                let block = global.alloc(layout);
                assert!(!block.is_null());
                assert_eq!(block as usize % align, 0);
                block.write_bytes(0xAA, 40);
                global.dealloc(block, layout);
            }
        }
    }

    /// Allocating through an adapter once marks routing as available.
    fn install(global: &RoutingAllocator) {
        unsafe { global.dealloc(global.alloc(layout(1, 1)), layout(1, 1)) };
    }

    #[test]
    fn scopes_activate_once_an_adapter_allocates() {
        let global = RoutingAllocator::system();
        install(&global);
        assert!(RouteScope::open(&CountingAllocator::new()).is_active());
    }

    #[test]
    fn scoped_blocks_come_from_the_scope_allocator() {
        let global = RoutingAllocator::system();
        install(&global);
        let counting = CountingAllocator::new();
        let scope = RouteScope::open(&counting);

        let layout = layout(100, 8);
        let block = scope.enter(|| unsafe { global.alloc(layout) });
        assert!(!block.is_null());
        let stats = counting.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.outstanding_bytes, 100 + HEADER);

        unsafe { global.dealloc(block, layout) };
        assert_eq!(counting.stats().frees, 1);
        assert_eq!(counting.outstanding_blocks(), 0);
    }

    #[test]
    fn over_aligned_and_refused_requests_fall_back() {
        let global = RoutingAllocator::system();
        install(&global);
        let refusing = CountingAllocator::new().fail_after(0);
        let scope = RouteScope::open(&refusing);

        let wide = layout(64, 64);
        let small = layout(64, 8);
        let (a, b) = scope.enter(|| unsafe { (global.alloc(wide), global.alloc(small)) });
        assert!(!a.is_null() && !b.is_null());
        assert_eq!(a as usize % 64, 0);
        assert_eq!(refusing.stats().allocations, 0);
        assert_eq!(refusing.stats().failed_allocations, 1);
        unsafe {
            global.dealloc(a, wide);
            global.dealloc(b, small);
        }
        assert_eq!(refusing.stats().frees, 0);
    }

    #[test]
    fn blocks_outliving_their_scope_are_leaked_not_freed() {
        let global = RoutingAllocator::system();
        install(&global);
        let counting = CountingAllocator::new();
        let layout = layout(24, 8);
        let leaked_before = routing_stats().leaked;

        let block = {
            let scope = RouteScope::open(&counting);
            scope.enter(|| unsafe { global.alloc(layout) })
        };
        unsafe { global.dealloc(block, layout) };

        assert_eq!(counting.stats().frees, 0);
        assert!(routing_stats().leaked > leaked_before);
    }

    #[test]
    fn scopes_nest_and_restore() {
        let global = RoutingAllocator::system();
        install(&global);
        let outer = CountingAllocator::new();
        let inner = CountingAllocator::new();
        let outer_scope = RouteScope::open(&outer);
        let inner_scope = RouteScope::open(&inner);
        let layout = layout(8, 8);

        let blocks = outer_scope.enter(|| unsafe {
            let a = inner_scope.enter(|| global.alloc(layout));
            let b = global.alloc(layout);
            (a, b)
        });
        let c = unsafe { global.alloc(layout) };

        assert_eq!(inner.stats().allocations, 1);
        assert_eq!(outer.stats().allocations, 1);
        unsafe {
            global.dealloc(blocks.0, layout);
            global.dealloc(blocks.1, layout);
            global.dealloc(c, layout);
        }
        assert_eq!(inner.outstanding_blocks() + outer.outstanding_blocks(), 0);
    }
}
