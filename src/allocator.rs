//! Allocator indirection for the decoder and the resizer.
//!
//! The decoder asks for memory through [`DecoderAllocator`]
//! (allocate / reallocate / free), the resizer through
//! [`ResizerAllocator`] (allocate / free, each call carrying a caller
//! defined context). The library never installs a process-wide
//! allocator: each [`crate::Decoder`] and [`crate::Resizer`] borrows the
//! allocator it was built with.
//!
//! Blocks come back to the caller wrapped in [`AllocBlock`] or
//! [`ContextBlock`], which hand the block back to the allocator that
//! produced it exactly once, when dropped.

use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::slice;

use tracing::{trace, warn};

use crate::error::PixallocError;

/// Alignment every block handed out by an allocator must have.
pub const BLOCK_ALIGN: usize = 16;

/// Allocation strategy used by the decoder.
///
/// # Safety
///
/// `allocate` and `reallocate` must return blocks that are at least `size`
/// bytes long, aligned to [`BLOCK_ALIGN`], and not aliased by any other
/// live block. `reallocate` keeps the first `min(old, new)` bytes and, on
/// failure, leaves the original block untouched. Implementations shared
/// between threads must be thread-safe.
pub unsafe trait DecoderAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    /// `block` must have come from this allocator and must not have been freed.
    unsafe fn reallocate(&self, block: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    /// `block` must have come from this allocator and must not have been freed.
    unsafe fn free(&self, block: NonNull<u8>);
}

/// Allocation strategy used by the resizer. `C` is the context threaded
/// through every call.
///
/// # Safety
///
/// Same block guarantees as [`DecoderAllocator`].
pub unsafe trait ResizerAllocator<C: ?Sized = ()> {
    fn allocate(&self, size: usize, context: &C) -> Option<NonNull<u8>>;

    /// # Safety
    /// `block` must have come from this allocator and must not have been freed.
    unsafe fn free(&self, block: NonNull<u8>, context: &C);
}

/// The platform default strategy: the global Rust allocator, with the block
/// size stored in a header in front of each block so `free` needs no size.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

const HEADER: usize = BLOCK_ALIGN;

impl SystemAllocator {
    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.checked_add(HEADER)?, BLOCK_ALIGN).ok()
    }

    fn finish(base: *mut u8, size: usize) -> Option<NonNull<u8>> {
        if base.is_null() {
            return None;
        }
        unsafe {
            base.cast::<usize>().write(size);
            NonNull::new(base.add(HEADER))
        }
    }

    /// # Safety
    /// `block` must be a live block from [`SystemAllocator`].
    unsafe fn header_of(block: NonNull<u8>) -> (*mut u8, Layout) {
        unsafe {
            let base = block.as_ptr().sub(HEADER);
            let size = base.cast::<usize>().read();
            (base, Layout::from_size_align_unchecked(size + HEADER, BLOCK_ALIGN))
        }
    }
}

unsafe impl DecoderAllocator for SystemAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout(size)?;
        let base = unsafe { alloc::alloc(layout) };
        Self::finish(base, size)
    }

    unsafe fn reallocate(&self, block: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        let new_layout = Self::layout(new_size)?;
        unsafe {
            let (base, layout) = Self::header_of(block);
            let moved = alloc::realloc(base, layout, new_layout.size());
            Self::finish(moved, new_size)
        }
    }

    unsafe fn free(&self, block: NonNull<u8>) {
        unsafe {
            let (base, layout) = Self::header_of(block);
            alloc::dealloc(base, layout);
        }
    }
}

unsafe impl<C: ?Sized> ResizerAllocator<C> for SystemAllocator {
    fn allocate(&self, size: usize, _context: &C) -> Option<NonNull<u8>> {
        DecoderAllocator::allocate(self, size)
    }

    unsafe fn free(&self, block: NonNull<u8>, _context: &C) {
        unsafe { DecoderAllocator::free(self, block) }
    }
}

pub type AllocateFn = unsafe extern "C" fn(size: usize) -> *mut c_void;
pub type ReallocateFn = unsafe extern "C" fn(block: *mut c_void, size: usize) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(block: *mut c_void);
pub type ContextAllocateFn = unsafe extern "C" fn(size: usize, context: *mut c_void) -> *mut c_void;
pub type ContextFreeFn = unsafe extern "C" fn(block: *mut c_void, context: *mut c_void);

/// Decoder allocation forwarded to three C function pointers
/// (`malloc`-, `realloc`- and `free`-shaped).
#[derive(Debug, Clone, Copy)]
pub struct DecoderBinding {
    allocate: AllocateFn,
    reallocate: ReallocateFn,
    free: FreeFn,
}

impl DecoderBinding {
    /// # Safety
    ///
    /// The functions must behave like the C library's `malloc`, `realloc`
    /// and `free` with blocks aligned to [`BLOCK_ALIGN`], and must be
    /// thread-safe if the binding is used from several threads.
    pub const unsafe fn new(allocate: AllocateFn, reallocate: ReallocateFn, free: FreeFn) -> Self {
        Self {
            allocate,
            reallocate,
            free,
        }
    }
}

unsafe impl DecoderAllocator for DecoderBinding {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { (self.allocate)(size) }.cast())
    }

    unsafe fn reallocate(&self, block: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { (self.reallocate)(block.as_ptr().cast(), new_size) }.cast())
    }

    unsafe fn free(&self, block: NonNull<u8>) {
        unsafe { (self.free)(block.as_ptr().cast()) }
    }
}

/// Opaque C context passed back to the resizer callbacks untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct RawContext(pub *mut c_void);

impl RawContext {
    pub const fn null() -> Self {
        Self(ptr::null_mut())
    }
}

/// Resizer allocation forwarded to two C function pointers taking a context.
#[derive(Debug, Clone, Copy)]
pub struct ResizerBinding {
    allocate: ContextAllocateFn,
    free: ContextFreeFn,
}

impl ResizerBinding {
    /// # Safety
    ///
    /// Same contract as [`DecoderBinding::new`], with the context argument
    /// passed through unchanged.
    pub const unsafe fn new(allocate: ContextAllocateFn, free: ContextFreeFn) -> Self {
        Self { allocate, free }
    }
}

unsafe impl ResizerAllocator<RawContext> for ResizerBinding {
    fn allocate(&self, size: usize, context: &RawContext) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { (self.allocate)(size, context.0) }.cast())
    }

    unsafe fn free(&self, block: NonNull<u8>, context: &RawContext) {
        unsafe { (self.free)(block.as_ptr().cast(), context.0) }
    }
}

fn check_alignment(block: NonNull<u8>) -> Result<(), PixallocError> {
    let address = block.as_ptr() as usize;
    if address % BLOCK_ALIGN != 0 {
        warn!(address, "allocator returned a misaligned block");
        return Err(PixallocError::MisalignedBlock);
    }
    Ok(())
}

/// A zero-initialised block owned through a [`DecoderAllocator`].
pub struct AllocBlock<'a, A: DecoderAllocator + ?Sized> {
    ptr: NonNull<u8>,
    len: usize,
    allocator: &'a A,
}

impl<'a, A: DecoderAllocator + ?Sized> AllocBlock<'a, A> {
    pub fn new(allocator: &'a A, len: usize) -> Result<Self, PixallocError> {
        if len == 0 {
            return Err(PixallocError::InvalidArgumentSize);
        }
        trace!(len, "decoder allocate");
        let Some(ptr) = allocator.allocate(len) else {
            warn!(len, "decoder allocator is out of memory");
            return Err(PixallocError::OutOfMemory(len));
        };
        let block = Self { ptr, len, allocator };
        check_alignment(ptr)?;
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, len) };
        Ok(block)
    }

    /// Grows or shrinks the block through the allocator's `reallocate`.
    /// On failure the block keeps its previous contents and length.
    pub fn resize(&mut self, new_len: usize) -> Result<(), PixallocError> {
        if new_len == 0 {
            return Err(PixallocError::InvalidArgumentSize);
        }
        if new_len == self.len {
            return Ok(());
        }
        trace!(from = self.len, to = new_len, "decoder reallocate");
        let Some(ptr) = (unsafe { self.allocator.reallocate(self.ptr, new_len) }) else {
            warn!(new_len, "decoder allocator failed to reallocate");
            return Err(PixallocError::OutOfMemory(new_len));
        };
        let old_len = self.len;
        self.ptr = ptr;
        self.len = old_len.min(new_len);
        check_alignment(ptr)?;
        if new_len > old_len {
            unsafe { ptr::write_bytes(ptr.as_ptr().add(old_len), 0, new_len - old_len) };
        }
        self.len = new_len;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn allocator(&self) -> &'a A {
        self.allocator
    }

    /// Releases ownership. The caller must free the pointer with the same
    /// allocator (for a C binding: the registered free function).
    pub fn into_raw(self) -> (NonNull<u8>, usize) {
        let block = ManuallyDrop::new(self);
        (block.ptr, block.len)
    }

    /// # Safety
    /// `ptr` must be a live block of at least `len` bytes from `allocator`,
    /// for example one returned by [`AllocBlock::into_raw`].
    pub unsafe fn from_raw(allocator: &'a A, ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len, allocator }
    }
}

impl<A: DecoderAllocator + ?Sized> Deref for AllocBlock<'_, A> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<A: DecoderAllocator + ?Sized> DerefMut for AllocBlock<'_, A> {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<A: DecoderAllocator + ?Sized> Drop for AllocBlock<'_, A> {
    fn drop(&mut self) {
        trace!(len = self.len, "decoder free");
        unsafe { self.allocator.free(self.ptr) }
    }
}

impl<A: DecoderAllocator + ?Sized> fmt::Debug for AllocBlock<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocBlock").field("len", &self.len).finish_non_exhaustive()
    }
}

// The block is uniquely owned; sharing it only needs the allocator to be shareable.
unsafe impl<A: DecoderAllocator + Sync + ?Sized> Send for AllocBlock<'_, A> {}
unsafe impl<A: DecoderAllocator + Sync + ?Sized> Sync for AllocBlock<'_, A> {}

/// A zero-initialised block owned through a [`ResizerAllocator`], freed with
/// the same context it was allocated with.
pub struct ContextBlock<'a, A: ResizerAllocator<C> + ?Sized, C: ?Sized> {
    ptr: NonNull<u8>,
    len: usize,
    allocator: &'a A,
    context: &'a C,
}

impl<'a, A: ResizerAllocator<C> + ?Sized, C: ?Sized> ContextBlock<'a, A, C> {
    pub fn new(allocator: &'a A, context: &'a C, len: usize) -> Result<Self, PixallocError> {
        if len == 0 {
            return Err(PixallocError::InvalidArgumentSize);
        }
        trace!(len, "resizer allocate");
        let Some(ptr) = allocator.allocate(len, context) else {
            warn!(len, "resizer allocator is out of memory");
            return Err(PixallocError::OutOfMemory(len));
        };
        let block = Self {
            ptr,
            len,
            allocator,
            context,
        };
        check_alignment(ptr)?;
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, len) };
        Ok(block)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Releases ownership; free with the same allocator and context.
    pub fn into_raw(self) -> (NonNull<u8>, usize) {
        let block = ManuallyDrop::new(self);
        (block.ptr, block.len)
    }
}

impl<A: ResizerAllocator<C> + ?Sized, C: ?Sized> Deref for ContextBlock<'_, A, C> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<A: ResizerAllocator<C> + ?Sized, C: ?Sized> DerefMut for ContextBlock<'_, A, C> {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<A: ResizerAllocator<C> + ?Sized, C: ?Sized> Drop for ContextBlock<'_, A, C> {
    fn drop(&mut self) {
        trace!(len = self.len, "resizer free");
        unsafe { self.allocator.free(self.ptr, self.context) }
    }
}

impl<A: ResizerAllocator<C> + ?Sized, C: ?Sized> fmt::Debug for ContextBlock<'_, A, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextBlock").field("len", &self.len).finish_non_exhaustive()
    }
}

unsafe impl<A: ResizerAllocator<C> + Sync + ?Sized, C: Sync + ?Sized> Send for ContextBlock<'_, A, C> {}
unsafe impl<A: ResizerAllocator<C> + Sync + ?Sized, C: Sync + ?Sized> Sync for ContextBlock<'_, A, C> {}
