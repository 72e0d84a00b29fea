// Routing integration tests.
//
// This test binary installs the routing adapter over a global allocator
// that counts what reaches it from an armed thread. A decode on that
// thread must take all of its memory, the codecs' buffers included, from
// the decoder's allocator.

#[cfg(test)]
mod routing_integration {
    use std::alloc::{GlobalAlloc, Layout, System};
    use std::cell::Cell;
    use std::ptr::{self, NonNull};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pixalloc_rs::{Decoder, DecoderAllocator, PixallocError, RouteScope, RoutingAllocator, routing_stats};

    const PYTHON_JPG: &[u8] = include_bytes!("data/python.jpg");
    const PROGRESSIVE_JPG: &[u8] = include_bytes!("data/stripe_progressive.jpg");
    const PYTHON_PNG: &[u8] = include_bytes!("data/python.png");
    const INTERLACED_PNG: &[u8] = include_bytes!("data/interlaced_gray_8x8.png");
    const FRAMED_GIF: &[u8] = include_bytes!("data/framed_4x3.gif");
    const RGB_BMP: &[u8] = include_bytes!("data/rgb_3x2.bmp");
    const RGB_TGA: &[u8] = include_bytes!("data/rgb_2x2.tga");

    /// Forwards to `System`, counting allocations made while the current
    /// thread is armed.
    struct Spy;

    thread_local! {
        static ARMED: Cell<bool> = const { Cell::new(false) };
        static SEEN: Cell<usize> = const { Cell::new(0) };
    }

    unsafe impl GlobalAlloc for Spy {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            if ARMED.try_with(Cell::get).unwrap_or(false) {
                let _ = SEEN.try_with(|seen| seen.set(seen.get() + 1));
            }
            unsafe { System.alloc(layout) }
        }

        unsafe fn dealloc(&self, block: *mut u8, layout: Layout) {
            unsafe { System.dealloc(block, layout) }
        }
    }

    #[global_allocator]
    static GLOBAL: RoutingAllocator<Spy> = RoutingAllocator::new(Spy);

    /// Runs `f` with the thread armed and returns how many global
    /// allocations it made.
    fn global_allocations<R>(f: impl FnOnce() -> R) -> (R, usize) {
        SEEN.with(|seen| seen.set(0));
        ARMED.with(|armed| armed.set(true));
        let result = f();
        ARMED.with(|armed| armed.set(false));
        (result, SEEN.with(Cell::get))
    }

    const ARENA_HEADER: usize = 16;

    /// Decoder allocator straight over `System`, so none of its traffic
    /// passes through the global allocator.
    #[derive(Debug, Default)]
    struct Arena {
        allocations: AtomicUsize,
        live: AtomicUsize,
    }

    impl Arena {
        fn layout(size: usize) -> Layout {
            Layout::from_size_align(size + ARENA_HEADER, ARENA_HEADER).unwrap()
        }
    }

    unsafe impl DecoderAllocator for Arena {
        fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
            let base = NonNull::new(unsafe { System.alloc(Self::layout(size)) })?;
            self.allocations.fetch_add(1, Ordering::Relaxed);
            self.live.fetch_add(1, Ordering::Relaxed);
            unsafe {
                base.as_ptr().cast::<usize>().write(size);
                Some(base.add(ARENA_HEADER))
            }
        }

        unsafe fn reallocate(&self, block: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
            let grown = self.allocate(new_size)?;
            unsafe {
                let old_size = block.as_ptr().sub(ARENA_HEADER).cast::<usize>().read();
                ptr::copy_nonoverlapping(block.as_ptr(), grown.as_ptr(), old_size.min(new_size));
                self.free(block);
            }
            Some(grown)
        }

        unsafe fn free(&self, block: NonNull<u8>) {
            self.live.fetch_sub(1, Ordering::Relaxed);
            unsafe {
                let base = block.as_ptr().sub(ARENA_HEADER);
                let size = base.cast::<usize>().read();
                System.dealloc(base, Self::layout(size));
            }
        }
    }

    #[test]
    fn test_scopes_are_active_with_the_adapter_installed() {
        let arena = Arena::default();
        assert!(RouteScope::open(&arena).is_active());
    }

    #[test]
    fn test_decoding_takes_nothing_from_the_global_heap() {
        let arena = Arena::default();
        let decoder = Decoder::new(&arena);
        let inputs = [
            PYTHON_JPG,
            PROGRESSIVE_JPG,
            PYTHON_PNG,
            INTERLACED_PNG,
            FRAMED_GIF,
            RGB_BMP,
            RGB_TGA,
        ];
        // First decodes initialise lazily built process-wide state.
        for data in inputs {
            decoder.decode(data, 4).unwrap();
        }
        let routed_before = routing_stats().routed;

        for data in inputs {
            let before = arena.allocations.load(Ordering::Relaxed);
            let (image, global) = global_allocations(|| decoder.decode(data, 4));
            let image = image.unwrap();
            assert_eq!(global, 0, "{} decode reached the global heap", image.format());
            // The pixel block plus at least one codec buffer.
            assert!(arena.allocations.load(Ordering::Relaxed) - before > 1, "{}", image.format());
            assert_eq!(arena.live.load(Ordering::Relaxed), 1);
            drop(image);
            assert_eq!(arena.live.load(Ordering::Relaxed), 0);
        }
        assert!(routing_stats().routed > routed_before);
    }

    #[test]
    fn test_header_reads_are_routed_too() {
        let arena = Arena::default();
        let decoder = Decoder::new(&arena);
        decoder.info(PYTHON_PNG).unwrap();

        let (info, global) = global_allocations(|| decoder.info(PYTHON_PNG));
        assert_eq!(info.unwrap().width, 16);
        assert_eq!(global, 0);
        assert_eq!(arena.live.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_codec_errors_hold_no_routed_memory() {
        let arena = Arena::default();
        let truncated = &PYTHON_PNG[..PYTHON_PNG.len() / 2];
        let error = Decoder::new(&arena).decode(truncated, 0).unwrap_err();
        assert!(matches!(error, PixallocError::Png(_)));
        assert_eq!(arena.live.load(Ordering::Relaxed), 0);
        assert!(!error.to_string().is_empty());
        drop(error);
        assert_eq!(arena.live.load(Ordering::Relaxed), 0);
    }
}
