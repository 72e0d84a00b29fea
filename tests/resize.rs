// Resizer integration tests.
//
// Constant images must stay constant, output must not depend on which
// allocator served the scratch memory, and every block must be returned.

#[cfg(test)]
mod resizer_integration {
    use std::cell::Cell;
    use std::ptr::NonNull;

    use pixalloc_rs::{
        ColorSpace, CountingAllocator, Decoder, Edge, Filter, PixallocError, ResizeOptions, Resizer,
        ResizerAllocator, SourceImage, SystemAllocator, TargetImage,
    };

    const PYTHON_PNG: &[u8] = include_bytes!("data/python.png");
    const PYTHON_JPG: &[u8] = include_bytes!("data/python.jpg");

    /// Counts calls in the context it is handed.
    struct TallyAllocator;

    unsafe impl ResizerAllocator<Cell<usize>> for TallyAllocator {
        fn allocate(&self, size: usize, context: &Cell<usize>) -> Option<NonNull<u8>> {
            context.set(context.get() + 1);
            ResizerAllocator::<()>::allocate(&SystemAllocator, size, &())
        }

        unsafe fn free(&self, block: NonNull<u8>, context: &Cell<usize>) {
            context.set(context.get() + 1);
            unsafe { ResizerAllocator::<()>::free(&SystemAllocator, block, &()) }
        }
    }

    fn solid(width: usize, height: usize, texel: &[u8]) -> Vec<u8> {
        texel.iter().copied().cycle().take(width * height * texel.len()).collect()
    }

    #[test]
    fn test_constant_image_stays_constant() {
        let texel = [10u8, 200, 30];
        let pixels = solid(5, 3, &texel);
        let source = SourceImage::packed(&pixels, 5, 3, 3);
        let resizer = Resizer::new(&SystemAllocator, &());

        for filter in Filter::ALL {
            for edge in [Edge::Clamp, Edge::Reflect, Edge::Wrap] {
                for colorspace in [ColorSpace::Linear, ColorSpace::Srgb] {
                    for (width, height) in [(13, 7), (2, 2), (5, 3), (1, 9)] {
                        let options = ResizeOptions::new(3)
                            .set_filter(filter)
                            .set_edge(edge)
                            .set_colorspace(colorspace);
                        let resized = resizer.resize(&source, width, height, &options).unwrap();
                        assert!(
                            resized.pixels().chunks_exact(3).all(|px| px == texel),
                            "{filter:?} {edge:?} {colorspace:?} {width}x{height}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_constant_alpha_image_stays_constant() {
        let texel = [10u8, 200, 30, 128];
        let pixels = solid(4, 4, &texel);
        let source = SourceImage::packed(&pixels, 4, 4, 4);
        let options = ResizeOptions::new(4)
            .set_alpha_channel(Some(3))
            .set_colorspace(ColorSpace::Srgb);
        let resized = Resizer::new(&SystemAllocator, &())
            .resize(&source, 9, 3, &options)
            .unwrap();
        assert!(resized.pixels().chunks_exact(4).all(|px| px == texel));
    }

    #[test]
    fn test_output_does_not_depend_on_the_allocator() {
        let image = Decoder::new(&SystemAllocator).decode(PYTHON_PNG, 4).unwrap();
        let source = SourceImage::packed(image.pixels(), 16, 16, 4);
        let options = ResizeOptions::new(4)
            .set_alpha_channel(Some(3))
            .set_filters(Filter::Lanczos3, Filter::Mitchell);

        let plain = Resizer::new(&SystemAllocator, &())
            .resize(&source, 7, 11, &options)
            .unwrap();

        let counting = CountingAllocator::new();
        let counted = Resizer::new(&counting, &()).resize(&source, 7, 11, &options).unwrap();

        let tally = Cell::new(0);
        let tallied = Resizer::new(&TallyAllocator, &tally)
            .resize(&source, 7, 11, &options)
            .unwrap();

        assert_eq!(plain.pixels(), counted.pixels());
        assert_eq!(plain.pixels(), tallied.pixels());
        assert_eq!(tally.get(), 3);
        drop(tallied);
        assert_eq!(tally.get(), 4);
    }

    #[test]
    fn test_decode_then_resize_returns_every_block() {
        let counting = CountingAllocator::new();
        {
            let image = Decoder::new(&counting).decode(PYTHON_JPG, 0).unwrap();
            let source = SourceImage::packed(image.pixels(), image.width(), image.height(), image.channels());
            let resized = Resizer::new(&counting, &())
                .resize(&source, 8, 8, &ResizeOptions::new(image.channels()))
                .unwrap();
            assert_eq!(resized.pixels().len(), 8 * 8 * 3);

            let stats = counting.stats();
            assert_eq!(stats.allocations, 3);
            assert_eq!(stats.frees, 1);
            assert_eq!(stats.outstanding_blocks, 2);
        }
        let stats = counting.stats();
        assert_eq!(stats.outstanding_blocks, 0);
        assert_eq!(stats.outstanding_bytes, 0);
        assert_eq!(stats.invalid_frees, 0);
    }

    #[test]
    fn test_out_of_memory_frees_the_output_block() {
        let pixels = solid(8, 8, &[1]);
        let source = SourceImage::packed(&pixels, 8, 8, 1);

        // Output block granted, scratch block refused.
        let counting = CountingAllocator::new().fail_after(1);
        let result = Resizer::new(&counting, &()).resize(&source, 4, 4, &ResizeOptions::new(1));
        assert!(matches!(result, Err(PixallocError::OutOfMemory(_))));
        let stats = counting.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.failed_allocations, 1);
        assert_eq!(stats.outstanding_blocks, 0);
    }

    #[test]
    fn test_invalid_arguments_allocate_nothing() {
        let counting = CountingAllocator::new();
        let resizer = Resizer::new(&counting, &());
        let pixels = [0u8; 16];
        let source = SourceImage::packed(&pixels, 4, 4, 1);
        let mut out = [0u8; 4];

        assert!(matches!(
            resizer.resize(&source, 4, 0, &ResizeOptions::new(1)),
            Err(PixallocError::InvalidArgumentHeight)
        ));
        assert!(matches!(
            resizer.resize(&source, 2, 2, &ResizeOptions::new(65)),
            Err(PixallocError::InvalidChannelCount(65))
        ));
        assert!(matches!(
            resizer.resize_into(&source, &mut TargetImage::packed(&mut out, 4, 4, 1), &ResizeOptions::new(1)),
            Err(PixallocError::InvalidArgumentSize)
        ));
        assert_eq!(counting.stats().allocations, 0);
    }

    #[test]
    fn test_wrap_edge_tiles_horizontally() {
        // A one-row image whose right edge wraps back onto the dark left edge.
        let pixels = [0u8, 255, 255, 255];
        let source = SourceImage::packed(&pixels, 4, 1, 1);
        let resizer = Resizer::new(&SystemAllocator, &());
        let triangle = ResizeOptions::new(1).set_filter(Filter::Triangle);

        let clamped = resizer.resize(&source, 8, 1, &triangle.set_edge(Edge::Clamp)).unwrap();
        let wrapped = resizer.resize(&source, 8, 1, &triangle.set_edge(Edge::Wrap)).unwrap();
        assert_eq!(clamped.pixels()[7], 255);
        assert!(wrapped.pixels()[7] < 255);
    }

    #[test]
    fn test_reflect_edge_mirrors_past_the_first_sample() {
        // Reflect and clamp agree one tap past the edge and differ two taps
        // out, where reflect picks up the bright second sample.
        let pixels = [0u8, 255, 0, 0, 0, 0, 0, 0];
        let source = SourceImage::packed(&pixels, 8, 1, 1);
        let resizer = Resizer::new(&SystemAllocator, &());
        let triangle = ResizeOptions::new(1).set_filter(Filter::Triangle);

        let clamped = resizer.resize(&source, 2, 1, &triangle.set_edge(Edge::Clamp)).unwrap();
        let reflected = resizer.resize(&source, 2, 1, &triangle.set_edge(Edge::Reflect)).unwrap();
        assert!(reflected.pixels()[0] > clamped.pixels()[0]);
        assert_eq!(reflected.pixels()[1], clamped.pixels()[1]);
    }
}
