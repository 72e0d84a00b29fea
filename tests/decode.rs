// Decoder integration tests.
//
// Decoded pixels are checked against the collaborator decoders used on
// their own, and allocator traffic is checked with the counting allocator.

#[cfg(test)]
mod decoder_integration {
    use pixalloc_rs::{CountingAllocator, DecodeOptions, Decoder, ImageFormat, PixallocError, SystemAllocator};
    use zune_core::bytestream::ZCursor;
    use zune_core::colorspace::ColorSpace;
    use zune_core::options::DecoderOptions;
    use zune_jpeg::JpegDecoder;

    const PYTHON_JPG: &[u8] = include_bytes!("data/python.jpg");
    const PYTHON_PNG: &[u8] = include_bytes!("data/python.png");
    const GRAY_JPG: &[u8] = include_bytes!("data/gray_2x2.jpg");
    const SOLID_RGBA: &[u8] = include_bytes!("data/solid_rgba_6x4.png");
    const PROGRESSIVE_JPG: &[u8] = include_bytes!("data/stripe_progressive.jpg");
    const RGB16_PNG: &[u8] = include_bytes!("data/rgb16_3x2.png");
    const GRAY1_PNG: &[u8] = include_bytes!("data/gray1_8x2.png");
    const INTERLACED_PNG: &[u8] = include_bytes!("data/interlaced_gray_8x8.png");
    const FRAMED_GIF: &[u8] = include_bytes!("data/framed_4x3.gif");
    const RGB_BMP: &[u8] = include_bytes!("data/rgb_3x2.bmp");
    const RGB_TGA: &[u8] = include_bytes!("data/rgb_2x2.tga");

    fn zune_decode(data: &[u8], colorspace: ColorSpace) -> Vec<u8> {
        let options = DecoderOptions::default().jpeg_set_out_colorspace(colorspace);
        JpegDecoder::new_with_options(ZCursor::new(data), options)
            .decode()
            .unwrap()
    }

    #[test]
    fn test_jpeg_matches_reference_decoder() {
        let image = Decoder::new(&SystemAllocator).decode(PYTHON_JPG, 0).unwrap();
        assert_eq!((image.width(), image.height(), image.channels()), (16, 16, 3));
        assert_eq!(image.format(), ImageFormat::Jpeg);
        assert_eq!(image.pixels(), zune_decode(PYTHON_JPG, ColorSpace::RGB).as_slice());
    }

    #[test]
    fn test_pixels_do_not_depend_on_the_allocator() {
        let counting = CountingAllocator::new();
        for data in [PYTHON_JPG, PYTHON_PNG, GRAY_JPG, PROGRESSIVE_JPG, FRAMED_GIF, RGB_BMP, RGB_TGA] {
            for channels in 0..=4 {
                let plain = Decoder::new(&SystemAllocator).decode(data, channels).unwrap();
                let counted = Decoder::new(&counting).decode(data, channels).unwrap();
                assert_eq!(plain.pixels(), counted.pixels(), "channels {channels}");
            }
        }
        assert_eq!(counting.outstanding_blocks(), 0);
        assert_eq!(counting.stats().invalid_frees, 0);
    }

    #[test]
    fn test_grey_jpeg_decodes_natively_to_one_channel() {
        let counting = CountingAllocator::new();
        let image = Decoder::new(&counting).decode(GRAY_JPG, 0).unwrap();
        assert_eq!((image.width(), image.height(), image.channels()), (2, 2, 1));
        assert_eq!(image.channels_in_file(), 1);
        assert_eq!(image.pixels(), zune_decode(GRAY_JPG, ColorSpace::Luma).as_slice());
        assert_eq!(counting.stats().allocations, 1);
    }

    #[test]
    fn test_grey_alpha_request_widens_luma() {
        let counting = CountingAllocator::new();
        let image = Decoder::new(&counting).decode(GRAY_JPG, 2).unwrap();
        let luma = zune_decode(GRAY_JPG, ColorSpace::Luma);
        let expected: Vec<u8> = luma.iter().flat_map(|&y| [y, 255]).collect();
        assert_eq!(image.pixels(), expected.as_slice());

        let stats = counting.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.frees, 1);
    }

    #[test]
    fn test_palette_png_expands_transparency() {
        let image = Decoder::new(&SystemAllocator).decode(PYTHON_PNG, 0).unwrap();
        assert_eq!((image.width(), image.height(), image.channels()), (16, 16, 4));
        assert_eq!(image.format(), ImageFormat::Png);
        // Palette entry 0 is fully transparent.
        assert_eq!(image.pixels()[3], 0);
    }

    #[test]
    fn test_rgba_png_to_rgb_drops_alpha() {
        let image = Decoder::new(&SystemAllocator).decode(SOLID_RGBA, 3).unwrap();
        assert_eq!(image.channels(), 3);
        assert_eq!(image.channels_in_file(), 4);
        assert!(image.pixels().chunks_exact(3).all(|px| px == [10, 200, 30]));
    }

    #[test]
    fn test_out_of_memory_leaves_nothing_behind() {
        let counting = CountingAllocator::new().fail_after(0);
        let result = Decoder::new(&counting).decode(PYTHON_JPG, 0);
        assert!(matches!(result, Err(PixallocError::OutOfMemory(_))));
        assert_eq!(counting.outstanding_blocks(), 0);

        // Second request (the converted block) fails; the first is returned.
        counting.set_fail_after(Some(1));
        let result = Decoder::new(&counting).decode(PYTHON_JPG, 2);
        assert!(result.is_err_and(|e| e.is_out_of_memory()));
        let stats = counting.stats();
        assert_eq!(stats.outstanding_blocks, 0);
        assert_eq!(stats.failed_allocations, 2);
    }

    #[test]
    fn test_reader_and_memory_paths_agree() {
        let counting = CountingAllocator::new();
        let decoder = Decoder::new(&counting);
        let from_reader = decoder.decode_reader(std::io::Cursor::new(PYTHON_PNG), 0).unwrap();
        let from_memory = decoder.decode(PYTHON_PNG, 0).unwrap();
        assert_eq!(from_reader.pixels(), from_memory.pixels());
        drop((from_reader, from_memory));
        assert_eq!(counting.outstanding_blocks(), 0);
    }

    #[test]
    fn test_flip_applies_after_conversion() {
        let upright = Decoder::new(&SystemAllocator).decode(PYTHON_JPG, 1).unwrap();
        let options = DecodeOptions::default().set_flip_vertically(true);
        let flipped = Decoder::with_options(&SystemAllocator, options)
            .decode(PYTHON_JPG, 1)
            .unwrap();
        for y in 0..16 {
            assert_eq!(flipped.row(y), upright.row(15 - y));
        }
    }

    #[test]
    fn test_one_allocator_shared_between_threads() {
        let counting = CountingAllocator::new();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let decoder = Decoder::new(&counting);
                    for _ in 0..8 {
                        let image = decoder.decode(PYTHON_JPG, 4).unwrap();
                        assert_eq!(image.pixels().len(), 16 * 16 * 4);
                    }
                });
            }
        });
        let stats = counting.stats();
        assert_eq!(stats.allocations, 4 * 8);
        assert_eq!(stats.frees, 4 * 8);
        assert_eq!(stats.outstanding_blocks, 0);
    }

    #[test]
    fn test_truncated_jpeg_is_an_error() {
        let counting = CountingAllocator::new();
        let truncated = &PYTHON_JPG[..40];
        let result = Decoder::new(&counting).decode(truncated, 0);
        assert!(result.is_err());
        assert_eq!(counting.outstanding_blocks(), 0);
    }

    #[test]
    fn test_progressive_jpeg_matches_reference_decoder() {
        // SOF2 marker: progressive DCT.
        assert!(PROGRESSIVE_JPG.windows(2).any(|w| w == [0xFF, 0xC2]));
        let counting = CountingAllocator::new();
        let image = Decoder::new(&counting).decode(PROGRESSIVE_JPG, 0).unwrap();
        assert_eq!((image.width(), image.height(), image.channels()), (493, 58, 3));
        assert_eq!(image.pixels(), zune_decode(PROGRESSIVE_JPG, ColorSpace::RGB).as_slice());
        drop(image);
        assert_eq!(counting.outstanding_blocks(), 0);
    }

    #[test]
    fn test_sixteen_bit_png_reduces_to_high_byte() {
        let decoder = Decoder::new(&SystemAllocator);
        let info = decoder.info(RGB16_PNG).unwrap();
        assert_eq!((info.width, info.height, info.channels_in_file), (3, 2, 3));
        assert_eq!(info.bits_per_channel, 16);

        let image = decoder.decode(RGB16_PNG, 0).unwrap();
        assert!(image.pixels().chunks_exact(3).all(|px| px == [171, 171, 171]));

        let wide = decoder.decode_16(RGB16_PNG, 0).unwrap();
        assert!(wide.pixels().iter().all(|&v| v == 0xABCD));
    }

    #[test]
    fn test_one_bit_grey_png_scales_to_full_range() {
        let image = Decoder::new(&SystemAllocator).decode(GRAY1_PNG, 0).unwrap();
        assert_eq!((image.width(), image.height(), image.channels()), (8, 2, 1));
        assert_eq!(image.row(0), &[255, 0, 255, 0, 255, 0, 255, 0]);
        assert_eq!(image.row(1), &[255, 255, 255, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn test_interlaced_png_is_deinterlaced() {
        let counting = CountingAllocator::new();
        let image = Decoder::new(&counting).decode(INTERLACED_PNG, 0).unwrap();
        assert_eq!((image.width(), image.height(), image.channels()), (8, 8, 1));
        for y in 0..8 {
            let expected: Vec<u8> = (0..8).map(|x| (y * 32 + x * 4) as u8).collect();
            assert_eq!(image.row(y), expected.as_slice(), "row {y}");
        }
        assert_eq!(counting.stats().allocations, 1);
    }

    #[test]
    fn test_gif_first_frame_on_transparent_canvas() {
        let image = Decoder::new(&SystemAllocator).decode(FRAMED_GIF, 3).unwrap();
        assert_eq!(image.format(), ImageFormat::Gif);
        assert_eq!(image.channels_in_file(), 4);
        assert_eq!(image.row(0), &[0; 12]);
        assert_eq!(image.row(1), &[0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 0]);
        assert_eq!(image.row(2), &[0, 0, 0, 0, 0, 255, 255, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_bmp_rows_come_out_top_down() {
        let counting = CountingAllocator::new();
        let image = Decoder::new(&counting).decode(RGB_BMP, 0).unwrap();
        assert_eq!(image.format(), ImageFormat::Bmp);
        assert_eq!((image.width(), image.height(), image.channels()), (3, 2, 3));
        assert_eq!(image.row(0), &[255, 0, 0, 0, 255, 0, 0, 0, 255]);
        assert_eq!(image.row(1), &[255, 255, 255, 128, 128, 128, 0, 0, 0]);
        assert_eq!(counting.stats().allocations, 1);
    }

    #[test]
    fn test_tga_decodes_without_a_signature() {
        let decoder = Decoder::new(&SystemAllocator);
        assert_eq!(decoder.info(RGB_TGA).unwrap().format, ImageFormat::Tga);
        let image = decoder.decode(RGB_TGA, 4).unwrap();
        assert_eq!(image.row(0), &[255, 0, 0, 255, 0, 255, 0, 255]);
        assert_eq!(image.row(1), &[0, 0, 255, 255, 255, 255, 255, 255]);
    }
}
