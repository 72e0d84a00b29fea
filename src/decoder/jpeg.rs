//! JPEG backend over `zune-jpeg`.

use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

use super::{ImageInfo, RawImage};
use crate::allocator::{AllocBlock, DecoderAllocator};
use crate::error::PixallocError;
use crate::image_format::ImageFormat;

fn decoder_options(colorspace: ColorSpace) -> DecoderOptions {
    // Dimension limits are enforced by the front end so every format
    // reports them the same way.
    DecoderOptions::default()
        .jpeg_set_out_colorspace(colorspace)
        .set_max_width(usize::from(u16::MAX))
        .set_max_height(usize::from(u16::MAX))
}

pub(super) fn read_header(data: &[u8]) -> Result<ImageInfo, PixallocError> {
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), decoder_options(ColorSpace::RGB));
    decoder.decode_headers()?;
    let (width, height) = decoder.dimensions().ok_or(PixallocError::UnknownFormat)?;
    let channels_in_file = match decoder.input_colorspace() {
        Some(ColorSpace::Luma) => 1,
        _ => 3,
    };
    Ok(ImageInfo {
        width,
        height,
        channels_in_file,
        bits_per_channel: 8,
        format: ImageFormat::Jpeg,
    })
}

/// Decodes straight into one block of the output size. Grey+alpha is not
/// produced by the JPEG decoder, so that request decodes to grey and is
/// widened by the front end.
pub(super) fn decode<'a, A: DecoderAllocator + ?Sized>(
    allocator: &'a A,
    data: &[u8],
    info: &ImageInfo,
    desired_channels: usize,
) -> Result<RawImage<'a, A>, PixallocError> {
    let (colorspace, channels) = match (desired_channels, info.channels_in_file) {
        (1 | 2, _) | (0, 1) => (ColorSpace::Luma, 1),
        (4, _) => (ColorSpace::RGBA, 4),
        _ => (ColorSpace::RGB, 3),
    };

    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), decoder_options(colorspace));
    decoder.decode_headers()?;
    let size = decoder
        .output_buffer_size()
        .ok_or(PixallocError::DimensionsTooLarge)?;

    let mut pixels = AllocBlock::new(allocator, size)?;
    decoder.decode_into(&mut pixels[..])?;

    Ok(RawImage {
        width: info.width,
        height: info.height,
        channels,
        bits: 8,
        pixels,
    })
}
