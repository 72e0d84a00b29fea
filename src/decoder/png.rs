//! PNG backend over the `png` crate.
//!
//! Palette, tRNS and sub-byte depths are always expanded. The 8-bit path
//! also strips 16-bit samples; the 16-bit path keeps them (big-endian, as
//! the file stores them).

use ::png::{BitDepth, Decoder, Reader, Transformations};

use super::{ImageInfo, RawImage};
use crate::allocator::{AllocBlock, DecoderAllocator};
use crate::error::PixallocError;
use crate::image_format::ImageFormat;

fn reader(data: &[u8], keep_16: bool) -> Result<Reader<&[u8]>, PixallocError> {
    let mut decoder = Decoder::new(data);
    decoder.set_transformations(if keep_16 {
        Transformations::EXPAND
    } else {
        Transformations::normalize_to_color8()
    });
    Ok(decoder.read_info()?)
}

pub(super) fn read_header(data: &[u8]) -> Result<ImageInfo, PixallocError> {
    let reader = reader(data, false)?;
    let (color_type, _) = reader.output_color_type();
    let info = reader.info();
    Ok(ImageInfo {
        width: info.width as usize,
        height: info.height as usize,
        channels_in_file: color_type.samples(),
        bits_per_channel: if info.bit_depth == BitDepth::Sixteen { 16 } else { 8 },
        format: ImageFormat::Png,
    })
}

pub(super) fn decode<'a, A: DecoderAllocator + ?Sized>(
    allocator: &'a A,
    data: &[u8],
    info: &ImageInfo,
    keep_16: bool,
) -> Result<RawImage<'a, A>, PixallocError> {
    let mut reader = reader(data, keep_16)?;
    let mut pixels = AllocBlock::new(allocator, reader.output_buffer_size())?;
    let frame = reader.next_frame(&mut pixels[..])?;

    let channels = frame.color_type.samples();
    let bits = if frame.bit_depth == BitDepth::Sixteen { 16 } else { 8 };
    let row = info
        .width
        .checked_mul(channels * bits / 8)
        .ok_or(PixallocError::DimensionsTooLarge)?;
    let packed = row.checked_mul(info.height).ok_or(PixallocError::DimensionsTooLarge)?;
    if frame.line_size != row || pixels.len() < packed {
        return Err(PixallocError::InvalidArgumentStride);
    }
    pixels.resize(packed)?;

    Ok(RawImage {
        width: info.width,
        height: info.height,
        channels,
        bits,
        pixels,
    })
}
