//! BMP and TGA backends over the `image` crate's codecs.

use std::io::Cursor;

use image::codecs::bmp::BmpDecoder;
use image::codecs::tga::TgaDecoder;
use image::{ImageDecoder, ImageError};

use super::{ImageInfo, RawImage};
use crate::allocator::{AllocBlock, DecoderAllocator};
use crate::error::PixallocError;
use crate::image_format::ImageFormat;

fn codec_error(format: ImageFormat) -> impl Fn(ImageError) -> PixallocError {
    move |e| PixallocError::Codec {
        format,
        message: e.to_string(),
    }
}

fn header_of<D: ImageDecoder>(decoder: &D, format: ImageFormat) -> Result<ImageInfo, PixallocError> {
    let color = decoder.color_type();
    // One byte per sample only; the codecs used here never produce wider types.
    if color.bytes_per_pixel() != color.channel_count() {
        return Err(PixallocError::UnsupportedFormat(format));
    }
    let (width, height) = decoder.dimensions();
    Ok(ImageInfo {
        width: width as usize,
        height: height as usize,
        channels_in_file: usize::from(color.channel_count()),
        bits_per_channel: 8,
        format,
    })
}

fn read_with<'a, A: DecoderAllocator + ?Sized, D: ImageDecoder>(
    allocator: &'a A,
    decoder: D,
    format: ImageFormat,
) -> Result<RawImage<'a, A>, PixallocError> {
    let info = header_of(&decoder, format)?;
    let size = usize::try_from(decoder.total_bytes()).map_err(|_| PixallocError::DimensionsTooLarge)?;
    let mut pixels = AllocBlock::new(allocator, size)?;
    decoder.read_image(&mut pixels[..]).map_err(codec_error(format))?;
    Ok(RawImage {
        width: info.width,
        height: info.height,
        channels: info.channels_in_file,
        bits: 8,
        pixels,
    })
}

pub(super) fn read_header(data: &[u8], format: ImageFormat) -> Result<ImageInfo, PixallocError> {
    let cursor = Cursor::new(data);
    match format {
        ImageFormat::Bmp => header_of(&BmpDecoder::new(cursor).map_err(codec_error(format))?, format),
        ImageFormat::Tga => header_of(&TgaDecoder::new(cursor).map_err(codec_error(format))?, format),
        other => Err(PixallocError::UnsupportedFormat(other)),
    }
}

pub(super) fn decode<'a, A: DecoderAllocator + ?Sized>(
    allocator: &'a A,
    data: &[u8],
    format: ImageFormat,
) -> Result<RawImage<'a, A>, PixallocError> {
    let cursor = Cursor::new(data);
    match format {
        ImageFormat::Bmp => read_with(allocator, BmpDecoder::new(cursor).map_err(codec_error(format))?, format),
        ImageFormat::Tga => read_with(allocator, TgaDecoder::new(cursor).map_err(codec_error(format))?, format),
        other => Err(PixallocError::UnsupportedFormat(other)),
    }
}
