//! GIF backend over the `gif` crate.
//!
//! Only the first frame is decoded. It is placed at its offset on a
//! transparent canvas the size of the logical screen, as RGBA.

use ::gif::{ColorOutput, DecodeOptions, Decoder};

use super::{ImageInfo, RawImage};
use crate::allocator::{AllocBlock, DecoderAllocator};
use crate::error::PixallocError;
use crate::image_format::ImageFormat;

const CHANNELS: usize = 4;

fn reader(data: &[u8]) -> Result<Decoder<&[u8]>, PixallocError> {
    let mut options = DecodeOptions::new();
    options.set_color_output(ColorOutput::RGBA);
    Ok(options.read_info(data)?)
}

pub(super) fn read_header(data: &[u8]) -> Result<ImageInfo, PixallocError> {
    let decoder = reader(data)?;
    Ok(ImageInfo {
        width: usize::from(decoder.width()),
        height: usize::from(decoder.height()),
        channels_in_file: CHANNELS,
        bits_per_channel: 8,
        format: ImageFormat::Gif,
    })
}

pub(super) fn decode<'a, A: DecoderAllocator + ?Sized>(
    allocator: &'a A,
    data: &[u8],
    info: &ImageInfo,
) -> Result<RawImage<'a, A>, PixallocError> {
    let mut decoder = reader(data)?;
    let (left, top, width, height) = match decoder.next_frame_info()? {
        Some(frame) => (
            usize::from(frame.left),
            usize::from(frame.top),
            usize::from(frame.width),
            usize::from(frame.height),
        ),
        None => return Err(PixallocError::Gif("no image data".to_owned())),
    };

    let screen_row = info.width * CHANNELS;
    let mut canvas = AllocBlock::new(allocator, screen_row * info.height)?;
    if (left, top, width, height) == (0, 0, info.width, info.height) {
        decoder.read_into_buffer(&mut canvas[..])?;
    } else {
        let mut frame = AllocBlock::new(allocator, decoder.buffer_size())?;
        decoder.read_into_buffer(&mut frame[..])?;
        let visible = width.min(info.width.saturating_sub(left)) * CHANNELS;
        if visible > 0 {
            let rows = frame.chunks_exact(width * CHANNELS).take(info.height.saturating_sub(top));
            for (y, row) in rows.enumerate() {
                let start = (top + y) * screen_row + left * CHANNELS;
                canvas[start..start + visible].copy_from_slice(&row[..visible]);
            }
        }
    }

    Ok(RawImage {
        width: info.width,
        height: info.height,
        channels: CHANNELS,
        bits: 8,
        pixels: canvas,
    })
}
