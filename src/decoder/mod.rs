//! Allocator-aware image decoding.
//!
//! Front end over the JPEG (`zune-jpeg`), PNG (`png`), GIF (`gif`) and
//! BMP/TGA (`image`) decoders. Pixel blocks, conversion blocks and the
//! input block of [`Decoder::decode_reader`] are taken from the
//! [`DecoderAllocator`] the [`Decoder`] was built with, and every
//! intermediate block goes back to it before a call returns.
//!
//! The collaborators' own working buffers come from the global heap. Each
//! collaborator call runs inside a [`RouteScope`], so with
//! [`RoutingAllocator`](crate::routing::RoutingAllocator) installed as the
//! global allocator those buffers come from the decoder's allocator too.
//!
//! Memory traffic per call, for reference (blocks the decoder requests
//! itself, not counting routed collaborator buffers):
//! - decode with the file's own channel layout: one allocation (the pixels);
//! - decode to another channel count: two allocations, one free;
//! - a GIF whose first frame is smaller than the screen: one more
//!   allocation and free for the frame;
//! - 16-bit decode of an 8-bit file: one more allocation and free for the
//!   widened samples;
//! - decode from a reader: the above plus the input block, grown with
//!   `reallocate` and freed before returning.

mod bitmap;
pub mod convert;
mod gif;
mod jpeg;
mod png;

use std::io::Read;
use std::marker::PhantomData;
use std::mem;

use tracing::debug;

use self::convert::Sample;
use crate::allocator::{AllocBlock, DecoderAllocator};
use crate::error::PixallocError;
use crate::image_format::ImageFormat;
use crate::routing::RouteScope;

/// Largest width or height accepted by default.
pub const DEFAULT_MAX_DIMENSION: usize = 1 << 24;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    flip_vertically: bool,
    max_width: usize,
    max_height: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            flip_vertically: false,
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
        }
    }
}

impl DecodeOptions {
    /// Return rows bottom-up (first row of the buffer is the last row of the image).
    #[must_use]
    pub fn set_flip_vertically(mut self, yes: bool) -> Self {
        self.flip_vertically = yes;
        self
    }

    #[must_use]
    pub fn set_max_width(mut self, width: usize) -> Self {
        self.max_width = width;
        self
    }

    #[must_use]
    pub fn set_max_height(mut self, height: usize) -> Self {
        self.max_height = height;
        self
    }

    pub fn flip_vertically(&self) -> bool {
        self.flip_vertically
    }

    pub fn max_width(&self) -> usize {
        self.max_width
    }

    pub fn max_height(&self) -> usize {
        self.max_height
    }
}

/// Header information, read without decoding pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: usize,
    pub height: usize,
    /// Channels the decoder produces when no conversion is requested.
    pub channels_in_file: usize,
    /// 16 for PNGs with 16-bit samples, otherwise 8.
    pub bits_per_channel: usize,
    pub format: ImageFormat,
}

/// Backend output. `bits` is 16 only for big-endian PNG samples.
pub(crate) struct RawImage<'a, A: DecoderAllocator + ?Sized> {
    width: usize,
    height: usize,
    channels: usize,
    bits: usize,
    pixels: AllocBlock<'a, A>,
}

/// A decoded image: tightly packed and interleaved, with samples of type
/// `T` (`u8`, or `u16` from [`Decoder::decode_16`]).
#[derive(Debug)]
pub struct Image<'a, A: DecoderAllocator + ?Sized, T: Sample = u8> {
    width: usize,
    height: usize,
    channels: usize,
    channels_in_file: usize,
    format: ImageFormat,
    pixels: AllocBlock<'a, A>,
    _sample: PhantomData<T>,
}

impl<'a, A: DecoderAllocator + ?Sized, T: Sample> Image<'a, A, T> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn channels_in_file(&self) -> usize {
        self.channels_in_file
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn pixels(&self) -> &[T] {
        convert::samples(&self.pixels)
    }

    pub fn pixels_mut(&mut self) -> &mut [T] {
        convert::samples_mut(&mut self.pixels)
    }

    pub fn row_bytes(&self) -> usize {
        self.width * self.channels * mem::size_of::<T>()
    }

    pub fn row(&self, y: usize) -> &[T] {
        let stride = self.width * self.channels;
        &self.pixels()[y * stride..(y + 1) * stride]
    }

    /// Hands over the pixel block; it is still freed through the allocator.
    pub fn into_block(self) -> AllocBlock<'a, A> {
        self.pixels
    }
}

/// Decodes images with all memory coming from one allocator.
pub struct Decoder<'a, A: DecoderAllocator + ?Sized> {
    allocator: &'a A,
    options: DecodeOptions,
}

impl<'a, A: DecoderAllocator + ?Sized> Decoder<'a, A> {
    pub fn new(allocator: &'a A) -> Self {
        Self::with_options(allocator, DecodeOptions::default())
    }

    pub fn with_options(allocator: &'a A, options: DecodeOptions) -> Self {
        Self { allocator, options }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: DecodeOptions) {
        self.options = options;
    }

    pub fn allocator(&self) -> &'a A {
        self.allocator
    }

    /// Reads dimensions and channel count without decoding pixel data.
    /// The decoder itself takes nothing from the allocator.
    pub fn info(&self, data: &[u8]) -> Result<ImageInfo, PixallocError> {
        let scope = RouteScope::open(self.allocator);
        scope.enter(|| self.read_header(data)).map_err(PixallocError::detach)
    }

    /// Whether [`Decoder::decode_16`] returns the file's own 16-bit samples
    /// rather than widened 8-bit ones.
    pub fn is_16_bit(&self, data: &[u8]) -> Result<bool, PixallocError> {
        Ok(self.info(data)?.bits_per_channel == 16)
    }

    /// Decodes `data` to 8 bits per sample. `desired_channels` is 0 for the
    /// file's own layout, or 1 (grey), 2 (grey, alpha), 3 (RGB), 4 (RGBA).
    pub fn decode(&self, data: &[u8], desired_channels: usize) -> Result<Image<'a, A>, PixallocError> {
        self.decode_samples(data, desired_channels)
    }

    /// Decodes `data` to 16 bits per sample in native byte order. 16-bit
    /// PNGs keep their precision; everything else is widened (`v * 257`).
    pub fn decode_16(&self, data: &[u8], desired_channels: usize) -> Result<Image<'a, A, u16>, PixallocError> {
        self.decode_samples(data, desired_channels)
    }

    pub(crate) fn decode_samples<T: Sample>(
        &self,
        data: &[u8],
        desired_channels: usize,
    ) -> Result<Image<'a, A, T>, PixallocError> {
        if desired_channels > 4 {
            return Err(PixallocError::channels(desired_channels));
        }
        let wide = T::BITS == 16;

        let scope = RouteScope::open(self.allocator);
        let (info, raw) = scope
            .enter(|| -> Result<_, PixallocError> {
                let info = self.read_header(data)?;
                let raw = match info.format {
                    ImageFormat::Jpeg => jpeg::decode(self.allocator, data, &info, desired_channels)?,
                    ImageFormat::Png => png::decode(self.allocator, data, &info, wide)?,
                    ImageFormat::Gif => gif::decode(self.allocator, data, &info)?,
                    ImageFormat::Bmp | ImageFormat::Tga => bitmap::decode(self.allocator, data, info.format)?,
                    other => return Err(PixallocError::UnsupportedFormat(other)),
                };
                Ok((info, raw))
            })
            .map_err(PixallocError::detach)?;
        drop(scope);

        debug!(
            format = %info.format,
            width = info.width,
            height = info.height,
            channels_in_file = info.channels_in_file,
            desired_channels,
            bits = T::BITS,
            "decoded image"
        );

        let RawImage {
            width,
            height,
            channels: raw_channels,
            bits,
            pixels: raw_pixels,
        } = raw;

        let raw_pixels = if wide && bits == 8 {
            let widened = convert::widen_to_16(self.allocator, &raw_pixels)?;
            drop(raw_pixels);
            widened
        } else {
            let mut raw_pixels = raw_pixels;
            if wide {
                convert::big_endian_to_native(&mut raw_pixels);
            }
            raw_pixels
        };

        let (channels, mut pixels) = if desired_channels != 0 && desired_channels != raw_channels {
            let converted = convert::convert_channels(
                self.allocator,
                convert::samples::<T>(&raw_pixels),
                raw_channels,
                desired_channels,
                width * height,
            )?;
            drop(raw_pixels);
            (desired_channels, converted)
        } else {
            (raw_channels, raw_pixels)
        };

        if self.options.flip_vertically {
            convert::flip_vertically(&mut pixels, width * channels * mem::size_of::<T>(), height);
        }

        Ok(Image {
            width,
            height,
            channels,
            channels_in_file: info.channels_in_file,
            format: info.format,
            pixels,
            _sample: PhantomData,
        })
    }

    /// Reads `reader` to the end into a block grown through the allocator's
    /// `reallocate`, then decodes it. The input block is freed on return.
    pub fn decode_reader<R: Read>(
        &self,
        mut reader: R,
        desired_channels: usize,
    ) -> Result<Image<'a, A>, PixallocError> {
        let mut input = AllocBlock::new(self.allocator, READ_CHUNK)?;
        let mut filled = 0;
        loop {
            if filled == input.len() {
                let grown = input.len().checked_mul(2).ok_or(PixallocError::DimensionsTooLarge)?;
                input.resize(grown)?;
            }
            match reader.read(&mut input[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        debug!(bytes = filled, capacity = input.len(), "read image stream");
        self.decode(&input[..filled], desired_channels)
    }

    fn read_header(&self, data: &[u8]) -> Result<ImageInfo, PixallocError> {
        let format = ImageFormat::detect(data).ok_or(PixallocError::UnknownFormat)?;
        let info = match format {
            ImageFormat::Jpeg => jpeg::read_header(data)?,
            ImageFormat::Png => png::read_header(data)?,
            ImageFormat::Gif => gif::read_header(data)?,
            ImageFormat::Bmp | ImageFormat::Tga => bitmap::read_header(data, format)?,
            other => return Err(PixallocError::UnsupportedFormat(other)),
        };
        self.check_dimensions(&info)?;
        Ok(info)
    }

    fn check_dimensions(&self, info: &ImageInfo) -> Result<(), PixallocError> {
        if info.width == 0 {
            return Err(PixallocError::InvalidArgumentWidth);
        }
        if info.height == 0 {
            return Err(PixallocError::InvalidArgumentHeight);
        }
        if info.width > self.options.max_width || info.height > self.options.max_height {
            return Err(PixallocError::DimensionsTooLarge);
        }
        info.width
            .checked_mul(info.height)
            .and_then(|n| n.checked_mul(8))
            .ok_or(PixallocError::DimensionsTooLarge)?;
        Ok(())
    }
}
