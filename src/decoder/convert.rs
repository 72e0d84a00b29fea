//! Channel-count conversion, sample widening and row flipping for decoded
//! images.

use std::mem;
use std::slice;

use crate::allocator::{AllocBlock, DecoderAllocator};
use crate::error::PixallocError;

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
}

/// Sample type of a decoded image: `u8`, or `u16` for the 16-bit path.
pub trait Sample: sealed::Sealed + Copy + Default + Eq + std::fmt::Debug + 'static {
    const MAX: Self;
    const BITS: u32;

    fn luma(r: Self, g: Self, b: Self) -> Self;
}

impl Sample for u8 {
    const MAX: Self = u8::MAX;
    const BITS: u32 = 8;

    fn luma(r: u8, g: u8, b: u8) -> u8 {
        luma(r, g, b)
    }
}

impl Sample for u16 {
    const MAX: Self = u16::MAX;
    const BITS: u32 = 16;

    fn luma(r: u16, g: u16, b: u16) -> u16 {
        ((u32::from(r) * 77 + u32::from(g) * 150 + u32::from(b) * 29) >> 8) as u16
    }
}

/// Integer luma approximation, `(77 R + 150 G + 29 B) / 256`.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((u32::from(r) * 77 + u32::from(g) * 150 + u32::from(b) * 29) >> 8) as u8
}

/// Views an allocator block as samples. Blocks are [`BLOCK_ALIGN`]ed, so the
/// view covers every whole sample.
///
/// [`BLOCK_ALIGN`]: crate::allocator::BLOCK_ALIGN
pub(crate) fn samples<T: Sample>(bytes: &[u8]) -> &[T] {
    assert_eq!(bytes.as_ptr() as usize % mem::align_of::<T>(), 0);
    // u8 and u16 accept every bit pattern.
    unsafe { slice::from_raw_parts(bytes.as_ptr().cast::<T>(), bytes.len() / mem::size_of::<T>()) }
}

pub(crate) fn samples_mut<T: Sample>(bytes: &mut [u8]) -> &mut [T] {
    assert_eq!(bytes.as_ptr() as usize % mem::align_of::<T>(), 0);
    unsafe { slice::from_raw_parts_mut(bytes.as_mut_ptr().cast::<T>(), bytes.len() / mem::size_of::<T>()) }
}

/// Converts `pixel_count` interleaved pixels from `from` to `to` channels
/// into a new block taken from `allocator`. Missing alpha becomes
/// [`Sample::MAX`], grey is replicated into RGB, RGB collapses to
/// [`Sample::luma`].
pub fn convert_channels<'a, A: DecoderAllocator + ?Sized, T: Sample>(
    allocator: &'a A,
    source: &[T],
    from: usize,
    to: usize,
    pixel_count: usize,
) -> Result<AllocBlock<'a, A>, PixallocError> {
    if !(1..=4).contains(&from) {
        return Err(PixallocError::channels(from));
    }
    if !(1..=4).contains(&to) {
        return Err(PixallocError::channels(to));
    }
    let needed = pixel_count.checked_mul(from).ok_or(PixallocError::DimensionsTooLarge)?;
    if source.len() < needed {
        return Err(PixallocError::InvalidArgumentSize);
    }
    let size = pixel_count
        .checked_mul(to)
        .and_then(|n| n.checked_mul(mem::size_of::<T>()))
        .ok_or(PixallocError::DimensionsTooLarge)?;
    let mut target = AllocBlock::new(allocator, size)?;

    let pixels = source[..needed]
        .chunks_exact(from)
        .zip(samples_mut::<T>(&mut target).chunks_exact_mut(to));
    for (src, dst) in pixels {
        match (from, to) {
            (1, 2) => {
                dst[0] = src[0];
                dst[1] = T::MAX;
            }
            (1, 3) => dst.fill(src[0]),
            (1, 4) => {
                dst[..3].fill(src[0]);
                dst[3] = T::MAX;
            }
            (2, 1) => dst[0] = src[0],
            (2, 3) => dst.fill(src[0]),
            (2, 4) => {
                dst[..3].fill(src[0]);
                dst[3] = src[1];
            }
            (3, 1) => dst[0] = T::luma(src[0], src[1], src[2]),
            (3, 2) => {
                dst[0] = T::luma(src[0], src[1], src[2]);
                dst[1] = T::MAX;
            }
            (3, 4) => {
                dst[..3].copy_from_slice(src);
                dst[3] = T::MAX;
            }
            (4, 1) => dst[0] = T::luma(src[0], src[1], src[2]),
            (4, 2) => {
                dst[0] = T::luma(src[0], src[1], src[2]);
                dst[1] = src[3];
            }
            (4, 3) => dst.copy_from_slice(&src[..3]),
            _ => dst.copy_from_slice(src),
        }
    }
    Ok(target)
}

/// Widens 8-bit samples to 16 bits (`v * 257`, so 255 maps to 65535) into
/// a new block.
pub fn widen_to_16<'a, A: DecoderAllocator + ?Sized>(
    allocator: &'a A,
    source: &[u8],
) -> Result<AllocBlock<'a, A>, PixallocError> {
    let size = source.len().checked_mul(2).ok_or(PixallocError::DimensionsTooLarge)?;
    let mut target = AllocBlock::new(allocator, size)?;
    for (dst, &src) in samples_mut::<u16>(&mut target).iter_mut().zip(source) {
        *dst = u16::from(src) * 257;
    }
    Ok(target)
}

/// Turns big-endian 16-bit samples, as PNG stores them, into native order.
pub fn big_endian_to_native(bytes: &mut [u8]) {
    for pair in bytes.chunks_exact_mut(2) {
        let value = u16::from_be_bytes([pair[0], pair[1]]);
        pair.copy_from_slice(&value.to_ne_bytes());
    }
}

/// Reverses the order of `height` rows of `row_bytes` bytes each, in place.
pub fn flip_vertically(pixels: &mut [u8], row_bytes: usize, height: usize) {
    if row_bytes == 0 {
        return;
    }
    let total = row_bytes * height;
    let pixels = &mut pixels[..total];
    for top in 0..height / 2 {
        let bottom = height - 1 - top;
        let (upper, lower) = pixels.split_at_mut(bottom * row_bytes);
        upper[top * row_bytes..(top + 1) * row_bytes].swap_with_slice(&mut lower[..row_bytes]);
    }
}
