//! Allocator-aware 8-bit image resampling.
//!
//! Separable convolution: every input row is filtered horizontally into an
//! intermediate buffer, which is then filtered vertically into the output.
//! All working memory of a call (weight tables, the sRGB table, the row
//! buffers and the intermediate image) lives in one scratch block obtained
//! from the [`ResizerAllocator`] with the resizer's context, and freed
//! before the call returns.

pub mod filter;
mod weights;

use std::slice;

use tracing::debug;

pub use filter::{ColorSpace, Edge, Filter};

use crate::allocator::{BLOCK_ALIGN, ContextBlock, ResizerAllocator};
use crate::error::PixallocError;

/// Largest channel count accepted.
pub const MAX_CHANNELS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeOptions {
    channels: usize,
    filters: (Filter, Filter),
    edges: (Edge, Edge),
    colorspace: ColorSpace,
    alpha_channel: Option<usize>,
    premultiplied_alpha: bool,
    alpha_uses_colorspace: bool,
}

impl ResizeOptions {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            filters: (Filter::Default, Filter::Default),
            edges: (Edge::Clamp, Edge::Clamp),
            colorspace: ColorSpace::Linear,
            alpha_channel: None,
            premultiplied_alpha: false,
            alpha_uses_colorspace: false,
        }
    }

    #[must_use]
    pub fn set_filter(self, filter: Filter) -> Self {
        self.set_filters(filter, filter)
    }

    #[must_use]
    pub fn set_filters(mut self, horizontal: Filter, vertical: Filter) -> Self {
        self.filters = (horizontal, vertical);
        self
    }

    #[must_use]
    pub fn set_edge(self, edge: Edge) -> Self {
        self.set_edges(edge, edge)
    }

    #[must_use]
    pub fn set_edges(mut self, horizontal: Edge, vertical: Edge) -> Self {
        self.edges = (horizontal, vertical);
        self
    }

    #[must_use]
    pub fn set_colorspace(mut self, colorspace: ColorSpace) -> Self {
        self.colorspace = colorspace;
        self
    }

    /// Marks one channel as alpha. Colour channels are then weighted by
    /// alpha while filtering, unless the input is already premultiplied.
    #[must_use]
    pub fn set_alpha_channel(mut self, alpha_channel: Option<usize>) -> Self {
        self.alpha_channel = alpha_channel;
        self
    }

    #[must_use]
    pub fn set_premultiplied_alpha(mut self, yes: bool) -> Self {
        self.premultiplied_alpha = yes;
        self
    }

    /// Run the alpha channel through the sRGB curve too.
    #[must_use]
    pub fn set_alpha_uses_colorspace(mut self, yes: bool) -> Self {
        self.alpha_uses_colorspace = yes;
        self
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn filters(&self) -> (Filter, Filter) {
        self.filters
    }

    pub fn edges(&self) -> (Edge, Edge) {
        self.edges
    }

    pub fn colorspace(&self) -> ColorSpace {
        self.colorspace
    }

    pub fn alpha_channel(&self) -> Option<usize> {
        self.alpha_channel
    }

    pub fn premultiplied_alpha(&self) -> bool {
        self.premultiplied_alpha
    }

    pub fn alpha_uses_colorspace(&self) -> bool {
        self.alpha_uses_colorspace
    }
}

/// Input pixels. `stride` is the distance between rows in bytes.
#[derive(Debug, Clone, Copy)]
pub struct SourceImage<'p> {
    pub pixels: &'p [u8],
    pub width: usize,
    pub height: usize,
    pub stride: usize,
}

impl<'p> SourceImage<'p> {
    pub fn new(pixels: &'p [u8], width: usize, height: usize, stride: usize) -> Self {
        Self {
            pixels,
            width,
            height,
            stride,
        }
    }

    /// Rows with no padding.
    pub fn packed(pixels: &'p [u8], width: usize, height: usize, channels: usize) -> Self {
        Self::new(pixels, width, height, width * channels)
    }
}

/// Output pixels. `stride` is the distance between rows in bytes.
#[derive(Debug)]
pub struct TargetImage<'p> {
    pub pixels: &'p mut [u8],
    pub width: usize,
    pub height: usize,
    pub stride: usize,
}

impl<'p> TargetImage<'p> {
    pub fn new(pixels: &'p mut [u8], width: usize, height: usize, stride: usize) -> Self {
        Self {
            pixels,
            width,
            height,
            stride,
        }
    }

    pub fn packed(pixels: &'p mut [u8], width: usize, height: usize, channels: usize) -> Self {
        Self::new(pixels, width, height, width * channels)
    }
}

/// Resized pixels owned through the resizer's allocator and context.
#[derive(Debug)]
pub struct ResizedImage<'a, A: ResizerAllocator<C> + ?Sized, C: ?Sized> {
    width: usize,
    height: usize,
    channels: usize,
    pixels: ContextBlock<'a, A, C>,
}

impl<'a, A: ResizerAllocator<C> + ?Sized, C: ?Sized> ResizedImage<'a, A, C> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_block(self) -> ContextBlock<'a, A, C> {
        self.pixels
    }
}

/// Byte ranges of the scratch block, each starting on a [`BLOCK_ALIGN`] boundary.
#[derive(Debug, Clone, Copy)]
struct ScratchLayout {
    h_first: (usize, usize),
    h_weights: (usize, usize),
    v_first: (usize, usize),
    v_weights: (usize, usize),
    decode_table: (usize, usize),
    row: (usize, usize),
    intermediate: (usize, usize),
    accumulator: (usize, usize),
    total: usize,
}

/// Typed views over the scratch block.
struct Scratch<'s> {
    h_first: &'s mut [i32],
    h_weights: &'s mut [f32],
    v_first: &'s mut [i32],
    v_weights: &'s mut [f32],
    decode_table: &'s mut [f32],
    row: &'s mut [f32],
    intermediate: &'s mut [f32],
    accumulator: &'s mut [f32],
}

struct Plan {
    in_width: usize,
    in_height: usize,
    out_width: usize,
    out_height: usize,
    channels: usize,
    filters: (Filter, Filter),
    h_taps: usize,
    v_taps: usize,
}

impl Plan {
    fn layout(&self) -> Result<ScratchLayout, PixallocError> {
        let mut cursor = 0usize;
        let mut region = |count: usize, element: usize| -> Result<(usize, usize), PixallocError> {
            let bytes = count
                .checked_mul(element)
                .and_then(|b| b.checked_next_multiple_of(BLOCK_ALIGN))
                .ok_or(PixallocError::DimensionsTooLarge)?;
            let offset = cursor;
            cursor = cursor.checked_add(bytes).ok_or(PixallocError::DimensionsTooLarge)?;
            Ok((offset, count))
        };
        let int = size_of::<i32>();
        let float = size_of::<f32>();
        let out_samples = self.out_width.checked_mul(self.channels);

        let h_first = region(self.out_width, int)?;
        let h_weights = region(
            self.out_width.checked_mul(self.h_taps).ok_or(PixallocError::DimensionsTooLarge)?,
            float,
        )?;
        let v_first = region(self.out_height, int)?;
        let v_weights = region(
            self.out_height.checked_mul(self.v_taps).ok_or(PixallocError::DimensionsTooLarge)?,
            float,
        )?;
        let decode_table = region(256, float)?;
        let row = region(
            self.in_width.checked_mul(self.channels).ok_or(PixallocError::DimensionsTooLarge)?,
            float,
        )?;
        let intermediate = region(
            out_samples
                .and_then(|n| n.checked_mul(self.in_height))
                .ok_or(PixallocError::DimensionsTooLarge)?,
            float,
        )?;
        let accumulator = region(out_samples.ok_or(PixallocError::DimensionsTooLarge)?, float)?;

        Ok(ScratchLayout {
            h_first,
            h_weights,
            v_first,
            v_weights,
            decode_table,
            row,
            intermediate,
            accumulator,
            total: cursor,
        })
    }
}

impl<'s> Scratch<'s> {
    /// Splits `block` into the disjoint regions of `layout`.
    fn carve<A: ResizerAllocator<C> + ?Sized, C: ?Sized>(
        block: &'s mut ContextBlock<'_, A, C>,
        layout: &ScratchLayout,
    ) -> Self {
        debug_assert!(block.len() >= layout.total);
        let base = block.as_mut_ptr();
        // Regions are disjoint, in bounds, BLOCK_ALIGN-aligned and zero-filled,
        // which is a valid bit pattern for both i32 and f32.
        unsafe fn view<'v, T>(base: *mut u8, (offset, len): (usize, usize)) -> &'v mut [T] {
            unsafe { slice::from_raw_parts_mut(base.add(offset).cast::<T>(), len) }
        }
        unsafe {
            Self {
                h_first: view(base, layout.h_first),
                h_weights: view(base, layout.h_weights),
                v_first: view(base, layout.v_first),
                v_weights: view(base, layout.v_weights),
                decode_table: view(base, layout.decode_table),
                row: view(base, layout.row),
                intermediate: view(base, layout.intermediate),
                accumulator: view(base, layout.accumulator),
            }
        }
    }
}

/// Resizes images with all working memory coming from one allocator and
/// context.
pub struct Resizer<'a, A: ResizerAllocator<C> + ?Sized, C: ?Sized = ()> {
    allocator: &'a A,
    context: &'a C,
}

impl<'a, A: ResizerAllocator<C> + ?Sized, C: ?Sized> Resizer<'a, A, C> {
    pub fn new(allocator: &'a A, context: &'a C) -> Self {
        Self { allocator, context }
    }

    pub fn allocator(&self) -> &'a A {
        self.allocator
    }

    pub fn context(&self) -> &'a C {
        self.context
    }

    /// Resizes `source` into `target`. One scratch block is allocated and
    /// freed per call.
    pub fn resize_into(
        &self,
        source: &SourceImage<'_>,
        target: &mut TargetImage<'_>,
        options: &ResizeOptions,
    ) -> Result<(), PixallocError> {
        validate(source, target.width, target.height, target.stride, target.pixels.len(), options)?;

        let channels = options.channels;
        let upsampling_h = target.width > source.width;
        let upsampling_v = target.height > source.height;
        let filters = (
            options.filters.0.resolve(upsampling_h),
            options.filters.1.resolve(upsampling_v),
        );
        let plan = Plan {
            in_width: source.width,
            in_height: source.height,
            out_width: target.width,
            out_height: target.height,
            channels,
            filters,
            h_taps: weights::taps(filters.0, source.width, target.width),
            v_taps: weights::taps(filters.1, source.height, target.height),
        };
        let layout = plan.layout()?;
        debug!(
            from = ?(source.width, source.height),
            to = ?(target.width, target.height),
            channels,
            horizontal = filters.0.name(),
            vertical = filters.1.name(),
            scratch = layout.total,
            "resizing image"
        );

        let mut block = ContextBlock::new(self.allocator, self.context, layout.total)?;
        let scratch = Scratch::carve(&mut block, &layout);
        run(&plan, options, source, target, scratch);
        Ok(())
    }

    /// Resizes `source` into a new buffer taken from the allocator with the
    /// resizer's context.
    pub fn resize(
        &self,
        source: &SourceImage<'_>,
        width: usize,
        height: usize,
        options: &ResizeOptions,
    ) -> Result<ResizedImage<'a, A, C>, PixallocError> {
        if width == 0 {
            return Err(PixallocError::InvalidArgumentWidth);
        }
        if height == 0 {
            return Err(PixallocError::InvalidArgumentHeight);
        }
        if options.channels == 0 || options.channels > MAX_CHANNELS {
            return Err(PixallocError::channels(options.channels));
        }
        let stride = width
            .checked_mul(options.channels)
            .ok_or(PixallocError::DimensionsTooLarge)?;
        let size = stride.checked_mul(height).ok_or(PixallocError::DimensionsTooLarge)?;
        // Reject bad input before taking the output block.
        validate(source, width, height, stride, size, options)?;

        let mut pixels = ContextBlock::new(self.allocator, self.context, size)?;
        self.resize_into(source, &mut TargetImage::new(&mut pixels, width, height, stride), options)?;
        Ok(ResizedImage {
            width,
            height,
            channels: options.channels,
            pixels,
        })
    }
}

fn validate(
    source: &SourceImage<'_>,
    out_width: usize,
    out_height: usize,
    out_stride: usize,
    out_len: usize,
    options: &ResizeOptions,
) -> Result<(), PixallocError> {
    let channels = options.channels;
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(PixallocError::channels(channels));
    }
    if options.alpha_channel.is_some_and(|a| a >= channels) {
        return Err(PixallocError::InvalidAlphaChannel);
    }
    if source.width == 0 || out_width == 0 {
        return Err(PixallocError::InvalidArgumentWidth);
    }
    if source.height == 0 || out_height == 0 {
        return Err(PixallocError::InvalidArgumentHeight);
    }
    let sides = [
        (source.width, source.height, source.stride, source.pixels.len()),
        (out_width, out_height, out_stride, out_len),
    ];
    for (width, height, stride, len) in sides {
        let row = width.checked_mul(channels).ok_or(PixallocError::DimensionsTooLarge)?;
        if stride < row {
            return Err(PixallocError::InvalidArgumentStride);
        }
        let needed = stride
            .checked_mul(height - 1)
            .and_then(|n| n.checked_add(row))
            .ok_or(PixallocError::DimensionsTooLarge)?;
        if len < needed {
            return Err(PixallocError::InvalidArgumentSize);
        }
    }
    Ok(())
}

fn run(
    plan: &Plan,
    options: &ResizeOptions,
    source: &SourceImage<'_>,
    target: &mut TargetImage<'_>,
    scratch: Scratch<'_>,
) {
    let Scratch {
        h_first,
        h_weights,
        v_first,
        v_weights,
        decode_table,
        row,
        intermediate,
        accumulator,
    } = scratch;
    let channels = plan.channels;
    let (edge_h, edge_v) = options.edges;
    let srgb = options.colorspace == ColorSpace::Srgb;
    let alpha = options.alpha_channel;
    let premultiply = alpha.is_some() && !options.premultiplied_alpha;
    let alpha_srgb = srgb && options.alpha_uses_colorspace;

    weights::compute(plan.filters.0, plan.in_width, plan.out_width, plan.h_taps, h_first, h_weights);
    weights::compute(plan.filters.1, plan.in_height, plan.out_height, plan.v_taps, v_first, v_weights);

    for (level, value) in decode_table.iter_mut().enumerate() {
        let v = level as f32 / 255.0;
        *value = if srgb { filter::srgb_to_linear(v) } else { v };
    }
    let is_alpha = |c: usize| alpha == Some(c);
    let decode = |c: usize, byte: u8| {
        if is_alpha(c) && !alpha_srgb {
            f32::from(byte) / 255.0
        } else {
            decode_table[usize::from(byte)]
        }
    };

    // Horizontal pass, one input row at a time.
    let out_row_len = plan.out_width * channels;
    for y in 0..plan.in_height {
        let line = &source.pixels[y * source.stride..y * source.stride + plan.in_width * channels];
        for (texel, bytes) in row.chunks_exact_mut(channels).zip(line.chunks_exact(channels)) {
            for (c, (value, &byte)) in texel.iter_mut().zip(bytes).enumerate() {
                *value = decode(c, byte);
            }
            if premultiply {
                if let Some(a) = alpha {
                    let coverage = texel[a];
                    for (c, value) in texel.iter_mut().enumerate() {
                        if c != a {
                            *value *= coverage;
                        }
                    }
                }
            }
        }

        let out = &mut intermediate[y * out_row_len..(y + 1) * out_row_len];
        for (x, texel) in out.chunks_exact_mut(channels).enumerate() {
            texel.fill(0.0);
            let taps = &h_weights[x * plan.h_taps..(x + 1) * plan.h_taps];
            for (t, &w) in taps.iter().enumerate() {
                if w == 0.0 {
                    continue;
                }
                let Some(sx) = edge_h.map(i64::from(h_first[x]) + t as i64, plan.in_width) else {
                    continue;
                };
                let input = &row[sx * channels..(sx + 1) * channels];
                for (acc, &v) in texel.iter_mut().zip(input) {
                    *acc += w * v;
                }
            }
        }
    }

    // Vertical pass, one output row at a time.
    for y in 0..plan.out_height {
        accumulator.fill(0.0);
        let taps = &v_weights[y * plan.v_taps..(y + 1) * plan.v_taps];
        for (t, &w) in taps.iter().enumerate() {
            if w == 0.0 {
                continue;
            }
            let Some(sy) = edge_v.map(i64::from(v_first[y]) + t as i64, plan.in_height) else {
                continue;
            };
            let input = &intermediate[sy * out_row_len..(sy + 1) * out_row_len];
            for (acc, &v) in accumulator.iter_mut().zip(input) {
                *acc += w * v;
            }
        }

        let line = &mut target.pixels[y * target.stride..y * target.stride + out_row_len];
        for (texel, bytes) in accumulator.chunks_exact_mut(channels).zip(line.chunks_exact_mut(channels)) {
            if premultiply {
                if let Some(a) = alpha {
                    let coverage = texel[a];
                    let inv = if coverage > 0.0 { 1.0 / coverage } else { 0.0 };
                    for (c, value) in texel.iter_mut().enumerate() {
                        if c != a {
                            *value *= inv;
                        }
                    }
                }
            }
            for (c, (&value, byte)) in texel.iter().zip(bytes.iter_mut()).enumerate() {
                let value = value.clamp(0.0, 1.0);
                let encoded = if srgb && (!is_alpha(c) || alpha_srgb) {
                    filter::linear_to_srgb(value)
                } else {
                    value
                };
                *byte = (encoded * 255.0 + 0.5) as u8;
            }
        }
    }
}
