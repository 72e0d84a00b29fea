//! C Foreign Function Interface for pixalloc-rs.
//!
//! Opaque handles carry the allocator callbacks registered at creation.
//! Every block these functions hand out comes from those callbacks, so C
//! callers may release pixels either with [`pixalloc_image_free`] or with
//! their own free function.
//!
//! On failure a function returns null or 0, and the reason can be read on
//! the same thread with [`pixalloc_failure_reason`].

use std::cell::RefCell;
use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int, c_uchar, c_ushort};
use std::ptr::{self, NonNull};
use std::slice;

use crate::allocator::{
    AllocateFn, ContextAllocateFn, ContextFreeFn, DecoderAllocator, DecoderBinding, FreeFn,
    RawContext, ReallocateFn, ResizerBinding,
};
use crate::decoder::convert::Sample;
use crate::decoder::{DecodeOptions, Decoder};
use crate::error::PixallocError;
use crate::resize::{ColorSpace, Edge, Filter, ResizeOptions, Resizer, SourceImage, TargetImage};

/// Opaque decoder handle.
#[repr(C)]
pub struct PixallocDecoder {
    _private: [u8; 0],
}

/// Opaque resizer handle.
#[repr(C)]
pub struct PixallocResizer {
    _private: [u8; 0],
}

/// Image information structure.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct PixallocImageInfo {
    pub width: c_int,
    pub height: c_int,
    pub channels_in_file: c_int,
}

/// Input alpha is already premultiplied.
pub const PIXALLOC_FLAG_ALPHA_PREMULTIPLIED: c_int = 1 << 0;
/// Alpha goes through the sRGB curve like the colour channels.
pub const PIXALLOC_FLAG_ALPHA_USES_COLORSPACE: c_int = 1 << 1;

/// Marks the absence of an alpha channel in [`pixalloc_resize_uint8_generic`].
pub const PIXALLOC_ALPHA_CHANNEL_NONE: c_int = -1;

struct DecoderState {
    binding: DecoderBinding,
    options: DecodeOptions,
}

struct ResizerState {
    binding: ResizerBinding,
    context: RawContext,
}

struct Failure {
    code: c_int,
    reason: CString,
}

thread_local! {
    static LAST_FAILURE: RefCell<Option<Failure>> = const { RefCell::new(None) };
}

fn fail(error: PixallocError) {
    let reason = CString::new(error.to_string()).unwrap_or_default();
    let code = error.code();
    LAST_FAILURE.with(|last| *last.borrow_mut() = Some(Failure { code, reason }));
}

fn succeed() {
    LAST_FAILURE.with(|last| *last.borrow_mut() = None);
}

unsafe fn decoder_state<'a>(decoder: *const PixallocDecoder) -> Option<&'a DecoderState> {
    let state = unsafe { (decoder as *const DecoderState).as_ref() };
    if state.is_none() {
        fail(PixallocError::NullHandle("decoder"));
    }
    state
}

unsafe fn resizer_state<'a>(resizer: *const PixallocResizer) -> Option<&'a ResizerState> {
    let state = unsafe { (resizer as *const ResizerState).as_ref() };
    if state.is_none() {
        fail(PixallocError::NullHandle("resizer"));
    }
    state
}

/// Reads a non-negative C dimension.
fn dimension(value: c_int, error: PixallocError) -> Result<usize, PixallocError> {
    usize::try_from(value).map_err(|_| error)
}

/// Create a decoder that takes all of its memory from the three functions.
///
/// Returns null if any function pointer is null.
///
/// # Safety
/// The functions must behave like `malloc`, `realloc` and `free`, returning
/// blocks aligned to 16 bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pixalloc_decoder_new(
    allocate: Option<AllocateFn>,
    reallocate: Option<ReallocateFn>,
    free: Option<FreeFn>,
) -> *mut PixallocDecoder {
    let (Some(allocate), Some(reallocate), Some(free)) = (allocate, reallocate, free) else {
        return ptr::null_mut();
    };

    let state = Box::new(DecoderState {
        binding: unsafe { DecoderBinding::new(allocate, reallocate, free) },
        options: DecodeOptions::default(),
    });

    Box::into_raw(state) as *mut PixallocDecoder
}

/// Free a decoder handle. Images it produced stay valid.
///
/// # Safety
/// `decoder` must be null or a valid handle from `pixalloc_decoder_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pixalloc_decoder_free(decoder: *mut PixallocDecoder) {
    if !decoder.is_null() {
        let _ = unsafe { Box::from_raw(decoder as *mut DecoderState) };
    }
}

/// Return rows bottom-up from subsequent loads when `flip` is non-zero.
///
/// # Safety
/// `decoder` must be null or a valid handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pixalloc_decoder_set_flip_vertically(decoder: *mut PixallocDecoder, flip: c_int) {
    match unsafe { (decoder as *mut DecoderState).as_mut() } {
        Some(state) => {
            state.options = state.options.set_flip_vertically(flip != 0);
            succeed();
        }
        None => fail(PixallocError::NullHandle("decoder")),
    }
}

/// Read the image header. Returns 1 on success, 0 on failure.
///
/// # Safety
/// `decoder` must be valid, `data` must point to `len` bytes and `info`
/// must point to a writable `PixallocImageInfo`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pixalloc_info_from_memory(
    decoder: *const PixallocDecoder,
    data: *const c_uchar,
    len: usize,
    info: *mut PixallocImageInfo,
) -> c_int {
    let Some(state) = (unsafe { decoder_state(decoder) }) else {
        return 0;
    };
    if data.is_null() || len == 0 || info.is_null() {
        fail(PixallocError::InvalidArgumentSize);
        return 0;
    }

    let bytes = unsafe { slice::from_raw_parts(data, len) };
    let decoder = Decoder::with_options(&state.binding, state.options);
    match decoder.info(bytes) {
        Ok(header) => {
            unsafe {
                *info = PixallocImageInfo {
                    width: header.width as c_int,
                    height: header.height as c_int,
                    channels_in_file: header.channels_in_file as c_int,
                };
            }
            succeed();
            1
        }
        Err(e) => {
            fail(e);
            0
        }
    }
}

/// Non-zero when `pixalloc_load_16_from_memory` returns the file's own
/// 16-bit samples (16-bit PNGs) rather than widened 8-bit ones. Returns -1
/// on failure.
///
/// # Safety
/// `decoder` must be valid and `data` must point to `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pixalloc_is_16_bit_from_memory(
    decoder: *const PixallocDecoder,
    data: *const c_uchar,
    len: usize,
) -> c_int {
    let Some(state) = (unsafe { decoder_state(decoder) }) else {
        return -1;
    };
    if data.is_null() || len == 0 {
        fail(PixallocError::InvalidArgumentSize);
        return -1;
    }

    let bytes = unsafe { slice::from_raw_parts(data, len) };
    match Decoder::with_options(&state.binding, state.options).is_16_bit(bytes) {
        Ok(wide) => {
            succeed();
            c_int::from(wide)
        }
        Err(e) => {
            fail(e);
            -1
        }
    }
}

/// Shared body of the two load functions.
#[allow(clippy::too_many_arguments)]
unsafe fn load<T: Sample>(
    decoder: *const PixallocDecoder,
    data: *const c_uchar,
    len: usize,
    x: *mut c_int,
    y: *mut c_int,
    channels_in_file: *mut c_int,
    desired_channels: c_int,
) -> *mut T {
    let Some(state) = (unsafe { decoder_state(decoder) }) else {
        return ptr::null_mut();
    };
    if data.is_null() || len == 0 {
        fail(PixallocError::InvalidArgumentSize);
        return ptr::null_mut();
    }
    let Ok(desired) = usize::try_from(desired_channels) else {
        fail(PixallocError::InvalidChannelCount(i64::from(desired_channels)));
        return ptr::null_mut();
    };

    let bytes = unsafe { slice::from_raw_parts(data, len) };
    let decoder = Decoder::with_options(&state.binding, state.options);
    match decoder.decode_samples::<T>(bytes, desired) {
        Ok(image) => {
            unsafe {
                if !x.is_null() {
                    *x = image.width() as c_int;
                }
                if !y.is_null() {
                    *y = image.height() as c_int;
                }
                if !channels_in_file.is_null() {
                    *channels_in_file = image.channels_in_file() as c_int;
                }
            }
            succeed();
            let (pixels, _) = image.into_block().into_raw();
            pixels.as_ptr().cast()
        }
        Err(e) => {
            fail(e);
            ptr::null_mut()
        }
    }
}

/// Decode an image held in memory.
///
/// Returns the pixels (row-major, interleaved, 8 bits per sample) or null.
/// `desired_channels` is 0 for the file's own layout or 1 to 4. The block
/// comes from the decoder's `allocate`/`reallocate` functions.
///
/// # Safety
/// `decoder` must be valid and `data` must point to `len` bytes. `x`, `y`
/// and `channels_in_file` must each be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pixalloc_load_from_memory(
    decoder: *const PixallocDecoder,
    data: *const c_uchar,
    len: usize,
    x: *mut c_int,
    y: *mut c_int,
    channels_in_file: *mut c_int,
    desired_channels: c_int,
) -> *mut c_uchar {
    unsafe { load::<u8>(decoder, data, len, x, y, channels_in_file, desired_channels) }
}

/// Like `pixalloc_load_from_memory` with 16 bits per sample in native byte
/// order. Free the result with `pixalloc_image_free`.
///
/// # Safety
/// Same as [`pixalloc_load_from_memory`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pixalloc_load_16_from_memory(
    decoder: *const PixallocDecoder,
    data: *const c_uchar,
    len: usize,
    x: *mut c_int,
    y: *mut c_int,
    channels_in_file: *mut c_int,
    desired_channels: c_int,
) -> *mut c_ushort {
    unsafe { load::<u16>(decoder, data, len, x, y, channels_in_file, desired_channels) }
}

/// Free pixels returned by either load function.
///
/// # Safety
/// `decoder` must be the handle that produced `pixels` (or one registered
/// with the same free function), and `pixels` must not be freed twice.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pixalloc_image_free(decoder: *const PixallocDecoder, pixels: *mut c_void) {
    let Some(state) = (unsafe { decoder_state(decoder) }) else {
        return;
    };
    if let Some(block) = NonNull::new(pixels.cast::<u8>()) {
        unsafe { DecoderAllocator::free(&state.binding, block) };
    }
}

/// Message describing the last failure on this thread, or null if the last
/// call succeeded. Valid until the next call on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn pixalloc_failure_reason() -> *const c_char {
    LAST_FAILURE.with(|last| match &*last.borrow() {
        Some(failure) => failure.reason.as_ptr(),
        None => ptr::null(),
    })
}

/// Numeric code of the last failure on this thread, 0 if none.
#[unsafe(no_mangle)]
pub extern "C" fn pixalloc_failure_code() -> c_int {
    LAST_FAILURE.with(|last| last.borrow().as_ref().map_or(0, |failure| failure.code))
}

/// Create a resizer whose scratch memory comes from `allocate`/`free`,
/// each called with `context`.
///
/// Returns null if either function pointer is null.
///
/// # Safety
/// The functions must behave like `malloc` and `free`, returning blocks
/// aligned to 16 bytes. `context` is passed through untouched.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pixalloc_resizer_new(
    allocate: Option<ContextAllocateFn>,
    free: Option<ContextFreeFn>,
    context: *mut c_void,
) -> *mut PixallocResizer {
    let (Some(allocate), Some(free)) = (allocate, free) else {
        return ptr::null_mut();
    };

    let state = Box::new(ResizerState {
        binding: unsafe { ResizerBinding::new(allocate, free) },
        context: RawContext(context),
    });

    Box::into_raw(state) as *mut PixallocResizer
}

/// Free a resizer handle.
///
/// # Safety
/// `resizer` must be null or a valid handle from `pixalloc_resizer_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pixalloc_resizer_free(resizer: *mut PixallocResizer) {
    if !resizer.is_null() {
        let _ = unsafe { Box::from_raw(resizer as *mut ResizerState) };
    }
}

/// Resize with the default filter, clamped edges and linear samples.
/// A stride of 0 means packed rows. Returns 1 on success, 0 on failure.
///
/// # Safety
/// `resizer` must be valid. `input` must hold `in_h` rows of `in_stride`
/// bytes and `output` `out_h` rows of `out_stride` bytes.
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn pixalloc_resize_uint8(
    resizer: *const PixallocResizer,
    input: *const c_uchar,
    in_w: c_int,
    in_h: c_int,
    in_stride: c_int,
    output: *mut c_uchar,
    out_w: c_int,
    out_h: c_int,
    out_stride: c_int,
    channels: c_int,
) -> c_int {
    unsafe {
        pixalloc_resize_uint8_generic(
            resizer,
            input,
            in_w,
            in_h,
            in_stride,
            output,
            out_w,
            out_h,
            out_stride,
            channels,
            PIXALLOC_ALPHA_CHANNEL_NONE,
            0,
            Edge::Clamp.into(),
            Filter::Default.into(),
            ColorSpace::Linear.into(),
        )
    }
}

/// Resize with every option exposed. `edge`, `filter` and `colorspace` take
/// the integer values of [`Edge`], [`Filter`] and [`ColorSpace`]; `flags`
/// combines the `PIXALLOC_FLAG_*` bits. Returns 1 on success, 0 on failure.
///
/// # Safety
/// Same as [`pixalloc_resize_uint8`].
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn pixalloc_resize_uint8_generic(
    resizer: *const PixallocResizer,
    input: *const c_uchar,
    in_w: c_int,
    in_h: c_int,
    in_stride: c_int,
    output: *mut c_uchar,
    out_w: c_int,
    out_h: c_int,
    out_stride: c_int,
    channels: c_int,
    alpha_channel: c_int,
    flags: c_int,
    edge: c_int,
    filter: c_int,
    colorspace: c_int,
) -> c_int {
    let Some(state) = (unsafe { resizer_state(resizer) }) else {
        return 0;
    };
    if input.is_null() || output.is_null() {
        fail(PixallocError::InvalidArgumentSize);
        return 0;
    }

    let result = (|| -> Result<(), PixallocError> {
        let channels = dimension(channels, PixallocError::InvalidChannelCount(i64::from(channels)))?;
        let in_w = dimension(in_w, PixallocError::InvalidArgumentWidth)?;
        let in_h = dimension(in_h, PixallocError::InvalidArgumentHeight)?;
        let out_w = dimension(out_w, PixallocError::InvalidArgumentWidth)?;
        let out_h = dimension(out_h, PixallocError::InvalidArgumentHeight)?;
        let stride = |value: c_int, width: usize| -> Result<usize, PixallocError> {
            match dimension(value, PixallocError::InvalidArgumentStride)? {
                0 => width.checked_mul(channels).ok_or(PixallocError::DimensionsTooLarge),
                s => Ok(s),
            }
        };
        let in_stride = stride(in_stride, in_w)?;
        let out_stride = stride(out_stride, out_w)?;
        let alpha = match alpha_channel {
            PIXALLOC_ALPHA_CHANNEL_NONE => None,
            a => Some(dimension(a, PixallocError::InvalidAlphaChannel)?),
        };
        let edge = Edge::try_from(edge).map_err(|_| PixallocError::InvalidArgumentEnum { name: "edge", value: edge })?;
        let filter =
            Filter::try_from(filter).map_err(|_| PixallocError::InvalidArgumentEnum { name: "filter", value: filter })?;
        let colorspace = ColorSpace::try_from(colorspace).map_err(|_| PixallocError::InvalidArgumentEnum {
            name: "colorspace",
            value: colorspace,
        })?;

        let span = |height: usize, stride: usize, width: usize| {
            if height == 0 || width == 0 {
                return Some(0);
            }
            stride.checked_mul(height - 1)?.checked_add(width.checked_mul(channels)?)
        };
        let in_len = span(in_h, in_stride, in_w).ok_or(PixallocError::DimensionsTooLarge)?;
        let out_len = span(out_h, out_stride, out_w).ok_or(PixallocError::DimensionsTooLarge)?;
        let source = SourceImage::new(unsafe { slice::from_raw_parts(input, in_len) }, in_w, in_h, in_stride);
        let mut target = TargetImage::new(
            unsafe { slice::from_raw_parts_mut(output, out_len) },
            out_w,
            out_h,
            out_stride,
        );

        let options = ResizeOptions::new(channels)
            .set_edge(edge)
            .set_filter(filter)
            .set_colorspace(colorspace)
            .set_alpha_channel(alpha)
            .set_premultiplied_alpha(flags & PIXALLOC_FLAG_ALPHA_PREMULTIPLIED != 0)
            .set_alpha_uses_colorspace(flags & PIXALLOC_FLAG_ALPHA_USES_COLORSPACE != 0);
        Resizer::new(&state.binding, &state.context).resize_into(&source, &mut target, &options)
    })();

    match result {
        Ok(()) => {
            succeed();
            1
        }
        Err(e) => {
            fail(e);
            0
        }
    }
}

/// Copies the failure reason for tests and Rust callers of the C API.
pub fn last_failure_reason() -> Option<String> {
    let reason = pixalloc_failure_reason();
    if reason.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(reason) }.to_string_lossy().into_owned())
}
