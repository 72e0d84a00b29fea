//! Image decoding and resizing with caller-supplied memory.
//!
//! Every byte the [`Decoder`] or [`Resizer`] needs comes from an allocator
//! the caller passes in: a [`DecoderAllocator`] (allocate, reallocate,
//! free) for decoding and a [`ResizerAllocator`] (allocate, free, with a
//! context value) for resizing. [`SystemAllocator`] is the platform
//! default, [`CountingAllocator`] records every call, and the C bindings
//! in [`ffi`] forward to raw function pointers.
//!
//! The codec crates behind the decoder allocate from the global heap. To
//! send that memory to the decoder's allocator as well, install
//! [`RoutingAllocator`] as the `#[global_allocator]`; see [`routing`].

pub mod allocator;
pub mod counting;
pub mod decoder;
pub mod error;
pub mod ffi;
pub mod image_format;
pub mod resize;
pub mod routing;

pub use allocator::{
    AllocBlock, BLOCK_ALIGN, ContextBlock, DecoderAllocator, DecoderBinding, RawContext, ResizerAllocator,
    ResizerBinding, SystemAllocator,
};
pub use counting::{AllocationStats, CountingAllocator};
pub use decoder::{DecodeOptions, Decoder, Image, ImageInfo};
pub use error::PixallocError;
pub use image_format::ImageFormat;
pub use resize::{ColorSpace, Edge, Filter, ResizeOptions, ResizedImage, Resizer, SourceImage, TargetImage};
pub use routing::{RouteScope, RoutingAllocator, RoutingStats, routing_stats};
