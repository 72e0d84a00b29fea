use thiserror::Error;

use crate::image_format::ImageFormat;

#[derive(Error, Debug)]
pub enum PixallocError {
    #[error("Allocator returned no memory for a {0}-byte block")]
    OutOfMemory(usize),
    #[error("Allocator returned a block that is not 16-byte aligned")]
    MisalignedBlock,
    #[error("Unknown image format")]
    UnknownFormat,
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(ImageFormat),
    #[error("Invalid channel count {0}")]
    InvalidChannelCount(i64),
    #[error("Image dimensions too large")]
    DimensionsTooLarge,
    #[error("Null {0} handle")]
    NullHandle(&'static str),

    // Argument errors
    #[error("Invalid argument width")]
    InvalidArgumentWidth,
    #[error("Invalid argument height")]
    InvalidArgumentHeight,
    #[error("Invalid argument stride")]
    InvalidArgumentStride,
    #[error("Invalid argument size")]
    InvalidArgumentSize,
    #[error("Invalid alpha channel index")]
    InvalidAlphaChannel,
    #[error("Invalid {name} value {value}")]
    InvalidArgumentEnum { name: &'static str, value: i32 },

    // Collaborator errors, kept as messages so they own no collaborator memory
    #[error("JPEG: {0}")]
    Jpeg(String),
    #[error("PNG: {0}")]
    Png(String),
    #[error("GIF: {0}")]
    Gif(String),
    #[error("{format}: {message}")]
    Codec { format: ImageFormat, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<zune_jpeg::errors::DecodeErrors> for PixallocError {
    fn from(e: zune_jpeg::errors::DecodeErrors) -> Self {
        Self::Jpeg(e.to_string())
    }
}

impl From<png::DecodingError> for PixallocError {
    fn from(e: png::DecodingError) -> Self {
        Self::Png(e.to_string())
    }
}

impl From<gif::DecodingError> for PixallocError {
    fn from(e: gif::DecodingError) -> Self {
        Self::Gif(e.to_string())
    }
}

impl PixallocError {
    /// Stable numeric code used across the C interface. Zero is success.
    pub fn code(&self) -> i32 {
        match self {
            Self::OutOfMemory(_) => 1,
            Self::MisalignedBlock => 2,
            Self::UnknownFormat => 3,
            Self::UnsupportedFormat(_) => 4,
            Self::InvalidChannelCount(_) => 5,
            Self::DimensionsTooLarge => 6,
            Self::NullHandle(_) => 7,
            Self::Jpeg(_) => 20,
            Self::Png(_) => 21,
            Self::Io(_) => 22,
            Self::Gif(_) => 23,
            Self::Codec { .. } => 24,
            Self::InvalidArgumentWidth => 101,
            Self::InvalidArgumentHeight => 102,
            Self::InvalidArgumentStride => 103,
            Self::InvalidArgumentSize => 104,
            Self::InvalidAlphaChannel => 105,
            Self::InvalidArgumentEnum { .. } => 106,
        }
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory(_))
    }

    pub(crate) fn channels(count: usize) -> Self {
        Self::InvalidChannelCount(i64::try_from(count).unwrap_or(i64::MAX))
    }

    /// Copies collaborator messages into fresh strings.
    ///
    /// Messages built while a [`RouteScope`](crate::routing::RouteScope) is
    /// entered live in the routed allocator; the decoder calls this after
    /// leaving the scope so the returned error owns only global-heap memory.
    pub(crate) fn detach(self) -> Self {
        match self {
            Self::Jpeg(message) => Self::Jpeg(message.as_str().to_owned()),
            Self::Png(message) => Self::Png(message.as_str().to_owned()),
            Self::Gif(message) => Self::Gif(message.as_str().to_owned()),
            Self::Codec { format, message } => Self::Codec {
                format,
                message: message.as_str().to_owned(),
            },
            other => other,
        }
    }
}
