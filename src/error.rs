//! Crate-level error types.

use std::fmt;

use crate::gpu::render_context::RenderContextError;
use crate::image::ImageFormat;

/// Errors produced by the texture storage layer.
#[derive(Debug)]
pub enum StorageError {
    /// Handle was never allocated, was freed, or refers to an empty slot.
    InvalidHandle(&'static str),
    /// Handle refers to a resource of the wrong kind for the operation.
    WrongKind(String),
    /// Argument outside the accepted range (zero size, bad layer count...).
    InvalidArgument(String),
    /// Feature not available on the active capability tier.
    Unsupported(String),
    /// Framebuffer could not be completed.
    FramebufferIncomplete(String),
    /// Image value could not be produced or transformed.
    Image(ImageError),
    /// TOML capability preset parsing/serialization failure.
    ConfigParse(String),
    /// Generic I/O failure.
    Io(std::io::Error),
    /// GPU context initialization failure.
    Gpu(RenderContextError),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandle(what) => write!(f, "invalid {what} handle"),
            Self::WrongKind(msg) => write!(f, "wrong resource kind: {msg}"),
            Self::InvalidArgument(msg) => {
                write!(f, "invalid argument: {msg}")
            }
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Self::FramebufferIncomplete(status) => {
                write!(f, "framebuffer incomplete, status: {status}")
            }
            Self::Image(e) => write!(f, "image error: {e}"),
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Gpu(e) => write!(f, "GPU error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Image(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Gpu(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ImageError> for StorageError {
    fn from(e: ImageError) -> Self {
        Self::Image(e)
    }
}

impl From<RenderContextError> for StorageError {
    fn from(e: RenderContextError) -> Self {
        Self::Gpu(e)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Errors produced by [`crate::image::Image`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// Pixel buffer length does not match the format and dimensions.
    DataSize {
        /// Bytes required by format, size and mipmaps.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// Width or height is zero.
    EmptySize,
    /// No conversion path between the two formats.
    Conversion(ImageFormat, ImageFormat),
    /// No block decoder is available for this format.
    NoDecoder(ImageFormat),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataSize { expected, actual } => write!(
                f,
                "pixel data is {actual} bytes, format requires {expected}"
            ),
            Self::EmptySize => write!(f, "image width and height must be > 0"),
            Self::Conversion(from, to) => {
                write!(f, "cannot convert {from:?} to {to:?}")
            }
            Self::NoDecoder(format) => {
                write!(f, "no decoder available for {format:?}")
            }
        }
    }
}

impl std::error::Error for ImageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_handle_kind() {
        let e = StorageError::InvalidHandle("texture");
        assert_eq!(e.to_string(), "invalid texture handle");
    }

    #[test]
    fn image_error_is_the_source() {
        use std::error::Error as _;
        let e = StorageError::from(ImageError::EmptySize);
        assert!(e.source().is_some());
        assert!(e.to_string().contains("width and height"));
    }
}
