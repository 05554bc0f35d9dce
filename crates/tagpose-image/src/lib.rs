#![deny(missing_docs)]
//! Image types and helpers used by the tag detection and pose pipeline.

/// image representation for computer vision purposes.
pub mod image;

/// Error types for the image module.
pub mod error;

/// Color space conversions.
pub mod color;

/// Drawing primitives used to annotate detections.
pub mod draw;

/// Reading and writing PNG files.
pub mod io;

pub use crate::error::ImageError;
pub use crate::image::{Image, ImageSize};
