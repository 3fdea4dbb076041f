//! Shared utilities for the storage layer.
//!
//! Murmur hash mixing for cache keys and pixel/normalized rectangles.

pub mod hash;
pub mod rect;
