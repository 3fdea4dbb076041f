// -- Lint policy ---------------------------------------------------------
// This is the single source of truth for crate-wide lints.

// Broad lint groups
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
// Documentation
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::bare_urls)]
// No panicking in library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
// No debug/print artifacts
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
// Import hygiene
#![deny(clippy::wildcard_imports)]
// Complexity limits (thresholds in clippy.toml)
#![deny(clippy::cognitive_complexity)]
#![deny(clippy::too_many_lines)]
#![deny(clippy::excessive_nesting)]
// Function signature hygiene
#![deny(clippy::too_many_arguments)]
#![deny(clippy::fn_params_excessive_bools)]
// Clone / pass-by-value hygiene
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::implicit_clone)]
// String hygiene
#![deny(clippy::inefficient_to_string)]
#![deny(clippy::redundant_closure_for_method_calls)]
#![deny(clippy::manual_string_new)]
#![deny(clippy::str_to_string)]
// Cargo lints (warn, not deny since cargo lints can be noisy)
#![warn(clippy::cargo)]
// Unused / redundant code
#![deny(unused_results)]
#![deny(unused_qualifications)]
// Cast hygiene
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]

//! Texture, render-target and texture-atlas storage for tiered GPU
//! backends.
//!
//! texstore owns every GPU texture a 2D/3D scene renderer needs: plain,
//! layered and 3D textures built from CPU [`image::Image`] values, proxy and
//! external textures, render targets with their blur backbuffer and signed
//! distance field, canvas texture composites, and a shared atlas that packs
//! small textures into one.
//!
//! # Key entry points
//!
//! - [`storage::TextureStorage`] - the single context object owning the
//!   device, the handle tables and the atlas
//! - [`config::Config`] - capability registry, detected or loaded from a
//!   TOML preset
//! - [`format::plan`] - format negotiation between image and device formats
//! - [`effects::CopyEffects`] - full-screen copies, blur and distance field
//!   passes
//! - [`gpu::GpuDevice`] - the device seam, implemented by
//!   [`gpu::headless::HeadlessDevice`] and [`gpu::wgpu_device::WgpuDevice`]
//!
//! # Architecture
//!
//! Storage is single-threaded and synchronous. Every operation takes the
//! context by `&mut`, resolves [`rid::Rid`] handles through generation
//! checks and returns [`error::StorageError`] on misuse. Capability gaps of
//! the reduced tier degrade gracefully: formats are decompressed or
//! converted, readback is emulated by drawing into a scratch framebuffer and
//! distance field processing is skipped with a warning. Device memory is
//! reported to an [`accounting::MemoryTracker`].

pub mod accounting;
pub mod config;
pub mod effects;
pub mod error;
pub mod format;
pub mod gpu;
pub mod image;
pub mod rid;
pub mod storage;
pub mod util;
