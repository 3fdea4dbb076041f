//! Copy effects: screen-space blits, blur, fills and SDF passes.
//!
//! [`CopyEffects`] holds a [`CopyShader`] capability and issues draws
//! through a [`GpuDevice`](crate::gpu::GpuDevice). It never owns a
//! destination; callers bind the framebuffer and viewport first.

mod copy;
mod shader;

pub use copy::{CopyEffects, SdfPass};
pub use shader::{
    BoundProgram, CopyShader, CopyUniform, CopyUniforms, CopyVariant, TieredCopyShader,
    UniformValue,
};
