//! # Riptide
//!
//! GPU-resident SPH particle simulation with reflection-driven pipelines.
//!
//! Riptide keeps the whole simulation on the device: particle state lives in
//! storage buffers, update stages are WGSL kernels, and the host only
//! orchestrates. Shaders are the source of truth for their own interface;
//! everything the host needs (bindings, workgroup sizes, uniform layouts) is
//! reflected out of the compiled module instead of being declared twice.
//!
//! ## Quick Start
//!
//! ```ignore
//! use riptide::prelude::*;
//!
//! fn main() -> Result<(), riptide::Error> {
//!     let ctx = GpuContext::headless()?;
//!
//!     let seed: Vec<Particle> = (0..256)
//!         .map(|i| {
//!             let (x, y) = (i % 16, i / 16);
//!             Particle::new(
//!                 Vec2::new(x as f32 * 0.02 - 0.4, y as f32 * 0.02),
//!                 Vec2::ZERO,
//!                 0.2,
//!             )
//!         })
//!         .collect();
//!
//!     let render = Technique::compile(&ctx, "points", sph::point_render())?;
//!     let mut builder = PipelineBuilder::new(render)
//!         .with_neighbor_index(40)
//!         .with_particles(&seed);
//!     for stage in sph::update_stages(&ctx, 40)? {
//!         builder = builder.add_update_stage(stage);
//!     }
//!     let mut pipeline = builder.build(&ctx)?;
//!     SphConfig::default().apply(&mut pipeline);
//!
//!     pipeline.update(&ctx)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Techniques
//!
//! A [`Technique`] is a compiled, validated, reflected shader program. The
//! role is part of the description, never inferred:
//!
//! - [`TechniqueDesc::Render`] draws one point per particle from vertex
//!   attributes.
//! - [`TechniqueDesc::Compute`] updates particle records in place.
//! - [`TechniqueDesc::Capture`] reads the front buffer and writes advanced
//!   records into a separate destination.
//!
//! Uniforms are set by name with permissive typing: unknown names and
//! mismatched types are logged no-ops, so one configuration struct can be
//! broadcast across stages that each declare only what they use.
//!
//! ### The particle record
//!
//! [`Particle`] is a fixed 48-byte record. Its field table drives the host
//! struct layout, the vertex attributes, the WGSL struct every kernel
//! embeds, and the capture varying check, so the layout only exists in one
//! place.
//!
//! ### The neighbor index
//!
//! [`NeighborIndex`] is a flat `count x max_neighbors` slot table rebuilt
//! from scratch every update by an all-pairs kernel. Capacity is fixed at
//! build time; particles past capacity are silently dropped for the frame.
//!
//! ### The pipeline
//!
//! [`Pipeline`] owns the frame: index clear and rebuild, then the update
//! stages, each in its own compute pass so every stage sees the previous
//! one's writes. Update stages are either all in-place compute kernels or
//! exactly one capture kernel; the capture flavor draws the captured buffer
//! and ping-pongs it with the source.
//!
//! ## Shipped stages
//!
//! | Stage | Kernel |
//! |-------|--------|
//! | [`sph::density_pressure`] | poly6 density, linear equation of state |
//! | [`sph::accumulate_forces`] | spiky pressure gradient, viscosity laplacian, gravity |
//! | [`sph::leapfrog`] | position and velocity integration |
//! | [`sph::reflect_boundaries`] | damped velocity reflection at the tank walls |
//! | [`sph::capture_advect`] | ballistic capture variant for the ping-pong path |
//! | [`sph::point_render`] | speed-tinted point rendering |

mod buffer;
mod buffer_set;
mod capture;
mod context;
mod error;
mod index;
pub mod inspect;
mod particle;
mod pipeline;
pub mod sph;
mod technique;
pub mod time;
mod uniforms;

pub use buffer::DeviceBuffer;
pub use buffer_set::ParticleBufferSet;
pub use bytemuck;
pub use capture::CaptureTarget;
pub use context::{gpu_available, GpuContext};
pub use error::{ConfigurationError, DeviceError, Error, ShaderError};
pub use glam::Vec2;
pub use index::{NeighborIndex, EMPTY_SLOT};
pub use inspect::TechniqueInfo;
pub use particle::{FieldDesc, Particle, FIELDS};
pub use pipeline::{FrameStats, Pipeline, PipelineBuilder};
pub use sph::SphConfig;
pub use technique::{ShaderStage, Technique, TechniqueDesc};
pub use uniforms::{UniformKind, UniformValue};
pub use wgpu;

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use riptide::prelude::*;
/// ```
pub mod prelude {
    pub use crate::context::GpuContext;
    pub use crate::error::Error;
    pub use crate::index::NeighborIndex;
    pub use crate::particle::Particle;
    pub use crate::pipeline::{FrameStats, Pipeline, PipelineBuilder};
    pub use crate::sph::{self, SphConfig};
    pub use crate::technique::{Technique, TechniqueDesc};
    pub use crate::time::Time;
    pub use crate::Vec2;
}
