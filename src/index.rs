//! Fixed-capacity neighbor index.
//!
//! One flat slot buffer holds up to `max_neighbors` candidate ids per
//! particle; empty slots carry [`EMPTY_SLOT`]. Maintenance is two stages
//! owned by the index: a per-particle clear and an O(n^2) pairwise rebuild
//! dispatched over a 2D grid. The capacity is baked into both stage sources
//! as a constant at construction, so the buffer sizing and the kernels can
//! never disagree about it.
//!
//! The structure is lossy on purpose: a particle with more neighbors than
//! capacity silently keeps the first `max_neighbors` found. Readers walk a
//! particle's slots until the first [`EMPTY_SLOT`].

use crate::buffer::DeviceBuffer;
use crate::context::GpuContext;
use crate::error::{ConfigurationError, Error};
use crate::particle;
use crate::technique::{Technique, TechniqueDesc};
use crate::uniforms::UniformValue;

/// Sentinel stored in unused slots.
pub const EMPTY_SLOT: u32 = 0xdead_beef;

const INDEX_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

pub struct NeighborIndex {
    buffer: DeviceBuffer,
    clear: Technique,
    rebuild: Technique,
    max_neighbors: u32,
}

impl NeighborIndex {
    /// Compiles the maintenance stages for the given capacity. The slot
    /// buffer starts empty; call [`resize`](Self::resize) when the particle
    /// population changes.
    pub fn new(ctx: &GpuContext, max_neighbors: u32) -> Result<Self, Error> {
        if max_neighbors == 0 {
            return Err(ConfigurationError::ZeroNeighborCapacity.into());
        }
        let clear = Technique::compile(
            ctx,
            "index clear",
            TechniqueDesc::Compute {
                source: clear_source(max_neighbors),
            },
        )?;
        let rebuild = Technique::compile(
            ctx,
            "index rebuild",
            TechniqueDesc::Compute {
                source: rebuild_source(max_neighbors),
            },
        )?;
        Ok(Self {
            buffer: DeviceBuffer::new(ctx, "neighbor index", 0, INDEX_USAGE),
            clear,
            rebuild,
            max_neighbors,
        })
    }

    /// Reallocates the slot buffer for `count` particles. Contents are
    /// undefined until the next clear and rebuild.
    pub fn resize(&mut self, ctx: &GpuContext, count: u32) {
        let size = count as u64 * self.max_neighbors as u64 * 4;
        self.buffer.set_size(ctx, size);
    }

    pub fn max_neighbors(&self) -> u32 {
        self.max_neighbors
    }

    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    /// Sets the neighborhood radius the rebuild compares against. With the
    /// default of zero the index comes out empty.
    pub fn set_radius(&mut self, h: f32) {
        self.rebuild.set_uniform("h", h);
    }

    /// Forwards a uniform to the rebuild stage; unknown names are a no-op.
    pub(crate) fn set_uniform(&mut self, name: &str, value: UniformValue) -> bool {
        self.rebuild.set_uniform(name, value)
    }

    /// Reads the whole slot buffer back, row-major by particle. Diagnostics
    /// and tests only.
    pub fn read(&self, ctx: &GpuContext) -> Result<Vec<u32>, Error> {
        let bytes = self.buffer.read_back(ctx, 0, self.buffer.size())?;
        Ok(bytes.chunks_exact(4).map(bytemuck::pod_read_unaligned).collect())
    }

    pub(crate) fn clear_stage(&self) -> &Technique {
        &self.clear
    }

    pub(crate) fn rebuild_stage(&self) -> &Technique {
        &self.rebuild
    }

    pub(crate) fn flush_uniforms(&mut self, ctx: &GpuContext) {
        self.clear.flush_uniforms(ctx);
        self.rebuild.flush_uniforms(ctx);
    }
}

/// Per-particle stage writing the sentinel into every slot.
fn clear_source(max_neighbors: u32) -> String {
    format!(
        r#"@group(0) @binding(1) var<storage, read_write> index: array<u32>;

const MAX_NEIGHBORS: u32 = {max_neighbors}u;
const EMPTY_SLOT: u32 = 0x{EMPTY_SLOT:08x}u;

@compute @workgroup_size(16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let count = arrayLength(&index) / MAX_NEIGHBORS;
    if (gid.x >= count) {{
        return;
    }}
    let base = gid.x * MAX_NEIGHBORS;
    for (var i = 0u; i < MAX_NEIGHBORS; i = i + 1u) {{
        index[base + i] = EMPTY_SLOT;
    }}
}}
"#
    )
}

/// Pairwise stage appending each candidate within the radius to the first
/// free slot of its particle's row. A particle records itself; readers that
/// must skip it compare ids.
fn rebuild_source(max_neighbors: u32) -> String {
    format!(
        r#"{particle_struct}
struct Params {{
    h: f32,
}}

@group(0) @binding(0) var<storage, read> particles: array<Particle>;
@group(0) @binding(1) var<storage, read_write> index: array<atomic<u32>>;
@group(0) @binding(2) var<uniform> params: Params;

const MAX_NEIGHBORS: u32 = {max_neighbors}u;
const EMPTY_SLOT: u32 = 0x{EMPTY_SLOT:08x}u;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let count = arrayLength(&particles);
    let particle = gid.x;
    let candidate = gid.y;
    if (particle >= count || candidate >= count) {{
        return;
    }}
    if (distance(particles[particle].position, particles[candidate].position) >= params.h) {{
        return;
    }}
    let base = particle * MAX_NEIGHBORS;
    for (var i = 0u; i < MAX_NEIGHBORS; i = i + 1u) {{
        if (atomicCompareExchangeWeak(&index[base + i], EMPTY_SLOT, candidate).exchanged) {{
            break;
        }}
    }}
}}
"#,
        particle_struct = particle::wgsl_struct(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_wgsl(source: &str) {
        let module = naga::front::wgsl::parse_str(source)
            .unwrap_or_else(|e| panic!("parse error: {}", e.emit_to_string(source)));
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .unwrap_or_else(|e| panic!("validation error: {}", e.emit_to_string(source)));
    }

    #[test]
    fn test_clear_source_validates() {
        for cap in [1, 16, 40] {
            let source = clear_source(cap);
            assert!(source.contains(&format!("{}u", cap)));
            assert!(source.contains("0xdeadbeefu"));
            validate_wgsl(&source);
        }
    }

    #[test]
    fn test_rebuild_source_validates() {
        let source = rebuild_source(40);
        assert!(source.contains("@workgroup_size(16, 16)"));
        assert!(source.contains("atomicCompareExchangeWeak"));
        validate_wgsl(&source);
    }
}
