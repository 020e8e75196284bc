//! Shipped SPH stage library.
//!
//! WGSL sources for the standard stage chain: density and pressure from the
//! poly6 kernel, pressure and viscosity forces from the spiky gradient and
//! viscosity laplacian, leapfrog integration, and boundary reflection.
//! There is also a capture-variant advection kernel and a default point
//! render technique. Every source embeds the record struct from
//! [`particle::wgsl_struct`], and the index-walking stages take the same
//! neighbor capacity the [`NeighborIndex`](crate::NeighborIndex) was built
//! with.
//!
//! Tuning constants keep their historical uniform names (`h`, `k`, `g`,
//! `mu`, `dt`, `damping_coeff`); [`SphConfig`] broadcasts them to every
//! stage that declares them.

use crate::context::GpuContext;
use crate::error::Error;
use crate::index::EMPTY_SLOT;
use crate::particle;
use crate::pipeline::Pipeline;
use crate::technique::{Technique, TechniqueDesc};

/// Tuning constants with the historical defaults.
#[derive(Debug, Clone, Copy)]
pub struct SphConfig {
    /// Smoothing radius `h`, shared by the index rebuild and the kernels.
    pub smoothing_radius: f32,
    /// Equation-of-state stiffness `k` (pressure = k * density).
    pub stiffness: f32,
    /// Downward gravity scale `g`.
    pub gravity: f32,
    /// Viscosity coefficient `mu`.
    pub viscosity: f32,
    /// Integration step `dt`.
    pub dt: f32,
    /// Wall rebound damping `damping_coeff`.
    pub damping: f32,
}

impl Default for SphConfig {
    fn default() -> Self {
        Self {
            smoothing_radius: 0.05,
            stiffness: 0.01,
            gravity: 2.0,
            viscosity: 5.0,
            dt: 0.01,
            damping: 0.9,
        }
    }
}

impl SphConfig {
    /// Stages every constant into each pipeline stage that declares the
    /// matching uniform; stages without it are untouched.
    pub fn apply(&self, pipeline: &mut Pipeline) {
        pipeline.set_uniform_all("h", self.smoothing_radius);
        pipeline.set_uniform_all("k", self.stiffness);
        pipeline.set_uniform_all("g", self.gravity);
        pipeline.set_uniform_all("mu", self.viscosity);
        pipeline.set_uniform_all("dt", self.dt);
        pipeline.set_uniform_all("damping_coeff", self.damping);
    }
}

/// Compiles the standard update chain in execution order.
pub fn update_stages(ctx: &GpuContext, max_neighbors: u32) -> Result<Vec<Technique>, Error> {
    Ok(vec![
        Technique::compile(ctx, "density pressure", density_pressure(max_neighbors))?,
        Technique::compile(ctx, "accumulate forces", accumulate_forces(max_neighbors))?,
        Technique::compile(ctx, "leapfrog", leapfrog())?,
        Technique::compile(ctx, "reflect boundaries", reflect_boundaries())?,
    ])
}

/// Density from the poly6 kernel over the neighbor index, then pressure
/// through the linear equation of state.
pub fn density_pressure(max_neighbors: u32) -> TechniqueDesc {
    TechniqueDesc::Compute {
        source: format!(
            r#"{particle_struct}
struct Params {{
    h: f32,
    k: f32,
}}

@group(0) @binding(0) var<storage, read_write> particles: array<Particle>;
@group(0) @binding(1) var<storage, read> index: array<u32>;
@group(0) @binding(2) var<uniform> params: Params;

const MAX_NEIGHBORS: u32 = {max_neighbors}u;
const EMPTY_SLOT: u32 = 0x{EMPTY_SLOT:08x}u;
const PI: f32 = 3.14159265358979;

@compute @workgroup_size(16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let count = arrayLength(&particles);
    if (gid.x >= count) {{
        return;
    }}
    let h = params.h;
    let poly6_coeff = 315.0 / (64.0 * PI * pow(h, 9.0));
    let p = particles[gid.x];
    var density = 0.0;
    let base = gid.x * MAX_NEIGHBORS;
    for (var i = 0u; i < MAX_NEIGHBORS; i = i + 1u) {{
        let neighbor = index[base + i];
        if (neighbor == EMPTY_SLOT) {{
            break;
        }}
        let o = particles[neighbor];
        let dr = p.position - o.position;
        let dr2 = dot(dr, dr);
        if (dr2 < h * h) {{
            let w = h * h - dr2;
            density += o.mass * poly6_coeff * w * w * w;
        }}
    }}
    particles[gid.x].density = density;
    particles[gid.x].pressure = params.k * density;
}}
"#,
            particle_struct = particle::wgsl_struct(),
        ),
    }
}

/// Pressure and viscosity forces over the neighbor index, plus gravity
/// scaled by density. The previous total is kept in `prev_force`.
pub fn accumulate_forces(max_neighbors: u32) -> TechniqueDesc {
    TechniqueDesc::Compute {
        source: format!(
            r#"{particle_struct}
struct Params {{
    h: f32,
    g: f32,
    mu: f32,
}}

@group(0) @binding(0) var<storage, read_write> particles: array<Particle>;
@group(0) @binding(1) var<storage, read> index: array<u32>;
@group(0) @binding(2) var<uniform> params: Params;

const MAX_NEIGHBORS: u32 = {max_neighbors}u;
const EMPTY_SLOT: u32 = 0x{EMPTY_SLOT:08x}u;
const PI: f32 = 3.14159265358979;

fn spiky_gradient(r: vec2<f32>, h: f32) -> vec2<f32> {{
    let len = length(r);
    if (len >= h || len <= 0.0) {{
        return vec2<f32>(0.0);
    }}
    let d = h - len;
    return -45.0 / (PI * pow(h, 6.0)) * d * d * normalize(r);
}}

fn viscosity_laplacian(r: f32, h: f32) -> f32 {{
    if (r >= h) {{
        return 0.0;
    }}
    return 45.0 / (PI * pow(h, 6.0)) * (h - r);
}}

@compute @workgroup_size(16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let count = arrayLength(&particles);
    if (gid.x >= count) {{
        return;
    }}
    let p = particles[gid.x];
    var f_pressure = vec2<f32>(0.0);
    var f_viscosity = vec2<f32>(0.0);
    let base = gid.x * MAX_NEIGHBORS;
    for (var i = 0u; i < MAX_NEIGHBORS; i = i + 1u) {{
        let neighbor = index[base + i];
        if (neighbor == EMPTY_SLOT) {{
            break;
        }}
        if (neighbor == gid.x) {{
            continue;
        }}
        let o = particles[neighbor];
        let to_p = p.position - o.position;
        f_pressure += -(o.mass / o.density) * 0.5 * (o.pressure + p.pressure) * spiky_gradient(to_p, params.h);
        f_viscosity += (o.mass / o.density) * (o.velocity - p.velocity) * viscosity_laplacian(length(to_p), params.h);
    }}
    let f_gravity = vec2<f32>(0.0, -p.density * params.g);
    particles[gid.x].prev_force = p.force;
    particles[gid.x].force = f_pressure + f_gravity + params.mu * f_viscosity;
}}
"#,
            particle_struct = particle::wgsl_struct(),
        ),
    }
}

/// Position then velocity from the accumulated force.
pub fn leapfrog() -> TechniqueDesc {
    TechniqueDesc::Compute {
        source: format!(
            r#"{particle_struct}
struct Params {{
    dt: f32,
}}

@group(0) @binding(0) var<storage, read_write> particles: array<Particle>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    if (gid.x >= arrayLength(&particles)) {{
        return;
    }}
    let p = particles[gid.x];
    let a = p.force / p.mass;
    let dt = params.dt;
    particles[gid.x].position = p.position + p.velocity * dt + a * dt * dt / 2.0;
    particles[gid.x].velocity = p.velocity + a * dt;
}}
"#,
            particle_struct = particle::wgsl_struct(),
        ),
    }
}

/// Velocity reflection with damping at the tank walls. Positions are left
/// alone; the next integration step carries the particle back inside.
pub fn reflect_boundaries() -> TechniqueDesc {
    TechniqueDesc::Compute {
        source: format!(
            r#"{particle_struct}
struct Params {{
    damping_coeff: f32,
}}

@group(0) @binding(0) var<storage, read_write> particles: array<Particle>;
@group(0) @binding(2) var<uniform> params: Params;

const HALF_WIDTH: f32 = 0.5;
const HALF_HEIGHT: f32 = 0.8;

@compute @workgroup_size(16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    if (gid.x >= arrayLength(&particles)) {{
        return;
    }}
    var p = particles[gid.x];
    if (p.position.y >= HALF_HEIGHT) {{
        p.velocity = params.damping_coeff * reflect(p.velocity, vec2<f32>(0.0, -1.0));
    }}
    if (p.position.y <= -HALF_HEIGHT) {{
        p.velocity = params.damping_coeff * reflect(p.velocity, vec2<f32>(0.0, 1.0));
    }}
    if (p.position.x >= HALF_WIDTH) {{
        p.velocity = params.damping_coeff * reflect(p.velocity, vec2<f32>(-1.0, 0.0));
    }}
    if (p.position.x <= -HALF_WIDTH) {{
        p.velocity = params.damping_coeff * reflect(p.velocity, vec2<f32>(1.0, 0.0));
    }}
    particles[gid.x] = p;
}}
"#,
            particle_struct = particle::wgsl_struct(),
        ),
    }
}

/// Capture-variant advection: constant-gravity Euler step with wall
/// bounces, writing the advanced records to the capture destination.
pub fn capture_advect() -> TechniqueDesc {
    TechniqueDesc::Capture {
        source: format!(
            r#"{particle_struct}
struct Params {{
    dt: f32,
    gravity: vec2<f32>,
}}

@group(0) @binding(0) var<storage, read> particles: array<Particle>;
@group(0) @binding(2) var<uniform> params: Params;
@group(1) @binding(0) var<storage, read_write> captured: array<Particle>;

const BOUND: f32 = 0.8;
const WALL_DAMPING: f32 = 0.99;

@compute @workgroup_size(16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    if (gid.x >= arrayLength(&particles)) {{
        return;
    }}
    var p = particles[gid.x];
    let dt = params.dt;
    p.position += p.velocity * dt + params.gravity * dt * dt / 2.0;
    p.velocity += params.gravity * dt;

    if (p.position.y > BOUND) {{
        p.velocity = WALL_DAMPING * reflect(p.velocity, vec2<f32>(0.0, -1.0));
        p.position.y = BOUND;
    }}
    if (p.position.y < -BOUND) {{
        p.velocity = WALL_DAMPING * reflect(p.velocity, vec2<f32>(0.0, 1.0));
        p.position.y = -BOUND;
    }}
    if (p.position.x > BOUND) {{
        p.velocity = WALL_DAMPING * reflect(p.velocity, vec2<f32>(-1.0, 0.0));
        p.position.x = BOUND;
    }}
    if (p.position.x < -BOUND) {{
        p.velocity = WALL_DAMPING * reflect(p.velocity, vec2<f32>(1.0, 0.0));
        p.position.x = -BOUND;
    }}
    captured[gid.x] = p;
}}
"#,
            particle_struct = particle::wgsl_struct(),
        ),
        varyings: particle::FIELDS.iter().map(|f| f.name.to_string()).collect(),
    }
}

/// Default point rendering: position to clip space, color by speed.
pub fn point_render() -> TechniqueDesc {
    TechniqueDesc::Render {
        vertex: r#"struct VsOut {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec3<f32>,
}

@vertex
fn vs_main(
    @location(0) position: vec2<f32>,
    @location(1) velocity: vec2<f32>,
) -> VsOut {
    var out: VsOut;
    out.clip_position = vec4<f32>(position, 0.0, 1.0);
    let speed = clamp(length(velocity) * 4.0, 0.0, 1.0);
    out.color = mix(vec3<f32>(0.18, 0.38, 0.95), vec3<f32>(0.95, 0.97, 1.0), speed);
    return out;
}
"#
        .to_string(),
        fragment: r#"@fragment
fn fs_main(@location(0) color: vec3<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(color, 1.0);
}
"#
        .to_string(),
    }
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

    fn compute_source(desc: TechniqueDesc) -> String {
        match desc {
            TechniqueDesc::Compute { source } => source,
            TechniqueDesc::Capture { source, .. } => source,
            TechniqueDesc::Render { .. } => panic!("not a kernel"),
        }
    }

    #[test]
    fn test_every_kernel_source_validates() {
        for desc in [
            density_pressure(40),
            accumulate_forces(40),
            leapfrog(),
            reflect_boundaries(),
            capture_advect(),
        ] {
            validate_wgsl(&compute_source(desc));
        }
    }

    #[test]
    fn test_render_sources_validate() {
        let TechniqueDesc::Render { vertex, fragment } = point_render() else {
            panic!("not a render pair");
        };
        validate_wgsl(&vertex);
        validate_wgsl(&fragment);
    }

    #[test]
    fn test_index_walking_stages_embed_the_capacity() {
        for desc in [density_pressure(24), accumulate_forces(24)] {
            let source = compute_source(desc);
            assert!(source.contains("MAX_NEIGHBORS: u32 = 24u"));
            assert!(source.contains("0xdeadbeefu"));
        }
    }

    #[test]
    fn test_capture_varyings_restate_the_record() {
        let TechniqueDesc::Capture { varyings, .. } = capture_advect() else {
            panic!("not a capture stage");
        };
        let expected: Vec<String> = particle::FIELDS.iter().map(|f| f.name.to_string()).collect();
        assert_eq!(varyings, expected);
    }

    #[test]
    fn test_kernels_declare_the_expected_workgroups() {
        let source = compute_source(density_pressure(40));
        let module = naga::front::wgsl::parse_str(&source).unwrap();
        assert_eq!(module.entry_points[0].workgroup_size, [16, 1, 1]);
    }
}
