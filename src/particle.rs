//! The particle record and everything derived from it.
//!
//! One field table describes the record. The host struct, the WGSL struct
//! text injected into stage sources, the vertex attributes, and all buffer
//! sizing derive from that table, so the host and shader views of a particle
//! cannot drift apart.

use glam::Vec2;

/// One field of the particle record.
#[derive(Debug, Clone, Copy)]
pub struct FieldDesc {
    pub name: &'static str,
    pub wgsl_type: &'static str,
    pub format: wgpu::VertexFormat,
    pub offset: u64,
}

/// The particle record's fields, in byte order.
///
/// The trailing host-side padding float is not listed; WGSL pads the struct
/// to the same 48-byte stride on its own.
pub const FIELDS: [FieldDesc; 7] = [
    FieldDesc { name: "position", wgsl_type: "vec2<f32>", format: wgpu::VertexFormat::Float32x2, offset: 0 },
    FieldDesc { name: "velocity", wgsl_type: "vec2<f32>", format: wgpu::VertexFormat::Float32x2, offset: 8 },
    FieldDesc { name: "force", wgsl_type: "vec2<f32>", format: wgpu::VertexFormat::Float32x2, offset: 16 },
    FieldDesc { name: "prev_force", wgsl_type: "vec2<f32>", format: wgpu::VertexFormat::Float32x2, offset: 24 },
    FieldDesc { name: "pressure", wgsl_type: "f32", format: wgpu::VertexFormat::Float32, offset: 32 },
    FieldDesc { name: "density", wgsl_type: "f32", format: wgpu::VertexFormat::Float32, offset: 36 },
    FieldDesc { name: "mass", wgsl_type: "f32", format: wgpu::VertexFormat::Float32, offset: 40 },
];

/// A single simulated particle, laid out identically on the host and the
/// device.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Particle {
    pub position: Vec2,
    pub velocity: Vec2,
    pub force: Vec2,
    pub prev_force: Vec2,
    pub pressure: f32,
    pub density: f32,
    pub mass: f32,
    _pad: f32,
}

impl Particle {
    /// Record stride in bytes, on the host and in storage buffers alike.
    pub const SIZE: u64 = std::mem::size_of::<Particle>() as u64;

    /// A particle at rest state: forces, pressure, and density zeroed.
    pub fn new(position: Vec2, velocity: Vec2, mass: f32) -> Self {
        Self {
            position,
            velocity,
            force: Vec2::ZERO,
            prev_force: Vec2::ZERO,
            pressure: 0.0,
            density: 0.0,
            mass,
            _pad: 0.0,
        }
    }

    /// Full-record vertex layout, one attribute per field at sequential
    /// shader locations. Render shaders may read any subset.
    pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: Particle::SIZE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &VERTEX_ATTRIBUTES,
        }
    }
}

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; FIELDS.len()] = vertex_attributes();

const fn vertex_attributes() -> [wgpu::VertexAttribute; FIELDS.len()] {
    let mut attrs = [wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32,
        offset: 0,
        shader_location: 0,
    }; FIELDS.len()];
    let mut i = 0;
    while i < FIELDS.len() {
        attrs[i] = wgpu::VertexAttribute {
            format: FIELDS[i].format,
            offset: FIELDS[i].offset,
            shader_location: i as u32,
        };
        i += 1;
    }
    attrs
}

/// WGSL declaration of the particle record, generated from [`FIELDS`].
/// Every stage source embeds this text.
pub fn wgsl_struct() -> String {
    let mut out = String::from("struct Particle {\n");
    for field in &FIELDS {
        out.push_str("    ");
        out.push_str(field.name);
        out.push_str(": ");
        out.push_str(field.wgsl_type);
        out.push_str(",\n");
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_48_bytes() {
        assert_eq!(std::mem::size_of::<Particle>(), 48);
        assert_eq!(Particle::SIZE, 48);
    }

    #[test]
    fn host_offsets_match_field_table() {
        let offsets = [
            std::mem::offset_of!(Particle, position),
            std::mem::offset_of!(Particle, velocity),
            std::mem::offset_of!(Particle, force),
            std::mem::offset_of!(Particle, prev_force),
            std::mem::offset_of!(Particle, pressure),
            std::mem::offset_of!(Particle, density),
            std::mem::offset_of!(Particle, mass),
        ];
        for (field, offset) in FIELDS.iter().zip(offsets) {
            assert_eq!(field.offset, offset as u64, "field {}", field.name);
        }
    }

    #[test]
    fn wgsl_struct_matches_host_layout() {
        let source = format!(
            r#"{}

@group(0) @binding(0) var<storage, read_write> particles: array<Particle>;

@compute @workgroup_size(16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    if (gid.x >= arrayLength(&particles)) {{
        return;
    }}
    particles[gid.x].pressure = 0.0;
}}
"#,
            wgsl_struct()
        );
        let module = naga::front::wgsl::parse_str(&source).expect("particle struct must parse");
        let (_, ty) = module
            .types
            .iter()
            .find(|(_, ty)| ty.name.as_deref() == Some("Particle"))
            .expect("Particle struct missing from module");
        let naga::TypeInner::Struct { members, span } = &ty.inner else {
            panic!("Particle is not a struct");
        };
        assert_eq!(*span as u64, Particle::SIZE);
        assert_eq!(members.len(), FIELDS.len());
        for (member, field) in members.iter().zip(FIELDS.iter()) {
            assert_eq!(member.name.as_deref(), Some(field.name));
            assert_eq!(member.offset as u64, field.offset, "field {}", field.name);
        }
    }

    #[test]
    fn vertex_layout_covers_every_field() {
        let layout = Particle::vertex_layout();
        assert_eq!(layout.array_stride, 48);
        assert_eq!(layout.attributes.len(), FIELDS.len());
        for (i, (attr, field)) in layout.attributes.iter().zip(FIELDS.iter()).enumerate() {
            assert_eq!(attr.shader_location, i as u32);
            assert_eq!(attr.offset, field.offset);
            assert_eq!(attr.format, field.format);
        }
    }
}
