//! Technique introspection for logs and tooling.
//!
//! The report is a snapshot of what the compiler reflected out of a
//! technique's modules: uniform members with their offsets, and storage
//! blocks with their bindings, access, and member layout. Orchestration
//! never consults it.

use std::fmt;

/// Reflection snapshot of one technique.
#[derive(Debug, Clone)]
pub struct TechniqueInfo {
    pub label: String,
    pub uniforms: Vec<UniformInfo>,
    pub storage_blocks: Vec<StorageBlockInfo>,
}

#[derive(Debug, Clone)]
pub struct UniformInfo {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub offset: u32,
    pub ty: String,
}

#[derive(Debug, Clone)]
pub struct StorageBlockInfo {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub access: String,
    pub members: Vec<MemberInfo>,
}

#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub name: String,
    pub offset: u32,
}

impl TechniqueInfo {
    /// Collects uniform members and storage blocks from each module's
    /// declared globals.
    pub(crate) fn from_modules(label: &str, modules: &[&naga::Module]) -> Self {
        let mut info = Self {
            label: label.to_string(),
            uniforms: Vec::new(),
            storage_blocks: Vec::new(),
        };
        for module in modules {
            for (_, var) in module.global_variables.iter() {
                let Some(res) = &var.binding else { continue };
                let name = var.name.clone().unwrap_or_default();
                match var.space {
                    naga::AddressSpace::Uniform => {
                        for member in struct_members(module, var.ty) {
                            info.uniforms.push(UniformInfo {
                                name: member.name,
                                group: res.group,
                                binding: res.binding,
                                offset: member.offset,
                                ty: member.ty,
                            });
                        }
                    }
                    naga::AddressSpace::Storage { access } => {
                        let access = if access.contains(naga::StorageAccess::STORE) {
                            "read_write".to_string()
                        } else {
                            "read".to_string()
                        };
                        info.storage_blocks.push(StorageBlockInfo {
                            name,
                            group: res.group,
                            binding: res.binding,
                            access,
                            members: struct_members(module, var.ty)
                                .into_iter()
                                .map(|m| MemberInfo {
                                    name: m.name,
                                    offset: m.offset,
                                })
                                .collect(),
                        });
                    }
                    _ => {}
                }
            }
        }
        info
    }
}

struct ReflectedMember {
    name: String,
    offset: u32,
    ty: String,
}

/// Members of a struct-typed global. A runtime-sized array of structs
/// reports the element struct's members.
fn struct_members(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Vec<ReflectedMember> {
    match &module.types[ty].inner {
        naga::TypeInner::Struct { members, .. } => members
            .iter()
            .map(|m| ReflectedMember {
                name: m.name.clone().unwrap_or_default(),
                offset: m.offset,
                ty: type_name(module, m.ty),
            })
            .collect(),
        naga::TypeInner::Array { base, .. } => struct_members(module, *base),
        _ => Vec::new(),
    }
}

fn type_name(module: &naga::Module, ty: naga::Handle<naga::Type>) -> String {
    let ty = &module.types[ty];
    if let Some(name) = &ty.name {
        return name.clone();
    }
    match &ty.inner {
        naga::TypeInner::Scalar(s) => scalar_name(*s).to_string(),
        naga::TypeInner::Vector { size, scalar } => {
            format!("vec{}<{}>", *size as u8, scalar_name(*scalar))
        }
        naga::TypeInner::Atomic(s) => format!("atomic<{}>", scalar_name(*s)),
        naga::TypeInner::Array { base, .. } => format!("array<{}>", type_name(module, *base)),
        other => format!("{:?}", other),
    }
}

fn scalar_name(scalar: naga::Scalar) -> &'static str {
    match (scalar.kind, scalar.width) {
        (naga::ScalarKind::Float, 4) => "f32",
        (naga::ScalarKind::Sint, 4) => "i32",
        (naga::ScalarKind::Uint, 4) => "u32",
        (naga::ScalarKind::Bool, _) => "bool",
        _ => "?",
    }
}

impl fmt::Display for TechniqueInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "technique '{}'", self.label)?;
        for u in &self.uniforms {
            writeln!(
                f,
                "  uniform {}: {} (group {}, binding {}, offset {})",
                u.name, u.ty, u.group, u.binding, u.offset
            )?;
        }
        for block in &self.storage_blocks {
            writeln!(
                f,
                "  storage {} (group {}, binding {}, {})",
                block.name, block.group, block.binding, block.access
            )?;
            for m in &block.members {
                writeln!(f, "    {} @{}", m.name, m.offset)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
struct Particle {
    position: vec2<f32>,
    velocity: vec2<f32>,
}

struct Params {
    dt: f32,
    count: u32,
}

@group(0) @binding(0) var<storage, read_write> particles: array<Particle>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.count) {
        return;
    }
    particles[gid.x].position += particles[gid.x].velocity * params.dt;
}
"#;

    #[test]
    fn test_reports_uniform_members_with_offsets() {
        let module = naga::front::wgsl::parse_str(SOURCE).unwrap();
        let info = TechniqueInfo::from_modules("advect", &[&module]);
        assert_eq!(info.uniforms.len(), 2);
        assert_eq!(info.uniforms[0].name, "dt");
        assert_eq!(info.uniforms[0].offset, 0);
        assert_eq!(info.uniforms[0].ty, "f32");
        assert_eq!(info.uniforms[1].name, "count");
        assert_eq!(info.uniforms[1].offset, 4);
        assert_eq!(info.uniforms[1].binding, 2);
    }

    #[test]
    fn test_reports_storage_blocks_with_element_members() {
        let module = naga::front::wgsl::parse_str(SOURCE).unwrap();
        let info = TechniqueInfo::from_modules("advect", &[&module]);
        assert_eq!(info.storage_blocks.len(), 1);
        let block = &info.storage_blocks[0];
        assert_eq!(block.name, "particles");
        assert_eq!(block.binding, 0);
        assert_eq!(block.access, "read_write");
        assert_eq!(block.members.len(), 2);
        assert_eq!(block.members[0].name, "position");
        assert_eq!(block.members[1].offset, 8);
    }

    #[test]
    fn test_display_names_every_binding() {
        let module = naga::front::wgsl::parse_str(SOURCE).unwrap();
        let info = TechniqueInfo::from_modules("advect", &[&module]);
        let text = info.to_string();
        assert!(text.contains("technique 'advect'"));
        assert!(text.contains("uniform dt: f32"));
        assert!(text.contains("storage particles"));
    }
}
