//! Shader techniques.
//!
//! A technique is a compiled, validated, reflected program: a render pair,
//! a capture kernel, or a plain compute kernel. Construction front-loads
//! every check so the frame loop never sees a shader failure: sources are
//! parsed and validated with naga, entry points are resolved, and the
//! device-side pipeline is assembled under an error scope. The three
//! failure classes stay distinct in [`ShaderError`].
//!
//! Reflection drives the rest of the crate. Dispatch sizing reads the
//! workgroup size the compiled stage declared, bind groups are assembled
//! from the bindings the entry point actually uses, and uniform slots come
//! from the block layout naga computed.

use std::fmt;

use crate::context::GpuContext;
use crate::error::{ConfigurationError, Error, ShaderError};
use crate::inspect::TechniqueInfo;
use crate::particle;
use crate::uniforms::{UniformKind, UniformSlot, UniformTable, UniformValue};

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";
pub const COMPUTE_ENTRY: &str = "main";

/// Pipeline stage a shader source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        })
    }
}

impl ShaderStage {
    fn naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
        }
    }
}

/// Shader sources for one technique, tagged by role.
///
/// The role is decided here, once, instead of being inferred from which
/// source fields happen to be present.
pub enum TechniqueDesc {
    /// Point rendering: vertex entry `vs_main`, fragment entry `fs_main`.
    Render { vertex: String, fragment: String },
    /// Capture: a per-particle kernel (entry `main`) that writes whole
    /// records into the destination attached at capture point 0. `varyings`
    /// must name every particle field in record order.
    Capture { source: String, varyings: Vec<String> },
    /// In-place compute stage, entry `main`.
    Compute { source: String },
}

/// Resource a binding refers to, under the crate's binding conventions:
/// particles at group 0 binding 0, the neighbor index at group 0 binding 1,
/// the capture destination at group 1 binding 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResourceSlot {
    Particles,
    NeighborIndex,
    CaptureDest,
}

pub(crate) const PARTICLE_GROUP: u32 = 0;
pub(crate) const PARTICLE_BINDING: u32 = 0;
pub(crate) const INDEX_BINDING: u32 = 1;
pub(crate) const CAPTURE_GROUP: u32 = 1;
pub(crate) const CAPTURE_BINDING: u32 = 0;

/// One storage binding the entry point uses, with its observed access.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BindingUse {
    pub(crate) slot: ResourceSlot,
    pub(crate) group: u32,
    pub(crate) binding: u32,
    pub(crate) writes: bool,
}

#[derive(Debug)]
enum TechniqueKind {
    Render {
        vertex: wgpu::ShaderModule,
        fragment: wgpu::ShaderModule,
    },
    Capture {
        pipeline: wgpu::ComputePipeline,
        workgroup: [u32; 3],
    },
    Compute {
        pipeline: wgpu::ComputePipeline,
        workgroup: [u32; 3],
    },
}

#[derive(Debug)]
struct UniformBinding {
    group: u32,
    binding: u32,
    table: UniformTable,
    buffer: wgpu::Buffer,
}

/// A compiled, validated, reflected program.
#[derive(Debug)]
pub struct Technique {
    label: String,
    kind: TechniqueKind,
    bindings: Vec<BindingUse>,
    uniform: Option<UniformBinding>,
    info: TechniqueInfo,
}

impl Technique {
    /// Compiles, validates, links, and reflects a technique.
    ///
    /// Failures are fatal to construction and keep their class: parse
    /// errors come back as [`ShaderError::Compile`] with the offending
    /// stage, validation failures as [`ShaderError::Validate`], and
    /// entry-point or pipeline assembly problems as [`ShaderError::Link`].
    pub fn compile(ctx: &GpuContext, label: &str, desc: TechniqueDesc) -> Result<Technique, Error> {
        match desc {
            TechniqueDesc::Render { vertex, fragment } => {
                Self::compile_render(ctx, label, &vertex, &fragment)
            }
            TechniqueDesc::Capture { source, varyings } => {
                check_capture_varyings(&varyings)?;
                Self::compile_kernel(ctx, label, &source, true)
            }
            TechniqueDesc::Compute { source } => Self::compile_kernel(ctx, label, &source, false),
        }
    }

    fn compile_kernel(
        ctx: &GpuContext,
        label: &str,
        source: &str,
        capture: bool,
    ) -> Result<Technique, Error> {
        let (module, module_info) = parse_and_validate(ShaderStage::Compute, source)?;
        let (entry_index, entry) =
            find_entry(&module, ShaderStage::Compute, COMPUTE_ENTRY, label)?;
        let workgroup = entry.workgroup_size;
        let reflection = reflect(&module, &module_info, entry_index, capture)?;
        if capture
            && !reflection
                .bindings
                .iter()
                .any(|b| b.slot == ResourceSlot::CaptureDest && b.writes)
        {
            return Err(ConfigurationError::MissingCaptureWrite {
                label: label.to_string(),
            }
            .into());
        }

        let info = TechniqueInfo::from_modules(label, &[&module]);
        tracing::debug!("compiled {}", info);

        let device = ctx.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = create_module(ctx, label, source);
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: None,
            module: &shader,
            entry_point: Some(COMPUTE_ENTRY),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(ShaderError::Link {
                label: label.to_string(),
                log: e.to_string(),
            }
            .into());
        }

        let kind = if capture {
            TechniqueKind::Capture { pipeline, workgroup }
        } else {
            TechniqueKind::Compute { pipeline, workgroup }
        };
        Ok(Technique {
            label: label.to_string(),
            kind,
            bindings: reflection.bindings,
            uniform: build_uniform(ctx, label, reflection.uniform),
            info,
        })
    }

    fn compile_render(
        ctx: &GpuContext,
        label: &str,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<Technique, Error> {
        let (vs_module, vs_info) = parse_and_validate(ShaderStage::Vertex, vertex_src)?;
        let (fs_module, fs_info) = parse_and_validate(ShaderStage::Fragment, fragment_src)?;
        let (vs_entry, _) = find_entry(&vs_module, ShaderStage::Vertex, VERTEX_ENTRY, label)?;
        let (fs_entry, _) = find_entry(&fs_module, ShaderStage::Fragment, FRAGMENT_ENTRY, label)?;

        // Render techniques read particle data through vertex attributes,
        // never through storage bindings.
        let vs_refl = reflect(&vs_module, &vs_info, vs_entry, false)?;
        let fs_refl = reflect(&fs_module, &fs_info, fs_entry, false)?;
        if let Some(binding) = vs_refl.bindings.first().or(fs_refl.bindings.first()) {
            return Err(ConfigurationError::UnsupportedBinding {
                group: binding.group,
                binding: binding.binding,
            }
            .into());
        }
        let uniform = match (vs_refl.uniform, fs_refl.uniform) {
            (Some(a), Some(b)) if a.group == b.group && a.binding == b.binding => Some(a),
            (Some(_), Some(_)) => return Err(ConfigurationError::MultipleUniformBlocks.into()),
            (a, b) => a.or(b),
        };

        let info = TechniqueInfo::from_modules(label, &[&vs_module, &fs_module]);
        tracing::debug!("compiled {}", info);

        let device = ctx.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let vertex = create_module(ctx, label, vertex_src);
        let fragment = create_module(ctx, label, fragment_src);
        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(ShaderError::Link {
                label: label.to_string(),
                log: e.to_string(),
            }
            .into());
        }

        Ok(Technique {
            label: label.to_string(),
            kind: TechniqueKind::Render { vertex, fragment },
            bindings: Vec::new(),
            uniform: build_uniform(ctx, label, uniform),
            info,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Reflection snapshot for logs and tooling.
    pub fn info(&self) -> &TechniqueInfo {
        &self.info
    }

    /// Stages a uniform value for upload before the technique next runs.
    /// Unknown names and type mismatches are a logged no-op returning
    /// false.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> bool {
        match &mut self.uniform {
            Some(u) => u.table.set(name, value.into()),
            None => {
                tracing::debug!("technique '{}' declares no uniforms", self.label);
                false
            }
        }
    }

    /// Reads back the staged value of a uniform, if the program declares
    /// it.
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniform.as_ref()?.table.get(name)
    }

    /// Staged value of a float uniform, if the program declares one by
    /// that name.
    pub fn uniform_f32(&self, name: &str) -> Option<f32> {
        match self.uniform(name) {
            Some(UniformValue::F32(v)) => Some(v),
            _ => None,
        }
    }

    /// Staged value of an unsigned integer uniform, if the program
    /// declares one by that name.
    pub fn uniform_u32(&self, name: &str) -> Option<u32> {
        match self.uniform(name) {
            Some(UniformValue::U32(v)) => Some(v),
            _ => None,
        }
    }

    /// Uploads staged uniform bytes if anything changed since the last
    /// flush.
    pub(crate) fn flush_uniforms(&mut self, ctx: &GpuContext) {
        if let Some(u) = &mut self.uniform {
            if u.table.take_dirty() {
                ctx.queue().write_buffer(&u.buffer, 0, u.table.bytes());
            }
        }
    }

    pub(crate) fn is_capture(&self) -> bool {
        matches!(self.kind, TechniqueKind::Capture { .. })
    }

    pub(crate) fn is_compute(&self) -> bool {
        matches!(self.kind, TechniqueKind::Compute { .. })
    }

    pub(crate) fn is_render(&self) -> bool {
        matches!(self.kind, TechniqueKind::Render { .. })
    }

    pub(crate) fn compute_pipeline(&self) -> Option<&wgpu::ComputePipeline> {
        match &self.kind {
            TechniqueKind::Capture { pipeline, .. } | TechniqueKind::Compute { pipeline, .. } => {
                Some(pipeline)
            }
            TechniqueKind::Render { .. } => None,
        }
    }

    /// Workgroup size the compiled stage declared. Dispatch sizing always
    /// uses this, so host and shader cannot disagree.
    pub fn workgroup_size(&self) -> [u32; 3] {
        match &self.kind {
            TechniqueKind::Capture { workgroup, .. } | TechniqueKind::Compute { workgroup, .. } => {
                *workgroup
            }
            TechniqueKind::Render { .. } => [1, 1, 1],
        }
    }

    pub(crate) fn render_modules(&self) -> Option<(&wgpu::ShaderModule, &wgpu::ShaderModule)> {
        match &self.kind {
            TechniqueKind::Render { vertex, fragment } => Some((vertex, fragment)),
            _ => None,
        }
    }

    pub(crate) fn bindings(&self) -> &[BindingUse] {
        &self.bindings
    }

    pub(crate) fn touches(&self, slot: ResourceSlot) -> bool {
        self.bindings.iter().any(|b| b.slot == slot)
    }

    pub(crate) fn writes(&self, slot: ResourceSlot) -> bool {
        self.bindings.iter().any(|b| b.slot == slot && b.writes)
    }

    /// Uniform bind group entry, if the program declares and uses a block.
    pub(crate) fn uniform_entry(&self) -> Option<(u32, u32, wgpu::BindingResource<'_>)> {
        self.uniform
            .as_ref()
            .map(|u| (u.group, u.binding, u.buffer.as_entire_binding()))
    }
}

fn create_module(ctx: &GpuContext, label: &str, source: &str) -> wgpu::ShaderModule {
    ctx.device()
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        })
}

/// Parses and validates one WGSL source, keeping naga's diagnostics
/// verbatim.
fn parse_and_validate(
    stage: ShaderStage,
    source: &str,
) -> Result<(naga::Module, naga::valid::ModuleInfo), ShaderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Compile {
        stage,
        log: e.emit_to_string(source),
    })?;
    let module_info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| ShaderError::Validate {
        stage,
        log: e.emit_to_string(source),
    })?;
    Ok((module, module_info))
}

fn find_entry<'a>(
    module: &'a naga::Module,
    stage: ShaderStage,
    name: &str,
    label: &str,
) -> Result<(usize, &'a naga::EntryPoint), ShaderError> {
    let found = module
        .entry_points
        .iter()
        .enumerate()
        .find(|(_, ep)| ep.name == name && ep.stage == stage.naga());
    found.ok_or_else(|| ShaderError::Link {
        label: label.to_string(),
        log: format!("missing {} entry point '{}'", stage, name),
    })
}

#[derive(Debug)]
struct UniformReflection {
    group: u32,
    binding: u32,
    slots: Vec<UniformSlot>,
    size: usize,
}

#[derive(Debug)]
struct Reflection {
    bindings: Vec<BindingUse>,
    uniform: Option<UniformReflection>,
}

/// Collects the bindings one entry point actually uses.
///
/// Auto pipeline layouts only contain used bindings, so declared-but-unused
/// globals are skipped here too; the bind groups assembled from this list
/// always match the pipeline's layout.
fn reflect(
    module: &naga::Module,
    module_info: &naga::valid::ModuleInfo,
    entry_index: usize,
    capture: bool,
) -> Result<Reflection, Error> {
    let usage = module_info.get_entry_point(entry_index);
    let mut bindings = Vec::new();
    let mut uniform: Option<UniformReflection> = None;

    for (handle, var) in module.global_variables.iter() {
        let Some(res) = &var.binding else { continue };
        if usage[handle].is_empty() {
            continue;
        }
        match var.space {
            naga::AddressSpace::Storage { .. } => {
                let slot = match (res.group, res.binding) {
                    (PARTICLE_GROUP, PARTICLE_BINDING) => ResourceSlot::Particles,
                    (PARTICLE_GROUP, INDEX_BINDING) => ResourceSlot::NeighborIndex,
                    (CAPTURE_GROUP, CAPTURE_BINDING) if capture => ResourceSlot::CaptureDest,
                    _ => {
                        return Err(ConfigurationError::UnsupportedBinding {
                            group: res.group,
                            binding: res.binding,
                        }
                        .into())
                    }
                };
                bindings.push(BindingUse {
                    slot,
                    group: res.group,
                    binding: res.binding,
                    writes: usage[handle].contains(naga::valid::GlobalUse::WRITE),
                });
            }
            naga::AddressSpace::Uniform => {
                if uniform.is_some() {
                    return Err(ConfigurationError::MultipleUniformBlocks.into());
                }
                uniform = Some(reflect_uniform_block(module, var, res)?);
            }
            _ => {
                return Err(ConfigurationError::UnsupportedBinding {
                    group: res.group,
                    binding: res.binding,
                }
                .into())
            }
        }
    }

    Ok(Reflection { bindings, uniform })
}

fn reflect_uniform_block(
    module: &naga::Module,
    var: &naga::GlobalVariable,
    res: &naga::ResourceBinding,
) -> Result<UniformReflection, Error> {
    let naga::TypeInner::Struct { members, span } = &module.types[var.ty].inner else {
        return Err(ConfigurationError::UnsupportedUniformMember {
            name: var.name.clone().unwrap_or_default(),
        }
        .into());
    };
    let mut slots = Vec::with_capacity(members.len());
    for member in members {
        let name = member.name.clone().unwrap_or_default();
        let kind = member_kind(module, member.ty).ok_or(ConfigurationError::UnsupportedUniformMember {
            name: name.clone(),
        })?;
        slots.push(UniformSlot {
            name,
            kind,
            offset: member.offset,
        });
    }
    // Round the buffer up to 16 bytes; the block's minimum binding size is
    // covered either way.
    let size = (*span as usize + 15) & !15;
    Ok(UniformReflection {
        group: res.group,
        binding: res.binding,
        slots,
        size,
    })
}

fn member_kind(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Option<UniformKind> {
    match &module.types[ty].inner {
        naga::TypeInner::Scalar(scalar) => match (scalar.kind, scalar.width) {
            (naga::ScalarKind::Float, 4) => Some(UniformKind::F32),
            (naga::ScalarKind::Sint, 4) => Some(UniformKind::I32),
            (naga::ScalarKind::Uint, 4) => Some(UniformKind::U32),
            _ => None,
        },
        naga::TypeInner::Vector { size, scalar }
            if scalar.kind == naga::ScalarKind::Float && scalar.width == 4 =>
        {
            match size {
                naga::VectorSize::Bi => Some(UniformKind::Vec2),
                naga::VectorSize::Tri => Some(UniformKind::Vec3),
                naga::VectorSize::Quad => Some(UniformKind::Vec4),
            }
        }
        _ => None,
    }
}

fn build_uniform(
    ctx: &GpuContext,
    label: &str,
    reflection: Option<UniformReflection>,
) -> Option<UniformBinding> {
    reflection.map(|r| {
        let buffer = ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} uniforms", label)),
            size: r.size as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        UniformBinding {
            group: r.group,
            binding: r.binding,
            table: UniformTable::new(r.slots, r.size),
            buffer,
        }
    })
}

/// The captured field list is declarative: it must restate the whole
/// record, in record order, or the capture layout would silently disagree
/// with every other consumer of the buffer.
fn check_capture_varyings(varyings: &[String]) -> Result<(), ConfigurationError> {
    let expected: Vec<&str> = particle::FIELDS.iter().map(|f| f.name).collect();
    let matches = varyings.len() == expected.len()
        && varyings.iter().zip(&expected).all(|(a, b)| a.as_str() == *b);
    if !matches {
        return Err(ConfigurationError::CaptureVaryings {
            expected: expected.join(", "),
            found: varyings.join(", "),
        });
    }
    Ok(())
}
