//! The unified frame pipeline.
//!
//! One type drives both update flavors. A pipeline holds a render technique,
//! an optional neighbor index, and a list of update stages that are either
//! all in-place compute kernels or exactly one capture kernel. `update`
//! encodes a single submission per frame: index clear, index rebuild, then
//! every stage, one compute pass apiece. Pass boundaries are the memory
//! barriers; the schedule is validated at build time so a stage can never
//! observe a half-written resource.
//!
//! Bindings are pass-scoped. Bind groups are assembled from each stage's
//! reflection right before its pass and dropped with it, so a reallocated
//! particle or index buffer can never leak a stale binding into the next
//! frame.
//!
//! Rendering draws one point per particle. The in-place flavor draws the
//! front buffer; the capture flavor draws the freshly captured back buffer
//! and then swaps, so the next update reads what was just produced.

use crate::buffer::DeviceBuffer;
use crate::buffer_set::ParticleBufferSet;
use crate::capture::CaptureTarget;
use crate::context::GpuContext;
use crate::error::{ConfigurationError, Error, ShaderError};
use crate::index::NeighborIndex;
use crate::particle::Particle;
use crate::technique::{
    ResourceSlot, Technique, CAPTURE_GROUP, FRAGMENT_ENTRY, PARTICLE_GROUP, VERTEX_ENTRY,
};
use crate::uniforms::UniformValue;

/// Counters for the frames rendered so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Render calls issued.
    pub frames: u64,
    /// Particle count of the most recent render call.
    pub last_drawn: u32,
}

/// One scheduled compute pass and the resources it touches.
#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub(crate) label: String,
    pub(crate) reads: Vec<ResourceSlot>,
    pub(crate) writes: Vec<ResourceSlot>,
    pub(crate) barrier_after: bool,
}

enum UpdateMode {
    InPlace,
    Capture(CaptureTarget),
}

/// Assembles a [`Pipeline`] from compiled techniques.
pub struct PipelineBuilder {
    render: Technique,
    stages: Vec<Technique>,
    max_neighbors: Option<u32>,
    target_format: wgpu::TextureFormat,
    clear_color: wgpu::Color,
    particles: Vec<Particle>,
}

impl PipelineBuilder {
    pub fn new(render: Technique) -> Self {
        Self {
            render,
            stages: Vec::new(),
            max_neighbors: None,
            target_format: wgpu::TextureFormat::Rgba8Unorm,
            clear_color: wgpu::Color::BLACK,
            particles: Vec::new(),
        }
    }

    /// Appends an update stage; stages run in insertion order.
    pub fn add_update_stage(mut self, stage: Technique) -> Self {
        self.stages.push(stage);
        self
    }

    /// Gives the pipeline a neighbor index with the given per-particle
    /// capacity. Stages that walk the index must be generated for the same
    /// capacity.
    pub fn with_neighbor_index(mut self, max_neighbors: u32) -> Self {
        self.max_neighbors = Some(max_neighbors);
        self
    }

    /// Color target format the render technique draws into.
    pub fn with_target_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.target_format = format;
        self
    }

    pub fn with_clear_color(mut self, color: wgpu::Color) -> Self {
        self.clear_color = color;
        self
    }

    /// Initial particle population, uploaded during `build`.
    pub fn with_particles(mut self, particles: &[Particle]) -> Self {
        self.particles = particles.to_vec();
        self
    }

    /// Checks the stage roster, builds the render pipeline and neighbor
    /// index, validates the pass schedule, and uploads the initial
    /// particles.
    pub fn build(self, ctx: &GpuContext) -> Result<Pipeline, Error> {
        let PipelineBuilder {
            render,
            stages,
            max_neighbors,
            target_format,
            clear_color,
            particles,
        } = self;

        let Some((vertex_module, fragment_module)) = render.render_modules() else {
            return Err(ConfigurationError::WrongKind {
                label: render.label().to_string(),
                expected: "render",
            }
            .into());
        };
        if let Some(stage) = stages.iter().find(|s| s.is_render()) {
            return Err(ConfigurationError::WrongKind {
                label: stage.label().to_string(),
                expected: "compute",
            }
            .into());
        }
        let captures = stages.iter().filter(|s| s.is_capture()).count();
        if captures > 1 {
            return Err(ConfigurationError::MultipleCaptureStages.into());
        }
        if captures == 1 && stages.len() > 1 {
            return Err(ConfigurationError::MixedUpdateStages.into());
        }
        for technique in stages.iter().chain(std::iter::once(&render)) {
            if let Some((group, binding, _)) = technique.uniform_entry() {
                if group != PARTICLE_GROUP {
                    return Err(ConfigurationError::UnsupportedBinding { group, binding }.into());
                }
            }
        }
        if max_neighbors.is_none() {
            if let Some(stage) = stages.iter().find(|s| s.touches(ResourceSlot::NeighborIndex)) {
                return Err(ConfigurationError::MissingNeighborIndex {
                    stage: stage.label().to_string(),
                }
                .into());
            }
        }

        let mut index = match max_neighbors {
            Some(max) => Some(NeighborIndex::new(ctx, max)?),
            None => None,
        };

        let mut schedule = Vec::new();
        if let Some(index) = &index {
            schedule.push(step_for(index.clear_stage()));
            schedule.push(step_for(index.rebuild_stage()));
        }
        schedule.extend(stages.iter().map(step_for));
        validate_order(&schedule)?;
        for step in &schedule {
            tracing::debug!("scheduled pass '{}'", step.label);
        }

        let device = ctx.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(render.label()),
            layout: None,
            vertex: wgpu::VertexState {
                module: vertex_module,
                entry_point: Some(VERTEX_ENTRY),
                compilation_options: Default::default(),
                buffers: &[Particle::vertex_layout()],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::PointList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: fragment_module,
                entry_point: Some(FRAGMENT_ENTRY),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });
        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(ShaderError::Link {
                label: render.label().to_string(),
                log: e.to_string(),
            }
            .into());
        }

        let mode = if captures == 1 {
            UpdateMode::Capture(CaptureTarget::new("captured points"))
        } else {
            UpdateMode::InPlace
        };

        let mut set = ParticleBufferSet::new(ctx);
        if !particles.is_empty() {
            set.set_particles(ctx, &particles);
            if let Some(index) = &mut index {
                index.resize(ctx, set.count());
            }
        }

        tracing::info!(
            "pipeline ready: {} update stage(s), {} particles, index {}",
            stages.len(),
            set.count(),
            if index.is_some() { "on" } else { "off" },
        );

        Ok(Pipeline {
            render,
            stages,
            mode,
            render_pipeline,
            set,
            index,
            clear_color,
            frames: 0,
            last_drawn: 0,
        })
    }
}

/// A complete simulation frame driver.
pub struct Pipeline {
    render: Technique,
    stages: Vec<Technique>,
    mode: UpdateMode,
    render_pipeline: wgpu::RenderPipeline,
    set: ParticleBufferSet,
    index: Option<NeighborIndex>,
    clear_color: wgpu::Color,
    frames: u64,
    last_drawn: u32,
}

impl Pipeline {
    /// Replaces the particle population and resizes the neighbor index to
    /// match.
    pub fn set_particles(&mut self, ctx: &GpuContext, particles: &[Particle]) {
        self.set.set_particles(ctx, particles);
        if let Some(index) = &mut self.index {
            index.resize(ctx, self.set.count());
        }
    }

    pub fn count(&self) -> u32 {
        self.set.count()
    }

    pub fn buffer_set(&self) -> &ParticleBufferSet {
        &self.set
    }

    pub fn stages(&self) -> &[Technique] {
        &self.stages
    }

    pub fn stage_mut(&mut self, label: &str) -> Option<&mut Technique> {
        self.stages.iter_mut().find(|s| s.label() == label)
    }

    pub fn render_technique(&self) -> &Technique {
        &self.render
    }

    pub fn render_technique_mut(&mut self) -> &mut Technique {
        &mut self.render
    }

    pub fn neighbor_index(&self) -> Option<&NeighborIndex> {
        self.index.as_ref()
    }

    pub fn neighbor_index_mut(&mut self) -> Option<&mut NeighborIndex> {
        self.index.as_mut()
    }

    pub fn frame_stats(&self) -> FrameStats {
        FrameStats {
            frames: self.frames,
            last_drawn: self.last_drawn,
        }
    }

    /// Stages a uniform on every technique that declares it, including the
    /// index rebuild and the render technique. Returns how many took it.
    pub fn set_uniform_all(&mut self, name: &str, value: impl Into<UniformValue>) -> u32 {
        let value = value.into();
        let mut applied = 0;
        for stage in &mut self.stages {
            if stage.set_uniform(name, value) {
                applied += 1;
            }
        }
        if self.render.set_uniform(name, value) {
            applied += 1;
        }
        if let Some(index) = &mut self.index {
            if index.set_uniform(name, value) {
                applied += 1;
            }
        }
        applied
    }

    /// Runs one simulation step: uniform flush, index clear and rebuild,
    /// then every update stage, each in its own compute pass.
    ///
    /// With zero particles nothing is encoded.
    pub fn update(&mut self, ctx: &GpuContext) -> Result<(), Error> {
        let count = self.set.count();
        if count == 0 {
            return Ok(());
        }
        for stage in &mut self.stages {
            stage.flush_uniforms(ctx);
        }
        if let Some(index) = &mut self.index {
            index.flush_uniforms(ctx);
        }

        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("update") });

        let index_buffer = self.index.as_ref().map(|i| i.buffer());
        if let Some(index) = &self.index {
            encode_stage(
                ctx,
                &mut encoder,
                index.clear_stage(),
                self.set.front(),
                index_buffer,
                None,
                [count, 1, 1],
            );
            encode_stage(
                ctx,
                &mut encoder,
                index.rebuild_stage(),
                self.set.front(),
                index_buffer,
                None,
                [count, count, 1],
            );
        }
        match &self.mode {
            UpdateMode::InPlace => {
                for stage in &self.stages {
                    encode_stage(
                        ctx,
                        &mut encoder,
                        stage,
                        self.set.front(),
                        index_buffer,
                        None,
                        [count, 1, 1],
                    );
                }
            }
            UpdateMode::Capture(target) => {
                for stage in &self.stages {
                    let captured = target.attach(ctx, stage, self.set.back(), count)?;
                    encode_stage(
                        ctx,
                        &mut encoder,
                        stage,
                        self.set.front(),
                        index_buffer,
                        Some(&captured),
                        [count, 1, 1],
                    );
                }
            }
        }

        ctx.queue().submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Draws one point per particle into `view`, clearing it first. The
    /// capture flavor draws the back buffer and swaps afterwards; zero
    /// particles clear the view and issue no draw.
    pub fn render(&mut self, ctx: &GpuContext, view: &wgpu::TextureView) {
        let count = self.set.count();
        self.render.flush_uniforms(ctx);
        let uniform_group = self.render.uniform_entry().map(|(group, binding, resource)| {
            ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("render uniforms"),
                layout: &self.render_pipeline.get_bind_group_layout(group),
                entries: &[wgpu::BindGroupEntry { binding, resource }],
            })
        });
        let source = match &self.mode {
            UpdateMode::Capture(_) => self.set.back(),
            UpdateMode::InPlace => self.set.front(),
        };

        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("render") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(self.render.label()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if count > 0 {
                pass.set_pipeline(&self.render_pipeline);
                if let Some(group) = &uniform_group {
                    pass.set_bind_group(0, group, &[]);
                }
                pass.set_vertex_buffer(0, source.buffer().slice(..));
                pass.draw(0..count, 0..1);
            }
        }
        ctx.queue().submit(std::iter::once(encoder.finish()));

        if matches!(self.mode, UpdateMode::Capture(_)) {
            self.set.swap();
        }
        self.frames += 1;
        self.last_drawn = count;
    }

    /// Synchronous snapshot of the front buffer, which is the state the
    /// next update will read. Stalls the queue; diagnostics and tests only.
    pub fn read_particles(&self, ctx: &GpuContext) -> Result<Vec<Particle>, Error> {
        let bytes = self
            .set
            .front()
            .read_back(ctx, 0, self.set.count() as u64 * Particle::SIZE)?;
        Ok(bytes
            .chunks_exact(Particle::SIZE as usize)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

fn step_for(technique: &Technique) -> Step {
    let bindings = technique.bindings();
    Step {
        label: technique.label().to_string(),
        reads: bindings.iter().filter(|b| !b.writes).map(|b| b.slot).collect(),
        writes: bindings.iter().filter(|b| b.writes).map(|b| b.slot).collect(),
        barrier_after: true,
    }
}

fn slot_name(slot: ResourceSlot) -> &'static str {
    match slot {
        ResourceSlot::Particles => "particles",
        ResourceSlot::NeighborIndex => "neighbor index",
        ResourceSlot::CaptureDest => "capture destination",
    }
}

/// Every write must be fenced off from the next step touching the same
/// resource. Each step runs in its own compute pass, so `barrier_after` is
/// always true for schedules built here; the check keeps hand-assembled or
/// future fused schedules honest.
fn validate_order(steps: &[Step]) -> Result<(), ConfigurationError> {
    for (i, writer) in steps.iter().enumerate() {
        for &slot in &writer.writes {
            let mut fenced = writer.barrier_after;
            for later in &steps[i + 1..] {
                if later.reads.contains(&slot) || later.writes.contains(&slot) {
                    if !fenced {
                        return Err(ConfigurationError::MissingBarrier {
                            resource: slot_name(slot),
                            writer: writer.label.clone(),
                            reader: later.label.clone(),
                        });
                    }
                    break;
                }
                fenced = fenced || later.barrier_after;
            }
        }
    }
    Ok(())
}

fn group_counts(work: [u32; 3], wg: [u32; 3]) -> [u32; 3] {
    [
        work[0].div_ceil(wg[0].max(1)),
        work[1].div_ceil(wg[1].max(1)),
        work[2].div_ceil(wg[2].max(1)),
    ]
}

/// Encodes one stage as its own compute pass. The group 0 bind group is
/// rebuilt from the stage's reflection every pass, so buffer reallocation
/// between frames is always picked up.
fn encode_stage(
    ctx: &GpuContext,
    encoder: &mut wgpu::CommandEncoder,
    technique: &Technique,
    particles: &DeviceBuffer,
    index: Option<&DeviceBuffer>,
    capture: Option<&wgpu::BindGroup>,
    work: [u32; 3],
) {
    let Some(pipeline) = technique.compute_pipeline() else {
        return;
    };
    let mut entries = Vec::new();
    for b in technique.bindings() {
        if b.group != PARTICLE_GROUP {
            continue;
        }
        let resource = match b.slot {
            ResourceSlot::Particles => particles.binding(),
            ResourceSlot::NeighborIndex => match index {
                Some(buffer) => buffer.binding(),
                None => continue,
            },
            ResourceSlot::CaptureDest => continue,
        };
        entries.push(wgpu::BindGroupEntry {
            binding: b.binding,
            resource,
        });
    }
    if let Some((group, binding, resource)) = technique.uniform_entry() {
        if group == PARTICLE_GROUP {
            entries.push(wgpu::BindGroupEntry { binding, resource });
        }
    }
    let group0 = (!entries.is_empty()).then(|| {
        ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(technique.label()),
            layout: &pipeline.get_bind_group_layout(PARTICLE_GROUP),
            entries: &entries,
        })
    });

    let groups = group_counts(work, technique.workgroup_size());
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(technique.label()),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    if let Some(group) = &group0 {
        pass.set_bind_group(0, group, &[]);
    }
    if let Some(group) = capture {
        pass.set_bind_group(CAPTURE_GROUP, group, &[]);
    }
    pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(label: &str, reads: &[ResourceSlot], writes: &[ResourceSlot], barrier: bool) -> Step {
        Step {
            label: label.to_string(),
            reads: reads.to_vec(),
            writes: writes.to_vec(),
            barrier_after: barrier,
        }
    }

    #[test]
    fn test_write_then_read_needs_a_barrier() {
        let steps = [
            step("rebuild", &[ResourceSlot::Particles], &[ResourceSlot::NeighborIndex], false),
            step("density", &[ResourceSlot::NeighborIndex], &[ResourceSlot::Particles], true),
        ];
        let err = validate_order(&steps).unwrap_err();
        let ConfigurationError::MissingBarrier { resource, writer, reader } = err else {
            panic!("expected a missing barrier");
        };
        assert_eq!(resource, "neighbor index");
        assert_eq!(writer, "rebuild");
        assert_eq!(reader, "density");
    }

    #[test]
    fn test_write_after_write_needs_a_barrier() {
        let steps = [
            step("clear", &[], &[ResourceSlot::NeighborIndex], false),
            step("rebuild", &[], &[ResourceSlot::NeighborIndex], true),
        ];
        assert!(validate_order(&steps).is_err());
    }

    #[test]
    fn test_barrier_between_unrelated_steps_counts() {
        let steps = [
            step("integrate", &[], &[ResourceSlot::Particles], false),
            step("clear", &[], &[ResourceSlot::NeighborIndex], true),
            step("draw prep", &[ResourceSlot::Particles], &[], true),
        ];
        assert!(validate_order(&steps).is_ok());
    }

    #[test]
    fn test_fully_fenced_chain_passes() {
        let steps = [
            step("clear", &[], &[ResourceSlot::NeighborIndex], true),
            step("rebuild", &[ResourceSlot::Particles], &[ResourceSlot::NeighborIndex], true),
            step("density", &[ResourceSlot::NeighborIndex], &[ResourceSlot::Particles], true),
            step("forces", &[ResourceSlot::NeighborIndex], &[ResourceSlot::Particles], true),
            step("integrate", &[], &[ResourceSlot::Particles], true),
        ];
        assert!(validate_order(&steps).is_ok());
    }

    #[test]
    fn test_group_counts_round_up() {
        assert_eq!(group_counts([256, 1, 1], [16, 1, 1]), [16, 1, 1]);
        assert_eq!(group_counts([257, 1, 1], [16, 1, 1]), [17, 1, 1]);
        assert_eq!(group_counts([100, 100, 1], [16, 16, 1]), [7, 7, 1]);
        assert_eq!(group_counts([1, 1, 1], [64, 1, 1]), [1, 1, 1]);
    }
}
