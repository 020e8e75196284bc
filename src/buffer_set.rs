//! Front/back particle buffer pair.
//!
//! Both buffers are always sized for the full particle count, so either can
//! serve as a capture destination or a draw source at any time. The swap is
//! a host-side index flip; particle data never moves between buffers.

use crate::buffer::DeviceBuffer;
use crate::context::GpuContext;
use crate::particle::Particle;

const PARTICLE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::VERTEX)
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

pub struct ParticleBufferSet {
    buffers: [DeviceBuffer; 2],
    front: usize,
    count: u32,
}

impl ParticleBufferSet {
    pub fn new(ctx: &GpuContext) -> Self {
        Self {
            buffers: [
                DeviceBuffer::new(ctx, "particles a", 0, PARTICLE_USAGE),
                DeviceBuffer::new(ctx, "particles b", 0, PARTICLE_USAGE),
            ],
            front: 0,
            count: 0,
        }
    }

    /// Uploads a fresh particle population into the front buffer and
    /// resizes the back buffer to match, so both stay equal-sized.
    pub fn set_particles(&mut self, ctx: &GpuContext, particles: &[Particle]) {
        let bytes: &[u8] = bytemuck::cast_slice(particles);
        self.buffers[self.front].set_data(ctx, bytes);
        self.buffers[1 - self.front].set_size(ctx, bytes.len() as u64);
        self.count = particles.len() as u32;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn front(&self) -> &DeviceBuffer {
        &self.buffers[self.front]
    }

    pub fn back(&self) -> &DeviceBuffer {
        &self.buffers[1 - self.front]
    }

    /// Which physical buffer is currently the front. Observable so tests
    /// can check the ping-pong alternation.
    pub fn front_index(&self) -> usize {
        self.front
    }

    pub fn swap(&mut self) {
        self.front = 1 - self.front;
    }
}
