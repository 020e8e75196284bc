//! GPU buffer ownership.
//!
//! A [`DeviceBuffer`] owns one `wgpu::Buffer`. Uploading through
//! [`DeviceBuffer::set_data`] always reallocates, so old contents never leak
//! into a resize. Readback is synchronous and meant for diagnostics and
//! tests, not the frame loop.

use wgpu::util::DeviceExt;

use crate::context::GpuContext;
use crate::error::{ConfigurationError, DeviceError, Error};

/// Zero-sized allocations are rejected by wgpu; empty buffers still get a
/// tiny one.
const MIN_ALLOC: u64 = 4;

/// An owned region of device memory with a fixed usage set.
pub struct DeviceBuffer {
    label: String,
    buffer: wgpu::Buffer,
    size: u64,
    usage: wgpu::BufferUsages,
}

impl DeviceBuffer {
    /// Creates a buffer of `size` bytes with undefined contents.
    pub fn new(ctx: &GpuContext, label: &str, size: u64, usage: wgpu::BufferUsages) -> Self {
        let buffer = allocate(ctx.device(), label, size, usage);
        Self {
            label: label.to_string(),
            buffer,
            size,
            usage,
        }
    }

    /// Creates a buffer holding a copy of `contents`.
    pub fn with_data(
        ctx: &GpuContext,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> Self {
        let mut buf = Self::new(ctx, label, contents.len() as u64, usage);
        buf.set_data(ctx, contents);
        buf
    }

    /// Replaces the buffer contents. Always reallocates, whatever the old
    /// and new sizes; nothing of the previous contents survives.
    pub fn set_data(&mut self, ctx: &GpuContext, contents: &[u8]) {
        if contents.is_empty() {
            self.buffer = allocate(ctx.device(), &self.label, 0, self.usage);
        } else {
            self.buffer = ctx.device().create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&self.label),
                contents,
                usage: self.usage,
            });
        }
        self.size = contents.len() as u64;
    }

    /// Reallocates to `size` bytes with undefined contents.
    pub fn set_size(&mut self, ctx: &GpuContext, size: u64) {
        self.buffer = allocate(ctx.device(), &self.label, size, self.usage);
        self.size = size;
    }

    /// Logical size in bytes, as requested at the last (re)allocation.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Binding resource covering the whole buffer, for pass-scoped bind
    /// groups.
    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }

    /// Copies `size` bytes starting at `offset` back to the host through a
    /// staging buffer, blocking until the device finishes.
    ///
    /// This stalls the frame loop; it exists for tests and diagnostics.
    /// The range must be 4-byte aligned and lie within the buffer. The
    /// buffer needs `COPY_SRC` in its usage set.
    pub fn read_back(&self, ctx: &GpuContext, offset: u64, size: u64) -> Result<Vec<u8>, Error> {
        if offset % 4 != 0 || size % 4 != 0 {
            return Err(ConfigurationError::UnalignedReadback { offset, size }.into());
        }
        if offset + size > self.size {
            return Err(ConfigurationError::ReadbackOutOfBounds {
                end: offset + size,
                size: self.size,
            }
            .into());
        }
        if size == 0 {
            return Ok(Vec::new());
        }

        let staging = ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, offset, &staging, 0, size);
        ctx.queue().submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        ctx.device().poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| DeviceError::BufferMap(e.to_string()))?
            .map_err(|e| DeviceError::BufferMap(e.to_string()))?;

        let data = slice.get_mapped_range();
        let bytes = data.to_vec();
        drop(data);
        staging.unmap();
        Ok(bytes)
    }
}

fn allocate(device: &wgpu::Device, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(MIN_ALLOC),
        usage,
        mapped_at_creation: false,
    })
}
