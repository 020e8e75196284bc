//! Capture target: redirecting a stage's per-particle output into a
//! buffer.
//!
//! The convention is fixed at capture point 0: the destination buffer
//! appears to the capture kernel at group 1 binding 0 as a writable record
//! array. Attachment produces a bind group whose lifetime is bounded by the
//! capture pass; nothing stays attached between frames.

use crate::buffer::DeviceBuffer;
use crate::context::GpuContext;
use crate::error::{ConfigurationError, Error};
use crate::particle::Particle;
use crate::technique::{Technique, CAPTURE_BINDING, CAPTURE_GROUP};

pub struct CaptureTarget {
    label: String,
}

impl CaptureTarget {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }

    /// Builds the pass-scoped bind group placing `destination` at capture
    /// point 0 for the capture kernel. The destination must hold `count`
    /// records.
    pub fn attach(
        &self,
        ctx: &GpuContext,
        technique: &Technique,
        destination: &DeviceBuffer,
        count: u32,
    ) -> Result<wgpu::BindGroup, Error> {
        let required = count as u64 * Particle::SIZE;
        if destination.size() < required {
            return Err(ConfigurationError::CaptureSize {
                required,
                actual: destination.size(),
            }
            .into());
        }
        let pipeline = match technique.compute_pipeline() {
            Some(p) if technique.is_capture() => p,
            _ => {
                return Err(ConfigurationError::WrongKind {
                    label: technique.label().to_string(),
                    expected: "capture",
                }
                .into())
            }
        };
        let layout = pipeline.get_bind_group_layout(CAPTURE_GROUP);
        Ok(ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&self.label),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: CAPTURE_BINDING,
                resource: destination.binding(),
            }],
        }))
    }
}
