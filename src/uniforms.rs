//! Host-side staging for technique uniforms.
//!
//! Each technique exposes the members of its uniform block as named, typed
//! slots. Slot names and offsets come from shader reflection, so the staging
//! bytes always match the block layout the compiler chose. Writes to names
//! the program does not declare are a logged no-op; reads of them come
//! back empty.

use std::fmt;

use glam::{Vec2, Vec3, Vec4};

/// A typed uniform value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    F32(f32),
    I32(i32),
    U32(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::F32(_) => UniformKind::F32,
            UniformValue::I32(_) => UniformKind::I32,
            UniformValue::U32(_) => UniformKind::U32,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
        }
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        match self {
            UniformValue::F32(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::I32(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::U32(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec2(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec3(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec4(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::F32(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::I32(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::U32(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

/// The type of a uniform slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    F32,
    I32,
    U32,
    Vec2,
    Vec3,
    Vec4,
}

impl UniformKind {
    pub fn wgsl_type(&self) -> &'static str {
        match self {
            UniformKind::F32 => "f32",
            UniformKind::I32 => "i32",
            UniformKind::U32 => "u32",
            UniformKind::Vec2 => "vec2<f32>",
            UniformKind::Vec3 => "vec3<f32>",
            UniformKind::Vec4 => "vec4<f32>",
        }
    }

    /// Byte size of the value itself, without trailing padding.
    pub fn byte_size(&self) -> usize {
        match self {
            UniformKind::F32 | UniformKind::I32 | UniformKind::U32 => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
        }
    }
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wgsl_type())
    }
}

/// One member of a technique's uniform block, at its reflected offset.
#[derive(Debug, Clone)]
pub(crate) struct UniformSlot {
    pub(crate) name: String,
    pub(crate) kind: UniformKind,
    pub(crate) offset: u32,
}

/// Staged bytes for one uniform block.
///
/// Starts dirty so the first flush uploads the zeroed block even when no
/// slot is ever written.
#[derive(Debug)]
pub(crate) struct UniformTable {
    slots: Vec<UniformSlot>,
    staging: Vec<u8>,
    dirty: bool,
}

impl UniformTable {
    pub(crate) fn new(slots: Vec<UniformSlot>, size: usize) -> Self {
        Self {
            slots,
            staging: vec![0; size],
            dirty: true,
        }
    }

    fn slot(&self, name: &str) -> Option<&UniformSlot> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// Stages a value. Returns false, leaving the staging untouched, for
    /// names the program does not declare and for type mismatches.
    pub(crate) fn set(&mut self, name: &str, value: UniformValue) -> bool {
        let Some(slot) = self.slot(name) else {
            tracing::debug!("ignoring write to unknown uniform '{}'", name);
            return false;
        };
        if slot.kind != value.kind() {
            tracing::warn!(
                "uniform '{}' is {}, ignoring {} write",
                name,
                slot.kind,
                value.kind()
            );
            return false;
        }
        let offset = slot.offset as usize;
        let mut bytes = Vec::with_capacity(value.kind().byte_size());
        value.write_bytes(&mut bytes);
        self.staging[offset..offset + bytes.len()].copy_from_slice(&bytes);
        self.dirty = true;
        true
    }

    pub(crate) fn get(&self, name: &str) -> Option<UniformValue> {
        let slot = self.slot(name)?;
        let offset = slot.offset as usize;
        let bytes = &self.staging[offset..offset + slot.kind.byte_size()];
        Some(read_value(slot.kind, bytes))
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.staging
    }

    /// Clears and returns the dirty flag. The caller uploads the staging
    /// bytes when this returns true.
    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn slots(&self) -> &[UniformSlot] {
        &self.slots
    }
}

fn read_value(kind: UniformKind, bytes: &[u8]) -> UniformValue {
    match kind {
        UniformKind::F32 => UniformValue::F32(bytemuck::pod_read_unaligned(bytes)),
        UniformKind::I32 => UniformValue::I32(bytemuck::pod_read_unaligned(bytes)),
        UniformKind::U32 => UniformValue::U32(bytemuck::pod_read_unaligned(bytes)),
        UniformKind::Vec2 => UniformValue::Vec2(bytemuck::pod_read_unaligned(bytes)),
        UniformKind::Vec3 => UniformValue::Vec3(bytemuck::pod_read_unaligned(bytes)),
        UniformKind::Vec4 => UniformValue::Vec4(bytemuck::pod_read_unaligned(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> UniformTable {
        UniformTable::new(
            vec![
                UniformSlot {
                    name: "dt".to_string(),
                    kind: UniformKind::F32,
                    offset: 0,
                },
                UniformSlot {
                    name: "count".to_string(),
                    kind: UniformKind::U32,
                    offset: 4,
                },
                UniformSlot {
                    name: "gravity".to_string(),
                    kind: UniformKind::Vec2,
                    offset: 8,
                },
            ],
            16,
        )
    }

    #[test]
    fn test_set_and_get() {
        let mut t = table();
        assert!(t.set("dt", 0.01f32.into()));
        assert!(t.set("count", 256u32.into()));
        assert!(t.set("gravity", Vec2::new(0.0, -2.0).into()));
        assert_eq!(t.get("dt"), Some(UniformValue::F32(0.01)));
        assert_eq!(t.get("count"), Some(UniformValue::U32(256)));
        assert_eq!(
            t.get("gravity"),
            Some(UniformValue::Vec2(Vec2::new(0.0, -2.0)))
        );
    }

    #[test]
    fn test_unknown_name_is_a_no_op() {
        let mut t = table();
        assert!(!t.set("nope", 1.0f32.into()));
        assert!(t.get("nope").is_none());
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let mut t = table();
        assert!(!t.set("dt", 3u32.into()));
        assert_eq!(t.get("dt"), Some(UniformValue::F32(0.0)));
    }

    #[test]
    fn test_unset_slots_read_zero() {
        let t = table();
        assert_eq!(t.get("dt"), Some(UniformValue::F32(0.0)));
        assert_eq!(t.get("gravity"), Some(UniformValue::Vec2(Vec2::ZERO)));
    }

    #[test]
    fn test_values_land_at_reflected_offsets() {
        let mut t = table();
        t.set("dt", 0.5f32.into());
        t.set("count", 7u32.into());
        t.set("gravity", Vec2::new(1.0, 2.0).into());
        let bytes = t.bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 0.5);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 7);
        assert_eq!(f32::from_le_bytes(bytes[8..12].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(bytes[12..16].try_into().unwrap()), 2.0);
    }

    #[test]
    fn test_dirty_tracking() {
        let mut t = table();
        assert!(t.take_dirty());
        assert!(!t.take_dirty());
        t.set("dt", 1.0f32.into());
        assert!(t.take_dirty());
        assert!(!t.take_dirty());
    }
}
