//! Uniform storage for the GPU backend.
//!
//! Every program keeps a CPU copy of its uniform block. `set_uniform` only
//! writes that copy; at each draw the current block is snapshotted into the
//! frame's uniform arena and bound with a dynamic offset, so draws recorded
//! into the same command buffer each see the values that were current when
//! they were issued.

use std::num::NonZeroU64;

use glam::{Mat3, Mat4};

use crate::core::backend::UniformValue;
use crate::shader::reflect::{ScalarKind, UniformField, UniformType};

// ============================================================================
// CPU shadow block
// ============================================================================

/// Writes `value` into `block` at the location described by `field`.
///
/// Scalars convert between bool, int, uint and float as GL does. Returns
/// `false` when the value does not fit the field's type.
pub fn write_field(block: &mut [u8], field: UniformField, value: UniformValue) -> bool {
    let offset = field.offset as usize;
    match (field.ty, value) {
        (UniformType::Scalar(kind), scalar) => {
            let bytes = match (kind, scalar) {
                (ScalarKind::F32, UniformValue::Float(v)) => v.to_le_bytes(),
                (ScalarKind::F32, UniformValue::Int(v)) => (v as f32).to_le_bytes(),
                (ScalarKind::F32, UniformValue::UInt(v)) => (v as f32).to_le_bytes(),
                (ScalarKind::F32, UniformValue::Bool(v)) => f32::from(u8::from(v)).to_le_bytes(),
                (ScalarKind::I32, UniformValue::Int(v)) => v.to_le_bytes(),
                (ScalarKind::I32, UniformValue::UInt(v)) => (v as i32).to_le_bytes(),
                (ScalarKind::I32, UniformValue::Bool(v)) => i32::from(v).to_le_bytes(),
                (ScalarKind::I32, UniformValue::Float(v)) => (v as i32).to_le_bytes(),
                (ScalarKind::U32, UniformValue::UInt(v)) => v.to_le_bytes(),
                (ScalarKind::U32, UniformValue::Int(v)) => (v.max(0) as u32).to_le_bytes(),
                (ScalarKind::U32, UniformValue::Bool(v)) => u32::from(v).to_le_bytes(),
                (ScalarKind::U32, UniformValue::Float(v)) => (v.max(0.0) as u32).to_le_bytes(),
                _ => return false,
            };
            put(block, offset, &bytes)
        }
        (UniformType::Vector(2, ScalarKind::F32), UniformValue::Vec2(v)) => {
            put(block, offset, bytemuck::cast_slice(&v.to_array()))
        }
        (UniformType::Vector(3, ScalarKind::F32), UniformValue::Vec3(v)) => {
            put(block, offset, bytemuck::cast_slice(&v.to_array()))
        }
        (UniformType::Vector(4, ScalarKind::F32), UniformValue::Vec4(v)) => {
            put(block, offset, bytemuck::cast_slice(&v.to_array()))
        }
        (UniformType::Matrix(3, 3), UniformValue::Mat3(m)) => write_mat3(block, offset, m),
        (UniformType::Matrix(4, 4), UniformValue::Mat4(m)) => write_mat4(block, offset, m),
        // GL accepts a mat4 for a mat3 uniform in some drivers; we take the upper-left.
        (UniformType::Matrix(3, 3), UniformValue::Mat4(m)) => {
            write_mat3(block, offset, Mat3::from_mat4(m))
        }
        _ => false,
    }
}

/// `mat3x3<f32>` columns are padded to 16 bytes.
fn write_mat3(block: &mut [u8], offset: usize, m: Mat3) -> bool {
    let mut ok = true;
    for (i, column) in [m.x_axis, m.y_axis, m.z_axis].into_iter().enumerate() {
        ok &= put(block, offset + i * 16, bytemuck::cast_slice(&column.to_array()));
    }
    ok
}

fn write_mat4(block: &mut [u8], offset: usize, m: Mat4) -> bool {
    put(block, offset, bytemuck::cast_slice(&m.to_cols_array()))
}

fn put(block: &mut [u8], offset: usize, bytes: &[u8]) -> bool {
    match block.get_mut(offset..offset + bytes.len()) {
        Some(dst) => {
            dst.copy_from_slice(bytes);
            true
        }
        None => false,
    }
}

// ============================================================================
// Frame arena
// ============================================================================

/// A uniform buffer filled front to back with per-draw snapshots.
///
/// Snapshots are staged on the CPU and written to the GPU buffer right
/// before the command buffer that references them is submitted.
pub struct UniformArena {
    buffer: wgpu::Buffer,
    staging: Vec<u8>,
    alignment: u64,
}

impl UniformArena {
    pub fn new(device: &wgpu::Device, size: u64) -> Self {
        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let size = size.max(alignment).next_multiple_of(alignment);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Quark Uniform Arena"),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            staging: Vec::with_capacity(size as usize),
            alignment,
        }
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Binding of `block_size` bytes at offset 0; the actual offset is
    /// supplied dynamically per draw.
    pub fn binding(&self, block_size: u64) -> wgpu::BufferBinding<'_> {
        wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: NonZeroU64::new(block_size),
        }
    }

    /// Whether a block of `size` bytes still fits.
    pub fn fits(&self, size: usize) -> bool {
        let start = (self.staging.len() as u64).next_multiple_of(self.alignment);
        start + size as u64 <= self.buffer.size()
    }

    /// Appends `block` and returns its dynamic offset. The caller checks
    /// [`fits`](Self::fits) first.
    pub fn push(&mut self, block: &[u8]) -> u32 {
        let start = (self.staging.len() as u64).next_multiple_of(self.alignment) as usize;
        self.staging.resize(start, 0);
        self.staging.extend_from_slice(block);
        start as u32
    }

    pub fn is_empty(&self) -> bool {
        self.staging.is_empty()
    }

    /// Uploads everything staged so far and starts over.
    pub fn flush(&mut self, queue: &wgpu::Queue) {
        if !self.staging.is_empty() {
            queue.write_buffer(&self.buffer, 0, &self.staging);
            self.staging.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};

    use super::*;

    fn field(offset: u32, ty: UniformType) -> UniformField {
        UniformField { offset, ty }
    }

    #[test]
    fn bools_are_written_as_integers() {
        let mut block = [0xffu8; 8];
        assert!(write_field(
            &mut block,
            field(4, UniformType::Scalar(ScalarKind::U32)),
            UniformValue::Bool(true)
        ));
        assert_eq!(&block[4..8], &1u32.to_le_bytes());
        assert_eq!(&block[0..4], &[0xff; 4], "neighbouring bytes untouched");
    }

    #[test]
    fn mat3_columns_are_padded() {
        let mut block = [0u8; 48];
        let m = Mat3::from_cols(Vec3::X, Vec3::Y * 2.0, Vec3::Z * 3.0);
        assert!(write_field(&mut block, field(0, UniformType::Matrix(3, 3)), UniformValue::Mat3(m)));
        let floats: &[f32] = bytemuck::cast_slice(&block);
        assert_eq!(floats[0], 1.0);
        assert_eq!(floats[5], 2.0);
        assert_eq!(floats[10], 3.0);
    }

    #[test]
    fn mismatched_types_are_rejected() {
        let mut block = [0u8; 64];
        assert!(!write_field(
            &mut block,
            field(0, UniformType::Vector(3, ScalarKind::F32)),
            UniformValue::Mat4(Mat4::IDENTITY)
        ));
    }

    #[test]
    fn writes_past_the_block_are_rejected() {
        let mut block = [0u8; 8];
        assert!(!write_field(
            &mut block,
            field(4, UniformType::Vector(2, ScalarKind::F32)),
            UniformValue::Vec2(glam::Vec2::ONE)
        ));
    }
}
