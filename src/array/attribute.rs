//! Element to vec4 conversion for vertex/primitive attributes and images.

use half::f16;

use crate::util::{interpolant, DataType, Vec4};

/// Value of a missing attribute.
pub const DEFAULT_ATTRIBUTE_VALUE: Vec4 = Vec4::new(0.0, 0.0, 0.0, 1.0);

/// True if arrays of `ty` can be read as attributes.
pub fn is_attribute_type(ty: DataType) -> bool {
    matches!(
        ty,
        DataType::Float32
            | DataType::Float32Vec2
            | DataType::Float32Vec3
            | DataType::Float32Vec4
            | DataType::Float16
            | DataType::Float64
            | DataType::UFixed8
            | DataType::UFixed8Vec2
            | DataType::UFixed8Vec3
            | DataType::UFixed8Vec4
            | DataType::UFixed8RgbaSrgb
    )
}

#[inline]
fn to_srgb(v: f32) -> f32 {
    v.powf(1.0 / 2.2)
}

/// Read element `index` of `bytes` (elements of `ty`) as a vec4.
///
/// Missing components keep the defaults (0, 0, 0, 1). Unsupported types
/// and out-of-range indices yield the default value.
pub fn read_attribute(ty: DataType, bytes: &[u8], index: usize) -> Vec4 {
    let Some(size) = ty.num_bytes() else {
        return DEFAULT_ATTRIBUTE_VALUE;
    };
    let start = index.saturating_mul(size);
    let Some(elem) = bytes.get(start..start + size) else {
        return DEFAULT_ATTRIBUTE_VALUE;
    };

    let mut out = DEFAULT_ATTRIBUTE_VALUE;
    match ty {
        DataType::Float32 | DataType::Float32Vec2 | DataType::Float32Vec3 | DataType::Float32Vec4 => {
            for (i, c) in elem.chunks_exact(4).enumerate() {
                out[i] = f32::from_ne_bytes([c[0], c[1], c[2], c[3]]);
            }
        }
        DataType::Float16 => {
            out.x = f16::from_ne_bytes([elem[0], elem[1]]).to_f32();
        }
        DataType::Float64 => {
            let v: f64 = bytemuck::pod_read_unaligned(elem);
            out.x = v as f32;
        }
        DataType::UFixed8 | DataType::UFixed8Vec2 | DataType::UFixed8Vec3 | DataType::UFixed8Vec4 => {
            for (i, b) in elem.iter().enumerate() {
                out[i] = f32::from(*b) / 255.0;
            }
        }
        DataType::UFixed8RgbaSrgb => {
            for (i, b) in elem.iter().enumerate() {
                out[i] = to_srgb(f32::from(*b) / 255.0);
            }
        }
        _ => return DEFAULT_ATTRIBUTE_VALUE,
    }
    out
}

/// Piecewise-linear lookup at `t` in `[0, 1]`; the first and last value
/// sit at the ends. `t` outside the range clamps.
pub fn sample_linear(values: &[Vec4], t: f32) -> Vec4 {
    let n = values.len();
    if n == 0 {
        return DEFAULT_ATTRIBUTE_VALUE;
    }
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let ip = interpolant(t, n, false);
    let last = n as i64 - 1;
    let lo = values[ip.lower.clamp(0, last) as usize];
    let hi = values[ip.upper.clamp(0, last) as usize];
    lo.lerp(hi, ip.frac)
}
