//! AnyValue - a tagged container for one parameter value.

use smallvec::SmallVec;
use std::fmt;

use super::object::ObjectRef;
use crate::util::{DataType, Error, Result, ValueType};

/// Inline byte storage large enough for a 4x4 float matrix.
type InlineBytes = SmallVec<[u8; 64]>;

/// A value of any registered [`DataType`], an object handle, or a string.
///
/// Object values hold an internal reference on their target for as long as
/// the `AnyValue` exists: cloning increments it, dropping decrements it.
#[derive(Clone, Default)]
pub enum AnyValue {
    /// No value
    #[default]
    Empty,
    /// Plain value stored inline
    Value { ty: DataType, bytes: InlineBytes },
    /// Free-form string
    String(String),
    /// Object handle
    Object { ty: DataType, object: ObjectRef },
}

impl AnyValue {
    /// Wrap a typed value.
    pub fn new<T: ValueType>(value: T) -> Self {
        Self::Value {
            ty: T::TYPE,
            bytes: SmallVec::from_slice(bytemuck::bytes_of(&value)),
        }
    }

    /// Store raw bytes under a numeric or data-type tag.
    ///
    /// The byte count must match the tag size exactly.
    pub fn from_bytes(ty: DataType, bytes: &[u8]) -> Result<Self> {
        if ty.is_object() || ty == DataType::String {
            return Err(Error::invalid(format!("{ty} values cannot be built from raw bytes")));
        }
        let size = ty.try_size()?;
        if bytes.len() != size {
            return Err(Error::invalid(format!(
                "{ty} expects {size} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self::Value {
            ty,
            bytes: SmallVec::from_slice(bytes),
        })
    }

    /// Wrap a type tag as a value (used by frame channel formats).
    pub fn from_data_type(value: DataType) -> Self {
        Self::Value {
            ty: DataType::DataType,
            bytes: SmallVec::from_slice(&(value as u32).to_ne_bytes()),
        }
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn from_object(ty: DataType, object: ObjectRef) -> Self {
        Self::Object { ty, object }
    }

    /// Stored type tag; `Unknown` when empty.
    pub fn ty(&self) -> DataType {
        match self {
            Self::Empty => DataType::Unknown,
            Self::Value { ty, .. } | Self::Object { ty, .. } => *ty,
            Self::String(_) => DataType::String,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is(&self, ty: DataType) -> bool {
        self.ty() == ty
    }

    /// Typed read. No implicit conversion: the tag must match `T`.
    pub fn get<T: ValueType>(&self) -> Option<T> {
        match self {
            Self::Value { ty, bytes } if *ty == T::TYPE => {
                Some(bytemuck::pod_read_unaligned(bytes.as_slice()))
            }
            _ => None,
        }
    }

    /// Copy the raw value into `out`, failing on a tag mismatch.
    pub fn read_into(&self, ty: DataType, out: &mut [u8]) -> Result<()> {
        if self.ty() != ty {
            return Err(Error::mismatch(ty, self.ty()));
        }
        match self {
            Self::Value { bytes, .. } => {
                let dst = out
                    .get_mut(..bytes.len())
                    .ok_or_else(|| Error::invalid("output buffer too small"))?;
                dst.copy_from_slice(bytes);
                Ok(())
            }
            Self::Object { object, .. } => {
                let id = object.handle().id().to_ne_bytes();
                let dst = out
                    .get_mut(..id.len())
                    .ok_or_else(|| Error::invalid("output buffer too small"))?;
                dst.copy_from_slice(&id);
                Ok(())
            }
            _ => Err(Error::invalid(format!("{} values have no raw form", self.ty()))),
        }
    }

    pub fn data_type_value(&self) -> Option<DataType> {
        match self {
            Self::Value { ty: DataType::DataType, bytes } => {
                let raw: u32 = bytemuck::pod_read_unaligned(bytes.as_slice());
                Some(DataType::from_u32(raw))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object { object, .. } => Some(object),
            _ => None,
        }
    }

    /// Raw bytes for plain values.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Value { bytes, .. } => Some(bytes),
            _ => None,
        }
    }
}

impl PartialEq for AnyValue {
    /// Tag plus raw bytes; objects compare by handle identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Value { ty: a, bytes: x }, Self::Value { ty: b, bytes: y }) => a == b && x == y,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object { ty: a, object: x }, Self::Object { ty: b, object: y }) => {
                a == b && x.ptr_eq(y)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "AnyValue(empty)"),
            Self::Value { ty, bytes } => write!(f, "AnyValue({ty}, {} bytes)", bytes.len()),
            Self::String(s) => write!(f, "AnyValue(string {s:?})"),
            Self::Object { ty, object } => write!(f, "AnyValue({ty}, {:?})", object.handle()),
        }
    }
}

impl<T: ValueType> From<T> for AnyValue {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl From<&str> for AnyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{Box3, Mat4, Vec3};

    #[test]
    fn test_typed_roundtrip() {
        let v = AnyValue::new(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(v.ty(), DataType::Float32Vec3);
        assert_eq!(v.get::<Vec3>(), Some(Vec3::new(1.0, 2.0, 3.0)));
        // No implicit conversion
        assert_eq!(v.get::<f32>(), None);

        let m = AnyValue::new(Mat4::IDENTITY);
        assert_eq!(m.get::<Mat4>(), Some(Mat4::IDENTITY));
    }

    #[test]
    fn test_read_into_checks_tag() {
        let v = AnyValue::new(Box3::new(Vec3::ZERO, Vec3::ONE));
        let mut out = [0u8; 24];
        assert!(v.read_into(DataType::Float32Box3, &mut out).is_ok());
        let back: Box3 = bytemuck::pod_read_unaligned(&out);
        assert_eq!(back.upper, Vec3::ONE);

        let err = v.read_into(DataType::Float32Vec3, &mut out).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));

        let mut small = [0u8; 4];
        assert!(v.read_into(DataType::Float32Box3, &mut small).is_err());
    }

    #[test]
    fn test_from_bytes_validates_size() {
        assert!(AnyValue::from_bytes(DataType::Float32, &1.0f32.to_ne_bytes()).is_ok());
        assert!(AnyValue::from_bytes(DataType::Float32, &[0u8; 3]).is_err());
        assert!(AnyValue::from_bytes(DataType::Unknown, &[]).is_err());
        assert!(AnyValue::from_bytes(DataType::Surface, &[0u8; 8]).is_err());
    }

    #[test]
    fn test_equality() {
        assert_eq!(AnyValue::new(1.0f32), AnyValue::new(1.0f32));
        assert_ne!(AnyValue::new(1.0f32), AnyValue::new(1u32));
        assert_ne!(AnyValue::new(1.0f32), AnyValue::new(2.0f32));
        assert_eq!(AnyValue::from("a"), AnyValue::from("a"));
        assert_ne!(AnyValue::from("a"), AnyValue::Empty);
        assert_eq!(AnyValue::Empty, AnyValue::default());
    }

    #[test]
    fn test_data_type_value() {
        let v = AnyValue::from_data_type(DataType::UFixed8RgbaSrgb);
        assert_eq!(v.ty(), DataType::DataType);
        assert_eq!(v.data_type_value(), Some(DataType::UFixed8RgbaSrgb));
        assert_eq!(AnyValue::new(3u32).data_type_value(), None);
    }
}
