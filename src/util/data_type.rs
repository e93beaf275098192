//! DataType - the closed registry of value kinds.
//!
//! Every parameter value, array element and object handle is tagged with a
//! [`DataType`]. The tag carries the element byte size and whether values of
//! that type are object handles.

use bytemuck::{Pod, Zeroable};
use glam::{IVec2, IVec3, IVec4, Mat3, Mat4, UVec2, UVec3, UVec4, Vec2, Vec3, Vec4};
use half::f16;
use std::fmt;

use super::{Box1, Box3, Error, Result};

/// Size of a stored object handle (a 64-bit handle id).
pub const HANDLE_SIZE: usize = std::mem::size_of::<u64>();

macro_rules! data_types {
    ($($variant:ident = $value:literal, $name:literal, $size:expr;)*) => {
        /// Type tag of a value, array element or object kind.
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u32)]
        pub enum DataType {
            /// Unknown/invalid type
            #[default]
            Unknown = 0,
            $($variant = $value,)*
        }

        impl DataType {
            /// Every registered tag (excluding Unknown).
            pub const ALL: &'static [DataType] = &[$(Self::$variant,)*];

            /// Returns the name of this type as a string.
            pub const fn name(self) -> &'static str {
                match self {
                    Self::Unknown => "unknown",
                    $(Self::$variant => $name,)*
                }
            }

            /// Parse a type from its name string.
            pub fn from_name(name: &str) -> Self {
                match name {
                    $($name => Self::$variant,)*
                    _ => Self::Unknown,
                }
            }

            /// Convert from the raw tag value.
            pub const fn from_u32(v: u32) -> Self {
                match v {
                    $($value => Self::$variant,)*
                    _ => Self::Unknown,
                }
            }

            /// Byte size of one element, `None` for Unknown.
            pub const fn num_bytes(self) -> Option<usize> {
                match self {
                    Self::Unknown => None,
                    $(Self::$variant => Some($size),)*
                }
            }
        }
    };
}

data_types! {
    DataType = 100, "data_type", 4;
    String = 101, "string", std::mem::size_of::<usize>();
    Bool = 102, "bool", 1;

    Object = 500, "object", HANDLE_SIZE;
    Array = 501, "array", HANDLE_SIZE;
    Array1D = 502, "array1d", HANDLE_SIZE;
    Array2D = 503, "array2d", HANDLE_SIZE;
    Array3D = 504, "array3d", HANDLE_SIZE;
    Camera = 505, "camera", HANDLE_SIZE;
    Frame = 506, "frame", HANDLE_SIZE;
    Geometry = 507, "geometry", HANDLE_SIZE;
    Group = 508, "group", HANDLE_SIZE;
    Instance = 509, "instance", HANDLE_SIZE;
    Light = 510, "light", HANDLE_SIZE;
    Material = 511, "material", HANDLE_SIZE;
    Renderer = 512, "renderer", HANDLE_SIZE;
    Sampler = 513, "sampler", HANDLE_SIZE;
    SpatialField = 514, "spatial_field", HANDLE_SIZE;
    Surface = 515, "surface", HANDLE_SIZE;
    Volume = 516, "volume", HANDLE_SIZE;
    World = 517, "world", HANDLE_SIZE;

    Int8 = 1000, "int8", 1;
    Int16 = 1001, "int16", 2;
    Int32 = 1002, "int32", 4;
    Int32Vec2 = 1003, "int32_vec2", 8;
    Int32Vec3 = 1004, "int32_vec3", 12;
    Int32Vec4 = 1005, "int32_vec4", 16;
    Int64 = 1006, "int64", 8;

    UInt8 = 1010, "uint8", 1;
    UInt16 = 1011, "uint16", 2;
    UInt32 = 1012, "uint32", 4;
    UInt32Vec2 = 1013, "uint32_vec2", 8;
    UInt32Vec3 = 1014, "uint32_vec3", 12;
    UInt32Vec4 = 1015, "uint32_vec4", 16;
    UInt64 = 1016, "uint64", 8;

    UFixed8 = 1020, "ufixed8", 1;
    UFixed8Vec2 = 1021, "ufixed8_vec2", 2;
    UFixed8Vec3 = 1022, "ufixed8_vec3", 3;
    UFixed8Vec4 = 1023, "ufixed8_vec4", 4;
    UFixed8RgbaSrgb = 1024, "ufixed8_rgba_srgb", 4;

    Float16 = 1030, "float16", 2;
    Float32 = 1031, "float32", 4;
    Float32Vec2 = 1032, "float32_vec2", 8;
    Float32Vec3 = 1033, "float32_vec3", 12;
    Float32Vec4 = 1034, "float32_vec4", 16;
    Float64 = 1035, "float64", 8;
    Float32Box1 = 1036, "float32_box1", 8;
    Float32Box3 = 1037, "float32_box3", 24;
    Float32Mat3 = 1038, "float32_mat3", 36;
    Float32Mat4 = 1039, "float32_mat4", 64;
}

impl DataType {
    /// Byte size of one element.
    ///
    /// # Panics
    ///
    /// Panics on [`DataType::Unknown`]: sizing an unregistered tag is an
    /// internal invariant violation. Use [`DataType::try_size`] at API
    /// boundaries.
    #[inline]
    pub fn size(self) -> usize {
        match self.num_bytes() {
            Some(n) => n,
            None => panic!("size query on unregistered data type {}", self as u32),
        }
    }

    /// Checked byte size.
    #[inline]
    pub fn try_size(self) -> Result<usize> {
        self.num_bytes()
            .ok_or_else(|| Error::UnknownType(format!("tag {}", self as u32)))
    }

    /// True for tags whose values are object handles.
    #[inline]
    pub const fn is_object(self) -> bool {
        (self as u32) >= 500 && (self as u32) < 1000
    }

    /// True for the array object kinds.
    #[inline]
    pub const fn is_array(self) -> bool {
        matches!(self, Self::Array | Self::Array1D | Self::Array2D | Self::Array3D)
    }

    /// True for plain numeric values (scalars, vectors, boxes, matrices).
    #[inline]
    pub const fn is_numeric(self) -> bool {
        (self as u32) >= 1000
    }

    /// Number of scalar components for numeric types.
    pub const fn components(self) -> usize {
        match self {
            Self::Int32Vec2 | Self::UInt32Vec2 | Self::UFixed8Vec2 | Self::Float32Vec2 => 2,
            Self::Float32Box1 => 2,
            Self::Int32Vec3 | Self::UInt32Vec3 | Self::UFixed8Vec3 | Self::Float32Vec3 => 3,
            Self::Int32Vec4
            | Self::UInt32Vec4
            | Self::UFixed8Vec4
            | Self::UFixed8RgbaSrgb
            | Self::Float32Vec4 => 4,
            Self::Float32Box3 => 6,
            Self::Float32Mat3 => 9,
            Self::Float32Mat4 => 16,
            Self::Unknown => 0,
            _ => 1,
        }
    }

    /// True if a handle of kind `actual` may be stored under this tag.
    ///
    /// Generic tags accept any object (`Object`) or any array (`Array`).
    pub fn accepts_object(self, actual: DataType) -> bool {
        self == actual
            || (self == Self::Object && actual.is_object())
            || (self == Self::Array && actual.is_array())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// === Value trait for type-safe reads and writes ===

/// Rust types with a fixed [`DataType`] and plain byte representation.
pub trait ValueType: Pod + Zeroable + Copy + Send + Sync + 'static {
    /// The corresponding tag.
    const TYPE: DataType;

    /// Size of this type in bytes.
    const SIZE: usize = std::mem::size_of::<Self>();
}

macro_rules! impl_value_type {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(impl ValueType for $ty {
            const TYPE: DataType = DataType::$tag;
        })*
    };
}

impl_value_type! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    IVec2 => Int32Vec2,
    IVec3 => Int32Vec3,
    IVec4 => Int32Vec4,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    UVec2 => UInt32Vec2,
    UVec3 => UInt32Vec3,
    UVec4 => UInt32Vec4,
    u64 => UInt64,
    [u8; 4] => UFixed8Vec4,
    f16 => Float16,
    f32 => Float32,
    Vec2 => Float32Vec2,
    Vec3 => Float32Vec3,
    Vec4 => Float32Vec4,
    f64 => Float64,
    Box1 => Float32Box1,
    Box3 => Float32Box3,
    Mat3 => Float32Mat3,
    Mat4 => Float32Mat4,
    Bool => Bool,
}

/// Boolean with guaranteed 1-byte storage.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Bool(u8);

impl Bool {
    pub const TRUE: Self = Self(1);
    pub const FALSE: Self = Self(0);

    #[inline]
    pub const fn new(v: bool) -> Self {
        Self(v as u8)
    }

    #[inline]
    pub const fn get(self) -> bool {
        self.0 != 0
    }
}

impl From<bool> for Bool {
    #[inline]
    fn from(v: bool) -> Self {
        Self::new(v)
    }
}

impl From<Bool> for bool {
    #[inline]
    fn from(v: Bool) -> Self {
        v.get()
    }
}

impl fmt::Debug for Bool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Read elements of `T` out of raw bytes, borrowing when alignment allows.
pub fn cast_elements<T: Pod>(bytes: &[u8]) -> std::borrow::Cow<'_, [T]> {
    let size = std::mem::size_of::<T>();
    let usable = bytes.len() - bytes.len() % size;
    match bytemuck::try_cast_slice(&bytes[..usable]) {
        Ok(slice) => std::borrow::Cow::Borrowed(slice),
        Err(_) => std::borrow::Cow::Owned(
            bytes[..usable]
                .chunks_exact(size)
                .map(bytemuck::pod_read_unaligned)
                .collect(),
        ),
    }
}
