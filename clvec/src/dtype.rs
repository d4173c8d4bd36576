//! Host to device type bridge

use core::fmt::Display;
use half::f16;

/// Element types that can live in device buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DType {
    /// 16 bit float
    F16,
    /// 32 bit float
    F32,
    /// 64 bit float
    F64,
    /// 8 bit unsigned integer
    U8,
    /// 16 bit unsigned integer
    U16,
    /// 32 bit unsigned integer
    U32,
    /// 64 bit unsigned integer
    U64,
    /// 8 bit signed integer
    I8,
    /// 16 bit signed integer
    I16,
    /// 32 bit signed integer
    I32,
    /// 64 bit signed integer
    I64,
}

impl DType {
    /// Size of one element in bytes
    #[must_use]
    pub const fn byte_size(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::F16 | DType::U16 | DType::I16 => 2,
            DType::F32 | DType::U32 | DType::I32 => 4,
            DType::F64 | DType::U64 | DType::I64 => 8,
        }
    }

    /// Is this a floating point type?
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }

    /// Name of the type in `OpenCL` C
    #[must_use]
    pub const fn ocl(self) -> &'static str {
        match self {
            DType::F16 => "half",
            DType::F32 => "float",
            DType::F64 => "double",
            DType::U8 => "uchar",
            DType::U16 => "ushort",
            DType::U32 => "uint",
            DType::U64 => "ulong",
            DType::I8 => "char",
            DType::I16 => "short",
            DType::I32 => "int",
            DType::I64 => "long",
        }
    }

    /// Vector type with `lanes` lanes of this type, `None` if `OpenCL` has no such width.
    #[must_use]
    pub const fn vector_of(self, lanes: u8) -> Option<VectorType> {
        VectorType::new(self, lanes)
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
        })
    }
}

/// `OpenCL` built-in vector type, e.g. `float4`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorType {
    scalar: DType,
    lanes: u8,
}

impl VectorType {
    /// Vector of `lanes` elements of `scalar`. `OpenCL` supports 1, 2, 3, 4, 8 and 16 lanes.
    #[must_use]
    pub const fn new(scalar: DType, lanes: u8) -> Option<VectorType> {
        match lanes {
            1 | 2 | 3 | 4 | 8 | 16 => Some(VectorType { scalar, lanes }),
            _ => None,
        }
    }

    /// Number of lanes
    #[must_use]
    pub const fn vector_length(&self) -> u8 {
        self.lanes
    }

    /// Element type of each lane
    #[must_use]
    pub const fn scalar_of(&self) -> DType {
        self.scalar
    }

    /// Size in bytes. Three lane vectors occupy four lanes.
    #[must_use]
    pub const fn byte_size(&self) -> usize {
        let lanes = if self.lanes == 3 { 4 } else { self.lanes as usize };
        lanes * self.scalar.byte_size()
    }
}

impl Display for VectorType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.lanes == 1 {
            f.write_str(self.scalar.ocl())
        } else {
            f.write_fmt(format_args!("{}{}", self.scalar.ocl(), self.lanes))
        }
    }
}

/// Typed scalar value, used for scalar kernel arguments and by the host backend
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub enum Constant {
    /// 16 bit float
    F16(f16),
    /// 32 bit float
    F32(f32),
    /// 64 bit float
    F64(f64),
    /// 8 bit unsigned integer
    U8(u8),
    /// 16 bit unsigned integer
    U16(u16),
    /// 32 bit unsigned integer
    U32(u32),
    /// 64 bit unsigned integer
    U64(u64),
    /// 8 bit signed integer
    I8(i8),
    /// 16 bit signed integer
    I16(i16),
    /// 32 bit signed integer
    I32(i32),
    /// 64 bit signed integer
    I64(i64),
}

impl Constant {
    /// Element type of the value
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            Constant::F16(_) => DType::F16,
            Constant::F32(_) => DType::F32,
            Constant::F64(_) => DType::F64,
            Constant::U8(_) => DType::U8,
            Constant::U16(_) => DType::U16,
            Constant::U32(_) => DType::U32,
            Constant::U64(_) => DType::U64,
            Constant::I8(_) => DType::I8,
            Constant::I16(_) => DType::I16,
            Constant::I32(_) => DType::I32,
            Constant::I64(_) => DType::I64,
        }
    }

    /// Zero of the given type
    #[must_use]
    pub fn zero(dtype: DType) -> Constant {
        Constant::from_f64(dtype, 0.0)
    }

    /// Reads one element of `dtype` from the front of `bytes` (native endian, any alignment).
    pub(crate) fn read(dtype: DType, bytes: &[u8]) -> Constant {
        use bytemuck::pod_read_unaligned as r;
        let bytes = &bytes[..dtype.byte_size()];
        match dtype {
            DType::F16 => Constant::F16(r(bytes)),
            DType::F32 => Constant::F32(r(bytes)),
            DType::F64 => Constant::F64(r(bytes)),
            DType::U8 => Constant::U8(r(bytes)),
            DType::U16 => Constant::U16(r(bytes)),
            DType::U32 => Constant::U32(r(bytes)),
            DType::U64 => Constant::U64(r(bytes)),
            DType::I8 => Constant::I8(r(bytes)),
            DType::I16 => Constant::I16(r(bytes)),
            DType::I32 => Constant::I32(r(bytes)),
            DType::I64 => Constant::I64(r(bytes)),
        }
    }

    /// Writes the value to the front of `dst` in native endian.
    pub(crate) fn write(&self, dst: &mut [u8]) {
        let src: &[u8] = match self {
            Constant::F16(x) => bytemuck::bytes_of(x),
            Constant::F32(x) => bytemuck::bytes_of(x),
            Constant::F64(x) => bytemuck::bytes_of(x),
            Constant::U8(x) => bytemuck::bytes_of(x),
            Constant::U16(x) => bytemuck::bytes_of(x),
            Constant::U32(x) => bytemuck::bytes_of(x),
            Constant::U64(x) => bytemuck::bytes_of(x),
            Constant::I8(x) => bytemuck::bytes_of(x),
            Constant::I16(x) => bytemuck::bytes_of(x),
            Constant::I32(x) => bytemuck::bytes_of(x),
            Constant::I64(x) => bytemuck::bytes_of(x),
        };
        dst[..src.len()].copy_from_slice(src);
    }

    /// Native endian bytes of the value
    pub(crate) fn to_ne_bytes(self) -> Vec<u8> {
        let mut bytes = vec![0; self.dtype().byte_size()];
        self.write(&mut bytes);
        bytes
    }

    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Constant::F16(x) => x.to_f64(),
            Constant::F32(x) => f64::from(x),
            Constant::F64(x) => x,
            Constant::U8(x) => f64::from(x),
            Constant::U16(x) => f64::from(x),
            Constant::U32(x) => f64::from(x),
            #[allow(clippy::cast_precision_loss)]
            Constant::U64(x) => x as f64,
            Constant::I8(x) => f64::from(x),
            Constant::I16(x) => f64::from(x),
            Constant::I32(x) => f64::from(x),
            #[allow(clippy::cast_precision_loss)]
            Constant::I64(x) => x as f64,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn from_f64(dtype: DType, x: f64) -> Constant {
        match dtype {
            DType::F16 => Constant::F16(f16::from_f64(x)),
            DType::F32 => Constant::F32(x as f32),
            DType::F64 => Constant::F64(x),
            DType::U8 => Constant::U8(x as u8),
            DType::U16 => Constant::U16(x as u16),
            DType::U32 => Constant::U32(x as u32),
            DType::U64 => Constant::U64(x as u64),
            DType::I8 => Constant::I8(x as i8),
            DType::I16 => Constant::I16(x as i16),
            DType::I32 => Constant::I32(x as i32),
            DType::I64 => Constant::I64(x as i64),
        }
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Constant::F16(x) => f.write_fmt(format_args!("{x}")),
            Constant::F32(x) => f.write_fmt(format_args!("{x}")),
            Constant::F64(x) => f.write_fmt(format_args!("{x}")),
            Constant::U8(x) => f.write_fmt(format_args!("{x}")),
            Constant::U16(x) => f.write_fmt(format_args!("{x}")),
            Constant::U32(x) => f.write_fmt(format_args!("{x}")),
            Constant::U64(x) => f.write_fmt(format_args!("{x}")),
            Constant::I8(x) => f.write_fmt(format_args!("{x}")),
            Constant::I16(x) => f.write_fmt(format_args!("{x}")),
            Constant::I32(x) => f.write_fmt(format_args!("{x}")),
            Constant::I64(x) => f.write_fmt(format_args!("{x}")),
        }
    }
}
