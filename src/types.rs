use crate::error::{CudexError, Result};

/// Version tag for the transfer wire protocol.
pub const PROTOCOL_VERSION: u16 = 1;

/// Element type of a device buffer.
///
/// The discriminant is the wire encoding; it never changes for a released
/// version of the protocol.
#[derive(
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
)]
#[repr(u8)]
pub enum DType {
    I8 = 0,
    I16 = 1,
    I32 = 2,
    I64 = 3,
    U8 = 4,
    U16 = 5,
    U32 = 6,
    U64 = 7,
    /// Half floats exist only as a wire/storage type. There is no host-side
    /// `Element` for them and widening conversions reject them.
    F16 = 8,
    F32 = 9,
    F64 = 10,
}

impl DType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(&self) -> usize {
        match self {
            DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 | DType::F16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }

    /// Lowercase name, matching the column-level naming convention.
    pub const fn name(&self) -> &'static str {
        match self {
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::F16 => "float16",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

mod private {
    pub trait Sealed {}
}

/// Host-side scalar that can live in a device buffer.
///
/// Sealed: the set of element types is fixed by the protocol, implementing
/// this for external types would produce buffers no peer can decode.
pub trait Element: private::Sealed + Copy + Send + Sync + 'static {
    /// The buffer element type this scalar maps to.
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl private::Sealed for $ty {}
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;
            }
        )*
    };
}

impl_element! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

fn read_elems<T: Copy>(bytes: &[u8]) -> Vec<T> {
    let n = bytes.len() / std::mem::size_of::<T>();
    let base = bytes.as_ptr() as *const T;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        // The source may be unaligned for T, plain reads would be UB.
        out.push(unsafe { base.add(i).read_unaligned() });
    }
    out
}

fn write_elems<T: Copy, I: ExactSizeIterator<Item = T>>(iter: I) -> Vec<u8> {
    let mut out = vec![0u8; iter.len() * std::mem::size_of::<T>()];
    let base = out.as_mut_ptr() as *mut T;
    for (i, v) in iter.enumerate() {
        unsafe { base.add(i).write_unaligned(v) };
    }
    out
}

/// Convert a little-endian element slice between numeric types.
///
/// Conversion follows Rust `as` cast semantics (floats saturate on the way
/// to integers). `F16` is rejected in either position.
pub(crate) fn convert_slice(src: &[u8], from: DType, to: DType) -> Result<Vec<u8>> {
    if from == to {
        return Ok(src.to_vec());
    }
    macro_rules! cast_from {
        ($src_ty:ty) => {{
            let vals = read_elems::<$src_ty>(src);
            match to {
                DType::I8 => Ok(write_elems(vals.iter().map(|&v| v as i8))),
                DType::I16 => Ok(write_elems(vals.iter().map(|&v| v as i16))),
                DType::I32 => Ok(write_elems(vals.iter().map(|&v| v as i32))),
                DType::I64 => Ok(write_elems(vals.iter().map(|&v| v as i64))),
                DType::U8 => Ok(write_elems(vals.iter().map(|&v| v as u8))),
                DType::U16 => Ok(write_elems(vals.iter().map(|&v| v as u16))),
                DType::U32 => Ok(write_elems(vals.iter().map(|&v| v as u32))),
                DType::U64 => Ok(write_elems(vals.iter().map(|&v| v as u64))),
                DType::F32 => Ok(write_elems(vals.iter().map(|&v| v as f32))),
                DType::F64 => Ok(write_elems(vals.iter().map(|&v| v as f64))),
                DType::F16 => Err(CudexError::UnsupportedDType {
                    dtype: DType::F16,
                    op: "convert",
                }),
            }
        }};
    }
    match from {
        DType::I8 => cast_from!(i8),
        DType::I16 => cast_from!(i16),
        DType::I32 => cast_from!(i32),
        DType::I64 => cast_from!(i64),
        DType::U8 => cast_from!(u8),
        DType::U16 => cast_from!(u16),
        DType::U32 => cast_from!(u32),
        DType::U64 => cast_from!(u64),
        DType::F32 => cast_from!(f32),
        DType::F64 => cast_from!(f64),
        DType::F16 => Err(CudexError::UnsupportedDType {
            dtype: DType::F16,
            op: "convert",
        }),
    }
}
