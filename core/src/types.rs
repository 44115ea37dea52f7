use std::fmt;

/// IR value types.
///
/// Every IR value (constant or instruction result) carries exactly one
/// of these. `Str` and `Blk` only appear as constant arguments: strings
/// for debug annotations, block references for intra-unit branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Type {
    I8 = 0,
    I16 = 1,
    I32 = 2,
    I64 = 3,
    F32 = 4,
    F64 = 5,
    V128 = 6,
    Str = 7,
    Blk = 8,
}

pub const TYPE_COUNT: usize = 9;

/// Type mask covering every integer type.
pub const INT_TYPES: u32 = Type::I8.mask()
    | Type::I16.mask()
    | Type::I32.mask()
    | Type::I64.mask();
/// Type mask covering the scalar float types.
pub const FLOAT_TYPES: u32 = Type::F32.mask() | Type::F64.mask();
/// Type mask covering the vector types.
pub const VECTOR_TYPES: u32 = Type::V128.mask();

impl Type {
    pub const ALL: [Type; TYPE_COUNT] = [
        Type::I8,
        Type::I16,
        Type::I32,
        Type::I64,
        Type::F32,
        Type::F64,
        Type::V128,
        Type::Str,
        Type::Blk,
    ];

    /// Size in bytes of a value of this type when stored in memory.
    /// `Str` and `Blk` have no storage representation.
    pub const fn size_bytes(self) -> u32 {
        match self {
            Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 | Type::F32 => 4,
            Type::I64 | Type::F64 => 8,
            Type::V128 => 16,
            Type::Str | Type::Blk => 0,
        }
    }

    pub const fn size_bits(self) -> u32 {
        self.size_bytes() * 8
    }

    pub const fn is_int(self) -> bool {
        matches!(self, Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub const fn is_vector(self) -> bool {
        matches!(self, Type::V128)
    }

    /// Single-bit mask for this type, used by register descriptions.
    pub const fn mask(self) -> u32 {
        1 << (self as u32)
    }

    /// Keyword used by the textual IR format.
    pub const fn name(self) -> &'static str {
        match self {
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::V128 => "v128",
            Type::Str => "str",
            Type::Blk => "blk",
        }
    }

    /// Case-insensitive lookup of a type keyword.
    pub fn from_name(name: &str) -> Option<Type> {
        Type::ALL
            .iter()
            .copied()
            .find(|ty| ty.name().eq_ignore_ascii_case(name))
    }

    /// Mask selecting the low `size_bits()` bits of an integer type.
    pub const fn int_mask(self) -> u64 {
        match self {
            Type::I8 => 0xff,
            Type::I16 => 0xffff,
            Type::I32 | Type::F32 => 0xffff_ffff,
            _ => u64::MAX,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
