use crate::block::BlockId;
use crate::instr::InstrId;
use crate::types::Type;

/// Index of a value in its owning `Ir` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Compile-time constant payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Blk(BlockId),
}

impl Constant {
    pub fn ty(&self) -> Type {
        match self {
            Constant::I8(_) => Type::I8,
            Constant::I16(_) => Type::I16,
            Constant::I32(_) => Type::I32,
            Constant::I64(_) => Type::I64,
            Constant::F32(_) => Type::F32,
            Constant::F64(_) => Type::F64,
            Constant::Str(_) => Type::Str,
            Constant::Blk(_) => Type::Blk,
        }
    }

    /// Build an integer or float constant of `ty` from raw bits,
    /// truncating to the type's width.
    pub fn from_bits(ty: Type, bits: u64) -> Constant {
        match ty {
            Type::I8 => Constant::I8(bits as u8 as i8),
            Type::I16 => Constant::I16(bits as u16 as i16),
            Type::I32 => Constant::I32(bits as u32 as i32),
            Type::I64 => Constant::I64(bits as i64),
            Type::F32 => Constant::F32(f32::from_bits(bits as u32)),
            Type::F64 => Constant::F64(f64::from_bits(bits)),
            _ => panic!("no bit representation for {ty} constants"),
        }
    }
}

/// Where a value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    /// Immediate, no definition site.
    Const(Constant),
    /// Result of exactly one instruction.
    Def(InstrId),
}

/// One argument slot referencing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    pub instr: InstrId,
    pub arg: usize,
}

/// A typed IR operand.
#[derive(Debug, Clone)]
pub struct Value {
    pub ty: Type,
    pub kind: ValueKind,
    /// Host register assigned by the register allocator.
    pub reg: Option<u8>,
    pub(crate) uses: Vec<Use>,
}

macro_rules! const_accessor {
    ($name:ident, $variant:ident, $ret:ty) => {
        /// Read the constant payload. Panics when the value is not a
        /// constant of the matching type.
        pub fn $name(&self) -> $ret {
            match &self.kind {
                ValueKind::Const(Constant::$variant(v)) => *v,
                _ => panic!(
                    "expected {} constant, found {} {}",
                    stringify!($name),
                    self.ty,
                    if self.is_constant() { "constant" } else { "value" }
                ),
            }
        }
    };
}

impl Value {
    pub(crate) fn new_const(c: Constant) -> Self {
        Self {
            ty: c.ty(),
            kind: ValueKind::Const(c),
            reg: None,
            uses: Vec::new(),
        }
    }

    pub(crate) fn new_def(ty: Type, instr: InstrId) -> Self {
        Self {
            ty,
            kind: ValueKind::Def(instr),
            reg: None,
            uses: Vec::new(),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ValueKind::Const(_))
    }

    /// Defining instruction, `None` for constants.
    pub fn def(&self) -> Option<InstrId> {
        match self.kind {
            ValueKind::Def(instr) => Some(instr),
            ValueKind::Const(_) => None,
        }
    }

    pub fn constant(&self) -> Option<&Constant> {
        match &self.kind {
            ValueKind::Const(c) => Some(c),
            ValueKind::Def(_) => None,
        }
    }

    pub fn uses(&self) -> &[Use] {
        &self.uses
    }

    const_accessor!(i8, I8, i8);
    const_accessor!(i16, I16, i16);
    const_accessor!(i32, I32, i32);
    const_accessor!(i64, I64, i64);
    const_accessor!(f32, F32, f32);
    const_accessor!(f64, F64, f64);
    const_accessor!(blk, Blk, BlockId);

    pub fn str(&self) -> &str {
        match &self.kind {
            ValueKind::Const(Constant::Str(s)) => s,
            _ => panic!("expected str constant, found {}", self.ty),
        }
    }

    /// Integer constant zero-extended to 64 bits.
    pub fn zext(&self) -> u64 {
        match &self.kind {
            ValueKind::Const(Constant::I8(v)) => *v as u8 as u64,
            ValueKind::Const(Constant::I16(v)) => *v as u16 as u64,
            ValueKind::Const(Constant::I32(v)) => *v as u32 as u64,
            ValueKind::Const(Constant::I64(v)) => *v as u64,
            _ => panic!("expected integer constant, found {}", self.ty),
        }
    }

    /// Integer constant sign-extended to 64 bits.
    pub fn sext(&self) -> i64 {
        match &self.kind {
            ValueKind::Const(Constant::I8(v)) => *v as i64,
            ValueKind::Const(Constant::I16(v)) => *v as i64,
            ValueKind::Const(Constant::I32(v)) => *v as i64,
            ValueKind::Const(Constant::I64(v)) => *v,
            _ => panic!("expected integer constant, found {}", self.ty),
        }
    }

    /// Raw bits of an integer or float constant, zero-extended.
    pub fn bits(&self) -> u64 {
        match &self.kind {
            ValueKind::Const(Constant::F32(v)) => v.to_bits() as u64,
            ValueKind::Const(Constant::F64(v)) => v.to_bits(),
            _ => self.zext(),
        }
    }
}
