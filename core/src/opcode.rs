/// IR opcodes.
///
/// Integer and float ops are polymorphic over the widths of their type
/// class; the concrete type is carried by the argument and result values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    // -- Meta --
    SourceInfo = 0,
    Fallback,

    // -- Memory --
    LoadHost,
    StoreHost,
    LoadGuest,
    StoreGuest,
    LoadContext,
    StoreContext,
    LoadLocal,
    StoreLocal,

    // -- Conversion --
    Ftoi,
    Itof,
    Sext,
    Zext,
    Trunc,
    Fext,
    Ftrunc,

    // -- Conditional --
    Select,
    CmpEq,
    CmpNe,
    CmpSge,
    CmpSgt,
    CmpUge,
    CmpUgt,
    CmpSle,
    CmpSlt,
    CmpUle,
    CmpUlt,
    FcmpEq,
    FcmpNe,
    FcmpGe,
    FcmpGt,
    FcmpLe,
    FcmpLt,

    // -- Integer arithmetic --
    Add,
    Sub,
    Smul,
    Umul,
    Div,
    Neg,
    Abs,

    // -- Float arithmetic --
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Fneg,
    Fabs,
    Sqrt,

    // -- Bitwise --
    And,
    Or,
    Xor,
    Not,
    Shl,
    Ashr,
    Lshr,
    Ashd,
    Lshd,

    // -- Control flow --
    Branch,
    BranchFalse,
    BranchTrue,
    Call,

    Count,
}

/// Opcode property flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpFlags(u16);

impl OpFlags {
    pub const NONE: OpFlags = OpFlags(0);
    /// Has side effects; never removed by dead code elimination.
    pub const SIDE_EFFECTS: OpFlags = OpFlags(0x01);
    /// Transfers control (to a block of the same unit or out to dispatch).
    pub const BRANCH: OpFlags = OpFlags(0x02);
    /// Calls into the host; caller-saved host registers are clobbered.
    pub const CALL: OpFlags = OpFlags(0x04);
    /// Produces a result value.
    pub const RESULT: OpFlags = OpFlags(0x08);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: OpFlags) -> Self {
        Self(self.0 | other.0)
    }
}

/// Static opcode definition.
#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    /// Lowercase name used by the textual IR format.
    pub name: &'static str,
    /// Number of arguments the op takes.
    pub nb_args: u8,
    pub flags: OpFlags,
}

const fn d(name: &'static str, nb_args: u8, flags: OpFlags) -> OpDef {
    OpDef {
        name,
        nb_args,
        flags,
    }
}

const SE: OpFlags = OpFlags::SIDE_EFFECTS;
const BR: OpFlags = OpFlags(OpFlags::BRANCH.0 | OpFlags::SIDE_EFFECTS.0);
const CL: OpFlags = OpFlags(OpFlags::CALL.0 | OpFlags::SIDE_EFFECTS.0);
const CR: OpFlags = OpFlags(OpFlags::CALL.0 | OpFlags::RESULT.0);
const R: OpFlags = OpFlags::RESULT;

/// Opcode definition table, indexed by `Opcode as usize`.
pub static OPCODE_DEFS: [OpDef; Opcode::Count as usize] = [
    d("source_info", 2, SE),
    d("fallback", 3, CL),
    d("load_host", 1, R),
    d("store_host", 2, SE),
    d("load_guest", 1, CR),
    d("store_guest", 2, CL),
    d("load_context", 1, R),
    d("store_context", 2, SE),
    d("load_local", 1, R),
    d("store_local", 2, SE),
    d("ftoi", 1, R),
    d("itof", 1, R),
    d("sext", 1, R),
    d("zext", 1, R),
    d("trunc", 1, R),
    d("fext", 1, R),
    d("ftrunc", 1, R),
    d("select", 3, R),
    d("eq", 2, R),
    d("ne", 2, R),
    d("sge", 2, R),
    d("sgt", 2, R),
    d("uge", 2, R),
    d("ugt", 2, R),
    d("sle", 2, R),
    d("slt", 2, R),
    d("ule", 2, R),
    d("ult", 2, R),
    d("feq", 2, R),
    d("fne", 2, R),
    d("fge", 2, R),
    d("fgt", 2, R),
    d("fle", 2, R),
    d("flt", 2, R),
    d("add", 2, R),
    d("sub", 2, R),
    d("smul", 2, R),
    d("umul", 2, R),
    d("div", 2, R),
    d("neg", 1, R),
    d("abs", 1, R),
    d("fadd", 2, R),
    d("fsub", 2, R),
    d("fmul", 2, R),
    d("fdiv", 2, R),
    d("fneg", 1, R),
    d("fabs", 1, R),
    d("sqrt", 1, R),
    d("and", 2, R),
    d("or", 2, R),
    d("xor", 2, R),
    d("not", 1, R),
    d("shl", 2, R),
    d("ashr", 2, R),
    d("lshr", 2, R),
    d("ashd", 2, R),
    d("lshd", 2, R),
    d("branch", 1, BR),
    d("branch_false", 2, BR),
    d("branch_true", 2, BR),
    d("call", 3, CL),
];

impl Opcode {
    pub const ALL: [Opcode; Opcode::Count as usize] = [
        Opcode::SourceInfo,
        Opcode::Fallback,
        Opcode::LoadHost,
        Opcode::StoreHost,
        Opcode::LoadGuest,
        Opcode::StoreGuest,
        Opcode::LoadContext,
        Opcode::StoreContext,
        Opcode::LoadLocal,
        Opcode::StoreLocal,
        Opcode::Ftoi,
        Opcode::Itof,
        Opcode::Sext,
        Opcode::Zext,
        Opcode::Trunc,
        Opcode::Fext,
        Opcode::Ftrunc,
        Opcode::Select,
        Opcode::CmpEq,
        Opcode::CmpNe,
        Opcode::CmpSge,
        Opcode::CmpSgt,
        Opcode::CmpUge,
        Opcode::CmpUgt,
        Opcode::CmpSle,
        Opcode::CmpSlt,
        Opcode::CmpUle,
        Opcode::CmpUlt,
        Opcode::FcmpEq,
        Opcode::FcmpNe,
        Opcode::FcmpGe,
        Opcode::FcmpGt,
        Opcode::FcmpLe,
        Opcode::FcmpLt,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Smul,
        Opcode::Umul,
        Opcode::Div,
        Opcode::Neg,
        Opcode::Abs,
        Opcode::Fadd,
        Opcode::Fsub,
        Opcode::Fmul,
        Opcode::Fdiv,
        Opcode::Fneg,
        Opcode::Fabs,
        Opcode::Sqrt,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Not,
        Opcode::Shl,
        Opcode::Ashr,
        Opcode::Lshr,
        Opcode::Ashd,
        Opcode::Lshd,
        Opcode::Branch,
        Opcode::BranchFalse,
        Opcode::BranchTrue,
        Opcode::Call,
    ];

    /// Look up the static definition for this opcode.
    pub fn def(self) -> &'static OpDef {
        &OPCODE_DEFS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.def().name
    }

    /// Case-insensitive lookup by textual name.
    pub fn from_name(name: &str) -> Option<Opcode> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }

    pub fn has_side_effects(self) -> bool {
        self.def().flags.contains(OpFlags::SIDE_EFFECTS)
    }

    pub fn is_branch(self) -> bool {
        self.def().flags.contains(OpFlags::BRANCH)
    }

    pub fn is_call(self) -> bool {
        self.def().flags.contains(OpFlags::CALL)
    }

    /// Whether this is an integer comparison producing an i8 flag.
    pub fn is_int_cmp(self) -> bool {
        (Opcode::CmpEq as u8..=Opcode::CmpUlt as u8).contains(&(self as u8))
    }

    /// Whether this is a float comparison producing an i8 flag.
    pub fn is_float_cmp(self) -> bool {
        (Opcode::FcmpEq as u8..=Opcode::FcmpLt as u8).contains(&(self as u8))
    }
}
