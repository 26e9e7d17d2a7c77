/// Expression descriptor - tracks expression evaluation state
/// Mirrors Lua's expdesc structure for delayed code generation

/// Value of an empty jump list
pub const NO_JUMP: i32 = -1;

/// Expression kind - determines how the expression value is represented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpKind {
    /// No value (empty expression list)
    VVoid,
    VNil,
    VTrue,
    VFalse,
    /// Constant in constant table (info = constant index)
    VK,
    /// Numeric constant not yet in the table (nval = value)
    VKNum,
    /// Local variable (info = register)
    VLocal,
    /// Upvalue variable (info = upvalue index)
    VUpval,
    /// Global variable (info = index of the name constant)
    VGlobal,
    /// Indexed variable (info = table register, aux = key RK)
    VIndexed,
    /// Expression is a test/comparison (info = pc of its jump)
    VJmp,
    /// Result can go to any register (info = pc of the instruction)
    VReloc,
    /// Value in a fixed register (info = register)
    VNonReloc,
    /// Function call (info = pc of the CALL)
    VCall,
    /// Vararg expression (info = pc of the VARARG)
    VVararg,
}

/// Expression descriptor
#[derive(Debug, Clone, Copy)]
pub struct ExpDesc {
    pub kind: ExpKind,
    /// Generic info field - meaning depends on kind
    pub info: u32,
    pub aux: u32,
    /// Value of a VKNum
    pub nval: f64,
    /// Patch list for 'exit when true' jumps
    pub t: i32,
    /// Patch list for 'exit when false' jumps
    pub f: i32,
}

impl ExpDesc {
    /// init_exp
    pub fn new(kind: ExpKind, info: u32) -> Self {
        ExpDesc {
            kind,
            info,
            aux: 0,
            nval: 0.0,
            t: NO_JUMP,
            f: NO_JUMP,
        }
    }

    pub fn new_void() -> Self {
        Self::new(ExpKind::VVoid, 0)
    }

    pub fn new_number(n: f64) -> Self {
        ExpDesc {
            nval: n,
            ..Self::new(ExpKind::VKNum, 0)
        }
    }

    #[inline]
    pub fn has_jumps(&self) -> bool {
        self.t != self.f
    }

    /// Calls and varargs can produce any number of values
    #[inline]
    pub fn has_multret(&self) -> bool {
        matches!(self.kind, ExpKind::VCall | ExpKind::VVararg)
    }

    /// Numeric constant without pending jumps, usable for folding
    #[inline]
    pub fn is_numeral(&self) -> bool {
        self.kind == ExpKind::VKNum && self.t == NO_JUMP && self.f == NO_JUMP
    }

    /// Assignable expression
    pub fn is_var(&self) -> bool {
        matches!(
            self.kind,
            ExpKind::VLocal | ExpKind::VUpval | ExpKind::VGlobal | ExpKind::VIndexed
        )
    }
}
