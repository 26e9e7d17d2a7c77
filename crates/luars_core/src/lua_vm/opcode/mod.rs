mod instruction;

pub use instruction::Instruction;

/// Instruction format modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
}

/// Lua 5.1 opcode set (38 opcodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Move = 0, // R(A) := R(B)
    LoadK,    // R(A) := Kst(Bx)
    LoadBool, // R(A) := (Bool)B; if (C) pc++
    LoadNil,  // R(A) := ... := R(B) := nil
    GetUpval, // R(A) := UpValue[B]

    GetGlobal, // R(A) := Gbl[Kst(Bx)]
    GetTable,  // R(A) := R(B)[RK(C)]

    SetGlobal, // Gbl[Kst(Bx)] := R(A)
    SetUpval,  // UpValue[B] := R(A)
    SetTable,  // R(A)[RK(B)] := RK(C)

    NewTable, // R(A) := {} (size = B,C)

    Self_, // R(A+1) := R(B); R(A) := R(B)[RK(C)]

    Add, // R(A) := RK(B) + RK(C)
    Sub, // R(A) := RK(B) - RK(C)
    Mul, // R(A) := RK(B) * RK(C)
    Div, // R(A) := RK(B) / RK(C)
    Mod, // R(A) := RK(B) % RK(C)
    Pow, // R(A) := RK(B) ^ RK(C)
    Unm, // R(A) := -R(B)
    Not, // R(A) := not R(B)
    Len, // R(A) := length of R(B)

    Concat, // R(A) := R(B).. ... ..R(C)

    Jmp, // pc+=sBx

    Eq, // if ((RK(B) == RK(C)) ~= A) then pc++
    Lt, // if ((RK(B) <  RK(C)) ~= A) then pc++
    Le, // if ((RK(B) <= RK(C)) ~= A) then pc++

    Test,    // if not (R(A) <=> C) then pc++
    TestSet, // if (R(B) <=> C) then R(A) := R(B) else pc++

    Call,     // R(A), ... ,R(A+C-2) := R(A)(R(A+1), ... ,R(A+B-1))
    TailCall, // return R(A)(R(A+1), ... ,R(A+B-1))
    Return,   // return R(A), ... ,R(A+B-2)

    ForLoop, // R(A)+=R(A+2); if R(A) <?= R(A+1) then { pc+=sBx; R(A+3)=R(A) }
    ForPrep, // R(A)-=R(A+2); pc+=sBx

    TForLoop, // R(A+3), ... ,R(A+2+C) := R(A)(R(A+1), R(A+2)); if R(A+3) ~= nil then R(A+2)=R(A+3) else pc++

    SetList, // R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B

    Close,   // close all variables in the stack up to (>=) R(A)
    Closure, // R(A) := closure(KPROTO[Bx])

    Vararg, // R(A), R(A+1), ..., R(A+B-1) = vararg
}

const OPCODES: [OpCode; 38] = {
    use OpCode::*;
    [
        Move, LoadK, LoadBool, LoadNil, GetUpval, GetGlobal, GetTable, SetGlobal, SetUpval,
        SetTable, NewTable, Self_, Add, Sub, Mul, Div, Mod, Pow, Unm, Not, Len, Concat, Jmp, Eq,
        Lt, Le, Test, TestSet, Call, TailCall, Return, ForLoop, ForPrep, TForLoop, SetList, Close,
        Closure, Vararg,
    ]
};

impl OpCode {
    pub const COUNT: usize = OPCODES.len();

    /// Decode an opcode byte; only the compiler produces instructions, so
    /// an out-of-range byte is a broken prototype
    #[inline(always)]
    pub fn from_u8(byte: u8) -> Self {
        OPCODES[byte as usize]
    }

    pub fn get_mode(self) -> OpMode {
        use OpCode::*;
        match self {
            LoadK | GetGlobal | SetGlobal | Closure => OpMode::IABx,
            Jmp | ForLoop | ForPrep => OpMode::IAsBx,
            _ => OpMode::IABC,
        }
    }

    /// Instructions whose A register receives a value (testAMode/testTMode
    /// aside); used when tracing the producer of a register
    pub fn sets_a(self) -> bool {
        use OpCode::*;
        !matches!(
            self,
            SetGlobal | SetUpval | SetTable | Jmp | Eq | Lt | Le | Test | Return | SetList | Close
        )
    }
}

/// Converts an integer to a "floating point byte" (eeeeexxx): the value is
/// (1xxx) * 2^(eeeee - 1) when eeeee > 0, else xxx. Rounds up.
pub fn int2fb(mut x: u32) -> u32 {
    let mut e = 0;
    while x >= 16 {
        x = (x + 1) >> 1;
        e += 1;
    }
    if x < 8 { x } else { ((e + 1) << 3) | (x - 8) }
}

pub fn fb2int(x: u32) -> usize {
    let e = (x >> 3) & 31;
    if e == 0 {
        x as usize
    } else {
        (((x & 7) + 8) as usize) << (e - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_table_matches_discriminants() {
        for (i, op) in OPCODES.iter().enumerate() {
            assert_eq!(*op as usize, i);
        }
        assert_eq!(OpCode::COUNT, 38);
    }

    #[test]
    fn test_float_byte() {
        for n in [0u32, 1, 7, 8, 15, 16, 17, 100, 1000] {
            let back = fb2int(int2fb(n));
            assert!(back >= n as usize, "{n} -> {back}");
        }
        assert_eq!(fb2int(int2fb(8)), 8);
    }
}
