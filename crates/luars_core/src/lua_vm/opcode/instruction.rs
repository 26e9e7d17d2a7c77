/*----------------------------------------------------------------------
  Lua 5.1 instruction encoding (lopcodes.h)

  All instructions are unsigned 32-bit integers with the opcode in the
  low 6 bits.

        3 3 2 2 2 2 2 2 2 2 2 2 1 1 1 1 1 1 1 1 1 1 0 0 0 0 0 0 0 0 0 0
        1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0
  iABC        B(9)       |      C(9)       |     A(8)      |  Op(6)    |
  iABx               Bx(18)                |     A(8)      |  Op(6)    |
  iAsBx             sBx(18)                |     A(8)      |  Op(6)    |

  sBx is stored in excess-K form: the written value minus MAXARG_sBx.
  B and C operands marked RK name a register when the top bit (BITRK) is
  clear and a constant index when it is set.
----------------------------------------------------------------------*/

use super::OpCode;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(u32);

impl Instruction {
    pub const SIZE_OP: u32 = 6;
    pub const SIZE_A: u32 = 8;
    pub const SIZE_B: u32 = 9;
    pub const SIZE_C: u32 = 9;
    pub const SIZE_BX: u32 = Self::SIZE_C + Self::SIZE_B;

    pub const POS_OP: u32 = 0;
    pub const POS_A: u32 = Self::POS_OP + Self::SIZE_OP;
    pub const POS_C: u32 = Self::POS_A + Self::SIZE_A;
    pub const POS_B: u32 = Self::POS_C + Self::SIZE_C;
    pub const POS_BX: u32 = Self::POS_C;

    pub const MAX_A: u32 = (1 << Self::SIZE_A) - 1;
    pub const MAX_B: u32 = (1 << Self::SIZE_B) - 1;
    pub const MAX_C: u32 = (1 << Self::SIZE_C) - 1;
    pub const MAX_BX: u32 = (1 << Self::SIZE_BX) - 1;
    pub const MAX_SBX: i32 = (Self::MAX_BX >> 1) as i32;

    /// Bit marking an RK operand as a constant index
    pub const BITRK: u32 = 1 << (Self::SIZE_B - 1);
    /// Largest constant index usable as an RK operand
    pub const MAXINDEXRK: u32 = Self::BITRK - 1;

    #[inline(always)]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline(always)]
    const fn mask(size: u32) -> u32 {
        (1 << size) - 1
    }

    #[inline(always)]
    fn arg(self, pos: u32, size: u32) -> u32 {
        (self.0 >> pos) & Self::mask(size)
    }

    #[inline(always)]
    fn set_arg(&mut self, v: u32, pos: u32, size: u32) {
        let m = Self::mask(size) << pos;
        self.0 = (self.0 & !m) | ((v << pos) & m);
    }

    #[inline(always)]
    pub fn get_opcode(self) -> OpCode {
        OpCode::from_u8(self.arg(Self::POS_OP, Self::SIZE_OP) as u8)
    }

    #[inline(always)]
    pub fn get_a(self) -> u32 {
        self.arg(Self::POS_A, Self::SIZE_A)
    }

    #[inline(always)]
    pub fn get_b(self) -> u32 {
        self.arg(Self::POS_B, Self::SIZE_B)
    }

    #[inline(always)]
    pub fn get_c(self) -> u32 {
        self.arg(Self::POS_C, Self::SIZE_C)
    }

    #[inline(always)]
    pub fn get_bx(self) -> u32 {
        self.arg(Self::POS_BX, Self::SIZE_BX)
    }

    #[inline(always)]
    pub fn get_sbx(self) -> i32 {
        self.get_bx() as i32 - Self::MAX_SBX
    }

    pub fn set_opcode(&mut self, op: OpCode) {
        self.set_arg(op as u32, Self::POS_OP, Self::SIZE_OP);
    }

    pub fn set_a(&mut self, v: u32) {
        self.set_arg(v, Self::POS_A, Self::SIZE_A);
    }

    pub fn set_b(&mut self, v: u32) {
        self.set_arg(v, Self::POS_B, Self::SIZE_B);
    }

    pub fn set_c(&mut self, v: u32) {
        self.set_arg(v, Self::POS_C, Self::SIZE_C);
    }

    pub fn set_bx(&mut self, v: u32) {
        self.set_arg(v, Self::POS_BX, Self::SIZE_BX);
    }

    pub fn set_sbx(&mut self, v: i32) {
        self.set_bx((v + Self::MAX_SBX) as u32);
    }

    #[inline(always)]
    pub fn is_k(x: u32) -> bool {
        x & Self::BITRK != 0
    }

    #[inline(always)]
    pub fn index_k(x: u32) -> usize {
        (x & !Self::BITRK) as usize
    }

    #[inline(always)]
    pub fn rk_ask(x: u32) -> u32 {
        x | Self::BITRK
    }

    // ============ Constructors ============

    pub fn create_abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        let mut i = Self(op as u32);
        i.set_a(a);
        i.set_b(b);
        i.set_c(c);
        i
    }

    pub fn create_abx(op: OpCode, a: u32, bx: u32) -> Self {
        let mut i = Self(op as u32);
        i.set_a(a);
        i.set_bx(bx);
        i
    }

    pub fn create_asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        let mut i = Self(op as u32);
        i.set_a(a);
        i.set_sbx(sbx);
        i
    }

    /// Raw argument word following `SETLIST` with C == 0
    pub fn create_raw(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = self.get_opcode();
        match op.get_mode() {
            super::OpMode::IABC => write!(
                f,
                "{:?} {} {} {}",
                op,
                self.get_a(),
                self.get_b(),
                self.get_c()
            ),
            super::OpMode::IABx => write!(f, "{:?} {} {}", op, self.get_a(), self.get_bx()),
            super::OpMode::IAsBx => write!(f, "{:?} {} {}", op, self.get_a(), self.get_sbx()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_layout() {
        let i = Instruction::create_abc(OpCode::Add, 3, Instruction::rk_ask(7), 250);
        assert_eq!(i.get_opcode(), OpCode::Add);
        assert_eq!(i.get_a(), 3);
        assert!(Instruction::is_k(i.get_b()));
        assert_eq!(Instruction::index_k(i.get_b()), 7);
        assert_eq!(i.get_c(), 250);
    }

    #[test]
    fn test_signed_bx() {
        let j = Instruction::create_asbx(OpCode::Jmp, 0, -5);
        assert_eq!(j.get_sbx(), -5);
        let k = Instruction::create_asbx(OpCode::ForLoop, 2, Instruction::MAX_SBX);
        assert_eq!(k.get_sbx(), Instruction::MAX_SBX);
        assert_eq!(k.get_a(), 2);
    }
}
