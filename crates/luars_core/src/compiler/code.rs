// Code generation - Port from lcode.c
use crate::compiler::expdesc::{ExpDesc, ExpKind, NO_JUMP};
use crate::compiler::func_state::FuncState;
use crate::compiler::{ParseError, ParseResult};
use crate::lua_vm::lua_limits::{LFIELDS_PER_FLUSH, MAXSTACK};
use crate::lua_vm::{Instruction, LUA_MULTRET, OpCode};

/// No register (used by TESTSET patching)
const NO_REG: u32 = Instruction::MAX_A;

/// Unary operators (UnOpr)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOpr {
    Minus,
    Not,
    Len,
}

/// Binary operators (BinOpr), in priority-table order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpr {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Ne,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOpr {
    /// (left, right) priority
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOpr::Add | BinOpr::Sub => (6, 6),
            BinOpr::Mul | BinOpr::Div | BinOpr::Mod => (7, 7),
            // right associative
            BinOpr::Pow => (10, 9),
            BinOpr::Concat => (5, 4),
            BinOpr::Ne | BinOpr::Eq | BinOpr::Lt | BinOpr::Le | BinOpr::Gt | BinOpr::Ge => (3, 3),
            BinOpr::And => (2, 2),
            BinOpr::Or => (1, 1),
        }
    }

    fn arith_op(self) -> Option<OpCode> {
        match self {
            BinOpr::Add => Some(OpCode::Add),
            BinOpr::Sub => Some(OpCode::Sub),
            BinOpr::Mul => Some(OpCode::Mul),
            BinOpr::Div => Some(OpCode::Div),
            BinOpr::Mod => Some(OpCode::Mod),
            BinOpr::Pow => Some(OpCode::Pow),
            _ => None,
        }
    }
}

/// Priority of unary operators
pub const UNARY_PRIORITY: u8 = 8;

/// Instructions followed by a conditional jump
fn is_test_op(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::Test | OpCode::TestSet | OpCode::TForLoop
    )
}

impl FuncState {
    // ============ Emission ============

    // Port of luaK_code
    fn code(&mut self, i: Instruction) -> ParseResult<usize> {
        self.discharge_jpc()?;
        self.chunk.code.push(i);
        self.chunk.line_info.push(self.lastline);
        Ok(self.pc() - 1)
    }

    pub fn emit_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> ParseResult<usize> {
        self.code(Instruction::create_abc(op, a, b, c))
    }

    pub fn emit_abx(&mut self, op: OpCode, a: u32, bx: u32) -> ParseResult<usize> {
        self.code(Instruction::create_abx(op, a, bx))
    }

    pub fn emit_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> ParseResult<usize> {
        self.code(Instruction::create_asbx(op, a, sbx))
    }

    // Port of luaK_fixline
    pub fn fix_line(&mut self, line: u32) {
        if let Some(last) = self.chunk.line_info.last_mut() {
            *last = line;
        }
    }

    // Port of luaK_nil
    pub fn nil(&mut self, from: u32, n: u32) -> ParseResult<()> {
        let pc = self.pc();
        if pc as i32 > self.last_target {
            if pc == 0 {
                // positions are already clean
                if from >= self.nactvar {
                    return Ok(());
                }
            } else {
                let previous = &mut self.chunk.code[pc - 1];
                if previous.get_opcode() == OpCode::LoadNil {
                    let pfrom = previous.get_a();
                    let pto = previous.get_b();
                    if pfrom <= from && from <= pto + 1 {
                        if from + n - 1 > pto {
                            previous.set_b(from + n - 1);
                        }
                        return Ok(());
                    }
                }
            }
        }
        self.emit_abc(OpCode::LoadNil, from, from + n - 1, 0)?;
        Ok(())
    }

    // ============ Jumps ============

    // Port of luaK_jump
    pub fn jump(&mut self) -> ParseResult<i32> {
        let jpc = std::mem::replace(&mut self.jpc, NO_JUMP);
        let mut j = self.emit_asbx(OpCode::Jmp, 0, NO_JUMP)? as i32;
        self.concat(&mut j, jpc)?;
        Ok(j)
    }

    // Port of luaK_ret
    pub fn ret(&mut self, first: u32, nret: i32) -> ParseResult<()> {
        self.emit_abc(OpCode::Return, first, (nret + 1) as u32, 0)?;
        Ok(())
    }

    fn cond_jump(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> ParseResult<i32> {
        self.emit_abc(op, a, b, c)?;
        self.jump()
    }

    fn fix_jump(&mut self, pc: i32, dest: i32) -> ParseResult<()> {
        let offset = dest - (pc + 1);
        if offset.abs() > Instruction::MAX_SBX {
            return Err(ParseError::Syntax("control structure too long".into()));
        }
        self.chunk.code[pc as usize].set_sbx(offset);
        Ok(())
    }

    // Port of luaK_getlabel: marks the current pc as a jump target
    pub fn get_label(&mut self) -> i32 {
        self.last_target = self.pc() as i32;
        self.last_target
    }

    fn get_jump(&self, pc: i32) -> i32 {
        let offset = self.chunk.code[pc as usize].get_sbx();
        if offset == NO_JUMP {
            NO_JUMP
        } else {
            pc + 1 + offset
        }
    }

    /// Index of the instruction controlling the jump at `pc`
    fn jump_control(&self, pc: i32) -> usize {
        let pc = pc as usize;
        if pc >= 1 && is_test_op(self.chunk.code[pc - 1].get_opcode()) {
            pc - 1
        } else {
            pc
        }
    }

    /// Some jump in the list does not produce a value
    fn need_value(&self, mut list: i32) -> bool {
        while list != NO_JUMP {
            let i = self.chunk.code[self.jump_control(list)];
            if i.get_opcode() != OpCode::TestSet {
                return true;
            }
            list = self.get_jump(list);
        }
        false
    }

    fn patch_test_reg(&mut self, node: i32, reg: u32) -> bool {
        let idx = self.jump_control(node);
        let i = &mut self.chunk.code[idx];
        if i.get_opcode() != OpCode::TestSet {
            return false;
        }
        if reg != NO_REG && reg != i.get_b() {
            i.set_a(reg);
        } else {
            // no register to put value or register already has the value
            *i = Instruction::create_abc(OpCode::Test, i.get_b(), 0, i.get_c());
        }
        true
    }

    fn remove_values(&mut self, mut list: i32) {
        while list != NO_JUMP {
            self.patch_test_reg(list, NO_REG);
            list = self.get_jump(list);
        }
    }

    fn patch_list_aux(&mut self, mut list: i32, vtarget: i32, reg: u32, dtarget: i32) -> ParseResult<()> {
        while list != NO_JUMP {
            let next = self.get_jump(list);
            if self.patch_test_reg(list, reg) {
                self.fix_jump(list, vtarget)?;
            } else {
                self.fix_jump(list, dtarget)?;
            }
            list = next;
        }
        Ok(())
    }

    fn discharge_jpc(&mut self) -> ParseResult<()> {
        let pc = self.pc() as i32;
        let jpc = std::mem::replace(&mut self.jpc, NO_JUMP);
        self.patch_list_aux(jpc, pc, NO_REG, pc)
    }

    // Port of luaK_patchlist
    pub fn patch_list(&mut self, list: i32, target: i32) -> ParseResult<()> {
        if target == self.pc() as i32 {
            self.patch_to_here(list)
        } else {
            debug_assert!(target < self.pc() as i32);
            self.patch_list_aux(list, target, NO_REG, target)
        }
    }

    // Port of luaK_patchtohere
    pub fn patch_to_here(&mut self, list: i32) -> ParseResult<()> {
        self.get_label();
        let mut jpc = self.jpc;
        self.concat(&mut jpc, list)?;
        self.jpc = jpc;
        Ok(())
    }

    // Port of luaK_concat
    pub fn concat(&mut self, l1: &mut i32, l2: i32) -> ParseResult<()> {
        if l2 == NO_JUMP {
            return Ok(());
        }
        if *l1 == NO_JUMP {
            *l1 = l2;
            return Ok(());
        }
        let mut list = *l1;
        loop {
            let next = self.get_jump(list);
            if next == NO_JUMP {
                break;
            }
            list = next;
        }
        self.fix_jump(list, l2)
    }

    // ============ Registers ============

    // Port of luaK_checkstack
    pub fn check_stack(&mut self, n: u32) -> ParseResult<()> {
        let newstack = (self.freereg + n) as usize;
        if newstack > self.chunk.max_stack_size {
            if newstack >= MAXSTACK {
                return Err(ParseError::Syntax("function or expression too complex".into()));
            }
            self.chunk.max_stack_size = newstack;
        }
        Ok(())
    }

    // Port of luaK_reserveregs
    pub fn reserve_regs(&mut self, n: u32) -> ParseResult<()> {
        self.check_stack(n)?;
        self.freereg += n;
        Ok(())
    }

    fn free_reg(&mut self, reg: u32) {
        if !Instruction::is_k(reg) && reg >= self.nactvar {
            self.freereg -= 1;
            debug_assert_eq!(reg, self.freereg);
        }
    }

    fn free_exp(&mut self, e: &ExpDesc) {
        if e.kind == ExpKind::VNonReloc {
            self.free_reg(e.info);
        }
    }

    // ============ Expressions ============

    // Port of luaK_setreturns
    pub fn set_returns(&mut self, e: &mut ExpDesc, nresults: i32) -> ParseResult<()> {
        match e.kind {
            ExpKind::VCall => self.code_at(e).set_c((nresults + 1) as u32),
            ExpKind::VVararg => {
                let freereg = self.freereg;
                let i = self.code_at(e);
                i.set_b((nresults + 1) as u32);
                i.set_a(freereg);
                self.reserve_regs(1)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn set_multret(&mut self, e: &mut ExpDesc) -> ParseResult<()> {
        self.set_returns(e, LUA_MULTRET)
    }

    // Port of luaK_setoneret
    pub fn set_one_ret(&mut self, e: &mut ExpDesc) {
        match e.kind {
            ExpKind::VCall => {
                e.kind = ExpKind::VNonReloc;
                e.info = self.code_at(e).get_a();
            }
            ExpKind::VVararg => {
                self.code_at(e).set_b(2);
                e.kind = ExpKind::VReloc;
            }
            _ => {}
        }
    }

    // Port of luaK_dischargevars
    pub fn discharge_vars(&mut self, e: &mut ExpDesc) -> ParseResult<()> {
        match e.kind {
            ExpKind::VLocal => e.kind = ExpKind::VNonReloc,
            ExpKind::VUpval => {
                e.info = self.emit_abc(OpCode::GetUpval, 0, e.info, 0)? as u32;
                e.kind = ExpKind::VReloc;
            }
            ExpKind::VGlobal => {
                e.info = self.emit_abx(OpCode::GetGlobal, 0, e.info)? as u32;
                e.kind = ExpKind::VReloc;
            }
            ExpKind::VIndexed => {
                self.free_reg(e.aux);
                self.free_reg(e.info);
                e.info = self.emit_abc(OpCode::GetTable, 0, e.info, e.aux)? as u32;
                e.kind = ExpKind::VReloc;
            }
            ExpKind::VVararg | ExpKind::VCall => self.set_one_ret(e),
            _ => {}
        }
        Ok(())
    }

    fn code_label(&mut self, a: u32, b: u32, jump: u32) -> ParseResult<i32> {
        self.get_label();
        Ok(self.emit_abc(OpCode::LoadBool, a, b, jump)? as i32)
    }

    fn discharge2reg(&mut self, e: &mut ExpDesc, reg: u32) -> ParseResult<()> {
        self.discharge_vars(e)?;
        match e.kind {
            ExpKind::VNil => self.nil(reg, 1)?,
            ExpKind::VFalse | ExpKind::VTrue => {
                self.emit_abc(OpCode::LoadBool, reg, u32::from(e.kind == ExpKind::VTrue), 0)?;
            }
            ExpKind::VK => {
                self.emit_abx(OpCode::LoadK, reg, e.info)?;
            }
            ExpKind::VKNum => {
                let k = self.number_k(e.nval)?;
                self.emit_abx(OpCode::LoadK, reg, k)?;
            }
            ExpKind::VReloc => self.code_at(e).set_a(reg),
            ExpKind::VNonReloc => {
                if reg != e.info {
                    self.emit_abc(OpCode::Move, reg, e.info, 0)?;
                }
            }
            // VVoid or VJmp: nothing to do
            _ => return Ok(()),
        }
        e.info = reg;
        e.kind = ExpKind::VNonReloc;
        Ok(())
    }

    fn discharge2anyreg(&mut self, e: &mut ExpDesc) -> ParseResult<()> {
        if e.kind != ExpKind::VNonReloc {
            self.reserve_regs(1)?;
            self.discharge2reg(e, self.freereg - 1)?;
        }
        Ok(())
    }

    fn exp2reg(&mut self, e: &mut ExpDesc, reg: u32) -> ParseResult<()> {
        self.discharge2reg(e, reg)?;
        if e.kind == ExpKind::VJmp {
            let mut t = e.t;
            self.concat(&mut t, e.info as i32)?;
            e.t = t;
        }
        if e.has_jumps() {
            let mut p_f = NO_JUMP; // position of an eventual LOAD false
            let mut p_t = NO_JUMP; // position of an eventual LOAD true
            if self.need_value(e.t) || self.need_value(e.f) {
                let fj = if e.kind == ExpKind::VJmp {
                    NO_JUMP
                } else {
                    self.jump()?
                };
                p_f = self.code_label(reg, 0, 1)?;
                p_t = self.code_label(reg, 1, 0)?;
                self.patch_to_here(fj)?;
            }
            let final_pc = self.get_label();
            self.patch_list_aux(e.f, final_pc, reg, p_f)?;
            self.patch_list_aux(e.t, final_pc, reg, p_t)?;
        }
        e.f = NO_JUMP;
        e.t = NO_JUMP;
        e.info = reg;
        e.kind = ExpKind::VNonReloc;
        Ok(())
    }

    // Port of luaK_exp2nextreg
    pub fn exp2nextreg(&mut self, e: &mut ExpDesc) -> ParseResult<()> {
        self.discharge_vars(e)?;
        self.free_exp(e);
        self.reserve_regs(1)?;
        self.exp2reg(e, self.freereg - 1)
    }

    // Port of luaK_exp2anyreg
    pub fn exp2anyreg(&mut self, e: &mut ExpDesc) -> ParseResult<u32> {
        self.discharge_vars(e)?;
        if e.kind == ExpKind::VNonReloc {
            if !e.has_jumps() {
                return Ok(e.info);
            }
            // register is not a local: put the final result in it
            if e.info >= self.nactvar {
                self.exp2reg(e, e.info)?;
                return Ok(e.info);
            }
        }
        self.exp2nextreg(e)?;
        Ok(e.info)
    }

    // Port of luaK_exp2val
    pub fn exp2val(&mut self, e: &mut ExpDesc) -> ParseResult<()> {
        if e.has_jumps() {
            self.exp2anyreg(e)?;
            Ok(())
        } else {
            self.discharge_vars(e)
        }
    }

    // Port of luaK_exp2RK
    pub fn exp2rk(&mut self, e: &mut ExpDesc) -> ParseResult<u32> {
        self.exp2val(e)?;
        match e.kind {
            ExpKind::VKNum | ExpKind::VTrue | ExpKind::VFalse | ExpKind::VNil => {
                if self.nk() <= Instruction::MAXINDEXRK as usize {
                    e.info = match e.kind {
                        ExpKind::VNil => self.nil_k()?,
                        ExpKind::VKNum => self.number_k(e.nval)?,
                        _ => self.bool_k(e.kind == ExpKind::VTrue)?,
                    };
                    e.kind = ExpKind::VK;
                    return Ok(Instruction::rk_ask(e.info));
                }
            }
            ExpKind::VK => {
                if e.info <= Instruction::MAXINDEXRK {
                    return Ok(Instruction::rk_ask(e.info));
                }
            }
            _ => {}
        }
        // not a constant in the right range: put it in a register
        self.exp2anyreg(e)
    }

    // Port of luaK_storevar
    pub fn store_var(&mut self, var: &ExpDesc, ex: &mut ExpDesc) -> ParseResult<()> {
        match var.kind {
            ExpKind::VLocal => {
                self.free_exp(ex);
                return self.exp2reg(ex, var.info);
            }
            ExpKind::VUpval => {
                let e = self.exp2anyreg(ex)?;
                self.emit_abc(OpCode::SetUpval, e, var.info, 0)?;
            }
            ExpKind::VGlobal => {
                let e = self.exp2anyreg(ex)?;
                self.emit_abx(OpCode::SetGlobal, e, var.info)?;
            }
            ExpKind::VIndexed => {
                let e = self.exp2rk(ex)?;
                self.emit_abc(OpCode::SetTable, var.info, var.aux, e)?;
            }
            _ => debug_assert!(false, "invalid var kind to store"),
        }
        self.free_exp(ex);
        Ok(())
    }

    // Port of luaK_self
    pub fn self_(&mut self, e: &mut ExpDesc, key: &mut ExpDesc) -> ParseResult<()> {
        self.exp2anyreg(e)?;
        self.free_exp(e);
        let func = self.freereg;
        self.reserve_regs(2)?;
        let k = self.exp2rk(key)?;
        self.emit_abc(OpCode::Self_, func, e.info, k)?;
        self.free_exp(key);
        e.info = func;
        e.kind = ExpKind::VNonReloc;
        Ok(())
    }

    fn invert_jump(&mut self, e: &ExpDesc) {
        let idx = self.jump_control(e.info as i32);
        let i = &mut self.chunk.code[idx];
        let a = i.get_a();
        i.set_a(u32::from(a == 0));
    }

    fn jump_on_cond(&mut self, e: &mut ExpDesc, cond: bool) -> ParseResult<i32> {
        if e.kind == ExpKind::VReloc {
            let ie = *self.code_at(e);
            if ie.get_opcode() == OpCode::Not {
                // remove previous OP_NOT
                self.chunk.code.pop();
                self.chunk.line_info.pop();
                return self.cond_jump(OpCode::Test, ie.get_b(), 0, u32::from(!cond));
            }
        }
        self.discharge2anyreg(e)?;
        self.free_exp(e);
        self.cond_jump(OpCode::TestSet, NO_REG, e.info, u32::from(cond))
    }

    // Port of luaK_goiftrue
    pub fn go_if_true(&mut self, e: &mut ExpDesc) -> ParseResult<()> {
        self.discharge_vars(e)?;
        let pc = match e.kind {
            // always true; do nothing
            ExpKind::VK | ExpKind::VKNum | ExpKind::VTrue => NO_JUMP,
            ExpKind::VFalse => self.jump()?,
            ExpKind::VJmp => {
                self.invert_jump(e);
                e.info as i32
            }
            _ => self.jump_on_cond(e, false)?,
        };
        let mut f = e.f;
        self.concat(&mut f, pc)?;
        e.f = f;
        self.patch_to_here(e.t)?;
        e.t = NO_JUMP;
        Ok(())
    }

    fn go_if_false(&mut self, e: &mut ExpDesc) -> ParseResult<()> {
        self.discharge_vars(e)?;
        let pc = match e.kind {
            ExpKind::VNil | ExpKind::VFalse => NO_JUMP,
            ExpKind::VTrue => self.jump()?,
            ExpKind::VJmp => e.info as i32,
            _ => self.jump_on_cond(e, true)?,
        };
        let mut t = e.t;
        self.concat(&mut t, pc)?;
        e.t = t;
        self.patch_to_here(e.f)?;
        e.f = NO_JUMP;
        Ok(())
    }

    fn code_not(&mut self, e: &mut ExpDesc) -> ParseResult<()> {
        self.discharge_vars(e)?;
        match e.kind {
            ExpKind::VNil | ExpKind::VFalse => e.kind = ExpKind::VTrue,
            ExpKind::VK | ExpKind::VKNum | ExpKind::VTrue => e.kind = ExpKind::VFalse,
            ExpKind::VJmp => self.invert_jump(e),
            ExpKind::VReloc | ExpKind::VNonReloc => {
                self.discharge2anyreg(e)?;
                self.free_exp(e);
                e.info = self.emit_abc(OpCode::Not, 0, e.info, 0)? as u32;
                e.kind = ExpKind::VReloc;
            }
            _ => debug_assert!(false, "cannot negate expression"),
        }
        // interchange true and false lists
        std::mem::swap(&mut e.f, &mut e.t);
        self.remove_values(e.f);
        self.remove_values(e.t);
        Ok(())
    }

    // Port of luaK_indexed
    pub fn indexed(&mut self, t: &mut ExpDesc, k: &mut ExpDesc) -> ParseResult<()> {
        t.aux = self.exp2rk(k)?;
        t.kind = ExpKind::VIndexed;
        Ok(())
    }

    fn const_folding(op: OpCode, e1: &mut ExpDesc, e2: &ExpDesc) -> bool {
        if !e1.is_numeral() || !e2.is_numeral() {
            return false;
        }
        let (v1, v2) = (e1.nval, e2.nval);
        let r = match op {
            OpCode::Add => v1 + v2,
            OpCode::Sub => v1 - v2,
            OpCode::Mul => v1 * v2,
            OpCode::Div if v2 != 0.0 => v1 / v2,
            OpCode::Mod if v2 != 0.0 => v1 - (v1 / v2).floor() * v2,
            OpCode::Pow => v1.powf(v2),
            OpCode::Unm => -v1,
            _ => return false,
        };
        if r.is_nan() {
            return false;
        }
        e1.nval = r;
        true
    }

    fn code_arith(&mut self, op: OpCode, e1: &mut ExpDesc, e2: &mut ExpDesc) -> ParseResult<()> {
        if Self::const_folding(op, e1, e2) {
            return Ok(());
        }
        let o2 = if op != OpCode::Unm && op != OpCode::Len {
            self.exp2rk(e2)?
        } else {
            0
        };
        let o1 = self.exp2rk(e1)?;
        if o1 > o2 {
            self.free_exp(e1);
            self.free_exp(e2);
        } else {
            self.free_exp(e2);
            self.free_exp(e1);
        }
        e1.info = self.emit_abc(op, 0, o1, o2)? as u32;
        e1.kind = ExpKind::VReloc;
        Ok(())
    }

    fn code_comp(&mut self, op: OpCode, cond: bool, e1: &mut ExpDesc, e2: &mut ExpDesc) -> ParseResult<()> {
        let mut o1 = self.exp2rk(e1)?;
        let mut o2 = self.exp2rk(e2)?;
        self.free_exp(e2);
        self.free_exp(e1);
        let mut cond = cond;
        if !cond && op != OpCode::Eq {
            // exchange args to replace by `<' or `<='
            std::mem::swap(&mut o1, &mut o2);
            cond = true;
        }
        e1.info = self.cond_jump(op, u32::from(cond), o1, o2)? as u32;
        e1.kind = ExpKind::VJmp;
        Ok(())
    }

    // Port of luaK_prefix
    pub fn prefix(&mut self, op: UnOpr, e: &mut ExpDesc) -> ParseResult<()> {
        let mut e2 = ExpDesc::new_number(0.0);
        match op {
            UnOpr::Minus => {
                if !e.is_numeral() {
                    self.exp2anyreg(e)?;
                }
                self.code_arith(OpCode::Unm, e, &mut e2)
            }
            UnOpr::Not => self.code_not(e),
            UnOpr::Len => {
                self.exp2anyreg(e)?;
                self.code_arith(OpCode::Len, e, &mut e2)
            }
        }
    }

    // Port of luaK_infix
    pub fn infix(&mut self, op: BinOpr, v: &mut ExpDesc) -> ParseResult<()> {
        match op {
            BinOpr::And => self.go_if_true(v),
            BinOpr::Or => self.go_if_false(v),
            // operand must be on the 'stack'
            BinOpr::Concat => self.exp2nextreg(v),
            BinOpr::Add | BinOpr::Sub | BinOpr::Mul | BinOpr::Div | BinOpr::Mod | BinOpr::Pow => {
                if !v.is_numeral() {
                    self.exp2rk(v)?;
                }
                Ok(())
            }
            _ => {
                self.exp2rk(v)?;
                Ok(())
            }
        }
    }

    // Port of luaK_posfix
    pub fn posfix(&mut self, op: BinOpr, e1: &mut ExpDesc, e2: &mut ExpDesc) -> ParseResult<()> {
        match op {
            BinOpr::And => {
                debug_assert_eq!(e1.t, NO_JUMP);
                self.discharge_vars(e2)?;
                let mut f = e2.f;
                self.concat(&mut f, e1.f)?;
                e2.f = f;
                *e1 = *e2;
            }
            BinOpr::Or => {
                debug_assert_eq!(e1.f, NO_JUMP);
                self.discharge_vars(e2)?;
                let mut t = e2.t;
                self.concat(&mut t, e1.t)?;
                e2.t = t;
                *e1 = *e2;
            }
            BinOpr::Concat => {
                self.exp2val(e2)?;
                if e2.kind == ExpKind::VReloc && self.code_at(e2).get_opcode() == OpCode::Concat {
                    debug_assert_eq!(e1.info, self.code_at(e2).get_b() - 1);
                    self.free_exp(e1);
                    let b = e1.info;
                    self.code_at(e2).set_b(b);
                    e1.kind = ExpKind::VReloc;
                    e1.info = e2.info;
                } else {
                    // operand must be on the 'stack'
                    self.exp2nextreg(e2)?;
                    self.code_arith(OpCode::Concat, e1, e2)?;
                }
            }
            BinOpr::Eq => self.code_comp(OpCode::Eq, true, e1, e2)?,
            BinOpr::Ne => self.code_comp(OpCode::Eq, false, e1, e2)?,
            BinOpr::Lt => self.code_comp(OpCode::Lt, true, e1, e2)?,
            BinOpr::Le => self.code_comp(OpCode::Le, true, e1, e2)?,
            BinOpr::Gt => self.code_comp(OpCode::Lt, false, e1, e2)?,
            BinOpr::Ge => self.code_comp(OpCode::Le, false, e1, e2)?,
            _ => {
                if let Some(arith) = op.arith_op() {
                    self.code_arith(arith, e1, e2)?;
                }
            }
        }
        Ok(())
    }

    // Port of luaK_setlist
    pub fn set_list(&mut self, base: u32, nelems: u32, tostore: i32) -> ParseResult<()> {
        let c = (nelems as usize).saturating_sub(1) / LFIELDS_PER_FLUSH + 1;
        let b = if tostore == LUA_MULTRET { 0 } else { tostore as u32 };
        if c <= Instruction::MAX_C as usize {
            self.emit_abc(OpCode::SetList, base, b, c as u32)?;
        } else {
            self.emit_abc(OpCode::SetList, base, b, 0)?;
            self.code(Instruction::create_raw(c as u32))?;
        }
        self.freereg = base + 1;
        Ok(())
    }
}
