// Statement parsing (lparser.c rules for chunk/block/stat)
use crate::compiler::expdesc::{ExpDesc, ExpKind, NO_JUMP};
use crate::compiler::parser::LuaTokenKind;
use crate::compiler::{Compiler, ParseError, ParseResult};
use crate::lua_vm::{LUA_MULTRET, OpCode};
use smol_str::SmolStr;

/// Tokens that close a block
fn block_follow(kind: LuaTokenKind) -> bool {
    matches!(
        kind,
        LuaTokenKind::TkElse
            | LuaTokenKind::TkElseIf
            | LuaTokenKind::TkEnd
            | LuaTokenKind::TkUntil
            | LuaTokenKind::TkEof
    )
}

pub(crate) fn name_of(bytes: &[u8]) -> SmolStr {
    SmolStr::new(String::from_utf8_lossy(bytes))
}

impl Compiler<'_> {
    /// chunk -> { stat [`;'] }
    pub(crate) fn chunk(&mut self) -> ParseResult<()> {
        self.enter_level()?;
        let mut islast = false;
        while !islast && !block_follow(self.token()) {
            islast = self.statement()?;
            self.testnext(LuaTokenKind::TkSemicolon)?;
            debug_assert!(
                self.fs.chunk.max_stack_size >= self.fs.freereg as usize
                    && self.fs.freereg >= self.fs.nactvar
            );
            // free registers
            self.fs.freereg = self.fs.nactvar;
        }
        self.leave_level();
        Ok(())
    }

    /// block -> chunk
    fn block(&mut self) -> ParseResult<()> {
        self.fs.enter_block(false);
        self.chunk()?;
        self.fs.leave_block()
    }

    /// Returns true for statements that must be last in a chunk
    fn statement(&mut self) -> ParseResult<bool> {
        let line = self.lex.line;
        match self.token() {
            LuaTokenKind::TkIf => self.ifstat(line)?,
            LuaTokenKind::TkWhile => self.whilestat(line)?,
            LuaTokenKind::TkDo => {
                self.next()?;
                self.block()?;
                self.check_match(LuaTokenKind::TkEnd, LuaTokenKind::TkDo, line)?;
            }
            LuaTokenKind::TkFor => self.forstat(line)?,
            LuaTokenKind::TkRepeat => self.repeatstat(line)?,
            LuaTokenKind::TkFunction => self.funcstat(line)?,
            LuaTokenKind::TkLocal => {
                self.next()?;
                if self.testnext(LuaTokenKind::TkFunction)? {
                    self.localfunc()?;
                } else {
                    self.localstat()?;
                }
            }
            LuaTokenKind::TkReturn => {
                self.retstat()?;
                return Ok(true);
            }
            LuaTokenKind::TkBreak => {
                self.next()?;
                self.breakstat()?;
                return Ok(true);
            }
            _ => self.exprstat()?,
        }
        Ok(false)
    }

    // ============ Control structures ============

    /// cond -> exp, returning the false exit list
    fn cond(&mut self) -> ParseResult<i32> {
        let mut v = self.expr()?;
        // `falses' are all equal here
        if v.kind == ExpKind::VNil {
            v.kind = ExpKind::VFalse;
        }
        self.fs.go_if_true(&mut v)?;
        Ok(v.f)
    }

    fn breakstat(&mut self) -> ParseResult<()> {
        let mut upval = false;
        let mut target = None;
        for (i, bl) in self.fs.blocks.iter().enumerate().rev() {
            if bl.is_breakable {
                target = Some(i);
                break;
            }
            upval |= bl.upval;
        }
        let Some(i) = target else {
            return Err(ParseError::Syntax("no loop to break".into()));
        };
        if upval {
            let nactvar = self.fs.blocks[i].nactvar;
            self.fs.emit_abc(OpCode::Close, nactvar, 0, 0)?;
        }
        let j = self.fs.jump()?;
        let mut breaklist = self.fs.blocks[i].breaklist;
        self.fs.concat(&mut breaklist, j)?;
        self.fs.blocks[i].breaklist = breaklist;
        Ok(())
    }

    /// whilestat -> WHILE cond DO block END
    fn whilestat(&mut self, line: u32) -> ParseResult<()> {
        self.next()?;
        let whileinit = self.fs.get_label();
        let condexit = self.cond()?;
        self.fs.enter_block(true);
        self.checknext(LuaTokenKind::TkDo)?;
        self.block()?;
        let j = self.fs.jump()?;
        self.fs.patch_list(j, whileinit)?;
        self.check_match(LuaTokenKind::TkEnd, LuaTokenKind::TkWhile, line)?;
        self.fs.leave_block()?;
        // false conditions finish the loop
        self.fs.patch_to_here(condexit)
    }

    /// repeatstat -> REPEAT block UNTIL cond
    fn repeatstat(&mut self, line: u32) -> ParseResult<()> {
        let repeat_init = self.fs.get_label();
        // loop block, then scope block
        self.fs.enter_block(true);
        self.fs.enter_block(false);
        self.next()?;
        self.chunk()?;
        self.check_match(LuaTokenKind::TkUntil, LuaTokenKind::TkRepeat, line)?;
        // read condition (inside scope block)
        let condexit = self.cond()?;
        let scope_upval = self.fs.blocks.last().is_some_and(|bl| bl.upval);
        if !scope_upval {
            self.fs.leave_block()?;
            self.fs.patch_list(condexit, repeat_init)?;
        } else {
            // complete semantics when there are upvalues
            self.breakstat()?;
            self.fs.patch_to_here(condexit)?;
            self.fs.leave_block()?;
            let j = self.fs.jump()?;
            self.fs.patch_list(j, repeat_init)?;
        }
        self.fs.leave_block()
    }

    fn exp1(&mut self) -> ParseResult<ExpKind> {
        let mut e = self.expr()?;
        let k = e.kind;
        self.fs.exp2nextreg(&mut e)?;
        Ok(k)
    }

    /// forbody -> DO block
    fn forbody(&mut self, base: u32, line: u32, nvars: u32, isnum: bool) -> ParseResult<()> {
        // control variables
        self.fs.adjust_local_vars(3);
        self.checknext(LuaTokenKind::TkDo)?;
        let prep = if isnum {
            self.fs.emit_asbx(OpCode::ForPrep, base, NO_JUMP)? as i32
        } else {
            self.fs.jump()?
        };
        // scope for declared variables
        self.fs.enter_block(false);
        self.fs.adjust_local_vars(nvars);
        self.fs.reserve_regs(nvars)?;
        self.block()?;
        self.fs.leave_block()?;
        self.fs.patch_to_here(prep)?;
        let endfor = if isnum {
            self.fs.emit_asbx(OpCode::ForLoop, base, NO_JUMP)? as i32
        } else {
            self.fs.emit_abc(OpCode::TForLoop, base, 0, nvars)?;
            self.fs.jump()?
        };
        // pretend that the loop instruction starts the loop
        self.fs.fix_line(line);
        self.fs.patch_list(endfor, prep + 1)
    }

    /// fornum -> NAME = exp1,exp1[,exp1] forbody
    fn fornum(&mut self, varname: SmolStr, line: u32) -> ParseResult<()> {
        let base = self.fs.freereg;
        self.fs.new_local_var("(for index)".into(), 0)?;
        self.fs.new_local_var("(for limit)".into(), 1)?;
        self.fs.new_local_var("(for step)".into(), 2)?;
        self.fs.new_local_var(varname, 3)?;
        self.checknext(LuaTokenKind::TkAssign)?;
        self.exp1()?; // initial value
        self.checknext(LuaTokenKind::TkComma)?;
        self.exp1()?; // limit
        if self.testnext(LuaTokenKind::TkComma)? {
            self.exp1()?; // optional step
        } else {
            // default step = 1
            let k = self.fs.number_k(1.0)?;
            let reg = self.fs.freereg;
            self.fs.emit_abx(OpCode::LoadK, reg, k)?;
            self.fs.reserve_regs(1)?;
        }
        self.forbody(base, line, 1, true)
    }

    /// forlist -> NAME {,NAME} IN explist1 forbody
    fn forlist(&mut self, indexname: SmolStr) -> ParseResult<()> {
        let base = self.fs.freereg;
        self.fs.new_local_var("(for generator)".into(), 0)?;
        self.fs.new_local_var("(for state)".into(), 1)?;
        self.fs.new_local_var("(for control)".into(), 2)?;
        self.fs.new_local_var(indexname, 3)?;
        let mut nvars = 4;
        while self.testnext(LuaTokenKind::TkComma)? {
            let name = self.str_checkname()?;
            self.fs.new_local_var(name_of(&name), nvars)?;
            nvars += 1;
        }
        self.checknext(LuaTokenKind::TkIn)?;
        let line = self.lex.line;
        let (nexps, mut e) = self.explist1()?;
        self.adjust_assign(3, nexps, &mut e)?;
        // extra space to call generator
        self.fs.check_stack(3)?;
        self.forbody(base, line, nvars - 3, false)
    }

    /// forstat -> FOR (fornum | forlist) END
    fn forstat(&mut self, line: u32) -> ParseResult<()> {
        // scope for loop and control variables
        self.fs.enter_block(true);
        self.next()?;
        let varname = self.str_checkname()?;
        match self.token() {
            LuaTokenKind::TkAssign => self.fornum(name_of(&varname), line)?,
            LuaTokenKind::TkComma | LuaTokenKind::TkIn => self.forlist(name_of(&varname))?,
            _ => return Err(ParseError::Syntax("'=' or 'in' expected".into())),
        }
        self.check_match(LuaTokenKind::TkEnd, LuaTokenKind::TkFor, line)?;
        self.fs.leave_block()
    }

    /// test_then_block -> [IF | ELSEIF] cond THEN block
    fn test_then_block(&mut self) -> ParseResult<i32> {
        self.next()?;
        let condexit = self.cond()?;
        self.checknext(LuaTokenKind::TkThen)?;
        self.block()?;
        Ok(condexit)
    }

    /// ifstat -> IF cond THEN block {ELSEIF cond THEN block} [ELSE block] END
    fn ifstat(&mut self, line: u32) -> ParseResult<()> {
        let mut escapelist = NO_JUMP;
        let mut flist = self.test_then_block()?;
        while self.token() == LuaTokenKind::TkElseIf {
            let j = self.fs.jump()?;
            self.fs.concat(&mut escapelist, j)?;
            self.fs.patch_to_here(flist)?;
            flist = self.test_then_block()?;
        }
        if self.token() == LuaTokenKind::TkElse {
            let j = self.fs.jump()?;
            self.fs.concat(&mut escapelist, j)?;
            self.fs.patch_to_here(flist)?;
            // skip ELSE (after patch, for correct line info)
            self.next()?;
            self.block()?;
        } else {
            self.fs.concat(&mut escapelist, flist)?;
        }
        self.fs.patch_to_here(escapelist)?;
        self.check_match(LuaTokenKind::TkEnd, LuaTokenKind::TkIf, line)
    }

    // ============ Declarations ============

    fn localfunc(&mut self) -> ParseResult<()> {
        let name = self.str_checkname()?;
        self.fs.new_local_var(name_of(&name), 0)?;
        let v = ExpDesc::new(ExpKind::VLocal, self.fs.freereg);
        self.fs.reserve_regs(1)?;
        self.fs.adjust_local_vars(1);
        let line = self.lex.line;
        let mut b = self.body(false, line)?;
        self.fs.store_var(&v, &mut b)?;
        // debug information will only see the variable after this point
        let pc = self.fs.pc();
        let last = self.fs.nactvar - 1;
        self.fs.local_var_mut(last).start_pc = pc;
        Ok(())
    }

    /// localstat -> LOCAL NAME {`,' NAME} [`=' explist1]
    fn localstat(&mut self) -> ParseResult<()> {
        let mut nvars = 0;
        loop {
            let name = self.str_checkname()?;
            self.fs.new_local_var(name_of(&name), nvars)?;
            nvars += 1;
            if !self.testnext(LuaTokenKind::TkComma)? {
                break;
            }
        }
        let (nexps, mut e) = if self.testnext(LuaTokenKind::TkAssign)? {
            self.explist1()?
        } else {
            (0, ExpDesc::new_void())
        };
        self.adjust_assign(nvars, nexps, &mut e)?;
        self.fs.adjust_local_vars(nvars);
        Ok(())
    }

    /// funcname -> NAME {field} [`:' NAME]
    fn funcname(&mut self) -> ParseResult<(ExpDesc, bool)> {
        let mut v = self.singlevar()?;
        while self.token() == LuaTokenKind::TkDot {
            self.field(&mut v)?;
        }
        let mut needself = false;
        if self.token() == LuaTokenKind::TkColon {
            needself = true;
            self.field(&mut v)?;
        }
        Ok((v, needself))
    }

    /// funcstat -> FUNCTION funcname body
    fn funcstat(&mut self, line: u32) -> ParseResult<()> {
        self.next()?;
        let (v, needself) = self.funcname()?;
        let mut b = self.body(needself, line)?;
        self.fs.store_var(&v, &mut b)?;
        // definition `happens' in the first line
        self.fs.fix_line(line);
        Ok(())
    }

    // ============ Assignment and calls ============

    /// stat -> func | assignment
    fn exprstat(&mut self) -> ParseResult<()> {
        let v = self.primaryexp()?;
        if v.kind == ExpKind::VCall {
            // call statement uses no results
            self.fs.code_at(&v).set_c(1);
            Ok(())
        } else {
            self.assignment(v)
        }
    }

    /// A local assigned in a multiple assignment may be the table or key of
    /// an earlier indexed target; those targets switch to a safe copy
    fn check_conflict(&mut self, lhs: &mut [ExpDesc], v: &ExpDesc) -> ParseResult<()> {
        let extra = self.fs.freereg;
        let mut conflict = false;
        for lh in lhs.iter_mut().filter(|lh| lh.kind == ExpKind::VIndexed) {
            if lh.info == v.info {
                conflict = true;
                lh.info = extra;
            }
            if lh.aux == v.info {
                conflict = true;
                lh.aux = extra;
            }
        }
        if conflict {
            self.fs.emit_abc(OpCode::Move, extra, v.info, 0)?;
            self.fs.reserve_regs(1)?;
        }
        Ok(())
    }

    /// assignment -> `,' primaryexp assignment | `=' explist1
    fn assignment(&mut self, first: ExpDesc) -> ParseResult<()> {
        let mut lhs = vec![first];
        loop {
            let last = lhs.len() - 1;
            self.check_condition(lhs[last].is_var(), "syntax error")?;
            if !self.testnext(LuaTokenKind::TkComma)? {
                break;
            }
            let nv = self.primaryexp()?;
            if nv.kind == ExpKind::VLocal {
                self.check_conflict(&mut lhs, &nv)?;
            }
            self.check_limit(lhs.len(), self.remaining_levels(), "variables in assignment")?;
            lhs.push(nv);
        }

        self.checknext(LuaTokenKind::TkAssign)?;
        let nvars = lhs.len() as u32;
        let (nexps, mut e) = self.explist1()?;
        let mut targets = lhs.iter().rev();
        if nexps != nvars {
            self.adjust_assign(nvars, nexps, &mut e)?;
            if nexps > nvars {
                // remove extra values
                self.fs.freereg -= nexps - nvars;
            }
        } else if let Some(last) = targets.next() {
            // close last expression
            self.fs.set_one_ret(&mut e);
            self.fs.store_var(last, &mut e)?;
        }
        // default assignment from the top of the stack
        for var in targets {
            let mut e = ExpDesc::new(ExpKind::VNonReloc, self.fs.freereg - 1);
            self.fs.store_var(var, &mut e)?;
        }
        Ok(())
    }

    /// retstat -> RETURN explist
    fn retstat(&mut self) -> ParseResult<()> {
        self.next()?;
        let (first, nret) =
            if block_follow(self.token()) || self.token() == LuaTokenKind::TkSemicolon {
                // return no values
                (0, 0)
            } else {
                let (n, mut e) = self.explist1()?;
                if e.has_multret() {
                    self.fs.set_multret(&mut e)?;
                    if e.kind == ExpKind::VCall && n == 1 {
                        // tail call
                        self.fs.code_at(&e).set_opcode(OpCode::TailCall);
                        debug_assert_eq!(self.fs.code_at(&e).get_a(), self.fs.nactvar);
                    }
                    (self.fs.nactvar, LUA_MULTRET)
                } else if n == 1 {
                    (self.fs.exp2anyreg(&mut e)?, 1)
                } else {
                    // values must go to the stack
                    self.fs.exp2nextreg(&mut e)?;
                    let first = self.fs.nactvar;
                    debug_assert_eq!(n, self.fs.freereg - first);
                    (first, n as i32)
                }
            };
        self.fs.ret(first, nret)
    }
}
