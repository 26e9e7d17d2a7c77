// Expression parsing (lparser.c rules for exp/primaryexp/constructor/body)
use crate::compiler::code::{BinOpr, UNARY_PRIORITY, UnOpr};
use crate::compiler::expdesc::{ExpDesc, ExpKind};
use crate::compiler::parser::LuaTokenKind;
use crate::compiler::statement::name_of;
use crate::compiler::{Compiler, ParseError, ParseResult};
use crate::lua_vm::lua_limits::LFIELDS_PER_FLUSH;
use crate::lua_vm::{LUA_MULTRET, OpCode, int2fb};
use std::rc::Rc;

/// Pending state of a table constructor (ConsControl)
struct ConsControl {
    /// Last list item read
    v: ExpDesc,
    /// Register of the table
    table: u32,
    /// Total number of record elements
    nh: u32,
    /// Total number of array elements
    na: u32,
    /// Number of array elements pending to be stored
    tostore: u32,
}

fn unary_op(kind: LuaTokenKind) -> Option<UnOpr> {
    match kind {
        LuaTokenKind::TkNot => Some(UnOpr::Not),
        LuaTokenKind::TkMinus => Some(UnOpr::Minus),
        LuaTokenKind::TkLen => Some(UnOpr::Len),
        _ => None,
    }
}

fn binary_op(kind: LuaTokenKind) -> Option<BinOpr> {
    match kind {
        LuaTokenKind::TkPlus => Some(BinOpr::Add),
        LuaTokenKind::TkMinus => Some(BinOpr::Sub),
        LuaTokenKind::TkMul => Some(BinOpr::Mul),
        LuaTokenKind::TkDiv => Some(BinOpr::Div),
        LuaTokenKind::TkMod => Some(BinOpr::Mod),
        LuaTokenKind::TkPow => Some(BinOpr::Pow),
        LuaTokenKind::TkConcat => Some(BinOpr::Concat),
        LuaTokenKind::TkNe => Some(BinOpr::Ne),
        LuaTokenKind::TkEq => Some(BinOpr::Eq),
        LuaTokenKind::TkLt => Some(BinOpr::Lt),
        LuaTokenKind::TkLe => Some(BinOpr::Le),
        LuaTokenKind::TkGt => Some(BinOpr::Gt),
        LuaTokenKind::TkGe => Some(BinOpr::Ge),
        LuaTokenKind::TkAnd => Some(BinOpr::And),
        LuaTokenKind::TkOr => Some(BinOpr::Or),
        _ => None,
    }
}

impl Compiler<'_> {
    // ============ Names and variables ============

    /// codestring: string constant expression
    fn code_string(&mut self, bytes: &[u8]) -> ParseResult<ExpDesc> {
        let s = self.g.intern(bytes);
        let k = self.fs.string_k(s)?;
        Ok(ExpDesc::new(ExpKind::VK, k))
    }

    fn checkname(&mut self) -> ParseResult<ExpDesc> {
        let name = self.str_checkname()?;
        self.code_string(&name)
    }

    /// Resolves `name` starting at function `level`: a local there, an
    /// upvalue captured through the enclosing functions, or a global
    fn singlevaraux(&mut self, level: usize, name: &str, base: bool) -> ParseResult<ExpDesc> {
        let fs = self.func_at(level);
        if let Some(v) = fs.search_var(name) {
            if !base {
                // local will be used as an upvalue
                fs.mark_upval(v);
            }
            return Ok(ExpDesc::new(ExpKind::VLocal, v));
        }
        if level == 0 {
            return Ok(ExpDesc::new(ExpKind::VGlobal, 0));
        }
        let up = self.singlevaraux(level - 1, name, false)?;
        if up.kind == ExpKind::VGlobal {
            return Ok(up);
        }
        let idx = self.func_at(level).index_upvalue(name, &up)?;
        Ok(ExpDesc::new(ExpKind::VUpval, idx))
    }

    pub(crate) fn singlevar(&mut self) -> ParseResult<ExpDesc> {
        let varname = self.str_checkname()?;
        let name = name_of(&varname);
        let mut var = self.singlevaraux(self.level(), &name, true)?;
        if var.kind == ExpKind::VGlobal {
            let s = self.g.intern(&varname);
            var.info = self.fs.string_k(s)?;
        }
        Ok(var)
    }

    /// field -> ['.' | ':'] NAME
    pub(crate) fn field(&mut self, v: &mut ExpDesc) -> ParseResult<()> {
        self.fs.exp2anyreg(v)?;
        // skip the dot or colon
        self.next()?;
        let mut key = self.checkname()?;
        self.fs.indexed(v, &mut key)
    }

    /// index -> '[' expr ']'
    fn yindex(&mut self) -> ParseResult<ExpDesc> {
        self.next()?;
        let mut v = self.expr()?;
        self.fs.exp2val(&mut v)?;
        self.checknext(LuaTokenKind::TkRightBracket)?;
        Ok(v)
    }

    // ============ Table constructors ============

    /// recfield -> (NAME | `['exp1`]') = exp1
    fn recfield(&mut self, cc: &mut ConsControl) -> ParseResult<()> {
        let reg = self.fs.freereg;
        let mut key = if self.token() == LuaTokenKind::TkName {
            self.check_limit(cc.nh as usize, i32::MAX as usize, "items in a constructor")?;
            self.checkname()?
        } else {
            self.yindex()?
        };
        cc.nh += 1;
        self.checknext(LuaTokenKind::TkAssign)?;
        let rkkey = self.fs.exp2rk(&mut key)?;
        let mut val = self.expr()?;
        let rkval = self.fs.exp2rk(&mut val)?;
        self.fs.emit_abc(OpCode::SetTable, cc.table, rkkey, rkval)?;
        // free registers
        self.fs.freereg = reg;
        Ok(())
    }

    fn close_list_field(&mut self, cc: &mut ConsControl) -> ParseResult<()> {
        // there is no list item
        if cc.v.kind == ExpKind::VVoid {
            return Ok(());
        }
        self.fs.exp2nextreg(&mut cc.v)?;
        cc.v.kind = ExpKind::VVoid;
        if cc.tostore as usize == LFIELDS_PER_FLUSH {
            self.fs.set_list(cc.table, cc.na, cc.tostore as i32)?;
            cc.tostore = 0;
        }
        Ok(())
    }

    fn last_list_field(&mut self, cc: &mut ConsControl) -> ParseResult<()> {
        if cc.tostore == 0 {
            return Ok(());
        }
        if cc.v.has_multret() {
            self.fs.set_multret(&mut cc.v)?;
            self.fs.set_list(cc.table, cc.na, LUA_MULTRET)?;
            // do not count last expression (unknown number of elements)
            cc.na -= 1;
        } else {
            if cc.v.kind != ExpKind::VVoid {
                self.fs.exp2nextreg(&mut cc.v)?;
            }
            self.fs.set_list(cc.table, cc.na, cc.tostore as i32)?;
        }
        Ok(())
    }

    fn list_field(&mut self, cc: &mut ConsControl) -> ParseResult<()> {
        cc.v = self.expr()?;
        self.check_limit(cc.na as usize, i32::MAX as usize, "items in a constructor")?;
        cc.na += 1;
        cc.tostore += 1;
        Ok(())
    }

    /// constructor -> `{' [ field { fieldsep field } [ fieldsep ] ] `}'
    fn constructor(&mut self) -> ParseResult<ExpDesc> {
        let line = self.lex.line;
        let pc = self.fs.emit_abc(OpCode::NewTable, 0, 0, 0)?;
        let mut t = ExpDesc::new(ExpKind::VReloc, pc as u32);
        // fix it at stack top (for gc)
        self.fs.exp2nextreg(&mut t)?;
        let mut cc = ConsControl {
            v: ExpDesc::new_void(),
            table: t.info,
            nh: 0,
            na: 0,
            tostore: 0,
        };
        self.checknext(LuaTokenKind::TkLeftBrace)?;
        loop {
            debug_assert!(cc.v.kind == ExpKind::VVoid || cc.tostore > 0);
            if self.token() == LuaTokenKind::TkRightBrace {
                break;
            }
            self.close_list_field(&mut cc)?;
            match self.token() {
                // may be a list field or a record field
                LuaTokenKind::TkName => {
                    if self.lex.lookahead()? != LuaTokenKind::TkAssign {
                        self.list_field(&mut cc)?;
                    } else {
                        self.recfield(&mut cc)?;
                    }
                }
                LuaTokenKind::TkLeftBracket => self.recfield(&mut cc)?,
                _ => self.list_field(&mut cc)?,
            }
            if !(self.testnext(LuaTokenKind::TkComma)? || self.testnext(LuaTokenKind::TkSemicolon)?) {
                break;
            }
        }
        self.check_match(LuaTokenKind::TkRightBrace, LuaTokenKind::TkLeftBrace, line)?;
        self.last_list_field(&mut cc)?;
        // initial array and hash sizes
        let i = &mut self.fs.chunk.code[pc];
        i.set_b(int2fb(cc.na));
        i.set_c(int2fb(cc.nh));
        Ok(t)
    }

    // ============ Functions ============

    /// parlist -> [ param { `,' param } ]
    fn parlist(&mut self) -> ParseResult<()> {
        let mut nparams = 0;
        self.fs.chunk.is_vararg = false;
        if self.token() != LuaTokenKind::TkRightParen {
            loop {
                match self.token() {
                    LuaTokenKind::TkName => {
                        let name = self.str_checkname()?;
                        self.fs.new_local_var(name_of(&name), nparams)?;
                        nparams += 1;
                    }
                    LuaTokenKind::TkDots => {
                        self.next()?;
                        self.fs.chunk.is_vararg = true;
                    }
                    _ => return Err(ParseError::Syntax("<name> or '...' expected".into())),
                }
                if self.fs.chunk.is_vararg || !self.testnext(LuaTokenKind::TkComma)? {
                    break;
                }
            }
        }
        self.fs.adjust_local_vars(nparams);
        self.fs.chunk.param_count = self.fs.nactvar as usize;
        // reserve registers for parameters
        let n = self.fs.nactvar;
        self.fs.reserve_regs(n)
    }

    /// body -> `(' parlist `)' chunk END
    pub(crate) fn body(&mut self, needself: bool, line: u32) -> ParseResult<ExpDesc> {
        self.open_func(line as usize);
        self.checknext(LuaTokenKind::TkLeftParen)?;
        if needself {
            self.fs.new_local_var("self".into(), 0)?;
            self.fs.adjust_local_vars(1);
        }
        self.parlist()?;
        self.checknext(LuaTokenKind::TkRightParen)?;
        self.chunk()?;
        self.fs.chunk.lastlinedefined = self.lex.line as usize;
        self.check_match(LuaTokenKind::TkEnd, LuaTokenKind::TkFunction, line)?;
        let child = self.close_func()?;
        self.push_closure(child)
    }

    /// pushclosure: CLOSURE over the new prototype; upvalues are described
    /// by the prototype itself
    fn push_closure(&mut self, child: crate::lua_value::Chunk) -> ParseResult<ExpDesc> {
        let idx = self.fs.chunk.child_protos.len() as u32;
        self.fs.chunk.child_protos.push(Rc::new(child));
        let pc = self.fs.emit_abx(OpCode::Closure, 0, idx)?;
        Ok(ExpDesc::new(ExpKind::VReloc, pc as u32))
    }

    /// explist1 -> expr { `,' expr }, returning the count and the last one
    pub(crate) fn explist1(&mut self) -> ParseResult<(u32, ExpDesc)> {
        let mut n = 1;
        let mut v = self.expr()?;
        while self.testnext(LuaTokenKind::TkComma)? {
            self.fs.exp2nextreg(&mut v)?;
            v = self.expr()?;
            n += 1;
        }
        Ok((n, v))
    }

    fn funcargs(&mut self, f: &mut ExpDesc) -> ParseResult<()> {
        let line = self.lex.line;
        let mut args = match self.token() {
            LuaTokenKind::TkLeftParen => {
                if line != self.lex.lastline {
                    return Err(ParseError::Syntax(
                        "ambiguous syntax (function call x new statement)".into(),
                    ));
                }
                self.next()?;
                let args = if self.token() == LuaTokenKind::TkRightParen {
                    ExpDesc::new_void()
                } else {
                    let (_, mut args) = self.explist1()?;
                    self.fs.set_multret(&mut args)?;
                    args
                };
                self.check_match(LuaTokenKind::TkRightParen, LuaTokenKind::TkLeftParen, line)?;
                args
            }
            LuaTokenKind::TkLeftBrace => self.constructor()?,
            LuaTokenKind::TkString => {
                let s = self.lex.take_bytes();
                let args = self.code_string(&s)?;
                self.next()?;
                args
            }
            _ => return Err(ParseError::Syntax("function arguments expected".into())),
        };
        debug_assert_eq!(f.kind, ExpKind::VNonReloc);
        // base register for call
        let base = f.info;
        let nparams = if args.has_multret() {
            // open call
            LUA_MULTRET
        } else {
            if args.kind != ExpKind::VVoid {
                // close last argument
                self.fs.exp2nextreg(&mut args)?;
            }
            (self.fs.freereg - (base + 1)) as i32
        };
        let pc = self.fs.emit_abc(OpCode::Call, base, (nparams + 1) as u32, 2)?;
        *f = ExpDesc::new(ExpKind::VCall, pc as u32);
        self.fs.fix_line(line);
        // call removes function and arguments and leaves one result
        self.fs.freereg = base + 1;
        Ok(())
    }

    // ============ Expressions ============

    /// prefixexp -> NAME | '(' expr ')'
    fn prefixexp(&mut self) -> ParseResult<ExpDesc> {
        match self.token() {
            LuaTokenKind::TkLeftParen => {
                let line = self.lex.line;
                self.next()?;
                let mut v = self.expr()?;
                self.check_match(LuaTokenKind::TkRightParen, LuaTokenKind::TkLeftParen, line)?;
                self.fs.discharge_vars(&mut v)?;
                Ok(v)
            }
            LuaTokenKind::TkName => self.singlevar(),
            _ => Err(ParseError::Syntax("unexpected symbol".into())),
        }
    }

    /// primaryexp -> prefixexp { `.' NAME | `[' exp `]' | `:' NAME funcargs | funcargs }
    pub(crate) fn primaryexp(&mut self) -> ParseResult<ExpDesc> {
        let mut v = self.prefixexp()?;
        loop {
            match self.token() {
                LuaTokenKind::TkDot => self.field(&mut v)?,
                LuaTokenKind::TkLeftBracket => {
                    self.fs.exp2anyreg(&mut v)?;
                    let mut key = self.yindex()?;
                    self.fs.indexed(&mut v, &mut key)?;
                }
                LuaTokenKind::TkColon => {
                    self.next()?;
                    let mut key = self.checkname()?;
                    self.fs.self_(&mut v, &mut key)?;
                    self.funcargs(&mut v)?;
                }
                LuaTokenKind::TkLeftParen | LuaTokenKind::TkString | LuaTokenKind::TkLeftBrace => {
                    self.fs.exp2nextreg(&mut v)?;
                    self.funcargs(&mut v)?;
                }
                _ => return Ok(v),
            }
        }
    }

    /// simpleexp -> NUMBER | STRING | NIL | true | false | ... |
    ///              constructor | FUNCTION body | primaryexp
    fn simpleexp(&mut self) -> ParseResult<ExpDesc> {
        let v = match self.token() {
            LuaTokenKind::TkNumber => ExpDesc::new_number(self.lex.number()),
            LuaTokenKind::TkString => {
                let s = self.lex.take_bytes();
                self.code_string(&s)?
            }
            LuaTokenKind::TkNil => ExpDesc::new(ExpKind::VNil, 0),
            LuaTokenKind::TkTrue => ExpDesc::new(ExpKind::VTrue, 0),
            LuaTokenKind::TkFalse => ExpDesc::new(ExpKind::VFalse, 0),
            LuaTokenKind::TkDots => {
                self.check_condition(
                    self.fs.chunk.is_vararg,
                    "cannot use '...' outside a vararg function",
                )?;
                let pc = self.fs.emit_abc(OpCode::Vararg, 0, 1, 0)?;
                ExpDesc::new(ExpKind::VVararg, pc as u32)
            }
            LuaTokenKind::TkLeftBrace => return self.constructor(),
            LuaTokenKind::TkFunction => {
                self.next()?;
                let line = self.lex.line;
                return self.body(false, line);
            }
            _ => return self.primaryexp(),
        };
        self.next()?;
        Ok(v)
    }

    /// subexpr -> (simpleexp | unop subexpr) { binop subexpr }
    /// where `binop' is any binary operator with a priority higher than
    /// `limit'; returns the first operator not consumed
    fn subexpr(&mut self, v: &mut ExpDesc, limit: u8) -> ParseResult<Option<BinOpr>> {
        self.enter_level()?;
        if let Some(uop) = unary_op(self.token()) {
            self.next()?;
            self.subexpr(v, UNARY_PRIORITY)?;
            self.fs.prefix(uop, v)?;
        } else {
            *v = self.simpleexp()?;
        }
        let mut op = binary_op(self.token());
        while let Some(bop) = op {
            let (left, right) = bop.priority();
            if left <= limit {
                break;
            }
            self.next()?;
            self.fs.infix(bop, v)?;
            let mut v2 = ExpDesc::new_void();
            let nextop = self.subexpr(&mut v2, right)?;
            self.fs.posfix(bop, v, &mut v2)?;
            op = nextop;
        }
        self.leave_level();
        Ok(op)
    }

    pub(crate) fn expr(&mut self) -> ParseResult<ExpDesc> {
        let mut v = ExpDesc::new_void();
        self.subexpr(&mut v, 0)?;
        Ok(v)
    }

    /// Balances `nexps` values (the last one being `e`) against `nvars`
    /// targets
    pub(crate) fn adjust_assign(&mut self, nvars: u32, nexps: u32, e: &mut ExpDesc) -> ParseResult<()> {
        let mut extra = nvars as i32 - nexps as i32;
        if e.has_multret() {
            // includes call itself
            extra = (extra + 1).max(0);
            // last exp. provides the difference
            self.fs.set_returns(e, extra)?;
            if extra > 1 {
                self.fs.reserve_regs((extra - 1) as u32)?;
            }
        } else {
            if e.kind != ExpKind::VVoid {
                self.fs.exp2nextreg(e)?;
            }
            if extra > 0 {
                let reg = self.fs.freereg;
                self.fs.reserve_regs(extra as u32)?;
                self.fs.nil(reg, extra as u32)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::compile;
    use crate::lua_vm::{LuaVM, OpCode, SafeOption};

    fn ops(src: &str) -> Vec<OpCode> {
        let mut vm = LuaVM::new(SafeOption::default());
        let chunk = compile(&mut vm, src.as_bytes(), "=t").unwrap();
        chunk.code.iter().map(|i| i.get_opcode()).collect()
    }

    #[test]
    fn test_method_call_uses_self() {
        assert_eq!(
            ops("obj:m(1)"),
            vec![OpCode::GetGlobal, OpCode::Self_, OpCode::LoadK, OpCode::Call, OpCode::Return]
        );
    }

    #[test]
    fn test_comparison_emits_test_and_jump() {
        let code = ops("local a, b = 1, 2\nlocal c = a < b");
        assert!(code.contains(&OpCode::Lt));
        assert!(code.contains(&OpCode::LoadBool));
    }

    #[test]
    fn test_constructor_setlist() {
        let code = ops("local t = {1, 2, 3, x = 4}");
        assert_eq!(code[0], OpCode::NewTable);
        assert!(code.contains(&OpCode::SetList));
        assert!(code.contains(&OpCode::SetTable));
    }

    #[test]
    fn test_concat_chain_single_instruction() {
        let code = ops("local a = 'x' .. 'y' .. 'z'");
        assert_eq!(code.iter().filter(|&&op| op == OpCode::Concat).count(), 1);
    }

    #[test]
    fn test_vararg_in_main_chunk() {
        let code = ops("local a, b = ...");
        assert_eq!(code[0], OpCode::Vararg);
    }
}
