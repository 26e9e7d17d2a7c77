// Lua bytecode compiler - Main module
// One-pass recursive descent over the token stream (lparser.c), emitting
// Lua 5.1 bytecode through the FuncState code generator (lcode.c).
mod code;
mod expdesc;
mod expr_parser;
mod func_state;
pub mod parser;
mod statement;

use crate::lua_value::Chunk;
use crate::lua_vm::lua_limits::MAX_SYNTAX_DEPTH;
use crate::lua_vm::{GlobalState, LuaVM, chunk_id};
use func_state::FuncState;
use parser::{LuaLexer, LuaTokenKind};
use smol_str::SmolStr;
use std::rc::Rc;

/// First bytes of a precompiled chunk (LUA_SIGNATURE)
const BINARY_SIGNATURE: &[u8] = b"\x1bLua";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("{chunk}:{line}: {msg}")]
    Syntax { chunk: String, line: u32, msg: String },
    #[error("{chunk}: precompiled chunks are not supported")]
    Binary { chunk: String },
}

/// Error raised while parsing, positioned by `compile` from the lexer state
#[derive(Debug)]
pub(crate) enum ParseError {
    /// Already formatted by the lexer
    Lex(CompileError),
    /// Reported near the current token
    Syntax(String),
    /// Reported without a token
    Plain(String),
}

impl From<CompileError> for ParseError {
    fn from(e: CompileError) -> Self {
        ParseError::Lex(e)
    }
}

pub(crate) type ParseResult<T> = Result<T, ParseError>;

/// Parser state (LexState): the token stream plus the stack of functions
/// being compiled
pub(crate) struct Compiler<'a> {
    pub(crate) lex: LuaLexer<'a>,
    pub(crate) g: &'a mut GlobalState,
    /// Innermost function
    pub(crate) fs: FuncState,
    /// Enclosing functions, outermost first
    pub(crate) outer: Vec<FuncState>,
    source_name: SmolStr,
    depth: usize,
}

/// luaY_parser: compiles `source` into the prototype of the main function
pub fn compile(vm: &mut LuaVM, source: &[u8], chunk_name: &str) -> Result<Rc<Chunk>, CompileError> {
    let chunk = chunk_id(chunk_name);
    if source.starts_with(BINARY_SIGNATURE) {
        return Err(CompileError::Binary { chunk });
    }
    let source_name = SmolStr::new(chunk_name);
    let mut c = Compiler {
        lex: LuaLexer::new(source, chunk),
        g: &mut vm.g,
        fs: FuncState::new(source_name.clone(), 0, 1),
        outer: Vec::new(),
        source_name,
        depth: 0,
    };
    match c.main_func() {
        Ok(main) => {
            tracing::trace!(
                chunk = %main.source_name,
                instructions = main.code.len(),
                "chunk compiled"
            );
            Ok(Rc::new(main))
        }
        Err(ParseError::Lex(e)) => Err(e),
        Err(ParseError::Syntax(msg)) => Err(c.lex.syntax_error(&msg)),
        Err(ParseError::Plain(msg)) => Err(c.lex.error(&msg, None)),
    }
}

impl<'a> Compiler<'a> {
    fn main_func(&mut self) -> ParseResult<Chunk> {
        // main function is always vararg
        self.fs.chunk.is_vararg = true;
        self.next()?;
        self.chunk()?;
        self.check(LuaTokenKind::TkEof)?;
        self.fs.remove_vars(0);
        self.fs.ret(0, 0)?;
        let fs = std::mem::replace(&mut self.fs, FuncState::new(SmolStr::default(), 0, 0));
        Ok(fs.chunk)
    }

    // ============ Function nesting ============

    /// open_func: the new function becomes the innermost one
    pub(crate) fn open_func(&mut self, linedefined: usize) {
        let child = FuncState::new(self.source_name.clone(), linedefined, self.lex.lastline);
        let parent = std::mem::replace(&mut self.fs, child);
        self.outer.push(parent);
    }

    /// close_func: finishes the innermost function and returns its prototype
    pub(crate) fn close_func(&mut self) -> ParseResult<Chunk> {
        self.fs.remove_vars(0);
        self.fs.ret(0, 0)?;
        let Some(mut parent) = self.outer.pop() else {
            return Err(ParseError::Plain("function nesting underflow".into()));
        };
        parent.lastline = self.lex.lastline;
        let child = std::mem::replace(&mut self.fs, parent);
        Ok(child.chunk)
    }

    /// Function `level` of the nesting chain, 0 being the outermost
    pub(crate) fn func_at(&mut self, level: usize) -> &mut FuncState {
        if level < self.outer.len() {
            &mut self.outer[level]
        } else {
            &mut self.fs
        }
    }

    pub(crate) fn level(&self) -> usize {
        self.outer.len()
    }

    // ============ Token helpers ============

    /// luaX_next, keeping the code generator's line in step
    pub(crate) fn next(&mut self) -> ParseResult<()> {
        self.lex.next()?;
        self.fs.lastline = self.lex.lastline;
        Ok(())
    }

    #[inline]
    pub(crate) fn token(&self) -> LuaTokenKind {
        self.lex.current_token()
    }

    pub(crate) fn testnext(&mut self, kind: LuaTokenKind) -> ParseResult<bool> {
        if self.token() == kind {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn error_expected(&self, kind: LuaTokenKind) -> ParseError {
        ParseError::Syntax(format!("'{}' expected", kind.to_user_string()))
    }

    pub(crate) fn check(&self, kind: LuaTokenKind) -> ParseResult<()> {
        if self.token() != kind {
            return Err(self.error_expected(kind));
        }
        Ok(())
    }

    pub(crate) fn checknext(&mut self, kind: LuaTokenKind) -> ParseResult<()> {
        self.check(kind)?;
        self.next()
    }

    pub(crate) fn check_condition(&self, cond: bool, msg: &str) -> ParseResult<()> {
        if cond {
            Ok(())
        } else {
            Err(ParseError::Syntax(msg.to_string()))
        }
    }

    /// Closing token of a construct opened at line `line`
    pub(crate) fn check_match(&mut self, what: LuaTokenKind, who: LuaTokenKind, line: u32) -> ParseResult<()> {
        if self.testnext(what)? {
            return Ok(());
        }
        if line == self.lex.line {
            Err(self.error_expected(what))
        } else {
            Err(ParseError::Syntax(format!(
                "'{}' expected (to close '{}' at line {})",
                what.to_user_string(),
                who.to_user_string(),
                line
            )))
        }
    }

    /// str_checkname
    pub(crate) fn str_checkname(&mut self) -> ParseResult<Vec<u8>> {
        self.check(LuaTokenKind::TkName)?;
        let name = self.lex.take_bytes();
        self.next()?;
        Ok(name)
    }

    pub(crate) fn check_limit(&self, v: usize, limit: usize, what: &str) -> ParseResult<()> {
        if v > limit {
            return Err(self.fs.limit_error(limit, what));
        }
        Ok(())
    }

    // ============ Nesting depth ============

    pub(crate) fn enter_level(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_SYNTAX_DEPTH {
            return Err(ParseError::Plain("chunk has too many syntax levels".into()));
        }
        Ok(())
    }

    pub(crate) fn leave_level(&mut self) {
        self.depth -= 1;
    }

    pub(crate) fn remaining_levels(&self) -> usize {
        MAX_SYNTAX_DEPTH.saturating_sub(self.depth)
    }
}
