// Port of FuncState and BlockCnt from lparser.c
// One FuncState per function being compiled; the parser keeps them in a
// stack, innermost last.
use crate::compiler::expdesc::{ExpDesc, ExpKind, NO_JUMP};
use crate::compiler::{ParseError, ParseResult};
use crate::gc::StringId;
use crate::lua_value::{Chunk, LocVar, LuaValue, UpvalueDesc};
use crate::lua_vm::Instruction;
use crate::lua_vm::lua_limits::{MAXUPVAL, MAXVARS};
use ahash::AHashMap;
use smol_str::SmolStr;

/// Constant table key; numbers compare by bit pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstKey {
    Nil,
    Bool(bool),
    Number(u64),
    Str(StringId),
}

// Port of BlockCnt from lparser.c
#[derive(Debug, Clone)]
pub struct BlockCnt {
    pub breaklist: i32,  // list of jumps out of this loop
    pub nactvar: u32,    // number of active locals outside the block
    pub upval: bool,     // true if some variable in the block is an upvalue
    pub is_breakable: bool,
}

pub struct FuncState {
    pub chunk: Chunk,
    k_cache: AHashMap<ConstKey, u32>,
    pub blocks: Vec<BlockCnt>,
    pub last_target: i32, // pc of last jump target
    pub jpc: i32,         // list of pending jumps to pc
    pub freereg: u32,     // first free register
    pub nactvar: u32,     // number of active local variables
    /// Indices into `chunk.locvars` of the active locals
    pub actvar: Vec<usize>,
    /// Line stamped on emitted instructions
    pub lastline: u32,
}

impl FuncState {
    // Port of open_func
    pub fn new(source_name: SmolStr, linedefined: usize, lastline: u32) -> Self {
        let chunk = Chunk {
            source_name,
            linedefined,
            // registers 0/1 are always valid
            max_stack_size: 2,
            ..Chunk::default()
        };
        FuncState {
            chunk,
            k_cache: AHashMap::new(),
            blocks: Vec::new(),
            last_target: -1,
            jpc: NO_JUMP,
            freereg: 0,
            nactvar: 0,
            actvar: Vec::new(),
            lastline,
        }
    }

    #[inline]
    pub fn pc(&self) -> usize {
        self.chunk.code.len()
    }

    #[inline]
    pub fn code_at(&mut self, e: &ExpDesc) -> &mut Instruction {
        &mut self.chunk.code[e.info as usize]
    }

    /// errorlimit
    pub fn limit_error(&self, limit: usize, what: &str) -> ParseError {
        let msg = if self.chunk.linedefined == 0 {
            format!("main function has more than {limit} {what}")
        } else {
            format!(
                "function at line {} has more than {limit} {what}",
                self.chunk.linedefined
            )
        };
        ParseError::Plain(msg)
    }

    // ============ Constants ============

    fn add_k(&mut self, key: ConstKey, value: LuaValue) -> ParseResult<u32> {
        if let Some(&idx) = self.k_cache.get(&key) {
            return Ok(idx);
        }
        let idx = self.chunk.constants.len() as u32;
        if idx > Instruction::MAX_BX {
            return Err(ParseError::Plain("constant table overflow".into()));
        }
        self.chunk.constants.push(value);
        self.k_cache.insert(key, idx);
        Ok(idx)
    }

    pub fn string_k(&mut self, s: StringId) -> ParseResult<u32> {
        self.add_k(ConstKey::Str(s), LuaValue::String(s))
    }

    pub fn number_k(&mut self, n: f64) -> ParseResult<u32> {
        self.add_k(ConstKey::Number(n.to_bits()), LuaValue::Number(n))
    }

    pub fn bool_k(&mut self, b: bool) -> ParseResult<u32> {
        self.add_k(ConstKey::Bool(b), LuaValue::Boolean(b))
    }

    pub fn nil_k(&mut self) -> ParseResult<u32> {
        self.add_k(ConstKey::Nil, LuaValue::Nil)
    }

    /// Constants count, for the RK range check
    #[inline]
    pub fn nk(&self) -> usize {
        self.chunk.constants.len()
    }

    // ============ Locals ============

    /// new_localvar: declares the n-th pending local, active only after
    /// `adjust_local_vars`
    pub fn new_local_var(&mut self, name: SmolStr, n: u32) -> ParseResult<()> {
        if (self.nactvar + n + 1) as usize > MAXVARS {
            return Err(self.limit_error(MAXVARS, "local variables"));
        }
        self.chunk.locvars.push(LocVar {
            name,
            start_pc: 0,
            end_pc: 0,
        });
        let idx = self.chunk.locvars.len() - 1;
        let slot = (self.nactvar + n) as usize;
        if self.actvar.len() <= slot {
            self.actvar.resize(slot + 1, 0);
        }
        self.actvar[slot] = idx;
        Ok(())
    }

    pub fn local_var_mut(&mut self, i: u32) -> &mut LocVar {
        let idx = self.actvar[i as usize];
        &mut self.chunk.locvars[idx]
    }

    /// adjustlocalvars
    pub fn adjust_local_vars(&mut self, nvars: u32) {
        self.nactvar += nvars;
        let pc = self.pc();
        for i in (self.nactvar - nvars)..self.nactvar {
            self.local_var_mut(i).start_pc = pc;
        }
    }

    /// removevars
    pub fn remove_vars(&mut self, tolevel: u32) {
        let pc = self.pc();
        while self.nactvar > tolevel {
            self.nactvar -= 1;
            self.local_var_mut(self.nactvar).end_pc = pc;
        }
    }

    /// searchvar: register of the innermost active local named `name`
    pub fn search_var(&self, name: &str) -> Option<u32> {
        (0..self.nactvar)
            .rev()
            .find(|&i| self.chunk.locvars[self.actvar[i as usize]].name == name)
    }

    /// markupval: the block declaring local `level` must close it
    pub fn mark_upval(&mut self, level: u32) {
        if let Some(bl) = self.blocks.iter_mut().rev().find(|bl| bl.nactvar <= level) {
            bl.upval = true;
        }
    }

    /// indexupvalue: slot of the upvalue capturing `v` (a VLocal or VUpval
    /// of the enclosing function), added when new
    pub fn index_upvalue(&mut self, name: &str, v: &ExpDesc) -> ParseResult<u32> {
        let in_stack = v.kind == ExpKind::VLocal;
        if let Some(i) = self
            .chunk
            .upvalue_descs
            .iter()
            .position(|d| d.in_stack == in_stack && d.index == v.info)
        {
            return Ok(i as u32);
        }
        if self.chunk.upvalue_descs.len() + 1 > MAXUPVAL {
            return Err(self.limit_error(MAXUPVAL, "upvalues"));
        }
        self.chunk.upvalue_descs.push(UpvalueDesc {
            name: SmolStr::new(name),
            in_stack,
            index: v.info,
        });
        Ok(self.chunk.upvalue_descs.len() as u32 - 1)
    }

    // ============ Blocks ============

    pub fn enter_block(&mut self, is_breakable: bool) {
        self.blocks.push(BlockCnt {
            breaklist: NO_JUMP,
            nactvar: self.nactvar,
            upval: false,
            is_breakable,
        });
        debug_assert_eq!(self.freereg, self.nactvar);
    }

    pub fn leave_block(&mut self) -> ParseResult<()> {
        let Some(bl) = self.blocks.pop() else {
            return Ok(());
        };
        self.remove_vars(bl.nactvar);
        if bl.upval {
            self.emit_abc(crate::lua_vm::OpCode::Close, bl.nactvar, 0, 0)?;
        }
        self.freereg = self.nactvar;
        self.patch_to_here(bl.breaklist)
    }
}
