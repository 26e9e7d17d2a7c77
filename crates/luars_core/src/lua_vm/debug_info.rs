// Position and naming information for error messages (ldebug.c subset)
// Frames are looked up by level: 0 is the running function, 1 its caller.

use crate::lua_value::{Chunk, LuaValue};
use crate::lua_vm::{LuaError, LuaVM, OpCode};
use std::rc::Rc;

/// Maximum size of a formatted chunk id, terminator included (LUA_IDSIZE)
const LUA_IDSIZE: usize = 60;

/// Short source name for messages (luaO_chunkid)
///
/// `=name` is used verbatim, `@file` is a file name (keeping its tail when
/// too long), anything else is source text shown as `[string "..."]`.
pub fn chunk_id(source: &str) -> String {
    let budget = LUA_IDSIZE - 1;
    if let Some(rest) = source.strip_prefix('=') {
        return truncate_chars(rest, budget).to_string();
    }
    if let Some(rest) = source.strip_prefix('@') {
        let budget = LUA_IDSIZE - 8;
        let len = rest.chars().count();
        if len <= budget {
            return rest.to_string();
        }
        let tail: String = rest.chars().skip(len - budget).collect();
        return format!("...{tail}");
    }
    let budget = LUA_IDSIZE - 17;
    let first_line = source.split(['\n', '\r']).next().unwrap_or("");
    let shown = truncate_chars(first_line, budget);
    if shown.len() == source.len() {
        format!("[string \"{shown}\"]")
    } else {
        format!("[string \"{shown}...\"]")
    }
}

fn truncate_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Constant name of an RK operand, "?" when it is not a string constant
fn kname(vm: &LuaVM, chunk: &Chunk, rk: u32) -> String {
    if crate::lua_vm::Instruction::is_k(rk) {
        let k = chunk.constants[crate::lua_vm::Instruction::index_k(rk)];
        if k.is_string() {
            return vm.value_to_string_lossy(&k);
        }
    }
    "?".to_string()
}

/// Index of the last instruction before `lastpc` that wrote register
/// `reg`, following forward jumps that stay inside the range (symbexec)
fn find_setreg(chunk: &Chunk, lastpc: usize, reg: u32) -> Option<usize> {
    let mut setreg = None;
    let mut pc = 0;
    while pc < lastpc {
        let i = chunk.code[pc];
        let op = i.get_opcode();
        let a = i.get_a();
        match op {
            OpCode::LoadNil => {
                if a <= reg && reg <= i.get_b() {
                    setreg = Some(pc);
                }
            }
            OpCode::TForLoop => {
                if reg >= a + 2 {
                    setreg = Some(pc);
                }
            }
            OpCode::Call | OpCode::TailCall => {
                if reg >= a {
                    setreg = Some(pc);
                }
            }
            OpCode::Jmp => {
                let dest = pc as isize + 1 + i.get_sbx() as isize;
                // forward jumps that land before lastpc skip the dead code
                if dest > pc as isize + 1 && dest as usize <= lastpc {
                    pc = dest as usize;
                    continue;
                }
            }
            OpCode::SetList => {
                if i.get_c() == 0 {
                    pc += 1;
                }
            }
            _ => {
                if op.sets_a() && a == reg {
                    setreg = Some(pc);
                }
            }
        }
        pc += 1;
    }
    setreg
}

/// getobjname: how register `reg` got its value at `pc`
fn obj_name(vm: &LuaVM, chunk: &Chunk, pc: usize, reg: u32) -> Option<(&'static str, String)> {
    if let Some(name) = chunk.local_name(reg as usize, pc) {
        return Some(("local", name.to_string()));
    }
    let setpc = find_setreg(chunk, pc, reg)?;
    let i = chunk.code[setpc];
    match i.get_opcode() {
        OpCode::GetGlobal => {
            let k = chunk.constants[i.get_bx() as usize];
            Some(("global", vm.value_to_string_lossy(&k)))
        }
        OpCode::Move => {
            let b = i.get_b();
            if b < i.get_a() {
                obj_name(vm, chunk, setpc, b)
            } else {
                None
            }
        }
        OpCode::GetTable => Some(("field", kname(vm, chunk, i.get_c()))),
        OpCode::GetUpval => {
            let name = chunk
                .upvalue_descs
                .get(i.get_b() as usize)
                .map_or_else(|| "?".to_string(), |d| d.name.to_string());
            Some(("upvalue", name))
        }
        OpCode::Self_ => Some(("method", kname(vm, chunk, i.get_c()))),
        _ => None,
    }
}

impl LuaVM {
    /// Lua frame at `level` with its prototype and current pc
    fn lua_frame(&self, level: usize) -> Option<(usize, Rc<Chunk>, usize)> {
        let idx = self.l.call_stack.len().checked_sub(level + 1)?;
        let ci = self.l.call_stack.get(idx)?;
        if !ci.is_lua() {
            return None;
        }
        let cl = self.l.get(ci.func).as_function_id()?;
        let chunk = self.closure_chunk(cl)?;
        Some((idx, chunk, ci.saved_pc.saturating_sub(1)))
    }

    /// Line being executed by the function at `level`, if it is a Lua one
    pub fn current_line(&self, level: usize) -> Option<u32> {
        let (_, chunk, pc) = self.lua_frame(level)?;
        chunk.line_at(pc)
    }

    /// luaL_where: "chunk:line: " of the function at `level`, or empty
    pub fn where_(&self, level: usize) -> String {
        match self.lua_frame(level) {
            Some((_, chunk, pc)) => match chunk.line_at(pc) {
                Some(line) => format!("{}:{}: ", chunk_id(&chunk.source_name), line),
                None => String::new(),
            },
            None => String::new(),
        }
    }

    /// Name of the function running at `level` as its caller sees it
    /// (getfuncname), used for "bad argument" messages
    pub fn func_name(&self, level: usize) -> Option<(&'static str, String)> {
        let idx = self.l.call_stack.len().checked_sub(level + 1)?;
        let ci = self.l.call_stack.get(idx)?;
        if ci.tailcalls > 0 || idx == 0 {
            return None;
        }
        let (_, chunk, pc) = self.lua_frame(level + 1)?;
        let i = chunk.code[pc];
        match i.get_opcode() {
            OpCode::Call | OpCode::TailCall => obj_name(self, &chunk, pc, i.get_a()),
            OpCode::TForLoop => Some(("for iterator", "for iterator".to_string())),
            _ => None,
        }
    }

    /// Variable description of the stack slot holding an offending value
    fn var_info(&self, slot: Option<usize>) -> String {
        let Some(slot) = slot else {
            return String::new();
        };
        let Some((idx, chunk, pc)) = self.lua_frame(0) else {
            return String::new();
        };
        let ci = self.l.call_stack[idx];
        if slot < ci.base || slot >= ci.top {
            return String::new();
        }
        match obj_name(self, &chunk, pc, (slot - ci.base) as u32) {
            Some((kind, name)) => format!(" {kind} '{name}'"),
            None => String::new(),
        }
    }

    /// luaG_typeerror
    pub(crate) fn type_error(&mut self, v: &LuaValue, op: &str, slot: Option<usize>) -> LuaError {
        let info = self.var_info(slot);
        let msg = if info.is_empty() {
            format!("attempt to {op} a {} value", v.type_name())
        } else {
            format!("attempt to {op}{info} (a {} value)", v.type_name())
        };
        self.rt_error(&msg)
    }

    /// luaG_ordererror
    pub(crate) fn order_error(&mut self, a: &LuaValue, b: &LuaValue) -> LuaError {
        let (t1, t2) = (a.type_name(), b.type_name());
        let msg = if t1 == t2 {
            format!("attempt to compare two {t1} values")
        } else {
            format!("attempt to compare {t1} with {t2}")
        };
        self.rt_error(&msg)
    }
}
