// Lua 5.1 compatible value representation
// All GC objects are accessed via arena IDs, never by pointer
mod lua_table;
mod lua_value;

use crate::gc::{ThreadId, UpvalueId};
use crate::lua_vm::{Instruction, LuaResult, LuaVM};
use smol_str::SmolStr;
use std::rc::Rc;

pub use lua_table::{InvalidNextKey, LuaTable};
pub use lua_value::{
    LuaValue, LuaValueKind, NUM_TAGS, number_to_int_exact, number_to_string, str_to_number,
};

/// Native function. Arguments are the values above the frame base; the
/// function pushes its results and returns how many there are.
pub type CFunction = fn(&mut LuaVM) -> LuaResult<usize>;

/// Upvalue descriptor
#[derive(Debug, Clone)]
pub struct UpvalueDesc {
    pub name: SmolStr,
    pub in_stack: bool, // true if captures parent local, false if captures parent upvalue
    pub index: u32,     // index in parent's register or upvalue array
}

/// Local variable debug info
#[derive(Debug, Clone)]
pub struct LocVar {
    pub name: SmolStr,
    pub start_pc: usize,
    pub end_pc: usize,
}

/// Compiled function prototype (bytecode + metadata). Immutable once built
/// and shared by every closure instantiated from it.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<Instruction>,
    pub constants: Vec<LuaValue>,
    pub child_protos: Vec<Rc<Chunk>>,
    pub upvalue_descs: Vec<UpvalueDesc>,
    pub locvars: Vec<LocVar>,
    pub param_count: usize,
    pub is_vararg: bool,
    pub max_stack_size: usize,
    pub source_name: SmolStr,
    pub line_info: Vec<u32>, // Line number for each instruction
    pub linedefined: usize,
    pub lastlinedefined: usize,
}

impl Chunk {
    #[inline]
    pub fn upvalue_count(&self) -> usize {
        self.upvalue_descs.len()
    }

    pub fn line_at(&self, pc: usize) -> Option<u32> {
        self.line_info.get(pc).copied()
    }

    /// Name of the local living in `reg` at `pc`, if any (luaF_getlocalname)
    pub fn local_name(&self, reg: usize, pc: usize) -> Option<&str> {
        let mut n = reg + 1;
        for var in self.locvars.iter() {
            if var.start_pc > pc {
                break;
            }
            if pc < var.end_pc {
                n -= 1;
                if n == 0 {
                    return Some(var.name.as_str());
                }
            }
        }
        None
    }
}

/// Body of a function object
pub enum FunctionKind {
    Lua {
        chunk: Rc<Chunk>,
        upvalues: Vec<UpvalueId>,
    },
    Native {
        func: CFunction,
        upvalues: Vec<LuaValue>,
    },
}

/// An upvalue aliases a stack slot of its thread until closed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueState {
    Open { thread: ThreadId, stack_index: usize },
    Closed(LuaValue),
}
