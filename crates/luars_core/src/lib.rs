// Lua Runtime
// A Lua 5.1 VM: bytecode compiler, stack-based embedding API, incremental
// GC, protected calls and coroutines

#[cfg(test)]
mod test;

pub mod compiler;
pub mod gc;
pub mod lib_registry;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use compiler::{CompileError, compile};
pub use gc::*;
pub use lib_registry::LibraryRegistry;
pub use lua_value::{CFunction, Chunk, LuaTable, LuaValue, LuaValueKind};
pub use lua_vm::{
    GcOption, Instruction, LUA_MULTRET, LuaError, LuaResult, LuaStatus, LuaVM, OpCode,
    SafeOption, ThreadStatus,
};
pub use stdlib::Stdlib;
