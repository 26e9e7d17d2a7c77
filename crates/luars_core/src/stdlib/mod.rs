// Lua 5.1 base libraries

pub mod basic;
pub mod coroutine;

use crate::lib_registry::{self, LibraryRegistry};
use crate::lua_vm::{LuaResult, LuaVM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stdlib {
    Basic,
    Coroutine,

    All,
}

impl LuaVM {
    /// Open one library (or all of them) into the globals table
    pub fn open_stdlib(&mut self, lib: Stdlib) -> LuaResult<()> {
        let registry = match lib {
            Stdlib::All => lib_registry::create_standard_registry(),
            Stdlib::Basic => {
                let mut r = LibraryRegistry::new();
                r.register(basic::create_basic_lib());
                r
            }
            Stdlib::Coroutine => {
                let mut r = LibraryRegistry::new();
                r.register(coroutine::create_coroutine_lib());
                r
            }
        };
        registry.load_all(self)
    }
}
