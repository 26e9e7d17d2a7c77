// Library registration system for Lua standard libraries
// Provides a clean way to register Rust functions as Lua libraries, plus the
// argument checking helpers they share (lauxlib.c)

use crate::lua_value::{CFunction, LuaValue, LuaValueKind};
use crate::lua_vm::lua_limits::LUA_GLOBALSINDEX;
use crate::lua_vm::{LuaError, LuaResult, LuaVM};
use crate::stdlib;

/// Type for value initializers - functions that create values when the module loads
pub type ValueInitializer = fn(&mut LuaVM) -> LuaValue;

/// Module name whose entries land directly in the globals table
pub const GLOBAL_MODULE: &str = "_G";

/// Entry in a library module - can be a function or a value
pub enum LibraryEntry {
    Function(CFunction),
    Value(ValueInitializer),
}

/// A library module containing multiple functions and values
pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibraryEntry)>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn with_value(mut self, name: &'static str, value_init: ValueInitializer) -> Self {
        self.entries.push((name, LibraryEntry::Value(value_init)));
        self
    }
}

/// Builder for creating library modules of functions
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push(($item_name, $crate::lib_registry::LibraryEntry::Function($item)));
        )*
        module
    }};
}

/// Registry of libraries, loaded in insertion order
pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    /// Load all registered libraries into a VM
    pub fn load_all(&self, vm: &mut LuaVM) -> LuaResult<()> {
        for module in &self.modules {
            self.load_module(vm, module)?;
        }
        Ok(())
    }

    /// Load one module: `_G` entries go straight into the globals, any other
    /// module becomes a global table of its entries
    pub fn load_module(&self, vm: &mut LuaVM, module: &LibraryModule) -> LuaResult<()> {
        let global = module.name == GLOBAL_MODULE;
        if global {
            vm.push_value(LUA_GLOBALSINDEX);
        } else {
            vm.create_table(0, module.entries.len() as i32)?;
        }
        for (name, entry) in &module.entries {
            match entry {
                LibraryEntry::Function(func) => vm.push_cfunction(*func)?,
                LibraryEntry::Value(value_init) => {
                    let value = value_init(vm);
                    vm.l.push(value);
                }
            }
            vm.set_field(-2, name)?;
        }
        if !global {
            vm.push_value(-1);
            vm.set_global(module.name)?;
        }
        vm.pop(1);
        tracing::debug!(module = module.name, entries = module.entries.len(), "library loaded");
        Ok(())
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with every library this crate provides
pub fn create_standard_registry() -> LibraryRegistry {
    let mut registry = LibraryRegistry::new();
    registry.register(stdlib::basic::create_basic_lib());
    registry.register(stdlib::coroutine::create_coroutine_lib());
    registry
}

// ============ Argument helpers ============

/// luaL_argerror: "bad argument #n to 'name' (msg)"
pub fn arg_error(vm: &mut LuaVM, mut narg: i32, extramsg: &str) -> LuaError {
    let name = vm.func_name(0);
    if let Some((kind, name)) = &name
        && *kind == "method"
    {
        // do not count `self'
        narg -= 1;
        if narg == 0 {
            return vm.raise_error(format!("calling '{name}' on bad self ({extramsg})"));
        }
    }
    let name = name.map_or_else(|| "?".to_string(), |(_, n)| n);
    vm.raise_error(format!("bad argument #{narg} to '{name}' ({extramsg})"))
}

/// luaL_typerror
pub fn type_error(vm: &mut LuaVM, narg: i32, expected: &str) -> LuaError {
    let msg = format!("{expected} expected, got {}", vm.type_name(narg));
    arg_error(vm, narg, &msg)
}

pub fn check_any(vm: &mut LuaVM, narg: i32) -> LuaResult<()> {
    if vm.is_none(narg) {
        return Err(arg_error(vm, narg, "value expected"));
    }
    Ok(())
}

pub fn check_type(vm: &mut LuaVM, narg: i32, kind: LuaValueKind) -> LuaResult<()> {
    if vm.type_of(narg) != kind {
        return Err(type_error(vm, narg, kind.name()));
    }
    Ok(())
}

pub fn check_number(vm: &mut LuaVM, narg: i32) -> LuaResult<f64> {
    if !vm.is_number(narg) {
        return Err(type_error(vm, narg, "number"));
    }
    Ok(vm.to_number(narg))
}

pub fn check_integer(vm: &mut LuaVM, narg: i32) -> LuaResult<i64> {
    Ok(check_number(vm, narg)? as i64)
}

pub fn opt_integer(vm: &mut LuaVM, narg: i32, default: i64) -> LuaResult<i64> {
    if vm.is_none_or_nil(narg) {
        Ok(default)
    } else {
        check_integer(vm, narg)
    }
}

/// String argument (numbers are converted), as owned bytes
pub fn check_bytes(vm: &mut LuaVM, narg: i32) -> LuaResult<Vec<u8>> {
    match vm.to_bytes(narg) {
        Some(b) => Ok(b.to_vec()),
        None => Err(type_error(vm, narg, "string")),
    }
}

pub fn opt_bytes(vm: &mut LuaVM, narg: i32, default: &str) -> LuaResult<Vec<u8>> {
    if vm.is_none_or_nil(narg) {
        Ok(default.as_bytes().to_vec())
    } else {
        check_bytes(vm, narg)
    }
}

/// luaL_checkoption: index of the argument in `options`
pub fn check_option(
    vm: &mut LuaVM,
    narg: i32,
    default: Option<&str>,
    options: &[&str],
) -> LuaResult<usize> {
    let name = match default {
        Some(d) if vm.is_none_or_nil(narg) => d.as_bytes().to_vec(),
        _ => check_bytes(vm, narg)?,
    };
    if let Some(i) = options.iter().position(|o| o.as_bytes() == name.as_slice()) {
        return Ok(i);
    }
    let msg = format!("invalid option '{}'", String::from_utf8_lossy(&name));
    Err(arg_error(vm, narg, &msg))
}

/// luaL_getmetafield: pushes `event` of the metatable of the value at
/// `idx` and returns true, or pushes nothing
pub fn get_meta_field(vm: &mut LuaVM, idx: i32, event: &str) -> bool {
    let idx = vm.abs_index(idx);
    if !vm.get_metatable(idx) {
        return false;
    }
    let key = vm.create_string(event);
    vm.l.push(key);
    vm.raw_get(-2);
    if vm.is_nil(-1) {
        vm.pop(2);
        false
    } else {
        // drop the metatable
        vm.remove(-2);
        true
    }
}

/// luaL_callmeta: calls `event` of the value at `idx` with it as argument,
/// leaving one result
pub fn call_meta(vm: &mut LuaVM, idx: i32, event: &str) -> LuaResult<bool> {
    let idx = vm.abs_index(idx);
    if !get_meta_field(vm, idx, event) {
        return Ok(false);
    }
    vm.push_value(idx);
    vm.call(1, 1)?;
    Ok(true)
}
