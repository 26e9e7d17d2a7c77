// Basic library (_G global functions)
// Implements: print, type, tostring, tonumber, error, assert, pcall, xpcall,
// select, rawget, rawset, rawequal, setmetatable, getmetatable, next, pairs,
// ipairs, unpack, collectgarbage, getfenv, setfenv, loadstring, load
use std::io::Write;

use crate::lib_registry::{
    LibraryModule, arg_error, call_meta, check_any, check_bytes, check_integer, check_option,
    check_type, get_meta_field, opt_bytes, opt_integer,
};
use crate::lua_value::{LuaValue, LuaValueKind};
use crate::lua_vm::lua_limits::LUA_GLOBALSINDEX;
use crate::lua_vm::{GcOption, LUA_MULTRET, LuaResult, LuaStatus, LuaVM};

pub fn create_basic_lib() -> LibraryModule {
    crate::lib_module!("_G", {
        "assert" => lua_assert,
        "collectgarbage" => lua_collectgarbage,
        "error" => lua_error,
        "getfenv" => lua_getfenv,
        "getmetatable" => lua_getmetatable,
        "ipairs" => lua_ipairs,
        "load" => lua_load,
        "loadstring" => lua_loadstring,
        "next" => lua_next,
        "pairs" => lua_pairs,
        "pcall" => lua_pcall,
        "print" => lua_print,
        "rawequal" => lua_rawequal,
        "rawget" => lua_rawget,
        "rawset" => lua_rawset,
        "select" => lua_select,
        "setfenv" => lua_setfenv,
        "setmetatable" => lua_setmetatable,
        "tonumber" => lua_tonumber,
        "tostring" => lua_tostring,
        "type" => lua_type,
        "unpack" => lua_unpack,
        "xpcall" => lua_xpcall,
    })
    .with_value("_G", |vm| LuaValue::Table(vm.globals()))
    .with_value("_VERSION", |vm| vm.create_string("Lua 5.1"))
}

/// print(...) - Print values to stdout through the global `tostring`
fn lua_print(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.get_top();
    vm.get_global("tostring")?;
    let mut out = Vec::new();
    for i in 1..=n {
        vm.push_value(-1);
        vm.push_value(i);
        vm.call(1, 1)?;
        let Some(s) = vm.to_bytes(-1) else {
            return Err(vm.raise_error("'tostring' must return a string to 'print'"));
        };
        if i > 1 {
            out.push(b'\t');
        }
        out.extend_from_slice(s);
        vm.pop(1);
    }
    out.push(b'\n');
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(&out);
    let _ = stdout.flush();
    Ok(0)
}

/// type(v) - Name of the type of a value
fn lua_type(vm: &mut LuaVM) -> LuaResult<usize> {
    check_any(vm, 1)?;
    let name = vm.type_name(1);
    vm.push_string(name)?;
    Ok(1)
}

/// Push the string form of the value at `idx`, honoring `__tostring`
pub(crate) fn push_tostring(vm: &mut LuaVM, idx: i32) -> LuaResult<()> {
    let idx = vm.abs_index(idx);
    if call_meta(vm, idx, "__tostring")? {
        return Ok(());
    }
    match vm.type_of(idx) {
        LuaValueKind::Number | LuaValueKind::String => {
            vm.push_value(idx);
            // numbers are converted in place
            vm.to_bytes(-1);
            Ok(())
        }
        LuaValueKind::Boolean => {
            let b = vm.to_boolean(idx);
            vm.push_string(if b { "true" } else { "false" })
        }
        LuaValueKind::Nil | LuaValueKind::None => vm.push_string("nil"),
        kind => {
            let p = vm.to_pointer(idx);
            vm.push_fstring(format_args!("{}: {:#010x}", kind.name(), p))
        }
    }
}

/// tostring(v)
fn lua_tostring(vm: &mut LuaVM) -> LuaResult<usize> {
    check_any(vm, 1)?;
    push_tostring(vm, 1)?;
    Ok(1)
}

/// tonumber(e [, base])
fn lua_tonumber(vm: &mut LuaVM) -> LuaResult<usize> {
    let base = opt_integer(vm, 2, 10)?;
    if base == 10 {
        check_any(vm, 1)?;
        if vm.is_number(1) {
            let n = vm.to_number(1);
            vm.push_number(n);
            return Ok(1);
        }
    } else {
        let s = check_bytes(vm, 1)?;
        if !(2..=36).contains(&base) {
            return Err(arg_error(vm, 2, "base out of range"));
        }
        if let Some(n) = parse_with_base(&s, base as u32) {
            vm.push_number(n);
            return Ok(1);
        }
    }
    vm.push_nil();
    Ok(1)
}

/// Integer numeral in `base`, surrounded by optional whitespace
fn parse_with_base(s: &[u8], base: u32) -> Option<f64> {
    let s = s.trim_ascii();
    let (neg, digits) = match s.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, s),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n = 0.0f64;
    for &c in digits {
        let d = (c as char).to_digit(base)?;
        n = n * base as f64 + d as f64;
    }
    Some(if neg { -n } else { n })
}

/// error(message [, level])
fn lua_error(vm: &mut LuaVM) -> LuaResult<usize> {
    let level = opt_integer(vm, 2, 1)?;
    vm.set_top(1);
    if vm.is_string(1) && level > 0 {
        let pos = vm.where_(level as usize);
        vm.push_string(&pos)?;
        vm.insert(1);
        vm.concat(2)?;
    }
    Err(vm.error())
}

/// assert(v [, message])
fn lua_assert(vm: &mut LuaVM) -> LuaResult<usize> {
    check_any(vm, 1)?;
    if !vm.to_boolean(1) {
        let msg = opt_bytes(vm, 2, "assertion failed!")?;
        return Err(vm.raise_error(String::from_utf8_lossy(&msg)));
    }
    Ok(vm.get_top() as usize)
}

/// pcall(f, ...) - true plus the results, or false plus the error value
fn lua_pcall(vm: &mut LuaVM) -> LuaResult<usize> {
    check_any(vm, 1)?;
    let status = vm.pcall(vm.get_top() - 1, LUA_MULTRET, 0);
    finish_pcall(vm, status)
}

/// xpcall(f, handler) - like pcall, with `handler` run on runtime errors
fn lua_xpcall(vm: &mut LuaVM) -> LuaResult<usize> {
    check_any(vm, 2)?;
    vm.set_top(2);
    // handler goes below the function
    vm.insert(1);
    let status = vm.pcall(0, LUA_MULTRET, 1);
    vm.push_boolean(status.is_ok());
    vm.replace(1);
    Ok(vm.get_top() as usize)
}

fn finish_pcall(vm: &mut LuaVM, status: LuaStatus) -> LuaResult<usize> {
    vm.push_boolean(status.is_ok());
    vm.insert(1);
    Ok(vm.get_top() as usize)
}

/// select(n, ...) or select('#', ...)
fn lua_select(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.get_top();
    if vm.type_of(1) == LuaValueKind::String && vm.to_bytes(1).is_some_and(|s| s.first() == Some(&b'#')) {
        vm.push_integer(i64::from(n - 1));
        return Ok(1);
    }
    let mut i = check_integer(vm, 1)?;
    if i < 0 {
        i += i64::from(n);
    } else if i > i64::from(n) {
        i = i64::from(n);
    }
    if i < 1 {
        return Err(arg_error(vm, 1, "index out of range"));
    }
    Ok((i64::from(n) - i) as usize)
}

fn lua_rawequal(vm: &mut LuaVM) -> LuaResult<usize> {
    check_any(vm, 1)?;
    check_any(vm, 2)?;
    let eq = vm.raw_equal(1, 2);
    vm.push_boolean(eq);
    Ok(1)
}

fn lua_rawget(vm: &mut LuaVM) -> LuaResult<usize> {
    check_type(vm, 1, LuaValueKind::Table)?;
    check_any(vm, 2)?;
    vm.set_top(2);
    vm.raw_get(1);
    Ok(1)
}

fn lua_rawset(vm: &mut LuaVM) -> LuaResult<usize> {
    check_type(vm, 1, LuaValueKind::Table)?;
    check_any(vm, 2)?;
    check_any(vm, 3)?;
    vm.set_top(3);
    vm.raw_set(1)?;
    Ok(1)
}

/// getmetatable(object) - honors the `__metatable` field
fn lua_getmetatable(vm: &mut LuaVM) -> LuaResult<usize> {
    check_any(vm, 1)?;
    if !vm.get_metatable(1) {
        vm.push_nil();
        return Ok(1);
    }
    // returns either __metatable field (if present) or metatable
    get_meta_field(vm, 1, "__metatable");
    Ok(1)
}

/// setmetatable(table, metatable)
fn lua_setmetatable(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = vm.type_of(2);
    check_type(vm, 1, LuaValueKind::Table)?;
    if t != LuaValueKind::Nil && t != LuaValueKind::Table {
        return Err(arg_error(vm, 2, "nil or table expected"));
    }
    if get_meta_field(vm, 1, "__metatable") {
        return Err(vm.raise_error("cannot change a protected metatable"));
    }
    vm.set_top(2);
    vm.set_metatable(1);
    Ok(1)
}

fn lua_next(vm: &mut LuaVM) -> LuaResult<usize> {
    check_type(vm, 1, LuaValueKind::Table)?;
    // create a 2nd argument if there isn't one
    vm.set_top(2);
    if vm.next(1)? {
        Ok(2)
    } else {
        vm.push_nil();
        Ok(1)
    }
}

/// pairs(t) - returns next, t, nil
fn lua_pairs(vm: &mut LuaVM) -> LuaResult<usize> {
    check_type(vm, 1, LuaValueKind::Table)?;
    vm.push_cfunction(lua_next)?;
    vm.push_value(1);
    vm.push_nil();
    Ok(3)
}

fn ipairs_aux(vm: &mut LuaVM) -> LuaResult<usize> {
    let i = check_integer(vm, 2)? + 1;
    check_type(vm, 1, LuaValueKind::Table)?;
    vm.push_integer(i);
    vm.raw_get_i(1, i);
    Ok(if vm.is_nil(-1) { 0 } else { 2 })
}

/// ipairs(t) - returns the iterator, t, 0
fn lua_ipairs(vm: &mut LuaVM) -> LuaResult<usize> {
    check_type(vm, 1, LuaValueKind::Table)?;
    vm.push_cfunction(ipairs_aux)?;
    vm.push_value(1);
    vm.push_integer(0);
    Ok(3)
}

/// unpack(list [, i [, j]])
fn lua_unpack(vm: &mut LuaVM) -> LuaResult<usize> {
    check_type(vm, 1, LuaValueKind::Table)?;
    let i = opt_integer(vm, 2, 1)?;
    let e = if vm.is_none_or_nil(3) {
        vm.obj_len(1) as i64
    } else {
        check_integer(vm, 3)?
    };
    if i > e {
        return Ok(0);
    }
    let n = e.saturating_sub(i).saturating_add(1);
    if n <= 0 || n >= i64::from(i32::MAX) || !vm.check_stack(n as i32) {
        return Err(vm.raise_error("too many results to unpack"));
    }
    for k in i..=e {
        vm.raw_get_i(1, k);
    }
    Ok(n as usize)
}

/// collectgarbage([opt [, arg]])
fn lua_collectgarbage(vm: &mut LuaVM) -> LuaResult<usize> {
    const OPTS: [&str; 7] = [
        "stop",
        "restart",
        "collect",
        "count",
        "step",
        "setpause",
        "setstepmul",
    ];
    let o = check_option(vm, 1, Some("collect"), &OPTS)?;
    let ex = opt_integer(vm, 2, 0)?.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
    match OPTS[o] {
        "count" => {
            let kb = vm.gc(GcOption::Count);
            let b = vm.gc(GcOption::CountB);
            vm.push_number(f64::from(kb) + f64::from(b) / 1024.0);
        }
        "step" => {
            let done = vm.gc(GcOption::Step(ex));
            vm.push_boolean(done != 0);
        }
        name => {
            let what = match name {
                "stop" => GcOption::Stop,
                "restart" => GcOption::Restart,
                "setpause" => GcOption::SetPause(ex),
                "setstepmul" => GcOption::SetStepMul(ex),
                _ => GcOption::Collect,
            };
            let res = vm.gc(what);
            vm.push_integer(i64::from(res));
        }
    }
    Ok(1)
}

/// Push the function named by argument 1: a function value, or the
/// function running at the given stack level
fn get_func(vm: &mut LuaVM, opt: bool) -> LuaResult<()> {
    if vm.is_function(1) {
        vm.push_value(1);
        return Ok(());
    }
    let level = if opt {
        opt_integer(vm, 1, 1)?
    } else {
        check_integer(vm, 1)?
    };
    if level < 0 {
        return Err(arg_error(vm, 1, "level must be non-negative"));
    }
    match level_function(vm, level as usize) {
        Some(f) => {
            vm.l.push(f);
            Ok(())
        }
        None => Err(arg_error(vm, 1, "invalid level")),
    }
}

/// Function running at `level`, 0 being the running native function
fn level_function(vm: &LuaVM, level: usize) -> Option<LuaValue> {
    let idx = vm.l.call_stack.len().checked_sub(level + 1)?;
    // the base frame has no function
    if idx == 0 {
        return None;
    }
    let ci = vm.l.call_stack.get(idx)?;
    Some(vm.l.get(ci.func))
}

/// getfenv([f]) - environment of a function or stack level
fn lua_getfenv(vm: &mut LuaVM) -> LuaResult<usize> {
    get_func(vm, true)?;
    if vm.is_cfunction(-1) {
        // is a native function? return the thread's globals
        vm.push_value(LUA_GLOBALSINDEX);
    } else {
        vm.get_fenv(-1);
    }
    Ok(1)
}

/// setfenv(f, table) - level 0 changes the running thread's environment
fn lua_setfenv(vm: &mut LuaVM) -> LuaResult<usize> {
    check_type(vm, 2, LuaValueKind::Table)?;
    get_func(vm, false)?;
    vm.push_value(2);
    if vm.is_number(1) && vm.to_number(1) == 0.0 {
        vm.push_thread();
        vm.insert(-2);
        vm.set_fenv(-2);
        return Ok(0);
    }
    if vm.is_cfunction(-2) || !vm.set_fenv(-2) {
        return Err(vm.raise_error("'setfenv' cannot change environment of given object"));
    }
    Ok(1)
}

/// The chunk on top, or nil plus the message
fn load_aux(vm: &mut LuaVM, status: LuaStatus) -> LuaResult<usize> {
    if status.is_ok() {
        Ok(1)
    } else {
        vm.push_nil();
        vm.insert(-2);
        Ok(2)
    }
}

/// loadstring(string [, chunkname])
fn lua_loadstring(vm: &mut LuaVM) -> LuaResult<usize> {
    let s = check_bytes(vm, 1)?;
    let name = if vm.is_none_or_nil(2) {
        s.clone()
    } else {
        check_bytes(vm, 2)?
    };
    let status = vm.load_buffer(&s, &String::from_utf8_lossy(&name));
    load_aux(vm, status)
}

/// load(func [, chunkname]) - pieces come from repeated calls to `func`
fn lua_load(vm: &mut LuaVM) -> LuaResult<usize> {
    let name = opt_bytes(vm, 2, "=(load)")?;
    check_type(vm, 1, LuaValueKind::Function)?;
    let mut source = Vec::new();
    loop {
        vm.push_value(1);
        vm.call(0, 1)?;
        if vm.is_nil(-1) {
            vm.pop(1);
            break;
        }
        if !vm.is_string(-1) {
            vm.pop(1);
            vm.push_nil();
            vm.push_string("reader function must return a string")?;
            return Ok(2);
        }
        match vm.to_bytes(-1) {
            Some(piece) if !piece.is_empty() => source.extend_from_slice(piece),
            _ => {
                vm.pop(1);
                break;
            }
        }
        vm.pop(1);
    }
    let status = vm.load_buffer(&source, &String::from_utf8_lossy(&name));
    load_aux(vm, status)
}

