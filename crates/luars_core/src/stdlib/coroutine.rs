// Coroutine library
// Implements: create, resume, yield, status, running, wrap

use crate::gc::ThreadId;
use crate::lib_registry::{LibraryModule, arg_error, type_error};
use crate::lua_vm::lua_limits::upvalue_index;
use crate::lua_vm::{LuaResult, LuaStatus, LuaVM, ThreadStatus};

pub fn create_coroutine_lib() -> LibraryModule {
    crate::lib_module!("coroutine", {
        "create" => coroutine_create,
        "resume" => coroutine_resume,
        "running" => coroutine_running,
        "status" => coroutine_status,
        "wrap" => coroutine_wrap,
        "yield" => coroutine_yield,
    })
}

fn check_thread(vm: &mut LuaVM, narg: i32) -> LuaResult<ThreadId> {
    match vm.to_thread(narg) {
        Some(co) => Ok(co),
        None => Err(type_error(vm, narg, "coroutine")),
    }
}

/// Resume `co` with the `narg` values on top. Returns the number of values
/// it transferred back, or None with the error message on top.
fn aux_resume(vm: &mut LuaVM, co: ThreadId, narg: i32) -> Option<i32> {
    let status = vm.status(co);
    if status != ThreadStatus::Suspended {
        vm.pop(narg);
        let msg = format!("cannot resume {} coroutine", status.name());
        let s = vm.create_string(&msg);
        vm.l.push(s);
        return None;
    }
    match vm.resume(co, narg) {
        (LuaStatus::Ok | LuaStatus::Yield, n) => Some(n),
        _ => None,
    }
}

/// coroutine.create(f) - new suspended coroutine running `f`
fn coroutine_create(vm: &mut LuaVM) -> LuaResult<usize> {
    if !vm.is_function(1) || vm.is_cfunction(1) {
        return Err(arg_error(vm, 1, "Lua function expected"));
    }
    let co = vm.new_thread()?;
    // move function to the new thread
    vm.push_value(1);
    vm.xmove(co, 1);
    Ok(1)
}

/// coroutine.resume(co, ...) - true plus the yielded or returned values,
/// or false plus the error
fn coroutine_resume(vm: &mut LuaVM) -> LuaResult<usize> {
    let co = check_thread(vm, 1)?;
    let narg = vm.get_top() - 1;
    match aux_resume(vm, co, narg) {
        Some(r) => {
            vm.push_boolean(true);
            // true goes below the results
            vm.insert(-(r + 1));
            Ok(r as usize + 1)
        }
        None => {
            vm.push_boolean(false);
            vm.insert(-2);
            Ok(2)
        }
    }
}

fn aux_wrap(vm: &mut LuaVM) -> LuaResult<usize> {
    let Some(co) = vm.to_thread(upvalue_index(1)) else {
        return Err(vm.raise_error("cannot resume dead coroutine"));
    };
    let narg = vm.get_top();
    match aux_resume(vm, co, narg) {
        Some(r) => Ok(r as usize),
        None => {
            // error object is a string? add position information
            if vm.is_string(-1) {
                let pos = vm.where_(1);
                vm.push_string(&pos)?;
                vm.insert(-2);
                vm.concat(2)?;
            }
            Err(vm.error())
        }
    }
}

/// coroutine.wrap(f) - function resuming a new coroutine on every call
fn coroutine_wrap(vm: &mut LuaVM) -> LuaResult<usize> {
    coroutine_create(vm)?;
    vm.push_cclosure(aux_wrap, 1)?;
    Ok(1)
}

/// coroutine.yield(...)
fn coroutine_yield(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.get_top();
    Err(vm.yield_(n))
}

fn coroutine_status(vm: &mut LuaVM) -> LuaResult<usize> {
    let co = check_thread(vm, 1)?;
    let status = vm.status(co);
    vm.push_string(status.name())?;
    Ok(1)
}

/// coroutine.running() - the running coroutine, nil on the main thread
fn coroutine_running(vm: &mut LuaVM) -> LuaResult<usize> {
    if vm.push_thread() {
        // main thread is not a coroutine
        vm.push_nil();
    }
    Ok(1)
}
