// Tests for coroutine library functions and the resume/yield API
use super::{new_vm, run};
use crate::{LuaResult, LuaStatus, LuaVM, ThreadStatus};

#[test]
fn test_coroutine_create_resume() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local co = coroutine.create(function()
            return 42
        end)
        assert(type(co) == "thread")
        assert(coroutine.status(co) == "suspended")
        local ok, value = coroutine.resume(co)
        assert(ok == true)
        assert(value == 42)
        assert(coroutine.status(co) == "dead")
        "#,
    );
}

#[test]
fn test_coroutine_yield() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local co = coroutine.create(function(a, b)
            local c = coroutine.yield(a + b)
            local d, e = coroutine.yield(c * 2)
            return d + e
        end)
        local ok1, v1 = coroutine.resume(co, 1, 2)
        assert(ok1 and v1 == 3)
        local ok2, v2 = coroutine.resume(co, 10)
        assert(ok2 and v2 == 20)
        local ok3, v3 = coroutine.resume(co, 3, 4)
        assert(ok3 and v3 == 7)
        assert(coroutine.status(co) == "dead")
        "#,
    );
}

#[test]
fn test_resume_dead_coroutine() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local co = coroutine.create(function() end)
        coroutine.resume(co)
        local ok, err = coroutine.resume(co)
        assert(ok == false)
        assert(err == "cannot resume dead coroutine")
        "#,
    );
}

#[test]
fn test_resume_running_coroutine() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local co
        co = coroutine.create(function()
            local ok, err = coroutine.resume(co)
            return ok, err
        end)
        local ok, inner_ok, inner_err = coroutine.resume(co)
        assert(ok == true and inner_ok == false)
        assert(inner_err == "cannot resume running coroutine")
        "#,
    );
}

#[test]
fn test_status_normal_and_running() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local outer
        local inner = coroutine.create(function()
            return coroutine.status(outer)
        end)
        outer = coroutine.create(function()
            assert(coroutine.status(outer) == "running")
            assert(coroutine.running() == outer)
            local ok, st = coroutine.resume(inner)
            return st
        end)
        local ok, st = coroutine.resume(outer)
        assert(ok and st == "normal")
        assert(coroutine.running() == nil)
        "#,
    );
}

#[test]
fn test_error_inside_coroutine() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local co = coroutine.create(function()
            coroutine.yield(1)
            error("broken", 0)
        end)
        assert(coroutine.resume(co))
        local ok, err = coroutine.resume(co)
        assert(ok == false and err == "broken")
        assert(coroutine.status(co) == "dead")
        "#,
    );
}

#[test]
fn test_wrap() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local gen = coroutine.wrap(function()
            for i = 1, 3 do coroutine.yield(i) end
        end)
        assert(gen() == 1 and gen() == 2 and gen() == 3)

        local sum = 0
        for v in coroutine.wrap(function() for i = 1, 4 do coroutine.yield(i) end end) do
            sum = sum + v
        end
        assert(sum == 10)
        "#,
    );
}

#[test]
fn test_wrap_propagates_errors() {
    let mut vm = new_vm();
    let e = vm
        .execute_string(
            r#"
            local bad = coroutine.wrap(function() error("inside") end)
            bad()
            "#,
        )
        .unwrap_err();
    let msg = vm.error_message(&e);
    assert!(msg.ends_with(":2: inside"), "{msg}");
    // the caller's position comes first
    assert!(msg.starts_with("[string "), "{msg}");
}

#[test]
fn test_yield_outside_coroutine() {
    let mut vm = new_vm();
    let e = vm.execute_string("coroutine.yield(1)").unwrap_err();
    assert!(
        vm.error_message(&e)
            .ends_with("attempt to yield from outside a coroutine")
    );
}

#[test]
fn test_yield_across_pcall() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local co = coroutine.create(function()
            local ok, err = pcall(coroutine.yield, 1)
            return ok, err
        end)
        local ok, inner_ok, err = coroutine.resume(co)
        assert(ok == true and inner_ok == false)
        assert(err == "attempt to yield across metamethod/C-call boundary")
        "#,
    );
}

#[test]
fn test_create_requires_lua_function() {
    let mut vm = new_vm();
    let e = vm.execute_string("coroutine.create(print)").unwrap_err();
    let msg = vm.error_message(&e);
    assert!(msg.contains("bad argument #1 to 'create' (Lua function expected)"), "{msg}");
}

#[test]
fn test_resume_through_api() {
    let mut vm = new_vm();
    assert_eq!(
        vm.load_string("local a = ... local b = coroutine.yield(a + 1) return b * 2"),
        LuaStatus::Ok
    );
    let co = vm.new_thread().unwrap();
    vm.push_value(-2);
    vm.xmove(co, 1);
    assert_eq!(vm.status(co), ThreadStatus::Suspended);

    vm.push_integer(10);
    let (status, n) = vm.resume(co, 1);
    assert_eq!(status, LuaStatus::Yield);
    assert_eq!(status.code(), 2);
    assert_eq!(n, 1);
    assert_eq!(vm.to_integer(-1), 11);
    assert_eq!(vm.status(co), ThreadStatus::Suspended);
    vm.pop(1);

    vm.push_integer(5);
    let (status, n) = vm.resume(co, 1);
    assert_eq!(status, LuaStatus::Ok);
    assert_eq!(n, 1);
    assert_eq!(vm.to_integer(-1), 10);
    assert_eq!(vm.status(co), ThreadStatus::Dead);
    vm.pop(1);

    let (status, n) = vm.resume(co, 0);
    assert_eq!(status, LuaStatus::ErrRun);
    assert_eq!(n, 1);
    assert_eq!(vm.to_str(-1).as_deref(), Some("cannot resume dead coroutine"));
}

#[test]
fn test_native_yield() {
    fn pause(vm: &mut LuaVM) -> LuaResult<usize> {
        vm.push_string("paused")?;
        Err(vm.yield_(1))
    }
    let mut vm = new_vm();
    vm.register("pause", pause).unwrap();
    run(
        &mut vm,
        r#"
        local co = coroutine.create(function()
            local got = pause()
            return "resumed with " .. got
        end)
        local ok, v = coroutine.resume(co)
        assert(ok and v == "paused")
        local ok2, v2 = coroutine.resume(co, "x")
        assert(ok2 and v2 == "resumed with x")
        "#,
    );
}

#[test]
fn test_unreachable_coroutines_are_collected() {
    let mut vm = new_vm();
    vm.full_gc();
    let before = vm.object_pool().threads.len();
    run(
        &mut vm,
        r#"
        for i = 1, 50 do
            local co = coroutine.create(function() coroutine.yield(i) end)
            coroutine.resume(co)
        end
        "#,
    );
    vm.full_gc();
    assert_eq!(vm.object_pool().threads.len(), before);
}
