// Tests for protected calls, error values and error handlers
use super::{new_vm, run};
use crate::{LuaError, LuaResult, LuaStatus, LuaVM, SafeOption};

#[test]
fn test_error_level_zero_keeps_value() {
    let mut vm = new_vm();
    assert_eq!(vm.load_string("error('boom', 0)"), LuaStatus::Ok);
    let status = vm.pcall(0, 0, 0);
    assert_ne!(status, LuaStatus::Ok);
    assert_eq!(vm.to_str(-1).as_deref(), Some("boom"));
}

#[test]
fn test_error_default_level_adds_position() {
    let mut vm = new_vm();
    assert_eq!(vm.load_string("error('boom')"), LuaStatus::Ok);
    let status = vm.pcall(0, 0, 0);
    assert_eq!(status, LuaStatus::ErrRun);
    assert_eq!(status.code(), 1);
    assert_eq!(
        vm.to_str(-1).as_deref(),
        Some("[string \"error('boom')\"]:1: boom")
    );
}

#[test]
fn test_error_level_two_blames_caller() {
    let mut vm = new_vm();
    let v = vm
        .execute_string(
            "local function check(x)\n\
             if not x then error('bad input', 2) end\n\
             end\n\
             local ok, e = pcall(function()\n\
             check(false)\n\
             end)\n\
             return e",
        )
        .unwrap();
    assert_eq!(vm.value_to_string_lossy(&v), "[string \"local function check(x)...\"]:5: bad input");
}

#[test]
fn test_non_string_error_value() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local err = {code = 42}
        local ok, e = pcall(error, err)
        assert(not ok and e == err and e.code == 42)
        local ok2, e2 = pcall(error)
        assert(not ok2 and e2 == nil)
        "#,
    );
}

#[test]
fn test_pcall_restores_top() {
    let mut vm = new_vm();
    vm.push_integer(1);
    vm.push_integer(2);
    let top = vm.get_top();
    assert_eq!(
        vm.load_string(
            "local function f(n) if n == 0 then error('deep') end return f(n - 1) + 1 end\n\
             return f(50)"
        ),
        LuaStatus::Ok
    );
    let status = vm.pcall(0, 3, 0);
    assert_eq!(status, LuaStatus::ErrRun);
    assert_eq!(vm.get_top(), top + 1);
    assert!(vm.to_str(-1).unwrap().ends_with("deep"));
    assert_eq!(vm.to_integer(1), 1);
    assert_eq!(vm.to_integer(2), 2);
}

#[test]
fn test_nested_pcall() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local ok, inner_ok, inner_err = pcall(function()
            local ok2, e = pcall(error, "inner", 0)
            return ok2, e
        end)
        assert(ok == true and inner_ok == false and inner_err == "inner")
        local ok3, e3 = pcall(function()
            pcall(error, "swallowed")
            error("outer", 0)
        end)
        assert(ok3 == false and e3 == "outer")
        "#,
    );
}

#[test]
fn test_runtime_error_messages() {
    let mut vm = new_vm();
    let cases = [
        ("local x; return x + 1", "attempt to perform arithmetic on local 'x' (a nil value)"),
        ("return nosuch()", "attempt to call global 'nosuch' (a nil value)"),
        ("local t = {} return t.a.b", "attempt to index field 'a' (a nil value)"),
        ("return {} < {}", "attempt to compare two table values"),
        ("return 1 < 'x'", "attempt to compare number with string"),
        ("return 'a' .. {}", "attempt to concatenate a table value"),
        ("return #nil", "attempt to get length of a nil value"),
    ];
    for (src, expected) in cases {
        let e = vm.execute_string(src).unwrap_err();
        let msg = vm.error_message(&e);
        assert!(msg.ends_with(expected), "{src}: {msg}");
        assert!(msg.starts_with("[string "), "{src}: {msg}");
    }
}

#[test]
fn test_xpcall_handler_sees_error() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local ok, e = xpcall(function() error("oops", 0) end, function(m) return "handled: " .. m end)
        assert(ok == false and e == "handled: oops")
        local ok2, a, b = xpcall(function() return 1, 2 end, print)
        assert(ok2 == true and a == 1 and b == 2)
        "#,
    );
}

#[test]
fn test_handler_failure_is_errerr() {
    fn bad_handler(vm: &mut LuaVM) -> LuaResult<usize> {
        Err(vm.raise_error("handler broke"))
    }
    let mut vm = new_vm();
    vm.push_cfunction(bad_handler).unwrap();
    assert_eq!(vm.load_string("error('first')"), LuaStatus::Ok);
    let status = vm.pcall(0, 0, 1);
    assert_eq!(status, LuaStatus::ErrErr);
    assert_eq!(status.code(), 5);
    assert_eq!(vm.to_str(-1).as_deref(), Some("error in error handling"));
    assert_eq!(vm.get_top(), 2);
}

#[test]
fn test_handler_failure_from_lua() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local ok, e = xpcall(function() error("x") end, function() error("y") end)
        assert(ok == false and e == "error in error handling")
        "#,
    );
}

#[test]
fn test_native_error_propagates_unchanged() {
    fn fails(vm: &mut LuaVM) -> LuaResult<usize> {
        vm.create_table(0, 0)?;
        vm.push_integer(7);
        vm.set_field(-2, "code")?;
        Err(vm.error())
    }
    let mut vm = new_vm();
    vm.register("fails", fails).unwrap();
    run(
        &mut vm,
        r#"
        local ok, e = pcall(fails)
        assert(not ok and type(e) == "table" and e.code == 7)
        "#,
    );
}

#[test]
fn test_stack_overflow() {
    let mut vm = new_vm();
    let e = vm
        .execute_string("local function f() return 1 + f() end return f()")
        .unwrap_err();
    assert!(vm.error_message(&e).contains("stack overflow"));
    // the state is still usable
    let v = vm.execute_string("return 1 + 1").unwrap();
    assert_eq!(v.as_number(), Some(2.0));
}

#[test]
fn test_memory_limit() {
    let option = SafeOption {
        max_memory_limit: 512 * 1024,
        ..SafeOption::default()
    };
    let mut vm = LuaVM::new(option);
    let e = vm
        .execute_string("local t = {} for i = 1, 1e7 do t[i] = {} end")
        .unwrap_err();
    assert_eq!(e, LuaError::Memory);
    assert_eq!(vm.error_message(&e), "not enough memory");
    // the garbage is gone once the chunk's frame is
    let v = vm.execute_string("return 40 + 2").unwrap();
    assert_eq!(v.as_number(), Some(42.0));
}

#[test]
fn test_panic_handler_closes_state() {
    fn on_panic(vm: &mut LuaVM) -> LuaResult<usize> {
        assert!(vm.to_str(-1).unwrap().ends_with("unprotected"));
        Ok(0)
    }
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        function inner() error('unprotected') end
        function outer() inner() end
        "#,
    );
    assert!(vm.at_panic(on_panic).is_none());
    vm.get_global("outer").unwrap();
    let r = vm.call(0, 0);
    assert!(r.is_err());
    assert!(vm.is_closed());
    // the failed frames are gone
    assert_eq!(vm.get_top(), 0);

    // and nothing runs any more
    assert_eq!(vm.do_string("return 7"), LuaStatus::ErrErr);
    assert_eq!(
        vm.to_str(-1).as_deref(),
        Some("state closed by an unprotected error")
    );
    vm.set_top(0);
    assert_eq!(vm.load_string("return 7"), LuaStatus::Ok);
    assert_eq!(vm.call(0, 1), Err(LuaError::ErrorHandler));
    assert_eq!(vm.get_top(), 0);
    assert!(vm.execute_string("return 1").is_err());
}

#[test]
fn test_failing_panic_handler_still_closes() {
    fn on_panic(_vm: &mut LuaVM) -> LuaResult<usize> {
        Err(LuaError::Memory)
    }
    let mut vm = new_vm();
    vm.at_panic(on_panic);
    assert_eq!(vm.load_string("local t = nil; t.x = 1"), LuaStatus::Ok);
    assert!(vm.call(0, 0).is_err());
    assert!(vm.is_closed());
    assert_eq!(vm.get_top(), 0);
}

#[test]
fn test_deep_native_nesting_on_small_thread() {
    let handle = std::thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(|| {
            let mut vm = new_vm();
            let v = vm
                .execute_string("local function f() pcall(f) end f() return 'done'")
                .unwrap();
            assert_eq!(vm.value_to_string_lossy(&v), "done");

            let e = vm
                .execute_string(
                    "local t = setmetatable({}, {__index = function(t, k) return t[k] end})
                     return t.x",
                )
                .unwrap_err();
            assert!(vm.error_message(&e).ends_with("C stack overflow"));

            let e = vm
                .execute_string("local function f() coroutine.wrap(f)() end f()")
                .unwrap_err();
            assert!(vm.error_message(&e).ends_with("C stack overflow"));

            // the state is still usable afterwards
            let v = vm.execute_string("return 1 + 1").unwrap();
            assert_eq!(v.as_number(), Some(2.0));
        })
        .unwrap();
    handle.join().unwrap();
}
