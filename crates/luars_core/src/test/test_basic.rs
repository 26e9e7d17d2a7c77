// Tests for the base library
use super::{new_vm, run};

#[test]
fn test_type() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(type(nil) == "nil")
        assert(type(true) == "boolean")
        assert(type(1) == "number")
        assert(type("x") == "string")
        assert(type({}) == "table")
        assert(type(print) == "function")
        assert(type(function() end) == "function")
        assert(type(coroutine.create(function() end)) == "thread")
        local ok = pcall(type)
        assert(not ok)
        "#,
    );
}

#[test]
fn test_tostring() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(tostring(nil) == "nil")
        assert(tostring(true) == "true")
        assert(tostring(false) == "false")
        assert(tostring(10) == "10")
        assert(tostring(1.5) == "1.5")
        assert(tostring(1e100) == "1e+100")
        assert(tostring(-0.25) == "-0.25")
        assert(tostring("abc") == "abc")
        table_text = tostring({})
        func_text = tostring(print)
        "#,
    );
    let t = vm.execute_string("return table_text").unwrap();
    assert!(vm.value_to_string_lossy(&t).starts_with("table: 0x"));
    let f = vm.execute_string("return func_text").unwrap();
    assert!(vm.value_to_string_lossy(&f).starts_with("function: 0x"));
}

#[test]
fn test_tostring_metamethod() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local p = setmetatable({x = 1, y = 2}, {
            __tostring = function(self) return "(" .. self.x .. "," .. self.y .. ")" end
        })
        assert(tostring(p) == "(1,2)")
        "#,
    );
}

#[test]
fn test_tonumber() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(tonumber("10") == 10)
        assert(tonumber("  0x1F  ") == 31)
        assert(tonumber("1e2") == 100)
        assert(tonumber(".5") == 0.5)
        assert(tonumber("abc") == nil)
        assert(tonumber("") == nil)
        assert(tonumber("10", 2) == 2)
        assert(tonumber("ff", 16) == 255)
        assert(tonumber("FF", 16) == 255)
        assert(tonumber("zz", 36) == 1295)
        assert(tonumber("  -7  ", 8) == -7)
        assert(tonumber("8", 8) == nil)
        assert(tonumber("1.5", 10) == 1.5)
        assert(tonumber({}) == nil)
        "#,
    );
    let e = vm.execute_string("local n = tonumber('1', 99)").unwrap_err();
    assert_eq!(
        vm.error_message(&e),
        "[string \"local n = tonumber('1', 99)\"]:1: bad argument #2 to 'tonumber' (base out of range)"
    );
}

#[test]
fn test_select_and_unpack() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(select('#') == 0)
        assert(select('#', 1, nil, nil) == 3)
        local a, b = select(2, "x", "y", "z")
        assert(a == "y" and b == "z")
        assert(select(-2, "x", "y", "z") == "y")
        assert(not pcall(select, 0, 1))
        assert(not pcall(select, -5, 1))

        local x, y, z = unpack({1, 2, 3})
        assert(x == 1 and y == 2 and z == 3)
        local m, n = unpack({1, 2, 3, 4}, 2, 3)
        assert(m == 2 and n == 3)
        assert(select('#', unpack({}, 1, 0)) == 0)
        assert(select('#', unpack({n = 1}, 1, 3)) == 3)
        "#,
    );
}

#[test]
fn test_raw_access() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local hits = 0
        local t = setmetatable({}, {
            __index = function() hits = hits + 1 return "meta" end,
            __newindex = function() hits = hits + 1 end,
        })
        assert(t.missing == "meta")
        assert(rawget(t, "missing") == nil)
        rawset(t, "k", 5)
        assert(t.k == 5)
        t.other = 1
        assert(rawget(t, "other") == nil)
        assert(hits == 2)
        assert(rawequal(t, t))
        assert(not rawequal(t, {}))
        assert(rawequal("a", "a"))
        assert(not rawequal(1, "1"))
        assert(rawset(t, 1, 2) == t)
        "#,
    );
}

#[test]
fn test_metatables() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = {}
        local mt = {}
        assert(getmetatable(t) == nil)
        assert(setmetatable(t, mt) == t)
        assert(getmetatable(t) == mt)
        setmetatable(t, nil)
        assert(getmetatable(t) == nil)

        local locked = setmetatable({}, {__metatable = "locked"})
        assert(getmetatable(locked) == "locked")
        local ok, err = pcall(setmetatable, locked, {})
        assert(not ok and err == "cannot change a protected metatable")
        assert(getmetatable("abc") == nil)
        "#,
    );
    let e = vm.execute_string("setmetatable({}, 1)").unwrap_err();
    assert!(
        vm.error_message(&e)
            .ends_with(":1: bad argument #2 to 'setmetatable' (nil or table expected)")
    );
}

#[test]
fn test_pairs_and_ipairs() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = {10, 20, 30, nil, 50, a = 1, b = 2}
        local count, sum = 0, 0
        for k, v in pairs(t) do
            count = count + 1
            sum = sum + v
        end
        assert(count == 6 and sum == 113)

        local seen = 0
        for i, v in ipairs(t) do
            assert(v == i * 10)
            seen = i
        end
        assert(seen == 3)

        local k, v = next({})
        assert(k == nil and v == nil)
        local f, s, init = pairs(t)
        assert(type(f) == "function" and s == t and init == nil)
        "#,
    );
}

#[test]
fn test_fenv() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(getfenv() == _G)
        assert(getfenv(0) == _G)
        assert(getfenv(print) == _G)

        local function probe() return value end
        local env = {value = "sandboxed"}
        setfenv(probe, env)
        assert(getfenv(probe) == env)
        assert(probe() == "sandboxed")
        value = "global"
        assert(probe() == "sandboxed")

        local function inner()
            setfenv(1, {result = "level one"})
            return result
        end
        assert(inner() == "level one")

        local ok, err = pcall(setfenv, print, {})
        assert(not ok and err == "'setfenv' cannot change environment of given object")
        assert(not pcall(getfenv, -1))
        "#,
    );
}

#[test]
fn test_loadstring_and_load() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local f = loadstring("return 1 + ...")
        assert(f(41) == 42)

        local g, err = loadstring("return +", "=calc")
        assert(g == nil and err == "calc:1: unexpected symbol near '+'")

        local parts = {"return ", "'joined'", " .. '!'"}
        local i = 0
        local h = load(function()
            i = i + 1
            return parts[i]
        end)
        assert(h() == "joined!")

        local bad, msg = load(function() return {} end)
        assert(bad == nil and msg == "reader function must return a string")

        local e, emsg = load(function() return nil end, "=empty")
        assert(e ~= nil and e() == nil)
        "#,
    );
}

#[test]
fn test_globals_table_and_version() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(_G._G == _G)
        assert(_G.print == print)
        assert(_VERSION == "Lua 5.1")
        _G.created = 5
        assert(created == 5)
        "#,
    );
}

#[test]
fn test_assert() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local a, b = assert(1, 2)
        assert(a == 1 and b == 2)
        local ok, err = pcall(assert, false)
        assert(not ok and err == "assertion failed!")
        local ok2, err2 = pcall(assert, nil, "custom")
        assert(not ok2 and err2 == "custom")
        "#,
    );
    let e = vm.execute_string("assert()").unwrap_err();
    assert_eq!(
        vm.error_message(&e),
        "[string \"assert()\"]:1: bad argument #1 to 'assert' (value expected)"
    );
}

#[test]
fn test_print_accepts_any_values() {
    let mut vm = new_vm();
    run(&mut vm, r#"print("printed", 1, nil, true, {})"#);
    let e = vm
        .execute_string("print(setmetatable({}, {__tostring = function() return {} end}))")
        .unwrap_err();
    let msg = vm.error_message(&e);
    assert!(
        msg.ends_with("'tostring' must return a string to 'print'"),
        "{msg}"
    );
}
