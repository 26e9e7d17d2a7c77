// Tests for metamethod dispatch
use super::{new_vm, run};
use crate::{LuaResult, LuaVM};

#[test]
fn test_index_function_and_table() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local defaults = {color = "red", size = 1}
        local obj = setmetatable({size = 3}, {__index = defaults})
        assert(obj.color == "red")
        assert(obj.size == 3)
        assert(obj.missing == nil)

        local calls = {}
        local lazy = setmetatable({}, {__index = function(t, k)
            calls[#calls + 1] = k
            return k .. "!"
        end})
        assert(lazy.a == "a!" and lazy[1] == "1!")
        assert(#calls == 2)

        -- chains through several levels
        local base = {greet = function(self) return "hi " .. self.name end}
        local mid = setmetatable({}, {__index = base})
        local leaf = setmetatable({name = "leaf"}, {__index = mid})
        assert(leaf:greet() == "hi leaf")
        "#,
    );
}

#[test]
fn test_newindex() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local log = {}
        local proxy = setmetatable({}, {__newindex = function(t, k, v)
            rawset(t, k, v * 2)
            log[#log + 1] = k
        end})
        proxy.x = 5
        assert(proxy.x == 10)
        -- existing keys bypass the handler
        proxy.x = 7
        assert(proxy.x == 7)
        assert(#log == 1)

        local store = {}
        local redirect = setmetatable({}, {__newindex = store})
        redirect.y = 1
        assert(rawget(redirect, "y") == nil and store.y == 1)
        "#,
    );
}

#[test]
fn test_arithmetic_metamethods() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local V = {}
        V.__index = V
        local function vec(x, y) return setmetatable({x = x, y = y}, V) end
        V.__add = function(a, b) return vec(a.x + b.x, a.y + b.y) end
        V.__sub = function(a, b) return vec(a.x - b.x, a.y - b.y) end
        V.__mul = function(a, b)
            if type(a) == "number" then return vec(a * b.x, a * b.y) end
            return vec(a.x * b, a.y * b)
        end
        V.__unm = function(a) return vec(-a.x, -a.y) end
        V.__div = function(a, b) return "div" end
        V.__mod = function(a, b) return "mod" end
        V.__pow = function(a, b) return "pow" end

        local s = vec(1, 2) + vec(3, 4)
        assert(s.x == 4 and s.y == 6)
        local d = vec(5, 5) - vec(1, 2)
        assert(d.x == 4 and d.y == 3)
        local m = 2 * vec(1, 3)
        assert(m.x == 2 and m.y == 6)
        local m2 = vec(1, 3) * 3
        assert(m2.x == 3 and m2.y == 9)
        local n = -vec(1, -1)
        assert(n.x == -1 and n.y == 1)
        assert(vec(0, 0) / 1 == "div")
        assert(vec(0, 0) % 1 == "mod")
        assert(vec(0, 0) ^ 1 == "pow")
        "#,
    );
}

#[test]
fn test_arithmetic_coercion_and_errors() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert("10" + 5 == 15)
        assert("0x10" * 2 == 32)
        assert(7 % -3 == -2)
        assert(-7 % 3 == 2)
        assert(2 ^ 10 == 1024)
        local ok, err = pcall(function() local t = {} return t + 1 end)
        assert(not ok)
        local ok2 = pcall(function() return "abc" + 1 end)
        assert(not ok2)
        "#,
    );
    let e = vm.execute_string("local t = {} return t.x + 1").unwrap_err();
    assert_eq!(
        vm.error_message(&e),
        "[string \"local t = {} return t.x + 1\"]:1: attempt to perform arithmetic on field 'x' (a nil value)"
    );
}

#[test]
fn test_equality_metamethod() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local calls = 0
        local mt = {__eq = function(a, b) calls = calls + 1 return a.id == b.id end}
        local a = setmetatable({id = 1}, mt)
        local b = setmetatable({id = 1}, mt)
        local c = setmetatable({id = 2}, mt)
        assert(a == b)
        assert(a ~= c)
        -- same object never consults the handler
        assert(a == a)
        assert(calls == 2)

        -- different handlers mean plain identity
        local other = setmetatable({id = 1}, {__eq = function() return true end})
        assert(a ~= other)
        -- different types are never equal
        assert(a ~= 1)
        "#,
    );
}

#[test]
fn test_order_metamethods() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local mt = {}
        mt.__lt = function(a, b) return a.v < b.v end
        local function box(v) return setmetatable({v = v}, mt) end
        assert(box(1) < box(2))
        assert(not (box(2) < box(1)))
        assert(box(3) > box(2))
        -- __le falls back to not (b < a)
        assert(box(1) <= box(1))
        assert(not (box(2) <= box(1)))

        mt.__le = function(a, b) return "always" end
        assert(box(5) <= box(1))
        assert(box(5) >= box(9))

        assert("a" < "b" and "abc" < "abd" and "" < "a")
        assert("Z" < "a")
        local ok, err = pcall(function() return {} < {} end)
        assert(not ok)
        local ok2 = pcall(function() return 1 < "2" end)
        assert(not ok2)
        "#,
    );
    let e = vm.execute_string("return 1 < {}").unwrap_err();
    assert!(
        vm.error_message(&e).ends_with("attempt to compare number with table"),
        "{}",
        vm.error_message(&e)
    );
    let e = vm.execute_string("return {} < {}").unwrap_err();
    assert!(vm.error_message(&e).ends_with("attempt to compare two table values"));
}

#[test]
fn test_concat_metamethod() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local mt = {__concat = function(a, b)
            local l = type(a) == "table" and a.s or a
            local r = type(b) == "table" and b.s or b
            return l .. r
        end}
        local w = setmetatable({s = "W"}, mt)
        assert(w .. "x" == "Wx")
        assert("x" .. w == "xW")
        assert("a" .. w .. "b" .. 1 == "aWb1")
        assert(1 .. 2 == "12")
        "#,
    );
    let e = vm.execute_string("local t = {} return 'a' .. t").unwrap_err();
    assert!(
        vm.error_message(&e)
            .ends_with("attempt to concatenate local 't' (a table value)")
    );
}

#[test]
fn test_call_metamethod() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local callable = setmetatable({base = 10}, {__call = function(self, a, b)
            return self.base + a + b, "second"
        end})
        local r, s = callable(1, 2)
        assert(r == 13 and s == "second")
        local ok, v = pcall(callable, 5, 5)
        assert(ok and v == 20)
        "#,
    );
    let e = vm.execute_string("local x = 5 x()").unwrap_err();
    assert!(
        vm.error_message(&e)
            .ends_with("attempt to call local 'x' (a number value)")
    );
    let e = vm.execute_string("undefined_fn()").unwrap_err();
    assert!(
        vm.error_message(&e)
            .ends_with("attempt to call global 'undefined_fn' (a nil value)")
    );
}

#[test]
fn test_len_on_tables_is_primitive() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = setmetatable({1, 2, 3}, {__len = function() return 99 end})
        assert(#t == 3)
        assert(#"hello" == 5)
        assert(#"" == 0)
        "#,
    );
    let e = vm.execute_string("local n = 1 return #n").unwrap_err();
    assert!(
        vm.error_message(&e)
            .ends_with("attempt to get length of local 'n' (a number value)")
    );
}

struct Bag {
    items: Vec<i64>,
}

fn bag_len(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.to_userdata::<Bag>(1).map_or(0, |b| b.items.len());
    vm.push_integer(n as i64);
    Ok(1)
}

fn bag_index(vm: &mut LuaVM) -> LuaResult<usize> {
    let i = vm.to_integer(2);
    let item = vm
        .to_userdata::<Bag>(1)
        .and_then(|b| usize::try_from(i - 1).ok().and_then(|i| b.items.get(i).copied()));
    match item {
        Some(v) => vm.push_integer(v),
        None => vm.push_nil(),
    }
    Ok(1)
}

#[test]
fn test_userdata_metamethods() {
    let mut vm = new_vm();
    vm.new_userdata(Bag {
        items: vec![4, 5, 6],
    })
    .unwrap();
    vm.create_table(0, 2).unwrap();
    vm.push_cfunction(bag_len).unwrap();
    vm.set_field(-2, "__len").unwrap();
    vm.push_cfunction(bag_index).unwrap();
    vm.set_field(-2, "__index").unwrap();
    assert!(vm.set_metatable(-2));
    vm.set_global("bag").unwrap();
    run(
        &mut vm,
        r#"
        assert(type(bag) == "userdata")
        assert(#bag == 3)
        assert(bag[1] == 4 and bag[3] == 6 and bag[4] == nil)
        local mt = getmetatable(bag)
        assert(type(mt.__len) == "function")
        assert(not pcall(setmetatable, bag, {}))
        "#,
    );
}

#[test]
fn test_metamethod_errors_propagate() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = setmetatable({}, {__index = function(_, k) error("no field " .. k, 0) end})
        local ok, err = pcall(function() return t.foo end)
        assert(not ok and err == "no field foo")

        local loop = {}
        setmetatable(loop, {__index = loop})
        local ok2, err2 = pcall(function() return loop.x end)
        assert(not ok2)
        "#,
    );
    let e = vm
        .execute_string("local a = {} setmetatable(a, {__index = a}) return a.x")
        .unwrap_err();
    assert!(vm.error_message(&e).ends_with("loop in gettable"));
}
