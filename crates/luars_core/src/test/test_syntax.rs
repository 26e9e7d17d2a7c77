// End-to-end tests for the compiler front end
use super::{new_vm, run};
use crate::LuaStatus;

fn syntax_error(src: &str) -> String {
    let mut vm = new_vm();
    assert_eq!(vm.load_buffer(src.as_bytes(), "=src"), LuaStatus::ErrSyntax);
    vm.to_str(-1).map(|s| s.into_owned()).unwrap_or_default()
}

#[test]
fn test_control_structures() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local n = 0
        while n < 10 do n = n + 1 end
        assert(n == 10)

        local r = 0
        repeat
            local done = r >= 5
            r = r + 1
        until done
        assert(r == 6)

        local acc = 0
        for i = 10, 1, -3 do acc = acc + i end
        assert(acc == 10 + 7 + 4 + 1)
        for i = 1, 0 do error("never") end
        local fsum = 0
        for x = 0, 1, 0.25 do fsum = fsum + x end
        assert(fsum == 2.5)

        local function grade(s)
            if s >= 90 then return "A"
            elseif s >= 80 then return "B"
            else return "C" end
        end
        assert(grade(95) == "A" and grade(85) == "B" and grade(10) == "C")

        local found
        for i = 1, 100 do
            if i * i > 50 then found = i break end
        end
        assert(found == 8)

        do
            local scoped = 1
            assert(scoped == 1)
        end
        assert(scoped == nil)
        "#,
    );
}

#[test]
fn test_numeric_for_errors() {
    let mut vm = new_vm();
    let e = vm.execute_string("for i = 'a', 2 do end").unwrap_err();
    assert!(
        vm.error_message(&e)
            .ends_with("'for' initial value must be a number")
    );
    let e = vm.execute_string("for i = 1, {} do end").unwrap_err();
    assert!(vm.error_message(&e).ends_with("'for' limit must be a number"));
    let e = vm.execute_string("for i = 1, 2, nil do end").unwrap_err();
    assert!(vm.error_message(&e).ends_with("'for' step must be a number"));
}

#[test]
fn test_functions_and_methods() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local obj = {inner = {}}
        function obj.inner.add(a, b) return a + b end
        function obj:name() return self == obj end
        assert(obj.inner.add(2, 3) == 5)
        assert(obj:name())

        function global_fn(...) return select('#', ...) end
        assert(global_fn(1, 2, 3) == 3)

        local function multi() return 1, 2, 3 end
        local t = {multi()}
        assert(#t == 3)
        local u = {multi(), multi()}
        assert(#u == 4)
        local v = {(multi())}
        assert(#v == 1)

        local a, b, c, d = multi()
        assert(a == 1 and c == 3 and d == nil)

        -- call sugar
        local function id(x) return x end
        assert(id"str" == "str")
        assert(id{1}[1] == 1)
        "#,
    );
}

#[test]
fn test_multiple_assignment() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local a, b = 1, 2
        a, b = b, a
        assert(a == 2 and b == 1)

        local t = {}
        local i = 1
        i, t[i] = i + 1, 20
        assert(i == 2 and t[1] == 20)

        local x, y, z = 1
        assert(x == 1 and y == nil and z == nil)
        local p, q = 1, 2, 3
        assert(p == 1 and q == 2)
        "#,
    );
}

#[test]
fn test_operator_precedence() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(1 + 2 * 3 == 7)
        assert((1 + 2) * 3 == 9)
        assert(2 ^ 3 ^ 2 == 512)
        assert(-2 ^ 2 == -4)
        assert(2 ^ -1 == 0.5)
        assert(not nil == true)
        assert(not 1 == false)
        assert(1 .. 2 .. 3 == "123")
        assert("a" .. 1 + 2 == "a3")
        assert(1 < 2 == true)
        assert(10 - 4 - 3 == 3)
        assert(12 / 3 / 2 == 2)
        assert(-3 % 5 == 2)
        assert(#"abc" + 1 == 4)

        assert((nil or "d") == "d")
        assert((false and error("skipped")) == false)
        assert((1 and 2) == 2)
        assert((nil and 1 or 3) == 3)
        local x = 5
        assert((x > 3 and "big" or "small") == "big")
        "#,
    );
}

#[test]
fn test_literals() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(0x10 == 16 and 0XfF == 255)
        assert(1e3 == 1000 and 2.5E-1 == 0.25 and .5 == 0.5 and 3. == 3)
        assert("\65\066\0677" == "ABC7")
        assert("tab\there" == 'tab	here')
        assert("quote\"s" == 'quote"s')
        assert("a\
b" == "a\nb")
        assert(#"\0" == 1)
        assert("\\" == [[\]])

        local long = [==[
first
]] still inside
last]==]
        assert(long == "first\n]] still inside\nlast")
        assert([[]] == "")

        --[[ block
             comment ]] assert(true)
        --[==[ another
        ]==]
        -- line comment
        assert(#[[
x]] == 1)
        "#,
    );
}

#[test]
fn test_syntax_error_messages() {
    assert_eq!(syntax_error("x = = 1"), "src:1: unexpected symbol near '='");
    assert_eq!(
        syntax_error("while true do\nx = 1\n"),
        "src:3: 'end' expected (to close 'while' at line 1) near '<eof>'"
    );
    assert_eq!(
        syntax_error("local t = {1, 2"),
        "src:1: '}' expected near '<eof>'"
    );
    assert_eq!(syntax_error("f("), "src:1: unexpected symbol near '<eof>'");
    assert_eq!(
        syntax_error("for i do end"),
        "src:1: '=' or 'in' expected near 'do'"
    );
    assert_eq!(
        syntax_error("return 1\nx = 2"),
        "src:2: '<eof>' expected near 'x'"
    );
    assert_eq!(
        syntax_error("x = \"abc"),
        "src:1: unfinished string near '<eof>'"
    );
    assert_eq!(
        syntax_error("x = '\\300'"),
        "src:1: escape sequence too large near ''\\300'"
    );
    assert_eq!(
        syntax_error("x = [[ a [[ b ]]"),
        "src:1: nesting of [[...]] is deprecated near '['"
    );
    assert_eq!(syntax_error("x = 0x"), "src:1: malformed number near '0x'");
    assert_eq!(
        syntax_error("local function end"),
        "src:1: '<name>' expected near 'end'"
    );
}

#[test]
fn test_syntax_error_through_loadstring() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local f, err = loadstring("x = ", "=inline")
        assert(f == nil and err == "inline:1: unexpected symbol near '<eof>'")
        local g, err2 = loadstring("local a = 1\nif a then")
        assert(g == nil)
        assert(err2 == [=[[string "local a = 1..."]:2: 'end' expected near '<eof>']=])
        "#,
    );
}

#[test]
fn test_binary_chunk_is_rejected() {
    let mut vm = new_vm();
    assert_eq!(vm.load_buffer(b"\x1bLuaQ", "=bin"), LuaStatus::ErrSyntax);
    assert!(
        vm.to_str(-1)
            .is_some_and(|s| s.contains("precompiled chunks are not supported"))
    );
}
