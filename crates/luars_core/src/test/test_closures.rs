// Tests for closures and upvalue sharing
use super::{new_vm, run};

#[test]
fn test_closed_upvalues_stay_shared() {
    let mut vm = new_vm();
    let v = vm
        .execute_string(
            r#"
            local function counter()
                local n = 0
                return function() n = n + 1 return n end, function() return n end
            end
            local inc, get = counter()
            inc() inc()
            return get()
            "#,
        )
        .unwrap();
    assert_eq!(v.as_number(), Some(2.0));
}

#[test]
fn test_open_upvalue_sees_local_updates() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local x = 1
        local function get() return x end
        x = 5
        assert(get() == 5)
        local function set(v) x = v end
        set(9)
        assert(x == 9 and get() == 9)
        "#,
    );
}

#[test]
fn test_fresh_local_per_iteration() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local fns = {}
        for i = 1, 3 do
            fns[i] = function() return i end
        end
        assert(fns[1]() == 1 and fns[2]() == 2 and fns[3]() == 3)

        local acc = {}
        local j = 0
        while j < 3 do
            j = j + 1
            local k = j * 10
            acc[j] = function() k = k + 1 return k end
        end
        assert(acc[1]() == 11 and acc[1]() == 12 and acc[2]() == 21)
        "#,
    );
}

#[test]
fn test_nested_upvalue_chain() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local function outer()
            local a = 1
            return function()
                local b = 2
                return function()
                    a = a + b
                    return a
                end
            end
        end
        local mid = outer()
        local f1, f2 = mid(), mid()
        assert(f1() == 3)
        assert(f2() == 5)
        assert(f1() == 7)
        "#,
    );
}

#[test]
fn test_upvalue_closed_by_error() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local saved
        pcall(function()
            local v = "kept"
            saved = function() return v end
            error("leave")
        end)
        assert(saved() == "kept")
        "#,
    );
}

#[test]
fn test_recursive_local_function() {
    let mut vm = new_vm();
    let v = vm
        .execute_string(
            r#"
            local function fib(n)
                if n < 2 then return n end
                return fib(n - 1) + fib(n - 2)
            end
            return fib(20)
            "#,
        )
        .unwrap();
    assert_eq!(v.as_number(), Some(6765.0));
}

#[test]
fn test_varargs() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local function pack(...) return {n = select('#', ...), ...} end
        local t = pack(1, nil, 3)
        assert(t.n == 3 and t[1] == 1 and t[2] == nil and t[3] == 3)
        local function second(...) local _, b = ... return b end
        assert(second("a", "b", "c") == "b")
        local function count(...) return select('#', ...) end
        assert(count() == 0)
        assert(count(nil, nil) == 2)
        assert(select(2, "a", "b", "c") == "b")
        assert(select(-1, "a", "b", "c") == "c")
        "#,
    );
}

#[test]
fn test_tail_calls_do_not_grow_stack() {
    let mut vm = new_vm();
    let v = vm
        .execute_string(
            r#"
            local function loop(n, acc)
                if n == 0 then return acc end
                return loop(n - 1, acc + 1)
            end
            return loop(100000, 0)
            "#,
        )
        .unwrap();
    assert_eq!(v.as_number(), Some(100000.0));
}
