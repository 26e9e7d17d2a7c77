// Tests for table semantics: array/hash split, removal, rehash, NaN keys
use super::{new_vm, run};
use crate::{LuaVM, SafeOption};

/// Number of pairs `next` visits in the table at `idx`
fn count_pairs(vm: &mut LuaVM, idx: i32) -> usize {
    let idx = vm.abs_index(idx);
    let mut n = 0;
    vm.push_nil();
    while vm.next(idx).unwrap() {
        n += 1;
        vm.pop(1);
    }
    n
}

#[test]
fn test_sum_of_two_fields() {
    let mut vm = LuaVM::new(SafeOption::default());
    let v = vm
        .execute_string("t = {}; t[1]=10; t[2]=20; return t[1]+t[2]")
        .unwrap();
    assert_eq!(v.as_number(), Some(30.0));
}

#[test]
fn test_no_aliasing_across_array_boundary() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.create_table(4, 0).unwrap();
    for i in 1..=8 {
        vm.push_integer(i * 100);
        vm.raw_set_i(1, i);
    }
    // float keys with integral values are the same keys
    vm.push_number(3.0);
    vm.raw_get(1);
    assert_eq!(vm.to_integer(-1), 300);
    vm.pop(1);
    // a non-integral key is distinct
    vm.push_number(3.5);
    vm.push_string("half").unwrap();
    vm.raw_set(1).unwrap();
    vm.push_string("3").unwrap();
    vm.push_string("string three").unwrap();
    vm.raw_set(1).unwrap();
    for i in 1..=8 {
        vm.raw_get_i(1, i);
        assert_eq!(vm.to_integer(-1), i * 100);
        vm.pop(1);
    }
    vm.push_number(3.5);
    vm.raw_get(1);
    assert_eq!(vm.to_str(-1).as_deref(), Some("half"));
    vm.pop(1);
    vm.push_string("3").unwrap();
    vm.raw_get(1);
    assert_eq!(vm.to_str(-1).as_deref(), Some("string three"));
    vm.pop(1);
    assert_eq!(count_pairs(&mut vm, 1), 10);
}

#[test]
fn test_nil_assignment_removes_key() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.create_table(0, 0).unwrap();
    for k in ["a", "b", "c"] {
        vm.push_boolean(true);
        vm.set_field(1, k).unwrap();
    }
    vm.push_integer(1);
    vm.raw_set_i(1, 1);
    assert_eq!(count_pairs(&mut vm, 1), 4);

    vm.push_nil();
    vm.set_field(1, "b").unwrap();
    vm.push_nil();
    vm.raw_set_i(1, 1);
    vm.get_field(1, "b").unwrap();
    assert!(vm.is_nil(-1));
    vm.pop(1);
    assert_eq!(count_pairs(&mut vm, 1), 2);
}

#[test]
fn test_rehash_keeps_every_entry() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.create_table(0, 0).unwrap();
    for i in 0..500 {
        vm.push_integer(i);
        vm.set_field(1, &format!("k{i}")).unwrap();
        vm.push_integer(-i);
        vm.raw_set_i(1, i + 1);
    }
    for i in 0..500 {
        vm.get_field(1, &format!("k{i}")).unwrap();
        assert_eq!(vm.to_integer(-1), i);
        vm.raw_get_i(1, i + 1);
        assert_eq!(vm.to_integer(-1), -i);
        vm.pop(2);
    }
    assert_eq!(count_pairs(&mut vm, 1), 1000);
    assert_eq!(vm.obj_len(1), 500);
}

#[test]
fn test_clearing_during_traversal() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = {}
        for i = 1, 100 do t["x" .. i] = i end
        for k in pairs(t) do t[k] = nil end
        assert(next(t) == nil)
        "#,
    );
}

#[test]
fn test_nan_key_policy() {
    let mut vm = LuaVM::new(SafeOption::default());
    let v = vm.execute_string("local t = {} return t[0/0]").unwrap();
    assert!(v.is_nil());

    let e = vm
        .execute_string("local t = {} t[0/0] = 1")
        .unwrap_err();
    let msg = vm.error_message(&e);
    assert!(msg.ends_with("table index is NaN"), "{msg}");

    let e = vm.execute_string("local t = {} t[nil] = 1").unwrap_err();
    let msg = vm.error_message(&e);
    assert!(msg.ends_with("table index is nil"), "{msg}");
}

#[test]
fn test_nan_key_through_api() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.create_table(0, 0).unwrap();
    vm.push_number(f64::NAN);
    vm.push_integer(1);
    assert!(vm.raw_set(1).is_err());
}

#[test]
fn test_invalid_next_key() {
    let mut vm = new_vm();
    let e = vm
        .execute_string("local t = {a = 1} return next(t, 'zzz')")
        .unwrap_err();
    assert!(vm.error_message(&e).contains("invalid key to 'next'"));
}

#[test]
fn test_length_border() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = {1, 2, 3, 4, 5}
        assert(#t == 5)
        t[6] = 6
        assert(#t == 6)
        t[6] = nil
        assert(#t == 5)
        assert(#{} == 0)
        assert(#{n = 1} == 0)
        "#,
    );
}

#[test]
fn test_constructors() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local function three() return 1, 2, 3 end
        local t = {three()}
        assert(#t == 3)
        local u = {three(), three()}
        assert(#u == 4)
        local v = {x = 1, ["y"] = 2, 10; 20}
        assert(v.x == 1 and v.y == 2 and v[1] == 10 and v[2] == 20)
        local big = {}
        for i = 1, 120 do big[i] = i end
        local copy = {unpack(big)}
        assert(#copy == 120 and copy[120] == 120)
        "#,
    );
}
