// Tests for the stack-based embedding API
use crate::lua_vm::lua_limits::{LUA_GLOBALSINDEX, upvalue_index};
use crate::{GcOption, LuaResult, LuaStatus, LuaVM, LuaValueKind, SafeOption};

#[test]
fn test_push_read_round_trip() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.push_nil();
    vm.push_boolean(true);
    vm.push_number(1.5);
    vm.push_integer(42);
    vm.push_string("hello").unwrap();
    vm.create_table(0, 0).unwrap();
    vm.push_light_userdata(7);
    vm.push_fstring(format_args!("{}-{}", "a", 1)).unwrap();

    assert_eq!(vm.get_top(), 8);
    assert_eq!(vm.type_of(1), LuaValueKind::Nil);
    assert!(vm.is_boolean(2) && vm.to_boolean(2));
    assert_eq!(vm.to_number(3), 1.5);
    assert_eq!(vm.to_integer(4), 42);
    assert_eq!(vm.to_bytes(5), Some(&b"hello"[..]));
    assert!(vm.is_table(6));
    assert_eq!(vm.type_of(7), LuaValueKind::LightUserdata);
    assert_eq!(vm.to_pointer(7), 7);
    assert_eq!(vm.to_str(8).as_deref(), Some("a-1"));
    // past the top is an acceptable but empty index
    assert_eq!(vm.type_of(9), LuaValueKind::None);
    assert_eq!(vm.type_name(9), "no value");
}

#[test]
fn test_number_string_coercion() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.push_string("  0x10  ").unwrap();
    vm.push_integer(10);
    vm.push_number(0.5);
    assert!(vm.is_number(1));
    assert_eq!(vm.to_number(1), 16.0);
    assert!(vm.is_string(2));
    // the number is converted in place
    assert_eq!(vm.to_bytes(2), Some(&b"10"[..]));
    assert_eq!(vm.type_of(2), LuaValueKind::String);
    assert_eq!(vm.to_str(3).as_deref(), Some("0.5"));
}

#[test]
fn test_stack_manipulation() {
    let mut vm = LuaVM::new(SafeOption::default());
    for i in 1..=4 {
        vm.push_integer(i);
    }
    vm.insert(1);
    // 4 1 2 3
    assert_eq!(vm.to_integer(1), 4);
    assert_eq!(vm.to_integer(2), 1);
    vm.remove(2);
    // 4 2 3
    assert_eq!(vm.get_top(), 3);
    assert_eq!(vm.to_integer(2), 2);
    vm.push_integer(9);
    vm.replace(1);
    // 9 2 3
    assert_eq!(vm.to_integer(1), 9);
    assert_eq!(vm.get_top(), 3);
    vm.push_value(-2);
    assert_eq!(vm.to_integer(-1), 2);
    vm.set_top(6);
    assert!(vm.is_nil(6));
    vm.set_top(-3);
    assert_eq!(vm.get_top(), 4);
    vm.pop(4);
    assert_eq!(vm.get_top(), 0);
}

#[test]
fn test_check_stack() {
    let mut vm = LuaVM::new(SafeOption::default());
    assert!(vm.check_stack(100));
    for i in 0..100 {
        vm.push_integer(i);
    }
    assert_eq!(vm.get_top(), 100);
    assert_eq!(vm.to_integer(-1), 99);
    assert!(!vm.check_stack(i32::MAX));
}

#[test]
fn test_globals_and_fields() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.push_integer(5);
    vm.set_global("answer").unwrap();
    vm.get_global("answer").unwrap();
    assert_eq!(vm.to_integer(-1), 5);
    vm.pop(1);

    vm.create_table(0, 2).unwrap();
    vm.push_string("v").unwrap();
    vm.set_field(-2, "k").unwrap();
    vm.get_field(-1, "k").unwrap();
    assert_eq!(vm.to_str(-1).as_deref(), Some("v"));
    vm.pop(1);
    vm.get_field(-1, "missing").unwrap();
    assert!(vm.is_nil(-1));
    vm.pop(2);

    vm.push_value(LUA_GLOBALSINDEX);
    vm.get_field(-1, "answer").unwrap();
    assert_eq!(vm.to_integer(-1), 5);
}

fn add_two(vm: &mut LuaVM) -> LuaResult<usize> {
    let a = vm.to_number(1);
    let b = vm.to_number(2);
    vm.push_number(a + b);
    Ok(1)
}

#[test]
fn test_call_native_function() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.push_cfunction(add_two).unwrap();
    assert!(vm.is_cfunction(-1));
    vm.push_integer(2);
    vm.push_integer(3);
    vm.call(2, 1).unwrap();
    assert_eq!(vm.get_top(), 1);
    assert_eq!(vm.to_number(-1), 5.0);
}

#[test]
fn test_register_and_call_from_lua() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.register("add", add_two).unwrap();
    let v = vm.execute_string("return add(20, 22)").unwrap();
    assert_eq!(v.as_number(), Some(42.0));
}

fn counter(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.to_integer(upvalue_index(1)) + 1;
    vm.push_integer(n);
    vm.push_value(-1);
    vm.replace(upvalue_index(1));
    Ok(1)
}

#[test]
fn test_cclosure_upvalues() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.push_integer(0);
    vm.push_cclosure(counter, 1).unwrap();
    vm.set_global("tick").unwrap();
    let v = vm.execute_string("tick() tick() return tick()").unwrap();
    assert_eq!(v.as_number(), Some(3.0));

    vm.get_global("tick").unwrap();
    assert_eq!(vm.get_upvalue(-1, 1).as_deref(), Some(""));
    assert_eq!(vm.to_integer(-1), 3);
    assert!(vm.get_upvalue(-2, 2).is_none());
}

#[test]
fn test_lua_closure_upvalue_names() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.execute_string("local secret = 7 function peek() return secret end")
        .unwrap();
    vm.get_global("peek").unwrap();
    assert_eq!(vm.get_upvalue(-1, 1).as_deref(), Some("secret"));
    assert_eq!(vm.to_integer(-1), 7);
    vm.pop(1);
    vm.push_integer(8);
    assert_eq!(vm.set_upvalue(-2, 1).as_deref(), Some("secret"));
    let v = vm.execute_string("return peek()").unwrap();
    assert_eq!(v.as_number(), Some(8.0));
}

#[derive(Debug, PartialEq)]
struct Point {
    x: i32,
    y: i32,
}

#[test]
fn test_userdata() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.new_userdata(Point { x: 1, y: 2 }).unwrap();
    assert!(vm.is_userdata(-1));
    assert_eq!(vm.type_name(-1), "userdata");
    assert_eq!(vm.to_userdata::<Point>(-1), Some(&Point { x: 1, y: 2 }));
    assert!(vm.to_userdata::<String>(-1).is_none());
    if let Some(p) = vm.to_userdata_mut::<Point>(-1) {
        p.x = 10;
    }
    assert_eq!(vm.to_userdata::<Point>(-1).map(|p| p.x), Some(10));
}

#[test]
fn test_equal_and_less_than() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.push_integer(1);
    vm.push_number(1.0);
    vm.push_string("1").unwrap();
    vm.push_integer(2);
    assert!(vm.raw_equal(1, 2));
    assert!(!vm.raw_equal(1, 3));
    assert!(vm.equal(1, 2).unwrap());
    assert!(!vm.equal(1, 3).unwrap());
    assert!(vm.less_than(1, 4).unwrap());
    assert!(!vm.less_than(4, 1).unwrap());
    assert!(!vm.raw_equal(1, 10));
}

#[test]
fn test_concat() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.push_string("a").unwrap();
    vm.push_integer(1);
    vm.push_string("b").unwrap();
    vm.concat(3).unwrap();
    assert_eq!(vm.get_top(), 1);
    assert_eq!(vm.to_str(-1).as_deref(), Some("a1b"));
    vm.concat(0).unwrap();
    assert_eq!(vm.to_str(-1).as_deref(), Some(""));
}

#[test]
fn test_obj_len() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.push_string("hello").unwrap();
    assert_eq!(vm.obj_len(-1), 5);
    vm.create_table(4, 0).unwrap();
    for i in 1..=3 {
        vm.push_integer(i * 10);
        vm.raw_set_i(-2, i);
    }
    assert_eq!(vm.obj_len(-1), 3);
}

#[test]
fn test_load_and_do_string() {
    let mut vm = LuaVM::new(SafeOption::default());
    assert_eq!(vm.load_string("return 1 + 1"), LuaStatus::Ok);
    assert!(vm.is_function(-1));
    assert!(!vm.is_cfunction(-1));
    vm.call(0, 1).unwrap();
    assert_eq!(vm.to_number(-1), 2.0);
    vm.pop(1);

    assert_eq!(vm.do_string("return 1, 2, 3"), LuaStatus::Ok);
    assert_eq!(vm.get_top(), 3);
    vm.set_top(0);

    let status = vm.load_string("return +");
    assert_eq!(status, LuaStatus::ErrSyntax);
    assert_eq!(status.code(), 3);
    assert_eq!(
        vm.to_str(-1).as_deref(),
        Some("[string \"return +\"]:1: unexpected symbol near '+'")
    );
}

#[test]
fn test_load_from_reader() {
    let mut vm = LuaVM::new(SafeOption::default());
    let mut pieces = vec![b"return ".to_vec(), b"6 * ".to_vec(), b"7".to_vec()].into_iter();
    let status = vm.load(move || pieces.next(), "=pieces");
    assert_eq!(status, LuaStatus::Ok);
    vm.call(0, 1).unwrap();
    assert_eq!(vm.to_number(-1), 42.0);
}

#[test]
fn test_environment_of_function() {
    let mut vm = LuaVM::new(SafeOption::default());
    assert_eq!(vm.load_string("x = 1"), LuaStatus::Ok);
    vm.create_table(0, 0).unwrap();
    vm.push_value(-1);
    // keep the environment at index 1
    vm.insert(1);
    assert!(vm.set_fenv(-2));
    vm.call(0, 0).unwrap();
    vm.get_field(1, "x").unwrap();
    assert_eq!(vm.to_integer(-1), 1);
    vm.get_global("x").unwrap();
    assert!(vm.is_nil(-1));
}

#[test]
fn test_cpcall() {
    fn fails(vm: &mut LuaVM) -> LuaResult<usize> {
        assert_eq!(vm.to_pointer(1), 99);
        Err(vm.raise_error("cpcall failure"))
    }
    let mut vm = LuaVM::new(SafeOption::default());
    assert_eq!(vm.cpcall(fails, 99), LuaStatus::ErrRun);
    assert_eq!(vm.to_str(-1).as_deref(), Some("cpcall failure"));
}

#[test]
fn test_set_table_honors_newindex() {
    let mut vm = LuaVM::new(SafeOption::default());
    // store at 1, proxy at 2
    vm.create_table(0, 0).unwrap();
    vm.create_table(0, 0).unwrap();
    vm.create_table(0, 1).unwrap();
    vm.push_value(1);
    vm.set_field(-2, "__newindex").unwrap();
    assert!(vm.set_metatable(2));
    vm.push_string("k").unwrap();
    vm.push_boolean(true);
    vm.set_table(2).unwrap();
    assert_eq!(vm.get_top(), 2);
    vm.push_string("k").unwrap();
    vm.raw_get(2);
    assert!(vm.is_nil(-1));
    vm.get_field(1, "k").unwrap();
    assert!(vm.to_boolean(-1));
}

#[test]
fn test_thread_and_memory_queries() {
    let mut vm = LuaVM::new(SafeOption::default());
    assert_eq!(vm.running_thread(), vm.main_thread());
    assert!(vm.push_thread());
    assert!(vm.is_thread(-1));
    assert_eq!(vm.to_thread(-1), Some(vm.main_thread()));

    vm.gc(GcOption::Stop);
    let before = vm.memory_in_use();
    vm.create_table(100, 0).unwrap();
    assert!(vm.memory_in_use() > before);

    let v = vm.create_bytes(b"\xffraw");
    assert!(v.is_string());
    assert!(vm.create_string("x").as_boolean().is_none());
}

#[test]
fn test_current_line_of_caller() {
    fn line_here(vm: &mut LuaVM) -> LuaResult<usize> {
        let line = vm.current_line(1).map_or(-1, i64::from);
        vm.push_integer(line);
        Ok(1)
    }
    let mut vm = LuaVM::new(SafeOption::default());
    vm.register("line_here", line_here).unwrap();
    assert_eq!(vm.do_string("local a = 1\n\nseen = line_here()"), LuaStatus::Ok);
    vm.get_global("seen").unwrap();
    assert_eq!(vm.to_integer(-1), 3);
}

#[test]
fn test_acceptable_index_window() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.push_integer(1);
    // slots reserved for the frame read as no value
    assert_eq!(vm.type_of(2), LuaValueKind::None);
    assert_eq!(vm.type_of(20), LuaValueKind::None);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "beyond the frame")]
fn test_index_past_frame_asserts() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.push_integer(1);
    vm.type_of(1000);
}
