// Tests for the incremental collector
use super::{new_vm, run};
use crate::{GcId, GcOption, GcState, LuaVM, LuaValue, SafeOption};
use crate::lua_value::FunctionKind;

#[test]
fn test_full_collection_keeps_exactly_reachable() {
    const N: usize = 100;
    const M: usize = 10;
    let mut vm = LuaVM::new(SafeOption::default());
    vm.full_gc();
    let before = vm.object_pool().tables.len();
    assert!(vm.check_stack(M as i32));
    for i in 0..N {
        vm.create_table(0, 0).unwrap();
        if i >= M {
            vm.pop(1);
        }
    }
    vm.full_gc();
    assert_eq!(vm.object_pool().tables.len(), before + M);
    vm.set_top(0);
    vm.full_gc();
    assert_eq!(vm.object_pool().tables.len(), before);
}

#[test]
fn test_reachable_through_globals_and_upvalues() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        keep = {}
        for i = 1, 100 do keep[i] = {value = i} end
        local hidden = {value = "up"}
        function getter() return hidden end
        for i = 1, 1000 do local _ = {} end
        "#,
    );
    vm.full_gc();
    run(
        &mut vm,
        r#"
        for i = 1, 100 do assert(keep[i].value == i) end
        assert(getter().value == "up")
        "#,
    );
}

#[test]
fn test_incremental_steps_preserve_live_data() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        collectgarbage("setpause", 100)
        collectgarbage("setstepmul", 400)
        local list = nil
        for i = 1, 20000 do
            list = {next = list, value = i}
            local garbage = {i, i + 1, tostring(i)}
        end
        local n, sum = 0, 0
        while list do
            n = n + 1
            sum = sum + list.value
            list = list.next
        end
        assert(n == 20000)
        assert(sum == 20000 * 20001 / 2)
        "#,
    );
}

#[test]
fn test_strings_survive_collection() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local parts = {}
        for i = 1, 200 do parts[i] = "s" .. i end
        collectgarbage()
        for i = 1, 200 do assert(parts[i] == "s" .. i) end
        "#,
    );
}

#[test]
fn test_weak_values_are_cleared() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local cache = setmetatable({}, {__mode = "v"})
        local strong = {}
        cache[1] = strong
        cache[2] = {}
        collectgarbage()
        assert(cache[1] == strong)
        assert(cache[2] == nil)
        "#,
    );
}

#[test]
fn test_weak_keys_are_cleared() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local marks = setmetatable({}, {__mode = "k"})
        local alive = {}
        marks[alive] = true
        marks[{}] = true
        collectgarbage()
        local n = 0
        for k in pairs(marks) do n = n + 1 end
        assert(n == 1 and marks[alive] == true)
        "#,
    );
}

#[test]
fn test_gc_control() {
    let mut vm = LuaVM::new(SafeOption::default());
    let kb = vm.gc(GcOption::Count);
    let b = vm.gc(GcOption::CountB);
    assert!((0..1024).contains(&b));
    assert!(kb > 0 || b > 0);
    let old_pause = vm.gc(GcOption::SetPause(150));
    assert_eq!(old_pause, 200);
    assert_eq!(vm.gc(GcOption::SetPause(old_pause)), 150);
    let old_mul = vm.gc(GcOption::SetStepMul(300));
    assert_eq!(old_mul, 200);
    vm.gc(GcOption::Stop);
    vm.gc(GcOption::Restart);
    assert_eq!(vm.gc(GcOption::Collect), 0);
}

#[test]
fn test_stopped_collector_does_not_free() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.full_gc();
    vm.gc(GcOption::Stop);
    let before = vm.object_pool().tables.len();
    for _ in 0..1000 {
        vm.create_table(0, 0).unwrap();
        vm.pop(1);
    }
    assert_eq!(vm.object_pool().tables.len(), before + 1000);
    let stats = vm.g.gc.stats().clone();
    vm.gc(GcOption::Restart);
    vm.full_gc();
    assert_eq!(vm.object_pool().tables.len(), before);
    let after = vm.g.gc.stats();
    assert!(after.cycles > stats.cycles);
    assert!(after.objects_freed >= stats.objects_freed + 1000);
    assert!(after.bytes_freed > stats.bytes_freed);
}

#[test]
fn test_collectgarbage_count() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local k = collectgarbage("count")
        assert(type(k) == "number" and k > 0)
        assert(collectgarbage() == 0)
        assert(collectgarbage("step", 0) ~= nil)
        local ok, err = pcall(collectgarbage, "bogus")
        assert(not ok)
        "#,
    );
}

fn is_black(vm: &LuaVM, id: GcId) -> bool {
    let pool = vm.object_pool();
    match id {
        GcId::Table(t) => pool.tables.get(t.0).is_some_and(|t| t.header.is_black()),
        GcId::Upvalue(u) => pool.upvalues.get(u.0).is_some_and(|u| u.header.is_black()),
        _ => false,
    }
}

#[test]
fn test_barriers_keep_new_objects_stored_into_black_ones() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        holder = {}
        local slot
        function set_slot(v) slot = v end
        function get_slot() return slot end
        "#,
    );
    vm.full_gc();
    vm.gc(GcOption::Stop);

    let globals = vm.l.globals;
    vm.get_global("holder").unwrap();
    let LuaValue::Table(holder) = vm.index2value(-1) else {
        panic!("holder is not a table");
    };
    vm.get_global("set_slot").unwrap();
    let LuaValue::Function(setter) = vm.index2value(-1) else {
        panic!("set_slot is not a function");
    };
    vm.pop(2);
    let slot = match &vm.object_pool().get_function(setter).unwrap().kind {
        FunctionKind::Lua { upvalues, .. } => upvalues[0],
        FunctionKind::Native { .. } => panic!("set_slot is native"),
    };

    // mark until the containers are black, before the atomic phase
    let containers = [GcId::Table(globals), GcId::Table(holder), GcId::Upvalue(slot)];
    let mut steps = 0;
    while !containers.iter().all(|id| is_black(&vm, *id)) {
        assert!(matches!(vm.g.gc.state, GcState::Pause | GcState::Propagate));
        vm.with_gc(|gc, pool, roots| gc.single_step(pool, roots));
        steps += 1;
        assert!(steps < 100_000);
    }
    assert_eq!(vm.g.gc.state, GcState::Propagate);

    // table store: the black holder goes back to gray
    vm.get_global("holder").unwrap();
    vm.create_table(0, 1).unwrap();
    vm.push_integer(1);
    vm.set_field(-2, "tag").unwrap();
    vm.set_field(-2, "fresh").unwrap();
    vm.pop(1);
    let holder_gray = vm
        .object_pool()
        .tables
        .get(holder.0)
        .is_some_and(|t| t.header.is_gray());
    assert!(holder_gray);

    // closed upvalue store: the new value is marked at once
    vm.get_global("set_slot").unwrap();
    vm.create_table(0, 1).unwrap();
    vm.push_integer(2);
    vm.set_field(-2, "tag").unwrap();
    vm.call(1, 0).unwrap();

    while vm.g.gc.state != GcState::Pause {
        vm.with_gc(|gc, pool, roots| gc.single_step(pool, roots));
    }
    vm.gc(GcOption::Restart);
    run(
        &mut vm,
        r#"
        assert(holder.fresh.tag == 1)
        assert(get_slot().tag == 2)
        "#,
    );
}
