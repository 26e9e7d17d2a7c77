// Test module organization
pub mod test_api;
pub mod test_basic;
pub mod test_closures;
pub mod test_coroutine;
pub mod test_errors;
pub mod test_gc;
pub mod test_metamethods;
pub mod test_syntax;
pub mod test_table;

use crate::{LuaVM, SafeOption, Stdlib};

/// VM with every library opened
pub(crate) fn new_vm() -> LuaVM {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_stdlib(Stdlib::All).unwrap();
    vm
}

/// Runs `source`, panicking with the Lua message on failure
pub(crate) fn run(vm: &mut LuaVM, source: &str) {
    if let Err(e) = vm.execute_string(source) {
        panic!("script failed: {}", vm.error_message(&e));
    }
}
