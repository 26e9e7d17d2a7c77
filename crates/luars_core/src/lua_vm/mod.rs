// Lua Virtual Machine
// Register-based interpreter over the Lua 5.1 instruction set. Shared data
// (objects, registry, collector) lives in GlobalState; the running thread's
// LuaState is checked out of its arena slot while it runs.
mod api;
mod call_info;
mod const_string;
mod coroutine;
mod debug_info;
mod execute;
mod lua_error;
pub mod lua_limits;
mod lua_state;
mod opcode;
mod safe_option;

pub use api::GcOption;
pub use call_info::{CallInfo, LUA_MULTRET, call_status};
pub use const_string::ConstString;
pub use debug_info::chunk_id;
pub use execute::TmKind;
pub use lua_error::{LuaError, LuaResult, LuaStatus};
pub use lua_state::{LuaState, ThreadStatus};
pub use opcode::{Instruction, OpCode, OpMode, fb2int, int2fb};
pub use safe_option::SafeOption;

use crate::gc::{
    FunctionId, GC, GcColor, GcId, GcRoots, ObjectPool, StringId, TableId, ThreadId, UpvalueId,
    UserdataId,
};
use crate::lua_value::{CFunction, FunctionKind, LuaTable, LuaValue, NUM_TAGS, UpvalueState};
use std::any::Any;

/// State shared by every thread of a VM (lstate.h global_State)
pub struct GlobalState {
    pub(crate) pool: ObjectPool,
    pub(crate) gc: GC,
    pub(crate) registry: TableId,
    /// Metatables of the types without per-object metatables
    pub(crate) type_metatables: [Option<TableId>; NUM_TAGS],
    pub(crate) strings: ConstString,
    pub(crate) main_thread: ThreadId,
    pub(crate) panic: Option<CFunction>,
    pub(crate) option: SafeOption,
}

impl GlobalState {
    #[inline]
    fn white(&self) -> GcColor {
        self.gc.current_white()
    }

    // ============ Allocation ============
    // New objects are not reachable yet: callers anchor them on a stack
    // before the next collector step.

    pub(crate) fn intern(&mut self, bytes: &[u8]) -> StringId {
        let (id, size) = self
            .pool
            .create_string(bytes, self.gc.current_white(), self.gc.other_white());
        self.gc.charge(size);
        id
    }

    pub(crate) fn new_table(&mut self, narray: usize, nhash: usize) -> TableId {
        let (id, size) = self.pool.create_table(narray, nhash, self.white());
        self.gc.charge(size);
        id
    }

    pub(crate) fn new_function(&mut self, kind: FunctionKind, env: TableId) -> FunctionId {
        let (id, size) = self.pool.create_function(kind, env, self.white());
        self.gc.charge(size);
        id
    }

    pub(crate) fn new_upvalue(&mut self, state: UpvalueState) -> UpvalueId {
        let (id, size) = self.pool.create_upvalue(state, self.white());
        self.gc.charge(size);
        id
    }

    pub(crate) fn new_userdata(&mut self, data: Box<dyn Any>, env: Option<TableId>) -> UserdataId {
        let (id, size) = self.pool.create_userdata(data, env, self.white());
        self.gc.charge(size);
        id
    }

    pub(crate) fn new_thread(&mut self, state: LuaState) -> ThreadId {
        let (id, size) = self.pool.create_thread(state, self.white());
        self.gc.charge(size);
        id
    }

    // ============ Table access ============

    #[inline]
    pub(crate) fn table(&self, id: TableId) -> Option<&LuaTable> {
        self.pool.get_table(id)
    }

    #[inline]
    pub(crate) fn raw_get(&self, t: TableId, key: &LuaValue) -> LuaValue {
        self.pool
            .get_table(t)
            .map_or(LuaValue::Nil, |t| t.raw_get(key))
    }

    #[inline]
    pub(crate) fn raw_get_str(&self, t: TableId, key: StringId) -> LuaValue {
        self.raw_get(t, &LuaValue::String(key))
    }

    /// luaH_set + luaC_barriert. Returns the message of a rejected key.
    pub(crate) fn table_set(
        &mut self,
        t: TableId,
        key: LuaValue,
        value: LuaValue,
    ) -> Result<(), &'static str> {
        match key {
            LuaValue::Nil => return Err("table index is nil"),
            LuaValue::Number(n) if n.is_nan() => return Err("table index is NaN"),
            _ => {}
        }
        let Some(table) = self.pool.tables.get_mut(t.0) else {
            return Ok(());
        };
        table.data.raw_set(key, value);
        let size = table.data.mem_size();
        let old = std::mem::replace(&mut table.charged, size);
        if size >= old {
            self.gc.charge(size - old);
        } else {
            self.gc.release(old - size);
        }
        self.gc.barrier_back(&mut self.pool, t, &key);
        self.gc.barrier_back(&mut self.pool, t, &value);
        Ok(())
    }

    pub(crate) fn table_set_int(&mut self, t: TableId, key: i64, value: LuaValue) {
        let Some(table) = self.pool.tables.get_mut(t.0) else {
            return;
        };
        table.data.set_int(key, value);
        let size = table.data.mem_size();
        let old = std::mem::replace(&mut table.charged, size);
        if size >= old {
            self.gc.charge(size - old);
        } else {
            self.gc.release(old - size);
        }
        self.gc.barrier_back(&mut self.pool, t, &value);
    }

    /// Presize a table (SETLIST with a known count, `create_table`)
    pub(crate) fn table_resize(&mut self, t: TableId, narray: usize, nhash: usize) {
        let Some(table) = self.pool.tables.get_mut(t.0) else {
            return;
        };
        table.data.resize(narray, nhash);
        let size = table.data.mem_size();
        let old = std::mem::replace(&mut table.charged, size);
        if size >= old {
            self.gc.charge(size - old);
        } else {
            self.gc.release(old - size);
        }
    }

    // ============ Metatables ============

    pub(crate) fn get_metatable(&self, v: &LuaValue) -> Option<TableId> {
        match v {
            LuaValue::Table(t) => self.pool.get_table(*t).and_then(|t| t.get_metatable()),
            LuaValue::Userdata(u) => self.pool.get_userdata(*u).and_then(|u| u.metatable),
            _ => self.type_metatables[v.kind() as usize],
        }
    }

    /// lua_setmetatable with the matching barrier
    pub(crate) fn set_metatable(&mut self, v: &LuaValue, mt: Option<TableId>) {
        match *v {
            LuaValue::Table(t) => {
                if let Some(table) = self.pool.tables.get_mut(t.0) {
                    table.data.set_metatable(mt);
                }
                if let Some(mt) = mt {
                    self.gc.barrier_back(&mut self.pool, t, &LuaValue::Table(mt));
                }
            }
            LuaValue::Userdata(u) => {
                if let Some(ud) = self.pool.userdata.get_mut(u.0) {
                    ud.metatable = mt;
                }
                if let Some(mt) = mt {
                    self.gc
                        .barrier(&mut self.pool, GcId::Userdata(u), &LuaValue::Table(mt));
                }
            }
            _ => self.type_metatables[v.kind() as usize] = mt,
        }
    }

    /// Metamethod of `v` for `event`, nil when absent (luaT_gettmbyobj)
    pub(crate) fn get_tm(&self, v: &LuaValue, event: TmKind) -> LuaValue {
        match self.get_metatable(v) {
            Some(mt) => self.raw_get_str(mt, self.strings.tm(event)),
            None => LuaValue::Nil,
        }
    }

    /// Metamethod from a known metatable (fasttm without the cache)
    pub(crate) fn get_tm_from(&self, mt: Option<TableId>, event: TmKind) -> LuaValue {
        match mt {
            Some(mt) => self.raw_get_str(mt, self.strings.tm(event)),
            None => LuaValue::Nil,
        }
    }

    // ============ Environments ============

    pub(crate) fn set_function_env(&mut self, f: FunctionId, env: TableId) {
        if let Some(func) = self.pool.functions.get_mut(f.0) {
            func.env = env;
        }
        self.gc
            .barrier(&mut self.pool, GcId::Function(f), &LuaValue::Table(env));
    }

    pub(crate) fn set_userdata_env(&mut self, u: UserdataId, env: TableId) {
        if let Some(ud) = self.pool.userdata.get_mut(u.0) {
            ud.env = Some(env);
        }
        self.gc
            .barrier(&mut self.pool, GcId::Userdata(u), &LuaValue::Table(env));
    }

    /// Store into a native closure's upvalue slot
    pub(crate) fn set_native_upvalue(&mut self, f: FunctionId, n: usize, value: LuaValue) -> bool {
        let Some(func) = self.pool.functions.get_mut(f.0) else {
            return false;
        };
        let FunctionKind::Native { upvalues, .. } = &mut func.kind else {
            return false;
        };
        let Some(slot) = upvalues.get_mut(n) else {
            return false;
        };
        *slot = value;
        self.gc.barrier(&mut self.pool, GcId::Function(f), &value);
        true
    }

    /// Bytes of a string value, empty for anything else
    #[inline]
    pub(crate) fn str_bytes(&self, v: &LuaValue) -> &[u8] {
        match v {
            LuaValue::String(s) => self.pool.string_bytes(*s),
            _ => &[],
        }
    }
}

pub struct LuaVM {
    pub(crate) g: GlobalState,
    /// State of the running thread
    pub(crate) l: Box<LuaState>,
    pub(crate) running: ThreadId,
    /// Set once an unprotected error reached the panic handler
    pub(crate) closed: bool,
    /// Active protected boundaries (pcall frames and resumes)
    pub(crate) protect_depth: u32,
    /// Threads suspended inside `resume`, innermost last
    pub(crate) resumers: Vec<ThreadId>,
    /// Stack address at the outermost nested call, 0 outside any
    pub(crate) c_stack_base: usize,
}

impl LuaVM {
    pub fn new(option: SafeOption) -> Self {
        let mut gc = GC::new(option.gc_pause, option.gc_stepmul);
        let mut pool = ObjectPool::new();
        let white = gc.current_white();
        let other = gc.other_white();

        let mut fixed_string = |s: &str| {
            let (id, size) = pool.create_string(s.as_bytes(), white, other);
            gc.charge(size);
            gc.fix(&mut pool, GcId::String(id));
            id
        };
        let strings = ConstString::new(&mut fixed_string);

        let (registry, size) = pool.create_table(0, 2, white);
        gc.charge(size);
        let (globals, size) = pool.create_table(0, 20, white);
        gc.charge(size);
        let (main_thread, size) = pool.create_thread(LuaState::new(globals), white);
        gc.charge(size);
        gc.fix(&mut pool, GcId::Thread(main_thread));

        let l = pool
            .get_thread_mut(main_thread)
            .and_then(|th| {
                th.status = ThreadStatus::Running;
                th.state.take()
            })
            .unwrap_or_else(|| Box::new(LuaState::new(globals)));

        gc.start();
        tracing::debug!(total_bytes = gc.total_bytes, "lua state created");

        LuaVM {
            g: GlobalState {
                pool,
                gc,
                registry,
                type_metatables: [None; NUM_TAGS],
                strings,
                main_thread,
                panic: None,
                option,
            },
            l,
            running: main_thread,
            closed: false,
            protect_depth: 0,
            resumers: Vec::new(),
            c_stack_base: 0,
        }
    }

    /// lua_close: closes the main thread's upvalues and frees every object
    pub fn close(mut self) {
        self.close_upvalues(0);
        let objects = self.g.pool.object_count();
        self.g.pool.clear();
        tracing::debug!(objects, "lua state closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn option(&self) -> &SafeOption {
        &self.g.option
    }

    pub fn main_thread(&self) -> ThreadId {
        self.g.main_thread
    }

    pub fn running_thread(&self) -> ThreadId {
        self.running
    }

    pub fn globals(&self) -> TableId {
        self.l.globals
    }

    pub fn registry(&self) -> TableId {
        self.g.registry
    }

    pub fn object_pool(&self) -> &ObjectPool {
        &self.g.pool
    }

    /// Bytes currently accounted by the collector
    pub fn memory_in_use(&self) -> usize {
        self.g.gc.total_bytes
    }

    // ============ Values ============

    pub fn create_string(&mut self, s: &str) -> LuaValue {
        LuaValue::String(self.g.intern(s.as_bytes()))
    }

    pub fn create_bytes(&mut self, bytes: &[u8]) -> LuaValue {
        LuaValue::String(self.g.intern(bytes))
    }

    /// Lossy UTF-8 view of a string value
    pub fn value_to_string_lossy(&self, v: &LuaValue) -> String {
        String::from_utf8_lossy(self.g.str_bytes(v)).into_owned()
    }

    // ============ Collector hooks ============

    /// Run `f` with the collector, the object pool and the current roots
    pub(crate) fn with_gc<R>(&mut self, f: impl FnOnce(&mut GC, &mut ObjectPool, &GcRoots) -> R) -> R {
        let g = &mut self.g;
        let roots = GcRoots {
            running: &self.l,
            running_id: self.running,
            main_thread: g.main_thread,
            resumers: &self.resumers,
            registry: g.registry,
            type_metatables: &g.type_metatables,
            mode_name: g.strings.tm(TmKind::Mode),
        };
        f(&mut g.gc, &mut g.pool, &roots)
    }

    /// luaC_checkGC plus the memory limit
    #[inline]
    pub(crate) fn check_gc(&mut self) -> LuaResult<()> {
        if self.g.gc.total_bytes > self.g.option.max_memory_limit {
            return self.collect_for_memory();
        }
        if self.g.gc.should_step() {
            self.with_gc(|gc, pool, roots| gc.step(pool, roots));
        }
        Ok(())
    }

    #[cold]
    fn collect_for_memory(&mut self) -> LuaResult<()> {
        self.with_gc(|gc, pool, roots| gc.full_collect(pool, roots));
        let total = self.g.gc.total_bytes;
        if total > self.g.option.max_memory_limit {
            tracing::warn!(
                total_bytes = total,
                limit = self.g.option.max_memory_limit,
                "memory limit exceeded"
            );
            return Err(LuaError::Memory);
        }
        Ok(())
    }

    pub fn full_gc(&mut self) {
        self.with_gc(|gc, pool, roots| gc.full_collect(pool, roots));
    }

    // ============ Upvalues ============

    /// luaF_findupval: reuse the open upvalue of a slot or create one
    pub(crate) fn find_upvalue(&mut self, stack_index: usize) -> UpvalueId {
        if let Some(id) = self.l.find_open_upvalue(stack_index) {
            return id;
        }
        let id = self.g.new_upvalue(UpvalueState::Open {
            thread: self.running,
            stack_index,
        });
        self.l.insert_open_upvalue(stack_index, id);
        id
    }

    /// luaF_close: close every open upvalue at or above `level`
    pub(crate) fn close_upvalues(&mut self, level: usize) {
        if self.l.open_upvalues.is_empty() {
            return;
        }
        for (idx, id) in self.l.take_open_upvalues(level) {
            let value = self.l.get(idx);
            if let Some(uv) = self.g.pool.upvalues.get_mut(id.0) {
                uv.state = UpvalueState::Closed(value);
            }
            self.g.gc.upvalue_closed(&mut self.g.pool, id);
        }
    }

    pub(crate) fn upvalue_get(&self, id: UpvalueId) -> LuaValue {
        match self.g.pool.get_upvalue(id).map(|uv| uv.state) {
            Some(UpvalueState::Open {
                thread,
                stack_index,
            }) => self.thread_stack_get(thread, stack_index),
            Some(UpvalueState::Closed(v)) => v,
            None => LuaValue::Nil,
        }
    }

    pub(crate) fn upvalue_set(&mut self, id: UpvalueId, value: LuaValue) {
        let Some(uv) = self.g.pool.upvalues.get_mut(id.0) else {
            return;
        };
        match &mut uv.state {
            UpvalueState::Open {
                thread,
                stack_index,
            } => {
                let (thread, idx) = (*thread, *stack_index);
                if thread == self.running {
                    self.l.set(idx, value);
                } else if let Some(state) = self
                    .g
                    .pool
                    .get_thread_mut(thread)
                    .and_then(|th| th.state.as_deref_mut())
                {
                    state.set(idx, value);
                }
            }
            UpvalueState::Closed(v) => {
                *v = value;
                self.g
                    .gc
                    .barrier(&mut self.g.pool, GcId::Upvalue(id), &value);
            }
        }
    }

    fn thread_stack_get(&self, thread: ThreadId, idx: usize) -> LuaValue {
        if thread == self.running {
            return self.l.get(idx);
        }
        self.g
            .pool
            .get_thread(thread)
            .and_then(|th| th.state.as_ref())
            .map_or(LuaValue::Nil, |s| s.get(idx))
    }

    // ============ Errors ============

    /// Error object carried by `e`
    pub(crate) fn error_value(&self, e: &LuaError) -> LuaValue {
        match e {
            LuaError::Runtime(v) | LuaError::Syntax(v) => *v,
            LuaError::Memory => LuaValue::String(self.g.strings.memerr),
            LuaError::ErrorHandler => LuaValue::String(self.g.strings.errerr),
            LuaError::Yield => LuaValue::Nil,
        }
    }

    /// Printable message of an error, for hosts and logs
    pub fn error_message(&self, e: &LuaError) -> String {
        let v = self.error_value(e);
        match v {
            LuaValue::String(_) => self.value_to_string_lossy(&v),
            LuaValue::Number(n) => crate::lua_value::number_to_string(n),
            LuaValue::Nil => "nil".to_string(),
            _ => format!("({} error object)", v.type_name()),
        }
    }

    /// luaG_runerror: message prefixed with the position of the running Lua
    /// function
    pub(crate) fn rt_error(&mut self, msg: &str) -> LuaError {
        let mut full = self.where_(0);
        full.push_str(msg);
        LuaError::Runtime(self.create_string(&full))
    }

    /// luaL_error: message prefixed with the position of the Lua function
    /// that called the running native function
    pub fn raise_error(&mut self, msg: impl AsRef<str>) -> LuaError {
        let mut full = self.where_(1);
        full.push_str(msg.as_ref());
        LuaError::Runtime(self.create_string(&full))
    }
}
