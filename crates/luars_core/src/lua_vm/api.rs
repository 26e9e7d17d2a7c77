// Embedding API (lapi.c)
//
// Values are addressed by stack index: positive from the base of the
// running native function (1 is its first argument), negative from the top
// (-1 is the last pushed value), or one of the pseudo-indices for the
// registry, the current environment, the globals and native upvalues.

use crate::compiler::compile;
use crate::gc::{GcId, TableId, ThreadId};
use crate::lua_value::{CFunction, FunctionKind, LuaValue, LuaValueKind, number_to_string};
use crate::lua_vm::execute::helper::tonumber;
use crate::lua_vm::lua_limits::{
    CLOSEDMSG, LUA_ENVIRONINDEX, LUA_GLOBALSINDEX, LUA_REGISTRYINDEX, LUAI_MAXCSTACK,
};
use crate::lua_vm::{LUA_MULTRET, LuaError, LuaResult, LuaStatus, LuaVM};
use std::any::Any;
use std::borrow::Cow;

/// Collector commands (`lua_gc`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOption {
    Stop,
    Restart,
    Collect,
    /// Kilobytes in use
    Count,
    /// Remainder of `Count` in bytes
    CountB,
    /// Perform a step worth the given kilobytes; 1 when a cycle finished
    Step(i32),
    /// New pause, returns the old one
    SetPause(i32),
    /// New step multiplier, returns the old one
    SetStepMul(i32),
}

/// Where an API index points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Stack(usize),
    Registry,
    Environ,
    Globals,
    /// 1-based upvalue of the running native closure
    Upvalue(usize),
    /// Acceptable index past the top
    Empty,
}

impl LuaVM {
    // ============ Index translation ============

    fn slot(&self, idx: i32) -> Slot {
        debug_assert!(idx != 0, "stack index 0 is invalid");
        if idx > 0 {
            let i = self.l.base() + idx as usize - 1;
            if i < self.l.top {
                Slot::Stack(i)
            } else {
                // acceptable up to the frame's reserved top
                debug_assert!(i < self.l.ci().top, "stack index {idx} beyond the frame");
                Slot::Empty
            }
        } else if idx > LUA_REGISTRYINDEX {
            let n = (-idx) as usize;
            debug_assert!(n <= self.l.frame_len(), "stack index {idx} below the frame");
            if idx == 0 || n > self.l.frame_len() {
                Slot::Empty
            } else {
                Slot::Stack(self.l.top - n)
            }
        } else {
            match idx {
                LUA_REGISTRYINDEX => Slot::Registry,
                LUA_ENVIRONINDEX => Slot::Environ,
                LUA_GLOBALSINDEX => Slot::Globals,
                _ => Slot::Upvalue((LUA_GLOBALSINDEX - idx) as usize),
            }
        }
    }

    /// Environment of the running function; the globals at host level
    fn current_env(&self) -> TableId {
        if self.l.is_idle() {
            return self.l.globals;
        }
        match self.l.get(self.l.ci().func) {
            LuaValue::Function(f) => self.closure_env(f),
            _ => self.l.globals,
        }
    }

    pub(crate) fn index2value(&self, idx: i32) -> LuaValue {
        match self.slot(idx) {
            Slot::Stack(i) => self.l.get(i),
            Slot::Registry => LuaValue::Table(self.g.registry),
            Slot::Environ => LuaValue::Table(self.current_env()),
            Slot::Globals => LuaValue::Table(self.l.globals),
            Slot::Upvalue(n) => self.native_upvalue(n),
            Slot::Empty => LuaValue::Nil,
        }
    }

    fn native_upvalue(&self, n: usize) -> LuaValue {
        let LuaValue::Function(f) = self.l.get(self.l.ci().func) else {
            return LuaValue::Nil;
        };
        match self.g.pool.get_function(f).map(|f| &f.kind) {
            Some(FunctionKind::Native { upvalues, .. }) if n >= 1 => {
                upvalues.get(n - 1).copied().unwrap_or(LuaValue::Nil)
            }
            _ => LuaValue::Nil,
        }
    }

    /// Store through an index, pseudo-indices included
    fn store(&mut self, idx: i32, v: LuaValue) {
        match self.slot(idx) {
            Slot::Stack(i) => self.l.set(i, v),
            Slot::Environ => {
                if let (LuaValue::Function(f), LuaValue::Table(env)) = (self.l.get(self.l.ci().func), v)
                {
                    self.g.set_function_env(f, env);
                }
            }
            Slot::Globals => {
                if let LuaValue::Table(t) = v {
                    self.l.globals = t;
                }
            }
            Slot::Upvalue(n) => {
                if let LuaValue::Function(f) = self.l.get(self.l.ci().func)
                    && n >= 1
                {
                    self.g.set_native_upvalue(f, n - 1, v);
                }
            }
            Slot::Registry | Slot::Empty => {}
        }
    }

    /// Absolute stack position of a non-pseudo index
    pub(crate) fn stack_index(&self, idx: i32) -> Option<usize> {
        match self.slot(idx) {
            Slot::Stack(i) => Some(i),
            _ => None,
        }
    }

    /// Index that stays valid when the stack changes (`lua_absindex`)
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 || idx <= LUA_REGISTRYINDEX {
            idx
        } else {
            self.get_top() + idx + 1
        }
    }

    // ============ Stack manipulation ============

    pub fn get_top(&self) -> i32 {
        self.l.frame_len() as i32
    }

    /// Set the top; growing fills with nil
    pub fn set_top(&mut self, idx: i32) {
        let base = self.l.base();
        if idx >= 0 {
            let new_top = base + idx as usize;
            if new_top > self.l.top {
                self.l.fill_nil(self.l.top, new_top);
            }
            self.l.top = new_top;
        } else {
            debug_assert!((-(idx + 1)) as usize <= self.l.frame_len());
            let drop = ((-(idx + 1)) as usize).min(self.l.frame_len());
            self.l.top -= drop;
        }
    }

    /// Pop `n` values
    pub fn pop(&mut self, n: i32) {
        self.set_top(-n - 1);
    }

    pub fn push_value(&mut self, idx: i32) {
        let v = self.index2value(idx);
        self.l.push(v);
    }

    /// Remove the value at `idx`, shifting the ones above it down
    pub fn remove(&mut self, idx: i32) {
        let Some(p) = self.stack_index(idx) else {
            return;
        };
        let top = self.l.top;
        self.l.stack.copy_within(p + 1..top, p);
        self.l.top -= 1;
    }

    /// Move the top value to `idx`, shifting the ones above it up
    pub fn insert(&mut self, idx: i32) {
        let Some(p) = self.stack_index(idx) else {
            return;
        };
        let top = self.l.top;
        let v = self.l.get(top - 1);
        self.l.stack.copy_within(p..top - 1, p + 1);
        self.l.set(p, v);
    }

    /// Pop the top value into `idx`
    pub fn replace(&mut self, idx: i32) {
        let v = self.l.get(self.l.top - 1);
        self.store(idx, v);
        self.l.top -= 1;
    }

    /// Room for `n` more values; false when the request is too large
    pub fn check_stack(&mut self, n: i32) -> bool {
        if n < 0 {
            return true;
        }
        let n = n as usize;
        if n > LUAI_MAXCSTACK || self.l.frame_len() + n > LUAI_MAXCSTACK {
            return false;
        }
        if !self.l.ensure_stack(n, self.g.option.max_stack_size) {
            return false;
        }
        let top = self.l.top + n;
        let ci = self.l.ci_mut();
        if ci.top < top {
            ci.top = top;
        }
        true
    }

    /// Move `n` values from the running thread to `to`
    pub fn xmove(&mut self, to: ThreadId, n: i32) {
        if to == self.running || n <= 0 {
            return;
        }
        let n = (n as usize).min(self.l.frame_len());
        let from = self.l.top - n;
        let values: Vec<LuaValue> = self.l.stack[from..self.l.top].to_vec();
        self.l.top = from;
        let limit = self.g.option.max_stack_size;
        if let Some(state) = self
            .g
            .pool
            .get_thread_mut(to)
            .and_then(|th| th.state.as_deref_mut())
        {
            state.ensure_stack(n, limit);
            for v in values {
                state.push(v);
            }
        }
    }

    // ============ Push ============

    pub fn push_nil(&mut self) {
        self.l.push(LuaValue::Nil);
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.l.push(LuaValue::Boolean(b));
    }

    pub fn push_number(&mut self, n: f64) {
        self.l.push(LuaValue::Number(n));
    }

    pub fn push_integer(&mut self, n: i64) {
        self.l.push(LuaValue::Number(n as f64));
    }

    pub fn push_light_userdata(&mut self, p: usize) {
        self.l.push(LuaValue::LightUserdata(p));
    }

    pub fn push_string(&mut self, s: &str) -> LuaResult<()> {
        self.push_bytes(s.as_bytes())
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> LuaResult<()> {
        let s = self.g.intern(bytes);
        self.l.push(LuaValue::String(s));
        self.check_gc()
    }

    /// `lua_pushfstring` with Rust formatting
    pub fn push_fstring(&mut self, args: std::fmt::Arguments<'_>) -> LuaResult<()> {
        let s = std::fmt::format(args);
        self.push_bytes(s.as_bytes())
    }

    /// Push the running thread; true when it is the main thread
    pub fn push_thread(&mut self) -> bool {
        self.l.push(LuaValue::Thread(self.running));
        self.running == self.g.main_thread
    }

    /// Native closure capturing the `n` values on top of the stack
    pub fn push_cclosure(&mut self, f: CFunction, n: i32) -> LuaResult<()> {
        let n = (n.max(0) as usize).min(self.l.frame_len());
        let from = self.l.top - n;
        let upvalues = self.l.stack[from..self.l.top].to_vec();
        self.l.top = from;
        let env = self.current_env();
        let id = self
            .g
            .new_function(FunctionKind::Native { func: f, upvalues }, env);
        self.l.push(LuaValue::Function(id));
        self.check_gc()
    }

    pub fn push_cfunction(&mut self, f: CFunction) -> LuaResult<()> {
        self.push_cclosure(f, 0)
    }

    // ============ Queries ============

    /// Type at `idx`, `LuaValueKind::None` for an empty acceptable index
    pub fn type_of(&self, idx: i32) -> LuaValueKind {
        match self.slot(idx) {
            Slot::Empty => LuaValueKind::None,
            _ => self.index2value(idx).kind(),
        }
    }

    pub fn type_name(&self, idx: i32) -> &'static str {
        self.type_of(idx).name()
    }

    pub fn is_none(&self, idx: i32) -> bool {
        self.type_of(idx) == LuaValueKind::None
    }

    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), LuaValueKind::None | LuaValueKind::Nil)
    }

    pub fn is_nil(&self, idx: i32) -> bool {
        self.type_of(idx) == LuaValueKind::Nil
    }

    pub fn is_boolean(&self, idx: i32) -> bool {
        self.type_of(idx) == LuaValueKind::Boolean
    }

    pub fn is_table(&self, idx: i32) -> bool {
        self.type_of(idx) == LuaValueKind::Table
    }

    pub fn is_function(&self, idx: i32) -> bool {
        self.type_of(idx) == LuaValueKind::Function
    }

    pub fn is_thread(&self, idx: i32) -> bool {
        self.type_of(idx) == LuaValueKind::Thread
    }

    /// Number, or a string convertible to one
    pub fn is_number(&self, idx: i32) -> bool {
        tonumber(&self.g, &self.index2value(idx)).is_some()
    }

    /// String, or a number (always convertible)
    pub fn is_string(&self, idx: i32) -> bool {
        matches!(self.index2value(idx), LuaValue::String(_) | LuaValue::Number(_))
    }

    pub fn is_cfunction(&self, idx: i32) -> bool {
        self.to_cfunction(idx).is_some()
    }

    pub fn is_userdata(&self, idx: i32) -> bool {
        matches!(
            self.index2value(idx),
            LuaValue::Userdata(_) | LuaValue::LightUserdata(_)
        )
    }

    /// Primitive equality; false when either index is empty
    pub fn raw_equal(&self, i1: i32, i2: i32) -> bool {
        if self.is_none(i1) || self.is_none(i2) {
            return false;
        }
        self.index2value(i1) == self.index2value(i2)
    }

    /// Equality with `__eq`
    pub fn equal(&mut self, i1: i32, i2: i32) -> LuaResult<bool> {
        if self.is_none(i1) || self.is_none(i2) {
            return Ok(false);
        }
        let (a, b) = (self.index2value(i1), self.index2value(i2));
        if a.kind() != b.kind() {
            return Ok(false);
        }
        self.equal_obj(a, b)
    }

    /// `a < b` with `__lt`
    pub fn less_than(&mut self, i1: i32, i2: i32) -> LuaResult<bool> {
        if self.is_none(i1) || self.is_none(i2) {
            return Ok(false);
        }
        let (a, b) = (self.index2value(i1), self.index2value(i2));
        self.value_less_than(a, b)
    }

    /// Number at `idx` (strings are converted), 0 otherwise
    pub fn to_number(&self, idx: i32) -> f64 {
        tonumber(&self.g, &self.index2value(idx)).unwrap_or(0.0)
    }

    /// `to_number` truncated toward zero
    pub fn to_integer(&self, idx: i32) -> i64 {
        self.to_number(idx) as i64
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.index2value(idx).is_truthy()
    }

    /// Bytes of a string; a number is converted in place first
    pub fn to_bytes(&mut self, idx: i32) -> Option<&[u8]> {
        let v = self.index2value(idx);
        let s = match v {
            LuaValue::String(s) => s,
            LuaValue::Number(n) => {
                let s = self.g.intern(number_to_string(n).as_bytes());
                if let Some(i) = self.stack_index(idx) {
                    self.l.set(i, LuaValue::String(s));
                }
                s
            }
            _ => return None,
        };
        Some(self.g.pool.string_bytes(s))
    }

    /// `to_bytes` as text, invalid UTF-8 replaced
    pub fn to_str(&mut self, idx: i32) -> Option<Cow<'_, str>> {
        self.to_bytes(idx).map(String::from_utf8_lossy)
    }

    /// `lua_objlen`: string length, border of a table, size of a userdata
    pub fn obj_len(&mut self, idx: i32) -> usize {
        match self.index2value(idx) {
            LuaValue::String(s) => self.g.pool.string_bytes(s).len(),
            LuaValue::Table(t) => self.g.table(t).map_or(0, |t| t.len()),
            LuaValue::Userdata(u) => self
                .g
                .pool
                .get_userdata(u)
                .map_or(0, |u| std::mem::size_of_val(&*u.data)),
            LuaValue::Number(_) => self.to_bytes(idx).map_or(0, |b| b.len()),
            _ => 0,
        }
    }

    pub fn to_cfunction(&self, idx: i32) -> Option<CFunction> {
        let LuaValue::Function(f) = self.index2value(idx) else {
            return None;
        };
        match self.g.pool.get_function(f).map(|f| &f.kind) {
            Some(FunctionKind::Native { func, .. }) => Some(*func),
            _ => None,
        }
    }

    /// Typed borrow of a full userdata's payload
    pub fn to_userdata<T: Any>(&self, idx: i32) -> Option<&T> {
        let LuaValue::Userdata(u) = self.index2value(idx) else {
            return None;
        };
        self.g.pool.get_userdata(u)?.data.downcast_ref::<T>()
    }

    pub fn to_userdata_mut<T: Any>(&mut self, idx: i32) -> Option<&mut T> {
        let LuaValue::Userdata(u) = self.index2value(idx) else {
            return None;
        };
        self.g.pool.userdata.get_mut(u.0)?.data.downcast_mut::<T>()
    }

    pub fn to_thread(&self, idx: i32) -> Option<ThreadId> {
        self.index2value(idx).as_thread_id()
    }

    /// Identity of a heap value for hashing and printing, 0 for others
    pub fn to_pointer(&self, idx: i32) -> usize {
        let v = self.index2value(idx);
        if let LuaValue::LightUserdata(p) = v {
            return p;
        }
        match v.gc_id() {
            Some(GcId::String(_)) | None => 0,
            Some(id) => (usize::from(id.tag()) << 32) | id.index() as usize,
        }
    }

    // ============ Get ============

    /// `t[k]` where `t` is at `idx` and `k` is popped; pushes the result
    pub fn get_table(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.index2value(idx);
        let key = self.l.get(self.l.top - 1);
        let v = self.get_table_value(t, key, None)?;
        let top = self.l.top;
        self.l.set(top - 1, v);
        Ok(())
    }

    pub fn get_field(&mut self, idx: i32, k: &str) -> LuaResult<()> {
        let t = self.index2value(idx);
        let key = self.create_string(k);
        self.l.push(key);
        let v = self.get_table_value(t, key, None)?;
        let top = self.l.top;
        self.l.set(top - 1, v);
        Ok(())
    }

    /// Raw `t[k]` with `k` popped; `t` must be a table
    pub fn raw_get(&mut self, idx: i32) {
        let v = match self.index2value(idx) {
            LuaValue::Table(t) => self.g.raw_get(t, &self.l.get(self.l.top - 1)),
            _ => LuaValue::Nil,
        };
        let top = self.l.top;
        self.l.set(top - 1, v);
    }

    pub fn raw_get_i(&mut self, idx: i32, n: i64) {
        let v = match self.index2value(idx) {
            LuaValue::Table(t) => self.g.table(t).map_or(LuaValue::Nil, |t| t.get_int(n)),
            _ => LuaValue::Nil,
        };
        self.l.push(v);
    }

    pub fn create_table(&mut self, narr: i32, nrec: i32) -> LuaResult<()> {
        let t = self
            .g
            .new_table(narr.max(0) as usize, nrec.max(0) as usize);
        self.l.push(LuaValue::Table(t));
        self.check_gc()
    }

    /// Push the metatable of the value at `idx`; false (nothing pushed)
    /// when it has none
    pub fn get_metatable(&mut self, idx: i32) -> bool {
        let v = self.index2value(idx);
        match self.g.get_metatable(&v) {
            Some(mt) => {
                self.l.push(LuaValue::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Push the environment of a function, userdata or thread (nil otherwise)
    pub fn get_fenv(&mut self, idx: i32) {
        let env = match self.index2value(idx) {
            LuaValue::Function(f) => LuaValue::Table(self.closure_env(f)),
            LuaValue::Userdata(u) => self
                .g
                .pool
                .get_userdata(u)
                .and_then(|u| u.env)
                .map_or(LuaValue::Nil, LuaValue::Table),
            LuaValue::Thread(th) => self.thread_globals(th).map_or(LuaValue::Nil, LuaValue::Table),
            _ => LuaValue::Nil,
        };
        self.l.push(env);
    }

    fn thread_globals(&self, th: ThreadId) -> Option<TableId> {
        if th == self.running {
            return Some(self.l.globals);
        }
        self.g
            .pool
            .get_thread(th)?
            .state
            .as_ref()
            .map(|s| s.globals)
    }

    // ============ Set ============

    /// `t[k] = v` with `t` at `idx`, `v` on top and `k` below it; pops both
    pub fn set_table(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.index2value(idx);
        let top = self.l.top;
        let key = self.l.get(top - 2);
        let v = self.l.get(top - 1);
        self.set_table_value(t, key, v, None)?;
        self.l.top -= 2;
        Ok(())
    }

    /// `t[k] = v` with `v` popped
    pub fn set_field(&mut self, idx: i32, k: &str) -> LuaResult<()> {
        let t = self.index2value(idx);
        let key = self.create_string(k);
        self.l.push(key);
        let top = self.l.top;
        let v = self.l.get(top - 2);
        self.set_table_value(t, key, v, None)?;
        self.l.top -= 2;
        Ok(())
    }

    /// Raw `t[k] = v` with `k` and `v` popped
    pub fn raw_set(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.index2value(idx);
        let top = self.l.top;
        let key = self.l.get(top - 2);
        let v = self.l.get(top - 1);
        if let LuaValue::Table(t) = t
            && let Err(msg) = self.g.table_set(t, key, v)
        {
            return Err(self.rt_error(msg));
        }
        self.l.top -= 2;
        Ok(())
    }

    /// Raw `t[n] = v` with `v` popped
    pub fn raw_set_i(&mut self, idx: i32, n: i64) {
        let t = self.index2value(idx);
        let v = self.l.pop();
        if let LuaValue::Table(t) = t {
            self.g.table_set_int(t, n, v);
        }
    }

    /// Pop a table (or nil) and make it the metatable of the value at `idx`
    pub fn set_metatable(&mut self, idx: i32) -> bool {
        let v = self.index2value(idx);
        let mt = self.l.pop().as_table_id();
        self.g.set_metatable(&v, mt);
        true
    }

    /// Pop a table and make it the environment of the value at `idx`.
    /// False when the value cannot have one.
    pub fn set_fenv(&mut self, idx: i32) -> bool {
        let v = self.index2value(idx);
        let Some(env) = self.l.pop().as_table_id() else {
            return false;
        };
        match v {
            LuaValue::Function(f) => self.g.set_function_env(f, env),
            LuaValue::Userdata(u) => self.g.set_userdata_env(u, env),
            LuaValue::Thread(th) => {
                if th == self.running {
                    self.l.globals = env;
                } else if let Some(state) = self
                    .g
                    .pool
                    .get_thread_mut(th)
                    .and_then(|t| t.state.as_deref_mut())
                {
                    state.globals = env;
                }
                self.g
                    .gc
                    .barrier(&mut self.g.pool, GcId::Thread(th), &LuaValue::Table(env));
            }
            _ => return false,
        }
        true
    }

    // ============ Traversal ============

    /// Pop a key and push the next key/value pair of the table at `idx`.
    /// False (nothing pushed) at the end.
    pub fn next(&mut self, idx: i32) -> LuaResult<bool> {
        let t = self.index2value(idx);
        let key = self.l.pop();
        let Some(table) = t.as_table_id().and_then(|t| self.g.table(t)) else {
            return Ok(false);
        };
        match table.next(&key) {
            Ok(Some((k, v))) => {
                self.l.push(k);
                self.l.push(v);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(_) => Err(self.raise_error("invalid key to 'next'")),
        }
    }

    /// Concatenate the `n` values on top, leaving the result
    pub fn concat(&mut self, n: i32) -> LuaResult<()> {
        if n >= 2 {
            let n = n as usize;
            let last = self.l.top - 1;
            self.concat_stack(n, last)?;
            self.check_gc()?;
            self.l.top -= n - 1;
        } else if n == 0 {
            self.push_bytes(b"")?;
        }
        Ok(())
    }

    // ============ Globals ============

    pub fn get_global(&mut self, name: &str) -> LuaResult<()> {
        self.get_field(LUA_GLOBALSINDEX, name)
    }

    /// Pop a value into the global `name`
    pub fn set_global(&mut self, name: &str) -> LuaResult<()> {
        self.set_field(LUA_GLOBALSINDEX, name)
    }

    /// Make `f` the global `name`
    pub fn register(&mut self, name: &str, f: CFunction) -> LuaResult<()> {
        self.push_cfunction(f)?;
        self.set_global(name)
    }

    // ============ Userdata ============

    /// Full userdata holding `value`, with the current environment
    pub fn new_userdata<T: Any>(&mut self, value: T) -> LuaResult<()> {
        let env = self.current_env();
        let u = self.g.new_userdata(Box::new(value), Some(env));
        self.l.push(LuaValue::Userdata(u));
        self.check_gc()
    }

    // ============ Upvalues ============

    /// Upvalue `n` (1-based) of a closure: its name, and for Lua closures the
    /// debug name. None when out of range.
    fn upvalue_ref(&self, funcindex: i32, n: i32) -> Option<(String, UpvalueRef)> {
        let LuaValue::Function(f) = self.index2value(funcindex) else {
            return None;
        };
        if n < 1 {
            return None;
        }
        let n = n as usize - 1;
        match &self.g.pool.get_function(f)?.kind {
            FunctionKind::Native { upvalues, .. } => {
                (n < upvalues.len()).then(|| (String::new(), UpvalueRef::Native(f, n)))
            }
            FunctionKind::Lua { chunk, upvalues } => {
                let id = *upvalues.get(n)?;
                let name = chunk
                    .upvalue_descs
                    .get(n)
                    .map_or_else(String::new, |d| d.name.to_string());
                Some((name, UpvalueRef::Lua(id)))
            }
        }
    }

    /// Push upvalue `n` of the function at `funcindex`; returns its name
    pub fn get_upvalue(&mut self, funcindex: i32, n: i32) -> Option<String> {
        let (name, r) = self.upvalue_ref(funcindex, n)?;
        let v = match r {
            UpvalueRef::Lua(id) => self.upvalue_get(id),
            UpvalueRef::Native(f, i) => match self.g.pool.get_function(f).map(|f| &f.kind) {
                Some(FunctionKind::Native { upvalues, .. }) => upvalues[i],
                _ => LuaValue::Nil,
            },
        };
        self.l.push(v);
        Some(name)
    }

    /// Pop a value into upvalue `n` of the function at `funcindex`
    pub fn set_upvalue(&mut self, funcindex: i32, n: i32) -> Option<String> {
        let (name, r) = self.upvalue_ref(funcindex, n)?;
        let v = self.l.pop();
        match r {
            UpvalueRef::Lua(id) => self.upvalue_set(id, v),
            UpvalueRef::Native(f, i) => {
                self.g.set_native_upvalue(f, i, v);
            }
        }
        Some(name)
    }

    // ============ Calls ============

    /// Unprotected call of the function below the `nargs` arguments on top.
    /// An error with no protected call around it reaches the panic handler
    /// and closes the state.
    pub fn call(&mut self, nargs: i32, nresults: i32) -> LuaResult<()> {
        let func = self.l.top - (nargs as usize + 1);
        if self.closed {
            self.l.top = func;
            return Err(LuaError::ErrorHandler);
        }
        match self.do_call(func, nresults) {
            Ok(()) => {
                self.adjust_results(nresults);
                Ok(())
            }
            Err(e) => {
                if self.protect_depth == 0 && !matches!(e, LuaError::Yield) {
                    self.unprotected_error(&e);
                }
                Err(e)
            }
        }
    }

    /// Protected call. `errfunc` is the stack index of a message handler or 0.
    pub fn pcall(&mut self, nargs: i32, nresults: i32, errfunc: i32) -> LuaStatus {
        let func = self.l.top - (nargs as usize + 1);
        let ef = if errfunc == 0 {
            0
        } else {
            self.stack_index(errfunc).unwrap_or(0)
        };
        if self.closed {
            let v = self.create_string(CLOSEDMSG);
            self.l.set(func, v);
            self.l.top = func + 1;
            return LuaStatus::ErrErr;
        }
        let status = self.pcall_at(func, nresults, ef);
        if status.is_ok() {
            self.adjust_results(nresults);
        }
        status
    }

    /// Call `f` in protected mode with a light userdata as its only argument
    pub fn cpcall(&mut self, f: CFunction, ud: usize) -> LuaStatus {
        if self.push_cfunction(f).is_err() {
            return LuaStatus::ErrMem;
        }
        self.push_light_userdata(ud);
        self.pcall(1, 0, 0)
    }

    /// Error raised with the value on top of the stack
    pub fn error(&mut self) -> LuaError {
        LuaError::Runtime(self.l.get(self.l.top - 1))
    }

    /// Install a panic handler, returning the previous one
    pub fn at_panic(&mut self, f: CFunction) -> Option<CFunction> {
        self.g.panic.replace(f)
    }

    fn adjust_results(&mut self, nresults: i32) {
        if nresults == LUA_MULTRET {
            let top = self.l.top;
            let ci = self.l.ci_mut();
            if ci.top < top {
                ci.top = top;
            }
        }
    }

    /// The panic handler sees the error value on top with the failing
    /// frames still in place. Afterwards the main thread is reset to an
    /// empty stack and every later call is refused.
    #[cold]
    fn unprotected_error(&mut self, e: &LuaError) {
        if self.closed {
            return;
        }
        let v = self.error_value(e);
        self.l.push(v);
        tracing::warn!(error = %self.error_message(e), "unprotected error");
        if let Some(panic) = self.g.panic
            && let Err(err) = panic(self)
        {
            tracing::warn!(error = %self.error_message(&err), "panic handler failed");
        }
        self.closed = true;

        let limit = self.l.live_limit();
        self.close_upvalues(0);
        self.l.call_stack.truncate(1);
        self.l.fill_nil(1, limit);
        self.l.top = 1;
        self.l.n_ccalls = 0;
        self.l.errfunc = 0;
    }

    // ============ Loading ============

    /// Compiles the chunk produced by `reader` (pieces until `None` or an
    /// empty piece) and pushes it as a function. On failure the error
    /// message is pushed instead.
    pub fn load<R>(&mut self, mut reader: R, chunkname: &str) -> LuaStatus
    where
        R: FnMut() -> Option<Vec<u8>>,
    {
        let mut source = Vec::new();
        while let Some(piece) = reader() {
            if piece.is_empty() {
                break;
            }
            source.extend_from_slice(&piece);
        }
        self.load_buffer(&source, chunkname)
    }

    pub fn load_buffer(&mut self, buf: &[u8], chunkname: &str) -> LuaStatus {
        match compile(self, buf, chunkname) {
            Ok(chunk) => {
                let env = self.l.globals;
                let id = self.g.new_function(
                    FunctionKind::Lua {
                        chunk,
                        upvalues: Vec::new(),
                    },
                    env,
                );
                self.l.push(LuaValue::Function(id));
                match self.check_gc() {
                    Ok(()) => LuaStatus::Ok,
                    Err(e) => {
                        let v = self.error_value(&e);
                        self.l.set(self.l.top - 1, v);
                        e.status()
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "chunk rejected");
                let msg = e.to_string();
                let v = self.create_string(&msg);
                self.l.push(v);
                LuaError::Syntax(v).status()
            }
        }
    }

    /// Loads a string chunk; the source doubles as the chunk name
    pub fn load_string(&mut self, s: &str) -> LuaStatus {
        self.load_buffer(s.as_bytes(), s)
    }

    /// Loads and runs `s` in protected mode, leaving its results on the stack
    pub fn do_string(&mut self, s: &str) -> LuaStatus {
        match self.load_string(s) {
            LuaStatus::Ok => self.pcall(0, LUA_MULTRET, 0),
            status => status,
        }
    }

    /// Runs `source` and returns its first result (nil when there is none).
    /// The stack is left as it was.
    pub fn execute_string(&mut self, source: &str) -> LuaResult<LuaValue> {
        let top = self.l.top;
        let status = self.do_string(source);
        let result = if status.is_ok() {
            Ok(if self.l.top > top {
                self.l.get(top)
            } else {
                LuaValue::Nil
            })
        } else {
            let v = self.l.get(self.l.top - 1);
            Err(match status {
                LuaStatus::ErrSyntax => LuaError::Syntax(v),
                LuaStatus::ErrMem => LuaError::Memory,
                LuaStatus::ErrErr => LuaError::ErrorHandler,
                _ => LuaError::Runtime(v),
            })
        };
        self.l.top = top;
        result
    }

    // ============ Collector ============

    pub fn gc(&mut self, what: GcOption) -> i32 {
        match what {
            GcOption::Stop => {
                self.g.gc.stop();
                0
            }
            GcOption::Restart => {
                self.g.gc.restart();
                0
            }
            GcOption::Collect => {
                self.full_gc();
                0
            }
            GcOption::Count => (self.g.gc.total_bytes >> 10) as i32,
            GcOption::CountB => (self.g.gc.total_bytes & 0x3ff) as i32,
            GcOption::Step(kb) => {
                let kb = kb.max(0) as usize;
                i32::from(self.with_gc(|gc, pool, roots| gc.step_cycle_units(pool, roots, kb)))
            }
            GcOption::SetPause(p) => {
                let old = self.g.gc.pause as i32;
                self.g.gc.pause = p.max(0) as usize;
                old
            }
            GcOption::SetStepMul(m) => {
                let old = self.g.gc.stepmul as i32;
                self.g.gc.stepmul = m.max(0) as usize;
                old
            }
        }
    }
}

enum UpvalueRef {
    Lua(crate::gc::UpvalueId),
    Native(crate::gc::FunctionId, usize),
}
