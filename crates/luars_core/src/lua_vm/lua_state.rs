// Per-thread execution state (lstate.h lua_State)
// Each coroutine owns one: value stack, call-info stack and open upvalues.
// Everything shared (objects, registry, collector) lives in GlobalState.

use crate::gc::{TableId, UpvalueId};
use crate::lua_value::LuaValue;
use crate::lua_vm::call_info::CallInfo;
use crate::lua_vm::lua_limits::{BASIC_STACK_SIZE, EXTRA_STACK, LUA_MINSTACK};

/// Coroutine status as seen by `coroutine.status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Suspended,
    Running,
    /// Active but not running: it resumed another coroutine
    Normal,
    Dead,
}

impl ThreadStatus {
    pub fn name(self) -> &'static str {
        match self {
            ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Normal => "normal",
            ThreadStatus::Dead => "dead",
        }
    }
}

pub struct LuaState {
    pub(crate) stack: Vec<LuaValue>,
    /// First free slot
    pub(crate) top: usize,
    /// call_stack[0] is the host-level base frame and is never popped
    pub(crate) call_stack: Vec<CallInfo>,
    /// Open upvalues as (stack index, id), sorted by descending stack index
    pub(crate) open_upvalues: Vec<(usize, UpvalueId)>,
    /// Globals table of this thread (`LUA_GLOBALSINDEX`)
    pub(crate) globals: TableId,
    /// Nested Rust-level calls (luaD_call depth)
    pub(crate) n_ccalls: u32,
    /// `n_ccalls` when this coroutine was last resumed
    pub(crate) base_ccalls: u32,
    /// Stack index of the current message handler, 0 for none
    pub(crate) errfunc: usize,
    /// Values left on top of the stack by the last yield
    pub(crate) nyield: usize,
}

impl LuaState {
    pub fn new(globals: TableId) -> Self {
        let size = BASIC_STACK_SIZE + EXTRA_STACK;
        let mut stack = Vec::with_capacity(size);
        stack.resize(size, LuaValue::Nil);
        // slot 0 plays the role of the base frame's function
        LuaState {
            stack,
            top: 1,
            call_stack: vec![CallInfo::new_base(1, 1 + LUA_MINSTACK)],
            open_upvalues: Vec::new(),
            globals,
            n_ccalls: 0,
            base_ccalls: 0,
            errfunc: 0,
            nyield: 0,
        }
    }

    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<LuaState>()
            + self.stack.capacity() * std::mem::size_of::<LuaValue>()
            + self.call_stack.capacity() * std::mem::size_of::<CallInfo>()
    }

    // ============ Frames ============

    #[inline(always)]
    pub fn ci(&self) -> &CallInfo {
        // base frame is always present
        &self.call_stack[self.call_stack.len() - 1]
    }

    #[inline(always)]
    pub fn ci_mut(&mut self) -> &mut CallInfo {
        let n = self.call_stack.len() - 1;
        &mut self.call_stack[n]
    }

    #[inline(always)]
    pub fn base(&self) -> usize {
        self.ci().base
    }

    /// Only the base frame is left: nothing is running on this thread
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.call_stack.len() == 1
    }

    // ============ Stack ============

    #[inline(always)]
    pub fn get(&self, idx: usize) -> LuaValue {
        self.stack.get(idx).copied().unwrap_or(LuaValue::Nil)
    }

    #[inline(always)]
    pub fn set(&mut self, idx: usize, value: LuaValue) {
        self.stack[idx] = value;
    }

    /// Push without a capacity check; callers reserve with `ensure_stack`
    #[inline(always)]
    pub fn push(&mut self, value: LuaValue) {
        if self.top >= self.stack.len() {
            self.stack.resize(self.top + 1 + EXTRA_STACK, LuaValue::Nil);
        }
        self.stack[self.top] = value;
        self.top += 1;
    }

    #[inline(always)]
    pub fn pop(&mut self) -> LuaValue {
        debug_assert!(self.top > self.base());
        self.top -= 1;
        self.stack[self.top]
    }

    /// Values in [base, top) of the current frame
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.top - self.base()
    }

    /// Make sure `[top, top + n)` exists. Returns false when that would
    /// exceed `limit` slots.
    pub fn ensure_stack(&mut self, n: usize, limit: usize) -> bool {
        let needed = self.top + n + EXTRA_STACK;
        if needed <= self.stack.len() {
            return true;
        }
        if needed > limit + EXTRA_STACK {
            return false;
        }
        let new_size = (self.stack.len() * 2).max(needed).min(limit + EXTRA_STACK);
        self.stack.resize(new_size, LuaValue::Nil);
        true
    }

    /// Set every slot in [from, to) to nil
    #[inline]
    pub fn fill_nil(&mut self, from: usize, to: usize) {
        if to > self.stack.len() {
            self.stack.resize(to + EXTRA_STACK, LuaValue::Nil);
        }
        for slot in &mut self.stack[from..to] {
            *slot = LuaValue::Nil;
        }
    }

    /// Highest slot that may hold a live value: the top or any frame's limit
    pub fn live_limit(&self) -> usize {
        let frames = self.call_stack.iter().map(|ci| ci.top).max().unwrap_or(0);
        self.top.max(frames).min(self.stack.len())
    }

    // ============ Open upvalues ============

    /// Existing open upvalue for a stack slot (luaF_findupval's search)
    pub fn find_open_upvalue(&self, stack_index: usize) -> Option<UpvalueId> {
        for &(idx, id) in &self.open_upvalues {
            if idx == stack_index {
                return Some(id);
            }
            if idx < stack_index {
                break;
            }
        }
        None
    }

    pub fn insert_open_upvalue(&mut self, stack_index: usize, id: UpvalueId) {
        let pos = self
            .open_upvalues
            .iter()
            .position(|&(idx, _)| idx < stack_index)
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(pos, (stack_index, id));
    }

    /// Detach every open upvalue at or above `level`, highest first
    pub fn take_open_upvalues(&mut self, level: usize) -> Vec<(usize, UpvalueId)> {
        let split = self
            .open_upvalues
            .iter()
            .position(|&(idx, _)| idx < level)
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.drain(..split).collect()
    }
}
