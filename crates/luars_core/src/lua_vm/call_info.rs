// CallInfo - Information about a single function call
// Equivalent to CallInfo structure in Lua C API (lstate.h)
// All positions are stack indices, so growing the stack never invalidates them.

/// Call status flags (equivalent to Lua's CIST_* flags)
pub mod call_status {
    /// Lua function (has bytecode)
    pub const CIST_LUA: u8 = 1 << 0;
    /// Native function
    pub const CIST_C: u8 = 1 << 1;
    /// The base frame of a thread (host level)
    pub const CIST_BASE: u8 = 1 << 2;
}

use call_status::*;

/// Multiple results wanted (`LUA_MULTRET`)
pub const LUA_MULTRET: i32 = -1;

#[derive(Clone, Copy, Debug)]
pub struct CallInfo {
    /// Stack index of the function being called
    pub func: usize,
    /// First register / first fixed argument
    pub base: usize,
    /// Frame limit: registers live in [base, top)
    pub top: usize,
    /// Next instruction to run (Lua frames only)
    pub saved_pc: usize,
    /// Expected number of results, `LUA_MULTRET` for all
    pub nresults: i32,
    /// Tail calls collapsed into this frame
    pub tailcalls: u32,
    pub call_status: u8,
}

impl CallInfo {
    pub fn new_base(base: usize, top: usize) -> Self {
        CallInfo {
            func: base.saturating_sub(1),
            base,
            top,
            saved_pc: 0,
            nresults: 0,
            tailcalls: 0,
            call_status: CIST_C | CIST_BASE,
        }
    }

    pub fn new_lua(func: usize, base: usize, top: usize, nresults: i32) -> Self {
        CallInfo {
            func,
            base,
            top,
            saved_pc: 0,
            nresults,
            tailcalls: 0,
            call_status: CIST_LUA,
        }
    }

    pub fn new_c(func: usize, top: usize, nresults: i32) -> Self {
        CallInfo {
            func,
            base: func + 1,
            top,
            saved_pc: 0,
            nresults,
            tailcalls: 0,
            call_status: CIST_C,
        }
    }

    #[inline(always)]
    pub fn is_lua(&self) -> bool {
        self.call_status & CIST_LUA != 0
    }
}
