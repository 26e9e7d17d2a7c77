use crate::lua_vm::lua_limits::{
    DEFAULT_GC_PAUSE, DEFAULT_GC_STEPMUL, LUAI_MAXCALLS, LUAI_MAXCCALLS, LUAI_MAXCSTACKBYTES,
    LUAI_MAXSTACK,
};

/// Resource limits of a VM instance
#[derive(Debug, Clone)]
pub struct SafeOption {
    /// Stack slots per thread; growing past it raises "stack overflow"
    pub max_stack_size: usize,
    /// Nested call frames per thread
    pub max_call_depth: usize,
    /// Nested Rust-level calls (native calls, metamethods, resumes)
    pub max_c_calls: u32,
    /// Rust stack bytes those nested calls may take; keep it well under the
    /// stack size of the thread running the VM
    pub max_c_stack_bytes: usize,
    /// Bytes the collector may account for before a memory error
    pub max_memory_limit: usize,
    /// Collector pause in percent
    pub gc_pause: usize,
    /// Collector step multiplier in percent
    pub gc_stepmul: usize,
}

impl Default for SafeOption {
    fn default() -> Self {
        Self {
            max_stack_size: LUAI_MAXSTACK,
            max_call_depth: LUAI_MAXCALLS,
            max_c_calls: LUAI_MAXCCALLS,
            max_c_stack_bytes: LUAI_MAXCSTACKBYTES,
            max_memory_limit: usize::MAX,
            gc_pause: DEFAULT_GC_PAUSE,
            gc_stepmul: DEFAULT_GC_STEPMUL,
        }
    }
}
