// Lua 5.1 limits and tuning constants (luaconf.h, llimits.h, lgc.c)

// ===== Stack =====

/// Extra slots kept above any frame's top for metamethod calls (EXTRA_STACK)
pub const EXTRA_STACK: usize = 5;

/// Minimum free slots a native function can count on (LUA_MINSTACK)
pub const LUA_MINSTACK: usize = 20;

/// Initial stack size of a thread (BASIC_STACK_SIZE = 2 * LUA_MINSTACK)
pub const BASIC_STACK_SIZE: usize = 2 * LUA_MINSTACK;

/// Hard bound on the stack of a thread (LUAI_MAXSTACK style)
pub const LUAI_MAXSTACK: usize = 1_000_000;

/// Largest `check_stack` request a native function may make (LUAI_MAXCSTACK)
pub const LUAI_MAXCSTACK: usize = 8000;

// ===== Calls =====

/// Maximum depth of nested calls (LUAI_MAXCALLS)
pub const LUAI_MAXCALLS: usize = 20000;

/// Maximum nested Rust-level calls: native functions, metamethods,
/// protected calls (LUAI_MAXCCALLS)
pub const LUAI_MAXCCALLS: u32 = 200;

/// Bytes of Rust stack nested calls may use below the outermost entry.
/// Unoptimized builds spend far more per level than `LUAI_MAXCCALLS`
/// assumes, so this bound trips first there.
pub const LUAI_MAXCSTACKBYTES: usize = 1 << 20;

/// Maximum number of chained `__index`/`__newindex` lookups (MAXTAGLOOP)
pub const MAXTAGLOOP: usize = 100;

// ===== Pseudo-indices (lua.h) =====

pub const LUA_REGISTRYINDEX: i32 = -10000;
pub const LUA_ENVIRONINDEX: i32 = -10001;
pub const LUA_GLOBALSINDEX: i32 = -10002;

/// Pseudo-index of the i-th upvalue of the running native closure (1-based)
#[inline(always)]
pub const fn upvalue_index(i: i32) -> i32 {
    LUA_GLOBALSINDEX - i
}

// ===== Tables =====

/// Bits of the largest array part (MAXBITS in ltable.c)
pub const MAXABITS: usize = 26;

/// Largest array part
pub const MAXASIZE: usize = 1 << MAXABITS;

/// Items accumulated before a SETLIST flush (LFIELDS_PER_FLUSH)
pub const LFIELDS_PER_FLUSH: usize = 50;

// ===== Compiler =====

/// Maximum registers of a function (MAXSTACK)
pub const MAXSTACK: usize = 250;

/// Maximum upvalues per closure (LUAI_MAXUPVALUES)
pub const MAXUPVAL: usize = 60;

/// Maximum locals per function (LUAI_MAXVARS)
pub const MAXVARS: usize = 200;

/// Maximum depth of nested syntactic structures (LUAI_MAXCCALLS in lparser.c)
pub const MAX_SYNTAX_DEPTH: usize = 200;

// ===== Garbage collector =====

/// Default pause: start a cycle when memory doubles (LUAI_GCPAUSE)
pub const DEFAULT_GC_PAUSE: usize = 200;

/// Default step multiplier (LUAI_GCMUL)
pub const DEFAULT_GC_STEPMUL: usize = 200;

/// Bytes of allocation that pay for one unit of step work (GCSTEPSIZE)
pub const GCSTEPSIZE: usize = 1024;

/// Objects swept per step (GCSWEEPMAX)
pub const GCSWEEPMAX: usize = 40;

/// Work units charged per swept object (GCSWEEPCOST)
pub const GCSWEEPCOST: usize = 10;

// ===== Messages =====

pub const MEMERRMSG: &str = "not enough memory";
pub const ERRORERRMSG: &str = "error in error handling";
pub const CLOSEDMSG: &str = "state closed by an unprotected error";
