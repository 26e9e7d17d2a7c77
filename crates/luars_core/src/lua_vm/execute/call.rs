// Call machinery (ldo.c)
// precall/poscall move frames on and off the call-info stack; Lua frames
// are then run by `execute` without Rust recursion. `do_call` is the
// Rust-level entry (luaD_call) and `pcall_at` the protected one.

use super::{TmKind, execute};
use crate::lua_value::{CFunction, Chunk, FunctionKind, LuaValue};
use crate::lua_vm::lua_limits::LUA_MINSTACK;
use crate::lua_vm::{CallInfo, LUA_MULTRET, LuaError, LuaResult, LuaStatus, LuaVM};
use std::rc::Rc;

pub(crate) enum PreCall {
    /// A Lua frame was pushed; the caller runs it
    Lua,
    /// A native function ran to completion and its results are in place
    Native,
}

enum Callee {
    Lua(Rc<Chunk>),
    Native(CFunction),
}

impl LuaVM {
    /// luaD_checkstack: room for `n` more slots or "stack overflow"
    #[inline]
    pub(crate) fn grow_stack(&mut self, n: usize) -> LuaResult<()> {
        if self.l.ensure_stack(n, self.g.option.max_stack_size) {
            Ok(())
        } else {
            Err(self.rt_error("stack overflow"))
        }
    }

    /// tryfuncTM: a non-function callee is replaced by its __call handler,
    /// with the original value shifted up as the first argument
    fn try_func_tm(&mut self, func: usize) -> LuaResult<()> {
        let f = self.l.get(func);
        let tm = self.g.get_tm(&f, TmKind::Call);
        if !tm.is_function() {
            return Err(self.type_error(&f, "call", Some(func)));
        }
        self.grow_stack(1)?;
        let top = self.l.top;
        self.l.stack.copy_within(func..top, func + 1);
        self.l.top = top + 1;
        self.l.set(func, tm);
        Ok(())
    }

    /// luaD_precall
    pub(crate) fn precall(&mut self, func: usize, nresults: i32) -> LuaResult<PreCall> {
        if !self.l.get(func).is_function() {
            self.try_func_tm(func)?;
        }
        let callee = match self.l.get(func) {
            LuaValue::Function(id) => match self.g.pool.get_function(id).map(|f| &f.kind) {
                Some(FunctionKind::Lua { chunk, .. }) => Callee::Lua(chunk.clone()),
                Some(FunctionKind::Native { func, .. }) => Callee::Native(*func),
                None => return Err(self.rt_error("attempt to call a dead function")),
            },
            f => return Err(self.type_error(&f, "call", Some(func))),
        };
        if self.l.call_stack.len() >= self.g.option.max_call_depth {
            return Err(self.rt_error("stack overflow"));
        }

        match callee {
            Callee::Lua(chunk) => {
                self.grow_stack(chunk.max_stack_size + chunk.param_count)?;
                let nargs = self.l.top - func - 1;
                let base = if chunk.is_vararg {
                    self.adjust_varargs(&chunk, nargs)
                } else {
                    // extra arguments are dropped
                    if nargs > chunk.param_count {
                        self.l.top = func + 1 + chunk.param_count;
                    }
                    func + 1
                };
                let top = base + chunk.max_stack_size;
                self.l.fill_nil(self.l.top, top);
                self.l
                    .call_stack
                    .push(CallInfo::new_lua(func, base, top, nresults));
                self.l.top = top;
                Ok(PreCall::Lua)
            }
            Callee::Native(f) => {
                self.grow_stack(LUA_MINSTACK)?;
                let top = self.l.top + LUA_MINSTACK;
                self.l.call_stack.push(CallInfo::new_c(func, top, nresults));
                let n = f(self)?;
                let n = n.min(self.l.top - self.l.base());
                self.poscall(self.l.top - n);
                Ok(PreCall::Native)
            }
        }
    }

    /// adjust_varargs: fixed parameters move above the actual arguments so
    /// the extra ones stay reachable below the new base. Returns the base.
    fn adjust_varargs(&mut self, chunk: &Chunk, nargs: usize) -> usize {
        let nparams = chunk.param_count;
        if nargs < nparams {
            let top = self.l.top;
            self.l.fill_nil(top, top + nparams - nargs);
            self.l.top = top + nparams - nargs;
        }
        let actual = nargs.max(nparams);
        let fixed = self.l.top - actual;
        let base = self.l.top;
        for i in 0..nparams {
            let v = self.l.get(fixed + i);
            self.l.set(base + i, v);
            self.l.set(fixed + i, LuaValue::Nil);
        }
        self.l.top = base + nparams;
        base
    }

    /// luaD_poscall: move results from `first_result..top` to the callee's
    /// slot, padding with nil up to the expected count. Returns the expected
    /// count (`LUA_MULTRET` for all).
    pub(crate) fn poscall(&mut self, first_result: usize) -> i32 {
        let Some(ci) = self.l.call_stack.pop() else {
            return 0;
        };
        let res = ci.func;
        let wanted = ci.nresults;
        let avail = self.l.top.saturating_sub(first_result);
        let count = if wanted == LUA_MULTRET {
            avail
        } else {
            wanted as usize
        };
        let ncopy = count.min(avail);
        self.l
            .stack
            .copy_within(first_result..first_result + ncopy, res);
        if ncopy < count {
            self.l.fill_nil(res + ncopy, res + count);
        }
        self.l.top = res + count;
        wanted
    }

    /// luaD_call: call the function at `func` with the values above it as
    /// arguments. Every call made from Rust counts against `max_c_calls`
    /// and `max_c_stack_bytes`.
    pub(crate) fn do_call(&mut self, func: usize, nresults: i32) -> LuaResult<()> {
        if self.c_stack_base != 0 {
            return self.nested_call(func, nresults);
        }
        self.c_stack_base = stack_address();
        let result = self.nested_call(func, nresults);
        self.c_stack_base = 0;
        result
    }

    fn nested_call(&mut self, func: usize, nresults: i32) -> LuaResult<()> {
        self.l.n_ccalls += 1;
        self.check_c_stack()?;
        if let PreCall::Lua = self.precall(func, nresults)? {
            let target = self.l.call_stack.len() - 1;
            execute(self, target)?;
        }
        self.l.n_ccalls -= 1;
        self.check_gc()
    }

    /// Rust stack bytes taken since the outermost nested call
    pub(crate) fn c_stack_used(&self) -> usize {
        if self.c_stack_base == 0 {
            0
        } else {
            stack_address().abs_diff(self.c_stack_base)
        }
    }

    /// "C stack overflow" once either the nesting count or the Rust stack
    /// used since the outermost call passes its limit. A further eighth is
    /// left for error handling; past that the call fails outright.
    fn check_c_stack(&mut self) -> LuaResult<()> {
        let limit = self.g.option.max_c_calls;
        let budget = self.g.option.max_c_stack_bytes;
        let used = self.c_stack_used();
        let n = self.l.n_ccalls;
        if n >= limit + (limit >> 3) || used >= budget + (budget >> 3) {
            return Err(LuaError::ErrorHandler);
        }
        if n == limit || used >= budget {
            tracing::debug!(ccalls = n, stack_bytes = used, "C stack overflow");
            return Err(self.rt_error("C stack overflow"));
        }
        Ok(())
    }

    /// luaD_pcall: call with recovery. On failure the optional handler at
    /// stack index `errfunc` runs while the failing frames are still in
    /// place; then the stack is unwound to `func`, which receives the
    /// single error value.
    pub(crate) fn pcall_at(&mut self, func: usize, nresults: i32, errfunc: usize) -> LuaStatus {
        let old_ccalls = self.l.n_ccalls;
        let old_depth = self.l.call_stack.len();
        let old_errfunc = self.l.errfunc;
        self.l.errfunc = errfunc;
        self.protect_depth += 1;
        let result = self.do_call(func, nresults);
        self.protect_depth -= 1;

        let status = match result {
            Ok(()) => LuaStatus::Ok,
            Err(e) => {
                // Rust frames are gone; only the call-info stack remains
                self.l.n_ccalls = old_ccalls;
                let e = match e {
                    LuaError::Yield => {
                        self.rt_error("attempt to yield across metamethod/C-call boundary")
                    }
                    e => e,
                };
                let (status, value) = self.run_message_handler(e, errfunc);
                self.close_upvalues(func);
                self.l.call_stack.truncate(old_depth);
                self.l.set(func, value);
                self.l.top = func + 1;
                // dead frames must not keep their values alive
                let limit = self.l.live_limit();
                self.l.fill_nil(func + 1, limit);
                status
            }
        };
        self.l.errfunc = old_errfunc;
        status
    }

    /// Runs the message handler on a runtime error. A failure inside the
    /// handler is not handled again.
    fn run_message_handler(&mut self, e: LuaError, errfunc: usize) -> (LuaStatus, LuaValue) {
        let value = self.error_value(&e);
        if errfunc == 0 || !matches!(e, LuaError::Runtime(_)) {
            return (e.status(), value);
        }
        let handler = self.l.get(errfunc);
        let saved = self.l.errfunc;
        self.l.errfunc = 0;
        let errerr = (LuaStatus::ErrErr, LuaValue::String(self.g.strings.errerr));
        let result = if self.l.ensure_stack(2, self.g.option.max_stack_size) {
            let top = self.l.top;
            self.l.push(handler);
            self.l.push(value);
            match self.do_call(top, 1) {
                Ok(()) => (LuaStatus::ErrRun, self.l.get(top)),
                Err(_) => errerr,
            }
        } else {
            errerr
        };
        self.l.errfunc = saved;
        result
    }
}

/// Address of a local in a fresh frame, a probe of the current stack depth
#[inline(never)]
fn stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}
