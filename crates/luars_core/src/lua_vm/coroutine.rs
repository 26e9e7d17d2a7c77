// Coroutines (ldo.c lua_resume / lua_yield)
//
// Every thread has its own LuaState. The running one is checked out of its
// arena slot into `LuaVM::l`; resume swaps the states, runs the coroutine
// and swaps back. A yield unwinds the Rust frames with `LuaError::Yield`
// while the coroutine's Lua frames stay in its call-info stack, so the next
// resume simply re-enters the interpreter on them.

use crate::gc::ThreadId;
use crate::lua_value::LuaValue;
use crate::lua_vm::execute::{PreCall, execute};
use crate::lua_vm::lua_limits::CLOSEDMSG;
use crate::lua_vm::{LUA_MULTRET, LuaError, LuaResult, LuaState, LuaStatus, LuaVM, ThreadStatus};

impl LuaVM {
    /// Create a thread sharing this one's globals and push it
    pub fn new_thread(&mut self) -> LuaResult<ThreadId> {
        let id = self.g.new_thread(LuaState::new(self.l.globals));
        self.l.push(LuaValue::Thread(id));
        self.check_gc()?;
        Ok(id)
    }

    /// Status of a thread as `coroutine.status` reports it
    pub fn status(&self, th: ThreadId) -> ThreadStatus {
        if th == self.running {
            return ThreadStatus::Running;
        }
        match self.g.pool.get_thread(th) {
            Some(t) => match (t.status, t.state.as_deref()) {
                (ThreadStatus::Suspended, Some(state)) if state.is_idle() && state.top <= 1 => {
                    ThreadStatus::Dead
                }
                (status, _) => status,
            },
            None => ThreadStatus::Dead,
        }
    }

    /// Start or continue `co` with the `nargs` values on top of the stack.
    ///
    /// The arguments are consumed. On return or yield the transferred
    /// values are pushed and counted in the result; on error the error
    /// value is pushed and the coroutine is dead.
    pub fn resume(&mut self, co: ThreadId, nargs: i32) -> (LuaStatus, i32) {
        let nargs = (nargs.max(0) as usize).min(self.l.frame_len());
        let from = self.l.top - nargs;
        let args: Vec<LuaValue> = self.l.stack[from..self.l.top].to_vec();
        self.l.top = from;

        if self.closed {
            let v = self.create_string(CLOSEDMSG);
            self.l.push(v);
            return (LuaStatus::ErrErr, 1);
        }
        if let Some(msg) = self.resume_check(co) {
            let e = self.rt_error(msg);
            let v = self.error_value(&e);
            self.l.push(v);
            return (LuaStatus::ErrRun, 1);
        }
        let ccalls = self.l.n_ccalls + 1;
        if ccalls >= self.g.option.max_c_calls
            || self.c_stack_used() >= self.g.option.max_c_stack_bytes
        {
            let e = self.rt_error("C stack overflow");
            let v = self.error_value(&e);
            self.l.push(v);
            return (LuaStatus::ErrRun, 1);
        }

        let resumer = self.running;
        self.switch_to(co, ThreadStatus::Normal);
        self.resumers.push(resumer);
        self.l.n_ccalls = ccalls;
        self.l.base_ccalls = ccalls;
        tracing::trace!(thread = co.0, "coroutine resumed");

        let fresh = self.l.is_idle();
        let limit = self.g.option.max_stack_size;
        let result = if self.l.ensure_stack(args.len(), limit) {
            for v in &args {
                self.l.push(*v);
            }
            self.protect_depth += 1;
            let r = self.resume_body(fresh, args.len());
            self.protect_depth -= 1;
            r
        } else {
            Err(self.rt_error("stack overflow"))
        };

        let (status, new_state, values) = match result {
            Ok(()) => {
                let values = self.l.stack[1..self.l.top].to_vec();
                self.l.top = 1;
                (LuaStatus::Ok, ThreadStatus::Dead, values)
            }
            Err(LuaError::Yield) => {
                let n = self.l.nyield.min(self.l.frame_len());
                let from = self.l.top - n;
                let values = self.l.stack[from..self.l.top].to_vec();
                self.l.top = from;
                (LuaStatus::Yield, ThreadStatus::Suspended, values)
            }
            Err(e) => {
                let v = self.error_value(&e);
                self.close_upvalues(0);
                self.l.call_stack.truncate(1);
                self.l.top = 1;
                (e.status(), ThreadStatus::Dead, vec![v])
            }
        };
        self.l.nyield = 0;

        self.resumers.pop();
        self.switch_to(resumer, new_state);
        tracing::trace!(thread = co.0, status = new_state.name(), "coroutine stopped");

        let limit = self.g.option.max_stack_size;
        self.l.ensure_stack(values.len(), limit);
        let n = values.len() as i32;
        for v in values {
            self.l.push(v);
        }
        (status, n)
    }

    /// Message for a thread that cannot be resumed
    fn resume_check(&self, co: ThreadId) -> Option<&'static str> {
        if co == self.running {
            return Some("cannot resume non-suspended coroutine");
        }
        match self.status(co) {
            ThreadStatus::Suspended => None,
            ThreadStatus::Dead => Some("cannot resume dead coroutine"),
            ThreadStatus::Running | ThreadStatus::Normal => {
                Some("cannot resume non-suspended coroutine")
            }
        }
    }

    /// Make `to` the running thread; the current one is parked in its
    /// arena slot with status `leave_as`
    fn switch_to(&mut self, to: ThreadId, leave_as: ThreadStatus) {
        let Some(next) = self.g.pool.get_thread_mut(to).and_then(|th| {
            th.status = ThreadStatus::Running;
            th.state.take()
        }) else {
            return;
        };
        let prev = std::mem::replace(&mut self.l, next);
        if let Some(th) = self.g.pool.get_thread_mut(self.running) {
            th.status = leave_as;
            th.state = Some(prev);
        }
        self.running = to;
    }

    fn resume_body(&mut self, fresh: bool, nargs: usize) -> LuaResult<()> {
        if fresh {
            let func = self.l.top - nargs - 1;
            if let PreCall::Lua = self.precall(func, LUA_MULTRET)? {
                execute(self, 1)?;
            }
            return Ok(());
        }
        // the native frame that yielded receives the arguments as results
        let first = self.l.top - nargs;
        let wanted = self.poscall(first);
        if !self.l.is_idle() {
            if wanted != LUA_MULTRET {
                self.l.top = self.l.ci().top;
            }
            execute(self, 1)?;
        }
        Ok(())
    }

    /// Suspend the running coroutine from a native function, transferring
    /// the `nresults` values on top. Use as `return Err(vm.yield_(n))`.
    pub fn yield_(&mut self, nresults: i32) -> LuaError {
        if self.running == self.g.main_thread {
            return self.rt_error("attempt to yield from outside a coroutine");
        }
        if self.l.n_ccalls > self.l.base_ccalls {
            return self.rt_error("attempt to yield across metamethod/C-call boundary");
        }
        self.l.nyield = (nresults.max(0) as usize).min(self.l.frame_len());
        LuaError::Yield
    }
}
