/*----------------------------------------------------------------------
  Lua 5.1 execution engine (lvm.c luaV_execute)

  One loop runs every Lua frame of the current Rust-level call: a CALL to
  a Lua function pushes a frame and jumps back to 'startfunc, a RETURN pops
  it and resumes the caller, so scripted recursion never recurses in Rust.
  Native functions, metamethods and protected calls do enter Rust
  recursion and are bounded by `max_c_calls`.

  Registers are stack indices relative to the frame base. The pc of the
  running instruction is stored into the frame before it executes, so an
  error raised anywhere below knows its line.
----------------------------------------------------------------------*/

mod call;
mod concat;
pub(crate) mod helper;
mod metamethod;

pub(crate) use call::PreCall;
pub(crate) use metamethod::arith_op;
pub use metamethod::TmKind;

use crate::gc::{FunctionId, TableId, UpvalueId};
use crate::lua_value::{Chunk, FunctionKind, LuaValue, UpvalueState};
use crate::lua_vm::lua_limits::LFIELDS_PER_FLUSH;
use crate::lua_vm::{Instruction, LUA_MULTRET, LuaResult, LuaVM, OpCode, fb2int};
use helper::tonumber;
use std::rc::Rc;

impl LuaVM {
    /// Prototype of a Lua closure
    pub(crate) fn closure_chunk(&self, cl: FunctionId) -> Option<Rc<Chunk>> {
        match &self.g.pool.get_function(cl)?.kind {
            FunctionKind::Lua { chunk, .. } => Some(chunk.clone()),
            FunctionKind::Native { .. } => None,
        }
    }

    /// n-th upvalue cell of a Lua closure
    #[inline]
    pub(crate) fn closure_upvalue(&self, cl: FunctionId, n: usize) -> Option<UpvalueId> {
        match &self.g.pool.get_function(cl)?.kind {
            FunctionKind::Lua { upvalues, .. } => upvalues.get(n).copied(),
            FunctionKind::Native { .. } => None,
        }
    }

    /// Environment table of a function; the thread's globals when the
    /// handle is stale
    #[inline]
    pub(crate) fn closure_env(&self, cl: FunctionId) -> TableId {
        self.g
            .pool
            .get_function(cl)
            .map_or(self.l.globals, |f| f.env)
    }

    // Cold opcode bodies stay out of `execute` to keep its frame small;
    // every nested call level pays for that frame.

    #[inline(never)]
    fn for_prep(&mut self, ra: usize) -> LuaResult<()> {
        let Some(init) = tonumber(&self.g, &self.l.stack[ra]) else {
            return Err(self.rt_error("'for' initial value must be a number"));
        };
        let Some(limit) = tonumber(&self.g, &self.l.stack[ra + 1]) else {
            return Err(self.rt_error("'for' limit must be a number"));
        };
        let Some(step) = tonumber(&self.g, &self.l.stack[ra + 2]) else {
            return Err(self.rt_error("'for' step must be a number"));
        };
        self.l.stack[ra] = LuaValue::Number(init - step);
        self.l.stack[ra + 1] = LuaValue::Number(limit);
        self.l.stack[ra + 2] = LuaValue::Number(step);
        Ok(())
    }

    /// SETLIST: `n` values above `ra` into block `c` of the table at `ra`
    #[inline(never)]
    fn set_list(&mut self, ra: usize, n: usize, c: usize) -> LuaResult<()> {
        let LuaValue::Table(t) = self.l.stack[ra] else {
            return Err(self.rt_error("SETLIST on a non-table value"));
        };
        let last = (c - 1) * LFIELDS_PER_FLUSH + n;
        if let Some((asize, hsize)) = self.g.table(t).map(|t| (t.array_size(), t.hash_size()))
            && last > asize
        {
            self.g.table_resize(t, last, hsize);
        }
        for j in 1..=n {
            let v = self.l.stack[ra + j];
            self.g.table_set_int(t, (last - n + j) as i64, v);
        }
        Ok(())
    }

    /// CLOSURE: captures stack slots above `base` or the enclosing
    /// closure's own upvalues
    #[inline(never)]
    fn new_lua_closure(&mut self, cl: FunctionId, proto: Rc<Chunk>, base: usize) -> FunctionId {
        let mut upvalues = Vec::with_capacity(proto.upvalue_count());
        for desc in &proto.upvalue_descs {
            let uv = if desc.in_stack {
                self.find_upvalue(base + desc.index as usize)
            } else {
                match self.closure_upvalue(cl, desc.index as usize) {
                    Some(uv) => uv,
                    None => self.g.new_upvalue(UpvalueState::Closed(LuaValue::Nil)),
                }
            };
            upvalues.push(uv);
        }
        let env = self.closure_env(cl);
        self.g.new_function(
            FunctionKind::Lua {
                chunk: proto,
                upvalues,
            },
            env,
        )
    }

    /// Raw hit, or a miss on a table without metatable
    #[inline]
    pub(crate) fn fast_get(&self, t: &LuaValue, key: &LuaValue) -> Option<LuaValue> {
        let LuaValue::Table(id) = t else {
            return None;
        };
        let table = self.g.table(*id)?;
        let v = table.raw_get(key);
        if !v.is_nil() || table.get_metatable().is_none() {
            Some(v)
        } else {
            None
        }
    }
}

/// Run Lua frames until the call-info stack shrinks to `target_depth`
pub(crate) fn execute(vm: &mut LuaVM, target_depth: usize) -> LuaResult<()> {
    'startfunc: loop {
        let depth = vm.l.call_stack.len();
        if depth <= target_depth {
            return Ok(());
        }
        let ci_idx = depth - 1;
        let ci = vm.l.call_stack[ci_idx];
        let func = vm.l.get(ci.func);
        let Some((cl, chunk)) = func
            .as_function_id()
            .and_then(|cl| Some((cl, vm.closure_chunk(cl)?)))
        else {
            return Err(vm.rt_error("attempt to execute a non-Lua frame"));
        };
        let base = ci.base;
        let mut pc = ci.saved_pc;
        let code = &chunk.code[..];
        let k = &chunk.constants[..];

        macro_rules! reg {
            ($r:expr) => {
                vm.l.stack[base + ($r) as usize]
            };
        }
        macro_rules! rk {
            ($x:expr) => {{
                let x = $x;
                if Instruction::is_k(x) {
                    k[Instruction::index_k(x)]
                } else {
                    vm.l.stack[base + x as usize]
                }
            }};
        }
        macro_rules! rk_slot {
            ($x:expr) => {{
                let x = $x;
                if Instruction::is_k(x) {
                    None
                } else {
                    Some(base + x as usize)
                }
            }};
        }
        // take the JMP that follows a test when `cond` holds, else skip it
        macro_rules! cond_jump {
            ($cond:expr) => {{
                if $cond {
                    let j = code[pc];
                    pc = (pc as isize + 1 + j.get_sbx() as isize) as usize;
                } else {
                    pc += 1;
                }
            }};
        }
        macro_rules! arith {
            ($i:expr, $op:expr) => {{
                let rb = rk!($i.get_b());
                let rc = rk!($i.get_c());
                let v = match (rb, rc) {
                    (LuaValue::Number(b), LuaValue::Number(c)) => {
                        LuaValue::Number(arith_op($op, b, c))
                    }
                    _ => vm.arith($op, rb, rc, (rk_slot!($i.get_b()), rk_slot!($i.get_c())))?,
                };
                reg!($i.get_a()) = v;
            }};
        }

        loop {
            let i = code[pc];
            pc += 1;
            vm.l.call_stack[ci_idx].saved_pc = pc;
            let ra = base + i.get_a() as usize;

            match i.get_opcode() {
                OpCode::Move => {
                    vm.l.stack[ra] = reg!(i.get_b());
                }
                OpCode::LoadK => {
                    vm.l.stack[ra] = k[i.get_bx() as usize];
                }
                OpCode::LoadBool => {
                    vm.l.stack[ra] = LuaValue::Boolean(i.get_b() != 0);
                    if i.get_c() != 0 {
                        pc += 1;
                    }
                }
                OpCode::LoadNil => {
                    let last = base + i.get_b() as usize;
                    for r in ra..=last {
                        vm.l.stack[r] = LuaValue::Nil;
                    }
                }
                OpCode::GetUpval => {
                    let v = match vm.closure_upvalue(cl, i.get_b() as usize) {
                        Some(uv) => vm.upvalue_get(uv),
                        None => LuaValue::Nil,
                    };
                    vm.l.stack[ra] = v;
                }
                OpCode::GetGlobal => {
                    let env = LuaValue::Table(vm.closure_env(cl));
                    let key = k[i.get_bx() as usize];
                    let v = match vm.fast_get(&env, &key) {
                        Some(v) => v,
                        None => vm.get_table_value(env, key, None)?,
                    };
                    vm.l.stack[ra] = v;
                }
                OpCode::GetTable => {
                    let rb = reg!(i.get_b());
                    let key = rk!(i.get_c());
                    let v = match vm.fast_get(&rb, &key) {
                        Some(v) => v,
                        None => vm.get_table_value(rb, key, Some(base + i.get_b() as usize))?,
                    };
                    vm.l.stack[ra] = v;
                }
                OpCode::SetGlobal => {
                    let env = LuaValue::Table(vm.closure_env(cl));
                    let key = k[i.get_bx() as usize];
                    let v = vm.l.stack[ra];
                    vm.set_table_value(env, key, v, None)?;
                }
                OpCode::SetUpval => {
                    if let Some(uv) = vm.closure_upvalue(cl, i.get_b() as usize) {
                        let v = vm.l.stack[ra];
                        vm.upvalue_set(uv, v);
                    }
                }
                OpCode::SetTable => {
                    let t = vm.l.stack[ra];
                    let key = rk!(i.get_b());
                    let v = rk!(i.get_c());
                    vm.set_table_value(t, key, v, Some(ra))?;
                }
                OpCode::NewTable => {
                    let t = vm
                        .g
                        .new_table(fb2int(i.get_b()), fb2int(i.get_c()));
                    vm.l.stack[ra] = LuaValue::Table(t);
                    vm.check_gc()?;
                }
                OpCode::Self_ => {
                    let rb = reg!(i.get_b());
                    let key = rk!(i.get_c());
                    vm.l.stack[ra + 1] = rb;
                    let v = match vm.fast_get(&rb, &key) {
                        Some(v) => v,
                        None => vm.get_table_value(rb, key, Some(base + i.get_b() as usize))?,
                    };
                    vm.l.stack[ra] = v;
                }
                OpCode::Add => arith!(i, TmKind::Add),
                OpCode::Sub => arith!(i, TmKind::Sub),
                OpCode::Mul => arith!(i, TmKind::Mul),
                OpCode::Div => arith!(i, TmKind::Div),
                OpCode::Mod => arith!(i, TmKind::Mod),
                OpCode::Pow => arith!(i, TmKind::Pow),
                OpCode::Unm => {
                    let rb = reg!(i.get_b());
                    let v = match rb {
                        LuaValue::Number(n) => LuaValue::Number(-n),
                        _ => {
                            let slot = Some(base + i.get_b() as usize);
                            vm.arith(TmKind::Unm, rb, rb, (slot, slot))?
                        }
                    };
                    vm.l.stack[ra] = v;
                }
                OpCode::Not => {
                    vm.l.stack[ra] = LuaValue::Boolean(reg!(i.get_b()).is_falsy());
                }
                OpCode::Len => {
                    let rb = reg!(i.get_b());
                    vm.l.stack[ra] = vm.value_len(rb, Some(base + i.get_b() as usize))?;
                }
                OpCode::Concat => {
                    let b = i.get_b() as usize;
                    let c = i.get_c() as usize;
                    vm.concat_stack(c - b + 1, base + c)?;
                    vm.check_gc()?;
                    vm.l.stack[ra] = vm.l.stack[base + b];
                }
                OpCode::Jmp => {
                    pc = (pc as isize + i.get_sbx() as isize) as usize;
                }
                OpCode::Eq => {
                    let rb = rk!(i.get_b());
                    let rc = rk!(i.get_c());
                    let eq = if rb.kind() != rc.kind() {
                        false
                    } else if rb == rc {
                        true
                    } else {
                        vm.equal_obj(rb, rc)?
                    };
                    cond_jump!(eq == (i.get_a() != 0));
                }
                OpCode::Lt => {
                    let rb = rk!(i.get_b());
                    let rc = rk!(i.get_c());
                    let res = match (rb, rc) {
                        (LuaValue::Number(x), LuaValue::Number(y)) => x < y,
                        _ => vm.value_less_than(rb, rc)?,
                    };
                    cond_jump!(res == (i.get_a() != 0));
                }
                OpCode::Le => {
                    let rb = rk!(i.get_b());
                    let rc = rk!(i.get_c());
                    let res = match (rb, rc) {
                        (LuaValue::Number(x), LuaValue::Number(y)) => x <= y,
                        _ => vm.value_less_equal(rb, rc)?,
                    };
                    cond_jump!(res == (i.get_a() != 0));
                }
                OpCode::Test => {
                    let falsy = vm.l.stack[ra].is_falsy();
                    cond_jump!(falsy != (i.get_c() != 0));
                }
                OpCode::TestSet => {
                    let rb = reg!(i.get_b());
                    let take = rb.is_falsy() != (i.get_c() != 0);
                    if take {
                        vm.l.stack[ra] = rb;
                    }
                    cond_jump!(take);
                }
                OpCode::Call => {
                    let b = i.get_b() as usize;
                    let nresults = i.get_c() as i32 - 1;
                    if b != 0 {
                        vm.l.top = ra + b;
                    }
                    match vm.precall(ra, nresults)? {
                        PreCall::Lua => continue 'startfunc,
                        PreCall::Native => {
                            if nresults >= 0 {
                                vm.l.top = vm.l.call_stack[ci_idx].top;
                            }
                        }
                    }
                }
                OpCode::TailCall => {
                    let b = i.get_b() as usize;
                    if b != 0 {
                        vm.l.top = ra + b;
                    }
                    match vm.precall(ra, LUA_MULTRET)? {
                        PreCall::Lua => {
                            // move the new frame down over the current one
                            let Some(callee) = vm.l.call_stack.pop() else {
                                return Ok(());
                            };
                            vm.close_upvalues(base);
                            let func = ci.func;
                            let count = vm.l.top - callee.func;
                            vm.l.stack.copy_within(callee.func..vm.l.top, func);
                            let top = func + count;
                            let frame = &mut vm.l.call_stack[ci_idx];
                            frame.base = func + (callee.base - callee.func);
                            frame.top = top;
                            frame.saved_pc = 0;
                            frame.tailcalls += 1;
                            vm.l.top = top;
                            continue 'startfunc;
                        }
                        PreCall::Native => {}
                    }
                }
                OpCode::Return => {
                    let b = i.get_b() as usize;
                    if b != 0 {
                        vm.l.top = ra + b - 1;
                    }
                    vm.close_upvalues(base);
                    let wanted = vm.poscall(ra);
                    if vm.l.call_stack.len() <= target_depth {
                        return Ok(());
                    }
                    if wanted != LUA_MULTRET {
                        vm.l.top = vm.l.ci().top;
                    }
                    continue 'startfunc;
                }
                OpCode::ForLoop => {
                    let step = vm.l.stack[ra + 2].as_number().unwrap_or(0.0);
                    let idx = vm.l.stack[ra].as_number().unwrap_or(0.0) + step;
                    let limit = vm.l.stack[ra + 1].as_number().unwrap_or(0.0);
                    let go_on = if step > 0.0 { idx <= limit } else { limit <= idx };
                    if go_on {
                        pc = (pc as isize + i.get_sbx() as isize) as usize;
                        vm.l.stack[ra] = LuaValue::Number(idx);
                        vm.l.stack[ra + 3] = LuaValue::Number(idx);
                    }
                }
                OpCode::ForPrep => {
                    vm.for_prep(ra)?;
                    pc = (pc as isize + i.get_sbx() as isize) as usize;
                }
                OpCode::TForLoop => {
                    let cb = ra + 3;
                    vm.l.stack[cb + 2] = vm.l.stack[ra + 2];
                    vm.l.stack[cb + 1] = vm.l.stack[ra + 1];
                    vm.l.stack[cb] = vm.l.stack[ra];
                    vm.l.top = cb + 3;
                    vm.do_call(cb, i.get_c() as i32)?;
                    vm.l.top = vm.l.call_stack[ci_idx].top;
                    let first = vm.l.stack[cb];
                    let more = !first.is_nil();
                    if more {
                        vm.l.stack[cb - 1] = first;
                    }
                    cond_jump!(more);
                }
                OpCode::SetList => {
                    let mut n = i.get_b() as usize;
                    let mut c = i.get_c() as usize;
                    if n == 0 {
                        n = vm.l.top - ra - 1;
                        vm.l.top = vm.l.call_stack[ci_idx].top;
                    }
                    if c == 0 {
                        c = code[pc].as_u32() as usize;
                        pc += 1;
                    }
                    vm.set_list(ra, n, c)?;
                }
                OpCode::Close => {
                    vm.close_upvalues(ra);
                }
                OpCode::Closure => {
                    let proto = chunk.child_protos[i.get_bx() as usize].clone();
                    let f = vm.new_lua_closure(cl, proto, base);
                    vm.l.stack[ra] = LuaValue::Function(f);
                    vm.check_gc()?;
                }
                OpCode::Vararg => {
                    let n = (base - ci.func - 1).saturating_sub(chunk.param_count);
                    let mut wanted = i.get_b() as i32 - 1;
                    if wanted == LUA_MULTRET {
                        vm.grow_stack(n)?;
                        wanted = n as i32;
                        vm.l.top = ra + n;
                    }
                    for j in 0..wanted as usize {
                        vm.l.stack[ra + j] = if j < n {
                            vm.l.stack[base - n + j]
                        } else {
                            LuaValue::Nil
                        };
                    }
                }
            }
        }
    }
}
