// Metamethod dispatch (ltm.c, lvm.c)
// Table access with __index/__newindex chains, arithmetic fallbacks,
// comparisons and length.

use super::helper::tonumber;
use crate::lua_value::LuaValue;
use crate::lua_vm::lua_limits::MAXTAGLOOP;
use crate::lua_vm::{LuaResult, LuaVM};

/// Tag method events (TMS from ltm.h, Lua 5.1 order)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TmKind {
    Index = 0,
    NewIndex,
    Gc,
    Mode,
    Eq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Len,
    Lt,
    Le,
    Concat,
    Call,
}

impl TmKind {
    /// Number of tag methods
    pub const N: usize = 17;
}

impl LuaVM {
    /// luaV_gettable: t[key] with the __index chain. `slot` is the stack
    /// index holding `t`, used to name it in error messages.
    pub(crate) fn get_table_value(
        &mut self,
        t: LuaValue,
        key: LuaValue,
        slot: Option<usize>,
    ) -> LuaResult<LuaValue> {
        let mut t = t;
        let mut slot = slot;
        for _ in 0..MAXTAGLOOP {
            let tm = match t {
                LuaValue::Table(id) => {
                    let Some(table) = self.g.table(id) else {
                        return Ok(LuaValue::Nil);
                    };
                    let res = table.raw_get(&key);
                    if !res.is_nil() {
                        return Ok(res);
                    }
                    let tm = self.g.get_tm_from(table.get_metatable(), TmKind::Index);
                    if tm.is_nil() {
                        return Ok(LuaValue::Nil);
                    }
                    tm
                }
                _ => {
                    let tm = self.g.get_tm(&t, TmKind::Index);
                    if tm.is_nil() {
                        return Err(self.type_error(&t, "index", slot));
                    }
                    tm
                }
            };
            if tm.is_function() {
                return self.call_tm_res(tm, t, key);
            }
            t = tm;
            slot = None;
        }
        Err(self.rt_error("loop in gettable"))
    }

    /// luaV_settable: t[key] = value with the __newindex chain
    pub(crate) fn set_table_value(
        &mut self,
        t: LuaValue,
        key: LuaValue,
        value: LuaValue,
        slot: Option<usize>,
    ) -> LuaResult<()> {
        let mut t = t;
        let mut slot = slot;
        for _ in 0..MAXTAGLOOP {
            let tm = match t {
                LuaValue::Table(id) => {
                    let Some(table) = self.g.table(id) else {
                        return Ok(());
                    };
                    // existing key, or no __newindex: plain store
                    let tm = if table.raw_get(&key).is_nil() {
                        self.g.get_tm_from(table.get_metatable(), TmKind::NewIndex)
                    } else {
                        LuaValue::Nil
                    };
                    if tm.is_nil() {
                        if let Err(msg) = self.g.table_set(id, key, value) {
                            return Err(self.rt_error(msg));
                        }
                        return Ok(());
                    }
                    tm
                }
                _ => {
                    let tm = self.g.get_tm(&t, TmKind::NewIndex);
                    if tm.is_nil() {
                        return Err(self.type_error(&t, "index", slot));
                    }
                    tm
                }
            };
            if tm.is_function() {
                return self.call_tm(tm, t, key, value);
            }
            t = tm;
            slot = None;
        }
        Err(self.rt_error("loop in settable"))
    }

    /// callTMres: f(p1, p2), first result
    pub(crate) fn call_tm_res(
        &mut self,
        f: LuaValue,
        p1: LuaValue,
        p2: LuaValue,
    ) -> LuaResult<LuaValue> {
        let top = self.l.top;
        self.grow_stack(3)?;
        self.l.push(f);
        self.l.push(p1);
        self.l.push(p2);
        self.do_call(top, 1)?;
        let res = self.l.get(top);
        self.l.top = top;
        Ok(res)
    }

    /// callTM: f(p1, p2, p3), no results
    pub(crate) fn call_tm(
        &mut self,
        f: LuaValue,
        p1: LuaValue,
        p2: LuaValue,
        p3: LuaValue,
    ) -> LuaResult<()> {
        let top = self.l.top;
        self.grow_stack(4)?;
        self.l.push(f);
        self.l.push(p1);
        self.l.push(p2);
        self.l.push(p3);
        self.do_call(top, 0)?;
        self.l.top = top;
        Ok(())
    }

    /// call_binTM: handler from the first operand, else from the second
    pub(crate) fn call_bin_tm(
        &mut self,
        p1: LuaValue,
        p2: LuaValue,
        event: TmKind,
    ) -> LuaResult<Option<LuaValue>> {
        let mut tm = self.g.get_tm(&p1, event);
        if tm.is_nil() {
            tm = self.g.get_tm(&p2, event);
        }
        if tm.is_nil() {
            return Ok(None);
        }
        self.call_tm_res(tm, p1, p2).map(Some)
    }

    /// luaV_arith: numeric operation with string coercion, falling back to
    /// the event's metamethod
    pub(crate) fn arith(
        &mut self,
        op: TmKind,
        rb: LuaValue,
        rc: LuaValue,
        slots: (Option<usize>, Option<usize>),
    ) -> LuaResult<LuaValue> {
        let nb = tonumber(&self.g, &rb);
        let nc = tonumber(&self.g, &rc);
        if let (Some(b), Some(c)) = (nb, nc) {
            return Ok(LuaValue::Number(arith_op(op, b, c)));
        }
        if let Some(res) = self.call_bin_tm(rb, rc, op)? {
            return Ok(res);
        }
        // luaG_aritherror: blame the operand that is not a number
        if nb.is_none() {
            Err(self.type_error(&rb, "perform arithmetic on", slots.0))
        } else {
            Err(self.type_error(&rc, "perform arithmetic on", slots.1))
        }
    }

    /// Length operator (OP_LEN): tables and strings are primitive, other
    /// values go through __len
    pub(crate) fn value_len(&mut self, v: LuaValue, slot: Option<usize>) -> LuaResult<LuaValue> {
        match v {
            LuaValue::Table(t) => Ok(LuaValue::Number(
                self.g.table(t).map_or(0, |t| t.len()) as f64,
            )),
            LuaValue::String(s) => Ok(LuaValue::Number(self.g.pool.string_bytes(s).len() as f64)),
            _ => match self.call_bin_tm(v, LuaValue::Nil, TmKind::Len)? {
                Some(res) => Ok(res),
                None => Err(self.type_error(&v, "get length of", slot)),
            },
        }
    }

    /// get_compTM: the handler both metatables agree on
    fn get_comp_tm(&self, a: &LuaValue, b: &LuaValue, event: TmKind) -> LuaValue {
        let mt1 = self.g.get_metatable(a);
        let tm1 = self.g.get_tm_from(mt1, event);
        if tm1.is_nil() {
            return LuaValue::Nil;
        }
        let mt2 = self.g.get_metatable(b);
        if mt1 == mt2 {
            return tm1;
        }
        let tm2 = self.g.get_tm_from(mt2, event);
        if tm1 == tm2 { tm1 } else { LuaValue::Nil }
    }

    /// luaV_equalval for two values of the same type
    pub(crate) fn equal_obj(&mut self, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
        if a == b {
            return Ok(true);
        }
        let tm = match (a, b) {
            (LuaValue::Table(_), LuaValue::Table(_))
            | (LuaValue::Userdata(_), LuaValue::Userdata(_)) => {
                self.get_comp_tm(&a, &b, TmKind::Eq)
            }
            _ => return Ok(false),
        };
        if tm.is_nil() {
            return Ok(false);
        }
        Ok(self.call_tm_res(tm, a, b)?.is_truthy())
    }

    /// call_orderTM: None when the operands share no handler
    fn call_order_tm(&mut self, a: LuaValue, b: LuaValue, event: TmKind) -> LuaResult<Option<bool>> {
        let tm1 = self.g.get_tm(&a, event);
        if tm1.is_nil() {
            return Ok(None);
        }
        let tm2 = self.g.get_tm(&b, event);
        if tm1 != tm2 {
            return Ok(None);
        }
        Ok(Some(self.call_tm_res(tm1, a, b)?.is_truthy()))
    }

    /// luaV_lessthan
    pub(crate) fn value_less_than(&mut self, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
        match (a, b) {
            (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x < y),
            (LuaValue::String(x), LuaValue::String(y)) => {
                Ok(self.g.pool.string_bytes(x) < self.g.pool.string_bytes(y))
            }
            _ if a.kind() != b.kind() => Err(self.order_error(&a, &b)),
            _ => match self.call_order_tm(a, b, TmKind::Lt)? {
                Some(res) => Ok(res),
                None => Err(self.order_error(&a, &b)),
            },
        }
    }

    /// lessequal: __le, else not (b < a) through __lt
    pub(crate) fn value_less_equal(&mut self, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
        match (a, b) {
            (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x <= y),
            (LuaValue::String(x), LuaValue::String(y)) => {
                Ok(self.g.pool.string_bytes(x) <= self.g.pool.string_bytes(y))
            }
            _ if a.kind() != b.kind() => Err(self.order_error(&a, &b)),
            _ => {
                if let Some(res) = self.call_order_tm(a, b, TmKind::Le)? {
                    return Ok(res);
                }
                match self.call_order_tm(b, a, TmKind::Lt)? {
                    Some(res) => Ok(!res),
                    None => Err(self.order_error(&a, &b)),
                }
            }
        }
    }
}

/// luai_num* primitives
#[inline]
pub(crate) fn arith_op(op: TmKind, a: f64, b: f64) -> f64 {
    match op {
        TmKind::Add => a + b,
        TmKind::Sub => a - b,
        TmKind::Mul => a * b,
        TmKind::Div => a / b,
        TmKind::Mod => a - (a / b).floor() * b,
        TmKind::Pow => a.powf(b),
        TmKind::Unm => -a,
        _ => 0.0,
    }
}
