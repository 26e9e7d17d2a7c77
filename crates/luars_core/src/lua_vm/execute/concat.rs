use super::TmKind;
use super::helper::{append_string, is_string_or_number};
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaVM};

impl LuaVM {
    /// luaV_concat: concatenate the `total` values ending at stack index
    /// `last`; the result lands in the first of them. Runs of strings and
    /// numbers are joined in one allocation, anything else goes through
    /// __concat pairwise from the right.
    pub(crate) fn concat_stack(&mut self, total: usize, last: usize) -> LuaResult<()> {
        let mut total = total;
        let mut last = last;
        let mut buf = Vec::new();
        while total > 1 {
            let top = last + 1;
            let a = self.l.get(top - 2);
            let b = self.l.get(top - 1);
            let n = if !is_string_or_number(&a) || !is_string_or_number(&b) {
                match self.call_bin_tm(a, b, TmKind::Concat)? {
                    Some(res) => self.l.set(top - 2, res),
                    None => {
                        let culprit = if is_string_or_number(&a) { top - 1 } else { top - 2 };
                        let v = self.l.get(culprit);
                        return Err(self.type_error(&v, "concatenate", Some(culprit)));
                    }
                }
                2
            } else if matches!(b, LuaValue::String(s) if self.g.pool.string_bytes(s).is_empty()) {
                if let LuaValue::Number(_) = a {
                    buf.clear();
                    append_string(&self.g, &a, &mut buf);
                    let s = self.g.intern(&buf);
                    self.l.set(top - 2, LuaValue::String(s));
                }
                2
            } else {
                let mut count = 1;
                while count < total && is_string_or_number(&self.l.get(top - count - 1)) {
                    count += 1;
                }
                buf.clear();
                for idx in top - count..top {
                    let v = self.l.get(idx);
                    append_string(&self.g, &v, &mut buf);
                }
                let s = self.g.intern(&buf);
                self.l.set(top - count, LuaValue::String(s));
                count
            };
            total -= n - 1;
            last -= n - 1;
        }
        Ok(())
    }
}
