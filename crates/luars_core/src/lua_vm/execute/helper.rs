use crate::lua_value::{LuaValue, number_to_string, str_to_number};
use crate::lua_vm::GlobalState;

/// luaV_tonumber: numbers, and strings that parse as numbers
#[inline]
pub(crate) fn tonumber(g: &GlobalState, v: &LuaValue) -> Option<f64> {
    match v {
        LuaValue::Number(n) => Some(*n),
        LuaValue::String(s) => str_to_number(g.pool.string_bytes(*s)),
        _ => None,
    }
}

/// Append the string form of a string or number to `buf`; false for any
/// other value
pub(crate) fn append_string(g: &GlobalState, v: &LuaValue, buf: &mut Vec<u8>) -> bool {
    match v {
        LuaValue::String(s) => {
            buf.extend_from_slice(g.pool.string_bytes(*s));
            true
        }
        LuaValue::Number(n) => {
            buf.extend_from_slice(number_to_string(*n).as_bytes());
            true
        }
        _ => false,
    }
}

#[inline]
pub(crate) fn is_string_or_number(v: &LuaValue) -> bool {
    matches!(v, LuaValue::String(_) | LuaValue::Number(_))
}
