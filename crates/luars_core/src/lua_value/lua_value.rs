// Lua 5.1 value representation
// Values are Copy; heap variants carry arena handles owned by the collector.

use crate::gc::{FunctionId, GcId, StringId, TableId, ThreadId, UserdataId};

/// Basic type tags (lua.h `LUA_T*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i8)]
pub enum LuaValueKind {
    /// Used by the API for acceptable-but-empty stack indices (`LUA_TNONE`)
    None = -1,
    Nil = 0,
    Boolean = 1,
    LightUserdata = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    Userdata = 7,
    Thread = 8,
}

pub const NUM_TAGS: usize = 9;

impl LuaValueKind {
    pub fn name(self) -> &'static str {
        match self {
            LuaValueKind::None => "no value",
            LuaValueKind::Nil => "nil",
            LuaValueKind::Boolean => "boolean",
            LuaValueKind::LightUserdata | LuaValueKind::Userdata => "userdata",
            LuaValueKind::Number => "number",
            LuaValueKind::String => "string",
            LuaValueKind::Table => "table",
            LuaValueKind::Function => "function",
            LuaValueKind::Thread => "thread",
        }
    }
}

/// Tagged value. `PartialEq` is Lua raw equality: numbers compare by IEEE
/// rules, heap objects by identity (strings are interned, so identity is
/// content equality).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    String(StringId),
    Table(TableId),
    Function(FunctionId),
    Userdata(UserdataId),
    Thread(ThreadId),
    LightUserdata(usize),
}

impl LuaValue {
    #[inline(always)]
    pub const fn nil() -> Self {
        LuaValue::Nil
    }

    #[inline(always)]
    pub const fn boolean(b: bool) -> Self {
        LuaValue::Boolean(b)
    }

    #[inline(always)]
    pub const fn number(n: f64) -> Self {
        LuaValue::Number(n)
    }

    #[inline(always)]
    pub fn kind(&self) -> LuaValueKind {
        match self {
            LuaValue::Nil => LuaValueKind::Nil,
            LuaValue::Boolean(_) => LuaValueKind::Boolean,
            LuaValue::Number(_) => LuaValueKind::Number,
            LuaValue::String(_) => LuaValueKind::String,
            LuaValue::Table(_) => LuaValueKind::Table,
            LuaValue::Function(_) => LuaValueKind::Function,
            LuaValue::Userdata(_) => LuaValueKind::Userdata,
            LuaValue::Thread(_) => LuaValueKind::Thread,
            LuaValue::LightUserdata(_) => LuaValueKind::LightUserdata,
        }
    }

    #[inline(always)]
    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// `nil` and `false` are the only false values
    #[inline(always)]
    pub fn is_falsy(&self) -> bool {
        matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    #[inline(always)]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    #[inline(always)]
    pub fn is_number(&self) -> bool {
        matches!(self, LuaValue::Number(_))
    }

    #[inline(always)]
    pub fn is_string(&self) -> bool {
        matches!(self, LuaValue::String(_))
    }

    #[inline(always)]
    pub fn is_table(&self) -> bool {
        matches!(self, LuaValue::Table(_))
    }

    #[inline(always)]
    pub fn is_function(&self) -> bool {
        matches!(self, LuaValue::Function(_))
    }

    #[inline(always)]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            LuaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            LuaValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_string_id(&self) -> Option<StringId> {
        match self {
            LuaValue::String(id) => Some(*id),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_table_id(&self) -> Option<TableId> {
        match self {
            LuaValue::Table(id) => Some(*id),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_function_id(&self) -> Option<FunctionId> {
        match self {
            LuaValue::Function(id) => Some(*id),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_thread_id(&self) -> Option<ThreadId> {
        match self {
            LuaValue::Thread(id) => Some(*id),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_userdata_id(&self) -> Option<UserdataId> {
        match self {
            LuaValue::Userdata(id) => Some(*id),
            _ => None,
        }
    }

    /// Heap object behind this value, if any
    #[inline]
    pub fn gc_id(&self) -> Option<GcId> {
        match *self {
            LuaValue::String(id) => Some(GcId::String(id)),
            LuaValue::Table(id) => Some(GcId::Table(id)),
            LuaValue::Function(id) => Some(GcId::Function(id)),
            LuaValue::Userdata(id) => Some(GcId::Userdata(id)),
            LuaValue::Thread(id) => Some(GcId::Thread(id)),
            _ => None,
        }
    }

    /// Integer view of a number with an exact integral value
    #[inline]
    pub fn as_integer_key(&self) -> Option<i64> {
        match *self {
            LuaValue::Number(n) => number_to_int_exact(n),
            _ => None,
        }
    }
}

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Boolean(b)
    }
}

impl From<f64> for LuaValue {
    fn from(n: f64) -> Self {
        LuaValue::Number(n)
    }
}

impl From<i32> for LuaValue {
    fn from(n: i32) -> Self {
        LuaValue::Number(n as f64)
    }
}

impl From<TableId> for LuaValue {
    fn from(id: TableId) -> Self {
        LuaValue::Table(id)
    }
}

impl From<StringId> for LuaValue {
    fn from(id: StringId) -> Self {
        LuaValue::String(id)
    }
}

#[inline]
pub fn number_to_int_exact(n: f64) -> Option<i64> {
    let i = n as i64;
    if i as f64 == n { Some(i) } else { None }
}

/// `lua_number2str` (`%.14g`)
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }

    // 14 significant digits, exponent taken after rounding like printf does
    let sci = format!("{:.13e}", n);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if !(-4..14).contains(&exp) {
        let mantissa = trim_fraction_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        let decimals = (13 - exp).max(0) as usize;
        let fixed = format!("{:.*}", decimals, n);
        trim_fraction_zeros(&fixed).to_string()
    }
}

fn trim_fraction_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// `luaO_str2d`: decimal or hexadecimal, surrounding whitespace allowed
pub fn str_to_number(bytes: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(bytes).ok()?;
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    if s.is_empty() {
        return None;
    }

    let (negative, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut value = 0.0f64;
        for b in hex.bytes() {
            value = value * 16.0 + (b as char).to_digit(16)? as f64;
        }
        return Some(if negative { -value } else { value });
    }

    // Reject what strtod would read as inf/nan
    match body.as_bytes().first() {
        Some(c) if c.is_ascii_digit() || *c == b'.' => {}
        _ => return None,
    }
    let value: f64 = body.parse().ok()?;
    Some(if negative { -value } else { value })
}
