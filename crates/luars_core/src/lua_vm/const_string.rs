use crate::gc::StringId;
use crate::lua_vm::TmKind;
use crate::lua_vm::lua_limits::{ERRORERRMSG, MEMERRMSG};

/// Metamethod event names, indexed by `TmKind` (luaT_init's table)
pub const TM_NAMES: [&str; TmKind::N] = [
    "__index",
    "__newindex",
    "__gc",
    "__mode",
    "__eq",
    "__add",
    "__sub",
    "__mul",
    "__div",
    "__mod",
    "__pow",
    "__unm",
    "__len",
    "__lt",
    "__le",
    "__concat",
    "__call",
];

/// Strings created once at VM start and never collected. Error paths use
/// them so that reporting an error never needs to allocate.
pub struct ConstString {
    pub tm_names: [StringId; TmKind::N],
    pub memerr: StringId,
    pub errerr: StringId,
    pub metatable: StringId,
    pub tostring: StringId,
}

impl ConstString {
    /// `intern` must return fixed strings
    pub fn new(mut intern: impl FnMut(&str) -> StringId) -> Self {
        let mut tm_names = [StringId::default(); TmKind::N];
        for (slot, name) in tm_names.iter_mut().zip(TM_NAMES) {
            *slot = intern(name);
        }
        ConstString {
            tm_names,
            memerr: intern(MEMERRMSG),
            errerr: intern(ERRORERRMSG),
            metatable: intern("__metatable"),
            tostring: intern("__tostring"),
        }
    }

    #[inline(always)]
    pub fn tm(&self, tm: TmKind) -> StringId {
        self.tm_names[tm as usize]
    }
}
