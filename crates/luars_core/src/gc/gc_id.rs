// ============ Object IDs ============
// Every heap object is addressed by a u32 slot index into its typed arena.
// Handles are plain data: copying one never keeps the object alive, only
// reachability from the GC roots does.

macro_rules! gc_handle {
    ($($name:ident => $variant:ident),* $(,)?) => {
        $(
            #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
            #[repr(transparent)]
            pub struct $name(pub u32);

            impl $name {
                #[inline(always)]
                pub fn index(self) -> usize {
                    self.0 as usize
                }
            }

            impl From<$name> for GcId {
                #[inline(always)]
                fn from(id: $name) -> Self {
                    GcId::$variant(id)
                }
            }
        )*
    };
}

gc_handle!(
    StringId => String,
    TableId => Table,
    FunctionId => Function,
    UpvalueId => Upvalue,
    ThreadId => Thread,
    UserdataId => Userdata,
);

/// Any collectable object; what the gray list and the barriers carry
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GcId {
    String(StringId),
    Table(TableId),
    Function(FunctionId),
    Upvalue(UpvalueId),
    Thread(ThreadId),
    Userdata(UserdataId),
}

impl GcId {
    /// Small non-zero tag per object kind, used to build printable identities
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            GcId::String(_) => 1,
            GcId::Table(_) => 2,
            GcId::Function(_) => 3,
            GcId::Upvalue(_) => 4,
            GcId::Thread(_) => 5,
            GcId::Userdata(_) => 6,
        }
    }

    #[inline(always)]
    pub fn index(self) -> u32 {
        match self {
            GcId::String(id) => id.0,
            GcId::Table(id) => id.0,
            GcId::Function(id) => id.0,
            GcId::Upvalue(id) => id.0,
            GcId::Thread(id) => id.0,
            GcId::Userdata(id) => id.0,
        }
    }
}
