// Object Pool
//
// Every GC object lives in a typed Arena<T> slot (Vec<Option<T>> + free list)
// and is addressed by its u32 slot index. Objects embed a GcHeader carrying
// the tri-color mark. Nothing outside the collector ever owns an object;
// values, tables and stacks only hold IDs.

use super::string_interner::StringInterner;
use super::{FunctionId, GcColor, StringId, TableId, ThreadId, UpvalueId, UserdataId};
use crate::lua_value::{FunctionKind, LuaTable, LuaValue, UpvalueState};
use crate::lua_vm::{LuaState, ThreadStatus};
use std::any::Any;

// ============ GC Header ============

#[derive(Clone, Copy, Debug)]
pub struct GcHeader {
    pub color: GcColor,
    /// Fixed objects are never collected (metamethod names, main thread)
    pub fixed: bool,
}

impl GcHeader {
    #[inline(always)]
    pub fn new(white: GcColor) -> Self {
        GcHeader {
            color: white,
            fixed: false,
        }
    }

    #[inline(always)]
    pub fn is_white(&self) -> bool {
        matches!(self.color, GcColor::White0 | GcColor::White1)
    }

    #[inline(always)]
    pub fn is_black(&self) -> bool {
        self.color == GcColor::Black
    }

    #[inline(always)]
    pub fn is_gray(&self) -> bool {
        self.color == GcColor::Gray
    }
}

// ============ GC-managed Objects ============

pub struct GcString {
    pub header: GcHeader,
    pub data: Box<[u8]>,
    pub hash: u64,
}

impl GcString {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        std::mem::size_of::<GcString>() + self.data.len()
    }
}

pub struct GcTable {
    pub header: GcHeader,
    pub data: LuaTable,
    /// Bytes currently charged to the collector for this table
    pub(crate) charged: usize,
}

pub struct GcFunction {
    pub header: GcHeader,
    pub env: TableId,
    pub kind: FunctionKind,
}

impl GcFunction {
    pub fn size(&self) -> usize {
        let extra = match &self.kind {
            FunctionKind::Lua { upvalues, .. } => upvalues.len() * std::mem::size_of::<UpvalueId>(),
            FunctionKind::Native { upvalues, .. } => upvalues.len() * std::mem::size_of::<LuaValue>(),
        };
        std::mem::size_of::<GcFunction>() + extra
    }
}

pub struct GcUpvalue {
    pub header: GcHeader,
    pub state: UpvalueState,
}

pub struct GcUserdata {
    pub header: GcHeader,
    pub metatable: Option<TableId>,
    pub env: Option<TableId>,
    pub data: Box<dyn Any>,
}

/// The running thread's state is checked out into the VM; its slot holds
/// `None` until it stops running.
pub struct GcThread {
    pub header: GcHeader,
    pub status: ThreadStatus,
    pub state: Option<Box<LuaState>>,
}

// ============ Arena Storage ============

/// Type-safe arena for storing GC objects.
/// Free list enables O(1) allocation after initial growth.
pub struct Arena<T> {
    storage: Vec<Option<T>>,
    free_list: Vec<u32>,
    count: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    #[inline]
    pub fn new() -> Self {
        Self {
            storage: Vec::new(),
            free_list: Vec::new(),
            count: 0,
        }
    }

    #[inline]
    pub fn alloc(&mut self, value: T) -> u32 {
        self.count += 1;
        if let Some(free_id) = self.free_list.pop() {
            self.storage[free_id as usize] = Some(value);
            free_id
        } else {
            let id = self.storage.len() as u32;
            self.storage.push(Some(value));
            id
        }
    }

    #[inline(always)]
    pub fn get(&self, id: u32) -> Option<&T> {
        self.storage.get(id as usize).and_then(|opt| opt.as_ref())
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.storage.get_mut(id as usize).and_then(|opt| opt.as_mut())
    }

    #[inline]
    pub fn free(&mut self, id: u32) -> Option<T> {
        let slot = self.storage.get_mut(id as usize)?;
        let value = slot.take()?;
        self.free_list.push(id);
        self.count -= 1;
        Some(value)
    }

    #[inline]
    pub fn is_valid(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    /// Number of live objects
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of slots, live or free (sweep cursor bound)
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.storage.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.storage
            .iter()
            .enumerate()
            .filter_map(|(i, opt)| opt.as_ref().map(|v| (i as u32, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.storage
            .iter_mut()
            .enumerate()
            .filter_map(|(i, opt)| opt.as_mut().map(|v| (i as u32, v)))
    }

    pub fn clear(&mut self) {
        self.storage.clear();
        self.free_list.clear();
        self.count = 0;
    }
}

// ============ Object Pool ============

#[derive(Default)]
pub struct ObjectPool {
    pub strings: Arena<GcString>,
    pub tables: Arena<GcTable>,
    pub functions: Arena<GcFunction>,
    pub upvalues: Arena<GcUpvalue>,
    pub userdata: Arena<GcUserdata>,
    pub threads: Arena<GcThread>,
    pub(crate) interner: StringInterner,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Allocation ====================
    // Each returns the new ID and the number of bytes to charge

    pub fn create_string(&mut self, bytes: &[u8], white: GcColor, other_white: GcColor) -> (StringId, usize) {
        self.interner
            .intern(bytes, &mut self.strings, white, other_white)
    }

    pub fn create_table(&mut self, narray: usize, nhash: usize, white: GcColor) -> (TableId, usize) {
        let data = LuaTable::new(narray, nhash);
        let charged = data.mem_size();
        let id = self.tables.alloc(GcTable {
            header: GcHeader::new(white),
            data,
            charged,
        });
        (TableId(id), charged)
    }

    pub fn create_function(&mut self, kind: FunctionKind, env: TableId, white: GcColor) -> (FunctionId, usize) {
        let func = GcFunction {
            header: GcHeader::new(white),
            env,
            kind,
        };
        let size = func.size();
        (FunctionId(self.functions.alloc(func)), size)
    }

    pub fn create_upvalue(&mut self, state: UpvalueState, white: GcColor) -> (UpvalueId, usize) {
        let id = self.upvalues.alloc(GcUpvalue {
            header: GcHeader::new(white),
            state,
        });
        (UpvalueId(id), std::mem::size_of::<GcUpvalue>())
    }

    pub fn create_userdata(&mut self, data: Box<dyn Any>, env: Option<TableId>, white: GcColor) -> (UserdataId, usize) {
        let size = std::mem::size_of::<GcUserdata>() + std::mem::size_of_val(&*data);
        let id = self.userdata.alloc(GcUserdata {
            header: GcHeader::new(white),
            metatable: None,
            env,
            data,
        });
        (UserdataId(id), size)
    }

    pub fn create_thread(&mut self, state: LuaState, white: GcColor) -> (ThreadId, usize) {
        let size = std::mem::size_of::<GcThread>() + state.mem_size();
        let id = self.threads.alloc(GcThread {
            header: GcHeader::new(white),
            status: ThreadStatus::Suspended,
            state: Some(Box::new(state)),
        });
        (ThreadId(id), size)
    }

    // ==================== Access ====================

    /// Bytes of a live string, empty for a stale handle
    #[inline]
    pub fn string_bytes(&self, id: StringId) -> &[u8] {
        self.strings.get(id.0).map(|s| s.as_bytes()).unwrap_or(&[])
    }

    #[inline(always)]
    pub fn get_table(&self, id: TableId) -> Option<&LuaTable> {
        self.tables.get(id.0).map(|t| &t.data)
    }

    #[inline(always)]
    pub fn get_function(&self, id: FunctionId) -> Option<&GcFunction> {
        self.functions.get(id.0)
    }

    #[inline(always)]
    pub fn get_upvalue(&self, id: UpvalueId) -> Option<&GcUpvalue> {
        self.upvalues.get(id.0)
    }

    #[inline(always)]
    pub fn get_userdata(&self, id: UserdataId) -> Option<&GcUserdata> {
        self.userdata.get(id.0)
    }

    #[inline(always)]
    pub fn get_thread(&self, id: ThreadId) -> Option<&GcThread> {
        self.threads.get(id.0)
    }

    #[inline(always)]
    pub fn get_thread_mut(&mut self, id: ThreadId) -> Option<&mut GcThread> {
        self.threads.get_mut(id.0)
    }

    /// Live object count across all arenas
    pub fn object_count(&self) -> usize {
        self.strings.len()
            + self.tables.len()
            + self.functions.len()
            + self.upvalues.len()
            + self.userdata.len()
            + self.threads.len()
    }

    pub fn clear(&mut self) {
        self.threads.clear();
        self.userdata.clear();
        self.upvalues.clear();
        self.functions.clear();
        self.tables.clear();
        self.strings.clear();
        self.interner = StringInterner::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_reuses_freed_slots() {
        let mut arena: Arena<i32> = Arena::new();
        let a = arena.alloc(1);
        let b = arena.alloc(2);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.free(a), Some(1));
        assert!(!arena.is_valid(a));
        let c = arena.alloc(3);
        assert_eq!(c, a);
        assert_eq!(arena.get(b), Some(&2));
        assert_eq!(arena.iter().count(), 2);
    }

    #[test]
    fn test_string_interning() {
        let mut pool = ObjectPool::new();
        let (s1, size) = pool.create_string(b"hello", GcColor::White0, GcColor::White1);
        let (s2, again) = pool.create_string(b"hello", GcColor::White0, GcColor::White1);
        let (s3, _) = pool.create_string(b"world", GcColor::White0, GcColor::White1);
        assert_eq!(s1, s2);
        assert_ne!(s1, s3);
        assert!(size > 0);
        assert_eq!(again, 0);
        assert_eq!(pool.string_bytes(s3), b"world");
    }
}
