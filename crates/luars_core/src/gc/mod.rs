// Garbage Collector
//
// Incremental tri-color mark & sweep following Lua 5.1's lgc.c, over typed
// arenas instead of an intrusive object list.
//
// GC States:
// - Pause: between cycles; the next step marks the roots
// - Propagate: gray objects are blackened one at a time; when the gray list
//   runs dry the atomic phase re-marks what mutators touched and flips white
// - SweepString: frees dead strings from the string arena
// - Sweep: frees dead tables, functions, upvalues, userdata and threads
//
// Tri-color invariant: a black object never points to a white one. Mutators
// keep it through the write barriers at the bottom of this file.
//
// Two whites alternate between cycles. After the flip, objects still carrying
// the previous white are dead; everything else is reset to the new white as
// the sweep passes over it.

mod gc_id;
mod object_pool;
mod string_interner;

pub use gc_id::*;
pub use object_pool::*;
pub use string_interner::StringInterner;

use crate::lua_value::{Chunk, FunctionKind, LuaValue, NUM_TAGS, UpvalueState};
use crate::lua_vm::LuaState;
use crate::lua_vm::lua_limits::{GCSTEPSIZE, GCSWEEPCOST, GCSWEEPMAX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcColor {
    White0,
    White1,
    Gray,
    Black,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    Pause,
    Propagate,
    SweepString,
    Sweep,
}

/// Root set handed to every collector entry point
pub struct GcRoots<'a> {
    /// State of the running thread (checked out of its arena slot)
    pub running: &'a LuaState,
    pub running_id: ThreadId,
    pub main_thread: ThreadId,
    /// Threads waiting in `resume` for the running one
    pub resumers: &'a [ThreadId],
    pub registry: TableId,
    pub type_metatables: &'a [Option<TableId>; NUM_TAGS],
    /// Interned "__mode", for weak tables
    pub mode_name: StringId,
}

#[derive(Debug, Default, Clone)]
pub struct GcStats {
    pub cycles: usize,
    pub objects_freed: usize,
    pub bytes_freed: usize,
}

/// Sweep order of the non-string arenas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepKind {
    Tables,
    Functions,
    Upvalues,
    Userdata,
    Threads,
}

pub struct GC {
    pub(crate) state: GcState,
    pub(crate) current_white: GcColor,
    gray: Vec<GcId>,
    grayagain: Vec<GcId>,
    /// Weak tables met during propagation, with (weak keys, weak values)
    weak: Vec<(TableId, bool, bool)>,
    sweep_kind: SweepKind,
    sweep_pos: usize,
    pub(crate) total_bytes: usize,
    pub(crate) threshold: usize,
    estimate: usize,
    debt: usize,
    pub(crate) pause: usize,
    pub(crate) stepmul: usize,
    scratch: Vec<LuaValue>,
    stats: GcStats,
}

impl GC {
    pub fn new(pause: usize, stepmul: usize) -> Self {
        GC {
            state: GcState::Pause,
            current_white: GcColor::White0,
            gray: Vec::new(),
            grayagain: Vec::new(),
            weak: Vec::new(),
            sweep_kind: SweepKind::Tables,
            sweep_pos: 0,
            total_bytes: 0,
            threshold: usize::MAX,
            estimate: 0,
            debt: 0,
            pause,
            stepmul,
            scratch: Vec::new(),
            stats: GcStats::default(),
        }
    }

    #[inline(always)]
    pub fn current_white(&self) -> GcColor {
        self.current_white
    }

    #[inline(always)]
    pub fn other_white(&self) -> GcColor {
        match self.current_white {
            GcColor::White0 => GcColor::White1,
            _ => GcColor::White0,
        }
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    // ============ Accounting ============

    #[inline(always)]
    pub fn charge(&mut self, bytes: usize) {
        self.total_bytes += bytes;
    }

    #[inline(always)]
    pub fn release(&mut self, bytes: usize) {
        self.total_bytes = self.total_bytes.saturating_sub(bytes);
    }

    #[inline(always)]
    pub fn should_step(&self) -> bool {
        self.total_bytes >= self.threshold
    }

    /// setthreshold: next cycle starts when memory reaches pause% of the
    /// live estimate
    pub fn set_threshold(&mut self) {
        self.threshold = (self.estimate / 100).saturating_mul(self.pause);
    }

    pub fn stop(&mut self) {
        self.threshold = usize::MAX;
    }

    pub fn restart(&mut self) {
        self.threshold = self.total_bytes;
    }

    /// Threshold set at VM creation (4 * initial heap, as lua_newstate)
    pub fn start(&mut self) {
        self.estimate = self.total_bytes;
        self.threshold = self.total_bytes.saturating_mul(4);
    }

    // ============ Driving ============

    /// luaC_step: work proportional to the allocation since the last step
    pub fn step(&mut self, pool: &mut ObjectPool, roots: &GcRoots) {
        let mut lim = (GCSTEPSIZE / 100) * self.stepmul;
        if lim == 0 {
            lim = usize::MAX / 2;
        }
        self.debt += self.total_bytes.saturating_sub(self.threshold);
        loop {
            let work = self.single_step(pool, roots);
            if self.state == GcState::Pause {
                break;
            }
            lim = lim.saturating_sub(work);
            if lim == 0 {
                break;
            }
        }
        if self.state != GcState::Pause {
            if self.debt < GCSTEPSIZE {
                self.threshold = self.total_bytes + GCSTEPSIZE;
            } else {
                self.debt -= GCSTEPSIZE;
                self.threshold = self.total_bytes;
            }
        } else {
            self.set_threshold();
        }
    }

    /// Step until the current cycle ends. Returns true when a cycle finished.
    pub fn step_cycle_units(&mut self, pool: &mut ObjectPool, roots: &GcRoots, kbytes: usize) -> bool {
        let a = kbytes << 10;
        self.threshold = self.total_bytes.saturating_sub(a);
        while self.threshold <= self.total_bytes {
            self.step(pool, roots);
            if self.state == GcState::Pause {
                return true;
            }
        }
        false
    }

    /// luaC_fullgc
    pub fn full_collect(&mut self, pool: &mut ObjectPool, roots: &GcRoots) {
        let before = self.total_bytes;
        if matches!(self.state, GcState::Pause | GcState::Propagate) {
            // Abandon the mark; sweeping now keeps everything but resets colors
            self.gray.clear();
            self.grayagain.clear();
            self.weak.clear();
            self.enter_sweep();
        }
        while self.state != GcState::Pause {
            self.single_step(pool, roots);
        }
        self.mark_root(pool, roots);
        while self.state != GcState::Pause {
            self.single_step(pool, roots);
        }
        self.set_threshold();
        tracing::debug!(
            before,
            after = self.total_bytes,
            threshold = self.threshold,
            "full garbage collection"
        );
    }

    /// One unit of collector work (singlestep)
    pub(crate) fn single_step(&mut self, pool: &mut ObjectPool, roots: &GcRoots) -> usize {
        match self.state {
            GcState::Pause => {
                self.mark_root(pool, roots);
                0
            }
            GcState::Propagate => match self.gray.pop() {
                Some(id) => self.propagate_mark(pool, roots, id),
                None => {
                    self.atomic(pool, roots);
                    0
                }
            },
            GcState::SweepString => {
                let old = self.total_bytes;
                if self.sweep_strings(pool) {
                    self.sweep_kind = SweepKind::Tables;
                    self.sweep_pos = 0;
                    self.state = GcState::Sweep;
                    tracing::trace!("gc: sweep objects");
                }
                self.estimate = self.estimate.saturating_sub(old - self.total_bytes);
                GCSWEEPCOST
            }
            GcState::Sweep => {
                let old = self.total_bytes;
                if self.sweep_objects(pool) {
                    self.finish_cycle();
                }
                self.estimate = self.estimate.saturating_sub(old - self.total_bytes);
                GCSWEEPMAX * GCSWEEPCOST
            }
        }
    }

    fn finish_cycle(&mut self) {
        self.state = GcState::Pause;
        self.debt = 0;
        self.stats.cycles += 1;
        tracing::debug!(
            cycle = self.stats.cycles,
            total_bytes = self.total_bytes,
            estimate = self.estimate,
            objects_freed = self.stats.objects_freed,
            "gc cycle finished"
        );
    }

    // ============ Mark ============

    fn mark_root(&mut self, pool: &mut ObjectPool, roots: &GcRoots) {
        self.gray.clear();
        self.grayagain.clear();
        self.weak.clear();
        self.mark_object(pool, GcId::Thread(roots.main_thread));
        self.mark_object(pool, GcId::Thread(roots.running_id));
        for th in roots.resumers {
            self.mark_object(pool, GcId::Thread(*th));
        }
        self.mark_object(pool, GcId::Table(roots.registry));
        self.mark_metatables(pool, roots);
        self.state = GcState::Propagate;
        tracing::trace!("gc: propagate");
    }

    fn mark_metatables(&mut self, pool: &mut ObjectPool, roots: &GcRoots) {
        for mt in roots.type_metatables.iter().flatten() {
            self.mark_object(pool, GcId::Table(*mt));
        }
    }

    #[inline]
    pub fn mark_value(&mut self, pool: &mut ObjectPool, value: &LuaValue) {
        if let Some(id) = value.gc_id() {
            self.mark_object(pool, id);
        }
    }

    /// reallymarkobject: white objects become gray (or black when they
    /// have no children to traverse later)
    fn mark_object(&mut self, pool: &mut ObjectPool, id: GcId) {
        match id {
            GcId::String(s) => {
                if let Some(s) = pool.strings.get_mut(s.0)
                    && s.header.is_white()
                {
                    s.header.color = GcColor::Black;
                }
            }
            GcId::Table(t) => {
                if let Some(t) = pool.tables.get_mut(t.0)
                    && t.header.is_white()
                {
                    t.header.color = GcColor::Gray;
                    self.gray.push(id);
                }
            }
            GcId::Function(f) => {
                if let Some(f) = pool.functions.get_mut(f.0)
                    && f.header.is_white()
                {
                    f.header.color = GcColor::Gray;
                    self.gray.push(id);
                }
            }
            GcId::Thread(th) => {
                if let Some(th) = pool.threads.get_mut(th.0)
                    && th.header.is_white()
                {
                    th.header.color = GcColor::Gray;
                    self.gray.push(id);
                }
            }
            GcId::Userdata(u) => {
                let Some(ud) = pool.userdata.get_mut(u.0) else {
                    return;
                };
                if !ud.header.is_white() {
                    return;
                }
                ud.header.color = GcColor::Black;
                let (mt, env) = (ud.metatable, ud.env);
                for t in [mt, env].into_iter().flatten() {
                    self.mark_object(pool, GcId::Table(t));
                }
            }
            GcId::Upvalue(_) => {
                // Upvalues are marked through `mark_upvalue`, which can see
                // the stack an open upvalue points into
            }
        }
    }

    /// Closed upvalues turn black; open ones stay gray so the atomic phase
    /// re-reads their stack slot
    fn mark_upvalue(&mut self, pool: &mut ObjectPool, roots: &GcRoots, id: UpvalueId) {
        let Some(uv) = pool.upvalues.get_mut(id.0) else {
            return;
        };
        if !uv.header.is_white() {
            return;
        }
        let state = uv.state;
        match state {
            UpvalueState::Closed(v) => {
                uv.header.color = GcColor::Black;
                self.mark_value(pool, &v);
            }
            UpvalueState::Open {
                thread,
                stack_index,
            } => {
                uv.header.color = GcColor::Gray;
                let v = open_upvalue_value(pool, roots, thread, stack_index);
                self.mark_value(pool, &v);
            }
        }
    }

    /// Blacken one gray object; returns the work done
    fn propagate_mark(&mut self, pool: &mut ObjectPool, roots: &GcRoots, id: GcId) -> usize {
        match id {
            GcId::Table(t) => self.traverse_table(pool, roots, t),
            GcId::Function(f) => self.traverse_function(pool, roots, f),
            GcId::Thread(th) => self.traverse_thread(pool, roots, th),
            _ => 0,
        }
    }

    fn propagate_all(&mut self, pool: &mut ObjectPool, roots: &GcRoots) {
        while let Some(id) = self.gray.pop() {
            self.propagate_mark(pool, roots, id);
        }
    }

    fn weak_mode(pool: &ObjectPool, roots: &GcRoots, mt: Option<TableId>) -> (bool, bool) {
        let Some(mode) = mt
            .and_then(|mt| pool.get_table(mt))
            .map(|mt| mt.raw_get(&LuaValue::String(roots.mode_name)))
            .and_then(|v| v.as_string_id())
        else {
            return (false, false);
        };
        let bytes = pool.string_bytes(mode);
        (bytes.contains(&b'k'), bytes.contains(&b'v'))
    }

    fn traverse_table(&mut self, pool: &mut ObjectPool, roots: &GcRoots, id: TableId) -> usize {
        let mut children = std::mem::take(&mut self.scratch);
        children.clear();
        let Some(t) = pool.tables.get_mut(id.0) else {
            self.scratch = children;
            return 0;
        };
        t.header.color = GcColor::Black;
        let mt = t.data.get_metatable();
        let size = t.charged;

        let (weak_keys, weak_values) = Self::weak_mode(pool, roots, mt);
        if weak_keys || weak_values {
            if let Some(t) = pool.tables.get_mut(id.0) {
                t.header.color = GcColor::Gray;
            }
            self.weak.push((id, weak_keys, weak_values));
        }
        if let Some(t) = pool.get_table(id) {
            for (k, v) in t.iter() {
                if !weak_keys {
                    children.push(k);
                }
                if !weak_values {
                    children.push(v);
                }
            }
        }
        if let Some(mt) = mt {
            self.mark_object(pool, GcId::Table(mt));
        }
        for v in children.iter() {
            self.mark_value(pool, v);
        }
        self.scratch = children;
        size
    }

    fn traverse_function(&mut self, pool: &mut ObjectPool, roots: &GcRoots, id: FunctionId) -> usize {
        let Some(f) = pool.functions.get_mut(id.0) else {
            return 0;
        };
        f.header.color = GcColor::Black;
        let size = f.size();
        let env = f.env;

        let mut children = std::mem::take(&mut self.scratch);
        children.clear();
        let mut upvalues = Vec::new();
        match &f.kind {
            FunctionKind::Lua { chunk, upvalues: uvs } => {
                collect_chunk_constants(chunk, &mut children);
                upvalues.extend_from_slice(uvs);
            }
            FunctionKind::Native { upvalues: values, .. } => {
                children.extend_from_slice(values);
            }
        }

        self.mark_object(pool, GcId::Table(env));
        for v in children.iter() {
            self.mark_value(pool, v);
        }
        for uv in upvalues {
            self.mark_upvalue(pool, roots, uv);
        }
        self.scratch = children;
        size
    }

    /// Threads stay gray and are traversed again in the atomic phase, since
    /// stack writes issue no barrier
    fn traverse_thread(&mut self, pool: &mut ObjectPool, roots: &GcRoots, id: ThreadId) -> usize {
        let Some(th) = pool.threads.get_mut(id.0) else {
            return 0;
        };
        th.header.color = GcColor::Gray;
        self.grayagain.push(GcId::Thread(id));

        let mut children = std::mem::take(&mut self.scratch);
        children.clear();
        let mut open = Vec::new();
        let state: &LuaState = match th.state.as_deref() {
            Some(state) => state,
            None => roots.running,
        };
        // at host level nothing above the top is live
        let limit = if state.is_idle() {
            state.top.min(state.stack.len())
        } else {
            state.live_limit()
        };
        children.extend_from_slice(&state.stack[..limit]);
        children.push(LuaValue::Table(state.globals));
        open.extend(state.open_upvalues.iter().map(|&(_, uv)| uv));
        let size = state.mem_size();

        for v in children.iter() {
            self.mark_value(pool, v);
        }
        for uv in open {
            self.mark_upvalue(pool, roots, uv);
        }
        self.scratch = children;
        size
    }

    /// Stop-the-world finish of the mark phase
    fn atomic(&mut self, pool: &mut ObjectPool, roots: &GcRoots) {
        tracing::trace!("gc: atomic");
        self.remark_upvalues(pool, roots);
        self.propagate_all(pool, roots);

        // Weak tables are traversed again: their strong parts may have grown
        let weak: Vec<_> = std::mem::take(&mut self.weak);
        for (t, _, _) in weak {
            self.gray.push(GcId::Table(t));
        }
        self.mark_object(pool, GcId::Thread(roots.running_id));
        self.traverse_thread(pool, roots, roots.running_id);
        for th in roots.resumers {
            self.mark_object(pool, GcId::Thread(*th));
        }
        self.mark_metatables(pool, roots);
        self.propagate_all(pool, roots);

        let again = std::mem::take(&mut self.grayagain);
        self.gray.extend(again);
        self.propagate_all(pool, roots);
        self.grayagain.clear();

        self.clear_weak_tables(pool);

        self.current_white = self.other_white();
        self.estimate = self.total_bytes;
        self.enter_sweep();
    }

    fn enter_sweep(&mut self) {
        self.sweep_pos = 0;
        self.sweep_kind = SweepKind::Tables;
        self.state = GcState::SweepString;
        tracing::trace!("gc: sweep strings");
    }

    /// Open upvalues that are still gray: mark what their slot holds now
    fn remark_upvalues(&mut self, pool: &mut ObjectPool, roots: &GcRoots) {
        let open: Vec<(ThreadId, usize)> = pool
            .upvalues
            .iter()
            .filter(|(_, uv)| uv.header.is_gray())
            .filter_map(|(_, uv)| match uv.state {
                UpvalueState::Open {
                    thread,
                    stack_index,
                } => Some((thread, stack_index)),
                UpvalueState::Closed(_) => None,
            })
            .collect();
        for (thread, idx) in open {
            let v = open_upvalue_value(pool, roots, thread, idx);
            self.mark_value(pool, &v);
        }
    }

    /// Remove entries whose weak key or value is about to be collected.
    /// Strings are values, never cleared: they get marked instead.
    fn clear_weak_tables(&mut self, pool: &mut ObjectPool) {
        let weak = std::mem::take(&mut self.weak);
        let ObjectPool {
            strings,
            tables,
            functions,
            userdata,
            threads,
            ..
        } = pool;
        for (id, _, _) in weak {
            let mut dead_tables = Vec::new();
            if let Some(t) = tables.get(id.0) {
                for (k, v) in t.data.iter() {
                    for x in [k, v] {
                        if let LuaValue::Table(tid) = x
                            && tables.get(tid.0).is_some_and(|o| o.header.is_white())
                        {
                            dead_tables.push(tid);
                        }
                    }
                }
            }
            let Some(t) = tables.get_mut(id.0) else {
                continue;
            };
            let mut cleared = |v: &LuaValue| -> bool {
                match *v {
                    LuaValue::String(s) => {
                        if let Some(s) = strings.get_mut(s.0) {
                            s.header.color = GcColor::Black;
                        }
                        false
                    }
                    LuaValue::Table(tid) => dead_tables.contains(&tid),
                    LuaValue::Function(f) => functions.get(f.0).is_some_and(|o| o.header.is_white()),
                    LuaValue::Userdata(u) => userdata.get(u.0).is_some_and(|o| o.header.is_white()),
                    LuaValue::Thread(th) => threads.get(th.0).is_some_and(|o| o.header.is_white()),
                    _ => false,
                }
            };
            t.data.retain(|k, v| !cleared(k) && !cleared(v));
        }
    }

    // ============ Sweep ============

    /// Sweeps a batch of string slots; true when the arena is done
    fn sweep_strings(&mut self, pool: &mut ObjectPool) -> bool {
        let dead = self.other_white();
        let white = self.current_white;
        let end = (self.sweep_pos + GCSWEEPMAX).min(pool.strings.slot_count());
        for i in self.sweep_pos..end {
            let i = i as u32;
            let Some(s) = pool.strings.get_mut(i) else {
                continue;
            };
            if s.header.color == dead && !s.header.fixed {
                if let Some(s) = pool.strings.free(i) {
                    pool.interner.remove(StringId(i), s.hash);
                    self.note_freed(s.size());
                }
            } else {
                s.header.color = white;
            }
        }
        self.sweep_pos = end;
        end >= pool.strings.slot_count()
    }

    fn note_freed(&mut self, bytes: usize) {
        self.release(bytes);
        self.stats.objects_freed += 1;
        self.stats.bytes_freed += bytes;
    }

    /// Sweeps a batch of object slots; true when every arena is done
    fn sweep_objects(&mut self, pool: &mut ObjectPool) -> bool {
        let dead = self.other_white();
        let white = self.current_white;
        let mut budget = GCSWEEPMAX;

        macro_rules! sweep_arena {
            ($arena:expr, $size:expr, $on_free:expr) => {{
                let slots = $arena.slot_count();
                while budget > 0 && self.sweep_pos < slots {
                    let i = self.sweep_pos as u32;
                    self.sweep_pos += 1;
                    budget -= 1;
                    let Some(obj) = $arena.get_mut(i) else {
                        continue;
                    };
                    if obj.header.color == dead && !obj.header.fixed {
                        if let Some(obj) = $arena.free(i) {
                            let bytes = $size(&obj);
                            #[allow(clippy::redundant_closure_call)]
                            $on_free(i, obj);
                            self.note_freed(bytes);
                        }
                    } else {
                        obj.header.color = white;
                    }
                }
                self.sweep_pos >= slots
            }};
        }

        loop {
            let done = match self.sweep_kind {
                SweepKind::Tables => {
                    sweep_arena!(pool.tables, |t: &GcTable| t.charged, |_, _| {})
                }
                SweepKind::Functions => {
                    sweep_arena!(pool.functions, |f: &GcFunction| f.size(), |_, _| {})
                }
                SweepKind::Upvalues => sweep_arena!(
                    pool.upvalues,
                    |_: &GcUpvalue| std::mem::size_of::<GcUpvalue>(),
                    |_, _| {}
                ),
                SweepKind::Userdata => sweep_arena!(
                    pool.userdata,
                    |u: &GcUserdata| std::mem::size_of::<GcUserdata>()
                        + std::mem::size_of_val(&*u.data),
                    |_, _| {}
                ),
                SweepKind::Threads => {
                    let mut freed = Vec::new();
                    let done = sweep_arena!(
                        pool.threads,
                        |th: &GcThread| std::mem::size_of::<GcThread>()
                            + th.state.as_ref().map_or(0, |s| s.mem_size()),
                        |i, th: GcThread| freed.push((ThreadId(i), th))
                    );
                    for (id, th) in freed {
                        close_dead_thread_upvalues(pool, id, th);
                    }
                    done
                }
            };
            if !done {
                return false;
            }
            self.sweep_pos = 0;
            self.sweep_kind = match self.sweep_kind {
                SweepKind::Tables => SweepKind::Functions,
                SweepKind::Functions => SweepKind::Upvalues,
                SweepKind::Upvalues => SweepKind::Userdata,
                SweepKind::Userdata => SweepKind::Threads,
                SweepKind::Threads => return true,
            };
            if budget == 0 {
                return false;
            }
        }
    }

    // ============ Barriers ============

    /// Forward barrier (luaC_barrierf): `container` now references `value`.
    /// While marking, the value is marked at once; while sweeping, the
    /// container goes back to white so the sweep does not see a black object
    /// pointing at a white one.
    pub fn barrier(&mut self, pool: &mut ObjectPool, container: GcId, value: &LuaValue) {
        if !self.is_black(pool, container) || !self.is_white_value(pool, value) {
            return;
        }
        if self.state == GcState::Propagate {
            self.mark_value(pool, value);
        } else {
            let white = self.current_white;
            if let Some(h) = header_mut(pool, container) {
                h.color = white;
            }
        }
    }

    /// Backward barrier for tables (luaC_barrierback): a black table that
    /// receives a white key or value turns gray again and is revisited in the
    /// atomic phase.
    pub fn barrier_back(&mut self, pool: &mut ObjectPool, table: TableId, value: &LuaValue) {
        if !self.is_white_value(pool, value) {
            return;
        }
        if let Some(t) = pool.tables.get_mut(table.0)
            && t.header.is_black()
        {
            t.header.color = GcColor::Gray;
            self.grayagain.push(GcId::Table(table));
        }
    }

    /// Closing an upvalue while it is gray (luaC_linkupval)
    pub fn upvalue_closed(&mut self, pool: &mut ObjectPool, id: UpvalueId) {
        let Some(uv) = pool.upvalues.get_mut(id.0) else {
            return;
        };
        if !uv.header.is_gray() {
            return;
        }
        if self.state == GcState::Propagate {
            uv.header.color = GcColor::Black;
            if let UpvalueState::Closed(v) = uv.state {
                self.mark_value(pool, &v);
            }
        } else {
            uv.header.color = self.current_white;
        }
    }

    fn is_black(&self, pool: &ObjectPool, id: GcId) -> bool {
        header(pool, id).is_some_and(|h| h.is_black())
    }

    fn is_white_value(&self, pool: &ObjectPool, v: &LuaValue) -> bool {
        v.gc_id()
            .and_then(|id| header(pool, id))
            .is_some_and(|h| h.is_white())
    }

    /// Mark an object as never collectable
    pub fn fix(&mut self, pool: &mut ObjectPool, id: GcId) {
        if let Some(h) = header_mut(pool, id) {
            h.fixed = true;
        }
    }
}

fn header(pool: &ObjectPool, id: GcId) -> Option<&GcHeader> {
    match id {
        GcId::String(i) => pool.strings.get(i.0).map(|o| &o.header),
        GcId::Table(i) => pool.tables.get(i.0).map(|o| &o.header),
        GcId::Function(i) => pool.functions.get(i.0).map(|o| &o.header),
        GcId::Upvalue(i) => pool.upvalues.get(i.0).map(|o| &o.header),
        GcId::Userdata(i) => pool.userdata.get(i.0).map(|o| &o.header),
        GcId::Thread(i) => pool.threads.get(i.0).map(|o| &o.header),
    }
}

fn header_mut(pool: &mut ObjectPool, id: GcId) -> Option<&mut GcHeader> {
    match id {
        GcId::String(i) => pool.strings.get_mut(i.0).map(|o| &mut o.header),
        GcId::Table(i) => pool.tables.get_mut(i.0).map(|o| &mut o.header),
        GcId::Function(i) => pool.functions.get_mut(i.0).map(|o| &mut o.header),
        GcId::Upvalue(i) => pool.upvalues.get_mut(i.0).map(|o| &mut o.header),
        GcId::Userdata(i) => pool.userdata.get_mut(i.0).map(|o| &mut o.header),
        GcId::Thread(i) => pool.threads.get_mut(i.0).map(|o| &mut o.header),
    }
}

/// Current value of an open upvalue, wherever its thread's stack lives
fn open_upvalue_value(pool: &ObjectPool, roots: &GcRoots, thread: ThreadId, idx: usize) -> LuaValue {
    if thread == roots.running_id {
        return roots.running.get(idx);
    }
    pool.get_thread(thread)
        .and_then(|th| th.state.as_ref())
        .map(|s| s.get(idx))
        .unwrap_or(LuaValue::Nil)
}

/// String constants of a prototype and all nested prototypes
fn collect_chunk_constants(chunk: &Chunk, out: &mut Vec<LuaValue>) {
    out.extend(chunk.constants.iter().filter(|k| k.is_string()).copied());
    for child in &chunk.child_protos {
        collect_chunk_constants(child, out);
    }
}

/// A collected thread may still own open upvalues that live closures use:
/// close them over the values left in its stack (luaE_freethread)
fn close_dead_thread_upvalues(pool: &mut ObjectPool, id: ThreadId, th: GcThread) {
    let Some(state) = th.state else {
        return;
    };
    for &(idx, uv) in &state.open_upvalues {
        if let Some(uv) = pool.upvalues.get_mut(uv.0)
            && matches!(uv.state, UpvalueState::Open { thread, stack_index } if thread == id && stack_index == idx)
        {
            uv.state = UpvalueState::Closed(state.get(idx));
        }
    }
}
