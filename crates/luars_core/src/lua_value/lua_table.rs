// Lua 5.1 table (ltable.c)
// - Array part for integer keys [1..array.len()]
// - Hash part: power-of-two node vector, collisions chained through `next`
//   with Brent's variation (a colliding node that is not in its main position
//   is moved out of the way)
// - Array/hash split recomputed only on rehash, when the hash part is full
//
// Tables never see nil or NaN keys: the barrier-issuing wrappers in the
// global state reject them before calling `raw_set`.

use super::LuaValue;
use crate::gc::TableId;
use crate::lua_vm::lua_limits::{MAXABITS, MAXASIZE};

/// Hash node. A node whose value is nil but whose key is not is "dead": it
/// stays linked so `next` can continue an iteration that removed it.
#[derive(Clone, Copy, Debug, Default)]
struct Node {
    key: LuaValue,
    value: LuaValue,
    /// Index of next node in chain, or -1 if end of chain
    next: i32,
}

#[derive(Debug, Default)]
pub struct LuaTable {
    array: Vec<LuaValue>,
    node: Vec<Node>,
    /// All positions at or above this index have been handed out
    last_free: usize,
    metatable: Option<TableId>,
}

/// Returned by `next` when the key is not present in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidNextKey;

impl LuaTable {
    pub fn new(narray: usize, nhash: usize) -> Self {
        let mut t = LuaTable::default();
        t.array.resize(narray, LuaValue::Nil);
        t.set_node_vector(nhash);
        t
    }

    #[inline]
    pub fn get_metatable(&self) -> Option<TableId> {
        self.metatable
    }

    #[inline]
    pub(crate) fn set_metatable(&mut self, mt: Option<TableId>) {
        self.metatable = mt;
    }

    #[inline]
    pub fn array_size(&self) -> usize {
        self.array.len()
    }

    #[inline]
    pub fn hash_size(&self) -> usize {
        self.node.len()
    }

    /// Approximate heap footprint, used for GC accounting
    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<LuaTable>()
            + self.array.capacity() * std::mem::size_of::<LuaValue>()
            + self.node.capacity() * std::mem::size_of::<Node>()
    }

    // ============ Lookup ============

    #[inline(always)]
    pub fn get_int(&self, key: i64) -> LuaValue {
        if key >= 1 && (key as u64) <= self.array.len() as u64 {
            return self.array[(key - 1) as usize];
        }
        self.get_from_hash(&LuaValue::Number(key as f64))
    }

    /// Generic raw lookup, absent keys read as nil
    pub fn raw_get(&self, key: &LuaValue) -> LuaValue {
        match key {
            LuaValue::Nil => LuaValue::Nil,
            LuaValue::Number(n) => match key.as_integer_key() {
                Some(i) => self.get_int(i),
                None if n.is_nan() => LuaValue::Nil,
                None => self.get_from_hash(key),
            },
            _ => self.get_from_hash(key),
        }
    }

    fn get_from_hash(&self, key: &LuaValue) -> LuaValue {
        match self.find_node(key) {
            Some(idx) => self.node[idx].value,
            None => LuaValue::Nil,
        }
    }

    fn find_node(&self, key: &LuaValue) -> Option<usize> {
        if self.node.is_empty() {
            return None;
        }
        let mut idx = self.main_position(key);
        loop {
            let node = &self.node[idx];
            if node.key == *key {
                return Some(idx);
            }
            if node.next < 0 {
                return None;
            }
            idx = node.next as usize;
        }
    }

    #[inline]
    fn main_position(&self, key: &LuaValue) -> usize {
        (hash_key(key) as usize) & (self.node.len() - 1)
    }

    // ============ Update ============

    /// Raw store. Key must be neither nil nor NaN.
    pub(crate) fn raw_set(&mut self, key: LuaValue, value: LuaValue) {
        debug_assert!(!key.is_nil());
        if let Some(i) = key.as_integer_key() {
            self.set_int(i, value);
            return;
        }
        self.set_in_hash(key, value);
    }

    pub(crate) fn set_int(&mut self, key: i64, value: LuaValue) {
        if key >= 1 && (key as u64) <= self.array.len() as u64 {
            self.array[(key - 1) as usize] = value;
            return;
        }
        self.set_in_hash(LuaValue::Number(key as f64), value);
    }

    fn set_in_hash(&mut self, key: LuaValue, value: LuaValue) {
        if let Some(idx) = self.find_node(&key) {
            self.node[idx].value = value;
            return;
        }
        if value.is_nil() {
            return;
        }
        self.new_key(key, value);
    }

    /// Insert a key that is not present. If its main position is taken, the
    /// colliding node either moves to a free slot (when it is not in its own
    /// main position) or the new key goes to the free slot.
    fn new_key(&mut self, key: LuaValue, value: LuaValue) {
        if self.node.is_empty() {
            self.rehash(&key);
            self.raw_set(key, value);
            return;
        }

        let mut mp = self.main_position(&key);
        if !self.node[mp].value.is_nil() {
            let Some(free) = self.get_free_pos() else {
                self.rehash(&key);
                self.raw_set(key, value);
                return;
            };
            let mut other = self.main_position(&self.node[mp].key);
            if other != mp {
                // Colliding node is out of its main position: move it
                while self.node[other].next != mp as i32 {
                    other = self.node[other].next as usize;
                }
                self.node[other].next = free as i32;
                self.node[free] = self.node[mp];
                self.node[mp].next = -1;
                self.node[mp].value = LuaValue::Nil;
            } else {
                // Colliding node is in its main position: chain the new one
                self.node[free].next = self.node[mp].next;
                self.node[mp].next = free as i32;
                mp = free;
            }
        }
        self.node[mp].key = key;
        self.node[mp].value = value;
    }

    fn get_free_pos(&mut self) -> Option<usize> {
        while self.last_free > 0 {
            self.last_free -= 1;
            if self.node[self.last_free].key.is_nil() {
                return Some(self.last_free);
            }
        }
        None
    }

    // ============ Rehash ============

    fn set_node_vector(&mut self, size: usize) {
        if size == 0 {
            self.node = Vec::new();
            self.last_free = 0;
            return;
        }
        let size = size.next_power_of_two();
        self.node = vec![
            Node {
                key: LuaValue::Nil,
                value: LuaValue::Nil,
                next: -1,
            };
            size
        ];
        self.last_free = size;
    }

    /// Pick new sizes for both parts, counting `extra_key` as present
    fn rehash(&mut self, extra_key: &LuaValue) {
        let mut nums = [0usize; MAXABITS + 1];
        let mut na = self.num_use_array(&mut nums);
        let mut total = na;
        total += self.num_use_hash(&mut nums, &mut na);
        na += count_int(extra_key, &mut nums);
        total += 1;
        let (array_size, array_used) = compute_sizes(&nums, na);
        self.resize(array_size, total - array_used);
    }

    fn num_use_array(&self, nums: &mut [usize]) -> usize {
        let mut total = 0;
        let mut i = 1usize;
        let mut ttlg = 1usize;
        for lg in 0..=MAXABITS {
            let mut lc = 0;
            let lim = ttlg.min(self.array.len());
            if i > lim {
                break;
            }
            while i <= lim {
                if !self.array[i - 1].is_nil() {
                    lc += 1;
                }
                i += 1;
            }
            nums[lg] += lc;
            total += lc;
            ttlg *= 2;
        }
        total
    }

    fn num_use_hash(&self, nums: &mut [usize], na: &mut usize) -> usize {
        let mut total = 0;
        for node in self.node.iter().filter(|n| !n.value.is_nil()) {
            *na += count_int(&node.key, nums);
            total += 1;
        }
        total
    }

    pub(crate) fn resize(&mut self, array_size: usize, hash_size: usize) {
        let old_array_size = self.array.len();
        let old_nodes = std::mem::take(&mut self.node);

        if array_size > old_array_size {
            self.array.resize(array_size, LuaValue::Nil);
        }
        self.set_node_vector(hash_size);

        if array_size < old_array_size {
            let vanishing: Vec<LuaValue> = self.array.drain(array_size..).collect();
            for (i, value) in vanishing.into_iter().enumerate() {
                if !value.is_nil() {
                    let key = (array_size + i + 1) as f64;
                    self.set_in_hash(LuaValue::Number(key), value);
                }
            }
            self.array.shrink_to_fit();
        }

        for node in old_nodes.into_iter().rev() {
            if !node.value.is_nil() {
                self.raw_set(node.key, node.value);
            }
        }
    }

    // ============ Length / iteration ============

    /// A border: `t[n] ~= nil and t[n+1] == nil` (luaH_getn)
    pub fn len(&self) -> usize {
        let mut j = self.array.len();
        if j > 0 && self.array[j - 1].is_nil() {
            let mut i = 0;
            while j - i > 1 {
                let m = (i + j) / 2;
                if self.array[m - 1].is_nil() {
                    j = m;
                } else {
                    i = m;
                }
            }
            return i;
        }
        if self.node.is_empty() {
            return j;
        }
        self.unbound_search(j)
    }

    fn unbound_search(&self, start: usize) -> usize {
        let mut i = start as i64;
        let mut j = i + 1;
        while !self.get_int(j).is_nil() {
            i = j;
            if j > (i32::MAX as i64) / 2 {
                // Pathological table: linear scan
                let mut k = 1;
                while !self.get_int(k).is_nil() {
                    k += 1;
                }
                return (k - 1) as usize;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.get_int(m).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i as usize
    }

    pub fn is_empty(&self) -> bool {
        self.array.iter().all(|v| v.is_nil()) && self.node.iter().all(|n| n.value.is_nil())
    }

    /// Traversal order: array part, then hash part in node order
    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, InvalidNextKey> {
        let start = self.find_index(key)?;
        for i in start..self.array.len() {
            if !self.array[i].is_nil() {
                return Ok(Some((LuaValue::Number((i + 1) as f64), self.array[i])));
            }
        }
        let hash_start = start.saturating_sub(self.array.len());
        for node in self.node.iter().skip(hash_start) {
            if !node.value.is_nil() {
                return Ok(Some((node.key, node.value)));
            }
        }
        Ok(None)
    }

    /// Position right after `key` in traversal order
    fn find_index(&self, key: &LuaValue) -> Result<usize, InvalidNextKey> {
        if key.is_nil() {
            return Ok(0);
        }
        if let Some(i) = key.as_integer_key()
            && i >= 1
            && (i as u64) <= self.array.len() as u64
        {
            return Ok(i as usize);
        }
        match self.find_node(key) {
            Some(idx) => Ok(self.array.len() + idx + 1),
            None => Err(InvalidNextKey),
        }
    }

    // ============ Collector access ============

    /// Live entries of both parts
    pub fn iter(&self) -> impl Iterator<Item = (LuaValue, LuaValue)> + '_ {
        let array = self
            .array
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
            .map(|(i, v)| (LuaValue::Number((i + 1) as f64), *v));
        let hash = self
            .node
            .iter()
            .filter(|n| !n.value.is_nil())
            .map(|n| (n.key, n.value));
        array.chain(hash)
    }

    /// Remove every entry for which `keep` returns false. Removed hash
    /// entries become dead nodes.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&LuaValue, &LuaValue) -> bool) {
        for (i, value) in self.array.iter_mut().enumerate() {
            if !value.is_nil() && !keep(&LuaValue::Number((i + 1) as f64), value) {
                *value = LuaValue::Nil;
            }
        }
        for node in self.node.iter_mut() {
            if !node.value.is_nil() && !keep(&node.key, &node.value) {
                node.value = LuaValue::Nil;
            }
        }
    }
}

/// Number of bits needed to hold `x - 1`, i.e. ceil(log2(x))
fn ceil_log2(x: usize) -> usize {
    debug_assert!(x > 0);
    (usize::BITS - (x - 1).leading_zeros()) as usize
}

fn count_int(key: &LuaValue, nums: &mut [usize]) -> usize {
    match key.as_integer_key() {
        Some(k) if k >= 1 && (k as u64) <= MAXASIZE as u64 => {
            nums[ceil_log2(k as usize)] += 1;
            1
        }
        _ => 0,
    }
}

/// Largest power of two `n` such that more than `n/2` of the slots
/// `1..=n` would be in use. Returns (n, keys going to the array).
fn compute_sizes(nums: &[usize], narray: usize) -> (usize, usize) {
    let mut a = 0;
    let mut na = 0;
    let mut n = 0;
    let mut twotoi = 1usize;
    for &count in nums.iter() {
        if twotoi / 2 >= narray {
            break;
        }
        if count > 0 {
            a += count;
            if a > twotoi / 2 {
                n = twotoi;
                na = a;
            }
        }
        twotoi *= 2;
    }
    debug_assert!(n == 0 || (n / 2 < na && na <= n));
    (n, na)
}

#[inline]
fn mix(x: u64) -> u64 {
    let x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    let x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Keys hash by payload. Strings are interned, so the handle identifies the
/// content while the string is alive.
fn hash_key(key: &LuaValue) -> u64 {
    match *key {
        LuaValue::Nil => 0,
        LuaValue::Boolean(b) => b as u64,
        // -0.0 and 0.0 are the same key
        LuaValue::Number(n) => mix(if n == 0.0 { 0 } else { n.to_bits() }),
        LuaValue::String(id) => mix(id.0 as u64 | (1 << 40)),
        LuaValue::Table(id) => mix(id.0 as u64 | (2 << 40)),
        LuaValue::Function(id) => mix(id.0 as u64 | (3 << 40)),
        LuaValue::Userdata(id) => mix(id.0 as u64 | (4 << 40)),
        LuaValue::Thread(id) => mix(id.0 as u64 | (5 << 40)),
        LuaValue::LightUserdata(p) => mix(p as u64 ^ (6 << 40)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::StringId;

    fn num(n: f64) -> LuaValue {
        LuaValue::Number(n)
    }

    #[test]
    fn test_sequence_goes_to_array() {
        let mut t = LuaTable::new(0, 0);
        for i in 1..=100 {
            t.raw_set(num(i as f64), num(i as f64 * 2.0));
        }
        assert!(t.array_size() >= 64);
        assert_eq!(t.len(), 100);
        for i in 1..=100 {
            assert_eq!(t.get_int(i), num(i as f64 * 2.0));
        }
    }

    #[test]
    fn test_sparse_keys_stay_in_hash() {
        let mut t = LuaTable::new(0, 0);
        t.raw_set(num(1.0), num(1.0));
        t.raw_set(num(1000.0), num(2.0));
        t.raw_set(num(1_000_000.0), num(3.0));
        assert!(t.array_size() <= 2);
        assert_eq!(t.raw_get(&num(1000.0)), num(2.0));
        assert_eq!(t.raw_get(&num(1_000_000.0)), num(3.0));
    }

    #[test]
    fn test_negative_zero_is_zero_key() {
        let mut t = LuaTable::new(0, 0);
        t.raw_set(num(0.0), num(7.0));
        assert_eq!(t.raw_get(&num(-0.0)), num(7.0));
    }

    #[test]
    fn test_nan_never_found() {
        let t = LuaTable::new(4, 4);
        assert!(t.raw_get(&num(f64::NAN)).is_nil());
    }

    #[test]
    fn test_rehash_keeps_all_entries() {
        let mut t = LuaTable::new(0, 0);
        let mut expected = Vec::new();
        for i in 0..200u32 {
            let key = if i % 3 == 0 {
                LuaValue::String(StringId(i))
            } else {
                num((i * 7 % 257) as f64 + 0.5)
            };
            t.raw_set(key, num(i as f64));
            expected.push((key, num(i as f64)));
        }
        for i in 1..=50 {
            t.raw_set(num(i as f64), num(-(i as f64)));
            expected.push((num(i as f64), num(-(i as f64))));
        }
        let mut seen = 0;
        for (k, v) in &expected {
            assert_eq!(t.raw_get(k), *v);
            seen += 1;
        }
        assert_eq!(seen, t.iter().count());
    }

    #[test]
    fn test_next_skips_removed_keys() {
        let mut t = LuaTable::new(0, 0);
        for i in 0..10u32 {
            t.raw_set(LuaValue::String(StringId(i)), num(i as f64));
        }
        t.raw_set(LuaValue::String(StringId(4)), LuaValue::Nil);

        let mut key = LuaValue::Nil;
        let mut count = 0;
        while let Some((k, _)) = t.next(&key).unwrap() {
            assert_ne!(k, LuaValue::String(StringId(4)));
            count += 1;
            key = k;
        }
        assert_eq!(count, 9);
        // removed key can still continue a traversal
        assert!(t.next(&LuaValue::String(StringId(4))).is_ok());
        assert_eq!(t.next(&LuaValue::String(StringId(99))), Err(InvalidNextKey));
    }

    #[test]
    fn test_len_border() {
        let mut t = LuaTable::new(8, 0);
        for i in 1..=5 {
            t.set_int(i, num(1.0));
        }
        assert_eq!(t.len(), 5);
        t.set_int(5, LuaValue::Nil);
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_compute_sizes() {
        // keys 1, 2, 3 and 100
        let mut nums = [0usize; MAXABITS + 1];
        for k in [1, 2, 3, 100] {
            count_int(&num(k as f64), &mut nums);
        }
        assert_eq!(compute_sizes(&nums, 4), (4, 3));
    }
}
