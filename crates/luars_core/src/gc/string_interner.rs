use ahash::RandomState;
use std::collections::HashMap;

use super::object_pool::{Arena, GcHeader, GcString};
use super::{GcColor, StringId};

/// String table: every Lua string is interned, so equal contents always map
/// to the same StringId and string equality is an ID comparison.
/// The collector frees unreachable strings and calls `remove`.
pub struct StringInterner {
    // Content hash -> StringIds with that hash
    map: HashMap<u64, Vec<StringId>, RandomState>,
    hashbuilder: RandomState,
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl StringInterner {
    pub fn new() -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(256, RandomState::new()),
            hashbuilder: RandomState::new(),
        }
    }

    /// Returns the existing ID for `bytes` or allocates a new string.
    /// The second value is the number of bytes newly allocated.
    pub fn intern(
        &mut self,
        bytes: &[u8],
        strings: &mut Arena<GcString>,
        white: GcColor,
        other_white: GcColor,
    ) -> (StringId, usize) {
        let hash = self.hash_bytes(bytes);

        if let Some(ids) = self.map.get(&hash) {
            for &id in ids {
                if let Some(s) = strings.get_mut(id.0)
                    && &*s.data == bytes
                {
                    // Dead but not yet swept: bring it back
                    if s.header.color == other_white {
                        s.header.color = white;
                    }
                    return (id, 0);
                }
            }
        }

        let s = GcString {
            header: GcHeader::new(white),
            data: bytes.into(),
            hash,
        };
        let size = s.size();
        let id = StringId(strings.alloc(s));
        self.map.entry(hash).or_default().push(id);
        (id, size)
    }

    #[inline(always)]
    fn hash_bytes(&self, bytes: &[u8]) -> u64 {
        self.hashbuilder.hash_one(bytes)
    }

    /// Forget a string that the collector is freeing
    pub fn remove(&mut self, id: StringId, hash: u64) {
        if let Some(ids) = self.map.get_mut(&hash) {
            ids.retain(|&i| i != id);
            if ids.is_empty() {
                self.map.remove(&hash);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
