use crate::object::{Heap, ObjRef, Value};

const BASE_CAPACITY: usize = 16;

/// FNV-1a over the spelling bytes.
pub fn hash_string(text: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for b in text.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Empty,
    Tombstone,
    Occupied { key: ObjRef, hash: u32, value: Value },
}

/// Open-addressing map keyed by interned string handles.
///
/// Keys compare by identity, so two spellings only meet in one entry when
/// they were interned to the same object. Deletion leaves a tombstone that
/// keeps probe chains intact; tombstones count toward the load factor and are
/// dropped when the table grows.
#[derive(Debug, Clone)]
pub struct Table {
    entries: Vec<Entry>,
    /// Occupied entries plus tombstones.
    count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Table { entries: vec![Entry::Empty; BASE_CAPACITY], count: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot for `key`: its own entry if present, else the first tombstone on
    /// the probe path, else the empty slot that ended the probe.
    fn find_slot(&self, key: ObjRef, hash: u32) -> usize {
        let cap = self.entries.len();
        let mut idx = hash as usize % cap;
        let mut tombstone = None;
        loop {
            match self.entries[idx] {
                Entry::Occupied { key: k, .. } if k == key => return idx,
                Entry::Occupied { .. } => {}
                Entry::Tombstone => {
                    tombstone.get_or_insert(idx);
                }
                Entry::Empty => return tombstone.unwrap_or(idx),
            }
            idx = (idx + 1) % cap;
        }
    }

    /// Inserts or overwrites. Returns true when `key` was not present.
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) * 2 > self.entries.len() {
            self.grow();
        }
        let idx = self.find_slot(key, hash);
        let is_new = match self.entries[idx] {
            Entry::Occupied { .. } => false,
            Entry::Tombstone => true,
            Entry::Empty => {
                self.count += 1;
                true
            }
        };
        self.entries[idx] = Entry::Occupied { key, hash, value };
        is_new
    }

    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        match self.entries[self.find_slot(key, hash)] {
            Entry::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, key: ObjRef, hash: u32) -> bool {
        self.get(key, hash).is_some()
    }

    /// Removes `key`, leaving a tombstone. Returns false if it was absent.
    pub fn unset(&mut self, key: ObjRef, hash: u32) -> bool {
        let idx = self.find_slot(key, hash);
        if !matches!(self.entries[idx], Entry::Occupied { .. }) {
            return false;
        }
        self.entries[idx] = Entry::Tombstone;
        true
    }

    /// Finds a key by content rather than identity; the interning lookup.
    pub fn find_str(&self, heap: &Heap, text: &str, hash: u32) -> Option<ObjRef> {
        let cap = self.entries.len();
        let mut idx = hash as usize % cap;
        loop {
            match self.entries[idx] {
                Entry::Empty => return None,
                Entry::Occupied { key, hash: h, .. }
                    if h == hash && heap.string(key).is_some_and(|s| &*s.text == text) =>
                {
                    return Some(key);
                }
                _ => {}
            }
            idx = (idx + 1) % cap;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries.iter().filter_map(|e| match *e {
            Entry::Occupied { key, value, .. } => Some((key, value)),
            _ => None,
        })
    }

    /// Tombstones every entry whose key fails `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(ObjRef) -> bool) -> usize {
        let mut removed = 0;
        for e in self.entries.iter_mut() {
            if let Entry::Occupied { key, .. } = *e {
                if !keep(key) {
                    *e = Entry::Tombstone;
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        *self = Table::new();
    }

    fn grow(&mut self) {
        let new_len = self.entries.len() * 2;
        let old = std::mem::replace(&mut self.entries, vec![Entry::Empty; new_len]);
        self.count = 0;
        for e in old {
            if let Entry::Occupied { key, hash, value } = e {
                let idx = self.find_slot(key, hash);
                self.entries[idx] = Entry::Occupied { key, hash, value };
                self.count += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Object, StrObj};

    fn ident(heap: &mut Heap, text: &str) -> (ObjRef, u32) {
        let hash = hash_string(text);
        (heap.alloc(Object::Identifier(StrObj { text: text.into(), hash })), hash)
    }

    #[test]
    fn fnv1a_known_values() {
        assert_eq!(hash_string(""), 2_166_136_261);
        assert_eq!(hash_string("a"), 0xe40c292c);
    }

    #[test]
    fn set_then_get() {
        let mut heap = Heap::default();
        let mut t = Table::new();
        let (a, ha) = ident(&mut heap, "a1");
        let (b, hb) = ident(&mut heap, "a2");
        assert!(t.set(a, ha, Value::Number(1)));
        assert!(t.set(b, hb, Value::Bool(true)));
        assert!(!t.set(a, ha, Value::Number(123)));
        assert_eq!(t.get(a, ha), Some(Value::Number(123)));
        assert_eq!(t.get(b, hb), Some(Value::Bool(true)));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn unset_leaves_others_reachable() {
        let mut heap = Heap::default();
        let mut t = Table::new();
        // same hash bucket chain: force collisions with identical hashes
        let (a, _) = ident(&mut heap, "x");
        let (b, _) = ident(&mut heap, "y");
        t.set(a, 7, Value::Number(1));
        t.set(b, 7, Value::Number(2));
        assert!(t.unset(a, 7));
        assert!(!t.unset(a, 7));
        assert_eq!(t.get(a, 7), None);
        assert_eq!(t.get(b, 7), Some(Value::Number(2)));
        // the tombstone is reused on reinsertion
        assert!(t.set(a, 7, Value::Number(3)));
        assert_eq!(t.get(a, 7), Some(Value::Number(3)));
    }

    #[test]
    fn growth_preserves_entries() {
        let mut heap = Heap::default();
        let mut t = Table::new();
        let keys: Vec<_> = (0..100).map(|i| ident(&mut heap, &format!("k{i}"))).collect();
        for (i, (k, h)) in keys.iter().enumerate() {
            t.set(*k, *h, Value::Number(i as i64));
        }
        assert!(t.capacity() >= 200);
        for (i, (k, h)) in keys.iter().enumerate() {
            assert_eq!(t.get(*k, *h), Some(Value::Number(i as i64)));
        }
        assert_eq!(t.len(), 100);
    }

    #[test]
    fn load_stays_at_or_below_half() {
        let mut heap = Heap::default();
        let mut t = Table::new();
        for i in 0..9 {
            let (k, h) = ident(&mut heap, &format!("v{i}"));
            t.set(k, h, Value::None);
        }
        assert_eq!(t.capacity(), 32);
    }

    #[test]
    fn find_str_matches_content() {
        let mut heap = Heap::default();
        let mut t = Table::new();
        let (a, ha) = ident(&mut heap, "alpha");
        t.set(a, ha, Value::None);
        assert_eq!(t.find_str(&heap, "alpha", ha), Some(a));
        assert_eq!(t.find_str(&heap, "alphabet", hash_string("alphabet")), None);
        assert_eq!(t.find_str(&heap, "", hash_string("")), None);
    }

    #[test]
    fn retain_drops_rejected_keys() {
        let mut heap = Heap::default();
        let mut t = Table::new();
        let (a, ha) = ident(&mut heap, "a");
        let (b, hb) = ident(&mut heap, "b");
        t.set(a, ha, Value::None);
        t.set(b, hb, Value::None);
        assert_eq!(t.retain(|k| k == a), 1);
        assert!(t.contains(a, ha));
        assert!(!t.contains(b, hb));
    }
}
