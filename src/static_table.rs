//! # Static tables
//!
//! Hash tables built entirely from link-time data. They back literal arrays
//! and dicts written at module scope as well as every module's export
//! namespace.
//!
//! Items are allocated once and never move: the slot array only stores item
//! ids, so resizing reallocates the slots and reinserts the existing items by
//! reference. The address of an item's value is therefore stable for the
//! lifetime of the table, and importers can hold on to it.

use std::fmt;

use crate::hash;

pub const DEFAULT_CAPACITY: u32 = 32;

/// A key that can be hashed at compile time.
#[derive(Clone, Debug)]
pub enum Literal {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Literal {
    pub fn hash(&self) -> u64 {
        match self {
            Literal::Null => hash::hash_null(),
            Literal::Int(i) => hash::hash_int(*i),
            Literal::Float(f) => hash::hash_float_bits(f.to_bits()),
            Literal::Bool(b) => hash::hash_bool(*b),
            Literal::Str(s) => hash::hash_bytes(s.as_bytes()),
        }
    }
}

/// Literal equality is bit-for-bit within a tag.
impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Null, Literal::Null) => true,
            (Literal::Int(a), Literal::Int(b)) => a == b,
            (Literal::Float(a), Literal::Float(b)) => a.to_bits() == b.to_bits(),
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            (Literal::Str(a), Literal::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Str(s.to_owned())
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Int(i)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// A key of a [`SlotTable`]: equality plus the shared literal hash.
pub trait TableKey: Eq {
    fn table_hash(&self) -> u64;
}

impl TableKey for Literal {
    fn table_hash(&self) -> u64 {
        self.hash()
    }
}

/// Stable handle of an item inside one table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ItemId(pub u32);

#[derive(Debug)]
pub struct Item<V, K = Literal> {
    pub key: K,
    pub value: V,
}

/// Open addressing with a linear slot search over a slot array of item ids.
/// Static tables and the runtime tables of a running program both use it,
/// so one key lands in the same slot in either.
#[derive(Debug)]
pub struct SlotTable<K, V> {
    count: u32,
    capacity: u32,
    slots: Vec<Option<ItemId>>,
    /// boxed so an item keeps its address when this vector grows
    items: Vec<Box<Item<V, K>>>,
}

pub type StaticTable<V> = SlotTable<Literal, V>;

impl<K: TableKey, V> Default for SlotTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TableKey, V> SlotTable<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: u32) -> Self {
        let capacity = capacity.max(2);
        Self {
            count: 0,
            capacity,
            slots: vec![None; capacity as usize],
            items: Vec::new(),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Index of the slot holding `key`, or of the empty slot where it would go.
    fn slot_of(&self, key: &K) -> usize {
        let mut index = hash::slot_start(key.table_hash(), self.capacity);
        loop {
            match self.slots[index] {
                None => return index,
                Some(id) if self.items[id.0 as usize].key == *key => return index,
                Some(_) => index = (index + 1) % self.capacity as usize,
            }
        }
    }

    pub fn lookup(&self, key: &K) -> Option<ItemId> {
        self.slots[self.slot_of(key)]
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.lookup(key).map(|id| &self.items[id.0 as usize].value)
    }

    /// Insert or overwrite `key`. Returns the id of the item holding the value;
    /// overwriting keeps the existing item.
    pub fn put(&mut self, key: K, value: V) -> ItemId {
        if let Some(id) = self.lookup(&key) {
            self.items[id.0 as usize].value = value;
            return id;
        }

        if self.count + 1 >= self.capacity / 2 {
            self.resize(self.capacity * 2);
        }

        let index = self.slot_of(&key);
        let id = ItemId(self.items.len() as u32);
        self.items.push(Box::new(Item { key, value }));
        self.slots[index] = Some(id);
        self.count += 1;
        id
    }

    fn resize(&mut self, capacity: u32) {
        log::trace!(target: "rain::static", "resize {} -> {}", self.capacity, capacity);
        let old = std::mem::replace(&mut self.slots, vec![None; capacity as usize]);
        self.capacity = capacity;

        for id in old.into_iter().flatten() {
            let index = self.slot_of(&self.items[id.0 as usize].key);
            self.slots[index] = Some(id);
        }
    }

    pub fn item(&self, id: ItemId) -> &Item<V, K> {
        &self.items[id.0 as usize]
    }

    pub fn value(&self, id: ItemId) -> &V {
        &self.items[id.0 as usize].value
    }

    pub fn value_mut(&mut self, id: ItemId) -> &mut V {
        &mut self.items[id.0 as usize].value
    }

    /// Address of the value slot of `id`. Valid until the table is dropped.
    pub fn value_ptr(&self, id: ItemId) -> *const V {
        &self.items[id.0 as usize].value as *const V
    }

    /// Items in allocation order; `ItemId(n)` is the `n`-th element.
    pub fn items(&self) -> impl Iterator<Item = (ItemId, &Item<V, K>)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (ItemId(i as u32), &**item))
    }

    /// Items in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, ItemId, &Item<V, K>)> {
        self.slots.iter().enumerate().filter_map(move |(index, slot)| {
            slot.map(|id| (index, id, &*self.items[id.0 as usize]))
        })
    }

    /// Slot index -> item id, as laid out in the data section.
    pub fn slots(&self) -> &[Option<ItemId>] {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: i64) -> Literal {
        Literal::Int(i)
    }

    #[test]
    fn put_then_get() {
        let mut t = StaticTable::new();
        t.put("x".into(), 1);
        t.put(key(7), 2);
        t.put(Literal::Null, 3);
        t.put(Literal::Bool(true), 4);
        t.put(Literal::Float(2.5), 5);

        assert_eq!(t.get(&"x".into()), Some(&1));
        assert_eq!(t.get(&key(7)), Some(&2));
        assert_eq!(t.get(&Literal::Null), Some(&3));
        assert_eq!(t.get(&Literal::Bool(true)), Some(&4));
        assert_eq!(t.get(&Literal::Float(2.5)), Some(&5));
        assert_eq!(t.get(&"y".into()), None);
        assert_eq!(t.count(), 5);
    }

    #[test]
    fn keys_compare_by_tag_and_bits() {
        let mut t = StaticTable::new();
        t.put(Literal::Float(0.0), "pos");
        t.put(Literal::Float(-0.0), "neg");
        t.put(Literal::Int(1), "int");
        t.put(Literal::Bool(true), "bool");

        assert_eq!(t.count(), 4);
        assert_eq!(t.get(&Literal::Float(-0.0)), Some(&"neg"));
        assert_eq!(t.get(&Literal::Int(1)), Some(&"int"));
        assert_eq!(t.get(&Literal::Bool(true)), Some(&"bool"));
    }

    #[test]
    fn overwrite_keeps_item() {
        let mut t = StaticTable::new();
        let a = t.put("k".into(), 1);
        let before = t.value_ptr(a);
        let b = t.put("k".into(), 2);
        assert_eq!(a, b);
        assert_eq!(before, t.value_ptr(b));
        assert_eq!(t.get(&"k".into()), Some(&2));
        assert_eq!(t.count(), 1);
    }

    #[test]
    fn insertion_does_not_disturb_other_keys() {
        let mut t = StaticTable::new();
        for i in 0..10 {
            t.put(key(i), i * 10);
        }
        // 32 apart, so both start from the same slot
        t.put(key(32), 999);
        for i in 0..10 {
            assert_eq!(t.get(&key(i)), Some(&(i * 10)));
        }
        assert_eq!(t.get(&key(32)), Some(&999));
    }

    #[test]
    fn value_addresses_survive_resize() {
        let mut t = StaticTable::new();
        let first = t.put("first".into(), 0i64);
        let ptr = t.value_ptr(first);
        assert_eq!(t.capacity(), DEFAULT_CAPACITY);

        for i in 0..100 {
            t.put(key(i), i);
        }

        assert!(t.capacity() > DEFAULT_CAPACITY);
        assert_eq!(t.lookup(&"first".into()), Some(first));
        assert_eq!(t.value_ptr(t.lookup(&"first".into()).unwrap()), ptr);
    }

    #[test]
    fn resize_threshold() {
        let mut t = StaticTable::new();
        for i in 0..15 {
            t.put(key(i), i);
        }
        assert_eq!(t.capacity(), 32);

        // count + 1 == capacity / 2
        t.put(key(15), 15);
        assert_eq!(t.capacity(), 64);
        assert_eq!(t.count(), 16);
    }

    #[test]
    fn resize_preserves_every_entry() {
        let n = 200;
        let mut t = StaticTable::new();
        for i in 0..n {
            t.put(Literal::Str(format!("key{}", i)), i);
        }

        assert_eq!(t.count(), n as u32);
        for i in 0..n {
            assert_eq!(t.get(&Literal::Str(format!("key{}", i))), Some(&i));
        }

        // smallest 32 * 2^k with n < capacity / 2
        let mut expected = DEFAULT_CAPACITY;
        while n as u32 >= expected / 2 {
            expected *= 2;
        }
        assert_eq!(t.capacity(), expected);
        assert_eq!(t.capacity(), 512);
    }

    #[test]
    fn hashes_are_stable_across_resize() {
        let mut t = StaticTable::new();
        let k = Literal::Str("stable".into());
        let h = k.hash();
        t.put(k.clone(), ());
        for i in 0..64 {
            t.put(key(i), ());
        }
        assert_eq!(t.item(t.lookup(&k).unwrap()).key.hash(), h);
    }

    #[test]
    fn overwrite_never_resizes() {
        let mut t = StaticTable::new();
        for i in 0..15 {
            t.put(key(i), i);
        }
        for _ in 0..10 {
            t.put(key(3), 0);
        }
        assert_eq!(t.capacity(), 32);
    }
}
