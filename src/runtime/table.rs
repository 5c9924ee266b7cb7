//! Runtime tables.
//!
//! Backed by the same [`SlotTable`] as static tables. A static table
//! materialized by inserting its items in allocation order ends up with the
//! same entry ids.

use std::rc::Rc;

use crate::hash;
use crate::static_table::{ItemId, SlotTable, TableKey};
use crate::value::{Tag, Value};

/// Hashable identity of a key box. Strings compare by content, tables,
/// functions and opaque boxes by address.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Key {
    Null,
    Int(i64),
    Float(u64),
    Bool(bool),
    Str(Rc<[u8]>),
    Ref(Tag, u64),
}

impl Key {
    pub fn hash(&self) -> u64 {
        match self {
            Key::Null => hash::hash_null(),
            Key::Int(i) => hash::hash_int(*i),
            Key::Float(bits) => hash::hash_float_bits(*bits),
            Key::Bool(b) => hash::hash_bool(*b),
            Key::Str(bytes) => hash::hash_bytes(bytes),
            Key::Ref(_, address) => *address,
        }
    }
}

impl TableKey for Key {
    fn table_hash(&self) -> u64 {
        self.hash()
    }
}

/// A table of a running program. Entry ids are the item ids of the
/// [`SlotTable`] underneath, so a loaded static table keeps its ids.
#[derive(Default)]
pub struct Table {
    inner: SlotTable<Key, Value>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            inner: SlotTable::with_capacity(capacity),
        }
    }

    pub fn count(&self) -> u32 {
        self.inner.count()
    }

    pub fn capacity(&self) -> u32 {
        self.inner.capacity()
    }

    pub fn lookup(&self, key: &Key) -> Option<ItemId> {
        self.inner.lookup(key)
    }

    pub fn get(&self, key: &Key) -> Option<Value> {
        self.inner.get(key).copied()
    }

    pub fn put(&mut self, key: Key, value: Value) -> ItemId {
        self.inner.put(key, value)
    }

    pub fn value(&self, id: ItemId) -> Value {
        *self.inner.value(id)
    }

    pub fn set_value(&mut self, id: ItemId, value: Value) {
        *self.inner.value_mut(id) = value;
    }

    /// Stable address of the value box of `id`.
    pub fn value_ptr(&self, id: ItemId) -> *const Value {
        self.inner.value_ptr(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Key {
        Key::Str(Rc::from(text.as_bytes()))
    }

    #[test]
    fn string_keys_compare_by_content() {
        let mut t = Table::new();
        t.put(s("name"), Value::int(1));
        assert_eq!(t.get(&s("name")), Some(Value::int(1)));
        assert_eq!(t.get(&s("other")), None);
    }

    #[test]
    fn reference_keys_compare_by_identity() {
        let mut t = Table::new();
        t.put(Key::Ref(Tag::Table, 16), Value::int(1));
        assert_eq!(t.get(&Key::Ref(Tag::Table, 16)), Some(Value::int(1)));
        assert_eq!(t.get(&Key::Ref(Tag::Table, 32)), None);
    }

    #[test]
    fn entries_keep_addresses_and_ids_across_resize() {
        let mut t = Table::new();
        let first = t.put(s("first"), Value::int(0));
        let ptr = t.value_ptr(first);
        for i in 0..64 {
            t.put(Key::Int(i), Value::int(i));
        }
        assert_eq!(t.capacity(), 256);
        assert_eq!(t.lookup(&s("first")), Some(first));
        assert_eq!(t.value_ptr(first), ptr);
        assert_eq!(t.count(), 65);
    }

    #[test]
    fn lands_in_the_same_slots_as_static_tables() {
        use crate::static_table::{Literal, StaticTable};

        let keys = ["x", "y", "zz", "main", "init"];
        let mut st = StaticTable::new();
        let mut rt = Table::new();
        for k in keys {
            let a = st.put(Literal::Str(k.into()), ());
            let b = rt.put(s(k), Value::null());
            assert_eq!(a.0, b.0);
        }
        for (index, id, _) in st.iter() {
            assert_eq!(rt.inner.slots()[index], Some(id));
        }
    }
}
