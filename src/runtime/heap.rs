//! Object heap of an execution context.
//!
//! Objects are addressed by non-zero 64-bit addresses and live as long as
//! the engine that allocated them; no collector runs.

use std::rc::Rc;

use super::table::{Key, Table};
use crate::lir::ModuleId;
use crate::value::{Address, Tag, Value};

pub enum Object {
    /// Immutable byte buffer of a string box.
    Str(Rc<[u8]>),
    Table(Table),
    /// Captured environment of a closure.
    Env(Vec<Value>),
    /// A single box; table metas live in cells.
    Cell(Value),
    Code { module: ModuleId, func: u32 },
    /// `(code, env)` pair that makes a closure callable like a plain function.
    Trampoline { code: Address, env: Address },
    Native(usize),
}

impl Object {
    pub fn kind(&self) -> &'static str {
        match self {
            Object::Str(_) => "str",
            Object::Table(_) => "table",
            Object::Env(_) => "env",
            Object::Cell(_) => "cell",
            Object::Code { .. } => "code",
            Object::Trampoline { .. } => "trampoline",
            Object::Native(_) => "native",
        }
    }
}

#[derive(Default)]
pub struct Heap {
    objects: Vec<Object>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, object: Object) -> Address {
        self.objects.push(object);
        match Address::new(self.objects.len() as u64) {
            Some(address) => address,
            None => unreachable!("heap address overflow"),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, address: Address) -> Option<&Object> {
        self.objects.get(address.raw() as usize - 1)
    }

    pub fn get_mut(&mut self, address: Address) -> Option<&mut Object> {
        self.objects.get_mut(address.raw() as usize - 1)
    }

    pub fn alloc_str(&mut self, bytes: &[u8]) -> Value {
        let len = bytes.len() as u32;
        let address = self.alloc(Object::Str(Rc::from(bytes)));
        Value::str(address, len)
    }

    pub fn alloc_table(&mut self, table: Table) -> Value {
        Value::table(self.alloc(Object::Table(table)))
    }

    pub fn alloc_cell(&mut self, value: Value) -> Address {
        self.alloc(Object::Cell(value))
    }

    /// Bytes of a string box.
    pub fn str(&self, value: Value) -> Option<&Rc<[u8]>> {
        if value.tag != Tag::Str {
            return None;
        }
        match self.get(value.address()?) {
            Some(Object::Str(bytes)) => Some(bytes),
            _ => None,
        }
    }

    pub fn string(&self, value: Value) -> Option<String> {
        self.str(value).map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn table(&self, value: Value) -> Option<&Table> {
        if value.tag != Tag::Table {
            return None;
        }
        match self.get(value.address()?) {
            Some(Object::Table(t)) => Some(t),
            _ => None,
        }
    }

    pub fn table_mut(&mut self, value: Value) -> Option<&mut Table> {
        if value.tag != Tag::Table {
            return None;
        }
        match self.get_mut(value.address()?) {
            Some(Object::Table(t)) => Some(t),
            _ => None,
        }
    }

    pub fn table_at_mut(&mut self, address: Address) -> Option<&mut Table> {
        match self.get_mut(address) {
            Some(Object::Table(t)) => Some(t),
            _ => None,
        }
    }

    pub fn env(&self, address: Address) -> Option<&Vec<Value>> {
        match self.get(address) {
            Some(Object::Env(slots)) => Some(slots),
            _ => None,
        }
    }

    pub fn env_mut(&mut self, address: Address) -> Option<&mut Vec<Value>> {
        match self.get_mut(address) {
            Some(Object::Env(slots)) => Some(slots),
            _ => None,
        }
    }

    pub fn cell(&self, address: Address) -> Option<Value> {
        match self.get(address) {
            Some(Object::Cell(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn set_cell(&mut self, address: Address, value: Value) {
        if let Some(Object::Cell(slot)) = self.get_mut(address) {
            *slot = value;
        }
    }

    /// The meta box of a table, if it has one.
    pub fn meta(&self, value: Value) -> Option<Value> {
        value.meta().and_then(|cell| self.cell(cell))
    }

    pub fn key(&self, value: Value) -> Key {
        match value.tag {
            Tag::Null => Key::Null,
            Tag::Int => Key::Int(value.as_int()),
            Tag::Float => Key::Float(value.data),
            Tag::Bool => Key::Bool(value.as_bool()),
            Tag::Str => match self.str(value) {
                Some(bytes) => Key::Str(bytes.clone()),
                None => Key::Str(Rc::from(&b""[..])),
            },
            tag => Key::Ref(tag, value.data),
        }
    }

    pub fn key_str(&self, name: &str) -> Key {
        Key::Str(Rc::from(name.as_bytes()))
    }

    /// Key equality: same tag, strings by content, everything else by bits.
    pub fn same(&self, lhs: Value, rhs: Value) -> bool {
        lhs.tag == rhs.tag && self.key(lhs) == self.key(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_nonzero_and_distinct() {
        let mut heap = Heap::new();
        let a = heap.alloc_str(b"a");
        let b = heap.alloc_str(b"a");
        assert_ne!(a.data, 0);
        assert_ne!(a.data, b.data);
        assert!(heap.same(a, b));
        assert_eq!(heap.string(a).as_deref(), Some("a"));
    }

    #[test]
    fn meta_reads_through_cell() {
        let mut heap = Heap::new();
        let proto = heap.alloc_table(Table::new());
        let cell = heap.alloc_cell(proto);
        let t = heap.alloc_table(Table::new()).with_link(cell);
        assert_eq!(heap.meta(t), Some(proto));
        assert_eq!(heap.meta(proto), None);
    }

    #[test]
    fn keys() {
        let mut heap = Heap::new();
        let s = heap.alloc_str(b"k");
        assert_eq!(heap.key(s), Key::Str(Rc::from(&b"k"[..])));
        assert_eq!(heap.key(Value::float(-0.0)), Key::Float((-0.0f64).to_bits()));
        assert!(!heap.same(Value::int(1), Value::bool(true)));
    }
}
