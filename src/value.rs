//! # Boxes
//!
//! Every runtime value manipulated by generated code is a *box*: a small
//! fixed-layout record with a type tag, a 64-bit payload, a 32-bit size and an
//! optional link to another heap object.
//!
//! ```text
//!  tag   size    data                       link
//!  ----  ------  -------------------------  --------------------------
//!  null  0       0                          -
//!  int   0       raw two's complement bits  -
//!  float 0       raw IEEE-754 bits          -
//!  bool  0       0 / 1                      -
//!  str   length  address of byte buffer     -
//!  table 0       address of table           meta cell (optional)
//!  func  arity   callable address           environment (optional)
//!  cdata 0       address of opaque object   -
//! ```
//!
//! Boxes are copied, never mutated in place. Only the objects that `data` and
//! `link` point at are mutable.

use std::fmt;
use std::num::NonZeroU64;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
#[repr(u8)]
pub enum Tag {
    Null = 0,
    Int = 1,
    Float = 2,
    Bool = 3,
    Str = 4,
    Table = 5,
    Func = 6,
    Opaque = 7,
}

impl Tag {
    pub fn from_u8(t: u8) -> Option<Tag> {
        Some(match t {
            0 => Tag::Null,
            1 => Tag::Int,
            2 => Tag::Float,
            3 => Tag::Bool,
            4 => Tag::Str,
            5 => Tag::Table,
            6 => Tag::Func,
            7 => Tag::Opaque,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Tag::Null => "null",
            Tag::Int => "int",
            Tag::Float => "float",
            Tag::Bool => "bool",
            Tag::Str => "str",
            Tag::Table => "table",
            Tag::Func => "func",
            Tag::Opaque => "cdata",
        }
    }
}

/// Address of a heap object. Zero is reserved for "no object".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(NonZeroU64);

impl Address {
    pub fn new(raw: u64) -> Option<Address> {
        NonZeroU64::new(raw).map(Address)
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:#x}", self.0.get())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(C)]
pub struct Value {
    pub tag: Tag,
    pub size: u32,
    pub data: u64,
    pub link: Option<Address>,
}

impl Default for Value {
    fn default() -> Self {
        Value::null()
    }
}

impl Value {
    pub const fn null() -> Value {
        Value {
            tag: Tag::Null,
            size: 0,
            data: 0,
            link: None,
        }
    }

    pub const fn int(value: i64) -> Value {
        Value {
            tag: Tag::Int,
            size: 0,
            data: value as u64,
            link: None,
        }
    }

    /// Floats keep their exact bit pattern, so `-0.0` and every NaN payload
    /// survive a round trip through a box.
    pub fn float(value: f64) -> Value {
        Value::float_bits(value.to_bits())
    }

    pub const fn float_bits(bits: u64) -> Value {
        Value {
            tag: Tag::Float,
            size: 0,
            data: bits,
            link: None,
        }
    }

    pub const fn bool(value: bool) -> Value {
        Value {
            tag: Tag::Bool,
            size: 0,
            data: value as u64,
            link: None,
        }
    }

    pub const fn str(buffer: Address, len: u32) -> Value {
        Value {
            tag: Tag::Str,
            size: len,
            data: buffer.0.get(),
            link: None,
        }
    }

    pub const fn table(table: Address) -> Value {
        Value {
            tag: Tag::Table,
            size: 0,
            data: table.0.get(),
            link: None,
        }
    }

    pub const fn func(code: Address, arity: u32) -> Value {
        Value {
            tag: Tag::Func,
            size: arity,
            data: code.0.get(),
            link: None,
        }
    }

    pub const fn opaque(object: Address) -> Value {
        Value {
            tag: Tag::Opaque,
            size: 0,
            data: object.0.get(),
            link: None,
        }
    }

    pub const fn with_link(self, link: Address) -> Value {
        Value {
            link: Some(link),
            ..self
        }
    }

    pub fn is(self, tag: Tag) -> bool {
        self.tag == tag
    }

    pub fn is_null(self) -> bool {
        self.tag == Tag::Null
    }

    /// A box is truthy iff it is not null and its payload is not all zero
    /// bits. `0`, `0.0` and `false` are falsy; `""` and `{}` are truthy.
    pub fn truthy(self) -> bool {
        self.tag != Tag::Null && self.data != 0
    }

    pub fn as_int(self) -> i64 {
        self.data as i64
    }

    pub fn as_float(self) -> f64 {
        f64::from_bits(self.data)
    }

    pub fn as_bool(self) -> bool {
        self.data != 0
    }

    /// The heap object `data` points at, for the pointer-carrying tags.
    pub fn address(self) -> Option<Address> {
        match self.tag {
            Tag::Str | Tag::Table | Tag::Func | Tag::Opaque => Address::new(self.data),
            _ => None,
        }
    }

    pub fn arity(self) -> u32 {
        self.size
    }

    /// Closures carry their environment in `link`.
    pub fn env(self) -> Option<Address> {
        if self.tag == Tag::Func {
            self.link
        } else {
            None
        }
    }

    pub fn meta(self) -> Option<Address> {
        if self.tag == Tag::Table {
            self.link
        } else {
            None
        }
    }

    /// Process exit status for a box returned from `main`.
    pub fn exit_code(self) -> i32 {
        match self.tag {
            Tag::Null => self.data as i32,
            Tag::Bool => (self.data == 0) as i32,
            Tag::Int => self.data as i32,
            Tag::Float => self.as_float() as i32,
            _ => 0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag {
            Tag::Null => write!(f, "null"),
            Tag::Int => write!(f, "{}", self.as_int()),
            Tag::Float => write!(f, "{}", self.as_float()),
            Tag::Bool => write!(f, "{}", self.as_bool()),
            tag => write!(f, "#<{} {:#x}>", tag.name(), self.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_ignores_size_and_link() {
        assert!(!Value::null().truthy());
        assert!(!Value::int(0).truthy());
        assert!(!Value::float(0.0).truthy());
        assert!(!Value::bool(false).truthy());
        assert!(Value::int(-1).truthy());
        assert!(Value::bool(true).truthy());

        let addr = Address::new(16).unwrap();
        let empty = Value::str(addr, 0);
        assert!(empty.truthy());
        assert!(Value::table(addr).truthy());
    }

    #[test]
    fn negative_zero_is_truthy() {
        // the sign bit makes the payload non-zero
        assert!(Value::float(-0.0).truthy());
    }

    #[test]
    fn floats_keep_exact_bits() {
        let nan = f64::from_bits(0x7ff8_0000_dead_beef);
        let boxed = Value::float(nan);
        assert_eq!(boxed.data, 0x7ff8_0000_dead_beef);
        assert_eq!(boxed.as_float().to_bits(), nan.to_bits());
        assert_ne!(Value::float(0.0).data, Value::float(-0.0).data);
    }

    #[test]
    fn function_boxes_carry_arity_and_env() {
        let code = Address::new(32).unwrap();
        let env = Address::new(48).unwrap();
        let f = Value::func(code, 2);
        assert_eq!(f.arity(), 2);
        assert_eq!(f.env(), None);

        let closure = f.with_link(env);
        assert_eq!(closure.env(), Some(env));
        assert_eq!(closure.address(), Some(code));
        assert_eq!(closure.meta(), None);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Value::null().exit_code(), 0);
        assert_eq!(Value::int(3).exit_code(), 3);
        assert_eq!(Value::bool(false).exit_code(), 1);
        assert_eq!(Value::bool(true).exit_code(), 0);
        assert_eq!(Value::float(2.9).exit_code(), 2);
    }
}
