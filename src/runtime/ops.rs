//! Built-in operators on boxes.
//!
//! These are the plain behaviours; dispatch to magic methods through a
//! table's meta happens in the engine before falling back to them.

use std::cmp::Ordering;

use super::heap::Heap;
use crate::lir::{BinOp, UnOp};
use crate::value::{Tag, Value};

/// Runtime failures raised by primitives, thrown as string boxes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Failure {
    Uncallable,
    ArgMismatch,
    KeyError,
    DivByZero,
    StackOverflow,
    UnboundVar,
}

impl Failure {
    pub fn name(self) -> &'static str {
        match self {
            Failure::Uncallable => "uncallable",
            Failure::ArgMismatch => "arg_mismatch",
            Failure::KeyError => "key_error",
            Failure::DivByZero => "div_by_zero",
            Failure::StackOverflow => "stack_overflow",
            Failure::UnboundVar => "unbound_var",
        }
    }
}

pub type OpResult = Result<Value, Failure>;

enum Num {
    Int(i64),
    Float(f64),
}

fn num(value: Value) -> Option<Num> {
    match value.tag {
        Tag::Int => Some(Num::Int(value.as_int())),
        Tag::Float => Some(Num::Float(value.as_float())),
        _ => None,
    }
}

fn pair(lhs: Value, rhs: Value) -> Result<(Num, Num), Failure> {
    match (num(lhs), num(rhs)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(Failure::ArgMismatch),
    }
}

fn arith(
    lhs: Value,
    rhs: Value,
    int: fn(i64, i64) -> i64,
    float: fn(f64, f64) -> f64,
) -> OpResult {
    Ok(match pair(lhs, rhs)? {
        (Num::Int(a), Num::Int(b)) => Value::int(int(a, b)),
        (Num::Int(a), Num::Float(b)) => Value::float(float(a as f64, b)),
        (Num::Float(a), Num::Int(b)) => Value::float(float(a, b as f64)),
        (Num::Float(a), Num::Float(b)) => Value::float(float(a, b)),
    })
}

fn compare(heap: &Heap, lhs: Value, rhs: Value) -> Result<Option<Ordering>, Failure> {
    if let (Some(a), Some(b)) = (heap.str(lhs), heap.str(rhs)) {
        return Ok(Some(a.cmp(b)));
    }
    Ok(match pair(lhs, rhs)? {
        (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
        (Num::Int(a), Num::Float(b)) => (a as f64).partial_cmp(&b),
        (Num::Float(a), Num::Int(b)) => a.partial_cmp(&(b as f64)),
        (Num::Float(a), Num::Float(b)) => a.partial_cmp(&b),
    })
}

pub fn binary(heap: &mut Heap, op: BinOp, lhs: Value, rhs: Value) -> OpResult {
    match op {
        BinOp::Add => arith(lhs, rhs, i64::wrapping_add, |a, b| a + b),
        BinOp::Sub => arith(lhs, rhs, i64::wrapping_sub, |a, b| a - b),
        BinOp::Mul => arith(lhs, rhs, i64::wrapping_mul, |a, b| a * b),
        BinOp::Div => {
            if lhs.is(Tag::Int) && rhs.is(Tag::Int) && rhs.as_int() == 0 {
                return Err(Failure::DivByZero);
            }
            arith(lhs, rhs, i64::wrapping_div, |a, b| a / b)
        }
        BinOp::Eq => Ok(Value::bool(heap.same(lhs, rhs))),
        BinOp::Ne => Ok(Value::bool(!heap.same(lhs, rhs))),
        BinOp::Gt => Ok(Value::bool(compare(heap, lhs, rhs)? == Some(Ordering::Greater))),
        BinOp::Ge => Ok(Value::bool(matches!(
            compare(heap, lhs, rhs)?,
            Some(Ordering::Greater | Ordering::Equal)
        ))),
        BinOp::Lt => Ok(Value::bool(compare(heap, lhs, rhs)? == Some(Ordering::Less))),
        BinOp::Le => Ok(Value::bool(matches!(
            compare(heap, lhs, rhs)?,
            Some(Ordering::Less | Ordering::Equal)
        ))),
        BinOp::Concat => {
            let mut bytes = to_str(heap, lhs).into_bytes();
            bytes.extend_from_slice(to_str(heap, rhs).as_bytes());
            Ok(heap.alloc_str(&bytes))
        }
    }
}

pub fn unary(op: UnOp, value: Value) -> OpResult {
    match op {
        UnOp::Neg => match num(value) {
            Some(Num::Int(i)) => Ok(Value::int(i.wrapping_neg())),
            Some(Num::Float(f)) => Ok(Value::float(-f)),
            None => Err(Failure::ArgMismatch),
        },
        UnOp::Not => Ok(Value::bool(!value.truthy())),
    }
}

/// One-byte string at `index` of `s`; negative indices count from the end.
pub fn index_str(heap: &mut Heap, s: Value, key: Value) -> OpResult {
    if !key.is(Tag::Int) {
        return Err(Failure::KeyError);
    }
    let byte = match heap.str(s) {
        Some(bytes) => {
            let len = bytes.len() as i64;
            let i = key.as_int();
            let i = if i < 0 { len + i } else { i };
            if i < 0 || i >= len {
                return Ok(Value::null());
            }
            bytes[i as usize]
        }
        None => return Err(Failure::ArgMismatch),
    };
    Ok(heap.alloc_str(&[byte]))
}

/// Display text of a box, as produced by `tostr`.
pub fn to_str(heap: &Heap, value: Value) -> String {
    match value.tag {
        Tag::Str => heap.string(value).unwrap_or_default(),
        Tag::Float => {
            let f = value.as_float();
            if f.is_finite() && f.fract() == 0.0 {
                format!("{:.1}", f)
            } else {
                format!("{}", f)
            }
        }
        Tag::Table => format!("table {:#x}", value.data),
        Tag::Func => format!("func {:#x}", value.data),
        Tag::Opaque => format!("cdata {:#x}", value.data),
        _ => value.to_string(),
    }
}
