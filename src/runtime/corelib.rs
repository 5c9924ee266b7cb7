//! The core library image.
//!
//! Module `0` of every cache and every engine. It exports the natives every
//! program can name without an import, plus the `array` and `dict`
//! prototype tables that array and dict literals carry as their meta.

use std::rc::Rc;

use super::ops::{self, Failure};
use crate::engine::{Engine, Native};
use crate::lir::builder::ModuleBuilder;
use crate::lir::{Const, IrModule, ModuleId};
use crate::static_table::Literal;
use crate::value::{Tag, Value};
use crate::RunResult;

fn native(name: &str, arity: u32) -> Const {
    Const::Native {
        name: Rc::from(name),
        arity,
    }
}

pub fn module() -> IrModule {
    let mut m = ModuleBuilder::new(ModuleId::CORE, "core");

    m.export("print", native("print", 1));
    m.export("tostr", native("tostr", 1));
    m.export("throw", native("throw", 1));
    m.export("len", native("len", 1));
    m.export("type", native("type", 1));
    m.export("meta", native("meta", 1));
    m.export("exit", native("exit", 1));

    let array = m.new_table();
    let proto = m.table_mut(array.index);
    proto.put(Literal::from("push"), native("push", 2));
    proto.put(Literal::from("len"), native("len", 1));
    m.export("array", Const::Table { table: array, meta: None });

    let dict = m.new_table();
    let proto = m.table_mut(dict.index);
    proto.put(Literal::from("has"), native("has", 2));
    proto.put(Literal::from("len"), native("len", 1));
    m.export("dict", Const::Table { table: dict, meta: None });

    m.finish()
}

pub fn natives() -> Vec<Native> {
    vec![
        Native::new("print", 1, print),
        Native::new("tostr", 1, tostr),
        Native::new("throw", 1, throw),
        Native::new("len", 1, len),
        Native::new("type", 1, type_of),
        Native::new("meta", 1, meta),
        Native::new("exit", 1, exit),
        Native::new("push", 2, push),
        Native::new("has", 2, has),
    ]
}

fn print(engine: &mut Engine, args: &[Value]) -> RunResult {
    let text = ops::to_str(engine.heap(), args[0]);
    engine.write_line(&text);
    Ok(Value::null())
}

fn tostr(engine: &mut Engine, args: &[Value]) -> RunResult {
    if args[0].is(Tag::Str) {
        return Ok(args[0]);
    }
    let text = ops::to_str(engine.heap(), args[0]);
    Ok(engine.heap_mut().alloc_str(text.as_bytes()))
}

fn throw(_: &mut Engine, args: &[Value]) -> RunResult {
    Err(args[0])
}

/// The tag number of a box.
fn type_of(_: &mut Engine, args: &[Value]) -> RunResult {
    Ok(Value::int(args[0].tag as i64))
}

/// The meta of a table, null for anything else.
fn meta(engine: &mut Engine, args: &[Value]) -> RunResult {
    if !args[0].is(Tag::Table) {
        return Ok(Value::null());
    }
    Ok(engine.heap().meta(args[0]).unwrap_or_default())
}

fn exit(engine: &mut Engine, args: &[Value]) -> RunResult {
    Err(engine.request_exit(args[0].exit_code(), args[0]))
}

fn len(engine: &mut Engine, args: &[Value]) -> RunResult {
    let value = args[0];
    match value.tag {
        Tag::Str => Ok(Value::int(value.size as i64)),
        Tag::Table => match engine.heap().table(value) {
            Some(t) => Ok(Value::int(t.count() as i64)),
            None => Err(engine.failure(Failure::ArgMismatch)),
        },
        _ => Err(engine.failure(Failure::ArgMismatch)),
    }
}

/// `array:push(value)`
fn push(engine: &mut Engine, args: &[Value]) -> RunResult {
    let count = match engine.heap().table(args[0]) {
        Some(t) => t.count(),
        None => return Err(engine.failure(Failure::ArgMismatch)),
    };
    engine.put(args[0], Value::int(count as i64), args[1])?;
    Ok(Value::null())
}

/// `dict:has(key)`, own keys only.
fn has(engine: &mut Engine, args: &[Value]) -> RunResult {
    let key = engine.heap().key(args[1]);
    match engine.heap().table(args[0]) {
        Some(t) => Ok(Value::bool(t.lookup(&key).is_some())),
        None => Err(engine.failure(Failure::ArgMismatch)),
    }
}
