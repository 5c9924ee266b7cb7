//! # Execution context
//!
//! An [`Engine`] links compiled modules into one address space and runs
//! them. Loading a module materializes its link-time data on the heap:
//! strings, static tables (inserted in allocation order, so item ids carry
//! over as entry ids), meta cells and one code object per function.
//!
//! Calls go through [`Engine::call`]. A function box whose `link` is set is a
//! closure: its `data` addresses a trampoline holding the code and the
//! environment, and the running frame reads its captures from that
//! environment. Throws travel as `Err(box)` until a handler installed with
//! `EnterCatch` in some frame takes them; one escaping the entry function is
//! a [`Fatal`].

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::Pos;
use crate::error::{CompileError, CompileResult};
use crate::lir::{Const, FuncRef, Function, GlobalRef, Instr, IrModule, Label, ModuleId, Slot, TableRef, Test};
use crate::module::ModuleCache;
use crate::runtime::ops::{self, Failure};
use crate::runtime::{corelib, Heap, Object, Table};
use crate::static_table::{ItemId, Literal};
use crate::value::{Address, Tag, Value};
use crate::RunResult;

pub type NativeFn = fn(&mut Engine, &[Value]) -> RunResult;

/// A function implemented by the host.
#[derive(Clone)]
pub struct Native {
    pub name: String,
    pub arity: u32,
    pub func: NativeFn,
}

impl Native {
    pub fn new(name: impl Into<String>, arity: u32, func: NativeFn) -> Self {
        Self {
            name: name.into(),
            arity,
            func,
        }
    }
}

pub struct EngineOptions {
    /// Nested calls allowed before `stack_overflow` is thrown.
    pub max_depth: usize,
    /// Keep `print` output in memory instead of writing to stdout.
    pub capture_output: bool,
    /// Log every call at trace level.
    pub trace_calls: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_depth: 512,
            capture_output: false,
            trace_calls: false,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Callee {
    Code { module: ModuleId, func: u32 },
    Native(usize),
}

#[derive(Clone, Debug)]
pub struct TraceEntry {
    pub callee: Callee,
    pub pos: Option<Pos>,
}

/// A throw that escaped the program entry.
#[derive(Clone, Debug)]
pub struct Fatal {
    pub value: Value,
    /// Display text of the thrown box.
    pub message: String,
    /// Outermost call first.
    pub trace: Vec<String>,
    /// Set when the program called `exit`; the embedder ends the process with it.
    pub exit: Option<i32>,
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.exit {
            return writeln!(f, "exit {}", code);
        }
        writeln!(f, "uncaught throw: {}", self.message)?;
        for line in &self.trace {
            writeln!(f, "  at {}", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for Fatal {}

struct Loaded {
    ir: Rc<IrModule>,
    strings: Vec<Value>,
    tables: Vec<Value>,
    cells: Vec<Address>,
    funcs: Vec<Address>,
}

struct Handler {
    target: Label,
    into: Slot,
}

struct Frame {
    slots: Vec<Value>,
    env: Option<Address>,
    handlers: Vec<Handler>,
    pc: usize,
}

/// Longest meta chain followed by a lookup.
const MAX_META_CHAIN: usize = 64;

pub struct Engine {
    heap: Heap,
    modules: Vec<Option<Loaded>>,
    natives: Vec<(Native, Address)>,
    native_index: IndexMap<String, usize>,
    failures: IndexMap<&'static str, Value>,
    trace: Vec<TraceEntry>,
    depth: usize,
    /// Exit code requested by `exit`; unwinds past every handler.
    exit: Option<i32>,
    options: EngineOptions,
    output: String,
}

impl Engine {
    /// A fresh context with the core library loaded.
    pub fn new(options: EngineOptions) -> Self {
        let mut engine = Self {
            heap: Heap::new(),
            modules: Vec::new(),
            natives: Vec::new(),
            native_index: IndexMap::new(),
            failures: IndexMap::new(),
            trace: Vec::new(),
            depth: 0,
            exit: None,
            options,
            output: String::new(),
        };
        for native in corelib::natives() {
            engine.register_native(native);
        }
        if let Err(e) = engine.load(Rc::new(corelib::module())) {
            unreachable!("core library failed to load: {}", e);
        }
        engine
    }

    pub fn register_native(&mut self, native: Native) {
        let index = self.natives.len();
        let address = self.heap.alloc(Object::Native(index));
        self.native_index.insert(native.name.clone(), index);
        self.natives.push((native, address));
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn write_line(&mut self, text: &str) {
        if self.options.capture_output {
            self.output.push_str(text);
            self.output.push('\n');
        } else {
            println!("{}", text);
        }
    }

    /// The string box thrown for a runtime failure.
    pub fn failure(&mut self, failure: Failure) -> Value {
        let name = failure.name();
        if let Some(value) = self.failures.get(name) {
            return *value;
        }
        let value = self.heap.alloc_str(name.as_bytes());
        self.failures.insert(name, value);
        value
    }

    /// Stop the program with `code`. The returned box must be thrown.
    pub fn request_exit(&mut self, code: i32, value: Value) -> Value {
        log::debug!(target: "rain::engine", "exit {}", code);
        self.exit = Some(code);
        value
    }

    pub fn string(&self, value: Value) -> Option<String> {
        self.heap.string(value)
    }

    pub fn tostr(&self, value: Value) -> String {
        ops::to_str(&self.heap, value)
    }

    pub fn is_loaded(&self, module: ModuleId) -> bool {
        self.loaded(module).is_some()
    }

    fn loaded(&self, module: ModuleId) -> Option<&Loaded> {
        self.modules.get(module.index()).and_then(Option::as_ref)
    }

    /// Load `root` and everything it imports, dependencies first.
    pub fn load_program(&mut self, cache: &ModuleCache, root: ModuleId) -> CompileResult<()> {
        for id in cache.link_order(root)? {
            if !self.is_loaded(id) {
                let module = cache.get(id).ok_or_else(|| {
                    CompileError::new(format!("module {} is not compiled", id))
                })?;
                self.load(module)?;
            }
        }
        Ok(())
    }

    /// Link one module. Its imports must already be loaded.
    pub fn load(&mut self, ir: Rc<IrModule>) -> CompileResult<()> {
        let id = ir.id;
        if self.is_loaded(id) {
            return Ok(());
        }
        for dep in &ir.imports {
            if !self.is_loaded(*dep) {
                return Err(CompileError::new(format!(
                    "module {:?} loaded before its import {}",
                    ir.name, dep
                )));
            }
        }

        let strings = ir
            .strings
            .iter()
            .map(|s| self.heap.alloc_str(s.as_bytes()))
            .collect();
        let tables = ir
            .tables
            .iter()
            .map(|t| self.heap.alloc_table(Table::with_capacity(t.capacity())))
            .collect();
        let cells = ir.cells.iter().map(|_| self.heap.alloc_cell(Value::null())).collect();
        let funcs = (0..ir.funcs.len() as u32)
            .map(|func| self.heap.alloc(Object::Code { module: id, func }))
            .collect();

        if self.modules.len() <= id.index() {
            self.modules.resize_with(id.index() + 1, || None);
        }
        self.modules[id.index()] = Some(Loaded {
            ir: ir.clone(),
            strings,
            tables,
            cells,
            funcs,
        });

        // data may refer to any table or cell of this module, so fill last
        for (index, table) in ir.tables.iter().enumerate() {
            let target = self.table_address(TableRef {
                module: id,
                index: index as u32,
            });
            for (item, entry) in table.items() {
                let key_box = self.literal(&entry.key);
                let key = self.heap.key(key_box);
                let value = self.materialize(&entry.value).map_err(|e| {
                    CompileError::new(format!("module {:?}: {}", ir.name, e))
                })?;
                let stored = target
                    .and_then(|t| self.heap.table_at_mut(t))
                    .map(|t| t.put(key, value));
                debug_assert_eq!(stored.map(|e| e.0), Some(item.0));
            }
        }
        for (index, cell) in ir.cells.iter().enumerate() {
            let value = self
                .materialize(cell)
                .map_err(|e| CompileError::new(format!("module {:?}: {}", ir.name, e)))?;
            if let Some(address) = self.loaded(id).map(|l| l.cells[index]) {
                self.heap.set_cell(address, value);
            }
        }

        log::debug!(target: "rain::engine", "loaded module {} {:?}", id, ir.name);
        Ok(())
    }

    fn literal(&mut self, literal: &Literal) -> Value {
        match literal {
            Literal::Null => Value::null(),
            Literal::Int(i) => Value::int(*i),
            Literal::Float(f) => Value::float(*f),
            Literal::Bool(b) => Value::bool(*b),
            Literal::Str(s) => self.heap.alloc_str(s.as_bytes()),
        }
    }

    fn table_address(&self, table: TableRef) -> Option<Address> {
        self.loaded(table.module)?
            .tables
            .get(table.index as usize)?
            .address()
    }

    fn func_address(&self, func: FuncRef) -> Option<Address> {
        self.loaded(func.module)?.funcs.get(func.index as usize).copied()
    }

    /// The box a link-time constant stands for.
    pub fn materialize(&mut self, value: &Const) -> Result<Value, String> {
        Ok(match value {
            Const::Null => Value::null(),
            Const::Int(i) => Value::int(*i),
            Const::Float(bits) => Value::float_bits(*bits),
            Const::Bool(b) => Value::bool(*b),
            Const::Str(s) => self
                .loaded(s.module)
                .and_then(|l| l.strings.get(s.index as usize).copied())
                .ok_or_else(|| format!("unlinked string {}.{}", s.module, s.index))?,
            Const::Table { table, meta } => {
                let address = self
                    .table_address(*table)
                    .ok_or_else(|| format!("unlinked table {}.{}", table.module, table.index))?;
                let boxed = Value::table(address);
                match meta {
                    Some(cell) => {
                        let cell = self
                            .loaded(cell.module)
                            .and_then(|l| l.cells.get(cell.index as usize).copied())
                            .ok_or_else(|| format!("unlinked cell {}.{}", cell.module, cell.index))?;
                        boxed.with_link(cell)
                    }
                    None => boxed,
                }
            }
            Const::Func { func, arity } => {
                let address = self
                    .func_address(*func)
                    .ok_or_else(|| format!("unlinked function {}.{}", func.module, func.index))?;
                Value::func(address, *arity)
            }
            Const::Native { name, arity } => {
                let index = *self
                    .native_index
                    .get(&**name)
                    .ok_or_else(|| format!("unknown native {:?}", name))?;
                let (native, address) = &self.natives[index];
                if native.arity != *arity {
                    return Err(format!("native {:?} takes {} arguments", name, native.arity));
                }
                Value::func(*address, *arity)
            }
        })
    }

    fn global_entry(&self, global: GlobalRef) -> Option<(&Table, ItemId)> {
        let address = self.table_address(global.table)?;
        match self.heap.get(address)? {
            Object::Table(t) => Some((t, global.item)),
            _ => None,
        }
    }

    pub fn global(&self, global: GlobalRef) -> Option<Value> {
        self.global_entry(global).map(|(t, e)| t.value(e))
    }

    /// Address of the box backing a module-scope variable.
    pub fn global_ptr(&self, global: GlobalRef) -> Option<*const Value> {
        self.global_entry(global).map(|(t, e)| t.value_ptr(e))
    }

    fn set_global(&mut self, global: GlobalRef, value: Value) -> Option<()> {
        let address = self.table_address(global.table)?;
        self.heap
            .table_at_mut(address)?
            .set_value(global.item, value);
        Some(())
    }

    /// Current value of export `name` of a loaded module.
    pub fn export(&self, module: ModuleId, name: &str) -> Option<Value> {
        let global = self.loaded(module)?.ir.export(name)?;
        self.global(global)
    }

    fn unlinked(&mut self, what: String) -> Value {
        log::error!(target: "rain::engine", "{}", what);
        self.heap.alloc_str(what.as_bytes())
    }

    /// Throw the failure unless `callee` is a function taking `argc` arguments.
    pub fn check_call(&mut self, callee: Value, argc: usize) -> RunResult<()> {
        if !callee.is(Tag::Func) {
            return Err(self.failure(Failure::Uncallable));
        }
        if callee.arity() as usize != argc {
            return Err(self.failure(Failure::ArgMismatch));
        }
        Ok(())
    }

    fn resolve(&mut self, callee: Value) -> RunResult<(Callee, Option<Address>)> {
        let target = match callee.address().and_then(|a| self.heap.get(a)) {
            Some(Object::Code { module, func }) => Some((*module, *func, callee.env())),
            Some(Object::Trampoline { code, env }) => match self.heap.get(*code) {
                Some(Object::Code { module, func }) => Some((*module, *func, Some(*env))),
                _ => None,
            },
            Some(Object::Native(index)) => return Ok((Callee::Native(*index), None)),
            _ => None,
        };
        match target {
            Some((module, func, env)) => Ok((Callee::Code { module, func }, env)),
            None => Err(self.failure(Failure::Uncallable)),
        }
    }

    pub fn call(&mut self, callee: Value, args: &[Value]) -> RunResult {
        self.check_call(callee, args.len())?;
        self.call_at(callee, args, None)
    }

    fn call_at(&mut self, callee: Value, args: &[Value], pos: Option<&Pos>) -> RunResult {
        if self.depth >= self.options.max_depth {
            return Err(self.failure(Failure::StackOverflow));
        }
        let (target, env) = self.resolve(callee)?;
        if self.options.trace_calls {
            log::trace!(target: "rain::engine", "{:>depth$}call {}", "", self.describe(&target), depth = self.depth);
        }

        self.trace.push(TraceEntry {
            callee: target.clone(),
            pos: pos.cloned(),
        });
        self.depth += 1;
        let result = match target {
            Callee::Code { module, func } => self.execute(module, func, env, args),
            Callee::Native(index) => {
                let func = self.natives[index].0.func;
                func(self, args)
            }
        };
        self.depth -= 1;

        // a throw leaves its frames on the trace until a handler restores it
        if result.is_ok() {
            self.trace.pop();
        }
        result
    }

    fn execute(
        &mut self,
        module: ModuleId,
        index: u32,
        env: Option<Address>,
        args: &[Value],
    ) -> RunResult {
        let ir = match self.loaded(module) {
            Some(l) => l.ir.clone(),
            None => return Err(self.unlinked(format!("call into unloaded module {}", module))),
        };
        let func = match ir.funcs.get(index as usize) {
            Some(f) => f,
            None => return Err(self.unlinked(format!("unknown function {}.{}", module, index))),
        };
        if func.arity as usize != args.len() {
            return Err(self.failure(Failure::ArgMismatch));
        }

        let mut frame = Frame {
            slots: vec![Value::null(); func.slots as usize],
            env,
            handlers: Vec::new(),
            pc: 0,
        };
        frame.slots[..args.len()].copy_from_slice(args);

        loop {
            let instr = match func.code.get(frame.pc) {
                Some(instr) => instr,
                None => return Ok(Value::null()),
            };
            frame.pc += 1;

            match self.step(func, instr, &mut frame) {
                Ok(None) => {}
                Ok(Some(value)) => return Ok(value),
                Err(thrown) if self.exit.is_some() => return Err(thrown),
                Err(thrown) => match frame.handlers.pop() {
                    Some(handler) => {
                        frame.slots[handler.into.0 as usize] = thrown;
                        frame.pc = func.target(handler.target);
                    }
                    None => return Err(thrown),
                },
            }
        }
    }

    fn load_env(&mut self, env: Option<Address>, index: u32) -> RunResult {
        match env.and_then(|a| self.heap.env(a)) {
            Some(slots) => Ok(slots.get(index as usize).copied().unwrap_or_default()),
            None => Err(self.unlinked("closure environment missing".to_string())),
        }
    }

    fn store_env(&mut self, env: Option<Address>, index: u32, value: Value) -> RunResult<()> {
        if let Some(slot) = env
            .and_then(|a| self.heap.env_mut(a))
            .and_then(|slots| slots.get_mut(index as usize))
        {
            *slot = value;
            return Ok(());
        }
        Err(self.unlinked(format!("closure environment has no slot {}", index)))
    }

    fn step(&mut self, func: &Function, instr: &Instr, frame: &mut Frame) -> RunResult<Option<Value>> {
        macro_rules! slot {
            ($s:expr) => {
                frame.slots[$s.0 as usize]
            };
        }

        match instr {
            Instr::Const { dst, value } => {
                let value = match self.materialize(value) {
                    Ok(v) => v,
                    Err(e) => return Err(self.unlinked(e)),
                };
                slot!(dst) = value;
            }
            Instr::Move { dst, src } => slot!(dst) = slot!(src),
            Instr::LoadGlobal { dst, global } => match self.global(*global) {
                Some(value) => slot!(dst) = value,
                None => return Err(self.unlinked(format!("unlinked global {:?}", global))),
            },
            Instr::StoreGlobal { global, src } => {
                if self.set_global(*global, slot!(src)).is_none() {
                    return Err(self.unlinked(format!("unlinked global {:?}", global)));
                }
            }
            Instr::LoadCapture { dst, index } => slot!(dst) = self.load_env(frame.env, *index)?,
            Instr::StoreCapture { index, src } => {
                let value = slot!(src);
                self.store_env(frame.env, *index, value)?;
            }
            Instr::AllocEnv { dst, len } => {
                let address = self.heap.alloc(Object::Env(vec![Value::null(); *len as usize]));
                slot!(dst) = Value::opaque(address);
            }
            Instr::InitEnv { env, index, src } => {
                let value = slot!(src);
                self.store_env(slot!(env).address(), *index, value)?;
            }
            Instr::MakeClosure { dst, func: code, arity, env } => {
                let code = match self.func_address(*code) {
                    Some(address) => address,
                    None => return Err(self.unlinked(format!("unlinked function {:?}", code))),
                };
                let env = match slot!(env).address() {
                    Some(address) => address,
                    None => return Err(self.unlinked("closure environment missing".to_string())),
                };
                let trampoline = self.heap.alloc(Object::Trampoline { code, env });
                slot!(dst) = Value::func(trampoline, *arity).with_link(env);
            }
            Instr::Binary { op, dst, lhs, rhs } => {
                let (lhs, rhs) = (slot!(lhs), slot!(rhs));
                slot!(dst) = self.binary(*op, lhs, rhs)?;
            }
            Instr::Unary { op, dst, src } => {
                let value = slot!(src);
                slot!(dst) = self.unary(*op, value)?;
            }
            Instr::NewTable { dst } => slot!(dst) = self.heap.alloc_table(Table::new()),
            Instr::Get { dst, table, key } => {
                let (table, key) = (slot!(table), slot!(key));
                slot!(dst) = self.index(table, key)?;
            }
            Instr::Put { table, key, value } => {
                let (table, key, value) = (slot!(table), slot!(key), slot!(value));
                self.put(table, key, value)?;
            }
            Instr::SetMeta { dst, table, meta } => {
                let (table, meta) = (slot!(table), slot!(meta));
                if !table.is(Tag::Table) {
                    return Err(self.failure(Failure::ArgMismatch));
                }
                let cell = self.heap.alloc_cell(meta);
                slot!(dst) = table.with_link(cell);
            }
            Instr::CheckCall { callee, argc } => self.check_call(slot!(callee), *argc as usize)?,
            Instr::Call { dst, callee, args, pos } => {
                let callee = slot!(callee);
                let args: Vec<Value> = args.iter().map(|a| slot!(a)).collect();
                slot!(dst) = self.call_at(callee, &args, pos.as_ref())?;
            }
            Instr::Throw { src } => return Err(slot!(src)),
            Instr::Jump { target } => frame.pc = func.target(*target),
            Instr::Branch { test, src, target } => {
                let value = slot!(src);
                let taken = match test {
                    Test::Truthy => value.truthy(),
                    Test::Falsy => !value.truthy(),
                    Test::Null => value.is_null(),
                };
                if taken {
                    frame.pc = func.target(*target);
                }
            }
            Instr::EnterCatch { handler, into } => frame.handlers.push(Handler {
                target: *handler,
                into: *into,
            }),
            Instr::LeaveCatch => {
                frame.handlers.pop();
            }
            Instr::SaveDepth { dst } => slot!(dst) = Value::int(self.trace.len() as i64),
            Instr::RestoreDepth { src } => {
                let depth = slot!(src).as_int().max(0) as usize;
                self.trace.truncate(depth);
            }
            Instr::Return { src } => {
                return Ok(Some(src.map(|s| slot!(s)).unwrap_or_default()));
            }
        }
        Ok(None)
    }

    /// Look `name` up in `meta` and the metas above it.
    fn lookup_chain(&self, meta: Value, name: &str) -> Option<Value> {
        let key = self.heap.key_str(name);
        let mut current = meta;
        for _ in 0..MAX_META_CHAIN {
            if let Some(value) = self.heap.table(current).and_then(|t| t.get(&key)) {
                return Some(value);
            }
            current = self.heap.meta(current)?;
        }
        None
    }

    /// An own function entry of `meta`.
    fn hook(&self, meta: Value, name: &str, arity: u32) -> Option<Value> {
        let key = self.heap.key_str(name);
        self.heap
            .table(meta)?
            .get(&key)
            .filter(|f| f.is(Tag::Func) && f.arity() == arity)
    }

    fn magic(&self, operand: Value, name: &str, arity: u32) -> Option<Value> {
        if !operand.is(Tag::Table) {
            return None;
        }
        let meta = self.heap.meta(operand)?;
        self.lookup_chain(meta, name)
            .filter(|f| f.is(Tag::Func) && f.arity() == arity)
    }

    pub fn binary(&mut self, op: crate::lir::BinOp, lhs: Value, rhs: Value) -> RunResult {
        for operand in [lhs, rhs] {
            if let Some(method) = self.magic(operand, op.method(), 2) {
                return self.call(method, &[lhs, rhs]);
            }
        }
        ops::binary(&mut self.heap, op, lhs, rhs).map_err(|f| self.failure(f))
    }

    pub fn unary(&mut self, op: crate::lir::UnOp, value: Value) -> RunResult {
        if let Some(method) = self.magic(value, op.method(), 1) {
            return self.call(method, &[value]);
        }
        ops::unary(op, value).map_err(|f| self.failure(f))
    }

    /// `obj[key]`: own entry, then the meta's `get` hook, then the meta itself.
    pub fn index(&mut self, obj: Value, key: Value) -> RunResult {
        if obj.is(Tag::Str) {
            return ops::index_str(&mut self.heap, obj, key).map_err(|f| self.failure(f));
        }

        let k = self.heap.key(key);
        let mut current = obj;
        for _ in 0..MAX_META_CHAIN {
            if let Some(value) = self.heap.table(current).and_then(|t| t.get(&k)) {
                return Ok(value);
            }
            let meta = match self.heap.meta(current) {
                Some(meta) if meta.is(Tag::Table) => meta,
                _ => return Ok(Value::null()),
            };
            if let Some(hook) = self.hook(meta, "get", 2) {
                return self.call(hook, &[current, key]);
            }
            current = meta;
        }
        Ok(Value::null())
    }

    /// `table[key] = value`; a new key goes through the meta's `set` hook if it has one.
    pub fn put(&mut self, table: Value, key: Value, value: Value) -> RunResult<()> {
        let k = self.heap.key(key);
        let present = match self.heap.table(table) {
            Some(t) => t.lookup(&k).is_some(),
            None => return Err(self.failure(Failure::ArgMismatch)),
        };
        if !present {
            if let Some(hook) = self.heap.meta(table).and_then(|m| self.hook(m, "set", 3)) {
                self.call(hook, &[table, key, value])?;
                return Ok(());
            }
        }
        if let Some(t) = self.heap.table_mut(table) {
            t.put(k, value);
        }
        Ok(())
    }

    fn describe(&self, callee: &Callee) -> String {
        match callee {
            Callee::Code { module, func } => self
                .loaded(*module)
                .and_then(|l| l.ir.funcs.get(*func as usize))
                .map(|f| f.name.clone())
                .unwrap_or_else(|| format!("{}.{}", module, func)),
            Callee::Native(index) => format!("<native {}>", self.natives[*index].0.name),
        }
    }

    fn fatal(&mut self, value: Value) -> Fatal {
        let trace = self
            .trace
            .iter()
            .map(|entry| match &entry.pos {
                Some(pos) => format!("{} ({})", self.describe(&entry.callee), pos),
                None => self.describe(&entry.callee),
            })
            .collect();
        self.trace.clear();
        self.depth = 0;
        let exit = self.exit.take();
        let fatal = Fatal {
            value,
            message: self.tostr(value),
            trace,
            exit,
        };
        if exit.is_none() {
            log::error!(target: "rain::engine", "{}", fatal);
        }
        fatal
    }

    /// Call `callee` as a program entry: an escaping throw is fatal.
    pub fn invoke(&mut self, callee: Value, args: &[Value]) -> Result<Value, Fatal> {
        self.trace.clear();
        match self.call(callee, args) {
            Ok(value) => Ok(value),
            Err(thrown) => Err(self.fatal(thrown)),
        }
    }

    /// Run the entry function of a loaded program module.
    pub fn run(&mut self, module: ModuleId) -> Result<Value, Fatal> {
        let entry = self
            .loaded(module)
            .and_then(|l| l.ir.entry)
            .and_then(|f| self.func_address(f));
        match entry {
            Some(address) => self.invoke(Value::func(address, 0), &[]),
            None => {
                let value = self.unlinked(format!("module {} has no entry function", module));
                Err(self.fatal(value))
            }
        }
    }

    /// Call export `name` of a loaded module.
    pub fn call_export(&mut self, module: ModuleId, name: &str, args: &[Value]) -> Result<Value, Fatal> {
        let callee = self.export(module, name).unwrap_or_default();
        self.invoke(callee, args)
    }
}
