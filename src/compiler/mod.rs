//! # Compiler
//!
//! Lowers one module's syntax tree to LIR.
//!
//! Module scope is evaluated statically: every `let` becomes an entry of the
//! export table, literal tables become static tables and function literals
//! are compiled to function constants. Nothing at module scope runs at load
//! time, so calls, operators (other than `::`) and control flow are rejected
//! there.
//!
//! Function bodies are compiled by [`emit::FunctionCompiler`], with closure
//! capture in [`scope`] and catch/loop lowering in [`control`].

pub mod control;
pub mod emit;
pub mod scope;

use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::abort;
use crate::ast::{Node, NodeKind, Pos};
use crate::error::CompileResult;
use crate::lir::builder::{Builder, ModuleBuilder};
use crate::lir::{Const, GlobalRef, Instr, IrModule, ModuleId, TableRef};
use crate::module::{ModuleCache, ModuleSource};
use crate::static_table::Literal;

use self::emit::FunctionCompiler;

#[derive(Clone, Copy, Debug)]
pub struct CompileOptions {
    /// Synthesize an entry function that runs every linked `init`, then `main`.
    pub entry: bool,
    /// Record source positions on call sites for call traces.
    pub trace_calls: bool,
    /// Call depth limit of the engines private to macros.
    pub macro_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            entry: false,
            trace_calls: true,
            macro_depth: 256,
        }
    }
}

/// State of the module being compiled.
pub struct ModuleCompiler<'c> {
    pub(crate) cache: &'c mut ModuleCache,
    pub(crate) source: &'c mut dyn ModuleSource,
    pub(crate) options: CompileOptions,
    pub(crate) path: Option<PathBuf>,
    pub(crate) module: ModuleBuilder,
    /// Import aliases visible in this module.
    pub(crate) aliases: IndexMap<String, ModuleId>,
    /// Names bound by `use` to entries of static tables.
    uses: IndexMap<String, GlobalRef>,
    pub(crate) core: Rc<IrModule>,
    lambdas: u32,
}

/// Compile `tree` as module `id`.
pub fn compile_module(
    cache: &mut ModuleCache,
    source: &mut dyn ModuleSource,
    id: ModuleId,
    name: &str,
    path: Option<&Path>,
    tree: &Node,
    options: CompileOptions,
) -> CompileResult<IrModule> {
    let core = cache.core();
    let mut compiler = ModuleCompiler {
        cache,
        source,
        options,
        path: path.map(Path::to_path_buf),
        module: ModuleBuilder::new(id, name),
        aliases: IndexMap::new(),
        uses: IndexMap::new(),
        core,
        lambdas: 0,
    };
    compiler.module.add_import(ModuleId::CORE);

    let stmts = match &tree.kind {
        NodeKind::Program { stmts } => stmts.as_slice(),
        _ => std::slice::from_ref(tree),
    };
    for stmt in stmts {
        compiler.statement(stmt)?;
    }
    if options.entry {
        compiler.entry(&tree.pos)?;
    }

    let ir = compiler.module.finish();
    crate::lir::disasm::trace(&ir);
    Ok(ir)
}

fn literal_key(node: &Node) -> Option<Literal> {
    Some(match &node.kind {
        NodeKind::Null {} => Literal::Null,
        NodeKind::Int { value } => Literal::Int(*value),
        NodeKind::Float { value } => Literal::Float(*value),
        NodeKind::Bool { value } => Literal::Bool(*value),
        NodeKind::Str { value } => Literal::Str(value.clone()),
        _ => return None,
    })
}

impl<'c> ModuleCompiler<'c> {
    pub fn id(&self) -> ModuleId {
        self.module.id()
    }

    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub(crate) fn func_name(&mut self, hint: Option<&str>) -> String {
        match hint {
            Some(name) => format!("{}.{}", self.module.name(), name),
            None => {
                self.lambdas += 1;
                format!("{}.lambda{}", self.module.name(), self.lambdas)
            }
        }
    }

    /// A module-scope name of this module: an export, or a `use` binding.
    pub(crate) fn global(&self, name: &str) -> Option<GlobalRef> {
        self.module
            .exports()
            .lookup(&Literal::from(name))
            .map(|item| GlobalRef {
                table: TableRef::exports(self.id()),
                item,
            })
            .or_else(|| self.uses.get(name).copied())
    }

    /// Export `name` of the core library.
    pub(crate) fn core_global(&self, name: &str) -> Option<GlobalRef> {
        self.core.export(name)
    }

    /// The static value of a global of any compiled module, this one included.
    fn global_value(&self, global: GlobalRef) -> Option<Const> {
        let table = self.static_table(global.table)?;
        Some(table.value(global.item).clone())
    }

    fn static_table(&self, table: TableRef) -> Option<&crate::static_table::StaticTable<Const>> {
        if table.module == self.id() {
            return Some(self.module.table(table.index));
        }
        self.cache
            .get_ref(table.module)
            .map(|ir| ir.table(table.index))
    }

    /// Export `key` of an imported module.
    pub(crate) fn foreign_global(&self, module: ModuleId, key: &str, pos: &Pos) -> CompileResult<GlobalRef> {
        let ir = match self.cache.get_ref(module) {
            Some(ir) => ir,
            None => abort!(pos, "Module {} is not compiled", module),
        };
        match ir.export(key) {
            Some(global) => Ok(global),
            None => abort!(pos, "Unknown key {:?} in module {:?}", key, ir.name),
        }
    }

    fn statement(&mut self, node: &Node) -> CompileResult<()> {
        let pos = &node.pos;
        match &node.kind {
            NodeKind::Let { name, value } => {
                // declared first so the initializer can refer to itself
                let global = self.module.export(name, Const::Null);
                if let Some(value) = value {
                    let value = self.evaluate(value, Some(name))?;
                    *self.module.table_mut(0).value_mut(global.item) = value;
                }
                Ok(())
            }
            NodeKind::Assign { target, value } => self.assign(target, value, pos),
            NodeKind::Import { name, rename } => self.import(name, rename.as_deref(), pos),
            NodeKind::Export { name, symbol } => match self.global(name) {
                Some(global) => {
                    self.module.add_foreign(symbol, global);
                    Ok(())
                }
                None => abort!(pos, "Cannot export undeclared name {:?}", name),
            },
            NodeKind::Macro { name, .. } => {
                log::debug!(target: "rain::compile", "macro {} is expanded by the parser", name);
                Ok(())
            }
            NodeKind::Use { name, lhs, rhs } => {
                let global = self.static_entry(lhs, rhs, pos)?;
                self.uses.insert(name.clone(), global);
                Ok(())
            }
            NodeKind::Unpack { .. } => abort!(pos, "Unable to unpack at module scope"),
            NodeKind::Error { .. } | NodeKind::Warning { .. } | NodeKind::Hint { .. } => diagnostic(node),
            NodeKind::Pass {} => Ok(()),
            NodeKind::Block { stmts } | NodeKind::Program { stmts } => {
                stmts.iter().try_for_each(|stmt| self.statement(stmt))
            }
            other => abort!(pos, "{} is not allowed at module scope", describe(other)),
        }
    }

    fn assign(&mut self, target: &Node, value: &Node, pos: &Pos) -> CompileResult<()> {
        match &target.kind {
            NodeKind::Name { value: name } => {
                let global = match self.global(name) {
                    Some(global) => global,
                    None => abort!(pos, "Cannot assign to undeclared name {:?}", name),
                };
                if global.table.module != self.id() {
                    abort!(pos, "Cannot assign to {:?}", name);
                }
                let value = self.evaluate(value, Some(name))?;
                *self.module.table_mut(global.table.index).value_mut(global.item) = value;
                Ok(())
            }
            NodeKind::Index { lhs, rhs } => {
                let table = match self.evaluate(lhs, None)? {
                    Const::Table { table, .. } => table,
                    other => abort!(&lhs.pos, "Cannot index a {} value", other.type_name()),
                };
                if table.module != self.id() {
                    abort!(pos, "Cannot modify a table of another module");
                }
                let key = match literal_key(rhs) {
                    Some(key) => key,
                    None => abort!(&rhs.pos, "non-literal static key"),
                };
                let value = self.evaluate(value, None)?;
                self.module.table_mut(table.index).put(key, value);
                Ok(())
            }
            _ => abort!(pos, "Invalid assignment target"),
        }
    }

    fn import(&mut self, name: &str, rename: Option<&str>, pos: &Pos) -> CompileResult<()> {
        let id = self
            .cache
            .import(&mut *self.source, name, self.path.as_deref(), self.options)
            .map_err(|e| e.or_at(pos))?;
        self.module.add_import(id);
        let alias = match rename {
            Some(alias) => alias.to_owned(),
            None => Path::new(name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.to_owned()),
        };
        self.aliases.insert(alias, id);
        Ok(())
    }

    fn literal_meta(&mut self, proto: &str) -> Option<crate::lir::CellRef> {
        let proto = self.core_global(proto).and_then(|g| self.global_value(g))?;
        Some(self.module.new_cell(proto))
    }

    /// Static value of an expression at module scope.
    pub(crate) fn evaluate(&mut self, node: &Node, hint: Option<&str>) -> CompileResult<Const> {
        let pos = &node.pos;
        Ok(match &node.kind {
            NodeKind::Null {} => Const::Null,
            NodeKind::Int { value } => Const::Int(*value),
            NodeKind::Float { value } => Const::float(*value),
            NodeKind::Bool { value } => Const::Bool(*value),
            NodeKind::Str { value } => Const::Str(self.module.intern(value)),
            NodeKind::Name { value } => self.static_name(value, pos)?,
            NodeKind::Table {} => Const::Table {
                table: self.module.new_table(),
                meta: None,
            },
            NodeKind::Array { items } => {
                let table = self.module.new_table();
                for (i, item) in items.iter().enumerate() {
                    let value = self.evaluate(item, None)?;
                    self.module.table_mut(table.index).put(Literal::Int(i as i64), value);
                }
                Const::Table {
                    table,
                    meta: self.literal_meta("array"),
                }
            }
            NodeKind::Dict { keys, values } => {
                let table = self.module.new_table();
                for (key, value) in keys.iter().zip(values) {
                    let key = match literal_key(key) {
                        Some(key) => key,
                        None => abort!(&key.pos, "non-literal static key"),
                    };
                    let value = self.evaluate(value, None)?;
                    self.module.table_mut(table.index).put(key, value);
                }
                Const::Table {
                    table,
                    meta: self.literal_meta("dict"),
                }
            }
            NodeKind::Func { params, body } => {
                let name = self.func_name(hint);
                let (func, arity) = FunctionCompiler::compile(self, name, params, body, Vec::new())?;
                Const::Func { func, arity }
            }
            NodeKind::Binary { op, lhs, rhs } if op == "::" => {
                let table = match self.evaluate(lhs, None)? {
                    Const::Table { table, .. } => table,
                    other => abort!(&lhs.pos, "`::` expects a table, got {}", other.type_name()),
                };
                let meta = self.evaluate(rhs, None)?;
                let cell = self.module.new_cell(meta);
                Const::Table {
                    table,
                    meta: Some(cell),
                }
            }
            NodeKind::Index { lhs, rhs } => self.static_index(lhs, rhs, pos)?,
            other => abort!(pos, "{} is not allowed at module scope", describe(other)),
        })
    }

    fn static_name(&self, name: &str, pos: &Pos) -> CompileResult<Const> {
        if let Some(value) = self.global(name).and_then(|g| self.global_value(g)) {
            return Ok(value);
        }
        if let Some(module) = self.aliases.get(name) {
            return Ok(Const::Table {
                table: TableRef::exports(*module),
                meta: None,
            });
        }
        if let Some(value) = self.core_global(name).and_then(|g| self.global_value(g)) {
            return Ok(value);
        }
        abort!(pos, "Unknown name {:?}", name)
    }

    fn static_index(&mut self, lhs: &Node, rhs: &Node, pos: &Pos) -> CompileResult<Const> {
        let table = match self.evaluate(lhs, None)? {
            Const::Table { table, .. } => table,
            other => abort!(&lhs.pos, "Cannot index a {} value", other.type_name()),
        };
        let key = match literal_key(rhs) {
            Some(key) => key,
            None => abort!(&rhs.pos, "non-literal static key"),
        };
        let found = self
            .static_table(table)
            .and_then(|t| t.get(&key))
            .cloned();
        match found {
            Some(value) => Ok(value),
            None => abort!(pos, "key error: {} not found", key),
        }
    }

    /// The entry `lhs[rhs]` of a static table or an imported module.
    fn static_entry(&mut self, lhs: &Node, rhs: &Node, pos: &Pos) -> CompileResult<GlobalRef> {
        if let (NodeKind::Name { value: alias }, NodeKind::Str { value: key }) = (&lhs.kind, &rhs.kind) {
            if let Some(module) = self.aliases.get(alias).copied() {
                return match self.cache.get_ref(module).and_then(|ir| ir.export(key)) {
                    Some(global) => Ok(global),
                    None => abort!(pos, "Key error: {:?} not found", key),
                };
            }
        }
        let table = match self.evaluate(lhs, None)? {
            Const::Table { table, .. } => table,
            other => abort!(&lhs.pos, "Cannot index a {} value", other.type_name()),
        };
        let key = match literal_key(rhs) {
            Some(key) => key,
            None => abort!(&rhs.pos, "non-literal static key"),
        };
        match self.static_table(table).and_then(|t| t.lookup(&key)) {
            Some(item) => Ok(GlobalRef { table, item }),
            None => abort!(pos, "Key error: {} not found", key),
        }
    }

    /// The program entry: each linked module's `init`, in link order, then `main`.
    fn entry(&mut self, pos: &Pos) -> CompileResult<()> {
        let main = match self.global("main") {
            Some(main) => main,
            None => abort!(pos, "Entry module {:?} has no main", self.name()),
        };

        let mut order = self.cache.dependency_order(self.module.imports())?;
        order.push(self.id());

        let mut b = Builder::new(format!("{}.entry", self.name()), 0);
        for id in order {
            let init = if id == self.id() {
                self.global("init")
            } else {
                self.cache.get_ref(id).and_then(|ir| ir.export("init"))
            };
            if let Some(global) = init {
                call_global(&mut b, global, None);
            }
        }
        let result = call_global(&mut b, main, Some(pos.clone()));
        b.emit(Instr::Return { src: Some(result) });

        let func = self.module.declare_func();
        self.module.define_func(func, b.finish(0));
        self.module.set_entry(func);
        Ok(())
    }
}

fn call_global(b: &mut Builder, global: GlobalRef, pos: Option<Pos>) -> crate::lir::Slot {
    let callee = b.slot();
    b.emit(Instr::LoadGlobal { dst: callee, global });
    b.emit(Instr::CheckCall { callee, argc: 0 });
    let dst = b.slot();
    b.emit(Instr::Call {
        dst,
        callee,
        args: Vec::new(),
        pos,
    });
    dst
}

/// `error` aborts the compilation; `warning` and `hint` are logged.
pub(crate) fn diagnostic(node: &Node) -> CompileResult<()> {
    match &node.kind {
        NodeKind::Error { message } => abort!(&node.pos, "{}", message),
        NodeKind::Warning { message } => {
            log::warn!(target: "rain::compile", "{}: warning: {}", node.pos, message);
        }
        NodeKind::Hint { message } => {
            log::info!(target: "rain::compile", "{}: hint: {}", node.pos, message);
        }
        _ => {}
    }
    Ok(())
}

/// How a node kind reads in diagnostics.
pub(crate) fn describe(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Call { .. } | NodeKind::Method { .. } => "A call".to_string(),
        NodeKind::Binary { op, .. } => format!("Operator {:?}", op),
        NodeKind::Unary { op, .. } => format!("Operator {:?}", op),
        other => {
            let name = other.name();
            let mut chars = name.chars();
            match chars.next() {
                Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str()),
                None => String::new(),
            }
        }
    }
}
