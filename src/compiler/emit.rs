//! Function bodies: statements and expressions.

use crate::abort;
use crate::ast::{Node, NodeKind, Pos};
use crate::error::CompileResult;
use crate::lir::builder::Builder;
use crate::lir::{BinOp, Const, FuncRef, GlobalRef, Instr, ModuleId, Slot, Test, UnOp};
use crate::runtime::ops::Failure;

use super::control::LoopLabels;
use super::scope::{capture_set, Capture, Local, Scope};
use super::{describe, ModuleCompiler};

/// What a name refers to inside a function.
#[derive(Clone, Copy, Debug)]
pub enum Resolved {
    Local(Local),
    Capture(u32),
    Global(GlobalRef),
    Module(ModuleId),
}

pub struct FunctionCompiler<'m, 'c> {
    pub(crate) m: &'m mut ModuleCompiler<'c>,
    pub(crate) b: Builder,
    pub(crate) scopes: Vec<Scope>,
    /// Environment layout of this function, when it is a closure.
    pub(crate) captures: Vec<String>,
    pub(crate) loops: Vec<LoopLabels>,
    /// Catch regions open at the current point.
    pub(crate) catch_depth: usize,
    /// Slot written by `save`, returned by a plain `return`.
    pub(crate) saved: Option<Slot>,
}

impl<'m, 'c> FunctionCompiler<'m, 'c> {
    /// Compile a function literal into a fresh function of the module.
    pub fn compile(
        m: &'m mut ModuleCompiler<'c>,
        name: String,
        params: &[String],
        body: &Node,
        captures: Vec<String>,
    ) -> CompileResult<(FuncRef, u32)> {
        let func = m.module.declare_func();
        let arity = params.len() as u32;

        let mut scope = Scope::new();
        for (index, param) in params.iter().enumerate() {
            scope.declare(param, Slot(index as u32), true);
        }
        log::debug!(target: "rain::compile", "compiling {} ({} captures)", name, captures.len());

        let mut compiler = FunctionCompiler {
            m,
            b: Builder::new(name, arity),
            scopes: vec![scope],
            captures,
            loops: Vec::new(),
            catch_depth: 0,
            saved: None,
        };
        compiler.body(body)?;

        let FunctionCompiler { m, b, captures, saved, .. } = compiler;
        let mut code = b.finish(captures.len() as u32);
        if let Some(saved) = saved {
            for instr in &mut code.code {
                if let Instr::Return { src: src @ None } = instr {
                    *src = Some(saved);
                }
            }
        }
        m.module.define_func(func, code);
        Ok((func, arity))
    }

    /// A block body runs its statements; any other body is returned.
    fn body(&mut self, body: &Node) -> CompileResult<()> {
        match &body.kind {
            NodeKind::Block { stmts } => self.block(stmts),
            _ => {
                let value = self.for_value(body, None)?;
                self.b.emit(Instr::Return { src: Some(value) });
                Ok(())
            }
        }
    }

    pub(crate) fn scope_mut(&mut self) -> &mut Scope {
        match self.scopes.last_mut() {
            Some(scope) => scope,
            None => unreachable!("function without a scope"),
        }
    }

    pub(crate) fn block(&mut self, stmts: &[Node]) -> CompileResult<()> {
        self.scopes.push(Scope::new());
        let result = stmts.iter().try_for_each(|stmt| self.statement(stmt));
        self.scopes.pop();
        result
    }

    pub fn resolve(&self, name: &str) -> Option<Resolved> {
        for scope in self.scopes.iter().rev() {
            if let Some(local) = scope.get(name) {
                return Some(Resolved::Local(local));
            }
        }
        if let Some(index) = self.captures.iter().position(|c| c == name) {
            return Some(Resolved::Capture(index as u32));
        }
        if let Some(global) = self.m.global(name) {
            return Some(Resolved::Global(global));
        }
        if let Some(module) = self.m.aliases.get(name) {
            return Some(Resolved::Module(*module));
        }
        self.m.core_global(name).map(Resolved::Global)
    }

    pub(crate) fn statement(&mut self, node: &Node) -> CompileResult<()> {
        let pos = &node.pos;
        match &node.kind {
            NodeKind::Let { name, value } => {
                let slot = self.b.slot();
                match value {
                    Some(value) => {
                        self.scope_mut().declare(name, slot, false);
                        let value = self.for_value(value, Some(name))?;
                        self.b.emit(Instr::Move { dst: slot, src: value });
                        self.scope_mut().bind(name);
                    }
                    None => {
                        self.b.emit(Instr::Const { dst: slot, value: Const::Null });
                        self.scope_mut().declare(name, slot, true);
                    }
                }
                Ok(())
            }
            NodeKind::Assign { target, value } => self.assign(target, value, pos),
            NodeKind::Block { stmts } => self.block(stmts),
            NodeKind::If { cond, body, els } => self.if_(cond, body, els.as_deref()),
            NodeKind::While { cond, body } => self.while_(cond, body, Test::Falsy),
            NodeKind::Until { cond, body } => self.while_(cond, body, Test::Truthy),
            NodeKind::Loop { body } => self.loop_(body),
            NodeKind::Unpack { targets, value, declare } => {
                let src = self.for_value(value, None)?;
                if *declare {
                    self.declare_targets(targets)?;
                }
                self.unpack_into(targets, src)
            }
            NodeKind::For { target, func, body } => self.for_(target, func, body, pos),
            NodeKind::Break { cond } => self.break_(cond.as_deref(), false, pos),
            NodeKind::Continue { cond } => self.break_(cond.as_deref(), true, pos),
            NodeKind::Return { value } => self.return_(value.as_deref()),
            NodeKind::Catch { name, body } => self.catch(name.as_deref(), body).map(drop),
            NodeKind::Save { name, value } => self.save(name.as_deref(), value),
            NodeKind::With { value, params, body } => self.with(value, params, body, pos),
            NodeKind::Bind { names } => self.bind(names, pos),
            NodeKind::Use { name, lhs, rhs } => {
                let table = self.for_value(lhs, None)?;
                let key = self.for_value(rhs, None)?;
                let dst = self.b.slot();
                self.b.emit(Instr::Get { dst, table, key });
                self.throw_if_null(dst, Failure::KeyError);
                self.scope_mut().declare(name, dst, true);
                Ok(())
            }
            NodeKind::Error { .. } | NodeKind::Warning { .. } | NodeKind::Hint { .. } => {
                super::diagnostic(node)
            }
            NodeKind::Pass {} => Ok(()),
            NodeKind::Import { .. } | NodeKind::Export { .. } | NodeKind::Macro { .. } | NodeKind::Program { .. } => {
                abort!(pos, "{} is only allowed at module scope", describe(&node.kind))
            }
            _ => self.for_value(node, None).map(drop),
        }
    }

    fn assign(&mut self, target: &Node, value: &Node, pos: &Pos) -> CompileResult<()> {
        match &target.kind {
            NodeKind::Name { value: name } => {
                if self.resolve(name).is_none() {
                    abort!(pos, "Cannot assign to undeclared name {:?}", name);
                }
                let src = self.for_value(value, Some(name))?;
                self.store(target, src, pos)
            }
            NodeKind::Index { lhs, rhs } => {
                let table = self.for_value(lhs, None)?;
                let key = self.for_value(rhs, None)?;
                let value = self.for_value(value, None)?;
                self.b.emit(Instr::Put { table, key, value });
                Ok(())
            }
            _ => abort!(pos, "Invalid assignment target"),
        }
    }

    /// Write `src` to a name or an index expression.
    fn store(&mut self, target: &Node, src: Slot, pos: &Pos) -> CompileResult<()> {
        match &target.kind {
            NodeKind::Name { value: name } => match self.resolve(name) {
                Some(Resolved::Local(local)) => {
                    self.b.emit(Instr::Move { dst: local.slot, src });
                    Ok(())
                }
                Some(Resolved::Capture(index)) => {
                    self.b.emit(Instr::StoreCapture { index, src });
                    Ok(())
                }
                Some(Resolved::Global(global)) if global.table.module == self.m.id() => {
                    self.b.emit(Instr::StoreGlobal { global, src });
                    Ok(())
                }
                Some(_) => abort!(pos, "Cannot assign to {:?}", name),
                None => abort!(pos, "Cannot assign to undeclared name {:?}", name),
            },
            NodeKind::Index { lhs, rhs } => {
                let table = self.for_value(lhs, None)?;
                let key = self.for_value(rhs, None)?;
                self.b.emit(Instr::Put { table, key, value: src });
                Ok(())
            }
            _ => abort!(pos, "Invalid assignment target"),
        }
    }

    /// Declare every name of an unpacking pattern as a fresh local.
    pub(crate) fn declare_targets(&mut self, targets: &[Node]) -> CompileResult<()> {
        for target in targets {
            match &target.kind {
                NodeKind::Name { value: name } => {
                    let slot = self.b.constant(Const::Null);
                    self.scope_mut().declare(name, slot, true);
                }
                NodeKind::Array { items } => self.declare_targets(items)?,
                _ => abort!(&target.pos, "Only names can be declared by unpacking"),
            }
        }
        Ok(())
    }

    /// Store item `i` of `src` into target `i`, recursing into nested patterns.
    /// Every item is read before anything is stored.
    pub(crate) fn unpack_into(&mut self, targets: &[Node], src: Slot) -> CompileResult<()> {
        let mut items = Vec::with_capacity(targets.len());
        for index in 0..targets.len() {
            let key = self.b.constant(Const::Int(index as i64));
            let dst = self.b.slot();
            self.b.emit(Instr::Get { dst, table: src, key });
            items.push(dst);
        }
        for (target, item) in targets.iter().zip(items) {
            match &target.kind {
                NodeKind::Array { items: nested } => self.unpack_into(nested, item)?,
                _ => self.store(target, item, &target.pos)?,
            }
        }
        Ok(())
    }

    /// `bind names`: copy captured names into locals of the current scope.
    fn bind(&mut self, names: &[String], pos: &Pos) -> CompileResult<()> {
        for name in names {
            let index = match self.resolve(name) {
                Some(Resolved::Capture(index)) => index,
                Some(_) => abort!(pos, "Cannot bind {:?}: it is not captured", name),
                None => abort!(pos, "Unknown name {:?}", name),
            };
            let dst = self.b.slot();
            self.b.emit(Instr::LoadCapture { dst, index });
            self.throw_if_null(dst, Failure::UnboundVar);
            self.scope_mut().declare(name, dst, true);
        }
        Ok(())
    }

    /// Throw the failure's name when `src` holds null.
    fn throw_if_null(&mut self, src: Slot, failure: Failure) {
        let fail = self.b.label();
        let ok = self.b.label();
        self.b.emit(Instr::Branch {
            test: Test::Null,
            src,
            target: fail,
        });
        self.b.emit(Instr::Jump { target: ok });
        self.b.bind(fail);
        let name = self.m.module.intern(failure.name());
        let thrown = self.b.constant(Const::Str(name));
        self.b.emit(Instr::Throw { src: thrown });
        self.b.bind(ok);
    }

    /// Compile `node` for its value; the returned slot holds it.
    pub(crate) fn for_value(&mut self, node: &Node, hint: Option<&str>) -> CompileResult<Slot> {
        let pos = &node.pos;
        Ok(match &node.kind {
            NodeKind::Null {} => self.b.constant(Const::Null),
            NodeKind::Int { value } => self.b.constant(Const::Int(*value)),
            NodeKind::Float { value } => self.b.constant(Const::float(*value)),
            NodeKind::Bool { value } => self.b.constant(Const::Bool(*value)),
            NodeKind::Str { value } => {
                let s = self.m.module.intern(value);
                self.b.constant(Const::Str(s))
            }
            NodeKind::Name { value } => self.name(value, pos)?,
            NodeKind::Table {} => self.new_table(),
            NodeKind::Array { items } => {
                let table = self.new_table();
                for (index, item) in items.iter().enumerate() {
                    let key = self.b.constant(Const::Int(index as i64));
                    let value = self.for_value(item, None)?;
                    self.b.emit(Instr::Put { table, key, value });
                }
                self.set_proto(table, "array");
                table
            }
            NodeKind::Dict { keys, values } => {
                let table = self.new_table();
                for (key, value) in keys.iter().zip(values) {
                    let key = self.for_value(key, None)?;
                    let value = self.for_value(value, None)?;
                    self.b.emit(Instr::Put { table, key, value });
                }
                self.set_proto(table, "dict");
                table
            }
            NodeKind::Func { params, body } => self.closure(params, body, hint)?,
            NodeKind::Call { func, args, catch } => {
                let callee = self.for_value(func, None)?;
                let args = self.arguments(None, args)?;
                self.emit_call(callee, args, *catch, pos)
            }
            NodeKind::Method { lhs, key, args, catch } => {
                let object = self.for_value(lhs, None)?;
                let key = self.for_value(key, None)?;
                let callee = self.b.slot();
                self.b.emit(Instr::Get {
                    dst: callee,
                    table: object,
                    key,
                });
                let args = self.arguments(Some(object), args)?;
                self.emit_call(callee, args, *catch, pos)
            }
            NodeKind::Index { lhs, rhs } => self.index(lhs, rhs, pos)?,
            NodeKind::Unary { op, value } => {
                let op = match UnOp::from_symbol(op) {
                    Some(op) => op,
                    None => abort!(pos, "Unknown operator {:?}", op),
                };
                let src = self.for_value(value, None)?;
                let dst = self.b.slot();
                self.b.emit(Instr::Unary { op, dst, src });
                dst
            }
            NodeKind::Binary { op, lhs, rhs } => self.binary(op, lhs, rhs, pos)?,
            NodeKind::Catch { name, body } => self.catch(name.as_deref(), body)?,
            other => abort!(pos, "{} is not an expression", describe(other)),
        })
    }

    fn name(&mut self, name: &str, pos: &Pos) -> CompileResult<Slot> {
        Ok(match self.resolve(name) {
            Some(Resolved::Local(local)) => local.slot,
            Some(Resolved::Capture(index)) => {
                let dst = self.b.slot();
                self.b.emit(Instr::LoadCapture { dst, index });
                dst
            }
            Some(Resolved::Global(global)) => {
                let dst = self.b.slot();
                self.b.emit(Instr::LoadGlobal { dst, global });
                dst
            }
            Some(Resolved::Module(module)) => self.b.constant(Const::Table {
                table: crate::lir::TableRef::exports(module),
                meta: None,
            }),
            None => abort!(pos, "Unknown name {:?}", name),
        })
    }

    fn new_table(&mut self) -> Slot {
        let dst = self.b.slot();
        self.b.emit(Instr::NewTable { dst });
        dst
    }

    /// Give a literal table the core prototype `proto` as its meta.
    fn set_proto(&mut self, table: Slot, proto: &str) {
        if let Some(global) = self.m.core_global(proto) {
            let meta = self.b.slot();
            self.b.emit(Instr::LoadGlobal { dst: meta, global });
            self.b.emit(Instr::SetMeta {
                dst: table,
                table,
                meta,
            });
        }
    }

    fn arguments(&mut self, receiver: Option<Slot>, args: &[Node]) -> CompileResult<Vec<Slot>> {
        let mut slots: Vec<Slot> = receiver.into_iter().collect();
        for arg in args {
            slots.push(self.for_value(arg, None)?);
        }
        Ok(slots)
    }

    pub(crate) fn emit_call(&mut self, callee: Slot, args: Vec<Slot>, catch: bool, pos: &Pos) -> Slot {
        let dst = self.b.slot();
        let pos = self.m.options.trace_calls.then(|| pos.clone());
        if catch {
            self.protected_call(dst, callee, args, pos);
        } else {
            self.b.emit(Instr::CheckCall {
                callee,
                argc: args.len() as u32,
            });
            self.b.emit(Instr::Call { dst, callee, args, pos });
        }
        dst
    }

    fn index(&mut self, lhs: &Node, rhs: &Node, pos: &Pos) -> CompileResult<Slot> {
        // `module.name` is resolved at compile time
        if let (NodeKind::Name { value: alias }, NodeKind::Str { value: key }) = (&lhs.kind, &rhs.kind) {
            if let Some(Resolved::Module(module)) = self.resolve(alias) {
                let global = self.m.foreign_global(module, key, pos)?;
                let dst = self.b.slot();
                self.b.emit(Instr::LoadGlobal { dst, global });
                return Ok(dst);
            }
        }
        let table = self.for_value(lhs, None)?;
        let key = self.for_value(rhs, None)?;
        let dst = self.b.slot();
        self.b.emit(Instr::Get { dst, table, key });
        Ok(dst)
    }

    fn binary(&mut self, op: &str, lhs: &Node, rhs: &Node, pos: &Pos) -> CompileResult<Slot> {
        match op {
            "|" | "&" => {
                let dst = self.b.slot();
                let end = self.b.label();
                let value = self.for_value(lhs, None)?;
                self.b.emit(Instr::Move { dst, src: value });
                let test = if op == "|" { Test::Truthy } else { Test::Falsy };
                self.b.emit(Instr::Branch { test, src: dst, target: end });
                let value = self.for_value(rhs, None)?;
                self.b.emit(Instr::Move { dst, src: value });
                self.b.bind(end);
                Ok(dst)
            }
            "::" => {
                let table = self.for_value(lhs, None)?;
                let meta = self.for_value(rhs, None)?;
                let dst = self.b.slot();
                self.b.emit(Instr::SetMeta { dst, table, meta });
                Ok(dst)
            }
            _ => {
                let op = match BinOp::from_symbol(op) {
                    Some(op) => op,
                    None => abort!(pos, "Unknown operator {:?}", op),
                };
                let lhs = self.for_value(lhs, None)?;
                let rhs = self.for_value(rhs, None)?;
                let dst = self.b.slot();
                self.b.emit(Instr::Binary { op, dst, lhs, rhs });
                Ok(dst)
            }
        }
    }

    /// A function literal. Without captures it is a plain function constant;
    /// otherwise its environment is filled in capture order and the closure
    /// itself is stored into the slots of names still unbound.
    pub(crate) fn closure(&mut self, params: &[String], body: &Node, hint: Option<&str>) -> CompileResult<Slot> {
        let set = capture_set(&self.captures, &self.scopes);
        let name = self.m.func_name(hint);
        let layout: Vec<String> = set.keys().cloned().collect();
        let (func, arity) = FunctionCompiler::compile(&mut *self.m, name, params, body, layout)?;

        if set.is_empty() {
            return Ok(self.b.constant(Const::Func { func, arity }));
        }

        let env = self.b.slot();
        self.b.emit(Instr::AllocEnv {
            dst: env,
            len: set.len() as u32,
        });
        let mut itself = Vec::new();
        for (index, capture) in set.values().enumerate() {
            let index = index as u32;
            match *capture {
                Capture::Local(src) => self.b.emit(Instr::InitEnv { env, index, src }),
                Capture::Outer(outer) => {
                    let src = self.b.slot();
                    self.b.emit(Instr::LoadCapture { dst: src, index: outer });
                    self.b.emit(Instr::InitEnv { env, index, src });
                }
                Capture::Itself => itself.push(index),
            }
        }

        let dst = self.b.slot();
        self.b.emit(Instr::MakeClosure { dst, func, arity, env });
        for index in itself {
            self.b.emit(Instr::InitEnv { env, index, src: dst });
        }
        Ok(dst)
    }
}
