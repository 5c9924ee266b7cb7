//! Control flow: conditionals, loops, `catch` regions and protected calls.
//!
//! A catch region lowers to
//!
//! ```text
//!     into = null
//!     save_depth d
//!     enter_catch handler, into
//!     <body>
//!     leave_catch
//!     jump end
//! handler:
//! end:
//!     restore_depth d
//! ```
//!
//! The engine pops the innermost handler of the frame when something throws,
//! stores the thrown box in `into` and resumes at `handler`.

use crate::abort;
use crate::ast::{Node, NodeKind, Pos};
use crate::error::CompileResult;
use crate::lir::{Const, Instr, Label, Slot, Test};

use super::emit::FunctionCompiler;
use super::scope::Scope;

#[derive(Clone, Copy, Debug)]
pub struct LoopLabels {
    pub continue_to: Label,
    pub break_to: Label,
    /// Catch regions already open when the loop was entered.
    pub catch_depth: usize,
}

impl<'m, 'c> FunctionCompiler<'m, 'c> {
    pub(crate) fn if_(&mut self, cond: &Node, body: &Node, els: Option<&Node>) -> CompileResult<()> {
        let otherwise = self.b.label();
        let end = self.b.label();
        let test = self.for_value(cond, None)?;
        self.b.emit(Instr::Branch {
            test: Test::Falsy,
            src: test,
            target: otherwise,
        });
        self.statement(body)?;
        self.b.emit(Instr::Jump { target: end });
        self.b.bind(otherwise);
        if let Some(els) = els {
            self.statement(els)?;
        }
        self.b.bind(end);
        Ok(())
    }

    /// `while` leaves when the condition is falsy, `until` when it is truthy.
    pub(crate) fn while_(&mut self, cond: &Node, body: &Node, exit: Test) -> CompileResult<()> {
        let start = self.b.label();
        let end = self.b.label();
        self.b.bind(start);
        let test = self.for_value(cond, None)?;
        self.b.emit(Instr::Branch {
            test: exit,
            src: test,
            target: end,
        });
        self.loop_body(body, start, end)?;
        self.b.emit(Instr::Jump { target: start });
        self.b.bind(end);
        Ok(())
    }

    pub(crate) fn loop_(&mut self, body: &Node) -> CompileResult<()> {
        let start = self.b.label();
        let end = self.b.label();
        self.b.bind(start);
        self.loop_body(body, start, end)?;
        self.b.emit(Instr::Jump { target: start });
        self.b.bind(end);
        Ok(())
    }

    /// `for target in func`: call `func` until it returns null. An array
    /// target unpacks each result.
    pub(crate) fn for_(&mut self, target: &Node, func: &Node, body: &Node, pos: &Pos) -> CompileResult<()> {
        let value = self.for_value(func, None)?;
        let callee = self.b.slot();
        self.b.emit(Instr::Move { dst: callee, src: value });
        self.b.emit(Instr::CheckCall { callee, argc: 0 });

        self.scopes.push(Scope::new());
        let var = self.b.slot();
        let targets = match &target.kind {
            NodeKind::Name { value: name } => {
                self.scope_mut().declare(name, var, true);
                None
            }
            NodeKind::Array { items } => {
                self.declare_targets(items)?;
                Some(items)
            }
            _ => {
                self.scopes.pop();
                abort!(&target.pos, "Invalid loop target");
            }
        };

        let start = self.b.label();
        let end = self.b.label();
        self.b.bind(start);
        self.b.emit(Instr::Call {
            dst: var,
            callee,
            args: Vec::new(),
            pos: self.m.options.trace_calls.then(|| pos.clone()),
        });
        self.b.emit(Instr::Branch {
            test: Test::Null,
            src: var,
            target: end,
        });
        let result = match targets {
            Some(items) => self.unpack_into(items, var).and_then(|()| self.loop_body(body, start, end)),
            None => self.loop_body(body, start, end),
        };
        self.scopes.pop();
        result?;

        self.b.emit(Instr::Jump { target: start });
        self.b.bind(end);
        Ok(())
    }

    fn loop_body(&mut self, body: &Node, continue_to: Label, break_to: Label) -> CompileResult<()> {
        self.loops.push(LoopLabels {
            continue_to,
            break_to,
            catch_depth: self.catch_depth,
        });
        let result = self.statement(body);
        self.loops.pop();
        result
    }

    /// `break`/`continue`, optionally conditional, leaving every catch region
    /// opened inside the loop.
    pub(crate) fn break_(&mut self, cond: Option<&Node>, is_continue: bool, pos: &Pos) -> CompileResult<()> {
        let labels = match self.loops.last() {
            Some(labels) => *labels,
            None if is_continue => abort!(pos, "continue outside of a loop"),
            None => abort!(pos, "break outside of a loop"),
        };

        let skip = match cond {
            Some(cond) => {
                let skip = self.b.label();
                let test = self.for_value(cond, None)?;
                self.b.emit(Instr::Branch {
                    test: Test::Falsy,
                    src: test,
                    target: skip,
                });
                Some(skip)
            }
            None => None,
        };

        for _ in labels.catch_depth..self.catch_depth {
            self.b.emit(Instr::LeaveCatch);
        }
        let target = if is_continue {
            labels.continue_to
        } else {
            labels.break_to
        };
        self.b.emit(Instr::Jump { target });

        if let Some(skip) = skip {
            self.b.bind(skip);
        }
        Ok(())
    }

    /// A plain `return` gives back whatever `save` stored.
    pub(crate) fn return_(&mut self, value: Option<&Node>) -> CompileResult<()> {
        let src = match value {
            Some(value) => Some(self.for_value(value, None)?),
            None => None,
        };
        self.b.emit(Instr::Return { src });
        Ok(())
    }

    /// `save [name] = value`
    pub(crate) fn save(&mut self, name: Option<&str>, value: &Node) -> CompileResult<()> {
        let src = self.for_value(value, name)?;
        let saved = match self.saved {
            Some(slot) => slot,
            None => {
                let slot = self.b.slot();
                self.saved = Some(slot);
                slot
            }
        };
        self.b.emit(Instr::Move { dst: saved, src });
        if let Some(name) = name {
            self.scope_mut().declare(name, saved, true);
        }
        Ok(())
    }

    /// `with value as params { body }` is `value(func(params) { body })`.
    pub(crate) fn with(&mut self, value: &Node, params: &[String], body: &Node, pos: &Pos) -> CompileResult<()> {
        let callee = self.for_value(value, None)?;
        let block = self.closure(params, body, None)?;
        self.emit_call(callee, vec![block], false, pos);
        Ok(())
    }

    /// `catch [name] { body }`: null, or the box thrown inside `body`.
    pub(crate) fn catch(&mut self, name: Option<&str>, body: &Node) -> CompileResult<Slot> {
        let into = self.b.constant(Const::Null);
        let depth = self.b.slot();
        let handler = self.b.label();
        let end = self.b.label();

        self.b.emit(Instr::SaveDepth { dst: depth });
        self.b.emit(Instr::EnterCatch { handler, into });
        self.catch_depth += 1;
        let result = self.statement(body);
        self.catch_depth -= 1;
        result?;
        self.b.emit(Instr::LeaveCatch);
        self.b.emit(Instr::Jump { target: end });
        self.b.bind(handler);
        self.b.bind(end);
        self.b.emit(Instr::RestoreDepth { src: depth });

        if let Some(name) = name {
            self.scope_mut().declare(name, into, true);
        }
        Ok(into)
    }

    /// `f?(args)`: a catch region around a single call, writing either the
    /// result or the thrown box to `dst`.
    pub(crate) fn protected_call(&mut self, dst: Slot, callee: Slot, args: Vec<Slot>, pos: Option<Pos>) {
        let depth = self.b.slot();
        let handler = self.b.label();
        self.b.emit(Instr::SaveDepth { dst: depth });
        self.b.emit(Instr::EnterCatch { handler, into: dst });
        self.b.emit(Instr::CheckCall {
            callee,
            argc: args.len() as u32,
        });
        self.b.emit(Instr::Call { dst, callee, args, pos });
        self.b.emit(Instr::LeaveCatch);
        self.b.bind(handler);
        self.b.emit(Instr::RestoreDepth { src: depth });
    }
}
