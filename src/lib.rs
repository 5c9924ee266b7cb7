//! Backend of the rain language: lowers syntax trees to a linkable IR,
//! links modules into an [`engine::Engine`] and runs them, and expands
//! macros at parse time.

use value::Value;

pub mod error;

pub mod ast;
pub mod compiler;
pub mod engine;
pub mod hash;
pub mod lir;
pub mod macros;
pub mod module;
pub mod runtime;
pub mod static_table;
pub mod value;

pub mod prelude {
    pub use super::RunResult;
    pub use crate::ast::{build, Node, NodeKind, Pos, Syntax};
    pub use crate::compiler::CompileOptions;
    pub use crate::engine::{Engine, EngineOptions, Fatal, Native};
    pub use crate::error::{CompileError, CompileResult};
    pub use crate::lir::ModuleId;
    pub use crate::macros::{expand_use, Macro, MacroParser, MacroTable, SyntaxKind, SyntaxParser};
    pub use crate::module::{MemorySource, ModuleCache, ModuleSource};
    pub use crate::value::{Tag, Value};
}

/// Outcome of running code: a value, or the box that was thrown.
pub type RunResult<T = Value> = Result<T, Value>;
