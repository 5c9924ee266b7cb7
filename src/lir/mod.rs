//! # Low-level IR
//!
//! What the compiler produces and the engine links: per module, a string
//! pool, static tables, meta cells and functions made of flat instruction
//! streams over numbered box slots.
//!
//! Everything a function refers to outside of its own slots is named by a
//! `(module, index)` pair so that a module's data can be shared by reference
//! with every importer.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::Pos;
use crate::static_table::{ItemId, StaticTable};

pub mod builder;
pub mod disasm;

/// Compiled module id, as assigned by the module cache. `0` is the core library.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ModuleId(pub u32);

impl ModuleId {
    pub const CORE: ModuleId = ModuleId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Slot(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Label(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StrRef {
    pub module: ModuleId,
    pub index: u32,
}

/// A static table of some module. Index `0` is always the export table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TableRef {
    pub module: ModuleId,
    pub index: u32,
}

impl TableRef {
    pub fn exports(module: ModuleId) -> Self {
        Self { module, index: 0 }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FuncRef {
    pub module: ModuleId,
    pub index: u32,
}

/// A link-time box holding the meta of a static table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CellRef {
    pub module: ModuleId,
    pub index: u32,
}

/// A module-scope variable: the value slot of an item in an export table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GlobalRef {
    pub table: TableRef,
    pub item: ItemId,
}

/// A box whose value is fully known at link time.
#[derive(Clone, PartialEq, Debug)]
pub enum Const {
    Null,
    Int(i64),
    /// exact bit pattern
    Float(u64),
    Bool(bool),
    Str(StrRef),
    Table { table: TableRef, meta: Option<CellRef> },
    Func { func: FuncRef, arity: u32 },
    Native { name: Rc<str>, arity: u32 },
}

impl Const {
    pub fn float(value: f64) -> Self {
        Const::Float(value.to_bits())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Const::Null => "null",
            Const::Int(_) => "int",
            Const::Float(_) => "float",
            Const::Bool(_) => "bool",
            Const::Str(_) => "str",
            Const::Table { .. } => "table",
            Const::Func { .. } | Const::Native { .. } => "func",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Concat,
}

impl BinOp {
    pub fn from_symbol(op: &str) -> Option<BinOp> {
        Some(match op {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "==" => BinOp::Eq,
            "!=" => BinOp::Ne,
            ">" => BinOp::Gt,
            ">=" => BinOp::Ge,
            "<" => BinOp::Lt,
            "<=" => BinOp::Le,
            "$" => BinOp::Concat,
            _ => return None,
        })
    }

    /// Key of the magic method looked up through a table's meta.
    pub fn method(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
            BinOp::Gt => "gt",
            BinOp::Ge => "ge",
            BinOp::Lt => "lt",
            BinOp::Le => "le",
            BinOp::Concat => "concat",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnOp {
    Neg,
    Not,
}

impl UnOp {
    pub fn from_symbol(op: &str) -> Option<UnOp> {
        match op {
            "-" => Some(UnOp::Neg),
            "!" => Some(UnOp::Not),
            _ => None,
        }
    }

    pub fn method(self) -> &'static str {
        match self {
            UnOp::Neg => "neg",
            UnOp::Not => "not",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Test {
    Truthy,
    Falsy,
    Null,
}

#[derive(Clone, PartialEq, Debug)]
pub enum Instr {
    Const { dst: Slot, value: Const },
    Move { dst: Slot, src: Slot },
    LoadGlobal { dst: Slot, global: GlobalRef },
    StoreGlobal { global: GlobalRef, src: Slot },
    /// Read slot `index` of the running closure's environment.
    LoadCapture { dst: Slot, index: u32 },
    StoreCapture { index: u32, src: Slot },
    /// Allocate an environment of `len` null boxes; `dst` receives its address.
    AllocEnv { dst: Slot, len: u32 },
    InitEnv { env: Slot, index: u32, src: Slot },
    /// Build the trampoline for `func` over `env` and a function box linking both.
    MakeClosure { dst: Slot, func: FuncRef, arity: u32, env: Slot },
    Binary { op: BinOp, dst: Slot, lhs: Slot, rhs: Slot },
    Unary { op: UnOp, dst: Slot, src: Slot },
    NewTable { dst: Slot },
    Get { dst: Slot, table: Slot, key: Slot },
    Put { table: Slot, key: Slot, value: Slot },
    /// `dst = table :: meta`
    SetMeta { dst: Slot, table: Slot, meta: Slot },
    /// Throws `uncallable` or `arg_mismatch` unless `callee` takes `argc` arguments.
    CheckCall { callee: Slot, argc: u32 },
    Call { dst: Slot, callee: Slot, args: Vec<Slot>, pos: Option<Pos> },
    Throw { src: Slot },
    Jump { target: Label },
    Branch { test: Test, src: Slot, target: Label },
    /// Install a handler: a throw before the matching `LeaveCatch` stores the
    /// thrown box into `into` and resumes at `handler`.
    EnterCatch { handler: Label, into: Slot },
    LeaveCatch,
    SaveDepth { dst: Slot },
    RestoreDepth { src: Slot },
    Return { src: Option<Slot> },
}

impl Instr {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instr::Jump { .. } | Instr::Return { .. } | Instr::Throw { .. })
    }
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub arity: u32,
    /// Environment length expected by the code; `0` for plain functions.
    pub captures: u32,
    pub slots: u32,
    pub code: Vec<Instr>,
    /// Label -> instruction index.
    pub labels: Vec<usize>,
}

impl Function {
    pub fn target(&self, label: Label) -> usize {
        self.labels[label.0 as usize]
    }
}

#[derive(Debug)]
pub struct IrModule {
    pub id: ModuleId,
    pub name: String,
    pub strings: Vec<String>,
    /// Index `0` is the export table.
    pub tables: Vec<StaticTable<Const>>,
    pub cells: Vec<Const>,
    pub funcs: Vec<Function>,
    pub imports: Vec<ModuleId>,
    /// `export name as symbol`
    pub foreign: IndexMap<String, GlobalRef>,
    /// Entry point for programs: runs every linked `init`, then `main`.
    pub entry: Option<FuncRef>,
}

impl IrModule {
    pub fn exports(&self) -> &StaticTable<Const> {
        &self.tables[0]
    }

    pub fn export(&self, name: &str) -> Option<GlobalRef> {
        self.exports()
            .lookup(&crate::static_table::Literal::Str(name.to_owned()))
            .map(|item| GlobalRef {
                table: TableRef::exports(self.id),
                item,
            })
    }

    pub fn table(&self, index: u32) -> &StaticTable<Const> {
        &self.tables[index as usize]
    }

    pub fn func(&self, index: u32) -> &Function {
        &self.funcs[index as usize]
    }
}
