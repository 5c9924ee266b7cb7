//! # Macros
//!
//! A macro is an ordinary function compiled ahead of time and run while the
//! program is being parsed. Each definition gets a private module and a
//! private [`Engine`] with the core library loaded. At a use site the parser
//! reads one argument per declared syntax kind, the arguments are marshalled
//! into boxes, the macro runs, and the box it returns is turned back into
//! syntax through the node kind registry.
//!
//! Marshalling:
//!
//! | syntax          | box                                            |
//! |-----------------|------------------------------------------------|
//! | null/bool/int/float/string | the same primitive                  |
//! | list            | table with keys `0..n`                         |
//! | node            | table with `tag` = kind name plus one key per field |
//!
//! Every macro module also defines `gensym()`, returning `:<macro>:<n>`
//! with `n` counting from zero, and imports `ast`: one constructor per node
//! kind, taking the kind's fields in order (`ast.binary("+", l, r)`). Other
//! imports resolve as they would from the file defining the macro.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::abort;
use crate::ast::{self, build, Node, NodeKind, Pos, Syntax};
use crate::compiler::CompileOptions;
use crate::engine::{Engine, EngineOptions};
use crate::error::{CompileError, CompileResult};
use crate::module::{MemorySource, ModuleCache, ModuleSource};
use crate::runtime::Key;
use crate::value::{Tag, Value};

/// What the parser reads for one macro argument.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SyntaxKind {
    Expr,
    Stmt,
    Block,
    /// A block, or a single expression standing for one.
    ExprBlock,
    /// A parameter list, as a list of strings.
    Params,
    /// A call argument list, as a list of expressions.
    Args,
    Name,
    /// A name or a string literal, as a string.
    NameStr,
    Str,
    Int,
    Float,
    Bool,
}

impl SyntaxKind {
    pub fn from_name(name: &str) -> Option<SyntaxKind> {
        Some(match name {
            "expr" => SyntaxKind::Expr,
            "stmt" => SyntaxKind::Stmt,
            "block" => SyntaxKind::Block,
            "exprblock" => SyntaxKind::ExprBlock,
            "params" => SyntaxKind::Params,
            "args" => SyntaxKind::Args,
            "name" => SyntaxKind::Name,
            "namestr" => SyntaxKind::NameStr,
            "string" => SyntaxKind::Str,
            "int" => SyntaxKind::Int,
            "float" => SyntaxKind::Float,
            "bool" => SyntaxKind::Bool,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            SyntaxKind::Expr => "expr",
            SyntaxKind::Stmt => "stmt",
            SyntaxKind::Block => "block",
            SyntaxKind::ExprBlock => "exprblock",
            SyntaxKind::Params => "params",
            SyntaxKind::Args => "args",
            SyntaxKind::Name => "name",
            SyntaxKind::NameStr => "namestr",
            SyntaxKind::Str => "string",
            SyntaxKind::Int => "int",
            SyntaxKind::Float => "float",
            SyntaxKind::Bool => "bool",
        }
    }
}

/// The parser, as seen by a macro expansion.
pub trait SyntaxParser {
    fn parse(&mut self, kind: SyntaxKind) -> CompileResult<Syntax>;
}

/// A parser that owns the macros of its file, so macro arguments may
/// themselves use macros.
pub trait MacroParser: SyntaxParser {
    fn macros(&mut self) -> &mut MacroTable;
}

/// Expand a use of `name` whose arguments are read from `parser`.
///
/// The table is not borrowed while arguments are parsed, so the parser may
/// expand other macros in between.
pub fn expand_use(parser: &mut dyn MacroParser, name: &str, pos: &Pos) -> CompileResult<Node> {
    let kinds = parser.macros().kinds_of(name, pos)?;
    let mut args = Vec::with_capacity(kinds.len());
    for kind in kinds {
        args.push(parser.parse(kind)?);
    }
    parser.macros().invoke(name, &args, pos)
}

/// Deepest syntax nesting accepted back from a macro.
const MAX_NESTING: usize = 256;

fn set(engine: &mut Engine, table: Value, key: Value, value: Value) {
    let key_hash = engine.heap().key(key);
    if let Some(t) = engine.heap_mut().table_mut(table) {
        t.put(key_hash, value);
    }
}

/// The box standing for `syntax` inside `engine`.
pub fn marshal(engine: &mut Engine, syntax: &Syntax) -> Value {
    match syntax {
        Syntax::Null => Value::null(),
        Syntax::Bool(b) => Value::bool(*b),
        Syntax::Int(i) => Value::int(*i),
        Syntax::Float(f) => Value::float(*f),
        Syntax::Str(s) => engine.heap_mut().alloc_str(s.as_bytes()),
        Syntax::List(items) => {
            let table = engine.heap_mut().alloc_table(Default::default());
            for (index, item) in items.iter().enumerate() {
                let value = marshal(engine, item);
                set(engine, table, Value::int(index as i64), value);
            }
            table
        }
        Syntax::Node(node) => {
            let table = engine.heap_mut().alloc_table(Default::default());
            let tag = engine.heap_mut().alloc_str(b"tag");
            let kind = engine.heap_mut().alloc_str(node.kind_name().as_bytes());
            set(engine, table, tag, kind);
            for (field, value) in node.kind.fields() {
                let key = engine.heap_mut().alloc_str(field.as_bytes());
                let value = marshal(engine, &value);
                set(engine, table, key, value);
            }
            table
        }
    }
}

/// The syntax a box returned by a macro stands for.
pub fn unmarshal(engine: &Engine, value: Value) -> Result<Syntax, String> {
    unmarshal_at(engine, value, 0)
}

fn unmarshal_at(engine: &Engine, value: Value, depth: usize) -> Result<Syntax, String> {
    if depth > MAX_NESTING {
        return Err("syntax nested too deeply".to_string());
    }
    let heap = engine.heap();
    match value.tag {
        Tag::Null => Ok(Syntax::Null),
        Tag::Bool => Ok(Syntax::Bool(value.as_bool())),
        Tag::Int => Ok(Syntax::Int(value.as_int())),
        Tag::Float => Ok(Syntax::Float(value.as_float())),
        Tag::Str => match heap.str(value).map(|b| std::str::from_utf8(b).map(str::to_owned)) {
            Some(Ok(s)) => Ok(Syntax::Str(s)),
            Some(Err(_)) => Err("string is not valid UTF-8".to_string()),
            None => Err("dangling string".to_string()),
        },
        Tag::Table => {
            let table = match heap.table(value) {
                Some(table) => table,
                None => return Err("dangling table".to_string()),
            };
            if let Some(tag) = table.get(&heap.key_str("tag")) {
                let name = match unmarshal_at(engine, tag, depth + 1)? {
                    Syntax::Str(name) => name,
                    other => return Err(format!("node tag must be a string, got {}", other.describe())),
                };
                let kind = match ast::kind(&name) {
                    Some(kind) => kind,
                    None => return Err(format!("unknown node kind {:?}", name)),
                };
                let mut fields = IndexMap::new();
                for field in kind.fields {
                    if let Some(v) = table.get(&heap.key_str(field)) {
                        fields.insert(field.to_string(), unmarshal_at(engine, v, depth + 1)?);
                    }
                }
                if fields.len() + 1 != table.count() as usize {
                    return Err(format!("{} node has fields it does not declare", name));
                }
                let kind = ast::build(&name, fields)?;
                return Ok(Syntax::Node(Node::new(kind)));
            }

            // a list holds exactly the keys 0..count
            let count = table.count() as usize;
            let mut items = Vec::with_capacity(count);
            for index in 0..count {
                match table.get(&Key::Int(index as i64)) {
                    Some(item) => items.push(unmarshal_at(engine, item, depth + 1)?),
                    None => return Err(format!("untagged table is not a list: item {} is missing", index)),
                }
            }
            Ok(Syntax::List(items))
        }
        tag => Err(format!("a {} box is not syntax", tag.name())),
    }
}

/// The node spliced in for an expansion result.
fn into_node(syntax: Syntax) -> Node {
    match syntax {
        Syntax::Node(node) => node,
        Syntax::Null => build::null(),
        Syntax::Bool(b) => build::boolean(b),
        Syntax::Int(i) => build::int(i),
        Syntax::Float(f) => build::float(f),
        Syntax::Str(s) => build::str(&s),
        Syntax::List(items) => build::block(items.into_iter().map(into_node).collect()),
    }
}

/// The `ast` helper module: a constructor per node kind.
fn helper_library() -> Node {
    let stmts = ast::kinds()
        .map(|kind| {
            let mut pairs = vec![(build::str("tag"), build::str(kind.name))];
            pairs.extend(kind.fields.iter().map(|f| (build::str(f), build::name(f))));
            let body = build::block(vec![build::ret(Some(build::dict(pairs)))]);
            build::let_(kind.name, build::func(kind.fields, body))
        })
        .collect();
    build::program(stmts)
}

const HELPERS: &str = "ast";

/// Split the `import` statements at the top of a macro body off the rest;
/// they are compiled at the scope of the macro's module.
fn hoist_imports(body: &Node) -> (Vec<Node>, Node) {
    match &body.kind {
        NodeKind::Block { stmts } => {
            let (imports, rest): (Vec<Node>, Vec<Node>) = stmts
                .iter()
                .cloned()
                .partition(|stmt| matches!(stmt.kind, NodeKind::Import { .. }));
            let mut body = body.clone();
            body.kind = NodeKind::Block { stmts: rest };
            (imports, body)
        }
        _ => (Vec::new(), body.clone()),
    }
}

/// What a macro module can import: the helper library, then whatever the
/// file defining the macro can import.
struct MacroSource<'s> {
    helpers: PathBuf,
    outer: &'s mut dyn ModuleSource,
    from: Option<&'s Path>,
}

impl ModuleSource for MacroSource<'_> {
    fn resolve(&mut self, name: &str, from: Option<&Path>) -> Option<PathBuf> {
        // imports of the macro module itself have no importer path
        match from {
            None if name == HELPERS => Some(self.helpers.clone()),
            None => self.outer.resolve(name, self.from),
            Some(from) => self
                .outer
                .resolve(name, Some(from))
                .or_else(|| (name == HELPERS).then(|| self.helpers.clone())),
        }
    }

    fn load(&mut self, path: &Path) -> CompileResult<Node> {
        if path == self.helpers {
            return Ok(helper_library());
        }
        self.outer.load(path)
    }
}

pub struct Macro {
    name: String,
    kinds: Vec<SyntaxKind>,
    engine: Engine,
    entry: Value,
}

impl Macro {
    /// Compile a `macro` definition that imports nothing beyond `ast`.
    pub fn compile(node: &Node, options: CompileOptions) -> CompileResult<Macro> {
        Self::compile_in(node, options, &mut MemorySource::new(), None)
    }

    /// Compile a `macro` definition found in the file at `from` and load it
    /// into its own engine. Its imports are looked up in `source`.
    pub fn compile_in(
        node: &Node,
        options: CompileOptions,
        source: &mut dyn ModuleSource,
        from: Option<&Path>,
    ) -> CompileResult<Macro> {
        let pos = &node.pos;
        let (name, kinds, params, body) = match &node.kind {
            NodeKind::Macro {
                name,
                kinds,
                params,
                body,
            } => (name, kinds, params, body),
            other => abort!(pos, "Expected a macro definition, got {}", other.name()),
        };
        if kinds.len() != params.len() {
            abort!(
                pos,
                "Macro {} declares {} syntax kinds for {} parameters",
                name,
                kinds.len(),
                params.len()
            );
        }
        let kinds = kinds
            .iter()
            .map(|k| match SyntaxKind::from_name(k) {
                Some(kind) => Ok(kind),
                None => Err(CompileError::at(pos, format!("Unknown syntax kind {:?}", k))),
            })
            .collect::<CompileResult<Vec<_>>>()?;

        let (imports, body) = hoist_imports(body);
        let mut stmts = vec![build::import(HELPERS, None)];
        stmts.extend(imports);
        stmts.extend([
            build::let_(":count", build::int(0)),
            build::let_(
                "gensym",
                build::func(
                    &[],
                    build::block(vec![
                        build::let_("n", build::name(":count")),
                        build::assign(
                            build::name(":count"),
                            build::binary("+", build::name(":count"), build::int(1)),
                        ),
                        build::ret(Some(build::binary(
                            "$",
                            build::str(&format!(":{}:", name)),
                            build::name("n"),
                        ))),
                    ]),
                ),
            ),
            build::let_("main", Node::new(NodeKind::Func {
                params: params.clone(),
                body: Box::new(body),
            })),
        ]);
        let tree = build::program(stmts);

        let mut cache = ModuleCache::new();
        let mut source = MacroSource {
            helpers: PathBuf::from(format!("<macro {}>/{}.rn", name, HELPERS)),
            outer: source,
            from,
        };
        let module_name = format!("macro {}", name);
        let options = CompileOptions {
            entry: false,
            ..options
        };
        let id = cache
            .compile(&mut source, &module_name, None, &tree, options)
            .map_err(|e| e.or_at(pos))?;

        let mut engine = Engine::new(EngineOptions {
            max_depth: options.macro_depth,
            ..Default::default()
        });
        engine.load_program(&cache, id)?;
        let entry = engine.export(id, "main").unwrap_or_default();
        log::debug!(target: "rain::macro", "compiled macro {} ({})", name, kinds.len());

        Ok(Macro {
            name: name.clone(),
            kinds,
            engine,
            entry,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kinds(&self) -> &[SyntaxKind] {
        &self.kinds
    }

    /// Run the macro on already parsed arguments.
    pub fn invoke(&mut self, args: &[Syntax], pos: &Pos) -> CompileResult<Node> {
        if args.len() != self.kinds.len() {
            abort!(
                pos,
                "Macro {} takes {} arguments, got {}",
                self.name,
                self.kinds.len(),
                args.len()
            );
        }
        let boxes: Vec<Value> = args.iter().map(|a| marshal(&mut self.engine, a)).collect();
        let result = match self.engine.invoke(self.entry, &boxes) {
            Ok(result) => result,
            Err(fatal) => abort!(pos, "Macro {} threw {}", self.name, fatal.message),
        };
        let syntax = match unmarshal(&self.engine, result) {
            Ok(syntax) => syntax,
            Err(e) => abort!(pos, "Macro {} returned bad syntax: {}", self.name, e),
        };

        let mut node = into_node(syntax);
        node.relocate(pos);
        log::trace!(target: "rain::macro", "expanded {} at {} to {}", self.name, pos, node.kind_name());
        Ok(node)
    }

    /// Parse the arguments of a use site and expand it.
    pub fn expand(&mut self, parser: &mut dyn SyntaxParser, pos: &Pos) -> CompileResult<Node> {
        let mut args = Vec::with_capacity(self.kinds.len());
        for kind in &self.kinds {
            args.push(parser.parse(*kind)?);
        }
        self.invoke(&args, pos)
    }
}

/// The macros visible in one source file: its own, and those of the files
/// it imports under `<prefix>.<name>`.
#[derive(Default)]
pub struct MacroTable {
    macros: IndexMap<String, Rc<RefCell<Macro>>>,
    options: CompileOptions,
}

impl MacroTable {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            macros: IndexMap::new(),
            options,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Rc<RefCell<Macro>>> {
        self.macros.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.macros.keys().map(String::as_str)
    }

    pub fn define(&mut self, node: &Node) -> CompileResult<()> {
        self.define_in(node, &mut MemorySource::new(), None)
    }

    /// Define the macro `node` of the file at `from`.
    pub fn define_in(&mut self, node: &Node, source: &mut dyn ModuleSource, from: Option<&Path>) -> CompileResult<()> {
        if let NodeKind::Macro { name, .. } = &node.kind {
            if self.contains(name) {
                abort!(&node.pos, "Macro {} is already defined", name);
            }
        }
        let m = Macro::compile_in(node, self.options, source, from)?;
        self.macros.insert(m.name.clone(), Rc::new(RefCell::new(m)));
        Ok(())
    }

    /// Make the macros defined in an imported file usable as `<prefix>.<name>`.
    /// Only its own definitions are taken, not the ones it imported.
    pub fn import(&mut self, prefix: &str, other: &MacroTable) {
        for (name, m) in &other.macros {
            if !name.contains('.') {
                self.macros.insert(format!("{}.{}", prefix, name), m.clone());
            }
        }
    }

    /// Argument kinds of the macro `name`.
    pub fn kinds_of(&self, name: &str, pos: &Pos) -> CompileResult<Vec<SyntaxKind>> {
        match self.macros.get(name) {
            Some(m) => Ok(m.borrow().kinds.clone()),
            None => abort!(pos, "Unknown macro {:?}", name),
        }
    }

    /// Run the macro `name` on already parsed arguments.
    pub fn invoke(&mut self, name: &str, args: &[Syntax], pos: &Pos) -> CompileResult<Node> {
        match self.macros.get(name) {
            Some(m) => m.borrow_mut().invoke(args, pos),
            None => abort!(pos, "Unknown macro {:?}", name),
        }
    }

    /// Parse the arguments of a use of `name` and expand it. Macro uses
    /// inside the arguments need [`expand_use`] instead.
    pub fn expand(&mut self, name: &str, parser: &mut dyn SyntaxParser, pos: &Pos) -> CompileResult<Node> {
        let kinds = self.kinds_of(name, pos)?;
        let mut args = Vec::with_capacity(kinds.len());
        for kind in kinds {
            args.push(parser.parse(kind)?);
        }
        self.invoke(name, &args, pos)
    }
}
