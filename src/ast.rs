//! # Syntax tree
//!
//! The tree handed to the compiler by the parser. Node kinds form a closed
//! set declared once with [`declare_nodes!`]; the same declaration produces
//! the [`NodeKind`] enum, its field marshalling and the kind registry used to
//! rebuild nodes returned from macros.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;

/// Source coordinates of a node.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Pos {
    pub file: Option<Rc<str>>,
    pub line: u32,
    pub col: u32,
    pub len: u32,
}

impl Pos {
    pub fn new(file: Option<&str>, line: u32, col: u32, len: u32) -> Self {
        Self {
            file: file.map(Rc::from),
            line,
            col,
            len,
        }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file, self.line, self.col),
            None => write!(f, "<unknown>:{}:{}", self.line, self.col),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub pos: Pos,
}

/// Positions are not part of a node's identity.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            pos: Pos::default(),
        }
    }

    pub fn at(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Replace the position of this node and every node below it.
    pub fn relocate(&mut self, pos: &Pos) {
        self.pos = pos.clone();
        self.kind.for_each_child(&mut |child| child.relocate(pos));
    }
}

/// The universe of values a macro can receive or produce.
#[derive(Clone, PartialEq, Debug)]
pub enum Syntax {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Syntax>),
    Node(Node),
}

impl Syntax {
    pub fn describe(&self) -> &'static str {
        match self {
            Syntax::Null => "null",
            Syntax::Bool(_) => "bool",
            Syntax::Int(_) => "int",
            Syntax::Float(_) => "float",
            Syntax::Str(_) => "string",
            Syntax::List(_) => "list",
            Syntax::Node(_) => "node",
        }
    }
}

/// A node field that converts to and from [`Syntax`].
pub trait Field: Sized {
    fn to_syntax(&self) -> Syntax;
    fn from_syntax(syntax: Syntax) -> Result<Self, String>;

    /// Value used when a rebuilt node omits the field.
    fn missing(name: &str) -> Result<Self, String> {
        Err(format!("missing field {:?}", name))
    }
}

fn expected<T>(what: &str, got: &Syntax) -> Result<T, String> {
    Err(format!("expected {}, got {}", what, got.describe()))
}

impl Field for i64 {
    fn to_syntax(&self) -> Syntax {
        Syntax::Int(*self)
    }

    fn from_syntax(syntax: Syntax) -> Result<Self, String> {
        match syntax {
            Syntax::Int(i) => Ok(i),
            other => expected("int", &other),
        }
    }
}

impl Field for f64 {
    fn to_syntax(&self) -> Syntax {
        Syntax::Float(*self)
    }

    fn from_syntax(syntax: Syntax) -> Result<Self, String> {
        match syntax {
            Syntax::Float(x) => Ok(x),
            other => expected("float", &other),
        }
    }
}

impl Field for bool {
    fn to_syntax(&self) -> Syntax {
        Syntax::Bool(*self)
    }

    fn from_syntax(syntax: Syntax) -> Result<Self, String> {
        match syntax {
            Syntax::Bool(b) => Ok(b),
            other => expected("bool", &other),
        }
    }
}

impl Field for String {
    fn to_syntax(&self) -> Syntax {
        Syntax::Str(self.clone())
    }

    fn from_syntax(syntax: Syntax) -> Result<Self, String> {
        match syntax {
            Syntax::Str(s) => Ok(s),
            other => expected("string", &other),
        }
    }
}

impl Field for Node {
    fn to_syntax(&self) -> Syntax {
        Syntax::Node(self.clone())
    }

    fn from_syntax(syntax: Syntax) -> Result<Self, String> {
        match syntax {
            Syntax::Node(node) => Ok(node),
            other => expected("node", &other),
        }
    }
}

impl<T: Field> Field for Box<T> {
    fn to_syntax(&self) -> Syntax {
        (**self).to_syntax()
    }

    fn from_syntax(syntax: Syntax) -> Result<Self, String> {
        T::from_syntax(syntax).map(Box::new)
    }
}

impl<T: Field> Field for Option<T> {
    fn to_syntax(&self) -> Syntax {
        match self {
            Some(value) => value.to_syntax(),
            None => Syntax::Null,
        }
    }

    fn from_syntax(syntax: Syntax) -> Result<Self, String> {
        match syntax {
            Syntax::Null => Ok(None),
            other => T::from_syntax(other).map(Some),
        }
    }

    fn missing(_: &str) -> Result<Self, String> {
        Ok(None)
    }
}

impl<T: Field> Field for Vec<T> {
    fn to_syntax(&self) -> Syntax {
        Syntax::List(self.iter().map(Field::to_syntax).collect())
    }

    fn from_syntax(syntax: Syntax) -> Result<Self, String> {
        match syntax {
            Syntax::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| T::from_syntax(item).map_err(|e| format!("item {}: {}", i, e)))
                .collect(),
            other => expected("list", &other),
        }
    }
}

/// Named field values of a node being rebuilt.
pub struct Fields {
    kind: &'static str,
    values: IndexMap<String, Syntax>,
}

impl Fields {
    pub fn new(kind: &'static str, values: IndexMap<String, Syntax>) -> Self {
        Self { kind, values }
    }

    pub fn take<T: Field>(&mut self, name: &str) -> Result<T, String> {
        let result = match self.values.shift_remove(name) {
            Some(value) => T::from_syntax(value),
            None => T::missing(name),
        };
        result.map_err(|e| format!("{} node, field {:?}: {}", self.kind, name, e))
    }
}

/// Registry entry for one node kind.
pub struct Kind {
    pub name: &'static str,
    pub fields: &'static [&'static str],
    pub build: fn(&mut Fields) -> Result<NodeKind, String>,
}

macro_rules! declare_nodes {
    ($(
        $(#[$attr:meta])*
        $variant:ident $tag:literal {
            $($field:ident: $ty:ty),* $(,)?
        }
    ),* $(,)?) => {
        #[derive(Clone, PartialEq, Debug)]
        pub enum NodeKind {
            $(
                $(#[$attr])*
                $variant { $($field: $ty),* }
            ),*
        }

        impl NodeKind {
            pub fn name(&self) -> &'static str {
                match self {
                    $(NodeKind::$variant { .. } => $tag),*
                }
            }

            /// Field name and value pairs, in declaration order.
            #[allow(unused_variables)]
            pub fn fields(&self) -> Vec<(&'static str, Syntax)> {
                match self {
                    $(NodeKind::$variant { $($field),* } => vec![
                        $((stringify!($field), Field::to_syntax($field))),*
                    ]),*
                }
            }
        }

        paste::paste! {
            $(
                #[allow(unused_variables)]
                fn [<build_ $variant:snake>](fields: &mut Fields) -> Result<NodeKind, String> {
                    Ok(NodeKind::$variant {
                        $($field: fields.take::<$ty>(stringify!($field))?),*
                    })
                }
            )*

            /// Kind name to field list and constructor, for every node kind.
            pub static KINDS: Lazy<IndexMap<&'static str, Kind>> = Lazy::new(|| {
                let mut kinds = IndexMap::new();
                $(
                    kinds.insert($tag, Kind {
                        name: $tag,
                        fields: &[$(stringify!($field)),*],
                        build: [<build_ $variant:snake>],
                    });
                )*
                kinds
            });
        }
    };
}

declare_nodes! {
    Program "program" { stmts: Vec<Node> },
    Block "block" { stmts: Vec<Node> },

    Let "let" { name: String, value: Option<Box<Node>> },
    /// `target` is a name or an index expression.
    Assign "assign" { target: Box<Node>, value: Box<Node> },
    If "if" { cond: Box<Node>, body: Box<Node>, els: Option<Box<Node>> },
    While "while" { cond: Box<Node>, body: Box<Node> },
    Until "until" { cond: Box<Node>, body: Box<Node> },
    Loop "loop" { body: Box<Node> },
    /// `[a, [b, c]] = value`: each target is a name, an index expression or a
    /// nested array of targets. With `declare` the names are new locals.
    Unpack "unpack" { targets: Vec<Node>, value: Box<Node>, declare: bool },
    /// Calls `func` with no arguments until it returns null. `target` is a
    /// name, or an array of names the result is unpacked into.
    For "for" { target: Box<Node>, func: Box<Node>, body: Box<Node> },
    Break "break" { cond: Option<Box<Node>> },
    Continue "continue" { cond: Option<Box<Node>> },
    Return "return" { value: Option<Box<Node>> },
    /// Store the value a plain `return` (or falling off the end) gives back,
    /// optionally naming the stored slot.
    Save "save" { name: Option<String>, value: Box<Node> },
    /// `with value as params { body }` calls `value` with the block as a function.
    With "with" { value: Box<Node>, params: Vec<String>, body: Box<Node> },
    /// Copy captured names into locals, throwing `unbound_var` on null.
    Bind "bind" { names: Vec<String> },
    /// `use name = lhs[rhs]`: bind `name` to an existing entry, failing if
    /// the key is absent.
    Use "use" { name: String, lhs: Box<Node>, rhs: Box<Node> },
    Pass "pass" {},
    Import "import" { name: String, rename: Option<String> },
    /// Publish a module-scope name under an extra foreign symbol.
    Export "export" { name: String, symbol: String },
    Macro "macro" { name: String, kinds: Vec<String>, params: Vec<String>, body: Box<Node> },
    Catch "catch" { name: Option<String>, body: Box<Node> },
    /// Diagnostics, usually produced by macros.
    Error "error" { message: String },
    Warning "warning" { message: String },
    Hint "hint" { message: String },

    Null "null" {},
    Int "int" { value: i64 },
    Float "float" { value: f64 },
    Bool "bool" { value: bool },
    Str "str" { value: String },
    Name "name" { value: String },
    Table "table" {},
    Array "array" { items: Vec<Node> },
    Dict "dict" { keys: Vec<Node>, values: Vec<Node> },
    Func "func" { params: Vec<String>, body: Box<Node> },
    Call "call" { func: Box<Node>, args: Vec<Node>, catch: bool },
    Method "method" { lhs: Box<Node>, key: Box<Node>, args: Vec<Node>, catch: bool },
    Index "index" { lhs: Box<Node>, rhs: Box<Node> },
    Unary "unary" { op: String, value: Box<Node> },
    Binary "binary" { op: String, lhs: Box<Node>, rhs: Box<Node> },
}

impl NodeKind {
    fn for_each_child(&mut self, f: &mut dyn FnMut(&mut Node)) {
        use NodeKind::*;
        match self {
            Program { stmts } | Block { stmts } => stmts.iter_mut().for_each(f),
            Let { value, .. } => value.iter_mut().for_each(|n| f(n)),
            Assign { target, value } => {
                f(target);
                f(value);
            }
            Unpack { targets, value, .. } => {
                targets.iter_mut().for_each(&mut *f);
                f(value);
            }
            Save { value, .. } => f(value),
            With { value, body, .. } => {
                f(value);
                f(body);
            }
            Use { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            If { cond, body, els } => {
                f(cond);
                f(body);
                els.iter_mut().for_each(|n| f(n));
            }
            While { cond, body } | Until { cond, body } => {
                f(cond);
                f(body);
            }
            Loop { body } | Macro { body, .. } | Catch { body, .. } | Func { body, .. } => f(body),
            For { target, func, body } => {
                f(target);
                f(func);
                f(body);
            }
            Break { cond } | Continue { cond } => cond.iter_mut().for_each(|n| f(n)),
            Return { value } => value.iter_mut().for_each(|n| f(n)),
            Array { items } => items.iter_mut().for_each(f),
            Dict { keys, values } => {
                keys.iter_mut().for_each(&mut *f);
                values.iter_mut().for_each(f);
            }
            Call { func, args, .. } => {
                f(func);
                args.iter_mut().for_each(f);
            }
            Method { lhs, key, args, .. } => {
                f(lhs);
                f(key);
                args.iter_mut().for_each(f);
            }
            Index { lhs, rhs } | Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Unary { value, .. } => f(value),
            Pass {} | Import { .. } | Export { .. } | Bind { .. } | Error { .. } | Warning { .. }
            | Hint { .. } | Null {} | Int { .. } | Float { .. } | Bool { .. } | Str { .. }
            | Name { .. } | Table {} => {}
        }
    }
}

pub fn kind(name: &str) -> Option<&'static Kind> {
    KINDS.get(name)
}

/// Every node kind, in declaration order.
pub fn kinds() -> impl Iterator<Item = &'static Kind> {
    KINDS.values()
}

/// Rebuild a node from its kind name and field values.
pub fn build(kind_name: &str, values: IndexMap<String, Syntax>) -> Result<NodeKind, String> {
    let kind = self::kind(kind_name).ok_or_else(|| format!("unknown node kind {:?}", kind_name))?;
    let mut fields = Fields::new(kind.name, values);
    (kind.build)(&mut fields)
}

/// Shorthand constructors, mostly for embedders and tests that assemble trees
/// by hand.
pub mod build {
    use super::{Node, NodeKind};

    fn b(n: Node) -> Box<Node> {
        Box::new(n)
    }

    pub fn program(stmts: Vec<Node>) -> Node {
        Node::new(NodeKind::Program { stmts })
    }

    pub fn block(stmts: Vec<Node>) -> Node {
        Node::new(NodeKind::Block { stmts })
    }

    pub fn let_(name: &str, value: Node) -> Node {
        Node::new(NodeKind::Let {
            name: name.into(),
            value: Some(b(value)),
        })
    }

    pub fn declare(name: &str) -> Node {
        Node::new(NodeKind::Let {
            name: name.into(),
            value: None,
        })
    }

    pub fn assign(target: Node, value: Node) -> Node {
        Node::new(NodeKind::Assign {
            target: b(target),
            value: b(value),
        })
    }

    pub fn if_(cond: Node, body: Node, els: Option<Node>) -> Node {
        Node::new(NodeKind::If {
            cond: b(cond),
            body: b(body),
            els: els.map(b),
        })
    }

    pub fn while_(cond: Node, body: Node) -> Node {
        Node::new(NodeKind::While {
            cond: b(cond),
            body: b(body),
        })
    }

    pub fn until(cond: Node, body: Node) -> Node {
        Node::new(NodeKind::Until {
            cond: b(cond),
            body: b(body),
        })
    }

    pub fn loop_(body: Node) -> Node {
        Node::new(NodeKind::Loop { body: b(body) })
    }

    pub fn for_(name: &str, func: Node, body: Node) -> Node {
        Node::new(NodeKind::For {
            target: b(self::name(name)),
            func: b(func),
            body: b(body),
        })
    }

    /// `for [a, b] in func`
    pub fn for_unpack(targets: Vec<Node>, func: Node, body: Node) -> Node {
        Node::new(NodeKind::For {
            target: b(array(targets)),
            func: b(func),
            body: b(body),
        })
    }

    /// `[targets] = value`, or `let [targets] = value` with `declare`.
    pub fn unpack(targets: Vec<Node>, value: Node, declare: bool) -> Node {
        Node::new(NodeKind::Unpack {
            targets,
            value: b(value),
            declare,
        })
    }

    pub fn break_(cond: Option<Node>) -> Node {
        Node::new(NodeKind::Break { cond: cond.map(b) })
    }

    pub fn continue_(cond: Option<Node>) -> Node {
        Node::new(NodeKind::Continue { cond: cond.map(b) })
    }

    pub fn ret(value: Option<Node>) -> Node {
        Node::new(NodeKind::Return { value: value.map(b) })
    }

    pub fn save(name: Option<&str>, value: Node) -> Node {
        Node::new(NodeKind::Save {
            name: name.map(Into::into),
            value: b(value),
        })
    }

    pub fn with(value: Node, params: &[&str], body: Node) -> Node {
        Node::new(NodeKind::With {
            value: b(value),
            params: params.iter().map(|s| s.to_string()).collect(),
            body: b(body),
        })
    }

    pub fn bind(names: &[&str]) -> Node {
        Node::new(NodeKind::Bind {
            names: names.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn use_(name: &str, lhs: Node, rhs: Node) -> Node {
        Node::new(NodeKind::Use {
            name: name.into(),
            lhs: b(lhs),
            rhs: b(rhs),
        })
    }

    pub fn error(message: &str) -> Node {
        Node::new(NodeKind::Error {
            message: message.into(),
        })
    }

    pub fn warning(message: &str) -> Node {
        Node::new(NodeKind::Warning {
            message: message.into(),
        })
    }

    pub fn hint(message: &str) -> Node {
        Node::new(NodeKind::Hint {
            message: message.into(),
        })
    }

    pub fn pass() -> Node {
        Node::new(NodeKind::Pass {})
    }

    pub fn import(name: &str, rename: Option<&str>) -> Node {
        Node::new(NodeKind::Import {
            name: name.into(),
            rename: rename.map(Into::into),
        })
    }

    pub fn export(name: &str, symbol: &str) -> Node {
        Node::new(NodeKind::Export {
            name: name.into(),
            symbol: symbol.into(),
        })
    }

    pub fn macro_(name: &str, kinds: &[&str], params: &[&str], body: Node) -> Node {
        Node::new(NodeKind::Macro {
            name: name.into(),
            kinds: kinds.iter().map(|s| s.to_string()).collect(),
            params: params.iter().map(|s| s.to_string()).collect(),
            body: b(body),
        })
    }

    pub fn catch(name: Option<&str>, body: Node) -> Node {
        Node::new(NodeKind::Catch {
            name: name.map(Into::into),
            body: b(body),
        })
    }

    pub fn null() -> Node {
        Node::new(NodeKind::Null {})
    }

    pub fn int(value: i64) -> Node {
        Node::new(NodeKind::Int { value })
    }

    pub fn float(value: f64) -> Node {
        Node::new(NodeKind::Float { value })
    }

    pub fn boolean(value: bool) -> Node {
        Node::new(NodeKind::Bool { value })
    }

    pub fn str(value: &str) -> Node {
        Node::new(NodeKind::Str {
            value: value.into(),
        })
    }

    pub fn name(value: &str) -> Node {
        Node::new(NodeKind::Name {
            value: value.into(),
        })
    }

    pub fn table() -> Node {
        Node::new(NodeKind::Table {})
    }

    pub fn array(items: Vec<Node>) -> Node {
        Node::new(NodeKind::Array { items })
    }

    pub fn dict(pairs: Vec<(Node, Node)>) -> Node {
        let (keys, values) = pairs.into_iter().unzip();
        Node::new(NodeKind::Dict { keys, values })
    }

    pub fn func(params: &[&str], body: Node) -> Node {
        Node::new(NodeKind::Func {
            params: params.iter().map(|s| s.to_string()).collect(),
            body: b(body),
        })
    }

    pub fn call(func: Node, args: Vec<Node>) -> Node {
        Node::new(NodeKind::Call {
            func: b(func),
            args,
            catch: false,
        })
    }

    /// `f?(args)`: the call's result, or the box it threw.
    pub fn pcall(func: Node, args: Vec<Node>) -> Node {
        Node::new(NodeKind::Call {
            func: b(func),
            args,
            catch: true,
        })
    }

    pub fn method(lhs: Node, key: &str, args: Vec<Node>) -> Node {
        Node::new(NodeKind::Method {
            lhs: b(lhs),
            key: b(str(key)),
            args,
            catch: false,
        })
    }

    pub fn index(lhs: Node, rhs: Node) -> Node {
        Node::new(NodeKind::Index {
            lhs: b(lhs),
            rhs: b(rhs),
        })
    }

    pub fn unary(op: &str, value: Node) -> Node {
        Node::new(NodeKind::Unary {
            op: op.into(),
            value: b(value),
        })
    }

    pub fn binary(op: &str, lhs: Node, rhs: Node) -> Node {
        Node::new(NodeKind::Binary {
            op: op.into(),
            lhs: b(lhs),
            rhs: b(rhs),
        })
    }

    /// `name(args)`
    pub fn call_name(name: &str, args: Vec<Node>) -> Node {
        call(self::name(name), args)
    }
}

#[cfg(test)]
mod tests {
    use super::build::*;
    use super::*;

    #[test]
    fn registry_covers_every_kind() {
        for name in [
            "program", "block", "let", "assign", "if", "while", "until", "loop", "for", "break",
            "continue", "return", "pass", "import", "export", "macro", "catch", "null", "int",
            "float", "bool", "str", "name", "table", "array", "dict", "func", "call", "method",
            "index", "unary", "binary", "unpack", "save", "with", "bind", "use", "error",
            "warning", "hint",
        ] {
            assert_eq!(kind(name).map(|k| k.name), Some(name));
        }
        assert!(kind("lambda").is_none());
    }

    #[test]
    fn fields_in_declaration_order() {
        assert_eq!(kind("call").unwrap().fields, &["func", "args", "catch"]);
        assert_eq!(kind("pass").unwrap().fields, &[] as &[&str]);

        let node = binary("+", int(1), name("x"));
        let names: Vec<_> = node.kind.fields().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["op", "lhs", "rhs"]);
    }

    #[test]
    fn rebuild_from_fields() {
        let node = call(name("f"), vec![int(1), str("two")]);
        let values = node
            .kind
            .fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let rebuilt = build(node.kind_name(), values).unwrap();
        assert_eq!(rebuilt, node.kind);
    }

    #[test]
    fn optional_fields_may_be_omitted() {
        let mut values = IndexMap::new();
        values.insert("name".to_string(), Syntax::Str("x".into()));
        let rebuilt = build("let", values).unwrap();
        assert_eq!(rebuilt, declare("x").kind);
    }

    #[test]
    fn ill_typed_fields_are_rejected() {
        let mut values = IndexMap::new();
        values.insert("value".to_string(), Syntax::Str("1".into()));
        let err = build("int", values).unwrap_err();
        assert!(err.contains("int node"), "{}", err);
        assert!(err.contains("expected int"), "{}", err);

        let err = build("call", IndexMap::new()).unwrap_err();
        assert!(err.contains("missing field"), "{}", err);

        assert!(build("bogus", IndexMap::new()).is_err());
    }

    #[test]
    fn equality_ignores_position() {
        let a = int(3).at(Pos::new(Some("a.rn"), 1, 1, 1));
        let b = int(3).at(Pos::new(Some("b.rn"), 9, 4, 1));
        assert_eq!(a, b);
        assert_ne!(a, int(4));
    }

    #[test]
    fn relocate_reaches_every_child() {
        let pos = Pos::new(Some("m.rn"), 3, 7, 2);
        let mut node = block(vec![if_(name("c"), block(vec![ret(Some(int(1)))]), None)]);
        node.relocate(&pos);

        fn check(node: &Node, pos: &Pos) {
            assert_eq!(&node.pos, pos);
            let mut kind = node.kind.clone();
            kind.for_each_child(&mut |child| check(child, pos));
        }
        check(&node, &pos);
    }
}
