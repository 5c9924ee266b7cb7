//! Macros expanded at parse time and the expansions run as ordinary code.

use rain::ast::build::*;
use rain::prelude::*;

/// Hands out pre-parsed syntax in order, like a parser reading macro arguments.
struct Queue(Vec<Syntax>);

impl SyntaxParser for Queue {
    fn parse(&mut self, kind: SyntaxKind) -> CompileResult<Syntax> {
        if self.0.is_empty() {
            return Err(CompileError::new(format!("expected {}", kind.name())));
        }
        Ok(self.0.remove(0))
    }
}

fn run(main: Vec<Node>) -> (Engine, Result<Value, Fatal>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut source = MemorySource::new();
    let path = source.add("main", program(vec![let_("main", func(&[], block(main)))]));
    let mut cache = ModuleCache::new();
    let id = cache
        .compile_program(&mut source, &path, CompileOptions::default())
        .unwrap();
    let mut engine = Engine::new(EngineOptions {
        capture_output: true,
        ..Default::default()
    });
    engine.load_program(&cache, id).unwrap();
    let result = engine.run(id);
    (engine, result)
}

fn unless() -> Node {
    // macro unless(expr c, block b) { return {tag: "if", cond: {tag: "unary", op: "!", value: c}, body: b} }
    let negated = dict(vec![(str("tag"), str("unary")), (str("op"), str("!")), (str("value"), name("c"))]);
    let body = block(vec![ret(Some(dict(vec![
        (str("tag"), str("if")),
        (str("cond"), negated),
        (str("body"), name("b")),
    ])))]);
    macro_("unless", &["expr", "block"], &["c", "b"], body)
}

#[test]
fn expansion_runs_as_ordinary_code() {
    let mut macros = MacroTable::default();
    macros.define(&unless()).unwrap();

    let mut args = Queue(vec![
        Syntax::Node(boolean(false)),
        Syntax::Node(block(vec![call_name("print", vec![str("ran")])])),
    ]);
    let pos = Pos::new(Some("main.rn"), 3, 5, 6);
    let expanded = macros.expand("unless", &mut args, &pos).unwrap();
    assert_eq!(
        expanded,
        if_(
            unary("!", boolean(false)),
            block(vec![call_name("print", vec![str("ran")])]),
            None
        )
    );
    assert_eq!(expanded.pos, pos);

    let (engine, result) = run(vec![expanded, ret(Some(int(1)))]);
    assert_eq!(result.unwrap(), Value::int(1));
    assert_eq!(engine.output(), "ran\n");
}

#[test]
fn gensym_names_do_not_collide_with_user_names() {
    // macro tmp() { return gensym() }
    let tmp = macro_("tmp", &[], &[], block(vec![ret(Some(call_name("gensym", vec![])))]));
    let mut macros = MacroTable::default();
    macros.define(&tmp).unwrap();

    let pos = Pos::default();
    let first = macros.expand("tmp", &mut Queue(vec![]), &pos).unwrap();
    let second = macros.expand("tmp", &mut Queue(vec![]), &pos).unwrap();
    assert_ne!(first, second);
    match (&first.kind, &second.kind) {
        (NodeKind::Str { value: a }, NodeKind::Str { value: b }) => {
            assert!(a.starts_with(':') && b.starts_with(':'));
        }
        other => panic!("gensym produced {:?}", other),
    }
}

#[test]
fn macro_can_build_statement_lists() {
    // macro both(expr a, expr b) { return [{tag: "call", func: {tag: "name", value: "print"}, args: [a], catch: false}, ...] }
    let print_of = |arg: &str| {
        dict(vec![
            (str("tag"), str("call")),
            (str("func"), dict(vec![(str("tag"), str("name")), (str("value"), str("print"))])),
            (str("args"), array(vec![name(arg)])),
            (str("catch"), boolean(false)),
        ])
    };
    let body = block(vec![ret(Some(array(vec![print_of("a"), print_of("b")])))]);
    let mut macros = MacroTable::default();
    macros.define(&macro_("both", &["expr", "expr"], &["a", "b"], body)).unwrap();

    let mut args = Queue(vec![Syntax::Node(int(1)), Syntax::Node(str("two"))]);
    let expanded = macros.expand("both", &mut args, &Pos::default()).unwrap();
    assert!(matches!(expanded.kind, NodeKind::Block { ref stmts } if stmts.len() == 2));

    let (engine, result) = run(vec![expanded]);
    assert_eq!(result.unwrap(), Value::null());
    assert_eq!(engine.output(), "1\ntwo\n");
}

#[test]
fn missing_arguments_surface_from_the_parser() {
    let mut macros = MacroTable::default();
    macros.define(&unless()).unwrap();
    let err = macros
        .expand("unless", &mut Queue(vec![Syntax::Node(null())]), &Pos::default())
        .unwrap_err();
    assert_eq!(err.message, "expected block");
}

/// Parser input: already parsed syntax, or a macro use still to expand.
enum Token {
    Syntax(Syntax),
    Use(&'static str),
}

/// A parser owning its file's macros, expanding uses inside arguments.
struct Nested {
    macros: MacroTable,
    input: Vec<Token>,
}

impl SyntaxParser for Nested {
    fn parse(&mut self, kind: SyntaxKind) -> CompileResult<Syntax> {
        if self.input.is_empty() {
            return Err(CompileError::new(format!("expected {}", kind.name())));
        }
        match self.input.remove(0) {
            Token::Syntax(syntax) => Ok(syntax),
            Token::Use(name) => expand_use(self, name, &Pos::default()).map(Syntax::Node),
        }
    }
}

impl MacroParser for Nested {
    fn macros(&mut self) -> &mut MacroTable {
        &mut self.macros
    }
}

fn twice() -> Node {
    // macro twice(expr e) { return ast.binary("+", e, e) }
    let body = block(vec![ret(Some(call(
        index(name("ast"), str("binary")),
        vec![str("+"), name("e"), name("e")],
    )))]);
    macro_("twice", &["expr"], &["e"], body)
}

#[test]
fn macro_uses_inside_macro_arguments() {
    // macro neg(expr e) { return {tag: "unary", op: "-", value: e} }
    let neg = macro_(
        "neg",
        &["expr"],
        &["e"],
        block(vec![ret(Some(dict(vec![
            (str("tag"), str("unary")),
            (str("op"), str("-")),
            (str("value"), name("e")),
        ])))]),
    );
    let mut macros = MacroTable::default();
    macros.define(&twice()).unwrap();
    macros.define(&neg).unwrap();

    // twice(neg(5))
    let mut parser = Nested {
        macros,
        input: vec![Token::Use("neg"), Token::Syntax(Syntax::Node(int(5)))],
    };
    let expanded = expand_use(&mut parser, "twice", &Pos::default()).unwrap();
    assert_eq!(expanded, binary("+", unary("-", int(5)), unary("-", int(5))));
    assert!(parser.input.is_empty());

    let (_, result) = run(vec![ret(Some(expanded))]);
    assert_eq!(result.unwrap(), Value::int(-10));
}

#[test]
fn malformed_results_are_rejected() {
    // macro half() { return {op: "+"} }
    let half = macro_(
        "half",
        &[],
        &[],
        block(vec![ret(Some(dict(vec![(str("op"), str("+"))])))]),
    );
    let mut macros = MacroTable::default();
    macros.define(&half).unwrap();
    let err = macros.expand("half", &mut Queue(vec![]), &Pos::default()).unwrap_err();
    assert!(err.message.starts_with("Macro half returned bad syntax"), "{}", err.message);

    // a node with a field its kind does not have
    let extra = macro_(
        "extra",
        &[],
        &[],
        block(vec![ret(Some(dict(vec![
            (str("tag"), str("int")),
            (str("value"), int(1)),
            (str("color"), str("red")),
        ])))]),
    );
    macros.define(&extra).unwrap();
    let err = macros.expand("extra", &mut Queue(vec![]), &Pos::default()).unwrap_err();
    assert!(err.message.ends_with("int node has fields it does not declare"), "{}", err.message);
}

#[test]
fn ast_helpers_are_imported_into_every_macro() {
    let mut macros = MacroTable::default();
    macros.define(&twice()).unwrap();
    let expanded = macros
        .expand("twice", &mut Queue(vec![Syntax::Node(int(4))]), &Pos::default())
        .unwrap();
    assert_eq!(expanded, binary("+", int(4), int(4)));
}

#[test]
fn macro_imports_resolve_from_the_defining_file() {
    // /pkg/helpers.rn: let shout = func(x) { return ast.call(ast.name("print"), [x], false) }
    let shout = func(
        &["x"],
        block(vec![ret(Some(call(
            index(name("ast"), str("call")),
            vec![
                call(index(name("ast"), str("name")), vec![str("print")]),
                array(vec![name("x")]),
                boolean(false),
            ],
        )))]),
    );
    let mut source = MemorySource::new();
    source.insert("/pkg/helpers.rn", program(vec![import("ast", None), let_("shout", shout)]));

    // macro say(expr e) { import helpers; return helpers.shout(e) }
    let say = macro_(
        "say",
        &["expr"],
        &["e"],
        block(vec![
            import("helpers", None),
            ret(Some(call(index(name("helpers"), str("shout")), vec![name("e")]))),
        ]),
    );
    let mut macros = MacroTable::default();
    let from = std::path::Path::new("/pkg/main.rn");
    macros.define_in(&say, &mut source, Some(from)).unwrap();
    assert_eq!(source.loads(std::path::Path::new("/pkg/helpers.rn")), 1);

    let expanded = macros
        .expand("say", &mut Queue(vec![Syntax::Node(str("hi"))]), &Pos::default())
        .unwrap();
    assert_eq!(expanded, call_name("print", vec![str("hi")]));

    // without the defining file the import is unknown
    let err = MacroTable::default().define(&say).unwrap_err();
    assert_eq!(err.message, "Unknown module \"helpers\"");
}

#[test]
fn imported_macros_are_prefixed() {
    let mut lib = MacroTable::default();
    lib.define(&twice()).unwrap();

    let mut macros = MacroTable::default();
    macros.import("lib", &lib);
    assert!(macros.contains("lib.twice"));
    assert!(!macros.contains("twice"));

    let expanded = macros
        .expand("lib.twice", &mut Queue(vec![Syntax::Node(int(1))]), &Pos::default())
        .unwrap();
    assert_eq!(expanded, binary("+", int(1), int(1)));

    // names a file imported itself are not passed on
    let mut outer = MacroTable::default();
    outer.import("app", &macros);
    assert_eq!(outer.names().count(), 0);
}

#[test]
fn block_and_name_argument_kinds() {
    assert_eq!(SyntaxKind::from_name("exprblock"), Some(SyntaxKind::ExprBlock));
    assert_eq!(SyntaxKind::from_name("namestr"), Some(SyntaxKind::NameStr));
    assert_eq!(SyntaxKind::NameStr.name(), "namestr");

    // macro label(namestr n) { return n $ "!" }
    let label = macro_(
        "label",
        &["namestr"],
        &["n"],
        block(vec![ret(Some(binary("$", name("n"), str("!"))))]),
    );
    let mut macros = MacroTable::default();
    macros.define(&label).unwrap();
    let expanded = macros
        .expand("label", &mut Queue(vec![Syntax::Str("go".into())]), &Pos::default())
        .unwrap();
    assert_eq!(expanded, str("go!"));
}
