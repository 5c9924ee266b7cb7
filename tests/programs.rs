//! Whole programs compiled through a [`ModuleCache`] and run on an engine.

use rain::ast::build::*;
use rain::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine(max_depth: usize) -> Engine {
    Engine::new(EngineOptions {
        max_depth,
        capture_output: true,
        ..Default::default()
    })
}

/// Compile `/main.rn` with the modules already in `source` and run it.
fn run_with(source: &mut MemorySource, main: Vec<Node>, max_depth: usize) -> (Engine, Result<Value, Fatal>) {
    init_logging();
    let path = source.add("main", program(main));
    let mut cache = ModuleCache::new();
    let id = cache
        .compile_program(source, &path, CompileOptions::default())
        .unwrap();
    let mut engine = engine(max_depth);
    engine.load_program(&cache, id).unwrap();
    let result = engine.run(id);
    (engine, result)
}

fn run(main: Vec<Node>) -> (Engine, Result<Value, Fatal>) {
    run_with(&mut MemorySource::new(), main, 512)
}

fn main_fn(body: Vec<Node>) -> Node {
    let_("main", func(&[], block(body)))
}

#[test]
fn init_runs_before_main_dependencies_first() {
    let mut source = MemorySource::new();
    source.add(
        "c",
        program(vec![let_("init", func(&[], block(vec![call_name("print", vec![str("c init")])])))]),
    );
    source.add(
        "b",
        program(vec![
            import("c", None),
            let_("init", func(&[], block(vec![call_name("print", vec![str("b init")])]))),
        ]),
    );
    let (engine, result) = run_with(
        &mut source,
        vec![
            import("b", None),
            import("c", None),
            let_("init", func(&[], block(vec![call_name("print", vec![str("main init")])]))),
            main_fn(vec![call_name("print", vec![str("main")]), ret(Some(int(0)))]),
        ],
        512,
    );
    assert_eq!(result.unwrap(), Value::int(0));
    assert_eq!(engine.output(), "c init\nb init\nmain init\nmain\n");
}

#[test]
fn importers_share_one_module_instance() {
    let mut source = MemorySource::new();
    let c = source.add(
        "c",
        program(vec![
            let_("shared", int(1)),
            let_("set", func(&["v"], block(vec![assign(name("shared"), name("v"))]))),
        ]),
    );
    source.add(
        "a",
        program(vec![
            import("c", None),
            let_("read", func(&[], block(vec![ret(Some(index(name("c"), str("shared"))))]))),
        ]),
    );
    source.add(
        "b",
        program(vec![
            import("c", None),
            let_(
                "write",
                func(&["v"], block(vec![call(index(name("c"), str("set")), vec![name("v")])])),
            ),
            let_("peek", func(&[], block(vec![ret(Some(index(name("c"), str("shared"))))]))),
        ]),
    );

    init_logging();
    let main = source.add(
        "main",
        program(vec![
            import("a", None),
            import("b", None),
            main_fn(vec![
                call(index(name("b"), str("write")), vec![int(7)]),
                ret(Some(call(index(name("a"), str("read")), vec![]))),
            ]),
        ]),
    );
    let mut cache = ModuleCache::new();
    let id = cache
        .compile_program(&mut source, &main, CompileOptions::default())
        .unwrap();
    assert_eq!(source.loads(&c), 1);

    let mut engine = engine(512);
    engine.load_program(&cache, id).unwrap();
    assert_eq!(engine.run(id).unwrap(), Value::int(7));

    // the entry each importer compiled its read against
    let read_global = |module: &str, func: &str| {
        let id = cache.id_of(&MemorySource::path(module)).unwrap();
        let ir = cache.get_ref(id).unwrap();
        let code = &ir.funcs.iter().find(|f| f.name == func).unwrap().code;
        code.iter()
            .find_map(|i| match i {
                rain::lir::Instr::LoadGlobal { global, .. } => Some(*global),
                _ => None,
            })
            .unwrap()
    };
    let through_a = read_global("a", "a.read");
    let through_b = read_global("b", "b.peek");
    assert_eq!(through_a.table.module, cache.id_of(&c).unwrap());
    assert_eq!(through_a, through_b);

    let a_ptr = engine.global_ptr(through_a).unwrap();
    let b_ptr = engine.global_ptr(through_b).unwrap();
    assert!(!a_ptr.is_null());
    assert_eq!(a_ptr, b_ptr);
    assert_eq!(unsafe { *b_ptr }, Value::int(7));
}

#[test]
fn closures_capture_snapshots() {
    let (_, result) = run(vec![main_fn(vec![
        let_("n", int(1)),
        let_("get", func(&[], block(vec![ret(Some(name("n")))]))),
        assign(name("n"), int(2)),
        ret(Some(binary("+", call_name("get", vec![]), name("n")))),
    ])]);
    // the closure still sees 1, the outer variable holds 2
    assert_eq!(result.unwrap(), Value::int(3));
}

#[test]
fn nested_literals_snapshot_through_two_levels() {
    let inner = func(&[], block(vec![ret(Some(name("n")))]));
    let middle = func(&[], block(vec![ret(Some(inner))]));
    let (_, result) = run(vec![main_fn(vec![
        let_("n", int(1)),
        let_("middle", middle),
        assign(name("n"), int(2)),
        let_("inner", call_name("middle", vec![])),
        ret(Some(binary("+", binary("*", call_name("inner", vec![]), int(10)), name("n")))),
    ])]);
    // `middle` captured n = 1 and handed that copy down to `inner`
    assert_eq!(result.unwrap(), Value::int(12));
}

#[test]
fn closure_writes_stay_in_its_environment() {
    let (_, result) = run(vec![main_fn(vec![
        let_("n", int(0)),
        let_(
            "bump",
            func(
                &[],
                block(vec![
                    assign(name("n"), binary("+", name("n"), int(1))),
                    ret(Some(name("n"))),
                ]),
            ),
        ),
        call_name("bump", vec![]),
        let_("second", call_name("bump", vec![])),
        ret(Some(binary("+", binary("*", name("second"), int(10)), name("n")))),
    ])]);
    assert_eq!(result.unwrap(), Value::int(20));
}

#[test]
fn local_closures_recurse_through_themselves() {
    let fact = func(
        &["n"],
        block(vec![
            if_(binary("<", name("n"), int(2)), block(vec![ret(Some(int(1)))]), None),
            ret(Some(binary(
                "*",
                name("n"),
                call_name("fact", vec![binary("-", name("n"), int(1))]),
            ))),
        ]),
    );
    let (_, result) = run(vec![main_fn(vec![
        let_("unused", int(0)),
        let_("fact", fact),
        ret(Some(call_name("fact", vec![int(10)]))),
    ])]);
    assert_eq!(result.unwrap(), Value::int(3628800));
}

#[test]
fn catch_yields_the_thrown_box_or_null() {
    let (_, result) = run(vec![main_fn(vec![ret(Some(catch(
        None,
        block(vec![call_name("throw", vec![int(5)]), call_name("print", vec![str("unreached")])]),
    )))])]);
    assert_eq!(result.unwrap(), Value::int(5));

    let (engine, result) = run(vec![main_fn(vec![ret(Some(catch(
        None,
        block(vec![call_name("print", vec![str("body")])]),
    )))])]);
    assert_eq!(result.unwrap(), Value::null());
    assert_eq!(engine.output(), "body\n");
}

#[test]
fn runtime_failures_are_catchable_strings() {
    let (engine, result) = run(vec![
        let_("one", func(&["x"], block(vec![ret(Some(name("x")))]))),
        main_fn(vec![
            catch(Some("a"), block(vec![call(int(3), vec![])])),
            catch(Some("b"), block(vec![call_name("one", vec![int(1), int(2)])])),
            ret(Some(binary("$", binary("$", name("a"), str(" ")), name("b")))),
        ]),
    ]);
    let value = result.unwrap();
    assert_eq!(engine.string(value).as_deref(), Some("uncallable arg_mismatch"));
}

#[test]
fn protected_call_returns_result_or_throw() {
    let (_, result) = run(vec![
        let_("id", func(&["x"], block(vec![ret(Some(name("x")))]))),
        main_fn(vec![ret(Some(binary(
            "+",
            pcall(name("id"), vec![int(40)]),
            pcall(name("throw"), vec![int(2)]),
        )))]),
    ]);
    assert_eq!(result.unwrap(), Value::int(42));
}

#[test]
fn break_out_of_a_catch_inside_a_loop() {
    let (engine, result) = run(vec![main_fn(vec![
        let_("i", int(0)),
        loop_(block(vec![
            assign(name("i"), binary("+", name("i"), int(1))),
            catch(None, block(vec![break_(Some(binary(">=", name("i"), int(3))))])),
        ])),
        // the handler of the region the break left must be gone
        catch(Some("e"), block(vec![call_name("throw", vec![str("after")])])),
        call_name("print", vec![name("e")]),
        ret(Some(name("i"))),
    ])]);
    assert_eq!(result.unwrap(), Value::int(3));
    assert_eq!(engine.output(), "after\n");
}

#[test]
fn uncaught_throw_is_fatal_with_a_trace() {
    let (_, result) = run(vec![
        let_("fail", func(&[], block(vec![call_name("throw", vec![str("oops")])]))),
        main_fn(vec![call_name("fail", vec![])]),
    ]);
    let fatal = result.unwrap_err();
    assert_eq!(fatal.message, "oops");
    assert_eq!(fatal.trace.first().map(String::as_str), Some("main.entry"));
    assert!(fatal.trace.iter().any(|line| line.starts_with("main.fail")));
}

#[test]
fn runaway_recursion_throws_stack_overflow() {
    let (_, result) = run_with(
        &mut MemorySource::new(),
        vec![
            let_("spin", func(&[], block(vec![ret(Some(call_name("spin", vec![])))]))),
            main_fn(vec![ret(Some(call_name("spin", vec![])))]),
        ],
        64,
    );
    let fatal = result.unwrap_err();
    assert_eq!(fatal.message, "stack_overflow");

    let (engine, result) = run_with(
        &mut MemorySource::new(),
        vec![
            let_("spin", func(&[], block(vec![ret(Some(call_name("spin", vec![])))]))),
            main_fn(vec![ret(Some(catch(None, block(vec![call_name("spin", vec![])]))))]),
        ],
        64,
    );
    let value = result.unwrap();
    assert_eq!(engine.string(value).as_deref(), Some("stack_overflow"));
}

#[test]
fn arrays_grow_through_their_prototype() {
    let (engine, result) = run(vec![main_fn(vec![
        let_("xs", array(vec![int(1), int(2)])),
        method(name("xs"), "push", vec![int(3)]),
        let_("sum", int(0)),
        let_("i", int(0)),
        while_(
            binary("<", name("i"), method(name("xs"), "len", vec![])),
            block(vec![
                assign(name("sum"), binary("+", name("sum"), index(name("xs"), name("i")))),
                assign(name("i"), binary("+", name("i"), int(1))),
            ]),
        ),
        call_name("print", vec![name("sum")]),
        ret(Some(call_name("len", vec![name("xs")]))),
    ])]);
    assert_eq!(result.unwrap(), Value::int(3));
    assert_eq!(engine.output(), "6\n");
}

#[test]
fn meta_get_hook_answers_missing_keys() {
    let hook = func(
        &["self", "key"],
        block(vec![ret(Some(binary("$", str("missing "), name("key"))))]),
    );
    let (engine, result) = run(vec![main_fn(vec![
        let_("t", binary("::", table(), dict(vec![(str("get"), hook)]))),
        assign(index(name("t"), str("here")), int(1)),
        call_name("print", vec![index(name("t"), str("here"))]),
        ret(Some(index(name("t"), str("gone")))),
    ])]);
    let value = result.unwrap();
    assert_eq!(engine.string(value).as_deref(), Some("missing gone"));
    assert_eq!(engine.output(), "1\n");
}

#[test]
fn for_loops_until_null() {
    let (engine, result) = run(vec![main_fn(vec![
        let_("n", int(0)),
        let_(
            "next",
            func(
                &[],
                block(vec![
                    if_(binary(">=", name("n"), int(3)), block(vec![ret(None)]), None),
                    assign(name("n"), binary("+", name("n"), int(1))),
                    ret(Some(name("n"))),
                ]),
            ),
        ),
        for_("x", name("next"), block(vec![call_name("print", vec![name("x")])])),
        ret(Some(name("n"))),
    ])]);
    // `next` counts in its own environment
    assert_eq!(result.unwrap(), Value::int(0));
    assert_eq!(engine.output(), "1\n2\n3\n");
}

#[test]
fn module_scope_rejects_code() {
    init_logging();
    let mut source = MemorySource::new();
    let path = source.add(
        "main",
        program(vec![call_name("print", vec![str("side effect")]), main_fn(vec![])]),
    );
    let mut cache = ModuleCache::new();
    let err = cache
        .compile_program(&mut source, &path, CompileOptions::default())
        .unwrap_err();
    assert_eq!(err.message, "A call is not allowed at module scope");
    assert!(cache.id_of(&path).is_none());
}

#[test]
fn import_cycles_are_reported() {
    init_logging();
    let mut source = MemorySource::new();
    source.add("x", program(vec![import("main", None)]));
    let path = source.add("main", program(vec![import("x", None), main_fn(vec![])]));
    let mut cache = ModuleCache::new();
    let err = cache
        .compile_program(&mut source, &path, CompileOptions::default())
        .unwrap_err();
    assert_eq!(err.message, "Import cycle: /main.rn -> /x.rn -> /main.rn");
}

#[test]
fn exported_functions_are_callable_from_the_host() {
    init_logging();
    let mut source = MemorySource::new();
    source.add(
        "lib",
        program(vec![let_(
            "add",
            func(&["a", "b"], block(vec![ret(Some(binary("+", name("a"), name("b"))))])),
        )]),
    );
    let mut cache = ModuleCache::new();
    let lib = cache
        .import(&mut source, "lib", None, CompileOptions::default())
        .unwrap();
    let mut engine = engine(512);
    engine.load_program(&cache, lib).unwrap();
    let sum = engine
        .call_export(lib, "add", &[Value::int(2), Value::float(0.5)])
        .unwrap();
    assert_eq!(sum, Value::float(2.5));

    let fatal = engine.call_export(lib, "add", &[Value::int(2)]).unwrap_err();
    assert_eq!(fatal.message, "arg_mismatch");
}

#[test]
fn destructuring_assignment() {
    let (engine, result) = run(vec![main_fn(vec![
        unpack(
            vec![name("a"), array(vec![name("b"), name("c")])],
            array(vec![int(1), array(vec![int(2), int(3)])]),
            true,
        ),
        // both sides are read before either is written
        unpack(vec![name("a"), name("b")], array(vec![name("b"), name("a")]), false),
        let_("t", table()),
        unpack(vec![index(name("t"), str("k")), name("c")], array(vec![int(9)]), false),
        call_name("print", vec![index(name("t"), str("k"))]),
        call_name("print", vec![name("c")]),
        ret(Some(binary("-", name("a"), name("b")))),
    ])]);
    assert_eq!(result.unwrap(), Value::int(1));
    assert_eq!(engine.output(), "9\nnull\n");
}

#[test]
fn for_unpacks_each_result() {
    let pairs = array(vec![
        array(vec![str("a"), int(1)]),
        array(vec![str("b"), int(2)]),
    ]);
    let next = func(
        &[],
        block(vec![
            assign(name("i"), binary("+", name("i"), int(1))),
            ret(Some(index(name("pairs"), name("i")))),
        ]),
    );
    let (engine, result) = run(vec![main_fn(vec![
        let_("pairs", pairs),
        let_("i", int(-1)),
        let_("total", int(0)),
        for_unpack(
            vec![name("k"), name("v")],
            next,
            block(vec![
                call_name("print", vec![name("k")]),
                assign(name("total"), binary("+", name("total"), name("v"))),
            ]),
        ),
        ret(Some(name("total"))),
    ])]);
    assert_eq!(result.unwrap(), Value::int(3));
    assert_eq!(engine.output(), "a\nb\n");
}

#[test]
fn save_sets_what_a_plain_return_gives_back() {
    let f = func(
        &["early"],
        block(vec![
            save(Some("out"), int(1)),
            if_(name("early"), block(vec![ret(None)]), None),
            assign(name("out"), binary("+", name("out"), int(10))),
        ]),
    );
    let (_, result) = run(vec![main_fn(vec![
        let_("f", f),
        ret(Some(binary(
            "+",
            binary("*", call_name("f", vec![boolean(true)]), int(100)),
            call_name("f", vec![boolean(false)]),
        ))),
    ])]);
    assert_eq!(result.unwrap(), Value::int(111));
}

#[test]
fn with_passes_its_block_as_a_function() {
    let twice = func(
        &["body"],
        block(vec![call_name("body", vec![int(1)]), call_name("body", vec![int(2)])]),
    );
    let (engine, result) = run(vec![main_fn(vec![
        let_("twice", twice),
        with(name("twice"), &["n"], block(vec![call_name("print", vec![name("n")])])),
        ret(Some(int(0))),
    ])]);
    assert_eq!(result.unwrap(), Value::int(0));
    assert_eq!(engine.output(), "1\n2\n");
}

#[test]
fn bind_throws_on_null_captures() {
    let (engine, result) = run(vec![main_fn(vec![
        let_("ready", int(5)),
        declare("missing"),
        let_("get", func(&[], block(vec![bind(&["ready"]), ret(Some(name("ready")))]))),
        let_("bad", func(&[], block(vec![bind(&["missing"]), ret(Some(int(0)))]))),
        call_name("print", vec![call_name("get", vec![])]),
        ret(Some(pcall(name("bad"), vec![]))),
    ])]);
    let thrown = result.unwrap();
    assert_eq!(engine.string(thrown).as_deref(), Some("unbound_var"));
    assert_eq!(engine.output(), "5\n");
}

#[test]
fn use_binds_existing_entries() {
    let mut source = MemorySource::new();
    source.add("conf", program(vec![let_("port", int(80))]));
    let (engine, result) = run_with(
        &mut source,
        vec![
            import("conf", None),
            use_("port", name("conf"), str("port")),
            main_fn(vec![
                let_("t", dict(vec![(str("a"), int(1))])),
                use_("a", name("t"), str("a")),
                let_("err", catch(None, block(vec![use_("z", name("t"), str("z"))]))),
                call_name("print", vec![name("err")]),
                ret(Some(binary("+", name("port"), name("a")))),
            ]),
        ],
        512,
    );
    assert_eq!(result.unwrap(), Value::int(81));
    assert_eq!(engine.output(), "key_error\n");
}

#[test]
fn diagnostics_from_nodes() {
    init_logging();
    let mut source = MemorySource::new();
    let path = source.add(
        "main",
        program(vec![warning("old api"), main_fn(vec![error("unsupported here")])]),
    );
    let mut cache = ModuleCache::new();
    let err = cache
        .compile_program(&mut source, &path, CompileOptions::default())
        .unwrap_err();
    assert_eq!(err.message, "unsupported here");
}

#[test]
fn type_and_meta_builtins() {
    let (engine, result) = run(vec![main_fn(vec![
        let_("proto", table()),
        let_("obj", binary("::", table(), name("proto"))),
        call_name("print", vec![call_name("type", vec![float(1.5)])]),
        call_name("print", vec![call_name("type", vec![null()])]),
        call_name("print", vec![binary("==", call_name("meta", vec![name("obj")]), name("proto"))]),
        call_name("print", vec![call_name("meta", vec![int(5)])]),
        ret(Some(call_name("type", vec![name("obj")]))),
    ])]);
    assert_eq!(result.unwrap(), Value::int(Tag::Table as i64));
    assert_eq!(engine.output(), "2\n0\ntrue\nnull\n");
}

#[test]
fn exit_unwinds_past_catch() {
    let (engine, result) = run(vec![main_fn(vec![
        catch(None, block(vec![call_name("exit", vec![int(3)])])),
        call_name("print", vec![str("after")]),
    ])]);
    let fatal = result.unwrap_err();
    assert_eq!(fatal.exit, Some(3));
    assert_eq!(engine.output(), "");

    let (_, result) = run(vec![main_fn(vec![call_name("exit", vec![boolean(true)])])]);
    assert_eq!(result.unwrap_err().exit, Some(0));
}
