use std::cell::Cell;
use std::rc::Rc;

use rulr::ir::{CapacityError, ValidationError};
use rulr::*;

const PATH: &str = r#"
    .pred edge(a: symbol, b: symbol).
    edge("x", "y").
    edge("y", "z").
    path(A, B) :- edge(A, B).
    path(A, C) :- path(A, B), edge(B, C).
"#;

fn sorted(engine: &Engine, name: &str) -> Vec<Vec<String>> {
    let mut rows = engine.relation_strings(name).unwrap();
    rows.sort();
    rows
}

fn row(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// An [`Eqrel`] that counts how often it is materialized and acknowledged.
#[derive(Default)]
struct CountingEqrel {
    inner: Eqrel,
    iterated: Rc<Cell<usize>>,
    acknowledged: Rc<Cell<usize>>,
}

impl RelationProvider for CountingEqrel {
    fn name(&self) -> &str {
        "counting_eqrel"
    }

    fn arity(&self) -> usize {
        2
    }

    fn add(&mut self, tuple: &[Value]) -> Result<bool, ProviderError> {
        self.inner.add(tuple)
    }

    fn contains(&self, tuple: &[Value]) -> Result<bool, ProviderError> {
        self.inner.contains(tuple)
    }

    fn lookup(&self, column: usize, key: Value) -> Option<Vec<Tuple>> {
        self.inner.lookup(column, key)
    }

    fn iterate(&self) -> Option<Vec<Tuple>> {
        self.iterated.set(self.iterated.get() + 1);
        self.inner.iterate()
    }

    fn for_each(&self, f: &mut dyn FnMut(&[Value]) -> bool) -> Result<(), ProviderError> {
        self.inner.for_each(f)
    }

    fn has_delta(&self) -> bool {
        self.inner.has_delta()
    }

    fn delta(&self) -> Option<Vec<Tuple>> {
        self.inner.delta()
    }

    fn acknowledge_delta(&mut self) {
        self.acknowledged.set(self.acknowledged.get() + 1);
        self.inner.acknowledge_delta()
    }
}

/// A provider that rejects every tuple.
struct Full;

impl RelationProvider for Full {
    fn name(&self) -> &str {
        "full"
    }

    fn arity(&self) -> usize {
        1
    }

    fn add(&mut self, _tuple: &[Value]) -> Result<bool, ProviderError> {
        Err(ProviderError::Failed("full".into()))
    }

    fn contains(&self, _tuple: &[Value]) -> Result<bool, ProviderError> {
        Ok(false)
    }
}

#[test]
fn test_path_example() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut engine = Engine::default();
    engine.load_str(PATH).unwrap();
    let report = engine.evaluate().unwrap();
    assert!(report.updated);
    assert_eq!(report.derived_per_pred["path"], 3);
    assert_eq!(
        sorted(&engine, "path"),
        vec![row(&["x", "y"]), row(&["x", "z"]), row(&["y", "z"])]
    );

    let path = engine.pred_id("path").unwrap();
    assert!(engine.pred_def(path).unwrap().is_idb);
    assert_eq!(engine.relation(path).unwrap().len(), 3);
    let edge = engine.pred_id("edge").unwrap();
    let def = engine.pred_def(edge).unwrap();
    assert!(!def.is_idb);
    assert_eq!(def.types, vec![ArgType::Symbol, ArgType::Symbol]);
    assert_eq!(engine.pred_name(edge), Some("edge"));
}

#[test]
fn test_evaluation_is_idempotent() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut engine = Engine::default();
    engine.load_str(PATH).unwrap();
    engine.evaluate().unwrap();
    let before = sorted(&engine, "path");
    let report = engine.evaluate().unwrap();
    assert!(!report.updated);
    assert_eq!(report.total_derived(), 0);
    assert_eq!(sorted(&engine, "path"), before);
}

#[test]
fn test_naive_matches_seminaive() {
    let _ = env_logger::builder().is_test(true).try_init();

    let program = r#"
        edge(1, 2). edge(2, 3). edge(3, 4). edge(4, 2). edge(5, 6).
        node(X) :- edge(X, _).
        node(Y) :- edge(_, Y).
        reach(X, Y) :- edge(X, Y).
        reach(X, Z) :- reach(X, Y), reach(Y, Z).
        cyclic(X) :- reach(X, X).
        acyclic(X) :- node(X), not cyclic(X).
        far(X, Y) :- reach(X, Y), not edge(X, Y), X < Y.
    "#;
    let run = |seminaive: bool| {
        let mut engine = Engine::default();
        engine.set_seminaive(seminaive);
        engine.load_str(program).unwrap();
        engine.evaluate().unwrap();
        ["node", "reach", "cyclic", "acyclic", "far"]
            .iter()
            .map(|name| sorted(&engine, name))
            .collect::<Vec<_>>()
    };
    let semi = run(true);
    assert_eq!(semi, run(false));
    assert_eq!(semi[2], vec![row(&["2"]), row(&["3"]), row(&["4"])]);
    assert_eq!(semi[3], vec![row(&["1"]), row(&["5"]), row(&["6"])]);
}

#[test]
fn test_negation_cycle_is_rejected() {
    let mut engine = Engine::default();
    let err = engine
        .load_str("p(X) :- r(X), not q(X). q(X) :- r(X), not p(X).")
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::NotStratifiable { .. })
    ));
}

#[test]
fn test_unsafe_rules_are_rejected() {
    let mut engine = Engine::default();
    for src in [
        "p(X) :- not q(X).",
        "p(X, Y) :- q(X).",
        "p(X) :- q(X), Y != X.",
        "p(X) :- q(X), X = Y.",
        "p(_) :- q(_).",
    ] {
        let err = engine.load_str(src).unwrap_err();
        assert!(
            matches!(
                err,
                Error::Validation(
                    ValidationError::UnsafeVariable { .. } | ValidationError::UnsafeWildcard { .. }
                )
            ),
            "{src}: {err}"
        );
    }
}

#[test]
fn test_failed_load_keeps_state() {
    let mut engine = Engine::default();
    engine.load_str(PATH).unwrap();
    engine.evaluate().unwrap();

    assert!(engine.load_str("path(A, C) :- path(A, B), edge(B, C)").is_err());
    assert!(engine.load_str("path(A, D) :- edge(A, B).").is_err());
    assert!(engine
        .load_str("blocked(x, y). edge(X, Y) :- blocked(X, Y), not edge(X, Y).")
        .is_err());
    assert_eq!(engine.pred_id("blocked"), None);
    assert_eq!(sorted(&engine, "path").len(), 3);

    // the old rules are still installed
    let edge = engine.pred_id("edge").unwrap();
    let (z, w) = (engine.intern("z"), engine.intern("w"));
    engine.insert_fact(edge, &[z, w]).unwrap();
    engine.evaluate().unwrap();
    assert_eq!(sorted(&engine, "path").len(), 6);
}

#[test]
fn test_rejected_program_facts_fail_evaluation() {
    let mut engine = Engine::default();
    engine.load_str("e(1). p(X) :- e(X).").unwrap();
    engine.evaluate().unwrap();
    let sink = engine.declare_predicate("sink", &[ArgType::Int]).unwrap();
    engine.set_provider(sink, Box::new(Full)).unwrap();

    // a load that fails to validate changes nothing, staged facts included
    assert!(engine.load_str("sink(5). q(X) :- e(X), not q(X).").is_err());
    assert_eq!(engine.pred_id("q"), None);
    assert_eq!(sorted(&engine, "p"), vec![row(&["1"])]);
    assert!(!engine.evaluate().unwrap().updated);

    // program facts reach the provider at evaluation, after the load
    // committed the new rules
    engine.load_str("sink(5). q(X) :- e(X).").unwrap();
    assert_eq!(sorted(&engine, "p"), vec![row(&["1"])]);
    for _ in 0..2 {
        assert!(matches!(
            engine.evaluate(),
            Err(Error::Provider(ProviderError::Failed(_)))
        ));
    }
    assert!(sorted(&engine, "q").is_empty());
}

#[test]
fn test_program_facts_are_inserted_by_evaluate() {
    let mut engine = Engine::default();
    engine.load_str(PATH).unwrap();
    assert!(sorted(&engine, "edge").is_empty());
    engine.load_str(".pred edge(a: symbol, b: symbol).").unwrap();
    engine.evaluate().unwrap();
    assert_eq!(sorted(&engine, "edge").len(), 2);
    assert!(sorted(&engine, "path").is_empty());
}

#[test]
fn test_clear_derived() {
    let mut engine = Engine::default();
    engine.load_str(PATH).unwrap();
    engine.evaluate().unwrap();

    engine.clear_derived();
    assert!(sorted(&engine, "path").is_empty());
    assert_eq!(sorted(&engine, "edge").len(), 2);
    engine.evaluate().unwrap();
    assert_eq!(sorted(&engine, "path").len(), 3);

    engine
        .load_str(".clear_derived() rev(B, A) :- edge(A, B).")
        .unwrap();
    assert!(sorted(&engine, "path").is_empty());
    engine.evaluate().unwrap();
    assert_eq!(
        sorted(&engine, "rev"),
        vec![row(&["y", "x"]), row(&["z", "y"])]
    );
}

#[test]
fn test_capacity_limits() {
    let engine = |limits: Limits| {
        Engine::with_config(Config {
            limits,
            ..Config::default()
        })
    };

    let err = engine(Limits {
        max_predicates: 2,
        ..Limits::default()
    })
    .load_str("a(1). b(1). c(1).")
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Capacity(CapacityError::TooManyPredicates { limit: 2 })
    ));

    let err = engine(Limits {
        max_arity: 2,
        ..Limits::default()
    })
    .load_str("t(1, 2, 3).")
    .unwrap_err();
    assert!(matches!(err, Error::Capacity(CapacityError::ArityTooLarge { .. })));

    let err = engine(Limits {
        max_body_literals: 1,
        ..Limits::default()
    })
    .load_str("p(X) :- q(X), r(X).")
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Capacity(CapacityError::TooManyBodyLiterals { found: 2, .. })
    ));

    let err = engine(Limits {
        max_rule_vars: 2,
        ..Limits::default()
    })
    .load_str("p(X) :- q(X, Y, Z).")
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Capacity(CapacityError::TooManyVariables { .. })
    ));
}

#[test]
fn test_eqrel_provider() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut engine = Engine::default();
    let same = engine
        .declare_predicate("same", &[ArgType::Symbol, ArgType::Symbol])
        .unwrap();
    engine.set_provider(same, Box::new(Eqrel::new())).unwrap();
    engine
        .load_str(
            r#"
            alias(a, b). alias(b, c). alias(d, e).
            same(X, Y) :- alias(X, Y).
            linked(X, Y) :- same(X, Y), X < Y.
            "#,
        )
        .unwrap();
    engine.evaluate().unwrap();

    let linked = sorted(&engine, "linked");
    assert!(linked.contains(&row(&["a", "c"])));
    assert_eq!(
        linked,
        vec![
            row(&["a", "b"]),
            row(&["a", "c"]),
            row(&["b", "c"]),
            row(&["d", "e"])
        ]
    );
    // 3 * 3 + 2 * 2 pairs, reflexive ones included
    assert_eq!(sorted(&engine, "same").len(), 13);

    let wrong = engine.declare_predicate("wrong", &[ArgType::Symbol]).unwrap();
    assert!(matches!(
        engine.set_provider(wrong, Box::new(Eqrel::new())),
        Err(Error::Provider(ProviderError::Arity { .. }))
    ));
}

#[test]
fn test_provider_scans_do_not_materialize() {
    let mut engine = Engine::default();
    let same = engine
        .declare_predicate("same", &[ArgType::Int, ArgType::Int])
        .unwrap();
    let iterated = Rc::new(Cell::new(0));
    let provider = CountingEqrel {
        iterated: iterated.clone(),
        ..Default::default()
    };
    engine.set_provider(same, Box::new(provider)).unwrap();
    for i in 0..20 {
        engine
            .insert_fact(same, &[Value::Int(i), Value::Int(i + 1)])
            .unwrap();
    }
    engine
        .load_str(
            "step(0, 1). step(1, 2). step(2, 3). step(3, 4). step(4, 5). step(5, 6).
             n(0).
             n(X) :- n(Y), step(Y, X), same(A, B), A < B.",
        )
        .unwrap();
    engine.evaluate().unwrap();

    assert_eq!(sorted(&engine, "n").len(), 7);
    // only when the stratum starts
    assert_eq!(iterated.get(), 1);
}

#[test]
fn test_provider_deltas_are_acknowledged_without_rules() {
    let mut engine = Engine::default();
    let same = engine
        .declare_predicate("same", &[ArgType::Int, ArgType::Int])
        .unwrap();
    let acknowledged = Rc::new(Cell::new(0));
    let provider = CountingEqrel {
        acknowledged: acknowledged.clone(),
        ..Default::default()
    };
    engine.set_provider(same, Box::new(provider)).unwrap();
    engine
        .insert_fact(same, &[Value::Int(1), Value::Int(2)])
        .unwrap();
    let report = engine.evaluate().unwrap();
    assert_eq!(report.total_rounds(), 0);
    assert_eq!(acknowledged.get(), 1);
    assert_eq!(sorted(&engine, "same").len(), 4);
}

#[test]
fn test_congruence_provider() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut engine = Engine::default();
    let graph = EGraph::shared();
    let eq = engine
        .declare_predicate("eq", &[ArgType::Symbol, ArgType::Symbol])
        .unwrap();
    let plus = engine
        .declare_predicate("plus", &[ArgType::Symbol; 4])
        .unwrap();
    engine
        .set_provider(eq, Box::new(EgraphEq::new(graph.clone())))
        .unwrap();
    engine
        .set_provider(plus, Box::new(Congruence::new(graph.clone(), 2).unwrap()))
        .unwrap();
    engine
        .load_str(
            r#"
            plus(add, a, b, r1).
            plus(add, c, d, r2).
            alias(a, c). alias(b, d).
            result(r1).
            eq(X, Y) :- alias(X, Y).
            merged(X, Y) :- result(X), eq(X, Y), X != Y.
            "#,
        )
        .unwrap();
    engine.evaluate().unwrap();

    assert_eq!(sorted(&engine, "merged"), vec![row(&["r1", "r2"])]);
    let (r1, r2) = (engine.intern("r1"), engine.intern("r2"));
    assert!(graph.borrow().same(r1, r2));
    assert_eq!(graph.borrow().n_nodes(), 2);
    assert_eq!(sorted(&engine, "plus").len(), 2);
    assert!(!engine.evaluate().unwrap().updated);
}

#[test]
fn test_compiled_round_trip() {
    let program = ast::parse_program(PATH).unwrap();
    let bytes = ast::compile_program(&program).unwrap();
    assert!(ast::is_compiled(&bytes));
    assert_eq!(&bytes[..8], b"RULRAST1");

    let dir = std::env::temp_dir().join(format!("rulr-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let (dl, dlc) = (dir.join("path.dl"), dir.join("path.dlc"));
    std::fs::write(&dl, PATH).unwrap();
    std::fs::write(&dlc, &bytes).unwrap();

    let mut from_source = Engine::default();
    from_source.load_file(&dl).unwrap();
    from_source.evaluate().unwrap();
    let mut compiled = Engine::default();
    compiled.load_file(&dlc).unwrap();
    compiled.evaluate().unwrap();
    assert_eq!(sorted(&from_source, "path"), sorted(&compiled, "path"));

    let mut truncated = bytes.clone();
    truncated.truncate(bytes.len() - 3);
    std::fs::write(&dlc, &truncated).unwrap();
    assert!(matches!(
        Engine::default().load_file(&dlc),
        Err(Error::Decode(_))
    ));
    assert!(matches!(
        Engine::default().load_file(dir.join("missing.dl")),
        Err(Error::Io(..))
    ));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_read_program_falls_back_to_source() {
    let dir = std::env::temp_dir().join(format!("rulr-fallback-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let bytes = ast::compile_program(&ast::parse_program(PATH).unwrap()).unwrap();
    let (dl, dlc) = (dir.join("path.dl"), dir.join("path.dlc"));
    std::fs::write(&dlc, &bytes[..bytes.len() - 3]).unwrap();

    // no source next to the broken file
    assert!(matches!(read_program(&dlc), Err(Error::Decode(_))));

    std::fs::write(&dl, PATH).unwrap();
    let program = read_program(&dlc).unwrap();
    assert_eq!(program.rules.len(), 2);
    let mut engine = Engine::default();
    engine.load_program(&program).unwrap();
    engine.evaluate().unwrap();
    assert_eq!(sorted(&engine, "path").len(), 3);

    // a source file with compiled magic does not fall back to itself
    let odd = dir.join("odd.dl");
    std::fs::write(&odd, b"RULRAST1").unwrap();
    assert!(matches!(read_program(&odd), Err(Error::Decode(_))));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_round_hook() {
    let mut engine = Engine::default();
    engine.load_str("p(1). q(X) :- p(X).").unwrap();
    let calls = Rc::new(Cell::new(0));
    let seen = calls.clone();
    engine.set_round_hook(move |stratum| {
        assert_eq!(stratum, 0);
        seen.set(seen.get() + 1);
        seen.get() <= 2
    });
    let report = engine.evaluate().unwrap();
    assert_eq!(report.rounds_per_stratum, vec![3]);
    assert_eq!(calls.get(), 3);
}

#[test]
fn test_fact_source() {
    let mut engine = Engine::default();
    let reading = engine.declare_predicate("reading", &[ArgType::Int]).unwrap();
    engine.load_str("high(X) :- reading(X), X > 10.").unwrap();
    let mut next = 8;
    engine
        .set_fact_source(reading, move || {
            next += 2;
            vec![tuple(&[Value::Int(next)])]
        })
        .unwrap();

    engine.evaluate().unwrap();
    assert!(sorted(&engine, "high").is_empty());
    engine.evaluate().unwrap();
    assert_eq!(sorted(&engine, "high"), vec![row(&["12"])]);

    let symbol = engine.intern("x");
    engine
        .set_fact_source(reading, move || vec![tuple(&[symbol])])
        .unwrap();
    assert!(matches!(
        engine.evaluate(),
        Err(Error::Validation(ValidationError::TypeMismatch { .. }))
    ));
}

#[test]
fn test_builtin_errors_surface() {
    let mut engine = Engine::default();
    engine
        .load_str(r#"s("abc"). m(X) :- s(X), match("(", X)."#)
        .unwrap();
    assert!(matches!(engine.evaluate(), Err(Error::Builtin(_))));
}

#[test]
fn test_unknown_predicate() {
    let engine = Engine::default();
    assert!(matches!(
        engine.relation_strings("nope"),
        Err(Error::UnknownPredicate(_))
    ));
    assert!(matches!(
        engine.relation(PredId(3)),
        Err(Error::UnknownPredicate(_))
    ));
}
