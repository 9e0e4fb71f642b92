use codspeed_criterion_compat::{criterion_group, criterion_main, Criterion};
use rulr::Engine;

const BENCHMARKS: &[&str] = &["path", "reachability", "policy"];

fn run_example(program: &str, seminaive: bool) {
    let mut engine = Engine::default();
    engine.set_seminaive(seminaive);
    engine.load_str(program).unwrap();
    engine.evaluate().unwrap();
}

/// Transitive closure of a chain of `n` nodes, quadratic in `n`.
fn chain(n: usize) -> String {
    let mut program = String::new();
    for i in 0..n {
        program.push_str(&format!("edge({i}, {}).\n", i + 1));
    }
    program.push_str("path(A, B) :- edge(A, B).\n");
    program.push_str("path(A, C) :- path(A, B), edge(B, C).\n");
    program
}

pub fn criterion_benchmark(c: &mut Criterion) {
    for name in BENCHMARKS {
        let filename = format!("tests/{}.dl", name);
        let program = std::fs::read_to_string(&filename).unwrap();
        c.bench_function(name, |b| b.iter(|| run_example(&program, true)));
    }

    let program = chain(200);
    c.bench_function("chain_seminaive", |b| b.iter(|| run_example(&program, true)));
    c.bench_function("chain_naive", |b| b.iter(|| run_example(&program, false)));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
