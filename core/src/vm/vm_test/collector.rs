use super::*;

/// Collects at every step and seals generations after a handful of cells.
fn eager_gc() -> RuntimeConfig {
    let mut config = RuntimeConfig::for_tests();
    config.gc.initial_threshold = 1;
    config.gc.check_interval = 1;
    config.generation_cell_limit = 4;
    config
}

fn without_gc() -> RuntimeConfig {
    RuntimeConfig {
        gc_enabled: false,
        ..RuntimeConfig::for_tests()
    }
}

/// Runs `program` with the collector off and with it firing constantly; both must agree.
fn agrees_under_collection(program: fn() -> (TreeBuilder, NodeId)) -> Detached {
    let (b, root) = program();
    let (expected, quiet) = run_with(b, root, without_gc());
    let expected = expected.unwrap_or_else(|e| panic!("run without gc failed: {e}"));
    assert_eq!(quiet.stats().gc_passes, 0);

    let (b, root) = program();
    let (got, engine) = run_with(b, root, eager_gc());
    let got = got.unwrap_or_else(|e| panic!("run under gc failed: {e}"));
    assert_eq!(got, expected);
    assert_clean(&engine);

    let stats = engine.stats();
    assert!(stats.gc_passes > 0, "collector never ran");
    assert!(stats.generations > 1 || stats.chain_depth > 0, "no generation was sealed: {stats:?}");
    got
}

/// `collect { x = 1 | 2 | 3; make = fn(n) fn(k) {v: n * k}; r = make(x)(10); guard(x != 2); [x, r.v] }`
fn closures_over_alternatives() -> (TreeBuilder, NodeId) {
    let mut b = TreeBuilder::new();
    let choices: Vec<NodeId> = (1..=3).map(|i| b.int(i)).collect();
    let alt = b.alt(choices);
    let def_x = b.define("x", alt);

    let n = b.load("n");
    let k = b.load("k");
    let product = b.binary(BinaryOp::Mul, n, k);
    let obj = b.object(vec![("v", product)], false);
    let inner = b.lambda(None, &["k"], obj);
    let make = b.lambda(None, &["n"], inner);
    let def_make = b.define("make", make);

    let f = b.load("make");
    let x = b.load("x");
    let made = b.call(f, vec![x]);
    let ten = b.int(10);
    let r = b.call(made, vec![ten]);
    let def_r = b.define("r", r);

    let ne = cmp(&mut b, BinaryOp::Ne, "x", 2);
    let guard = b.guard(ne);
    let x = b.load("x");
    let rv = b.load("r");
    let v = b.member(rv, "v");
    let pair = b.array(vec![x, v]);

    let body = b.seq(vec![def_x, def_make, def_r, guard, pair]);
    let root = b.collect(body, false);
    (b, root)
}

#[test]
fn closures_and_checkpoints_survive_collection() {
    assert_eq!(
        agrees_under_collection(closures_over_alternatives),
        Detached::Array(vec![Detached::ints([1, 10]), Detached::ints([3, 30])])
    );
}

/// `sum = fn(n) if n == 0 { 0 } else { n + sum(n - 1) }; collect { d = 5 | 50 | 150; sum(d) }`
fn recursion_per_alternative() -> (TreeBuilder, NodeId) {
    let mut b = TreeBuilder::new();
    let cond = cmp(&mut b, BinaryOp::Eq, "n", 0);
    let zero = b.int(0);
    let n = b.load("n");
    let f = b.load("sum");
    let dec = cmp(&mut b, BinaryOp::Sub, "n", 1);
    let rec = b.call(f, vec![dec]);
    let add = b.binary(BinaryOp::Add, n, rec);
    let body = b.if_(cond, zero, Some(add));
    let lambda = b.lambda(Some("sum"), &["n"], body);
    let def_sum = b.define("sum", lambda);

    let depths: Vec<NodeId> = [5, 50, 150].iter().map(|d| b.int(*d)).collect();
    let alt = b.alt(depths);
    let def_d = b.define("d", alt);
    let f = b.load("sum");
    let d = b.load("d");
    let call = b.call(f, vec![d]);
    let each = b.seq(vec![def_d, call]);
    let collect = b.collect(each, false);
    let root = b.seq(vec![def_sum, collect]);
    (b, root)
}

#[test]
fn call_frames_survive_collection() {
    assert_eq!(
        agrees_under_collection(recursion_per_alternative),
        Detached::ints([15, 1275, 11325])
    );
}

/// ```text
/// acc = []; i = 0
/// while i < 200 { append(acc, [i, {sq: i * i}]); i = i + 1 }
/// alt { backtrack {reason: "retry"} } | [acc[199][1].sq, backtrack_data]
/// ```
fn payload_after_a_long_loop() -> (TreeBuilder, NodeId) {
    let mut b = TreeBuilder::new();
    let empty = b.array(Vec::new());
    let def_acc = b.define("acc", empty);
    let zero = b.int(0);
    let def_i = b.define("i", zero);

    let cond = cmp(&mut b, BinaryOp::Lt, "i", 200);
    let acc = b.load("acc");
    let i = b.load("i");
    let lhs = b.load("i");
    let rhs = b.load("i");
    let sq = b.binary(BinaryOp::Mul, lhs, rhs);
    let entry = b.object(vec![("sq", sq)], false);
    let item = b.array(vec![i, entry]);
    let push = b.append(acc, item);
    let inc = bump(&mut b, "i", 1);
    let body = b.seq(vec![push, inc]);
    let lp = b.while_(None, cond, body);

    let reason = b.literal("retry");
    let payload = b.object(vec![("reason", reason)], false);
    let fail = b.backtrack(Some(payload));
    let acc = b.load("acc");
    let last = b.int(199);
    let row = b.index(acc, last);
    let one = b.int(1);
    let cell = b.index(row, one);
    let sq = b.member(cell, "sq");
    let data = b.backtrack_data();
    let resumed = b.array(vec![sq, data]);
    let alt = b.alt(vec![fail, resumed]);

    let root = b.seq(vec![def_acc, def_i, lp, alt]);
    (b, root)
}

#[test]
fn backtrack_payload_and_loop_data_survive_collection() {
    assert_eq!(
        agrees_under_collection(payload_after_a_long_loop),
        Detached::Array(vec![
            Detached::Int(199 * 199),
            Detached::Object(vec![("reason".into(), Detached::str("retry"))]),
        ])
    );
}

/// `i = 0; repeat { guard(i < 40); i = i + 1 }`; every iteration pins a checkpoint generation.
fn pinned_repeat() -> (TreeBuilder, NodeId) {
    let mut b = TreeBuilder::new();
    let zero = b.int(0);
    let def = b.define("i", zero);
    let cond = cmp(&mut b, BinaryOp::Lt, "i", 40);
    let guard = b.guard(cond);
    let inc = bump(&mut b, "i", 1);
    let body = b.seq(vec![guard, inc]);
    let rep = b.repeat(body, 0, None);
    let root = b.seq(vec![def, rep]);
    (b, root)
}

#[test]
fn pinned_checkpoints_survive_collection() {
    assert_eq!(agrees_under_collection(pinned_repeat), Detached::ints(1..=40));
}
