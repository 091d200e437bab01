use super::*;

fn ints(b: &mut TreeBuilder, values: &[i64]) -> Vec<NodeId> {
    values.iter().map(|v| b.int(*v)).collect()
}

#[test]
fn alternation_takes_the_first_success() {
    let mut b = TreeBuilder::new();
    let branches = ints(&mut b, &[1, 2]);
    let root = b.alt(branches);
    let (result, engine) = run_with(b, root, RuntimeConfig::for_tests());
    assert_eq!(result.unwrap(), Detached::Int(1));
    assert_eq!(engine.pending_checkpoints(), 1, "the second branch stays available");
}

#[test]
fn failed_guard_moves_to_the_next_branch() {
    // alt { guard(false); 1 } | 2
    let mut b = TreeBuilder::new();
    let no = b.literal(false);
    let guard = b.guard(no);
    let one = b.int(1);
    let first = b.seq(vec![guard, one]);
    let second = b.int(2);
    let root = b.alt(vec![first, second]);
    assert_eq!(run_ok(b, root), Detached::Int(2));
}

#[test]
fn collect_enumerates_every_branch() {
    let mut b = TreeBuilder::new();
    let branches = ints(&mut b, &[1, 2, 3]);
    let alt = b.alt(branches);
    let root = b.collect(alt, false);
    assert_eq!(run_ok(b, root), Detached::ints([1, 2, 3]));
}

#[test]
fn collect_with_nothing_to_find_is_empty() {
    let mut b = TreeBuilder::new();
    let no = b.literal(false);
    let guard = b.guard(no);
    let root = b.collect(guard, false);
    assert_eq!(run_ok(b, root), Detached::Array(Vec::new()));
}

#[test]
fn guards_filter_solutions() {
    // collect { x = 1 | 2 | 3 | 4; guard(x % 2 == 0); x }
    let mut b = TreeBuilder::new();
    let branches = ints(&mut b, &[1, 2, 3, 4]);
    let alt = b.alt(branches);
    let def = b.define("x", alt);
    let rem = cmp(&mut b, BinaryOp::Rem, "x", 2);
    let zero = b.int(0);
    let even = b.binary(BinaryOp::Eq, rem, zero);
    let guard = b.guard(even);
    let x = b.load("x");
    let body = b.seq(vec![def, guard, x]);
    let root = b.collect(body, false);
    assert_eq!(run_ok(b, root), Detached::ints([2, 4]));
}

#[test]
fn nested_alternations_enumerate_the_product() {
    // collect { [1 | 2, "a" | "b"] }
    let mut b = TreeBuilder::new();
    let nums = ints(&mut b, &[1, 2]);
    let left = b.alt(nums);
    let a = b.literal("a");
    let bb = b.literal("b");
    let right = b.alt(vec![a, bb]);
    let pair = b.array(vec![left, right]);
    let root = b.collect(pair, false);
    let pair = |n: i64, s: &str| Detached::Array(vec![Detached::Int(n), Detached::str(s)]);
    assert_eq!(
        run_ok(b, root),
        Detached::Array(vec![pair(1, "a"), pair(1, "b"), pair(2, "a"), pair(2, "b")])
    );
}

#[test]
fn backtracking_rolls_the_heap_back() {
    // xs = []; r = collect { xs << (1 | 2); xs.length }; [r, xs.length]
    let mut b = TreeBuilder::new();
    let empty = b.array(Vec::new());
    let def_xs = b.define("xs", empty);
    let xs = b.load("xs");
    let branches = ints(&mut b, &[1, 2]);
    let alt = b.alt(branches);
    let push = b.append(xs, alt);
    let xs = b.load("xs");
    let len = b.member(xs, "length");
    let body = b.seq(vec![push, len]);
    let collected = b.collect(body, false);
    let def_r = b.define("r", collected);
    let r = b.load("r");
    let xs = b.load("xs");
    let len = b.member(xs, "length");
    let result = b.array(vec![r, len]);
    let root = b.seq(vec![def_xs, def_r, result]);
    assert_eq!(
        run_ok(b, root),
        Detached::Array(vec![Detached::ints([1, 1]), Detached::Int(0)])
    );
}

#[test]
fn repeat_is_greedy_up_to_max() {
    let mut b = TreeBuilder::new();
    let seven = b.int(7);
    let root = b.repeat(seven, 0, Some(3));
    assert_eq!(run_ok(b, root), Detached::ints([7, 7, 7]));
}

/// `i = 0; repeat(min, ..) { guard(i < 2); i = i + 1 }`
fn counting_repeat(b: &mut TreeBuilder, min: u32) -> (NodeId, NodeId) {
    let zero = b.int(0);
    let def = b.define("i", zero);
    let cond = cmp(b, BinaryOp::Lt, "i", 2);
    let guard = b.guard(cond);
    let inc = bump(b, "i", 1);
    let body = b.seq(vec![guard, inc]);
    (def, b.repeat(body, min, None))
}

#[test]
fn repeat_stops_when_the_body_fails() {
    let mut b = TreeBuilder::new();
    let (def, rep) = counting_repeat(&mut b, 0);
    let root = b.seq(vec![def, rep]);
    assert_eq!(run_ok(b, root), Detached::ints([1, 2]));
}

#[test]
fn repeat_below_minimum_backtracks() {
    // alt { i = 0; repeat{3,} { .. } } | "fallback"
    let mut b = TreeBuilder::new();
    let (def, rep) = counting_repeat(&mut b, 3);
    let first = b.seq(vec![def, rep]);
    let fallback = b.literal("fallback");
    let root = b.alt(vec![first, fallback]);
    assert_eq!(run_ok(b, root), Detached::str("fallback"));
}

#[test]
fn repeat_with_zero_matches_is_empty() {
    let mut b = TreeBuilder::new();
    let no = b.literal(false);
    let guard = b.guard(no);
    let root = b.repeat(guard, 0, None);
    assert_eq!(run_ok(b, root), Detached::Array(Vec::new()));
}

#[test]
fn backtrack_payload_survives_the_rollback() {
    // alt { backtrack {reason: "oops"} } | backtrack_data
    let mut b = TreeBuilder::new();
    let reason = b.literal("oops");
    let obj = b.object(vec![("reason", reason)], false);
    let fail = b.backtrack(Some(obj));
    let data = b.backtrack_data();
    let root = b.alt(vec![fail, data]);
    assert_eq!(
        run_ok(b, root),
        Detached::Object(vec![("reason".into(), Detached::str("oops"))])
    );
}

#[test]
fn backtrack_control_statement_carries_data() {
    let mut b = TreeBuilder::new();
    let v = b.int(3);
    let fail = b.control(ControlKind::Backtrack, None, Some(v));
    let data = b.backtrack_data();
    let root = b.alt(vec![fail, data]);
    assert_eq!(run_ok(b, root), Detached::Int(3));
}

#[test]
fn backtrack_data_is_consumed_once() {
    let mut b = TreeBuilder::new();
    let v = b.literal("x");
    let fail = b.backtrack(Some(v));
    let first = b.backtrack_data();
    let second = b.backtrack_data();
    let pair = b.array(vec![first, second]);
    let root = b.alt(vec![fail, pair]);
    assert_eq!(
        run_ok(b, root),
        Detached::Array(vec![Detached::str("x"), Detached::Null])
    );
}

#[test]
fn backtrack_without_checkpoint_is_a_fault() {
    let mut b = TreeBuilder::new();
    let no = b.literal(false);
    let root = b.guard(no);
    let err = run_tree(b, root).unwrap_err();
    assert_eq!(err.control_kind(), Some(ControlKind::Backtrack));
}

#[test]
fn collect_keeps_structured_solutions() {
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let arr = b.array(vec![one]);
    let two = b.int(2);
    let obj = b.object(vec![("a", two)], true);
    let alt = b.alt(vec![arr, obj]);
    let root = b.collect(alt, false);
    assert_eq!(
        run_ok(b, root),
        Detached::Array(vec![
            Detached::ints([1]),
            Detached::Object(vec![("a".into(), Detached::Int(2))]),
        ])
    );
}

#[test]
fn exit_out_of_collect_drops_its_checkpoints() {
    // loop { collect { 1 | exit 5 } }
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let five = b.int(5);
    let exit = b.control(ControlKind::Exit, None, Some(five));
    let alt = b.alt(vec![one, exit]);
    let collected = b.collect(alt, false);
    let root = b.loop_(None, collected);
    let (result, engine) = run_with(b, root, RuntimeConfig::for_tests());
    assert_eq!(result.unwrap(), Detached::Int(5));
    assert_eq!(engine.pending_checkpoints(), 0);
    assert_clean(&engine);
}

#[test]
fn nested_collects_are_independent() {
    // collect { x = 1 | 2; collect { x * 10 | x * 100 } }
    let mut b = TreeBuilder::new();
    let branches = ints(&mut b, &[1, 2]);
    let alt = b.alt(branches);
    let def = b.define("x", alt);
    let tens = cmp(&mut b, BinaryOp::Mul, "x", 10);
    let hundreds = cmp(&mut b, BinaryOp::Mul, "x", 100);
    let inner_alt = b.alt(vec![tens, hundreds]);
    let inner = b.collect(inner_alt, false);
    let body = b.seq(vec![def, inner]);
    let root = b.collect(body, false);
    assert_eq!(
        run_ok(b, root),
        Detached::Array(vec![Detached::ints([10, 100]), Detached::ints([20, 200])])
    );
}

#[test]
fn enumeration_is_deterministic() {
    let build = || {
        let mut b = TreeBuilder::new();
        let nums = ints(&mut b, &[3, 1, 2]);
        let left = b.alt(nums);
        let def = b.define("x", left);
        let more = ints(&mut b, &[5, 4]);
        let right = b.alt(more);
        let x = b.load("x");
        let sum = b.binary(BinaryOp::Add, x, right);
        let body = b.seq(vec![def, sum]);
        let root = b.collect(body, false);
        (b, root)
    };
    let (b, root) = build();
    let first = run_ok(b, root);
    for _ in 0..3 {
        let (b, root) = build();
        assert_eq!(run_ok(b, root), first);
    }
    assert_eq!(first, Detached::ints([8, 7, 6, 5, 7, 6]));
}
