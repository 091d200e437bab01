use super::*;

#[test]
fn while_loop_accumulates() {
    // i = 0; s = 0; while i < 5 { s = s + i; i = i + 1 }; s
    let mut b = TreeBuilder::new();
    let zero = b.int(0);
    let def_i = b.define("i", zero);
    let zero = b.int(0);
    let def_s = b.define("s", zero);
    let cond = cmp(&mut b, BinaryOp::Lt, "i", 5);
    let s = b.load("s");
    let i = b.load("i");
    let sum = b.binary(BinaryOp::Add, s, i);
    let store_s = b.store("s", sum);
    let inc = bump(&mut b, "i", 1);
    let body = b.seq(vec![store_s, inc]);
    let looped = b.while_(None, cond, body);
    let result = b.load("s");
    let root = b.seq(vec![def_i, def_s, looped, result]);
    assert_eq!(run_ok(b, root), Detached::Int(10));
}

#[test]
fn exit_leaves_loop_with_payload() {
    // i = 0; loop { i = i + 1; if i == 3 { exit i } }
    let mut b = TreeBuilder::new();
    let zero = b.int(0);
    let def_i = b.define("i", zero);
    let inc = bump(&mut b, "i", 1);
    let cond = cmp(&mut b, BinaryOp::Eq, "i", 3);
    let payload = b.load("i");
    let exit = b.control(ControlKind::Exit, None, Some(payload));
    let check = b.if_(cond, exit, None);
    let body = b.seq(vec![inc, check]);
    let looped = b.loop_(None, body);
    let root = b.seq(vec![def_i, looped]);
    assert_eq!(run_ok(b, root), Detached::Int(3));
}

#[test]
fn next_skips_the_rest_of_the_body() {
    // i = 0; s = 0; while i < 6 { i = i + 1; if i % 2 == 0 { next }; s = s + i }; s
    let mut b = TreeBuilder::new();
    let zero = b.int(0);
    let def_i = b.define("i", zero);
    let zero = b.int(0);
    let def_s = b.define("s", zero);
    let cond = cmp(&mut b, BinaryOp::Lt, "i", 6);
    let inc = bump(&mut b, "i", 1);
    let rem = cmp(&mut b, BinaryOp::Rem, "i", 2);
    let zero = b.int(0);
    let even = b.binary(BinaryOp::Eq, rem, zero);
    let next = b.control(ControlKind::Next, None, None);
    let skip = b.if_(even, next, None);
    let s = b.load("s");
    let i = b.load("i");
    let sum = b.binary(BinaryOp::Add, s, i);
    let store_s = b.store("s", sum);
    let body = b.seq(vec![inc, skip, store_s]);
    let looped = b.while_(None, cond, body);
    let result = b.load("s");
    let root = b.seq(vec![def_i, def_s, looped, result]);
    assert_eq!(run_ok(b, root), Detached::Int(9));
}

#[test]
fn redo_reruns_the_body_without_the_condition() {
    // i = 0; s = 0; redone = false
    // while i < 3 { i = i + 1; if i == 2 && !redone { redone = true; redo }; s = s + i }; s
    let mut b = TreeBuilder::new();
    let zero = b.int(0);
    let def_i = b.define("i", zero);
    let zero = b.int(0);
    let def_s = b.define("s", zero);
    let no = b.literal(false);
    let def_redone = b.define("redone", no);
    let cond = cmp(&mut b, BinaryOp::Lt, "i", 3);
    let inc = bump(&mut b, "i", 1);
    let is_two = cmp(&mut b, BinaryOp::Eq, "i", 2);
    let redone = b.load("redone");
    let not_redone = b.unary(UnaryOp::Not, redone);
    let both = b.binary(BinaryOp::And, is_two, not_redone);
    let yes = b.literal(true);
    let set = b.store("redone", yes);
    let redo = b.control(ControlKind::Redo, None, None);
    let then = b.seq(vec![set, redo]);
    let check = b.if_(both, then, None);
    let s = b.load("s");
    let i = b.load("i");
    let sum = b.binary(BinaryOp::Add, s, i);
    let store_s = b.store("s", sum);
    let body = b.seq(vec![inc, check, store_s]);
    let looped = b.while_(None, cond, body);
    let result = b.load("s");
    let root = b.seq(vec![def_i, def_s, def_redone, looped, result]);
    // i = 1 adds 1, i = 2 redoes into i = 3 which adds 3.
    assert_eq!(run_ok(b, root), Detached::Int(4));
}

#[test]
fn for_each_walks_arrays_and_object_keys() {
    // s = 0; for x in [1, 2, 3] { s = s + x }; k = ""; for key in {a: 1, b: 2} { k = k + key }; [s, k]
    let mut b = TreeBuilder::new();
    let zero = b.int(0);
    let def_s = b.define("s", zero);
    let items: Vec<NodeId> = (1..=3).map(|i| b.int(i)).collect();
    let arr = b.array(items);
    let s = b.load("s");
    let x = b.load("x");
    let sum = b.binary(BinaryOp::Add, s, x);
    let body = b.store("s", sum);
    let over_array = b.for_each(None, "x", arr, body);

    let empty = b.literal("");
    let def_k = b.define("k", empty);
    let one = b.int(1);
    let two = b.int(2);
    let obj = b.object(vec![("a", one), ("b", two)], false);
    let k = b.load("k");
    let key = b.load("key");
    let cat = b.binary(BinaryOp::Add, k, key);
    let body = b.store("k", cat);
    let over_keys = b.for_each(None, "key", obj, body);

    let s = b.load("s");
    let k = b.load("k");
    let result = b.array(vec![s, k]);
    let root = b.seq(vec![def_s, over_array, def_k, over_keys, result]);
    assert_eq!(
        run_ok(b, root),
        Detached::Array(vec![Detached::Int(6), Detached::str("ab")])
    );
}

#[test]
fn for_each_iterates_a_snapshot() {
    // xs = [1, 2]; n = 0; for x in xs { xs << x; n = n + 1 }; [n, xs.length]
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let two = b.int(2);
    let arr = b.array(vec![one, two]);
    let def_xs = b.define("xs", arr);
    let zero = b.int(0);
    let def_n = b.define("n", zero);
    let iterable = b.load("xs");
    let xs = b.load("xs");
    let x = b.load("x");
    let push = b.append(xs, x);
    let inc = bump(&mut b, "n", 1);
    let body = b.seq(vec![push, inc]);
    let looped = b.for_each(None, "x", iterable, body);
    let n = b.load("n");
    let xs = b.load("xs");
    let len = b.member(xs, "length");
    let result = b.array(vec![n, len]);
    let root = b.seq(vec![def_xs, def_n, looped, result]);
    assert_eq!(run_ok(b, root), Detached::ints([2, 4]));
}

#[test]
fn restart_rewinds_the_iterator() {
    // s = 0; restarted = false
    // for x in [1, 2, 3] { if x == 2 && !restarted { restarted = true; restart }; s = s + x }; s
    let mut b = TreeBuilder::new();
    let zero = b.int(0);
    let def_s = b.define("s", zero);
    let no = b.literal(false);
    let def_flag = b.define("restarted", no);
    let items: Vec<NodeId> = (1..=3).map(|i| b.int(i)).collect();
    let arr = b.array(items);
    let is_two = cmp(&mut b, BinaryOp::Eq, "x", 2);
    let flag = b.load("restarted");
    let not_flag = b.unary(UnaryOp::Not, flag);
    let both = b.binary(BinaryOp::And, is_two, not_flag);
    let yes = b.literal(true);
    let set = b.store("restarted", yes);
    let restart = b.control(ControlKind::Restart, None, None);
    let then = b.seq(vec![set, restart]);
    let check = b.if_(both, then, None);
    let s = b.load("s");
    let x = b.load("x");
    let sum = b.binary(BinaryOp::Add, s, x);
    let store_s = b.store("s", sum);
    let body = b.seq(vec![check, store_s]);
    let looped = b.for_each(None, "x", arr, body);
    let result = b.load("s");
    let root = b.seq(vec![def_s, def_flag, looped, result]);
    // 1, restart, 1, 2, 3
    assert_eq!(run_ok(b, root), Detached::Int(7));
}

#[test]
fn tagged_exit_crosses_inner_loops() {
    // for:outer a in [1, 2] { for:inner c in [10, 20] { if c == 20 { exit:outer a + c } } }
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let two = b.int(2);
    let outer_items = b.array(vec![one, two]);
    let ten = b.int(10);
    let twenty = b.int(20);
    let inner_items = b.array(vec![ten, twenty]);
    let cond = cmp(&mut b, BinaryOp::Eq, "c", 20);
    let a = b.load("a");
    let c = b.load("c");
    let sum = b.binary(BinaryOp::Add, a, c);
    let exit = b.control(ControlKind::Exit, Some("outer"), Some(sum));
    let check = b.if_(cond, exit, None);
    let inner = b.for_each(Some("inner"), "c", inner_items, check);
    let root = b.for_each(Some("outer"), "a", outer_items, inner);
    assert_eq!(run_ok(b, root), Detached::Int(21));
}

#[test]
fn tagged_block_catches_matching_exit() {
    // block:b { exit:b 5; 99 }
    let mut b = TreeBuilder::new();
    let five = b.int(5);
    let exit = b.control(ControlKind::Exit, Some("b"), Some(five));
    let unreached = b.int(99);
    let body = b.seq(vec![exit, unreached]);
    let root = b.block(Some("b"), body);
    assert_eq!(run_ok(b, root), Detached::Int(5));
}

#[test]
fn block_ignores_untagged_exit() {
    let mut b = TreeBuilder::new();
    let exit = b.control(ControlKind::Exit, None, None);
    let root = b.block(Some("b"), exit);
    let err = run_tree(b, root).unwrap_err();
    assert_eq!(err.control_kind(), Some(ControlKind::Exit));
}

#[test]
fn block_value_is_its_body_value() {
    let mut b = TreeBuilder::new();
    let v = b.int(8);
    let root = b.block(None, v);
    assert_eq!(run_ok(b, root), Detached::Int(8));
}

#[test]
fn return_ends_the_call() {
    // f = fn(x) { if x > 0 { return 1 }; 2 }; [f(5), f(-1)]
    let mut b = TreeBuilder::new();
    let positive = cmp(&mut b, BinaryOp::Gt, "x", 0);
    let one = b.int(1);
    let ret = b.control(ControlKind::Return, None, Some(one));
    let check = b.if_(positive, ret, None);
    let two = b.int(2);
    let body = b.seq(vec![check, two]);
    let lambda = b.lambda(None, &["x"], body);
    let def = b.define("f", lambda);
    let f = b.load("f");
    let five = b.int(5);
    let first = b.call(f, vec![five]);
    let f = b.load("f");
    let minus = b.int(-1);
    let second = b.call(f, vec![minus]);
    let result = b.array(vec![first, second]);
    let root = b.seq(vec![def, result]);
    assert_eq!(run_ok(b, root), Detached::ints([1, 2]));
}

#[test]
fn return_leaves_loops_inside_the_callee() {
    // (fn() { loop { return 42 } })()
    let mut b = TreeBuilder::new();
    let v = b.int(42);
    let ret = b.control(ControlKind::Return, None, Some(v));
    let looped = b.loop_(None, ret);
    let lambda = b.lambda(None, &[], looped);
    let root = b.call(lambda, Vec::new());
    assert_eq!(run_ok(b, root), Detached::Int(42));
}

#[test]
fn tagged_return_targets_the_named_function() {
    // outer = fn:outer() { (fn:inner() { return:outer 7 })(); 99 }; outer()
    let mut b = TreeBuilder::new();
    let seven = b.int(7);
    let ret = b.control(ControlKind::Return, Some("outer"), Some(seven));
    let inner = b.lambda(Some("inner"), &[], ret);
    let call_inner = b.call(inner, Vec::new());
    let unreached = b.int(99);
    let body = b.seq(vec![call_inner, unreached]);
    let outer = b.lambda(Some("outer"), &[], body);
    let root = b.call(outer, Vec::new());
    assert_eq!(run_ok(b, root), Detached::Int(7));
}

#[test]
fn exit_unwinds_a_call_to_reach_an_enclosing_loop() {
    // loop { (fn() { exit 5 })() }
    let mut b = TreeBuilder::new();
    let five = b.int(5);
    let exit = b.control(ControlKind::Exit, None, Some(five));
    let lambda = b.lambda(None, &[], exit);
    let call = b.call(lambda, Vec::new());
    let root = b.loop_(None, call);
    assert_eq!(run_ok(b, root), Detached::Int(5));
}

#[test]
fn recursive_activations_keep_their_own_loops() {
    // f = fn(n) { for x in [n] { if n > 0 { f(n - 1) }; exit n } }; f(3)
    let mut b = TreeBuilder::new();
    let n = b.load("n");
    let items = b.array(vec![n]);
    let positive = cmp(&mut b, BinaryOp::Gt, "n", 0);
    let f = b.load("f");
    let dec = cmp(&mut b, BinaryOp::Sub, "n", 1);
    let rec = b.call(f, vec![dec]);
    let check = b.if_(positive, rec, None);
    let n = b.load("n");
    let exit = b.control(ControlKind::Exit, None, Some(n));
    let body = b.seq(vec![check, exit]);
    let looped = b.for_each(None, "x", items, body);
    let lambda = b.lambda(Some("f"), &["n"], looped);
    let def = b.define("f", lambda);
    let f = b.load("f");
    let three = b.int(3);
    let call = b.call(f, vec![three]);
    let root = b.seq(vec![def, call]);
    assert_eq!(run_ok(b, root), Detached::Int(3));
}

#[test]
fn unhandled_return_is_a_fault() {
    let mut b = TreeBuilder::new();
    let v = b.int(1);
    let ret = b.control(ControlKind::Return, None, Some(v));
    let two = b.int(2);
    let root = b.seq(vec![ret, two]);
    let err = run_tree(b, root).unwrap_err();
    match &err {
        ExecutionFault::UnhandledControl { kind, tag, source, .. } => {
            assert_eq!(*kind, ControlKind::Return);
            assert!(tag.is_none());
            assert!(source.contains("control return"), "{source}");
        }
        other => panic!("unexpected fault {other}"),
    }
    assert!(err.to_string().starts_with("unhandled control signal `return`"), "{err}");
}

#[test]
fn mismatched_loop_tag_escapes() {
    // loop:a { next:b }
    let mut b = TreeBuilder::new();
    let next = b.control(ControlKind::Next, Some("b"), None);
    let root = b.loop_(Some("a"), next);
    let err = run_tree(b, root).unwrap_err();
    match err {
        ExecutionFault::UnhandledControl { kind, tag, .. } => {
            assert_eq!(kind, ControlKind::Next);
            assert_eq!(tag.as_deref(), Some("b"));
        }
        other => panic!("unexpected fault {other}"),
    }
}
