use super::*;

#[test]
fn arithmetic_follows_nesting() {
    // 1 + 2 * 3
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let two = b.int(2);
    let three = b.int(3);
    let mul = b.binary(BinaryOp::Mul, two, three);
    let root = b.binary(BinaryOp::Add, one, mul);
    assert_eq!(run_ok(b, root), Detached::Int(7));
}

#[test]
fn define_store_load() {
    // x = 1; x = x + 41; x
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let def = b.define("x", one);
    let store = bump(&mut b, "x", 41);
    let load = b.load("x");
    let root = b.seq(vec![def, store, load]);
    assert_eq!(run_ok(b, root), Detached::Int(42));
}

#[test]
fn store_requires_an_existing_binding() {
    let mut b = TreeBuilder::new();
    let v = b.int(1);
    let root = b.store("nope", v);
    let err = run_tree(b, root).unwrap_err();
    assert!(matches!(err, ExecutionFault::Runtime(_)));
    assert!(err.to_string().contains("undefined variable 'nope'"), "{err}");
}

#[test]
fn runtime_errors_name_the_failing_node() {
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let zero = b.int(0);
    let root = b.binary(BinaryOp::Div, one, zero);
    let err = run_tree(b, root).unwrap_err().to_string();
    assert!(err.contains("division by zero"), "{err}");
    assert!(err.contains("(binary /"), "{err}");
}

#[test]
fn if_without_else_yields_null() {
    let mut b = TreeBuilder::new();
    let c = b.literal(false);
    let t = b.int(1);
    let e = b.int(2);
    let with_else = b.if_(c, t, Some(e));
    let c2 = b.literal(false);
    let t2 = b.int(1);
    let without = b.if_(c2, t2, None);
    let root = b.array(vec![with_else, without]);
    assert_eq!(run_ok(b, root), Detached::Array(vec![Detached::Int(2), Detached::Null]));
}

#[test]
fn logical_operators_short_circuit() {
    // [1 || missing, 0 && missing, 0 || "b", !0]
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let missing = b.load("missing");
    let or = b.binary(BinaryOp::Or, one, missing);
    let zero = b.int(0);
    let missing2 = b.load("missing");
    let and = b.binary(BinaryOp::And, zero, missing2);
    let zero2 = b.int(0);
    let s = b.literal("b");
    let or2 = b.binary(BinaryOp::Or, zero2, s);
    let zero3 = b.int(0);
    let not = b.unary(UnaryOp::Not, zero3);
    let root = b.array(vec![or, and, or2, not]);
    assert_eq!(
        run_ok(b, root),
        Detached::Array(vec![Detached::Int(1), Detached::Int(0), Detached::str("b"), Detached::Bool(true)])
    );
}

#[test]
fn indexing_arrays_objects_and_strings() {
    // xs = [10, 20, 30]; [xs[-1], xs[5], xs.length, "héllo"[1], {a: 1}["a"]]
    let mut b = TreeBuilder::new();
    let items: Vec<NodeId> = [10, 20, 30].iter().map(|i| b.int(*i)).collect();
    let arr = b.array(items);
    let def = b.define("xs", arr);

    let xs = b.load("xs");
    let neg = b.int(-1);
    let last = b.index(xs, neg);
    let xs = b.load("xs");
    let far = b.int(5);
    let out_of_range = b.index(xs, far);
    let xs = b.load("xs");
    let len = b.member(xs, "length");
    let s = b.literal("héllo");
    let one = b.int(1);
    let ch = b.index(s, one);
    let v = b.int(1);
    let obj = b.object(vec![("a", v)], false);
    let key = b.literal("a");
    let by_key = b.index(obj, key);

    let result = b.array(vec![last, out_of_range, len, ch, by_key]);
    let root = b.seq(vec![def, result]);
    assert_eq!(
        run_ok(b, root),
        Detached::Array(vec![
            Detached::Int(30),
            Detached::Null,
            Detached::Int(3),
            Detached::str("é"),
            Detached::Int(1),
        ])
    );
}

#[test]
fn duplicate_object_keys_keep_the_last_value() {
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let two = b.int(2);
    let three = b.int(3);
    let root = b.object(vec![("a", one), ("b", two), ("a", three)], false);
    assert_eq!(
        run_ok(b, root),
        Detached::Object(vec![("a".into(), Detached::Int(3)), ("b".into(), Detached::Int(2))])
    );
}

#[test]
fn set_member_and_append_mutate_in_place() {
    // o = {}; o.k = 5; xs = []; xs << 1 << 2; [o.k, xs]
    let mut b = TreeBuilder::new();
    let obj = b.object(Vec::new(), false);
    let def_o = b.define("o", obj);
    let o = b.load("o");
    let five = b.int(5);
    let set = b.set_member(o, "k", five);
    let arr = b.array(Vec::new());
    let def_xs = b.define("xs", arr);
    let xs = b.load("xs");
    let one = b.int(1);
    let app1 = b.append(xs, one);
    let two = b.int(2);
    let app2 = b.append(app1, two);
    let o = b.load("o");
    let k = b.member(o, "k");
    let xs = b.load("xs");
    let result = b.array(vec![k, xs]);
    let root = b.seq(vec![def_o, set, def_xs, app2, result]);
    assert_eq!(
        run_ok(b, root),
        Detached::Array(vec![Detached::Int(5), Detached::ints([1, 2])])
    );
}

#[test]
fn immutable_objects_reject_writes() {
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let obj = b.object(vec![("a", one)], true);
    let two = b.int(2);
    let root = b.set_member(obj, "a", two);
    let err = run_tree(b, root).unwrap_err().to_string();
    assert!(err.contains("immutable"), "{err}");
}

#[test]
fn closures_receive_arguments() {
    // add = fn(a, b) a + b; add(1, 2)
    let mut b = TreeBuilder::new();
    let x = b.load("a");
    let y = b.load("b");
    let body = b.binary(BinaryOp::Add, x, y);
    let lambda = b.lambda(None, &["a", "b"], body);
    let def = b.define("add", lambda);
    let f = b.load("add");
    let one = b.int(1);
    let two = b.int(2);
    let call = b.call(f, vec![one, two]);
    let root = b.seq(vec![def, call]);
    assert_eq!(run_ok(b, root), Detached::Int(3));
}

#[test]
fn missing_arguments_bind_null_and_extras_are_dropped() {
    // f = fn(a, b) [a, b]; [f(1), f(1, 2, 3)]
    let mut b = TreeBuilder::new();
    let a = b.load("a");
    let bb = b.load("b");
    let body = b.array(vec![a, bb]);
    let lambda = b.lambda(None, &["a", "b"], body);
    let def = b.define("f", lambda);
    let f = b.load("f");
    let one = b.int(1);
    let short = b.call(f, vec![one]);
    let f = b.load("f");
    let args: Vec<NodeId> = (1..=3).map(|i| b.int(i)).collect();
    let long = b.call(f, args);
    let result = b.array(vec![short, long]);
    let root = b.seq(vec![def, result]);
    assert_eq!(
        run_ok(b, root),
        Detached::Array(vec![
            Detached::Array(vec![Detached::Int(1), Detached::Null]),
            Detached::ints([1, 2]),
        ])
    );
}

#[test]
fn closures_capture_their_defining_context() {
    // make = fn(n) fn(x) n + x; add5 = make(5); add5(1)
    let mut b = TreeBuilder::new();
    let n = b.load("n");
    let x = b.load("x");
    let inner_body = b.binary(BinaryOp::Add, n, x);
    let inner = b.lambda(None, &["x"], inner_body);
    let make = b.lambda(None, &["n"], inner);
    let def_make = b.define("make", make);
    let f = b.load("make");
    let five = b.int(5);
    let made = b.call(f, vec![five]);
    let def_add5 = b.define("add5", made);
    let g = b.load("add5");
    let one = b.int(1);
    let call = b.call(g, vec![one]);
    let root = b.seq(vec![def_make, def_add5, call]);
    assert_eq!(run_ok(b, root), Detached::Int(6));
}

/// `sum = fn(n) if n == 0 { 0 } else { n + sum(n - 1) }; sum(depth)`
fn recursive_sum(depth: i64) -> (TreeBuilder, NodeId) {
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
    let def = b.define("sum", lambda);
    let f = b.load("sum");
    let arg = b.int(depth);
    let call = b.call(f, vec![arg]);
    let root = b.seq(vec![def, call]);
    (b, root)
}

#[test]
fn recursion_does_not_use_the_host_stack() {
    let (b, root) = recursive_sum(3000);
    assert_eq!(run_ok(b, root), Detached::Int(3000 * 3001 / 2));
}

#[test]
fn deeply_nested_results_detach_without_host_recursion() {
    const DEPTH: i64 = 50_000;
    // i = 0; x = []; while i < DEPTH { x = [x]; i = i + 1 }; x
    let mut b = TreeBuilder::new();
    let zero = b.int(0);
    let def_i = b.define("i", zero);
    let empty = b.array(Vec::new());
    let def_x = b.define("x", empty);
    let cond = cmp(&mut b, BinaryOp::Lt, "i", DEPTH);
    let x = b.load("x");
    let wrapped = b.array(vec![x]);
    let wrap = b.store("x", wrapped);
    let inc = bump(&mut b, "i", 1);
    let body = b.seq(vec![wrap, inc]);
    let lp = b.while_(None, cond, body);
    let x = b.load("x");
    let root = b.seq(vec![def_i, def_x, lp, x]);

    let result = run_ok(b, root);
    let mut depth = 0;
    let mut cursor = &result;
    while let Detached::Array(items) = cursor {
        depth += 1;
        match items.as_slice() {
            [inner] => cursor = inner,
            [] => break,
            other => panic!("unexpected width {} at depth {depth}", other.len()),
        }
    }
    assert_eq!(depth, DEPTH + 1);
}

#[test]
fn quoted_nodes_run_in_a_child_of_the_caller_context() {
    // base = 7; q = quote { y = base * 2; y }; [q(), y]  -> y is not visible outside
    let mut b = TreeBuilder::new();
    let seven = b.int(7);
    let def_base = b.define("base", seven);
    let load_base = b.load("base");
    let two = b.int(2);
    let doubled = b.binary(BinaryOp::Mul, load_base, two);
    let def_y = b.define("y", doubled);
    let load_y = b.load("y");
    let body = b.seq(vec![def_y, load_y]);
    let quote = b.quote(body);
    let def_q = b.define("q", quote);
    let q = b.load("q");
    let call = b.call(q, Vec::new());
    let root = b.seq(vec![def_base, def_q, call]);
    assert_eq!(run_ok(b, root), Detached::Int(14));

    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let def_y = b.define("y", one);
    let quote = b.quote(def_y);
    let call = b.call(quote, Vec::new());
    let leaked = b.load("y");
    let root = b.seq(vec![call, leaked]);
    let err = run_tree(b, root).unwrap_err().to_string();
    assert!(err.contains("undefined variable 'y'"), "{err}");
}

#[test]
fn calling_a_non_callable_fails() {
    let mut b = TreeBuilder::new();
    let callee = b.int(3);
    let root = b.call(callee, Vec::new());
    let err = run_tree(b, root).unwrap_err().to_string();
    assert!(err.contains("cannot call int"), "{err}");
}

#[test]
fn non_portable_results_detach_as_opaque() {
    let mut b = TreeBuilder::new();
    let body = b.null();
    let root = b.lambda(None, &[], body);
    assert_eq!(run_ok(b, root), Detached::Opaque("closure"));
}
