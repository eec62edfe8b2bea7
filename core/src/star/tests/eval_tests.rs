//! Tests for evaluation

use maplit::btreemap;

use super::helpers::{call, eval, eval_err, exec, exec_with_files};
use crate::star::thread::MAX_CALL_DEPTH;
use crate::star::{ErrorKind, Value};

#[test]
fn test_arithmetic() {
    assert_eq!(eval("2 + 3"), Value::Int(5));
    assert_eq!(eval("7 // 2"), Value::Int(3));
    assert_eq!(eval("-7 // 2"), Value::Int(-4));
    assert_eq!(eval("-7 % 3"), Value::Int(2));
    assert_eq!(eval("7 / 2"), Value::Float(3.5));
    assert_eq!(eval("1 + 0.5"), Value::Float(1.5));
    assert_eq!(eval("\"ab\" * 2"), Value::from("abab"));
}

#[test]
fn test_arithmetic_errors() {
    assert_eq!(eval_err("1 // 0").kind(), ErrorKind::ZeroDivision);
    assert_eq!(eval_err("9223372036854775807 + 1").kind(), ErrorKind::Overflow);
    assert_eq!(eval_err("1 + \"a\"").kind(), ErrorKind::Type);
}

#[test]
fn test_repr_of_tuple() {
    assert_eq!(eval("repr((\"foo\", 100))"), Value::from("(\"foo\", 100)"));
    assert_eq!(eval("repr((1,))"), Value::from("(1,)"));
    assert_eq!(eval("str([1, \"a\", None, True])"), Value::from("[1, \"a\", None, True]"));
}

#[test]
fn test_functions_and_defaults() {
    let src = r#"
def plus(a, b = 10):
    return a + b
"#;
    assert_eq!(call(src, "plus", vec![Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
    assert_eq!(call(src, "plus", vec![Value::Int(2)]).unwrap(), Value::Int(12));

    let err = call(src, "plus", vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(err.message().contains("missing argument"));
}

#[test]
fn test_varargs_and_kwargs() {
    let src = r#"
def f(a, *rest, **opts):
    return (a, rest, sorted(opts.keys()))

result = f(1, 2, 3, y = 1, x = 2)
"#;
    let module = exec(src).unwrap();
    assert_eq!(
        module.get("result").unwrap().repr(),
        "(1, (2, 3), [\"x\", \"y\"])"
    );
}

#[test]
fn test_unexpected_keyword() {
    let src = r#"
def f(a):
    return a

result = f(1, foo = "bar")
"#;
    let err = exec(src).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(err.message().contains("unexpected keyword argument 'foo'"));
}

#[test]
fn test_closures_and_lambda() {
    let src = r#"
def adder(n):
    def add(x):
        return x + n
    return add

inc = adder(1)
double = lambda x: x * 2
result = [double(inc(i)) for i in range(3) if i != 1]
"#;
    let module = exec(src).unwrap();
    assert_eq!(module.get("result").unwrap().repr(), "[2, 6]");
}

#[test]
fn test_control_flow() {
    let src = r#"
def collatz(n):
    steps = 0
    while n != 1:
        if n % 2 == 0:
            n = n // 2
        else:
            n = 3 * n + 1
        steps += 1
    return steps

def first_even(xs):
    for x in xs:
        if x % 2 == 1:
            continue
        return x
    return None
"#;
    assert_eq!(call(src, "collatz", vec![Value::Int(6)]).unwrap(), Value::Int(8));
    let xs = Value::list(vec![Value::Int(1), Value::Int(3), Value::Int(4)]);
    assert_eq!(call(src, "first_even", vec![xs]).unwrap(), Value::Int(4));
}

#[test]
fn test_containers() {
    let src = r#"
d = {"a": 1}
d["b"] = 2
d.update(c = 3)
items = d.items()
xs = [3, 1, 2]
xs.append(0)
xs += [9]
first, last = xs[0], xs[-1]
"#;
    let module = exec(src).unwrap();
    assert_eq!(module.get("items").unwrap().repr(), "[(\"a\", 1), (\"b\", 2), (\"c\", 3)]");
    assert_eq!(module.get("xs").unwrap().repr(), "[3, 1, 2, 0, 9]");
    assert_eq!(module.get("first"), Some(&Value::Int(3)));
    assert_eq!(module.get("last"), Some(&Value::Int(9)));
}

#[test]
fn test_string_methods_and_format() {
    assert_eq!(eval("\"a,b\".split(\",\")").repr(), "[\"a\", \"b\"]");
    assert_eq!(eval("\"-\".join([\"x\", \"y\"])"), Value::from("x-y"));
    assert_eq!(eval("\"{} is {n}\".format(1, n = \"one\")"), Value::from("1 is one"));
    assert_eq!(eval("\"%s=%d\" % (\"x\", 3)"), Value::from("x=3"));
    assert_eq!(eval("\"ell\" in \"hello\""), Value::Bool(true));
}

#[test]
fn test_slices_and_indexing() {
    assert_eq!(eval("[1, 2, 3, 4][1:3]").repr(), "[2, 3]");
    assert_eq!(eval("\"hello\"[-3:]"), Value::from("llo"));
    assert_eq!(eval_err("[1][5]").kind(), ErrorKind::Index);
    assert_eq!(eval_err("{}[\"k\"]").kind(), ErrorKind::Key);
}

#[test]
fn test_try_except_binds_error() {
    let src = r#"
def safe_div(a, b):
    try:
        return a // b
    except as err:
        return err.reason

def reraise():
    try:
        fail("boom")
    except as err:
        fail(err)
"#;
    assert_eq!(
        call(src, "safe_div", vec![Value::Int(1), Value::Int(0)]).unwrap(),
        Value::from("ZeroDivisionError")
    );
    let err = call(src, "reraise", vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fail);
    assert_eq!(err.message(), "boom");
}

#[test]
fn test_undefined_name_has_span() {
    let err = exec("x = 1\ny = nope\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Name);
    assert_eq!(err.span().map(|s| s.line), Some(1));
}

#[test]
fn test_recursion_limit() {
    let src = "def f(n):\n    return f(n + 1)\n";
    let err = call(src, "f", vec![Value::Int(0)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Recursion);
}

#[test]
fn test_recursion_up_to_the_limit() {
    // f(n) nests n + 1 calls.
    let src = "def f(n):\n    if n == 0:\n        return 0\n    return 1 + f(n - 1)\n";
    let under = (MAX_CALL_DEPTH - 1) as i64;
    assert_eq!(call(src, "f", vec![Value::Int(under)]).unwrap(), Value::Int(under));

    let err = call(src, "f", vec![Value::Int(under + 1)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Recursion);
}

#[test]
fn test_deep_recursion_on_a_small_stack() {
    let src = "def f(n):\n    if n == 0:\n        return 0\n    return 1 + f(n - 1)\n";
    let under = (MAX_CALL_DEPTH - 1) as i64;
    std::thread::Builder::new()
        .stack_size(512 * 1024)
        .spawn(move || {
            let result = call(src, "f", vec![Value::Int(under)]);
            assert_eq!(result.unwrap(), Value::Int(under));
        })
        .unwrap()
        .join()
        .unwrap();
}

#[test]
fn test_load_between_files() {
    let files = btreemap! {
        "lib/math.star".to_string() => "def plus(a, b):\n    return a + b\n_hidden = 1\n".to_string(),
    };
    let module = exec_with_files("load(\"lib/math.star\", \"plus\")\nresult = plus(2, 3)\n", files.clone()).unwrap();
    assert_eq!(module.get("result"), Some(&Value::Int(5)));

    let err = exec_with_files("load(\"lib/math.star\", \"_hidden\")\n", files.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Attribute);

    let err = exec_with_files("load(\"missing.star\", \"x\")\n", files).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
}

#[test]
fn test_load_cycle_is_detected() {
    let files = btreemap! {
        "/a.star".to_string() => "load(\"b.star\", \"y\")\nx = 1\n".to_string(),
        "/b.star".to_string() => "load(\"a.star\", \"x\")\ny = 1\n".to_string(),
    };
    let err = exec_with_files("load(\"a.star\", \"x\")\n", files).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
    assert!(err.message().contains("cycle"));
}
