//! Tests for parsing

use crate::star::ast::{Arg, BinaryOp, Expr, Literal, ParamKind, Stmt, Target};
use crate::star::{parse, parse_expr, ErrorKind};

fn int(i: i64) -> Expr {
    Expr::Literal(Literal::Int(i))
}

#[test]
fn test_precedence() {
    let expr = parse_expr("1 + 2 * 3").unwrap();
    match expr {
        Expr::Binary { op: BinaryOp::Add, left, right } => {
            assert_eq!(*left, int(1));
            assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_not_in() {
    let expr = parse_expr("x not in y").unwrap();
    assert!(matches!(expr, Expr::Binary { op: BinaryOp::NotIn, .. }));
}

#[test]
fn test_call_arguments() {
    let expr = parse_expr("f(1, x=2, *a, **kw)").unwrap();
    let Expr::Call { args, .. } = expr else {
        panic!("expected call");
    };
    assert_eq!(args.len(), 4);
    assert_eq!(args[0], Arg::Positional(int(1)));
    assert!(matches!(&args[1], Arg::Named(name, _) if name == "x"));
    assert!(matches!(args[2], Arg::Star(_)));
    assert!(matches!(args[3], Arg::StarStar(_)));
}

#[test]
fn test_def_with_defaults_and_varargs() {
    let program = parse("t.star", "def f(a, b=1, *args, **kwargs):\n    return a\n").unwrap();
    let Stmt::Def(def) = &program.body[0] else {
        panic!("expected def");
    };
    assert_eq!(def.name, "f");
    assert_eq!(def.params.len(), 4);
    assert_eq!(def.params[0].kind, ParamKind::Normal(None));
    assert_eq!(def.params[1].kind, ParamKind::Normal(Some(int(1))));
    assert_eq!(def.params[2].kind, ParamKind::Args);
    assert_eq!(def.params[3].kind, ParamKind::Kwargs);
    assert!(matches!(&def.body[..], [Stmt::Return(Some(Expr::Name(n, _)))] if n == "a"));
}

#[test]
fn test_elif_chain_nests() {
    let src = "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n";
    let program = parse("t.star", src).unwrap();
    let Stmt::If { otherwise, .. } = &program.body[0] else {
        panic!("expected if");
    };
    assert_eq!(otherwise.len(), 1);
    assert!(matches!(&otherwise[0], Stmt::If { otherwise, .. } if otherwise.len() == 1));
}

#[test]
fn test_tuple_assignment_and_load() {
    let src = "load(\"lib.star\", \"plus\", m = \"minus\")\na, b = 1, 2\n";
    let program = parse("t.star", src).unwrap();
    match &program.body[0] {
        Stmt::Load { module, bindings, .. } => {
            assert_eq!(module, "lib.star");
            assert_eq!(
                bindings,
                &vec![("plus".to_string(), "plus".to_string()), ("m".to_string(), "minus".to_string())]
            );
        }
        other => panic!("expected load, got {other:?}"),
    }
    assert!(matches!(&program.body[1], Stmt::Assign { target: Target::Tuple(t), .. } if t.len() == 2));
}

#[test]
fn test_strings() {
    assert_eq!(parse_expr(r#""a\tb""#).unwrap(), Expr::Literal(Literal::String("a\tb".into())));
    assert_eq!(parse_expr(r#"r"a\tb""#).unwrap(), Expr::Literal(Literal::String("a\\tb".into())));
    assert_eq!(parse_expr(r#"b"\x00A""#).unwrap(), Expr::Literal(Literal::Bytes(vec![0, b'A'])));
    assert_eq!(
        parse_expr("\"\"\"two\nlines\"\"\"").unwrap(),
        Expr::Literal(Literal::String("two\nlines".into()))
    );
}

#[test]
fn test_syntax_error_has_position() {
    let err = parse("t.star", "x = 1\ny = (2 +\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert!(err.span().is_some());

    let err = parse("t.star", "x = = 1\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert_eq!(err.span().map(|s| s.line), Some(0));
}

#[test]
fn test_keywords_are_not_identifiers() {
    assert!(parse("t.star", "def = 1\n").is_err());
    assert!(parse("t.star", "definitely = 1\n").is_ok());
}
