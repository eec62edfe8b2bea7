//! PEST-based parser for star scripts.
//!
//! Source text goes through [`layout::normalize`] first, then the grammar in
//! `star.pest`, then the builders below turn pairs into [`ast`] nodes.

use std::rc::Rc;

use pest::Parser;
use pest_derive::Parser;

use super::ast::{
    Arg, BinaryOp, Comprehension, Expr, FunctionDef, Literal, Param, ParamKind, Program, Span, Stmt, Target,
    UnaryOp,
};
use super::error::{Error, Result};
use super::layout;

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "star/star.pest"]
struct StarParser;

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

impl From<pest::error::Error<Rule>> for Error {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let (line, col) = match err.line_col {
            pest::error::LineColLocation::Pos((line, col)) => (line, col),
            pest::error::LineColLocation::Span((line, col), _) => (line, col),
        };
        let message = match &err.variant {
            pest::error::ErrorVariant::ParsingError { .. } => "invalid syntax".to_string(),
            pest::error::ErrorVariant::CustomError { message } => message.clone(),
        };
        Error::syntax(
            message,
            Some(Span {
                line: line.saturating_sub(1),
                col: col.saturating_sub(1),
            }),
        )
    }
}

/* ===================== Public API ===================== */

/// Parse a script file into a program.
pub fn parse(name: &str, source: &str) -> Result<Program> {
    let text = layout::normalize(source)?;
    let mut pairs = StarParser::parse(Rule::file, &text)?;
    let file = pairs
        .next()
        .ok_or_else(|| Error::syntax("empty parse result", None))?;

    let mut body = Vec::new();
    for pair in file.into_inner() {
        if pair.as_rule() == Rule::EOI {
            continue;
        }
        body.push(build_stmt(pair)?);
    }

    Ok(Program {
        name: name.to_string(),
        body,
    })
}

/// Parse a single expression (used by tests and the REPL-style helpers).
pub fn parse_expr(source: &str) -> Result<Expr> {
    let program = parse("<expr>", source)?;
    match program.body.into_iter().next() {
        Some(Stmt::Expr(expr)) => Ok(expr),
        _ => Err(Error::syntax("expected an expression", None)),
    }
}

/* ===================== Helpers ===================== */

fn span_of(pair: &Pair) -> Span {
    let (line, col) = pair.as_span().start_pos().line_col();
    Span {
        line: line.saturating_sub(1),
        col: col.saturating_sub(1),
    }
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_and
            | Rule::kw_as
            | Rule::kw_break
            | Rule::kw_continue
            | Rule::kw_def
            | Rule::kw_elif
            | Rule::kw_else
            | Rule::kw_except
            | Rule::kw_for
            | Rule::kw_if
            | Rule::kw_in
            | Rule::kw_lambda
            | Rule::kw_load
            | Rule::kw_not
            | Rule::kw_or
            | Rule::kw_pass
            | Rule::kw_return
            | Rule::kw_try
            | Rule::kw_while
    )
}

/// Inner pairs without keyword tokens.
fn significant<'i>(pair: Pair<'i>) -> impl Iterator<Item = Pair<'i>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn build_error(message: impl Into<String>, pair: &Pair) -> Error {
    Error::syntax(message, Some(span_of(pair)))
}

fn expect_next<'i>(iter: &mut impl Iterator<Item = Pair<'i>>, parent: &Pair, what: &str) -> Result<Pair<'i>> {
    iter.next()
        .ok_or_else(|| build_error(format!("expected {}", what), parent))
}

/* ===================== Statements ===================== */

fn build_suite(pair: Pair) -> Result<Vec<Stmt>> {
    pair.into_inner().map(build_stmt).collect()
}

fn build_stmt(pair: Pair) -> Result<Stmt> {
    let outer = pair.clone();
    match pair.as_rule() {
        Rule::def_stmt => {
            let span = span_of(&pair);
            let mut inner = significant(pair);
            let name = expect_next(&mut inner, &outer, "function name")?.as_str().to_string();
            let mut params = Vec::new();
            let mut body = Vec::new();
            for p in inner {
                if p.as_rule() == Rule::suite {
                    body = build_suite(p)?;
                } else {
                    params.push(build_param(p)?);
                }
            }
            check_params(&params, &outer)?;
            Ok(Stmt::Def(Rc::new(FunctionDef {
                name,
                params,
                body,
                span,
            })))
        }
        Rule::if_stmt => {
            let mut inner = significant(pair);
            let cond = build_expr(expect_next(&mut inner, &outer, "condition")?)?;
            let then = build_suite(expect_next(&mut inner, &outer, "block")?)?;
            let mut elifs = Vec::new();
            let mut otherwise = Vec::new();
            for clause in inner {
                match clause.as_rule() {
                    Rule::elif_clause => {
                        let clause_pair = clause.clone();
                        let mut parts = significant(clause);
                        let c = build_expr(expect_next(&mut parts, &clause_pair, "condition")?)?;
                        let b = build_suite(expect_next(&mut parts, &clause_pair, "block")?)?;
                        elifs.push((c, b));
                    }
                    Rule::else_clause => {
                        let clause_pair = clause.clone();
                        let mut parts = significant(clause);
                        otherwise = build_suite(expect_next(&mut parts, &clause_pair, "block")?)?;
                    }
                    other => return Err(build_error(format!("unexpected {:?} in if", other), &clause)),
                }
            }
            for (c, b) in elifs.into_iter().rev() {
                otherwise = vec![Stmt::If {
                    cond: c,
                    then: b,
                    otherwise,
                }];
            }
            Ok(Stmt::If { cond, then, otherwise })
        }
        Rule::for_stmt => {
            let mut inner = significant(pair);
            let target = build_target_list(expect_next(&mut inner, &outer, "loop variable")?)?;
            let iter = build_expr(expect_next(&mut inner, &outer, "iterable")?)?;
            let body = build_suite(expect_next(&mut inner, &outer, "block")?)?;
            Ok(Stmt::For { target, iter, body })
        }
        Rule::while_stmt => {
            let mut inner = significant(pair);
            let cond = build_expr(expect_next(&mut inner, &outer, "condition")?)?;
            let body = build_suite(expect_next(&mut inner, &outer, "block")?)?;
            Ok(Stmt::While { cond, body })
        }
        Rule::try_stmt => {
            let mut inner = significant(pair);
            let body = build_suite(expect_next(&mut inner, &outer, "block")?)?;
            let except = expect_next(&mut inner, &outer, "except clause")?;
            let mut binding = None;
            let mut handler = Vec::new();
            for p in significant(except) {
                match p.as_rule() {
                    Rule::ident => binding = Some(p.as_str().to_string()),
                    Rule::suite => handler = build_suite(p)?,
                    other => return Err(build_error(format!("unexpected {:?} in except", other), &p)),
                }
            }
            Ok(Stmt::Try {
                body,
                binding,
                handler,
            })
        }
        Rule::return_stmt => {
            let value = significant(pair).next().map(build_expr).transpose()?;
            Ok(Stmt::Return(value))
        }
        Rule::pass_stmt => Ok(Stmt::Pass),
        Rule::break_stmt => Ok(Stmt::Break),
        Rule::continue_stmt => Ok(Stmt::Continue),
        Rule::load_stmt => {
            let span = span_of(&pair);
            let mut inner = significant(pair);
            let module = unquote(&expect_next(&mut inner, &outer, "module name")?)?;
            let mut bindings = Vec::new();
            for binding in inner {
                let parts: Vec<Pair> = binding.into_inner().collect();
                match parts.as_slice() {
                    [name] => {
                        let exported = unquote(name)?;
                        bindings.push((exported.clone(), exported));
                    }
                    [local, name] => bindings.push((local.as_str().to_string(), unquote(name)?)),
                    _ => return Err(build_error("malformed load binding", &outer)),
                }
            }
            if bindings.is_empty() {
                return Err(build_error("load statement needs at least one symbol", &outer));
            }
            Ok(Stmt::Load {
                module,
                bindings,
                span,
            })
        }
        Rule::assign_stmt => {
            let mut inner = pair.into_inner();
            let target = build_target_list(expect_next(&mut inner, &outer, "target")?)?;
            let value = build_expr(expect_next(&mut inner, &outer, "value")?)?;
            Ok(Stmt::Assign { target, value })
        }
        Rule::aug_assign_stmt => {
            let mut inner = pair.into_inner();
            let target = build_target(expect_next(&mut inner, &outer, "target")?)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(build_error("illegal expression for augmented assignment", &outer));
            }
            let op = match expect_next(&mut inner, &outer, "operator")?.as_str() {
                "+=" => BinaryOp::Add,
                "-=" => BinaryOp::Sub,
                "*=" => BinaryOp::Mul,
                "/=" => BinaryOp::Div,
                "//=" => BinaryOp::FloorDiv,
                "%=" => BinaryOp::Mod,
                other => return Err(build_error(format!("unknown operator {}", other), &outer)),
            };
            let value = build_expr(expect_next(&mut inner, &outer, "value")?)?;
            Ok(Stmt::AugAssign { target, op, value })
        }
        Rule::expr_stmt => {
            let mut inner = pair.into_inner();
            Ok(Stmt::Expr(build_expr(expect_next(&mut inner, &outer, "expression")?)?))
        }
        other => Err(build_error(format!("unexpected statement {:?}", other), &outer)),
    }
}

fn build_param(pair: Pair) -> Result<Param> {
    let outer = pair.clone();
    let rule = pair.as_rule();
    let mut inner = pair.into_inner();
    let name = expect_next(&mut inner, &outer, "parameter name")?.as_str().to_string();
    let kind = match rule {
        Rule::plain_param => ParamKind::Normal(None),
        Rule::default_param => {
            let default = build_expr(expect_next(&mut inner, &outer, "default value")?)?;
            ParamKind::Normal(Some(default))
        }
        Rule::args_param => ParamKind::Args,
        Rule::kwargs_param => ParamKind::Kwargs,
        other => return Err(build_error(format!("unexpected parameter {:?}", other), &outer)),
    };
    Ok(Param { name, kind })
}

fn check_params(params: &[Param], pair: &Pair) -> Result<()> {
    let mut seen_default = false;
    let mut seen_star = false;
    for (i, p) in params.iter().enumerate() {
        if params[..i].iter().any(|q| q.name == p.name) {
            return Err(build_error(format!("duplicate parameter: {}", p.name), pair));
        }
        match &p.kind {
            ParamKind::Normal(None) if seen_default && !seen_star => {
                return Err(build_error("non-default parameter follows default parameter", pair))
            }
            ParamKind::Normal(Some(_)) => seen_default = true,
            ParamKind::Args => seen_star = true,
            ParamKind::Kwargs if i + 1 != params.len() => {
                return Err(build_error("**kwargs must be the last parameter", pair))
            }
            _ => {}
        }
    }
    Ok(())
}

/* ===================== Targets ===================== */

fn build_target_list(pair: Pair) -> Result<Target> {
    let mut targets = Vec::new();
    let mut trailing = false;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::trailing_comma => trailing = true,
            _ => targets.push(build_target(p)?),
        }
    }
    if targets.len() == 1 && !trailing {
        Ok(targets.remove(0))
    } else {
        Ok(Target::Tuple(targets))
    }
}

fn build_target(pair: Pair) -> Result<Target> {
    let outer = pair.clone();
    let mut inner = pair.into_inner();
    let expr = build_expr(expect_next(&mut inner, &outer, "target")?)?;
    expr_to_target(expr).map_err(|msg| build_error(msg, &outer))
}

fn expr_to_target(expr: Expr) -> std::result::Result<Target, String> {
    match expr {
        Expr::Name(name, _) => Ok(Target::Name(name)),
        Expr::Index { object, index } => Ok(Target::Index {
            object: *object,
            index: *index,
        }),
        Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
            items.into_iter().map(expr_to_target).collect::<std::result::Result<_, _>>()?,
        )),
        other => Err(format!("cannot assign to {}", describe(&other))),
    }
}

fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::Literal(_) => "literal",
        Expr::Call { .. } => "function call",
        Expr::Attr { .. } => "attribute",
        _ => "expression",
    }
}

/* ===================== Expressions ===================== */

fn fold_binary(pair: Pair) -> Result<Expr> {
    let outer = pair.clone();
    let mut inner = pair.into_inner();
    let mut left = build_expr(expect_next(&mut inner, &outer, "operand")?)?;
    while let Some(op_pair) = inner.next() {
        let op = binary_op(&op_pair)?;
        let right = build_expr(expect_next(&mut inner, &outer, "operand")?)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn binary_op(pair: &Pair) -> Result<BinaryOp> {
    let text = pair.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(match text.as_str() {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "//" => BinaryOp::FloorDiv,
        "%" => BinaryOp::Mod,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "in" => BinaryOp::In,
        "not in" => BinaryOp::NotIn,
        other => return Err(build_error(format!("unknown operator {}", other), pair)),
    })
}

fn build_test_list(pair: Pair) -> Result<Expr> {
    let mut items = Vec::new();
    let mut trailing = false;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::trailing_comma => trailing = true,
            _ => items.push(build_expr(p)?),
        }
    }
    if items.len() == 1 && !trailing {
        Ok(items.remove(0))
    } else {
        Ok(Expr::Tuple(items))
    }
}

fn build_expr(pair: Pair) -> Result<Expr> {
    let outer = pair.clone();
    match pair.as_rule() {
        Rule::test_list => build_test_list(pair),
        Rule::lambda_expr => {
            let span = span_of(&pair);
            let mut params = Vec::new();
            let mut body = None;
            for p in significant(pair) {
                match p.as_rule() {
                    Rule::plain_param | Rule::default_param | Rule::args_param | Rule::kwargs_param => {
                        params.push(build_param(p)?)
                    }
                    _ => body = Some(build_expr(p)?),
                }
            }
            check_params(&params, &outer)?;
            let body = body.ok_or_else(|| build_error("lambda needs a body", &outer))?;
            Ok(Expr::Lambda(Rc::new(FunctionDef {
                name: "lambda".to_string(),
                params,
                body: vec![Stmt::Return(Some(body))],
                span,
            })))
        }
        Rule::cond_expr => {
            let mut inner = significant(pair);
            let then = build_expr(expect_next(&mut inner, &outer, "expression")?)?;
            match inner.next() {
                None => Ok(then),
                Some(cond) => {
                    let cond = build_expr(cond)?;
                    let otherwise = build_expr(expect_next(&mut inner, &outer, "else branch")?)?;
                    Ok(Expr::Cond {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        otherwise: Box::new(otherwise),
                    })
                }
            }
        }
        Rule::or_expr | Rule::and_expr => {
            let is_or = pair.as_rule() == Rule::or_expr;
            let mut inner = significant(pair);
            let mut left = build_expr(expect_next(&mut inner, &outer, "operand")?)?;
            for right in inner {
                let right = build_expr(right)?;
                left = if is_or {
                    Expr::Or(Box::new(left), Box::new(right))
                } else {
                    Expr::And(Box::new(left), Box::new(right))
                };
            }
            Ok(left)
        }
        Rule::not_expr => {
            let mut inner = pair.into_inner();
            let first = expect_next(&mut inner, &outer, "operand")?;
            if first.as_rule() == Rule::not_op {
                let operand = build_expr(expect_next(&mut inner, &outer, "operand")?)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                })
            } else {
                build_expr(first)
            }
        }
        Rule::comparison | Rule::arith | Rule::term => fold_binary(pair),
        Rule::factor => {
            let mut inner = pair.into_inner();
            let first = expect_next(&mut inner, &outer, "operand")?;
            if first.as_rule() == Rule::unary_op {
                let op = if first.as_str() == "-" { UnaryOp::Neg } else { UnaryOp::Pos };
                let operand = build_expr(expect_next(&mut inner, &outer, "operand")?)?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            } else {
                build_expr(first)
            }
        }
        Rule::postfix => build_postfix(pair),
        Rule::ident => Ok(Expr::Name(pair.as_str().to_string(), span_of(&pair))),
        Rule::none_lit => Ok(Expr::Literal(Literal::None)),
        Rule::true_lit => Ok(Expr::Literal(Literal::Bool(true))),
        Rule::false_lit => Ok(Expr::Literal(Literal::Bool(false))),
        Rule::int => {
            let text = pair.as_str();
            let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                i64::from_str_radix(hex, 16)
            } else {
                text.parse::<i64>()
            };
            parsed
                .map(|i| Expr::Literal(Literal::Int(i)))
                .map_err(|_| build_error(format!("integer literal out of range: {}", text), &outer))
        }
        Rule::float => pair
            .as_str()
            .parse::<f64>()
            .map(|f| Expr::Literal(Literal::Float(f)))
            .map_err(|e| build_error(format!("invalid float literal: {}", e), &outer)),
        Rule::string => Ok(Expr::Literal(Literal::String(unquote(&pair)?))),
        Rule::bytes => {
            let text = &pair.as_str()[1..];
            Ok(Expr::Literal(Literal::Bytes(unescape_bytes(strip_quotes(text), &outer)?)))
        }
        Rule::paren_expr => match pair.into_inner().next() {
            None => Ok(Expr::Tuple(Vec::new())),
            Some(list) => build_test_list(list),
        },
        Rule::list_expr => Ok(Expr::List(pair.into_inner().map(build_expr).collect::<Result<_>>()?)),
        Rule::list_comp => {
            let mut inner = pair.into_inner();
            let element = build_expr(expect_next(&mut inner, &outer, "element")?)?;
            let mut clauses = Vec::new();
            for clause in inner {
                let clause_pair = clause.clone();
                let mut parts = significant(clause);
                let target = build_target_list(expect_next(&mut parts, &clause_pair, "loop variable")?)?;
                let iter = build_expr(expect_next(&mut parts, &clause_pair, "iterable")?)?;
                let mut conditions = Vec::new();
                for cond in parts {
                    let cond_pair = cond.clone();
                    let mut c = significant(cond);
                    conditions.push(build_expr(expect_next(&mut c, &cond_pair, "condition")?)?);
                }
                clauses.push(Comprehension {
                    target,
                    iter,
                    conditions,
                });
            }
            Ok(Expr::ListComp {
                element: Box::new(element),
                clauses,
            })
        }
        Rule::dict_expr => {
            let mut entries = Vec::new();
            for entry in pair.into_inner() {
                let entry_pair = entry.clone();
                let mut kv = entry.into_inner();
                let k = build_expr(expect_next(&mut kv, &entry_pair, "key")?)?;
                let v = build_expr(expect_next(&mut kv, &entry_pair, "value")?)?;
                entries.push((k, v));
            }
            Ok(Expr::Dict(entries))
        }
        other => Err(build_error(format!("unexpected expression {:?}", other), &outer)),
    }
}

fn build_postfix(pair: Pair) -> Result<Expr> {
    let outer = pair.clone();
    let mut inner = pair.into_inner();
    let mut expr = build_expr(expect_next(&mut inner, &outer, "operand")?)?;
    for trailer in inner {
        let span = span_of(&trailer);
        expr = match trailer.as_rule() {
            Rule::call => {
                let mut args = Vec::new();
                for arg in trailer.into_inner() {
                    let arg_pair = arg.clone();
                    let rule = arg.as_rule();
                    let mut parts = arg.into_inner();
                    let first = expect_next(&mut parts, &arg_pair, "argument")?;
                    args.push(match rule {
                        Rule::pos_arg => Arg::Positional(build_expr(first)?),
                        Rule::star_arg => Arg::Star(build_expr(first)?),
                        Rule::kwargs_arg => Arg::StarStar(build_expr(first)?),
                        Rule::named_arg => {
                            let value = build_expr(expect_next(&mut parts, &arg_pair, "argument value")?)?;
                            Arg::Named(first.as_str().to_string(), value)
                        }
                        other => return Err(build_error(format!("unexpected argument {:?}", other), &arg_pair)),
                    });
                }
                check_args(&args, &outer)?;
                Expr::Call {
                    callee: Box::new(expr),
                    args,
                    span,
                }
            }
            Rule::index => {
                let trailer_pair = trailer.clone();
                let mut parts = trailer.into_inner();
                let index = build_expr(expect_next(&mut parts, &trailer_pair, "index")?)?;
                Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                }
            }
            Rule::slice => {
                let mut start = None;
                let mut stop = None;
                for bound in trailer.into_inner() {
                    let rule = bound.as_rule();
                    let bound_pair = bound.clone();
                    let mut parts = bound.into_inner();
                    let value = Box::new(build_expr(expect_next(&mut parts, &bound_pair, "slice bound")?)?);
                    if rule == Rule::slice_start {
                        start = Some(value);
                    } else {
                        stop = Some(value);
                    }
                }
                Expr::Slice {
                    object: Box::new(expr),
                    start,
                    stop,
                }
            }
            Rule::attribute => {
                let trailer_pair = trailer.clone();
                let mut parts = trailer.into_inner();
                let name = expect_next(&mut parts, &trailer_pair, "attribute name")?.as_str().to_string();
                Expr::Attr {
                    object: Box::new(expr),
                    name,
                    span,
                }
            }
            other => return Err(build_error(format!("unexpected trailer {:?}", other), &trailer)),
        };
    }
    Ok(expr)
}

fn check_args(args: &[Arg], pair: &Pair) -> Result<()> {
    let mut seen_named = false;
    for arg in args {
        match arg {
            Arg::Positional(_) if seen_named => {
                return Err(build_error("positional argument follows keyword argument", pair))
            }
            Arg::Named(..) | Arg::StarStar(_) => seen_named = true,
            _ => {}
        }
    }
    Ok(())
}

/* ===================== Literals ===================== */

fn strip_quotes(text: &str) -> &str {
    for q in ["\"\"\"", "'''", "\"", "'"] {
        if text.len() >= 2 * q.len() && text.starts_with(q) && text.ends_with(q) {
            return &text[q.len()..text.len() - q.len()];
        }
    }
    text
}

fn unquote(pair: &Pair) -> Result<String> {
    let text = pair.as_str();
    if let Some(raw) = text.strip_prefix('r').or_else(|| text.strip_prefix('R')) {
        return Ok(strip_quotes(raw).to_string());
    }
    let bytes = unescape_bytes(strip_quotes(text), pair)?;
    String::from_utf8(bytes).map_err(|_| build_error("string literal is not valid UTF-8", pair))
}

fn unescape_bytes(body: &str, pair: &Pair) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    let mut buf = [0u8; 4];
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let Some(esc) = chars.next() else {
            return Err(build_error("trailing backslash in string literal", pair));
        };
        match esc {
            'n' => out.push(b'\n'),
            't' => out.push(b'\t'),
            'r' => out.push(b'\r'),
            '0' => out.push(0),
            '\\' => out.push(b'\\'),
            '\'' => out.push(b'\''),
            '"' => out.push(b'"'),
            '\n' => {}
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                let byte = u8::from_str_radix(&hex, 16)
                    .map_err(|_| build_error(format!("invalid escape \\x{}", hex), pair))?;
                out.push(byte);
            }
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                let ch = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| build_error(format!("invalid escape \\u{}", hex), pair))?;
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
            other => {
                out.push(b'\\');
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    Ok(out)
}
