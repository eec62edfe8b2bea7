//! Tree-walking evaluator.
//!
//! Evaluation is async so builtins can suspend on host futures (engine calls
//! inside a workflow). Recursion goes through boxed local futures; nothing
//! here is `Send`. Polling nested futures recurses on the native stack, so
//! the recursive entry points poll through [`Grow`], which moves onto a new
//! stack segment when the current one runs low.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;
use indexmap::IndexMap;

use super::ast::{Arg, BinaryOp, Comprehension, Expr, FunctionDef, Literal, ParamKind, Program, Stmt, Target, UnaryOp};
use super::error::{Error, ErrorKind, Result};
use super::thread::{exported_symbol, Module, Predeclared, Thread};
use super::universe;
use super::value::{Args, NativeFn, Value};

/* ===================== Stack ===================== */

/// Stack that must remain before polling one more level in place.
const STACK_RED_ZONE: usize = 256 * 1024;

/// Size of each additional stack segment.
const STACK_SEGMENT: usize = 4 * 1024 * 1024;

struct Grow<'a, T>(LocalBoxFuture<'a, T>);

impl<T> Future for Grow<'_, T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let inner = &mut self.0;
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || inner.as_mut().poll(cx))
    }
}

fn grow<'a, T: 'a>(future: impl Future<Output = T> + 'a) -> LocalBoxFuture<'a, T> {
    Box::pin(Grow(Box::pin(future)))
}

/* ===================== Environments ===================== */

/// Mutable globals of a module while it executes.
pub(crate) struct ModuleEnv {
    name: String,
    globals: RefCell<IndexMap<String, Value>>,
    predeclared: Rc<Predeclared>,
}

/// A function activation's local variables.
pub(crate) struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    fn child(parent: Option<Rc<Scope>>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent,
        })
    }
}

struct Env {
    module: Rc<ModuleEnv>,
    scope: Option<Rc<Scope>>,
}

impl Env {
    fn lookup(&self, name: &str) -> Result<Value> {
        let mut scope = self.scope.clone();
        while let Some(s) = scope {
            if let Some(v) = s.vars.borrow().get(name) {
                return Ok(v.clone());
            }
            scope = s.parent.clone();
        }
        if let Some(v) = self.module.globals.borrow().get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.module.predeclared.get(name) {
            return Ok(v.clone());
        }
        universe::lookup(name).ok_or_else(|| Error::name(name))
    }

    fn set(&self, name: &str, value: Value) {
        match &self.scope {
            Some(scope) => {
                scope.vars.borrow_mut().insert(name.to_string(), value);
            }
            None => {
                self.module.globals.borrow_mut().insert(name.to_string(), value);
            }
        }
    }
}

/* ===================== Functions ===================== */

/// A function defined in script code.
pub struct Function {
    def: Rc<FunctionDef>,
    defaults: Vec<Option<Value>>,
    module: Rc<ModuleEnv>,
    closure: Option<Rc<Scope>>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.def.name
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {} in {}>", self.def.name, self.module.name)
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/* ===================== Entry points ===================== */

/// Execute a parsed program and return its frozen globals.
pub async fn exec_program(thread: &Thread, program: &Program, predeclared: Rc<Predeclared>) -> Result<Rc<Module>> {
    let module = Rc::new(ModuleEnv {
        name: program.name.clone(),
        globals: RefCell::new(IndexMap::new()),
        predeclared,
    });
    let env = Env {
        module: module.clone(),
        scope: None,
    };
    match exec_block(thread, &env, &program.body).await? {
        Flow::Normal => {}
        Flow::Return(_) => return Err(Error::syntax("return outside function", None)),
        Flow::Break | Flow::Continue => return Err(Error::syntax("break or continue outside loop", None)),
    }
    let globals = module.globals.borrow().clone();
    Ok(Rc::new(Module::new(program.name.clone(), globals)))
}

/// Call any callable value.
pub fn call<'a>(thread: &'a Thread, callee: Value, args: Args) -> LocalBoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        match callee {
            Value::Function(f) => call_function(thread, f, args).await,
            Value::Builtin(b) => {
                let result = match b.func {
                    NativeFn::Sync(f) => f(thread, &b, args),
                    NativeFn::Async(f) => f(thread, &b, args).await,
                };
                result.map_err(|e| e.in_function(b.name))
            }
            other => Err(Error::type_error(format!(
                "invalid call of non-function ({})",
                other.type_name()
            ))),
        }
    })
}

async fn call_function(thread: &Thread, f: Rc<Function>, args: Args) -> Result<Value> {
    let scope = Scope::child(f.closure.clone());
    bind_params(&f, args, &scope)?;
    let env = Env {
        module: f.module.clone(),
        scope: Some(scope),
    };
    thread.enter()?;
    let def = f.def.clone();
    let flow = exec_block(thread, &env, &def.body).await;
    thread.exit();
    match flow.map_err(|e| e.in_function(&def.name))? {
        Flow::Return(v) => Ok(v),
        Flow::Normal => Ok(Value::None),
        Flow::Break | Flow::Continue => Err(Error::syntax("break or continue outside loop", Some(def.span))),
    }
}

fn bind_params(f: &Function, args: Args, scope: &Scope) -> Result<()> {
    let def = &f.def;
    let mut vars = scope.vars.borrow_mut();
    let mut positional = args.positional.into_iter();
    let mut extra_positional = Vec::new();
    let mut kwargs: IndexMap<super::value::Key, Value> = IndexMap::new();
    let mut has_star = false;
    let mut kwargs_name = None;

    for param in &def.params {
        match &param.kind {
            ParamKind::Normal(_) if !has_star => {
                if let Some(v) = positional.next() {
                    vars.insert(param.name.clone(), v);
                }
            }
            ParamKind::Normal(_) => {}
            ParamKind::Args => has_star = true,
            ParamKind::Kwargs => kwargs_name = Some(param.name.clone()),
        }
    }
    extra_positional.extend(positional);
    if !extra_positional.is_empty() && !has_star {
        return Err(Error::type_error(format!(
            "{}: got {} extra positional arguments",
            def.name,
            extra_positional.len()
        )));
    }

    for (name, value) in args.named {
        let is_param = def
            .params
            .iter()
            .any(|p| p.name == name && matches!(p.kind, ParamKind::Normal(_)));
        if is_param {
            if vars.contains_key(&name) {
                return Err(Error::type_error(format!(
                    "{}: got multiple values for parameter '{}'",
                    def.name, name
                )));
            }
            vars.insert(name, value);
        } else if kwargs_name.is_some() {
            kwargs.insert(super::value::Key::String(name), value);
        } else {
            return Err(Error::type_error(format!(
                "{}: unexpected keyword argument '{}'",
                def.name, name
            )));
        }
    }

    for (param, default) in def.params.iter().zip(f.defaults.iter()) {
        match &param.kind {
            ParamKind::Normal(_) if !vars.contains_key(&param.name) => match default {
                Some(v) => {
                    vars.insert(param.name.clone(), v.clone());
                }
                None => {
                    return Err(Error::type_error(format!(
                        "{}: missing argument for {}",
                        def.name, param.name
                    )))
                }
            },
            ParamKind::Args => {
                vars.insert(param.name.clone(), Value::tuple(std::mem::take(&mut extra_positional)));
            }
            ParamKind::Kwargs => {
                vars.insert(param.name.clone(), Value::dict(std::mem::take(&mut kwargs)));
            }
            _ => {}
        }
    }
    Ok(())
}

fn make_function<'a>(thread: &'a Thread, env: &'a Env, def: &'a Rc<FunctionDef>) -> LocalBoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let mut defaults = Vec::with_capacity(def.params.len());
        for p in &def.params {
            defaults.push(match &p.kind {
                ParamKind::Normal(Some(expr)) => Some(eval(thread, env, expr).await?),
                _ => None,
            });
        }
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            module: env.module.clone(),
            closure: env.scope.clone(),
        })))
    })
}

/* ===================== Statements ===================== */

fn exec_block<'a>(thread: &'a Thread, env: &'a Env, stmts: &'a [Stmt]) -> LocalBoxFuture<'a, Result<Flow>> {
    grow(async move {
        for stmt in stmts {
            match exec_stmt(thread, env, stmt).await? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    })
}

async fn exec_stmt(thread: &Thread, env: &Env, stmt: &Stmt) -> Result<Flow> {
    match stmt {
        Stmt::Def(def) => {
            let f = make_function(thread, env, def).await?;
            env.set(&def.name, f);
            Ok(Flow::Normal)
        }
        Stmt::If { cond, then, otherwise } => {
            if eval(thread, env, cond).await?.truth() {
                exec_block(thread, env, then).await
            } else {
                exec_block(thread, env, otherwise).await
            }
        }
        Stmt::For { target, iter, body } => {
            let items = eval(thread, env, iter).await?.iterate()?;
            for item in items {
                assign(thread, env, target, item).await?;
                match exec_block(thread, env, body).await? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            }
            Ok(Flow::Normal)
        }
        Stmt::While { cond, body } => {
            while eval(thread, env, cond).await?.truth() {
                match exec_block(thread, env, body).await? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            }
            Ok(Flow::Normal)
        }
        Stmt::Try { body, binding, handler } => match exec_block(thread, env, body).await {
            Ok(flow) => Ok(flow),
            Err(err) if err.kind() == ErrorKind::Syntax || err.kind() == ErrorKind::Recursion => Err(err),
            Err(err) => {
                if let Some(name) = binding {
                    env.set(name, Value::object(universe::ErrorValue::new(err)));
                }
                exec_block(thread, env, handler).await
            }
        },
        Stmt::Return(value) => {
            let v = match value {
                Some(expr) => eval(thread, env, expr).await?,
                None => Value::None,
            };
            Ok(Flow::Return(v))
        }
        Stmt::Pass => Ok(Flow::Normal),
        Stmt::Break => Ok(Flow::Break),
        Stmt::Continue => Ok(Flow::Continue),
        Stmt::Load { module, bindings, span } => {
            let loaded = thread.load(module).await.map_err(|e| e.with_span(*span))?;
            for (local, exported) in bindings {
                let value = exported_symbol(&loaded, exported).map_err(|e| e.with_span(*span))?;
                env.set(local, value);
            }
            Ok(Flow::Normal)
        }
        Stmt::Assign { target, value } => {
            let v = eval(thread, env, value).await?;
            assign(thread, env, target, v).await?;
            Ok(Flow::Normal)
        }
        Stmt::AugAssign { target, op, value } => {
            match target {
                Target::Name(name) => {
                    let current = env.lookup(name)?;
                    let rhs = eval(thread, env, value).await?;
                    let result = augmented(*op, current, rhs)?;
                    env.set(name, result);
                }
                Target::Index { object, index } => {
                    let obj = eval(thread, env, object).await?;
                    let idx = eval(thread, env, index).await?;
                    let current = get_index(&obj, &idx)?;
                    let rhs = eval(thread, env, value).await?;
                    let result = augmented(*op, current, rhs)?;
                    set_index(&obj, idx, result)?;
                }
                Target::Tuple(_) => {
                    return Err(Error::syntax("illegal expression for augmented assignment", None))
                }
            }
            Ok(Flow::Normal)
        }
        Stmt::Expr(expr) => {
            eval(thread, env, expr).await?;
            Ok(Flow::Normal)
        }
    }
}

/// `x += y` extends lists in place; every other case rebinds.
fn augmented(op: BinaryOp, current: Value, rhs: Value) -> Result<Value> {
    if let (BinaryOp::Add, Value::List(list)) = (op, &current) {
        let extra = rhs.iterate()?;
        list.borrow_mut().extend(extra);
        return Ok(current);
    }
    binary(op, &current, &rhs)
}

fn assign<'a>(thread: &'a Thread, env: &'a Env, target: &'a Target, value: Value) -> LocalBoxFuture<'a, Result<()>> {
    Box::pin(async move {
        match target {
            Target::Name(name) => {
                env.set(name, value);
                Ok(())
            }
            Target::Index { object, index } => {
                let obj = eval(thread, env, object).await?;
                let idx = eval(thread, env, index).await?;
                set_index(&obj, idx, value)
            }
            Target::Tuple(targets) => {
                let items = value.iterate()?;
                if items.len() != targets.len() {
                    return Err(Error::value(format!(
                        "too {} values to unpack (got {}, want {})",
                        if items.len() > targets.len() { "many" } else { "few" },
                        items.len(),
                        targets.len()
                    )));
                }
                for (t, v) in targets.iter().zip(items) {
                    assign(thread, env, t, v).await?;
                }
                Ok(())
            }
        }
    })
}

/* ===================== Expressions ===================== */

fn eval<'a>(thread: &'a Thread, env: &'a Env, expr: &'a Expr) -> LocalBoxFuture<'a, Result<Value>> {
    grow(async move {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Bytes(b) => Value::Bytes(b.clone()),
            }),
            Expr::Name(name, span) => env.lookup(name).map_err(|e| e.with_span(*span)),
            Expr::List(items) => Ok(Value::list(eval_all(thread, env, items).await?)),
            Expr::Tuple(items) => Ok(Value::tuple(eval_all(thread, env, items).await?)),
            Expr::Dict(entries) => {
                let mut map = IndexMap::new();
                for (k, v) in entries {
                    let key = eval(thread, env, k).await?.to_key()?;
                    let value = eval(thread, env, v).await?;
                    map.insert(key, value);
                }
                Ok(Value::dict(map))
            }
            Expr::ListComp { element, clauses } => {
                let inner = Env {
                    module: env.module.clone(),
                    scope: Some(Scope::child(env.scope.clone())),
                };
                let mut out = Vec::new();
                comprehension(thread, &inner, clauses, element, &mut out).await?;
                Ok(Value::list(out))
            }
            Expr::Attr { object, name, span } => {
                let obj = eval(thread, env, object).await?;
                get_attr(&obj, name).map_err(|e| e.with_span(*span))
            }
            Expr::Index { object, index } => {
                let obj = eval(thread, env, object).await?;
                let idx = eval(thread, env, index).await?;
                get_index(&obj, &idx)
            }
            Expr::Slice { object, start, stop } => {
                let obj = eval(thread, env, object).await?;
                let start = match start {
                    Some(e) => Some(eval(thread, env, e).await?),
                    None => None,
                };
                let stop = match stop {
                    Some(e) => Some(eval(thread, env, e).await?),
                    None => None,
                };
                slice(&obj, start, stop)
            }
            Expr::Call { callee, args, span } => {
                let f = eval(thread, env, callee).await?;
                let args = eval_args(thread, env, args).await?;
                call(thread, f, args).await.map_err(|e| e.with_span(*span))
            }
            Expr::Unary { op, operand } => {
                let v = eval(thread, env, operand).await?;
                unary(*op, v)
            }
            Expr::Binary { op, left, right } => {
                let l = eval(thread, env, left).await?;
                let r = eval(thread, env, right).await?;
                binary(*op, &l, &r)
            }
            Expr::And(left, right) => {
                let l = eval(thread, env, left).await?;
                if !l.truth() {
                    return Ok(l);
                }
                eval(thread, env, right).await
            }
            Expr::Or(left, right) => {
                let l = eval(thread, env, left).await?;
                if l.truth() {
                    return Ok(l);
                }
                eval(thread, env, right).await
            }
            Expr::Cond { cond, then, otherwise } => {
                if eval(thread, env, cond).await?.truth() {
                    eval(thread, env, then).await
                } else {
                    eval(thread, env, otherwise).await
                }
            }
            Expr::Lambda(def) => make_function(thread, env, def).await,
        }
    })
}

async fn eval_all(thread: &Thread, env: &Env, items: &[Expr]) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(eval(thread, env, item).await?);
    }
    Ok(out)
}

async fn eval_args(thread: &Thread, env: &Env, args: &[Arg]) -> Result<Args> {
    let mut out = Args::default();
    for arg in args {
        match arg {
            Arg::Positional(e) => out.positional.push(eval(thread, env, e).await?),
            Arg::Named(name, e) => {
                if out.named.iter().any(|(n, _)| n == name) {
                    return Err(Error::type_error(format!("duplicate keyword argument '{}'", name)));
                }
                out.named.push((name.clone(), eval(thread, env, e).await?));
            }
            Arg::Star(e) => out.positional.extend(eval(thread, env, e).await?.iterate()?),
            Arg::StarStar(e) => match eval(thread, env, e).await? {
                Value::Dict(d) => {
                    for (k, v) in d.borrow().iter() {
                        match k {
                            super::value::Key::String(s) => out.named.push((s.clone(), v.clone())),
                            _ => return Err(Error::type_error("keywords must be strings")),
                        }
                    }
                }
                other => {
                    return Err(Error::type_error(format!(
                        "argument after ** must be a dict, not {}",
                        other.type_name()
                    )))
                }
            },
        }
    }
    Ok(out)
}

fn comprehension<'a>(
    thread: &'a Thread,
    env: &'a Env,
    clauses: &'a [Comprehension],
    element: &'a Expr,
    out: &'a mut Vec<Value>,
) -> LocalBoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let Some((clause, rest)) = clauses.split_first() else {
            out.push(eval(thread, env, element).await?);
            return Ok(());
        };
        for item in eval(thread, env, &clause.iter).await?.iterate()? {
            assign(thread, env, &clause.target, item).await?;
            let mut keep = true;
            for cond in &clause.conditions {
                if !eval(thread, env, cond).await?.truth() {
                    keep = false;
                    break;
                }
            }
            if keep {
                comprehension(thread, env, rest, element, out).await?;
            }
        }
        Ok(())
    })
}

/* ===================== Operators ===================== */

pub(crate) fn get_attr(obj: &Value, name: &str) -> Result<Value> {
    if let Value::Object(o) = obj {
        return o
            .attr(name)?
            .ok_or_else(|| super::attr::no_such_attr(o.type_name(), name));
    }
    universe::method(obj, name).ok_or_else(|| super::attr::no_such_attr(obj.type_name(), name))
}

pub(crate) fn has_attr(obj: &Value, name: &str) -> Result<bool> {
    match obj {
        Value::Object(o) => Ok(o.attr(name)?.is_some()),
        _ => Ok(universe::method(obj, name).is_some()),
    }
}

pub(crate) fn attr_names(obj: &Value) -> Vec<String> {
    match obj {
        Value::Object(o) => o.attr_names(),
        _ => universe::method_names(obj),
    }
}

fn normalize_index(i: i64, len: usize) -> Result<usize> {
    let len_i = len as i64;
    let idx = if i < 0 { i + len_i } else { i };
    if idx < 0 || idx >= len_i {
        return Err(Error::new(
            ErrorKind::Index,
            format!("index {} out of range [{}:{}]", i, -len_i, len_i),
        ));
    }
    Ok(idx as usize)
}

fn int_index(idx: &Value) -> Result<i64> {
    idx.as_int()
        .ok_or_else(|| Error::type_error(format!("indices must be integers, not {}", idx.type_name())))
}

pub(crate) fn get_index(obj: &Value, idx: &Value) -> Result<Value> {
    match obj {
        Value::List(l) => {
            let l = l.borrow();
            Ok(l[normalize_index(int_index(idx)?, l.len())?].clone())
        }
        Value::Tuple(t) => Ok(t[normalize_index(int_index(idx)?, t.len())?].clone()),
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(int_index(idx)?, chars.len())?;
            Ok(Value::String(chars[i].to_string()))
        }
        Value::Bytes(b) => Ok(Value::Int(b[normalize_index(int_index(idx)?, b.len())?] as i64)),
        Value::Dict(d) => {
            let key = idx.to_key()?;
            d.borrow()
                .get(&key)
                .cloned()
                .ok_or_else(|| Error::new(ErrorKind::Key, format!("key {} not in dict", idx.repr())))
        }
        other => Err(Error::type_error(format!("unhandled index operation {}[{}]", other.type_name(), idx.type_name()))),
    }
}

fn set_index(obj: &Value, idx: Value, value: Value) -> Result<()> {
    match obj {
        Value::List(l) => {
            let mut l = l.borrow_mut();
            let i = normalize_index(int_index(&idx)?, l.len())?;
            l[i] = value;
            Ok(())
        }
        Value::Dict(d) => {
            d.borrow_mut().insert(idx.to_key()?, value);
            Ok(())
        }
        other => Err(Error::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn slice_bounds(start: Option<Value>, stop: Option<Value>, len: usize) -> Result<(usize, usize)> {
    let len_i = len as i64;
    let clamp = |v: Option<Value>, default: i64| -> Result<i64> {
        let i = match v {
            None | Some(Value::None) => return Ok(default),
            Some(v) => int_index(&v)?,
        };
        let i = if i < 0 { i + len_i } else { i };
        Ok(i.clamp(0, len_i))
    };
    let s = clamp(start, 0)? as usize;
    let e = clamp(stop, len_i)? as usize;
    Ok((s, e.max(s)))
}

fn slice(obj: &Value, start: Option<Value>, stop: Option<Value>) -> Result<Value> {
    match obj {
        Value::List(l) => {
            let l = l.borrow();
            let (s, e) = slice_bounds(start, stop, l.len())?;
            Ok(Value::list(l[s..e].to_vec()))
        }
        Value::Tuple(t) => {
            let (s, e) = slice_bounds(start, stop, t.len())?;
            Ok(Value::tuple(t[s..e].to_vec()))
        }
        Value::String(st) => {
            let chars: Vec<char> = st.chars().collect();
            let (s, e) = slice_bounds(start, stop, chars.len())?;
            Ok(Value::String(chars[s..e].iter().collect()))
        }
        Value::Bytes(b) => {
            let (s, e) = slice_bounds(start, stop, b.len())?;
            Ok(Value::Bytes(b[s..e].to_vec()))
        }
        other => Err(Error::type_error(format!("invalid slice operand {}", other.type_name()))),
    }
}

fn unary(op: UnaryOp, v: Value) -> Result<Value> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truth())),
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| Error::new(ErrorKind::Overflow, "integer overflow")),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, v @ (Value::Int(_) | Value::Float(_))) => Ok(v),
        (op, v) => Err(Error::type_error(format!(
            "unsupported unary op {} on {}",
            match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                UnaryOp::Not => "not",
            },
            v.type_name()
        ))),
    }
}

fn overflow() -> Error {
    Error::new(ErrorKind::Overflow, "integer overflow")
}

fn zero_division() -> Error {
    Error::new(ErrorKind::ZeroDivision, "division by zero")
}

fn repeat<T: Clone>(items: &[T], n: i64) -> Vec<T> {
    let mut out = Vec::new();
    for _ in 0..n.max(0) {
        out.extend_from_slice(items);
    }
    out
}

pub(crate) fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    use Value::*;
    let unsupported = || {
        Error::type_error(format!(
            "unsupported binary operation: {} {} {}",
            l.type_name(),
            op.symbol(),
            r.type_name()
        ))
    };
    match op {
        BinaryOp::Eq => return Ok(Bool(l == r)),
        BinaryOp::Ne => return Ok(Bool(l != r)),
        BinaryOp::Lt => return Ok(Bool(l.compare(r)?.is_lt())),
        BinaryOp::Le => return Ok(Bool(l.compare(r)?.is_le())),
        BinaryOp::Gt => return Ok(Bool(l.compare(r)?.is_gt())),
        BinaryOp::Ge => return Ok(Bool(l.compare(r)?.is_ge())),
        BinaryOp::In => return contains(r, l).map(Bool),
        BinaryOp::NotIn => return contains(r, l).map(|b| Bool(!b)),
        _ => {}
    }
    match (op, l, r) {
        (BinaryOp::Add, Int(a), Int(b)) => a.checked_add(*b).map(Int).ok_or_else(overflow),
        (BinaryOp::Sub, Int(a), Int(b)) => a.checked_sub(*b).map(Int).ok_or_else(overflow),
        (BinaryOp::Mul, Int(a), Int(b)) => a.checked_mul(*b).map(Int).ok_or_else(overflow),
        (BinaryOp::FloorDiv, Int(a), Int(b)) => {
            if *b == 0 {
                return Err(zero_division());
            }
            let q = a.checked_div(*b).ok_or_else(overflow)?;
            Ok(Int(if a % b != 0 && ((*a < 0) != (*b < 0)) { q - 1 } else { q }))
        }
        (BinaryOp::Mod, Int(a), Int(b)) => {
            if *b == 0 {
                return Err(zero_division());
            }
            let m = a.checked_rem(*b).ok_or_else(overflow)?;
            Ok(Int(if m != 0 && ((m < 0) != (*b < 0)) { m + b } else { m }))
        }
        (BinaryOp::Div, Int(_) | Float(_), Int(_) | Float(_)) => {
            let (a, b) = (l.as_f64().unwrap_or(0.0), r.as_f64().unwrap_or(0.0));
            if b == 0.0 {
                return Err(zero_division());
            }
            Ok(Float(a / b))
        }
        (_, Int(_) | Float(_), Int(_) | Float(_)) => {
            let (a, b) = (l.as_f64().unwrap_or(0.0), r.as_f64().unwrap_or(0.0));
            match op {
                BinaryOp::Add => Ok(Float(a + b)),
                BinaryOp::Sub => Ok(Float(a - b)),
                BinaryOp::Mul => Ok(Float(a * b)),
                BinaryOp::FloorDiv if b == 0.0 => Err(zero_division()),
                BinaryOp::FloorDiv => Ok(Float((a / b).floor())),
                BinaryOp::Mod if b == 0.0 => Err(zero_division()),
                BinaryOp::Mod => Ok(Float(a - b * (a / b).floor())),
                _ => Err(unsupported()),
            }
        }
        (BinaryOp::Add, String(a), String(b)) => Ok(String(format!("{}{}", a, b))),
        (BinaryOp::Add, Bytes(a), Bytes(b)) => Ok(Bytes([a.as_slice(), b.as_slice()].concat())),
        (BinaryOp::Add, List(a), List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinaryOp::Add, Tuple(a), Tuple(b)) => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinaryOp::Mul, String(s), Int(n)) | (BinaryOp::Mul, Int(n), String(s)) => {
            Ok(String(s.repeat((*n).max(0) as usize)))
        }
        (BinaryOp::Mul, List(items), Int(n)) | (BinaryOp::Mul, Int(n), List(items)) => {
            Ok(Value::list(repeat(&items.borrow(), *n)))
        }
        (BinaryOp::Mul, Tuple(items), Int(n)) | (BinaryOp::Mul, Int(n), Tuple(items)) => {
            Ok(Value::tuple(repeat(items, *n)))
        }
        (BinaryOp::Mod, String(fmt), args) => universe::percent_format(fmt, args).map(String),
        _ => Err(unsupported()),
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool> {
    match container {
        Value::List(l) => Ok(l.borrow().iter().any(|x| x == item)),
        Value::Tuple(t) => Ok(t.iter().any(|x| x == item)),
        Value::Dict(d) => Ok(d.borrow().contains_key(&item.to_key()?)),
        Value::String(s) => match item {
            Value::String(sub) => Ok(s.contains(sub.as_str())),
            other => Err(Error::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Bytes(b) => match item {
            Value::Bytes(sub) => Ok(sub.is_empty() || b.windows(sub.len()).any(|w| w == sub.as_slice())),
            Value::Int(i) => Ok(b.iter().any(|x| *x as i64 == *i)),
            other => Err(Error::type_error(format!(
                "'in <bytes>' requires bytes or int, not {}",
                other.type_name()
            ))),
        },
        other => Err(Error::type_error(format!(
            "unsupported 'in' on {}",
            other.type_name()
        ))),
    }
}
