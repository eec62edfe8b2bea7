//! Script values.

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use indexmap::IndexMap;

use super::error::{Error, Result};
use super::eval::Function;
use super::thread::Thread;

/* ===================== Values ===================== */

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<IndexMap<Key, Value>>>),
    Function(Rc<Function>),
    Builtin(Rc<Builtin>),
    Object(Rc<dyn HasAttrs>),
}

/// Hashable projection of a value, used for dict keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    String(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Key>),
}

impl Key {
    pub fn to_value(&self) -> Value {
        match self {
            Key::None => Value::None,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Int(*i),
            Key::String(s) => Value::String(s.clone()),
            Key::Bytes(b) => Value::Bytes(b.clone()),
            Key::Tuple(items) => Value::tuple(items.iter().map(Key::to_value).collect()),
        }
    }
}

/// Script-visible objects with attributes: plugin modules, loaded modules,
/// caught errors.
pub trait HasAttrs: fmt::Debug {
    fn type_name(&self) -> &'static str;

    /// Resolve `name`, returning `Ok(None)` when the attribute does not exist.
    fn attr(&self, name: &str) -> Result<Option<Value>>;

    fn attr_names(&self) -> Vec<String>;

    fn repr(&self) -> String {
        format!("<{}>", self.type_name())
    }

    fn as_any(&self) -> &dyn Any;
}

/* ===================== Builtins ===================== */

pub type SyncNative = fn(&Thread, &Builtin, Args) -> Result<Value>;
pub type AsyncNative = for<'a> fn(&'a Thread, &'a Builtin, Args) -> LocalBoxFuture<'a, Result<Value>>;

#[derive(Clone, Copy)]
pub enum NativeFn {
    Sync(SyncNative),
    Async(AsyncNative),
}

/// Static description of a builtin, suitable for `static` tables.
#[derive(Clone, Copy)]
pub struct BuiltinDef {
    pub name: &'static str,
    pub func: NativeFn,
}

impl BuiltinDef {
    pub const fn sync(name: &'static str, func: SyncNative) -> Self {
        Self {
            name,
            func: NativeFn::Sync(func),
        }
    }

    pub const fn asynchronous(name: &'static str, func: AsyncNative) -> Self {
        Self {
            name,
            func: NativeFn::Async(func),
        }
    }
}

/// A native function value, optionally bound to a receiver (`[].append`).
pub struct Builtin {
    pub name: &'static str,
    pub func: NativeFn,
    pub receiver: Option<Value>,
}

impl Builtin {
    pub fn new(def: &BuiltinDef) -> Self {
        Self {
            name: def.name,
            func: def.func,
            receiver: None,
        }
    }

    pub fn bound(def: &BuiltinDef, receiver: Value) -> Self {
        Self {
            name: def.name,
            func: def.func,
            receiver: Some(receiver),
        }
    }

    pub fn receiver(&self) -> Result<&Value> {
        self.receiver
            .as_ref()
            .ok_or_else(|| Error::type_error(format!("{}: missing receiver", self.name)))
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

/* ===================== Call arguments ===================== */

#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    /// Keyword arguments in call order.
    pub named: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            named: Vec::new(),
        }
    }

    pub fn with_named(positional: Vec<Value>, named: Vec<(String, Value)>) -> Self {
        Self { positional, named }
    }

    pub fn no_named(&self, fname: &str) -> Result<()> {
        match self.named.first() {
            Some((key, _)) => Err(Error::type_error(format!(
                "{}: unexpected keyword argument '{}'",
                fname, key
            ))),
            None => Ok(()),
        }
    }

    /// Check positional arity, rejecting keyword arguments.
    pub fn expect(&self, fname: &str, min: usize, max: usize) -> Result<()> {
        self.no_named(fname)?;
        let n = self.positional.len();
        if n < min || n > max {
            let expected = if min == max {
                format!("{}", min)
            } else {
                format!("{} to {}", min, max)
            };
            return Err(Error::type_error(format!(
                "{}: got {} arguments, want {}",
                fname, n, expected
            )));
        }
        Ok(())
    }

    pub fn arg(&self, i: usize) -> Option<&Value> {
        self.positional.get(i)
    }
}

/* ===================== Constructors & accessors ===================== */

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(entries: IndexMap<Key, Value>) -> Self {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn dict_from(pairs: Vec<(Value, Value)>) -> Result<Self> {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            map.insert(k.to_key()?, v);
        }
        Ok(Value::dict(map))
    }

    pub fn object<T: HasAttrs + 'static>(obj: T) -> Self {
        Value::Object(Rc::new(obj))
    }

    pub fn builtin(def: &BuiltinDef) -> Self {
        Value::Builtin(Rc::new(Builtin::new(def)))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn downcast_ref<T: HasAttrs + 'static>(&self) -> Option<&T> {
        match self {
            Value::Object(obj) => obj.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Object(obj) => obj.type_name(),
        }
    }

    pub fn truth(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Function(_) | Value::Builtin(_) | Value::Object(_) => true,
        }
    }

    pub fn to_key(&self) -> Result<Key> {
        Ok(match self {
            Value::None => Key::None,
            Value::Bool(b) => Key::Bool(*b),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Key::Int(*f as i64),
            Value::String(s) => Key::String(s.clone()),
            Value::Bytes(b) => Key::Bytes(b.clone()),
            Value::Tuple(items) => Key::Tuple(items.iter().map(Value::to_key).collect::<Result<_>>()?),
            other => {
                return Err(Error::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }

    /// Snapshot of the items produced by iterating this value.
    pub fn iterate(&self) -> Result<Vec<Value>> {
        match self {
            Value::List(l) => Ok(l.borrow().clone()),
            Value::Tuple(t) => Ok(t.as_ref().clone()),
            Value::Dict(d) => Ok(d.borrow().keys().map(Key::to_value).collect()),
            Value::Bytes(b) => Ok(b.iter().map(|x| Value::Int(*x as i64)).collect()),
            other => Err(Error::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    pub fn len(&self) -> Result<usize> {
        match self {
            Value::String(s) => Ok(s.chars().count()),
            Value::Bytes(b) => Ok(b.len()),
            Value::List(l) => Ok(l.borrow().len()),
            Value::Tuple(t) => Ok(t.len()),
            Value::Dict(d) => Ok(d.borrow().len()),
            other => Err(Error::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    /* ----- string forms ----- */

    /// `str(x)`: strings render without quotes, everything else as `repr`.
    pub fn to_str(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.repr(),
        }
    }

    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0);
        out
    }

    fn write_repr(&self, out: &mut String, depth: usize) {
        if depth > 64 {
            out.push_str("...");
            return;
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::String(s) => quote_into(out, s),
            Value::Bytes(b) => {
                out.push_str("b\"");
                for byte in b {
                    match byte {
                        b'"' => out.push_str("\\\""),
                        b'\\' => out.push_str("\\\\"),
                        0x20..=0x7e => out.push(*byte as char),
                        _ => out.push_str(&format!("\\x{:02x}", byte)),
                    }
                }
                out.push('"');
            }
            Value::List(l) => {
                out.push('[');
                for (i, item) in l.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, depth + 1);
                }
                out.push(']');
            }
            Value::Tuple(t) => {
                out.push('(');
                for (i, item) in t.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, depth + 1);
                }
                if t.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(d) => {
                out.push('{');
                for (i, (k, v)) in d.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.to_value().write_repr(out, depth + 1);
                    out.push_str(": ");
                    v.write_repr(out, depth + 1);
                }
                out.push('}');
            }
            Value::Function(f) => out.push_str(&format!("<function {}>", f.name())),
            Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name)),
            Value::Object(obj) => out.push_str(&obj.repr()),
        }
    }

    /* ----- comparison ----- */

    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) | (Value::Float(_), Value::Float(_)) => {
                let (a, b) = (self.as_f64().unwrap_or(f64::NAN), other.as_f64().unwrap_or(f64::NAN));
                a.partial_cmp(&b)
                    .ok_or_else(|| Error::value("cannot compare NaN"))
            }
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Ok(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => compare_seq(&a.borrow(), &b.borrow()),
            (Value::Tuple(a), Value::Tuple(b)) => compare_seq(a, b),
            _ => Err(Error::type_error(format!(
                "unsupported comparison between '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

fn compare_seq(a: &[Value], b: &[Value]) -> Result<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        if x != y {
            return x.compare(y);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "+inf" } else { "-inf" }.to_string()
    } else {
        format!("{:?}", f)
    }
}

pub(crate) fn quote_into(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

/* ===================== Typed extraction ===================== */

/// Conversion from a script value into a host type.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(want: &str, got: &Value) -> Error {
    Error::type_error(format!("want {}, got {}", want, got.type_name()))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        value.as_int().ok_or_else(|| mismatch("int", &value))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("float", &value))
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::None => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
