//! Builtin functions and methods available to every script.

use std::any::Any;
use std::cmp::Ordering;

use indexmap::IndexMap;

use super::attr;
use super::error::{Error, ErrorKind, Result};
use super::eval::{attr_names, get_attr, has_attr};
use super::thread::Thread;
use super::value::{Args, Builtin, BuiltinDef, HasAttrs, Key, Value};

/* ===================== Universe ===================== */

static UNIVERSE: &[BuiltinDef] = &[
    BuiltinDef::sync("abs", abs),
    BuiltinDef::sync("all", all),
    BuiltinDef::sync("any", any),
    BuiltinDef::sync("bool", bool_),
    BuiltinDef::sync("dict", dict),
    BuiltinDef::sync("dir", dir),
    BuiltinDef::sync("enumerate", enumerate),
    BuiltinDef::sync("fail", fail),
    BuiltinDef::sync("float", float),
    BuiltinDef::sync("getattr", getattr),
    BuiltinDef::sync("hasattr", hasattr),
    BuiltinDef::sync("int", int),
    BuiltinDef::sync("len", len),
    BuiltinDef::sync("list", list),
    BuiltinDef::sync("max", max),
    BuiltinDef::sync("min", min),
    BuiltinDef::sync("print", print),
    BuiltinDef::sync("range", range),
    BuiltinDef::sync("repr", repr),
    BuiltinDef::sync("reversed", reversed),
    BuiltinDef::sync("sorted", sorted),
    BuiltinDef::sync("str", str_),
    BuiltinDef::sync("tuple", tuple),
    BuiltinDef::sync("type", type_),
    BuiltinDef::sync("zip", zip),
];

pub(crate) fn lookup(name: &str) -> Option<Value> {
    UNIVERSE.iter().find(|b| b.name == name).map(Value::builtin)
}

fn one(args: &Args, fname: &str) -> Result<Value> {
    args.expect(fname, 1, 1)?;
    Ok(args.positional[0].clone())
}

fn abs(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    match one(&args, "abs")? {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| Error::new(ErrorKind::Overflow, "integer overflow")),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(Error::type_error(format!("abs: got {}, want int or float", other.type_name()))),
    }
}

fn all(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    Ok(Value::Bool(one(&args, "all")?.iterate()?.iter().all(Value::truth)))
}

fn any(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    Ok(Value::Bool(one(&args, "any")?.iterate()?.iter().any(Value::truth)))
}

fn bool_(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    args.expect("bool", 0, 1)?;
    Ok(Value::Bool(args.arg(0).map(Value::truth).unwrap_or(false)))
}

fn dict(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    if args.positional.len() > 1 {
        return Err(Error::type_error("dict: got more than one positional argument"));
    }
    let mut map = IndexMap::new();
    if let Some(src) = args.arg(0) {
        match src {
            Value::Dict(d) => map.extend(d.borrow().iter().map(|(k, v)| (k.clone(), v.clone()))),
            other => {
                for pair in other.iterate()? {
                    let items = pair.iterate()?;
                    if items.len() != 2 {
                        return Err(Error::value("dict: element is not a pair"));
                    }
                    map.insert(items[0].to_key()?, items[1].clone());
                }
            }
        }
    }
    for (k, v) in args.named {
        map.insert(Key::String(k), v);
    }
    Ok(Value::dict(map))
}

fn dir(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    let names = attr_names(&one(&args, "dir")?);
    Ok(Value::list(names.into_iter().map(Value::String).collect()))
}

fn enumerate(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    args.expect("enumerate", 1, 2)?;
    let start = match args.arg(1) {
        Some(v) => v.as_int().ok_or_else(|| Error::type_error("enumerate: start must be int"))?,
        None => 0,
    };
    let items = args.positional[0]
        .iterate()?
        .into_iter()
        .enumerate()
        .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
        .collect();
    Ok(Value::list(items))
}

/// `fail(*args)` aborts execution. Failing with a caught error re-raises it.
fn fail(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    args.no_named("fail")?;
    if let [single] = args.positional.as_slice() {
        if let Some(caught) = single.downcast_ref::<ErrorValue>() {
            return Err(caught.error.clone());
        }
    }
    let msg: Vec<String> = args.positional.iter().map(Value::to_str).collect();
    Err(Error::fail(msg.join(" ")))
}

fn float(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    args.expect("float", 0, 1)?;
    match args.arg(0) {
        None => Ok(Value::Float(0.0)),
        Some(Value::Int(i)) => Ok(Value::Float(*i as f64)),
        Some(Value::Float(f)) => Ok(Value::Float(*f)),
        Some(Value::Bool(b)) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::value(format!("float: invalid literal {:?}", s))),
        Some(other) => Err(Error::type_error(format!("float: got {}", other.type_name()))),
    }
}

fn getattr(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    args.expect("getattr", 2, 3)?;
    let name = args.positional[1]
        .as_str()
        .ok_or_else(|| Error::type_error("getattr: attribute name must be a string"))?;
    match get_attr(&args.positional[0], name) {
        Err(err) if err.kind() == ErrorKind::Attribute && args.positional.len() == 3 => {
            Ok(args.positional[2].clone())
        }
        result => result,
    }
}

fn hasattr(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    args.expect("hasattr", 2, 2)?;
    let name = args.positional[1]
        .as_str()
        .ok_or_else(|| Error::type_error("hasattr: attribute name must be a string"))?;
    has_attr(&args.positional[0], name).map(Value::Bool)
}

fn int(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    args.expect("int", 0, 2)?;
    match args.arg(0) {
        None => Ok(Value::Int(0)),
        Some(Value::Int(i)) => Ok(Value::Int(*i)),
        Some(Value::Bool(b)) => Ok(Value::Int(*b as i64)),
        Some(Value::Float(f)) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Some(Value::String(s)) => {
            let base = match args.arg(1) {
                Some(v) => v.as_int().ok_or_else(|| Error::type_error("int: base must be int"))? as u32,
                None => 10,
            };
            if !(2..=36).contains(&base) {
                return Err(Error::value(format!("int: base must be in 2..36, got {}", base)));
            }
            let s = s.trim();
            let (neg, digits) = match s.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, s.strip_prefix('+').unwrap_or(s)),
            };
            let digits = if base == 16 {
                digits.trim_start_matches("0x").trim_start_matches("0X")
            } else {
                digits
            };
            let n = i64::from_str_radix(digits, base)
                .map_err(|_| Error::value(format!("int: invalid literal {:?}", s)))?;
            Ok(Value::Int(if neg { -n } else { n }))
        }
        Some(other) => Err(Error::type_error(format!("int: got {}", other.type_name()))),
    }
}

fn len(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    Ok(Value::Int(one(&args, "len")?.len()? as i64))
}

fn list(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    args.expect("list", 0, 1)?;
    match args.arg(0) {
        Some(v) => Ok(Value::list(v.iterate()?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn extremum(args: Args, fname: &str, want: Ordering) -> Result<Value> {
    args.no_named(fname)?;
    let items = match args.positional.len() {
        0 => return Err(Error::type_error(format!("{}: got 0 arguments", fname))),
        1 => args.positional[0].iterate()?,
        _ => args.positional,
    };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| Error::value(format!("{}: empty sequence", fname)))?;
    for item in iter {
        if item.compare(&best)? == want {
            best = item;
        }
    }
    Ok(best)
}

fn max(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    extremum(args, "max", Ordering::Greater)
}

fn min(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    extremum(args, "min", Ordering::Less)
}

fn print(t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    let mut sep = " ".to_string();
    for (k, v) in &args.named {
        match (k.as_str(), v) {
            ("sep", Value::String(s)) => sep = s.clone(),
            _ => return Err(Error::type_error(format!("print: unexpected keyword argument '{}'", k))),
        }
    }
    let parts: Vec<String> = args.positional.iter().map(Value::to_str).collect();
    t.print(&parts.join(&sep));
    Ok(Value::None)
}

fn range(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    args.expect("range", 1, 3)?;
    let ints = args
        .positional
        .iter()
        .map(|v| v.as_int().ok_or_else(|| Error::type_error("range: arguments must be int")))
        .collect::<Result<Vec<i64>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => unreachable!("arity checked"),
    };
    if step == 0 {
        return Err(Error::value("range: step argument must not be zero"));
    }
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(Value::Int(i));
        i += step;
    }
    Ok(Value::list(out))
}

fn repr(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    Ok(Value::String(one(&args, "repr")?.repr()))
}

fn reversed(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    let mut items = one(&args, "reversed")?.iterate()?;
    items.reverse();
    Ok(Value::list(items))
}

fn sorted(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    if args.positional.len() != 1 {
        return Err(Error::type_error("sorted: want 1 positional argument"));
    }
    let mut reverse = false;
    for (k, v) in &args.named {
        match k.as_str() {
            "reverse" => reverse = v.truth(),
            other => return Err(Error::type_error(format!("sorted: unexpected keyword argument '{}'", other))),
        }
    }
    let mut items = args.positional[0].iterate()?;
    let mut failure = None;
    items.sort_by(|a, b| match a.compare(b) {
        Ok(ord) => ord,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    if reverse {
        items.reverse();
    }
    Ok(Value::list(items))
}

fn str_(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    Ok(Value::String(one(&args, "str")?.to_str()))
}

fn tuple(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    args.expect("tuple", 0, 1)?;
    match args.arg(0) {
        Some(v) => Ok(Value::tuple(v.iterate()?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

fn type_(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    Ok(Value::string(one(&args, "type")?.type_name()))
}

fn zip(_t: &Thread, _b: &Builtin, args: Args) -> Result<Value> {
    args.no_named("zip")?;
    let seqs = args.positional.iter().map(Value::iterate).collect::<Result<Vec<_>>>()?;
    let n = seqs.iter().map(Vec::len).min().unwrap_or(0);
    let out = (0..n)
        .map(|i| Value::tuple(seqs.iter().map(|s| s[i].clone()).collect()))
        .collect();
    Ok(Value::list(out))
}

/* ===================== Methods ===================== */

static STRING_METHODS: &[BuiltinDef] = &[
    BuiltinDef::sync("count", str_count),
    BuiltinDef::sync("endswith", str_endswith),
    BuiltinDef::sync("find", str_find),
    BuiltinDef::sync("format", str_format),
    BuiltinDef::sync("join", str_join),
    BuiltinDef::sync("lower", str_lower),
    BuiltinDef::sync("lstrip", str_lstrip),
    BuiltinDef::sync("replace", str_replace),
    BuiltinDef::sync("rstrip", str_rstrip),
    BuiltinDef::sync("split", str_split),
    BuiltinDef::sync("startswith", str_startswith),
    BuiltinDef::sync("strip", str_strip),
    BuiltinDef::sync("upper", str_upper),
];

static LIST_METHODS: &[BuiltinDef] = &[
    BuiltinDef::sync("append", list_append),
    BuiltinDef::sync("clear", list_clear),
    BuiltinDef::sync("extend", list_extend),
    BuiltinDef::sync("index", list_index),
    BuiltinDef::sync("insert", list_insert),
    BuiltinDef::sync("pop", list_pop),
    BuiltinDef::sync("remove", list_remove),
];

static DICT_METHODS: &[BuiltinDef] = &[
    BuiltinDef::sync("clear", dict_clear),
    BuiltinDef::sync("get", dict_get),
    BuiltinDef::sync("items", dict_items),
    BuiltinDef::sync("keys", dict_keys),
    BuiltinDef::sync("pop", dict_pop),
    BuiltinDef::sync("setdefault", dict_setdefault),
    BuiltinDef::sync("update", dict_update),
    BuiltinDef::sync("values", dict_values),
];

fn methods_of(v: &Value) -> &'static [BuiltinDef] {
    match v {
        Value::String(_) => STRING_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        _ => &[],
    }
}

/// A method of a builtin type, bound to its receiver.
pub(crate) fn method(v: &Value, name: &str) -> Option<Value> {
    methods_of(v)
        .iter()
        .find(|b| b.name == name)
        .map(|def| Value::Builtin(std::rc::Rc::new(Builtin::bound(def, v.clone()))))
}

pub(crate) fn method_names(v: &Value) -> Vec<String> {
    methods_of(v).iter().map(|b| b.name.to_string()).collect()
}

fn recv_str<'a>(b: &'a Builtin) -> Result<&'a str> {
    b.receiver()?
        .as_str()
        .ok_or_else(|| Error::type_error(format!("{}: receiver is not a string", b.name)))
}

fn str_arg<'a>(args: &'a Args, i: usize, fname: &str) -> Result<&'a str> {
    args.arg(i)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::type_error(format!("{}: argument {} must be a string", fname, i + 1)))
}

fn str_count(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("count", 1, 1)?;
    let sub = str_arg(&args, 0, "count")?;
    Ok(Value::Int(recv_str(b)?.matches(sub).count() as i64))
}

fn str_endswith(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("endswith", 1, 1)?;
    Ok(Value::Bool(recv_str(b)?.ends_with(str_arg(&args, 0, "endswith")?)))
}

fn str_startswith(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("startswith", 1, 1)?;
    Ok(Value::Bool(recv_str(b)?.starts_with(str_arg(&args, 0, "startswith")?)))
}

fn str_find(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("find", 1, 1)?;
    let s = recv_str(b)?;
    let found = s
        .find(str_arg(&args, 0, "find")?)
        .map(|byte| s[..byte].chars().count() as i64)
        .unwrap_or(-1);
    Ok(Value::Int(found))
}

/// `"{} and {name}".format(...)`: positional, indexed and named fields.
fn str_format(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    let template = recv_str(b)?;
    let mut out = String::new();
    let mut auto = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => return Err(Error::value("format: unmatched '{'")),
                    }
                }
                let value = if field.is_empty() {
                    auto += 1;
                    args.arg(auto - 1)
                } else if let Ok(i) = field.parse::<usize>() {
                    args.arg(i)
                } else {
                    args.named.iter().find(|(k, _)| *k == field).map(|(_, v)| v)
                };
                let value = value.ok_or_else(|| Error::new(ErrorKind::Key, format!("format: no argument for {{{}}}", field)))?;
                out.push_str(&value.to_str());
            }
            '}' => return Err(Error::value("format: single '}' encountered")),
            c => out.push(c),
        }
    }
    Ok(Value::String(out))
}

fn str_join(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("join", 1, 1)?;
    let parts = args.positional[0]
        .iterate()?
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            other => Err(Error::type_error(format!("join: got {} element, want string", other.type_name()))),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::String(parts.join(recv_str(b)?)))
}

fn str_lower(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("lower", 0, 0)?;
    Ok(Value::String(recv_str(b)?.to_lowercase()))
}

fn str_upper(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("upper", 0, 0)?;
    Ok(Value::String(recv_str(b)?.to_uppercase()))
}

fn strip_with(b: &Builtin, args: &Args, fname: &str, f: fn(&str, &[char]) -> String) -> Result<Value> {
    args.expect(fname, 0, 1)?;
    let chars: Vec<char> = match args.arg(0) {
        Some(Value::String(s)) => s.chars().collect(),
        _ => vec![' ', '\t', '\n', '\r'],
    };
    Ok(Value::String(f(recv_str(b)?, &chars)))
}

fn str_strip(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    strip_with(b, &args, "strip", |s, c| s.trim_matches(c).to_string())
}

fn str_lstrip(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    strip_with(b, &args, "lstrip", |s, c| s.trim_start_matches(c).to_string())
}

fn str_rstrip(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    strip_with(b, &args, "rstrip", |s, c| s.trim_end_matches(c).to_string())
}

fn str_replace(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("replace", 2, 2)?;
    let from = str_arg(&args, 0, "replace")?;
    let to = str_arg(&args, 1, "replace")?;
    Ok(Value::String(recv_str(b)?.replace(from, to)))
}

fn str_split(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("split", 0, 1)?;
    let s = recv_str(b)?;
    let parts: Vec<Value> = match args.arg(0) {
        None | Some(Value::None) => s.split_whitespace().map(Value::from).collect(),
        Some(Value::String(sep)) if sep.is_empty() => return Err(Error::value("split: empty separator")),
        Some(Value::String(sep)) => s.split(sep.as_str()).map(Value::from).collect(),
        Some(other) => return Err(Error::type_error(format!("split: got {}, want string", other.type_name()))),
    };
    Ok(Value::list(parts))
}

fn recv_list(b: &Builtin) -> Result<&std::cell::RefCell<Vec<Value>>> {
    match b.receiver()? {
        Value::List(l) => Ok(l.as_ref()),
        _ => Err(Error::type_error(format!("{}: receiver is not a list", b.name))),
    }
}

fn list_append(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    let v = one(&args, "append")?;
    recv_list(b)?.borrow_mut().push(v);
    Ok(Value::None)
}

fn list_clear(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("clear", 0, 0)?;
    recv_list(b)?.borrow_mut().clear();
    Ok(Value::None)
}

fn list_extend(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    let items = one(&args, "extend")?.iterate()?;
    recv_list(b)?.borrow_mut().extend(items);
    Ok(Value::None)
}

fn list_index(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    let needle = one(&args, "index")?;
    recv_list(b)?
        .borrow()
        .iter()
        .position(|x| *x == needle)
        .map(|i| Value::Int(i as i64))
        .ok_or_else(|| Error::value(format!("index: value {} not in list", needle.repr())))
}

fn list_insert(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("insert", 2, 2)?;
    let i = args.positional[0]
        .as_int()
        .ok_or_else(|| Error::type_error("insert: index must be int"))?;
    let mut list = recv_list(b)?.borrow_mut();
    let len = list.len() as i64;
    let at = if i < 0 { (i + len).max(0) } else { i.min(len) } as usize;
    list.insert(at, args.positional[1].clone());
    Ok(Value::None)
}

fn list_pop(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("pop", 0, 1)?;
    let mut list = recv_list(b)?.borrow_mut();
    let len = list.len() as i64;
    let i = match args.arg(0) {
        Some(v) => v.as_int().ok_or_else(|| Error::type_error("pop: index must be int"))?,
        None => -1,
    };
    let at = if i < 0 { i + len } else { i };
    if at < 0 || at >= len {
        return Err(Error::new(ErrorKind::Index, format!("pop: index {} out of range", i)));
    }
    Ok(list.remove(at as usize))
}

fn list_remove(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    let needle = one(&args, "remove")?;
    let mut list = recv_list(b)?.borrow_mut();
    match list.iter().position(|x| *x == needle) {
        Some(i) => {
            list.remove(i);
            Ok(Value::None)
        }
        None => Err(Error::value(format!("remove: element {} not found", needle.repr()))),
    }
}

fn recv_dict(b: &Builtin) -> Result<&std::cell::RefCell<IndexMap<Key, Value>>> {
    match b.receiver()? {
        Value::Dict(d) => Ok(d.as_ref()),
        _ => Err(Error::type_error(format!("{}: receiver is not a dict", b.name))),
    }
}

fn dict_clear(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("clear", 0, 0)?;
    recv_dict(b)?.borrow_mut().clear();
    Ok(Value::None)
}

fn dict_get(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("get", 1, 2)?;
    let key = args.positional[0].to_key()?;
    Ok(recv_dict(b)?
        .borrow()
        .get(&key)
        .cloned()
        .unwrap_or_else(|| args.arg(1).cloned().unwrap_or(Value::None)))
}

fn dict_items(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("items", 0, 0)?;
    let items = recv_dict(b)?
        .borrow()
        .iter()
        .map(|(k, v)| Value::tuple(vec![k.to_value(), v.clone()]))
        .collect();
    Ok(Value::list(items))
}

fn dict_keys(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("keys", 0, 0)?;
    Ok(Value::list(recv_dict(b)?.borrow().keys().map(Key::to_value).collect()))
}

fn dict_values(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("values", 0, 0)?;
    Ok(Value::list(recv_dict(b)?.borrow().values().cloned().collect()))
}

fn dict_pop(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("pop", 1, 2)?;
    let key = args.positional[0].to_key()?;
    match recv_dict(b)?.borrow_mut().shift_remove(&key) {
        Some(v) => Ok(v),
        None => args
            .arg(1)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::Key, format!("pop: missing key {}", args.positional[0].repr()))),
    }
}

fn dict_setdefault(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    args.expect("setdefault", 1, 2)?;
    let key = args.positional[0].to_key()?;
    let default = args.arg(1).cloned().unwrap_or(Value::None);
    Ok(recv_dict(b)?.borrow_mut().entry(key).or_insert(default).clone())
}

fn dict_update(_t: &Thread, b: &Builtin, args: Args) -> Result<Value> {
    let target = recv_dict(b)?;
    if let Some(Value::Dict(src)) = args.arg(0) {
        let entries: Vec<(Key, Value)> = src.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        target.borrow_mut().extend(entries);
    } else if let Some(other) = args.arg(0) {
        for pair in other.iterate()? {
            let items = pair.iterate()?;
            if items.len() != 2 {
                return Err(Error::value("update: element is not a pair"));
            }
            target.borrow_mut().insert(items[0].to_key()?, items[1].clone());
        }
    }
    for (k, v) in args.named {
        target.borrow_mut().insert(Key::String(k), v);
    }
    Ok(Value::None)
}

/* ===================== String formatting ===================== */

/// `fmt % args` with `%s`, `%r`, `%d` and `%%`.
pub(crate) fn percent_format(fmt: &str, args: &Value) -> Result<String> {
    let values = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        other => vec![other.clone()],
    };
    let mut values = values.into_iter();
    let mut out = String::new();
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let verb = chars
            .next()
            .ok_or_else(|| Error::value("incomplete format"))?;
        if verb == '%' {
            out.push('%');
            continue;
        }
        let v = values
            .next()
            .ok_or_else(|| Error::type_error("not enough arguments for format string"))?;
        match verb {
            's' => out.push_str(&v.to_str()),
            'r' => out.push_str(&v.repr()),
            'd' => match v {
                Value::Int(i) => out.push_str(&i.to_string()),
                Value::Float(f) => out.push_str(&(f.trunc() as i64).to_string()),
                other => return Err(Error::type_error(format!("%d format requires a number, not {}", other.type_name()))),
            },
            other => return Err(Error::value(format!("unsupported format character '{}'", other))),
        }
    }
    if values.next().is_some() {
        return Err(Error::type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

/* ===================== Caught errors ===================== */

/// The value bound by `except ... as e`.
#[derive(Debug)]
pub struct ErrorValue {
    error: Error,
}

impl ErrorValue {
    pub fn new(error: Error) -> Self {
        Self { error }
    }

    pub fn error(&self) -> &Error {
        &self.error
    }
}

fn error_details(e: &ErrorValue) -> Result<Value> {
    Ok(e.error.details().map(Value::from).unwrap_or(Value::None))
}

fn error_message(e: &ErrorValue) -> Result<Value> {
    Ok(Value::string(e.error.message()))
}

fn error_reason(e: &ErrorValue) -> Result<Value> {
    Ok(Value::string(e.error.reason()))
}

static ERROR_PROPERTIES: &[(&str, attr::Property<ErrorValue>)] = &[
    ("details", error_details),
    ("message", error_message),
    ("reason", error_reason),
];

impl HasAttrs for ErrorValue {
    fn type_name(&self) -> &'static str {
        "error"
    }

    fn attr(&self, name: &str) -> Result<Option<Value>> {
        attr::try_attr(self, name, &[], ERROR_PROPERTIES)
    }

    fn attr_names(&self) -> Vec<String> {
        attr::attr_names(&[], ERROR_PROPERTIES)
    }

    fn repr(&self) -> String {
        format!("<error {}>", self.error)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::from("foo"), Value::Int(100)]);
        assert_eq!(percent_format("(%r, %d) 100%%", &args).unwrap(), "(\"foo\", 100) 100%");
        assert!(percent_format("%s %s", &Value::from("x")).is_err());
    }

    #[test]
    fn test_method_binds_receiver() {
        let s = Value::from("abc");
        match method(&s, "upper").unwrap() {
            Value::Builtin(b) => assert_eq!(b.receiver.as_ref(), Some(&s)),
            other => panic!("expected builtin, got {other:?}"),
        }
        assert!(method(&Value::Int(1), "upper").is_none());
    }
}
