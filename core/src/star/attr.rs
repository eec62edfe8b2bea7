//! Attribute resolution for plugin modules.
//!
//! A module describes its script surface with two static tables: builtins
//! (callables) and property factories (values computed from the receiver).
//! Lookup consults builtins first, then properties; listing attributes
//! returns the union of both tables.

use super::error::{Error, ErrorKind, Result};
use super::value::{BuiltinDef, Value};

/// A property factory evaluated against the receiving module.
pub type Property<R> = fn(&R) -> Result<Value>;

/// Resolve `name` on `receiver`.
///
/// Builtins are returned as-is, unbound from the receiver. Properties are
/// evaluated on every access. Unknown names yield an attribute error naming
/// the receiver's type.
pub fn attr<R: ?Sized>(
    receiver: &R,
    type_name: &str,
    name: &str,
    builtins: &[BuiltinDef],
    properties: &[(&'static str, Property<R>)],
) -> Result<Value> {
    if let Some(def) = builtins.iter().find(|b| b.name == name) {
        return Ok(Value::builtin(def));
    }
    if let Some((_, factory)) = properties.iter().find(|(n, _)| *n == name) {
        return factory(receiver);
    }
    Err(no_such_attr(type_name, name))
}

/// Like [`attr`], but reports a missing attribute as `Ok(None)`. Errors
/// raised by a property factory are returned unchanged.
pub fn try_attr<R: ?Sized>(
    receiver: &R,
    name: &str,
    builtins: &[BuiltinDef],
    properties: &[(&'static str, Property<R>)],
) -> Result<Option<Value>> {
    if let Some(def) = builtins.iter().find(|b| b.name == name) {
        return Ok(Some(Value::builtin(def)));
    }
    match properties.iter().find(|(n, _)| *n == name) {
        Some((_, factory)) => factory(receiver).map(Some),
        None => Ok(None),
    }
}

/// The sorted, de-duplicated union of builtin and property names.
pub fn attr_names<R: ?Sized>(builtins: &[BuiltinDef], properties: &[(&'static str, Property<R>)]) -> Vec<String> {
    let mut names: Vec<String> = builtins
        .iter()
        .map(|b| b.name.to_string())
        .chain(properties.iter().map(|(n, _)| n.to_string()))
        .collect();
    names.sort();
    names.dedup();
    names
}

pub fn no_such_attr(type_name: &str, name: &str) -> Error {
    Error::new(
        ErrorKind::Attribute,
        format!("{} has no .{} field or method", type_name, name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::star::thread::Thread;
    use crate::star::value::{Args, Builtin};

    struct Counter {
        count: i64,
    }

    fn count(c: &Counter) -> Result<Value> {
        Ok(Value::Int(c.count))
    }

    fn doubled(c: &Counter) -> Result<Value> {
        Ok(Value::Int(c.count * 2))
    }

    fn noop(_t: &Thread, _b: &Builtin, _args: Args) -> Result<Value> {
        Ok(Value::None)
    }

    static BUILTINS: &[BuiltinDef] = &[BuiltinDef::sync("reset", noop), BuiltinDef::sync("count", noop)];

    fn broken(_c: &Counter) -> Result<Value> {
        Err(no_such_attr("backend", "missing"))
    }

    fn properties() -> Vec<(&'static str, Property<Counter>)> {
        vec![("count", count), ("doubled", doubled), ("broken", broken)]
    }

    #[test]
    fn test_builtins_win_over_properties() {
        let counter = Counter { count: 3 };
        let value = attr(&counter, "counter", "count", BUILTINS, &properties()).unwrap();
        match value {
            Value::Builtin(b) => {
                assert_eq!(b.name, "count");
                assert!(b.receiver.is_none());
            }
            other => panic!("expected builtin, got {other:?}"),
        }
    }

    #[test]
    fn test_property_is_evaluated_against_receiver() {
        let counter = Counter { count: 21 };
        let value = attr(&counter, "counter", "doubled", BUILTINS, &properties()).unwrap();
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn test_missing_attribute() {
        let counter = Counter { count: 0 };
        let err = attr(&counter, "counter", "nope", BUILTINS, &properties()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Attribute);
        assert!(err.message().contains("counter has no .nope"));

        assert!(try_attr(&counter, "nope", BUILTINS, &properties()).unwrap().is_none());
    }

    #[test]
    fn test_attr_names_is_union() {
        let names = attr_names(BUILTINS, &properties());
        assert_eq!(names, vec!["broken", "count", "doubled", "reset"]);
    }

    #[test]
    fn test_failing_property_is_not_a_missing_attribute() {
        let counter = Counter { count: 0 };
        let err = try_attr(&counter, "broken", BUILTINS, &properties()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Attribute);
        assert!(err.message().contains("backend has no .missing"));

        assert_eq!(
            try_attr(&counter, "doubled", BUILTINS, &properties()).unwrap(),
            Some(Value::Int(0))
        );
    }
}
