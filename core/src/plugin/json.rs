//! The `json` module: `json.dumps(value, indent=None)` and `json.loads(text)`.

use std::any::Any;

use crate::service::{Plugin, RunInfo};
use crate::star::attr::{self, Property};
use crate::star::{self, Args, Builtin, BuiltinDef, HasAttrs, Thread, Value};

pub const PLUGIN_ID: &str = "json";

pub struct JsonPlugin;

impl Plugin for JsonPlugin {
    fn id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn create(&self, _run: &RunInfo) -> Value {
        Value::object(Module)
    }
}

#[derive(Debug)]
pub struct Module;

static BUILTINS: &[BuiltinDef] = &[BuiltinDef::sync("dumps", dumps), BuiltinDef::sync("loads", loads)];

static PROPERTIES: &[(&str, Property<Module>)] = &[];

impl HasAttrs for Module {
    fn type_name(&self) -> &'static str {
        PLUGIN_ID
    }

    fn attr(&self, name: &str) -> star::Result<Option<Value>> {
        attr::try_attr(self, name, BUILTINS, PROPERTIES)
    }

    fn attr_names(&self) -> Vec<String> {
        attr::attr_names(BUILTINS, PROPERTIES)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn dumps(_t: &Thread, _b: &Builtin, args: Args) -> star::Result<Value> {
    let mut indent = None;
    for (key, value) in &args.named {
        match (key.as_str(), value) {
            ("indent", Value::None) => indent = None,
            ("indent", Value::Int(n)) if *n >= 0 => indent = Some(*n as usize),
            (key, value) => {
                return Err(star::Error::type_error(format!(
                    "dumps: unexpected keyword argument {}={}",
                    key,
                    value.repr()
                )))
            }
        }
    }
    let [value] = args.positional.as_slice() else {
        return Err(star::Error::type_error(format!(
            "dumps: got {} arguments, want 1",
            args.positional.len()
        )));
    };
    let json = star::to_json(value)?;
    let text = match indent {
        None => serde_json::to_string(&json),
        Some(width) => {
            let indent = " ".repeat(width);
            let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
            let mut out = Vec::new();
            let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
            serde::Serialize::serialize(&json, &mut serializer)
                .map(|_| String::from_utf8_lossy(&out).into_owned())
        }
    }
    .map_err(|e| star::Error::value(format!("dumps: {}", e)))?;
    Ok(Value::String(text))
}

fn loads(_t: &Thread, _b: &Builtin, args: Args) -> star::Result<Value> {
    args.expect("loads", 1, 1)?;
    let text = match &args.positional[0] {
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Bytes(b) => b.clone(),
        other => {
            return Err(star::Error::type_error(format!(
                "loads: want string or bytes, got {}",
                other.type_name()
            )))
        }
    };
    let json: serde_json::Value =
        serde_json::from_slice(&text).map_err(|e| star::Error::value(format!("loads: {}", e)))?;
    star::from_json(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(f: fn(&Thread, &Builtin, Args) -> star::Result<Value>, args: Args) -> star::Result<Value> {
        let thread = Thread::new("test");
        let builtin = Builtin::new(&BUILTINS[0]);
        f(&thread, &builtin, args)
    }

    #[test]
    fn test_dumps_plain_json() {
        let value = star::from_json(serde_json::json!({"a": [1, 2], "b": null})).unwrap();
        let out = call(dumps, Args::new(vec![value])).unwrap();
        assert_eq!(out, Value::from(r#"{"a":[1,2],"b":null}"#));
    }

    #[test]
    fn test_dumps_indent() {
        let value = star::from_json(serde_json::json!({"a": 1})).unwrap();
        let args = Args::with_named(vec![value], vec![("indent".into(), Value::Int(2))]);
        assert_eq!(call(dumps, args).unwrap(), Value::from("{\n  \"a\": 1\n}"));
    }

    #[test]
    fn test_loads_rejects_garbage() {
        let err = call(loads, Args::new(vec![Value::from("{nope")])).unwrap_err();
        assert!(err.message().starts_with("loads:"));
        let ok = call(loads, Args::new(vec![Value::from("[1, \"x\"]")])).unwrap();
        assert_eq!(ok.repr(), "[1, \"x\"]");
    }
}
