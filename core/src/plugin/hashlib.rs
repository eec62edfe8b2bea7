//! The `hashlib` module.

use std::any::Any;

use sha2::{Digest, Sha256};

use crate::service::{Plugin, RunInfo};
use crate::star::attr::{self, Property};
use crate::star::{self, Args, Builtin, BuiltinDef, HasAttrs, Thread, Value};

pub const PLUGIN_ID: &str = "hashlib";

pub struct HashlibPlugin;

impl Plugin for HashlibPlugin {
    fn id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn create(&self, _run: &RunInfo) -> Value {
        Value::object(Module)
    }
}

#[derive(Debug)]
pub struct Module;

static BUILTINS: &[BuiltinDef] = &[
    BuiltinDef::sync("sha256", sha256),
    BuiltinDef::sync("sha256_digest", sha256_digest),
];

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

fn digest(fname: &str, args: &Args) -> star::Result<Vec<u8>> {
    args.expect(fname, 1, 1)?;
    let data: &[u8] = match &args.positional[0] {
        Value::String(s) => s.as_bytes(),
        Value::Bytes(b) => b,
        other => {
            return Err(star::Error::type_error(format!(
                "{}: want string or bytes, got {}",
                fname,
                other.type_name()
            )))
        }
    };
    Ok(Sha256::digest(data).to_vec())
}

/// Hex-encoded SHA-256 of a string (UTF-8) or bytes.
fn sha256(_t: &Thread, b: &Builtin, args: Args) -> star::Result<Value> {
    Ok(Value::String(hex::encode(digest(b.name, &args)?)))
}

fn sha256_digest(_t: &Thread, b: &Builtin, args: Args) -> star::Result<Value> {
    Ok(Value::Bytes(digest(b.name, &args)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_of_string_and_bytes_agree() {
        let thread = Thread::new("test");
        let builtin = Builtin::new(&BUILTINS[0]);
        let from_str = sha256(&thread, &builtin, Args::new(vec![Value::from("abc")])).unwrap();
        let from_bytes = sha256(&thread, &builtin, Args::new(vec![Value::Bytes(b"abc".to_vec())])).unwrap();
        assert_eq!(from_str, from_bytes);
        assert_eq!(
            from_str,
            Value::from("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn test_sha256_rejects_ints() {
        let thread = Thread::new("test");
        let builtin = Builtin::new(&BUILTINS[1]);
        assert!(sha256_digest(&thread, &builtin, Args::new(vec![Value::Int(1)])).is_err());
    }
}
