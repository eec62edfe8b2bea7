//! Serde support for script values.
//!
//! Values cross the engine boundary as payloads. Scalars, strings and lists
//! encode as plain JSON so host activities can take ordinary typed
//! arguments; tuples, dicts and bytes are wrapped as `{"t": .., "v": ..}` so
//! they survive a round trip unchanged. Any plain JSON document decodes into
//! the closest script value.

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;

use super::error::{Error, Result};
use super::value::{Key, Value};

const TAG: &str = "t";
const CONTENT: &str = "v";

struct Tagged<'a, T: ?Sized>(&'static str, &'a T);

impl<T: Serialize + ?Sized> Serialize for Tagged<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(TAG, self.0)?;
        map.serialize_entry(CONTENT, self.1)?;
        map.end()
    }
}

struct Seq<'a>(&'a [Value]);

impl Serialize for Seq<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for item in self.0 {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::None => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Bytes(b) => Tagged("Bytes", b).serialize(serializer),
            Value::List(l) => Seq(&l.borrow()).serialize(serializer),
            Value::Tuple(t) => Tagged("Tuple", &Seq(t)).serialize(serializer),
            Value::Dict(d) => {
                let pairs: Vec<(Value, Value)> = d
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.to_value(), v.clone()))
                    .collect();
                Tagged("Dict", &pairs).serialize(serializer)
            }
            other => Err(serde::ser::Error::custom(format!(
                "cannot encode value of type {}",
                other.type_name()
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        from_wire(json).map_err(serde::de::Error::custom)
    }
}

/// Decode the lossless wire form, falling back to plain JSON.
fn from_wire(json: Json) -> Result<Value> {
    match json {
        Json::Array(items) => Ok(Value::list(items.into_iter().map(from_wire).collect::<Result<_>>()?)),
        Json::Object(mut map) if map.len() == 2 && map.contains_key(CONTENT) => {
            let tag = map.get(TAG).and_then(Json::as_str).map(str::to_string);
            match tag.as_deref() {
                Some(tag @ ("Tuple" | "Dict" | "Bytes")) => {
                    let content = map.remove(CONTENT).unwrap_or(Json::Null);
                    from_tagged(tag, content)
                }
                _ => from_json(Json::Object(map)),
            }
        }
        other => from_json(other),
    }
}

fn from_tagged(tag: &str, content: Json) -> Result<Value> {
    let Json::Array(items) = content else {
        return Err(Error::value(format!("malformed {} encoding", tag)));
    };
    match tag {
        "Tuple" => Ok(Value::tuple(items.into_iter().map(from_wire).collect::<Result<_>>()?)),
        "Bytes" => {
            let bytes = items
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(|| Error::value("malformed Bytes encoding"))?;
            Ok(Value::Bytes(bytes))
        }
        _ => {
            let mut map: IndexMap<Key, Value> = IndexMap::new();
            for pair in items {
                match pair {
                    Json::Array(mut kv) if kv.len() == 2 => {
                        let v = from_wire(kv.pop().unwrap_or(Json::Null))?;
                        let k = from_wire(kv.pop().unwrap_or(Json::Null))?;
                        map.insert(k.to_key()?, v);
                    }
                    _ => return Err(Error::value("malformed Dict encoding")),
                }
            }
            Ok(Value::dict(map))
        }
    }
}

/* ===================== Plain JSON ===================== */

/// Convert a value into plain JSON. Tuples become arrays; dict keys must be
/// strings.
pub fn to_json(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| Error::value(format!("cannot encode {} as JSON", f)))?,
        Value::String(s) => Json::String(s.clone()),
        Value::List(l) => Json::Array(l.borrow().iter().map(to_json).collect::<Result<_>>()?),
        Value::Tuple(t) => Json::Array(t.iter().map(to_json).collect::<Result<_>>()?),
        Value::Dict(d) => {
            let mut map = serde_json::Map::new();
            for (k, v) in d.borrow().iter() {
                match k {
                    Key::String(s) => {
                        map.insert(s.clone(), to_json(v)?);
                    }
                    other => {
                        return Err(Error::type_error(format!(
                            "JSON object keys must be strings, got {}",
                            other.to_value().type_name()
                        )))
                    }
                }
            }
            Json::Object(map)
        }
        other => {
            return Err(Error::type_error(format!(
                "cannot encode value of type {} as JSON",
                other.type_name()
            )))
        }
    })
}

/// Convert plain JSON into a value. Objects become dicts, arrays lists.
pub fn from_json(json: Json) -> Result<Value> {
    Ok(match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::list(items.into_iter().map(from_json).collect::<Result<_>>()?),
        Json::Object(map) => {
            let mut out = IndexMap::new();
            for (k, v) in map {
                out.insert(Key::String(k), from_json(v)?);
            }
            Value::dict(out)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_survives_encoding() {
        let v = Value::tuple(vec![Value::from("foo"), Value::Int(100)]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"t":"Tuple","v":["foo",100]}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back.repr(), "(\"foo\", 100)");
    }

    #[test]
    fn test_scalars_and_lists_are_plain() {
        let v = Value::list(vec![Value::Int(1), Value::Float(2.5), Value::None, Value::from("x")]);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"[1,2.5,null,"x"]"#);
        let s: String = serde_json::from_str(&serde_json::to_string(&Value::from("hi")).unwrap()).unwrap();
        assert_eq!(s, "hi");
    }

    #[test]
    fn test_dicts_and_bytes_round_trip() {
        let v = Value::dict_from(vec![
            (Value::Int(1), Value::Bytes(vec![0, 255])),
            (Value::from("k"), Value::tuple(vec![])),
        ])
        .unwrap();
        let back: Value = serde_json::from_str(&serde_json::to_string(&v).unwrap()).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_plain_json_is_accepted() {
        let back: Value = serde_json::from_str(r#"{"a": [1, 2.5]}"#).unwrap();
        assert_eq!(back.repr(), "{\"a\": [1, 2.5]}");
    }

    #[test]
    fn test_functions_do_not_encode() {
        let v = Value::list(vec![crate::star::universe::lookup("len").unwrap()]);
        assert!(serde_json::to_string(&v).is_err());
    }

    #[test]
    fn test_to_json_rejects_non_string_keys() {
        let v = Value::dict_from(vec![(Value::Int(1), Value::None)]).unwrap();
        assert!(to_json(&v).is_err());
    }
}
