//! Payload codec shared by every layer that moves values through the engine.
//!
//! Engine requests and history only ever carry [`Payload`]s. The
//! [`DataConverter`] is the single place where typed values become payloads
//! and back; each conversion is traced with the name of the call it belongs
//! to (activity, workflow, result, query) so payload problems can be
//! attributed from the logs alone.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/* ===================== Payload ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Json,
    Binary,
}

/// An encoded value as it travels through engine requests and history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub encoding: Encoding,
    pub data: Vec<u8>,
}

impl Payload {
    pub fn json(data: Vec<u8>) -> Self {
        Self {
            encoding: Encoding::Json,
            data,
        }
    }

    pub fn binary(data: Vec<u8>) -> Self {
        Self {
            encoding: Encoding::Binary,
            data,
        }
    }

    /// The encoding of `()`; used for results that carry no value.
    pub fn unit() -> Self {
        Self::json(b"null".to_vec())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/* ===================== Errors ===================== */

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum CodecError {
    #[error("failed to encode {call}: {message}")]
    Encode { call: String, message: String },

    #[error("failed to decode {call}: {message}")]
    Decode { call: String, message: String },
}

/* ===================== Converter ===================== */

/// JSON data converter with call-attributed tracing.
#[derive(Debug, Clone, Default)]
pub struct DataConverter {
    _private: (),
}

impl DataConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode<T: Serialize + ?Sized>(&self, call: &str, value: &T) -> Result<Payload, CodecError> {
        let data = serde_json::to_vec(value).map_err(|e| {
            tracing::debug!(call, error = %e, "payload encode failed");
            CodecError::Encode {
                call: call.to_string(),
                message: e.to_string(),
            }
        })?;
        tracing::trace!(call, bytes = data.len(), "encoded payload");
        Ok(Payload::json(data))
    }

    pub fn encode_all<T: Serialize>(&self, call: &str, values: &[T]) -> Result<Vec<Payload>, CodecError> {
        values.iter().map(|v| self.encode(call, v)).collect()
    }

    pub fn decode<T: DeserializeOwned>(&self, call: &str, payload: &Payload) -> Result<T, CodecError> {
        let bytes: &[u8] = match payload.encoding {
            Encoding::Json => &payload.data,
            Encoding::Binary => {
                // Raw bytes decode as a JSON byte array.
                let value = serde_json::to_vec(&payload.data).map_err(|e| CodecError::Decode {
                    call: call.to_string(),
                    message: e.to_string(),
                })?;
                return self.decode_json(call, &value);
            }
        };
        self.decode_json(call, bytes)
    }

    fn decode_json<T: DeserializeOwned>(&self, call: &str, bytes: &[u8]) -> Result<T, CodecError> {
        let value = serde_json::from_slice(bytes).map_err(|e| {
            tracing::debug!(call, error = %e, "payload decode failed");
            CodecError::Decode {
                call: call.to_string(),
                message: e.to_string(),
            }
        })?;
        tracing::trace!(call, bytes = bytes.len(), "decoded payload");
        Ok(value)
    }

    /// Materialize a payload as a raw byte buffer without interpreting it.
    pub fn to_bytes(&self, call: &str, payload: &Payload) -> Vec<u8> {
        tracing::trace!(call, bytes = payload.len(), "payload read as raw bytes");
        payload.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn test_encoding_does_not_depend_on_call_name() {
        let converter = DataConverter::new();
        let value = btreemap! { "a".to_string() => 1, "b".to_string() => 2 };

        let first = converter.encode("activity_a", &value).unwrap();
        let second = converter.encode("workflow_b", &value).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_type_mismatch_names_the_call() {
        let converter = DataConverter::new();
        let payload = converter.encode("plus", &"five").unwrap();

        let err = converter.decode::<i64>("plus", &payload).unwrap_err();
        match err {
            CodecError::Decode { call, .. } => assert_eq!(call, "plus"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_binary_payload_decodes_as_byte_vector() {
        let converter = DataConverter::new();
        let payload = Payload::binary(vec![1, 2, 3]);

        let bytes: Vec<u8> = converter.decode("raw", &payload).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(converter.to_bytes("raw", &payload), vec![1, 2, 3]);
    }
}
