//! Metadata propagation through engine request headers.

use std::rc::Rc;

use crate::engine::{Context, ContextPropagator, Headers};
use crate::workflow::Metadata;

/// Context value key under which [`Metadata`] is stored.
pub(crate) const METADATA_KEY: &str = "starflow.metadata";

/// Writes each metadata entry as one header and reads them back on the
/// receiving side.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadersContextPropagator;

impl ContextPropagator for HeadersContextPropagator {
    fn inject(&self, ctx: &Context, headers: &mut Headers) {
        if let Some(metadata) = metadata(ctx) {
            for (key, value) in metadata {
                headers.insert(key, value.into_bytes());
            }
        }
    }

    fn extract(&self, ctx: Context, headers: &Headers) -> Context {
        let metadata = metadata_from_headers(headers);
        if metadata.is_empty() {
            return ctx;
        }
        ctx.with_value(METADATA_KEY, Rc::new(metadata))
    }
}

pub(crate) fn metadata(ctx: &Context) -> Option<Metadata> {
    ctx.value(METADATA_KEY)
        .and_then(|value| value.downcast_ref::<Metadata>().cloned())
}

pub(crate) fn metadata_from_headers(headers: &Headers) -> Metadata {
    headers
        .iter()
        .filter_map(|(key, value)| match String::from_utf8(value.clone()) {
            Ok(value) => Some((key.clone(), value)),
            Err(_) => {
                tracing::warn!(header = %key, "dropping non UTF-8 header");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn test_headers_map_one_to_one() {
        let headers: Headers = btreemap! {
            "tenant".to_string() => b"acme".to_vec(),
            "trace".to_string() => b"abc123".to_vec(),
            "blob".to_string() => vec![0xff, 0xfe],
        };
        let metadata = metadata_from_headers(&headers);
        assert_eq!(
            metadata,
            btreemap! {
                "tenant".to_string() => "acme".to_string(),
                "trace".to_string() => "abc123".to_string(),
            }
        );
    }
}
