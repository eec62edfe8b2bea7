//! Conversion of typed functions into erased handlers.
//!
//! A workflow is any `Fn(Ctx, A1, .., An) -> impl Future<Output =
//! Result<R, WorkflowError>>`, an activity any `Fn(ActivityContext, A1, ..,
//! An)` returning a `Send` future. The conversion happens once, at
//! registration; the resulting handler decodes its payloads, checks arity,
//! calls the function and encodes the result.

use std::sync::Arc;

use futures::future::{BoxFuture, LocalBoxFuture};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ActivityContext;
use crate::codec::{DataConverter, Payload};
use crate::workflow::{Ctx, WorkflowError};

/// Encoded arguments of one invocation.
#[derive(Debug, Clone)]
pub struct Input {
    /// Registered name, used to attribute codec logging.
    pub name: String,
    pub payloads: Vec<Payload>,
    pub converter: DataConverter,
}

pub type WorkflowHandler =
    Arc<dyn Fn(Ctx, Input) -> LocalBoxFuture<'static, Result<Payload, WorkflowError>> + Send + Sync>;

pub type ActivityHandler =
    Arc<dyn Fn(ActivityContext, Input) -> BoxFuture<'static, Result<Payload, WorkflowError>> + Send + Sync>;

/// Decoding of a fixed-arity argument list.
pub trait FromPayloads: Sized {
    const ARITY: usize;

    fn from_payloads(converter: &DataConverter, call: &str, payloads: &[Payload]) -> Result<Self, WorkflowError>;
}

fn arity_error(call: &str, want: usize, got: usize) -> WorkflowError {
    WorkflowError::invalid_argument(format!("{}: got {} arguments, want {}", call, got, want))
}

pub trait WorkflowFn<Args>: Send + Sync + 'static {
    fn into_handler(self) -> WorkflowHandler;
}

pub trait ActivityFn<Args>: Send + Sync + 'static {
    fn into_handler(self) -> ActivityHandler;
}

macro_rules! impl_handlers {
    ($n:expr; $($ty:ident $var:ident),*) => {
        impl<$($ty: DeserializeOwned),*> FromPayloads for ($($ty,)*) {
            const ARITY: usize = $n;

            #[allow(unused_variables)]
            fn from_payloads(
                converter: &DataConverter,
                call: &str,
                payloads: &[Payload],
            ) -> Result<Self, WorkflowError> {
                match payloads {
                    [$($var),*] => Ok(($(converter.decode::<$ty>(call, $var)?,)*)),
                    _ => Err(arity_error(call, $n, payloads.len())),
                }
            }
        }

        impl<F, Fut, R, $($ty),*> WorkflowFn<($($ty,)*)> for F
        where
            F: Fn(Ctx, $($ty),*) -> Fut + Send + Sync + 'static,
            Fut: std::future::Future<Output = Result<R, WorkflowError>> + 'static,
            R: Serialize + 'static,
            $($ty: DeserializeOwned + 'static,)*
        {
            fn into_handler(self) -> WorkflowHandler {
                let f = Arc::new(self);
                Arc::new(move |ctx: Ctx, input: Input| -> LocalBoxFuture<'static, Result<Payload, WorkflowError>> {
                    let f = f.clone();
                    Box::pin(async move {
                        let ($($var,)*) =
                            <($($ty,)*)>::from_payloads(&input.converter, &input.name, &input.payloads)?;
                        let result = f(ctx, $($var),*).await?;
                        Ok(input.converter.encode(&input.name, &result)?)
                    })
                })
            }
        }

        impl<F, Fut, R, $($ty),*> ActivityFn<($($ty,)*)> for F
        where
            F: Fn(ActivityContext, $($ty),*) -> Fut + Send + Sync + 'static,
            Fut: std::future::Future<Output = Result<R, WorkflowError>> + Send + 'static,
            R: Serialize + 'static,
            $($ty: DeserializeOwned + Send + 'static,)*
        {
            fn into_handler(self) -> ActivityHandler {
                let f = Arc::new(self);
                Arc::new(move |ctx: ActivityContext, input: Input| -> BoxFuture<'static, Result<Payload, WorkflowError>> {
                    let decoded = <($($ty,)*)>::from_payloads(&input.converter, &input.name, &input.payloads);
                    let f = f.clone();
                    Box::pin(async move {
                        let ($($var,)*) = decoded?;
                        let result = f(ctx, $($var),*).await?;
                        Ok(input.converter.encode(&input.name, &result)?)
                    })
                })
            }
        }
    };
}

impl_handlers!(0;);
impl_handlers!(1; A1 a1);
impl_handlers!(2; A1 a1, A2 a2);
impl_handlers!(3; A1 a1, A2 a2, A3 a3);
impl_handlers!(4; A1 a1, A2 a2, A3 a3, A4 a4);
impl_handlers!(5; A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_handlers!(6; A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_decoding_checks_arity_and_types() {
        let converter = DataConverter::new();
        let payloads = vec![
            converter.encode("t", &"foo").unwrap(),
            converter.encode("t", &100).unwrap(),
        ];

        let (s, n) = <(String, i64)>::from_payloads(&converter, "t", &payloads).unwrap();
        assert_eq!((s.as_str(), n), ("foo", 100));

        let err = <(String,)>::from_payloads(&converter, "t", &payloads).unwrap_err();
        assert_eq!(err.reason(), crate::workflow::INVALID_ARGUMENT);

        let err = <(i64, i64)>::from_payloads(&converter, "t", &payloads).unwrap_err();
        assert!(matches!(err, WorkflowError::Codec(_)));
    }
}
