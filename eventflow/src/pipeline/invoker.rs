//! Adapters turning plain async functions into stage invokers.
//!
//! A stage is any `Fn(P1, .., Pn) -> impl Future<Output = anyhow::Result<()>>`
//! whose parameters implement [`HandlerParam`]. The parameter list is read
//! once at build time and every call receives one resolved [`Argument`] per
//! parameter.

use super::next::Next;
use super::parameter::{ParameterKind, ParameterSpec};
use crate::cancellation::CancellationToken;
use crate::context::RunContext;
use crate::core::AnyValue;
use crate::errors::PipelineError;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// The future returned by a stage.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A type-erased stage entry point.
pub type HandlerInvoker =
    Arc<dyn Fn(Vec<Argument>) -> Result<HandlerFuture, PipelineError> + Send + Sync>;

/// A resolved argument for one stage parameter.
#[derive(Clone)]
pub enum Argument {
    /// A value found in services, the context bag, or a declared default.
    Value(AnyValue),
    /// Nothing was found and the rule substituted an absent default.
    Missing,
    /// The continuation to the next stage.
    Next(Next),
    /// The run's cancellation token.
    Cancellation(CancellationToken),
    /// The run's context bag.
    Context(RunContext),
}

impl std::fmt::Debug for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Value(..)"),
            Self::Missing => f.write_str("Missing"),
            Self::Next(_) => f.write_str("Next"),
            Self::Cancellation(_) => f.write_str("Cancellation"),
            Self::Context(_) => f.write_str("Context"),
        }
    }
}

/// A type usable as a stage parameter.
pub trait HandlerParam: Sized + Send + 'static {
    /// Describes how the parameter is supplied.
    fn spec() -> ParameterSpec;

    /// Extracts the parameter from its resolved argument.
    fn from_argument(argument: Argument) -> Option<Self>;
}

impl HandlerParam for Next {
    fn spec() -> ParameterSpec {
        ParameterSpec::ambient::<Self>(ParameterKind::Continuation)
    }

    fn from_argument(argument: Argument) -> Option<Self> {
        match argument {
            Argument::Next(next) => Some(next),
            _ => None,
        }
    }
}

impl HandlerParam for CancellationToken {
    fn spec() -> ParameterSpec {
        ParameterSpec::ambient::<Self>(ParameterKind::Cancellation)
    }

    fn from_argument(argument: Argument) -> Option<Self> {
        match argument {
            Argument::Cancellation(token) => Some(token),
            _ => None,
        }
    }
}

impl HandlerParam for RunContext {
    fn spec() -> ParameterSpec {
        ParameterSpec::ambient::<Self>(ParameterKind::RunContext)
    }

    fn from_argument(argument: Argument) -> Option<Self> {
        match argument {
            Argument::Context(context) => Some(context),
            _ => None,
        }
    }
}

impl<T: Send + Sync + 'static> HandlerParam for Arc<T> {
    fn spec() -> ParameterSpec {
        ParameterSpec::required::<T>()
    }

    fn from_argument(argument: Argument) -> Option<Self> {
        match argument {
            Argument::Value(value) => value.downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl<T: Send + Sync + 'static> HandlerParam for Option<Arc<T>> {
    fn spec() -> ParameterSpec {
        ParameterSpec::optional::<T>()
    }

    fn from_argument(argument: Argument) -> Option<Self> {
        match argument {
            Argument::Value(value) => value.downcast::<T>().ok().map(Some),
            Argument::Missing => Some(None),
            _ => None,
        }
    }
}

/// An async function usable as a stage.
///
/// Implemented for functions and closures of up to eight [`HandlerParam`]
/// arguments returning a `Send` future of `anyhow::Result<()>`.
pub trait HandlerFn<Args>: Send + Sync + 'static {
    /// Returns the parameter list in declaration order.
    fn parameters() -> Vec<ParameterSpec>;

    /// Calls the function with one argument per parameter.
    fn call(&self, arguments: Vec<Argument>, stage: &str) -> Result<HandlerFuture, PipelineError>;
}

fn take<P: HandlerParam>(
    arguments: &mut std::vec::IntoIter<Argument>,
    position: &mut usize,
    stage: &str,
) -> Result<P, PipelineError> {
    let current = *position;
    *position += 1;
    arguments
        .next()
        .and_then(P::from_argument)
        .ok_or_else(|| PipelineError::ArgumentMismatch {
            stage: stage.to_string(),
            position: current,
            expected: std::any::type_name::<P>(),
        })
}

macro_rules! impl_handler_fn {
    ($($param:ident),*) => {
        impl<F, Fut, $($param,)*> HandlerFn<($($param,)*)> for F
        where
            F: Fn($($param),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
            $($param: HandlerParam,)*
        {
            fn parameters() -> Vec<ParameterSpec> {
                vec![$($param::spec()),*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(
                &self,
                arguments: Vec<Argument>,
                stage: &str,
            ) -> Result<HandlerFuture, PipelineError> {
                let mut arguments = arguments.into_iter();
                let mut position = 0usize;
                $(let $param = take::<$param>(&mut arguments, &mut position, stage)?;)*
                Ok(Box::pin((self)($($param),*)))
            }
        }
    };
}

impl_handler_fn!();
impl_handler_fn!(P1);
impl_handler_fn!(P1, P2);
impl_handler_fn!(P1, P2, P3);
impl_handler_fn!(P1, P2, P3, P4);
impl_handler_fn!(P1, P2, P3, P4, P5);
impl_handler_fn!(P1, P2, P3, P4, P5, P6);
impl_handler_fn!(P1, P2, P3, P4, P5, P6, P7);
impl_handler_fn!(P1, P2, P3, P4, P5, P6, P7, P8);

/// Erases a [`HandlerFn`] into a [`HandlerInvoker`] bound to a stage name.
pub fn into_invoker<H, Args>(handler: H, stage: String) -> HandlerInvoker
where
    H: HandlerFn<Args>,
    Args: 'static,
{
    Arc::new(move |arguments| handler.call(arguments, &stage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parameter::ParameterKind;

    struct Greeting(&'static str);

    fn kinds<Args, H: HandlerFn<Args>>(_: &H) -> Vec<(ParameterKind, bool)> {
        H::parameters().iter().map(|p| (p.kind, p.optional)).collect()
    }

    #[test]
    fn test_parameter_kinds_are_tagged() {
        let handler = |_: Next, _: CancellationToken, _: RunContext, _: Arc<Greeting>, _: Option<Arc<u32>>| async {
            anyhow::Ok(())
        };

        assert_eq!(
            kinds(&handler),
            vec![
                (ParameterKind::Continuation, false),
                (ParameterKind::Cancellation, false),
                (ParameterKind::RunContext, false),
                (ParameterKind::Resolved, false),
                (ParameterKind::Resolved, true),
            ]
        );
    }

    #[tokio::test]
    async fn test_call_passes_resolved_values() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = move |greeting: Arc<Greeting>, count: Option<Arc<u32>>| {
            let sink = sink.clone();
            async move {
                sink.lock().push(format!("{}:{:?}", greeting.0, count.as_deref()));
                anyhow::Ok(())
            }
        };
        let invoker = into_invoker(handler, "greet".to_string());

        invoker(vec![Argument::Value(Arc::new(Greeting("hi"))), Argument::Missing])
            .unwrap()
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec!["hi:None".to_string()]);
    }

    #[test]
    fn test_mismatched_argument_is_reported() {
        let invoker = into_invoker(|_: Arc<Greeting>| async { anyhow::Ok(()) }, "greet".to_string());

        let result = invoker(vec![Argument::Value(Arc::new(5_u32))]);

        assert!(matches!(
            result,
            Err(PipelineError::ArgumentMismatch { position: 0, .. })
        ));
    }
}
