//! Lookup table from handler references to callables.
//!
//! A handler's call shape is fixed when it is registered: functions taking
//! `(event, context)` signal completion through the context, functions taking
//! `(event, context, done)` signal it through `done`. The shape is picked by
//! the compiler from the function's parameter list via [`IntoHandlerShape`].

use std::{collections::BTreeMap, fmt, future::Future, pin::Pin, sync::Arc};

use serde_json::Value;

use crate::{
    completion::Done,
    context::InvocationContext,
    error::{HarnessError, HarnessResult},
    loader::HandlerReference,
};

/// The future returned by a handler. An `Err` is reported as a failed
/// invocation unless the handler already completed.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type ContextHandler = dyn Fn(Value, InvocationContext) -> HandlerFuture + Send + Sync;
type CallbackHandler = dyn Fn(Value, InvocationContext, Done) -> HandlerFuture + Send + Sync;

#[derive(Clone)]
pub enum HandlerShape {
    /// `(event, context)`: completes via `context.succeed` / `context.fail`.
    TwoArg(Arc<ContextHandler>),
    /// `(event, context, done)`: completes via `done`.
    ThreeArg(Arc<CallbackHandler>),
}

impl HandlerShape {
    pub fn arity(&self) -> usize {
        match self {
            Self::TwoArg(_) => 2,
            Self::ThreeArg(_) => 3,
        }
    }

    pub(crate) fn call(&self, event: Value, context: InvocationContext) -> HandlerFuture {
        match self {
            Self::TwoArg(handler) => handler(event, context),
            Self::ThreeArg(handler) => {
                let done = Done::new(context.completion().clone());
                handler(event, context, done)
            }
        }
    }
}

impl fmt::Debug for HandlerShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TwoArg(_) => f.write_str("TwoArg"),
            Self::ThreeArg(_) => f.write_str("ThreeArg"),
        }
    }
}

/// Conversion from an async function into a [`HandlerShape`]. `Args` is the
/// parameter tuple and only serves to keep the two impls apart.
pub trait IntoHandlerShape<Args> {
    fn into_shape(self) -> HandlerShape;
}

impl<F, Fut> IntoHandlerShape<(Value, InvocationContext)> for F
where
    F: Fn(Value, InvocationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn into_shape(self) -> HandlerShape {
        let handler = self;
        HandlerShape::TwoArg(Arc::new(
            move |event: Value, context: InvocationContext| -> HandlerFuture {
                Box::pin(handler(event, context))
            },
        ))
    }
}

impl<F, Fut> IntoHandlerShape<(Value, InvocationContext, Done)> for F
where
    F: Fn(Value, InvocationContext, Done) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn into_shape(self) -> HandlerShape {
        let handler = self;
        HandlerShape::ThreeArg(Arc::new(
            move |event: Value, context: InvocationContext, done: Done| -> HandlerFuture {
                Box::pin(handler(event, context, done))
            },
        ))
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    modules: BTreeMap<String, BTreeMap<String, HandlerShape>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` as `module.symbol`, replacing any previous entry.
    pub fn register<Args, H>(&mut self, module: &str, symbol: &str, handler: H) -> &mut Self
    where
        H: IntoHandlerShape<Args>,
    {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(symbol.to_string(), handler.into_shape());
        self
    }

    pub fn resolve(&self, reference: &HandlerReference) -> HarnessResult<&HandlerShape> {
        let symbols = self.modules.get(reference.module()).ok_or_else(|| {
            HarnessError::invalid_reference(
                reference.to_string(),
                format!("no module named `{}`", reference.module()),
            )
        })?;

        symbols.get(reference.symbol()).ok_or_else(|| {
            HarnessError::invalid_reference(
                reference.to_string(),
                format!(
                    "module `{}` has no handler named `{}`",
                    reference.module(),
                    reference.symbol()
                ),
            )
        })
    }

    /// Every registered reference with its handler's arity, in sorted order.
    pub fn references(&self) -> impl Iterator<Item = (HandlerReference, usize)> + '_ {
        self.modules.iter().flat_map(|(module, symbols)| {
            symbols
                .iter()
                .map(move |(symbol, shape)| (HandlerReference::new(module, symbol), shape.arity()))
        })
    }
}
