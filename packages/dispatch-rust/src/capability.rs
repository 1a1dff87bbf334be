//! Backing capabilities and their operation tables.
//!
//! A [`Capability`] is the implementation an exchange is ultimately dispatched
//! to. Its exposed operations are declared once, at registration time, as an
//! explicit table of [`OperationDescriptor`]s. Resolution filters that table;
//! nothing is introspected at exchange time.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use relaybus_core::{FailureSide, Payload, TypeDescriptor};

/// Future returned by an operation invoker. `Ok(None)` is a void return.
pub type InvokeFuture = Pin<Box<dyn Future<Output = Result<Option<Payload>, InvokeError>> + Send>>;

// ---------------------------------------------------------------------------
// InvokeError
// ---------------------------------------------------------------------------

/// Failure reported by an operation invoker.
///
/// Target-side failures (the operation body returned an error) are kept
/// distinct from framework-side failures (the arguments did not fit).
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("expected {expected} arguments, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("argument {index} is not a `{expected}`")]
    ArgumentType { index: usize, expected: &'static str },

    #[error(transparent)]
    Target(anyhow::Error),
}

impl InvokeError {
    #[must_use]
    pub fn side(&self) -> FailureSide {
        match self {
            Self::Target(_) => FailureSide::Target,
            Self::Arity { .. } | Self::ArgumentType { .. } => FailureSide::Framework,
        }
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Calls an operation with a positional argument list.
pub trait Invoker: Send + Sync {
    fn invoke(&self, args: Vec<Payload>) -> InvokeFuture;
}

impl<F> Invoker for F
where
    F: Fn(Vec<Payload>) -> InvokeFuture + Send + Sync,
{
    fn invoke(&self, args: Vec<Payload>) -> InvokeFuture {
        self(args)
    }
}

// ---------------------------------------------------------------------------
// OperationDescriptor
// ---------------------------------------------------------------------------

/// One exposed operation: name, parameter types, return type and invoker.
pub struct OperationDescriptor {
    name: String,
    params: Vec<TypeDescriptor>,
    returns: Option<TypeDescriptor>,
    invoker: Arc<dyn Invoker>,
}

impl OperationDescriptor {
    pub fn new(
        name: impl Into<String>,
        params: Vec<TypeDescriptor>,
        returns: Option<TypeDescriptor>,
        invoker: impl Invoker + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            returns,
            invoker: Arc::new(invoker),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn params(&self) -> &[TypeDescriptor] {
        &self.params
    }

    /// Declared return type; `None` for operations without a result.
    #[must_use]
    pub fn returns(&self) -> Option<&TypeDescriptor> {
        self.returns.as_ref()
    }

    /// Whether the arguments fit this operation's parameter list exactly.
    #[must_use]
    pub fn accepts(&self, args: &[Payload]) -> bool {
        args.len() == self.params.len()
            && args.iter().zip(&self.params).all(|(arg, ty)| arg.matches(ty))
    }

    /// Invokes the operation. Arity is checked before the invoker runs.
    pub fn invoke(&self, args: Vec<Payload>) -> InvokeFuture {
        if args.len() != self.params.len() {
            let err = InvokeError::Arity {
                expected: self.params.len(),
                actual: args.len(),
            };
            return Box::pin(async move { Err(err) });
        }
        self.invoker.invoke(args)
    }
}

impl fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<_> = self.params.iter().map(TypeDescriptor::type_name).collect();
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("params", &params)
            .field("returns", &self.returns.map(|r| r.type_name()))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A backing implementation and its exposed operation set.
#[derive(Debug)]
pub struct Capability {
    name: String,
    operations: Vec<Arc<OperationDescriptor>>,
}

impl Capability {
    /// Starts declaring a capability named `name`.
    pub fn builder(name: impl Into<String>) -> CapabilityBuilder {
        CapabilityBuilder {
            name: name.into(),
            operations: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All exposed operations, in declaration order.
    #[must_use]
    pub fn operations(&self) -> &[Arc<OperationDescriptor>] {
        &self.operations
    }

    /// Exposed operations named `name`.
    pub fn operations_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Arc<OperationDescriptor>> + 'a {
        self.operations.iter().filter(move |op| op.name() == name)
    }
}

/// Builder declaring a capability's operation table.
pub struct CapabilityBuilder {
    name: String,
    operations: Vec<Arc<OperationDescriptor>>,
}

impl CapabilityBuilder {
    /// Adds a fully described operation.
    #[must_use]
    pub fn operation(mut self, descriptor: OperationDescriptor) -> Self {
        self.operations.push(Arc::new(descriptor));
        self
    }

    /// Adds a synchronous single-argument operation returning `R`.
    #[must_use]
    pub fn unary<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: Any + Clone + Send + Sync,
        R: Any + Send + Sync,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let invoker = move |args: Vec<Payload>| -> InvokeFuture {
            let result = single_arg::<A>(&args).and_then(|arg| {
                f(arg)
                    .map(|r| Some(Payload::new(r)))
                    .map_err(InvokeError::Target)
            });
            Box::pin(async move { result })
        };
        self.operation(OperationDescriptor::new(
            name,
            vec![TypeDescriptor::of::<A>()],
            Some(TypeDescriptor::of::<R>()),
            invoker,
        ))
    }

    /// Adds an asynchronous single-argument operation returning `R`.
    #[must_use]
    pub fn unary_async<A, R, F, Fut>(self, name: &str, f: F) -> Self
    where
        A: Any + Clone + Send + Sync,
        R: Any + Send + Sync,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let invoker = move |args: Vec<Payload>| -> InvokeFuture {
            match single_arg::<A>(&args) {
                Ok(arg) => {
                    let fut = f(arg);
                    Box::pin(async move {
                        fut.await
                            .map(|r| Some(Payload::new(r)))
                            .map_err(InvokeError::Target)
                    })
                }
                Err(err) => Box::pin(async move { Err(err) }),
            }
        };
        self.operation(OperationDescriptor::new(
            name,
            vec![TypeDescriptor::of::<A>()],
            Some(TypeDescriptor::of::<R>()),
            invoker,
        ))
    }

    /// Adds a synchronous single-argument operation with no result.
    #[must_use]
    pub fn one_way<A, F>(self, name: &str, f: F) -> Self
    where
        A: Any + Clone + Send + Sync,
        F: Fn(A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let invoker = move |args: Vec<Payload>| -> InvokeFuture {
            let result =
                single_arg::<A>(&args).and_then(|arg| f(arg).map(|()| None).map_err(InvokeError::Target));
            Box::pin(async move { result })
        };
        self.operation(OperationDescriptor::new(
            name,
            vec![TypeDescriptor::of::<A>()],
            None,
            invoker,
        ))
    }

    #[must_use]
    pub fn build(self) -> Capability {
        Capability {
            name: self.name,
            operations: self.operations,
        }
    }
}

/// Extracts the single `A` argument of a unary operation.
fn single_arg<A: Any + Clone>(args: &[Payload]) -> Result<A, InvokeError> {
    match args {
        [arg] => arg.cloned::<A>().ok_or(InvokeError::ArgumentType {
            index: 0,
            expected: std::any::type_name::<A>(),
        }),
        _ => Err(InvokeError::Arity {
            expected: 1,
            actual: args.len(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
