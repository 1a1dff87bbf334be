//! Operation resolution against a capability's operation table.
//!
//! Resolution is stateless and runs once per exchange. Both strategies
//! demand exactly one candidate; anything else is `OperationNotResolved`.

use std::sync::Arc;

use relaybus_core::{DispatchError, ExchangeProperties, MessageExchange, Payload};

use crate::capability::{Capability, OperationDescriptor};

/// How an exchange without an operation name is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// The operation name is required.
    #[default]
    ByName,
    /// Fall back to matching the payload against parameter lists.
    ByNameThenShape,
}

/// Finds the single operation named `name`.
///
/// # Errors
///
/// Returns `DispatchError::OperationNotResolved` unless exactly one exposed
/// operation carries that name.
pub fn by_name<'a>(
    capability: &'a Capability,
    name: &'a str,
) -> Result<&'a Arc<OperationDescriptor>, DispatchError> {
    single(capability, name, capability.operations_named(name))
}

/// Finds the single operation whose parameter list accepts `args`.
///
/// # Errors
///
/// Returns `DispatchError::OperationNotResolved` when no operation or more
/// than one operation accepts the arguments.
pub fn by_shape<'a>(
    capability: &'a Capability,
    args: &[Payload],
) -> Result<&'a Arc<OperationDescriptor>, DispatchError> {
    let shape = describe_shape(args);
    single(
        capability,
        &shape,
        capability.operations().iter().filter(|op| op.accepts(args)),
    )
}

/// Argument list carried by `payload`: the elements of a sequence, otherwise
/// the payload itself.
#[must_use]
pub fn arguments_of(payload: &Payload) -> Vec<Payload> {
    match payload.as_sequence() {
        Some(items) => items.to_vec(),
        None => vec![payload.clone()],
    }
}

/// Resolves the operation targeted by `exchange`.
///
/// # Errors
///
/// - `DispatchError::OperationNameMissing` if no name is declared and
///   `strategy` is [`ResolutionStrategy::ByName`].
/// - `DispatchError::OperationNotResolved` if resolution does not yield
///   exactly one operation.
pub fn resolve(
    capability: &Capability,
    exchange: &dyn MessageExchange,
    strategy: ResolutionStrategy,
) -> Result<Arc<OperationDescriptor>, DispatchError> {
    let resolved = match (exchange.operation_name(), strategy) {
        (Some(name), _) => by_name(capability, name)?,
        (None, ResolutionStrategy::ByNameThenShape) => {
            let args = arguments_of(exchange.message().content());
            by_shape(capability, &args)?
        }
        (None, ResolutionStrategy::ByName) => {
            return Err(DispatchError::OperationNameMissing {
                request_id: exchange.request_id().to_string(),
            })
        }
    };
    tracing::debug!(
        service = capability.name(),
        operation = resolved.name(),
        request_id = exchange.request_id(),
        "operation resolved"
    );
    Ok(Arc::clone(resolved))
}

fn single<'a>(
    capability: &Capability,
    wanted: &str,
    mut candidates: impl Iterator<Item = &'a Arc<OperationDescriptor>>,
) -> Result<&'a Arc<OperationDescriptor>, DispatchError> {
    match (candidates.next(), candidates.next()) {
        (Some(op), None) => Ok(op),
        (first, second) => {
            let count = usize::from(first.is_some()) + usize::from(second.is_some()) + candidates.count();
            Err(DispatchError::OperationNotResolved {
                service: capability.name().to_string(),
                operation: wanted.to_string(),
                candidates: count,
            })
        }
    }
}

fn describe_shape(args: &[Payload]) -> String {
    let types: Vec<&str> = args
        .iter()
        .map(|arg| arg.type_name().unwrap_or("null"))
        .collect();
    format!("({})", types.join(", "))
}
