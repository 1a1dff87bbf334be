//! The invocation step: resolves, converts, invokes and responds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relaybus_core::{
    DispatchError, ExchangePattern, ExchangeProperties, Message, MessageExchange, Payload,
};
use tracing::Instrument;

use crate::capability::{Capability, InvokeError, OperationDescriptor};
use crate::chain::Handler;
use crate::resolve::{self, ResolutionStrategy};
use crate::transform::TransformRegistry;

/// Handler dispatching an exchange to one operation of its backing capability.
///
/// Inbound content is converted from the exchange's declared inbound format
/// to the operation's parameter format. For request/response exchanges the
/// return value is converted to the declared outbound format, if any, and
/// sent as the response.
pub struct InvocationStep {
    capability: Arc<Capability>,
    transforms: Arc<TransformRegistry>,
    strategy: ResolutionStrategy,
    deadline: Option<Duration>,
}

impl InvocationStep {
    #[must_use]
    pub fn new(capability: Arc<Capability>, transforms: Arc<TransformRegistry>) -> Self {
        Self {
            capability,
            transforms,
            strategy: ResolutionStrategy::default(),
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Deadline applied when the exchange does not carry its own.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn capability(&self) -> &Arc<Capability> {
        &self.capability
    }

    fn arguments(
        &self,
        operation: &OperationDescriptor,
        exchange: &dyn MessageExchange,
    ) -> Result<Vec<Payload>, DispatchError> {
        let content = exchange.message().content();
        let mut args = match operation.params() {
            [param] if content.matches(param) => vec![content.clone()],
            _ => resolve::arguments_of(content),
        };
        // Inbound conversion only applies to a single argument.
        if let ([param], [arg], Some(from)) = (operation.params(), args.as_mut_slice(), exchange.in_format()) {
            let expected = param.format();
            if *from != expected {
                *arg = self.transforms.convert_from(arg.clone(), from, &expected)?;
            }
        }
        Ok(args)
    }

    async fn call(
        &self,
        operation: &OperationDescriptor,
        args: Vec<Payload>,
        deadline: Option<Duration>,
    ) -> Result<Option<Payload>, DispatchError> {
        let invocation = operation.invoke(args);
        let result = match deadline {
            Some(limit) => tokio::time::timeout(limit, invocation).await.map_err(|_| {
                DispatchError::DeadlineExceeded {
                    operation: operation.name().to_string(),
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }
            })?,
            None => invocation.await,
        };
        result.map_err(|err| {
            let side = err.side();
            let source = match err {
                InvokeError::Target(source) => source,
                other => anyhow::Error::new(other),
            };
            DispatchError::InvocationFailed {
                operation: operation.name().to_string(),
                side,
                source,
            }
        })
    }
}

#[async_trait]
impl Handler for InvocationStep {
    async fn handle_message(&self, exchange: &mut dyn MessageExchange) -> Result<(), DispatchError> {
        let operation = resolve::resolve(&self.capability, &*exchange, self.strategy)?;
        let args = self.arguments(&operation, &*exchange)?;
        let deadline = exchange.deadline().or(self.deadline);

        let span = tracing::debug_span!(
            "invoke",
            service = self.capability.name(),
            operation = operation.name(),
            request_id = exchange.request_id(),
        );
        let value = self.call(&operation, args, deadline).instrument(span).await?;

        if exchange.pattern() == ExchangePattern::OneWay {
            return Ok(());
        }
        let value = value.unwrap_or_else(Payload::null);
        let value = match exchange.out_format().cloned() {
            Some(to) if !value.is_null() => self.transforms.convert(value, &to)?,
            _ => value,
        };
        exchange.send(Message::new(value))
    }
}
