//! Handlers and ordered handler chains.
//!
//! A chain passes an exchange's message event through its handlers in
//! order. The first handler error stops traversal; [`HandlerChain::dispatch`]
//! records it as a fault on the exchange and then delivers the fault event to
//! every handler, again in order. A chain is itself a [`Handler`], so chains
//! nest.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use relaybus_core::{DispatchError, ExchangeState, Fault, MessageExchange};

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// A processing step observing an exchange's message and fault events.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Processes the exchange's current message.
    ///
    /// # Errors
    ///
    /// Returns the `DispatchError` that should fault the exchange.
    async fn handle_message(&self, exchange: &mut dyn MessageExchange) -> Result<(), DispatchError>;

    /// Observes a fault recorded on the exchange. Default is a no-op.
    async fn handle_fault(&self, _exchange: &mut dyn MessageExchange) {}
}

// ---------------------------------------------------------------------------
// HandlerChain
// ---------------------------------------------------------------------------

/// Ordered, named sequence of handlers.
#[derive(Default, Clone)]
pub struct HandlerChain {
    handlers: Vec<(String, Arc<dyn Handler>)>,
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("handlers", &self.names())
            .finish()
    }
}

impl HandlerChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `handler` at the front of the chain.
    pub fn add_first(&mut self, name: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        self.handlers.insert(0, (name.into(), Arc::new(handler)));
        self
    }

    /// Appends `handler` to the end of the chain.
    pub fn add_last(&mut self, name: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        self.handlers.push((name.into(), Arc::new(handler)));
        self
    }

    /// Removes the first handler named `name`.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Handler>> {
        let pos = self.handlers.iter().position(|(n, _)| n == name)?;
        Some(self.handlers.remove(pos).1)
    }

    /// Replaces the first handler named `name`, returning the previous one.
    pub fn replace(
        &mut self,
        name: &str,
        handler: impl Handler + 'static,
    ) -> Option<Arc<dyn Handler>> {
        let slot = self.handlers.iter_mut().find(|(n, _)| n == name)?;
        Some(std::mem::replace(&mut slot.1, Arc::new(handler)))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.iter().find(|(n, _)| n == name).map(|(_, h)| h)
    }

    /// Handler names in chain order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the exchange through the chain as the outermost entry point.
    ///
    /// A handler error is recorded as a fault on the exchange, after which
    /// each handler's `handle_fault` runs once, in chain order.
    pub async fn dispatch(&self, exchange: &mut dyn MessageExchange) {
        let Err(error) = self.handle_message(exchange).await else {
            return;
        };

        tracing::warn!(
            request_id = exchange.request_id(),
            service = exchange.service(),
            code = error.code(),
            error = %error,
            "exchange failed"
        );
        let fault = Fault::new(exchange.request_id(), error);
        if let Err(closed) = exchange.send_fault(fault) {
            // A handler already terminated the exchange; nothing left to fault.
            tracing::debug!(error = %closed, "fault not recorded");
            return;
        }
        self.handle_fault(exchange).await;
    }
}

#[async_trait]
impl Handler for HandlerChain {
    async fn handle_message(&self, exchange: &mut dyn MessageExchange) -> Result<(), DispatchError> {
        for (name, handler) in &self.handlers {
            tracing::trace!(handler = name.as_str(), request_id = exchange.request_id(), "message");
            handler.handle_message(exchange).await?;
            if exchange.state() == ExchangeState::Faulted {
                break;
            }
        }
        Ok(())
    }

    async fn handle_fault(&self, exchange: &mut dyn MessageExchange) {
        for (_, handler) in &self.handlers {
            handler.handle_fault(exchange).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
