//! Exchange routing: dispatches an `Exchange` to the handler chain bound to
//! its target service.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use relaybus_core::{DispatchError, Exchange, Fault, MessageExchange};
use tower::Service;

use super::config::{DispatchConfig, TransformMode};
use crate::capability::Capability;
use crate::chain::HandlerChain;
use crate::invoke::InvocationStep;
use crate::transform::{OperationTransformSelector, TransformRegistry, TransformStep};

/// Future returned by the router and the dispatch middleware.
pub type ExchangeFuture = Pin<Box<dyn Future<Output = Result<Exchange, Infallible>> + Send>>;

// ---------------------------------------------------------------------------
// ExchangeRouter
// ---------------------------------------------------------------------------

/// Routes exchanges to per-service handler chains by `service()` name.
///
/// The router never returns an error: every failure, including an unbound
/// service name, is recorded as a fault on the returned exchange. Clones
/// share the same route table, so services may be bound while the router is
/// in use.
#[derive(Clone, Default)]
pub struct ExchangeRouter {
    routes: Arc<DashMap<String, Arc<HandlerChain>>>,
}

impl ExchangeRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds every capability in `capabilities` under its map key.
    #[must_use]
    pub fn from_capabilities(
        capabilities: HashMap<String, Arc<Capability>>,
        transforms: &Arc<TransformRegistry>,
        config: &DispatchConfig,
    ) -> Self {
        let router = Self::new();
        for (name, capability) in capabilities {
            router.insert(name, build_service_chain(capability, transforms, config));
        }
        router
    }

    /// Binds `capability` under its own name, replacing any previous binding.
    pub fn bind(
        &self,
        capability: Arc<Capability>,
        transforms: &Arc<TransformRegistry>,
        config: &DispatchConfig,
    ) {
        let name = capability.name().to_string();
        self.insert(name, build_service_chain(capability, transforms, config));
    }

    /// Binds a custom handler chain under `name`.
    pub fn insert(&self, name: impl Into<String>, chain: HandlerChain) {
        let name = name.into();
        tracing::info!(service = %name, handlers = ?chain.names(), "service bound");
        self.routes.insert(name, Arc::new(chain));
    }

    /// Removes the binding for `name`.
    pub fn unbind(&self, name: &str) -> bool {
        self.routes.remove(name).is_some()
    }

    #[must_use]
    pub fn chain(&self, name: &str) -> Option<Arc<HandlerChain>> {
        self.routes.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Bound service names, sorted.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ExchangeRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRouter")
            .field("services", &self.services())
            .finish()
    }
}

impl Service<Exchange> for ExchangeRouter {
    type Response = Exchange;
    type Error = Infallible;
    type Future = ExchangeFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut exchange: Exchange) -> Self::Future {
        let chain = self.chain(exchange.service());
        Box::pin(async move {
            match chain {
                Some(chain) => chain.dispatch(&mut exchange).await,
                None => {
                    let error = DispatchError::UnknownService {
                        name: exchange.service().to_string(),
                    };
                    tracing::warn!(service = exchange.service(), "unknown service");
                    let fault = Fault::new(exchange.request_id(), error);
                    // A fresh exchange is always active.
                    let _ = exchange.send_fault(fault);
                }
            }
            Ok(exchange)
        })
    }
}

/// Builds the handler chain for one capability according to `config`.
///
/// `Split` yields `["transform", "invoke"]`; `Fused` yields `["invoke"]`.
#[must_use]
pub fn build_service_chain(
    capability: Arc<Capability>,
    transforms: &Arc<TransformRegistry>,
    config: &DispatchConfig,
) -> HandlerChain {
    let invoke = InvocationStep::new(Arc::clone(&capability), Arc::clone(transforms))
        .with_strategy(config.resolution)
        .with_deadline(config.operation_timeout);

    let mut chain = HandlerChain::new();
    if config.transform_mode == TransformMode::Split {
        let selector = OperationTransformSelector::new(capability, Arc::clone(transforms));
        chain.add_last("transform", TransformStep::new(selector));
    }
    chain.add_last("invoke", invoke);
    chain
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
