//! Pipeline composition: wraps the router in the dispatch middleware stack.

use std::convert::Infallible;

use relaybus_core::Exchange;
use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use crate::service::config::DispatchConfig;
use crate::service::router::ExchangeRouter;

/// Builds the dispatch pipeline around `router`.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- fault exchanges when saturated, before any work
/// 2. `MetricsLayer` -- record timing and outcome around the router
///
/// Invocation deadlines are enforced inside each service chain, where the
/// per-exchange override is visible.
#[must_use]
pub fn build_dispatch_pipeline(
    router: ExchangeRouter,
    config: &DispatchConfig,
) -> impl tower::Service<Exchange, Response = Exchange, Error = Infallible> + Clone {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_exchanges))
        .layer(MetricsLayer)
        .service(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relaybus_core::{ExchangeOutcome, ExchangeProperties, Payload};
    use tower::ServiceExt;

    use super::*;
    use crate::capability::Capability;
    use crate::transform::TransformRegistry;

    fn router() -> ExchangeRouter {
        let router = ExchangeRouter::new();
        let capability = Capability::builder("Counter")
            .unary("double", |n: u32| Ok(n * 2))
            .build();
        router.bind(
            Arc::new(capability),
            &Arc::new(TransformRegistry::new()),
            &DispatchConfig::default(),
        );
        router
    }

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let config = DispatchConfig {
            max_concurrent_exchanges: 100,
            ..DispatchConfig::default()
        };
        let svc = build_dispatch_pipeline(router(), &config);

        let mut exchange = Exchange::in_out("Counter", Payload::new(21_u32));
        exchange.set_operation_name("double");

        match svc.oneshot(exchange).await.unwrap().into_outcome() {
            ExchangeOutcome::Response(message) => {
                assert_eq!(message.content().cloned::<u32>(), Some(42));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_capacity_sheds_everything() {
        let config = DispatchConfig {
            max_concurrent_exchanges: 0,
            ..DispatchConfig::default()
        };
        let svc = build_dispatch_pipeline(router(), &config);

        let mut exchange = Exchange::in_out("Counter", Payload::new(1_u32));
        exchange.set_operation_name("double");

        let out = svc.oneshot(exchange).await.unwrap();
        assert_eq!(out.fault().map(relaybus_core::Fault::code), Some("overloaded"));
    }
}
