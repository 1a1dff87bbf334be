//! Metrics middleware for exchanges.
//!
//! Wraps each exchange in an `exchange` span and records
//! `relaybus_exchanges_total{service,outcome}` and
//! `relaybus_exchange_duration_seconds{service}` through the `metrics` facade.
//! `outcome` is `response`, `completed` or the fault code.

use std::convert::Infallible;
use std::task::{Context, Poll};
use std::time::Instant;

use relaybus_core::{Exchange, MessageExchange};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::router::ExchangeFuture;

pub const EXCHANGES_TOTAL: &str = "relaybus_exchanges_total";
pub const EXCHANGE_DURATION_SECONDS: &str = "relaybus_exchange_duration_seconds";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records exchange duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Outcome label for a processed exchange.
#[must_use]
pub fn outcome_label(exchange: &Exchange) -> &'static str {
    match (exchange.fault(), exchange.response()) {
        (Some(fault), _) => fault.code(),
        (None, Some(_)) => "response",
        (None, None) => "completed",
    }
}

impl<S> Service<Exchange> for MetricsService<S>
where
    S: Service<Exchange, Response = Exchange, Error = Infallible> + Send,
    S::Future: Send + 'static,
{
    type Response = Exchange;
    type Error = Infallible;
    type Future = ExchangeFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, exchange: Exchange) -> Self::Future {
        let service = exchange.service().to_string();
        let span = info_span!(
            "exchange",
            service = %service,
            request_id = exchange.request_id(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(exchange);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                if let Ok(exchange) = &result {
                    let outcome = outcome_label(exchange);
                    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                    tracing::Span::current().record("duration_ms", duration_ms);
                    tracing::Span::current().record("outcome", outcome);

                    metrics::counter!(EXCHANGES_TOTAL, "service" => service.clone(), "outcome" => outcome)
                        .increment(1);
                    metrics::histogram!(EXCHANGE_DURATION_SECONDS, "service" => service.clone())
                        .record(elapsed.as_secs_f64());

                    tracing::info!(service = %service, duration_ms, outcome, "exchange complete");
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use relaybus_core::{DispatchError, Fault, Message, Payload};
    use tower::ServiceExt;

    use super::*;

    /// Responds to every exchange with its own content.
    struct EchoService;

    impl Service<Exchange> for EchoService {
        type Response = Exchange;
        type Error = Infallible;
        type Future = ExchangeFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, mut exchange: Exchange) -> Self::Future {
            let content = exchange.message().content().clone();
            let _ = exchange.send(Message::new(content));
            Box::pin(async move { Ok(exchange) })
        }
    }

    #[tokio::test]
    async fn passes_exchange_through() {
        let svc = MetricsLayer.layer(EchoService);
        let out = svc
            .oneshot(Exchange::in_out("svc", Payload::new(5_u8)))
            .await
            .unwrap();
        assert_eq!(out.response().and_then(|m| m.content().cloned::<u8>()), Some(5));
    }

    #[test]
    fn outcome_labels() {
        let mut responded = Exchange::in_out("svc", Payload::null());
        responded.send(Message::default()).unwrap();
        assert_eq!(outcome_label(&responded), "response");

        let completed = Exchange::one_way("svc", Payload::null());
        assert_eq!(outcome_label(&completed), "completed");

        let mut faulted = Exchange::in_out("svc", Payload::null());
        faulted
            .send_fault(Fault::new("r", DispatchError::Overloaded))
            .unwrap();
        assert_eq!(outcome_label(&faulted), "overloaded");
    }
}
