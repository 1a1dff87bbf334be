//! Load-shedding middleware for exchanges.
//!
//! Rejects exchanges when the dispatcher is saturated (in-flight count at
//! `max_concurrent_exchanges`) by faulting them with `DispatchError::Overloaded`.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use relaybus_core::{DispatchError, Exchange, Fault, MessageExchange};
use tokio::sync::Semaphore;
use tower::{Layer, Service};

use crate::service::router::ExchangeFuture;

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer that limits in-flight exchanges via a semaphore.
///
/// When all permits are taken, incoming exchanges are faulted immediately
/// rather than queued.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: self.semaphore.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S> Service<Exchange> for LoadShedService<S>
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

    fn call(&mut self, mut exchange: Exchange) -> Self::Future {
        let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
            tracing::warn!(service = exchange.service(), "shedding exchange");
            let fault = Fault::new(exchange.request_id(), DispatchError::Overloaded);
            // Exchanges reach the pipeline active.
            let _ = exchange.send_fault(fault);
            return Box::pin(async move { Ok(exchange) });
        };

        let fut = self.inner.call(exchange);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relaybus_core::{ExchangeState, Payload};
    use tower::ServiceExt;

    use super::*;

    /// Service that holds each exchange for a fixed delay, then returns it untouched.
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<Exchange> for SlowService {
        type Response = Exchange;
        type Error = Infallible;
        type Future = ExchangeFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, exchange: Exchange) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(exchange)
            })
        }
    }

    fn exchange() -> Exchange {
        Exchange::in_out("svc", Payload::null())
    }

    #[tokio::test]
    async fn allows_exchanges_under_limit() {
        let svc = LoadShedLayer::new(10).layer(SlowService { delay_ms: 1 });
        let out = svc.oneshot(exchange()).await.unwrap();
        assert_eq!(out.state(), ExchangeState::Active);
    }

    #[tokio::test]
    async fn faults_when_overloaded() {
        let mut svc = LoadShedLayer::new(1).layer(SlowService { delay_ms: 500 });

        let _ = ServiceExt::ready(&mut svc).await.unwrap();
        let in_flight = tokio::spawn(svc.call(exchange()));

        tokio::time::sleep(Duration::from_millis(10)).await;

        let rejected = svc.call(exchange()).await.unwrap();
        assert_eq!(rejected.fault().map(Fault::code), Some("overloaded"));

        let admitted = in_flight.await.unwrap().unwrap();
        assert_eq!(admitted.state(), ExchangeState::Active);
    }

    #[tokio::test]
    async fn permit_is_released_after_completion() {
        let mut svc = LoadShedLayer::new(1).layer(SlowService { delay_ms: 1 });
        for _ in 0..3 {
            let out = ServiceExt::ready(&mut svc)
                .await
                .unwrap()
                .call(exchange())
                .await
                .unwrap();
            assert!(out.fault().is_none());
        }
    }
}
