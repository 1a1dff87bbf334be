//! Inbound transform selection and the transform handler.

use std::sync::Arc;

use async_trait::async_trait;
use relaybus_core::{DispatchError, ExchangeProperties, MessageExchange};

use super::entry::Transform;
use super::registry::TransformRegistry;
use crate::capability::Capability;
use crate::chain::Handler;
use crate::resolve;

/// Picks the transform to apply to an exchange's inbound content, if any.
pub trait TransformSelector: Send + Sync {
    /// # Errors
    ///
    /// Returns the `DispatchError` that should fault the exchange when a
    /// transform is required but unavailable.
    fn select(&self, exchange: &dyn MessageExchange) -> Result<Option<Arc<dyn Transform>>, DispatchError>;
}

impl<F> TransformSelector for F
where
    F: Fn(&dyn MessageExchange) -> Result<Option<Arc<dyn Transform>>, DispatchError> + Send + Sync,
{
    fn select(&self, exchange: &dyn MessageExchange) -> Result<Option<Arc<dyn Transform>>, DispatchError> {
        self(exchange)
    }
}

/// Selects the registry transform from the exchange's declared inbound
/// format to the parameter format of the named, single-parameter operation.
pub struct OperationTransformSelector {
    capability: Arc<Capability>,
    transforms: Arc<TransformRegistry>,
}

impl OperationTransformSelector {
    #[must_use]
    pub fn new(capability: Arc<Capability>, transforms: Arc<TransformRegistry>) -> Self {
        Self {
            capability,
            transforms,
        }
    }
}

impl TransformSelector for OperationTransformSelector {
    fn select(&self, exchange: &dyn MessageExchange) -> Result<Option<Arc<dyn Transform>>, DispatchError> {
        let Some(name) = exchange.operation_name() else {
            return Ok(None);
        };
        let operation = resolve::by_name(&self.capability, name)?;
        let [param] = operation.params() else {
            return Ok(None);
        };
        let Some(from) = exchange.in_format() else {
            return Ok(None);
        };
        let to = param.format();
        if *from == to {
            return Ok(None);
        }
        match self.transforms.lookup(from, &to) {
            Some(entry) => {
                let transform: Arc<dyn Transform> = entry;
                Ok(Some(transform))
            }
            None => Err(DispatchError::NoTransformFound {
                from: from.clone(),
                to,
            }),
        }
    }
}

/// Handler rewriting inbound content with the selected transform.
///
/// After a rewrite the exchange's inbound format is the transform's output
/// format, so later steps see content and format in agreement.
pub struct TransformStep {
    selector: Arc<dyn TransformSelector>,
}

impl TransformStep {
    pub fn new(selector: impl TransformSelector + 'static) -> Self {
        Self {
            selector: Arc::new(selector),
        }
    }
}

#[async_trait]
impl Handler for TransformStep {
    async fn handle_message(&self, exchange: &mut dyn MessageExchange) -> Result<(), DispatchError> {
        let Some(transform) = self.selector.select(&*exchange)? else {
            return Ok(());
        };
        let output = transform.execute(exchange.message().content().clone())?;
        let format = transform
            .output_format()
            .cloned()
            .or_else(|| output.format());
        exchange.message_mut().set_content(output);
        if let Some(format) = format {
            exchange.set_in_format(format);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use relaybus_core::{Exchange, Payload, PayloadFormat};

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Quantity(u32);

    fn fixture() -> (Arc<Capability>, Arc<TransformRegistry>) {
        let cap = Capability::builder("Stock")
            .unary("restock", |q: Quantity| Ok(q.0))
            .build();
        let registry = TransformRegistry::new();
        registry
            .register_fn(PayloadFormat::new("text/qty"), PayloadFormat::of::<Quantity>(), |p| {
                let text = p.cloned::<String>().unwrap_or_default();
                Ok(Payload::new(Quantity(text.trim().parse()?)))
            })
            .unwrap();
        (Arc::new(cap), Arc::new(registry))
    }

    fn exchange(op: Option<&str>, format: Option<&str>, content: Payload) -> Exchange {
        let mut exchange = Exchange::in_out("Stock", content);
        if let Some(op) = op {
            exchange.set_operation_name(op);
        }
        if let Some(format) = format {
            exchange.set_in_format(PayloadFormat::new(format));
        }
        exchange
    }

    #[test]
    fn selector_skips_without_name_or_format() {
        let (cap, registry) = fixture();
        let selector = OperationTransformSelector::new(cap, registry);

        let ex = exchange(None, Some("text/qty"), Payload::null());
        assert!(selector.select(&ex).unwrap().is_none());

        let ex = exchange(Some("restock"), None, Payload::null());
        assert!(selector.select(&ex).unwrap().is_none());
    }

    #[test]
    fn selector_skips_matching_format() {
        let (cap, registry) = fixture();
        let selector = OperationTransformSelector::new(cap, registry);
        let native = PayloadFormat::of::<Quantity>();
        let ex = exchange(Some("restock"), Some(native.as_str()), Payload::new(Quantity(1)));
        assert!(selector.select(&ex).unwrap().is_none());
    }

    #[test]
    fn selector_fails_for_unknown_operation_or_missing_transform() {
        let (cap, registry) = fixture();
        let selector = OperationTransformSelector::new(cap, registry);

        let ex = exchange(Some("audit"), Some("text/qty"), Payload::null());
        assert_eq!(selector.select(&ex).err().map(|e| e.code()), Some("operation_not_resolved"));

        let ex = exchange(Some("restock"), Some("text/csv"), Payload::null());
        assert_eq!(selector.select(&ex).err().map(|e| e.code()), Some("no_transform_found"));
    }

    #[tokio::test]
    async fn step_rewrites_content_and_inbound_format() {
        let (cap, registry) = fixture();
        let step = TransformStep::new(OperationTransformSelector::new(cap, registry));
        let mut ex = exchange(Some("restock"), Some("text/qty"), Payload::new(" 12 ".to_string()));

        step.handle_message(&mut ex).await.unwrap();

        assert_eq!(ex.message().content().cloned::<Quantity>(), Some(Quantity(12)));
        assert_eq!(ex.in_format(), Some(&PayloadFormat::of::<Quantity>()));
    }

    #[tokio::test]
    async fn closure_selector_output_format_follows_the_value() {
        let selector = |_ex: &dyn MessageExchange| -> Result<Option<Arc<dyn Transform>>, DispatchError> {
            let double = |p: Payload| -> Result<Payload, DispatchError> {
                Ok(Payload::new(p.cloned::<u32>().unwrap_or_default() * 2))
            };
            let transform: Arc<dyn Transform> = Arc::new(double);
            Ok(Some(transform))
        };
        let step = TransformStep::new(selector);
        let mut ex = exchange(None, Some("text/n"), Payload::new(4_u32));

        step.handle_message(&mut ex).await.unwrap();

        assert_eq!(ex.message().content().cloned::<u32>(), Some(8));
        assert_eq!(ex.in_format(), Some(&PayloadFormat::of::<u32>()));
    }

    #[tokio::test]
    async fn transform_failure_is_returned() {
        let (cap, registry) = fixture();
        let step = TransformStep::new(OperationTransformSelector::new(cap, registry));
        let mut ex = exchange(Some("restock"), Some("text/qty"), Payload::new("many".to_string()));

        let err = step.handle_message(&mut ex).await.unwrap_err();
        assert_eq!(err.code(), "transform_failed");
        assert_eq!(ex.message().content().cloned::<String>().as_deref(), Some("many"));
    }
}
