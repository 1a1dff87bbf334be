//! Message exchanges: one logical call flowing through a handler chain.
//!
//! The dispatch core only consumes the [`MessageExchange`] trait. [`Exchange`]
//! is the in-memory implementation used by the router and by tests; a
//! transport may supply its own.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::format::PayloadFormat;
use crate::payload::Payload;

// ---------------------------------------------------------------------------
// Reserved property keys
// ---------------------------------------------------------------------------

/// Reserved exchange-scoped property keys.
pub mod keys {
    /// Name of the operation to invoke on the backing capability.
    pub const OPERATION_NAME: &str = "relaybus.operation.name";
    /// Format of the inbound payload as sent by the consumer.
    pub const IN_FORMAT: &str = "relaybus.payload.format#in";
    /// Format the consumer expects the response payload in.
    pub const OUT_FORMAT: &str = "relaybus.payload.format#out";
    /// Per-exchange invocation deadline in milliseconds.
    pub const DEADLINE_MS: &str = "relaybus.deadline.ms";
}

// ---------------------------------------------------------------------------
// ExchangePattern / ExchangeState
// ---------------------------------------------------------------------------

/// Message exchange pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangePattern {
    /// Fire-and-forget: no response is produced.
    OneWay,
    /// Request/response: exactly one response or one fault.
    InOut,
}

/// Lifecycle of an exchange. Terminal states accept no further sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Active,
    Responded,
    Faulted,
}

impl ExchangeState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Responded => f.write_str("responded"),
            Self::Faulted => f.write_str("faulted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Message / Property / Fault
// ---------------------------------------------------------------------------

/// A message carrying opaque content.
#[derive(Debug, Clone, Default)]
pub struct Message {
    content: Payload,
}

impl Message {
    #[must_use]
    pub fn new(content: Payload) -> Self {
        Self { content }
    }

    #[must_use]
    pub fn content(&self) -> &Payload {
        &self.content
    }

    pub fn set_content(&mut self, content: Payload) {
        self.content = content;
    }

    #[must_use]
    pub fn into_content(self) -> Payload {
        self.content
    }
}

/// Value stored in an exchange's property bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    Text(String),
    Format(PayloadFormat),
    Number(u64),
    Flag(bool),
}

/// Fault recorded on an exchange in place of a response.
#[derive(Debug)]
pub struct Fault {
    request_id: String,
    error: DispatchError,
}

impl Fault {
    #[must_use]
    pub fn new(request_id: impl Into<String>, error: DispatchError) -> Self {
        Self {
            request_id: request_id.into(),
            error,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.error.code()
    }

    #[must_use]
    pub fn error(&self) -> &DispatchError {
        &self.error
    }

    #[must_use]
    pub fn into_error(self) -> DispatchError {
        self.error
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.request_id, self.error)
    }
}

// ---------------------------------------------------------------------------
// MessageExchange trait
// ---------------------------------------------------------------------------

/// The exchange abstraction consumed by handlers.
pub trait MessageExchange: Send + Sync {
    /// Name of the target service.
    fn service(&self) -> &str;

    fn pattern(&self) -> ExchangePattern;

    /// Request identifier for correlating logs and faults.
    fn request_id(&self) -> &str;

    fn state(&self) -> ExchangeState;

    /// The current (inbound) message.
    fn message(&self) -> &Message;

    fn message_mut(&mut self) -> &mut Message;

    /// Sends the response message.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ExchangeClosed` if the exchange is one-way or
    /// already terminated.
    fn send(&mut self, message: Message) -> Result<(), DispatchError>;

    /// Terminates the exchange with a fault.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ExchangeClosed` if the exchange is already terminated.
    fn send_fault(&mut self, fault: Fault) -> Result<(), DispatchError>;

    fn property(&self, key: &str) -> Option<&Property>;

    fn set_property(&mut self, key: &str, value: Property);
}

/// Typed accessors for the reserved property keys.
pub trait ExchangeProperties: MessageExchange {
    fn operation_name(&self) -> Option<&str> {
        match self.property(keys::OPERATION_NAME) {
            Some(Property::Text(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    fn set_operation_name(&mut self, name: &str) {
        self.set_property(keys::OPERATION_NAME, Property::Text(name.to_string()));
    }

    fn in_format(&self) -> Option<&PayloadFormat> {
        match self.property(keys::IN_FORMAT) {
            Some(Property::Format(format)) => Some(format),
            _ => None,
        }
    }

    fn set_in_format(&mut self, format: PayloadFormat) {
        self.set_property(keys::IN_FORMAT, Property::Format(format));
    }

    fn out_format(&self) -> Option<&PayloadFormat> {
        match self.property(keys::OUT_FORMAT) {
            Some(Property::Format(format)) => Some(format),
            _ => None,
        }
    }

    fn set_out_format(&mut self, format: PayloadFormat) {
        self.set_property(keys::OUT_FORMAT, Property::Format(format));
    }

    fn deadline(&self) -> Option<Duration> {
        match self.property(keys::DEADLINE_MS) {
            Some(Property::Number(ms)) => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    fn set_deadline(&mut self, deadline: Duration) {
        let ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
        self.set_property(keys::DEADLINE_MS, Property::Number(ms));
    }
}

impl<E: MessageExchange + ?Sized> ExchangeProperties for E {}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// Final result of a processed exchange.
#[derive(Debug)]
pub enum ExchangeOutcome {
    Response(Message),
    Completed,
    Fault(Fault),
}

/// In-memory message exchange.
#[derive(Debug)]
pub struct Exchange {
    service: String,
    request_id: String,
    pattern: ExchangePattern,
    message: Message,
    properties: HashMap<String, Property>,
    state: ExchangeState,
    response: Option<Message>,
    fault: Option<Fault>,
}

impl Exchange {
    /// Creates an active exchange with a fresh UUID v4 request id.
    #[must_use]
    pub fn new(service: impl Into<String>, pattern: ExchangePattern, message: Message) -> Self {
        Self {
            service: service.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
            pattern,
            message,
            properties: HashMap::new(),
            state: ExchangeState::Active,
            response: None,
            fault: None,
        }
    }

    /// Request/response exchange carrying `content`.
    #[must_use]
    pub fn in_out(service: impl Into<String>, content: Payload) -> Self {
        Self::new(service, ExchangePattern::InOut, Message::new(content))
    }

    /// One-way exchange carrying `content`.
    #[must_use]
    pub fn one_way(service: impl Into<String>, content: Payload) -> Self {
        Self::new(service, ExchangePattern::OneWay, Message::new(content))
    }

    /// Replaces the generated request id with one supplied by the transport.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    #[must_use]
    pub fn response(&self) -> Option<&Message> {
        self.response.as_ref()
    }

    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    #[must_use]
    pub fn into_outcome(self) -> ExchangeOutcome {
        match (self.fault, self.response) {
            (Some(fault), _) => ExchangeOutcome::Fault(fault),
            (None, Some(response)) => ExchangeOutcome::Response(response),
            (None, None) => ExchangeOutcome::Completed,
        }
    }

    fn closed(&self, action: &'static str) -> DispatchError {
        DispatchError::ExchangeClosed {
            request_id: self.request_id.clone(),
            state: self.state,
            action,
        }
    }
}

impl MessageExchange for Exchange {
    fn service(&self) -> &str {
        &self.service
    }

    fn pattern(&self) -> ExchangePattern {
        self.pattern
    }

    fn request_id(&self) -> &str {
        &self.request_id
    }

    fn state(&self) -> ExchangeState {
        self.state
    }

    fn message(&self) -> &Message {
        &self.message
    }

    fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    fn send(&mut self, message: Message) -> Result<(), DispatchError> {
        if self.state.is_terminal() {
            return Err(self.closed("send a response"));
        }
        if self.pattern == ExchangePattern::OneWay {
            return Err(self.closed("send a response on a one-way exchange"));
        }
        self.response = Some(message);
        self.state = ExchangeState::Responded;
        Ok(())
    }

    fn send_fault(&mut self, fault: Fault) -> Result<(), DispatchError> {
        if self.state.is_terminal() {
            return Err(self.closed("send a fault"));
        }
        tracing::debug!(
            request_id = %self.request_id,
            service = %self.service,
            code = fault.code(),
            "exchange faulted"
        );
        self.fault = Some(fault);
        self.state = ExchangeState::Faulted;
        Ok(())
    }

    fn property(&self, key: &str) -> Option<&Property> {
        self.properties.get(key)
    }

    fn set_property(&mut self, key: &str, value: Property) {
        self.properties.insert(key.to_string(), value);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_properties_round_trip_through_the_bag() {
        let mut exchange = Exchange::in_out("OrderService", Payload::null());
        assert!(exchange.operation_name().is_none());
        assert!(exchange.in_format().is_none());

        exchange.set_operation_name("createOrder");
        exchange.set_in_format(PayloadFormat::new("urn:createOrderRequest:v1:soap"));
        exchange.set_out_format(PayloadFormat::new("urn:createOrderResponse:v1:soap"));
        exchange.set_deadline(Duration::from_millis(250));

        assert_eq!(exchange.operation_name(), Some("createOrder"));
        assert_eq!(
            exchange.in_format(),
            Some(&PayloadFormat::new("urn:createOrderRequest:v1:soap"))
        );
        assert_eq!(
            exchange.out_format(),
            Some(&PayloadFormat::new("urn:createOrderResponse:v1:soap"))
        );
        assert_eq!(exchange.deadline(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn mistyped_property_reads_as_absent() {
        let mut exchange = Exchange::in_out("OrderService", Payload::null());
        exchange.set_property(keys::OPERATION_NAME, Property::Flag(true));
        assert!(exchange.operation_name().is_none());
    }

    #[test]
    fn request_ids_are_unique_unless_supplied() {
        let a = Exchange::in_out("svc", Payload::null());
        let b = Exchange::in_out("svc", Payload::null());
        assert_ne!(a.request_id(), b.request_id());

        let c = Exchange::in_out("svc", Payload::null()).with_request_id("req-7");
        assert_eq!(c.request_id(), "req-7");
    }

    #[test]
    fn response_is_sent_at_most_once() {
        let mut exchange = Exchange::in_out("svc", Payload::null());
        exchange.send(Message::new(Payload::new(1_u32))).unwrap();
        assert_eq!(exchange.state(), ExchangeState::Responded);

        let err = exchange.send(Message::default()).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::ExchangeClosed {
                state: ExchangeState::Responded,
                ..
            }
        ));

        match exchange.into_outcome() {
            ExchangeOutcome::Response(message) => {
                assert_eq!(message.content().downcast_ref::<u32>(), Some(&1));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn one_way_exchange_rejects_responses() {
        let mut exchange = Exchange::one_way("svc", Payload::null());
        assert!(exchange.send(Message::default()).is_err());
        assert_eq!(exchange.state(), ExchangeState::Active);
        assert!(matches!(exchange.into_outcome(), ExchangeOutcome::Completed));
    }

    #[test]
    fn fault_terminates_the_exchange() {
        let mut exchange = Exchange::in_out("svc", Payload::null()).with_request_id("req-1");
        let fault = Fault::new("req-1", DispatchError::Overloaded);
        exchange.send_fault(fault).unwrap();

        assert_eq!(exchange.state(), ExchangeState::Faulted);
        assert!(exchange.send(Message::default()).is_err());
        assert!(exchange
            .send_fault(Fault::new("req-1", DispatchError::Overloaded))
            .is_err());
        assert_eq!(exchange.fault().map(Fault::code), Some("overloaded"));
        assert_eq!(
            exchange.fault().map(ToString::to_string).as_deref(),
            Some("[req-1] dispatcher overloaded, try again later")
        );
    }
}
