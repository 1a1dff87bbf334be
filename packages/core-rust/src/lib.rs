//! `relaybus` core: payload formats, opaque payloads, message exchanges and the dispatch error taxonomy.

pub mod error;
pub mod exchange;
pub mod format;
pub mod payload;

pub use error::{DispatchError, FailureSide};
pub use exchange::{
    keys, Exchange, ExchangeOutcome, ExchangePattern, ExchangeProperties, ExchangeState, Fault,
    Message, MessageExchange, Property,
};
pub use format::PayloadFormat;
pub use payload::{Payload, TypeDescriptor};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
