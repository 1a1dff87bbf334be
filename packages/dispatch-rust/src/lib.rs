//! `relaybus` dispatch: resolves each exchange to one operation of a backing
//! capability, reconciles payload formats through the transform registry,
//! and runs the result through composable handler chains behind a tower
//! router.

pub mod capability;
pub mod chain;
pub mod invoke;
pub mod resolve;
pub mod service;
pub mod telemetry;
pub mod transform;

pub use capability::{
    Capability, CapabilityBuilder, InvokeError, InvokeFuture, Invoker, OperationDescriptor,
};
pub use chain::{Handler, HandlerChain};
pub use invoke::InvocationStep;
pub use resolve::ResolutionStrategy;
pub use service::{
    build_dispatch_pipeline, DispatchConfig, ExchangeRouter, LogFormat, TransformMode,
};
pub use transform::{
    FormatMarker, MethodShape, OperationTransformSelector, SinkParam, Transform, TransformEntry,
    TransformMethod, TransformRegistry, TransformSelector, TransformStep, TransformerSet,
};
