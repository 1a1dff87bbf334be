//! Payload transforms: declaration, registry, and the inbound transform step.

pub mod entry;
pub mod registry;
pub mod step;

pub use entry::{
    FormatMarker, MethodShape, ReturningFn, SinkFn, SinkParam, Transform, TransformBody,
    TransformEntry, TransformMethod, TransformerSet,
};
pub use registry::TransformRegistry;
pub use step::{OperationTransformSelector, TransformSelector, TransformStep};
