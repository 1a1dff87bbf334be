//! Exchange routing and the dispatch pipeline.
//!
//! 1. **Configuration** (`config`): chain layout, resolution strategy, limits
//! 2. **Routing** (`router`): dispatch to per-service handler chains by service name
//! 3. **Middleware** (`middleware`): Tower layers (load-shedding, metrics)

pub mod config;
pub mod middleware;
pub mod router;

pub use config::{DispatchConfig, LogFormat, TransformMode};
pub use middleware::build_dispatch_pipeline;
pub use router::{build_service_chain, ExchangeFuture, ExchangeRouter};
