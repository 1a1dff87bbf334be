use std::time::Duration;

use crate::resolve::ResolutionStrategy;

/// How a bound service's handler chain is laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransformMode {
    /// A single invocation step performs inbound conversion itself.
    #[default]
    Fused,
    /// A transform step runs ahead of the invocation step.
    Split,
}

/// Log output format installed by [`crate::telemetry::init_tracing`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Dispatcher-level configuration.
///
/// Controls chain layout, operation resolution, invocation deadlines and
/// concurrency limits.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub transform_mode: TransformMode,
    pub resolution: ResolutionStrategy,
    /// Default invocation deadline. An exchange's deadline property overrides it;
    /// `None` leaves invocations unbounded.
    pub operation_timeout: Option<Duration>,
    /// Maximum number of exchanges in flight before load shedding.
    pub max_concurrent_exchanges: usize,
    pub log_format: LogFormat,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            transform_mode: TransformMode::Fused,
            resolution: ResolutionStrategy::ByName,
            operation_timeout: Some(Duration::from_secs(30)),
            max_concurrent_exchanges: 1000,
            log_format: LogFormat::Pretty,
        }
    }
}
