//! Transform registry keyed by `(from, to)` format pairs.
//!
//! Reads go through an `ArcSwap` snapshot and never block. Writers are
//! serialized by a mutex, build a new table off to the side and publish it
//! with a single pointer swap, so a lookup never observes a partially
//! registered transformer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use relaybus_core::{DispatchError, Payload, PayloadFormat};

use super::entry::{
    MethodShape, ReturningFn, SinkFn, SinkParam, Transform, TransformBody, TransformEntry,
    TransformMethod, TransformerSet,
};

type FormatPair = (PayloadFormat, PayloadFormat);

/// Immutable snapshot of all registered transforms.
#[derive(Default)]
struct TransformTable {
    /// Entries in registration order.
    entries: Vec<Arc<TransformEntry>>,
    index: HashMap<FormatPair, usize>,
}

impl TransformTable {
    fn get(&self, from: &PayloadFormat, to: &PayloadFormat) -> Option<&Arc<TransformEntry>> {
        // Tuple keys cannot be borrowed as `(&A, &B)`; formats clone cheaply.
        self.index
            .get(&(from.clone(), to.clone()))
            .map(|&i| &self.entries[i])
    }

    /// Returns a new table with `additions` appended.
    fn extended(&self, additions: Vec<TransformEntry>) -> Self {
        let mut entries = self.entries.clone();
        let mut index = self.index.clone();
        for entry in additions {
            index.insert((entry.from().clone(), entry.to().clone()), entries.len());
            entries.push(Arc::new(entry));
        }
        Self { entries, index }
    }
}

// ---------------------------------------------------------------------------
// TransformRegistry
// ---------------------------------------------------------------------------

/// Registry of transforms with at most one entry per `(from, to)` pair.
///
/// Owned explicitly and shared by `Arc` with every chain that needs it.
pub struct TransformRegistry {
    table: ArcSwap<TransformTable>,
    write_lock: Mutex<()>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

impl TransformRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(TransformTable::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Registers a `(payload) -> value` transform.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::DuplicateTransform` if `(from, to)` is already registered.
    pub fn register_fn<F>(&self, from: PayloadFormat, to: PayloadFormat, f: F) -> Result<(), DispatchError>
    where
        F: Fn(Payload) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        let body: ReturningFn = Arc::new(f);
        let method = format!("{from} -> {to}");
        self.register_entry(TransformEntry::new(
            from,
            to,
            "fn",
            method,
            TransformBody::Returning(body),
        ))
    }

    /// Registers a `(payload, sink)` transform whose written text becomes the value.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::DuplicateTransform` if `(from, to)` is already registered.
    pub fn register_sink<F>(&self, from: PayloadFormat, to: PayloadFormat, f: F) -> Result<(), DispatchError>
    where
        F: Fn(Payload, &mut dyn fmt::Write) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let body: SinkFn = Arc::new(f);
        let method = format!("{from} -> {to}");
        self.register_entry(TransformEntry::new(
            from,
            to,
            "fn",
            method,
            TransformBody::TextSink(body),
        ))
    }

    /// Registers a single prepared entry.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::DuplicateTransform` if the entry's pair is already registered.
    pub fn register_entry(&self, entry: TransformEntry) -> Result<(), DispatchError> {
        self.commit(vec![entry])
    }

    /// Registers every transform method of `set`, atomically.
    ///
    /// Methods without a "from" marker are skipped. Returns the number of
    /// entries added. On error nothing from `set` is registered.
    ///
    /// # Errors
    ///
    /// - `DispatchError::UnsupportedTransformShape` for a marked method with no
    ///   output, a sink without a "to" marker, or a sink that is not a text writer.
    /// - `DispatchError::DuplicateTransform` if a pair is already registered or
    ///   declared twice within `set`.
    pub fn register(&self, set: &TransformerSet) -> Result<usize, DispatchError> {
        let mut entries = Vec::new();
        for method in set.methods() {
            if let Some(entry) = entry_for(set.name(), method)? {
                entries.push(entry);
            }
        }
        let added = entries.len();
        self.commit(entries)?;
        Ok(added)
    }

    /// Looks up the transform for `(from, to)`.
    #[must_use]
    pub fn lookup(&self, from: &PayloadFormat, to: &PayloadFormat) -> Option<Arc<TransformEntry>> {
        self.table.load().get(from, to).cloned()
    }

    /// Converts `value` from its derived format to `to`.
    ///
    /// Null values carry no format and pass through unchanged.
    ///
    /// # Errors
    ///
    /// See [`TransformRegistry::convert_from`].
    pub fn convert(&self, value: Payload, to: &PayloadFormat) -> Result<Payload, DispatchError> {
        match value.format() {
            Some(from) => self.convert_from(value, &from, to),
            None => Ok(value),
        }
    }

    /// Converts `value` from `from` to `to`. Equal formats return `value`
    /// itself without invoking any transform.
    ///
    /// # Errors
    ///
    /// - `DispatchError::NoTransformFound` if no entry exists for `(from, to)`.
    /// - `DispatchError::TransformFailed` if the transform body fails.
    pub fn convert_from(
        &self,
        value: Payload,
        from: &PayloadFormat,
        to: &PayloadFormat,
    ) -> Result<Payload, DispatchError> {
        if from == to {
            return Ok(value);
        }
        let Some(entry) = self.lookup(from, to) else {
            tracing::debug!(%from, %to, "no transform registered");
            return Err(DispatchError::NoTransformFound {
                from: from.clone(),
                to: to.clone(),
            });
        };
        entry.execute(value)
    }

    /// All entries in registration order.
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<TransformEntry>> {
        self.table.load().entries.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.load().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validates `additions` against the current table and publishes them together.
    fn commit(&self, additions: Vec<TransformEntry>) -> Result<(), DispatchError> {
        let _guard = self.write_lock.lock();
        let current = self.table.load_full();

        let mut pending: Vec<FormatPair> = Vec::with_capacity(additions.len());
        for entry in &additions {
            let pair = (entry.from().clone(), entry.to().clone());
            if current.get(&pair.0, &pair.1).is_some() || pending.contains(&pair) {
                return Err(DispatchError::DuplicateTransform {
                    from: pair.0,
                    to: pair.1,
                });
            }
            pending.push(pair);
        }

        for entry in &additions {
            tracing::info!(
                from = %entry.from(),
                to = %entry.to(),
                transformer = entry.transformer(),
                method = entry.method(),
                "transform registered"
            );
        }
        self.table.store(Arc::new(current.extended(additions)));
        Ok(())
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the entry a transform method declares, `None` if it is not a transform.
fn entry_for(transformer: &str, method: &TransformMethod) -> Result<Option<TransformEntry>, DispatchError> {
    let Some(from_marker) = &method.from else {
        tracing::debug!(transformer, method = %method.name, "no source format marker, skipping");
        return Ok(None);
    };
    let from = from_marker.resolve(method.input_type);
    let unsupported = |reason: String| DispatchError::UnsupportedTransformShape {
        method: format!("{transformer}::{}", method.name),
        reason,
    };

    let (to, body) = match &method.shape {
        MethodShape::Returns { type_name, call } => (
            PayloadFormat::of_type_name(type_name),
            TransformBody::Returning(call.clone()),
        ),
        MethodShape::Void => {
            return Err(unsupported(
                "declares a source format but produces no output".to_string(),
            ))
        }
        MethodShape::Sink { to: None, .. } => {
            return Err(unsupported(
                "sink parameter carries no target format marker".to_string(),
            ))
        }
        MethodShape::Sink {
            sink: SinkParam::Other { type_name },
            ..
        } => {
            return Err(unsupported(format!(
                "sink parameter `{type_name}` is not a writable text sink"
            )))
        }
        MethodShape::Sink {
            to: Some(to_marker),
            sink: SinkParam::Text(call),
        } => (
            to_marker.resolve(std::any::type_name::<String>()),
            TransformBody::TextSink(call.clone()),
        ),
    };

    Ok(Some(TransformEntry::new(
        from,
        to,
        transformer,
        method.name.clone(),
        body,
    )))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
