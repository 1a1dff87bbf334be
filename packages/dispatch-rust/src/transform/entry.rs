//! Transform entries and declarative transformer definitions.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use relaybus_core::{DispatchError, Payload, PayloadFormat};

/// Transform body returning the converted value.
pub type ReturningFn = Arc<dyn Fn(Payload) -> anyhow::Result<Payload> + Send + Sync>;

/// Transform body writing the converted value into a text sink.
pub type SinkFn = Arc<dyn Fn(Payload, &mut dyn fmt::Write) -> anyhow::Result<()> + Send + Sync>;

// ---------------------------------------------------------------------------
// Transform trait
// ---------------------------------------------------------------------------

/// Anything that can rewrite a payload.
pub trait Transform: Send + Sync {
    /// Converts `payload`.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::TransformFailed` if the transform body fails.
    fn execute(&self, payload: Payload) -> Result<Payload, DispatchError>;

    /// Format of the values this transform produces, when known.
    fn output_format(&self) -> Option<&PayloadFormat> {
        None
    }
}

impl<F> Transform for F
where
    F: Fn(Payload) -> Result<Payload, DispatchError> + Send + Sync,
{
    fn execute(&self, payload: Payload) -> Result<Payload, DispatchError> {
        self(payload)
    }
}

// ---------------------------------------------------------------------------
// TransformEntry
// ---------------------------------------------------------------------------

/// How a registered transform produces its output.
#[derive(Clone)]
pub enum TransformBody {
    /// `(payload) -> value`
    Returning(ReturningFn),
    /// `(payload, sink)`; the sink's final text becomes the value.
    TextSink(SinkFn),
}

/// A registered `(from, to)` transform.
#[derive(Clone)]
pub struct TransformEntry {
    from: PayloadFormat,
    to: PayloadFormat,
    transformer: String,
    method: String,
    body: TransformBody,
}

impl TransformEntry {
    pub fn new(
        from: PayloadFormat,
        to: PayloadFormat,
        transformer: impl Into<String>,
        method: impl Into<String>,
        body: TransformBody,
    ) -> Self {
        Self {
            from,
            to,
            transformer: transformer.into(),
            method: method.into(),
            body,
        }
    }

    #[must_use]
    pub fn from(&self) -> &PayloadFormat {
        &self.from
    }

    #[must_use]
    pub fn to(&self) -> &PayloadFormat {
        &self.to
    }

    /// Name of the transformer that declared this entry.
    #[must_use]
    pub fn transformer(&self) -> &str {
        &self.transformer
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    fn failed(&self, source: anyhow::Error) -> DispatchError {
        DispatchError::TransformFailed {
            from: self.from.clone(),
            to: self.to.clone(),
            source,
        }
    }
}

impl Transform for TransformEntry {
    fn execute(&self, payload: Payload) -> Result<Payload, DispatchError> {
        tracing::trace!(from = %self.from, to = %self.to, method = %self.method, "executing transform");
        match &self.body {
            TransformBody::Returning(f) => f(payload).map_err(|e| self.failed(e)),
            TransformBody::TextSink(f) => {
                let mut sink = String::new();
                f(payload, &mut sink).map_err(|e| self.failed(e))?;
                Ok(Payload::new(sink))
            }
        }
    }

    fn output_format(&self) -> Option<&PayloadFormat> {
        Some(&self.to)
    }
}

impl fmt::Debug for TransformEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformEntry")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("transformer", &self.transformer)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Declarative transformers
// ---------------------------------------------------------------------------

/// Format marker on a transform parameter. An empty or absent token means
/// "derive the format from the parameter type".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatMarker(Option<String>);

impl FormatMarker {
    /// Marker deriving the format from the parameter type.
    #[must_use]
    pub fn derived() -> Self {
        Self(None)
    }

    /// Marker naming an explicit format token.
    pub fn named(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    #[must_use]
    pub fn resolve(&self, type_name: &str) -> PayloadFormat {
        PayloadFormat::resolve(self.0.as_deref(), type_name)
    }
}

/// Second parameter of a two-argument transform method.
#[derive(Clone)]
pub enum SinkParam {
    /// A writable text sink.
    Text(SinkFn),
    /// Any other parameter type; not a supported transform shape.
    Other { type_name: &'static str },
}

/// Output side of a transform method.
#[derive(Clone)]
pub enum MethodShape {
    /// Returns a value of `type_name`.
    Returns {
        type_name: &'static str,
        call: ReturningFn,
    },
    /// Returns nothing and takes no sink.
    Void,
    /// Writes into a sink parameter, optionally carrying a "to" marker.
    Sink { to: Option<FormatMarker>, sink: SinkParam },
}

/// One method of a transformer, as declared by whoever wires it.
#[derive(Clone)]
pub struct TransformMethod {
    pub name: String,
    /// Type name of the first parameter.
    pub input_type: &'static str,
    /// "from" marker on the first parameter. Methods without one are not transforms.
    pub from: Option<FormatMarker>,
    pub shape: MethodShape,
}

impl TransformMethod {
    /// `(A) -> B` transform from `from` to the format derived from `B`.
    pub fn returning<A, B, F>(name: &str, from: FormatMarker, f: F) -> Self
    where
        A: Any + Clone + Send + Sync,
        B: Any + Send + Sync,
        F: Fn(A) -> anyhow::Result<B> + Send + Sync + 'static,
    {
        let call: ReturningFn = Arc::new(move |payload: Payload| {
            let input = downcast_input::<A>(&payload)?;
            f(input).map(Payload::new)
        });
        Self {
            name: name.to_string(),
            input_type: std::any::type_name::<A>(),
            from: Some(from),
            shape: MethodShape::Returns {
                type_name: std::any::type_name::<B>(),
                call,
            },
        }
    }

    /// `(A, &mut dyn Write)` transform from `from` to `to`.
    pub fn writing<A, F>(name: &str, from: FormatMarker, to: FormatMarker, f: F) -> Self
    where
        A: Any + Clone + Send + Sync,
        F: Fn(A, &mut dyn fmt::Write) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let call: SinkFn = Arc::new(move |payload: Payload, sink: &mut dyn fmt::Write| {
            let input = downcast_input::<A>(&payload)?;
            f(input, sink)
        });
        Self {
            name: name.to_string(),
            input_type: std::any::type_name::<A>(),
            from: Some(from),
            shape: MethodShape::Sink {
                to: Some(to),
                sink: SinkParam::Text(call),
            },
        }
    }

    /// A plain helper method without a "from" marker.
    pub fn helper<A: Any>(name: &str) -> Self {
        Self {
            name: name.to_string(),
            input_type: std::any::type_name::<A>(),
            from: None,
            shape: MethodShape::Void,
        }
    }
}

/// A named group of transform methods registered together.
#[derive(Clone)]
pub struct TransformerSet {
    name: String,
    methods: Vec<TransformMethod>,
}

impl TransformerSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn method(mut self, method: TransformMethod) -> Self {
        self.methods.push(method);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn methods(&self) -> &[TransformMethod] {
        &self.methods
    }
}

fn downcast_input<A: Any + Clone>(payload: &Payload) -> anyhow::Result<A> {
    payload.cloned::<A>().ok_or_else(|| {
        anyhow::anyhow!(
            "expected a `{}` payload, got `{}`",
            std::any::type_name::<A>(),
            payload.type_name().unwrap_or("null")
        )
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
