//! Opaque message content and parameter type descriptors.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::format::PayloadFormat;

/// Type name reported for sequence payloads.
pub const SEQUENCE_TYPE_NAME: &str = "relaybus::Sequence";

/// Opaque, cheaply clonable message content.
///
/// A payload is either null, a single native value of any `'static` type, or
/// a sequence of payloads. The runtime type of a value payload is captured at
/// construction so that operations can be matched by exact type and formats
/// can be derived without the caller naming them.
#[derive(Clone)]
pub struct Payload(Repr);

#[derive(Clone)]
enum Repr {
    Null,
    Value {
        type_id: TypeId,
        type_name: &'static str,
        value: Arc<dyn Any + Send + Sync>,
    },
    Sequence(Arc<[Payload]>),
}

impl Payload {
    /// Wraps a native value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Repr::Value {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        })
    }

    /// The null payload.
    #[must_use]
    pub fn null() -> Self {
        Self(Repr::Null)
    }

    /// A sequence payload whose elements are spread as positional arguments
    /// during argument-shape resolution.
    pub fn sequence(items: impl IntoIterator<Item = Payload>) -> Self {
        Self(Repr::Sequence(items.into_iter().collect()))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.0, Repr::Null)
    }

    /// Elements of a sequence payload.
    #[must_use]
    pub fn as_sequence(&self) -> Option<&[Payload]> {
        match &self.0 {
            Repr::Sequence(items) => Some(&items[..]),
            _ => None,
        }
    }

    /// Runtime type name, or `None` for null.
    #[must_use]
    pub fn type_name(&self) -> Option<&'static str> {
        match &self.0 {
            Repr::Null => None,
            Repr::Value { type_name, .. } => Some(*type_name),
            Repr::Sequence(_) => Some(SEQUENCE_TYPE_NAME),
        }
    }

    /// Runtime type id of a value payload.
    #[must_use]
    pub fn type_id(&self) -> Option<TypeId> {
        match &self.0 {
            Repr::Value { type_id, .. } => Some(*type_id),
            _ => None,
        }
    }

    /// Format derived from the runtime type. `None` for null.
    #[must_use]
    pub fn format(&self) -> Option<PayloadFormat> {
        self.type_name().map(PayloadFormat::of_type_name)
    }

    /// Borrows the value if it is a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match &self.0 {
            Repr::Value { value, .. } => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Clones the value out if it is a `T`.
    #[must_use]
    pub fn cloned<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// Whether this payload can be passed for a parameter of type `ty`.
    ///
    /// Value payloads match on exact type. Null matches nullable parameters only.
    #[must_use]
    pub fn matches(&self, ty: &TypeDescriptor) -> bool {
        match &self.0 {
            Repr::Null => ty.nullable,
            Repr::Value { type_id, .. } => *type_id == ty.type_id,
            Repr::Sequence(_) => ty.type_id == TypeId::of::<Payload>(),
        }
    }

    /// Whether both payloads share the same underlying allocation.
    #[must_use]
    pub fn ptr_eq(a: &Payload, b: &Payload) -> bool {
        match (&a.0, &b.0) {
            (Repr::Null, Repr::Null) => true,
            (Repr::Value { value: x, .. }, Repr::Value { value: y, .. }) => Arc::ptr_eq(x, y),
            (Repr::Sequence(x), Repr::Sequence(y)) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Null => f.write_str("Payload(null)"),
            Repr::Value { type_name, value, .. } => {
                if let Some(text) = value.downcast_ref::<String>() {
                    write!(f, "Payload({text:?})")
                } else {
                    write!(f, "Payload(<{type_name}>)")
                }
            }
            Repr::Sequence(items) => f.debug_tuple("Payload").field(items).finish(),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::null()
    }
}

// ---------------------------------------------------------------------------
// TypeDescriptor
// ---------------------------------------------------------------------------

/// Describes the declared type of an operation parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    type_id: TypeId,
    type_name: &'static str,
    nullable: bool,
}

impl TypeDescriptor {
    /// A parameter of type `T` that rejects null.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            nullable: false,
        }
    }

    /// A parameter of type `T` that also accepts null.
    #[must_use]
    pub fn nullable<T: Any>() -> Self {
        Self {
            nullable: true,
            ..Self::of::<T>()
        }
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Format a value of this type is in when no explicit format applies.
    #[must_use]
    pub fn format(&self) -> PayloadFormat {
        PayloadFormat::of_type_name(self.type_name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct OrderRequest {
        order_id: String,
    }

    #[test]
    fn value_payload_downcasts_to_its_type() {
        let payload = Payload::new(OrderRequest {
            order_id: "D123".to_string(),
        });

        assert_eq!(
            payload.downcast_ref::<OrderRequest>().map(|r| r.order_id.as_str()),
            Some("D123")
        );
        assert!(payload.downcast_ref::<String>().is_none());
        assert_eq!(payload.type_name(), Some(std::any::type_name::<OrderRequest>()));
        assert_eq!(payload.format(), Some(PayloadFormat::of::<OrderRequest>()));
    }

    #[test]
    fn null_payload_has_no_type_or_format() {
        let payload = Payload::null();
        assert!(payload.is_null());
        assert!(payload.type_name().is_none());
        assert!(payload.format().is_none());
        assert!(payload.downcast_ref::<String>().is_none());
    }

    #[test]
    fn null_matches_only_nullable_parameters() {
        let null = Payload::null();
        assert!(!null.matches(&TypeDescriptor::of::<u32>()));
        assert!(null.matches(&TypeDescriptor::nullable::<OrderRequest>()));
    }

    #[test]
    fn value_matches_exact_type_only() {
        let payload = Payload::new(7_u32);
        assert!(payload.matches(&TypeDescriptor::of::<u32>()));
        assert!(payload.matches(&TypeDescriptor::nullable::<u32>()));
        assert!(!payload.matches(&TypeDescriptor::of::<u64>()));
    }

    #[test]
    fn sequence_exposes_its_elements() {
        let payload = Payload::sequence([Payload::new(1_u8), Payload::null()]);
        let items = payload.as_sequence().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[1].is_null());
        assert_eq!(payload.type_name(), Some(SEQUENCE_TYPE_NAME));
    }

    #[test]
    fn clones_share_the_allocation() {
        let payload = Payload::new("xml".to_string());
        let clone = payload.clone();
        assert!(Payload::ptr_eq(&payload, &clone));
        assert!(!Payload::ptr_eq(&payload, &Payload::new("xml".to_string())));
    }

    #[test]
    fn descriptor_format_matches_payload_format() {
        let payload = Payload::new(OrderRequest {
            order_id: "D1".to_string(),
        });
        assert_eq!(
            payload.format(),
            Some(TypeDescriptor::of::<OrderRequest>().format())
        );
    }
}
