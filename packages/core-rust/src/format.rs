//! Payload format identity.
//!
//! A [`PayloadFormat`] names the representation a payload is in: an XML
//! document of a given schema, a JSON object of a given version, or a native
//! Rust value of a given type. Formats are plain identity tokens; two formats
//! are the same format iff their tokens are equal.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Token prefix for formats derived from a native Rust type.
pub const NATIVE_PREFIX: &str = "rust:";

/// Immutable identity of a payload's wire or logical format.
///
/// Cloning is cheap (the token is reference counted). Equality and hashing
/// are structural over the token.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadFormat(Arc<str>);

impl PayloadFormat {
    /// Creates a format from an explicit token such as `"urn:createOrderRequest:v1:soap"`.
    #[must_use]
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(Arc::from(token.as_ref()))
    }

    /// Derives the canonical format of the native type `T`.
    #[must_use]
    pub fn of<T: ?Sized>() -> Self {
        Self::of_type_name(std::any::type_name::<T>())
    }

    /// Derives the canonical format for a native type given by name.
    #[must_use]
    pub fn of_type_name(type_name: &str) -> Self {
        Self(Arc::from(format!("{NATIVE_PREFIX}{type_name}")))
    }

    /// Resolves an optional explicit token, falling back to the format
    /// derived from `type_name` when the token is absent or empty.
    #[must_use]
    pub fn resolve(explicit: Option<&str>, type_name: &str) -> Self {
        match explicit {
            Some(token) if !token.is_empty() => Self::new(token),
            _ => Self::of_type_name(type_name),
        }
    }

    /// Returns the identity token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this format was derived from a native type.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.0.starts_with(NATIVE_PREFIX)
    }

    /// Returns the native type name for derived formats.
    #[must_use]
    pub fn native_type_name(&self) -> Option<&str> {
        self.0.strip_prefix(NATIVE_PREFIX)
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadFormat({})", self.0)
    }
}

impl From<&str> for PayloadFormat {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for PayloadFormat {
    fn from(token: String) -> Self {
        Self(Arc::from(token))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
