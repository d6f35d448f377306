//! Message type identity.
//!
//! Every registration and lookup in this crate is keyed by a
//! [`MessageTypeKey`]: a stable `{namespace, name}` pair supplied
//! explicitly by the message type itself. There is no runtime type
//! inspection anywhere; if two message kinds are distinct, their keys
//! must be distinct.

use std::fmt;

/// Stable identifier for a logical message type.
///
/// The namespace disambiguates equal type names across applications, so
/// two distinct message kinds never collide on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageTypeKey {
    namespace: String,
    name: String,
}

impl MessageTypeKey {
    /// Create a key from a namespace (package/module path) and type name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The message type's namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The message type's bare name (used by queue naming conventions).
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for MessageTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

/// A logical message kind known to the topology.
///
/// Implementors supply their own key; the crate never derives one by
/// reflection. Payloads stay opaque bytes end to end, so this trait is
/// purely an identity seam.
///
/// ```
/// use bushost::message::{Message, MessageTypeKey};
///
/// struct OrderPlaced;
///
/// impl Message for OrderPlaced {
///     fn type_key() -> MessageTypeKey {
///         MessageTypeKey::new("shop.orders", "OrderPlaced")
///     }
/// }
/// ```
pub trait Message: Send + Sync + 'static {
    /// The stable key identifying this message kind.
    fn type_key() -> MessageTypeKey;
}
