//! Session identity used for cancellation authorization and exclusivity.

use std::fmt;
use uuid::Uuid;

/// Opaque identity of the session/connection that owns a subscription.
///
/// Two tokens are equal iff they name the same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnershipToken(Uuid);

impl OwnershipToken {
    /// Mints a fresh identity for a new session.
    pub fn new() -> Self {
        OwnershipToken(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        OwnershipToken(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Whether `other` belongs to the same session as this token.
    #[inline]
    pub fn is_local(&self, other: &OwnershipToken) -> bool {
        self == other
    }
}

impl Default for OwnershipToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnershipToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
