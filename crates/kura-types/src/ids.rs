//! Item identity.
//!
//! Every item in a synchronized collection has two kinds of identity:
//!
//! - its **identifier** ([`Identifiable::id`]), a hashable key unique within a
//!   snapshot, which decides which file the item lives in;
//! - its **value identity** ([`Identifiable::value_identity`]), a signature of
//!   the item's payload used to recognise that a removed entry and an inserted
//!   entry are the same logical item under a new identifier (a rename).

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Signature used to match removed and inserted items during rename detection.
///
/// Computed once per item and compared by tag and payload. `Unsupported`
/// items never take part in rename detection.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub enum ValueIdentity {
    /// Hash of the item's payload.
    Hashed(u64),
    /// Address of a shared allocation (reference identity).
    Reference(usize),
    /// Neither hashable nor reference-identified.
    #[default]
    Unsupported,
}

impl ValueIdentity {
    /// Signature from a hashable payload.
    pub fn hashed<H: Hash + ?Sized>(value: &H) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Self::Hashed(hasher.finish())
    }

    /// Signature from the allocation behind an `Arc`.
    ///
    /// Two clones of the same `Arc` share an identity; two equal values in
    /// separate allocations do not.
    pub fn of_arc<U: ?Sized>(value: &Arc<U>) -> Self {
        Self::Reference(Arc::as_ptr(value) as *const () as usize)
    }

    /// Returns true unless this is [`ValueIdentity::Unsupported`].
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

impl fmt::Display for ValueIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hashed(h) => write!(f, "hash:{:016x}", h),
            Self::Reference(p) => write!(f, "ref:{:#x}", p),
            Self::Unsupported => f.write_str("unsupported"),
        }
    }
}

/// An item that can live in a [`Snapshot`](crate::Snapshot).
pub trait Identifiable {
    /// Key type; unique within a snapshot.
    type Id: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The item's identifier.
    fn id(&self) -> Self::Id;

    /// Payload signature for rename detection.
    ///
    /// The default opts out of rename detection. Implementors typically hash
    /// everything except the identifier, so that an item re-inserted under a
    /// new key keeps its signature.
    fn value_identity(&self) -> ValueIdentity {
        ValueIdentity::Unsupported
    }

    /// Confirms a rename candidate found through [`value_identity`](Self::value_identity).
    ///
    /// Guards against hash collisions. Defaults to comparing signatures.
    fn same_value(&self, other: &Self) -> bool {
        self.value_identity() == other.value_identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashed_is_stable() {
        assert_eq!(ValueIdentity::hashed("b"), ValueIdentity::hashed("b"));
        assert_ne!(ValueIdentity::hashed("a"), ValueIdentity::hashed("b"));
    }

    #[test]
    fn test_arc_identity_follows_allocation() {
        let a = Arc::new(String::from("same"));
        let b = Arc::new(String::from("same"));
        assert_eq!(ValueIdentity::of_arc(&a), ValueIdentity::of_arc(&a.clone()));
        assert_ne!(ValueIdentity::of_arc(&a), ValueIdentity::of_arc(&b));
    }

    #[test]
    fn test_tags_never_collide() {
        assert_ne!(ValueIdentity::Hashed(7), ValueIdentity::Reference(7));
        assert!(!ValueIdentity::Unsupported.is_supported());
        assert!(ValueIdentity::Hashed(0).is_supported());
    }
}
