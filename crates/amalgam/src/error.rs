//! Error types for the `amalgam` runtime.
//!
//! Registration defects (duplicate shapes, ambiguous unicast implementers,
//! capacity limits) are returned from the registration call that caused them
//! and logged at error level. Per-call conditions (missing implementers,
//! failed allocations during a mutation) go through the domain's configured
//! failure mode before they reach the caller.

use thiserror::Error;

/// Errors that can occur in the `amalgam` runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An allocator returned no storage for a mixin instance.
    #[error("allocation failed for mixin '{mixin}' ({size} bytes, alignment {alignment})")]
    AllocationFailure {
        /// Name of the mixin being constructed.
        mixin: String,
        /// Size of the mixin type.
        size: usize,
        /// Alignment of the mixin type.
        alignment: usize,
    },

    /// An allocator returned no storage for an object's mixin data array.
    #[error("allocation failed for a mixin data array of {count} entries")]
    MixinDataAllocationFailure {
        /// Number of entries requested.
        count: usize,
    },

    /// An allocator returned a buffer whose offset violates the placement
    /// rules (misaligned, or no room for the back-reference).
    #[error("allocator misplaced mixin '{mixin}': offset {offset}, alignment {alignment}")]
    MisalignedStorage {
        /// Name of the mixin being constructed.
        mixin: String,
        /// Offset returned by the allocator.
        offset: usize,
        /// Required alignment.
        alignment: usize,
    },

    /// Invalid alignment specified.
    #[error("invalid alignment: {alignment} is not a power of two")]
    InvalidAlignment {
        /// The requested alignment.
        alignment: usize,
    },

    /// A key was registered again with an incompatible shape.
    #[error("'{name}' is already registered with a different shape: {reason}")]
    DuplicateRegistration {
        /// The stable key.
        name: String,
        /// What differs between the two registrations.
        reason: String,
    },

    /// A second mixin tried to implement a unicast message.
    #[error("unicast message '{message}' is implemented by '{existing}', cannot also bind '{mixin}'")]
    AmbiguousUnicast {
        /// The unicast message.
        message: String,
        /// The mixin that already implements it.
        existing: String,
        /// The rejected mixin.
        mixin: String,
    },

    /// Unicast dispatch found no implementer on the object.
    #[error("no mixin of the object implements '{message}'")]
    UnimplementedMessage {
        /// The message that was called.
        message: String,
    },

    /// A structural change was attempted on an object that cannot take it.
    #[error("invalid mutation: {reason}")]
    InvalidMutation {
        /// Why the mutation was refused.
        reason: &'static str,
    },

    /// No mixin is registered under this key.
    #[error("unknown mixin '{name}'")]
    UnknownMixin {
        /// The key that was looked up.
        name: String,
    },

    /// A message handle does not belong to the domain it was used with.
    #[error("message '{name}' is not registered in this domain")]
    UnknownMessage {
        /// The message name.
        name: String,
    },

    /// A mixin was added by name but was registered without a default
    /// constructor.
    #[error("mixin '{mixin}' has no default constructor")]
    MissingConstructor {
        /// The mixin name.
        mixin: String,
    },

    /// A mixin was copied but was registered without copy support.
    #[error("mixin '{mixin}' is not copyable")]
    NotCopyable {
        /// The mixin name.
        mixin: String,
    },

    /// Object copy was requested while implicit copying is disabled.
    #[error("object copy is disabled in this domain")]
    CopyDisabled,

    /// A shared mutation was requested while thread-safe mutations are off.
    #[error("thread-safe mutations are disabled in this domain")]
    ThreadSafeMutationsDisabled,

    /// A shared-object call reached an implementer that needs `&mut`.
    #[error("'{message}' is implemented by '{mixin}' through a mutable handler; use a mutable call")]
    ExclusiveHandler {
        /// The message that was called.
        message: String,
        /// The mixin with the mutable handler.
        mixin: String,
    },

    /// A stored handler does not match the message's signature.
    #[error("handler for '{message}' does not match the message signature")]
    SignatureMismatch {
        /// The message that was called.
        message: String,
    },

    /// The domain already holds its maximum number of mixins.
    #[error("too many mixins: the domain allows {max}")]
    TooManyMixins {
        /// Configured limit.
        max: usize,
    },

    /// The domain already holds its maximum number of messages.
    #[error("too many messages: the domain allows {max}")]
    TooManyMessages {
        /// Configured limit.
        max: usize,
    },

    /// An object's allocator was replaced after it had started allocating
    /// (strict mode only).
    #[error("allocator replaced after it had already allocated")]
    AllocatorSwitch,

    /// A mixin cannot be unregistered while instances of it exist.
    #[error("mixin '{name}' still has {instances} live instance(s)")]
    MixinInUse {
        /// The mixin name.
        name: String,
        /// Number of live instances.
        instances: usize,
    },
}

/// Result type for `amalgam` runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::UnimplementedMessage {
                message: "render".into()
            }
            .to_string(),
            "no mixin of the object implements 'render'"
        );
        assert_eq!(
            Error::AllocationFailure {
                mixin: "physics".into(),
                size: 24,
                alignment: 8
            }
            .to_string(),
            "allocation failed for mixin 'physics' (24 bytes, alignment 8)"
        );
        assert_eq!(
            Error::InvalidMutation {
                reason: "object is being destroyed"
            }
            .to_string(),
            "invalid mutation: object is being destroyed"
        );
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(Error::CopyDisabled, Error::CopyDisabled);
        assert_ne!(
            Error::TooManyMixins { max: 4 },
            Error::TooManyMixins { max: 8 }
        );
    }
}
