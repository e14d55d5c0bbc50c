//! `Amalgam` runtime module.
//!
//! - [`allocator`]: the allocator protocol and built-in allocators
//! - [`mixin`]: mixin declaration and registration
//! - [`message`]: typed message handles and dispatch
//! - [`combinator`]: folding multicast results
//! - [`domain`]: registries and the object-type cache
//! - [`object_type`]: dispatch tables per composition
//! - [`object`]: objects, storage and back-references
//! - [`mutation`]: transactional structural changes
//! - [`template`]: prepared compositions
//! - [`metrics`]: domain counters

pub mod allocator;
pub mod combinator;
pub mod domain;
pub mod message;
pub mod metrics;
pub mod mixin;
pub mod mutation;
pub mod object;
pub mod object_type;
pub mod template;

pub use allocator::{
    AllocError, ArenaAllocator, DefaultAllocator, DomainAllocator, MIXIN_DATA_ALIGN,
    MIXIN_DATA_SIZE, MixinAllocator, MixinBuffer, MixinOnly,
};
pub use combinator::{BooleanAnd, BooleanOr, Collect, Combinator, Discard, FirstNonDefault, Sum};
pub use domain::Domain;
pub use message::{MessageHandle, MessageId, MessageInfo, MulticastMessage, Policy, UnicastMessage};
pub use metrics::Metrics;
pub use mixin::{Mixin, MixinBuilder, MixinId, MixinInfo};
pub use mutation::Mutation;
pub use object::{MixinRef, Object, ObjectCore, object_of};
pub use object_type::ObjectType;
pub use template::{ObjectTemplate, TemplateBuilder};
