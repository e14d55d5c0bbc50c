//! # Amalgam
//!
//! Runtime object composition. Objects are assembled from *mixins*
//! (ordinary Rust types) while the program runs, and behavior is invoked
//! through *messages* that any mixin may implement.
//!
//! ## Features
//!
//! - **Dynamic composition**: add, replace and remove mixins on live objects
//! - **Message dispatch**: unicast (one implementer) and multicast (all
//!   implementers, folded by a combinator)
//! - **Shared object types**: one cached dispatch table per composition
//! - **Pluggable allocators**: per domain, per object or per mixin type
//! - **Back-references**: find the owning object from a mixin
//!
//! ## Quick Start
//!
//! ```rust
//! use amalgam::{Domain, DomainConfig, Mixin, MixinBuilder, Object, Sum};
//!
//! #[derive(Default)]
//! struct Walker { speed: i32 }
//! impl Mixin for Walker {
//!     const NAME: &'static str = "walker";
//! }
//!
//! #[derive(Default)]
//! struct Swimmer { speed: i32 }
//! impl Mixin for Swimmer {
//!     const NAME: &'static str = "swimmer";
//! }
//!
//! let domain = Domain::new("zoo", DomainConfig::default());
//! let speed = domain.register_multicast::<(), i32>("speed").unwrap();
//! let name = domain.register_unicast::<(), &'static str>("name").unwrap();
//!
//! MixinBuilder::<Walker>::new()
//!     .implements(&speed, |w: &Walker, ()| w.speed)
//!     .implements(&name, |_: &Walker, ()| "walker")
//!     .register(&domain)
//!     .unwrap();
//! MixinBuilder::<Swimmer>::new()
//!     .implements(&speed, |s: &Swimmer, ()| s.speed)
//!     .register(&domain)
//!     .unwrap();
//!
//! let mut duck = Object::new(&domain);
//! duck.mutate()
//!     .add_value(Walker { speed: 2 })
//!     .add_value(Swimmer { speed: 3 })
//!     .apply()
//!     .unwrap();
//!
//! assert_eq!(speed.call_with(&duck, (), Sum::new()).unwrap(), 5);
//! assert_eq!(name.call(&duck, ()).unwrap(), "walker");
//! ```
//!
//! ## Logging
//!
//! The runtime logs through `amalgam-log`. Set `AMALGAM_LOG` (for example
//! `AMALGAM_LOG=debug`) and call [`amalgam_log::init_from_env`], or use
//! [`Domain::global`], which does so on first use.

#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod runtime;

pub use config::{DomainConfig, FailureMode, IdentityStrategy};
pub use error::{Error, Result};
pub use runtime::{
    AllocError, ArenaAllocator, BooleanAnd, BooleanOr, Collect, Combinator, DefaultAllocator,
    Discard, Domain, DomainAllocator, FirstNonDefault, MIXIN_DATA_ALIGN, MIXIN_DATA_SIZE,
    MessageHandle, MessageId, MessageInfo, Metrics, Mixin, MixinAllocator, MixinBuffer,
    MixinBuilder, MixinId, MixinInfo, MixinOnly, MixinRef, MulticastMessage, Mutation, Object,
    ObjectCore, ObjectTemplate, ObjectType, Policy, Sum, TemplateBuilder, UnicastMessage,
    object_of,
};

pub use amalgam_log as log;
pub use amalgam_mem as mem;
