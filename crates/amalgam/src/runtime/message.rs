//! Messages and dispatch.
//!
//! A message is a named, typed operation that mixins can implement. Calling
//! a message on an object looks up the object's current type, which maps
//! the message to its implementers in composition order, and invokes them
//! with the matching mixin instance as the receiver.
//!
//! - A [`UnicastMessage`] has at most one implementer per object. Calling it
//!   on an object without one is an [`Error::UnimplementedMessage`].
//! - A [`MulticastMessage`] calls every implementer in order. Results are
//!   folded by a [`Combinator`]; zero implementers is not an error.
//!
//! Handlers registered with [`MixinBuilder::implements`] receive `&T` and
//! can be called through a shared object. Handlers registered with
//! [`MixinBuilder::implements_mut`] receive `&mut T` and need the `_mut`
//! call forms, which take the object mutably.
//!
//! # Example
//!
//! ```rust
//! use amalgam::{Domain, DomainConfig, Mixin, MixinBuilder, Object, Sum};
//!
//! #[derive(Default)]
//! struct Health(i32);
//! impl Mixin for Health {
//!     const NAME: &'static str = "health";
//! }
//!
//! let domain = Domain::new("doc", DomainConfig::default());
//! let score = domain.register_multicast::<(), i32>("score").unwrap();
//! MixinBuilder::<Health>::new()
//!     .implements(&score, |h: &Health, ()| h.0)
//!     .default_constructible()
//!     .register(&domain)
//!     .unwrap();
//!
//! let mut object = Object::new(&domain);
//! object.mutate().add_value(Health(7)).apply().unwrap();
//! assert_eq!(score.call_with(&object, (), Sum::new()).unwrap(), 7);
//! ```
//!
//! [`MixinBuilder::implements`]: crate::MixinBuilder::implements
//! [`MixinBuilder::implements_mut`]: crate::MixinBuilder::implements_mut

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::runtime::combinator::{Combinator, Discard};
use crate::runtime::domain::Domain;
use crate::runtime::object::{Object, ObjectCore};
use crate::runtime::object_type::Implementer;

/// Dense message identifier, unique within a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub(crate) u32);

impl MessageId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a message treats multiple implementers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Unicast,
    Multicast,
}

/// Registered description of a message.
#[derive(Debug)]
pub struct MessageInfo {
    pub(crate) id: MessageId,
    /// Serial of the registering domain.
    pub(crate) domain: u64,
    pub(crate) name: Box<str>,
    pub(crate) policy: Policy,
    pub(crate) signature: &'static str,
}

impl MessageInfo {
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Rust rendering of the argument and return types.
    #[must_use]
    pub fn signature(&self) -> &'static str {
        self.signature
    }
}

/// Type-erased entry point stored for each (mixin, message) binding.
pub(crate) enum Handler<A, R> {
    Shared(Box<dyn Fn(*const u8, A) -> R + Send + Sync>),
    Exclusive(Box<dyn Fn(*mut u8, A) -> R + Send + Sync>),
}

/// Common view of unicast and multicast handles.
pub trait MessageHandle {
    /// Argument type passed to every implementer.
    type Args: 'static;
    /// Value each implementer returns.
    type Output: 'static;

    fn info(&self) -> &Arc<MessageInfo>;

    #[inline]
    fn id(&self) -> MessageId {
        self.info().id
    }

    #[inline]
    fn name(&self) -> &str {
        self.info().name()
    }
}

/// Rejects handles registered in a domain other than the object's.
fn check_domain(info: &MessageInfo, domain: &Domain) -> Result<()> {
    if info.domain == domain.serial() {
        Ok(())
    } else {
        Err(domain.fail(Error::UnknownMessage {
            name: info.name.to_string(),
        }))
    }
}

fn handler<'a, A: 'static, R: 'static>(
    info: &MessageInfo,
    implementer: &'a Implementer,
) -> Result<&'a Handler<A, R>> {
    let handler: &(dyn Any + Send + Sync) = &*implementer.handler;
    handler
        .downcast_ref::<Handler<A, R>>()
        .ok_or_else(|| Error::SignatureMismatch {
            message: info.name.to_string(),
        })
}

/// Typed handle to a unicast message.
pub struct UnicastMessage<A, R> {
    info: Arc<MessageInfo>,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A: 'static, R: 'static> UnicastMessage<A, R> {
    pub(crate) fn new(info: Arc<MessageInfo>) -> Self {
        UnicastMessage {
            info,
            _marker: PhantomData,
        }
    }

    /// Calls the implementer on a shared object.
    ///
    /// # Errors
    ///
    /// [`Error::UnimplementedMessage`] if no mixin of the object implements
    /// the message, and [`Error::ExclusiveHandler`] if the implementer needs
    /// `&mut` (use [`call_mut`](Self::call_mut)), and
    /// [`Error::UnknownMessage`] if the message was registered in another
    /// domain. All go through the domain's failure mode.
    pub fn call(&self, object: &ObjectCore, args: A) -> Result<R> {
        let domain = object.domain();
        check_domain(&self.info, domain)?;
        let state = object.state();
        let Some(implementer) = state.ty().implementers(self.info.id).first() else {
            return Err(domain.fail(Error::UnimplementedMessage {
                message: self.info.name.to_string(),
            }));
        };

        match handler::<A, R>(&self.info, implementer).map_err(|e| domain.fail(e))? {
            Handler::Shared(f) => Ok(f(state.mixin_ptr(implementer.position).cast_const(), args)),
            Handler::Exclusive(_) => Err(domain.fail(Error::ExclusiveHandler {
                message: self.info.name.to_string(),
                mixin: state.ty().mixin_name(implementer.position).to_string(),
            })),
        }
    }

    /// Calls the implementer on an exclusively borrowed object. Accepts both
    /// shared and mutable handlers.
    ///
    /// # Errors
    ///
    /// [`Error::UnimplementedMessage`] if no mixin implements the message and
    /// [`Error::UnknownMessage`] if it belongs to another domain.
    pub fn call_mut(&self, object: &mut Object, args: A) -> Result<R> {
        let domain = object.domain();
        check_domain(&self.info, domain)?;
        let state = object.state();
        let Some(implementer) = state.ty().implementers(self.info.id).first() else {
            return Err(domain.fail(Error::UnimplementedMessage {
                message: self.info.name.to_string(),
            }));
        };

        let ptr = state.mixin_ptr(implementer.position);
        match handler::<A, R>(&self.info, implementer).map_err(|e| domain.fail(e))? {
            Handler::Shared(f) => Ok(f(ptr.cast_const(), args)),
            Handler::Exclusive(f) => Ok(f(ptr, args)),
        }
    }

    /// Whether `object` currently has an implementer.
    #[must_use]
    pub fn is_implemented_by(&self, object: &ObjectCore) -> bool {
        object.implements(self)
    }
}

impl<A: 'static, R: 'static> MessageHandle for UnicastMessage<A, R> {
    type Args = A;
    type Output = R;

    fn info(&self) -> &Arc<MessageInfo> {
        &self.info
    }
}

impl<A, R> Clone for UnicastMessage<A, R> {
    fn clone(&self) -> Self {
        UnicastMessage {
            info: Arc::clone(&self.info),
            _marker: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for UnicastMessage<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnicastMessage")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .finish()
    }
}

/// Typed handle to a multicast message.
pub struct MulticastMessage<A, R> {
    info: Arc<MessageInfo>,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A: Clone + 'static, R: 'static> MulticastMessage<A, R> {
    pub(crate) fn new(info: Arc<MessageInfo>) -> Self {
        MulticastMessage {
            info,
            _marker: PhantomData,
        }
    }

    /// Calls every implementer on a shared object, discarding results.
    ///
    /// # Errors
    ///
    /// [`Error::ExclusiveHandler`] if any implementer needs `&mut`. In that
    /// case no implementer runs.
    pub fn call(&self, object: &ObjectCore, args: A) -> Result<()> {
        self.call_with(object, args, Discard)
    }

    /// Calls every implementer on a shared object and folds the results.
    ///
    /// Each implementer receives its own clone of `args`. The fold stops
    /// early when the combinator breaks.
    ///
    /// # Errors
    ///
    /// [`Error::ExclusiveHandler`] if any implementer needs `&mut`. In that
    /// case no implementer runs. [`Error::UnknownMessage`] if the message
    /// belongs to another domain.
    pub fn call_with<C: Combinator<R>>(
        &self,
        object: &ObjectCore,
        args: A,
        mut combinator: C,
    ) -> Result<C::Output> {
        let domain = object.domain();
        check_domain(&self.info, domain)?;
        let state = object.state();
        let implementers = state.ty().implementers(self.info.id);

        if let Some(exclusive) = implementers.iter().find(|imp| imp.exclusive) {
            return Err(domain.fail(Error::ExclusiveHandler {
                message: self.info.name.to_string(),
                mixin: state.ty().mixin_name(exclusive.position).to_string(),
            }));
        }

        for implementer in implementers {
            let value = match handler::<A, R>(&self.info, implementer).map_err(|e| domain.fail(e))? {
                Handler::Shared(f) => f(state.mixin_ptr(implementer.position).cast_const(), args.clone()),
                Handler::Exclusive(_) => {
                    return Err(domain.fail(Error::ExclusiveHandler {
                        message: self.info.name.to_string(),
                        mixin: state.ty().mixin_name(implementer.position).to_string(),
                    }));
                }
            };
            if let ControlFlow::Break(()) = combinator.add(value) {
                break;
            }
        }
        Ok(combinator.finish())
    }

    /// Calls every implementer on an exclusively borrowed object, discarding
    /// results.
    pub fn call_mut(&self, object: &mut Object, args: A) -> Result<()> {
        self.call_with_mut(object, args, Discard)
    }

    /// Calls every implementer on an exclusively borrowed object and folds
    /// the results. Accepts both shared and mutable handlers.
    pub fn call_with_mut<C: Combinator<R>>(
        &self,
        object: &mut Object,
        args: A,
        mut combinator: C,
    ) -> Result<C::Output> {
        let domain = object.domain();
        check_domain(&self.info, domain)?;
        let state = object.state();

        for implementer in state.ty().implementers(self.info.id) {
            let ptr = state.mixin_ptr(implementer.position);
            let value = match handler::<A, R>(&self.info, implementer).map_err(|e| domain.fail(e))? {
                Handler::Shared(f) => f(ptr.cast_const(), args.clone()),
                Handler::Exclusive(f) => f(ptr, args.clone()),
            };
            if let ControlFlow::Break(()) = combinator.add(value) {
                break;
            }
        }
        Ok(combinator.finish())
    }

    /// Number of implementers on `object`.
    #[must_use]
    pub fn implementer_count(&self, object: &ObjectCore) -> usize {
        object.implementer_count(self)
    }
}

impl<A: 'static, R: 'static> MessageHandle for MulticastMessage<A, R> {
    type Args = A;
    type Output = R;

    fn info(&self) -> &Arc<MessageInfo> {
        &self.info
    }
}

impl<A, R> Clone for MulticastMessage<A, R> {
    fn clone(&self) -> Self {
        MulticastMessage {
            info: Arc::clone(&self.info),
            _marker: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for MulticastMessage<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MulticastMessage")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .finish()
    }
}
