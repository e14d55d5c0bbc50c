//! Object types: the dispatch table for one ordered mixin composition.
//!
//! Every distinct ordered list of mixins gets one [`ObjectType`], built the
//! first time an object reaches that composition and cached by the domain.
//! All objects with the same composition share it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fxhash::FxHashMap;

use crate::runtime::message::MessageId;
use crate::runtime::mixin::{MixinId, MixinInfo};

/// One implementer of a message inside an object type.
pub(crate) struct Implementer {
    /// Index of the implementing mixin in the composition.
    pub(crate) position: usize,
    pub(crate) handler: Arc<dyn Any + Send + Sync>,
    pub(crate) exclusive: bool,
}

/// Immutable dispatch table for one ordered set of mixins.
pub struct ObjectType {
    mixins: Box<[Arc<MixinInfo>]>,
    positions: FxHashMap<MixinId, usize>,
    calls: FxHashMap<MessageId, Box<[Implementer]>>,
    objects: AtomicUsize,
}

impl ObjectType {
    pub(crate) fn build(mixins: Vec<Arc<MixinInfo>>) -> Self {
        let mut positions = FxHashMap::default();
        let mut calls: FxHashMap<MessageId, Vec<Implementer>> = FxHashMap::default();

        for (position, info) in mixins.iter().enumerate() {
            positions.insert(info.id, position);
            for binding in &info.bindings {
                calls.entry(binding.message.id).or_default().push(Implementer {
                    position,
                    handler: Arc::clone(&binding.handler),
                    exclusive: binding.exclusive,
                });
            }
        }

        ObjectType {
            mixins: mixins.into_boxed_slice(),
            positions,
            calls: calls
                .into_iter()
                .map(|(id, implementers)| (id, implementers.into_boxed_slice()))
                .collect(),
            objects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::build(Vec::new())
    }

    #[must_use]
    pub fn mixin_count(&self) -> usize {
        self.mixins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mixins.is_empty()
    }

    /// Mixins in composition order.
    pub fn mixins(&self) -> impl Iterator<Item = &MixinInfo> + '_ {
        self.mixins.iter().map(|info| &**info)
    }

    pub fn mixin_ids(&self) -> impl Iterator<Item = MixinId> + '_ {
        self.mixins.iter().map(|info| info.id)
    }

    #[inline]
    #[must_use]
    pub fn has(&self, id: MixinId) -> bool {
        self.positions.contains_key(&id)
    }

    #[inline]
    #[must_use]
    pub fn position(&self, id: MixinId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    #[inline]
    #[must_use]
    pub fn implements(&self, message: MessageId) -> bool {
        self.calls.contains_key(&message)
    }

    #[inline]
    #[must_use]
    pub fn implementer_count(&self, message: MessageId) -> usize {
        self.implementers(message).len()
    }

    /// Number of live compositions using this type.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.load(Ordering::Relaxed)
    }

    /// Whether this type was built from exactly `mixins`, in order.
    pub(crate) fn is_made_of(&self, mixins: &[Arc<MixinInfo>]) -> bool {
        self.mixins.len() == mixins.len()
            && self.mixins.iter().zip(mixins).all(|(a, b)| Arc::ptr_eq(a, b))
    }

    #[inline]
    pub(crate) fn implementers(&self, message: MessageId) -> &[Implementer] {
        match self.calls.get(&message) {
            Some(implementers) => implementers,
            None => &[],
        }
    }

    pub(crate) fn mixin_name(&self, position: usize) -> &str {
        self.mixins.get(position).map_or("<unknown>", |info| info.name())
    }

    pub(crate) fn attach(&self) {
        self.objects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn detach(&self) {
        self.objects.fetch_sub(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectType")
            .field("mixins", &self.mixins.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("messages", &self.calls.len())
            .field("objects", &self.object_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Domain, DomainConfig, MessageHandle, Mixin, MixinBuilder};

    #[derive(Default)]
    struct A;
    impl Mixin for A {
        const NAME: &'static str = "a";
    }

    #[derive(Default)]
    struct B;
    impl Mixin for B {
        const NAME: &'static str = "b";
    }

    #[test]
    fn test_build_orders_implementers_by_position() {
        let domain = Domain::new("object-type-tests", DomainConfig::default());
        let ping = domain.register_multicast::<(), u8>("ping").unwrap();
        let only_b = domain.register_unicast::<(), u8>("only-b").unwrap();

        let a = MixinBuilder::<A>::new()
            .implements(&ping, |_: &A, ()| 1)
            .register(&domain)
            .unwrap();
        let b = MixinBuilder::<B>::new()
            .implements(&ping, |_: &B, ()| 2)
            .implements(&only_b, |_: &B, ()| 3)
            .register(&domain)
            .unwrap();

        let infos = vec![domain.mixin_info(b).unwrap(), domain.mixin_info(a).unwrap()];
        let ty = ObjectType::build(infos);

        assert_eq!(ty.mixin_count(), 2);
        assert_eq!(ty.position(b), Some(0));
        assert_eq!(ty.position(a), Some(1));
        assert_eq!(
            ty.implementers(ping.id()).iter().map(|i| i.position).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(ty.implementer_count(only_b.id()), 1);
        assert_eq!(ty.mixin_ids().collect::<Vec<_>>(), vec![b, a]);
    }

    #[test]
    fn test_empty_type() {
        let ty = ObjectType::empty();
        assert!(ty.is_empty());
        assert_eq!(ty.implementer_count(MessageId(0)), 0);
        assert!(!ty.has(MixinId(0)));
    }
}
