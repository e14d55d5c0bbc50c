//! Structural changes to objects.
//!
//! A [`Mutation`] collects add and remove requests and applies them as one
//! transaction:
//!
//! 1. compute the target mixin list from the current one (adding a mixin
//!    the object already has replaces it in place, removing an absent one
//!    does nothing)
//! 2. allocate and construct every new instance
//! 3. fetch the cached object type and build the new mixin data array
//! 4. swap the new composition in, then release what it replaced
//!
//! A failure in steps 1 to 3 leaves the object exactly as it was; whatever
//! was staged is destroyed and returned to its allocator. Mixins that are
//! kept are not copied or moved.
//!
//! # Example
//!
//! ```rust
//! use amalgam::{Domain, DomainConfig, Mixin, MixinBuilder, Object};
//!
//! #[derive(Default)]
//! struct Armor(u32);
//! impl Mixin for Armor {
//!     const NAME: &'static str = "armor";
//! }
//!
//! #[derive(Default)]
//! struct Shield;
//! impl Mixin for Shield {
//!     const NAME: &'static str = "shield";
//! }
//!
//! let domain = Domain::new("doc", DomainConfig::default());
//! MixinBuilder::<Armor>::new().register(&domain).unwrap();
//! MixinBuilder::<Shield>::new().default_constructible().register(&domain).unwrap();
//!
//! let mut object = Object::new(&domain);
//! object
//!     .mutate()
//!     .add_value(Armor(3))
//!     .add_named("shield")
//!     .apply()
//!     .unwrap();
//! assert_eq!(object.mixin_names(), ["armor", "shield"]);
//!
//! object.mutate().remove::<Armor>().apply().unwrap();
//! assert_eq!(object.mixin_names(), ["shield"]);
//! ```

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::runtime::domain::Domain;
use crate::runtime::mixin::{Mixin, MixinInfo};
use crate::runtime::object::{Composition, MixinSlot, ObjectCore, Ready};
use crate::runtime::object_type::ObjectType;

/// Which mixin a request refers to.
pub(crate) enum Target {
    Typed {
        key: &'static str,
        type_name: &'static str,
    },
    Named(String),
    Info(Arc<MixinInfo>),
}

impl Target {
    fn typed<T: Mixin>(domain: &Domain) -> Self {
        Target::Typed {
            key: domain.key_of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    fn resolve(&self, domain: &Domain) -> Option<Arc<MixinInfo>> {
        match self {
            Target::Typed { key, type_name } => domain
                .mixin_by_name(key)
                .filter(|info| info.type_name() == *type_name),
            Target::Named(name) => domain.mixin_by_name(name),
            Target::Info(info) => domain.is_current(info).then(|| Arc::clone(info)),
        }
    }

    fn name(&self) -> String {
        match self {
            Target::Typed { key, .. } => (*key).to_string(),
            Target::Named(name) => name.clone(),
            Target::Info(info) => info.name().to_string(),
        }
    }
}

/// How an added mixin is initialized.
pub(crate) enum Init {
    /// The registered default constructor.
    Default,
    /// Moves a caller-provided value into the storage.
    Value(Box<dyn FnOnce(*mut u8) + Send>),
    /// Clones an existing instance of the same mixin.
    CloneOf(Arc<MixinSlot>),
}

enum Op {
    Add(Target, Init),
    Remove(Target),
    Clear,
}

enum Source {
    Keep(Arc<MixinSlot>),
    Build(Ready),
}

struct Staged {
    info: Arc<MixinInfo>,
    source: Source,
}

/// Pending structural change of one object.
#[must_use = "a mutation does nothing until applied"]
pub struct Mutation<'a> {
    object: &'a ObjectCore,
    ops: Vec<Op>,
    prepared: Option<Arc<ObjectType>>,
}

impl<'a> Mutation<'a> {
    pub(crate) fn new(object: &'a ObjectCore) -> Self {
        Mutation {
            object,
            ops: Vec::new(),
            prepared: None,
        }
    }

    /// Uses `ty` for the result when it matches, skipping the cache lookup.
    pub(crate) fn with_type(mut self, ty: Arc<ObjectType>) -> Self {
        self.prepared = Some(ty);
        self
    }

    /// Adds a default-constructed `T`, replacing the current one if present.
    pub fn add<T: Mixin + Default>(self) -> Self {
        let target = Target::typed::<T>(self.object.domain());
        let write = |dst: *mut u8| {
            // SAFETY: the runtime passes fresh storage sized and aligned for T.
            unsafe { dst.cast::<T>().write(T::default()) }
        };
        self.push_add(target, Init::Value(Box::new(write)))
    }

    /// Adds `value`, replacing the current `T` if present.
    pub fn add_value<T: Mixin>(self, value: T) -> Self {
        let target = Target::typed::<T>(self.object.domain());
        let write = move |dst: *mut u8| {
            // SAFETY: the runtime passes fresh storage sized and aligned for T.
            unsafe { dst.cast::<T>().write(value) }
        };
        self.push_add(target, Init::Value(Box::new(write)))
    }

    /// Adds the mixin registered under `name` using its default constructor.
    pub fn add_named(self, name: &str) -> Self {
        self.push_add(Target::Named(name.to_string()), Init::Default)
    }

    /// Removes `T`. Does nothing if the object does not have it.
    pub fn remove<T: Mixin>(mut self) -> Self {
        let target = Target::typed::<T>(self.object.domain());
        self.ops.push(Op::Remove(target));
        self
    }

    /// Removes the mixin registered under `name`, if present.
    pub fn remove_named(mut self, name: &str) -> Self {
        self.ops.push(Op::Remove(Target::Named(name.to_string())));
        self
    }

    /// Removes every mixin the object has at this point of the mutation.
    pub fn clear(mut self) -> Self {
        self.ops.push(Op::Clear);
        self
    }

    pub(crate) fn push_add(mut self, target: Target, init: Init) -> Self {
        self.ops.push(Op::Add(target, init));
        self
    }

    /// Number of queued requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Applies the mutation.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownMixin`] if an added mixin is not registered
    /// - [`Error::MissingConstructor`] if a mixin added by name has no
    ///   default constructor
    /// - [`Error::AllocationFailure`], [`Error::MisalignedStorage`] or
    ///   [`Error::MixinDataAllocationFailure`] if storage could not be
    ///   obtained
    /// - [`Error::InvalidMutation`] if the object is being destroyed
    ///
    /// The object is unchanged on error. Errors go through the domain's
    /// failure mode.
    pub fn apply(self) -> Result<()> {
        let domain = self.object.domain().clone();
        match self.run() {
            Ok(committed) => {
                if committed {
                    domain.counters().mutation(true);
                }
                Ok(())
            }
            Err(err) => {
                domain.counters().mutation(false);
                Err(domain.fail(err))
            }
        }
    }

    fn run(self) -> Result<bool> {
        let Mutation {
            object,
            ops,
            prepared,
        } = self;
        if object.is_tearing_down() {
            return Err(Error::InvalidMutation {
                reason: "object is being destroyed",
            });
        }

        let domain = object.domain();
        // Declared before the lock: on failure, instances built so far are
        // destroyed after unlocking, so their destructors may mutate again.
        let mut slots: Vec<Arc<MixinSlot>> = Vec::new();
        let lock = object.lock_mutations();
        domain.seal();
        let current = object.state_full();

        let mut target: Vec<Staged> = current
            .entries()
            .iter()
            .map(|entry| Staged {
                info: Arc::clone(entry.slot().info()),
                source: Source::Keep(Arc::clone(entry.slot())),
            })
            .collect();

        for op in ops {
            match op {
                Op::Add(request, init) => {
                    let info = request
                        .resolve(domain)
                        .ok_or_else(|| Error::UnknownMixin {
                            name: request.name(),
                        })?;
                    let source = Source::Build(Ready::prepare(init, &info)?);
                    match target.iter_mut().find(|staged| staged.info.id == info.id) {
                        Some(staged) => {
                            staged.info = info;
                            staged.source = source;
                        }
                        None => target.push(Staged { info, source }),
                    }
                }
                Op::Remove(request) => {
                    if let Some(info) = request.resolve(domain) {
                        target.retain(|staged| staged.info.id != info.id);
                    }
                }
                Op::Clear => target.clear(),
            }
        }

        let entries = current.entries();
        let unchanged = target.len() == entries.len()
            && target.iter().zip(entries).all(|(staged, entry)| {
                matches!(&staged.source, Source::Keep(slot) if Arc::ptr_eq(slot, entry.slot()))
            });
        if unchanged {
            return Ok(false);
        }

        let infos: Vec<Arc<MixinInfo>> = target.iter().map(|s| Arc::clone(&s.info)).collect();
        slots.reserve(target.len());
        for staged in target {
            let slot = match staged.source {
                Source::Keep(slot) => slot,
                Source::Build(ready) => {
                    let allocator = staged
                        .info
                        .allocator
                        .clone()
                        .unwrap_or_else(|| Arc::clone(object.allocator()));
                    MixinSlot::create(&staged.info, allocator, object, ready)?
                }
            };
            slots.push(slot);
        }

        let ty = match prepared {
            Some(ty) if ty.is_made_of(&infos) => ty,
            _ => domain.object_type(infos),
        };
        let next = Composition::assemble(ty, &mut slots, object.allocator(), object)?;
        let previous = object.commit(next);

        // Replaced mixins are destroyed outside the lock so their destructors
        // may mutate the object again.
        drop(lock);
        drop(previous);
        drop(current);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DomainConfig, Object};

    #[derive(Default, Debug, PartialEq)]
    struct Fuel(u32);
    impl Mixin for Fuel {
        const NAME: &'static str = "fuel";
    }

    #[derive(Default)]
    struct Cargo;
    impl Mixin for Cargo {
        const NAME: &'static str = "cargo";
    }

    fn domain() -> Domain {
        let domain = Domain::new("mutation-tests", DomainConfig::default());
        crate::MixinBuilder::<Fuel>::new()
            .default_constructible()
            .register(&domain)
            .unwrap();
        crate::MixinBuilder::<Cargo>::new().register(&domain).unwrap();
        domain
    }

    #[test]
    fn test_replace_keeps_position() {
        let domain = domain();
        let mut object = Object::new(&domain);
        object.mutate().add_value(Fuel(1)).add::<Cargo>().apply().unwrap();
        object.mutate().add_value(Fuel(7)).apply().unwrap();

        assert_eq!(object.mixin_names(), ["fuel", "cargo"]);
        assert_eq!(*object.get::<Fuel>().unwrap(), Fuel(7));
        assert_eq!(domain.mixin_of::<Fuel>().unwrap().live_instances(), 1);
    }

    #[test]
    fn test_noop_mutation_keeps_type() {
        let domain = domain();
        let mut object = Object::new(&domain);
        object.mutate().add::<Fuel>().apply().unwrap();
        let before = object.object_type();

        object.mutate().remove::<Cargo>().apply().unwrap();
        object.mutate().apply().unwrap();
        assert!(Arc::ptr_eq(&before, &object.object_type()));
    }

    #[test]
    fn test_unknown_and_constructorless_names() {
        let domain = domain();
        let mut object = Object::new(&domain);

        assert_eq!(
            object.mutate().add_named("sail").apply(),
            Err(Error::UnknownMixin { name: "sail".into() })
        );
        assert_eq!(
            object.mutate().add_named("cargo").apply(),
            Err(Error::MissingConstructor {
                mixin: "cargo".into()
            })
        );
        object.mutate().add_named("fuel").remove_named("sail").apply().unwrap();
        assert!(object.has::<Fuel>());
    }

    #[test]
    fn test_add_then_remove_in_one_mutation() {
        let domain = domain();
        let mut object = Object::new(&domain);
        object.mutate().add::<Fuel>().remove::<Fuel>().apply().unwrap();
        assert!(object.is_empty());

        object.mutate().add::<Cargo>().apply().unwrap();
        object.mutate().clear().add::<Fuel>().apply().unwrap();
        assert_eq!(object.mixin_names(), ["fuel"]);
    }

    #[test]
    fn test_shared_mutation_requires_config() {
        let domain = domain();
        let object = Object::new(&domain);
        assert!(matches!(
            object.mutate_shared(),
            Err(Error::ThreadSafeMutationsDisabled)
        ));
    }

    #[test]
    fn test_prepared_type_is_committed() {
        let domain = domain();
        let infos = vec![
            domain.mixin_of::<Fuel>().unwrap(),
            domain.mixin_of::<Cargo>().unwrap(),
        ];
        let prepared = Arc::new(ObjectType::build(infos));

        let mut object = Object::new(&domain);
        object
            .mutate()
            .add::<Fuel>()
            .add::<Cargo>()
            .with_type(Arc::clone(&prepared))
            .apply()
            .unwrap();
        assert!(Arc::ptr_eq(&object.object_type(), &prepared));
        assert_eq!(domain.object_type_count(), 0);
    }

    #[test]
    fn test_mismatched_prepared_type_is_ignored() {
        let domain = domain();
        let prepared = Arc::new(ObjectType::build(vec![domain.mixin_of::<Cargo>().unwrap()]));

        let mut object = Object::new(&domain);
        object
            .mutate()
            .add::<Fuel>()
            .with_type(Arc::clone(&prepared))
            .apply()
            .unwrap();
        assert!(!Arc::ptr_eq(&object.object_type(), &prepared));
        assert_eq!(object.mixin_names(), ["fuel"]);
        assert_eq!(domain.object_type_count(), 1);
    }
}
