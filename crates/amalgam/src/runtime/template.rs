//! Reusable object compositions.
//!
//! An [`ObjectTemplate`] records an ordered list of default-constructible
//! mixins once, resolving names and building the object type up front, so
//! objects of that shape can be created or reset without repeating the
//! lookups.
//!
//! # Example
//!
//! ```rust
//! use amalgam::{Domain, DomainConfig, Mixin, MixinBuilder, ObjectTemplate};
//!
//! #[derive(Default)]
//! struct Sprite;
//! impl Mixin for Sprite {
//!     const NAME: &'static str = "sprite";
//! }
//!
//! let domain = Domain::new("doc", DomainConfig::default());
//! MixinBuilder::<Sprite>::new().default_constructible().register(&domain).unwrap();
//!
//! let template = ObjectTemplate::builder(&domain).add::<Sprite>().build().unwrap();
//! let a = template.instantiate().unwrap();
//! let b = template.instantiate().unwrap();
//!
//! assert!(a.has::<Sprite>() && b.has::<Sprite>());
//! assert!(std::sync::Arc::ptr_eq(&a.object_type(), &b.object_type()));
//! ```

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::runtime::domain::Domain;
use crate::runtime::mixin::{Mixin, MixinInfo};
use crate::runtime::mutation::{Init, Target};
use crate::runtime::object::Object;
use crate::runtime::object_type::ObjectType;

/// Builder for [`ObjectTemplate`].
pub struct TemplateBuilder<'d> {
    domain: &'d Domain,
    keys: Vec<(String, Option<&'static str>)>,
}

impl<'d> TemplateBuilder<'d> {
    /// Appends `T`.
    #[must_use]
    pub fn add<T: Mixin>(mut self) -> Self {
        let key = self.domain.key_of::<T>().to_string();
        self.keys.push((key, Some(std::any::type_name::<T>())));
        self
    }

    /// Appends the mixin registered under `name`.
    #[must_use]
    pub fn add_named(mut self, name: &str) -> Self {
        self.keys.push((name.to_string(), None));
        self
    }

    /// Resolves every mixin and builds the template. Repeated mixins keep
    /// their first position.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownMixin`] for names that are not registered and
    /// [`Error::MissingConstructor`] for mixins without a default
    /// constructor.
    pub fn build(self) -> Result<ObjectTemplate> {
        let mut mixins: Vec<Arc<MixinInfo>> = Vec::with_capacity(self.keys.len());
        for (key, type_name) in self.keys {
            let info = self
                .domain
                .mixin_by_name(&key)
                .filter(|info| type_name.is_none_or(|t| info.type_name() == t))
                .ok_or_else(|| Error::UnknownMixin { name: key.clone() })?;
            if !info.is_default_constructible() {
                return Err(Error::MissingConstructor { mixin: key });
            }
            if mixins.iter().all(|m| m.id() != info.id()) {
                mixins.push(info);
            }
        }

        let ty = self.domain.object_type(mixins.clone());
        Ok(ObjectTemplate {
            domain: self.domain.clone(),
            mixins,
            ty,
        })
    }
}

/// Prepared composition for creating objects of a fixed shape.
#[derive(Clone)]
pub struct ObjectTemplate {
    domain: Domain,
    mixins: Vec<Arc<MixinInfo>>,
    ty: Arc<ObjectType>,
}

impl ObjectTemplate {
    #[must_use]
    pub fn builder(domain: &Domain) -> TemplateBuilder<'_> {
        TemplateBuilder {
            domain,
            keys: Vec::new(),
        }
    }

    /// Creates a new object with the template's mixins, default-constructed.
    ///
    /// # Errors
    ///
    /// As for [`apply_to`](Self::apply_to).
    pub fn instantiate(&self) -> Result<Object> {
        let mut object = Object::new(&self.domain);
        self.apply_to(&mut object)?;
        Ok(object)
    }

    /// Replaces the composition of `object` with the template's.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidMutation`] if `object` belongs to another domain,
    /// [`Error::UnknownMixin`] if a mixin was unregistered since the template
    /// was built, and any error of the underlying mutation.
    pub fn apply_to(&self, object: &mut Object) -> Result<()> {
        if !object.domain().ptr_eq(&self.domain) {
            return Err(self.domain.fail(Error::InvalidMutation {
                reason: "template belongs to another domain",
            }));
        }
        let mut mutation = object.mutate().clear().with_type(Arc::clone(&self.ty));
        for info in &self.mixins {
            mutation = mutation.push_add(Target::Info(Arc::clone(info)), Init::Default);
        }
        mutation.apply()
    }

    /// Mixin names in composition order.
    #[must_use]
    pub fn mixin_names(&self) -> Vec<&str> {
        self.mixins.iter().map(|info| info.name()).collect()
    }

    #[must_use]
    pub fn object_type(&self) -> &Arc<ObjectType> {
        &self.ty
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mixins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mixins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DomainConfig, MixinBuilder};

    #[derive(Default)]
    struct Light(u8);
    impl Mixin for Light {
        const NAME: &'static str = "light";
    }

    #[derive(Default)]
    struct Switch;
    impl Mixin for Switch {
        const NAME: &'static str = "switch";
    }

    fn domain() -> Domain {
        let domain = Domain::new("template-tests", DomainConfig::default());
        MixinBuilder::<Light>::new()
            .default_constructible()
            .register(&domain)
            .unwrap();
        MixinBuilder::<Switch>::new().register(&domain).unwrap();
        domain
    }

    #[test]
    fn test_template_resets_object() {
        let domain = domain();
        let template = ObjectTemplate::builder(&domain)
            .add::<Light>()
            .add_named("light")
            .build()
            .unwrap();
        assert_eq!(template.mixin_names(), ["light"]);

        let mut object = Object::new(&domain);
        object.mutate().add_value(Light(9)).apply().unwrap();
        template.apply_to(&mut object).unwrap();

        assert_eq!(object.get::<Light>().unwrap().0, 0);
        assert!(Arc::ptr_eq(template.object_type(), &object.object_type()));
    }

    #[test]
    fn test_template_rejects_missing_constructor() {
        let domain = domain();
        let result = ObjectTemplate::builder(&domain).add::<Switch>().build();
        assert!(matches!(result, Err(Error::MissingConstructor { .. })));
    }

    #[test]
    fn test_template_rejects_foreign_object() {
        let domain = domain();
        let other = Domain::new("other", DomainConfig::default());
        let template = ObjectTemplate::builder(&domain).add::<Light>().build().unwrap();

        let mut object = Object::new(&other);
        assert!(matches!(
            template.apply_to(&mut object),
            Err(Error::InvalidMutation { .. })
        ));
    }
}
