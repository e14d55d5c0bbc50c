// Common fixtures for integration tests.
//
// Three small mixins implementing a multicast `sum` message, plus a unicast
// `describe` owned by the first one.

#![allow(dead_code)]

use amalgam::{
    Domain, DomainConfig, Mixin, MixinBuilder, MixinId, MulticastMessage, Object, UnicastMessage,
    object_of,
};
use std::sync::atomic::{AtomicUsize, Ordering};

static DOMAIN_ID: AtomicUsize = AtomicUsize::new(0);

/// Returns a unique domain name for the calling test.
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}_{}", DOMAIN_ID.fetch_add(1, Ordering::SeqCst))
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Unit {
    pub value: i32,
}

impl Mixin for Unit {
    const NAME: &'static str = "unit";
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Eleven;

impl Mixin for Eleven {
    const NAME: &'static str = "eleven";
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Twelve;

impl Mixin for Twelve {
    const NAME: &'static str = "twelve";
}

pub struct Fixture {
    pub domain: Domain,
    pub sum: MulticastMessage<(), i32>,
    pub describe: UnicastMessage<(), String>,
    pub unit: MixinId,
    pub eleven: MixinId,
    pub twelve: MixinId,
}

impl Fixture {
    pub fn new(config: DomainConfig) -> Self {
        let domain = Domain::new(&unique_name("fixture"), config);
        let sum = domain.register_multicast::<(), i32>("sum").unwrap();
        let describe = domain.register_unicast::<(), String>("describe").unwrap();

        let unit = MixinBuilder::<Unit>::new()
            .implements(&sum, |u: &Unit, ()| 1 + u.value)
            .implements(&describe, |u: &Unit, ()| {
                // SAFETY: `u` is the receiver of a shared handler.
                let owner = unsafe { object_of(u) };
                format!("unit of {} mixins", owner.mixin_count())
            })
            .default_constructible()
            .copyable()
            .register(&domain)
            .unwrap();
        let eleven = MixinBuilder::<Eleven>::new()
            .implements(&sum, |_: &Eleven, ()| 11)
            .default_constructible()
            .copyable()
            .register(&domain)
            .unwrap();
        let twelve = MixinBuilder::<Twelve>::new()
            .implements(&sum, |_: &Twelve, ()| 12)
            .default_constructible()
            .register(&domain)
            .unwrap();

        Fixture {
            domain,
            sum,
            describe,
            unit,
            eleven,
            twelve,
        }
    }

    pub fn object(&self) -> Object {
        Object::new(&self.domain)
    }

    pub fn sum(&self, object: &Object) -> i32 {
        self.sum
            .call_with(object, (), amalgam::Sum::new())
            .unwrap()
    }
}

pub fn fixture() -> Fixture {
    Fixture::new(DomainConfig::default())
}
