//! Domains: registries of mixins, messages and object types.
//!
//! A [`Domain`] owns everything objects need to know about their parts:
//!
//! - the mixin registry, keyed by stable name and assigning dense ids
//! - the message registry, one entry per name with a fixed policy and
//!   signature
//! - the object-type cache, one [`ObjectType`] per ordered composition
//! - the default allocator for objects created in the domain
//!
//! Registration normally happens at startup. The first mutation of any
//! object seals the domain; registering afterwards still works (plugins load
//! late) and is logged. Registered descriptors never move, so objects and
//! cached types keep pointing at them while new ones are added.
//!
//! Domains are cheap handles: cloning one shares the same registry.
//! [`Domain::global`] provides a process-wide instance configured from the
//! environment.
//!
//! # Example
//!
//! ```rust
//! use amalgam::{Domain, DomainConfig, Error};
//!
//! let domain = Domain::new("game", DomainConfig::default());
//! let render = domain.register_unicast::<(), String>("render").unwrap();
//!
//! // Same name and signature: same message.
//! let again = domain.register_unicast::<(), String>("render").unwrap();
//! assert_eq!(amalgam::MessageHandle::id(&render), amalgam::MessageHandle::id(&again));
//!
//! // Same name, different signature: rejected.
//! assert!(matches!(
//!     domain.register_unicast::<u32, String>("render"),
//!     Err(Error::DuplicateRegistration { .. })
//! ));
//! ```

use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use amalgam_log::{debug, error, info};
use fxhash::FxHashMap;
use parking_lot::RwLock;

use crate::config::{DomainConfig, FailureMode, IdentityStrategy};
use crate::error::{Error, Result};
use crate::runtime::allocator::{DefaultAllocator, DomainAllocator};
use crate::runtime::message::{MessageId, MessageInfo, MulticastMessage, Policy, UnicastMessage};
use crate::runtime::metrics::{Counters, Metrics};
use crate::runtime::mixin::{Mixin, MixinDecl, MixinId, MixinInfo};
use crate::runtime::object_type::ObjectType;

/// Handle to a registry of mixins, messages and object types.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

struct DomainInner {
    serial: u64,
    name: Box<str>,
    config: DomainConfig,
    registry: RwLock<Registry>,
    types: RwLock<FxHashMap<Box<[MixinId]>, Arc<ObjectType>>>,
    empty_type: Arc<ObjectType>,
    allocator: Arc<dyn DomainAllocator>,
    sealed: AtomicBool,
    counters: Counters,
}

#[derive(Default)]
struct Registry {
    mixins: Vec<Option<Arc<MixinInfo>>>,
    mixin_keys: FxHashMap<Box<str>, MixinId>,
    free_ids: Vec<MixinId>,
    messages: Vec<Arc<MessageInfo>>,
    message_keys: FxHashMap<Box<str>, MessageId>,
    unicast_owners: FxHashMap<MessageId, MixinId>,
}

impl Registry {
    fn mixin(&self, id: MixinId) -> Option<&Arc<MixinInfo>> {
        self.mixins.get(id.index()).and_then(Option::as_ref)
    }

    fn mixin_name(&self, id: MixinId) -> String {
        self.mixin(id).map_or_else(|| id.to_string(), |info| info.name().to_string())
    }
}

static GLOBAL_DOMAIN: OnceLock<Domain> = OnceLock::new();
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

impl Domain {
    /// Creates a domain whose objects allocate from the heap by default.
    #[must_use]
    pub fn new(name: &str, config: DomainConfig) -> Self {
        Self::with_allocator(name, config, Arc::new(DefaultAllocator::new()))
    }

    /// Creates a domain with a custom default allocator for its objects.
    #[must_use]
    pub fn with_allocator(
        name: &str,
        config: DomainConfig,
        allocator: Arc<dyn DomainAllocator>,
    ) -> Self {
        debug!("creating domain '{name}' with {config:?}");
        Domain {
            inner: Arc::new(DomainInner {
                serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                counters: Counters::new(config.metrics),
                config,
                registry: RwLock::new(Registry::default()),
                types: RwLock::new(FxHashMap::default()),
                empty_type: Arc::new(ObjectType::empty()),
                allocator,
                sealed: AtomicBool::new(false),
            }),
        }
    }

    /// Process-wide domain, created on first use.
    ///
    /// Its configuration is read with [`DomainConfig::from_env`], and the
    /// logger is initialized from `AMALGAM_LOG` at the same time.
    pub fn global() -> &'static Domain {
        GLOBAL_DOMAIN.get_or_init(|| {
            amalgam_log::init_from_env();
            Domain::new("global", DomainConfig::from_env())
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn config(&self) -> &DomainConfig {
        &self.inner.config
    }

    /// Default allocator for objects created in this domain.
    #[must_use]
    pub fn allocator(&self) -> &Arc<dyn DomainAllocator> {
        &self.inner.allocator
    }

    /// Whether any object of this domain has been mutated yet.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Acquire)
    }

    /// Process-unique number identifying this domain.
    #[inline]
    pub(crate) fn serial(&self) -> u64 {
        self.inner.serial
    }

    /// Whether both handles refer to the same domain.
    #[must_use]
    pub fn ptr_eq(&self, other: &Domain) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable key of `T` under this domain's identity strategy.
    #[must_use]
    pub fn key_of<T: Mixin>(&self) -> &'static str {
        match self.inner.config.identity {
            IdentityStrategy::Name => T::NAME,
            IdentityStrategy::TypeName => type_name::<T>(),
        }
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Registers (or looks up) a unicast message.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateRegistration`] if `name` exists with another policy
    /// or signature, [`Error::TooManyMessages`] at capacity.
    pub fn register_unicast<A: 'static, R: 'static>(&self, name: &str) -> Result<UnicastMessage<A, R>> {
        self.register_message(name, Policy::Unicast, type_name::<fn(A) -> R>())
            .map(UnicastMessage::new)
    }

    /// Registers (or looks up) a multicast message.
    ///
    /// # Errors
    ///
    /// Same as [`register_unicast`](Self::register_unicast).
    pub fn register_multicast<A: Clone + 'static, R: 'static>(
        &self,
        name: &str,
    ) -> Result<MulticastMessage<A, R>> {
        self.register_message(name, Policy::Multicast, type_name::<fn(A) -> R>())
            .map(MulticastMessage::new)
    }

    fn register_message(
        &self,
        name: &str,
        policy: Policy,
        signature: &'static str,
    ) -> Result<Arc<MessageInfo>> {
        let mut registry = self.inner.registry.write();

        if let Some(&id) = registry.message_keys.get(name) {
            let existing = &registry.messages[id.index()];
            if existing.policy == policy && existing.signature == signature {
                return Ok(Arc::clone(existing));
            }
            let err = Error::DuplicateRegistration {
                name: name.to_string(),
                reason: format!(
                    "{:?} {} vs {:?} {}",
                    existing.policy, existing.signature, policy, signature
                ),
            };
            error!("domain '{}': {err}", self.inner.name);
            return Err(err);
        }

        let max = self.inner.config.max_messages;
        if registry.messages.len() >= max {
            let err = Error::TooManyMessages { max };
            error!("domain '{}': cannot register message '{name}': {err}", self.inner.name);
            return Err(err);
        }

        #[allow(clippy::cast_possible_truncation)]
        let id = MessageId(registry.messages.len() as u32);
        let info = Arc::new(MessageInfo {
            id,
            domain: self.inner.serial,
            name: name.into(),
            policy,
            signature,
        });
        registry.messages.push(Arc::clone(&info));
        registry.message_keys.insert(name.into(), id);

        debug!("domain '{}': message '{name}' ({policy:?}) -> {id:?}", self.inner.name);
        Ok(info)
    }

    #[must_use]
    pub fn message_info(&self, name: &str) -> Option<Arc<MessageInfo>> {
        let registry = self.inner.registry.read();
        let id = registry.message_keys.get(name)?;
        registry.messages.get(id.index()).cloned()
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.inner.registry.read().messages.len()
    }

    // ========================================================================
    // Mixins
    // ========================================================================

    pub(crate) fn register_mixin(&self, decl: MixinDecl) -> Result<MixinId> {
        let mut registry = self.inner.registry.write();
        let key = decl.key;

        for binding in &decl.bindings {
            let known = registry
                .messages
                .get(binding.message.id.index())
                .is_some_and(|m| Arc::ptr_eq(m, &binding.message));
            if !known {
                let err = Error::UnknownMessage {
                    name: binding.message.name().to_string(),
                };
                error!("domain '{}': cannot register mixin '{key}': {err}", self.inner.name);
                return Err(err);
            }
        }

        if let Some(&id) = registry.mixin_keys.get(key) {
            let Some(existing) = registry.mixin(id) else {
                return Err(Error::UnknownMixin { name: key.to_string() });
            };
            return match shape_difference(existing, &decl) {
                None => {
                    debug!("domain '{}': mixin '{key}' already registered as {id}", self.inner.name);
                    Ok(id)
                }
                Some(reason) => {
                    let err = Error::DuplicateRegistration {
                        name: key.to_string(),
                        reason,
                    };
                    error!("domain '{}': {err}", self.inner.name);
                    Err(err)
                }
            };
        }

        if !amalgam_mem::is_valid_alignment(decl.alignment) {
            return Err(Error::InvalidAlignment {
                alignment: decl.alignment,
            });
        }

        for binding in &decl.bindings {
            if binding.message.policy != Policy::Unicast {
                continue;
            }
            if let Some(&owner) = registry.unicast_owners.get(&binding.message.id) {
                let err = Error::AmbiguousUnicast {
                    message: binding.message.name().to_string(),
                    existing: registry.mixin_name(owner),
                    mixin: key.to_string(),
                };
                error!("domain '{}': {err}", self.inner.name);
                return Err(err);
            }
        }

        let max = self.inner.config.max_mixins;
        if registry.mixin_keys.len() >= max {
            let err = Error::TooManyMixins { max };
            error!("domain '{}': cannot register mixin '{key}': {err}", self.inner.name);
            return Err(err);
        }

        #[allow(clippy::cast_possible_truncation)]
        let id = registry
            .free_ids
            .pop()
            .unwrap_or(MixinId(registry.mixins.len() as u32));

        let info = Arc::new(MixinInfo {
            id,
            name: key.into(),
            type_name: decl.type_name,
            size: decl.size,
            alignment: decl.alignment,
            vtable: decl.vtable,
            allocator: decl.allocator,
            bindings: decl.bindings.into_boxed_slice(),
            live: Default::default(),
        });

        for binding in info.bindings.iter() {
            if binding.message.policy == Policy::Unicast {
                registry.unicast_owners.insert(binding.message.id, id);
            }
        }
        if id.index() < registry.mixins.len() {
            registry.mixins[id.index()] = Some(info);
        } else {
            registry.mixins.push(Some(info));
        }
        registry.mixin_keys.insert(key.into(), id);

        if self.is_sealed() {
            info!("domain '{}': mixin '{key}' registered after first mutation", self.inner.name);
        } else {
            debug!("domain '{}': mixin '{key}' -> {id}", self.inner.name);
        }
        Ok(id)
    }

    /// Removes a mixin from the registry.
    ///
    /// Cached object types that contain it are dropped, its unicast messages
    /// become free to implement again, and its id is reused by later
    /// registrations.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownMixin`] if `name` is not registered,
    /// [`Error::MixinInUse`] while any object still contains the mixin.
    pub fn unregister_mixin(&self, name: &str) -> Result<()> {
        let mut registry = self.inner.registry.write();
        let Some(&id) = registry.mixin_keys.get(name) else {
            return Err(Error::UnknownMixin { name: name.to_string() });
        };
        let instances = registry.mixin(id).map_or(0, |info| info.live_instances());
        if instances > 0 {
            return Err(Error::MixinInUse {
                name: name.to_string(),
                instances,
            });
        }

        registry.mixins[id.index()] = None;
        registry.mixin_keys.remove(name);
        registry.unicast_owners.retain(|_, owner| *owner != id);
        registry.free_ids.push(id);
        drop(registry);

        self.inner.types.write().retain(|key, _| !key.contains(&id));
        debug!("domain '{}': mixin '{name}' ({id}) unregistered", self.inner.name);
        Ok(())
    }

    #[must_use]
    pub fn mixin_id(&self, name: &str) -> Option<MixinId> {
        self.inner.registry.read().mixin_keys.get(name).copied()
    }

    #[must_use]
    pub fn mixin_info(&self, id: MixinId) -> Option<Arc<MixinInfo>> {
        self.inner.registry.read().mixin(id).cloned()
    }

    #[must_use]
    pub fn mixin_by_name(&self, name: &str) -> Option<Arc<MixinInfo>> {
        let registry = self.inner.registry.read();
        let id = registry.mixin_keys.get(name)?;
        registry.mixin(*id).cloned()
    }

    /// Registered descriptor of `T`, if `T` itself is what was registered
    /// under its key.
    #[must_use]
    pub fn mixin_of<T: Mixin>(&self) -> Option<Arc<MixinInfo>> {
        self.mixin_by_name(self.key_of::<T>())
            .filter(|info| info.type_name == type_name::<T>())
    }

    #[must_use]
    pub fn mixin_count(&self) -> usize {
        self.inner.registry.read().mixin_keys.len()
    }

    /// Names of all registered mixins, in id order.
    #[must_use]
    pub fn mixin_names(&self) -> Vec<String> {
        self.inner
            .registry
            .read()
            .mixins
            .iter()
            .flatten()
            .map(|info| info.name().to_string())
            .collect()
    }

    /// Whether `info` is the descriptor currently registered under its id.
    pub(crate) fn is_current(&self, info: &Arc<MixinInfo>) -> bool {
        self.inner
            .registry
            .read()
            .mixin(info.id)
            .is_some_and(|current| Arc::ptr_eq(current, info))
    }

    // ========================================================================
    // Object types
    // ========================================================================

    /// Shared object type for an ordered composition, building it on a miss.
    pub(crate) fn object_type(&self, mixins: Vec<Arc<MixinInfo>>) -> Arc<ObjectType> {
        if mixins.is_empty() {
            return Arc::clone(&self.inner.empty_type);
        }

        let key: Box<[MixinId]> = mixins.iter().map(|info| info.id).collect();
        if let Some(ty) = self.inner.types.read().get(&key) {
            return Arc::clone(ty);
        }

        let mut types = self.inner.types.write();
        if let Some(ty) = types.get(&key) {
            return Arc::clone(ty);
        }
        let ty = Arc::new(ObjectType::build(mixins));
        debug!(
            "domain '{}': new object type {:?} ({} cached)",
            self.inner.name,
            ty.mixins().map(MixinInfo::name).collect::<Vec<_>>(),
            types.len() + 1
        );
        types.insert(key, Arc::clone(&ty));
        ty
    }

    pub(crate) fn empty_type(&self) -> Arc<ObjectType> {
        Arc::clone(&self.inner.empty_type)
    }

    /// Number of cached object types.
    #[must_use]
    pub fn object_type_count(&self) -> usize {
        self.inner.types.read().len()
    }

    // ========================================================================
    // Runtime state
    // ========================================================================

    pub(crate) fn seal(&self) {
        if !self.inner.sealed.swap(true, Ordering::AcqRel) {
            debug!("domain '{}' sealed by first mutation", self.inner.name);
        }
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.inner.counters
    }

    /// Signals a per-call failure according to the failure mode.
    ///
    /// Returns the error for the caller to propagate, or aborts the process
    /// under [`FailureMode::Abort`].
    pub(crate) fn fail(&self, err: Error) -> Error {
        match self.inner.config.failure {
            FailureMode::Error => {
                debug!("domain '{}': {err}", self.inner.name);
                err
            }
            FailureMode::Abort => {
                error!("domain '{}': fatal: {err}", self.inner.name);
                log_backtrace();
                std::process::abort()
            }
        }
    }

    /// Snapshot of the domain counters.
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        let (mixins, messages) = {
            let registry = self.inner.registry.read();
            (registry.mixin_keys.len(), registry.messages.len())
        };
        self.inner
            .counters
            .snapshot(self.object_type_count(), mixins, messages)
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.inner.name)
            .field("mixins", &self.mixin_count())
            .field("messages", &self.message_count())
            .field("types", &self.object_type_count())
            .finish()
    }
}

/// Describes how `decl` differs from an existing registration, if at all.
fn shape_difference(existing: &MixinInfo, decl: &MixinDecl) -> Option<String> {
    if existing.type_name != decl.type_name {
        return Some(format!("type {} vs {}", existing.type_name, decl.type_name));
    }
    if existing.size != decl.size || existing.alignment != decl.alignment {
        return Some(format!(
            "layout {}/{} vs {}/{}",
            existing.size, existing.alignment, decl.size, decl.alignment
        ));
    }
    let mut messages: Vec<_> = decl.bindings.iter().map(|b| b.message.id).collect();
    messages.sort_unstable();
    if existing.message_set() != messages {
        return Some("implemented messages differ".to_string());
    }
    None
}

/// Logs the current backtrace when built with the `backtrace` feature.
pub(crate) fn log_backtrace() {
    #[cfg(feature = "backtrace")]
    error!("{:?}", backtrace::Backtrace::new());
}
