//! Initialization-time configuration of a [`Domain`](crate::Domain).
//!
//! A configuration is fixed when the domain is created. Defaults match a
//! single-threaded host that wants catchable errors; [`DomainConfig::from_env`]
//! lets a host override any field through `AMALGAM_*` variables.

use std::str::FromStr;

use amalgam_log::warn;

/// Default limit on distinct mixins per domain.
pub const DEFAULT_MAX_MIXINS: usize = 256;

/// Default limit on distinct messages per domain.
pub const DEFAULT_MAX_MESSAGES: usize = 512;

/// How a mixin's stable key is derived.
///
/// Both strategies produce strings, so keys agree between independently
/// compiled modules as long as both sides use the same strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityStrategy {
    /// The mixin's declared [`Mixin::NAME`](crate::Mixin::NAME).
    #[default]
    Name,
    /// The Rust type path from [`std::any::type_name`].
    TypeName,
}

impl FromStr for IdentityStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(IdentityStrategy::Name),
            "type" | "type_name" | "typename" => Ok(IdentityStrategy::TypeName),
            _ => Err(format!("invalid identity strategy: {s}")),
        }
    }
}

/// How per-call failures are signaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Return the error to the caller.
    #[default]
    Error,
    /// Log the error and abort the process.
    Abort,
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" | "return" => Ok(FailureMode::Error),
            "abort" | "terminate" => Ok(FailureMode::Abort),
            _ => Err(format!("invalid failure mode: {s}")),
        }
    }
}

/// Domain configuration.
///
/// # Example
///
/// ```rust
/// use amalgam::{DomainConfig, FailureMode};
///
/// let config = DomainConfig::default()
///     .with_max_mixins(32)
///     .with_thread_safe_mutations(true)
///     .with_failure(FailureMode::Error);
///
/// assert_eq!(config.max_mixins, 32);
/// assert!(config.thread_safe_mutations);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConfig {
    /// Maximum number of mixins registered at once.
    pub max_mixins: usize,
    /// Maximum number of messages.
    pub max_messages: usize,
    /// How mixin keys are derived.
    pub identity: IdentityStrategy,
    /// How per-call failures are signaled.
    pub failure: FailureMode,
    /// Whether [`ObjectCore::try_clone`](crate::ObjectCore::try_clone) is allowed.
    pub implicit_copy: bool,
    /// Whether objects may be mutated through a shared reference.
    pub thread_safe_mutations: bool,
    /// Whether the domain counts mutations and live objects.
    pub metrics: bool,
    /// Whether allocator misuse is reported as an error.
    pub strict_allocators: bool,
}

impl Default for DomainConfig {
    fn default() -> Self {
        DomainConfig {
            max_mixins: DEFAULT_MAX_MIXINS,
            max_messages: DEFAULT_MAX_MESSAGES,
            identity: IdentityStrategy::Name,
            failure: FailureMode::Error,
            implicit_copy: true,
            thread_safe_mutations: false,
            metrics: false,
            strict_allocators: cfg!(debug_assertions),
        }
    }
}

impl DomainConfig {
    #[must_use]
    pub fn with_max_mixins(mut self, max: usize) -> Self {
        self.max_mixins = max;
        self
    }

    #[must_use]
    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity: IdentityStrategy) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn with_failure(mut self, failure: FailureMode) -> Self {
        self.failure = failure;
        self
    }

    #[must_use]
    pub fn with_implicit_copy(mut self, enabled: bool) -> Self {
        self.implicit_copy = enabled;
        self
    }

    #[must_use]
    pub fn with_thread_safe_mutations(mut self, enabled: bool) -> Self {
        self.thread_safe_mutations = enabled;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    #[must_use]
    pub fn with_strict_allocators(mut self, enabled: bool) -> Self {
        self.strict_allocators = enabled;
        self
    }

    /// Default configuration overlaid with `AMALGAM_*` environment variables.
    ///
    /// Recognized variables: `AMALGAM_MAX_MIXINS`, `AMALGAM_MAX_MESSAGES`,
    /// `AMALGAM_IDENTITY`, `AMALGAM_FAILURE`, `AMALGAM_IMPLICIT_COPY`,
    /// `AMALGAM_THREAD_SAFE`, `AMALGAM_METRICS` and `AMALGAM_STRICT`.
    /// Values that fail to parse are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    ///
    /// ```rust
    /// use amalgam::{DomainConfig, IdentityStrategy};
    ///
    /// let config = DomainConfig::default().overlay(|key| match key {
    ///     "AMALGAM_IDENTITY" => Some("type_name".to_string()),
    ///     "AMALGAM_MAX_MIXINS" => Some("64".to_string()),
    ///     _ => None,
    /// });
    ///
    /// assert_eq!(config.identity, IdentityStrategy::TypeName);
    /// assert_eq!(config.max_mixins, 64);
    /// ```
    #[must_use]
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        override_with(&lookup, "AMALGAM_MAX_MIXINS", &mut self.max_mixins);
        override_with(&lookup, "AMALGAM_MAX_MESSAGES", &mut self.max_messages);
        override_with(&lookup, "AMALGAM_IDENTITY", &mut self.identity);
        override_with(&lookup, "AMALGAM_FAILURE", &mut self.failure);
        override_flag(&lookup, "AMALGAM_IMPLICIT_COPY", &mut self.implicit_copy);
        override_flag(&lookup, "AMALGAM_THREAD_SAFE", &mut self.thread_safe_mutations);
        override_flag(&lookup, "AMALGAM_METRICS", &mut self.metrics);
        override_flag(&lookup, "AMALGAM_STRICT", &mut self.strict_allocators);
        self
    }
}

fn override_with<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!("ignoring {key}={raw}: cannot parse"),
        }
    }
}

fn override_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut bool) {
    if let Some(raw) = lookup(key) {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *slot = true,
            "0" | "false" | "no" | "off" => *slot = false,
            _ => warn!("ignoring {key}={raw}: expected a boolean"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DomainConfig::default();
        assert_eq!(config.max_mixins, DEFAULT_MAX_MIXINS);
        assert_eq!(config.max_messages, DEFAULT_MAX_MESSAGES);
        assert_eq!(config.identity, IdentityStrategy::Name);
        assert_eq!(config.failure, FailureMode::Error);
        assert!(config.implicit_copy);
        assert!(!config.thread_safe_mutations);
        assert!(!config.metrics);
    }

    #[test]
    fn test_overlay_parses_every_field() {
        let config = DomainConfig::default().overlay(|key| {
            let value = match key {
                "AMALGAM_MAX_MIXINS" => "16",
                "AMALGAM_MAX_MESSAGES" => "8",
                "AMALGAM_IDENTITY" => "typename",
                "AMALGAM_FAILURE" => "abort",
                "AMALGAM_IMPLICIT_COPY" => "off",
                "AMALGAM_THREAD_SAFE" => "1",
                "AMALGAM_METRICS" => "yes",
                "AMALGAM_STRICT" => "false",
                _ => return None,
            };
            Some(value.to_string())
        });

        assert_eq!(config.max_mixins, 16);
        assert_eq!(config.max_messages, 8);
        assert_eq!(config.identity, IdentityStrategy::TypeName);
        assert_eq!(config.failure, FailureMode::Abort);
        assert!(!config.implicit_copy);
        assert!(config.thread_safe_mutations);
        assert!(config.metrics);
        assert!(!config.strict_allocators);
    }

    #[test]
    fn test_overlay_ignores_garbage() {
        let base = DomainConfig::default();
        let config = base.clone().overlay(|key| match key {
            "AMALGAM_MAX_MIXINS" => Some("many".to_string()),
            "AMALGAM_METRICS" => Some("perhaps".to_string()),
            _ => None,
        });
        assert_eq!(config, base);
    }
}
