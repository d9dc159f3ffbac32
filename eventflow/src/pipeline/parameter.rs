//! Parameter metadata and resolution rules.

use crate::core::{AnyValue, TypeKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a parameter value is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Source {
    /// The active service scope.
    #[default]
    Services,
    /// The run's context bag.
    Context,
}

impl Source {
    /// Returns the other source.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Services => Self::Context,
            Self::Context => Self::Services,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Services => f.write_str("services"),
            Self::Context => f.write_str("context"),
        }
    }
}

/// What to do when a lookup misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NotFound {
    /// Fail the run with a resolution error.
    #[default]
    Throw,
    /// Use the parameter's declared default value.
    Default,
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Throw => f.write_str("throw"),
            Self::Default => f.write_str("default"),
        }
    }
}

/// Per-parameter resolution rule.
///
/// The primary source is consulted first. On a miss the secondary source is
/// consulted when `fallback` is set, otherwise `primary_not_found` applies.
/// When the secondary also misses, `secondary_not_found` applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolutionRule {
    /// The source consulted first.
    pub primary: Source,
    /// Whether the other source is consulted on a primary miss.
    pub fallback: bool,
    /// Behavior on a primary miss without fallback.
    pub primary_not_found: NotFound,
    /// Behavior when the fallback source misses too.
    pub secondary_not_found: NotFound,
    /// Service key, applied only to service lookups.
    pub key: Option<String>,
}

impl Default for ResolutionRule {
    fn default() -> Self {
        Self {
            primary: Source::Services,
            fallback: true,
            primary_not_found: NotFound::Throw,
            secondary_not_found: NotFound::Throw,
            key: None,
        }
    }
}

impl ResolutionRule {
    /// Creates the default rule: services first, then context, throwing on a
    /// double miss.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule looking in the context bag first.
    #[must_use]
    pub fn context_first() -> Self {
        Self::default().with_primary(Source::Context)
    }

    /// Rule consulting only the given source.
    #[must_use]
    pub fn only(source: Source) -> Self {
        Self::default().with_primary(source).with_fallback(false)
    }

    /// Sets the primary source.
    #[must_use]
    pub fn with_primary(mut self, source: Source) -> Self {
        self.primary = source;
        self
    }

    /// Enables or disables the fallback source.
    #[must_use]
    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    /// Sets the behavior on a primary miss without fallback.
    #[must_use]
    pub fn on_primary_not_found(mut self, behavior: NotFound) -> Self {
        self.primary_not_found = behavior;
        self
    }

    /// Sets the behavior when the fallback source misses too.
    #[must_use]
    pub fn on_secondary_not_found(mut self, behavior: NotFound) -> Self {
        self.secondary_not_found = behavior;
        self
    }

    /// Sets both not-found behaviors.
    #[must_use]
    pub fn on_not_found(self, behavior: NotFound) -> Self {
        self.on_primary_not_found(behavior)
            .on_secondary_not_found(behavior)
    }

    /// Sets the service key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl fmt::Display for ResolutionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "primary={}, fallback={}, primary_not_found={}, secondary_not_found={}",
            self.primary, self.fallback, self.primary_not_found, self.secondary_not_found
        )?;
        if let Some(key) = &self.key {
            write!(f, ", key={key}")?;
        }
        Ok(())
    }
}

/// How a parameter is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// The continuation to the next stage.
    Continuation,
    /// The run's cancellation token.
    Cancellation,
    /// The run's context bag.
    RunContext,
    /// Looked up in services or the context bag.
    Resolved,
}

impl ParameterKind {
    /// Returns true for parameters supplied by the pipeline itself.
    #[must_use]
    pub const fn is_ambient(self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

/// Metadata for one stage parameter.
#[derive(Clone)]
pub struct ParameterSpec {
    /// How the parameter is supplied.
    pub kind: ParameterKind,
    /// The requested type.
    pub type_key: TypeKey,
    /// Whether the parameter accepts a missing value.
    pub optional: bool,
    /// Declared default used by `NotFound::Default`.
    pub default_value: Option<AnyValue>,
    /// Resolution rule for `Resolved` parameters.
    pub rule: ResolutionRule,
}

impl ParameterSpec {
    /// Spec for a parameter supplied by the pipeline.
    #[must_use]
    pub fn ambient<T: 'static>(kind: ParameterKind) -> Self {
        Self {
            kind,
            type_key: TypeKey::of::<T>(),
            optional: false,
            default_value: None,
            rule: ResolutionRule::default(),
        }
    }

    /// Spec for a required resolved parameter.
    #[must_use]
    pub fn required<T: 'static>() -> Self {
        Self {
            kind: ParameterKind::Resolved,
            type_key: TypeKey::of::<T>(),
            optional: false,
            default_value: None,
            rule: ResolutionRule::default(),
        }
    }

    /// Spec for an optional resolved parameter. A miss resolves to `None`.
    #[must_use]
    pub fn optional<T: 'static>() -> Self {
        Self {
            optional: true,
            rule: ResolutionRule::default().on_not_found(NotFound::Default),
            ..Self::required::<T>()
        }
    }
}

impl fmt::Debug for ParameterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterSpec")
            .field("kind", &self.kind)
            .field("type", &self.type_key)
            .field("optional", &self.optional)
            .field("has_default", &self.default_value.is_some())
            .field("rule", &self.rule)
            .finish()
    }
}
