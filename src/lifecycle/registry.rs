//! Callback Registry
//!
//! Ordered, append-only storage for the callbacks of each lifecycle phase.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::{BeforeRun, LifecycleError, OnShutdown, OnStart, Result};

/// The three callback phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Synchronous, fatal on error, before the loop starts serving
    PreStart,
    /// Scheduled onto the loop, not awaited
    PostStart,
    /// Invoked once the transport stops accepting
    Shutdown,
}

impl Phase {
    /// Canonical name of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreStart => "pre_start",
            Phase::PostStart => "post_start",
            Phase::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = LifecycleError;

    /// Accepts the canonical names and the older `before_run` / `on_start` /
    /// `on_shutdown` keys.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pre_start" | "before_run" => Ok(Phase::PreStart),
            "post_start" | "on_start" => Ok(Phase::PostStart),
            "shutdown" | "on_shutdown" => Ok(Phase::Shutdown),
            other => Err(LifecycleError::InvalidPhase(other.to_string())),
        }
    }
}

/// A registered callback together with the name it is logged under
pub struct Hook<T: ?Sized> {
    name: String,
    callback: Arc<T>,
}

impl<T: ?Sized> Hook<T> {
    fn new(name: impl Into<String>, callback: Arc<T>) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }

    /// Identity used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The callback itself
    pub fn callback(&self) -> &Arc<T> {
        &self.callback
    }
}

/// A callback of any phase, for phase-keyed registration.
pub enum Callback {
    /// See [`BeforeRun`]
    PreStart(Hook<dyn BeforeRun>),
    /// See [`OnStart`]
    PostStart(Hook<dyn OnStart>),
    /// See [`OnShutdown`]
    Shutdown(Hook<dyn OnShutdown>),
}

impl Callback {
    /// Wrap a pre-start callback
    pub fn pre_start(name: impl Into<String>, callback: impl BeforeRun) -> Self {
        Self::PreStart(Hook::new(name, Arc::new(callback)))
    }

    /// Wrap a post-start callback
    pub fn post_start(name: impl Into<String>, callback: impl OnStart) -> Self {
        Self::PostStart(Hook::new(name, Arc::new(callback)))
    }

    /// Wrap a shutdown callback
    pub fn shutdown(name: impl Into<String>, callback: impl OnShutdown) -> Self {
        Self::Shutdown(Hook::new(name, Arc::new(callback)))
    }

    /// The phase this callback implements
    pub fn phase(&self) -> Phase {
        match self {
            Callback::PreStart(_) => Phase::PreStart,
            Callback::PostStart(_) => Phase::PostStart,
            Callback::Shutdown(_) => Phase::Shutdown,
        }
    }

    /// Name the callback is logged under
    pub fn name(&self) -> &str {
        match self {
            Callback::PreStart(hook) => hook.name(),
            Callback::PostStart(hook) => hook.name(),
            Callback::Shutdown(hook) => hook.name(),
        }
    }
}

/// Callbacks for all three phases, in registration order.
///
/// The registry is filled while the application is being configured and
/// then moved into the [`LifecycleCoordinator`](super::LifecycleCoordinator),
/// which only ever reads it.
///
/// # Example
///
/// ```rust,ignore
/// let mut registry = CallbackRegistry::new();
/// registry
///     .before_run("migrations", run_migrations)
///     .on_start("cache-warmer", warm_cache)
///     .on_shutdown("event-flusher", flush_events);
/// ```
#[derive(Default)]
pub struct CallbackRegistry {
    pre_start: Vec<Hook<dyn BeforeRun>>,
    post_start: Vec<Hook<dyn OnStart>>,
    shutdown: Vec<Hook<dyn OnShutdown>>,
}

impl CallbackRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to the sequence for `phase`.
    ///
    /// Fails with [`LifecycleError::PhaseMismatch`] if the callback does not
    /// implement `phase`.
    pub fn register(&mut self, phase: Phase, callback: Callback) -> Result<&mut Self> {
        if callback.phase() != phase {
            return Err(LifecycleError::PhaseMismatch {
                callback: callback.name().to_string(),
                expected: phase,
                actual: callback.phase(),
            });
        }

        tracing::debug!(phase = %phase, callback = %callback.name(), "Registering callback");
        match callback {
            Callback::PreStart(hook) => self.pre_start.push(hook),
            Callback::PostStart(hook) => self.post_start.push(hook),
            Callback::Shutdown(hook) => self.shutdown.push(hook),
        }
        Ok(self)
    }

    /// Append a pre-start callback
    pub fn before_run(&mut self, name: impl Into<String>, callback: impl BeforeRun) -> &mut Self {
        self.pre_start.push(Hook::new(name, Arc::new(callback)));
        self
    }

    /// Append a post-start callback
    pub fn on_start(&mut self, name: impl Into<String>, callback: impl OnStart) -> &mut Self {
        self.post_start.push(Hook::new(name, Arc::new(callback)));
        self
    }

    /// Append a shutdown callback
    pub fn on_shutdown(&mut self, name: impl Into<String>, callback: impl OnShutdown) -> &mut Self {
        self.shutdown.push(Hook::new(name, Arc::new(callback)));
        self
    }

    /// Pre-start callbacks in invocation order
    pub fn pre_start(&self) -> impl Iterator<Item = &Hook<dyn BeforeRun>> {
        self.pre_start.iter()
    }

    /// Post-start callbacks in invocation order
    pub fn post_start(&self) -> impl Iterator<Item = &Hook<dyn OnStart>> {
        self.post_start.iter()
    }

    /// Shutdown callbacks in invocation order
    pub fn shutdown(&self) -> impl Iterator<Item = &Hook<dyn OnShutdown>> {
        self.shutdown.iter()
    }

    /// Callback names registered for `phase`, in order
    pub fn names(&self, phase: Phase) -> Vec<&str> {
        match phase {
            Phase::PreStart => self.pre_start.iter().map(Hook::name).collect(),
            Phase::PostStart => self.post_start.iter().map(Hook::name).collect(),
            Phase::Shutdown => self.shutdown.iter().map(Hook::name).collect(),
        }
    }

    /// Number of callbacks registered for `phase`
    pub fn len(&self, phase: Phase) -> usize {
        match phase {
            Phase::PreStart => self.pre_start.len(),
            Phase::PostStart => self.post_start.len(),
            Phase::Shutdown => self.shutdown.len(),
        }
    }

    /// Whether no callbacks are registered at all
    pub fn is_empty(&self) -> bool {
        self.pre_start.is_empty() && self.post_start.is_empty() && self.shutdown.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{Application, BoxError, ShutdownResult};
    use crate::runtime::LoopHandle;

    fn noop_pre_start(_app: &Application, _loop: &LoopHandle) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    fn noop_shutdown(_app: &Application) -> std::result::Result<ShutdownResult, BoxError> {
        Ok(ShutdownResult::Immediate)
    }

    #[test]
    fn test_phase_from_str() {
        assert_eq!("pre_start".parse::<Phase>().unwrap(), Phase::PreStart);
        assert_eq!("before_run".parse::<Phase>().unwrap(), Phase::PreStart);
        assert_eq!("on_start".parse::<Phase>().unwrap(), Phase::PostStart);
        assert_eq!("on_shutdown".parse::<Phase>().unwrap(), Phase::Shutdown);

        let err = "after_party".parse::<Phase>().unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidPhase(ref p) if p == "after_party"));
    }

    #[test]
    fn test_insertion_order_is_preserved() {
        let mut registry = CallbackRegistry::new();
        for name in ["first", "second", "third"] {
            registry.before_run(name, noop_pre_start);
        }
        registry.on_shutdown("close-pool", noop_shutdown);

        assert_eq!(registry.names(Phase::PreStart), vec!["first", "second", "third"]);
        assert_eq!(registry.len(Phase::Shutdown), 1);
        assert_eq!(registry.len(Phase::PostStart), 0);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_register_rejects_phase_mismatch() {
        let mut registry = CallbackRegistry::new();
        let err = registry
            .register(Phase::Shutdown, Callback::pre_start("migrations", noop_pre_start))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            LifecycleError::PhaseMismatch {
                expected: Phase::Shutdown,
                actual: Phase::PreStart,
                ..
            }
        ));
        assert!(registry.is_empty());

        let phase: Phase = "before_run".parse().unwrap();
        registry
            .register(phase, Callback::pre_start("migrations", noop_pre_start))
            .unwrap();
        assert_eq!(registry.names(Phase::PreStart), vec!["migrations"]);
    }
}
