//! Application Bootstrap
//!
//! The [`Application`] descriptor handed to every callback, and the
//! builder that assembles it together with the callback registry.

use std::fmt;
use std::process::ExitCode;
use std::sync::{Arc, OnceLock};

use axum::Router;

use super::{BeforeRun, Callback, CallbackRegistry, OnShutdown, OnStart, Phase, Result};
use crate::config::{ConfigError, ConfigService, Settings};
use crate::guard::ReadinessGate;
use crate::runtime::LoopHandle;

struct AppInner {
    settings: Settings,
    config: ConfigService,
    router: Router,
    readiness: ReadinessGate,
    event_loop: OnceLock<LoopHandle>,
}

/// The application a run is orchestrating.
///
/// Callbacks receive it as their first argument. It is read-only from the
/// lifecycle's point of view; clones share the same instance.
#[derive(Clone)]
pub struct Application {
    inner: Arc<AppInner>,
}

impl Application {
    /// Create a new application builder
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Typed runner settings
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Raw settings map, for values the runner does not know about
    pub fn config(&self) -> &ConfigService {
        &self.inner.config
    }

    /// The application routes, without any runner middleware
    pub fn router(&self) -> Router {
        self.inner.router.clone()
    }

    /// Gate the transport consults before routing a request
    pub fn readiness(&self) -> &ReadinessGate {
        &self.inner.readiness
    }

    /// The loop of the current run, once the lifecycle has started or begun
    /// shutting down. Shutdown callbacks use it to spawn deferred work.
    pub fn event_loop(&self) -> Option<&LoopHandle> {
        self.inner.event_loop.get()
    }

    /// Bind the application to the loop of its run; the first loop wins.
    pub(crate) fn attach_loop(&self, event_loop: &LoopHandle) {
        let _ = self.inner.event_loop.set(event_loop.clone());
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("settings", &self.inner.settings)
            .field("ready", &self.inner.readiness.is_ready())
            .finish_non_exhaustive()
    }
}

/// Builder for Application
///
/// Provides a fluent API for configuring an application and the callbacks
/// of its run.
///
/// # Example
///
/// ```rust,ignore
/// use runway::lifecycle::Application;
///
/// fn main() -> std::process::ExitCode {
///     Application::builder()
///         .router(routes())
///         .before_run("migrations", run_migrations)
///         .on_start("cache-warmer", warm_cache)
///         .on_shutdown("event-flusher", flush_events)
///         .run()
/// }
/// ```
pub struct ApplicationBuilder {
    settings: Option<Settings>,
    config: Option<ConfigService>,
    router: Router,
    registry: CallbackRegistry,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    /// Create a new application builder
    pub fn new() -> Self {
        Self {
            settings: None,
            config: None,
            router: Router::new(),
            registry: CallbackRegistry::new(),
        }
    }

    /// Use these settings instead of reading them from the settings map
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Settings map; defaults to one seeded from the process environment
    pub fn config(mut self, config: ConfigService) -> Self {
        self.config = Some(config);
        self
    }

    /// The application routes
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Register a pre-start callback
    pub fn before_run(mut self, name: impl Into<String>, callback: impl BeforeRun) -> Self {
        self.registry.before_run(name, callback);
        self
    }

    /// Register a post-start callback
    pub fn on_start(mut self, name: impl Into<String>, callback: impl OnStart) -> Self {
        self.registry.on_start(name, callback);
        self
    }

    /// Register a shutdown callback
    pub fn on_shutdown(mut self, name: impl Into<String>, callback: impl OnShutdown) -> Self {
        self.registry.on_shutdown(name, callback);
        self
    }

    /// Register a callback under a phase looked up by name
    ///
    /// # Errors
    ///
    /// Returns an error if the phase name is unknown or the callback does
    /// not belong to that phase.
    pub fn register(mut self, phase: &str, callback: Callback) -> Result<Self> {
        let phase: Phase = phase.parse()?;
        self.registry.register(phase, callback)?;
        Ok(self)
    }

    /// Callbacks registered so far
    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Resolve settings and produce the application and its callbacks.
    ///
    /// # Errors
    ///
    /// Returns an error if settings had to be read from the settings map
    /// and a value there is invalid.
    pub fn build(self) -> std::result::Result<(Application, CallbackRegistry), ConfigError> {
        let config = self.config.unwrap_or_else(ConfigService::new);
        let settings = match self.settings {
            Some(settings) => settings,
            None => Settings::from_config(&config)?,
        };

        let application = Application {
            inner: Arc::new(AppInner {
                settings,
                config,
                router: self.router,
                readiness: ReadinessGate::new(),
                event_loop: OnceLock::new(),
            }),
        };
        Ok((application, self.registry))
    }

    /// Build the application and run it until shutdown completes
    pub fn run(self) -> ExitCode {
        crate::server::run(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{BoxError, LifecycleError, ShutdownResult};
    use crate::runtime::LoopHandle;

    fn noop_shutdown(_app: &Application) -> std::result::Result<ShutdownResult, BoxError> {
        Ok(ShutdownResult::Immediate)
    }

    #[test]
    fn test_build_reads_settings_from_config() {
        let config = ConfigService::empty().with("PORT", 9000).with("SERVICE", "orders");
        let (app, registry) = Application::builder().config(config).build().unwrap();

        assert_eq!(app.settings().port, 9000);
        assert_eq!(app.config().get("SERVICE").as_deref(), Some("orders"));
        assert!(!app.readiness().is_ready());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_explicit_settings_win() {
        let settings = Settings {
            port: 1234,
            ..Settings::default()
        };
        let config = ConfigService::empty().with("PORT", "not-a-port");
        let (app, _) = Application::builder()
            .config(config)
            .settings(settings)
            .build()
            .unwrap();
        assert_eq!(app.settings().port, 1234);
    }

    #[test]
    fn test_register_by_phase_name() {
        let builder = Application::builder()
            .register("on_shutdown", Callback::shutdown("flush", noop_shutdown))
            .unwrap()
            .before_run("check", |_: &Application, _: &LoopHandle| Ok::<(), BoxError>(()));
        assert_eq!(builder.registry().names(Phase::Shutdown), vec!["flush"]);
        assert_eq!(builder.registry().len(Phase::PreStart), 1);

        let err = match Application::builder()
            .register("pre_start", Callback::shutdown("flush", noop_shutdown))
        {
            Ok(_) => panic!("mismatched phase accepted"),
            Err(err) => err,
        };
        assert!(matches!(err, LifecycleError::PhaseMismatch { .. }));
    }
}
