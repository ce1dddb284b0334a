//! Container builder for fluent configuration

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::binder::Binder;
use crate::container::{Container, ContainerOptions};
use crate::error::DiResult;
use crate::global::{GlobalScope, ScopeToken};
use crate::scheduler::{Clock, Scheduler, SystemClock, DEFAULT_MAX_SLICE};

pub(crate) type BindCallback = Box<dyn FnOnce(&mut Binder<'_>) -> DiResult<()> + Send>;
pub(crate) type ResolvedCallback = Box<dyn FnOnce() + Send>;

/// Builder for a scope
pub struct ContainerBuilder {
    token: ScopeToken,
    global: Option<Arc<GlobalScope>>,
    clock: Option<Arc<dyn Clock>>,
    scheduler: Scheduler,
    max_slice: Duration,
    wait_poll: Duration,
    log_progress: bool,
    prerequisites: Vec<ScopeToken>,
    bind: Vec<BindCallback>,
    on_resolved: Vec<ResolvedCallback>,
    parent_cancel: Option<CancellationToken>,
}

impl ContainerBuilder {
    /// Create a new container builder
    pub fn new() -> Self {
        Self {
            token: ScopeToken::anonymous(),
            global: None,
            clock: None,
            scheduler: Scheduler::default(),
            max_slice: DEFAULT_MAX_SLICE,
            wait_poll: Duration::ZERO,
            log_progress: false,
            prerequisites: Vec::new(),
            bind: Vec::new(),
            on_resolved: Vec::new(),
            parent_cancel: None,
        }
    }

    /// Identify the scope by the marker type `T`
    pub fn token<T: ?Sized + 'static>(mut self) -> Self {
        self.token = ScopeToken::of::<T>();
        self
    }

    /// Share a global registry; defaults to [`GlobalScope::shared`]
    pub fn global(mut self, global: Arc<GlobalScope>) -> Self {
        self.global = Some(global);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// How the pass yields between slices
    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Work allowed per turn before the pass yields
    pub fn max_slice(mut self, max_slice: Duration) -> Self {
        self.max_slice = max_slice;
        self
    }

    /// Minimum delay between checks while waiting for another scope
    pub fn wait_poll(mut self, wait_poll: Duration) -> Self {
        self.wait_poll = wait_poll;
        self
    }

    /// Log progress changes at info level
    pub fn log_progress(mut self, enabled: bool) -> Self {
        self.log_progress = enabled;
        self
    }

    /// Do not bind until the scope identified by `T` has resolved
    pub fn wait_for<T: ?Sized + 'static>(mut self) -> Self {
        self.prerequisites.push(ScopeToken::of::<T>());
        self
    }

    /// Cancel the pass when `parent` is cancelled
    pub fn cancel_on(mut self, parent: &CancellationToken) -> Self {
        self.parent_cancel = Some(parent.clone());
        self
    }

    /// Add a binding callback; callbacks run in the order they were added
    pub fn on_bind<F>(mut self, bind: F) -> Self
    where
        F: FnOnce(&mut Binder<'_>) -> DiResult<()> + Send + 'static,
    {
        self.bind.push(Box::new(bind));
        self
    }

    /// Run once after a successful resolution
    pub fn on_resolved<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_resolved.push(Box::new(callback));
        self
    }

    /// Apply file-based settings
    #[cfg(feature = "config")]
    pub fn config(self, config: &crate::config::ResolveConfig) -> Self {
        config.apply_to_builder(self)
    }

    /// Build the container
    pub fn build(self) -> Container {
        let cancel = match &self.parent_cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        Container::from_options(ContainerOptions {
            token: self.token,
            global: self.global.unwrap_or_else(GlobalScope::shared),
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>),
            scheduler: self.scheduler,
            max_slice: self.max_slice,
            wait_poll: self.wait_poll,
            log_progress: self.log_progress,
            prerequisites: self.prerequisites,
            bind: self.bind,
            on_resolved: self.on_resolved,
            cancel,
        })
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension methods for fluent builder pattern
impl ContainerBuilder {
    /// Add the bindings of a module
    pub fn add_module<M: Module + Send + 'static>(self, module: M) -> Self {
        self.on_bind(move |binder| module.bind(binder))
    }
}

/// A reusable set of bindings
pub trait Module {
    fn bind(&self, binder: &mut Binder<'_>) -> DiResult<()>;
}
