//! Scope container and its resolution pass

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::binder::{Binder, PendingDependency};
use crate::builder::{BindCallback, ContainerBuilder, ResolvedCallback};
use crate::dependency::{Dep, Dependency, DependencyKey};
use crate::error::{DiError, DiResult};
use crate::global::{GlobalScope, ScopeToken};
use crate::injector::Injector;
use crate::lifecycle::{CallbackInvoker, LifecycleEvent};
use crate::scheduler::{BudgetStats, Clock, FrameBudget, Scheduler};
use crate::table::{merged, DependencyTable, MergedView};

/// Where a scope is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Unresolved,
    Resolving,
    Resolved,
    Disposed,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScopeState::Unresolved => "unresolved",
            ScopeState::Resolving => "resolving",
            ScopeState::Resolved => "resolved",
            ScopeState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

pub(crate) struct ContainerOptions {
    pub(crate) token: ScopeToken,
    pub(crate) global: Arc<GlobalScope>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) scheduler: Scheduler,
    pub(crate) max_slice: Duration,
    pub(crate) wait_poll: Duration,
    pub(crate) log_progress: bool,
    pub(crate) prerequisites: Vec<ScopeToken>,
    pub(crate) bind: Vec<BindCallback>,
    pub(crate) on_resolved: Vec<ResolvedCallback>,
    pub(crate) cancel: CancellationToken,
}

struct ScopeInner {
    token: ScopeToken,
    global: Arc<GlobalScope>,
    clock: Arc<dyn Clock>,
    scheduler: Scheduler,
    max_slice: Duration,
    wait_poll: Duration,
    log_progress: bool,
    prerequisites: Vec<ScopeToken>,
    bind: Mutex<Vec<BindCallback>>,
    on_resolved: Mutex<Vec<ResolvedCallback>>,
    /// Local table of this scope
    local: Mutex<DependencyTable>,
    /// Direct dependency lists by binding key
    direct: Mutex<HashMap<DependencyKey, Vec<Arc<Dependency>>>>,
    /// Keys this scope moved to the global table
    promoted: Mutex<Vec<DependencyKey>>,
    /// Direct dependencies of rejected `.to` targets
    stranded: Mutex<Vec<Arc<Dependency>>>,
    state: watch::Sender<ScopeState>,
    /// `f32` bits
    progress: AtomicU32,
    stats: Mutex<BudgetStats>,
    cancel: CancellationToken,
}

impl ScopeInner {
    fn set_progress(&self, value: f32) {
        let previous = f32::from_bits(self.progress.load(Ordering::Acquire));
        if value <= previous {
            return;
        }
        self.progress.store(value.to_bits(), Ordering::Release);
        if self.log_progress {
            info!("{} resolve progress {:.0}%", self.token.name(), value * 100.0);
        }
    }

    fn dispose(&self) {
        let previous = self.state.send_replace(ScopeState::Disposed);
        if previous == ScopeState::Disposed {
            return;
        }
        self.cancel.cancel();

        let removable: Vec<Arc<Dependency>> = {
            let promoted = self.promoted.lock();
            let mut local = self.local.lock();
            let mut direct = self.direct.lock();
            let mut slots: Vec<_> = local.iter().cloned().collect();
            // Direct lists of promoted bindings live as long as the global entry.
            slots.extend(
                direct
                    .drain()
                    .filter(|(key, _)| !promoted.contains(key))
                    .flat_map(|(_, list)| list),
            );
            slots.append(&mut self.stranded.lock());
            local.clear();
            slots
        };
        self.on_resolved.lock().clear();
        self.bind.lock().clear();

        let capable = removable.iter().filter(|d| d.hooks().is_removable()).count();
        let fired = CallbackInvoker::new(&removable).invoke(LifecycleEvent::Remove);
        self.global.unmark_resolved(&self.token);
        if previous == ScopeState::Resolving {
            warn!("{} disposed while resolving", self.token.name());
        }
        debug!(
            "Disposed {} ({} dependencies, {} of {} removable notified)",
            self.token.name(),
            removable.len(),
            fired,
            capable
        );
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A dependency scope
///
/// Cloning is cheap and shares the scope. The scope is disposed when
/// [`Container::dispose`] is called or the last handle is dropped.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ScopeInner>,
}

impl Container {
    /// Create a container builder
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    pub(crate) fn from_options(options: ContainerOptions) -> Self {
        let (state, _) = watch::channel(ScopeState::Unresolved);
        Self {
            inner: Arc::new(ScopeInner {
                token: options.token,
                global: options.global,
                clock: options.clock,
                scheduler: options.scheduler,
                max_slice: options.max_slice,
                wait_poll: options.wait_poll,
                log_progress: options.log_progress,
                prerequisites: options.prerequisites,
                bind: Mutex::new(options.bind),
                on_resolved: Mutex::new(options.on_resolved),
                local: Mutex::new(DependencyTable::new()),
                direct: Mutex::new(HashMap::new()),
                promoted: Mutex::new(Vec::new()),
                stranded: Mutex::new(Vec::new()),
                state,
                progress: AtomicU32::new(0.0_f32.to_bits()),
                stats: Mutex::new(BudgetStats::default()),
                cancel: options.cancel,
            }),
        }
    }

    pub fn token(&self) -> ScopeToken {
        self.inner.token
    }

    pub fn global(&self) -> &Arc<GlobalScope> {
        &self.inner.global
    }

    pub fn state(&self) -> ScopeState {
        *self.inner.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ScopeState> {
        self.inner.state.subscribe()
    }

    /// Fraction of the pass's entries processed so far, in `[0, 1]`
    pub fn resolve_progress(&self) -> f32 {
        f32::from_bits(self.inner.progress.load(Ordering::Acquire))
    }

    /// Budget counters of the last pass
    pub fn budget_stats(&self) -> BudgetStats {
        *self.inner.stats.lock()
    }

    /// Keys this scope promoted to the global table
    pub fn promoted_keys(&self) -> Vec<DependencyKey> {
        self.inner.promoted.lock().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == ScopeState::Disposed
    }

    /// Run `callback` once the scope resolves; immediately if it already has
    pub fn on_resolved<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // `finish` takes the list under this lock, so the state cannot move
        // to resolved between the check and the push.
        let mut pending = self.inner.on_resolved.lock();
        match self.state() {
            ScopeState::Resolved => {
                drop(pending);
                callback();
            }
            ScopeState::Disposed => {}
            _ => pending.push(Box::new(callback)),
        }
    }

    /// Wait until the scope is resolved
    pub async fn resolved(&self) -> DiResult<()> {
        let mut state = self.subscribe_state();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ScopeState::Resolved => return Ok(()),
                ScopeState::Disposed => return Err(DiError::Disposed),
                _ => {}
            }
            state.changed().await.map_err(|_| DiError::Disposed)?;
        }
    }

    /// Effective dependency table: local entries shadow global ones
    pub fn dependencies(&self) -> MergedView {
        let local = self.inner.local.lock();
        let global = self.inner.global.table();
        merged(&local, &global)
    }

    /// Effective instance for `T`
    pub fn get_dependency<T: ?Sized + 'static>(&self) -> DiResult<Arc<T>> {
        let slot = self.effective_slot::<T>()?;
        slot.view::<T>().ok_or_else(|| DiError::Uninitialized {
            key: slot.key().name().to_string(),
        })
    }

    /// Handle to the effective slot for `T`, initialized or not
    pub fn dependency_handle<T: ?Sized + 'static>(&self) -> DiResult<Dep<T>> {
        self.effective_slot::<T>().map(Dep::new)
    }

    fn effective_slot<T: ?Sized + 'static>(&self) -> DiResult<Arc<Dependency>> {
        let key = DependencyKey::of::<T>();
        self.dependencies()
            .get(&key)
            .cloned()
            .ok_or_else(|| DiError::MissingDependency {
                key: key.name().to_string(),
            })
    }

    /// Cancel the pass, raise OnRemove and release the scope
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Cooperatively wait until the scope identified by `T` has resolved
    pub async fn wait_for_scope_resolved<T: ?Sized + 'static>(&self) -> DiResult<()> {
        let mut budget = self.budget();
        self.wait_resolved(ScopeToken::of::<T>(), &mut budget).await
    }

    fn budget(&self) -> FrameBudget {
        FrameBudget::new(
            self.inner.clock.clone(),
            self.inner.scheduler.clone(),
            self.inner.max_slice,
            self.inner.cancel.clone(),
        )
    }

    async fn wait_resolved(&self, token: ScopeToken, budget: &mut FrameBudget) -> DiResult<()> {
        let inner = &*self.inner;
        budget.ensure_active()?;
        let mut polls = 0u64;
        while !inner.global.is_resolved(&token) {
            let since = inner.clock.now();
            loop {
                budget.yield_turn().await?;
                if inner.clock.now().saturating_sub(since) >= inner.wait_poll {
                    break;
                }
            }
            polls += 1;
        }
        debug!(
            "{} observed {} resolved after {} polls",
            inner.token.name(),
            token.name(),
            polls
        );
        Ok(())
    }

    /// Run the resolution pass
    ///
    /// Waits for prerequisite scopes, runs the bind callbacks, injects every
    /// entry the pass owns and raises OnRegister. Work is split into slices of
    /// at most the configured budget; between slices the pass yields to the
    /// scheduler.
    pub async fn resolve(&self) -> DiResult<()> {
        self.begin()?;
        debug!("Resolving {}", self.inner.token.name());

        let mut budget = self.budget();
        let result = self.run_pass(&mut budget).await;
        *self.inner.stats.lock() = budget.stats();

        match &result {
            Ok(()) => debug!(
                "Resolved {} in {} turns",
                self.inner.token.name(),
                budget.stats().turns
            ),
            Err(e) => warn!("Resolution of {} aborted: {}", self.inner.token.name(), e),
        }
        result
    }

    fn begin(&self) -> DiResult<()> {
        let mut rejected = None;
        self.inner.state.send_if_modified(|state| match *state {
            ScopeState::Unresolved => {
                *state = ScopeState::Resolving;
                true
            }
            other => {
                rejected = Some(other);
                false
            }
        });
        match rejected {
            None => Ok(()),
            Some(ScopeState::Disposed) => Err(DiError::Disposed),
            Some(other) => Err(DiError::AlreadyResolvingOrResolved {
                state: other.to_string(),
            }),
        }
    }

    async fn run_pass(&self, budget: &mut FrameBudget) -> DiResult<()> {
        let inner = &*self.inner;
        budget.ensure_active()?;

        for token in &inner.prerequisites {
            self.wait_resolved(*token, budget).await?;
        }

        let pending = self.bind()?;
        budget.checkpoint().await?;

        let visible = self.dependencies().len();
        trace!(
            "{} sees {} dependencies, owns {}",
            inner.token.name(),
            visible,
            pending.len()
        );
        budget.checkpoint().await?;

        let injector = Injector::new(&inner.local, &inner.global);
        let total = pending.len();
        for (index, entry) in pending.iter().enumerate() {
            let direct = if entry.dependency.is_direct() {
                inner
                    .direct
                    .lock()
                    .get(&entry.dependency.key())
                    .cloned()
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            injector.inject(&entry.dependency, &direct, budget).await?;
            budget.checkpoint().await?;

            let processed = index + 1;
            if processed < total {
                inner.set_progress(processed as f32 / total as f32);
            }
        }

        budget.ensure_active()?;
        let slots: Vec<_> = pending.iter().map(|p| p.dependency.clone()).collect();
        let registrable = slots.iter().filter(|s| s.hooks().is_registrable()).count();
        let fired = CallbackInvoker::new(&slots).invoke(LifecycleEvent::Register);
        trace!("Registered {} of {} capable dependencies", fired, registrable);

        self.finish()
    }

    /// Run the bind callbacks and take ownership of what they bound
    fn bind(&self) -> DiResult<Vec<PendingDependency>> {
        let inner = &*self.inner;
        let callbacks = std::mem::take(&mut *inner.bind.lock());

        let mut binder = Binder::new(&inner.global);
        let mut outcome = Ok(());
        for callback in callbacks {
            outcome = callback(&mut binder);
            if outcome.is_err() {
                break;
            }
        }

        // Partial bindings are kept so disposal can still clean them up.
        let pending = binder.dependencies();
        let bound = binder.into_bound();
        *inner.local.lock() = bound.local;
        *inner.direct.lock() = bound.direct;
        *inner.promoted.lock() = bound.promoted.iter().map(|d| d.key()).collect();
        *inner.stranded.lock() = bound.stranded;
        debug!(
            "{} bound {} dependencies, {} promoted",
            inner.token.name(),
            pending.len(),
            bound.promoted.len()
        );

        outcome.map(|()| pending)
    }

    fn finish(&self) -> DiResult<()> {
        let inner = &*self.inner;
        let mut pending = inner.on_resolved.lock();
        let transitioned = inner.state.send_if_modified(|state| {
            if *state != ScopeState::Resolving {
                return false;
            }
            inner.global.mark_resolved(inner.token);
            inner
                .progress
                .store(1.0_f32.to_bits(), Ordering::Release);
            *state = ScopeState::Resolved;
            true
        });
        if !transitioned {
            return Err(DiError::Cancelled);
        }
        let callbacks = std::mem::take(&mut *pending);
        drop(pending);
        if inner.log_progress {
            info!("{} resolve progress 100%", inner.token.name());
        }

        for callback in callbacks {
            callback();
        }
        Ok(())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("token", &self.inner.token)
            .field("state", &self.state())
            .field("progress", &self.resolve_progress())
            .finish()
    }
}

impl Default for Container {
    fn default() -> Self {
        Container::builder().build()
    }
}
