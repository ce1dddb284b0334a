//! Constructor matching and slot injection

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

use crate::dependency::{Dependency, DependencyKey};
use crate::error::{DiError, DiResult};
use crate::global::GlobalScope;
use crate::scheduler::FrameBudget;
use crate::table::DependencyTable;

/// Fills slots by running their single declared constructor
///
/// Parameters are looked up in the local table, then the global one, then the
/// binding's direct list. The first match wins. Matches may still be
/// uninitialized; constructors receive handles, not values.
pub(crate) struct Injector<'a> {
    local: &'a Mutex<DependencyTable>,
    global: &'a GlobalScope,
}

impl<'a> Injector<'a> {
    pub(crate) fn new(local: &'a Mutex<DependencyTable>, global: &'a GlobalScope) -> Self {
        Self { local, global }
    }

    fn lookup(&self, key: &DependencyKey, direct: &[Arc<Dependency>]) -> Option<Arc<Dependency>> {
        if let Some(slot) = self.local.lock().get(key) {
            return Some(slot.clone());
        }
        if let Some(slot) = self.global.get(key) {
            return Some(slot);
        }
        direct.iter().find(|slot| slot.key() == *key).cloned()
    }

    /// Inject one slot; returns false if there was nothing to construct
    pub(crate) async fn inject(
        &self,
        dependency: &Arc<Dependency>,
        direct: &[Arc<Dependency>],
        budget: &mut FrameBudget,
    ) -> DiResult<bool> {
        if !dependency.is_injectable() || dependency.is_initialized() {
            return Ok(false);
        }

        let owner = dependency.implementation();
        let constructor = match dependency.constructors() {
            [single] => single,
            declared => {
                return Err(DiError::AmbiguousConstructor {
                    type_name: owner.name().to_string(),
                    found: declared.len(),
                })
            }
        };

        let mut slots = Vec::with_capacity(constructor.params().len());
        for key in constructor.params() {
            let slot = self
                .lookup(key, direct)
                .ok_or_else(|| DiError::UnresolvedDependency {
                    missing: key.name().to_string(),
                    owner: owner.name().to_string(),
                })?;
            slots.push(slot);
            budget.checkpoint().await?;
        }

        let value = constructor.invoke(slots)?;
        dependency.fill(value);
        trace!("Injected {} as {}", owner, dependency.key());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::Dep;
    use crate::injectable::{Component, Constructors, Injectable};
    use crate::scheduler::{ManualClock, Scheduler};
    use futures::FutureExt;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Config;
    impl Component for Config {}
    impl Injectable for Config {
        fn constructors(ctors: &mut Constructors<Self>) {
            ctors.define(|()| Config);
        }
    }

    struct Service {
        config: Dep<Config>,
    }
    impl Component for Service {}
    impl Injectable for Service {
        fn constructors(ctors: &mut Constructors<Self>) {
            ctors.define(|(config,): (Dep<Config>,)| Service { config });
        }
    }

    struct Undecided;
    impl Component for Undecided {}
    impl Injectable for Undecided {
        fn constructors(ctors: &mut Constructors<Self>) {
            ctors.define(|()| Undecided).define(|(_,): (Dep<Config>,)| Undecided);
        }
    }

    fn budget(cancel: CancellationToken) -> FrameBudget {
        FrameBudget::new(
            Arc::new(ManualClock::new()),
            Scheduler::Immediate,
            Duration::from_millis(16),
            cancel,
        )
    }

    #[test]
    fn test_injects_with_uninitialized_parameter() {
        let local = Mutex::new(DependencyTable::new());
        let global = GlobalScope::new();
        let service = Dependency::allocate::<Service, Service>(false);
        let config = Dependency::allocate::<Config, Config>(false);
        local.lock().insert(service.clone()).unwrap();
        local.lock().insert(config.clone()).unwrap();

        let injector = Injector::new(&local, &global);
        let mut budget = budget(CancellationToken::new());
        let injected = injector
            .inject(&service, &[], &mut budget)
            .now_or_never()
            .unwrap()
            .unwrap();
        assert!(injected);

        // the handle was bound before Config was constructed
        let built = service.view::<Service>().unwrap();
        assert!(!built.config.is_initialized());
        injector
            .inject(&config, &[], &mut budget)
            .now_or_never()
            .unwrap()
            .unwrap();
        assert!(built.config.is_initialized());
    }

    #[test]
    fn test_direct_list_supplies_parameters() {
        let local = Mutex::new(DependencyTable::new());
        let global = GlobalScope::new();
        let service = Dependency::allocate::<Service, Service>(true);
        let private = Dependency::allocate::<Config, Config>(false);

        let injector = Injector::new(&local, &global);
        let mut budget = budget(CancellationToken::new());
        injector
            .inject(&service, std::slice::from_ref(&private), &mut budget)
            .now_or_never()
            .unwrap()
            .unwrap();
        let built = service.view::<Service>().unwrap();
        assert!(built.config.key() == private.key());
        assert!(!local.lock().contains(&private.key()));
    }

    #[test]
    fn test_missing_parameter_is_reported() {
        let local = Mutex::new(DependencyTable::new());
        let global = GlobalScope::new();
        let service = Dependency::allocate::<Service, Service>(false);

        let injector = Injector::new(&local, &global);
        let mut budget = budget(CancellationToken::new());
        let err = injector
            .inject(&service, &[], &mut budget)
            .now_or_never()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, DiError::UnresolvedDependency { .. }));
        assert!(!service.is_initialized());
    }

    #[test]
    fn test_multiple_constructors_are_ambiguous() {
        let local = Mutex::new(DependencyTable::new());
        let global = GlobalScope::new();
        let slot = Dependency::allocate::<Undecided, Undecided>(false);

        let injector = Injector::new(&local, &global);
        let mut budget = budget(CancellationToken::new());
        let err = injector
            .inject(&slot, &[], &mut budget)
            .now_or_never()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, DiError::AmbiguousConstructor { found: 2, .. }));
    }

    #[test]
    fn test_cancelled_budget_stops_injection() {
        let local = Mutex::new(DependencyTable::new());
        let global = GlobalScope::new();
        let service = Dependency::allocate::<Service, Service>(false);
        local
            .lock()
            .insert(Dependency::allocate::<Config, Config>(false))
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let injector = Injector::new(&local, &global);
        let mut budget = budget(cancel);
        let err = injector
            .inject(&service, &[], &mut budget)
            .now_or_never()
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!service.is_initialized());
    }
}
