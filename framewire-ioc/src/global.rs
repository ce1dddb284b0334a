//! Shared global table and resolved-scope registry

use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::dependency::{Dependency, DependencyKey};
use crate::error::{DiError, DiResult};
use crate::table::DependencyTable;

/// Identity of a scope, used to sequence scopes that depend on each other
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeToken {
    id: TypeId,
    /// Zero for marker tokens, unique per anonymous scope otherwise
    instance: u64,
    name: &'static str,
}

struct Anonymous;

static NEXT_ANONYMOUS: AtomicU64 = AtomicU64::new(1);

impl ScopeToken {
    /// Token for the marker type `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            instance: 0,
            name: std::any::type_name::<T>(),
        }
    }

    /// A fresh token equal only to its own copies
    ///
    /// Other scopes cannot name it, so nothing can wait for an anonymous
    /// scope through the registry.
    pub fn anonymous() -> Self {
        Self {
            id: TypeId::of::<Anonymous>(),
            instance: NEXT_ANONYMOUS.fetch_add(1, Ordering::Relaxed),
            name: "anonymous scope",
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.instance != 0
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ScopeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            write!(f, "ScopeToken({} #{})", self.name, self.instance)
        } else {
            write!(f, "ScopeToken({})", self.name)
        }
    }
}

/// State shared by every scope of a process
///
/// Scopes receive it as `Arc<GlobalScope>`. Dependencies promoted to its
/// table live as long as the registry does. All access goes through a mutex;
/// callers hold the guard for a whole read-merge-write sequence and never
/// across an await point.
#[derive(Default)]
pub struct GlobalScope {
    dependencies: Mutex<DependencyTable>,
    resolved: Mutex<HashSet<ScopeToken>>,
}

static SHARED: Lazy<Arc<GlobalScope>> = Lazy::new(|| Arc::new(GlobalScope::new()));

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance for hosts that want a single implicit registry
    pub fn shared() -> Arc<GlobalScope> {
        SHARED.clone()
    }

    /// Lock the global table
    pub(crate) fn table(&self) -> MutexGuard<'_, DependencyTable> {
        self.dependencies.lock()
    }

    /// Move a slot into the global table
    pub(crate) fn promote(&self, dependency: Arc<Dependency>) -> DiResult<()> {
        let key = dependency.key();
        self.dependencies.lock().insert(dependency)?;
        debug!("Promoted {} to the global table", key);
        Ok(())
    }

    /// Effective global slot for `key`
    pub fn get(&self, key: &DependencyKey) -> Option<Arc<Dependency>> {
        self.dependencies.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.dependencies.lock().contains(key)
    }

    /// Global instance for `T`, if bound and constructed
    pub fn get_dependency<T: ?Sized + 'static>(&self) -> DiResult<Arc<T>> {
        let key = DependencyKey::of::<T>();
        let slot = self.get(&key).ok_or_else(|| DiError::MissingDependency {
            key: key.name().to_string(),
        })?;
        slot.view::<T>().ok_or_else(|| DiError::Uninitialized {
            key: key.name().to_string(),
        })
    }

    /// Number of globally bound dependencies
    pub fn len(&self) -> usize {
        self.dependencies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.lock().is_empty()
    }

    pub(crate) fn mark_resolved(&self, token: ScopeToken) {
        self.resolved.lock().insert(token);
    }

    pub(crate) fn unmark_resolved(&self, token: &ScopeToken) {
        self.resolved.lock().remove(token);
    }

    /// Whether a scope with this token has resolved and is not disposed
    pub fn is_resolved(&self, token: &ScopeToken) -> bool {
        self.resolved.lock().contains(token)
    }

    /// Drop every global dependency and resolved mark
    ///
    /// Intended for process teardown and tests; live scopes keep their own
    /// handles to slots they already resolved.
    pub fn reset(&self) {
        self.dependencies.lock().clear();
        self.resolved.lock().clear();
    }
}

impl fmt::Debug for GlobalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalScope")
            .field("dependencies", &self.dependencies.lock().len())
            .field("resolved", &self.resolved.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injectable::Component;

    struct Settings(u32);
    impl Component for Settings {}

    struct MainScope;

    #[test]
    fn test_promote_and_lookup() {
        let global = GlobalScope::new();
        global
            .promote(Dependency::prebuilt::<Settings, Settings>(Settings(7), false))
            .unwrap();

        assert_eq!(global.len(), 1);
        assert_eq!(global.get_dependency::<Settings>().unwrap().0, 7);

        let err = global
            .promote(Dependency::prebuilt::<Settings, Settings>(Settings(8), false))
            .unwrap_err();
        assert!(matches!(err, DiError::DuplicateBinding { .. }));
    }

    #[test]
    fn test_resolved_registry() {
        let global = GlobalScope::new();
        let token = ScopeToken::of::<MainScope>();
        assert!(!global.is_resolved(&token));
        global.mark_resolved(token);
        assert!(global.is_resolved(&token));
        global.unmark_resolved(&token);
        assert!(!global.is_resolved(&token));
    }

    #[test]
    fn test_anonymous_tokens_are_distinct() {
        let global = GlobalScope::new();
        let first = ScopeToken::anonymous();
        let second = ScopeToken::anonymous();
        assert_ne!(first, second);
        assert!(first.is_anonymous());
        assert!(!ScopeToken::of::<MainScope>().is_anonymous());

        global.mark_resolved(first);
        global.mark_resolved(second);
        global.unmark_resolved(&first);
        assert!(global.is_resolved(&second));
    }

    #[test]
    fn test_reset_clears_everything() {
        let global = GlobalScope::new();
        global
            .promote(Dependency::prebuilt::<Settings, Settings>(Settings(1), false))
            .unwrap();
        global.mark_resolved(ScopeToken::of::<MainScope>());
        global.reset();
        assert!(global.is_empty());
        assert!(!global.is_resolved(&ScopeToken::of::<MainScope>()));
    }
}
