//! Fluent binding API
//!
//! The binder only records intents: it allocates slots and places them in the
//! local table (or the global one on request). Nothing is constructed until
//! the container injects the pass.
//!
//! ```
//! use framewire_ioc::{implements, Binder, Component, Constructors, DiResult, Injectable};
//!
//! pub trait MessageLogger: Send + Sync {}
//!
//! struct ConsoleLogger;
//! impl MessageLogger for ConsoleLogger {}
//! impl Component for ConsoleLogger {}
//! impl Injectable for ConsoleLogger {
//!     fn constructors(ctors: &mut Constructors<Self>) {
//!         ctors.define(|()| ConsoleLogger);
//!     }
//! }
//! implements!(ConsoleLogger => dyn MessageLogger);
//!
//! fn bind(binder: &mut Binder<'_>) -> DiResult<()> {
//!     binder
//!         .bind_interface::<dyn MessageLogger>()
//!         .as_::<ConsoleLogger>()?
//!         .to_global_container()
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

use crate::dependency::{Dependency, DependencyKey, Implements};
use crate::error::{DiError, DiResult};
use crate::global::GlobalScope;
use crate::injectable::{Component, Injectable};
use crate::table::DependencyTable;

/// Entry of a pass that the injector has to visit
#[derive(Debug, Clone)]
pub struct PendingDependency {
    /// The slot to inject
    pub dependency: Arc<Dependency>,
    /// Binding whose private direct list this slot belongs to
    pub direct_of: Option<DependencyKey>,
}

impl PendingDependency {
    pub fn is_injectable(&self) -> bool {
        self.dependency.is_injectable()
    }

    pub fn is_direct(&self) -> bool {
        self.dependency.is_direct()
    }
}

/// Everything a pass bound, handed from the binder to the container
#[derive(Debug, Default)]
pub(crate) struct BoundScope {
    pub(crate) local: DependencyTable,
    pub(crate) direct: HashMap<DependencyKey, Vec<Arc<Dependency>>>,
    pub(crate) promoted: Vec<Arc<Dependency>>,
    /// Direct lists whose `.to` target was rejected; still owned for disposal
    pub(crate) stranded: Vec<Arc<Dependency>>,
}

/// Records the bindings of one scope
pub struct Binder<'g> {
    global: &'g GlobalScope,
    bound: BoundScope,
}

impl<'g> Binder<'g> {
    pub(crate) fn new(global: &'g GlobalScope) -> Self {
        Self {
            global,
            bound: BoundScope::default(),
        }
    }

    /// Bind a concrete type; its constructor runs during injection
    pub fn bind<T: Injectable>(&mut self) -> DiResult<Binding<'_, 'g, T>> {
        let slot = Dependency::allocate::<T, T>(false);
        self.insert_local(slot.clone())?;
        Ok(Binding {
            binder: self,
            slot,
            _marker: PhantomData,
        })
    }

    /// Bind an already constructed instance under its own type
    pub fn bind_instance<T: Component>(&mut self, instance: T) -> DiResult<Binding<'_, 'g, T>> {
        let slot = Dependency::prebuilt::<T, T>(instance, false);
        self.insert_local(slot.clone())?;
        Ok(Binding {
            binder: self,
            slot,
            _marker: PhantomData,
        })
    }

    /// Start a binding for a capability, usually `dyn Trait`
    pub fn bind_interface<I>(&mut self) -> InterfaceBinding<'_, 'g, I>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        InterfaceBinding {
            binder: self,
            _marker: PhantomData,
        }
    }

    /// Whether `T` is bound in the local table of this pass
    pub fn is_bound<T: ?Sized + 'static>(&self) -> bool {
        self.bound.local.contains(&DependencyKey::of::<T>())
    }

    /// Entries owned by this pass in injection order
    ///
    /// Local entries come first, then the ones promoted to the global table.
    /// A binding's direct dependencies are listed right before it.
    pub fn dependencies(&self) -> Vec<PendingDependency> {
        let mut pending = Vec::new();
        for dependency in self.bound.local.iter().chain(self.bound.promoted.iter()) {
            let key = dependency.key();
            if let Some(direct) = self.bound.direct.get(&key) {
                pending.extend(direct.iter().map(|slot| PendingDependency {
                    dependency: slot.clone(),
                    direct_of: Some(key),
                }));
            }
            pending.push(PendingDependency {
                dependency: dependency.clone(),
                direct_of: None,
            });
        }
        pending
    }

    /// Private dependency lists by binding key
    pub fn direct_dependencies(&self) -> &HashMap<DependencyKey, Vec<Arc<Dependency>>> {
        &self.bound.direct
    }

    pub(crate) fn into_bound(self) -> BoundScope {
        self.bound
    }

    fn insert_local(&mut self, slot: Arc<Dependency>) -> DiResult<()> {
        trace!("Bind {} as {}", slot.implementation(), slot.key());
        self.bound.local.insert(slot)
    }

    /// Register a `.to` target together with its direct list
    fn insert_target(
        &mut self,
        slot: Arc<Dependency>,
        direct: Vec<Arc<Dependency>>,
    ) -> DiResult<DependencyKey> {
        let key = slot.key();
        if let Err(err) = self.insert_local(slot) {
            self.bound.stranded.extend(direct);
            return Err(err);
        }
        self.bound.direct.insert(key, direct);
        Ok(key)
    }

    /// Take a slot out of the local table so it becomes a direct dependency
    fn detach(&mut self, slot: &Arc<Dependency>) {
        self.bound.local.remove(&slot.key());
    }

    fn promote(&mut self, key: DependencyKey) -> DiResult<()> {
        let slot = self
            .bound
            .local
            .get(&key)
            .cloned()
            .ok_or_else(|| DiError::MissingBinding {
                key: key.name().to_string(),
            })?;
        self.global.promote(slot.clone())?;
        self.bound.local.remove(&key);
        self.bound.promoted.push(slot);
        Ok(())
    }
}

impl fmt::Debug for Binder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binder")
            .field("local", &self.bound.local.len())
            .field("direct", &self.bound.direct.len())
            .field("promoted", &self.bound.promoted.len())
            .field("stranded", &self.bound.stranded.len())
            .finish()
    }
}

/// Binding of a concrete type or instance, already in the local table
pub struct Binding<'b, 'g, T> {
    binder: &'b mut Binder<'g>,
    slot: Arc<Dependency>,
    _marker: PhantomData<fn() -> T>,
}

impl<'b, 'g, T: Component> Binding<'b, 'g, T> {
    pub fn key(&self) -> DependencyKey {
        self.slot.key()
    }

    /// Add a direct dependency for the upcoming `.to` target
    ///
    /// The bound instance itself becomes the first direct dependency.
    pub fn and<D: Injectable>(self) -> DirectBinding<'b, 'g, ConcreteTarget> {
        let direct = Dependency::allocate::<D, D>(false);
        self.into_direct().push(direct)
    }

    /// Add a constructed direct dependency for the upcoming `.to` target
    pub fn and_instance<D: Component>(self, instance: D) -> DirectBinding<'b, 'g, ConcreteTarget> {
        let direct = Dependency::prebuilt::<D, D>(instance, false);
        self.into_direct().push(direct)
    }

    /// Bind `U` with the bound instance as its private dependency
    pub fn to<U: Injectable>(self) -> DiResult<FinalBinding<'b, 'g>> {
        self.into_direct().to::<U>()
    }

    /// Bind a constructed `U` with the bound instance as its private dependency
    pub fn to_instance<U: Component>(self, instance: U) -> DiResult<FinalBinding<'b, 'g>> {
        self.into_direct().to_instance(instance)
    }

    /// Move the binding from the local to the global table
    pub fn to_global_container(self) -> DiResult<()> {
        let key = self.slot.key();
        self.binder.promote(key)
    }

    fn into_direct(self) -> DirectBinding<'b, 'g, ConcreteTarget> {
        self.binder.detach(&self.slot);
        DirectBinding {
            binder: self.binder,
            direct: vec![self.slot],
            _marker: PhantomData,
        }
    }
}

/// Deferred binding of a capability; finish it with `as_` or `to`
#[must_use = "an interface binding is not registered until it is finalized"]
pub struct InterfaceBinding<'b, 'g, I: ?Sized> {
    binder: &'b mut Binder<'g>,
    _marker: PhantomData<fn() -> Box<I>>,
}

impl<'b, 'g, I> InterfaceBinding<'b, 'g, I>
where
    I: ?Sized + Send + Sync + 'static,
{
    /// Implement the capability with `T`
    pub fn as_<T>(self) -> DiResult<FinalBinding<'b, 'g>>
    where
        T: Injectable + Implements<I>,
    {
        let slot = Dependency::allocate::<I, T>(false);
        let key = slot.key();
        self.binder.insert_local(slot)?;
        Ok(FinalBinding {
            binder: self.binder,
            key,
        })
    }

    /// Implement the capability with a constructed instance
    pub fn as_instance<T>(self, instance: T) -> DiResult<FinalBinding<'b, 'g>>
    where
        T: Component + Implements<I>,
    {
        let slot = Dependency::prebuilt::<I, T>(instance, false);
        let key = slot.key();
        self.binder.insert_local(slot)?;
        Ok(FinalBinding {
            binder: self.binder,
            key,
        })
    }

    /// Add a direct dependency for the upcoming `.to` target
    pub fn and<D: Injectable>(self) -> DirectBinding<'b, 'g, InterfaceTarget<I>> {
        self.into_direct().push(Dependency::allocate::<D, D>(false))
    }

    /// Add a constructed direct dependency for the upcoming `.to` target
    pub fn and_instance<D: Component>(
        self,
        instance: D,
    ) -> DirectBinding<'b, 'g, InterfaceTarget<I>> {
        self.into_direct()
            .push(Dependency::prebuilt::<D, D>(instance, false))
    }

    /// Implement the capability with `T`, which may take direct dependencies
    pub fn to<T>(self) -> DiResult<FinalBinding<'b, 'g>>
    where
        T: Injectable + Implements<I>,
    {
        self.into_direct().to::<T>()
    }

    /// Implement the capability with a constructed instance
    pub fn to_instance<T>(self, instance: T) -> DiResult<FinalBinding<'b, 'g>>
    where
        T: Component + Implements<I>,
    {
        self.into_direct().to_instance(instance)
    }

    fn into_direct(self) -> DirectBinding<'b, 'g, InterfaceTarget<I>> {
        DirectBinding {
            binder: self.binder,
            direct: Vec::new(),
            _marker: PhantomData,
        }
    }
}

/// `.to` target is registered under its own type
pub struct ConcreteTarget;

/// `.to` target is registered under the capability `I`
pub struct InterfaceTarget<I: ?Sized>(PhantomData<fn() -> Box<I>>);

/// Binding that is accumulating direct dependencies
#[must_use = "direct dependencies are dropped unless the binding is finalized with `to`"]
pub struct DirectBinding<'b, 'g, M> {
    binder: &'b mut Binder<'g>,
    direct: Vec<Arc<Dependency>>,
    _marker: PhantomData<M>,
}

impl<'b, 'g, M> DirectBinding<'b, 'g, M> {
    /// Add another direct dependency
    pub fn and<D: Injectable>(self) -> Self {
        self.push(Dependency::allocate::<D, D>(false))
    }

    /// Add another constructed direct dependency
    pub fn and_instance<D: Component>(self, instance: D) -> Self {
        self.push(Dependency::prebuilt::<D, D>(instance, false))
    }

    /// Direct dependencies collected so far
    pub fn len(&self) -> usize {
        self.direct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty()
    }

    fn push(mut self, dependency: Arc<Dependency>) -> Self {
        self.direct.push(dependency);
        self
    }

    fn finish(self, target: Arc<Dependency>) -> DiResult<FinalBinding<'b, 'g>> {
        let key = self.binder.insert_target(target, self.direct)?;
        Ok(FinalBinding {
            binder: self.binder,
            key,
        })
    }
}

impl<'b, 'g> DirectBinding<'b, 'g, ConcreteTarget> {
    /// Bind `U` with the collected direct dependencies
    pub fn to<U: Injectable>(self) -> DiResult<FinalBinding<'b, 'g>> {
        self.finish(Dependency::allocate::<U, U>(true))
    }

    /// Bind a constructed `U` with the collected direct dependencies
    pub fn to_instance<U: Component>(self, instance: U) -> DiResult<FinalBinding<'b, 'g>> {
        self.finish(Dependency::prebuilt::<U, U>(instance, true))
    }
}

impl<'b, 'g, I> DirectBinding<'b, 'g, InterfaceTarget<I>>
where
    I: ?Sized + Send + Sync + 'static,
{
    /// Implement the capability with `T` and the collected direct dependencies
    pub fn to<T>(self) -> DiResult<FinalBinding<'b, 'g>>
    where
        T: Injectable + Implements<I>,
    {
        self.finish(Dependency::allocate::<I, T>(true))
    }

    /// Implement the capability with a constructed instance
    pub fn to_instance<T>(self, instance: T) -> DiResult<FinalBinding<'b, 'g>>
    where
        T: Component + Implements<I>,
    {
        self.finish(Dependency::prebuilt::<I, T>(instance, true))
    }
}

/// A finished binding; it can still be promoted to the global table
pub struct FinalBinding<'b, 'g> {
    binder: &'b mut Binder<'g>,
    key: DependencyKey,
}

impl FinalBinding<'_, '_> {
    pub fn key(&self) -> DependencyKey {
        self.key
    }

    /// Move the binding from the local to the global table
    pub fn to_global_container(self) -> DiResult<()> {
        self.binder.promote(self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injectable::Constructors;

    trait Sink: Send + Sync {}

    struct Memory;
    impl Sink for Memory {}
    impl Component for Memory {}
    impl Injectable for Memory {
        fn constructors(ctors: &mut Constructors<Self>) {
            ctors.define(|()| Memory);
        }
    }
    crate::implements!(Memory => dyn Sink);

    struct View;
    impl Component for View {}

    struct Mediator;
    impl Component for Mediator {}
    impl Injectable for Mediator {
        fn constructors(ctors: &mut Constructors<Self>) {
            ctors.define(|()| Mediator);
        }
    }

    #[test]
    fn test_bind_concrete_registers_locally() {
        let global = GlobalScope::new();
        let mut binder = Binder::new(&global);
        binder.bind::<Memory>().unwrap();

        assert!(binder.is_bound::<Memory>());
        let pending = binder.dependencies();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_injectable());
        assert!(!pending[0].is_direct());
        assert!(!pending[0].dependency.is_initialized());
    }

    #[test]
    fn test_rebinding_fails() {
        let global = GlobalScope::new();
        let mut binder = Binder::new(&global);
        binder.bind::<Memory>().unwrap();
        assert!(matches!(
            binder.bind::<Memory>().err(),
            Some(DiError::DuplicateBinding { .. })
        ));
        binder
            .bind_interface::<dyn Sink>()
            .as_::<Memory>()
            .unwrap();
        assert!(matches!(
            binder.bind_interface::<dyn Sink>().as_::<Memory>().err(),
            Some(DiError::DuplicateBinding { .. })
        ));
    }

    #[test]
    fn test_instance_to_target_becomes_direct() {
        let global = GlobalScope::new();
        let mut binder = Binder::new(&global);
        binder
            .bind_instance(View)
            .unwrap()
            .and::<Memory>()
            .to::<Mediator>()
            .unwrap();

        assert!(!binder.is_bound::<View>());
        assert!(binder.is_bound::<Mediator>());

        let direct = &binder.direct_dependencies()[&DependencyKey::of::<Mediator>()];
        let keys: Vec<_> = direct.iter().map(|d| d.key()).collect();
        assert_eq!(
            keys,
            vec![DependencyKey::of::<View>(), DependencyKey::of::<Memory>()]
        );

        // direct dependencies are scheduled before their owner
        let pending = binder.dependencies();
        let order: Vec<_> = pending.iter().map(|p| p.dependency.key()).collect();
        assert_eq!(
            order,
            vec![
                DependencyKey::of::<View>(),
                DependencyKey::of::<Memory>(),
                DependencyKey::of::<Mediator>(),
            ]
        );
        assert!(pending[2].is_direct());
        assert_eq!(pending[0].direct_of, Some(DependencyKey::of::<Mediator>()));
    }

    #[test]
    fn test_interface_to_global_container() {
        let global = GlobalScope::new();
        let mut binder = Binder::new(&global);
        binder
            .bind_interface::<dyn Sink>()
            .as_::<Memory>()
            .unwrap()
            .to_global_container()
            .unwrap();

        assert!(!binder.is_bound::<dyn Sink>());
        assert!(global.contains(&DependencyKey::of::<dyn Sink>()));
        // promoted entries are still injected by the pass that bound them
        assert_eq!(binder.dependencies().len(), 1);
    }

    #[test]
    fn test_promotion_collides_in_global_table() {
        let global = GlobalScope::new();
        let mut binder = Binder::new(&global);
        binder
            .bind_interface::<dyn Sink>()
            .as_::<Memory>()
            .unwrap()
            .to_global_container()
            .unwrap();

        // a second scope promoting the same key collides in the global table
        let mut second = Binder::new(&global);
        let err = second
            .bind_interface::<dyn Sink>()
            .as_::<Memory>()
            .unwrap()
            .to_global_container()
            .unwrap_err();
        assert!(matches!(err, DiError::DuplicateBinding { .. }));
        // the rejected entry stays local
        assert!(second.is_bound::<dyn Sink>());
    }

    #[test]
    fn test_rejected_target_keeps_direct_list() {
        let global = GlobalScope::new();
        let mut binder = Binder::new(&global);
        binder.bind::<Mediator>().unwrap();
        let err = binder
            .bind_instance(View)
            .unwrap()
            .and_instance(Memory)
            .to::<Mediator>()
            .err();
        assert!(matches!(err, Some(DiError::DuplicateBinding { .. })));

        assert!(!binder.is_bound::<View>());
        let bound = binder.into_bound();
        let keys: Vec<_> = bound.stranded.iter().map(|d| d.key()).collect();
        assert_eq!(
            keys,
            vec![DependencyKey::of::<View>(), DependencyKey::of::<Memory>()]
        );
        assert!(bound.stranded.iter().all(|d| d.is_initialized()));
    }

    #[test]
    fn test_missing_binding_on_promotion() {
        let global = GlobalScope::new();
        let mut binder = Binder::new(&global);
        binder.bind::<Memory>().unwrap();
        let key = DependencyKey::of::<Memory>();
        binder.bound.local.remove(&key);
        assert!(matches!(
            binder.promote(key),
            Err(DiError::MissingBinding { .. })
        ));
    }
}
