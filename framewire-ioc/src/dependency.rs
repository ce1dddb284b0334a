//! Dependency slots, keys and typed handles
//!
//! A [`Dependency`] is allocated at bind time with an empty value cell and is
//! filled exactly once by the injector. Everything that refers to a binding
//! (tables, direct lists, constructor arguments) holds the slot itself, so an
//! uninitialized dependency is always *present*, just not usable yet.

use once_cell::sync::OnceCell;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DiError, DiResult};
use crate::injectable::{Component, Constructor, Constructors, Injectable};
use crate::lifecycle::LifecycleHooks;

/// Type-erased shared instance
pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;

/// Identifies a binding: a concrete type or a capability such as `dyn Trait`
#[derive(Clone, Copy)]
pub struct DependencyKey {
    id: TypeId,
    name: &'static str,
}

impl DependencyKey {
    /// Key for `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Type id behind the key
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Type name for diagnostics
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for DependencyKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DependencyKey {}

impl Hash for DependencyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DependencyKey({})", self.name)
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Conversion from a concrete implementation to the capability it is bound as
///
/// Every type implements itself. Trait-object capabilities are declared with
/// [`implements!`](crate::implements):
///
/// ```
/// use framewire_ioc::implements;
///
/// pub trait MessageLogger: Send + Sync {
///     fn log(&self, message: &str);
/// }
///
/// pub struct ConsoleLogger;
///
/// impl MessageLogger for ConsoleLogger {
///     fn log(&self, message: &str) {
///         println!("{message}");
///     }
/// }
///
/// implements!(ConsoleLogger => dyn MessageLogger);
/// ```
pub trait Implements<I: ?Sized>: Send + Sync + 'static {
    /// Convert a shared implementation into the capability
    fn upcast(self: Arc<Self>) -> Arc<I>;
}

impl<T: Send + Sync + 'static> Implements<T> for T {
    fn upcast(self: Arc<Self>) -> Arc<T> {
        self
    }
}

/// Declare that a type can be bound as one or more trait-object capabilities
#[macro_export]
macro_rules! implements {
    ($ty:ty => $($iface:ty),+ $(,)?) => {
        $(
            impl $crate::Implements<$iface> for $ty {
                fn upcast(self: ::std::sync::Arc<Self>) -> ::std::sync::Arc<$iface> {
                    self
                }
            }
        )+
    };
}

/// Filled value of a slot: the concrete instance and its view under the key
struct Filled {
    concrete: AnyArc,
    view: Box<dyn Any + Send + Sync>,
}

type Upcast = fn(AnyArc) -> Box<dyn Any + Send + Sync>;

fn upcast_to<K, T>(value: AnyArc) -> Box<dyn Any + Send + Sync>
where
    K: ?Sized + Send + Sync + 'static,
    T: Implements<K>,
{
    match value.downcast::<T>() {
        Ok(typed) => Box::new(typed.upcast()),
        // Only reachable if a constructor lied about its output type; keep the
        // value so lookups fail as a type mismatch instead of panicking.
        Err(value) => Box::new(value),
    }
}

/// A bound instance, possibly not constructed yet
pub struct Dependency {
    key: DependencyKey,
    implementation: DependencyKey,
    injectable: bool,
    direct: bool,
    constructors: Vec<Constructor>,
    hooks: LifecycleHooks,
    upcast: Upcast,
    cell: OnceCell<Filled>,
    registered: AtomicBool,
    removed: AtomicBool,
}

impl Dependency {
    /// Allocate an uninitialized slot for `T`, bound under `K`
    pub(crate) fn allocate<K, T>(direct: bool) -> Arc<Self>
    where
        K: ?Sized + Send + Sync + 'static,
        T: Injectable + Implements<K>,
    {
        let mut constructors = Constructors::<T>::new();
        T::constructors(&mut constructors);

        Arc::new(Self {
            key: DependencyKey::of::<K>(),
            implementation: DependencyKey::of::<T>(),
            injectable: true,
            direct,
            constructors: constructors.into_declared(),
            hooks: T::capabilities().into_hooks(),
            upcast: upcast_to::<K, T>,
            cell: OnceCell::new(),
            registered: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        })
    }

    /// Wrap an already built instance, bound under `K`
    pub(crate) fn prebuilt<K, T>(instance: T, direct: bool) -> Arc<Self>
    where
        K: ?Sized + Send + Sync + 'static,
        T: Component + Implements<K>,
    {
        let slot = Self {
            key: DependencyKey::of::<K>(),
            implementation: DependencyKey::of::<T>(),
            injectable: false,
            direct,
            constructors: Vec::new(),
            hooks: T::capabilities().into_hooks(),
            upcast: upcast_to::<K, T>,
            cell: OnceCell::new(),
            registered: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        };
        slot.fill(Arc::new(instance));
        Arc::new(slot)
    }

    /// Key this dependency is bound under
    pub fn key(&self) -> DependencyKey {
        self.key
    }

    /// Concrete type stored in the slot
    pub fn implementation(&self) -> DependencyKey {
        self.implementation
    }

    /// Whether the injector has to run a constructor for this slot
    pub fn is_injectable(&self) -> bool {
        self.injectable
    }

    /// Whether the binding carries a private direct-dependency list
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    /// Whether the value is available
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    pub(crate) fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    /// Store the constructed value. Returns `false` if the slot was already filled.
    pub(crate) fn fill(&self, concrete: AnyArc) -> bool {
        let view = (self.upcast)(concrete.clone());
        self.cell.set(Filled { concrete, view }).is_ok()
    }

    /// Value viewed as `K`, if filled and `K` is the bound key
    pub(crate) fn view<K: ?Sized + 'static>(&self) -> Option<Arc<K>> {
        self.cell
            .get()
            .and_then(|filled| filled.view.downcast_ref::<Arc<K>>().cloned())
    }

    /// Value as its concrete type
    pub(crate) fn concrete(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.cell.get().map(|filled| &*filled.concrete)
    }

    pub(crate) fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }

    /// Claim the single OnRegister call
    pub(crate) fn claim_register(&self) -> bool {
        !self.registered.swap(true, Ordering::AcqRel)
    }

    /// Claim the single OnRemove call
    pub(crate) fn claim_remove(&self) -> bool {
        !self.removed.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("key", &self.key.name)
            .field("implementation", &self.implementation.name)
            .field("injectable", &self.injectable)
            .field("direct", &self.direct)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Typed handle to a dependency slot
///
/// Handles are what constructors receive. A handle may point at a slot that
/// has not been constructed yet; it becomes usable once the pass injects it,
/// which is always the case by the time `on_register` runs.
pub struct Dep<K: ?Sized> {
    slot: Arc<Dependency>,
    _marker: PhantomData<fn() -> Arc<K>>,
}

impl<K: ?Sized + 'static> Dep<K> {
    pub(crate) fn new(slot: Arc<Dependency>) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    /// The instance, or `None` while uninitialized
    pub fn try_get(&self) -> Option<Arc<K>> {
        self.slot.view::<K>()
    }

    /// The instance, failing with [`DiError::Uninitialized`] before injection
    pub fn get(&self) -> DiResult<Arc<K>> {
        self.try_get().ok_or_else(|| DiError::Uninitialized {
            key: self.slot.key().name().to_string(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.is_initialized()
    }

    pub fn key(&self) -> DependencyKey {
        self.slot.key()
    }

    /// Whether both handles point at the same slot
    pub fn ptr_eq(&self, other: &Dep<K>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<K: ?Sized> Clone for Dep<K> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K: ?Sized> fmt::Debug for Dep<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dep").field(&self.slot).finish()
    }
}
