//! Injectable types and their constructor declarations
//!
//! Constructors are declared statically instead of being discovered at
//! runtime. A type lists its constructor with a closure over a tuple of
//! [`Dep`] handles; the tuple's element types are the parameter keys the
//! injector looks up, in order.
//!
//! ```
//! use framewire_ioc::{Component, Constructors, Dep, Injectable};
//!
//! struct Clock;
//! impl Component for Clock {}
//! impl Injectable for Clock {
//!     fn constructors(ctors: &mut Constructors<Self>) {
//!         ctors.define(|()| Clock);
//!     }
//! }
//!
//! struct Ticker {
//!     clock: Dep<Clock>,
//! }
//! impl Component for Ticker {}
//! impl Injectable for Ticker {
//!     fn constructors(ctors: &mut Constructors<Self>) {
//!         ctors.define(|(clock,): (Dep<Clock>,)| Ticker { clock });
//!     }
//! }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::dependency::{AnyArc, Dep, Dependency, DependencyKey};
use crate::error::{DiError, DiResult};
use crate::lifecycle::Capabilities;

/// Anything that can live in a dependency table
///
/// Override [`Component::capabilities`] to opt into lifecycle callbacks.
pub trait Component: Send + Sync + 'static {
    /// Lifecycle callbacks this type wants to receive
    fn capabilities() -> Capabilities<Self>
    where
        Self: Sized,
    {
        Capabilities::none()
    }
}

/// A component the injector can construct
pub trait Injectable: Component + Sized {
    /// Declare the constructor. Exactly one must be declared.
    fn constructors(ctors: &mut Constructors<Self>);
}

/// Type-erased constructor
pub(crate) struct Constructor {
    params: Vec<DependencyKey>,
    build: Box<dyn Fn(Arguments) -> DiResult<AnyArc> + Send + Sync>,
}

impl Constructor {
    /// Parameter keys in declaration order
    pub(crate) fn params(&self) -> &[DependencyKey] {
        &self.params
    }

    /// Run the constructor with one slot per parameter
    pub(crate) fn invoke(&self, slots: Vec<Arc<Dependency>>) -> DiResult<AnyArc> {
        (self.build)(Arguments {
            slots: slots.into_iter(),
        })
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("params", &self.params)
            .finish()
    }
}

/// Collects the constructors a type declares
pub struct Constructors<T> {
    declared: Vec<Constructor>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Injectable> Constructors<T> {
    pub(crate) fn new() -> Self {
        Self {
            declared: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Declare an infallible constructor
    pub fn define<P, F>(&mut self, build: F) -> &mut Self
    where
        P: Params,
        F: Fn(P) -> T + Send + Sync + 'static,
    {
        self.declared.push(Constructor {
            params: P::keys(),
            build: Box::new(move |mut args| {
                let params = P::from_arguments(&mut args)?;
                Ok(Arc::new(build(params)) as AnyArc)
            }),
        });
        self
    }

    /// Declare a constructor that can fail
    pub fn try_define<P, F>(&mut self, build: F) -> &mut Self
    where
        P: Params,
        F: Fn(P) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.declared.push(Constructor {
            params: P::keys(),
            build: Box::new(move |mut args| {
                let params = P::from_arguments(&mut args)?;
                let instance = build(params).map_err(|e| DiError::construction::<T>(format!("{e:#}")))?;
                Ok(Arc::new(instance) as AnyArc)
            }),
        });
        self
    }

    /// Number of declared constructors
    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    pub(crate) fn into_declared(self) -> Vec<Constructor> {
        self.declared
    }
}

/// Resolved slots handed to a constructor, one per parameter
pub struct Arguments {
    slots: std::vec::IntoIter<Arc<Dependency>>,
}

impl Arguments {
    fn next_slot<K: ?Sized + 'static>(&mut self) -> DiResult<Arc<Dependency>> {
        self.slots.next().ok_or_else(|| DiError::UnresolvedDependency {
            missing: std::any::type_name::<K>().to_string(),
            owner: "constructor arguments".to_string(),
        })
    }
}

/// A single constructor parameter
pub trait Param: Sized + 'static {
    /// Key the injector looks up for this parameter
    fn key() -> DependencyKey;

    /// Build the parameter from its resolved slot
    fn from_slot(slot: Arc<Dependency>) -> Self;
}

impl<K: ?Sized + Send + Sync + 'static> Param for Dep<K> {
    fn key() -> DependencyKey {
        DependencyKey::of::<K>()
    }

    fn from_slot(slot: Arc<Dependency>) -> Self {
        Dep::new(slot)
    }
}

/// The full parameter list of a constructor
pub trait Params: Sized + 'static {
    fn keys() -> Vec<DependencyKey>;

    fn from_arguments(args: &mut Arguments) -> DiResult<Self>;
}

impl Params for () {
    fn keys() -> Vec<DependencyKey> {
        Vec::new()
    }

    fn from_arguments(_args: &mut Arguments) -> DiResult<Self> {
        Ok(())
    }
}

macro_rules! impl_params {
    ($($name:ident),+) => {
        impl<$($name: Param),+> Params for ($($name,)+) {
            fn keys() -> Vec<DependencyKey> {
                vec![$($name::key()),+]
            }

            fn from_arguments(args: &mut Arguments) -> DiResult<Self> {
                Ok(($($name::from_slot(args.next_slot::<$name>()?),)+))
            }
        }
    };
}

impl_params!(A);
impl_params!(A, B);
impl_params!(A, B, C);
impl_params!(A, B, C, D);
impl_params!(A, B, C, D, E);
impl_params!(A, B, C, D, E, F);
impl_params!(A, B, C, D, E, F, G);
impl_params!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    struct Leaf;
    impl Component for Leaf {}
    impl Injectable for Leaf {
        fn constructors(ctors: &mut Constructors<Self>) {
            ctors.define(|()| Leaf);
        }
    }

    struct Pair {
        left: Dep<Leaf>,
        right: Dep<Leaf>,
    }
    impl Component for Pair {}
    impl Injectable for Pair {
        fn constructors(ctors: &mut Constructors<Self>) {
            ctors.define(|(left, right): (Dep<Leaf>, Dep<Leaf>)| Pair { left, right });
        }
    }

    struct Twice;
    impl Component for Twice {}
    impl Injectable for Twice {
        fn constructors(ctors: &mut Constructors<Self>) {
            ctors.define(|()| Twice).define(|(_,): (Dep<Leaf>,)| Twice);
        }
    }

    #[test]
    fn test_param_keys_follow_tuple_order() {
        let mut ctors = Constructors::<Pair>::new();
        Pair::constructors(&mut ctors);
        let declared = ctors.into_declared();
        assert_eq!(declared.len(), 1);
        assert_eq!(
            declared[0].params(),
            &[DependencyKey::of::<Leaf>(), DependencyKey::of::<Leaf>()]
        );
    }

    #[test]
    fn test_invoke_hands_slots_in_order() {
        let first = Dependency::allocate::<Leaf, Leaf>(false);
        let second = Dependency::allocate::<Leaf, Leaf>(false);

        let mut ctors = Constructors::<Pair>::new();
        Pair::constructors(&mut ctors);
        let declared = ctors.into_declared();

        let built = declared[0]
            .invoke(vec![first.clone(), second.clone()])
            .unwrap();
        let pair = built.downcast::<Pair>().ok().unwrap();
        assert!(pair.left.ptr_eq(&Dep::new(first)));
        assert!(pair.right.ptr_eq(&Dep::new(second)));
    }

    #[test]
    fn test_multiple_declarations_are_kept() {
        let mut ctors = Constructors::<Twice>::new();
        Twice::constructors(&mut ctors);
        assert_eq!(ctors.len(), 2);
    }

    #[test]
    fn test_try_define_maps_errors() {
        struct Flaky;
        impl Component for Flaky {}
        impl Injectable for Flaky {
            fn constructors(ctors: &mut Constructors<Self>) {
                ctors.try_define(|()| -> anyhow::Result<Flaky> { anyhow::bail!("socket closed") });
            }
        }

        let mut ctors = Constructors::<Flaky>::new();
        Flaky::constructors(&mut ctors);
        let declared = ctors.into_declared();
        match declared[0].invoke(Vec::new()) {
            Err(DiError::ConstructionFailed { type_name, reason }) => {
                assert!(type_name.contains("Flaky"));
                assert!(reason.contains("socket closed"));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
