//! Dependency lifecycle callbacks
//!
//! Instances opt into callbacks through [`Component::capabilities`]. The
//! builder methods on [`Capabilities`] are gated on the matching trait, so the
//! check happens at compile time:
//!
//! ```
//! use framewire_ioc::{Capabilities, Component, Registrable, Removable};
//!
//! struct Hud;
//!
//! impl Registrable for Hud {
//!     fn on_register(&self) {}
//! }
//!
//! impl Removable for Hud {
//!     fn on_remove(&self) {}
//! }
//!
//! impl Component for Hud {
//!     fn capabilities() -> Capabilities<Self> {
//!         Capabilities::none().registrable().removable()
//!     }
//! }
//! ```
//!
//! [`Component::capabilities`]: crate::Component::capabilities

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

use crate::dependency::Dependency;

/// Invoked once after every dependency of the pass has been injected
pub trait Registrable {
    fn on_register(&self);
}

/// Invoked once when the owning scope is disposed
pub trait Removable {
    fn on_remove(&self);
}

type Hook = fn(&(dyn Any + Send + Sync));

fn invoke_register<T: Registrable + 'static>(value: &(dyn Any + Send + Sync)) {
    if let Some(value) = value.downcast_ref::<T>() {
        value.on_register();
    }
}

fn invoke_remove<T: Removable + 'static>(value: &(dyn Any + Send + Sync)) {
    if let Some(value) = value.downcast_ref::<T>() {
        value.on_remove();
    }
}

/// Lifecycle callbacks a component opts into
pub struct Capabilities<T> {
    hooks: LifecycleHooks,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Capabilities<T> {
    /// No callbacks
    pub fn none() -> Self {
        Self {
            hooks: LifecycleHooks::default(),
            _marker: PhantomData,
        }
    }

    /// Receive [`Registrable::on_register`]
    pub fn registrable(mut self) -> Self
    where
        T: Registrable,
    {
        self.hooks.on_register = Some(invoke_register::<T> as Hook);
        self
    }

    /// Receive [`Removable::on_remove`]
    pub fn removable(mut self) -> Self
    where
        T: Removable,
    {
        self.hooks.on_remove = Some(invoke_remove::<T> as Hook);
        self
    }

    pub(crate) fn into_hooks(self) -> LifecycleHooks {
        self.hooks
    }
}

/// Type-erased callbacks stored on a dependency slot
#[derive(Clone, Copy, Default)]
pub(crate) struct LifecycleHooks {
    on_register: Option<Hook>,
    on_remove: Option<Hook>,
}

impl LifecycleHooks {
    pub(crate) fn is_registrable(&self) -> bool {
        self.on_register.is_some()
    }

    pub(crate) fn is_removable(&self) -> bool {
        self.on_remove.is_some()
    }
}

/// Which callback to raise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Register,
    Remove,
}

/// Raises lifecycle callbacks over a set of dependencies
///
/// Each slot accepts each event at most once, whatever the number of
/// invokers that see it.
pub(crate) struct CallbackInvoker<'a> {
    dependencies: &'a [Arc<Dependency>],
}

impl<'a> CallbackInvoker<'a> {
    pub(crate) fn new(dependencies: &'a [Arc<Dependency>]) -> Self {
        Self { dependencies }
    }

    /// Raise `event` on every capable dependency, returning how many fired
    pub(crate) fn invoke(&self, event: LifecycleEvent) -> usize {
        let mut fired = 0;
        for dependency in self.dependencies {
            if Self::raise(dependency, event) {
                fired += 1;
            }
        }
        fired
    }

    fn raise(dependency: &Dependency, event: LifecycleEvent) -> bool {
        let hook = match event {
            LifecycleEvent::Register => dependency.hooks().on_register,
            LifecycleEvent::Remove => dependency.hooks().on_remove,
        };
        let Some(hook) = hook else {
            return false;
        };
        // Never constructed, nothing to notify.
        let Some(value) = dependency.concrete() else {
            return false;
        };

        let claimed = match event {
            LifecycleEvent::Register => dependency.claim_register(),
            LifecycleEvent::Remove => dependency.claim_remove(),
        };
        if !claimed {
            return false;
        }

        trace!("{:?} on {}", event, dependency.implementation());
        hook(value);
        true
    }
}
