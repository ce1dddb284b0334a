//! Frame-budgeted dependency injection
//!
//! Scopes bind dependencies into a local table or a process-wide global one,
//! then resolve them in a cooperative pass that yields back to the host
//! whenever a time slice is used up. Constructors receive handles to their
//! dependencies, so bindings may refer to each other in any order.
//!
//! ```
//! use framewire_ioc::prelude::*;
//! use std::sync::Arc;
//!
//! struct Greeter;
//! impl Component for Greeter {}
//! impl Injectable for Greeter {
//!     fn constructors(ctors: &mut Constructors<Self>) {
//!         ctors.define(|()| Greeter);
//!     }
//! }
//!
//! let container = Container::builder()
//!     .global(Arc::new(GlobalScope::new()))
//!     .on_bind(|binder| {
//!         binder.bind::<Greeter>()?;
//!         Ok(())
//!     })
//!     .build();
//!
//! futures::executor::block_on(container.resolve()).unwrap();
//! assert!(container.get_dependency::<Greeter>().is_ok());
//! ```

pub mod binder;
pub mod builder;
pub mod container;
pub mod dependency;
pub mod error;
pub mod global;
pub mod injectable;
mod injector;
pub mod lifecycle;
pub mod scheduler;
pub mod table;

#[cfg(feature = "config")]
pub mod config;

pub use binder::{Binder, Binding, DirectBinding, FinalBinding, InterfaceBinding, PendingDependency};
pub use builder::{ContainerBuilder, Module};
pub use container::{Container, ScopeState};
pub use dependency::{Dep, Dependency, DependencyKey, Implements};
pub use error::{DiError, DiResult};
pub use global::{GlobalScope, ScopeToken};
pub use injectable::{Component, Constructors, Injectable};
pub use lifecycle::{Capabilities, LifecycleEvent, Registrable, Removable};
pub use scheduler::{
    BudgetStats, Clock, FrameBudget, FrameHandle, FrameLoop, ManualClock, Scheduler, SystemClock,
};

#[cfg(feature = "config")]
pub use config::ResolveConfig;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        implements, Binder, Capabilities, Component, Constructors, Container, ContainerBuilder,
        Dep, DiError, DiResult, GlobalScope, Implements, Injectable, Registrable, Removable,
        Scheduler, ScopeState,
    };
}
