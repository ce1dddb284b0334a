//! Error types for binding and resolution

use thiserror::Error;

/// Result type alias for DI operations
pub type DiResult<T> = Result<T, DiError>;

/// Errors that can occur while binding or resolving a scope
#[derive(Error, Debug)]
pub enum DiError {
    /// A key is already bound in the table being written
    #[error("Dependency already bound: {key}")]
    DuplicateBinding { key: String },

    /// An injectable type must declare exactly one constructor
    #[error("Expected exactly one constructor for {type_name}, found {found}")]
    AmbiguousConstructor { type_name: String, found: usize },

    /// A constructor parameter could not be found in any visible table
    #[error("Unresolved dependency {missing} required by {owner}")]
    UnresolvedDependency { missing: String, owner: String },

    /// Query for a key that is bound in neither the local nor the global table
    #[error("No dependency {key} in this scope")]
    MissingDependency { key: String },

    /// Promotion of a key that is not in the local table
    #[error("Binding not found in local table: {key}")]
    MissingBinding { key: String },

    /// `resolve` was called on a scope that already started resolving
    #[error("Scope is already {state}")]
    AlreadyResolvingOrResolved { state: String },

    /// The resolution pass was cancelled
    #[error("Resolution cancelled")]
    Cancelled,

    /// The scope was disposed
    #[error("Scope has been disposed")]
    Disposed,

    /// The dependency is bound but its constructor has not run yet
    #[error("Dependency {key} is not initialized yet")]
    Uninitialized { key: String },

    /// A fallible constructor returned an error
    #[error("Failed to construct {type_name}: {reason}")]
    ConstructionFailed { type_name: String, reason: String },

    /// Configuration error
    #[cfg(feature = "config")]
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DiError {
    /// Whether the error came from cancellation rather than a broken graph
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DiError::Cancelled)
    }

    pub(crate) fn construction<T: ?Sized>(err: impl std::fmt::Display) -> Self {
        DiError::ConstructionFailed {
            type_name: std::any::type_name::<T>().to_string(),
            reason: err.to_string(),
        }
    }
}
