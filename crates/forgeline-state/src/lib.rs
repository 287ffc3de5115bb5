//! Forgeline-State: persistence for the forge integration layer
//!
//! ## Layer 0 - Data/Persistence
//!
//! Holds the little state the integration layer owns: server-wide settings
//! (the extension signing key lives here), built-in secrets and built-in
//! registry credentials.
//!
//! ## Key Components
//!
//! - `storage_traits`: backend-agnostic async traits
//! - `fakes`: in-memory implementations for tests
//! - `SurrealStore`: SurrealDB implementation of every trait

mod error;
pub mod fakes;
pub mod migrations;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use storage_traits::{
    Registry, RegistryStore, Scope, Secret, SecretStore, ServerConfigStore, StorageResult,
};
pub use surreal_store::SurrealStore;

/// Result type for forgeline-state setup operations
pub type Result<T> = std::result::Result<T, StateError>;
