//! Forgeline-Extensions: signed external overrides
//!
//! ## Layer 2 - Extensions
//!
//! Operators can plug HTTP services into three decisions the server makes:
//! which config files a pipeline runs, which secrets it receives and which
//! registry credentials it may use. Every call to such a service is signed
//! with the server's ed25519 key so the service can authenticate it.
//!
//! ## Key Components
//!
//! - `signing`: key provisioning and RFC 9421 style request signatures
//! - `client`: signed JSON POSTs with 200/204 semantics
//! - `config`: local discovery, HTTP override and their combination
//! - `secrets`, `registries`: built-in and HTTP services
//! - `manager`: per-repo service selection

pub mod client;
pub mod config;
mod error;
pub mod manager;
pub mod registries;
pub mod secrets;
pub mod signing;

pub use client::{ExtensionClient, ExtensionReply};
pub use config::{
    CombinedConfigService, ConfigEntry, ConfigService, ForgeConfigService, HttpConfigExtension,
};
pub use error::ExtensionError;
pub use manager::{resolve_override, ExtensionManager, ExtensionSettings};
pub use registries::{BuiltinRegistryService, HttpRegistryService, RegistryService};
pub use secrets::{BuiltinSecretService, HttpSecretService, SecretService};
pub use signing::{verify_signature, KeyProvider, RequestSigner, SignedHeaders};

/// Result type for forgeline-extensions operations
pub type Result<T> = std::result::Result<T, ExtensionError>;
