//! Forgeline Core Library
//!
//! The canonical forge model, the [`Forge`] adapter contract, the HTTP
//! transport port, shared webhook helpers and the config discovery engine.

pub mod config;
pub mod domain;
pub mod fakes;
pub mod forge;
pub mod hook;
pub mod telemetry;
pub mod transport;

pub use config::ConfigFetcher;
pub use domain::{
    filter_pipeline_files, ChangedFiles, Commit, CommitStatus, ConfigError, Deployment, EventKind,
    EventReason, FileBlob, ForgeError, ForgeResult, NetrcCredential, Permission, Pipeline,
    PullRequest, Release, Repo, StatusState, Team, User, Visibility,
};
pub use forge::{
    FixedOwner, Forge, ForgeKind, HookOutcome, HookRequest, IgnoredEvent, LoginFlow,
    LoginRequest, RepoLookup, RepoOwnerLookup,
};
pub use telemetry::init_tracing;
pub use transport::{ApiRequest, ApiResponse, ApiTransport, HttpMethod, ReqwestTransport};
