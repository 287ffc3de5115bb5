//! Canonical domain model for Forgeline.
//!
//! Every forge adapter produces these provider-independent shapes.

pub mod error;
pub mod file;
pub mod pipeline;
pub mod repo;

pub use error::{ConfigError, ForgeError, ForgeResult};
pub use file::{filter_pipeline_files, FileBlob};
pub use pipeline::{
    ChangedFiles, CommitStatus, Deployment, EventKind, EventReason, Pipeline, PullRequest,
    Release, StatusState,
};
pub use repo::{Commit, NetrcCredential, Permission, Repo, Team, User, Visibility};
