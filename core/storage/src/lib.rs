//! Store abstractions for docsync.
//!
//! This module provides the two seams the sync engine talks through:
//! a [`RemoteStore`] shaped after the GitHub Contents/Commits API, and a
//! [`LocalStore`] holding the working copy of the documents.
//!
//! # Design Principles
//! - Engine isolation: no GitHub- or filesystem-specific logic leaks into the engine
//! - Async operations: all I/O operations are async
//! - One call, one request: stores never retry; the engine owns retry policy
//! - Unified error semantics: consistent error types across stores

pub mod github;
pub mod local;
pub mod memory;
pub mod provider;

pub use github::{GitHubConfig, GitHubRemote, GITHUB_API_BASE};
pub use local::FsLocalStore;
pub use memory::{MemoryLocal, MemoryRemote, RemoteOp};
pub use provider::{
    ChangedFile, CommitDetail, CommitSummary, EntryKind, FileChangeStatus, LocalFile, LocalStore,
    RemoteEntry, RemoteFile, RemoteStore, WriteResult,
};
