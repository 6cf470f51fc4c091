//! GitHub remote store for docsync.
//!
//! This module provides a remote backed by one branch of a GitHub repository:
//! - Contents API for listing, reading, writing and deleting documents
//! - Blob API fallback for files too large to be inlined
//! - Commits API for history browsing

pub mod client;
pub mod remote;

pub use client::{GitHubClient, GITHUB_API_BASE};
pub use remote::{decode_content, encode_content, GitHubConfig, GitHubRemote};
