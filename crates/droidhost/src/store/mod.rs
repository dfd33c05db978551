//! Package repository reconciliation.
//!
//! Repositories publish `index-v2.json` documents on plain HTTP mirrors.
//! The cache pulls them down with per-mirror fallback; the service layer
//! answers search/upgrade/install queries over the cached copies.

pub mod cache;
pub mod index;
pub mod service;

pub use cache::{load_repositories, parse_repo_file, IndexCache, Repository};
pub use index::{FileRef, Index, Manifest, Metadata, PackageEntry, VersionEntry};
pub use service::{AppRecord, StoreService, UpgradeCandidate};
