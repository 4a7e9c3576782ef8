//! # Material Tracker
//!
//! Tracks the versioned sources ("materials") pipelines are built from:
//! Git, Subversion, Mercurial, TFS and Perforce repositories, upstream
//! pipeline stages, package repositories and plugin-provided SCMs. It
//! detects new revisions, keeps working copies up to date, assembles the
//! per-pipeline snapshot of what changed, and treats selected materials as
//! sources of pipeline configuration.
//!
//! ## Quick Example
//!
//! ```
//! use material_tracker::filesystem::MemoryFS;
//! use material_tracker::material::Filter;
//!
//! // Ignore documentation-only changes
//! let filter = Filter::new(["docs/**", "*.md"]).compile().unwrap();
//! assert!(filter.should_ignore(&["docs/guide/intro.txt", "README.md"]));
//! assert!(!filter.should_ignore(&["README.md", "src/lib.rs"]));
//!
//! // Parsers read configuration fragments from an in-memory file tree
//! let mut fs = MemoryFS::new();
//! fs.add_file_string("build.pipeline.yaml", "name: build");
//! assert!(fs.exists("build.pipeline.yaml"));
//! ```
//!
//! ## Core Concepts
//!
//! - **Materials (`material`)**: source descriptions, identity fingerprints
//!   and path ignore filters.
//! - **Adapters (`scm`)**: one [`scm::ScmAdapter`] per source kind, driving
//!   the native tool through [`command::CommandLine`] with secrets masked.
//! - **Working copies (`workdir`)**: decides between in-place update and
//!   fresh checkout and materializes a revision on disk.
//! - **Snapshots (`revisions`)**: the ordered [`revisions::MaterialRevisions`]
//!   of one pipeline run and whether it should trigger.
//! - **Orchestration (`orchestrator`)**: a worker pool that updates each
//!   material at most once at a time, with listeners on completion.
//! - **Config-repos (`config_repo`)**: parse, cache and merge configuration
//!   kept in a material.

pub mod cipher;
pub mod command;
pub mod config;
pub mod config_repo;
pub mod console;
pub mod error;
pub mod filesystem;
pub mod material;
pub mod orchestrator;
pub mod output;
pub mod persistence;
pub mod redact;
pub mod revision;
pub mod revisions;
pub mod scm;
pub mod secret;
pub mod workdir;
