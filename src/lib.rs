//! Sideload: Manifest-Driven Splunk App Deployment
//!
//! Packages Splunk applications into deployable archives, side-loads
//! (installs/upgrades) them into a target directory by diffing
//! content-addressed manifests, and reports installation facts. Upgrades
//! apply the minimal ordered sequence of filesystem actions, and the
//! recorded state is only advanced after a fully successful apply.

pub mod archive;
pub mod cli;
pub mod deploy;
pub mod error;
pub mod facts;
pub mod format;
pub mod lock;
pub mod logging;
pub mod manifest;
pub mod ops;
pub mod package;
pub mod paths;
pub mod state;

/// Crate version, recorded in every state file it writes.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
