// src/config/mod.rs

//! Configuration loading and validation for fleetci.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate basic invariants like positive intervals (`validate.rs`).
//! - Describe the directory layout under the CI root (`layout.rs`).

pub mod layout;
pub mod loader;
pub mod model;
pub mod validate;

pub use layout::CiLayout;
pub use loader::{load_and_validate, load_for_root, load_from_path};
pub use model::{ClusterSection, ConfigFile, DaemonSection, RawConfigFile};
