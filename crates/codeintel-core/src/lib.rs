//! Codeintel Core Components
//!
//! This crate provides the pieces shared by the indexer and its catalog
//! and template subsystems: configuration loading and the area resolver
//! that turns absolute paths into short area-relative references.

mod config;
mod error;
mod resolver;

pub use config::{IndexerConfig, WatchConfig};
pub use error::CoreError;
pub use resolver::{AreaResource, ResourceResolver};
