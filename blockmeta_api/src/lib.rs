pub mod config;
pub mod constants;
pub mod error;
pub mod graph;
pub mod plan;
pub mod status;

/// Identifier of an entry in a storage configuration document.
pub type EntryId = String;
