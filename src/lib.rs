//! Curator: a self-hosted media library manager core
//!
//! Discovers media files on disk, classifies filenames into structured
//! metadata, organizes items into collection hierarchies, and runs
//! background enrichment passes (fingerprinting, duplicate detection,
//! artwork, metadata lookup) through a deduplicating task queue.

pub mod config;
pub mod db;
pub mod jobs;
pub mod services;
