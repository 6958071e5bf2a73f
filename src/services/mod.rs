//! Core services: classification, scanning, watching, enrichment

pub mod classifier;
pub mod fingerprint;
pub mod hierarchy;
pub mod media_tools;
pub mod metadata;
pub mod notifier;
pub mod prober;
pub mod scanner;
pub mod watcher;

pub use fingerprint::{DuplicateDetector, Fingerprinter};
pub use hierarchy::{CollectionStore, HierarchyResolver};
pub use media_tools::MediaTools;
pub use metadata::{MetadataLookup, NullLookup, TvMazeLookup};
pub use notifier::{Event, Notifier};
pub use prober::Prober;
pub use scanner::{ScannerService, ScanSummary};
pub use watcher::LibraryWatcher;
