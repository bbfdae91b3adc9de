//! # Baton Core
//!
//! Core abstractions for the Baton result-reference storage layer.
//!
//! This crate contains:
//! - `ResultRef` / `Manifest` pointer model and invariants
//! - `StorageBackend` trait (implementations live in `baton-stores`)
//! - `StorageRouter` tier-selection policy
//! - Preview and output-select extraction helpers
//!
//! This crate does NOT care about:
//! - Which storage service backs a tier
//! - How workflow steps are scheduled
//! - How templates resolve references

pub mod backend;
pub mod error;
pub mod extract;
pub mod manifest;
pub mod preview;
pub mod reference;
pub mod router;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::backend::StorageBackend;
    pub use crate::error::StorageError;
    pub use crate::extract::extract_output_select;
    pub use crate::manifest::{Manifest, ManifestPart, MergeStrategy};
    pub use crate::preview::build_preview;
    pub use crate::reference::{
        parse_ttl, Compression, RefMeta, ResultRef, Scope, StoreTier, URI_SCHEME,
    };
    pub use crate::router::{AccessPattern, OutputStoreSpec, StorageRouter, TierSpec};
}

// Re-export key types at crate root
pub use backend::StorageBackend;
pub use error::StorageError;
pub use manifest::{Manifest, ManifestPart, MergeStrategy};
pub use reference::{parse_ttl, Compression, RefMeta, ResultRef, Scope, StoreTier, URI_SCHEME};
pub use router::{AccessPattern, OutputStoreSpec, StorageRouter, TierSpec};
