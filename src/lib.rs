pub mod catalog;
pub mod codec;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod haar;
pub mod index;
pub mod jobs;
pub mod loader;
pub mod metadata;
pub mod reference;
pub mod scope;
pub mod score;
pub mod search;
pub mod store;

#[cfg(test)]
mod testutil;

pub use error::{Error, Result};
pub use haar::{Signature, SketchType, compute_signature};

/// Catalog row id of an image.
pub type ImageId = i64;
/// Catalog row id of an album (a folder inside a collection).
pub type AlbumId = i64;
pub type TagId = i64;
