#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Report storage for the central tier.
//!
//! Each cluster's agent uploads one report blob into a shared bucket. The
//! [`SnapshotCache`] keeps the decoded reports in memory and only pulls blobs
//! whose listing changed since the previous refresh.

mod bucket;
mod cache;

pub use self::{bucket::FsBucket, cache::SnapshotCache};
use bytes::Bytes;
use std::{io, time::SystemTime};
use thiserror::Error;

/// Describes one blob as reported by the bucket listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub size_bytes: u64,
    /// An opaque content fingerprint, like an ETag.
    pub content_hash: String,
    pub last_modified: Option<SystemTime>,
}

/// Lists and fetches report blobs.
#[async_trait::async_trait]
pub trait ObjectSource {
    async fn list_objects(&self) -> io::Result<Vec<ObjectInfo>>;

    async fn download(&self, name: &str) -> io::Result<Bytes>;
}

/// Stores report blobs.
#[async_trait::async_trait]
pub trait ObjectSink {
    async fn upload(&self, name: &str, payload: Bytes) -> io::Result<()>;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot list reports: {0}")]
    List(#[source] io::Error),

    #[error("cannot download report for {name}: {source}")]
    Download { name: String, source: io::Error },

    #[error("cannot decode report for {name}: {source}")]
    Decode {
        name: String,
        source: serde_json::Error,
    },
}
