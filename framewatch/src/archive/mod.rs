//! Frame archive.
//!
//! Frames are stored in a [`BlobStore`] under their [`ArchiveKey`](crate::domain::ArchiveKey),
//! and every ingest appends a [`LogEntry`](crate::domain::LogEntry) to
//! `logs/{YYYY-MM-DD}.json`.

mod store;
mod writer;

pub use store::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use writer::ArchiveWriter;
