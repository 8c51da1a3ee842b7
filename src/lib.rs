//! Trip archive export and restore for the waymark travel journal.
//!
//! [`service::export_trip`] packages one trip with its media into a zip;
//! [`service::restore_archive_bytes`] validates such a zip and admits it into
//! the live stores, or reports what it would do in dry-run mode.

pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod media_store;
pub mod migrate;
pub mod restore;
pub mod security;
pub mod service;
pub mod store;
pub mod time;

pub use error::{ArchiveError, ArchiveResult, Envelope, ErrorBody, ErrorCode};
