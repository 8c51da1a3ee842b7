//! Trip archive format: schema, path mapping, builder, reader and validator.

pub mod builder;
pub mod paths;
pub mod reader;
pub mod schema;
pub mod validator;
pub mod version;

pub use builder::{build, BuildOptions, BuiltArchive, MediaManifestEntry};
pub use paths::{normalize_relative_path, to_public_url, to_relative_path, RelativePath};
pub use reader::{read_archive, ArchiveContents, MediaPayload, DEFAULT_MAX_UNCOMPRESSED_BYTES};
pub use schema::{
    EntriesDocument, Entry, ExportCounts, ExportMeta, Media, Tag, Trip, TripDocument,
    TripSnapshot, SCHEMA_VERSION,
};
pub use validator::{
    validate, RestoreArchive, Summary, SummaryConflicts, SummaryCounts, ValidatedArchive,
    ValidationContext,
};
