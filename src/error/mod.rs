use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;
use std::io::Error as IoError;
use zip::result::ZipError;

/// Machine readable failure classes surfaced by export and restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingFile,
    MissingMedia,
    InvalidMeta,
    InvalidTrip,
    InvalidEntries,
    InvalidMediaPath,
    TripIdMismatch,
    EntryTripMismatch,
    DuplicateTagName,
    DuplicateEntryTag,
    UnsupportedSchema,
    UnsupportedAppVersion,
    Conflict,
    UnreferencedMedia,
    MediaWriteFailed,
    InternalServerError,
    InvalidArchive,
    ArchiveTooLarge,
    TripNotFound,
    MediaReadFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MissingFile => "MISSING_FILE",
            ErrorCode::MissingMedia => "MISSING_MEDIA",
            ErrorCode::InvalidMeta => "INVALID_META",
            ErrorCode::InvalidTrip => "INVALID_TRIP",
            ErrorCode::InvalidEntries => "INVALID_ENTRIES",
            ErrorCode::InvalidMediaPath => "INVALID_MEDIA_PATH",
            ErrorCode::TripIdMismatch => "TRIP_ID_MISMATCH",
            ErrorCode::EntryTripMismatch => "ENTRY_TRIP_MISMATCH",
            ErrorCode::DuplicateTagName => "DUPLICATE_TAG_NAME",
            ErrorCode::DuplicateEntryTag => "DUPLICATE_ENTRY_TAG",
            ErrorCode::UnsupportedSchema => "UNSUPPORTED_SCHEMA",
            ErrorCode::UnsupportedAppVersion => "UNSUPPORTED_APP_VERSION",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::UnreferencedMedia => "UNREFERENCED_MEDIA",
            ErrorCode::MediaWriteFailed => "MEDIA_WRITE_FAILED",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
            ErrorCode::InvalidArchive => "INVALID_ARCHIVE",
            ErrorCode::ArchiveTooLarge => "ARCHIVE_TOO_LARGE",
            ErrorCode::TripNotFound => "TRIP_NOT_FOUND",
            ErrorCode::MediaReadFailed => "MEDIA_READ_FAILED",
        }
    }

    /// Status the HTTP boundary should answer with.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::Conflict | ErrorCode::UnreferencedMedia => 409,
            ErrorCode::TripNotFound => 404,
            ErrorCode::MediaWriteFailed
            | ErrorCode::InternalServerError
            | ErrorCode::MediaReadFailed => 500,
            _ => 400,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured archive error. The `message` is safe to show to callers;
/// low-level detail goes into `context`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ArchiveError {
            code,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Generic failure whose detail must not leak to the caller.
    pub fn internal(detail: impl fmt::Display) -> Self {
        ArchiveError::new(ErrorCode::InternalServerError, "Internal server error")
            .with_context("detail", detail.to_string())
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Caller-facing `{code, message}` pair.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code,
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl StdError for ArchiveError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// The `{data, error}` envelope every operation returns at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Envelope {
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: &ArchiveError) -> Self {
        Envelope {
            data: None,
            error: Some(error.body()),
        }
    }

    pub fn status(&self) -> u16 {
        self.error
            .as_ref()
            .map(|body| body.code.http_status())
            .unwrap_or(200)
    }
}

impl<T> From<ArchiveResult<T>> for Envelope<T> {
    fn from(result: ArchiveResult<T>) -> Self {
        match result {
            Ok(data) => Envelope::ok(data),
            Err(err) => Envelope::err(&err),
        }
    }
}

impl From<AnyhowError> for ArchiveError {
    fn from(error: AnyhowError) -> Self {
        if let Some(archive) = error.downcast_ref::<ArchiveError>() {
            return archive.clone();
        }
        let mut chain = Vec::new();
        let mut source: Option<&(dyn StdError + 'static)> = error.source();
        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }
        let mut converted = ArchiveError::internal(&error);
        if !chain.is_empty() {
            converted = converted.with_context("cause", chain.join(": "));
        }
        converted
    }
}

impl From<IoError> for ArchiveError {
    fn from(error: IoError) -> Self {
        let mut converted =
            ArchiveError::internal(&error).with_context("io_kind", format!("{:?}", error.kind()));
        if let Some(os_code) = error.raw_os_error() {
            converted = converted.with_context("os_code", os_code.to_string());
        }
        converted
    }
}

impl From<SerdeJsonError> for ArchiveError {
    fn from(error: SerdeJsonError) -> Self {
        let mut converted = ArchiveError::internal(&error);
        if error.line() > 0 {
            converted = converted
                .with_context("line", error.line().to_string())
                .with_context("column", error.column().to_string());
        }
        converted
    }
}

impl From<ZipError> for ArchiveError {
    fn from(error: ZipError) -> Self {
        match error {
            ZipError::Io(err) => ArchiveError::from(err).with_context("source", "zip"),
            other => ArchiveError::new(ErrorCode::InvalidArchive, "Archive is not a valid zip file")
                .with_context("detail", other.to_string()),
        }
    }
}

impl From<SqlxError> for ArchiveError {
    fn from(error: SqlxError) -> Self {
        let mut converted = ArchiveError::internal(&error);
        if let SqlxError::Database(db) = &error {
            if let Some(code) = db.code() {
                converted = converted.with_context("sqlite_code", code.to_string());
            }
        }
        converted
    }
}

impl From<crate::store::StoreError> for ArchiveError {
    fn from(error: crate::store::StoreError) -> Self {
        match error {
            crate::store::StoreError::Database(inner) => ArchiveError::from(inner),
            other => ArchiveError::internal(&other),
        }
    }
}
