//! Error types and result types for every docwire operation.
//!
//! Errors are grouped by kind rather than by origin. Value and path errors come
//! from the document model, command errors come from parsing filters, updates,
//! projections and command parameters, and backend errors carry a stable
//! [`BackendErrorCode`] so that no engine-specific error type crosses the
//! backend contract. Use [`DocWireResult<T>`] as the return type for fallible
//! operations.

use std::fmt;

use bson::error::Error as BsonError;
use thiserror::Error;

use crate::document::Document;

/// Stable numeric error codes reported to clients.
///
/// The numeric values and code names match what unmodified client drivers
/// expect to see in the `code` and `codeName` fields of an error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InternalError,
    BadValue,
    FailedToParse,
    Unauthorized,
    TypeMismatch,
    NamespaceNotFound,
    PathNotViable,
    ConflictingUpdateOperators,
    CursorNotFound,
    NamespaceExists,
    MaxTimeMSExpired,
    DollarPrefixedFieldName,
    InvalidId,
    EmptyFieldName,
    ImmutableField,
    InvalidNamespace,
    NotImplemented,
    DuplicateKey,
    SortBadValue,
    SortBadOrder,
    MissingField,
    ValueNegative,
    RegexOptions,
    BadRegexOption,
    ProjectionInEx,
    ProjectionExIn,
}

impl ErrorCode {
    /// Returns the numeric code.
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::InternalError => 1,
            ErrorCode::BadValue => 2,
            ErrorCode::FailedToParse => 9,
            ErrorCode::Unauthorized => 13,
            ErrorCode::TypeMismatch => 14,
            ErrorCode::NamespaceNotFound => 26,
            ErrorCode::PathNotViable => 28,
            ErrorCode::ConflictingUpdateOperators => 40,
            ErrorCode::CursorNotFound => 43,
            ErrorCode::NamespaceExists => 48,
            ErrorCode::MaxTimeMSExpired => 50,
            ErrorCode::DollarPrefixedFieldName => 52,
            ErrorCode::InvalidId => 53,
            ErrorCode::EmptyFieldName => 56,
            ErrorCode::ImmutableField => 66,
            ErrorCode::InvalidNamespace => 73,
            ErrorCode::NotImplemented => 238,
            ErrorCode::DuplicateKey => 11000,
            ErrorCode::SortBadValue => 15974,
            ErrorCode::SortBadOrder => 15975,
            ErrorCode::MissingField => 40414,
            ErrorCode::ValueNegative => 51024,
            ErrorCode::RegexOptions => 51075,
            ErrorCode::BadRegexOption => 51108,
            ErrorCode::ProjectionInEx => 31253,
            ErrorCode::ProjectionExIn => 31254,
        }
    }

    /// Returns the code name, e.g. `BadValue` or `Location51024`.
    pub fn name(self) -> String {
        match self {
            ErrorCode::InternalError => "InternalError".into(),
            ErrorCode::BadValue => "BadValue".into(),
            ErrorCode::FailedToParse => "FailedToParse".into(),
            ErrorCode::Unauthorized => "Unauthorized".into(),
            ErrorCode::TypeMismatch => "TypeMismatch".into(),
            ErrorCode::NamespaceNotFound => "NamespaceNotFound".into(),
            ErrorCode::PathNotViable => "PathNotViable".into(),
            ErrorCode::ConflictingUpdateOperators => "ConflictingUpdateOperators".into(),
            ErrorCode::CursorNotFound => "CursorNotFound".into(),
            ErrorCode::NamespaceExists => "NamespaceExists".into(),
            ErrorCode::MaxTimeMSExpired => "MaxTimeMSExpired".into(),
            ErrorCode::DollarPrefixedFieldName => "DollarPrefixedFieldName".into(),
            ErrorCode::InvalidId => "InvalidID".into(),
            ErrorCode::EmptyFieldName => "EmptyFieldName".into(),
            ErrorCode::ImmutableField => "ImmutableField".into(),
            ErrorCode::InvalidNamespace => "InvalidNamespace".into(),
            ErrorCode::NotImplemented => "NotImplemented".into(),
            other => format!("Location{}", other.code()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Malformed value or document construction.
///
/// These should not occur on well-formed input; they mark values that fall
/// outside the closed set of supported types or documents that are not ready
/// to be handed to storage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A BSON type outside the supported set was encountered.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
    /// A document key is empty.
    #[error("document contains an empty field name")]
    EmptyKey,
    /// A stored document has no `_id` field.
    #[error("document is missing the _id field")]
    MissingId,
    /// A stored document has a key starting with `$`.
    #[error("invalid key: '{0}' (key must not start with '$' sign)")]
    DollarPrefixedKey(String),
    /// A stored document has a key containing `.`.
    #[error("invalid key: '{0}' (key must not contain '.' sign)")]
    DottedKey(String),
    /// The `_id` value has a type that cannot be stored.
    #[error("The '_id' value cannot be of type {0}")]
    InvalidIdType(String),
}

/// Reason a path operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathErrorKind {
    /// A path with zero segments, or a segment that is empty.
    EmptyElement,
    /// A key was not found in a document.
    KeyNotFound,
    /// A scalar was reached before the path ended.
    CannotAccess,
    /// An array segment is not a valid index.
    ArrayInvalidIndex,
    /// An array index is beyond the end of the array.
    IndexOutOfBound,
    /// An intermediate node could not be created.
    CannotCreateField,
}

/// Path resolution or creation failure.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct PathError {
    pub kind: PathErrorKind,
    pub message: String,
}

impl PathError {
    pub fn new(kind: PathErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// A client-facing command failure with a stable code.
///
/// Filter, update, projection, sort and parameter parsing errors are all
/// reported through this type. `argument` names the command argument the
/// error relates to (for example `projection`), when there is one.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
    pub argument: Option<String>,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), argument: None }
    }

    pub fn with_argument(code: ErrorCode, message: impl Into<String>, argument: impl Into<String>) -> Self {
        Self { code, message: message.into(), argument: Some(argument.into()) }
    }
}

/// Stable failure codes every storage engine translates its errors into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorCode {
    /// An inserted document collides with an existing `_id`.
    DuplicateKey,
    /// The database name is not valid for the engine.
    DatabaseNameInvalid,
    /// The collection name is not valid for the engine.
    CollectionNameInvalid,
    /// A collection with the same name already exists.
    CollectionAlreadyExists,
    /// The collection (table) does not exist.
    CollectionDoesNotExist,
    /// The database does not exist.
    DatabaseDoesNotExist,
}

/// An engine failure tagged with a stable [`BackendErrorCode`].
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct BackendError {
    pub code: BackendErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Returns the client-facing code for this backend failure.
    pub fn error_code(&self) -> ErrorCode {
        match self.code {
            BackendErrorCode::DuplicateKey => ErrorCode::DuplicateKey,
            BackendErrorCode::DatabaseNameInvalid | BackendErrorCode::CollectionNameInvalid => {
                ErrorCode::InvalidNamespace
            }
            BackendErrorCode::CollectionAlreadyExists => ErrorCode::NamespaceExists,
            BackendErrorCode::CollectionDoesNotExist | BackendErrorCode::DatabaseDoesNotExist => {
                ErrorCode::NamespaceNotFound
            }
        }
    }
}

/// Represents all possible errors surfaced by the docwire core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocWireError {
    /// A value or document is malformed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A path could not be resolved or created.
    #[error(transparent)]
    Path(#[from] PathError),
    /// A filter, update, projection, sort or parameter is malformed.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// The requested cursor does not exist or was already closed.
    #[error("cursor id {0} not found")]
    CursorNotFound(i64),
    /// A cursor was requested from a namespace it does not belong to.
    #[error("Requested getMore on namespace '{requested}', but cursor belongs to a different namespace {owner}")]
    Unauthorized { requested: String, owner: String },
    /// The operation deadline passed.
    #[error("operation exceeded time limit")]
    MaxTimeExpired,
    /// A storage engine failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The feature is intentionally not implemented.
    #[error("{0}")]
    NotImplemented(String),
    /// The operation was cancelled before it completed.
    #[error("operation was cancelled")]
    Cancelled,
    /// An internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized `Result` type for docwire operations.
pub type DocWireResult<T> = Result<T, DocWireError>;

impl DocWireError {
    /// Shorthand for a [`CommandError`] without an argument.
    pub fn command(code: ErrorCode, message: impl Into<String>) -> Self {
        DocWireError::Command(CommandError::new(code, message))
    }

    /// Shorthand for a `BadValue` command error.
    pub fn bad_value(message: impl Into<String>) -> Self {
        Self::command(ErrorCode::BadValue, message)
    }

    /// Shorthand for a `FailedToParse` command error.
    pub fn failed_to_parse(message: impl Into<String>) -> Self {
        Self::command(ErrorCode::FailedToParse, message)
    }

    /// Returns the client-facing error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            DocWireError::Validation(ValidationError::InvalidIdType(_)) => ErrorCode::InvalidId,
            DocWireError::Validation(ValidationError::EmptyKey) => ErrorCode::EmptyFieldName,
            DocWireError::Validation(ValidationError::DollarPrefixedKey(_)) => ErrorCode::DollarPrefixedFieldName,
            DocWireError::Validation(_) => ErrorCode::BadValue,
            DocWireError::Path(_) => ErrorCode::BadValue,
            DocWireError::Command(err) => err.code,
            DocWireError::CursorNotFound(_) => ErrorCode::CursorNotFound,
            DocWireError::Unauthorized { .. } => ErrorCode::Unauthorized,
            DocWireError::MaxTimeExpired => ErrorCode::MaxTimeMSExpired,
            DocWireError::Backend(err) => err.error_code(),
            DocWireError::NotImplemented(_) => ErrorCode::NotImplemented,
            DocWireError::Cancelled | DocWireError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Returns true when the connection should be terminated after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DocWireError::Internal(_))
    }

    /// Renders the error reply document sent back to the client.
    pub fn to_reply(&self) -> Document {
        let code = self.code();
        let mut reply = Document::new();
        reply.set("ok", 0.0);
        reply.set("errmsg", self.to_string());
        reply.set("code", code.code());
        reply.set("codeName", code.name());
        reply
    }
}

impl From<BsonError> for DocWireError {
    fn from(err: BsonError) -> Self {
        DocWireError::Validation(ValidationError::UnsupportedType(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_codes_are_named_by_number() {
        assert_eq!(ErrorCode::ValueNegative.name(), "Location51024");
        assert_eq!(ErrorCode::BadValue.name(), "BadValue");
        assert_eq!(ErrorCode::InvalidId.name(), "InvalidID");
    }

    #[test]
    fn backend_codes_translate_to_client_codes() {
        let err = DocWireError::from(BackendError::new(BackendErrorCode::CollectionAlreadyExists, "exists"));
        assert_eq!(err.code(), ErrorCode::NamespaceExists);
        assert_eq!(err.code().code(), 48);

        let err = DocWireError::from(BackendError::new(BackendErrorCode::DuplicateKey, "dup"));
        assert_eq!(err.code().code(), 11000);
    }

    #[test]
    fn reply_carries_code_and_message() {
        let reply = DocWireError::CursorNotFound(1234).to_reply();
        assert_eq!(reply.get("errmsg").and_then(|v| v.as_str()), Some("cursor id 1234 not found"));
        assert_eq!(reply.get("code").and_then(|v| v.as_i32()), Some(43));
        assert_eq!(reply.get("codeName").and_then(|v| v.as_str()), Some("CursorNotFound"));
    }
}
