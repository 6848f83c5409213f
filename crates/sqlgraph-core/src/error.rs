//! Error types for SQLGraph operations.
//!
//! Failures fall into four families:
//!
//! - **configuration** ([`Error::Mapping`]): the mapping metadata cannot
//!   answer a question the engine must ask (unregistered type, relation
//!   without a foreign key, key that cannot be generated). Always fatal.
//! - **structural integrity** ([`Error::Integrity`]): fetched rows or an
//!   in-memory graph contradict the declared structure.
//! - **database** ([`Error::Statement`] wrapping a driver error): a statement
//!   failed; the SQL, bound parameters and entity are attached.
//! - **not found** ([`Error::NotFound`]): a fetch-by-identity found no row.

use crate::value::Value;
use std::fmt;

/// The primary error type for all SQLGraph operations.
#[derive(Debug)]
pub enum Error {
    /// Mapping metadata is missing or inconsistent
    Mapping(MappingError),
    /// Loaded rows or a graph violate the declared structure
    Integrity(IntegrityError),
    /// A statement issued by the engine failed
    Statement(StatementError),
    /// Fetch-by-identity found nothing
    NotFound(NotFoundError),
    /// Connection-related errors (connect, disconnect, timeout)
    Connection(ConnectionError),
    /// Query execution errors reported by a driver
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction errors
    Transaction(TransactionError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    /// The entity type the engine was working on
    pub type_name: Option<&'static str>,
    /// The other side of a relation, when one is involved
    pub related_type: Option<&'static str>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// No `ClassMapping` registered for a type
    MissingMapping,
    /// A relation has no foreign key for the child type
    MissingForeignKey,
    /// A mapping declares no key fields
    MissingKey,
    /// A referenced value needed for a foreign key is absent
    KeyGeneration,
    /// An accessor was handed an entity of the wrong type
    TypeMismatch,
    /// A relation or property name does not resolve
    InvalidRelation,
    /// A discriminator value names no declared variant
    InvalidDiscriminator,
    /// The caller passed an argument the engine cannot work with
    InvalidArgument,
}

#[derive(Debug, Clone)]
pub struct IntegrityError {
    pub kind: IntegrityErrorKind,
    pub parent_type: &'static str,
    pub child_type: &'static str,
    pub relation: Option<&'static str>,
    /// The offending foreign key or identity value
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityErrorKind {
    /// A child row's foreign key matches no loaded parent
    UnmatchedForeignKey,
    /// Two entities in one graph share an identity key
    DuplicateIdentity,
    /// A one-to-one relation received more than one row for a parent
    DuplicateOneToOne,
}

/// A failed statement, with everything needed to reproduce it.
#[derive(Debug)]
pub struct StatementError {
    pub sql: String,
    pub params: Vec<Value>,
    pub entity_type: Option<&'static str>,
    /// `Debug` rendering of the entity being written, if any
    pub entity: Option<String>,
    pub source: Box<Error>,
}

#[derive(Debug, Clone)]
pub struct NotFoundError {
    pub type_name: &'static str,
    pub key: Vec<Value>,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// Operation exceeded the driver's timeout
    Timeout,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Deadlock detected
    Deadlock,
    /// Other database error
    Database,
}

#[derive(Debug, Clone)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Already committed
    AlreadyCommitted,
    /// Already rolled back
    AlreadyRolledBack,
    /// Savepoint not found
    SavepointNotFound,
}

impl MappingError {
    pub fn new(kind: MappingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            type_name: None,
            related_type: None,
            message: message.into(),
        }
    }

    pub fn with_type(mut self, type_name: &'static str) -> Self {
        self.type_name = Some(type_name);
        self
    }

    pub fn with_related(mut self, related_type: &'static str) -> Self {
        self.related_type = Some(related_type);
        self
    }
}

impl Error {
    /// Shorthand for a [`MappingError`] without type context.
    pub fn mapping(kind: MappingErrorKind, message: impl Into<String>) -> Self {
        Error::Mapping(MappingError::new(kind, message))
    }

    /// Shorthand for [`MappingErrorKind::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::mapping(MappingErrorKind::InvalidArgument, message)
    }

    /// Wrap a database failure with the statement that produced it.
    pub fn statement(
        source: Error,
        sql: impl Into<String>,
        params: &[Value],
        entity_type: Option<&'static str>,
        entity: Option<String>,
    ) -> Self {
        Error::Statement(StatementError {
            sql: sql.into(),
            params: params.to_vec(),
            entity_type,
            entity,
            source: Box::new(source),
        })
    }

    /// Is this a configuration error (fatal, never retried)?
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Mapping(_))
    }

    /// Is this a structural-integrity error?
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity(_))
    }

    /// Is this a not-found error?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// The mapping error kind, if this is a configuration error.
    pub fn mapping_kind(&self) -> Option<MappingErrorKind> {
        match self {
            Error::Mapping(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The integrity error kind, if this is a structural-integrity error.
    pub fn integrity_kind(&self) -> Option<IntegrityErrorKind> {
        match self {
            Error::Integrity(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Get SQL associated with this error, looking through statement wrappers.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Statement(e) => Some(&e.sql),
            Error::Query(e) => e.sql.as_deref(),
            _ => None,
        }
    }

    /// The innermost error, looking through statement wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Statement(e) => e.source.root_cause(),
            other => other,
        }
    }
}

impl fmt::Display for MappingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MappingErrorKind::MissingMapping => "missing mapping",
            MappingErrorKind::MissingForeignKey => "missing foreign key",
            MappingErrorKind::MissingKey => "missing key",
            MappingErrorKind::KeyGeneration => "key generation",
            MappingErrorKind::TypeMismatch => "type mismatch",
            MappingErrorKind::InvalidRelation => "invalid relation",
            MappingErrorKind::InvalidDiscriminator => "invalid discriminator",
            MappingErrorKind::InvalidArgument => "invalid argument",
        };
        f.write_str(label)
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        match (self.type_name, self.related_type) {
            (Some(t), Some(r)) => write!(f, " ({t} -> {r})"),
            (Some(t), None) => write!(f, " ({t})"),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let relation = self.relation.unwrap_or("?");
        match self.kind {
            IntegrityErrorKind::UnmatchedForeignKey => write!(
                f,
                "{} row with foreign key {} matches no loaded {} (relation '{}')",
                self.child_type, self.value, self.parent_type, relation
            ),
            IntegrityErrorKind::DuplicateIdentity => write!(
                f,
                "identity {} appears more than once for {} in one graph",
                self.value, self.child_type
            ),
            IntegrityErrorKind::DuplicateOneToOne => write!(
                f,
                "one-to-one relation '{}' on {} received several {} rows for key {}",
                relation, self.parent_type, self.child_type, self.value
            ),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Mapping(e) => write!(f, "Configuration error: {}", e),
            Error::Integrity(e) => write!(f, "Integrity error: {}", e),
            Error::Statement(e) => {
                write!(f, "Statement failed: {} [sql: {}", e.source, e.sql)?;
                if !e.params.is_empty() {
                    let params: Vec<String> = e.params.iter().map(ToString::to_string).collect();
                    write!(f, "; params: {}", params.join(", "))?;
                }
                if let Some(entity_type) = e.entity_type {
                    write!(f, "; entity: {}", entity_type)?;
                }
                write!(f, "]")
            }
            Error::NotFound(e) => {
                let key: Vec<String> = e.key.iter().map(ToString::to_string).collect();
                write!(f, "{} with key ({}) not found", e.type_name, key.join(", "))
            }
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Statement(e) => Some(e.source.as_ref() as &(dyn std::error::Error + 'static)),
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<IntegrityError> for Error {
    fn from(err: IntegrityError) -> Self {
        Error::Integrity(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

/// Result type alias for SQLGraph operations.
pub type Result<T> = std::result::Result<T, Error>;
