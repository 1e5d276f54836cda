// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Error types and the wire tags shared with generated scripts.
//!
//! Every script returns `(method, errorCode, ...payload)`. [`Method`] and
//! [`ErrorCode`] are those two tags; their wire names are what the scripts
//! emit and what [`crate::db::RigidDb`] decodes.

use std::fmt;

use rigid_storage::StorageError;
use thiserror::Error;

/// Convenience alias used throughout rigid-core.
pub type Result<T> = std::result::Result<T, RigidError>;

/// The operation a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Create,
    Update,
    Delete,
    Get,
    Exists,
    List,
    Size,
    Find,
    FindAll,
    SetSchema,
    GetSchema,
    GetSchemaHash,
    CurrentId,
    /// Placeholder tag of a script that ran no operation.
    None,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Create => "create",
            Method::Update => "update",
            Method::Delete => "delete",
            Method::Get => "get",
            Method::Exists => "exists",
            Method::List => "list",
            Method::Size => "size",
            Method::Find => "find",
            Method::FindAll => "findAll",
            Method::SetSchema => "setSchema",
            Method::GetSchema => "getSchema",
            Method::GetSchemaHash => "getSchemaHash",
            Method::CurrentId => "currentId",
            Method::None => "none",
        }
    }

    pub fn from_wire(tag: &str) -> Option<Method> {
        let method = match tag {
            "create" => Method::Create,
            "update" => Method::Update,
            "delete" => Method::Delete,
            "get" => Method::Get,
            "exists" => Method::Exists,
            "list" => Method::List,
            "size" => Method::Size,
            "find" => Method::Find,
            "findAll" => Method::FindAll,
            "setSchema" => Method::SetSchema,
            "getSchema" => Method::GetSchema,
            "getSchemaHash" => Method::GetSchemaHash,
            "currentId" => Method::CurrentId,
            "none" => Method::None,
            _ => return None,
        };
        Some(method)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure codes carried by an [`OperationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SchemaMissing,
    BadSavedSchema,
    InvalidSchema,
    SchemaExists,
    UnknownCollection,
    BadParameter,
    NullNotAllowed,
    WrongType,
    NotFound,
    NotUnique,
    UnknownIndex,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::SchemaMissing => "schemaMissing",
            ErrorCode::BadSavedSchema => "badSavedSchema",
            ErrorCode::InvalidSchema => "invalidSchema",
            ErrorCode::SchemaExists => "schemaExists",
            ErrorCode::UnknownCollection => "unknownCollection",
            ErrorCode::BadParameter => "badParameter",
            ErrorCode::NullNotAllowed => "nullNotAllowed",
            ErrorCode::WrongType => "wrongType",
            ErrorCode::NotFound => "notFound",
            ErrorCode::NotUnique => "notUnique",
            ErrorCode::UnknownIndex => "unknownIndex",
        }
    }

    /// Parse a wire tag. `noError` is not a code and yields `None`.
    pub fn from_wire(tag: &str) -> Option<ErrorCode> {
        let code = match tag {
            "schemaMissing" => ErrorCode::SchemaMissing,
            "badSavedSchema" => ErrorCode::BadSavedSchema,
            "invalidSchema" => ErrorCode::InvalidSchema,
            "schemaExists" => ErrorCode::SchemaExists,
            "unknownCollection" => ErrorCode::UnknownCollection,
            "badParameter" => ErrorCode::BadParameter,
            "nullNotAllowed" => ErrorCode::NullNotAllowed,
            "wrongType" => ErrorCode::WrongType,
            "notFound" => ErrorCode::NotFound,
            "notUnique" => ErrorCode::NotUnique,
            "unknownIndex" => ErrorCode::UnknownIndex,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire tag for success.
pub const NO_ERROR: &str = "noError";

/// A tagged operation failure: which call failed, why, and for `notUnique`
/// which indices collided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    pub method: Method,
    pub code: ErrorCode,
    pub indices: Vec<String>,
    pub reason: Option<String>,
}

impl OperationError {
    pub fn new(method: Method, code: ErrorCode) -> Self {
        Self {
            method,
            code,
            indices: Vec::new(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_indices(mut self, indices: Vec<String>) -> Self {
        self.indices = indices;
        self
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.method, self.code)?;
        if !self.indices.is_empty() {
            write!(f, " [{}]", self.indices.join(", "))?;
        }
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

impl std::error::Error for OperationError {}

/// Errors returned by [`crate::db::RigidDb`].
#[derive(Error, Debug)]
pub enum RigidError {
    /// The operation was rejected, either before dispatch or by its script.
    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("invalid prefix: '{0}'")]
    InvalidPrefix(String),

    #[error("invalid schema revision: {0} (must be at least 1)")]
    InvalidRevision(u64),

    /// The store could not be reached or failed while running a script.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A script reply could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RigidError {
    /// The operation error code, if this is an operation failure.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            RigidError::Operation(op) => Some(op.code),
            _ => None,
        }
    }

    pub fn operation(&self) -> Option<&OperationError> {
        match self {
            RigidError::Operation(op) => Some(op),
            _ => None,
        }
    }
}
