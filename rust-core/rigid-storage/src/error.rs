// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage error types for the RigidDB store abstraction.
//
// Covers the failure modes of the key-value store collaborator: the backend
// being unreachable, EVALSHA against a script the server does not hold,
// type clashes between keys, runtime failures inside a script, and replies
// of an unexpected shape.

use thiserror::Error;

/// Errors that can occur when interacting with a script-capable store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store is not reachable (connection refused, dropped, I/O).
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// EVALSHA named a script the server has not loaded.
    #[error("no script loaded for hash {0}")]
    NoScript(String),

    /// An operation was issued against a key holding another kind of value.
    #[error("wrong kind of value at key '{0}'")]
    WrongType(String),

    /// A command or script failed while running on the store.
    #[error("script error: {0}")]
    Script(String),

    /// A reply did not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            StorageError::BackendUnavailable(err.to_string())
        } else if err.kind() == redis::ErrorKind::TypeError {
            StorageError::Protocol(err.to_string())
        } else {
            StorageError::Script(err.to_string())
        }
    }
}
