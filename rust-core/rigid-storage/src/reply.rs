// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Store replies.

use crate::error::StorageError;

/// A reply from the store, for a plain command or a script evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Int(i64),
    Bulk(String),
    Status(String),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// The reply as text; integers are rendered in base 10.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Reply::Bulk(s) | Reply::Status(s) => Some(s.clone()),
            Reply::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// The reply as an integer; bulk strings holding digits are parsed.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(i) => Some(*i),
            Reply::Bulk(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn into_array(self) -> Result<Vec<Reply>, StorageError> {
        match self {
            Reply::Array(items) => Ok(items),
            other => Err(StorageError::Protocol(format!(
                "expected an array reply, got {other:?}"
            ))),
        }
    }
}
