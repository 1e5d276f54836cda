// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Decoding of script result tuples.

use rigid_storage::Reply;

use crate::codec::{self, Record};
use crate::error::{ErrorCode, Method, OperationError, RigidError, NO_ERROR};
use crate::schema::Schema;

/// The value an operation resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum OpValue {
    /// A batch that ran no operation, or a schema write.
    Done,
    Created(i64),
    Updated,
    Deleted,
    Record(Record),
    Exists(bool),
    /// Ids from `list`, `find` or `findAll`, in ascending order.
    Ids(Vec<i64>),
    Size(u64),
}

fn protocol(message: impl Into<String>) -> RigidError {
    RigidError::Protocol(message.into())
}

fn text(reply: &Reply, what: &str) -> Result<String, RigidError> {
    reply
        .as_text()
        .ok_or_else(|| protocol(format!("expected {what}, got {reply:?}")))
}

fn int(reply: Option<&Reply>, what: &str) -> Result<i64, RigidError> {
    reply
        .and_then(Reply::as_int)
        .ok_or_else(|| protocol(format!("expected integer {what}, got {reply:?}")))
}

fn texts(reply: Option<Reply>, what: &str) -> Result<Vec<String>, RigidError> {
    let items = reply
        .ok_or_else(|| protocol(format!("missing {what}")))?
        .into_array()
        .map_err(|e| protocol(e.to_string()))?;
    items.iter().map(|item| text(item, what)).collect()
}

fn ids(reply: Option<Reply>) -> Result<Vec<i64>, RigidError> {
    texts(reply, "id list")?
        .into_iter()
        .map(|id| {
            id.parse()
                .map_err(|_| protocol(format!("'{id}' is not an id")))
        })
        .collect()
}

/// Decode `(method, errorCode, ...payload)`.
pub fn decode_reply(schema: &Schema, reply: Reply) -> Result<OpValue, RigidError> {
    let mut items = reply
        .into_array()
        .map_err(|e| protocol(e.to_string()))?
        .into_iter();
    let method_tag = text(&items.next().unwrap_or(Reply::Nil), "method tag")?;
    let code_tag = text(&items.next().unwrap_or(Reply::Nil), "error tag")?;
    let method = Method::from_wire(&method_tag)
        .ok_or_else(|| protocol(format!("unknown method tag '{method_tag}'")))?;

    if code_tag != NO_ERROR {
        let code = ErrorCode::from_wire(&code_tag)
            .ok_or_else(|| protocol(format!("unknown error tag '{code_tag}'")))?;
        let mut error = OperationError::new(method, code);
        if code == ErrorCode::NotUnique {
            error = error.with_indices(texts(items.next(), "index list")?);
        }
        return Err(error.into());
    }

    let payload = items.next();
    let value = match method {
        Method::None | Method::SetSchema => OpValue::Done,
        Method::Create => OpValue::Created(int(payload.as_ref(), "id")?),
        Method::Update => OpValue::Updated,
        Method::Delete => OpValue::Deleted,
        Method::Get => {
            let flat = texts(payload, "field list")?;
            let name = text(&items.next().unwrap_or(Reply::Nil), "collection name")?;
            let collection = schema
                .collection(&name)
                .ok_or_else(|| protocol(format!("unknown collection '{name}' in reply")))?;
            OpValue::Record(codec::decode_record(collection, &flat).map_err(RigidError::Protocol)?)
        }
        Method::Exists => OpValue::Exists(int(payload.as_ref(), "flag")? == 1),
        Method::List | Method::Find | Method::FindAll => OpValue::Ids(ids(payload)?),
        Method::Size => {
            let size = int(payload.as_ref(), "size")?;
            OpValue::Size(u64::try_from(size).map_err(|_| protocol("negative size"))?)
        }
        other => return Err(protocol(format!("'{other}' is not a script operation"))),
    };
    Ok(value)
}
