// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//! JSON conversions for the command line: records in, results and errors out,
//! and batch files.

use anyhow::{anyhow, bail, Context, Result};
use rigid_core::{Batch, FieldValue, OpValue, OperationError, Record};
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Parse a JSON object of field values.
pub fn record_from_json(text: &str) -> Result<Record> {
    let value: Value = serde_json::from_str(text).context("attributes are not valid JSON")?;
    record_from_value(&value)
}

fn record_from_value(value: &Value) -> Result<Record> {
    let Value::Object(fields) = value else {
        bail!("attributes must be a JSON object");
    };
    fields
        .iter()
        .map(|(name, v)| {
            FieldValue::from_json(v)
                .map(|fv| (name.clone(), fv))
                .map_err(|code| anyhow!("field '{name}': {code}"))
        })
        .collect()
}

pub fn record_to_json(record: &Record) -> Value {
    Value::Object(
        record
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<Map<_, _>>(),
    )
}

/// `{"val": ...}` for a resolved operation.
pub fn value_to_json(value: &OpValue) -> Value {
    let val = match value {
        OpValue::Done | OpValue::Updated | OpValue::Deleted => Value::Bool(true),
        OpValue::Created(id) => json!(id),
        OpValue::Record(record) => record_to_json(record),
        OpValue::Exists(found) => Value::Bool(*found),
        OpValue::Ids(ids) => json!(ids),
        OpValue::Size(size) => json!(size),
    };
    json!({ "val": val })
}

/// `{"err": code, "method": method, ...}` for a rejected operation.
pub fn error_to_json(error: &OperationError) -> Value {
    let mut out = json!({
        "err": error.code.as_str(),
        "method": error.method.as_str(),
    });
    if !error.indices.is_empty() {
        out["indices"] = json!(error.indices);
    }
    if let Some(reason) = &error.reason {
        out["reason"] = json!(reason);
    }
    out
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum RawOp {
    Create { collection: String, attrs: Value },
    Update { collection: String, id: i64, attrs: Value },
    Delete { collection: String, id: i64 },
    Get { collection: String, id: i64 },
    Exists { collection: String, id: i64 },
    List { collection: String },
    Size { collection: String },
    Find { collection: String, attrs: Value },
    FindAll { collection: String, attrs: Value },
}

/// One operation of a batch file, attributes already converted.
#[derive(Debug, PartialEq)]
pub enum BatchOp {
    Create(String, Record),
    Update(String, i64, Record),
    Delete(String, i64),
    Get(String, i64),
    Exists(String, i64),
    List(String),
    Size(String),
    Find(String, Record),
    FindAll(String, Record),
}

impl TryFrom<RawOp> for BatchOp {
    type Error = anyhow::Error;

    fn try_from(op: RawOp) -> Result<Self> {
        Ok(match op {
            RawOp::Create { collection, attrs } => {
                BatchOp::Create(collection, record_from_value(&attrs)?)
            }
            RawOp::Update {
                collection,
                id,
                attrs,
            } => BatchOp::Update(collection, id, record_from_value(&attrs)?),
            RawOp::Delete { collection, id } => BatchOp::Delete(collection, id),
            RawOp::Get { collection, id } => BatchOp::Get(collection, id),
            RawOp::Exists { collection, id } => BatchOp::Exists(collection, id),
            RawOp::List { collection } => BatchOp::List(collection),
            RawOp::Size { collection } => BatchOp::Size(collection),
            RawOp::Find { collection, attrs } => {
                BatchOp::Find(collection, record_from_value(&attrs)?)
            }
            RawOp::FindAll { collection, attrs } => {
                BatchOp::FindAll(collection, record_from_value(&attrs)?)
            }
        })
    }
}

/// Parse a batch file: a JSON array of `{"op": ..., "collection": ...}`
/// objects.
pub fn batch_from_json(text: &str) -> Result<Vec<BatchOp>> {
    let raw: Vec<RawOp> = serde_json::from_str(text).context("invalid batch file")?;
    raw.into_iter()
        .enumerate()
        .map(|(i, op)| BatchOp::try_from(op).with_context(|| format!("batch entry {i}")))
        .collect()
}

/// Append `ops` to `batch`.
pub fn apply(batch: &mut Batch<'_, '_>, ops: &[BatchOp]) {
    for op in ops {
        match op {
            BatchOp::Create(c, attrs) => batch.create(c, attrs),
            BatchOp::Update(c, id, attrs) => batch.update(c, *id, attrs),
            BatchOp::Delete(c, id) => batch.delete(c, *id),
            BatchOp::Get(c, id) => batch.get(c, *id),
            BatchOp::Exists(c, id) => batch.exists(c, *id),
            BatchOp::List(c) => batch.list(c),
            BatchOp::Size(c) => batch.size(c),
            BatchOp::Find(c, attrs) => batch.find(c, attrs),
            BatchOp::FindAll(c, attrs) => batch.find_all(c, attrs),
        };
    }
}
