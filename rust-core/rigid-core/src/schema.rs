// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Schema normalizer and validator.
//!
//! Caller-supplied schemas arrive as loosely structured JSON. [`Schema::parse`]
//! checks them in a fixed order, expands the shorthand forms and produces the
//! closed [`Schema`] type that the rest of the crate consumes. The input value
//! is only ever borrowed.
//!
//! Accepted input:
//!
//! ```json
//! {
//!   "car": {
//!     "definition": {
//!       "color": "string",
//!       "mileage": { "type": "int", "allowNull": true }
//!     },
//!     "indices": {
//!       "u": { "unique": true, "fields": ["color", { "name": "mileage" }] }
//!     }
//!   }
//! }
//! ```
//!
//! The serialized form of a [`Schema`] is itself valid input and is
//! deterministic, so identical schemas persist as identical text.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The value kinds a field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
    Boolean,
    Date,
    Timestamp,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::Timestamp => "timestamp",
        }
    }

    pub fn parse(name: &str) -> Option<FieldKind> {
        match name {
            "string" => Some(FieldKind::String),
            "int" => Some(FieldKind::Int),
            "boolean" => Some(FieldKind::Boolean),
            "date" => Some(FieldKind::Date),
            "timestamp" => Some(FieldKind::Timestamp),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldType {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub allow_null: bool,
    /// Carried through unchanged; nothing downstream interprets it.
    pub allow_multi: bool,
}

impl FieldType {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            allow_null: false,
            allow_multi: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.allow_null = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexField {
    pub name: String,
    pub case_insensitive: bool,
}

/// A secondary index. `fields` is kept sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Index {
    pub unique: bool,
    pub fields: Vec<IndexField>,
}

impl Index {
    /// Participating field names, sorted.
    pub fn field_names(&self) -> BTreeSet<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// True if any participating field is in `changed`.
    pub fn touches(&self, changed: &BTreeSet<&str>) -> bool {
        self.fields.iter().any(|f| changed.contains(f.name.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub definition: BTreeMap<String, FieldType>,
    pub indices: BTreeMap<String, Index>,
}

impl Collection {
    pub fn field(&self, name: &str) -> Option<&FieldType> {
        self.definition.get(name)
    }

    /// The index whose field set equals `names`, regardless of order.
    pub fn index_for(&self, names: &BTreeSet<&str>) -> Option<(&str, &Index)> {
        self.indices
            .iter()
            .find(|(_, index)| index.field_names() == *names)
            .map(|(name, index)| (name.as_str(), index))
    }
}

/// A normalized schema: collection name to collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Schema {
    pub collections: BTreeMap<String, Collection>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// True if `name` is a legal collection, field, index or prefix name.
pub fn is_valid_name(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

impl Schema {
    /// Validate and normalize `input`. The first failure found is returned
    /// as a human-readable reason.
    pub fn parse(input: &Value) -> Result<Schema, String> {
        let collections = input
            .as_object()
            .ok_or_else(|| "Invalid schema.".to_string())?;
        if collections.is_empty() {
            return Err("At least one collection must be defined.".to_string());
        }

        let mut out = BTreeMap::new();
        for (name, body) in collections {
            if !is_valid_name(name) {
                return Err(format!("Invalid collection name: '{name}'"));
            }
            out.insert(name.clone(), parse_collection(body)?);
        }
        Ok(Schema { collections: out })
    }

    /// Parse persisted schema text.
    pub fn from_text(text: &str) -> Result<Schema, String> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| format!("Invalid schema text: {e}"))?;
        Schema::parse(&value)
    }

    /// Deterministic serialized form, as persisted.
    pub fn to_text(&self) -> String {
        // Maps with string keys and plain values always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }
}

fn parse_collection(body: &Value) -> Result<Collection, String> {
    let definition = body
        .get("definition")
        .and_then(Value::as_object)
        .filter(|fields| !fields.is_empty())
        .ok_or_else(|| "Definition missing.".to_string())?;

    let mut fields = BTreeMap::new();
    for (name, decl) in definition {
        if !is_valid_name(name) {
            return Err(format!("Invalid field name: '{name}'"));
        }
        fields.insert(name.clone(), parse_field(name, decl)?);
    }

    let mut indices = BTreeMap::new();
    match body.get("indices") {
        None | Some(Value::Null) => {}
        Some(Value::Object(declared)) => {
            for (name, decl) in declared {
                if !is_valid_name(name) {
                    return Err(format!("Invalid index name: '{name}'"));
                }
                indices.insert(name.clone(), parse_index(decl, &fields)?);
            }
        }
        Some(_) => return Err("Invalid indices definition.".to_string()),
    }

    let mut seen: BTreeMap<BTreeSet<&str>, &str> = BTreeMap::new();
    for (name, index) in &indices {
        if seen.insert(index.field_names(), name.as_str()).is_some() {
            return Err(format!("Duplicate index fields: '{name}'"));
        }
    }

    Ok(Collection {
        definition: fields,
        indices,
    })
}

fn flag(decl: &Map<String, Value>, key: &str, field: &str) -> Result<bool, String> {
    match decl.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(format!("Invalid '{key}' for field: '{field}'")),
    }
}

fn parse_field(name: &str, decl: &Value) -> Result<FieldType, String> {
    let (kind_name, options) = match decl {
        Value::String(kind) => (kind.as_str(), None),
        Value::Object(map) => match map.get("type").and_then(Value::as_str) {
            Some(kind) => (kind, Some(map)),
            None => return Err("Type definition missing.".to_string()),
        },
        _ => return Err("Type definition missing.".to_string()),
    };

    let kind =
        FieldKind::parse(kind_name).ok_or_else(|| format!("Invalid type: '{kind_name}'"))?;
    let mut field = FieldType::new(kind);
    if let Some(options) = options {
        field.allow_null = flag(options, "allowNull", name)?;
        field.allow_multi = flag(options, "allowMulti", name)?;
    }
    Ok(field)
}

fn parse_index(decl: &Value, fields: &BTreeMap<String, FieldType>) -> Result<Index, String> {
    let unique = decl
        .get("unique")
        .and_then(Value::as_bool)
        .ok_or_else(|| "Invalid or missing index unique definition".to_string())?;

    let declared = decl
        .get("fields")
        .and_then(Value::as_array)
        .filter(|list| !list.is_empty())
        .ok_or_else(|| "Invalid or missing index fields definition".to_string())?;

    let mut out: Vec<IndexField> = Vec::with_capacity(declared.len());
    for entry in declared {
        let field = match entry {
            Value::String(name) => IndexField {
                name: name.clone(),
                case_insensitive: false,
            },
            Value::Object(map) => {
                if let Some(unknown) = map
                    .keys()
                    .find(|key| *key != "name" && *key != "caseInsensitive")
                {
                    return Err(format!("Unknown index field property: '{unknown}'"));
                }
                let name = map
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "Index field name missing.".to_string())?;
                let case_insensitive = match map.get("caseInsensitive") {
                    None => false,
                    Some(Value::Bool(b)) => *b,
                    Some(_) => {
                        return Err(format!("Invalid 'caseInsensitive' for index field: '{name}'"))
                    }
                };
                IndexField {
                    name: name.to_string(),
                    case_insensitive,
                }
            }
            other => return Err(format!("Invalid index field: '{other}'")),
        };

        if !fields.contains_key(&field.name) {
            return Err(format!("Invalid index field: '{}'", field.name));
        }
        if out.iter().any(|f| f.name == field.name) {
            return Err(format!("Duplicate index field: '{}'", field.name));
        }
        out.push(field);
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Index { unique, fields: out })
}
