// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Script generator.
//!
//! Each operation appends one block to a shared [`BuildContext`] and pushes
//! its variable inputs as positional parameters. Collection, field and key
//! names are literals in the script text, so one script exists per operation
//! shape and is reused across values. Every block either assigns the result
//! tuple `ret` or aborts with an error tuple, which ends the whole script and
//! with it any batch it belongs to. A script holding more than one operation
//! is journaled, so an abort also undoes the writes of the operations before
//! it. Only id counters stay advanced.
//!
//! Errors the schema can reveal (unknown collection or index, missing fields,
//! values of the wrong kind) are recorded in the context instead. The first
//! one sticks; later operations are skipped and nothing is dispatched.

use std::collections::BTreeSet;

use rigid_script::{Command, Expr, Program, Stmt};

use crate::codec::{self, FieldValue, Record};
use crate::error::{ErrorCode, Method, OperationError, NO_ERROR};
use crate::planner;
use crate::schema::{Collection, Schema};

/// Accumulating state of one script: body, parameters and the first
/// build-time error.
#[derive(Debug)]
pub struct BuildContext<'a> {
    prefix: &'a str,
    schema: &'a Schema,
    body: Vec<Stmt>,
    params: Vec<String>,
    error: Option<OperationError>,
    ops: usize,
}

impl<'a> BuildContext<'a> {
    pub fn new(prefix: &'a str, schema: &'a Schema) -> Self {
        Self {
            prefix,
            schema,
            body: Vec::new(),
            params: Vec::new(),
            error: None,
            ops: 0,
        }
    }

    /// Push a positional parameter and return the expression reading it.
    fn param(&mut self, value: impl Into<String>) -> Expr {
        self.params.push(value.into());
        Expr::Param(self.params.len())
    }

    fn fail(&mut self, error: OperationError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn error(&self) -> Option<&OperationError> {
        self.error.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.ops == 0
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// The full program: result initialisation, one block per operation,
    /// and the final return. Journaled when it holds more than one
    /// operation. `None` if a build-time error was recorded.
    pub fn program(&self) -> Option<Program> {
        if self.error.is_some() {
            return None;
        }
        let mut body = Vec::with_capacity(self.body.len() + 2);
        body.push(Stmt::local(
            "ret",
            Expr::Table(vec![Expr::str(Method::None.as_str()), Expr::str(NO_ERROR)]),
        ));
        body.extend(self.body.iter().cloned());
        body.push(Stmt::Return(Expr::var("ret")));
        if self.ops > 1 {
            Some(Program::journaled(body))
        } else {
            Some(Program::new(body))
        }
    }

    /// Consume the context. `Ok(None)` when no operation was added.
    pub fn finish(mut self) -> Result<Option<(Program, Vec<String>)>, OperationError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if self.is_empty() {
            return Ok(None);
        }
        let program = self.program();
        Ok(program.map(|program| (program, self.params)))
    }

    /// Start an operation; `None` means it must be skipped.
    fn begin(&mut self, method: Method, collection: &str) -> Option<&'a Collection> {
        if self.error.is_some() {
            return None;
        }
        match self.schema.collection(collection) {
            Some(found) => Some(found),
            None => {
                self.fail(
                    OperationError::new(method, ErrorCode::UnknownCollection)
                        .with_reason(format!("Unknown collection: '{collection}'")),
                );
                None
            }
        }
    }

    fn emit(&mut self, block: Vec<Stmt>) {
        self.body.push(Stmt::Block(block));
        self.ops += 1;
    }

    fn record_key(&self, collection: &str, id: Expr) -> Expr {
        Expr::concat(vec![Expr::str(format!("{}:{collection}:", self.prefix)), id])
    }

    fn ids_key(&self, collection: &str) -> Expr {
        Expr::str(format!("{}:{collection}:ids", self.prefix))
    }

    /// Encode the declared fields of `attrs`, dropping undeclared ones.
    fn encode(
        &mut self,
        method: Method,
        collection: &Collection,
        attrs: &Record,
    ) -> Option<Vec<(String, String)>> {
        let mut encoded = Vec::with_capacity(attrs.len());
        for (name, value) in attrs {
            let Some(field) = collection.field(name) else {
                continue;
            };
            match codec::encode(field, value) {
                Ok(text) => encoded.push((name.clone(), text)),
                Err(code) => {
                    self.fail(
                        OperationError::new(method, code)
                            .with_reason(format!("Field '{name}' rejected ({code})")),
                    );
                    return None;
                }
            }
        }
        Some(encoded)
    }

    fn tuple(method: Method, code: &str, payload: Vec<Expr>) -> Expr {
        let mut items = vec![Expr::str(method.as_str()), Expr::str(code)];
        items.extend(payload);
        Expr::Table(items)
    }

    fn fail_if_missing(method: Method, key: Expr) -> Stmt {
        Stmt::when(
            Expr::call(Command::Exists, vec![key]).equals(Expr::Int(0)),
            vec![Stmt::Abort(Self::tuple(
                method,
                ErrorCode::NotFound.as_str(),
                vec![],
            ))],
        )
    }

    /// Return the collected `conflicts` as a `notUnique` error if any.
    fn abort_on_conflicts(method: Method) -> Stmt {
        Stmt::when(
            Expr::var("conflicts").length().greater_than(Expr::Int(0)),
            vec![Stmt::Abort(Self::tuple(
                method,
                ErrorCode::NotUnique.as_str(),
                vec![Expr::var("conflicts")],
            ))],
        )
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    pub fn create(&mut self, collection: &str, attrs: &Record) {
        let method = Method::Create;
        let Some(coll) = self.begin(method, collection) else {
            return;
        };
        let Some(encoded) = self.encode(method, coll, attrs) else {
            return;
        };
        if let Some(missing) = coll
            .definition
            .keys()
            .find(|name| !encoded.iter().any(|(n, _)| n == *name))
        {
            self.fail(
                OperationError::new(method, ErrorCode::BadParameter)
                    .with_reason(format!("Missing field: '{missing}'")),
            );
            return;
        }

        let mut block = vec![
            Stmt::local(
                "id",
                Expr::call(
                    Command::Incr,
                    vec![Expr::str(next_id_key(self.prefix, collection))],
                ),
            ),
            Stmt::local("rec", Expr::Table(vec![])),
        ];
        let mut hset = vec![self.record_key(collection, Expr::var("id"))];
        for (name, text) in encoded {
            let value = self.param(text);
            block.push(Stmt::set_field("rec", &name, value));
            hset.push(Expr::str(&name));
            hset.push(Expr::field("rec", &name));
        }

        block.push(Stmt::local("conflicts", Expr::Table(vec![])));
        for (name, index) in coll.indices.iter().filter(|(_, i)| i.unique) {
            let key = planner::index_key(self.prefix, collection, index);
            block.push(planner::check_unique(name, &key, index, "rec", None));
        }
        block.push(Self::abort_on_conflicts(method));

        block.push(Stmt::call(Command::HSet, hset));
        for index in coll.indices.values() {
            let key = planner::index_key(self.prefix, collection, index);
            block.push(planner::add_entry(&key, index, "rec", Expr::var("id")));
        }
        block.push(Stmt::call(
            Command::ZAdd,
            vec![self.ids_key(collection), Expr::var("id"), Expr::var("id")],
        ));
        block.push(Stmt::assign(
            "ret",
            Self::tuple(method, NO_ERROR, vec![Expr::var("id")]),
        ));
        self.emit(block);
    }

    pub fn update(&mut self, collection: &str, id: i64, attrs: &Record) {
        let method = Method::Update;
        let Some(coll) = self.begin(method, collection) else {
            return;
        };
        let Some(encoded) = self.encode(method, coll, attrs) else {
            return;
        };
        if encoded.is_empty() {
            self.fail(
                OperationError::new(method, ErrorCode::BadParameter)
                    .with_reason("No declared field to update"),
            );
            return;
        }

        let id = self.param(id.to_string());
        let mut block = vec![
            Stmt::local("key", self.record_key(collection, id.clone())),
            Self::fail_if_missing(method, Expr::var("key")),
            Stmt::local(
                "old",
                Expr::call(Command::HGetAll, vec![Expr::var("key")]).to_map(),
            ),
            Stmt::local(
                "new",
                Expr::call(Command::HGetAll, vec![Expr::var("key")]).to_map(),
            ),
        ];
        let mut hset = vec![Expr::var("key")];
        for (name, text) in &encoded {
            let value = self.param(text.as_str());
            block.push(Stmt::set_field("new", name, value));
            hset.push(Expr::str(name));
            hset.push(Expr::field("new", name));
        }

        let changed: BTreeSet<&str> = encoded.iter().map(|(n, _)| n.as_str()).collect();
        let touched: Vec<_> = coll
            .indices
            .iter()
            .filter(|(_, index)| index.touches(&changed))
            .collect();

        block.push(Stmt::local("conflicts", Expr::Table(vec![])));
        for (name, index) in touched.iter().filter(|(_, i)| i.unique) {
            let key = planner::index_key(self.prefix, collection, index);
            block.push(planner::check_unique(name, &key, index, "new", Some(id.clone())));
        }
        block.push(Self::abort_on_conflicts(method));

        for (_, index) in &touched {
            let key = planner::index_key(self.prefix, collection, index);
            block.push(planner::remove_entry(&key, index, "old", id.clone()));
        }
        for (_, index) in &touched {
            let key = planner::index_key(self.prefix, collection, index);
            block.push(planner::add_entry(&key, index, "new", id.clone()));
        }
        block.push(Stmt::call(Command::HSet, hset));
        block.push(Stmt::assign(
            "ret",
            Self::tuple(method, NO_ERROR, vec![Expr::Int(1)]),
        ));
        self.emit(block);
    }

    pub fn delete(&mut self, collection: &str, id: i64) {
        let method = Method::Delete;
        let Some(coll) = self.begin(method, collection) else {
            return;
        };
        let id = self.param(id.to_string());
        let mut block = vec![
            Stmt::local("key", self.record_key(collection, id.clone())),
            Self::fail_if_missing(method, Expr::var("key")),
            Stmt::local(
                "old",
                Expr::call(Command::HGetAll, vec![Expr::var("key")]).to_map(),
            ),
        ];
        for index in coll.indices.values() {
            let key = planner::index_key(self.prefix, collection, index);
            block.push(planner::remove_entry(&key, index, "old", id.clone()));
        }
        block.push(Stmt::call(
            Command::ZRem,
            vec![self.ids_key(collection), id],
        ));
        block.push(Stmt::call(Command::Del, vec![Expr::var("key")]));
        block.push(Stmt::assign("ret", Self::tuple(method, NO_ERROR, vec![])));
        self.emit(block);
    }

    pub fn get(&mut self, collection: &str, id: i64) {
        let method = Method::Get;
        if self.begin(method, collection).is_none() {
            return;
        }
        let id = self.param(id.to_string());
        let block = vec![
            Stmt::local("key", self.record_key(collection, id)),
            Self::fail_if_missing(method, Expr::var("key")),
            Stmt::assign(
                "ret",
                Self::tuple(
                    method,
                    NO_ERROR,
                    vec![
                        Expr::call(Command::HGetAll, vec![Expr::var("key")]),
                        Expr::str(collection),
                    ],
                ),
            ),
        ];
        self.emit(block);
    }

    /// An absent record ends the script with `0` and cancels the whole
    /// batch.
    pub fn exists(&mut self, collection: &str, id: i64) {
        let method = Method::Exists;
        if self.begin(method, collection).is_none() {
            return;
        }
        let id = self.param(id.to_string());
        let block = vec![
            Stmt::when(
                Expr::call(Command::Exists, vec![self.record_key(collection, id)])
                    .equals(Expr::Int(0)),
                vec![Stmt::Abort(Self::tuple(method, NO_ERROR, vec![Expr::Int(0)]))],
            ),
            Stmt::assign("ret", Self::tuple(method, NO_ERROR, vec![Expr::Int(1)])),
        ];
        self.emit(block);
    }

    pub fn list(&mut self, collection: &str) {
        let method = Method::List;
        if self.begin(method, collection).is_none() {
            return;
        }
        let range = Expr::call(
            Command::ZRange,
            vec![self.ids_key(collection), Expr::Int(0), Expr::Int(-1)],
        );
        self.emit(vec![Stmt::assign(
            "ret",
            Self::tuple(method, NO_ERROR, vec![range]),
        )]);
    }

    pub fn size(&mut self, collection: &str) {
        let method = Method::Size;
        if self.begin(method, collection).is_none() {
            return;
        }
        let card = Expr::call(Command::ZCard, vec![self.ids_key(collection)]);
        self.emit(vec![Stmt::assign(
            "ret",
            Self::tuple(method, NO_ERROR, vec![card]),
        )]);
    }

    /// Ids whose values equal `attrs` on the index declared over exactly
    /// those fields. `method` is [`Method::Find`] or [`Method::FindAll`].
    pub fn find(&mut self, method: Method, collection: &str, attrs: &Record) {
        let Some(coll) = self.begin(method, collection) else {
            return;
        };
        let names: BTreeSet<&str> = attrs.keys().map(String::as_str).collect();
        let Some((_, index)) = coll.index_for(&names) else {
            let wanted: Vec<&str> = names.into_iter().collect();
            self.fail(
                OperationError::new(method, ErrorCode::UnknownIndex)
                    .with_reason(format!("No index over: '{}'", wanted.join(", "))),
            );
            return;
        };
        let Some(encoded) = self.encode(method, coll, attrs) else {
            return;
        };

        let mut block = vec![Stmt::local("probe", Expr::Table(vec![]))];
        for (name, text) in encoded {
            let value = self.param(text);
            block.push(Stmt::set_field("probe", &name, value));
        }
        block.push(Stmt::local("ids", Expr::Table(vec![])));
        let key = planner::index_key(self.prefix, collection, index);
        block.push(Stmt::Block(planner::lookup(&key, index, "probe")));
        block.push(Stmt::assign(
            "ret",
            Self::tuple(method, NO_ERROR, vec![Expr::var("ids")]),
        ));
        self.emit(block);
    }
}

/// Schema write. Parameters: schema text, revision, and `1` to replace
/// whatever is stored (used when the stored schema is unreadable) or `0` to
/// accept only an identical schema and revision.
pub fn set_schema_program(prefix: &str) -> Program {
    let method = Method::SetSchema;
    let schema_key = Expr::str(schema_key(prefix));
    let revision_key = Expr::str(revision_key(prefix));
    let ok = Stmt::assign("ret", BuildContext::tuple(method, NO_ERROR, vec![]));

    Program::new(vec![
        Stmt::local(
            "ret",
            Expr::Table(vec![Expr::str(Method::None.as_str()), Expr::str(NO_ERROR)]),
        ),
        Stmt::Block(vec![
            Stmt::local("current", Expr::call(Command::Get, vec![schema_key.clone()])),
            Stmt::if_else(
                Expr::And(vec![
                    Expr::var("current"),
                    Expr::Param(3).equals(Expr::str("0")),
                ]),
                vec![Stmt::if_else(
                    Expr::And(vec![
                        Expr::var("current").equals(Expr::Param(1)),
                        Expr::call(Command::Get, vec![revision_key.clone()])
                            .equals(Expr::Param(2)),
                    ]),
                    vec![ok.clone()],
                    vec![Stmt::Return(BuildContext::tuple(
                        method,
                        ErrorCode::SchemaExists.as_str(),
                        vec![],
                    ))],
                )],
                vec![
                    Stmt::call(Command::Set, vec![schema_key, Expr::Param(1)]),
                    Stmt::call(Command::Set, vec![revision_key, Expr::Param(2)]),
                    ok,
                ],
            ),
        ]),
        Stmt::Return(Expr::var("ret")),
    ])
}

/// Key holding the serialized schema.
pub fn schema_key(prefix: &str) -> String {
    format!("{prefix}:_schema")
}

/// Key holding the schema revision.
pub fn revision_key(prefix: &str) -> String {
    format!("{prefix}:_schemaRevision")
}

/// Key holding the last id handed out in `collection`.
pub fn next_id_key(prefix: &str, collection: &str) -> String {
    format!("{prefix}:{collection}:nextid")
}

/// Convenience for building a record from pairs.
pub fn record<K: Into<String>, V: Into<FieldValue>>(pairs: impl IntoIterator<Item = (K, V)>) -> Record {
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigid_script::lua;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::parse(&json!({
            "car": {
                "definition": {
                    "color": "string",
                    "mileage": { "type": "int", "allowNull": true }
                },
                "indices": {
                    "u": { "unique": true, "fields": ["color", "mileage"] },
                    "c": { "unique": false, "fields": [{ "name": "color", "caseInsensitive": true }] }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_create_params_and_shape() {
        let schema = schema();
        let mut ctx = BuildContext::new("foo", &schema);
        ctx.create("car", &record([("color", FieldValue::from("blue")), ("mileage", 5.into())]));
        assert!(ctx.error().is_none());
        assert_eq!(ctx.params(), ["blue", "5"]);

        let text = lua::render(&ctx.program().unwrap());
        assert!(text.contains("local id = redis.call('INCR', 'foo:car:nextid')"));
        assert!(text.contains("rec['color'] = ARGV[1]"));
        assert!(text.contains("redis.call('ZADD', 'foo:car:ids', id, id)"));
        assert!(text.contains("'foo:car:i:color:mileage'"));
        assert!(text.contains("return {'create', 'notUnique', conflicts}"));
    }

    #[test]
    fn test_only_batches_are_journaled() {
        let schema = schema();
        let mut single = BuildContext::new("foo", &schema);
        single.delete("car", 1);
        assert!(!single.program().unwrap().journal);

        let mut batch = BuildContext::new("foo", &schema);
        batch.create("car", &record([("color", FieldValue::from("red")), ("mileage", 1.into())]));
        batch.delete("car", 9);
        let program = batch.program().unwrap();
        assert!(program.journal);
        let text = lua::render(&program);
        assert!(text.contains("write('HSET', ('foo:car:' .. id)"));
        assert!(text.contains("redis.call('INCR', 'foo:car:nextid')"));
        assert!(text.contains("local aborted = {'delete', 'notFound'}"));
    }

    #[test]
    fn test_same_shape_same_script() {
        let schema = schema();
        let mut a = BuildContext::new("foo", &schema);
        a.get("car", 1);
        let mut b = BuildContext::new("foo", &schema);
        b.get("car", 99);
        assert_eq!(a.program(), b.program());
        assert_ne!(a.params(), b.params());
    }

    #[test]
    fn test_missing_field_is_bad_parameter() {
        let schema = schema();
        let mut ctx = BuildContext::new("foo", &schema);
        ctx.create("car", &record([("color", "blue")]));
        let err = ctx.error().unwrap();
        assert_eq!(err.code, ErrorCode::BadParameter);
        assert!(ctx.program().is_none());
    }

    #[test]
    fn test_undeclared_fields_are_dropped() {
        let schema = schema();
        let mut ctx = BuildContext::new("foo", &schema);
        ctx.create(
            "car",
            &record([
                ("color", FieldValue::from("blue")),
                ("mileage", 5.into()),
                ("wheels", 4.into()),
            ]),
        );
        assert!(ctx.error().is_none());
        assert_eq!(ctx.params().len(), 2);
    }

    #[test]
    fn test_first_error_sticks_and_skips_the_rest() {
        let schema = schema();
        let mut ctx = BuildContext::new("foo", &schema);
        ctx.get("car", 1);
        ctx.get("boat", 1);
        ctx.update("car", 1, &record([("mileage", "lots")]));
        let err = ctx.error().unwrap();
        assert_eq!(err.method, Method::Get);
        assert_eq!(err.code, ErrorCode::UnknownCollection);
        assert_eq!(ctx.params(), ["1"]);
    }

    #[test]
    fn test_find_requires_exact_index() {
        let schema = schema();
        let mut ctx = BuildContext::new("foo", &schema);
        ctx.find(Method::Find, "car", &record([("mileage", 5)]));
        assert_eq!(ctx.error().unwrap().code, ErrorCode::UnknownIndex);

        let mut ctx = BuildContext::new("foo", &schema);
        ctx.find(Method::FindAll, "car", &record([("color", "Blue")]));
        assert!(ctx.error().is_none());
        let text = lua::render(&ctx.program().unwrap());
        assert!(text.contains("string.lower(probe['color'])"));
        assert!(text.contains("'foo:car:i:color'"));
    }

    #[test]
    fn test_update_only_touches_affected_indices() {
        let schema = schema();
        let mut ctx = BuildContext::new("foo", &schema);
        ctx.update("car", 3, &record([("mileage", 7)]));
        let text = lua::render(&ctx.program().unwrap());
        assert!(text.contains("'foo:car:i:color:mileage'"));
        assert!(!text.contains("'foo:car:i:color'"));
        assert_eq!(ctx.params(), ["3", "7"]);
    }

    #[test]
    fn test_update_with_nothing_declared_fails() {
        let schema = schema();
        let mut ctx = BuildContext::new("foo", &schema);
        ctx.update("car", 3, &record([("wheels", 4)]));
        assert_eq!(ctx.error().unwrap().code, ErrorCode::BadParameter);
    }

    #[test]
    fn test_null_not_allowed_at_build_time() {
        let schema = schema();
        let mut ctx = BuildContext::new("foo", &schema);
        ctx.create(
            "car",
            &record([("color", FieldValue::Null), ("mileage", FieldValue::Null)]),
        );
        let err = ctx.error().unwrap();
        assert_eq!(err.code, ErrorCode::NullNotAllowed);
        assert!(err.reason.as_deref().unwrap().contains("color"));
    }
}
