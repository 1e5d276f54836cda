// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! The public database handle.
//!
//! [`RigidDb`] ties the pieces together: it loads the persisted schema on
//! first use, builds one script per call (or per batch), runs it through the
//! [`Executor`] and decodes the result tuple.
//!
//! The schema is behind an async mutex. The first call to need it fetches it
//! from the store while later callers wait on the lock, so concurrent calls
//! issued before the load completes all see the same outcome. A missing
//! schema is fetched again on the next call; an unreadable one marks the
//! handle unusable until [`RigidDb::set_schema`] replaces it.

use std::sync::Arc;

use rigid_script::{content_hash, CompiledScript};
use rigid_storage::ScriptStore;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::batch::Batch;
use crate::codec::Record;
use crate::config::RigidConfig;
use crate::error::{ErrorCode, Method, OperationError, Result, RigidError};
use crate::executor::{Executor, ScriptCache};
use crate::generator::{self, BuildContext};
use crate::outcome::{decode_reply, OpValue};
use crate::schema::{is_valid_name, Schema};

/// A loaded schema and the revision it was stored with.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaInfo {
    pub schema: Schema,
    /// Absent when the schema was written without one.
    pub revision: Option<u64>,
}

#[derive(Debug)]
enum SchemaState {
    Unloaded,
    Loaded(Arc<SchemaInfo>),
    /// The stored schema could not be read; holds the reason.
    Bad(String),
}

/// Handle to the documents stored under one key prefix.
pub struct RigidDb {
    prefix: String,
    executor: Executor,
    schema: Mutex<SchemaState>,
}

impl std::fmt::Debug for RigidDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RigidDb")
            .field("prefix", &self.prefix)
            .field("store", &self.executor.store().name())
            .finish_non_exhaustive()
    }
}

fn unexpected(method: Method, value: OpValue) -> RigidError {
    RigidError::Protocol(format!("unexpected result for {method}: {value:?}"))
}

impl RigidDb {
    /// A handle with its own script cache, loading scripts before first use.
    pub fn new(store: Arc<dyn ScriptStore>, prefix: impl Into<String>) -> Result<Self> {
        Self::with_cache(store, prefix, Arc::new(ScriptCache::new()), true)
    }

    /// A handle sharing `cache` with other handles on the same store.
    pub fn with_cache(
        store: Arc<dyn ScriptStore>,
        prefix: impl Into<String>,
        cache: Arc<ScriptCache>,
        preload: bool,
    ) -> Result<Self> {
        let prefix = prefix.into();
        if !is_valid_name(&prefix) {
            return Err(RigidError::InvalidPrefix(prefix));
        }
        Ok(Self {
            prefix,
            executor: Executor::new(store, cache, preload),
            schema: Mutex::new(SchemaState::Unloaded),
        })
    }

    /// A handle over `store` using the prefix and preload setting of `config`.
    pub fn from_config(store: Arc<dyn ScriptStore>, config: &RigidConfig) -> Result<Self> {
        Self::with_cache(
            store,
            config.prefix.clone(),
            Arc::new(ScriptCache::new()),
            config.preload_scripts,
        )
    }

    /// Connect to the Redis server named by `config`.
    #[cfg(feature = "redis-backend")]
    pub async fn connect(config: &RigidConfig) -> Result<Self> {
        let store = rigid_storage::RedisBackend::connect(&config.redis_url).await?;
        Self::from_config(Arc::new(store), config)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn script_cache(&self) -> &Arc<ScriptCache> {
        self.executor.cache()
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    /// Fetch the stored schema into `state` unless already there.
    async fn load_locked(
        &self,
        state: &mut SchemaState,
        method: Method,
    ) -> Result<Arc<SchemaInfo>> {
        match state {
            SchemaState::Loaded(info) => return Ok(Arc::clone(info)),
            SchemaState::Bad(reason) => {
                return Err(OperationError::new(method, ErrorCode::BadSavedSchema)
                    .with_reason(reason.clone())
                    .into())
            }
            SchemaState::Unloaded => {}
        }

        let store = self.executor.store();
        let Some(text) = store.get(&generator::schema_key(&self.prefix)).await? else {
            debug!(prefix = %self.prefix, "no schema stored");
            return Err(OperationError::new(method, ErrorCode::SchemaMissing).into());
        };
        let revision = store.get(&generator::revision_key(&self.prefix)).await?;

        let parsed = Schema::from_text(&text).and_then(|schema| {
            let revision = revision
                .map(|r| {
                    r.parse::<u64>()
                        .map_err(|_| format!("Invalid schema revision: '{r}'"))
                })
                .transpose()?;
            Ok(SchemaInfo { schema, revision })
        });

        match parsed {
            Ok(info) => {
                info!(prefix = %self.prefix, revision = ?info.revision, "schema loaded");
                let info = Arc::new(info);
                *state = SchemaState::Loaded(Arc::clone(&info));
                Ok(info)
            }
            Err(reason) => {
                warn!(prefix = %self.prefix, %reason, "stored schema is unusable");
                *state = SchemaState::Bad(reason.clone());
                Err(OperationError::new(method, ErrorCode::BadSavedSchema)
                    .with_reason(reason)
                    .into())
            }
        }
    }

    async fn schema_for(&self, method: Method) -> Result<Arc<SchemaInfo>> {
        let mut state = self.schema.lock().await;
        self.load_locked(&mut state, method).await
    }

    /// Store `schema` under `revision`.
    ///
    /// The first schema written under a prefix wins. Writing the same schema
    /// and revision again succeeds; anything else fails with `schemaExists`,
    /// unless the stored schema is unreadable, in which case it is replaced.
    #[instrument(skip(self, schema), fields(prefix = %self.prefix))]
    pub async fn set_schema(&self, revision: u64, schema: &Value) -> Result<()> {
        let method = Method::SetSchema;
        if revision < 1 {
            return Err(RigidError::InvalidRevision(revision));
        }
        let schema = Schema::parse(schema).map_err(|reason| {
            OperationError::new(method, ErrorCode::InvalidSchema).with_reason(reason)
        })?;

        let mut state = self.schema.lock().await;
        if matches!(*state, SchemaState::Unloaded) {
            match self.load_locked(&mut state, method).await {
                Ok(_) => {}
                Err(e)
                    if matches!(
                        e.code(),
                        Some(ErrorCode::SchemaMissing | ErrorCode::BadSavedSchema)
                    ) => {}
                Err(e) => return Err(e),
            }
        }
        let overwrite = matches!(*state, SchemaState::Bad(_));

        let script = CompiledScript::new(generator::set_schema_program(&self.prefix));
        let params = vec![
            schema.to_text(),
            revision.to_string(),
            if overwrite { "1" } else { "0" }.to_string(),
        ];
        let reply = self.executor.run(&script, &params).await?;
        decode_reply(&schema, reply).map_err(|e| match e {
            RigidError::Operation(op) if op.code == ErrorCode::SchemaExists => {
                RigidError::Operation(op.with_reason("Schema already exists"))
            }
            other => other,
        })?;

        info!(revision, overwrite, "schema set");
        *state = SchemaState::Loaded(Arc::new(SchemaInfo {
            schema,
            revision: Some(revision),
        }));
        Ok(())
    }

    /// The stored schema and its revision.
    pub async fn get_schema(&self) -> Result<Arc<SchemaInfo>> {
        self.schema_for(Method::GetSchema).await
    }

    /// Lowercase hex SHA-1 of the stored schema text.
    pub async fn get_schema_hash(&self) -> Result<String> {
        let info = self.schema_for(Method::GetSchemaHash).await?;
        Ok(content_hash(&info.schema.to_text()))
    }

    /// The last id handed out in `collection`, `0` if none was.
    #[instrument(skip(self), fields(prefix = %self.prefix))]
    pub async fn current_id(&self, collection: &str) -> Result<i64> {
        let method = Method::CurrentId;
        let info = self.schema_for(method).await?;
        if info.schema.collection(collection).is_none() {
            return Err(OperationError::new(method, ErrorCode::UnknownCollection)
                .with_reason(format!("Unknown collection: '{collection}'"))
                .into());
        }
        let key = generator::next_id_key(&self.prefix, collection);
        match self.executor.store().get(&key).await? {
            None => Ok(0),
            Some(text) => text
                .parse()
                .map_err(|_| RigidError::Protocol(format!("'{text}' at {key} is not an id"))),
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Build a script with `build`, then run and decode it. Build-time errors
    /// and empty builds return without contacting the store.
    async fn execute<F>(&self, method: Method, build: F) -> Result<OpValue>
    where
        F: FnOnce(&mut BuildContext<'_>) + Send,
    {
        let info = self.schema_for(method).await?;
        let mut ctx = BuildContext::new(&self.prefix, &info.schema);
        build(&mut ctx);
        let (program, params) = match ctx.finish() {
            Ok(Some(built)) => built,
            Ok(None) => return Ok(OpValue::Done),
            Err(error) => {
                debug!(%error, "rejected before dispatch");
                return Err(error.into());
            }
        };

        let script = CompiledScript::new(program);
        let reply = self.executor.run(&script, &params).await?;
        decode_reply(&info.schema, reply)
    }

    /// Create a record and return its id.
    #[instrument(skip(self, attrs), fields(prefix = %self.prefix))]
    pub async fn create(&self, collection: &str, attrs: &Record) -> Result<i64> {
        let method = Method::Create;
        match self.execute(method, |ctx| ctx.create(collection, attrs)).await? {
            OpValue::Created(id) => {
                debug!(id, "created");
                Ok(id)
            }
            other => Err(unexpected(method, other)),
        }
    }

    /// Overwrite the given fields of record `id`.
    #[instrument(skip(self, attrs), fields(prefix = %self.prefix))]
    pub async fn update(&self, collection: &str, id: i64, attrs: &Record) -> Result<()> {
        let method = Method::Update;
        match self.execute(method, |ctx| ctx.update(collection, id, attrs)).await? {
            OpValue::Updated => Ok(()),
            other => Err(unexpected(method, other)),
        }
    }

    #[instrument(skip(self), fields(prefix = %self.prefix))]
    pub async fn delete(&self, collection: &str, id: i64) -> Result<()> {
        let method = Method::Delete;
        match self.execute(method, |ctx| ctx.delete(collection, id)).await? {
            OpValue::Deleted => Ok(()),
            other => Err(unexpected(method, other)),
        }
    }

    #[instrument(skip(self), fields(prefix = %self.prefix))]
    pub async fn get(&self, collection: &str, id: i64) -> Result<Record> {
        let method = Method::Get;
        match self.execute(method, |ctx| ctx.get(collection, id)).await? {
            OpValue::Record(record) => Ok(record),
            other => Err(unexpected(method, other)),
        }
    }

    pub async fn exists(&self, collection: &str, id: i64) -> Result<bool> {
        let method = Method::Exists;
        match self.execute(method, |ctx| ctx.exists(collection, id)).await? {
            OpValue::Exists(found) => Ok(found),
            other => Err(unexpected(method, other)),
        }
    }

    /// Ids in `collection`, ascending.
    pub async fn list(&self, collection: &str) -> Result<Vec<i64>> {
        let method = Method::List;
        match self.execute(method, |ctx| ctx.list(collection)).await? {
            OpValue::Ids(ids) => Ok(ids),
            other => Err(unexpected(method, other)),
        }
    }

    pub async fn size(&self, collection: &str) -> Result<u64> {
        let method = Method::Size;
        match self.execute(method, |ctx| ctx.size(collection)).await? {
            OpValue::Size(size) => Ok(size),
            other => Err(unexpected(method, other)),
        }
    }

    /// Ids of records whose values equal `attrs` on the index declared over
    /// exactly the fields of `attrs`.
    #[instrument(skip(self, attrs), fields(prefix = %self.prefix))]
    pub async fn find(&self, collection: &str, attrs: &Record) -> Result<Vec<i64>> {
        self.lookup(Method::Find, collection, attrs).await
    }

    /// Same lookup as [`RigidDb::find`], reported under `findAll`.
    #[instrument(skip(self, attrs), fields(prefix = %self.prefix))]
    pub async fn find_all(&self, collection: &str, attrs: &Record) -> Result<Vec<i64>> {
        self.lookup(Method::FindAll, collection, attrs).await
    }

    async fn lookup(&self, method: Method, collection: &str, attrs: &Record) -> Result<Vec<i64>> {
        match self.execute(method, |ctx| ctx.find(method, collection, attrs)).await? {
            OpValue::Ids(ids) => Ok(ids),
            other => Err(unexpected(method, other)),
        }
    }

    /// Run several operations as one atomic script.
    ///
    /// Resolves to the value of the last operation, or [`OpValue::Done`] when
    /// `build` adds none. An `exists` on an absent record stops the batch
    /// and resolves to `Exists(false)`.
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use rigid_core::{record, OpValue, RigidDb};
    /// use rigid_storage::InMemoryBackend;
    /// use serde_json::json;
    ///
    /// # tokio_test::block_on(async {
    /// let db = RigidDb::new(Arc::new(InMemoryBackend::new()), "demo").unwrap();
    /// db.set_schema(1, &json!({ "car": { "definition": { "color": "string" } } }))
    ///     .await
    ///     .unwrap();
    ///
    /// let value = db
    ///     .multi(|batch| {
    ///         batch
    ///             .create("car", &record([("color", "red")]))
    ///             .update("car", 1, &record([("color", "blue")]))
    ///             .get("car", 1);
    ///     })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(value, OpValue::Record(record([("color", "blue")])));
    /// # });
    /// ```
    #[instrument(skip(self, build), fields(prefix = %self.prefix))]
    pub async fn multi<F>(&self, build: F) -> Result<OpValue>
    where
        F: FnOnce(&mut Batch<'_, '_>) + Send,
    {
        let result = self
            .execute(Method::None, |ctx| build(&mut Batch::new(ctx)))
            .await;
        match &result {
            Ok(value) => debug!(?value, "batch committed"),
            Err(error) => info!(%error, "batch aborted"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FieldValue;
    use crate::generator::record;
    use rigid_storage::{InMemoryBackend, MetricsBackend};
    use serde_json::json;

    fn car_schema() -> Value {
        json!({
            "car": {
                "definition": { "color": "string", "mileage": "int" },
                "indices": { "u": { "unique": true, "fields": ["color", "mileage"] } }
            }
        })
    }

    async fn setup() -> (MetricsBackend<InMemoryBackend>, RigidDb) {
        let store = MetricsBackend::new(InMemoryBackend::new());
        let db = RigidDb::new(Arc::new(store.clone()), "test").unwrap();
        db.set_schema(1, &car_schema()).await.unwrap();
        store.reset_stats().await;
        (store, db)
    }

    #[test]
    fn test_invalid_prefix_fails_fast() {
        let store: Arc<dyn ScriptStore> = Arc::new(InMemoryBackend::new());
        for prefix in ["", "a b", "x:y"] {
            assert!(matches!(
                RigidDb::new(Arc::clone(&store), prefix),
                Err(RigidError::InvalidPrefix(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_invalid_revision_fails_fast() {
        let store = MetricsBackend::new(InMemoryBackend::new());
        let db = RigidDb::new(Arc::new(store.clone()), "test").unwrap();
        let err = db.set_schema(0, &car_schema()).await.unwrap_err();
        assert!(matches!(err, RigidError::InvalidRevision(0)));
        assert_eq!(store.stats().await.remote_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_schema_reason() {
        let db = RigidDb::new(Arc::new(InMemoryBackend::new()), "test").unwrap();
        let err = db.set_schema(1, &json!({})).await.unwrap_err();
        let op = err.operation().unwrap();
        assert_eq!(op.code, ErrorCode::InvalidSchema);
        assert_eq!(
            op.reason.as_deref(),
            Some("At least one collection must be defined.")
        );
    }

    #[tokio::test]
    async fn test_crud_round_trip() {
        let (_, db) = setup().await;
        let id = db
            .create("car", &record([("color", FieldValue::from("blue")), ("mileage", 5.into())]))
            .await
            .unwrap();
        assert_eq!(id, 1);
        assert!(db.exists("car", 1).await.unwrap());
        assert_eq!(db.list("car").await.unwrap(), vec![1]);
        assert_eq!(db.size("car").await.unwrap(), 1);

        db.delete("car", 1).await.unwrap();
        assert!(!db.exists("car", 1).await.unwrap());
        assert_eq!(db.size("car").await.unwrap(), 0);
        assert_eq!(db.current_id("car").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_build_errors_skip_the_store() {
        let (store, db) = setup().await;
        let err = db.get("boat", 1).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UnknownCollection));
        assert_eq!(store.stats().await.eval_count, 0);
    }

    #[tokio::test]
    async fn test_schema_missing_until_set() {
        let db = RigidDb::new(Arc::new(InMemoryBackend::new()), "test").unwrap();
        let err = db.list("car").await.unwrap_err();
        let op = err.operation().unwrap();
        assert_eq!(op.method, Method::List);
        assert_eq!(op.code, ErrorCode::SchemaMissing);

        db.set_schema(2, &car_schema()).await.unwrap();
        assert_eq!(db.get_schema().await.unwrap().revision, Some(2));
        assert!(db.list("car").await.unwrap().is_empty());
    }
}
