// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core store trait for RigidDB.
//
// Defines the `ScriptStore` trait: the primitives RigidDB consumes from the
// key-value store collaborator. Plain string access (GET, SET, INCR), a
// generic command entry point, and cached script evaluation (SCRIPT LOAD and
// EVALSHA). Backends are expected to be thread-safe and fully asynchronous.

use async_trait::async_trait;
use rigid_script::CompiledScript;

use crate::error::StorageError;
use crate::reply::Reply;

/// A key-value store able to evaluate server-side scripts atomically.
///
/// Every script passed to [`ScriptStore::eval_sha`] runs as one unit: no other
/// command or script interleaves with it. The rest of RigidDB relies on that
/// for id allocation, uniqueness checks and index maintenance.
///
/// Implementations must be safe to share across threads and tokio tasks.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Retrieve the string stored at `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist, rather than an error.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store a string at `key`, overwriting any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Atomically increment the integer stored at `key` (missing keys count
    /// as zero) and return the new value.
    async fn incr(&self, key: &str) -> Result<i64, StorageError>;

    /// Run an arbitrary store command by name.
    async fn call(&self, command: &str, args: &[String]) -> Result<Reply, StorageError>;

    /// Load a script and return the hash the store will address it by.
    async fn script_load(&self, script: &CompiledScript) -> Result<String, StorageError>;

    /// Evaluate a previously loaded script with positional arguments.
    ///
    /// Fails with [`StorageError::NoScript`] if the store does not hold `sha`.
    async fn eval_sha(&self, sha: &str, args: &[String]) -> Result<Reply, StorageError>;

    /// A human-readable name for this backend, used in logging and metrics.
    fn name(&self) -> &str;
}
