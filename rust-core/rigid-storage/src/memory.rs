// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory store backend for RigidDB.
//
// Holds a keyspace and a script cache behind one tokio `RwLock`. A script
// evaluation takes the write lock for its whole run, which gives the same
// all-or-nothing interleaving guarantee as the remote store. Intended for
// tests, development and embedding without a server.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rigid_script::{Command, CompiledScript, Program};
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::ScriptStore;
use crate::error::StorageError;
use crate::eval;
use crate::keyspace::Keyspace;
use crate::reply::Reply;

#[derive(Debug, Default)]
struct MemoryState {
    keyspace: Keyspace,
    scripts: HashMap<String, Program>,
}

/// An in-memory script store.
///
/// All data lives in process memory and is lost on drop. Clones share state.
///
/// # Example
///
/// ```rust
/// use rigid_storage::memory::InMemoryBackend;
/// use rigid_storage::backend::ScriptStore;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryBackend::new();
/// store.set("hello", "world").await.unwrap();
/// assert_eq!(store.get("hello").await.unwrap().as_deref(), Some("world"));
/// assert_eq!(store.incr("n").await.unwrap(), 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryBackend {
    /// Create a new, empty in-memory backend.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }

    /// Return the number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.state.read().await.keyspace.len()
    }

    /// Return true if the store contains no keys.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// All keys, in sorted order.
    pub async fn keys(&self) -> Vec<String> {
        self.state.read().await.keyspace.keys()
    }

    /// Forget every loaded script, as a server restart or SCRIPT FLUSH would.
    pub async fn flush_scripts(&self) {
        self.state.write().await.scripts.clear();
    }

    /// Number of scripts currently loaded.
    pub async fn script_count(&self) -> usize {
        self.state.read().await.scripts.len()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_command(command: &str) -> StorageError {
    StorageError::Script(format!("ERR unknown command '{command}'"))
}

#[async_trait]
impl ScriptStore for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut state = self.state.write().await;
        let reply = state.keyspace.execute(Command::Get, &[key.to_string()])?;
        Ok(reply.as_text())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state
            .keyspace
            .execute(Command::Set, &[key.to_string(), value.to_string()])?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StorageError> {
        let mut state = self.state.write().await;
        let reply = state.keyspace.execute(Command::Incr, &[key.to_string()])?;
        reply
            .as_int()
            .ok_or_else(|| StorageError::Protocol(format!("INCR returned {reply:?}")))
    }

    async fn call(&self, command: &str, args: &[String]) -> Result<Reply, StorageError> {
        let parsed = Command::from_name(command).ok_or_else(|| unknown_command(command))?;
        self.state.write().await.keyspace.execute(parsed, args)
    }

    async fn script_load(&self, script: &CompiledScript) -> Result<String, StorageError> {
        let mut state = self.state.write().await;
        state
            .scripts
            .insert(script.sha().to_string(), script.program().clone());
        debug!(sha = script.sha(), "script loaded");
        Ok(script.sha().to_string())
    }

    async fn eval_sha(&self, sha: &str, args: &[String]) -> Result<Reply, StorageError> {
        let mut state = self.state.write().await;
        let MemoryState { keyspace, scripts } = &mut *state;
        let program = scripts
            .get(sha)
            .ok_or_else(|| StorageError::NoScript(sha.to_string()))?;
        eval::evaluate(program, args, keyspace)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigid_script::{Expr, Stmt};

    fn counter_script() -> CompiledScript {
        CompiledScript::new(Program::new(vec![Stmt::Return(Expr::call(
            Command::Incr,
            vec![Expr::Param(1)],
        ))]))
    }

    #[tokio::test]
    async fn test_basic_string_ops() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty().await);
        assert_eq!(backend.get("k").await.unwrap(), None);

        backend.set("k", "v").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(backend.incr("n").await.unwrap(), 1);
        assert_eq!(backend.incr("n").await.unwrap(), 2);
        assert_eq!(backend.len().await, 2);
    }

    #[tokio::test]
    async fn test_eval_sha_requires_load() {
        let backend = InMemoryBackend::new();
        let script = counter_script();

        let err = backend
            .eval_sha(script.sha(), &["c".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoScript(_)));

        let sha = backend.script_load(&script).await.unwrap();
        assert_eq!(sha, script.sha());
        let reply = backend.eval_sha(&sha, &["c".to_string()]).await.unwrap();
        assert_eq!(reply, Reply::Int(1));
    }

    #[tokio::test]
    async fn test_flush_scripts_forgets_hashes() {
        let backend = InMemoryBackend::new();
        let script = counter_script();
        backend.script_load(&script).await.unwrap();
        assert_eq!(backend.script_count().await, 1);

        backend.flush_scripts().await;
        assert_eq!(backend.script_count().await, 0);
        assert!(backend.eval_sha(script.sha(), &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_generic_call() {
        let backend = InMemoryBackend::new();
        let args = vec!["h".to_string(), "f".to_string(), "1".to_string()];
        assert_eq!(backend.call("hset", &args).await.unwrap(), Reply::Int(1));
        assert!(backend.call("FLUSHALL", &[]).await.is_err());
        assert_eq!(backend.keys().await, vec!["h".to_string()]);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let backend = InMemoryBackend::new();
        let other = backend.clone();
        backend.set("shared", "1").await.unwrap();
        assert_eq!(other.get("shared").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_concurrent_scripts_do_not_interleave() {
        let backend = InMemoryBackend::new();
        let script = counter_script();
        backend.script_load(&script).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let b = backend.clone();
            let sha = script.sha().to_string();
            handles.push(tokio::spawn(async move {
                b.eval_sha(&sha, &["c".to_string()]).await.unwrap()
            }));
        }
        let mut seen: Vec<i64> = Vec::new();
        for h in handles {
            seen.push(h.await.unwrap().as_int().unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=20).collect::<Vec<_>>());
    }
}
