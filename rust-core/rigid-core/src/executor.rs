// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Script cache and executor.
//!
//! The [`ScriptCache`] remembers which content hashes have been loaded on the
//! store. It is an explicit object, shared through an `Arc`, so any number of
//! [`crate::db::RigidDb`] instances can share one cache or keep their own.
//!
//! The [`Executor`] evaluates a compiled script by hash. A hash the cache has
//! not seen is loaded first; a hash the store has forgotten (restart, SCRIPT
//! FLUSH) is reloaded once and retried. Correctness never depends on the
//! cache, only the number of round trips does.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rigid_script::CompiledScript;
use rigid_storage::{Reply, ScriptStore, StorageError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Snapshot of [`ScriptCache`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Hashes currently marked as loaded.
    pub entries: usize,
    /// Evaluations whose hash was already marked as loaded.
    pub hit_count: u64,
    /// Evaluations whose hash was not marked as loaded.
    pub miss_count: u64,
    /// Evaluations that found the script missing on the store.
    pub reload_count: u64,
}

/// Set of script hashes known to be loaded on the store.
#[derive(Debug, Default)]
pub struct ScriptCache {
    loaded: RwLock<HashSet<String>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    reload_count: AtomicU64,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `sha` is marked as loaded. Counts a hit or a miss.
    pub async fn is_loaded(&self, sha: &str) -> bool {
        let found = self.loaded.read().await.contains(sha);
        let counter = if found {
            &self.hit_count
        } else {
            &self.miss_count
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub async fn mark_loaded(&self, sha: &str) {
        self.loaded.write().await.insert(sha.to_string());
    }

    /// Forget every hash.
    pub async fn clear(&self) {
        self.loaded.write().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.loaded.read().await.len(),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            reload_count: self.reload_count.load(Ordering::Relaxed),
        }
    }
}

/// Evaluates compiled scripts against a store through a [`ScriptCache`].
#[derive(Clone)]
pub struct Executor {
    store: Arc<dyn ScriptStore>,
    cache: Arc<ScriptCache>,
    preload: bool,
}

impl Executor {
    /// With `preload`, a hash missing from the cache is loaded before its
    /// first evaluation. Without it, evaluation is always tried first.
    pub fn new(store: Arc<dyn ScriptStore>, cache: Arc<ScriptCache>, preload: bool) -> Self {
        Self {
            store,
            cache,
            preload,
        }
    }

    pub fn store(&self) -> &Arc<dyn ScriptStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ScriptCache> {
        &self.cache
    }

    pub async fn run(&self, script: &CompiledScript, params: &[String]) -> Result<Reply, StorageError> {
        let sha = script.sha();
        let cached = self.cache.is_loaded(sha).await;

        if !cached && self.preload {
            debug!(sha, "script cache miss, loading");
            self.load(script).await?;
            return self.store.eval_sha(sha, params).await;
        }

        match self.store.eval_sha(sha, params).await {
            Err(StorageError::NoScript(_)) => {
                if cached {
                    warn!(sha, "store lost a cached script, reloading");
                }
                self.cache.reload_count.fetch_add(1, Ordering::Relaxed);
                self.load(script).await?;
                self.store.eval_sha(sha, params).await
            }
            Ok(reply) => {
                if !cached {
                    self.cache.mark_loaded(sha).await;
                }
                Ok(reply)
            }
            other => other,
        }
    }

    async fn load(&self, script: &CompiledScript) -> Result<(), StorageError> {
        let sha = self.store.script_load(script).await?;
        if sha != script.sha() {
            return Err(StorageError::Protocol(format!(
                "store hashed script as {sha}, expected {}",
                script.sha()
            )));
        }
        self.cache.mark_loaded(&sha).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigid_script::{Command, Expr, Program, Stmt};
    use rigid_storage::{InMemoryBackend, MetricsBackend};

    fn script() -> CompiledScript {
        CompiledScript::new(Program::new(vec![Stmt::Return(Expr::call(
            Command::Incr,
            vec![Expr::Param(1)],
        ))]))
    }

    fn setup(preload: bool) -> (MetricsBackend<InMemoryBackend>, Executor) {
        let store = MetricsBackend::new(InMemoryBackend::new());
        let executor = Executor::new(
            Arc::new(store.clone()),
            Arc::new(ScriptCache::new()),
            preload,
        );
        (store, executor)
    }

    #[tokio::test]
    async fn test_cold_start_loads_once() {
        let (store, executor) = setup(true);
        let script = script();
        let args = vec!["n".to_string()];

        assert_eq!(executor.run(&script, &args).await.unwrap(), Reply::Int(1));
        assert_eq!(executor.run(&script, &args).await.unwrap(), Reply::Int(2));

        let stats = store.stats().await;
        assert_eq!(stats.script_load_count, 1);
        assert_eq!(stats.eval_count, 2);
        assert_eq!(stats.no_script_count, 0);

        let cache = executor.cache().stats().await;
        assert_eq!(cache.entries, 1);
        assert_eq!(cache.hit_count, 1);
        assert_eq!(cache.miss_count, 1);
    }

    #[tokio::test]
    async fn test_server_flush_triggers_one_reload() {
        let (store, executor) = setup(true);
        let script = script();
        let args = vec!["n".to_string()];
        executor.run(&script, &args).await.unwrap();

        store.inner().flush_scripts().await;
        store.reset_stats().await;

        assert_eq!(executor.run(&script, &args).await.unwrap(), Reply::Int(2));
        let stats = store.stats().await;
        assert_eq!(stats.no_script_count, 1);
        assert_eq!(stats.script_load_count, 1);
        assert_eq!(stats.eval_count, 2);
        assert_eq!(executor.cache().stats().await.reload_count, 1);
    }

    #[tokio::test]
    async fn test_without_preload_eval_comes_first() {
        let (store, executor) = setup(false);
        let script = script();
        let args = vec!["n".to_string()];

        executor.run(&script, &args).await.unwrap();
        executor.run(&script, &args).await.unwrap();

        let stats = store.stats().await;
        assert_eq!(stats.no_script_count, 1);
        assert_eq!(stats.script_load_count, 1);
        assert_eq!(stats.eval_count, 3);
    }

    #[tokio::test]
    async fn test_shared_cache_across_executors() {
        let store = InMemoryBackend::new();
        let cache = Arc::new(ScriptCache::new());
        let first = Executor::new(Arc::new(store.clone()), Arc::clone(&cache), true);
        let second = Executor::new(Arc::new(store.clone()), Arc::clone(&cache), true);
        let script = script();

        first.run(&script, &["n".to_string()]).await.unwrap();
        second.run(&script, &["n".to_string()]).await.unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.hit_count, 1);
        assert_eq!(store.script_count().await, 1);
    }
}
