// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metrics-collecting wrapper for RigidDB store backends.
//
// Wraps any `ScriptStore` and transparently counts round trips, script
// loads, cache misses on EVALSHA and evaluation latency. Tests use the round
// trip counters to check that failed builds and empty batches never reach
// the store.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rigid_script::CompiledScript;
use tokio::sync::RwLock;

use crate::backend::ScriptStore;
use crate::error::StorageError;
use crate::reply::Reply;

/// Accumulated statistics for a store backend.
///
/// All counters are monotonically increasing for the lifetime of the
/// [`MetricsBackend`] that owns them, until [`MetricsBackend::reset_stats`].
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    /// Number of `get` operations performed.
    pub get_count: u64,
    /// Number of `set` operations performed.
    pub set_count: u64,
    /// Number of `incr` operations performed.
    pub incr_count: u64,
    /// Number of generic `call` operations performed.
    pub call_count: u64,
    /// Number of `script_load` operations performed.
    pub script_load_count: u64,
    /// Number of `eval_sha` operations performed, failed ones included.
    pub eval_count: u64,
    /// Number of `eval_sha` calls rejected because the script was not loaded.
    pub no_script_count: u64,
    /// Cumulative wall-clock latency of all `eval_sha` calls, in milliseconds.
    pub eval_latency_sum_ms: f64,
    /// Total bytes of keys, values, arguments and script text sent.
    pub total_bytes_sent: u64,
}

impl BackendStats {
    /// Total number of round trips to the store.
    pub fn remote_calls(&self) -> u64 {
        self.get_count
            + self.set_count
            + self.incr_count
            + self.call_count
            + self.script_load_count
            + self.eval_count
    }
}

/// A store wrapper that collects operation metrics.
///
/// Delegates every operation to an inner backend while measuring wall-clock
/// latency and counting invocations. Clones share both the inner backend
/// (when it shares state on clone) and the statistics.
///
/// # Example
///
/// ```rust
/// use rigid_storage::memory::InMemoryBackend;
/// use rigid_storage::metrics::MetricsBackend;
/// use rigid_storage::backend::ScriptStore;
///
/// # tokio_test::block_on(async {
/// let metered = MetricsBackend::new(InMemoryBackend::new());
///
/// metered.set("key", "value").await.unwrap();
/// metered.get("key").await.unwrap();
///
/// let stats = metered.stats().await;
/// assert_eq!(stats.set_count, 1);
/// assert_eq!(stats.get_count, 1);
/// assert_eq!(stats.remote_calls(), 2);
/// # });
/// ```
pub struct MetricsBackend<B: ScriptStore> {
    /// The wrapped backend that performs the actual operations.
    inner: B,
    /// Shared, mutable statistics accumulator.
    stats: Arc<RwLock<BackendStats>>,
}

impl<B: ScriptStore + Clone> Clone for MetricsBackend<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<B: ScriptStore> MetricsBackend<B> {
    /// Wrap `inner` with metrics collection.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            stats: Arc::new(RwLock::new(BackendStats::default())),
        }
    }

    /// Return a snapshot of the current statistics.
    pub async fn stats(&self) -> BackendStats {
        self.stats.read().await.clone()
    }

    /// Reset all statistics to zero.
    pub async fn reset_stats(&self) {
        let mut s = self.stats.write().await;
        *s = BackendStats::default();
    }

    /// Return a reference to the inner backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

fn arg_bytes(args: &[String]) -> u64 {
    args.iter().map(|a| a.len() as u64).sum()
}

#[async_trait]
impl<B: ScriptStore> ScriptStore for MetricsBackend<B> {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let result = self.inner.get(key).await;

        let mut s = self.stats.write().await;
        s.get_count += 1;
        s.total_bytes_sent += key.len() as u64;

        result
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let result = self.inner.set(key, value).await;

        let mut s = self.stats.write().await;
        s.set_count += 1;
        s.total_bytes_sent += (key.len() + value.len()) as u64;

        result
    }

    async fn incr(&self, key: &str) -> Result<i64, StorageError> {
        let result = self.inner.incr(key).await;

        let mut s = self.stats.write().await;
        s.incr_count += 1;
        s.total_bytes_sent += key.len() as u64;

        result
    }

    async fn call(&self, command: &str, args: &[String]) -> Result<Reply, StorageError> {
        let result = self.inner.call(command, args).await;

        let mut s = self.stats.write().await;
        s.call_count += 1;
        s.total_bytes_sent += command.len() as u64 + arg_bytes(args);

        result
    }

    async fn script_load(&self, script: &CompiledScript) -> Result<String, StorageError> {
        let result = self.inner.script_load(script).await;

        let mut s = self.stats.write().await;
        s.script_load_count += 1;
        s.total_bytes_sent += script.source().len() as u64;

        result
    }

    async fn eval_sha(&self, sha: &str, args: &[String]) -> Result<Reply, StorageError> {
        let start = Instant::now();
        let result = self.inner.eval_sha(sha, args).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut s = self.stats.write().await;
        s.eval_count += 1;
        s.eval_latency_sum_ms += elapsed_ms;
        s.total_bytes_sent += sha.len() as u64 + arg_bytes(args);
        if matches!(result, Err(StorageError::NoScript(_))) {
            s.no_script_count += 1;
        }

        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use rigid_script::{Command, Expr, Program, Stmt};

    fn script() -> CompiledScript {
        CompiledScript::new(Program::new(vec![Stmt::Return(Expr::call(
            Command::Incr,
            vec![Expr::Param(1)],
        ))]))
    }

    #[tokio::test]
    async fn test_string_ops_increment_counts() {
        let metered = MetricsBackend::new(InMemoryBackend::new());

        metered.set("k", "v").await.unwrap();
        metered.get("k").await.unwrap();
        metered.get("missing").await.unwrap();
        metered.incr("n").await.unwrap();

        let stats = metered.stats().await;
        assert_eq!(stats.get_count, 2);
        assert_eq!(stats.set_count, 1);
        assert_eq!(stats.incr_count, 1);
        assert_eq!(stats.remote_calls(), 4);
    }

    #[tokio::test]
    async fn test_failed_incr_is_counted() {
        let metered = MetricsBackend::new(InMemoryBackend::new());
        metered.set("k", "v").await.unwrap();

        assert!(metered.incr("k").await.is_err());
        assert_eq!(metered.incr("n").await.unwrap(), 1);

        let stats = metered.stats().await;
        assert_eq!(stats.incr_count, 2);
        assert_eq!(stats.total_bytes_sent, 4);
    }

    #[tokio::test]
    async fn test_no_script_is_counted() {
        let metered = MetricsBackend::new(InMemoryBackend::new());
        let script = script();

        assert!(metered.eval_sha(script.sha(), &[]).await.is_err());
        metered.script_load(&script).await.unwrap();
        metered
            .eval_sha(script.sha(), &["c".to_string()])
            .await
            .unwrap();

        let stats = metered.stats().await;
        assert_eq!(stats.eval_count, 2);
        assert_eq!(stats.no_script_count, 1);
        assert_eq!(stats.script_load_count, 1);
        assert!(stats.eval_latency_sum_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_bytes_sent() {
        let metered = MetricsBackend::new(InMemoryBackend::new());
        metered.set("ab", "cde").await.unwrap();
        assert_eq!(metered.stats().await.total_bytes_sent, 5);
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let metered = MetricsBackend::new(InMemoryBackend::new());
        metered.set("a", "1").await.unwrap();
        metered.reset_stats().await;

        let after = metered.stats().await;
        assert_eq!(after.remote_calls(), 0);
        assert_eq!(after.total_bytes_sent, 0);
    }

    #[tokio::test]
    async fn test_clones_share_stats() {
        let metered = MetricsBackend::new(InMemoryBackend::new());
        let other = metered.clone();
        other.set("a", "1").await.unwrap();
        assert_eq!(metered.stats().await.set_count, 1);
        assert_eq!(metered.inner().len().await, 1);
    }

    #[tokio::test]
    async fn test_name_delegates_to_inner() {
        let metered = MetricsBackend::new(InMemoryBackend::new());
        assert_eq!(metered.name(), "in-memory");
    }
}
