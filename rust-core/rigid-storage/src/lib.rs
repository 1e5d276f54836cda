// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// RigidDB Store Abstraction
//
// This crate provides the scripted key-value store interface RigidDB runs on.
// The `ScriptStore` trait covers plain string access, a generic command entry
// point and cached script evaluation, so the database layer can run against
// Redis or an in-process keyspace without changing.
//
// # Modules
//
// - [`backend`] -- The `ScriptStore` trait.
// - [`error`] -- The `StorageError` enum covering all backend failure modes.
// - [`reply`] -- The `Reply` type returned by commands and scripts.
// - [`memory`] -- An in-memory backend that evaluates scripts directly.
// - [`metrics`] -- A transparent wrapper that counts round trips.
// - `redis_backend` -- Redis over a connection manager (feature
//   `redis-backend`).
//
// # Example
//
// ```rust
// use rigid_storage::{InMemoryBackend, MetricsBackend, ScriptStore};
//
// # tokio_test::block_on(async {
// let metered = MetricsBackend::new(InMemoryBackend::new());
// metered.incr("rigid:car:nextid").await.unwrap();
// assert_eq!(metered.get("rigid:car:nextid").await.unwrap().as_deref(), Some("1"));
// assert_eq!(metered.stats().await.remote_calls(), 2);
// # });
// ```

pub mod backend;
pub mod error;
mod eval;
mod keyspace;
pub mod memory;
pub mod metrics;
pub mod reply;

#[cfg(feature = "redis-backend")]
pub mod redis_backend;

pub use backend::ScriptStore;
pub use error::StorageError;
pub use memory::InMemoryBackend;
pub use metrics::{BackendStats, MetricsBackend};
pub use reply::Reply;

#[cfg(feature = "redis-backend")]
pub use redis_backend::RedisBackend;
