// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//! RigidDB Core
//!
//! Schema-validated documents on a scripted key-value store. Every call,
//! or every batch of calls, compiles to one server-side script that writes
//! the record, maintains its secondary indices and enforces uniqueness in a
//! single atomic evaluation.

pub mod batch;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod generator;
pub mod outcome;
pub mod planner;
pub mod schema;

pub use batch::Batch;
pub use codec::{FieldValue, Record};
pub use config::RigidConfig;
pub use db::{RigidDb, SchemaInfo};
pub use error::{ErrorCode, Method, OperationError, Result, RigidError};
pub use executor::{CacheStats, Executor, ScriptCache};
pub use generator::{record, BuildContext};
pub use outcome::OpValue;
pub use schema::{Collection, FieldKind, FieldType, Index, IndexField, Schema};
