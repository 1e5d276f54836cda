// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Batch builder for [`crate::db::RigidDb::multi`].
//!
//! Every call appends one operation to a shared build context. The whole
//! batch becomes a single script, so it either commits entirely or stops at
//! the first operation that fails inside the store. Once a call records a
//! build-time error, later calls do nothing and the batch is never sent.

use crate::codec::Record;
use crate::error::{Method, OperationError};
use crate::generator::BuildContext;

/// Accumulates operations into one atomic script.
pub struct Batch<'c, 'a> {
    ctx: &'c mut BuildContext<'a>,
}

impl<'c, 'a> Batch<'c, 'a> {
    pub(crate) fn new(ctx: &'c mut BuildContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn create(&mut self, collection: &str, attrs: &Record) -> &mut Self {
        self.ctx.create(collection, attrs);
        self
    }

    pub fn update(&mut self, collection: &str, id: i64, attrs: &Record) -> &mut Self {
        self.ctx.update(collection, id, attrs);
        self
    }

    pub fn delete(&mut self, collection: &str, id: i64) -> &mut Self {
        self.ctx.delete(collection, id);
        self
    }

    pub fn get(&mut self, collection: &str, id: i64) -> &mut Self {
        self.ctx.get(collection, id);
        self
    }

    /// Stops the batch without error when the record is absent.
    pub fn exists(&mut self, collection: &str, id: i64) -> &mut Self {
        self.ctx.exists(collection, id);
        self
    }

    pub fn list(&mut self, collection: &str) -> &mut Self {
        self.ctx.list(collection);
        self
    }

    pub fn size(&mut self, collection: &str) -> &mut Self {
        self.ctx.size(collection);
        self
    }

    pub fn find(&mut self, collection: &str, attrs: &Record) -> &mut Self {
        self.ctx.find(Method::Find, collection, attrs);
        self
    }

    pub fn find_all(&mut self, collection: &str, attrs: &Record) -> &mut Self {
        self.ctx.find(Method::FindAll, collection, attrs);
        self
    }

    /// The build-time error recorded so far, if any.
    pub fn error(&self) -> Option<&OperationError> {
        self.ctx.error()
    }
}
