// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// RigidDB Script Representation
//
// Generated scripts are built as typed instruction lists rather than by string
// concatenation. A single renderer turns them into Lua for the remote store,
// and the in-memory backend evaluates the same instructions directly, so the
// generator can be tested without a server.
//
// # Modules
//
// - [`ir`] -- `Expr`, `Stmt`, `Command` and `Program`.
// - [`lua`] -- Renders a `Program` into Lua source with a shared prelude.
// - [`compiled`] -- `CompiledScript`: program, rendered text and SHA-1.

pub mod compiled;
pub mod ir;
pub mod lua;

pub use compiled::{content_hash, CompiledScript};
pub use ir::{Command, Expr, Program, Stmt, DELIMITER, NULL_SENTINEL};
