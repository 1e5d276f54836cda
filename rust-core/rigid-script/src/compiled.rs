// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Compiled scripts: a program together with its rendered text and the
// content hash the store addresses it by.

use sha1::{Digest, Sha1};

use crate::ir::Program;
use crate::lua;

/// A rendered, hashed script ready for SCRIPT LOAD / EVALSHA.
#[derive(Debug, Clone)]
pub struct CompiledScript {
    program: Program,
    source: String,
    sha: String,
}

impl CompiledScript {
    /// Render `program` and compute its content hash.
    pub fn new(program: Program) -> Self {
        let source = lua::render(&program);
        let sha = content_hash(&source);
        Self {
            program,
            source,
            sha,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Full script text, prelude included.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Lowercase hex SHA-1 of [`Self::source`].
    pub fn sha(&self) -> &str {
        &self.sha
    }
}

/// Lowercase hex SHA-1 of a script text, as computed by SCRIPT LOAD.
pub fn content_hash(source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, Stmt};

    #[test]
    fn test_content_hash_known_vector() {
        assert_eq!(
            content_hash("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_identical_programs_share_hash() {
        let build = || {
            Program::new(vec![Stmt::Return(Expr::Table(vec![
                Expr::str("size"),
                Expr::str("noError"),
            ]))])
        };
        let a = CompiledScript::new(build());
        let b = CompiledScript::new(build());
        assert_eq!(a.sha(), b.sha());
        assert_eq!(a.sha().len(), 40);
        assert_eq!(a.source(), b.source());
    }

    #[test]
    fn test_different_programs_differ() {
        let a = CompiledScript::new(Program::new(vec![Stmt::Return(Expr::str("a"))]));
        let b = CompiledScript::new(Program::new(vec![Stmt::Return(Expr::str("b"))]));
        assert_ne!(a.sha(), b.sha());
    }
}
