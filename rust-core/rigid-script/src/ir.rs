// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Script intermediate representation.
//
// A generated script is an ordered list of typed statements over a small
// expression language: literals, positional parameters, locals, string
// concatenation, store calls and a handful of utility routines (map
// conversion, delimiter escaping, numeric id sorting). The renderer in
// `crate::lua` turns a `Program` into script text for the remote store; the
// in-memory backend in `rigid-storage` evaluates the same `Program` directly.

use std::fmt;

/// Reserved encoding of a NULL field value.
pub const NULL_SENTINEL: &str = "~";

/// Separator between the per-field parts of a composite index value.
pub const DELIMITER: &str = ":";

/// Store commands a script may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Get,
    Set,
    Del,
    Exists,
    Incr,
    HSet,
    HGet,
    HDel,
    HGetAll,
    SAdd,
    SRem,
    SMembers,
    SCard,
    ZAdd,
    ZRem,
    ZRange,
    ZCard,
}

impl Command {
    /// Wire name of the command.
    pub fn name(self) -> &'static str {
        match self {
            Command::Get => "GET",
            Command::Set => "SET",
            Command::Del => "DEL",
            Command::Exists => "EXISTS",
            Command::Incr => "INCR",
            Command::HSet => "HSET",
            Command::HGet => "HGET",
            Command::HDel => "HDEL",
            Command::HGetAll => "HGETALL",
            Command::SAdd => "SADD",
            Command::SRem => "SREM",
            Command::SMembers => "SMEMBERS",
            Command::SCard => "SCARD",
            Command::ZAdd => "ZADD",
            Command::ZRem => "ZREM",
            Command::ZRange => "ZRANGE",
            Command::ZCard => "ZCARD",
        }
    }

    /// Parse a wire name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Command> {
        let upper = name.to_ascii_uppercase();
        let command = match upper.as_str() {
            "GET" => Command::Get,
            "SET" => Command::Set,
            "DEL" => Command::Del,
            "EXISTS" => Command::Exists,
            "INCR" => Command::Incr,
            "HSET" => Command::HSet,
            "HGET" => Command::HGet,
            "HDEL" => Command::HDel,
            "HGETALL" => Command::HGetAll,
            "SADD" => Command::SAdd,
            "SREM" => Command::SRem,
            "SMEMBERS" => Command::SMembers,
            "SCARD" => Command::SCard,
            "ZADD" => Command::ZAdd,
            "ZREM" => Command::ZRem,
            "ZRANGE" => Command::ZRange,
            "ZCARD" => Command::ZCard,
            _ => return None,
        };
        Some(command)
    }

    /// True if the command can change the keyspace.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Command::Set
                | Command::Del
                | Command::Incr
                | Command::HSet
                | Command::HDel
                | Command::SAdd
                | Command::SRem
                | Command::ZAdd
                | Command::ZRem
        )
    }

    /// True for writes a journaled program can undo. Counters only move
    /// forward, so `INCR` is never undone.
    pub fn is_journaled(self) -> bool {
        self.is_write() && self != Command::Incr
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An expression inside a generated script.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Nil,
    Str(String),
    Int(i64),
    /// Positional parameter, 1-based (`ARGV[n]`).
    Param(usize),
    Var(String),
    /// `map[field]`.
    Field { map: String, field: String },
    /// `list[index]`, 1-based.
    Index { list: Box<Expr>, index: i64 },
    Concat(Vec<Expr>),
    Lower(Box<Expr>),
    /// Doubles every occurrence of [`DELIMITER`].
    Escape(Box<Expr>),
    /// Converts a flat field/value list into a map.
    ToMap(Box<Expr>),
    /// Sorts a list of id strings numerically.
    SortIds(Box<Expr>),
    Call { command: Command, args: Vec<Expr> },
    /// Table constructor with array items.
    Table(Vec<Expr>),
    Len(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn str(value: impl Into<String>) -> Expr {
        Expr::Str(value.into())
    }

    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    pub fn field(map: impl Into<String>, field: impl Into<String>) -> Expr {
        Expr::Field {
            map: map.into(),
            field: field.into(),
        }
    }

    pub fn call(command: Command, args: Vec<Expr>) -> Expr {
        Expr::Call { command, args }
    }

    pub fn concat(parts: Vec<Expr>) -> Expr {
        Expr::Concat(parts)
    }

    pub fn index(self, index: i64) -> Expr {
        Expr::Index {
            list: Box::new(self),
            index,
        }
    }

    pub fn lower(self) -> Expr {
        Expr::Lower(Box::new(self))
    }

    pub fn escape(self) -> Expr {
        Expr::Escape(Box::new(self))
    }

    pub fn to_map(self) -> Expr {
        Expr::ToMap(Box::new(self))
    }

    pub fn sort_ids(self) -> Expr {
        Expr::SortIds(Box::new(self))
    }

    pub fn length(self) -> Expr {
        Expr::Len(Box::new(self))
    }

    pub fn equals(self, other: Expr) -> Expr {
        Expr::Eq(Box::new(self), Box::new(other))
    }

    pub fn not_equals(self, other: Expr) -> Expr {
        Expr::Ne(Box::new(self), Box::new(other))
    }

    pub fn greater_than(self, other: Expr) -> Expr {
        Expr::Gt(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

/// A statement inside a generated script.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Local { name: String, value: Expr },
    Assign { name: String, value: Expr },
    SetField { map: String, field: String, value: Expr },
    /// Appends to the array part of a table.
    Push { list: String, value: Expr },
    /// A store call evaluated for its side effect.
    Call { command: Command, args: Vec<Expr> },
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    /// Ends the whole script with the given value.
    Return(Expr),
    /// Undoes every journaled write made so far, then ends the script with
    /// the given value. Same as `Return` in an unjournaled program.
    Abort(Expr),
    /// Lexical scope for locals.
    Block(Vec<Stmt>),
}

impl Stmt {
    pub fn local(name: impl Into<String>, value: Expr) -> Stmt {
        Stmt::Local {
            name: name.into(),
            value,
        }
    }

    pub fn assign(name: impl Into<String>, value: Expr) -> Stmt {
        Stmt::Assign {
            name: name.into(),
            value,
        }
    }

    pub fn set_field(map: impl Into<String>, field: impl Into<String>, value: Expr) -> Stmt {
        Stmt::SetField {
            map: map.into(),
            field: field.into(),
            value,
        }
    }

    pub fn push(list: impl Into<String>, value: Expr) -> Stmt {
        Stmt::Push {
            list: list.into(),
            value,
        }
    }

    pub fn call(command: Command, args: Vec<Expr>) -> Stmt {
        Stmt::Call { command, args }
    }

    pub fn when(cond: Expr, then: Vec<Stmt>) -> Stmt {
        Stmt::If {
            cond,
            then,
            otherwise: Vec::new(),
        }
    }

    pub fn if_else(cond: Expr, then: Vec<Stmt>, otherwise: Vec<Stmt>) -> Stmt {
        Stmt::If {
            cond,
            then,
            otherwise,
        }
    }
}

/// A complete script body.
///
/// In a journaled program every write except `INCR` records what it
/// overwrites, and [`Stmt::Abort`] restores it. The script then has either
/// all of its effects or none of them, apart from counter increments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
    pub journal: bool,
}

impl Program {
    pub fn new(body: Vec<Stmt>) -> Self {
        Self {
            body,
            journal: false,
        }
    }

    pub fn journaled(body: Vec<Stmt>) -> Self {
        Self {
            body,
            journal: true,
        }
    }

    /// Number of store calls that may write, counted statically.
    pub fn write_calls(&self) -> usize {
        fn count_expr(expr: &Expr) -> usize {
            match expr {
                Expr::Call { command, args } => {
                    usize::from(command.is_write()) + args.iter().map(count_expr).sum::<usize>()
                }
                Expr::Index { list, .. } => count_expr(list),
                Expr::Lower(e)
                | Expr::Escape(e)
                | Expr::ToMap(e)
                | Expr::SortIds(e)
                | Expr::Len(e)
                | Expr::Not(e) => count_expr(e),
                Expr::Eq(a, b) | Expr::Ne(a, b) | Expr::Gt(a, b) => count_expr(a) + count_expr(b),
                Expr::Concat(items) | Expr::Table(items) | Expr::And(items) | Expr::Or(items) => {
                    items.iter().map(count_expr).sum()
                }
                _ => 0,
            }
        }

        fn count_stmts(stmts: &[Stmt]) -> usize {
            stmts
                .iter()
                .map(|stmt| match stmt {
                    Stmt::Local { value, .. }
                    | Stmt::Assign { value, .. }
                    | Stmt::SetField { value, .. }
                    | Stmt::Push { value, .. }
                    | Stmt::Return(value)
                    | Stmt::Abort(value) => count_expr(value),
                    Stmt::Call { command, args } => {
                        usize::from(command.is_write())
                            + args.iter().map(count_expr).sum::<usize>()
                    }
                    Stmt::If {
                        cond,
                        then,
                        otherwise,
                    } => count_expr(cond) + count_stmts(then) + count_stmts(otherwise),
                    Stmt::Block(inner) => count_stmts(inner),
                })
                .sum()
        }

        count_stmts(&self.body)
    }
}
