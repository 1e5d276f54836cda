// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Direct evaluation of script programs against the in-process keyspace.
//
// Values follow the conversions the remote store applies between its
// scripting engine and its replies: a nil reply reads as `false`, arrays read
// as tables, a returned `false` becomes a nil reply and a returned table is
// cut at its first nil. A journaled program snapshots each key before a write
// and restores the snapshots, newest first, on `Abort`. Nothing is rolled back
// if a script errors part way.

use std::collections::{BTreeMap, HashMap};

use rigid_script::{Command, Expr, Program, Stmt};

use crate::error::StorageError;
use crate::keyspace::{Entry, Keyspace};
use crate::reply::Reply;

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Table(Table),
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Table {
    array: Vec<Value>,
    hash: BTreeMap<String, Value>,
}

impl Value {
    fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
        }
    }

    /// String coercion used by concatenation and the string routines.
    fn text(&self, what: &str) -> Result<String, StorageError> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            other => Err(runtime(format!(
                "attempt to {what} a {} value",
                other.kind()
            ))),
        }
    }

    fn from_reply(reply: Reply) -> Value {
        match reply {
            Reply::Nil => Value::Bool(false),
            Reply::Int(i) => Value::Int(i),
            Reply::Bulk(s) => Value::Str(s),
            Reply::Status(s) => {
                let mut table = Table::default();
                table.hash.insert("ok".to_string(), Value::Str(s));
                Value::Table(table)
            }
            Reply::Array(items) => Value::Table(Table {
                array: items.into_iter().map(Value::from_reply).collect(),
                hash: BTreeMap::new(),
            }),
        }
    }

    fn into_reply(self) -> Reply {
        match self {
            Value::Nil | Value::Bool(false) => Reply::Nil,
            Value::Bool(true) => Reply::Int(1),
            Value::Int(i) => Reply::Int(i),
            Value::Str(s) => Reply::Bulk(s),
            Value::Table(mut table) => {
                if table.array.is_empty() {
                    if let Some(Value::Str(status)) = table.hash.remove("ok") {
                        return Reply::Status(status);
                    }
                }
                Reply::Array(
                    table
                        .array
                        .into_iter()
                        .take_while(|item| !matches!(item, Value::Nil))
                        .map(Value::into_reply)
                        .collect(),
                )
            }
        }
    }
}

fn runtime(message: String) -> StorageError {
    StorageError::Script(message)
}

enum Flow {
    Next,
    Return(Value),
}

struct Interpreter<'a> {
    args: &'a [String],
    keyspace: &'a mut Keyspace,
    scopes: Vec<HashMap<String, Value>>,
    journal: Option<Vec<(String, Option<Entry>)>>,
}

/// Run `program` with positional `args` against `keyspace`.
pub(crate) fn evaluate(
    program: &Program,
    args: &[String],
    keyspace: &mut Keyspace,
) -> Result<Reply, StorageError> {
    let mut interpreter = Interpreter {
        args,
        keyspace,
        scopes: vec![HashMap::new()],
        journal: program.journal.then(Vec::new),
    };
    match interpreter.run_block(&program.body, false)? {
        Flow::Return(value) => Ok(value.into_reply()),
        Flow::Next => Ok(Reply::Nil),
    }
}

impl Interpreter<'_> {
    fn run_block(&mut self, stmts: &[Stmt], scoped: bool) -> Result<Flow, StorageError> {
        if scoped {
            self.scopes.push(HashMap::new());
        }
        let mut flow = Ok(Flow::Next);
        for stmt in stmts {
            match self.run(stmt) {
                Ok(Flow::Next) => continue,
                other => {
                    flow = other;
                    break;
                }
            }
        }
        if scoped {
            self.scopes.pop();
        }
        flow
    }

    fn run(&mut self, stmt: &Stmt) -> Result<Flow, StorageError> {
        match stmt {
            Stmt::Local { name, value } => {
                let value = self.eval(value)?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), value);
                }
            }
            Stmt::Assign { name, value } => {
                let value = self.eval(value)?;
                let index = self
                    .scopes
                    .iter()
                    .rposition(|scope| scope.contains_key(name))
                    .unwrap_or(0);
                self.scopes[index].insert(name.clone(), value);
            }
            Stmt::SetField { map, field, value } => {
                let value = self.eval(value)?;
                let table = self.table_mut(map)?;
                if matches!(value, Value::Nil) {
                    table.hash.remove(field);
                } else {
                    table.hash.insert(field.clone(), value);
                }
            }
            Stmt::Push { list, value } => {
                let value = self.eval(value)?;
                self.table_mut(list)?.array.push(value);
            }
            Stmt::Call { command, args } => {
                self.call(*command, args)?;
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let branch = if self.eval(cond)?.truthy() { then } else { otherwise };
                return self.run_block(branch, true);
            }
            Stmt::Return(value) => return Ok(Flow::Return(self.eval(value)?)),
            Stmt::Abort(value) => {
                let value = self.eval(value)?;
                self.rollback();
                return Ok(Flow::Return(value));
            }
            Stmt::Block(inner) => return self.run_block(inner, true),
        }
        Ok(Flow::Next)
    }

    fn lookup(&self, name: &str) -> Value {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .cloned()
            .unwrap_or(Value::Nil)
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, StorageError> {
        let found = self
            .scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name));
        match found {
            Some(Value::Table(table)) => Ok(table),
            Some(other) => Err(runtime(format!(
                "attempt to index local '{name}' (a {} value)",
                other.kind()
            ))),
            None => Err(runtime(format!(
                "attempt to index global '{name}' (a nil value)"
            ))),
        }
    }

    fn call(&mut self, command: Command, args: &[Expr]) -> Result<Value, StorageError> {
        let mut wire = Vec::with_capacity(args.len());
        for arg in args {
            match self.eval(arg)? {
                Value::Str(s) => wire.push(s),
                Value::Int(i) => wire.push(i.to_string()),
                _ => {
                    return Err(runtime(
                        "Lua redis() command arguments must be strings or integers".to_string(),
                    ))
                }
            }
        }
        if command.is_journaled() {
            if let Some(journal) = self.journal.as_mut() {
                let touched = if command == Command::Del {
                    &wire[..]
                } else {
                    &wire[..wire.len().min(1)]
                };
                for key in touched {
                    journal.push((key.clone(), self.keyspace.snapshot(key)));
                }
            }
        }
        let reply = self.keyspace.execute(command, &wire)?;
        Ok(Value::from_reply(reply))
    }

    fn rollback(&mut self) {
        if let Some(journal) = self.journal.take() {
            for (key, entry) in journal.into_iter().rev() {
                self.keyspace.restore(key, entry);
            }
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, StorageError> {
        Ok(match expr {
            Expr::Nil => Value::Nil,
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Int(i) => Value::Int(*i),
            Expr::Param(n) => n
                .checked_sub(1)
                .and_then(|i| self.args.get(i))
                .map(|s| Value::Str(s.clone()))
                .unwrap_or(Value::Nil),
            Expr::Var(name) => self.lookup(name),
            Expr::Field { map, field } => match self.lookup(map) {
                Value::Table(table) => table.hash.get(field).cloned().unwrap_or(Value::Nil),
                other => {
                    return Err(runtime(format!(
                        "attempt to index '{map}' (a {} value)",
                        other.kind()
                    )))
                }
            },
            Expr::Index { list, index } => match self.eval(list)? {
                Value::Table(table) => usize::try_from(*index)
                    .ok()
                    .and_then(|i| i.checked_sub(1))
                    .and_then(|i| table.array.get(i).cloned())
                    .unwrap_or(Value::Nil),
                other => {
                    return Err(runtime(format!(
                        "attempt to index a {} value",
                        other.kind()
                    )))
                }
            },
            Expr::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&self.eval(part)?.text("concatenate")?);
                }
                Value::Str(out)
            }
            Expr::Lower(inner) => {
                Value::Str(self.eval(inner)?.text("lower")?.to_ascii_lowercase())
            }
            Expr::Escape(inner) => Value::Str(
                self.eval(inner)?
                    .text("escape")?
                    .replace(rigid_script::DELIMITER, &rigid_script::DELIMITER.repeat(2)),
            ),
            Expr::ToMap(inner) => match self.eval(inner)? {
                Value::Table(flat) => {
                    let mut map = Table::default();
                    for pair in flat.array.chunks(2) {
                        if let [key, value] = pair {
                            map.hash.insert(key.text("index")?, value.clone());
                        }
                    }
                    Value::Table(map)
                }
                other => {
                    return Err(runtime(format!(
                        "attempt to get length of a {} value",
                        other.kind()
                    )))
                }
            },
            Expr::SortIds(inner) => match self.eval(inner)? {
                Value::Table(mut ids) => {
                    let mut keyed = Vec::with_capacity(ids.array.len());
                    for id in ids.array.drain(..) {
                        let number: f64 = id
                            .text("compare")?
                            .parse()
                            .map_err(|_| runtime("attempt to compare nil with nil".to_string()))?;
                        keyed.push((number, id));
                    }
                    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
                    ids.array = keyed.into_iter().map(|(_, id)| id).collect();
                    Value::Table(ids)
                }
                other => {
                    return Err(runtime(format!(
                        "bad argument #1 to 'sort' (table expected, got {})",
                        other.kind()
                    )))
                }
            },
            Expr::Call { command, args } => self.call(*command, args)?,
            Expr::Table(items) => {
                let mut table = Table::default();
                for item in items {
                    table.array.push(self.eval(item)?);
                }
                Value::Table(table)
            }
            Expr::Len(inner) => match self.eval(inner)? {
                Value::Table(table) => Value::Int(
                    table
                        .array
                        .iter()
                        .take_while(|item| !matches!(item, Value::Nil))
                        .count() as i64,
                ),
                Value::Str(s) => Value::Int(s.len() as i64),
                other => {
                    return Err(runtime(format!(
                        "attempt to get length of a {} value",
                        other.kind()
                    )))
                }
            },
            Expr::Eq(a, b) => Value::Bool(self.eval(a)? == self.eval(b)?),
            Expr::Ne(a, b) => Value::Bool(self.eval(a)? != self.eval(b)?),
            Expr::Gt(a, b) => match (self.eval(a)?, self.eval(b)?) {
                (Value::Int(x), Value::Int(y)) => Value::Bool(x > y),
                (Value::Str(x), Value::Str(y)) => Value::Bool(x > y),
                (x, y) => {
                    return Err(runtime(format!(
                        "attempt to compare {} with {}",
                        x.kind(),
                        y.kind()
                    )))
                }
            },
            Expr::And(items) => {
                let mut last = Value::Bool(true);
                for item in items {
                    last = self.eval(item)?;
                    if !last.truthy() {
                        break;
                    }
                }
                last
            }
            Expr::Or(items) => {
                let mut last = Value::Bool(false);
                for item in items {
                    last = self.eval(item)?;
                    if last.truthy() {
                        break;
                    }
                }
                last
            }
            Expr::Not(inner) => Value::Bool(!self.eval(inner)?.truthy()),
        })
    }
}
