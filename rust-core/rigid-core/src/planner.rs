// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Index planner.
//!
//! Names index keys and emits the script fragments that compute composite
//! values and maintain index entries. Composite values are always computed
//! inside the script from a field map local, so writes, uniqueness checks and
//! lookups share one routine ([`composite`]) and see values changed earlier in
//! the same script.
//!
//! Layout for an index over fields `a` and `b` of collection `car`:
//!
//! - `{prefix}:car:i:a:b`: hash of composite value to id. Unique indices only
//!   ever use this hash.
//! - `{prefix}:car:i:a:b:={composite}`: set of ids, used by a non-unique
//!   index once a composite value has two or more holders. It shrinks back
//!   into the hash when one holder is left.

use rigid_script::{Command, Expr, Stmt, DELIMITER, NULL_SENTINEL};

use crate::schema::Index;

/// Marker between an index key and a composite value in a set key.
pub const SET_MARKER: &str = ":=";

/// Hash key of an index.
pub fn index_key(prefix: &str, collection: &str, index: &Index) -> String {
    let names: Vec<&str> = index.field_names().into_iter().collect();
    format!("{prefix}:{collection}:i:{}", names.join(DELIMITER))
}

/// Composite value of `index` over the field map local `map`.
///
/// Fields are taken in name order, lowercased when case-insensitive, with the
/// delimiter doubled, and joined by the delimiter.
pub fn composite(index: &Index, map: &str) -> Expr {
    let mut parts = Vec::with_capacity(index.fields.len() * 2);
    for (i, field) in index.fields.iter().enumerate() {
        if i > 0 {
            parts.push(Expr::str(DELIMITER));
        }
        let mut value = Expr::field(map, &field.name);
        if field.case_insensitive {
            value = value.lower();
        }
        parts.push(value.escape());
    }
    Expr::concat(parts)
}

/// Conditions that hold when no participating field of `map` is NULL.
fn non_null(index: &Index, map: &str) -> Vec<Expr> {
    index
        .fields
        .iter()
        .map(|f| Expr::field(map, &f.name).not_equals(Expr::str(NULL_SENTINEL)))
        .collect()
}

fn all(mut conditions: Vec<Expr>) -> Expr {
    if conditions.len() == 1 {
        conditions.remove(0)
    } else {
        Expr::And(conditions)
    }
}

fn set_key() -> Expr {
    Expr::concat(vec![Expr::var("ikey"), Expr::str(SET_MARKER), Expr::var("comp")])
}

fn hget() -> Expr {
    Expr::call(Command::HGet, vec![Expr::var("ikey"), Expr::var("comp")])
}

fn locals(key: &str, index: &Index, map: &str) -> Vec<Stmt> {
    vec![
        Stmt::local("ikey", Expr::str(key)),
        Stmt::local("comp", composite(index, map)),
    ]
}

/// Block that pushes `name` onto the list local `conflicts` when the values in
/// `map` collide with an entry of the unique `index` held by another record.
///
/// `own_id` is the id of the record being written, if it already exists.
pub fn check_unique(
    name: &str,
    key: &str,
    index: &Index,
    map: &str,
    own_id: Option<Expr>,
) -> Stmt {
    let mut body = locals(key, index, map);
    let mut conditions = non_null(index, map);
    body.push(Stmt::local("holder", hget()));
    conditions.push(Expr::var("holder"));
    if let Some(id) = own_id {
        conditions.push(Expr::var("holder").not_equals(id));
    }
    body.push(Stmt::when(
        all(conditions),
        vec![Stmt::push("conflicts", Expr::str(name))],
    ));
    Stmt::Block(body)
}

/// Block that records `id` in `index` for the values in `map`.
pub fn add_entry(key: &str, index: &Index, map: &str, id: Expr) -> Stmt {
    let mut body = locals(key, index, map);
    if index.unique {
        body.push(Stmt::when(
            all(non_null(index, map)),
            vec![Stmt::call(
                Command::HSet,
                vec![Expr::var("ikey"), Expr::var("comp"), id],
            )],
        ));
        return Stmt::Block(body);
    }

    body.push(Stmt::local("holder", hget()));
    body.push(Stmt::if_else(
        Expr::var("holder"),
        vec![
            Stmt::call(Command::HDel, vec![Expr::var("ikey"), Expr::var("comp")]),
            Stmt::call(Command::SAdd, vec![set_key(), Expr::var("holder"), id.clone()]),
        ],
        vec![Stmt::if_else(
            Expr::call(Command::SCard, vec![set_key()]).greater_than(Expr::Int(0)),
            vec![Stmt::call(Command::SAdd, vec![set_key(), id.clone()])],
            vec![Stmt::call(
                Command::HSet,
                vec![Expr::var("ikey"), Expr::var("comp"), id],
            )],
        )],
    ));
    Stmt::Block(body)
}

/// Block that removes `id` from `index` for the values in `map`.
pub fn remove_entry(key: &str, index: &Index, map: &str, id: Expr) -> Stmt {
    let mut body = locals(key, index, map);
    let held_here = hget().equals(id.clone());
    let drop_hash = Stmt::call(Command::HDel, vec![Expr::var("ikey"), Expr::var("comp")]);

    if index.unique {
        body.push(Stmt::when(held_here, vec![drop_hash]));
        return Stmt::Block(body);
    }

    body.push(Stmt::if_else(
        held_here,
        vec![drop_hash],
        vec![
            Stmt::call(Command::SRem, vec![set_key(), id]),
            Stmt::when(
                Expr::call(Command::SCard, vec![set_key()]).equals(Expr::Int(1)),
                vec![
                    Stmt::local(
                        "last",
                        Expr::call(Command::SMembers, vec![set_key()]).index(1),
                    ),
                    Stmt::call(Command::Del, vec![set_key()]),
                    Stmt::call(
                        Command::HSet,
                        vec![Expr::var("ikey"), Expr::var("comp"), Expr::var("last")],
                    ),
                ],
            ),
        ],
    ));
    Stmt::Block(body)
}

/// Statements that leave the ids matching the values in `map` in the list
/// local `ids`, whichever shape the entry currently has.
pub fn lookup(key: &str, index: &Index, map: &str) -> Vec<Stmt> {
    let mut body = locals(key, index, map);
    body.push(Stmt::local("holder", hget()));
    body.push(Stmt::if_else(
        Expr::var("holder"),
        vec![Stmt::assign("ids", Expr::Table(vec![Expr::var("holder")]))],
        vec![Stmt::assign(
            "ids",
            Expr::call(Command::SMembers, vec![set_key()]).sort_ids(),
        )],
    ));
    body
}
