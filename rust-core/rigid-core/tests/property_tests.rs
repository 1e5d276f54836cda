// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//! Property-based tests for index maintenance.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use rigid_core::{record, RigidDb};
use rigid_storage::InMemoryBackend;
use serde_json::json;

const COLORS: [&str; 3] = ["red", "a:b", "Red"];

#[derive(Debug, Clone)]
enum Op {
    Create(usize),
    Delete(usize),
    Recolor(usize, usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..COLORS.len()).prop_map(Op::Create),
        1 => any::<usize>().prop_map(Op::Delete),
        1 => (any::<usize>(), 0..COLORS.len()).prop_map(|(n, c)| Op::Recolor(n, c)),
    ]
}

async fn open(store: &InMemoryBackend, case_insensitive: bool) -> RigidDb {
    let db = RigidDb::new(Arc::new(store.clone()), "p").unwrap();
    db.set_schema(
        1,
        &json!({
            "car": {
                "definition": { "color": "string" },
                "indices": {
                    "c": {
                        "unique": false,
                        "fields": [{ "name": "color", "caseInsensitive": case_insensitive }]
                    }
                }
            }
        }),
    )
    .await
    .unwrap();
    db
}

/// Apply `ops`, checking after each step that every lookup agrees with a
/// plain model and that the index holds a hash entry for exactly one
/// occupant and a set for two or more.
async fn check(ops: Vec<Op>, case_insensitive: bool) -> Result<(), TestCaseError> {
    let store = InMemoryBackend::new();
    let db = open(&store, case_insensitive).await;
    let fold = |c: &str| {
        if case_insensitive {
            c.to_lowercase()
        } else {
            c.to_string()
        }
    };
    let mut model: BTreeMap<i64, &str> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Create(c) => {
                let id = db.create("car", &record([("color", COLORS[c])])).await.unwrap();
                model.insert(id, COLORS[c]);
            }
            Op::Delete(n) if !model.is_empty() => {
                let id = *model.keys().nth(n % model.len()).unwrap();
                db.delete("car", id).await.unwrap();
                model.remove(&id);
            }
            Op::Recolor(n, c) if !model.is_empty() => {
                let id = *model.keys().nth(n % model.len()).unwrap();
                db.update("car", id, &record([("color", COLORS[c])])).await.unwrap();
                model.insert(id, COLORS[c]);
            }
            _ => {}
        }

        let keys = store.keys().await;
        for color in COLORS {
            let expected: Vec<i64> = model
                .iter()
                .filter(|(_, c)| fold(**c) == fold(color))
                .map(|(id, _)| *id)
                .collect();
            let found = db.find("car", &record([("color", color)])).await.unwrap();
            prop_assert_eq!(&found, &expected);
            let found_all = db.find_all("car", &record([("color", color)])).await.unwrap();
            prop_assert_eq!(&found_all, &expected);

            let composite = fold(color).replace(':', "::");
            let set_key = format!("p:car:i:color:={composite}");
            prop_assert_eq!(keys.contains(&set_key), expected.len() >= 2);
        }
        let any_single = COLORS.iter().any(|color| {
            model.values().filter(|c| fold(**c) == fold(*color)).count() == 1
        });
        prop_assert_eq!(keys.contains(&"p:car:i:color".to_string()), any_single);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_hybrid_index_matches_model(ops in prop::collection::vec(arb_op(), 1..25)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(check(ops, false))?;
    }

    #[test]
    fn test_case_insensitive_hybrid_index_matches_model(
        ops in prop::collection::vec(arb_op(), 1..25)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(check(ops, true))?;
    }

    #[test]
    fn test_unique_index_admits_each_value_once(
        values in prop::collection::vec("[a-c:~]{1,3}", 1..20)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = InMemoryBackend::new();
            let db = RigidDb::new(Arc::new(store.clone()), "u").unwrap();
            db.set_schema(1, &json!({
                "tag": {
                    "definition": { "name": "string" },
                    "indices": { "n": { "unique": true, "fields": ["name"] } }
                }
            }))
            .await
            .unwrap();

            let mut owners: BTreeMap<String, i64> = BTreeMap::new();
            for value in &values {
                let result = db.create("tag", &record([("name", value.as_str())])).await;
                match owners.get(value) {
                    Some(_) => prop_assert!(result.is_err()),
                    None => {
                        owners.insert(value.clone(), result.unwrap());
                    }
                }
            }
            for (value, id) in &owners {
                let found = db.find("tag", &record([("name", value.as_str())])).await.unwrap();
                prop_assert_eq!(found, vec![*id]);
                let stored = db.get("tag", *id).await.unwrap();
                prop_assert_eq!(stored["name"].clone(), rigid_core::FieldValue::Text(value.clone()));
            }
            Ok(())
        })?;
    }
}
