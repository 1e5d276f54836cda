// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process keyspace: strings, hashes, sets and sorted sets with the command
// semantics RigidDB scripts rely on. Empty collections are removed, as the
// remote store does, so key counts stay comparable.

use std::collections::{BTreeMap, BTreeSet};

use rigid_script::Command;

use crate::error::StorageError;
use crate::reply::Reply;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Entry {
    Str(String),
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
    ZSet(BTreeMap<String, f64>),
}

#[derive(Debug, Default, Clone)]
pub(crate) struct Keyspace {
    entries: BTreeMap<String, Entry>,
}

fn arity(command: Command, args: &[String], min: usize, pairs: bool) -> Result<(), StorageError> {
    let ok = args.len() >= min && (!pairs || (args.len() - 1) % 2 == 0);
    if ok {
        Ok(())
    } else {
        Err(StorageError::Script(format!(
            "ERR wrong number of arguments for '{}' command",
            command.name().to_ascii_lowercase()
        )))
    }
}

fn count(n: usize) -> Reply {
    Reply::Int(n as i64)
}

impl Keyspace {
    pub(crate) fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Copy of whatever `key` holds.
    pub(crate) fn snapshot(&self, key: &str) -> Option<Entry> {
        self.entries.get(key).cloned()
    }

    /// Put back a value taken by [`Self::snapshot`].
    pub(crate) fn restore(&mut self, key: String, entry: Option<Entry>) {
        match entry {
            Some(entry) => {
                self.entries.insert(key, entry);
            }
            None => {
                self.entries.remove(&key);
            }
        }
    }

    pub(crate) fn execute(&mut self, command: Command, args: &[String]) -> Result<Reply, StorageError> {
        match command {
            Command::Get => {
                arity(command, args, 1, false)?;
                match self.entries.get(&args[0]) {
                    None => Ok(Reply::Nil),
                    Some(Entry::Str(s)) => Ok(Reply::Bulk(s.clone())),
                    Some(_) => Err(StorageError::WrongType(args[0].clone())),
                }
            }
            Command::Set => {
                arity(command, args, 2, false)?;
                self.entries
                    .insert(args[0].clone(), Entry::Str(args[1].clone()));
                Ok(Reply::Status("OK".to_string()))
            }
            Command::Del => {
                arity(command, args, 1, false)?;
                Ok(count(
                    args.iter()
                        .filter(|key| self.entries.remove(*key).is_some())
                        .count(),
                ))
            }
            Command::Exists => {
                arity(command, args, 1, false)?;
                Ok(count(
                    args.iter()
                        .filter(|key| self.entries.contains_key(*key))
                        .count(),
                ))
            }
            Command::Incr => {
                arity(command, args, 1, false)?;
                let current = match self.entries.get(&args[0]) {
                    None => 0,
                    Some(Entry::Str(s)) => s.parse::<i64>().map_err(|_| {
                        StorageError::Script(
                            "ERR value is not an integer or out of range".to_string(),
                        )
                    })?,
                    Some(_) => return Err(StorageError::WrongType(args[0].clone())),
                };
                let next = current + 1;
                self.entries
                    .insert(args[0].clone(), Entry::Str(next.to_string()));
                Ok(Reply::Int(next))
            }
            Command::HSet => {
                arity(command, args, 3, true)?;
                let hash = self.hash_mut(&args[0])?;
                let added = args[1..]
                    .chunks(2)
                    .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                    .count();
                Ok(count(added))
            }
            Command::HGet => {
                arity(command, args, 2, false)?;
                Ok(self
                    .hash(&args[0])?
                    .and_then(|hash| hash.get(&args[1]).cloned())
                    .map(Reply::Bulk)
                    .unwrap_or(Reply::Nil))
            }
            Command::HDel => {
                arity(command, args, 2, false)?;
                let removed = match self.entries.get_mut(&args[0]) {
                    None => 0,
                    Some(Entry::Hash(hash)) => args[1..]
                        .iter()
                        .filter(|field| hash.remove(*field).is_some())
                        .count(),
                    Some(_) => return Err(StorageError::WrongType(args[0].clone())),
                };
                self.drop_if_empty(&args[0]);
                Ok(count(removed))
            }
            Command::HGetAll => {
                arity(command, args, 1, false)?;
                let flat = self
                    .hash(&args[0])?
                    .map(|hash| {
                        hash.iter()
                            .flat_map(|(k, v)| [Reply::Bulk(k.clone()), Reply::Bulk(v.clone())])
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Reply::Array(flat))
            }
            Command::SAdd => {
                arity(command, args, 2, false)?;
                let set = self.set_mut(&args[0])?;
                let added = args[1..]
                    .iter()
                    .filter(|member| set.insert((*member).clone()))
                    .count();
                Ok(count(added))
            }
            Command::SRem => {
                arity(command, args, 2, false)?;
                let removed = match self.entries.get_mut(&args[0]) {
                    None => 0,
                    Some(Entry::Set(set)) => args[1..]
                        .iter()
                        .filter(|member| set.remove(*member))
                        .count(),
                    Some(_) => return Err(StorageError::WrongType(args[0].clone())),
                };
                self.drop_if_empty(&args[0]);
                Ok(count(removed))
            }
            Command::SMembers => {
                arity(command, args, 1, false)?;
                let members = match self.entries.get(&args[0]) {
                    None => Vec::new(),
                    Some(Entry::Set(set)) => set.iter().cloned().map(Reply::Bulk).collect(),
                    Some(_) => return Err(StorageError::WrongType(args[0].clone())),
                };
                Ok(Reply::Array(members))
            }
            Command::SCard => {
                arity(command, args, 1, false)?;
                match self.entries.get(&args[0]) {
                    None => Ok(count(0)),
                    Some(Entry::Set(set)) => Ok(count(set.len())),
                    Some(_) => Err(StorageError::WrongType(args[0].clone())),
                }
            }
            Command::ZAdd => {
                arity(command, args, 3, true)?;
                let mut scored = Vec::with_capacity(args.len() / 2);
                for pair in args[1..].chunks(2) {
                    let score: f64 = pair[0].parse().map_err(|_| {
                        StorageError::Script("ERR value is not a valid float".to_string())
                    })?;
                    scored.push((pair[1].clone(), score));
                }
                let zset = self.zset_mut(&args[0])?;
                let added = scored
                    .into_iter()
                    .filter(|(member, score)| zset.insert(member.clone(), *score).is_none())
                    .count();
                Ok(count(added))
            }
            Command::ZRem => {
                arity(command, args, 2, false)?;
                let removed = match self.entries.get_mut(&args[0]) {
                    None => 0,
                    Some(Entry::ZSet(zset)) => args[1..]
                        .iter()
                        .filter(|member| zset.remove(*member).is_some())
                        .count(),
                    Some(_) => return Err(StorageError::WrongType(args[0].clone())),
                };
                self.drop_if_empty(&args[0]);
                Ok(count(removed))
            }
            Command::ZRange => {
                arity(command, args, 3, false)?;
                let parse = |s: &str| {
                    s.parse::<i64>().map_err(|_| {
                        StorageError::Script(
                            "ERR value is not an integer or out of range".to_string(),
                        )
                    })
                };
                let (start, stop) = (parse(&args[1])?, parse(&args[2])?);
                let mut ordered: Vec<(&String, f64)> = match self.entries.get(&args[0]) {
                    None => Vec::new(),
                    Some(Entry::ZSet(zset)) => zset.iter().map(|(m, s)| (m, *s)).collect(),
                    Some(_) => return Err(StorageError::WrongType(args[0].clone())),
                };
                ordered.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

                let len = ordered.len() as i64;
                let start = if start < 0 { (len + start).max(0) } else { start };
                let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
                if start > stop || start >= len {
                    return Ok(Reply::Array(Vec::new()));
                }
                Ok(Reply::Array(
                    ordered[start as usize..=stop as usize]
                        .iter()
                        .map(|(member, _)| Reply::Bulk((*member).clone()))
                        .collect(),
                ))
            }
            Command::ZCard => {
                arity(command, args, 1, false)?;
                match self.entries.get(&args[0]) {
                    None => Ok(count(0)),
                    Some(Entry::ZSet(zset)) => Ok(count(zset.len())),
                    Some(_) => Err(StorageError::WrongType(args[0].clone())),
                }
            }
        }
    }

    fn hash(&self, key: &str) -> Result<Option<&BTreeMap<String, String>>, StorageError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Hash(hash)) => Ok(Some(hash)),
            Some(_) => Err(StorageError::WrongType(key.to_string())),
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut BTreeMap<String, String>, StorageError> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(BTreeMap::new()))
        {
            Entry::Hash(hash) => Ok(hash),
            _ => Err(StorageError::WrongType(key.to_string())),
        }
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut BTreeSet<String>, StorageError> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(BTreeSet::new()))
        {
            Entry::Set(set) => Ok(set),
            _ => Err(StorageError::WrongType(key.to_string())),
        }
    }

    fn zset_mut(&mut self, key: &str) -> Result<&mut BTreeMap<String, f64>, StorageError> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::ZSet(BTreeMap::new()))
        {
            Entry::ZSet(zset) => Ok(zset),
            _ => Err(StorageError::WrongType(key.to_string())),
        }
    }

    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key) {
            Some(Entry::Hash(hash)) => hash.is_empty(),
            Some(Entry::Set(set)) => set.is_empty(),
            Some(Entry::ZSet(zset)) => zset.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strings_and_incr() {
        let mut ks = Keyspace::default();
        assert_eq!(ks.execute(Command::Get, &args(&["k"])).unwrap(), Reply::Nil);
        assert_eq!(ks.execute(Command::Incr, &args(&["n"])).unwrap(), Reply::Int(1));
        assert_eq!(ks.execute(Command::Incr, &args(&["n"])).unwrap(), Reply::Int(2));
        ks.execute(Command::Set, &args(&["k", "v"])).unwrap();
        assert_eq!(
            ks.execute(Command::Get, &args(&["k"])).unwrap(),
            Reply::Bulk("v".into())
        );
        assert!(ks.execute(Command::Incr, &args(&["k"])).is_err());
    }

    #[test]
    fn test_empty_hash_is_removed() {
        let mut ks = Keyspace::default();
        assert_eq!(
            ks.execute(Command::HSet, &args(&["h", "a", "1", "b", "2"])).unwrap(),
            Reply::Int(2)
        );
        assert_eq!(ks.len(), 1);
        ks.execute(Command::HDel, &args(&["h", "a", "b"])).unwrap();
        assert_eq!(ks.len(), 0);
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let mut ks = Keyspace::default();
        ks.execute(Command::SAdd, &args(&["s", "1"])).unwrap();
        match ks.execute(Command::HGet, &args(&["s", "f"])) {
            Err(StorageError::WrongType(key)) => assert_eq!(key, "s"),
            other => panic!("expected WrongType, got {:?}", other),
        }
    }

    #[test]
    fn test_sets() {
        let mut ks = Keyspace::default();
        ks.execute(Command::SAdd, &args(&["s", "2", "1", "2"])).unwrap();
        assert_eq!(ks.execute(Command::SCard, &args(&["s"])).unwrap(), Reply::Int(2));
        ks.execute(Command::SRem, &args(&["s", "1"])).unwrap();
        assert_eq!(
            ks.execute(Command::SMembers, &args(&["s"])).unwrap(),
            Reply::Array(vec![Reply::Bulk("2".into())])
        );
        ks.execute(Command::SRem, &args(&["s", "2"])).unwrap();
        assert!(ks.keys().is_empty());
    }

    #[test]
    fn test_sorted_set_range_orders_by_score() {
        let mut ks = Keyspace::default();
        ks.execute(Command::ZAdd, &args(&["z", "10", "10", "2", "2", "3", "3"]))
            .unwrap();
        assert_eq!(
            ks.execute(Command::ZRange, &args(&["z", "0", "-1"])).unwrap(),
            Reply::Array(vec![
                Reply::Bulk("2".into()),
                Reply::Bulk("3".into()),
                Reply::Bulk("10".into()),
            ])
        );
        assert_eq!(
            ks.execute(Command::ZRange, &args(&["z", "1", "1"])).unwrap(),
            Reply::Array(vec![Reply::Bulk("3".into())])
        );
        assert_eq!(
            ks.execute(Command::ZRange, &args(&["missing", "0", "-1"])).unwrap(),
            Reply::Array(vec![])
        );
        assert_eq!(ks.execute(Command::ZCard, &args(&["z"])).unwrap(), Reply::Int(3));
    }

    #[test]
    fn test_snapshot_and_restore() {
        let mut ks = Keyspace::default();
        ks.execute(Command::HSet, &args(&["h", "a", "1"])).unwrap();
        let before = ks.snapshot("h");
        let absent = ks.snapshot("s");

        ks.execute(Command::HSet, &args(&["h", "a", "2", "b", "3"])).unwrap();
        ks.execute(Command::SAdd, &args(&["s", "x"])).unwrap();
        ks.restore("s".to_string(), absent);
        ks.restore("h".to_string(), before);

        assert_eq!(ks.keys(), vec!["h".to_string()]);
        assert_eq!(
            ks.execute(Command::HGetAll, &args(&["h"])).unwrap(),
            Reply::Array(vec![Reply::Bulk("a".into()), Reply::Bulk("1".into())])
        );
    }

    #[test]
    fn test_arity_errors() {
        let mut ks = Keyspace::default();
        assert!(ks.execute(Command::HSet, &args(&["h", "a"])).is_err());
        assert!(ks.execute(Command::ZAdd, &args(&["z", "1"])).is_err());
        assert!(ks.execute(Command::Get, &args(&[])).is_err());
    }
}
