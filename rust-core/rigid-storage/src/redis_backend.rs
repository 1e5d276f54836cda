// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Redis store backend for RigidDB.
//
// Scripts are sent once with SCRIPT LOAD and then addressed by SHA-1 through
// EVALSHA with no keys and positional arguments. The connection manager
// reconnects transparently; clones share one multiplexed connection.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, ErrorKind, Value};
use rigid_script::CompiledScript;
use tracing::{debug, info};

use crate::backend::ScriptStore;
use crate::error::StorageError;
use crate::reply::Reply;

/// A script store backed by a Redis server.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect to the server at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis");

        Ok(Self { conn })
    }
}

fn text(bytes: Vec<u8>) -> Result<String, StorageError> {
    String::from_utf8(bytes).map_err(|e| StorageError::Protocol(format!("non UTF-8 reply: {e}")))
}

/// Convert a wire value into a [`Reply`].
pub(crate) fn to_reply(value: Value) -> Result<Reply, StorageError> {
    match value {
        Value::Nil => Ok(Reply::Nil),
        Value::Int(i) => Ok(Reply::Int(i)),
        Value::BulkString(bytes) => Ok(Reply::Bulk(text(bytes)?)),
        Value::SimpleString(s) => Ok(Reply::Status(s)),
        Value::Okay => Ok(Reply::Status("OK".to_string())),
        Value::Array(items) | Value::Set(items) => Ok(Reply::Array(
            items
                .into_iter()
                .map(to_reply)
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Value::Boolean(b) => Ok(if b { Reply::Int(1) } else { Reply::Nil }),
        Value::VerbatimString { text, .. } => Ok(Reply::Bulk(text)),
        other => Err(StorageError::Protocol(format!(
            "unsupported reply type: {other:?}"
        ))),
    }
}

#[async_trait]
impl ScriptStore for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StorageError> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn call(&self, command: &str, args: &[String]) -> Result<Reply, StorageError> {
        let mut conn = self.conn.clone();
        let value: Value = redis::cmd(command).arg(args).query_async(&mut conn).await?;
        to_reply(value)
    }

    async fn script_load(&self, script: &CompiledScript) -> Result<String, StorageError> {
        let mut conn = self.conn.clone();
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(script.source())
            .query_async(&mut conn)
            .await?;
        if sha != script.sha() {
            return Err(StorageError::Protocol(format!(
                "server hashed script as {sha}, expected {}",
                script.sha()
            )));
        }
        debug!(sha = %sha, "Script loaded");
        Ok(sha)
    }

    async fn eval_sha(&self, sha: &str, args: &[String]) -> Result<Reply, StorageError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<Value> = redis::cmd("EVALSHA")
            .arg(sha)
            .arg(0)
            .arg(args)
            .query_async(&mut conn)
            .await;
        match result {
            Ok(value) => to_reply(value),
            Err(e) if e.kind() == ErrorKind::NoScriptError => {
                Err(StorageError::NoScript(sha.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigid_script::{Command, Expr, Program, Stmt};

    #[test]
    fn test_value_conversion() {
        assert_eq!(to_reply(Value::Nil).unwrap(), Reply::Nil);
        assert_eq!(to_reply(Value::Okay).unwrap(), Reply::Status("OK".into()));
        assert_eq!(
            to_reply(Value::Array(vec![
                Value::BulkString(b"car".to_vec()),
                Value::Int(3),
            ]))
            .unwrap(),
            Reply::Array(vec![Reply::Bulk("car".into()), Reply::Int(3)])
        );
        assert!(to_reply(Value::BulkString(vec![0xff, 0xfe])).is_err());
    }

    fn redis_url() -> String {
        std::env::var("RIGID_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[tokio::test]
    #[ignore = "requires Redis: docker run -d -p 6379:6379 redis:7"]
    async fn test_script_load_and_eval_sha() {
        let backend = RedisBackend::connect(&redis_url()).await.unwrap();
        let script = CompiledScript::new(Program::new(vec![Stmt::Return(Expr::Table(vec![
            Expr::str("echo"),
            Expr::Param(1),
            Expr::call(Command::Exists, vec![Expr::Param(1)]),
        ]))]));

        let sha = backend.script_load(&script).await.unwrap();
        let reply = backend
            .eval_sha(&sha, &["rigid-test:missing".to_string()])
            .await
            .unwrap();
        assert_eq!(
            reply,
            Reply::Array(vec![
                Reply::Bulk("echo".into()),
                Reply::Bulk("rigid-test:missing".into()),
                Reply::Int(0),
            ])
        );
    }

    #[tokio::test]
    #[ignore = "requires Redis: docker run -d -p 6379:6379 redis:7"]
    async fn test_unknown_sha_is_no_script() {
        let backend = RedisBackend::connect(&redis_url()).await.unwrap();
        let err = backend
            .eval_sha("0000000000000000000000000000000000000000", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoScript(_)));
    }
}
