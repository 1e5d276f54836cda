// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//!
//! rigid: command-line client for RigidDB.
//!
//! Every command prints one JSON document on stdout: `{"val": ...}` on
//! success, `{"err": ..., "method": ...}` when the store rejects the
//! operation. Logs go to stderr.

mod json;

use std::io::Read;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rigid_core::{OpValue, RigidConfig, RigidDb, RigidError};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema-validated documents over Redis.
#[derive(Parser, Debug)]
#[command(name = "rigid", version = VERSION, about = "Command-line client for RigidDB")]
struct Cli {
    /// Redis URL. Defaults to `RIGID_REDIS_URL`, then `redis://127.0.0.1:6379`.
    #[arg(long)]
    url: Option<String>,

    /// Key prefix. Defaults to `RIGID_PREFIX`, then `rigid`.
    #[arg(long)]
    prefix: Option<String>,

    /// Evaluate scripts first and load them only when the store reports them missing.
    #[arg(long)]
    no_preload: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a schema read from FILE (`-` for stdin).
    SetSchema {
        #[arg(long)]
        revision: u64,
        file: String,
    },
    /// Print the stored schema and its revision.
    GetSchema,
    /// Print the content hash of the stored schema.
    SchemaHash,
    /// Print the last id drawn for a collection.
    CurrentId { collection: String },
    /// Create a record from a JSON object of attributes.
    Create { collection: String, attrs: String },
    /// Change some attributes of a record.
    Update {
        collection: String,
        id: i64,
        attrs: String,
    },
    Delete { collection: String, id: i64 },
    Get { collection: String, id: i64 },
    Exists { collection: String, id: i64 },
    /// Print every id in a collection, ascending.
    List { collection: String },
    Size { collection: String },
    /// Look up ids through the index covering exactly the given attributes.
    Find { collection: String, attrs: String },
    FindAll { collection: String, attrs: String },
    /// Run a JSON array of operations from FILE (`-` for stdin) as one batch.
    Multi { file: String },
}

fn init_tracing(log_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))
    }
}

/// Run one command. Unreadable input fails the outer result; a rejected
/// operation comes back in the inner one.
async fn dispatch(db: &RigidDb, command: Command) -> Result<rigid_core::Result<Value>> {
    let val = |value: OpValue| json::value_to_json(&value);
    let out = match command {
        Command::SetSchema { revision, file } => {
            let text = read_input(&file)?;
            let schema: Value = serde_json::from_str(&text).context("schema is not valid JSON")?;
            db.set_schema(revision, &schema).await.map(|()| val(OpValue::Done))
        }
        Command::GetSchema => db.get_schema().await.map(|info| {
            json!({ "val": { "revision": info.revision, "schema": info.schema.to_json() } })
        }),
        Command::SchemaHash => db.get_schema_hash().await.map(|hash| json!({ "val": hash })),
        Command::CurrentId { collection } => {
            db.current_id(&collection).await.map(|id| json!({ "val": id }))
        }
        Command::Create { collection, attrs } => {
            let attrs = json::record_from_json(&attrs)?;
            db.create(&collection, &attrs).await.map(|id| val(OpValue::Created(id)))
        }
        Command::Update {
            collection,
            id,
            attrs,
        } => {
            let attrs = json::record_from_json(&attrs)?;
            db.update(&collection, id, &attrs).await.map(|()| val(OpValue::Updated))
        }
        Command::Delete { collection, id } => {
            db.delete(&collection, id).await.map(|()| val(OpValue::Deleted))
        }
        Command::Get { collection, id } => {
            db.get(&collection, id).await.map(|record| val(OpValue::Record(record)))
        }
        Command::Exists { collection, id } => {
            db.exists(&collection, id).await.map(|found| val(OpValue::Exists(found)))
        }
        Command::List { collection } => db.list(&collection).await.map(|ids| val(OpValue::Ids(ids))),
        Command::Size { collection } => db.size(&collection).await.map(|n| val(OpValue::Size(n))),
        Command::Find { collection, attrs } => {
            let attrs = json::record_from_json(&attrs)?;
            db.find(&collection, &attrs).await.map(|ids| val(OpValue::Ids(ids)))
        }
        Command::FindAll { collection, attrs } => {
            let attrs = json::record_from_json(&attrs)?;
            db.find_all(&collection, &attrs).await.map(|ids| val(OpValue::Ids(ids)))
        }
        Command::Multi { file } => {
            let ops = json::batch_from_json(&read_input(&file)?)?;
            db.multi(|batch| json::apply(batch, &ops)).await.map(val)
        }
    };
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = RigidConfig::from_env();
    if let Some(url) = cli.url {
        config.redis_url = url;
    }
    if let Some(prefix) = cli.prefix {
        config.prefix = prefix;
    }
    if cli.no_preload {
        config.preload_scripts = false;
    }

    tracing::debug!(prefix = %config.prefix, "connecting to {}", config.redis_url);
    let db = RigidDb::connect(&config)
        .await
        .with_context(|| format!("failed to open {}", config.redis_url))?;

    match dispatch(&db, cli.command).await? {
        Ok(out) => {
            println!("{out}");
            Ok(ExitCode::SUCCESS)
        }
        Err(RigidError::Operation(error)) => {
            println!("{}", json::error_to_json(&error));
            Ok(ExitCode::FAILURE)
        }
        Err(other) => Err(other.into()),
    }
}
