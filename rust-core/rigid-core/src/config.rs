// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! RigidDB configuration.
//!
//! Defaults:
//! - redis_url: `redis://127.0.0.1:6379`
//! - prefix: `rigid`
//! - preload_scripts: true
//!
//! `RIGID_REDIS_URL` and `RIGID_PREFIX` override the defaults when read
//! through [`RigidConfig::from_env`].

use serde::{Deserialize, Serialize};

/// Environment variable naming the store URL.
pub const ENV_REDIS_URL: &str = "RIGID_REDIS_URL";
/// Environment variable naming the key prefix.
pub const ENV_PREFIX: &str = "RIGID_PREFIX";

/// Configuration for a [`crate::db::RigidDb`] instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidConfig {
    /// Connection URL of the store.
    pub redis_url: String,
    /// Prefix of every key this instance reads or writes.
    pub prefix: String,
    /// Load a script before its first evaluation. When false, evaluation is
    /// always attempted first and a missing script is loaded on demand.
    pub preload_scripts: bool,
}

impl Default for RigidConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            prefix: "rigid".to_string(),
            preload_scripts: true,
        }
    }
}

impl RigidConfig {
    /// Defaults overlaid with `RIGID_REDIS_URL` and `RIGID_PREFIX`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_REDIS_URL).filter(|v| !v.is_empty()) {
            config.redis_url = url;
        }
        if let Some(prefix) = lookup(ENV_PREFIX).filter(|v| !v.is_empty()) {
            config.prefix = prefix;
        }
        config
    }
}
