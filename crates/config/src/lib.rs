//! Configuration types for the C-- object server.
//!
//! Plain serde structs with defaults; the daemon loads them from a TOML file
//! and applies command-line overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Number of ticks a method gets before dying with `~methoderr`.
pub const METHOD_TICKS: i64 = 20_000;

/// Number of ticks a paused method gets per heartbeat.
pub const PAUSED_METHOD_TICKS: i64 = 5_000;

/// Maximum depth of method calls.
pub const MAX_CALL_DEPTH: usize = 128;

/// Width and depth of the object cache.
pub const CACHE_WIDTH: usize = 15;
pub const CACHE_DEPTH: usize = 30;

/// Default indent for decompiled code.
pub const DEFAULT_INDENT: i64 = 4;

/// The system object, sole holder of administrative operators.
pub const SYSTEM_DBREF: i64 = 0;

/// The root of the parent graph; may not be reparented or destroyed.
pub const ROOT_DBREF: i64 = 1;

/// The version triple reported by the `version` operator.
pub const VERSION: (i64, i64, i64) = (0, 12, 0);

/// Object cache geometry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of hash chains.
    pub width: usize,
    /// Holders per chain.
    pub depth: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            width: CACHE_WIDTH,
            depth: CACHE_DEPTH,
        }
    }
}

/// Interpreter budgets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Per-frame tick budget.
    pub method_ticks: i64,
    /// Per-frame tick budget while running paused tasks.
    pub paused_method_ticks: i64,
    /// Maximum call depth before `~maxdepth`.
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            method_ticks: METHOD_TICKS,
            paused_method_ticks: PAUSED_METHOD_TICKS,
            max_call_depth: MAX_CALL_DEPTH,
        }
    }
}

/// Working-directory layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirConfig {
    /// Canonical binary database (index + objects + names).
    pub binary: PathBuf,
    /// Backup copy of the binary database.
    pub backup: PathBuf,
    /// Output file of the text-dump operator.
    pub textdump: PathBuf,
    /// Host scripts runnable by `run_script`.
    pub scripts: PathBuf,
    /// Files echoable by `echo_file`.
    pub text: PathBuf,
}

impl Default for DirConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("binary"),
            backup: PathBuf::from("backup"),
            textdump: PathBuf::from("textdump"),
            scripts: PathBuf::from("scripts"),
            text: PathBuf::from("text"),
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Initial heartbeat frequency in seconds; `None` disables the heartbeat
    /// until a method calls `set_heartbeat_freq`.
    pub heartbeat_freq: Option<u64>,
    pub cache: CacheConfig,
    pub vm: VmConfig,
    pub dirs: DirConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_compiled_constants() {
        let config = Config::default();
        assert_eq!(config.cache.width, CACHE_WIDTH);
        assert_eq!(config.cache.depth, CACHE_DEPTH);
        assert_eq!(config.vm.method_ticks, METHOD_TICKS);
        assert_eq!(config.vm.max_call_depth, MAX_CALL_DEPTH);
        assert!(config.heartbeat_freq.is_none());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            heartbeat_freq = 30

            [cache]
            width = 7
            "#,
        )
        .expect("config should parse");
        assert_eq!(config.heartbeat_freq, Some(30));
        assert_eq!(config.cache.width, 7);
        assert_eq!(config.cache.depth, CACHE_DEPTH);
        assert_eq!(config.vm.paused_method_ticks, PAUSED_METHOD_TICKS);
    }
}
