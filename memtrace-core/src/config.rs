//! File-based configuration for the engine, loaded once at
//! `initialize_from_python` time. A missing or unparseable file degrades to
//! built-in defaults rather than failing construction -- the engine must be
//! usable even when nobody has bothered to write a config file.

use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/memtrace/memtrace.toml";
const ENV_CONFIG_PATH: &str = "MEMTRACE_CONFIG";

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory `dump_peak` writes the flamegraph and raw line-format
    /// output to when the host doesn't pass an explicit path.
    pub default_output_dir: String,
    /// Whether `posix_memalign`/`aligned_alloc` are wrapped at all. Some
    /// allocators replace these with inline implementations that don't
    /// reach our symbol, so disabling lets an operator avoid double
    /// counting if that's ever observed.
    pub track_aligned_allocations: bool,
    /// Bytes of spare memory reserved at startup so the ledger-OOM path has
    /// something to free before it tries to write a diagnostic.
    pub oom_reserve_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_output_dir: "/tmp".to_string(),
            track_aligned_allocations: true,
            oom_reserve_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from `MEMTRACE_CONFIG`, or
    /// `/etc/memtrace/memtrace.toml` if unset. Any failure to read or parse
    /// the file is swallowed in favor of [`Config::default`].
    pub fn load() -> Self {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.default_output_dir, "/tmp");
        assert!(cfg.track_aligned_allocations);
        assert!(cfg.oom_reserve_bytes > 0);
    }

    #[test]
    fn missing_env_and_file_falls_back_to_defaults() {
        // SAFETY: test runs single-threaded within this process w.r.t. this
        // specific env var; no other test touches MEMTRACE_CONFIG.
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
        assert_eq!(Config::load(), Config::default());
    }

    #[test]
    fn partial_toml_fills_in_missing_fields_from_defaults() {
        let parsed: Config = toml::from_str("default_output_dir = \"/var/tmp/prof\"").unwrap();
        assert_eq!(parsed.default_output_dir, "/var/tmp/prof");
        assert!(parsed.track_aligned_allocations);
    }
}
