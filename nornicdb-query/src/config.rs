//! Process-wide configuration surface for the query engine.

use crate::mode::ExecutorMode;
use std::str::FromStr;
use std::time::Duration;

/// Bounds for the Hybrid executor's background AST cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AstCacheConfig {
    pub max_entries: usize,
}

impl Default for AstCacheConfig {
    fn default() -> Self {
        Self { max_entries: 256 }
    }
}

/// Top-level configuration: executor mode plus cache sizing.
///
/// Read once at startup from environment variables (`NORNICDB_EXECUTOR_MODE`,
/// `NORNICDB_AST_CACHE_MAX_ENTRIES`, `NORNICDB_ANALYZER_CACHE_ENABLED`,
/// `NORNICDB_QUERY_DEFAULT_DEADLINE_MS`), with [`Default`] values used for
/// anything unset or unparsable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub executor_mode: ExecutorMode,
    pub ast_cache: AstCacheConfig,
    /// Whether `analyzer::analyze`'s per-query signal computation may be
    /// served from a cache keyed on query text. Off by default: the
    /// analyzer is already cheap relative to execution, and caching adds a
    /// staleness hazard with no measured benefit in this corpus.
    pub analyzer_cache_enabled: bool,
    /// Upper bound on how long a query may run before [`crate::cancellation::CancellationToken`]
    /// reports it cancelled, applied when a caller doesn't supply its own
    /// deadline. `None` means no default limit.
    pub query_default_deadline: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            executor_mode: ExecutorMode::default(),
            ast_cache: AstCacheConfig::default(),
            analyzer_cache_enabled: false,
            query_default_deadline: None,
        }
    }
}

impl Config {
    /// Builds a [`Config`] from environment variables, falling back to
    /// defaults (with a logged warning) on anything unset or malformed.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(mode) = std::env::var("NORNICDB_EXECUTOR_MODE") {
            config.executor_mode = ExecutorMode::from_str(&mode).unwrap_or_default();
        }
        if let Ok(max_entries) = std::env::var("NORNICDB_AST_CACHE_MAX_ENTRIES") {
            match max_entries.parse::<usize>() {
                Ok(n) if n > 0 => config.ast_cache.max_entries = n,
                _ => log::warn!(
                    "nornicdb: ignoring invalid NORNICDB_AST_CACHE_MAX_ENTRIES={max_entries}"
                ),
            }
        }
        if let Ok(enabled) = std::env::var("NORNICDB_ANALYZER_CACHE_ENABLED") {
            match enabled.parse::<bool>() {
                Ok(b) => config.analyzer_cache_enabled = b,
                Err(_) => log::warn!(
                    "nornicdb: ignoring invalid NORNICDB_ANALYZER_CACHE_ENABLED={enabled}"
                ),
            }
        }
        if let Ok(ms) = std::env::var("NORNICDB_QUERY_DEFAULT_DEADLINE_MS") {
            match ms.parse::<u64>() {
                Ok(ms) => config.query_default_deadline = Some(Duration::from_millis(ms)),
                Err(_) => log::warn!(
                    "nornicdb: ignoring invalid NORNICDB_QUERY_DEFAULT_DEADLINE_MS={ms}"
                ),
            }
        }
        config
    }

    /// Builds a [`crate::cancellation::CancellationToken`] honoring
    /// `query_default_deadline`, for callers that don't supply their own.
    pub fn default_token(&self) -> crate::cancellation::CancellationToken {
        match self.query_default_deadline {
            Some(d) => crate::cancellation::CancellationToken::with_deadline(
                std::time::Instant::now() + d,
            ),
            None => crate::cancellation::CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_hybrid_with_bounded_cache() {
        let config = Config::default();
        assert_eq!(config.executor_mode, ExecutorMode::Hybrid);
        assert!(config.ast_cache.max_entries > 0);
        assert!(!config.analyzer_cache_enabled);
        assert!(config.query_default_deadline.is_none());
    }

    #[test]
    fn default_token_without_deadline_never_expires_immediately() {
        let config = Config::default();
        assert!(config.default_token().check().is_ok());
    }

    #[test]
    fn default_token_with_deadline_expires() {
        let config = Config {
            query_default_deadline: Some(Duration::from_millis(0)),
            ..Config::default()
        };
        std::thread::sleep(Duration::from_millis(5));
        assert!(config.default_token().check().is_err());
    }
}
