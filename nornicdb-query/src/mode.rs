//! Executor mode selection (`nornic | antlr | hybrid`, default `hybrid`).

use std::str::FromStr;
use std::sync::Arc;

use crate::analyzer::AnalyzerCache;
use crate::hybrid::HybridExecutor;

/// Which execution strategy a [`ExecutorFactory`] dispatches to.
///
/// Fixed for the lifetime of the process that constructs the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorMode {
    /// String-directed fast path operating on `QueryInfo`/`ClauseInfo`.
    Nornic,
    /// AST-walking structured path.
    Antlr,
    /// Runs Nornic synchronously, builds the AST in the background for
    /// LLM-facing introspection. Process default.
    #[default]
    Hybrid,
}

impl FromStr for ExecutorMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "nornic" => ExecutorMode::Nornic,
            "antlr" => ExecutorMode::Antlr,
            "hybrid" => ExecutorMode::Hybrid,
            other => {
                log::warn!("nornicdb: unknown executor mode '{other}', falling back to hybrid");
                ExecutorMode::Hybrid
            }
        })
    }
}

impl std::fmt::Display for ExecutorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutorMode::Nornic => "nornic",
            ExecutorMode::Antlr => "antlr",
            ExecutorMode::Hybrid => "hybrid",
        };
        write!(f, "{s}")
    }
}

/// Selects an executor at process start and holds it fixed for the factory's
/// lifetime. Constructing a `Hybrid` factory spins up the background AST
/// build pool once.
pub struct ExecutorFactory {
    mode: ExecutorMode,
    hybrid: Option<Arc<HybridExecutor>>,
    analyzer_cache: Option<Arc<AnalyzerCache>>,
}

impl ExecutorFactory {
    pub fn new(mode: ExecutorMode) -> Self {
        Self::with_config(crate::config::Config { executor_mode: mode, ..crate::config::Config::default() })
    }

    /// Builds the factory from a full [`crate::config::Config`]: `mode` is
    /// taken from `config.executor_mode`, the Hybrid AST cache is sized from
    /// `config.ast_cache`, and `config.analyzer_cache_enabled` decides
    /// whether repeated identical query text skips re-analysis.
    pub fn with_config(config: crate::config::Config) -> Self {
        let mode = config.executor_mode;
        log::info!("nornicdb: executor mode = {mode}");
        let hybrid = match mode {
            ExecutorMode::Hybrid => Some(Arc::new(HybridExecutor::new(config.ast_cache))),
            _ => None,
        };
        let analyzer_cache = config.analyzer_cache_enabled.then(|| Arc::new(AnalyzerCache::new()));
        Self { mode, hybrid, analyzer_cache }
    }

    pub fn mode(&self) -> ExecutorMode {
        self.mode
    }

    pub fn hybrid(&self) -> Option<&Arc<HybridExecutor>> {
        self.hybrid.as_ref()
    }

    /// Parses, analyzes and runs `cypher` against `snapshot`, dispatching to
    /// whichever backend this factory was constructed with.
    pub fn execute_streaming<'a, S: crate::facade::GraphSnapshot + 'a>(
        &self,
        cypher: &str,
        snapshot: &'a S,
        params: &'a crate::query_api::Params,
    ) -> crate::error::Result<Box<dyn Iterator<Item = crate::error::Result<crate::ast_executor::Row>> + 'a>> {
        match self.mode {
            ExecutorMode::Nornic => {
                let dispatch = crate::nornic::Dispatch::for_query_with_cache(
                    cypher,
                    self.analyzer_cache.as_deref(),
                )?;
                dispatch.execute_streaming(snapshot, params)
            }
            ExecutorMode::Antlr => {
                let prepared = crate::query_api::prepare(cypher)?;
                let rows: Vec<_> = prepared.execute_streaming(snapshot, params).collect();
                Ok(Box::new(rows.into_iter()))
            }
            ExecutorMode::Hybrid => self
                .hybrid
                .as_ref()
                .expect("hybrid executor constructed for Hybrid mode")
                .execute_streaming(cypher, snapshot, params),
        }
    }

    /// Parses, analyzes and runs `cypher` as a write query against `snapshot`
    /// and `txn`, dispatching to whichever backend this factory was
    /// constructed with.
    pub fn execute_write<S: crate::facade::GraphSnapshot>(
        &self,
        cypher: &str,
        snapshot: &S,
        txn: &mut impl crate::ast_executor::WriteableGraph,
        params: &crate::query_api::Params,
    ) -> crate::error::Result<u32> {
        match self.mode {
            ExecutorMode::Nornic => {
                let dispatch = crate::nornic::Dispatch::for_query_with_cache(
                    cypher,
                    self.analyzer_cache.as_deref(),
                )?;
                dispatch.execute_write(snapshot, txn, params)
            }
            ExecutorMode::Antlr => {
                let prepared = crate::query_api::prepare(cypher)?;
                prepared.execute_write(snapshot, txn, params)
            }
            ExecutorMode::Hybrid => self
                .hybrid
                .as_ref()
                .expect("hybrid executor constructed for Hybrid mode")
                .execute_write(cypher, snapshot, txn, params),
        }
    }
}

impl Default for ExecutorFactory {
    fn default() -> Self {
        Self::new(ExecutorMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_modes_case_insensitively() {
        assert_eq!("Nornic".parse::<ExecutorMode>().unwrap(), ExecutorMode::Nornic);
        assert_eq!("ANTLR".parse::<ExecutorMode>().unwrap(), ExecutorMode::Antlr);
        assert_eq!("hybrid".parse::<ExecutorMode>().unwrap(), ExecutorMode::Hybrid);
    }

    #[test]
    fn unknown_mode_falls_back_to_hybrid() {
        assert_eq!("bogus".parse::<ExecutorMode>().unwrap(), ExecutorMode::Hybrid);
    }

    #[test]
    fn factory_exposes_mode() {
        let factory = ExecutorFactory::new(ExecutorMode::Nornic);
        assert_eq!(factory.mode(), ExecutorMode::Nornic);
        assert!(factory.hybrid().is_none());
    }

    #[test]
    fn nornic_factory_runs_bare_return() {
        let dir = tempfile::tempdir().unwrap();
        let db = nornicdb::Db::open(dir.path()).unwrap();
        let snapshot = db.snapshot();
        let factory = ExecutorFactory::new(ExecutorMode::Nornic);
        let params = crate::query_api::Params::new();
        let rows: Vec<_> = factory
            .execute_streaming("RETURN 1", &snapshot, &params)
            .unwrap()
            .collect();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn antlr_factory_runs_bare_return() {
        let dir = tempfile::tempdir().unwrap();
        let db = nornicdb::Db::open(dir.path()).unwrap();
        let snapshot = db.snapshot();
        let factory = ExecutorFactory::new(ExecutorMode::Antlr);
        let params = crate::query_api::Params::new();
        let rows: Vec<_> = factory
            .execute_streaming("RETURN 1", &snapshot, &params)
            .unwrap()
            .collect();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn analyzer_cache_enabled_reuses_info_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let db = nornicdb::Db::open(dir.path()).unwrap();
        let snapshot = db.snapshot();
        let factory = ExecutorFactory::with_config(crate::config::Config {
            executor_mode: ExecutorMode::Nornic,
            analyzer_cache_enabled: true,
            ..crate::config::Config::default()
        });
        let params = crate::query_api::Params::new();
        for _ in 0..2 {
            let rows: Vec<_> = factory
                .execute_streaming("RETURN 1", &snapshot, &params)
                .unwrap()
                .collect();
            assert_eq!(rows.len(), 1);
        }
        assert!(factory.analyzer_cache.as_ref().unwrap().get_or_analyze(
            "RETURN 1",
            &crate::ast::Query { clauses: vec![] }
        ).has_return);
    }

    #[test]
    fn hybrid_factory_runs_bare_return() {
        let dir = tempfile::tempdir().unwrap();
        let db = nornicdb::Db::open(dir.path()).unwrap();
        let snapshot = db.snapshot();
        let factory = ExecutorFactory::new(ExecutorMode::Hybrid);
        let params = crate::query_api::Params::new();
        let rows: Vec<_> = factory
            .execute_streaming("RETURN 1", &snapshot, &params)
            .unwrap()
            .collect();
        assert_eq!(rows.len(), 1);
    }
}
