//! The Hybrid executor: Nornic's synchronous fast path plus a background
//! job that builds and caches the full AST for every query it sees, so a
//! later consumer (the Heimdall cognitive subsystem's introspection, not
//! implemented by this crate) can inspect a query's structure without
//! paying parse cost on the hot path.
//!
//! The default [`crate::mode::ExecutorMode`]. A query never waits on the
//! background build: [`HybridExecutor::execute_streaming`] queues the build
//! and returns Nornic's result immediately. The build runs on a small fixed
//! worker pool (a bounded channel between the foreground executor and N
//! background workers); a full queue drops the oldest pending build rather
//! than blocking the foreground.

use crate::ast::Query;
use crate::cancellation::CancellationToken;
use crate::config::AstCacheConfig;
use crate::error::Result;
use crate::facade::GraphSnapshot;
use crate::query_api::Params;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::{Arc, Mutex};

/// Background AST-build workers spun up once per [`HybridExecutor`].
const WORKER_POOL_SIZE: usize = 4;

/// Bounded, insertion-order cache from query text to its parsed AST.
/// Oldest entry evicted first on overflow — a simple recency
/// approximation, not a true LRU (no access-time bump on `get`).
struct AstCache {
    max_entries: usize,
    entries: Mutex<VecDeque<(String, Arc<Query>)>>,
}

impl AstCache {
    fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn get(&self, text: &str) -> Option<Arc<Query>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| key == text)
            .map(|(_, query)| query.clone())
    }

    fn insert(&self, text: String, query: Arc<Query>) {
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|(key, _)| *key == text) {
            return;
        }
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back((text, query));
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Wraps the Nornic fast path and a one-worker background AST builder.
pub struct HybridExecutor {
    cache: Arc<AstCache>,
    sender: mpsc::SyncSender<String>,
    queue_full_warned: AtomicBool,
}

impl HybridExecutor {
    pub fn new(config: AstCacheConfig) -> Self {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// Builds the executor with a shared [`CancellationToken`] consulted by
    /// every background worker before it starts each build. A query already
    /// dequeued finishes its build; only queued-but-not-yet-started builds
    /// are skipped once the token fires.
    pub fn with_cancellation(config: AstCacheConfig, token: CancellationToken) -> Self {
        let cache = Arc::new(AstCache::new(config.max_entries));
        let (sender, receiver) = mpsc::sync_channel::<String>(64);
        let receiver = Arc::new(Mutex::new(receiver));
        for _ in 0..WORKER_POOL_SIZE {
            let worker_cache = cache.clone();
            let receiver = receiver.clone();
            let token = token.clone();
            std::thread::spawn(move || {
                loop {
                    let text = match receiver.lock().unwrap().recv() {
                        Ok(text) => text,
                        Err(_) => break,
                    };
                    if token.check().is_err() {
                        continue;
                    }
                    match crate::parser::Parser::parse(&text) {
                        Ok(query) => worker_cache.insert(text, Arc::new(query)),
                        Err(e) => log::warn!("nornicdb: hybrid AST cache build failed: {e}"),
                    }
                }
            });
        }
        Self {
            cache,
            sender,
            queue_full_warned: AtomicBool::new(false),
        }
    }

    /// Runs `cypher` through Nornic and queues a background AST build for
    /// the same text. Never blocks on the build.
    pub fn execute_streaming<'a, S: GraphSnapshot + 'a>(
        &self,
        cypher: &str,
        snapshot: &'a S,
        params: &'a Params,
    ) -> Result<Box<dyn Iterator<Item = Result<crate::ast_executor::Row>> + 'a>> {
        self.queue_ast_build(cypher);
        crate::nornic::execute_streaming(cypher, snapshot, params)
    }

    /// As [`HybridExecutor::execute_streaming`], but checks `token` at every
    /// row boundary and yields [`crate::error::Error::Cancelled`] once the
    /// caller cancels.
    pub fn execute_streaming_cancellable<'a, S: GraphSnapshot + 'a>(
        &self,
        cypher: &str,
        snapshot: &'a S,
        params: &'a Params,
        token: CancellationToken,
    ) -> Result<Box<dyn Iterator<Item = Result<crate::ast_executor::Row>> + 'a>> {
        self.queue_ast_build(cypher);
        let rows = crate::nornic::execute_streaming(cypher, snapshot, params)?;
        let mut cancelled = false;
        Ok(Box::new(rows.map(move |row| {
            if cancelled {
                return Err(crate::error::Error::Cancelled);
            }
            if let Err(e) = token.check() {
                cancelled = true;
                return Err(e);
            }
            row
        })))
    }

    /// Runs `cypher` as a write query and queues a background AST build for
    /// the same text.
    pub fn execute_write<S: GraphSnapshot>(
        &self,
        cypher: &str,
        snapshot: &S,
        txn: &mut impl crate::ast_executor::WriteableGraph,
        params: &Params,
    ) -> Result<u32> {
        self.queue_ast_build(cypher);
        crate::nornic::execute_write(cypher, snapshot, txn, params)
    }

    /// Returns the cached AST for `cypher`, if the background build has
    /// completed for it.
    pub fn cached_ast(&self, cypher: &str) -> Option<Arc<Query>> {
        self.cache.get(cypher)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn queue_ast_build(&self, cypher: &str) {
        if self.cache.get(cypher).is_some() {
            return;
        }
        match self.sender.try_send(cypher.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if !self.queue_full_warned.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "nornicdb: hybrid AST cache build queue full, dropping pending build"
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ast_cache_evicts_oldest_on_overflow() {
        let cache = AstCache::new(2);
        let q = || Arc::new(Query { clauses: vec![] });
        cache.insert("a".to_string(), q());
        cache.insert("b".to_string(), q());
        cache.insert("c".to_string(), q());
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn ast_cache_ignores_duplicate_insert() {
        let cache = AstCache::new(4);
        let q = || Arc::new(Query { clauses: vec![] });
        cache.insert("a".to_string(), q());
        cache.insert("a".to_string(), q());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn executor_builds_and_caches_ast_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let db = nornicdb::Db::open(dir.path()).unwrap();
        let snapshot = db.snapshot();

        let executor = HybridExecutor::new(AstCacheConfig { max_entries: 16 });
        let params = Params::new();
        let rows: Vec<_> = executor
            .execute_streaming("RETURN 1", &snapshot, &params)
            .unwrap()
            .collect();
        assert!(!rows.is_empty());

        for _ in 0..50 {
            if executor.cached_ast("RETURN 1").is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(executor.cached_ast("RETURN 1").is_some());
    }
}
