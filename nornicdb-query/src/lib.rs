//! NornicDB Query Engine
//!
//! Provides Cypher query parsing, planning, and execution for NornicDB.
//!
//! # Quick Start
//!
//! ```ignore
//! use nornicdb_query::{prepare, Params};
//!
//! let query = prepare("MATCH (n)-[:1]->(m) RETURN n, m LIMIT 10").unwrap();
//! let rows: Vec<_> = query
//!     .execute_streaming(&snapshot, &Params::new())
//!     .collect::<Result<_>>()
//!     .unwrap();
//! ```
//!
//! # Supported Cypher (v2 M3)
//!
//! - `RETURN 1` - Constant return
//! - `MATCH (n)-[:<u32>]->(m) RETURN n, m LIMIT k` - Single-hop pattern match
//! - `MATCH (n)-[:<u32>]->(m) WHERE n.prop = 'value' RETURN n, m` - With WHERE filter
//! - `CREATE (n)` / `CREATE (n {k: v})` - Create nodes
//! - `CREATE (a)-[:1]->(b)` - Create edges
//! - `MATCH (n)-[:1]->(m) DELETE n` / `DETACH DELETE n` - Delete nodes/edges
//! - `EXPLAIN <query>` - Show compiled plan (no execution)
//!
//! # Architecture
//!
//! - `parser::Parser` - Parses Cypher syntax into AST
//! - `ast_executor::execute_plan` - Streams results from plan
//! - `evaluator` - Evaluates expressions (WHERE, RETURN)

pub mod analyzer;
pub mod ast;
pub mod ast_executor;
pub mod cancellation;
pub mod clause_extractor;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod facade;
pub mod functions;
pub mod hybrid;
pub mod lexer;
pub mod materializer;
pub mod mode;
pub mod nornic;
pub mod parser;
pub mod query_api;

pub use analyzer::{AnalyzerCache, QueryInfo};
pub use cancellation::CancellationToken;
pub use ast_executor::{Row, Value, WriteableGraph};
pub use clause_extractor::ClauseInfo;
pub use error::{Error, Result};
pub use facade::{
    EdgeKey, ExternalId, GraphSnapshot, GraphStore, InternalNodeId, LabelId, PropertyValue,
    QueryExt, RelTypeId, query_collect,
};
pub use config::Config;
pub use mode::{ExecutorFactory, ExecutorMode};
pub use parser::ParseError;
pub use query_api::{Params, PreparedQuery, prepare};

/// Parses a Cypher query string into an AST.
///
/// This is a low-level API. Most users should use [`prepare()`] instead,
/// which handles both parsing and planning.
pub fn parse(cypher: &str) -> Result<ast::Query> {
    parser::Parser::parse(cypher)
}

/// Produces [`QueryInfo`] for `cypher` without executing it.
///
/// Best-effort: a syntax error inside one clause does not fail the whole
/// call. [`parser::Parser::parse_recovering`] recovers to the next clause
/// boundary, so `analyze` still returns signals for whatever parsed cleanly.
/// Callers that need a fully valid AST (or the recovered errors) should use
/// [`parser::Parser::parse_recovering`]/[`parse`] directly.
pub fn analyze(cypher: &str) -> Result<QueryInfo> {
    let (tree, _errors) = parser::Parser::parse_recovering(cypher);
    Ok(analyzer::analyze(cypher, &tree))
}

/// Produces [`ClauseInfo`] for `cypher` without executing it. Best-effort,
/// same recovery contract as [`analyze`].
pub fn extract_clauses(cypher: &str) -> Result<ClauseInfo> {
    Ok(clause_extractor::extract_text_recovering(cypher))
}
