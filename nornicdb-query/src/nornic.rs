//! The Nornic executor: the string-directed fast path.
//!
//! Rather than walk a retained AST, this module dispatches on
//! [`crate::analyzer::QueryInfo`] and [`crate::clause_extractor::ClauseInfo`]
//! — signals cheap enough to fall out of one combined pass over the query
//! text — and rebuilds each clause it needs from `ClauseInfo`'s rendered
//! content fields via a small fragment parser
//! ([`crate::parser::parse_clause_fragment`]) rather than by retaining the
//! whole-query tree `query_api::prepare` builds. The rebuilt clauses are
//! compiled to a throwaway `Plan` and run through the same row-production
//! primitives [`crate::ast_executor`] uses for the Antlr path
//! (`execute_plan`/`execute_write`) — this executor's distinct contribution
//! is the dispatch and the per-call, never-cached compilation, not a second
//! hand-rolled execution engine living alongside the first.
//!
//! `SHOW`/`DROP` DDL and bare `CALL` carry no renderable `ClauseInfo`
//! fragments (the extractor has no fields for schema statements), so those
//! two routes fall back to a fresh whole-text parse. Unlike
//! [`crate::query_api::prepare`], nothing here is ever kept around across
//! calls: every [`Dispatch`] rebuilds and drops its plan on each execution.

use crate::analyzer::{FirstClause, QueryInfo};
use crate::ast::{Clause, Query};
use crate::ast_executor::{Row, WriteableGraph, execute_plan};
use crate::clause_extractor::ClauseInfo;
use crate::error::{Error, Result};
use crate::facade::GraphSnapshot;
use crate::parser::{MergeSubclauses, parse_clause_fragment};
use crate::query_api::{CompiledQuery, Params, WriteSemantics, compile_m3_plan};
use std::collections::VecDeque;

/// The dispatch decision Nornic reaches after inspecting a query's signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `SHOW ...` / schema DDL: no pattern matching, handled by the schema
    /// catalog directly.
    Ddl,
    /// `CALL` of a procedure, with or without a surrounding read/write.
    Procedure,
    /// A bare `CREATE` with no preceding `MATCH`: pure insert, no snapshot
    /// read required before the write.
    Insert,
    /// A `MERGE` with no preceding `MATCH`: read-or-create, single pattern.
    Merge,
    /// Everything else: the general match/filter/project/aggregate/order
    /// pipeline.
    Pipeline,
}

/// Chooses a [`Route`] from a query's analyzed signals. Pure and infallible:
/// every `QueryInfo` maps to exactly one route.
pub fn route(info: &QueryInfo) -> Route {
    if matches!(info.first_clause, FirstClause::Show | FirstClause::Drop) || info.has_schema {
        Route::Ddl
    } else if info.has_call && !info.has_match && !info.has_optional_match {
        Route::Procedure
    } else if matches!(info.first_clause, FirstClause::Create) && !info.has_match && !info.has_optional_match {
        Route::Insert
    } else if matches!(info.first_clause, FirstClause::Merge) && !info.has_match && !info.has_optional_match {
        Route::Merge
    } else {
        Route::Pipeline
    }
}

/// Rebuilds the clause sequence Nornic needs from `clauses`' rendered
/// fragments, re-parsing each one independently rather than walking a tree
/// parsed from the original multi-clause text.
fn rebuild_clauses(clauses: &ClauseInfo) -> Result<(Vec<Clause>, VecDeque<MergeSubclauses>)> {
    let mut parts = Vec::new();
    let mut merge_subclauses = VecDeque::new();

    for om in &clauses.optional_matches {
        parts.push(parse_clause_fragment(om)?);
    }
    if let Some(mf) = &clauses.match_full {
        parts.push(parse_clause_fragment(mf)?);
    }
    if clauses.with_items.is_none()
        && let Some(cond) = &clauses.where_condition
    {
        parts.push(parse_clause_fragment(&format!("WHERE {cond}"))?);
    }
    if let Some(cf) = &clauses.create_full {
        parts.push(parse_clause_fragment(cf)?);
    }
    for (i, mp) in clauses.merge_patterns.iter().enumerate() {
        parts.push(parse_clause_fragment(&format!("MERGE {mp}"))?);
        // `ClauseInfo` only tracks ON CREATE/ON MATCH SET for the first
        // MERGE in a query (see `clause_extractor::extract_text`), so every
        // later MERGE in the rebuilt sequence gets an empty subclause slot.
        let mut sub = MergeSubclauses::default();
        if i == 0 {
            if let Some(oc) = &clauses.on_create_set
                && let Clause::Set(s) = parse_clause_fragment(&format!("SET {oc}"))?
            {
                sub.on_create.push(s);
            }
            if let Some(om) = &clauses.on_match_set
                && let Clause::Set(s) = parse_clause_fragment(&format!("SET {om}"))?
            {
                sub.on_match.push(s);
            }
        }
        merge_subclauses.push_back(sub);
    }
    if let Some(sa) = &clauses.set_assignments {
        parts.push(parse_clause_fragment(&format!("SET {sa}"))?);
    }
    if let Some(ri) = &clauses.remove_items {
        parts.push(parse_clause_fragment(&format!("REMOVE {ri}"))?);
    }
    if let Some(dt) = &clauses.delete_targets {
        let kw = if clauses.detach_delete { "DETACH DELETE" } else { "DELETE" };
        parts.push(parse_clause_fragment(&format!("{kw} {dt}"))?);
    }
    if let (Some(expr), Some(alias)) = (&clauses.unwind_expr, &clauses.unwind_as) {
        parts.push(parse_clause_fragment(&format!("UNWIND {expr} AS {alias}"))?);
    }
    if let Some(proc) = &clauses.call_procedure {
        parts.push(parse_clause_fragment(&format!("CALL {proc}"))?);
    }

    // `ClauseInfo` keeps one slot each for ORDER BY/SKIP/LIMIT, regardless
    // of whether the original query hung them off WITH or RETURN; a query
    // using both loses the earlier clause's copy the same way it already
    // does upstream in `clause_extractor::extract`. We attribute them to
    // RETURN when present, else WITH.
    if clauses.return_items.is_none()
        && let Some(wi) = &clauses.with_items
    {
        parts.push(parse_clause_fragment(&with_text(wi, clauses))?);
    }
    if let Some(ri) = &clauses.return_items {
        parts.push(parse_clause_fragment(&return_text(ri, clauses))?);
    }

    Ok((parts, merge_subclauses))
}

fn with_text(items: &str, c: &ClauseInfo) -> String {
    let mut s = format!("WITH {items}");
    if let Some(w) = &c.where_condition {
        s.push_str(&format!(" WHERE {w}"));
    }
    append_order_skip_limit(&mut s, c);
    s
}

fn return_text(items: &str, c: &ClauseInfo) -> String {
    let mut s = format!("RETURN {items}");
    append_order_skip_limit(&mut s, c);
    s
}

fn append_order_skip_limit(s: &mut String, c: &ClauseInfo) {
    if let Some(o) = &c.order_by_items {
        s.push_str(&format!(" ORDER BY {o}"));
    }
    if let Some(sk) = &c.skip_value {
        s.push_str(&format!(" SKIP {sk}"));
    }
    if let Some(l) = &c.limit_value {
        s.push_str(&format!(" LIMIT {l}"));
    }
}

/// Re-derives a compiled plan for `route`/`clauses`/`cypher`. `Ddl` and
/// `Procedure` have no `ClauseInfo` fragments to rebuild from (schema
/// statements aren't tracked there), so they fall back to a fresh parse of
/// the whole text; every other route rebuilds from fragments.
fn compile_for(route: Route, cypher: &str, clauses: &ClauseInfo) -> Result<CompiledQuery> {
    match route {
        Route::Ddl | Route::Procedure => {
            let (query, mut errors) = crate::parser::Parser::parse_recovering(cypher);
            if let Some(first) = errors.drain(..).next() {
                return Err(Error::Parse(first.message));
            }
            compile_m3_plan(query, &mut VecDeque::new(), None)
        }
        Route::Insert | Route::Merge | Route::Pipeline => {
            let (parts, mut merge_subclauses) = rebuild_clauses(clauses)?;
            compile_m3_plan(Query { clauses: parts }, &mut merge_subclauses, None)
        }
    }
}

/// One query's analyzed signals, ready to execute. Building this separately
/// from [`execute_streaming`]/[`execute_write`] lets a caller inspect
/// `route`/`info`/`clauses` (for logging, tracing, or the Hybrid executor's
/// background AST-cache decision) before running the query.
pub struct Dispatch {
    pub route: Route,
    pub info: QueryInfo,
    pub clauses: ClauseInfo,
    cypher: String,
}

impl Dispatch {
    pub fn for_query(cypher: &str) -> Result<Self> {
        Self::for_query_with_cache(cypher, None)
    }

    /// As [`Dispatch::for_query`], but serves the `QueryInfo` analysis from
    /// `cache` when given one, instead of always recomputing it.
    pub fn for_query_with_cache(
        cypher: &str,
        cache: Option<&crate::analyzer::AnalyzerCache>,
    ) -> Result<Self> {
        let (tree, _errors) = crate::parser::Parser::parse_recovering(cypher);
        let info = match cache {
            Some(cache) => (*cache.get_or_analyze(cypher, &tree)).clone(),
            None => crate::analyzer::analyze(cypher, &tree),
        };
        let clauses = crate::extract_clauses(cypher)?;
        let route = route(&info);
        Ok(Self {
            route,
            info,
            clauses,
            cypher: cypher.to_string(),
        })
    }

    /// Rebuilds and compiles a throwaway plan, then runs it to completion.
    /// Rows are collected eagerly rather than streamed lazily: the plan is
    /// local to this call and would otherwise have to outlive the returned
    /// iterator, which is exactly the per-execution, nothing-retained
    /// contract this executor is built around.
    pub fn execute_streaming<'a, S: GraphSnapshot + 'a>(
        &self,
        snapshot: &'a S,
        params: &'a Params,
    ) -> Result<Box<dyn Iterator<Item = Result<Row>> + 'a>> {
        let compiled = compile_for(self.route, &self.cypher, &self.clauses)?;
        let rows: Vec<Result<Row>> = execute_plan(snapshot, &compiled.plan, params).collect();
        Ok(Box::new(rows.into_iter()))
    }

    pub fn execute_write<S: GraphSnapshot>(
        &self,
        snapshot: &S,
        txn: &mut impl WriteableGraph,
        params: &Params,
    ) -> Result<u32> {
        let compiled = compile_for(self.route, &self.cypher, &self.clauses)?;
        match compiled.write {
            WriteSemantics::Default => crate::ast_executor::execute_write(&compiled.plan, snapshot, txn, params),
            WriteSemantics::Merge => crate::ast_executor::execute_merge(
                &compiled.plan,
                snapshot,
                txn,
                params,
                &compiled.merge_on_create_items,
                &compiled.merge_on_match_items,
            ),
        }
    }
}

/// Parses, analyzes and runs `cypher` as a read query in one call.
pub fn execute_streaming<'a, S: GraphSnapshot + 'a>(
    cypher: &str,
    snapshot: &'a S,
    params: &'a Params,
) -> Result<Box<dyn Iterator<Item = Result<Row>> + 'a>> {
    Dispatch::for_query(cypher)?.execute_streaming(snapshot, params)
}

/// Parses, analyzes and runs `cypher` as a write query in one call.
pub fn execute_write<S: GraphSnapshot>(
    cypher: &str,
    snapshot: &S,
    txn: &mut impl WriteableGraph,
    params: &Params,
) -> Result<u32> {
    Dispatch::for_query(cypher)?.execute_write(snapshot, txn, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_for(cypher: &str) -> QueryInfo {
        crate::analyze(cypher).expect("analyze")
    }

    #[test]
    fn show_routes_to_ddl() {
        assert_eq!(route(&info_for("SHOW INDEXES")), Route::Ddl);
    }

    #[test]
    fn bare_create_routes_to_insert() {
        assert_eq!(route(&info_for("CREATE (n:Person)")), Route::Insert);
    }

    #[test]
    fn bare_merge_routes_to_merge() {
        assert_eq!(route(&info_for("MERGE (n:Person {id: 1})")), Route::Merge);
    }

    #[test]
    fn match_then_create_routes_to_pipeline() {
        assert_eq!(
            route(&info_for("MATCH (a) CREATE (a)-[:1]->(b)")),
            Route::Pipeline
        );
    }

    #[test]
    fn bare_call_routes_to_procedure() {
        assert_eq!(route(&info_for("CALL db.labels() YIELD label RETURN label")), Route::Procedure);
    }

    #[test]
    fn plain_match_routes_to_pipeline() {
        assert_eq!(route(&info_for("MATCH (n) RETURN n")), Route::Pipeline);
    }

    #[test]
    fn rebuild_clauses_reparses_match_where_return_independently() {
        let clauses = crate::extract_clauses("MATCH (n:Person) WHERE n.age > 30 RETURN n.name AS name")
            .expect("extract");
        let (parts, _) = rebuild_clauses(&clauses).expect("rebuild");
        assert!(matches!(parts[0], Clause::Match(_)));
        assert!(matches!(parts[1], Clause::Where(_)));
        assert!(matches!(parts[2], Clause::Return(_)));
    }

    #[test]
    fn execute_streaming_runs_bare_return() {
        let dir = tempfile::tempdir().unwrap();
        let db = nornicdb::Db::open(dir.path()).unwrap();
        let snapshot = db.snapshot();
        let rows: Vec<_> = execute_streaming("RETURN 1", &snapshot, &Params::new())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn execute_streaming_runs_match_where_return_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let db = nornicdb::Db::open(dir.path()).unwrap();
        {
            let mut txn = db.begin_write();
            execute_write("CREATE (n {age: 40})", &db.snapshot(), &mut txn, &Params::new()).unwrap();
            txn.commit().unwrap();
        }
        let snapshot = db.snapshot();
        let rows: Vec<_> =
            execute_streaming("MATCH (n) WHERE n.age > 30 RETURN n.age AS age", &snapshot, &Params::new())
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
