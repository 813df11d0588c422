//! Single-pass query analysis: produces [`QueryInfo`] from a parsed AST.
//!
//! Distinct from [`crate::clause_extractor`] so the two walks can run
//! concurrently over the same immutable tree (see `query_api::prepare`).

use crate::ast::{CallClause, Clause, NodePattern, PathElement, Pattern, Query, RelationshipPattern};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// The clause a query pre-order-starts with, for dispatch purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstClause {
    Match,
    OptionalMatch,
    Create,
    Merge,
    Delete,
    Set,
    Remove,
    Return,
    With,
    Unwind,
    Call,
    Show,
    Drop,
    #[default]
    Unknown,
}

/// Pure flags/counters derived from a single pre-order walk of the parse tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryInfo {
    pub has_match: bool,
    pub has_optional_match: bool,
    pub has_create: bool,
    pub has_merge: bool,
    pub has_delete: bool,
    pub has_detach_delete: bool,
    pub has_set: bool,
    pub has_remove: bool,
    pub has_return: bool,
    pub has_with: bool,
    pub has_unwind: bool,
    pub has_call: bool,
    pub has_explain: bool,
    pub has_profile: bool,
    pub has_show: bool,
    pub has_schema: bool,
    pub has_union: bool,
    pub has_union_all: bool,
    pub has_shortest_path: bool,
    pub merge_count: u32,
    pub clause_count: u32,
    pub first_clause: FirstClause,
    pub call_is_db_procedure: bool,
    pub labels: Vec<String>,
    pub is_read_only: bool,
    pub is_write_query: bool,
    pub is_schema_query: bool,
    pub is_compound_query: bool,
}

impl QueryInfo {
    pub fn call_is_read_only(&self) -> bool {
        self.has_call && self.call_is_db_procedure
    }
}

/// Process-wide cache from raw query text to its analysis.
///
/// Readers take a shared lock; `clear_cache` is idempotent.
#[derive(Debug, Default)]
pub struct AnalyzerCache {
    entries: RwLock<HashMap<String, Arc<QueryInfo>>>,
}

impl AnalyzerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_analyze(&self, text: &str, tree: &Query) -> Arc<QueryInfo> {
        if let Some(hit) = self.entries.read().unwrap().get(text) {
            return hit.clone();
        }
        let info = Arc::new(analyze(text, tree));
        self.entries
            .write()
            .unwrap()
            .insert(text.to_string(), info.clone());
        info
    }

    pub fn clear_cache(&self) {
        self.entries.write().unwrap().clear();
    }
}

fn push_label(labels: &mut Vec<String>, label: &str) {
    if !labels.iter().any(|l| l == label) {
        labels.push(label.to_string());
    }
}

fn collect_pattern_labels(pattern: &Pattern, labels: &mut Vec<String>) {
    for element in &pattern.elements {
        match element {
            PathElement::Node(NodePattern { labels: ls, .. }) => {
                for l in ls {
                    push_label(labels, l);
                }
            }
            PathElement::Relationship(RelationshipPattern { types, .. }) => {
                for t in types {
                    push_label(labels, t);
                }
            }
        }
    }
}

/// Walks `query` once in pre-order, populating every `QueryInfo` field.
///
/// `text` is the raw (pre-prefix-stripped) query string, consulted only for
/// the `EXPLAIN`/`PROFILE`/`shortestPath` flags that have no AST clause of
/// their own in this implementation. Pure: touches no storage. An empty
/// query yields a zero-valued `QueryInfo`.
pub fn analyze(text: &str, query: &Query) -> QueryInfo {
    let mut info = analyze_tree(query);
    let trimmed = text.trim_start();
    info.has_explain = trimmed.len() >= 7 && trimmed[..7].eq_ignore_ascii_case("explain");
    info.has_profile = trimmed.len() >= 7 && trimmed[..7].eq_ignore_ascii_case("profile");
    let lower = text.to_ascii_lowercase();
    info.has_shortest_path = lower.contains("shortestpath") || lower.contains("allshortestpaths");
    info
}

fn analyze_tree(query: &Query) -> QueryInfo {
    let mut info = QueryInfo::default();
    let mut first_set = false;

    for clause in &query.clauses {
        info.clause_count += 1;
        if !first_set {
            info.first_clause = classify_first(clause);
            first_set = true;
        }

        match clause {
            Clause::Match(m) => {
                if m.optional {
                    info.has_optional_match = true;
                } else {
                    info.has_match = true;
                }
                for p in &m.patterns {
                    collect_pattern_labels(p, &mut info.labels);
                }
            }
            Clause::Create(c) => {
                info.has_create = true;
                for p in &c.patterns {
                    collect_pattern_labels(p, &mut info.labels);
                }
            }
            Clause::Merge(m) => {
                info.has_merge = true;
                info.merge_count += 1;
                collect_pattern_labels(&m.pattern, &mut info.labels);
            }
            Clause::Delete(d) => {
                info.has_delete = true;
                if d.detach {
                    info.has_detach_delete = true;
                }
            }
            Clause::Set(_) => info.has_set = true,
            Clause::Remove(_) => info.has_remove = true,
            Clause::Return(_) => info.has_return = true,
            Clause::With(_) => info.has_with = true,
            Clause::Unwind(_) => info.has_unwind = true,
            Clause::Call(call) => {
                info.has_call = true;
                match call {
                    CallClause::Procedure(proc_call) => {
                        if let Some(first) = proc_call.name.first() {
                            info.call_is_db_procedure = first.eq_ignore_ascii_case("db");
                        }
                    }
                    CallClause::Subquery(sub) => {
                        let nested = analyze_tree(sub);
                        for l in nested.labels {
                            push_label(&mut info.labels, &l);
                        }
                    }
                }
            }
            Clause::Union(u) => {
                info.has_union = true;
                if u.all {
                    info.has_union_all = true;
                }
                let nested = analyze_tree(&u.query);
                for l in nested.labels {
                    push_label(&mut info.labels, &l);
                }
            }
            Clause::Where(_) => {}
            Clause::Foreach(f) => {
                for update in &f.updates {
                    let nested = analyze_tree(&Query {
                        clauses: vec![update.clone()],
                    });
                    info.has_set |= nested.has_set;
                    info.has_create |= nested.has_create;
                    info.has_delete |= nested.has_delete;
                    info.has_remove |= nested.has_remove;
                    for l in nested.labels {
                        push_label(&mut info.labels, &l);
                    }
                }
            }
            Clause::Show(_) => info.has_show = true,
            Clause::Schema(_) => info.has_schema = true,
        }
    }

    info.is_schema_query = info.has_schema;
    info.is_write_query = info.has_create
        || info.has_merge
        || info.has_delete
        || info.has_set
        || info.has_remove
        || info.has_schema;
    info.is_read_only = !info.is_write_query;
    info.is_compound_query = info.clause_count > 1 || info.merge_count > 1;

    info
}

fn classify_first(clause: &Clause) -> FirstClause {
    match clause {
        Clause::Match(m) if m.optional => FirstClause::OptionalMatch,
        Clause::Match(_) => FirstClause::Match,
        Clause::Create(_) => FirstClause::Create,
        Clause::Merge(_) => FirstClause::Merge,
        Clause::Delete(_) => FirstClause::Delete,
        Clause::Set(_) => FirstClause::Set,
        Clause::Remove(_) => FirstClause::Remove,
        Clause::Return(_) => FirstClause::Return,
        Clause::With(_) => FirstClause::With,
        Clause::Unwind(_) => FirstClause::Unwind,
        Clause::Call(_) => FirstClause::Call,
        Clause::Show(_) => FirstClause::Show,
        Clause::Schema(s) if s.action == crate::ast::SchemaAction::Drop => FirstClause::Drop,
        Clause::Schema(_) => FirstClause::Show,
        _ => FirstClause::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn info_for(cypher: &str) -> QueryInfo {
        let query = Parser::parse(cypher).expect("parse");
        analyze(cypher, &query)
    }

    #[test]
    fn empty_query_is_zero_valued() {
        let info = analyze("", &Query { clauses: vec![] });
        assert_eq!(info, QueryInfo::default());
    }

    #[test]
    fn match_sets_flags_and_read_only() {
        let info = info_for("MATCH (n:Person) RETURN n");
        assert!(info.has_match);
        assert!(info.has_return);
        assert!(info.is_read_only);
        assert!(!info.is_write_query);
        assert_eq!(info.first_clause, FirstClause::Match);
        assert_eq!(info.labels, vec!["Person".to_string()]);
    }

    #[test]
    fn optional_match_does_not_set_has_match() {
        let info = info_for("OPTIONAL MATCH (n) RETURN n");
        assert!(info.has_optional_match);
        assert!(!info.has_match);
    }

    #[test]
    fn merge_count_drives_compound_query() {
        let info = info_for("MERGE (a) MERGE (b)");
        assert_eq!(info.merge_count, 2);
        assert!(info.is_compound_query);
        assert!(info.is_write_query);
    }

    #[test]
    fn db_procedure_call_is_flagged() {
        let info = info_for("CALL db.labels() YIELD label RETURN label");
        assert!(info.has_call);
        assert!(info.call_is_db_procedure);
        assert!(info.call_is_read_only());
    }

    #[test]
    fn cache_returns_identical_info() {
        let cache = AnalyzerCache::new();
        let query = Parser::parse("MATCH (n) RETURN n").unwrap();
        let a = cache.get_or_analyze("MATCH (n) RETURN n", &query);
        let b = cache.get_or_analyze("MATCH (n) RETURN n", &query);
        assert!(Arc::ptr_eq(&a, &b));
        cache.clear_cache();
        let c = cache.get_or_analyze("MATCH (n) RETURN n", &query);
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
