//! Single-pass clause extraction: produces [`ClauseInfo`] from a parsed AST.
//!
//! Independent of [`crate::analyzer`]'s walk — both take only a shared `&Query`
//! and accumulate into their own owned result, so nothing here serializes
//! against an analyzer pass over the same tree. `query_api::prepare` (the
//! Antlr path) never calls either: it compiles straight from the parsed AST
//! and has no use for `QueryInfo`/`ClauseInfo`. `nornic::Dispatch::for_query`
//! is the actual caller of both, one after the other, since Nornic's routing
//! decision needs `QueryInfo` before `ClauseInfo` is even extracted. Clause
//! content is obtained by rendering the relevant AST subtree back to
//! Cypher-ish text via [`render`] rather than slicing source bytes, since
//! this implementation parses into a typed AST rather than a raw CST.

use crate::ast::{
    Clause, Expression, NodePattern, PathElement, Pattern, Query, RelationshipPattern,
};

/// Content of each clause, stripped of its keyword (except where the
/// corresponding executor stage needs the keyword preserved for re-parsing).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClauseInfo {
    pub match_pattern: Option<String>,
    pub match_full: Option<String>,
    pub optional_matches: Vec<String>,
    pub where_condition: Option<String>,
    pub create_pattern: Option<String>,
    pub create_full: Option<String>,
    pub merge_pattern: Option<String>,
    pub merge_patterns: Vec<String>,
    pub on_create_set: Option<String>,
    pub on_match_set: Option<String>,
    pub delete_targets: Option<String>,
    pub detach_delete: bool,
    pub set_assignments: Option<String>,
    pub remove_items: Option<String>,
    pub return_items: Option<String>,
    pub with_items: Option<String>,
    pub with_items_list: Vec<String>,
    pub unwind_expr: Option<String>,
    pub unwind_as: Option<String>,
    pub order_by_items: Option<String>,
    pub limit_value: Option<String>,
    pub skip_value: Option<String>,
    pub call_procedure: Option<String>,
    pub patterns: Vec<String>,
    pub variables: Vec<String>,
}

fn push_var(vars: &mut Vec<String>, name: &str) {
    if !vars.iter().any(|v| v == name) {
        vars.push(name.to_string());
    }
}

fn collect_pattern_variables(pattern: &Pattern, vars: &mut Vec<String>) {
    if let Some(v) = &pattern.variable {
        push_var(vars, v);
    }
    for element in &pattern.elements {
        match element {
            PathElement::Node(NodePattern { variable, .. }) => {
                if let Some(v) = variable {
                    push_var(vars, v);
                }
            }
            PathElement::Relationship(RelationshipPattern { variable, .. }) => {
                if let Some(v) = variable {
                    push_var(vars, v);
                }
            }
        }
    }
}

fn collect_expression_variables(expr: &Expression, vars: &mut Vec<String>) {
    match expr {
        Expression::Variable(name) => push_var(vars, name),
        Expression::PropertyAccess(pa) => push_var(vars, &pa.variable),
        Expression::Binary(b) => {
            collect_expression_variables(&b.left, vars);
            collect_expression_variables(&b.right, vars);
        }
        Expression::Unary(u) => collect_expression_variables(&u.operand, vars),
        Expression::FunctionCall(call) => {
            for a in &call.args {
                collect_expression_variables(a, vars);
            }
        }
        Expression::Case(c) => {
            for (when, then) in &c.when_clauses {
                collect_expression_variables(when, vars);
                collect_expression_variables(then, vars);
            }
            if let Some(e) = &c.else_expression {
                collect_expression_variables(e, vars);
            }
        }
        Expression::Exists(e) => match e.as_ref() {
            crate::ast::ExistsExpression::Pattern(p) => collect_pattern_variables(p, vars),
            crate::ast::ExistsExpression::Subquery(q) => collect_query_variables(q, vars),
        },
        Expression::List(items) => {
            for i in items {
                collect_expression_variables(i, vars);
            }
        }
        Expression::ListComprehension(lc) => {
            collect_expression_variables(&lc.list, vars);
            if let Some(w) = &lc.where_expression {
                collect_expression_variables(w, vars);
            }
            if let Some(m) = &lc.map_expression {
                collect_expression_variables(m, vars);
            }
        }
        Expression::PatternComprehension(pc) => {
            collect_pattern_variables(&pc.pattern, vars);
            if let Some(w) = &pc.where_expression {
                collect_expression_variables(w, vars);
            }
            collect_expression_variables(&pc.projection, vars);
        }
        Expression::Map(map) => {
            for pair in &map.properties {
                collect_expression_variables(&pair.value, vars);
            }
        }
        Expression::Literal(_) | Expression::Parameter(_) => {}
    }
}

fn collect_query_variables(query: &Query, vars: &mut Vec<String>) {
    for clause in &query.clauses {
        collect_clause_variables(clause, vars);
    }
}

fn collect_clause_variables(clause: &Clause, vars: &mut Vec<String>) {
    match clause {
        Clause::Match(m) => {
            for p in &m.patterns {
                collect_pattern_variables(p, vars);
            }
        }
        Clause::Create(c) => {
            for p in &c.patterns {
                collect_pattern_variables(p, vars);
            }
        }
        Clause::Merge(m) => collect_pattern_variables(&m.pattern, vars),
        Clause::Unwind(u) => {
            collect_expression_variables(&u.expression, vars);
            push_var(vars, &u.alias);
        }
        Clause::Call(call) => {
            if let crate::ast::CallClause::Procedure(p) = call {
                for a in &p.arguments {
                    collect_expression_variables(a, vars);
                }
            }
        }
        Clause::Return(r) => {
            for item in &r.items {
                collect_expression_variables(&item.expression, vars);
            }
        }
        Clause::Where(w) => collect_expression_variables(&w.expression, vars),
        Clause::With(w) => {
            for item in &w.items {
                collect_expression_variables(&item.expression, vars);
            }
        }
        Clause::Set(s) => {
            for item in &s.items {
                push_var(vars, &item.property.variable);
                collect_expression_variables(&item.value, vars);
            }
        }
        Clause::Remove(r) => {
            for p in &r.properties {
                push_var(vars, &p.variable);
            }
        }
        Clause::Delete(d) => {
            for e in &d.expressions {
                collect_expression_variables(e, vars);
            }
        }
        Clause::Union(u) => collect_query_variables(&u.query, vars),
        Clause::Foreach(f) => {
            push_var(vars, &f.variable);
            collect_expression_variables(&f.list, vars);
            for update in &f.updates {
                collect_clause_variables(update, vars);
            }
        }
        Clause::Show(_) | Clause::Schema(_) => {}
    }
}

/// Parses `cypher` and extracts its `ClauseInfo`, including `ON CREATE`/
/// `ON MATCH SET` assignments, which this parser tracks alongside (not
/// inside) the `Merge` AST node.
pub fn extract_text(cypher: &str) -> crate::error::Result<ClauseInfo> {
    let (query, merge_subclauses) =
        crate::parser::Parser::parse_with_merge_subclauses(cypher).map_err(|e| match e {
            crate::error::Error::Other(msg) => crate::error::Error::Parse(msg),
            other => other,
        })?;
    Ok(build_info(&query, &merge_subclauses))
}

/// Best-effort variant of [`extract_text`]: never fails on invalid Cypher.
/// Recovers past syntax errors clause by clause (see
/// [`crate::parser::Parser::parse_recovering`]) and extracts whatever
/// clauses parsed cleanly either side of an error.
pub fn extract_text_recovering(cypher: &str) -> ClauseInfo {
    let (query, merge_subclauses, _errors) =
        crate::parser::Parser::parse_recovering_with_merge_subclauses(cypher);
    build_info(&query, &merge_subclauses)
}

fn build_info(query: &Query, merge_subclauses: &[crate::parser::MergeSubclauses]) -> ClauseInfo {
    let mut info = extract(query);
    if let Some(first) = merge_subclauses.first() {
        if !first.on_create.is_empty() {
            info.on_create_set = Some(
                first
                    .on_create
                    .iter()
                    .map(render::set_items)
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }
        if !first.on_match.is_empty() {
            info.on_match_set = Some(
                first
                    .on_match
                    .iter()
                    .map(render::set_items)
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }
    }
    info
}

/// Walks `query` once, rendering each clause's content without its keyword.
///
/// Pure function of the parse tree; never touches storage. Returns a
/// best-effort partial struct rather than failing. `ON CREATE`/`ON MATCH SET`
/// are not recoverable from `Query` alone (this parser tracks them
/// out-of-band) — use [`extract_text`] when that detail matters.
pub fn extract(query: &Query) -> ClauseInfo {
    let mut info = ClauseInfo::default();

    for clause in &query.clauses {
        match clause {
            Clause::Match(m) => {
                let rendered = m
                    .patterns
                    .iter()
                    .map(render::pattern)
                    .collect::<Vec<_>>()
                    .join(", ");
                if m.optional {
                    info.optional_matches
                        .push(format!("OPTIONAL MATCH {rendered}"));
                } else {
                    info.match_pattern = Some(rendered.clone());
                    info.match_full = Some(format!("MATCH {rendered}"));
                }
                for p in &m.patterns {
                    info.patterns.push(render::pattern(p));
                    collect_pattern_variables(p, &mut info.variables);
                }
            }
            Clause::Where(w) => {
                info.where_condition = Some(render::expression(&w.expression));
                collect_expression_variables(&w.expression, &mut info.variables);
            }
            Clause::Create(c) => {
                let rendered = c
                    .patterns
                    .iter()
                    .map(render::pattern)
                    .collect::<Vec<_>>()
                    .join(", ");
                info.create_pattern = Some(rendered.clone());
                info.create_full = Some(format!("CREATE {rendered}"));
                for p in &c.patterns {
                    info.patterns.push(render::pattern(p));
                    collect_pattern_variables(p, &mut info.variables);
                }
            }
            Clause::Merge(m) => {
                let rendered = render::pattern(&m.pattern);
                info.merge_pattern = Some(rendered.clone());
                info.merge_patterns.push(rendered.clone());
                info.patterns.push(rendered);
                collect_pattern_variables(&m.pattern, &mut info.variables);
            }
            Clause::Set(s) => {
                info.set_assignments = Some(render::set_items(s));
                for item in &s.items {
                    push_var(&mut info.variables, &item.property.variable);
                    collect_expression_variables(&item.value, &mut info.variables);
                }
            }
            Clause::Remove(r) => {
                info.remove_items = Some(
                    r.properties
                        .iter()
                        .map(|p| format!("{}.{}", p.variable, p.property))
                        .collect::<Vec<_>>()
                        .join(", "),
                );
                for p in &r.properties {
                    push_var(&mut info.variables, &p.variable);
                }
            }
            Clause::Delete(d) => {
                info.detach_delete = d.detach;
                info.delete_targets = Some(
                    d.expressions
                        .iter()
                        .map(render::expression)
                        .collect::<Vec<_>>()
                        .join(", "),
                );
                for e in &d.expressions {
                    collect_expression_variables(e, &mut info.variables);
                }
            }
            Clause::Return(r) => {
                info.return_items = Some(render::return_items(&r.items));
                for item in &r.items {
                    collect_expression_variables(&item.expression, &mut info.variables);
                }
                if let Some(order) = &r.order_by {
                    info.order_by_items = Some(render::order_by(order));
                }
                if let Some(limit) = r.limit {
                    info.limit_value = Some(limit.to_string());
                }
                if let Some(skip) = r.skip {
                    info.skip_value = Some(skip.to_string());
                }
            }
            Clause::With(w) => {
                let rendered = render::return_items(&w.items);
                info.with_items = Some(rendered);
                info.with_items_list = w
                    .items
                    .iter()
                    .map(|item| render::return_item(item))
                    .collect();
                for item in &w.items {
                    collect_expression_variables(&item.expression, &mut info.variables);
                }
                if let Some(where_clause) = &w.where_clause {
                    info.where_condition = Some(render::expression(&where_clause.expression));
                }
                if let Some(order) = &w.order_by {
                    info.order_by_items = Some(render::order_by(order));
                }
                if let Some(limit) = w.limit {
                    info.limit_value = Some(limit.to_string());
                }
                if let Some(skip) = w.skip {
                    info.skip_value = Some(skip.to_string());
                }
            }
            Clause::Unwind(u) => {
                info.unwind_expr = Some(render::expression(&u.expression));
                info.unwind_as = Some(u.alias.clone());
                collect_expression_variables(&u.expression, &mut info.variables);
                push_var(&mut info.variables, &u.alias);
            }
            Clause::Call(call) => {
                if let crate::ast::CallClause::Procedure(p) = call {
                    let args = p
                        .arguments
                        .iter()
                        .map(render::expression)
                        .collect::<Vec<_>>()
                        .join(", ");
                    info.call_procedure = Some(format!("{}({})", p.name.join("."), args));
                    for a in &p.arguments {
                        collect_expression_variables(a, &mut info.variables);
                    }
                }
            }
            Clause::Union(_) | Clause::Foreach(_) | Clause::Show(_) | Clause::Schema(_) => {
                collect_clause_variables(clause, &mut info.variables);
            }
        }
    }

    info
}

/// Deterministic, lossless-enough-to-reparse rendering of AST subtrees back
/// to Cypher-ish text.
pub mod render {
    use crate::ast::{
        Expression, Literal, NodePattern, OrderByClause, PathElement, Pattern,
        PropertyMap, RelationshipDirection, RelationshipPattern, ReturnItem, SetClause,
    };

    pub fn pattern(pattern: &Pattern) -> String {
        let mut out = String::new();
        if let Some(v) = &pattern.variable {
            out.push_str(v);
            out.push('=');
        }
        for element in &pattern.elements {
            match element {
                PathElement::Node(node) => out.push_str(&node_pattern(node)),
                PathElement::Relationship(rel) => out.push_str(&relationship_pattern(rel)),
            }
        }
        out
    }

    fn node_pattern(node: &NodePattern) -> String {
        let mut body = String::new();
        if let Some(v) = &node.variable {
            body.push_str(v);
        }
        for label in &node.labels {
            body.push(':');
            body.push_str(label);
        }
        if let Some(props) = &node.properties {
            body.push(' ');
            body.push_str(&property_map(props));
        }
        format!("({body})")
    }

    fn relationship_pattern(rel: &RelationshipPattern) -> String {
        let mut body = String::new();
        if let Some(v) = &rel.variable {
            body.push_str(v);
        }
        for (i, t) in rel.types.iter().enumerate() {
            body.push(if i == 0 { ':' } else { '|' });
            body.push_str(t);
        }
        if let Some(vl) = &rel.variable_length {
            body.push('*');
            if let Some(min) = vl.min {
                body.push_str(&min.to_string());
            }
            body.push_str("..");
            if let Some(max) = vl.max {
                body.push_str(&max.to_string());
            }
        }
        if let Some(props) = &rel.properties {
            body.push(' ');
            body.push_str(&property_map(props));
        }
        let (left, right) = match rel.direction {
            RelationshipDirection::LeftToRight => ("-", "->"),
            RelationshipDirection::RightToLeft => ("<-", "-"),
            RelationshipDirection::Undirected => ("-", "-"),
        };
        format!("{left}[{body}]{right}")
    }

    fn property_map(map: &PropertyMap) -> String {
        let items = map
            .properties
            .iter()
            .map(|p| format!("{}: {}", p.key, expression(&p.value)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{items}}}")
    }

    pub fn expression(expr: &Expression) -> String {
        match expr {
            Expression::Literal(lit) => literal(lit),
            Expression::Variable(name) => name.clone(),
            Expression::PropertyAccess(pa) => format!("{}.{}", pa.variable, pa.property),
            Expression::Binary(b) => {
                format!(
                    "{} {} {}",
                    expression(&b.left),
                    operator(&b.operator),
                    expression(&b.right)
                )
            }
            Expression::Unary(u) => match u.operator {
                crate::ast::UnaryOperator::Not => format!("NOT {}", expression(&u.operand)),
                crate::ast::UnaryOperator::Negate => format!("-{}", expression(&u.operand)),
            },
            Expression::FunctionCall(call) => {
                let args = call
                    .args
                    .iter()
                    .map(expression)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({})", call.name, args)
            }
            Expression::Case(c) => {
                let mut s = String::from("CASE");
                for (when, then) in &c.when_clauses {
                    s.push_str(&format!(" WHEN {} THEN {}", expression(when), expression(then)));
                }
                if let Some(e) = &c.else_expression {
                    s.push_str(&format!(" ELSE {}", expression(e)));
                }
                s.push_str(" END");
                s
            }
            Expression::Exists(e) => match e.as_ref() {
                crate::ast::ExistsExpression::Pattern(p) => format!("EXISTS {{ {} }}", pattern(p)),
                crate::ast::ExistsExpression::Subquery(_) => "EXISTS { ... }".to_string(),
            },
            Expression::List(items) => {
                let items = items.iter().map(expression).collect::<Vec<_>>().join(", ");
                format!("[{items}]")
            }
            Expression::ListComprehension(lc) => {
                let mut s = format!("[{} IN {}", lc.variable, expression(&lc.list));
                if let Some(w) = &lc.where_expression {
                    s.push_str(&format!(" WHERE {}", expression(w)));
                }
                if let Some(m) = &lc.map_expression {
                    s.push_str(&format!(" | {}", expression(m)));
                }
                s.push(']');
                s
            }
            Expression::PatternComprehension(pc) => {
                let mut s = format!("[{}", pattern(&pc.pattern));
                if let Some(w) = &pc.where_expression {
                    s.push_str(&format!(" WHERE {}", expression(w)));
                }
                s.push_str(&format!(" | {}]", expression(&pc.projection)));
                s
            }
            Expression::Map(map) => property_map(map),
            Expression::Parameter(name) => format!("${name}"),
        }
    }

    fn literal(lit: &Literal) -> String {
        match lit {
            Literal::String(s) => format!("'{s}'"),
            Literal::Integer(n) => n.to_string(),
            Literal::Float(n) => n.to_string(),
            Literal::Boolean(b) => b.to_string(),
            Literal::Null => "null".to_string(),
        }
    }

    fn operator(op: &crate::ast::BinaryOperator) -> &'static str {
        use crate::ast::BinaryOperator::*;
        match op {
            Equals => "=",
            NotEquals => "<>",
            LessThan => "<",
            LessEqual => "<=",
            GreaterThan => ">",
            GreaterEqual => ">=",
            And => "AND",
            Or => "OR",
            Xor => "XOR",
            Add => "+",
            Subtract => "-",
            Multiply => "*",
            Divide => "/",
            Modulo => "%",
            Power => "^",
            In => "IN",
            StartsWith => "STARTS WITH",
            EndsWith => "ENDS WITH",
            Contains => "CONTAINS",
            HasLabel => ":",
            IsNull => "IS NULL",
            IsNotNull => "IS NOT NULL",
        }
    }

    pub fn return_item(item: &ReturnItem) -> String {
        match &item.alias {
            Some(alias) => format!("{} AS {}", expression(&item.expression), alias),
            None => expression(&item.expression),
        }
    }

    pub fn return_items(items: &[ReturnItem]) -> String {
        items.iter().map(return_item).collect::<Vec<_>>().join(", ")
    }

    pub fn order_by(order: &OrderByClause) -> String {
        order
            .items
            .iter()
            .map(|item| {
                let dir = match item.direction {
                    crate::ast::Direction::Ascending => "ASC",
                    crate::ast::Direction::Descending => "DESC",
                };
                format!("{} {}", expression(&item.expression), dir)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn set_items(set: &SetClause) -> String {
        set.items
            .iter()
            .map(|item| {
                format!(
                    "{}.{} = {}",
                    item.property.variable,
                    item.property.property,
                    expression(&item.value)
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn return_items_strip_keyword() {
        let query = Parser::parse("MATCH (n) RETURN n.name AS name, n.age").unwrap();
        let info = extract(&query);
        assert_eq!(
            info.return_items.as_deref(),
            Some("n.name AS name, n.age")
        );
    }

    #[test]
    fn where_condition_has_no_keyword() {
        let query = Parser::parse("MATCH (n) WHERE n.age > 30 RETURN n").unwrap();
        let info = extract(&query);
        assert_eq!(info.where_condition.as_deref(), Some("n.age > 30"));
    }

    #[test]
    fn match_full_preserves_keyword() {
        let query = Parser::parse("MATCH (n:Person) RETURN n").unwrap();
        let info = extract(&query);
        assert_eq!(info.match_full.as_deref(), Some("MATCH (n:Person)"));
        assert_eq!(info.match_pattern.as_deref(), Some("(n:Person)"));
    }

    #[test]
    fn variables_are_deduplicated_first_occurrence() {
        let query = Parser::parse("MATCH (n) WHERE n.age > 30 RETURN n, n.name").unwrap();
        let info = extract(&query);
        assert_eq!(info.variables, vec!["n".to_string()]);
    }

    #[test]
    fn detach_delete_flag_and_targets() {
        let query = Parser::parse("MATCH (n) DETACH DELETE n").unwrap();
        let info = extract(&query);
        assert!(info.detach_delete);
        assert_eq!(info.delete_targets.as_deref(), Some("n"));
    }
}
