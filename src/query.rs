use crate::config::Config;
use crate::db::{Direction, GraphStore};
use crate::error::{Error, Result};
use crate::model::{EdgeKind, GraphNode, GraphPath, Label, QueryRow, Related};
use std::sync::Arc;

/// Longest IMPORTS chain followed by `trace_import_chain`.
pub const MAX_IMPORT_HOPS: usize = 5;

/// Relationship types `find_related` accepts.
pub const ALLOWED_RELATIONSHIPS: &[EdgeKind] = &[
    EdgeKind::Contains,
    EdgeKind::Imports,
    EdgeKind::Calls,
    EdgeKind::InheritsFrom,
    EdgeKind::DecoratedBy,
];

/// Substrings that block an ad-hoc query, matched against its upper-cased
/// text. `SETUP` is blocked too; the match is a plain substring test.
pub const BLOCKED_KEYWORDS: &[&str] = &["DELETE", "DETACH", "REMOVE", "DROP", "MERGE", "SET"];

/// Read-only operations over the repository graph.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<GraphStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    pub fn find_entity(&self, name: &str) -> Result<Vec<GraphNode>> {
        self.store.nodes_by_name(name)
    }

    /// What the function `name` calls.
    pub fn get_dependencies(&self, name: &str) -> Result<Vec<GraphNode>> {
        self.store
            .one_hop(name, Label::Function, EdgeKind::Calls, Direction::Outgoing)
    }

    /// Who calls the function `name`.
    pub fn get_dependents(&self, name: &str) -> Result<Vec<GraphNode>> {
        self.store
            .one_hop(name, Label::Function, EdgeKind::Calls, Direction::Incoming)
    }

    /// File nodes carry canonical paths; `path` is canonicalized when it
    /// resolves and matched as given otherwise.
    pub fn trace_import_chain(&self, path: &str) -> Result<Vec<GraphPath>> {
        let resolved = std::fs::canonicalize(path)
            .map(|canonical| canonical.display().to_string())
            .unwrap_or_else(|_| path.to_string());
        self.store.import_paths(&resolved, MAX_IMPORT_HOPS)
    }

    pub fn find_related(&self, name: &str, relationship: &str) -> Result<Vec<Related>> {
        let kind = parse_relationship(relationship)?;
        self.store.related(name, kind)
    }

    pub fn execute_query(&self, query: &str) -> Result<Vec<QueryRow>> {
        check_read_only(query)?;
        self.store.raw_query(query, Config::get().max_query_rows)
    }
}

pub fn parse_relationship(relationship: &str) -> Result<EdgeKind> {
    ALLOWED_RELATIONSHIPS
        .iter()
        .copied()
        .find(|kind| kind.as_str() == relationship)
        .ok_or_else(|| Error::Validation {
            relationship: relationship.to_string(),
            allowed: ALLOWED_RELATIONSHIPS.iter().map(|kind| kind.as_str()).collect(),
        })
}

pub fn check_read_only(query: &str) -> Result<()> {
    let upper = query.to_ascii_uppercase();
    match BLOCKED_KEYWORDS.iter().find(|kw| upper.contains(**kw)) {
        Some(keyword) => Err(Error::Safety { keyword: *keyword }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_allow_list_is_exact() {
        assert_eq!(parse_relationship("CALLS").unwrap(), EdgeKind::Calls);
        assert_eq!(
            parse_relationship("DECORATED_BY").unwrap(),
            EdgeKind::DecoratedBy
        );
        for rejected in ["calls", "DEPENDS_ON", "HAS_PARAMETER", ""] {
            let err = parse_relationship(rejected).unwrap_err();
            assert_eq!(err.kind(), "validation_error");
        }
    }

    #[test]
    fn blocked_keywords_match_any_case() {
        assert!(check_read_only("SELECT * FROM nodes").is_ok());
        for query in [
            "delete from nodes",
            "DROP TABLE edges",
            "select 1; Set x = 1",
            "SELECT name FROM nodes WHERE name = 'setup'",
        ] {
            let err = check_read_only(query).unwrap_err();
            assert_eq!(err.kind(), "safety_error", "{query}");
        }
    }

    #[test]
    fn safety_error_names_first_blocked_keyword() {
        let err = check_read_only("MATCH (n) DETACH DELETE n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "query blocked for safety: contains DELETE. Read-only queries only."
        );
    }
}
