use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type NodeId = i64;

/// Node labels of the repository graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Label {
    File,
    Class,
    Function,
    Method,
    Import,
    Module,
    Parameter,
    Decorator,
    Docstring,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Label::File => "File",
            Label::Class => "Class",
            Label::Function => "Function",
            Label::Method => "Method",
            Label::Import => "Import",
            Label::Module => "Module",
            Label::Parameter => "Parameter",
            Label::Decorator => "Decorator",
            Label::Docstring => "Docstring",
        }
    }
}

/// Relationship types written by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Contains,
    Imports,
    DependsOn,
    InheritsFrom,
    HasParameter,
    DecoratedBy,
    DocumentedBy,
    Calls,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Contains => "CONTAINS",
            EdgeKind::Imports => "IMPORTS",
            EdgeKind::DependsOn => "DEPENDS_ON",
            EdgeKind::InheritsFrom => "INHERITS_FROM",
            EdgeKind::HasParameter => "HAS_PARAMETER",
            EdgeKind::DecoratedBy => "DECORATED_BY",
            EdgeKind::DocumentedBy => "DOCUMENTED_BY",
            EdgeKind::Calls => "CALLS",
        }
    }
}

/// Identity under which a node is upserted.
///
/// `Scoped` nodes are unique per `(label, name, file)`; `Global` nodes collapse
/// every occurrence of a name into one node regardless of the file that
/// mentions it (imports, modules, parameters, decorators, call targets and
/// base classes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKey<'a> {
    File { path: &'a str },
    Scoped {
        label: Label,
        name: &'a str,
        file: &'a str,
    },
    Global { label: Label, name: &'a str },
}

impl NodeKey<'_> {
    pub fn label(&self) -> Label {
        match self {
            NodeKey::File { .. } => Label::File,
            NodeKey::Scoped { label, .. } | NodeKey::Global { label, .. } => *label,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            NodeKey::File { .. } => None,
            NodeKey::Scoped { name, .. } | NodeKey::Global { name, .. } => Some(*name),
        }
    }

    pub fn file(&self) -> Option<&str> {
        match self {
            NodeKey::Scoped { file, .. } => Some(*file),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            NodeKey::File { path } => Some(*path),
            _ => None,
        }
    }

    /// Unique key column value. Labels and Python names never contain `|`,
    /// so the file path goes last.
    pub fn key_string(&self) -> String {
        match self {
            NodeKey::File { path } => format!("File|{path}"),
            NodeKey::Scoped { label, name, file } => {
                format!("{}|{name}|{file}", label.as_str())
            }
            NodeKey::Global { label, name } => format!("{}|{name}", label.as_str()),
        }
    }
}

/// Start and end line (1-based, inclusive) of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphRelationship {
    #[serde(rename = "type")]
    pub kind: String,
    pub start: NodeId,
    pub end: NodeId,
}

/// A traversal path: `nodes[i] -relationships[i]-> nodes[i + 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphPath {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
}

impl GraphPath {
    pub fn hops(&self) -> usize {
        self.relationships.len()
    }
}

/// One `(a)-[r]->(b)` match of a relationship-typed search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Related {
    pub a: GraphNode,
    pub r: GraphRelationship,
    pub b: GraphNode,
}

pub type QueryRow = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedFile {
    pub status: &'static str,
    pub file: String,
}

impl IndexedFile {
    pub fn indexed(file: String) -> Self {
        Self {
            status: "indexed",
            file,
        }
    }

    pub fn ok(file: String) -> Self {
        Self { status: "ok", file }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub file: String,
    pub reason: String,
}

/// Outcome of a repository run. Files that failed both the concurrent
/// attempt and the solo retry appear in `skipped`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub indexed_files: usize,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub nodes_by_label: BTreeMap<String, usize>,
    pub edges_by_kind: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_keys_separate_scoped_and_global() {
        let scoped = NodeKey::Scoped {
            label: Label::Function,
            name: "foo",
            file: "/repo/a.py",
        };
        let global = NodeKey::Global {
            label: Label::Function,
            name: "foo",
        };
        assert_eq!(scoped.key_string(), "Function|foo|/repo/a.py");
        assert_eq!(global.key_string(), "Function|foo");
        assert_ne!(scoped.key_string(), global.key_string());
        assert_eq!(NodeKey::File { path: "/repo/a.py" }.key_string(), "File|/repo/a.py");
    }

    #[test]
    fn edge_kind_serializes_as_type_name() {
        assert_eq!(
            serde_json::to_value(EdgeKind::InheritsFrom).unwrap(),
            serde_json::json!("INHERITS_FROM")
        );
        assert_eq!(EdgeKind::DependsOn.as_str(), "DEPENDS_ON");
    }
}
