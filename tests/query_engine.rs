use repograph::db::GraphStore;
use repograph::indexer::Indexer;
use repograph::query::QueryEngine;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn copy_dir(src: &Path, dst: &Path) {
    fs::create_dir_all(dst).unwrap();
    for entry in fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&path, &target);
        } else {
            fs::copy(&path, &target).unwrap();
        }
    }
}

struct Indexed {
    dir: TempDir,
    store: Arc<GraphStore>,
    engine: QueryEngine,
}

fn indexed_fixture() -> Indexed {
    let dir = TempDir::new().unwrap();
    copy_dir(&fixture_path("py_app"), dir.path());
    let db_path = dir.path().join(".repograph").join("graph.sqlite");
    let store = Arc::new(GraphStore::open(db_path.to_str().unwrap()).unwrap());
    let report = Indexer::new(dir.path().to_path_buf(), store.clone()).index_repository();
    assert!(report.skipped.is_empty());
    let engine = QueryEngine::new(store.clone());
    Indexed { dir, store, engine }
}

fn sorted_names(nodes: Vec<repograph::model::GraphNode>) -> Vec<String> {
    let mut names: Vec<_> = nodes.into_iter().filter_map(|node| node.name).collect();
    names.sort();
    names
}

#[test]
fn find_entity_returns_every_label() {
    let ctx = indexed_fixture();
    let mut labels: Vec<_> = ctx
        .engine
        .find_entity("format_name")
        .unwrap()
        .into_iter()
        .map(|node| (node.label, node.file.is_some()))
        .collect();
    labels.sort();
    assert_eq!(
        labels,
        [
            ("Function".to_string(), false),
            ("Function".to_string(), true)
        ]
    );
    assert!(ctx.engine.find_entity("NoSuchThing").unwrap().is_empty());
}

#[test]
fn dependencies_follow_outgoing_calls() {
    let ctx = indexed_fixture();
    assert_eq!(
        sorted_names(ctx.engine.get_dependencies("load_user").unwrap()),
        ["User", "audit"]
    );
    assert_eq!(
        sorted_names(ctx.engine.get_dependencies("audit").unwrap()),
        ["format_name"]
    );
    // Methods are not anchors.
    assert!(ctx.engine.get_dependencies("create").unwrap().is_empty());
}

#[test]
fn dependents_follow_incoming_calls() {
    let ctx = indexed_fixture();
    let callers = ctx.engine.get_dependents("format_name").unwrap();
    let mut shape: Vec<_> = callers
        .iter()
        .map(|node| (node.label.as_str(), node.name.as_deref().unwrap_or("")))
        .collect();
    shape.sort();
    assert_eq!(shape, [("Function", "audit"), ("Method", "display")]);

    assert_eq!(sorted_names(ctx.engine.get_dependents("persist").unwrap()), ["save"]);
    assert_eq!(sorted_names(ctx.engine.get_dependents("load_user").unwrap()), ["create"]);
}

#[test]
fn trace_import_chain_returns_paths() {
    let ctx = indexed_fixture();
    let service = fs::canonicalize(ctx.dir.path().join("app/service.py"))
        .unwrap()
        .display()
        .to_string();
    let paths = ctx.engine.trace_import_chain(&service).unwrap();
    assert_eq!(paths.len(), 2);
    for path in &paths {
        assert_eq!(path.hops(), 1);
        assert_eq!(path.nodes[0].label, "File");
        assert_eq!(path.nodes[1].label, "Import");
        assert_eq!(path.relationships[0].kind, "IMPORTS");
        assert_eq!(path.relationships[0].start, path.nodes[0].id);
        assert_eq!(path.relationships[0].end, path.nodes[1].id);
    }
    assert!(ctx.engine.trace_import_chain("/not/indexed.py").unwrap().is_empty());
}

#[test]
fn trace_import_chain_canonicalizes_the_start_path() {
    let ctx = indexed_fixture();
    let detour = ctx.dir.path().join("app").join("..").join("app").join("service.py");
    let paths = ctx
        .engine
        .trace_import_chain(detour.to_str().unwrap())
        .unwrap();
    assert_eq!(paths.len(), 2);
    let canonical = fs::canonicalize(&detour).unwrap().display().to_string();
    assert_eq!(paths[0].nodes[0].path.as_deref(), Some(canonical.as_str()));
}

#[test]
fn find_related_returns_triples() {
    let ctx = indexed_fixture();
    let related = ctx.engine.find_related("User", "INHERITS_FROM").unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].a.label, "Class");
    assert_eq!(related[0].r.kind, "INHERITS_FROM");
    assert_eq!(related[0].b.name.as_deref(), Some("Entity"));

    let value = serde_json::to_value(&related[0]).unwrap();
    assert_eq!(value["r"]["type"], json!("INHERITS_FROM"));

    let decorated = ctx.engine.find_related("display", "DECORATED_BY").unwrap();
    assert_eq!(decorated[0].b.name.as_deref(), Some("property"));
}

#[test]
fn find_related_rejects_unknown_types_before_store_access() {
    let ctx = indexed_fixture();
    let before = ctx.store.statement_count();
    for relationship in ["DEPENDS_ON", "HAS_PARAMETER", "calls", "OWNS"] {
        let err = ctx.engine.find_related("User", relationship).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        let message = err.to_string();
        for allowed in ["CONTAINS", "IMPORTS", "CALLS", "INHERITS_FROM", "DECORATED_BY"] {
            assert!(message.contains(allowed), "{message}");
        }
    }
    assert_eq!(ctx.store.statement_count(), before);
}

#[test]
fn execute_query_blocks_write_keywords_before_execution() {
    let ctx = indexed_fixture();
    let before = ctx.store.statement_count();
    for query in [
        "DELETE FROM nodes",
        "delete from edges",
        "MATCH (n) DETACH DELETE n",
        "DROP TABLE nodes",
        "UPDATE nodes SET name = 'x'",
        "SELECT * FROM nodes WHERE name = 'remove_me'",
        "SELECT * FROM nodes WHERE name = 'setup'",
        "merge into nodes",
    ] {
        let err = ctx.engine.execute_query(query).unwrap_err();
        assert_eq!(err.kind(), "safety_error", "{query}");
    }
    assert_eq!(ctx.store.statement_count(), before);
}

#[test]
fn execute_query_returns_rows_by_column() {
    let ctx = indexed_fixture();
    let rows = ctx
        .engine
        .execute_query(
            "SELECT label, COUNT(*) AS n FROM nodes WHERE label IN ('File', 'Class') \
             GROUP BY label ORDER BY label",
        )
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["label"], json!("Class"));
    assert_eq!(rows[1]["label"], json!("File"));
    assert_eq!(rows[1]["n"], json!(4));
}

#[test]
fn execute_query_cannot_write_through_unlisted_keywords() {
    let ctx = indexed_fixture();
    let err = ctx
        .engine
        .execute_query("INSERT INTO nodes (label) VALUES ('File')")
        .unwrap_err();
    assert_eq!(err.kind(), "graph_read_error");
    assert_eq!(ctx.store.stats().unwrap().nodes_by_label.get("File"), Some(&4));
}
