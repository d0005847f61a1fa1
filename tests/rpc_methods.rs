use repograph::db::GraphStore;
use repograph::indexer::scan::ScanOptions;
use repograph::rpc::{self, App};
use serde_json::{Value, json};
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

fn setup() -> (TempDir, App) {
    let dir = TempDir::new().unwrap();
    copy_dir(&fixture_path("py_app"), dir.path());
    let db_path = dir.path().join(".repograph").join("graph.sqlite");
    let store = Arc::new(GraphStore::open(db_path.to_str().unwrap()).unwrap());
    let app = App::from_store(dir.path().to_path_buf(), store, ScanOptions::default());
    (dir, app)
}

fn indexed() -> (TempDir, App) {
    let (dir, app) = setup();
    let report = rpc::handle_method(&app, "index_repository", Value::Null).unwrap();
    assert_eq!(report["indexed_files"], json!(4));
    (dir, app)
}

fn result_names(value: &Value) -> Vec<String> {
    let mut names: Vec<String> = value["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|node| node["name"].as_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

fn kind_of(app: &App, method: &str, params: Value) -> &'static str {
    let err = rpc::handle_method(app, method, params).unwrap_err();
    rpc::error_kind(&err)
}

#[test]
fn status_reports_ready() {
    let (_dir, app) = setup();
    let status = rpc::handle_method(&app, "status", Value::Null).unwrap();
    assert_eq!(status, json!({"ready": true, "service": "repograph"}));
    let aliased = rpc::handle_method(&app, "index_status", Value::Null).unwrap();
    assert_eq!(aliased, status);
}

#[test]
fn index_repository_reports_counts() {
    let (_dir, app) = setup();
    let report = rpc::handle_method(&app, "index_repo", json!({})).unwrap();
    assert_eq!(report["indexed_files"], json!(4));
    assert_eq!(report["skipped"], json!([]));

    let stats = rpc::handle_method(&app, "graph_stats", Value::Null).unwrap();
    assert_eq!(stats["nodes_by_label"]["File"], json!(4));
    assert_eq!(stats["nodes_by_label"]["Docstring"], json!(1));
}

#[test]
fn single_file_methods_accept_path_aliases() {
    let (dir, app) = setup();
    let indexed =
        rpc::handle_method(&app, "index_single_file", json!({"path": "app/base.py"})).unwrap();
    assert_eq!(indexed["status"], json!("indexed"));
    let expected = fs::canonicalize(dir.path().join("app/base.py")).unwrap();
    assert_eq!(indexed["file"], json!(expected.display().to_string()));

    let parsed = rpc::handle_method(&app, "parse_ast", json!({"file": "app/base.py"})).unwrap();
    assert!(parsed["nodes"].as_u64().unwrap() > 0);

    let extracted = rpc::handle_method(
        &app,
        "extract_code_entities",
        json!({"file_path": expected.display().to_string()}),
    )
    .unwrap();
    assert_eq!(extracted["status"], json!("ok"));
}

#[test]
fn query_methods_wrap_results() {
    let (dir, app) = indexed();

    let found = rpc::handle_method(&app, "find_entity", json!({"name": "User"})).unwrap();
    let labels: Vec<&str> = found["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|node| node["label"].as_str().unwrap())
        .collect();
    assert!(labels.contains(&"Class"));

    let deps = rpc::handle_method(&app, "get_dependencies", json!({"entity": "load_user"})).unwrap();
    assert_eq!(result_names(&deps), ["User", "audit"]);

    let callers = rpc::handle_method(&app, "get_dependents", json!({"name": "persist"})).unwrap();
    assert_eq!(result_names(&callers), ["save"]);

    let models = fs::canonicalize(dir.path().join("app/models.py")).unwrap();
    let chain = rpc::handle_method(
        &app,
        "trace_imports",
        json!({"path": models.display().to_string()}),
    )
    .unwrap();
    assert_eq!(chain["results"].as_array().unwrap().len(), 1);
    assert_eq!(
        chain["results"][0]["relationships"][0]["type"],
        json!("IMPORTS")
    );

    let relative =
        rpc::handle_method(&app, "trace_import_chain", json!({"path": "app/models.py"})).unwrap();
    assert_eq!(relative["results"], chain["results"]);

    let related = rpc::handle_method(
        &app,
        "find_related",
        json!({"name": "User", "relationship_type": "INHERITS_FROM"}),
    )
    .unwrap();
    assert_eq!(related["results"][0]["b"]["name"], json!("Entity"));

    let rows = rpc::handle_method(
        &app,
        "execute_query",
        json!({"sql": "SELECT name FROM nodes WHERE label = 'Method' ORDER BY name"}),
    )
    .unwrap();
    assert_eq!(
        rows["results"],
        json!([
            {"name": "__init__"},
            {"name": "create"},
            {"name": "display"},
            {"name": "save"}
        ])
    );
}

#[test]
fn errors_carry_stable_kinds() {
    let (dir, app) = indexed();
    fs::write(dir.path().join("broken.py"), "def broken(:\n").unwrap();

    assert_eq!(kind_of(&app, "find_entity", json!({})), "invalid_params");
    assert_eq!(
        kind_of(&app, "find_related", json!({"name": "User", "relationship": "OWNS"})),
        "validation_error"
    );
    assert_eq!(
        kind_of(&app, "execute_query", json!({"query": "DROP TABLE nodes"})),
        "safety_error"
    );
    assert_eq!(
        kind_of(&app, "execute_query", json!({"query": "SELECT * FROM missing_table"})),
        "graph_read_error"
    );
    assert_eq!(
        kind_of(&app, "index_single_file", json!({"path": "broken.py"})),
        "parse_error"
    );
    assert_eq!(
        kind_of(&app, "parse", json!({"path": "nope.py"})),
        "io_error"
    );
    assert_eq!(kind_of(&app, "no_such_method", Value::Null), "request_error");
}

#[test]
fn list_methods_supports_names_and_details() {
    let (_dir, app) = setup();
    let names = rpc::handle_method(&app, "list_methods", json!({"format": "names"})).unwrap();
    assert_eq!(names, json!(rpc::METHOD_LIST));

    let details = rpc::handle_method(&app, "list_methods", Value::Null).unwrap();
    assert_eq!(details["aliases"]["index_repo"], json!("index_repository"));
    assert!(!details["methods"].as_array().unwrap().is_empty());

    let help = rpc::handle_method(&app, "help", Value::Null).unwrap();
    assert!(help.is_object());
}

#[test]
fn call_wraps_results_and_errors_in_envelopes() {
    let dir = TempDir::new().unwrap();
    copy_dir(&fixture_path("py_app"), dir.path());
    let db_path = dir.path().join(".repograph").join("graph.sqlite");

    let ok = rpc::call(
        dir.path().to_path_buf(),
        db_path.clone(),
        "status".to_string(),
        "{}",
        "1",
    )
    .unwrap();
    let ok: Value = serde_json::from_str(&ok).unwrap();
    assert_eq!(ok["id"], json!(1));
    assert_eq!(ok["result"]["ready"], json!(true));
    assert!(ok.get("error").is_none());

    let err = rpc::call(
        dir.path().to_path_buf(),
        db_path,
        "find_related".to_string(),
        r#"{"name": "User", "relationship": "DEPENDS_ON"}"#,
        "req-7",
    )
    .unwrap();
    let err: Value = serde_json::from_str(&err).unwrap();
    assert_eq!(err["id"], json!("req-7"));
    assert!(err.get("result").is_none());
    assert_eq!(err["error"]["kind"], json!("validation_error"));
    assert!(err["error"]["message"].as_str().unwrap().contains("DEPENDS_ON"));
}
