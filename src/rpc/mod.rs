mod handlers;

use crate::db::GraphStore;
use crate::error::Error;
use crate::indexer::{Indexer, scan};
use crate::query::QueryEngine;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct RpcResponse {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    kind: String,
    message: String,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct PathParams {
    /// File path, absolute or relative to the repository root.
    #[serde(alias = "file", alias = "file_path")]
    path: String,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct NameParams {
    /// Exact entity name.
    #[serde(alias = "entity", alias = "symbol")]
    name: String,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct TraceImportParams {
    /// File the chain starts at, absolute or relative to the repository root.
    #[serde(alias = "file", alias = "file_path")]
    path: String,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct FindRelatedParams {
    #[serde(alias = "entity", alias = "symbol")]
    name: String,
    /// One of CONTAINS, IMPORTS, CALLS, INHERITS_FROM, DECORATED_BY.
    #[serde(alias = "relationship_type", alias = "type")]
    relationship: String,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct ExecuteQueryParams {
    /// Read-only SQL over the `nodes` and `edges` tables.
    #[serde(alias = "sql")]
    query: String,
}

#[derive(Deserialize, Default, schemars::JsonSchema)]
struct ListMethodsParams {
    /// "names" for a flat list, "details" (default) for docs and aliases.
    format: Option<String>,
}

pub const METHOD_LIST: &[&str] = &[
    "help",
    "list_methods",
    "status",
    "index_repository",
    "index_single_file",
    "parse",
    "extract",
    "find_entity",
    "get_dependencies",
    "get_dependents",
    "trace_import_chain",
    "find_related",
    "execute_query",
    "graph_stats",
];

const METHOD_ALIASES: &[(&str, &str)] = &[
    ("index_repo", "index_repository"),
    ("parse_ast", "parse"),
    ("extract_code_entities", "extract"),
    ("index_status", "status"),
    ("trace_imports", "trace_import_chain"),
];

fn canonical_method(method: &str) -> &str {
    METHOD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == method)
        .map(|(_, target)| *target)
        .unwrap_or(method)
}

fn schema_value<T: schemars::JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let raw = serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}));
    simplify_schema(raw)
}

/// Return a simplified JSON Schema for the params struct of the given method.
pub fn method_param_schema(method: &str) -> Value {
    match canonical_method(method) {
        "index_single_file" | "parse" | "extract" => schema_value::<PathParams>(),
        "find_entity" | "get_dependencies" | "get_dependents" => schema_value::<NameParams>(),
        "trace_import_chain" => schema_value::<TraceImportParams>(),
        "find_related" => schema_value::<FindRelatedParams>(),
        "execute_query" => schema_value::<ExecuteQueryParams>(),
        "list_methods" => schema_value::<ListMethodsParams>(),
        _ => json!({"type": "object"}),
    }
}

fn simplify_schema(mut schema: Value) -> Value {
    let definitions = schema
        .get("definitions")
        .cloned()
        .unwrap_or_else(|| json!({}));
    inline_refs(&mut schema, &definitions);
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("definitions");
        obj.remove("title");
    }
    schema
}

/// Inline `$ref` references and collapse `Option<T>` into the inner schema.
fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            let ref_name = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .map(str::to_string);
            if let Some(def) = ref_name.and_then(|name| definitions.get(&name)) {
                let mut inlined = def.clone();
                inline_refs(&mut inlined, definitions);
                *value = inlined;
                return;
            }

            if let Some(types) = map.get("type").and_then(Value::as_array).cloned()
                && types.len() == 2
                && let Some(inner) = types.iter().find(|t| t.as_str() != Some("null"))
            {
                map.insert("type".to_string(), inner.clone());
            }

            for v in map.values_mut() {
                inline_refs(v, definitions);
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                inline_refs(item, definitions);
            }
        }
        _ => {}
    }
}

struct MethodDoc {
    name: &'static str,
    summary: &'static str,
    key_params: &'static [&'static str],
}

const METHOD_DOCS: &[MethodDoc] = &[
    MethodDoc {
        name: "help",
        summary: "Show RPC help, aliases, and examples.",
        key_params: &[],
    },
    MethodDoc {
        name: "list_methods",
        summary: "List method names, docs, aliases and parameter schemas.",
        key_params: &["format"],
    },
    MethodDoc {
        name: "status",
        summary: "Reports whether the indexer is ready.",
        key_params: &[],
    },
    MethodDoc {
        name: "index_repository",
        summary: "Index every Python file below the repository root in batches of 3.",
        key_params: &[],
    },
    MethodDoc {
        name: "index_single_file",
        summary: "Upsert one file's File node and all entities it declares.",
        key_params: &["path"],
    },
    MethodDoc {
        name: "parse",
        summary: "Parse one file and return its syntax node count.",
        key_params: &["path"],
    },
    MethodDoc {
        name: "extract",
        summary: "Re-run entity extraction for one file.",
        key_params: &["path"],
    },
    MethodDoc {
        name: "find_entity",
        summary: "Every node whose name equals the input, any label.",
        key_params: &["name"],
    },
    MethodDoc {
        name: "get_dependencies",
        summary: "What the function calls (one CALLS hop out).",
        key_params: &["name"],
    },
    MethodDoc {
        name: "get_dependents",
        summary: "Who calls the function (one CALLS hop in).",
        key_params: &["name"],
    },
    MethodDoc {
        name: "trace_import_chain",
        summary: "IMPORTS paths of 1 to 5 hops starting at a file.",
        key_params: &["path"],
    },
    MethodDoc {
        name: "find_related",
        summary: "One hop along CONTAINS, IMPORTS, CALLS, INHERITS_FROM or DECORATED_BY.",
        key_params: &["name", "relationship"],
    },
    MethodDoc {
        name: "execute_query",
        summary: "Run a read-only SQL query over the nodes and edges tables.",
        key_params: &["query"],
    },
    MethodDoc {
        name: "graph_stats",
        summary: "Node and edge counts by label and relationship type.",
        key_params: &[],
    },
];

fn alias_map() -> serde_json::Map<String, Value> {
    let mut aliases = serde_json::Map::new();
    for (alias, target) in METHOD_ALIASES {
        aliases.insert((*alias).to_string(), Value::String((*target).to_string()));
    }
    aliases
}

fn alias_reverse_map() -> HashMap<&'static str, Vec<&'static str>> {
    let mut map: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
    for (alias, target) in METHOD_ALIASES {
        map.entry(*target).or_default().push(*alias);
    }
    map
}

fn method_docs_json() -> Vec<Value> {
    let alias_reverse = alias_reverse_map();
    METHOD_DOCS
        .iter()
        .map(|doc| {
            let mut entry = serde_json::Map::new();
            entry.insert("name".to_string(), Value::String(doc.name.to_string()));
            entry.insert(
                "summary".to_string(),
                Value::String(doc.summary.to_string()),
            );
            if !doc.key_params.is_empty() {
                entry.insert("key_params".to_string(), json!(doc.key_params));
            }
            if let Some(aliases) = alias_reverse.get(doc.name) {
                entry.insert("aliases".to_string(), json!(aliases));
            }
            entry.insert("params".to_string(), method_param_schema(doc.name));
            Value::Object(entry)
        })
        .collect()
}

fn method_help() -> Value {
    json!({
        "summary": "repograph indexes a Python repository into a property graph and answers read-only structural queries over JSONL RPC.",
        "methods": method_docs_json(),
        "aliases": alias_map(),
        "errors": "Failures return {error: {kind, message}}; kind is one of parse_error, io_error, graph_write_error, graph_read_error, validation_error, safety_error, invalid_params.",
        "examples": [
            r#"{"id":1,"method":"index_repository"}"#,
            r#"{"id":2,"method":"find_entity","params":{"name":"UserService"}}"#,
            r#"{"id":3,"method":"find_related","params":{"name":"UserService","relationship":"INHERITS_FROM"}}"#,
            r#"{"id":4,"method":"execute_query","params":{"query":"SELECT label, COUNT(*) AS n FROM nodes GROUP BY label"}}"#,
            r#"repograph request --method trace_import_chain --params '{"path":"/repo/app/main.py"}'"#,
            "repograph mcp-serve --repo .",
        ]
    })
}

fn method_list(params: Value) -> crate::error::Result<Value> {
    let params: ListMethodsParams = if params.is_null() {
        ListMethodsParams::default()
    } else {
        handlers::parse_params(params)?
    };
    let format = params
        .format
        .as_deref()
        .unwrap_or("details")
        .trim()
        .to_ascii_lowercase();
    if format == "names" || format == "name" || format == "list" {
        return Ok(json!(METHOD_LIST));
    }
    Ok(json!({
        "methods": method_docs_json(),
        "aliases": alias_map(),
        "names": METHOD_LIST,
    }))
}

pub fn serve(repo_root: PathBuf, db_path: PathBuf, scan_options: scan::ScanOptions) -> Result<()> {
    let app = App::new(repo_root, db_path, scan_options)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(value) => value,
            Err(err) => {
                tracing::error!("stdin error: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => app.handle_request(request),
            Err(err) => error_response(
                Value::Null,
                "invalid_request",
                &format!("invalid request: {err}"),
            ),
        };

        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    Ok(())
}

pub fn call(
    repo_root: PathBuf,
    db_path: PathBuf,
    method: String,
    params_raw: &str,
    id_raw: &str,
) -> Result<String> {
    let params: Value = serde_json::from_str(params_raw).with_context(|| "parse params JSON")?;
    let id = parse_value(id_raw);
    let app = App::new(repo_root, db_path, scan::ScanOptions::default())?;
    let request = RpcRequest { id, method, params };
    let response = app.handle_request(request);
    Ok(serde_json::to_string(&response)?)
}

/// Indexer and query engine sharing one graph store.
pub struct App {
    indexer: Indexer,
    query: QueryEngine,
}

impl App {
    pub fn new(repo_root: PathBuf, db_path: PathBuf, scan_options: scan::ScanOptions) -> Result<Self> {
        let location = db_path.to_string_lossy().into_owned();
        let store = Arc::new(
            GraphStore::open(&location)
                .with_context(|| format!("open graph store {}", db_path.display()))?,
        );
        Ok(Self::from_store(repo_root, store, scan_options))
    }

    pub fn from_store(
        repo_root: PathBuf,
        store: Arc<GraphStore>,
        scan_options: scan::ScanOptions,
    ) -> Self {
        let query = QueryEngine::new(store.clone());
        let indexer = Indexer::new_with_options(repo_root, store, scan_options);
        Self { indexer, query }
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    fn handle_request(&self, req: RpcRequest) -> RpcResponse {
        let id = req.id.clone();
        match handle_method(self, &req.method, req.params) {
            Ok(value) => RpcResponse {
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => error_response(id, error_kind(&err), &format!("{err:#}")),
        }
    }
}

/// Stable error kind for a transport payload; typed errors keep theirs.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<Error>()
        .map(Error::kind)
        .unwrap_or("request_error")
}

pub fn handle_method(app: &App, method: &str, params: Value) -> Result<Value> {
    let start = Instant::now();
    let value = match canonical_method(method) {
        "help" => method_help(),
        "list_methods" => method_list(params)?,
        "status" => handlers::handle_status(),
        "index_repository" => handlers::handle_index_repository(app),
        "index_single_file" => handlers::handle_index_single_file(app, params)?,
        "parse" => handlers::handle_parse(app, params)?,
        "extract" => handlers::handle_extract(app, params)?,
        "find_entity" => handlers::handle_find_entity(app, params)?,
        "get_dependencies" => handlers::handle_get_dependencies(app, params)?,
        "get_dependents" => handlers::handle_get_dependents(app, params)?,
        "trace_import_chain" => handlers::handle_trace_import_chain(app, params)?,
        "find_related" => handlers::handle_find_related(app, params)?,
        "execute_query" => handlers::handle_execute_query(app, params)?,
        "graph_stats" => handlers::handle_graph_stats(app)?,
        other => {
            return Err(anyhow::anyhow!("unknown method: {other}"));
        }
    };

    let elapsed = start.elapsed();
    if elapsed.as_millis() > 100 {
        tracing::info!(method, elapsed_ms = elapsed.as_millis() as u64, "slow request");
    }
    Ok(value)
}

fn error_response(id: Value, kind: &str, message: &str) -> RpcResponse {
    RpcResponse {
        id,
        result: None,
        error: Some(RpcError {
            kind: kind.to_string(),
            message: message.to_string(),
        }),
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
