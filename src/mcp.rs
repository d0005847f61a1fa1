use crate::indexer::scan::{self, ScanOptions};
use crate::rpc::{self, App};
use anyhow::Result;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

const TOOL_NAME: &str = "repograph_query";

/// Tool text output above this size is replaced by a notice.
const MAX_TEXT_BYTES: usize = 512_000;

#[derive(Clone, Copy)]
enum TextMode {
    None,
    Compact,
    Pretty,
}

#[derive(Hash, Eq, PartialEq, Clone)]
struct Target {
    repo_root: PathBuf,
    db_path: PathBuf,
}

struct State {
    default_target: Target,
    scan_options: ScanOptions,
    apps: HashMap<Target, App>,
}

impl State {
    fn new(default_target: Target, scan_options: ScanOptions) -> Self {
        Self {
            default_target,
            scan_options,
            apps: HashMap::new(),
        }
    }

    fn app_for(&mut self, target: Target) -> Result<&App> {
        match self.apps.entry(target) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let target = entry.key().clone();
                let app = App::new(target.repo_root, target.db_path, self.scan_options)?;
                Ok(entry.insert(app))
            }
        }
    }
}

pub fn serve(repo_root: PathBuf, db_path: PathBuf, scan_options: ScanOptions) -> Result<()> {
    let mut state = State::new(Target { repo_root, db_path }, scan_options);
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

        let response = match serde_json::from_str::<Value>(&line) {
            Ok(value) => handle_message(value, &mut state),
            Err(err) => Some(jsonrpc_error(
                Value::Null,
                -32700,
                &format!("parse error: {err}"),
            )),
        };

        if let Some(payload) = response {
            writeln!(stdout, "{}", serde_json::to_string(&payload)?)?;
            stdout.flush()?;
        }
    }

    Ok(())
}

fn handle_message(message: Value, state: &mut State) -> Option<Value> {
    let id = message.get("id").cloned();
    let Some(method) = message.get("method").and_then(Value::as_str) else {
        return id.map(|id| jsonrpc_error(id, -32600, "invalid request"));
    };

    match method {
        "initialize" => Some(jsonrpc_result(id?, initialize_result(&message))),
        "notifications/initialized" => None,
        "ping" => id.map(|id| jsonrpc_result(id, json!({}))),
        "tools/list" => Some(jsonrpc_result(id?, json!({ "tools": [tool_descriptor()] }))),
        "tools/call" => Some(handle_tool_call(id?, &message, state)),
        "resources/list" => id.map(|id| jsonrpc_result(id, json!({ "resources": [] }))),
        "prompts/list" => id.map(|id| jsonrpc_result(id, json!({ "prompts": [] }))),
        _ => id.map(|id| jsonrpc_error(id, -32601, "method not found")),
    }
}

fn initialize_result(message: &Value) -> Value {
    let protocol = message
        .get("params")
        .and_then(|params| params.get("protocolVersion"))
        .cloned()
        .unwrap_or_else(|| Value::String("2024-11-05".to_string()));
    json!({
        "protocolVersion": protocol,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": "repograph",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "instructions": format!(
            "Use the {TOOL_NAME} tool with a method and params. Indexing: index_repository, \
index_single_file {{path}}, parse {{path}}, extract {{path}}, status. \
Queries: find_entity {{name}}, get_dependencies {{name}}, get_dependents {{name}}, \
trace_import_chain {{path}}, find_related {{name, relationship}}, execute_query {{query}}, graph_stats. \
Relationship types for find_related: CONTAINS, IMPORTS, CALLS, INHERITS_FROM, DECORATED_BY. \
execute_query takes read-only SQL over nodes(id, label, name, file, path, text, start_line, end_line) \
and edges(id, source_id, kind, target_id). Call help for full docs."
        ),
    })
}

fn tool_descriptor() -> Value {
    let mut methods: Vec<&str> = rpc::METHOD_LIST.to_vec();
    methods.sort_unstable();
    json!({
        "name": TOOL_NAME,
        "description": "Index a Python repository into a code graph and query it using a method + params payload.",
        "inputSchema": {
            "type": "object",
            "properties": {
                "method": {
                    "type": "string",
                    "enum": methods,
                    "description": "repograph RPC method name."
                },
                "params": {
                    "type": "object",
                    "description": "Method parameters. Call list_methods for per-method schemas."
                },
                "repo": {
                    "type": "string",
                    "description": "Optional repo root override for this call."
                },
                "db": {
                    "type": "string",
                    "description": "Optional graph store path override for this call."
                },
                "text_mode": {
                    "type": "string",
                    "enum": ["pretty", "compact", "none"],
                    "description": "Controls textual output size in tool responses."
                }
            },
            "required": ["method"]
        }
    })
}

fn handle_tool_call(id: Value, message: &Value, state: &mut State) -> Value {
    let Some(params) = message.get("params") else {
        return jsonrpc_error(id, -32602, "missing params");
    };
    let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
    if tool_name != TOOL_NAME {
        return jsonrpc_error(id, -32601, "unknown tool");
    }

    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let Some(method) = arguments.get("method").and_then(Value::as_str) else {
        return jsonrpc_error(id, -32602, "missing method");
    };
    let call_params = arguments.get("params").cloned().unwrap_or(Value::Null);
    let text_mode = text_mode_from_args(&arguments);
    let target = target_from_args(&arguments, &state.default_target);

    let result = state
        .app_for(target)
        .and_then(|app| rpc::handle_method(app, method, call_params));
    match result {
        Ok(value) => jsonrpc_result(id, call_result_ok(value, text_mode)),
        Err(err) => {
            tracing::debug!(method, "tool call failed: {err:#}");
            jsonrpc_result(
                id,
                call_result_error(rpc::error_kind(&err), &format!("{err:#}"), text_mode),
            )
        }
    }
}

fn call_result_ok(result: Value, text_mode: TextMode) -> Value {
    let content = match format_text(&result, text_mode) {
        Some(text) if text.len() > MAX_TEXT_BYTES => vec![json!({
            "type": "text",
            "text": format!(
                "Response too large ({} bytes). Narrow the query or read structuredContent.",
                text.len()
            )
        })],
        Some(text) => vec![json!({ "type": "text", "text": text })],
        None => Vec::new(),
    };
    let structured = if result.is_object() {
        result
    } else {
        json!({ "items": result })
    };
    json!({
        "content": content,
        "structuredContent": structured,
        "isError": false
    })
}

fn call_result_error(kind: &str, message: &str, text_mode: TextMode) -> Value {
    let content = match text_mode {
        TextMode::None => Vec::new(),
        _ => vec![json!({ "type": "text", "text": format!("{kind}: {message}") })],
    };
    json!({
        "content": content,
        "structuredContent": { "kind": kind, "message": message },
        "isError": true
    })
}

fn format_text(value: &Value, text_mode: TextMode) -> Option<String> {
    match text_mode {
        TextMode::None => None,
        TextMode::Compact => serde_json::to_string(value).ok(),
        TextMode::Pretty => serde_json::to_string_pretty(value).ok(),
    }
}

fn jsonrpc_result(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn jsonrpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}

fn target_from_args(arguments: &Value, defaults: &Target) -> Target {
    let repo_override = arguments
        .get("repo")
        .and_then(Value::as_str)
        .map(PathBuf::from);
    let db_override = arguments.get("db").and_then(Value::as_str).map(PathBuf::from);

    match (repo_override, db_override) {
        (None, None) => defaults.clone(),
        (None, Some(db_path)) => Target {
            repo_root: defaults.repo_root.clone(),
            db_path,
        },
        (Some(repo_root), db_override) => {
            let db_path = db_override.unwrap_or_else(|| default_db_path(&repo_root));
            Target { repo_root, db_path }
        }
    }
}

pub fn default_db_path(repo: &Path) -> PathBuf {
    repo.join(scan::STORE_DIR).join("graph.sqlite")
}

fn text_mode_from_args(arguments: &Value) -> TextMode {
    match arguments.get("text_mode").and_then(Value::as_str) {
        Some("none") => TextMode::None,
        Some("compact") => TextMode::Compact,
        _ => TextMode::Pretty,
    }
}
