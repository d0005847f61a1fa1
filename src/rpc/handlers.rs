use super::{
    App, ExecuteQueryParams, FindRelatedParams, NameParams, PathParams, TraceImportParams,
};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::Path;

pub(super) fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|err| Error::InvalidParams(err.to_string()))
}

pub(super) fn handle_status() -> Value {
    json!({ "ready": true, "service": "repograph" })
}

pub(super) fn handle_index_repository(app: &App) -> Value {
    json!(app.indexer().index_repository())
}

pub(super) fn handle_index_single_file(app: &App, params: Value) -> Result<Value> {
    let params: PathParams = parse_params(params)?;
    let indexed = app.indexer().index_file(Path::new(&params.path))?;
    Ok(json!(indexed))
}

pub(super) fn handle_parse(app: &App, params: Value) -> Result<Value> {
    let params: PathParams = parse_params(params)?;
    let nodes = app.indexer().parse(Path::new(&params.path))?;
    Ok(json!({ "nodes": nodes }))
}

pub(super) fn handle_extract(app: &App, params: Value) -> Result<Value> {
    let params: PathParams = parse_params(params)?;
    let extracted = app.indexer().extract(Path::new(&params.path))?;
    Ok(json!(extracted))
}

pub(super) fn handle_find_entity(app: &App, params: Value) -> Result<Value> {
    let params: NameParams = parse_params(params)?;
    let results = app.query().find_entity(&params.name)?;
    Ok(json!({ "results": results }))
}

pub(super) fn handle_get_dependencies(app: &App, params: Value) -> Result<Value> {
    let params: NameParams = parse_params(params)?;
    let results = app.query().get_dependencies(&params.name)?;
    Ok(json!({ "results": results }))
}

pub(super) fn handle_get_dependents(app: &App, params: Value) -> Result<Value> {
    let params: NameParams = parse_params(params)?;
    let results = app.query().get_dependents(&params.name)?;
    Ok(json!({ "results": results }))
}

pub(super) fn handle_trace_import_chain(app: &App, params: Value) -> Result<Value> {
    let params: TraceImportParams = parse_params(params)?;
    let path = app
        .indexer()
        .resolve_path(Path::new(&params.path))
        .map(|resolved| resolved.display().to_string())
        .unwrap_or(params.path);
    let results = app.query().trace_import_chain(&path)?;
    Ok(json!({ "results": results }))
}

pub(super) fn handle_find_related(app: &App, params: Value) -> Result<Value> {
    let params: FindRelatedParams = parse_params(params)?;
    let results = app
        .query()
        .find_related(&params.name, &params.relationship)?;
    Ok(json!({ "results": results }))
}

pub(super) fn handle_execute_query(app: &App, params: Value) -> Result<Value> {
    let params: ExecuteQueryParams = parse_params(params)?;
    let results = app.query().execute_query(&params.query)?;
    Ok(json!({ "results": results }))
}

pub(super) fn handle_graph_stats(app: &App) -> Result<Value> {
    Ok(json!(app.indexer().store().stats()?))
}
