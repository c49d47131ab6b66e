use crate::backup;
use crate::db;
use crate::ipc::helpers::{db_conn, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn path_param(req: &Request, key: &str) -> Result<PathBuf, HandlerErr> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(PathBuf::from(v.trim())),
        _ => Err(HandlerErr::new("bad_params", format!("missing {}", key))),
    }
}

/// Backups need an open workspace; `workspacePath` only redirects the target.
fn target_workspace(state: &AppState, req: &Request) -> Result<PathBuf, HandlerErr> {
    db_conn(state)?;
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn backup_export(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let out = path_param(req, "outPath")?;
    let workspace_path = target_workspace(state, req)?;

    let export = backup::export_workspace_bundle(&workspace_path, &out).map_err(|e| {
        let details = json!({ "path": out.to_string_lossy() });
        HandlerErr::detailed("io_failed", e.to_string(), details)
    })?;
    tracing::info!(
        path = %out.display(),
        sha256 = %export.db_sha256,
        "workspace bundle exported"
    );

    Ok(json!({
        "path": out.to_string_lossy(),
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256
    }))
}

fn backup_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let src = path_param(req, "inPath")?;
    let workspace_path = target_workspace(state, req)?;
    if !src.is_file() {
        let details = json!({ "path": src.to_string_lossy() });
        return Err(HandlerErr::detailed("not_found", "bundle file not found", details));
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            // The existing database is untouched on failure; reattach it.
            if let Some(current) = state.workspace.clone() {
                state.db = db::open_db(&current).ok();
            }
            let details = json!({ "path": src.to_string_lossy() });
            return Err(HandlerErr::detailed("io_failed", e.to_string(), details));
        }
    };

    let conn = db::open_db(&workspace_path)
        .map_err(|e| HandlerErr::new("db_open_failed", e.to_string()))?;
    state.workspace = Some(workspace_path.clone());
    state.db = Some(conn);
    tracing::info!(
        workspace = %workspace_path.display(),
        format = %import.bundle_format_detected,
        "workspace bundle imported"
    );

    Ok(json!({
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => backup_export(state, req),
        "backup.importWorkspaceBundle" => backup_import(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
