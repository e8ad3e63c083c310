use crate::config::{ImportConfig, IMPORT_SETTINGS_KEY};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

/// Opens (or creates) the workspace database and loads its import settings.
/// Switching workspaces drops the current session.
pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    // Best-effort: a broken settings row must not prevent the workspace from opening.
    let import_config = match db::settings_get_json(&conn, IMPORT_SETTINGS_KEY) {
        Ok(Some(v)) => ImportConfig::from_settings(&v).unwrap_or_else(|e| {
            warn!(error = %e, "ignoring invalid import settings");
            ImportConfig::default()
        }),
        Ok(None) => ImportConfig::default(),
        Err(e) => {
            warn!(error = %e, "failed to read import settings");
            ImportConfig::default()
        }
    };
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.session = None;
    state.import_config = import_config;
    info!(workspace = %path.display(), "workspace opened");
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, &path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
