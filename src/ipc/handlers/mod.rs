pub mod auth;
pub mod core;
pub mod import_export;
pub mod reports;
pub mod students;

use std::path::PathBuf;

use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request, RequestContext};

pub(crate) type Handler =
    fn(&RequestContext<'_>, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

/// Gate for every data method: a workspace must be open and a user logged in.
pub(crate) fn request_context(state: &AppState) -> Result<RequestContext<'_>, HandlerErr> {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_deref()) else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let Some(session) = state.session.as_ref() else {
        return Err(HandlerErr::new("not_authenticated", "请先登录"));
    };
    Ok(RequestContext {
        conn,
        workspace,
        session,
        import_config: &state.import_config,
        pdf_font: state.pdf_font.as_deref(),
        artifact_dir: &state.artifact_dir,
    })
}

/// Runs `f` with a request context and wraps its result in the envelope.
pub(crate) fn with_context(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(
        &RequestContext<'_>,
        &serde_json::Value,
    ) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    match request_context(state).and_then(|ctx| f(&ctx, &req.params)) {
        Ok(result) => crate::ipc::error::ok(&req.id, result),
        Err(e) => {
            tracing::warn!(code = e.code, message = %e.message, "request failed");
            e.response(&req.id)
        }
    }
}

pub(crate) fn str_param<'p>(
    params: &'p serde_json::Value,
    key: &str,
) -> Result<&'p str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing params.{key}")))
}

pub(crate) fn opt_str_param<'p>(params: &'p serde_json::Value, key: &str) -> Option<&'p str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Scores may arrive as JSON numbers or as form-style strings.
pub(crate) fn score_param(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    let v = params.get(key);
    let parsed = match v {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        HandlerErr::bad_params("成绩必须是数字！")
            .with_details(serde_json::json!({ "field": key }))
    })
}

pub(crate) fn out_dir_param(ctx: &RequestContext<'_>, params: &serde_json::Value) -> PathBuf {
    opt_str_param(params, "outDir")
        .map(PathBuf::from)
        .unwrap_or_else(|| ctx.workspace.to_path_buf())
}
