use serde_json::json;
use tracing::info;

use super::students::student_json;
use super::{with_context, Handler};
use crate::backup;
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request, RequestContext};
use crate::report::{self, RECENT_LIMIT};
use crate::store::{now_seconds, StudentStore};

fn to_json<T: serde::Serialize>(v: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(v).map_err(|e| HandlerErr::new("serialize_failed", e.to_string()))
}

fn reports_dashboard(
    ctx: &RequestContext<'_>,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let store = StudentStore::new(ctx.conn);
    let records = store.list_all()?;
    let d = report::dashboard(&records, store.recent(RECENT_LIMIT)?);
    Ok(json!({
        "studentCount": d.student_count,
        "averageTotal": d.average_total,
        "passCount": d.pass_count,
        "recent": d.recent.iter().map(student_json).collect::<Vec<_>>(),
        "username": ctx.session.username,
    }))
}

fn reports_stats(
    ctx: &RequestContext<'_>,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let records = StudentStore::new(ctx.conn).list_all()?;
    match report::stats(&records) {
        Some(stats) => {
            let mut v = to_json(&stats)?;
            v["empty"] = json!(false);
            Ok(v)
        }
        None => Ok(json!({ "empty": true, "message": "当前没有学生数据。" })),
    }
}

fn reports_snapshot(
    ctx: &RequestContext<'_>,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let records = StudentStore::new(ctx.conn).list_all()?;
    if records.is_empty() {
        return Ok(json!({ "empty": true, "message": "当前没有学生数据。" }));
    }
    let ranking = report::ranking(&records);
    let totals = report::total_buckets(&records);
    let path = backup::write_snapshot(ctx.artifact_dir, &ranking, &totals, now_seconds())
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    info!(path = %path.display(), rows = ranking.len(), "snapshot written");

    let ranked: Vec<_> = ranking
        .iter()
        .map(|r| {
            let mut v = student_json(&r.record);
            v["rank"] = json!(r.rank);
            v
        })
        .collect();
    Ok(json!({
        "empty": false,
        "path": path.to_string_lossy(),
        "ranking": ranked,
        "ratios": to_json(&totals)?,
    }))
}

fn reports_backup(
    ctx: &RequestContext<'_>,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let records = StudentStore::new(ctx.conn).list_all()?;
    let path = backup::write_backup(ctx.artifact_dir, &records, now_seconds())
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    info!(path = %path.display(), rows = records.len(), "backup written");
    Ok(json!({
        "path": path.to_string_lossy(),
        "rowCount": records.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "reports.dashboard" => reports_dashboard,
        "reports.stats" => reports_stats,
        "reports.snapshot" => reports_snapshot,
        "reports.backup" => reports_backup,
        _ => return None,
    };
    Some(with_context(state, req, f))
}
