use serde_json::json;

use super::{opt_str_param, score_param, str_param, with_context, Handler};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request, RequestContext};
use crate::store::{SortDirection, SortKey, StudentRecord, StudentStore};

pub(crate) fn student_json(r: &StudentRecord) -> serde_json::Value {
    json!({
        "sno": r.student_number,
        "name": r.name,
        "score1": r.score_a,
        "score2": r.score_b,
        "total": r.total(),
        "createdAt": r.created_at_text(),
    })
}

fn not_found(sno: &str) -> HandlerErr {
    HandlerErr::new("not_found", "未找到该学生！").with_details(json!({ "sno": sno }))
}

fn identity_param(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = opt_str_param(params, key).unwrap_or("").trim();
    if v.is_empty() {
        return Err(HandlerErr::bad_params("学号和姓名不能为空！")
            .with_details(json!({ "field": key })));
    }
    Ok(v.to_string())
}

fn students_list(
    ctx: &RequestContext<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = SortKey::parse(opt_str_param(params, "sortBy").unwrap_or("sno"));
    let direction = SortDirection::parse(opt_str_param(params, "direction").unwrap_or("asc"));
    let rows = StudentStore::new(ctx.conn).list_sorted(key, direction)?;
    Ok(json!({
        "students": rows.iter().map(student_json).collect::<Vec<_>>(),
    }))
}

fn students_get(
    ctx: &RequestContext<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let sno = str_param(params, "sno")?;
    match StudentStore::new(ctx.conn).get(sno)? {
        Some(r) => Ok(json!({ "student": student_json(&r) })),
        None => Err(not_found(sno)),
    }
}

fn students_create(
    ctx: &RequestContext<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let score_a = score_param(params, "score1")?;
    let score_b = score_param(params, "score2")?;
    let sno = identity_param(params, "sno")?;
    let name = identity_param(params, "name")?;

    let store = StudentStore::new(ctx.conn);
    let record = StudentRecord::new(sno, name, score_a, score_b);
    store.insert(&record)?;
    tracing::info!(sno = %record.student_number, by = %ctx.session.username, "student created");
    Ok(json!({ "student": student_json(&record) }))
}

fn students_update(
    ctx: &RequestContext<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let sno = str_param(params, "sno")?;
    let store = StudentStore::new(ctx.conn);
    let Some(existing) = store.get(sno)? else {
        return Err(not_found(sno));
    };
    let score_a = score_param(params, "score1")?;
    let score_b = score_param(params, "score2")?;
    let name = opt_str_param(params, "name").unwrap_or("").trim();
    if name.is_empty() {
        return Err(
            HandlerErr::bad_params("姓名不能为空！").with_details(json!({ "field": "name" }))
        );
    }

    let updated = StudentRecord {
        name: name.to_string(),
        score_a,
        score_b,
        ..existing
    };
    store.update(&updated)?;
    Ok(json!({ "student": student_json(&updated) }))
}

fn students_delete(
    ctx: &RequestContext<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let sno = str_param(params, "sno")?;
    if !StudentStore::new(ctx.conn).delete(sno)? {
        return Err(not_found(sno));
    }
    tracing::info!(sno, by = %ctx.session.username, "student deleted");
    Ok(json!({ "deleted": sno }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "students.list" => students_list,
        "students.get" => students_get,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        _ => return None,
    };
    Some(with_context(state, req, f))
}
