use std::path::Path;

use serde_json::json;
use tracing::info;

use super::{opt_str_param, out_dir_param, request_context, str_param, with_context, Handler};
use crate::backup;
use crate::codec::{delimited, pdf, DecodeError};
use crate::config::{ImportConfig, IMPORT_SETTINGS_KEY};
use crate::db;
use crate::import::{self, BatchError, ImportError};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request, RequestContext};
use crate::store::{now_seconds, StudentStore};

pub const PDF_FILE_NAME: &str = "student_scores.pdf";

fn decode_error(e: DecodeError) -> HandlerErr {
    let mut details = json!({ "kind": e.kind() });
    if let DecodeError::MissingColumns { missing, present } = &e {
        details["missing"] = json!(missing);
        details["present"] = json!(present);
    }
    HandlerErr::new("decode_failed", e.to_string()).with_details(details)
}

fn import_error(e: ImportError) -> HandlerErr {
    match e {
        ImportError::Decode(d) => decode_error(d),
        ImportError::Batch(BatchError::Rows(failures)) => {
            let errors: Vec<_> = failures
                .iter()
                .map(|f| {
                    json!({ "line": f.line, "kind": f.error.kind(), "message": f.to_string() })
                })
                .collect();
            let message = BatchError::Rows(failures).to_string();
            HandlerErr::new("rows_invalid", message).with_details(json!({ "errors": errors }))
        }
        ImportError::Batch(BatchError::Store(s)) => HandlerErr::new("store_failed", s.to_string()),
    }
}

fn import_file(
    ctx: &RequestContext<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let path = Path::new(str_param(params, "path")?);
    // The declared name decides the format; it defaults to the path itself.
    let declared = opt_str_param(params, "fileName")
        .map(Path::new)
        .unwrap_or(path);
    let extension = declared
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    let io_failed = |e: std::io::Error| {
        HandlerErr::new("io_failed", format!("读取文件失败：{e}"))
            .with_details(json!({ "path": path.to_string_lossy() }))
    };
    let size = std::fs::metadata(path).map_err(io_failed)?.len();
    let limit = ctx.import_config.max_bytes;
    if size > limit as u64 {
        return Err(decode_error(DecodeError::TooLarge {
            size: usize::try_from(size).unwrap_or(usize::MAX),
            limit,
        }));
    }
    let bytes = std::fs::read(path).map_err(io_failed)?;
    let result = import::import_bytes(ctx.conn, &bytes, extension, ctx.import_config)
        .map_err(import_error)?;
    info!(applied = result.applied, by = %ctx.session.username, "import finished");
    Ok(json!({
        "applied": result.applied,
        "message": format!("成功导入{}条数据！", result.applied),
    }))
}

fn export_csv(
    ctx: &RequestContext<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let records = StudentStore::new(ctx.conn).list_all()?;
    let bytes = delimited::encode_csv(&records)
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    let out_dir = out_dir_param(ctx, params);
    let stem = format!("student_scores_{}", backup::file_stamp(now_seconds()));
    let path = backup::persist_new(&out_dir, &stem, "csv", &bytes)
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    info!(path = %path.display(), rows = records.len(), "csv export written");
    Ok(json!({
        "path": path.to_string_lossy(),
        "fileName": path.file_name().map(|n| n.to_string_lossy().to_string()),
        "disposition": "attachment",
        "contentType": "text/csv; charset=utf-8",
        "rowCount": records.len(),
    }))
}

fn export_pdf(
    ctx: &RequestContext<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let records = StudentStore::new(ctx.conn).list_all()?;
    let page_count = pdf::page_count(&pdf::layout_report(&records));
    let bytes = pdf::render_pdf(&records, ctx.pdf_font)
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    let out_dir = out_dir_param(ctx, params);
    let path = backup::persist_replace(&out_dir, PDF_FILE_NAME, &bytes)
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    info!(path = %path.display(), pages = page_count, "pdf export written");
    Ok(json!({
        "path": path.to_string_lossy(),
        "fileName": PDF_FILE_NAME,
        "disposition": "attachment",
        "contentType": "application/pdf",
        "pageCount": page_count,
    }))
}

fn settings_import_get(
    ctx: &RequestContext<'_>,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    Ok(ctx.import_config.to_json())
}

fn save_import_settings(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<ImportConfig, HandlerErr> {
    let ctx = request_context(state)?;
    let cfg =
        ImportConfig::from_settings(params).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    db::settings_set_json(ctx.conn, IMPORT_SETTINGS_KEY, &cfg.to_json())
        .map_err(|e| HandlerErr::new("store_failed", e.to_string()))?;
    Ok(cfg)
}

fn handle_settings_import_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    match save_import_settings(state, &req.params) {
        Ok(cfg) => {
            let result = cfg.to_json();
            info!(settings = %result, "import settings updated");
            state.import_config = cfg;
            ok(&req.id, result)
        }
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "import.file" => import_file,
        "export.csv" => export_csv,
        "export.pdf" => export_pdf,
        "settings.importGet" => settings_import_get,
        "settings.importSet" => return Some(handle_settings_import_set(state, req)),
        _ => return None,
    };
    Some(with_context(state, req, f))
}
