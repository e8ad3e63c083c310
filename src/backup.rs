use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::codec::format_score;
use crate::report::{RankedStudent, TotalBuckets};
use crate::store::{StudentRecord, TIMESTAMP_FORMAT};

pub const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const RULE_WIDTH: usize = 50;
const MAX_NAME_ATTEMPTS: usize = 100;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to create temp file in {dir}: {source}")]
    Create {
        dir: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("no free file name for {0} after {MAX_NAME_ATTEMPTS} attempts")]
    NameExhausted(String),
}

pub fn file_stamp(now: NaiveDateTime) -> String {
    now.format(FILE_STAMP_FORMAT).to_string()
}

pub fn render_snapshot(ranking: &[RankedStudent], totals: &TotalBuckets) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "学生成绩排名表");
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(out, "排名\t学号\t姓名\t课程1\t课程2\t总分");
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
    for r in ranking {
        let rec = &r.record;
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            r.rank,
            rec.student_number,
            rec.name,
            format_score(rec.score_a),
            format_score(rec.score_b),
            format_score(rec.total())
        );
    }
    let _ = writeln!(out, "\n\n成绩分析");
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(out, "不及格比例：{:.2}%", totals.fail_ratio);
    let _ = writeln!(out, "及格比例：{:.2}%", totals.pass_ratio);
    let _ = writeln!(out, "良好比例（总分150-169）：{:.2}%", totals.good_ratio);
    let _ = writeln!(out, "优秀比例（总分≥170）：{:.2}%", totals.excellent_ratio);
    out
}

pub fn render_backup(records: &[StudentRecord], now: NaiveDateTime) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "学生成绩管理系统 - 数据备份");
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(out, "备份时间：{}", now.format(TIMESTAMP_FORMAT));
    let _ = writeln!(out, "{}\n", "-".repeat(RULE_WIDTH));
    let _ = writeln!(out, "学号\t姓名\t课程1\t课程2\t总分\t录入时间");
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
    for rec in records {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            rec.student_number,
            rec.name,
            format_score(rec.score_a),
            format_score(rec.score_b),
            format_score(rec.total()),
            rec.created_at_text()
        );
    }
    out
}

/// Writes `student_scores_<stamp>.txt` into `dir`.
pub fn write_snapshot(
    dir: &Path,
    ranking: &[RankedStudent],
    totals: &TotalBuckets,
    now: NaiveDateTime,
) -> Result<PathBuf, ArtifactError> {
    let name = format!("student_scores_{}", file_stamp(now));
    persist_new(dir, &name, "txt", render_snapshot(ranking, totals).as_bytes())
}

/// Writes `backup_<stamp>.txt` into `dir`.
pub fn write_backup(
    dir: &Path,
    records: &[StudentRecord],
    now: NaiveDateTime,
) -> Result<PathBuf, ArtifactError> {
    let name = format!("backup_{}", file_stamp(now));
    persist_new(dir, &name, "txt", render_backup(records, now).as_bytes())
}

fn stage_temp(dir: &Path, contents: &[u8]) -> Result<NamedTempFile, ArtifactError> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".scorebook-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|source| ArtifactError::Create {
            dir: dir.to_string_lossy().to_string(),
            source,
        })?;
    let path = tmp.path().to_string_lossy().to_string();
    let write_err = |source| ArtifactError::Write {
        path: path.clone(),
        source,
    };
    tmp.write_all(contents).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    Ok(tmp)
}

/// Writes a new, never-overwritten artifact `<stem>.<ext>`; if that name is
/// taken, `<stem>_1.<ext>`, `<stem>_2.<ext>`, ... are tried. The content goes
/// to a temp file first, so a failed write leaves nothing behind.
pub fn persist_new(
    dir: &Path,
    stem: &str,
    ext: &str,
    contents: &[u8],
) -> Result<PathBuf, ArtifactError> {
    let mut tmp = stage_temp(dir, contents)?;
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let file_name = if attempt == 0 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem}_{attempt}.{ext}")
        };
        let target = dir.join(file_name);
        match tmp.persist_noclobber(&target) {
            Ok(_) => return Ok(target),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => tmp = e.file,
            Err(e) => {
                return Err(ArtifactError::Write {
                    path: target.to_string_lossy().to_string(),
                    source: e.error,
                })
            }
        }
    }
    Err(ArtifactError::NameExhausted(format!("{stem}.{ext}")))
}

/// Atomically replaces `dir/file_name` with `contents`.
pub fn persist_replace(
    dir: &Path,
    file_name: &str,
    contents: &[u8],
) -> Result<PathBuf, ArtifactError> {
    let tmp = stage_temp(dir, contents)?;
    let target = dir.join(file_name);
    tmp.persist(&target).map_err(|e| ArtifactError::Write {
        path: target.to_string_lossy().to_string(),
        source: e.error,
    })?;
    Ok(target)
}
