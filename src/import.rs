//! Row validation and the all-or-nothing upsert merge of an import batch.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use thiserror::Error;
use tracing::{info, warn};

use crate::codec::{
    self, DecodeError, RawRow, COL_NAME, COL_SCORE_A, COL_SCORE_B, COL_STUDENT_NUMBER,
};
use crate::config::ImportConfig;
use crate::store::{now_seconds, StoreError, StudentRecord, StudentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("学号或姓名不能为空")]
    EmptyIdentity,
    #[error("成绩必须为数字")]
    NonNumericScore,
    #[error("成绩必须在0-100之间")]
    ScoreOutOfRange,
}

impl RowError {
    pub fn kind(&self) -> &'static str {
        match self {
            RowError::EmptyIdentity => "empty_identity",
            RowError::NonNumericScore => "non_numeric_score",
            RowError::ScoreOutOfRange => "score_out_of_range",
        }
    }
}

/// A row error attributed to its source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub line: usize,
    pub error: RowError,
}

impl fmt::Display for RowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "第{}行: {}", self.line, self.error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRow {
    pub line: usize,
    pub student_number: String,
    pub name: String,
    pub score_a: f64,
    pub score_b: f64,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("导入过程中发现以下错误：\n{}", join_failures(.0))]
    Rows(Vec<RowFailure>),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn join_failures(failures: &[RowFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Batch(#[from] BatchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    /// Inserted plus updated rows.
    pub applied: usize,
}

/// Checks run in order and the first failure wins: identity, numeric, range.
pub fn validate(row: &RawRow) -> Result<ValidatedRow, RowFailure> {
    let fail = |error| RowFailure {
        line: row.line,
        error,
    };
    let student_number = row.field(COL_STUDENT_NUMBER).trim();
    let name = row.field(COL_NAME).trim();
    if student_number.is_empty() || name.is_empty() {
        return Err(fail(RowError::EmptyIdentity));
    }
    let parse = |col: &str| row.field(col).trim().parse::<f64>();
    let (Ok(score_a), Ok(score_b)) = (parse(COL_SCORE_A), parse(COL_SCORE_B)) else {
        return Err(fail(RowError::NonNumericScore));
    };
    let in_range = |v: f64| (0.0..=100.0).contains(&v);
    if !in_range(score_a) || !in_range(score_b) {
        return Err(fail(RowError::ScoreOutOfRange));
    }
    Ok(ValidatedRow {
        line: row.line,
        student_number: student_number.to_string(),
        name: name.to_string(),
        score_a,
        score_b,
    })
}

/// Validates every row; no early exit so every offending line is reported.
pub fn validate_batch(rows: &[RawRow]) -> Vec<Result<ValidatedRow, RowFailure>> {
    rows.iter().map(validate).collect()
}

#[derive(Debug, Clone, PartialEq)]
enum StagedUpsert {
    Insert(StudentRecord),
    Update(StudentRecord),
}

/// Upserts planned against a snapshot of the store, written in one transaction.
#[derive(Debug, Default)]
struct StagedBatch {
    ops: Vec<StagedUpsert>,
    by_number: HashMap<String, usize>,
    rows: usize,
}

impl StagedBatch {
    fn stage(
        &mut self,
        store: &StudentStore<'_>,
        row: ValidatedRow,
        now: NaiveDateTime,
    ) -> Result<(), StoreError> {
        self.rows += 1;
        // A number repeated within the batch updates the earlier staged entry.
        if let Some(&idx) = self.by_number.get(&row.student_number) {
            let (StagedUpsert::Insert(rec) | StagedUpsert::Update(rec)) = &mut self.ops[idx];
            rec.name = row.name;
            rec.score_a = row.score_a;
            rec.score_b = row.score_b;
            return Ok(());
        }
        let op = match store.get(&row.student_number)? {
            Some(mut existing) => {
                existing.name = row.name;
                existing.score_a = row.score_a;
                existing.score_b = row.score_b;
                StagedUpsert::Update(existing)
            }
            None => StagedUpsert::Insert(StudentRecord {
                student_number: row.student_number.clone(),
                name: row.name,
                score_a: row.score_a,
                score_b: row.score_b,
                created_at: Some(now),
            }),
        };
        self.by_number.insert(row.student_number, self.ops.len());
        self.ops.push(op);
        Ok(())
    }

    fn write(&self, store: &StudentStore<'_>) -> Result<(usize, usize), StoreError> {
        let (mut inserted, mut updated) = (0usize, 0usize);
        for op in &self.ops {
            match op {
                StagedUpsert::Insert(rec) => {
                    store.insert(rec)?;
                    inserted += 1;
                }
                StagedUpsert::Update(rec) => {
                    store.update(rec)?;
                    updated += 1;
                }
            }
        }
        Ok((inserted, updated))
    }
}

/// All-or-nothing: any failed row rejects the batch untouched; a persistence
/// error after staging rolls back every write of the batch.
pub fn apply_batch(
    conn: &Connection,
    outcomes: Vec<Result<ValidatedRow, RowFailure>>,
) -> Result<BatchResult, BatchError> {
    let mut valid = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(row) => valid.push(row),
            Err(f) => failures.push(f),
        }
    }
    if !failures.is_empty() {
        warn!(failed = failures.len(), "import batch rejected");
        return Err(BatchError::Rows(failures));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(StoreError::WriteFailure)?;
    let store = StudentStore::new(&tx);
    let now = now_seconds();
    let mut staged = StagedBatch::default();
    for row in valid {
        staged.stage(&store, row, now)?;
    }
    // Dropping `tx` on an early return rolls the batch back.
    let (inserted, updated) = staged.write(&store)?;
    tx.commit().map_err(StoreError::WriteFailure)?;

    info!(inserted, updated, rows = staged.rows, "import batch applied");
    Ok(BatchResult {
        applied: staged.rows,
    })
}

/// Decode, validate and merge one uploaded file.
pub fn import_bytes(
    conn: &Connection,
    bytes: &[u8],
    extension: &str,
    config: &ImportConfig,
) -> Result<BatchResult, ImportError> {
    let table = codec::decode(bytes, extension, config)?;
    info!(
        format = table.format.as_str(),
        encoding = table.encoding.unwrap_or("-"),
        rows = table.rows.len(),
        "import file decoded"
    );
    let outcomes = validate_batch(&table.rows);
    Ok(apply_batch(conn, outcomes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(line: usize, sno: &str, name: &str, a: &str, b: &str) -> RawRow {
        let fields = [
            (COL_STUDENT_NUMBER, sno),
            (COL_NAME, name),
            (COL_SCORE_A, a),
            (COL_SCORE_B, b),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        RawRow { line, fields }
    }

    #[test]
    fn identity_check_runs_before_numeric_check() {
        let err = validate(&raw(2, "  ", "Li", "abc", "60")).expect_err("empty identity");
        assert_eq!(err.error, RowError::EmptyIdentity);
    }

    #[test]
    fn out_of_range_is_attributed_to_its_line() {
        let err = validate(&raw(7, "A1", "Li", "105", "60")).expect_err("range");
        assert_eq!(
            err,
            RowFailure {
                line: 7,
                error: RowError::ScoreOutOfRange
            }
        );
        assert_eq!(err.to_string(), "第7行: 成绩必须在0-100之间");
    }

    #[test]
    fn bounds_are_inclusive_and_values_trimmed() {
        let ok = validate(&raw(2, " A1 ", " Li ", " 0 ", "100")).expect("valid");
        assert_eq!(ok.student_number, "A1");
        assert_eq!(ok.name, "Li");
        assert_eq!((ok.score_a, ok.score_b), (0.0, 100.0));
        assert_eq!(
            validate(&raw(2, "A1", "Li", "", "1")).expect_err("blank").error,
            RowError::NonNumericScore
        );
        assert_eq!(
            validate(&raw(2, "A1", "Li", "NaN", "1")).expect_err("nan").error,
            RowError::ScoreOutOfRange
        );
    }
}
