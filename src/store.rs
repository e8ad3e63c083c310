use chrono::{Local, NaiveDateTime, Timelike};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use thiserror::Error;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SELECT_COLUMNS: &str = "SELECT sno, name, score1, score2, created_at FROM students";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("该学号已存在：{0}")]
    ConstraintViolation(String),
    #[error("保存数据时出错：{0}")]
    WriteFailure(#[source] rusqlite::Error),
    #[error("读取数据时出错：{0}")]
    Query(#[source] rusqlite::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::ConstraintViolation(_) => "duplicate_student",
            StoreError::WriteFailure(_) => "store_failed",
            StoreError::Query(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub student_number: String,
    pub name: String,
    pub score_a: f64,
    pub score_b: f64,
    pub created_at: Option<NaiveDateTime>,
}

impl StudentRecord {
    /// New record stamped with the current local time (second precision).
    pub fn new(
        student_number: impl Into<String>,
        name: impl Into<String>,
        score_a: f64,
        score_b: f64,
    ) -> Self {
        Self {
            student_number: student_number.into(),
            name: name.into(),
            score_a,
            score_b,
            created_at: Some(now_seconds()),
        }
    }

    pub fn total(&self) -> f64 {
        self.score_a + self.score_b
    }

    pub fn created_at_text(&self) -> String {
        self.created_at
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default()
    }

    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        let created: Option<String> = r.get(4)?;
        Ok(Self {
            student_number: r.get(0)?,
            name: r.get(1)?,
            score_a: r.get(2)?,
            score_b: r.get(3)?,
            created_at: created
                .and_then(|s| NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).ok()),
        })
    }
}

pub fn now_seconds() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    StudentNumber,
    Name,
    ScoreA,
    ScoreB,
    Total,
}

impl SortKey {
    /// Unknown keys fall back to the student number.
    pub fn parse(s: &str) -> Self {
        match s {
            "name" => SortKey::Name,
            "score1" => SortKey::ScoreA,
            "score2" => SortKey::ScoreB,
            "total" => SortKey::Total,
            _ => SortKey::StudentNumber,
        }
    }

    fn column_sql(self) -> &'static str {
        match self {
            SortKey::StudentNumber => "sno",
            SortKey::Name => "name",
            SortKey::ScoreA => "score1",
            SortKey::ScoreB => "score2",
            SortKey::Total => "score1 + score2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Student table access. Works over a plain connection or an open transaction.
pub struct StudentStore<'c> {
    conn: &'c Connection,
}

impl<'c> StudentStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, student_number: &str) -> Result<Option<StudentRecord>, StoreError> {
        self.conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE sno = ?"),
                [student_number],
                StudentRecord::from_row,
            )
            .optional()
            .map_err(StoreError::Query)
    }

    /// All records in natural (insertion) order.
    pub fn list_all(&self) -> Result<Vec<StudentRecord>, StoreError> {
        self.query_list(&format!("{SELECT_COLUMNS} ORDER BY id"))
    }

    pub fn list_sorted(
        &self,
        key: SortKey,
        direction: SortDirection,
    ) -> Result<Vec<StudentRecord>, StoreError> {
        self.query_list(&format!(
            "{SELECT_COLUMNS} ORDER BY {} {}, id",
            key.column_sql(),
            direction.sql()
        ))
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<StudentRecord>, StoreError> {
        self.query_list(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC LIMIT {limit}"
        ))
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
            .map_err(StoreError::Query)?;
        Ok(n as usize)
    }

    pub fn insert(&self, record: &StudentRecord) -> Result<(), StoreError> {
        let created = record
            .created_at
            .unwrap_or_else(now_seconds)
            .format(TIMESTAMP_FORMAT)
            .to_string();
        self.conn
            .execute(
                "INSERT INTO students(sno, name, score1, score2, created_at) VALUES(?, ?, ?, ?, ?)",
                (
                    &record.student_number,
                    &record.name,
                    record.score_a,
                    record.score_b,
                    created,
                ),
            )
            .map_err(|e| map_write_error(e, &record.student_number))?;
        Ok(())
    }

    /// Overwrites name and scores; number and creation time are never touched.
    pub fn update(&self, record: &StudentRecord) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE students SET name = ?, score1 = ?, score2 = ? WHERE sno = ?",
                (
                    &record.name,
                    record.score_a,
                    record.score_b,
                    &record.student_number,
                ),
            )
            .map_err(|e| map_write_error(e, &record.student_number))?;
        Ok(changed > 0)
    }

    pub fn delete(&self, student_number: &str) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM students WHERE sno = ?", [student_number])
            .map_err(StoreError::WriteFailure)?;
        Ok(changed > 0)
    }

    fn query_list(&self, sql: &str) -> Result<Vec<StudentRecord>, StoreError> {
        let mut stmt = self.conn.prepare(sql).map_err(StoreError::Query)?;
        let rows = stmt
            .query_map([], StudentRecord::from_row)
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)?;
        Ok(rows)
    }
}

fn map_write_error(e: rusqlite::Error, student_number: &str) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(f, msg)
            if f.code == ErrorCode::ConstraintViolation
                && msg.as_deref().is_some_and(|m| m.contains("students.sno")) =>
        {
            StoreError::ConstraintViolation(student_number.to_string())
        }
        _ => StoreError::WriteFailure(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn duplicate_insert_is_a_constraint_violation() {
        let conn = db::open_in_memory().expect("db");
        let store = StudentStore::new(&conn);
        store
            .insert(&StudentRecord::new("S1", "Li", 80.0, 90.0))
            .expect("first insert");
        let err = store
            .insert(&StudentRecord::new("S1", "Wang", 10.0, 20.0))
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::ConstraintViolation(ref s) if s == "S1"));
        assert_eq!(store.count().expect("count"), 1);
    }

    #[test]
    fn update_keeps_created_at() {
        let conn = db::open_in_memory().expect("db");
        let store = StudentStore::new(&conn);
        let mut rec = StudentRecord::new("S1", "Li", 80.0, 90.0);
        rec.created_at =
            NaiveDateTime::parse_from_str("2024-03-01 08:30:00", TIMESTAMP_FORMAT).ok();
        store.insert(&rec).expect("insert");

        let edited = StudentRecord {
            name: "Li Lei".to_string(),
            score_a: 61.0,
            created_at: None,
            ..rec.clone()
        };
        assert!(store.update(&edited).expect("update"));
        let got = store.get("S1").expect("get").expect("present");
        assert_eq!(got.name, "Li Lei");
        assert_eq!(got.score_a, 61.0);
        assert_eq!(got.created_at_text(), "2024-03-01 08:30:00");
    }

    #[test]
    fn sort_by_total_breaks_ties_by_insertion_order() {
        let conn = db::open_in_memory().expect("db");
        let store = StudentStore::new(&conn);
        for (sno, a, b) in [("S1", 50.0, 50.0), ("S2", 90.0, 10.0), ("S3", 70.0, 70.0)] {
            store.insert(&StudentRecord::new(sno, sno, a, b)).expect("insert");
        }
        let desc = store
            .list_sorted(SortKey::parse("total"), SortDirection::parse("desc"))
            .expect("sorted");
        let order: Vec<_> = desc.iter().map(|r| r.student_number.as_str()).collect();
        assert_eq!(order, vec!["S3", "S1", "S2"]);

        let by_unknown = store
            .list_sorted(SortKey::parse("bogus"), SortDirection::parse("asc"))
            .expect("sorted");
        assert_eq!(by_unknown[0].student_number, "S1");
    }

    #[test]
    fn delete_reports_missing_rows() {
        let conn = db::open_in_memory().expect("db");
        let store = StudentStore::new(&conn);
        store.insert(&StudentRecord::new("S1", "Li", 1.0, 2.0)).expect("insert");
        assert!(store.delete("S1").expect("delete"));
        assert!(!store.delete("S1").expect("delete again"));
    }
}
