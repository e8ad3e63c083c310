use scorebookd::auth::{self, AuthError};
use scorebookd::db;
use scorebookd::store::{SortDirection, SortKey, StudentRecord, StudentStore};
use serde_json::json;

#[test]
fn reopening_a_workspace_keeps_records_and_single_admin() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let conn = db::open_db(dir.path()).expect("open");
        let store = StudentStore::new(&conn);
        store
            .insert(&StudentRecord::new("A1", "Li", 90.0, 80.0))
            .expect("insert A1");
        store
            .insert(&StudentRecord::new("A2", "Wang", 70.0, 99.0))
            .expect("insert A2");
        db::settings_set_json(&conn, "import.config", &json!({ "maxBytes": 10 }))
            .expect("settings");
    }

    let conn = db::open_db(dir.path()).expect("reopen");
    let admins: i64 = conn
        .query_row("SELECT COUNT(*) FROM users WHERE username = 'admin'", [], |r| r.get(0))
        .expect("count admins");
    assert_eq!(admins, 1);

    let by_total = StudentStore::new(&conn)
        .list_sorted(SortKey::Total, SortDirection::Desc)
        .expect("list");
    let order: Vec<&str> = by_total.iter().map(|r| r.student_number.as_str()).collect();
    assert_eq!(order, vec!["A1", "A2"]);
    assert!(by_total.iter().all(|r| r.created_at.is_some()));

    assert_eq!(
        db::settings_get_json(&conn, "import.config").expect("read settings"),
        Some(json!({ "maxBytes": 10 }))
    );
}

#[test]
fn default_account_authenticates_and_rejects_wrong_password() {
    let conn = db::open_in_memory().expect("db");
    let session = auth::authenticate(&conn, "admin", "admin123").expect("login");
    assert_eq!(session.username, "admin");
    assert_eq!(session.role, "admin");
    assert!(matches!(
        auth::authenticate(&conn, "admin", "admin"),
        Err(AuthError::InvalidCredentials)
    ));
    assert!(matches!(
        auth::authenticate(&conn, "ghost", "admin123"),
        Err(AuthError::InvalidCredentials)
    ));
}

#[test]
fn equal_totals_keep_insertion_order() {
    let conn = db::open_in_memory().expect("db");
    let store = StudentStore::new(&conn);
    for (sno, a, b) in [("Z9", 90.0, 80.0), ("A0", 70.0, 100.0), ("M5", 85.0, 85.0)] {
        store
            .insert(&StudentRecord::new(sno, sno, a, b))
            .expect("insert");
    }
    let order: Vec<String> = store
        .list_sorted(SortKey::Total, SortDirection::Desc)
        .expect("list")
        .into_iter()
        .map(|r| r.student_number)
        .collect();
    assert_eq!(order, vec!["Z9", "A0", "M5"]);
}
