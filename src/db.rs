use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "reportcard.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_settings(
            school_id TEXT PRIMARY KEY,
            curriculum_type TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grading_scales(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            grade_letter TEXT NOT NULL,
            descriptor TEXT NOT NULL,
            min_score_percent REAL NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            UNIQUE(school_id, min_score_percent)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grading_scales_school ON grading_scales(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            admission_no TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_school ON subjects(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_sets(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            term INTEGER,
            year INTEGER,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_sets_school ON exam_sets(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_elements(
            id TEXT PRIMARY KEY,
            exam_set_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            name TEXT NOT NULL,
            max_score REAL NOT NULL,
            contributing_weight_percent REAL,
            FOREIGN KEY(exam_set_id) REFERENCES exam_sets(id)
        )",
        [],
    )?;
    ensure_assessment_elements_sort_order(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessment_elements_exam_subject
         ON assessment_elements(exam_set_id, subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_entries(
            id TEXT PRIMARY KEY,
            exam_set_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            FOREIGN KEY(exam_set_id) REFERENCES exam_sets(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(exam_set_id, student_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_entries(
            id TEXT PRIMARY KEY,
            element_id TEXT NOT NULL,
            exam_entry_id TEXT NOT NULL,
            score_obtained REAL NOT NULL,
            max_score_at_entry REAL NOT NULL,
            FOREIGN KEY(element_id) REFERENCES assessment_elements(id),
            FOREIGN KEY(exam_entry_id) REFERENCES exam_entries(id),
            UNIQUE(element_id, exam_entry_id)
        )",
        [],
    )?;
    ensure_result_entries_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_result_entries_exam_entry ON result_entries(exam_entry_id)",
        [],
    )?;

    Ok(conn)
}

// Early workspaces ordered elements by id only.
fn ensure_assessment_elements_sort_order(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "assessment_elements", "sort_order")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE assessment_elements ADD COLUMN sort_order INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_result_entries_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "result_entries", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE result_entries ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(None),
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn settings_delete(conn: &Connection, key: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM workspace_settings WHERE key = ?", [key])?;
    Ok(n > 0)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn settings_roundtrip_and_delete() {
        let ws = temp_dir("reportcard-db-settings");
        let conn = open_db(&ws).expect("open db");
        assert!(settings_get_json(&conn, "k").expect("get").is_none());
        settings_set_json(&conn, "k", &serde_json::json!({ "a": 1 })).expect("set");
        settings_set_json(&conn, "k", &serde_json::json!({ "a": 2 })).expect("overwrite");
        assert_eq!(
            settings_get_json(&conn, "k").expect("get"),
            Some(serde_json::json!({ "a": 2 }))
        );
        assert!(settings_delete(&conn, "k").expect("delete"));
        assert!(!settings_delete(&conn, "k").expect("delete again"));
        drop(conn);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn reopen_is_idempotent_and_migrates_columns() {
        let ws = temp_dir("reportcard-db-reopen");
        let conn = open_db(&ws).expect("open db");
        assert!(table_has_column(&conn, "assessment_elements", "sort_order").expect("pragma"));
        assert!(table_has_column(&conn, "result_entries", "updated_at").expect("pragma"));
        drop(conn);
        let conn = open_db(&ws).expect("reopen db");
        assert!(table_has_column(&conn, "result_entries", "updated_at").expect("pragma"));
        drop(conn);
        let _ = std::fs::remove_dir_all(ws);
    }
}
