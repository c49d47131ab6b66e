use crate::ipc::helpers::{db_conn, db_write_err, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::report;
use crate::store::SqliteStore;
use rusqlite::{OptionalExtension, Transaction};
use serde_json::json;
use uuid::Uuid;

const ENTRIES_UPSERT_MAX: usize = 5000;

fn query_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

fn ensure_exam_entry(
    tx: &Transaction<'_>,
    exam_set_id: &str,
    student_id: &str,
) -> Result<String, HandlerErr> {
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM exam_entries WHERE exam_set_id = ? AND student_id = ?",
            (exam_set_id, student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_err)?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO exam_entries(id, exam_set_id, student_id) VALUES(?, ?, ?)",
        (&id, exam_set_id, student_id),
    )
    .map_err(|e| db_write_err("exam_entries", e))?;
    Ok(id)
}

/// Writes one student's scores for an exam set.
///
/// A new entry snapshots the element's current max score; rewriting an entry
/// only replaces the score, keeping the original snapshot as denominator.
fn marks_entries_upsert(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_mut() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let exam_set_id = required_str(req, "examSetId")?;
    let student_id = required_str(req, "studentId")?;
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "entries must be an array"));
    };
    if entries.len() > ENTRIES_UPSERT_MAX {
        return Err(HandlerErr::detailed(
            "bad_params",
            "too many entries in one request",
            json!({ "max": ENTRIES_UPSERT_MAX, "count": entries.len() }),
        ));
    }

    let tx = conn
        .transaction()
        .map_err(|e| db_write_err("result_entries", e))?;

    let student_school: Option<String> = tx
        .query_row(
            "SELECT school_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_err)?;
    let exam_set_school: Option<String> = tx
        .query_row(
            "SELECT school_id FROM exam_sets WHERE id = ?",
            [&exam_set_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_err)?;
    let (Some(student_school), Some(exam_set_school)) = (student_school, exam_set_school) else {
        return Err(HandlerErr::detailed(
            "not_found",
            "student or exam set not found",
            json!({ "studentId": student_id, "examSetId": exam_set_id }),
        ));
    };
    if student_school != exam_set_school {
        return Err(HandlerErr::new(
            "bad_params",
            "student and exam set belong to different schools",
        ));
    }

    let exam_entry_id = ensure_exam_entry(&tx, &exam_set_id, &student_id)?;
    let now = chrono::Utc::now().to_rfc3339();
    let mut written = 0_usize;

    for (i, item) in entries.iter().enumerate() {
        let Some(element_id) = item.get("elementId").and_then(|v| v.as_str()) else {
            let message = "entry elementId is required";
            return Err(HandlerErr::detailed("bad_params", message, json!({ "index": i })));
        };
        let score = match item.get("scoreObtained").and_then(|v| v.as_f64()) {
            Some(v) if v.is_finite() && v >= 0.0 => v,
            _ => {
                return Err(HandlerErr::detailed(
                    "bad_params",
                    "scoreObtained must be a non-negative number",
                    json!({ "index": i, "elementId": element_id }),
                ))
            }
        };

        let element_max: Option<f64> = tx
            .query_row(
                "SELECT max_score FROM assessment_elements WHERE id = ? AND exam_set_id = ?",
                (element_id, &exam_set_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(query_err)?;
        let Some(element_max) = element_max else {
            return Err(HandlerErr::detailed(
                "not_found",
                "element not found in exam set",
                json!({ "index": i, "elementId": element_id }),
            ));
        };
        let snapshot: Option<f64> = tx
            .query_row(
                "SELECT max_score_at_entry FROM result_entries
                 WHERE element_id = ? AND exam_entry_id = ?",
                (element_id, &exam_entry_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(query_err)?;
        let max_score_at_entry = snapshot.unwrap_or(element_max);
        if score > max_score_at_entry {
            return Err(HandlerErr::detailed(
                "bad_params",
                "scoreObtained exceeds max score",
                json!({
                    "index": i,
                    "elementId": element_id,
                    "maxScoreAtEntry": max_score_at_entry
                }),
            ));
        }

        tx.execute(
            "INSERT INTO result_entries(
                id, element_id, exam_entry_id, score_obtained, max_score_at_entry, updated_at
             )
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(element_id, exam_entry_id) DO UPDATE SET
               score_obtained = excluded.score_obtained,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                element_id,
                &exam_entry_id,
                score,
                max_score_at_entry,
                &now,
            ),
        )
        .map_err(|e| db_write_err("result_entries", e))?;
        written += 1;
    }

    tx.commit().map_err(|e| db_write_err("result_entries", e))?;
    tracing::debug!(
        exam_set_id = %exam_set_id,
        student_id = %student_id,
        written,
        "result entries written"
    );
    Ok(json!({ "examEntryId": exam_entry_id, "written": written }))
}

fn marks_subject_summary(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let exam_set_id = required_str(req, "examSetId")?;
    let subject_id = required_str(req, "subjectId")?;

    let result = report::aggregate_subject_marks(
        &SqliteStore::new(conn),
        &student_id,
        &exam_set_id,
        &subject_id,
    )?;
    Ok(json!({ "subject": result }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "marks.entries.upsert" => marks_entries_upsert(state, req),
        "marks.subjectSummary" => marks_subject_summary(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
