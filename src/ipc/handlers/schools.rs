use crate::ipc::helpers::{
    db_conn, db_write_err, optional_i64, optional_str, required_f64, required_str, respond,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{MarksStore, SqliteStore};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn id_or_new(req: &Request) -> String {
    optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn require_row(conn: &Connection, table: &str, id: &str) -> Result<(), HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn
        .query_row(&sql, [id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if found.is_none() {
        let message = format!("{} row not found", table);
        let details = json!({ "table": table, "id": id });
        return Err(HandlerErr::detailed("not_found", message, details));
    }
    Ok(())
}

fn schools_upsert(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let school_id = id_or_new(req);
    let name = required_str(req, "name")?;

    conn.execute(
        "INSERT INTO schools(id, name) VALUES(?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        (&school_id, &name),
    )
    .map_err(|e| db_write_err("schools", e))?;

    if let Some(curriculum_type) = optional_str(req, "curriculumType") {
        conn.execute(
            "INSERT INTO school_settings(school_id, curriculum_type) VALUES(?, ?)
             ON CONFLICT(school_id) DO UPDATE SET curriculum_type = excluded.curriculum_type",
            (&school_id, &curriculum_type),
        )
        .map_err(|e| db_write_err("school_settings", e))?;
    }

    Ok(json!({ "schoolId": school_id }))
}

fn students_upsert(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let school_id = required_str(req, "schoolId")?;
    require_row(conn, "schools", &school_id)?;
    let student_id = id_or_new(req);
    let last_name = required_str(req, "lastName")?;
    let first_name = required_str(req, "firstName")?;
    let admission_no = optional_str(req, "admissionNo");

    conn.execute(
        "INSERT INTO students(id, school_id, last_name, first_name, admission_no)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           last_name = excluded.last_name,
           first_name = excluded.first_name,
           admission_no = excluded.admission_no",
        (
            &student_id,
            &school_id,
            &last_name,
            &first_name,
            &admission_no,
        ),
    )
    .map_err(|e| db_write_err("students", e))?;

    Ok(json!({ "studentId": student_id }))
}

fn subjects_upsert(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let school_id = required_str(req, "schoolId")?;
    require_row(conn, "schools", &school_id)?;
    let subject_id = id_or_new(req);
    let name = required_str(req, "name")?;
    let code = optional_str(req, "code");
    let sort_order = optional_i64(req, "sortOrder")?.unwrap_or(0);

    conn.execute(
        "INSERT INTO subjects(id, school_id, name, code, sort_order)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           code = excluded.code,
           sort_order = excluded.sort_order",
        (&subject_id, &school_id, &name, &code, sort_order),
    )
    .map_err(|e| db_write_err("subjects", e))?;

    Ok(json!({ "subjectId": subject_id }))
}

fn exam_sets_upsert(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let school_id = required_str(req, "schoolId")?;
    require_row(conn, "schools", &school_id)?;
    let exam_set_id = id_or_new(req);
    let name = required_str(req, "name")?;
    let term = optional_i64(req, "term")?;
    let year = optional_i64(req, "year")?;

    conn.execute(
        "INSERT INTO exam_sets(id, school_id, name, term, year)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           term = excluded.term,
           year = excluded.year",
        (&exam_set_id, &school_id, &name, term, year),
    )
    .map_err(|e| db_write_err("exam_sets", e))?;

    Ok(json!({ "examSetId": exam_set_id }))
}

/// The exam set and subject must share a school.
fn require_same_school(
    conn: &Connection,
    exam_set_id: &str,
    subject_id: &str,
) -> Result<(), HandlerErr> {
    let store = SqliteStore::new(conn);
    let exam_set_school = store.find_exam_set(exam_set_id)?.map(|e| e.school_id);
    let subject_school = store.find_subject(subject_id)?.map(|s| s.school_id);
    if exam_set_school != subject_school {
        return Err(HandlerErr::detailed(
            "bad_params",
            "exam set and subject belong to different schools",
            json!({ "examSetId": exam_set_id, "subjectId": subject_id }),
        ));
    }
    Ok(())
}

/// An existing element stays under the exam set and subject it was created with.
fn require_same_parents(
    conn: &Connection,
    element_id: &str,
    exam_set_id: &str,
    subject_id: &str,
) -> Result<(), HandlerErr> {
    let current: Option<(String, String)> = conn
        .query_row(
            "SELECT exam_set_id, subject_id FROM assessment_elements WHERE id = ?",
            [element_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some((current_exam_set, current_subject)) = current else {
        return Ok(());
    };
    if current_exam_set != exam_set_id || current_subject != subject_id {
        return Err(HandlerErr::detailed(
            "bad_params",
            "element cannot move to another exam set or subject",
            json!({
                "elementId": element_id,
                "examSetId": current_exam_set,
                "subjectId": current_subject,
            }),
        ));
    }
    Ok(())
}

/// Element edits never touch `result_entries.max_score_at_entry`.
fn elements_upsert(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam_set_id = required_str(req, "examSetId")?;
    require_row(conn, "exam_sets", &exam_set_id)?;
    let subject_id = required_str(req, "subjectId")?;
    require_row(conn, "subjects", &subject_id)?;
    require_same_school(conn, &exam_set_id, &subject_id)?;
    let element_id = id_or_new(req);
    require_same_parents(conn, &element_id, &exam_set_id, &subject_id)?;
    let name = required_str(req, "name")?;
    let max_score = required_f64(req, "maxScore")?;
    if !max_score.is_finite() || max_score <= 0.0 {
        let details = json!({ "maxScore": max_score });
        return Err(HandlerErr::detailed("bad_params", "maxScore must be > 0", details));
    }
    let weight = match req.params.get("contributingWeightPercent") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_f64() {
            Some(w) if (0.0..=100.0).contains(&w) => Some(w),
            _ => {
                return Err(HandlerErr::new(
                    "bad_params",
                    "contributingWeightPercent must be a number in 0..100",
                ))
            }
        },
    };
    let sort_order = optional_i64(req, "sortOrder")?.unwrap_or(0);

    conn.execute(
        "INSERT INTO assessment_elements(
            id, exam_set_id, subject_id, name, max_score, contributing_weight_percent, sort_order
         )
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           max_score = excluded.max_score,
           contributing_weight_percent = excluded.contributing_weight_percent,
           sort_order = excluded.sort_order",
        (
            &element_id,
            &exam_set_id,
            &subject_id,
            &name,
            max_score,
            weight,
            sort_order,
        ),
    )
    .map_err(|e| db_write_err("assessment_elements", e))?;

    Ok(json!({ "elementId": element_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "schools.upsert" => schools_upsert(state, req),
        "students.upsert" => students_upsert(state, req),
        "subjects.upsert" => subjects_upsert(state, req),
        "examSets.upsert" => exam_sets_upsert(state, req),
        "elements.upsert" => elements_upsert(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
