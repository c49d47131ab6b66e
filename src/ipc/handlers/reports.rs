use crate::ipc::helpers::{db_conn, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, ReportOptions};
use crate::store::SqliteStore;
use serde_json::json;

fn parse_report_options(req: &Request) -> Result<ReportOptions, HandlerErr> {
    let resolve_grades = match req.params.get("resolveGrades") {
        None => false,
        Some(v) if v.is_null() => false,
        Some(v) => v.as_bool().ok_or_else(|| {
            HandlerErr::detailed(
                "bad_params",
                "resolveGrades must be a boolean",
                json!({ "resolveGrades": v }),
            )
        })?,
    };
    Ok(ReportOptions { resolve_grades })
}

fn reports_student_report(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let exam_set_id = required_str(req, "examSetId")?;
    let school_id = required_str(req, "schoolId")?;
    let options = parse_report_options(req)?;

    let model = report::assemble_report(
        &SqliteStore::new(conn),
        &student_id,
        &exam_set_id,
        &school_id,
        options,
    )?;
    Ok(json!(model))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.studentReport" => reports_student_report(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
