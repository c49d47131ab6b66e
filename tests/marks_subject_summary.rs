mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout};
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

fn db_path(workspace: &Path) -> PathBuf {
    workspace.join("reportcard.sqlite3")
}

fn seed(workspace: &Path) {
    use rusqlite::Connection;
    let conn = Connection::open(db_path(workspace)).expect("open db");
    conn.execute_batch(
        "INSERT INTO schools(id, name) VALUES('sch1','Hillside');
         INSERT INTO students(id, school_id, last_name, first_name)
           VALUES('st1','sch1','Otieno','Amani');
         INSERT INTO students(id, school_id, last_name, first_name)
           VALUES('st2','sch1','Wanjiru','Grace');
         INSERT INTO subjects(id, school_id, name, sort_order)
           VALUES('math','sch1','Mathematics',0);
         INSERT INTO subjects(id, school_id, name, sort_order) VALUES('eng','sch1','English',1);
         INSERT INTO subjects(id, school_id, name, sort_order) VALUES('art','sch1','Art',2);
         INSERT INTO exam_sets(id, school_id, name, term, year)
           VALUES('es1','sch1','Term 1 Midterms',1,2026);
         INSERT INTO assessment_elements(
             id, exam_set_id, subject_id, name, max_score, contributing_weight_percent, sort_order
           )
           VALUES('ca1','es1','math','CA1',10,30,0);
         INSERT INTO assessment_elements(
             id, exam_set_id, subject_id, name, max_score, contributing_weight_percent, sort_order
           )
           VALUES('mid','es1','math','Midterm',20,70,1);
         INSERT INTO assessment_elements(
             id, exam_set_id, subject_id, name, max_score, contributing_weight_percent, sort_order
           )
           VALUES('essay','es1','eng','Essay',50,100,0);
         INSERT INTO exam_entries(id, exam_set_id, student_id) VALUES('ee1','es1','st1');
         INSERT INTO result_entries(
             id, element_id, exam_entry_id, score_obtained, max_score_at_entry
           )
           VALUES('r1','ca1','ee1',8,10);
         INSERT INTO result_entries(
             id, element_id, exam_entry_id, score_obtained, max_score_at_entry
           )
           VALUES('r2','mid','ee1',18,20);",
    )
    .expect("seed rows");
}

fn open_seeded(prefix: &str) -> (PathBuf, Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed(&workspace);
    (workspace, child, stdin, reader)
}

#[test]
fn subject_summary_sums_entries() {
    let (workspace, mut child, mut stdin, mut reader) = open_seeded("reportcard-subject-sum");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "marks.subjectSummary",
        json!({ "studentId": "st1", "examSetId": "es1", "subjectId": "math" }),
    );
    let subject = &res["subject"];
    assert_eq!(subject["totalMarksObtained"].as_f64(), Some(26.0));
    assert_eq!(subject["totalMaxMarks"].as_f64(), Some(30.0));
    assert_eq!(subject["percentage"].as_f64(), Some(86.67));
    assert_eq!(subject["subjectName"], json!("Mathematics"));
    let elements = subject["elementsData"].as_array().expect("elementsData");
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0]["elementId"], json!("ca1"));
    assert_eq!(elements[0]["elementPercentage"].as_f64(), Some(80.0));
    assert_eq!(elements[1]["elementPercentage"].as_f64(), Some(90.0));

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn subject_summary_zero_and_missing_cases() {
    let (workspace, mut child, mut stdin, mut reader) = open_seeded("reportcard-subject-edge");

    // Elements exist, nothing entered.
    let eng = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "marks.subjectSummary",
        json!({ "studentId": "st1", "examSetId": "es1", "subjectId": "eng" }),
    );
    assert_eq!(eng["subject"]["percentage"].as_f64(), Some(0.0));
    assert_eq!(eng["subject"]["totalMaxMarks"].as_f64(), Some(0.0));
    assert_eq!(eng["subject"]["elementsData"], json!([]));

    // A student with no exam entry at all behaves the same way.
    let st2 = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "marks.subjectSummary",
        json!({ "studentId": "st2", "examSetId": "es1", "subjectId": "math" }),
    );
    assert_eq!(st2["subject"]["percentage"].as_f64(), Some(0.0));

    // No elements for the subject: not applicable.
    let art = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "marks.subjectSummary",
        json!({ "studentId": "st1", "examSetId": "es1", "subjectId": "art" }),
    );
    assert!(art["subject"].is_null());

    let missing = request(
        &mut stdin,
        &mut reader,
        "4",
        "marks.subjectSummary",
        json!({ "studentId": "st1", "examSetId": "es1" }),
    );
    assert_eq!(error_code(&missing), Some("bad_params"));

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_report_assembles_subjects_in_order() {
    let (workspace, mut child, mut stdin, mut reader) = open_seeded("reportcard-student-report");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grading.scales.replace",
        json!({
            "schoolId": "sch1",
            "scales": [
                { "gradeLetter": "A", "minScorePercent": 80 },
                { "gradeLetter": "B", "minScorePercent": 60 },
                { "gradeLetter": "C", "minScorePercent": 40 }
            ]
        }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reports.studentReport",
        json!({ "studentId": "st1", "examSetId": "es1", "schoolId": "sch1" }),
    );
    let subject_ids: Vec<&str> = report["subjects"]
        .as_array()
        .expect("subjects")
        .iter()
        .filter_map(|s| s["subjectId"].as_str())
        .collect();
    // Art has no elements in this exam set and is omitted.
    assert_eq!(subject_ids, vec!["math", "eng"]);
    assert!(report["curriculumType"].is_null());
    assert_eq!(report["weights"], json!({ "formativePct": 20.0, "summativePct": 80.0 }));
    assert_eq!(report["examSetName"], json!("Term 1 Midterms"));
    assert_eq!(report["gradingScales"][0]["gradeLetter"], json!("A"));
    assert!(report["subjects"][0].get("grade").is_none());

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.studentReport",
        json!({
            "studentId": "st1",
            "examSetId": "es1",
            "schoolId": "sch1",
            "resolveGrades": true
        }),
    );
    assert_eq!(graded["subjects"][0]["grade"]["gradeLetter"], json!("A"));

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.studentReport",
        json!({ "studentId": "st1", "examSetId": "es1", "schoolId": "sch1" }),
    );
    assert_eq!(
        serde_json::to_string(&report).expect("serialize"),
        serde_json::to_string(&again).expect("serialize")
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "5",
        "reports.studentReport",
        json!({ "studentId": "st1", "examSetId": "ghost", "schoolId": "sch1" }),
    );
    assert_eq!(error_code(&missing), Some("not_found"));

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}
