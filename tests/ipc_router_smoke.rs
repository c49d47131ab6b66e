mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{error_code, request, request_all_ok, request_ok, spawn_sidecar, temp_dir};

#[test]
fn methods_require_a_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], json!(true));
    assert!(health["result"]["workspacePath"].is_null());

    let report = request(
        &mut stdin,
        &mut reader,
        "2",
        "reports.studentReport",
        json!({ "studentId": "s", "examSetId": "e", "schoolId": "x" }),
    );
    assert_eq!(error_code(&report), Some("no_workspace"));

    let _ = child.kill();
}

#[test]
fn backups_need_a_selected_workspace_even_with_workspace_path() {
    let target = temp_dir("reportcard-backup-unselected");
    let out = target.join("bundle.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let export = request(
        &mut stdin,
        &mut reader,
        "1",
        "backup.exportWorkspaceBundle",
        json!({
            "outPath": out.to_string_lossy(),
            "workspacePath": target.to_string_lossy()
        }),
    );
    assert_eq!(error_code(&export), Some("no_workspace"));
    assert!(!out.exists());

    let import = request(
        &mut stdin,
        &mut reader,
        "2",
        "backup.importWorkspaceBundle",
        json!({
            "inPath": out.to_string_lossy(),
            "workspacePath": target.to_string_lossy()
        }),
    );
    assert_eq!(error_code(&import), Some("no_workspace"));

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(target);
}

#[test]
fn bad_json_lines_get_an_error_without_id() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value["ok"], json!(false));
    assert!(value.get("id").is_none());
    assert_eq!(error_code(&value), Some("bad_json"));

    // The sidecar keeps serving after a bad line.
    let health = request(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(health["ok"], json!(true));
    let _ = child.kill();
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("reportcard-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    request_all_ok(
        &mut stdin,
        &mut reader,
        json!([
            ["schools.upsert", {
                "id": "sch1", "name": "Hillside", "curriculumType": "Primary-Local"
            }],
            ["students.upsert", {
                "id": "st1", "schoolId": "sch1", "lastName": "Otieno", "firstName": "Amani"
            }],
            ["subjects.upsert", { "id": "math", "schoolId": "sch1", "name": "Mathematics" }],
            ["examSets.upsert", {
                "id": "es1", "schoolId": "sch1", "name": "Term 1", "term": 1, "year": 2026
            }],
            ["elements.upsert", {
                "id": "ca1", "examSetId": "es1", "subjectId": "math", "name": "CA1", "maxScore": 10
            }],
            ["marks.entries.upsert", {
                "examSetId": "es1",
                "studentId": "st1",
                "entries": [{ "elementId": "ca1", "scoreObtained": 7 }]
            }],
            ["grading.scales.replace", {
                "schoolId": "sch1",
                "scales": [{ "gradeLetter": "A", "minScorePercent": 80 }]
            }],
            ["grading.scales.list", { "schoolId": "sch1" }],
            ["grading.resolve", { "schoolId": "sch1", "score": 90 }],
            ["grading.weightedScore", { "formative": 50, "summative": 70, "schoolId": "sch1" }],
            ["calc.config.get", {}],
            ["calc.config.update", { "curriculumWeights": {} }],
            ["calc.config.clearOverride", {}],
            ["marks.subjectSummary", {
                "studentId": "st1", "examSetId": "es1", "subjectId": "math"
            }],
            ["reports.studentReport", {
                "studentId": "st1", "examSetId": "es1", "schoolId": "sch1"
            }],
            ["backup.exportWorkspaceBundle", { "outPath": bundle_out.to_string_lossy() }]
        ]),
    );
    assert!(bundle_out.is_file());

    let unknown = request(&mut stdin, &mut reader, "u", "nope.nothing", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}
