use crate::calc::{self, CalcError, ElementMark, GradingScale, Weights};
use crate::store::MarksStore;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMarksResult {
    pub student_id: String,
    pub exam_set_id: String,
    pub subject_id: String,
    pub subject_name: Option<String>,
    pub total_marks_obtained: f64,
    pub total_max_marks: f64,
    pub percentage: f64,
    pub elements_data: Vec<ElementMark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<GradingScale>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student_id: String,
    pub exam_set_id: String,
    pub exam_set_name: String,
    pub school_id: String,
    pub curriculum_type: Option<String>,
    pub weights: Weights,
    pub subjects: Vec<SubjectMarksResult>,
    pub grading_scales: Vec<GradingScale>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    /// Attach the resolved grading scale to each subject.
    pub resolve_grades: bool,
}

/// Totals one student's marks for one subject of an exam set.
///
/// Returns `None` when the subject has no assessment elements in the exam set.
/// A subject with elements but no entered marks yields a zero result.
pub fn aggregate_subject_marks<S: MarksStore + ?Sized>(
    store: &S,
    student_id: &str,
    exam_set_id: &str,
    subject_id: &str,
) -> Result<Option<SubjectMarksResult>, CalcError> {
    let elements = store.elements_for(exam_set_id, subject_id)?;
    if elements.is_empty() {
        return Ok(None);
    }

    let subject_name = store.find_subject(subject_id)?.map(|s| s.name);
    let entries = store.result_entries(student_id, exam_set_id, subject_id)?;
    let totals = calc::aggregate_entries(&entries);

    Ok(Some(SubjectMarksResult {
        student_id: student_id.to_string(),
        exam_set_id: exam_set_id.to_string(),
        subject_id: subject_id.to_string(),
        subject_name,
        total_marks_obtained: totals.total_marks_obtained,
        total_max_marks: totals.total_max_marks,
        percentage: totals.percentage,
        elements_data: totals.elements_data,
        grade: None,
    }))
}

pub fn assemble_report<S: MarksStore + ?Sized>(
    store: &S,
    student_id: &str,
    exam_set_id: &str,
    school_id: &str,
    options: ReportOptions,
) -> Result<StudentReport, CalcError> {
    let Some(exam_set) = store.find_exam_set(exam_set_id)? else {
        let details = json!({ "examSetId": exam_set_id });
        return Err(CalcError::not_found("exam set not found", details));
    };
    if exam_set.school_id != school_id {
        let details = json!({ "examSetId": exam_set_id, "schoolId": school_id });
        return Err(CalcError::not_found("exam set not found for school", details));
    }
    if store.find_school(school_id)?.is_none() {
        let details = json!({ "schoolId": school_id });
        return Err(CalcError::not_found("school not found", details));
    }

    let mut grading_scales = store.grading_scales(school_id)?;
    calc::sort_scales_descending(&mut grading_scales);

    let mut subjects = Vec::new();
    for subject_id in store.subject_ids_for_exam_set(exam_set_id)? {
        match aggregate_subject_marks(store, student_id, exam_set_id, &subject_id)? {
            Some(mut result) => {
                if options.resolve_grades {
                    result.grade = calc::resolve_grade(result.percentage, &grading_scales);
                }
                subjects.push(result);
            }
            None => {
                tracing::debug!(
                    subject_id = %subject_id,
                    exam_set_id,
                    "subject has no elements; omitted"
                );
            }
        }
    }

    let curriculum_type = store.school_setting(school_id)?.map(|s| s.curriculum_type);
    let overrides = store.weight_overrides()?;
    let weights = calc::curriculum_weights(curriculum_type.as_deref(), overrides.as_ref());

    Ok(StudentReport {
        student_id: student_id.to_string(),
        exam_set_id: exam_set.id,
        exam_set_name: exam_set.name,
        school_id: school_id.to_string(),
        curriculum_type,
        weights,
        subjects,
        grading_scales,
    })
}
