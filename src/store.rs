use crate::calc::{self, CalcError, GradingScale, ScoredEntry, WeightOverrides};
use crate::db;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub const WEIGHT_OVERRIDES_KEY: &str = "calc.curriculum_weights";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct School {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolSetting {
    pub school_id: String,
    pub curriculum_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSet {
    pub id: String,
    pub school_id: String,
    pub name: String,
    pub term: Option<i64>,
    pub year: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub school_id: String,
    pub name: String,
    pub code: Option<String>,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentElement {
    pub id: String,
    pub exam_set_id: String,
    pub subject_id: String,
    pub name: String,
    pub max_score: f64,
    pub contributing_weight_percent: f64,
    pub sort_order: i64,
}

/// Read-only lookups the grading and report computations depend on.
///
/// Implementations must return grading scales highest threshold first and
/// subject ids in a deterministic order.
pub trait MarksStore {
    fn find_school(&self, school_id: &str) -> Result<Option<School>, CalcError>;
    fn school_setting(&self, school_id: &str) -> Result<Option<SchoolSetting>, CalcError>;
    fn grading_scales(&self, school_id: &str) -> Result<Vec<GradingScale>, CalcError>;
    fn find_exam_set(&self, exam_set_id: &str) -> Result<Option<ExamSet>, CalcError>;
    fn subject_ids_for_exam_set(&self, exam_set_id: &str) -> Result<Vec<String>, CalcError>;
    fn find_subject(&self, subject_id: &str) -> Result<Option<Subject>, CalcError>;
    fn elements_for(
        &self,
        exam_set_id: &str,
        subject_id: &str,
    ) -> Result<Vec<AssessmentElement>, CalcError>;
    fn result_entries(
        &self,
        student_id: &str,
        exam_set_id: &str,
        subject_id: &str,
    ) -> Result<Vec<ScoredEntry>, CalcError>;

    fn weight_overrides(&self) -> Result<Option<WeightOverrides>, CalcError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SqliteStore<'a> {
    pub conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MarksStore for SqliteStore<'_> {
    fn find_school(&self, school_id: &str) -> Result<Option<School>, CalcError> {
        self.conn
            .query_row(
                "SELECT id, name FROM schools WHERE id = ?",
                [school_id],
                |r| {
                    Ok(School {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(CalcError::db)
    }

    fn school_setting(&self, school_id: &str) -> Result<Option<SchoolSetting>, CalcError> {
        self.conn
            .query_row(
                "SELECT school_id, curriculum_type FROM school_settings WHERE school_id = ?",
                [school_id],
                |r| {
                    Ok(SchoolSetting {
                        school_id: r.get(0)?,
                        curriculum_type: r.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(CalcError::db)
    }

    fn grading_scales(&self, school_id: &str) -> Result<Vec<GradingScale>, CalcError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, school_id, grade_letter, descriptor, min_score_percent
                 FROM grading_scales
                 WHERE school_id = ?
                 ORDER BY min_score_percent DESC, id",
            )
            .map_err(CalcError::db)?;
        let scales: Vec<GradingScale> = stmt
            .query_map([school_id], |r| {
                Ok(GradingScale {
                    id: r.get(0)?,
                    school_id: r.get(1)?,
                    grade_letter: r.get(2)?,
                    descriptor: r.get(3)?,
                    min_score_percent: r.get(4)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::db)?;
        Ok(scales)
    }

    fn find_exam_set(&self, exam_set_id: &str) -> Result<Option<ExamSet>, CalcError> {
        self.conn
            .query_row(
                "SELECT id, school_id, name, term, year FROM exam_sets WHERE id = ?",
                [exam_set_id],
                |r| {
                    Ok(ExamSet {
                        id: r.get(0)?,
                        school_id: r.get(1)?,
                        name: r.get(2)?,
                        term: r.get(3)?,
                        year: r.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(CalcError::db)
    }

    fn subject_ids_for_exam_set(&self, exam_set_id: &str) -> Result<Vec<String>, CalcError> {
        // Subjects without a row in `subjects` still count; they sort last.
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ae.subject_id, MIN(COALESCE(s.sort_order, 9223372036854775807)) AS so
                 FROM assessment_elements ae
                 LEFT JOIN subjects s ON s.id = ae.subject_id
                 WHERE ae.exam_set_id = ?
                 GROUP BY ae.subject_id
                 ORDER BY so, ae.subject_id",
            )
            .map_err(CalcError::db)?;
        let ids: Vec<String> = stmt
            .query_map([exam_set_id], |r| r.get(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::db)?;
        Ok(ids)
    }

    fn find_subject(&self, subject_id: &str) -> Result<Option<Subject>, CalcError> {
        self.conn
            .query_row(
                "SELECT id, school_id, name, code, sort_order FROM subjects WHERE id = ?",
                [subject_id],
                |r| {
                    Ok(Subject {
                        id: r.get(0)?,
                        school_id: r.get(1)?,
                        name: r.get(2)?,
                        code: r.get(3)?,
                        sort_order: r.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(CalcError::db)
    }

    fn elements_for(
        &self,
        exam_set_id: &str,
        subject_id: &str,
    ) -> Result<Vec<AssessmentElement>, CalcError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, exam_set_id, subject_id, name, max_score,
                        COALESCE(contributing_weight_percent, 0), sort_order
                 FROM assessment_elements
                 WHERE exam_set_id = ? AND subject_id = ?
                 ORDER BY sort_order, id",
            )
            .map_err(CalcError::db)?;
        let elements: Vec<AssessmentElement> = stmt
            .query_map((exam_set_id, subject_id), |r| {
                Ok(AssessmentElement {
                    id: r.get(0)?,
                    exam_set_id: r.get(1)?,
                    subject_id: r.get(2)?,
                    name: r.get(3)?,
                    max_score: r.get(4)?,
                    contributing_weight_percent: r.get(5)?,
                    sort_order: r.get(6)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::db)?;
        Ok(elements)
    }

    fn result_entries(
        &self,
        student_id: &str,
        exam_set_id: &str,
        subject_id: &str,
    ) -> Result<Vec<ScoredEntry>, CalcError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT re.element_id, ae.name, re.score_obtained, re.max_score_at_entry
                 FROM result_entries re
                 JOIN assessment_elements ae ON ae.id = re.element_id
                 JOIN exam_entries ee ON ee.id = re.exam_entry_id
                 WHERE ee.student_id = ?
                   AND ee.exam_set_id = ?
                   AND ae.exam_set_id = ?
                   AND ae.subject_id = ?
                 ORDER BY ae.sort_order, ae.id",
            )
            .map_err(CalcError::db)?;
        let params = (student_id, exam_set_id, exam_set_id, subject_id);
        let entries: Vec<ScoredEntry> = stmt
            .query_map(params, |r| {
                Ok(ScoredEntry {
                    element_id: r.get(0)?,
                    element_name: r.get(1)?,
                    score_obtained: r.get(2)?,
                    max_score_at_entry: r.get(3)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::db)?;
        Ok(entries)
    }

    fn weight_overrides(&self) -> Result<Option<WeightOverrides>, CalcError> {
        let raw = db::settings_get_json(self.conn, WEIGHT_OVERRIDES_KEY).map_err(CalcError::db)?;
        match raw {
            None => Ok(None),
            Some(v) => calc::parse_weight_overrides(Some(&v)).map(Some),
        }
    }
}
