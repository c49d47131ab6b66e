use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Allowed drift when checking that a formative/summative split sums to 100.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

pub const CURRICULUM_SECONDARY_LSC: &str = "Secondary-LSC";
pub const CURRICULUM_PRIMARY_LOCAL: &str = "Primary-Local";

pub const DEFAULT_WEIGHTS: Weights = Weights {
    formative_pct: 20.0,
    summative_pct: 80.0,
};

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn detailed(code: &str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::detailed("not_found", message, details)
    }

    pub fn db(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

impl std::fmt::Display for CalcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CalcError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScale {
    pub id: String,
    pub school_id: String,
    pub grade_letter: String,
    pub descriptor: String,
    pub min_score_percent: f64,
}

/// Orders scales highest threshold first. The sort is stable, so scales that
/// share a threshold keep their input order.
pub fn sort_scales_descending(scales: &mut [GradingScale]) {
    scales.sort_by(|a, b| b.min_score_percent.total_cmp(&a.min_score_percent));
}

/// Returns the highest-threshold scale whose `min_score_percent <= score`.
///
/// Scores are not clamped; a score below every threshold (or an empty scale
/// set) resolves to `None`.
pub fn resolve_grade(score: f64, scales: &[GradingScale]) -> Option<GradingScale> {
    let mut ordered = scales.to_vec();
    sort_scales_descending(&mut ordered);
    ordered.into_iter().find(|s| s.min_score_percent <= score)
}

/// Rejects a scale set in which two rows share a threshold.
pub fn check_distinct_thresholds(scales: &[GradingScale]) -> Result<(), CalcError> {
    let mut seen: Vec<f64> = Vec::with_capacity(scales.len());
    for s in scales {
        if !s.min_score_percent.is_finite() {
            return Err(CalcError::detailed(
                "bad_params",
                "minScorePercent must be a finite number",
                json!({ "gradeLetter": s.grade_letter }),
            ));
        }
        if seen.iter().any(|v| *v == s.min_score_percent) {
            return Err(CalcError::detailed(
                "bad_params",
                "grading scales must not share a minScorePercent",
                json!({
                    "gradeLetter": s.grade_letter,
                    "minScorePercent": s.min_score_percent
                }),
            ));
        }
        seen.push(s.min_score_percent);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weights {
    pub formative_pct: f64,
    pub summative_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedScore {
    pub formative_component: f64,
    pub summative_component: f64,
    pub weighted_total: f64,
}

pub fn validate_weights(weights: &Weights) -> Result<(), CalcError> {
    let sum = weights.formative_pct + weights.summative_pct;
    if !sum.is_finite() || (sum - 100.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(CalcError::detailed(
            "invalid_weights",
            "formative and summative weights must sum to 100",
            json!({
                "formativePct": weights.formative_pct,
                "summativePct": weights.summative_pct,
                "sum": sum
            }),
        ));
    }
    Ok(())
}

/// Blends a formative and a summative score, both already on a 0..100 scale.
pub fn weighted_score(
    formative: f64,
    summative: f64,
    weights: &Weights,
) -> Result<WeightedScore, CalcError> {
    validate_weights(weights)?;
    let formative_component = formative * weights.formative_pct / 100.0;
    let summative_component = summative * weights.summative_pct / 100.0;
    Ok(WeightedScore {
        formative_component,
        summative_component,
        weighted_total: formative_component + summative_component,
    })
}

/// Curriculum type -> weights, as stored in the `calc.curriculum_weights` setting.
pub type WeightOverrides = BTreeMap<String, Weights>;

pub fn default_curriculum_weights(curriculum_type: Option<&str>) -> Weights {
    match curriculum_type {
        Some(CURRICULUM_SECONDARY_LSC) => Weights {
            formative_pct: 20.0,
            summative_pct: 80.0,
        },
        Some(CURRICULUM_PRIMARY_LOCAL) => Weights {
            formative_pct: 40.0,
            summative_pct: 60.0,
        },
        _ => DEFAULT_WEIGHTS,
    }
}

pub fn curriculum_weights(
    curriculum_type: Option<&str>,
    overrides: Option<&WeightOverrides>,
) -> Weights {
    if let (Some(ct), Some(map)) = (curriculum_type, overrides) {
        if let Some(w) = map.get(ct) {
            return *w;
        }
    }
    default_curriculum_weights(curriculum_type)
}

pub fn parse_weight_overrides(
    raw: Option<&serde_json::Value>,
) -> Result<WeightOverrides, CalcError> {
    let Some(raw) = raw else {
        return Ok(WeightOverrides::new());
    };
    if raw.is_null() {
        return Ok(WeightOverrides::new());
    }
    let Some(obj) = raw.as_object() else {
        return Err(CalcError::new("bad_params", "curriculumWeights must be an object"));
    };

    let mut out = WeightOverrides::new();
    for (curriculum_type, v) in obj {
        let key = curriculum_type.trim();
        if key.is_empty() {
            return Err(CalcError::new("bad_params", "curriculum type must not be blank"));
        }
        let formative = v.get("formativePct").and_then(|x| x.as_f64());
        let summative = v.get("summativePct").and_then(|x| x.as_f64());
        let (Some(formative_pct), Some(summative_pct)) = (formative, summative) else {
            return Err(CalcError::detailed(
                "bad_params",
                "each curriculum entry needs numeric formativePct and summativePct",
                json!({ "curriculumType": key }),
            ));
        };
        let weights = Weights {
            formative_pct,
            summative_pct,
        };
        if let Err(mut e) = validate_weights(&weights) {
            e.details = Some(json!({ "curriculumType": key }));
            return Err(e);
        }
        out.insert(key.to_string(), weights);
    }
    Ok(out)
}

/// Half-away-from-zero rounding to two decimals.
pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn percent_of(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

/// One recorded score, with the max score captured when it was entered.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub element_id: String,
    pub element_name: String,
    pub score_obtained: f64,
    pub max_score_at_entry: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementMark {
    pub element_id: String,
    pub element_name: String,
    pub score_obtained: f64,
    pub max_score_at_entry: f64,
    pub element_percentage: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectTotals {
    pub total_marks_obtained: f64,
    pub total_max_marks: f64,
    pub percentage: f64,
    pub elements_data: Vec<ElementMark>,
}

/// Sums entries into subject totals. The percentage is a ratio of sums, not an
/// average of element percentages, and is 0 when nothing has been entered.
pub fn aggregate_entries(entries: &[ScoredEntry]) -> SubjectTotals {
    let mut total_marks_obtained = 0.0_f64;
    let mut total_max_marks = 0.0_f64;
    let mut elements_data = Vec::with_capacity(entries.len());

    for e in entries {
        total_marks_obtained += e.score_obtained;
        total_max_marks += e.max_score_at_entry;
        let element_percentage = percent_of(e.score_obtained, e.max_score_at_entry);
        elements_data.push(ElementMark {
            element_id: e.element_id.clone(),
            element_name: e.element_name.clone(),
            score_obtained: e.score_obtained,
            max_score_at_entry: e.max_score_at_entry,
            element_percentage: round_2_decimals(element_percentage),
        });
    }

    SubjectTotals {
        total_marks_obtained,
        total_max_marks,
        percentage: round_2_decimals(percent_of(total_marks_obtained, total_max_marks)),
        elements_data,
    }
}
