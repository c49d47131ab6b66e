use crate::calc::{self, GradingScale, Weights};
use crate::db;
use crate::ipc::helpers::{
    db_conn, db_write_err, optional_str, required_f64, required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{MarksStore, SqliteStore, WEIGHT_OVERRIDES_KEY};
use serde_json::json;
use uuid::Uuid;

fn require_school(store: &SqliteStore<'_>, school_id: &str) -> Result<(), HandlerErr> {
    if store.find_school(school_id)?.is_none() {
        let details = json!({ "schoolId": school_id });
        return Err(HandlerErr::detailed("not_found", "school not found", details));
    }
    Ok(())
}

fn grading_scales_list(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let store = SqliteStore::new(db_conn(state)?);
    let school_id = required_str(req, "schoolId")?;
    require_school(&store, &school_id)?;
    let scales = store.grading_scales(&school_id)?;
    Ok(json!({ "gradingScales": scales }))
}

fn parse_scale_rows(
    school_id: &str,
    raw: &serde_json::Value,
) -> Result<Vec<GradingScale>, HandlerErr> {
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::new("bad_params", "scales must be an array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let grade_letter = item
            .get("gradeLetter")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let Some(grade_letter) = grade_letter else {
            let message = "scale gradeLetter is required";
            return Err(HandlerErr::detailed("bad_params", message, json!({ "index": i })));
        };
        let Some(min_score_percent) = item.get("minScorePercent").and_then(|v| v.as_f64()) else {
            let message = "scale minScorePercent must be a number";
            return Err(HandlerErr::detailed("bad_params", message, json!({ "index": i })));
        };
        let descriptor = item
            .get("descriptor")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        out.push(GradingScale {
            id: Uuid::new_v4().to_string(),
            school_id: school_id.to_string(),
            grade_letter,
            descriptor,
            min_score_percent,
        });
    }
    Ok(out)
}

/// Replaces a school's whole grading scale in one transaction.
fn grading_scales_replace(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_mut() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let school_id = required_str(req, "schoolId")?;
    require_school(&SqliteStore::new(conn), &school_id)?;
    let raw = req.params.get("scales").cloned().unwrap_or(serde_json::Value::Null);
    let mut scales = parse_scale_rows(&school_id, &raw)?;
    calc::check_distinct_thresholds(&scales)?;
    calc::sort_scales_descending(&mut scales);

    let tx = conn
        .transaction()
        .map_err(|e| db_write_err("grading_scales", e))?;
    tx.execute(
        "DELETE FROM grading_scales WHERE school_id = ?",
        [&school_id],
    )
    .map_err(|e| db_write_err("grading_scales", e))?;
    for s in &scales {
        tx.execute(
            "INSERT INTO grading_scales(id, school_id, grade_letter, descriptor, min_score_percent)
             VALUES(?, ?, ?, ?, ?)",
            (
                &s.id,
                &s.school_id,
                &s.grade_letter,
                &s.descriptor,
                s.min_score_percent,
            ),
        )
        .map_err(|e| db_write_err("grading_scales", e))?;
    }
    tx.commit().map_err(|e| db_write_err("grading_scales", e))?;

    tracing::info!(school_id = %school_id, count = scales.len(), "grading scales replaced");
    Ok(json!({ "gradingScales": scales }))
}

fn grading_resolve(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = SqliteStore::new(db_conn(state)?);
    let school_id = required_str(req, "schoolId")?;
    let score = required_f64(req, "score")?;
    require_school(&store, &school_id)?;
    let scales = store.grading_scales(&school_id)?;
    let grade = calc::resolve_grade(score, &scales);
    Ok(json!({ "score": score, "grade": grade }))
}

fn weights_from_params(req: &Request) -> Result<Option<Weights>, HandlerErr> {
    let Some(raw) = req.params.get("weights").filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let formative = raw.get("formativePct").and_then(|v| v.as_f64());
    let summative = raw.get("summativePct").and_then(|v| v.as_f64());
    match (formative, summative) {
        (Some(formative_pct), Some(summative_pct)) => Ok(Some(Weights {
            formative_pct,
            summative_pct,
        })),
        _ => Err(HandlerErr::new(
            "bad_params",
            "weights needs numeric formativePct and summativePct",
        )),
    }
}

/// Uses explicit `weights` when given, else the school's curriculum split.
fn grading_weighted_score(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let formative = required_f64(req, "formative")?;
    let summative = required_f64(req, "summative")?;

    let weights = match weights_from_params(req)? {
        Some(w) => w,
        None => {
            let Some(school_id) = optional_str(req, "schoolId") else {
                return Err(HandlerErr::new("bad_params", "provide weights or schoolId"));
            };
            let store = SqliteStore::new(db_conn(state)?);
            require_school(&store, &school_id)?;
            let curriculum_type = store.school_setting(&school_id)?.map(|s| s.curriculum_type);
            let overrides = store.weight_overrides()?;
            calc::curriculum_weights(curriculum_type.as_deref(), overrides.as_ref())
        }
    };

    let score = calc::weighted_score(formative, summative, &weights)?;
    Ok(json!({ "weights": weights, "result": score }))
}

fn calc_config_payload(conn: &rusqlite::Connection) -> Result<serde_json::Value, HandlerErr> {
    let overrides = SqliteStore::new(conn).weight_overrides()?.unwrap_or_default();
    let mut effective = calc::WeightOverrides::new();
    for ct in [calc::CURRICULUM_SECONDARY_LSC, calc::CURRICULUM_PRIMARY_LOCAL] {
        effective.insert(
            ct.to_string(),
            calc::curriculum_weights(Some(ct), Some(&overrides)),
        );
    }
    for (ct, w) in &overrides {
        effective.insert(ct.clone(), *w);
    }
    Ok(json!({
        "defaultWeights": calc::DEFAULT_WEIGHTS,
        "curriculumWeights": overrides,
        "effective": effective,
    }))
}

fn calc_config_get(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    calc_config_payload(db_conn(state)?)
}

fn calc_config_update(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let overrides = calc::parse_weight_overrides(req.params.get("curriculumWeights"))?;
    let value = serde_json::to_value(&overrides)
        .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?;
    db::settings_set_json(conn, WEIGHT_OVERRIDES_KEY, &value)
        .map_err(|e| db_write_err("workspace_settings", e))?;
    tracing::info!(count = overrides.len(), "curriculum weight overrides saved");
    calc_config_payload(conn)
}

fn calc_config_clear_override(
    state: &mut AppState,
    _req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let cleared = db::settings_delete(conn, WEIGHT_OVERRIDES_KEY)
        .map_err(|e| db_write_err("workspace_settings", e))?;
    Ok(json!({ "cleared": cleared }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grading.scales.list" => grading_scales_list(state, req),
        "grading.scales.replace" => grading_scales_replace(state, req),
        "grading.resolve" => grading_resolve(state, req),
        "grading.weightedScore" => grading_weighted_score(state, req),
        "calc.config.get" => calc_config_get(state, req),
        "calc.config.update" => calc_config_update(state, req),
        "calc.config.clearOverride" => calc_config_clear_override(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
