use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::build_derivation_text;
use crate::errors::{AppError, ERR_MSG_INVALID_ID};
use crate::experiences::store::{self, ExperiencePatch, ListFilters, NewExperience};
use crate::models::experience::{Experience, FieldType};
use crate::queue::{self, JobType};
use crate::state::AppState;
use crate::webhook::EventKind;

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1000;
const MAX_LANGUAGE_LEN: usize = 10;

#[derive(Debug, Deserialize)]
pub struct CreateExperienceRequest {
    pub source_type: String,
    pub source_id: Option<String>,
    pub source_name: Option<String>,
    pub field_id: String,
    pub field_label: Option<String>,
    pub field_type: String,
    pub value_text: Option<String>,
    pub value_number: Option<f64>,
    pub value_boolean: Option<bool>,
    pub value_date: Option<DateTime<Utc>>,
    pub value_json: Option<Value>,
    pub collected_at: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
    pub language: Option<String>,
    pub user_identifier: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateExperienceRequest {
    pub value_text: Option<String>,
    pub value_number: Option<f64>,
    pub value_boolean: Option<bool>,
    pub value_date: Option<DateTime<Utc>>,
    pub value_json: Option<Value>,
    pub metadata: Option<Value>,
    pub language: Option<String>,
    pub user_identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub field_type: Option<String>,
    pub user_identifier: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub data: Vec<Experience>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// POST /v1/experiences
pub async fn handle_create(
    State(state): State<AppState>,
    Json(req): Json<CreateExperienceRequest>,
) -> Result<(StatusCode, Json<Experience>), AppError> {
    let field_type = validate_create(&req)?;

    let new = NewExperience {
        collected_at: req.collected_at.unwrap_or_else(Utc::now),
        source_type: req.source_type,
        source_id: req.source_id,
        source_name: req.source_name,
        field_id: req.field_id,
        field_label: req.field_label,
        field_type,
        value_text: req.value_text,
        value_number: req.value_number,
        value_boolean: req.value_boolean,
        value_date: req.value_date,
        value_json: req.value_json,
        metadata: req.metadata,
        language: req.language,
        user_identifier: req.user_identifier,
    };

    let row = store::create(&state.db, &new)
        .await
        .map_err(|e| AppError::from_db(e, "create", "new"))?;

    // Text answers get one enrichment job and one embedding job, queued
    // before the response returns. Enqueue failures are logged but never
    // fail the ingest.
    let should_process = field_type.should_enrich()
        && row.value_text.as_deref().is_some_and(|t| !t.is_empty())
        && state.config.derivation_enabled();

    if should_process {
        let text = build_derivation_text(
            row.field_label.as_deref(),
            row.value_text.as_deref().unwrap_or_default(),
        );
        for job_type in [JobType::Enrichment, JobType::Embedding] {
            match queue::enqueue(&state.db, row.id, &text, job_type).await {
                Ok(()) => debug!(experience_id = %row.id, %job_type, "derivation job enqueued"),
                Err(err) => warn!(
                    experience_id = %row.id,
                    %job_type,
                    error = %err,
                    "failed to enqueue derivation job"
                ),
            }
        }
    }

    info!(id = %row.id, queued_for_derivation = should_process, "experience created");

    let experience = Experience::from(row);
    state.dispatcher.dispatch(EventKind::Created, &experience);

    Ok((StatusCode::CREATED, Json(experience)))
}

/// GET /v1/experiences/:id
pub async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Experience>, AppError> {
    let id = parse_id(&id)?;
    let row = store::get(&state.db, id)
        .await
        .map_err(|e| AppError::from_db(e, "get", &id.to_string()))?;
    Ok(Json(Experience::from(row)))
}

/// GET /v1/experiences
pub async fn handle_list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}"
        )));
    }
    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        return Err(AppError::Validation("offset must not be negative".to_string()));
    }

    let filters = ListFilters {
        source_type: params.source_type,
        source_id: params.source_id,
        field_type: params.field_type,
        user_identifier: params.user_identifier,
        since: params.since.as_deref().map(|s| parse_time(s, "since")).transpose()?,
        until: params.until.as_deref().map(|s| parse_time(s, "until")).transpose()?,
        limit,
        offset,
    };

    let (rows, total) = store::list(&state.db, &filters)
        .await
        .map_err(|e| AppError::from_db(e, "list", "experiences"))?;

    Ok(Json(ListResponse {
        data: rows.into_iter().map(Experience::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// PATCH /v1/experiences/:id
pub async fn handle_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateExperienceRequest>,
) -> Result<Json<Experience>, AppError> {
    let id = parse_id(&id)?;
    validate_language(req.language.as_deref())?;

    let patch = ExperiencePatch {
        value_text: req.value_text,
        value_number: req.value_number,
        value_boolean: req.value_boolean,
        value_date: req.value_date,
        value_json: req.value_json,
        metadata: req.metadata,
        language: req.language,
        user_identifier: req.user_identifier,
    };

    let row = store::update(&state.db, id, &patch)
        .await
        .map_err(|e| AppError::from_db(e, "update", &id.to_string()))?;

    info!(id = %row.id, "experience updated");

    let experience = Experience::from(row);
    state.dispatcher.dispatch(EventKind::Updated, &experience);

    Ok(Json(experience))
}

/// DELETE /v1/experiences/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;

    // Fetch first so the deleted event can carry the final snapshot.
    let row = store::get(&state.db, id)
        .await
        .map_err(|e| AppError::from_db(e, "get for deletion", &id.to_string()))?;

    let removed = store::delete(&state.db, id)
        .await
        .map_err(|e| AppError::from_db(e, "delete", &id.to_string()))?;
    if removed == 0 {
        return Err(AppError::NotFound);
    }

    info!(%id, "experience deleted");

    state
        .dispatcher
        .dispatch(EventKind::Deleted, &Experience::from(row));

    Ok(StatusCode::NO_CONTENT)
}

fn validate_create(req: &CreateExperienceRequest) -> Result<FieldType, AppError> {
    if req.source_type.trim().is_empty() {
        return Err(AppError::Validation("source_type must not be empty".to_string()));
    }
    if req.field_id.trim().is_empty() {
        return Err(AppError::Validation("field_id must not be empty".to_string()));
    }
    let field_type = FieldType::parse(&req.field_type).ok_or_else(|| {
        AppError::Validation(format!(
            "invalid field_type: {} (must be one of: text, categorical, nps, csat, rating, number, boolean, date)",
            req.field_type
        ))
    })?;
    validate_language(req.language.as_deref())?;
    Ok(field_type)
}

fn validate_language(language: Option<&str>) -> Result<(), AppError> {
    match language {
        Some(lang) if lang.len() > MAX_LANGUAGE_LEN => Err(AppError::Validation(format!(
            "language must be at most {MAX_LANGUAGE_LEN} characters"
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn parse_id(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id).map_err(|_| AppError::BadRequest(ERR_MSG_INVALID_ID.to_string()))
}

pub(crate) fn parse_time(value: &str, param: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| {
            AppError::BadRequest(format!(
                "Invalid '{param}' timestamp format. Expected ISO 8601 (RFC3339) format, e.g., 2024-01-01T00:00:00Z"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request(field_type: &str) -> CreateExperienceRequest {
        CreateExperienceRequest {
            source_type: "survey".to_string(),
            source_id: None,
            source_name: None,
            field_id: "q1".to_string(),
            field_label: None,
            field_type: field_type.to_string(),
            value_text: None,
            value_number: None,
            value_boolean: None,
            value_date: None,
            value_json: None,
            collected_at: None,
            metadata: None,
            language: None,
            user_identifier: None,
        }
    }

    #[test]
    fn test_validate_create_accepts_known_field_types() {
        assert_eq!(validate_create(&create_request("text")).unwrap(), FieldType::Text);
        assert_eq!(validate_create(&create_request("nps")).unwrap(), FieldType::Nps);
    }

    #[test]
    fn test_validate_create_rejects_unknown_field_type() {
        let err = validate_create(&create_request("multiple_choice")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_validate_create_rejects_empty_source_type() {
        let mut req = create_request("text");
        req.source_type = "  ".to_string();
        assert!(matches!(
            validate_create(&req).unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[test]
    fn test_validate_create_rejects_empty_field_id() {
        let mut req = create_request("text");
        req.field_id = String::new();
        assert!(matches!(
            validate_create(&req).unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[test]
    fn test_validate_create_rejects_long_language() {
        let mut req = create_request("text");
        req.language = Some("en-US-variant".to_string());
        assert!(matches!(
            validate_create(&req).unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[test]
    fn test_parse_id_rejects_malformed_uuid() {
        assert!(matches!(
            parse_id("not-a-uuid").unwrap_err(),
            AppError::BadRequest(_)
        ));
        assert!(parse_id("0190a2f4-1111-7abc-8def-0123456789ab").is_ok());
    }

    #[test]
    fn test_parse_time_accepts_rfc3339() {
        let t = parse_time("2024-01-01T00:00:00Z", "since").unwrap();
        assert_eq!(t.timezone(), Utc);
    }

    #[test]
    fn test_parse_time_rejects_malformed() {
        assert!(matches!(
            parse_time("yesterday", "since").unwrap_err(),
            AppError::BadRequest(_)
        ));
    }
}
