//! Semantic search over embedded records: embed the query, order stored
//! records by cosine distance, and report a bounded similarity per result.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AppError;
use crate::experiences::handlers::parse_time;
use crate::experiences::store::{self, SearchFilters};
use crate::models::experience::Experience;
use crate::state::AppState;

const DEFAULT_SEARCH_LIMIT: i64 = 10;
const MAX_SEARCH_LIMIT: i64 = 100;
const MAX_QUERY_LEN: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub limit: Option<i64>,
    pub source_type: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResultItem {
    #[serde(flatten)]
    pub experience: Experience,
    /// Cosine similarity in [0, 1]; higher is more similar.
    pub similarity_score: f64,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub query: String,
    pub count: usize,
}

/// GET /v1/experiences/search
pub async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let Some(embedding) = &state.embedding else {
        return Err(AppError::BadRequest(
            "Semantic search is not enabled. Configure OPENAI_API_KEY and OPENAI_EMBEDDING_MODEL to enable."
                .to_string(),
        ));
    };

    let query = params.query.trim();
    if query.is_empty() {
        return Err(AppError::Validation("query must not be empty".to_string()));
    }
    if query.chars().count() > MAX_QUERY_LEN {
        return Err(AppError::Validation(format!(
            "query must be at most {MAX_QUERY_LEN} characters"
        )));
    }

    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {MAX_SEARCH_LIMIT}"
        )));
    }

    let filters = SearchFilters {
        source_type: params.source_type,
        since: params.since.as_deref().map(|s| parse_time(s, "since")).transpose()?,
        until: params.until.as_deref().map(|s| parse_time(s, "until")).transpose()?,
        limit,
    };

    let query_vector = embedding
        .embed(query)
        .await
        .map_err(|e| AppError::from_provider(e, "embedding", "generate query embedding"))?;

    let rows = store::search_by_vector(&state.db, &query_vector, &filters)
        .await
        .map_err(|e| AppError::from_db(e, "semantic search", "query"))?;

    debug!(query, results = rows.len(), "semantic search executed");

    let results: Vec<SearchResultItem> = rows
        .into_iter()
        .map(|row| {
            let distance = row
                .embedding
                .as_ref()
                .map(|e| cosine_distance(query_vector.as_slice(), e.as_slice()))
                .unwrap_or(1.0);
            SearchResultItem {
                experience: Experience::from(row),
                similarity_score: similarity_from_distance(distance),
            }
        })
        .collect();

    Ok(Json(SearchResponse {
        count: results.len(),
        query: query.to_string(),
        results,
    }))
}

/// Converts a cosine distance (0 identical .. 2 opposite) to the similarity
/// reported to clients, clamped to [0, 1].
fn similarity_from_distance(distance: f64) -> f64 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Cosine distance = 1 - cosine similarity. Degenerate inputs (mismatched
/// lengths, empty or zero-magnitude vectors) report maximum distance.
fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }

    // Clamp to counter floating point drift before converting to distance.
    let cosine_similarity = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    1.0 - cosine_similarity
}
