//! Record store for the `experiences` table: CRUD, filtered listing, the
//! derived-column patches written by workers, and the vector-ordered select
//! behind semantic search.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::enrichment::Enrichment;
use crate::models::experience::{ExperienceRow, FieldType};

/// Validated input for `create`. Exactly which value column is populated is
/// the ingest layer's concern; the store persists what it is given.
#[derive(Debug)]
pub struct NewExperience {
    pub collected_at: DateTime<Utc>,
    pub source_type: String,
    pub source_id: Option<String>,
    pub source_name: Option<String>,
    pub field_id: String,
    pub field_label: Option<String>,
    pub field_type: FieldType,
    pub value_text: Option<String>,
    pub value_number: Option<f64>,
    pub value_boolean: Option<bool>,
    pub value_date: Option<DateTime<Utc>>,
    pub value_json: Option<Value>,
    pub metadata: Option<Value>,
    pub language: Option<String>,
    pub user_identifier: Option<String>,
}

/// Mutable, non-identifying fields accepted by `update`. `None` leaves the
/// column untouched; last writer wins on the supplied columns only.
#[derive(Debug, Default)]
pub struct ExperiencePatch {
    pub value_text: Option<String>,
    pub value_number: Option<f64>,
    pub value_boolean: Option<bool>,
    pub value_date: Option<DateTime<Utc>>,
    pub value_json: Option<Value>,
    pub metadata: Option<Value>,
    pub language: Option<String>,
    pub user_identifier: Option<String>,
}

/// Filters for `list`. Time bounds apply to `collected_at`.
#[derive(Debug, Default)]
pub struct ListFilters {
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub field_type: Option<String>,
    pub user_identifier: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// Filters for `search_by_vector`.
#[derive(Debug, Default)]
pub struct SearchFilters {
    pub source_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: i64,
}

pub async fn create(pool: &PgPool, new: &NewExperience) -> Result<ExperienceRow, sqlx::Error> {
    sqlx::query_as::<_, ExperienceRow>(
        "INSERT INTO experiences (
             id, collected_at, source_type, source_id, source_name,
             field_id, field_label, field_type,
             value_text, value_number, value_boolean, value_date, value_json,
             metadata, language, user_identifier
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
         RETURNING *",
    )
    // UUIDv7: time-ordered so that id sort order approximates creation order
    .bind(Uuid::now_v7())
    .bind(new.collected_at)
    .bind(&new.source_type)
    .bind(&new.source_id)
    .bind(&new.source_name)
    .bind(&new.field_id)
    .bind(&new.field_label)
    .bind(new.field_type.as_str())
    .bind(&new.value_text)
    .bind(new.value_number)
    .bind(new.value_boolean)
    .bind(new.value_date)
    .bind(&new.value_json)
    .bind(&new.metadata)
    .bind(&new.language)
    .bind(&new.user_identifier)
    .fetch_one(pool)
    .await
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<ExperienceRow, sqlx::Error> {
    sqlx::query_as::<_, ExperienceRow>("SELECT * FROM experiences WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Lists records matching the filters, newest collection first, plus the
/// total count over the same filters for the pagination envelope.
pub async fn list(
    pool: &PgPool,
    filters: &ListFilters,
) -> Result<(Vec<ExperienceRow>, i64), sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM experiences WHERE TRUE");
    push_list_filters(&mut query, filters);
    query.push(" ORDER BY collected_at DESC LIMIT ");
    query.push_bind(filters.limit);
    query.push(" OFFSET ");
    query.push_bind(filters.offset);

    let rows = query
        .build_query_as::<ExperienceRow>()
        .fetch_all(pool)
        .await?;

    let mut count_query =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM experiences WHERE TRUE");
    push_list_filters(&mut count_query, filters);
    let total: i64 = count_query.build_query_scalar().fetch_one(pool).await?;

    Ok((rows, total))
}

fn push_list_filters(query: &mut QueryBuilder<'_, Postgres>, filters: &ListFilters) {
    if let Some(source_type) = &filters.source_type {
        query.push(" AND source_type = ").push_bind(source_type.clone());
    }
    if let Some(source_id) = &filters.source_id {
        query.push(" AND source_id = ").push_bind(source_id.clone());
    }
    if let Some(field_type) = &filters.field_type {
        query.push(" AND field_type = ").push_bind(field_type.clone());
    }
    if let Some(user_identifier) = &filters.user_identifier {
        query
            .push(" AND user_identifier = ")
            .push_bind(user_identifier.clone());
    }
    if let Some(since) = filters.since {
        query.push(" AND collected_at >= ").push_bind(since);
    }
    if let Some(until) = filters.until {
        query.push(" AND collected_at <= ").push_bind(until);
    }
}

/// Applies the supplied columns and bumps `updated_at`. An empty patch still
/// touches `updated_at`, matching create/patch idempotence expectations.
pub async fn update(
    pool: &PgPool,
    id: Uuid,
    patch: &ExperiencePatch,
) -> Result<ExperienceRow, sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new("UPDATE experiences SET updated_at = now()");

    if let Some(value_text) = &patch.value_text {
        query.push(", value_text = ").push_bind(value_text.clone());
    }
    if let Some(value_number) = patch.value_number {
        query.push(", value_number = ").push_bind(value_number);
    }
    if let Some(value_boolean) = patch.value_boolean {
        query.push(", value_boolean = ").push_bind(value_boolean);
    }
    if let Some(value_date) = patch.value_date {
        query.push(", value_date = ").push_bind(value_date);
    }
    if let Some(value_json) = &patch.value_json {
        query.push(", value_json = ").push_bind(value_json.clone());
    }
    if let Some(metadata) = &patch.metadata {
        query.push(", metadata = ").push_bind(metadata.clone());
    }
    if let Some(language) = &patch.language {
        query.push(", language = ").push_bind(language.clone());
    }
    if let Some(user_identifier) = &patch.user_identifier {
        query
            .push(", user_identifier = ")
            .push_bind(user_identifier.clone());
    }

    query.push(" WHERE id = ").push_bind(id);
    query.push(" RETURNING *");

    query.build_query_as::<ExperienceRow>().fetch_one(pool).await
}

/// Hard delete. Returns the number of rows removed (0 means not found).
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM experiences WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Writes the enrichment bundle onto a record. Later successes overwrite.
pub async fn apply_enrichment(
    pool: &PgPool,
    id: Uuid,
    enrichment: &Enrichment,
) -> Result<ExperienceRow, sqlx::Error> {
    sqlx::query_as::<_, ExperienceRow>(
        "UPDATE experiences
         SET sentiment = $2, sentiment_score = $3, emotion = $4, topics = $5,
             updated_at = now()
         WHERE id = $1
         RETURNING *",
    )
    .bind(id)
    .bind(&enrichment.sentiment)
    .bind(enrichment.sentiment_score)
    .bind(&enrichment.emotion)
    .bind(Json(&enrichment.topics))
    .fetch_one(pool)
    .await
}

/// Writes the embedding vector and the producing model's name onto a record.
pub async fn apply_embedding(
    pool: &PgPool,
    id: Uuid,
    embedding: &Vector,
    model: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE experiences
         SET embedding = $2, embedding_model = $3, updated_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .bind(embedding)
    .bind(model)
    .execute(pool)
    .await?;
    Ok(())
}

/// Selects embedded records ordered by ascending cosine distance to the
/// query vector. Ties on distance resolve to the most recent record first
/// (UUIDv7 ids sort by creation time). Records without an embedding are
/// never returned.
pub async fn search_by_vector(
    pool: &PgPool,
    query_vector: &Vector,
    filters: &SearchFilters,
) -> Result<Vec<ExperienceRow>, sqlx::Error> {
    let mut query =
        QueryBuilder::<Postgres>::new("SELECT * FROM experiences WHERE embedding IS NOT NULL");

    if let Some(source_type) = &filters.source_type {
        query.push(" AND source_type = ").push_bind(source_type.clone());
    }
    if let Some(since) = filters.since {
        query.push(" AND collected_at >= ").push_bind(since);
    }
    if let Some(until) = filters.until {
        query.push(" AND collected_at <= ").push_bind(until);
    }

    query.push(" ORDER BY embedding <=> ");
    query.push_bind(query_vector.clone());
    query.push(" ASC, id DESC LIMIT ");
    query.push_bind(filters.limit);

    query
        .build_query_as::<ExperienceRow>()
        .fetch_all(pool)
        .await
}
