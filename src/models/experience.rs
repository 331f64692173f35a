use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Standardized data types for experience fields. The type dictates which
/// value column holds the answer and whether the record is eligible for
/// AI derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Open-ended qualitative feedback. Stored in value_text; enriched and embedded.
    Text,
    /// Pre-defined discrete options, one row per selection. Stored in value_text.
    Categorical,
    /// Net Promoter Score (0-10). Stored in value_number.
    Nps,
    /// Customer Satisfaction scale. Stored in value_number.
    Csat,
    /// Generic rating scale (stars, 1-10). Stored in value_number.
    Rating,
    /// Quantitative continuous measurement. Stored in value_number.
    Number,
    /// Binary yes/no. Stored in value_boolean.
    Boolean,
    /// Temporal value. Stored in value_date.
    Date,
}

impl FieldType {
    pub const ALL: &'static [FieldType] = &[
        FieldType::Text,
        FieldType::Categorical,
        FieldType::Nps,
        FieldType::Csat,
        FieldType::Rating,
        FieldType::Number,
        FieldType::Boolean,
        FieldType::Date,
    ];

    pub fn parse(s: &str) -> Option<FieldType> {
        match s {
            "text" => Some(FieldType::Text),
            "categorical" => Some(FieldType::Categorical),
            "nps" => Some(FieldType::Nps),
            "csat" => Some(FieldType::Csat),
            "rating" => Some(FieldType::Rating),
            "number" => Some(FieldType::Number),
            "boolean" => Some(FieldType::Boolean),
            "date" => Some(FieldType::Date),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Categorical => "categorical",
            FieldType::Nps => "nps",
            FieldType::Csat => "csat",
            FieldType::Rating => "rating",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
        }
    }

    /// Only open-ended text responses go through sentiment/emotion/topic
    /// analysis and embedding generation.
    pub fn should_enrich(self) -> bool {
        self == FieldType::Text
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored representation: one row of the `experiences` table, including the
/// raw embedding vector. Never serialized to clients directly.
#[derive(Debug, Clone, FromRow)]
pub struct ExperienceRow {
    pub id: Uuid,
    pub collected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
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
    pub metadata: Option<Value>,
    pub language: Option<String>,
    pub user_identifier: Option<String>,
    pub sentiment: Option<String>,
    pub sentiment_score: Option<f64>,
    pub emotion: Option<String>,
    pub topics: Option<Json<Vec<String>>>,
    pub embedding: Option<Vector>,
    pub embedding_model: Option<String>,
}

/// Domain representation of an experience record, independent of the API
/// surface and the database row. This is what webhooks and API responses
/// carry; the raw embedding vector is deliberately not part of it.
#[derive(Debug, Clone, Serialize)]
pub struct Experience {
    pub id: Uuid,
    pub collected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    pub field_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_label: Option<String>,
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_number: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl From<ExperienceRow> for Experience {
    fn from(row: ExperienceRow) -> Self {
        Experience {
            id: row.id,
            collected_at: row.collected_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            source_type: row.source_type,
            source_id: row.source_id,
            source_name: row.source_name,
            field_id: row.field_id,
            field_label: row.field_label,
            field_type: row.field_type,
            value_text: row.value_text,
            value_number: row.value_number,
            value_boolean: row.value_boolean,
            value_date: row.value_date,
            value_json: row.value_json,
            metadata: row.metadata,
            language: row.language,
            user_identifier: row.user_identifier,
            sentiment: row.sentiment,
            sentiment_score: row.sentiment_score,
            emotion: row.emotion,
            topics: row.topics.map(|t| t.0),
            embedding_model: row.embedding_model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_field_types() {
        for ft in FieldType::ALL {
            assert_eq!(FieldType::parse(ft.as_str()), Some(*ft));
        }
    }

    #[test]
    fn test_parse_unknown_field_type() {
        assert_eq!(FieldType::parse("multiple_choice"), None);
        assert_eq!(FieldType::parse(""), None);
        assert_eq!(FieldType::parse("TEXT"), None);
    }

    #[test]
    fn test_only_text_is_enriched() {
        assert!(FieldType::Text.should_enrich());
        for ft in FieldType::ALL {
            if *ft != FieldType::Text {
                assert!(!ft.should_enrich(), "{ft} should not be enriched");
            }
        }
    }

    #[test]
    fn test_serde_roundtrip_lowercase() {
        let json = serde_json::to_string(&FieldType::Nps).unwrap();
        assert_eq!(json, "\"nps\"");
        let back: FieldType = serde_json::from_str("\"boolean\"").unwrap();
        assert_eq!(back, FieldType::Boolean);
    }
}
