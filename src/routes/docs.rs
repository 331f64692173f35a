//! Static API documentation: a machine-readable OpenAPI document and a tiny
//! HTML page that renders it. Both endpoints are always public.

use axum::response::Html;
use axum::Json;
use serde_json::{json, Value};

/// GET /docs
pub async fn docs_handler() -> Html<&'static str> {
    Html(DOCS_PAGE)
}

/// GET /openapi.json
pub async fn openapi_handler() -> Json<Value> {
    Json(openapi_document())
}

const DOCS_PAGE: &str = r#"<!doctype html>
<html>
  <head>
    <title>Pulse Hub API</title>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
  </head>
  <body>
    <script id="api-reference" data-url="/openapi.json"></script>
    <script src="https://cdn.jsdelivr.net/npm/@scalar/api-reference"></script>
  </body>
</html>
"#;

fn openapi_document() -> Value {
    let experience_schema = json!({
        "type": "object",
        "required": ["id", "collected_at", "created_at", "updated_at", "source_type", "field_id", "field_type"],
        "properties": {
            "id": { "type": "string", "format": "uuid", "description": "UUIDv7 primary key (time-ordered)" },
            "collected_at": { "type": "string", "format": "date-time" },
            "created_at": { "type": "string", "format": "date-time" },
            "updated_at": { "type": "string", "format": "date-time" },
            "source_type": { "type": "string", "description": "Type of feedback source (e.g., survey, review, support)" },
            "source_id": { "type": "string" },
            "source_name": { "type": "string" },
            "field_id": { "type": "string" },
            "field_label": { "type": "string" },
            "field_type": {
                "type": "string",
                "enum": ["text", "categorical", "nps", "csat", "rating", "number", "boolean", "date"]
            },
            "value_text": { "type": "string" },
            "value_number": { "type": "number" },
            "value_boolean": { "type": "boolean" },
            "value_date": { "type": "string", "format": "date-time" },
            "value_json": { "type": "object" },
            "metadata": { "type": "object" },
            "language": { "type": "string", "maxLength": 10 },
            "user_identifier": { "type": "string" },
            "sentiment": { "type": "string", "enum": ["positive", "negative", "neutral", "mixed"] },
            "sentiment_score": { "type": "number", "minimum": -1, "maximum": 1 },
            "emotion": { "type": "string" },
            "topics": { "type": "array", "items": { "type": "string" }, "maxItems": 5 },
            "embedding_model": { "type": "string" }
        }
    });

    json!({
        "openapi": "3.1.0",
        "info": {
            "title": "Pulse Hub API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Feedback ingestion service: row-per-answer storage with asynchronous AI enrichment, webhook events, and semantic search."
        },
        "components": {
            "schemas": { "Experience": experience_schema },
            "securitySchemes": {
                "ApiKeyAuth": { "type": "apiKey", "in": "header", "name": "X-API-Key" }
            }
        },
        "paths": {
            "/health": {
                "get": {
                    "summary": "Liveness probe",
                    "responses": { "200": { "description": "Service is up" } }
                }
            },
            "/v1/experiences": {
                "post": {
                    "summary": "Create an experience record",
                    "responses": {
                        "201": { "description": "Created", "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Experience" } } } },
                        "422": { "description": "Schema validation failed" }
                    }
                },
                "get": {
                    "summary": "List experience records with filters",
                    "parameters": [
                        { "name": "source_type", "in": "query", "schema": { "type": "string" } },
                        { "name": "source_id", "in": "query", "schema": { "type": "string" } },
                        { "name": "field_type", "in": "query", "schema": { "type": "string" } },
                        { "name": "user_identifier", "in": "query", "schema": { "type": "string" } },
                        { "name": "since", "in": "query", "schema": { "type": "string", "format": "date-time" } },
                        { "name": "until", "in": "query", "schema": { "type": "string", "format": "date-time" } },
                        { "name": "limit", "in": "query", "schema": { "type": "integer", "minimum": 1, "maximum": 1000, "default": 100 } },
                        { "name": "offset", "in": "query", "schema": { "type": "integer", "minimum": 0, "default": 0 } }
                    ],
                    "responses": { "200": { "description": "Paginated records, newest collection first" } }
                }
            },
            "/v1/experiences/search": {
                "get": {
                    "summary": "Semantic search over embedded records",
                    "parameters": [
                        { "name": "query", "in": "query", "required": true, "schema": { "type": "string", "maxLength": 1000 } },
                        { "name": "limit", "in": "query", "schema": { "type": "integer", "minimum": 1, "maximum": 100, "default": 10 } },
                        { "name": "source_type", "in": "query", "schema": { "type": "string" } },
                        { "name": "since", "in": "query", "schema": { "type": "string", "format": "date-time" } },
                        { "name": "until", "in": "query", "schema": { "type": "string", "format": "date-time" } }
                    ],
                    "responses": {
                        "200": { "description": "Results ordered by similarity, each with similarity_score in [0, 1]" },
                        "400": { "description": "Search requested while embeddings are disabled, or malformed filters" },
                        "503": { "description": "Embedding provider unavailable" }
                    }
                }
            },
            "/v1/experiences/{id}": {
                "get": {
                    "summary": "Fetch a record by id",
                    "parameters": [{ "name": "id", "in": "path", "required": true, "schema": { "type": "string", "format": "uuid" } }],
                    "responses": {
                        "200": { "description": "The record" },
                        "404": { "description": "Unknown id" }
                    }
                },
                "patch": {
                    "summary": "Partially update a record",
                    "parameters": [{ "name": "id", "in": "path", "required": true, "schema": { "type": "string", "format": "uuid" } }],
                    "responses": {
                        "200": { "description": "The updated record" },
                        "404": { "description": "Unknown id" }
                    }
                },
                "delete": {
                    "summary": "Remove a record",
                    "parameters": [{ "name": "id", "in": "path", "required": true, "schema": { "type": "string", "format": "uuid" } }],
                    "responses": {
                        "204": { "description": "Deleted" },
                        "404": { "description": "Unknown id" }
                    }
                }
            }
        },
        "security": [{ "ApiKeyAuth": [] }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_lists_all_routes() {
        let doc = openapi_document();
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/health"));
        assert!(paths.contains_key("/v1/experiences"));
        assert!(paths.contains_key("/v1/experiences/{id}"));
        assert!(paths.contains_key("/v1/experiences/search"));
    }

    #[test]
    fn test_openapi_field_type_enum_matches_model() {
        use crate::models::experience::FieldType;
        let doc = openapi_document();
        let enum_values: Vec<&str> = doc["components"]["schemas"]["Experience"]["properties"]
            ["field_type"]["enum"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        for ft in FieldType::ALL {
            assert!(enum_values.contains(&ft.as_str()), "missing {ft}");
        }
    }
}
