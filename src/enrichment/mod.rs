/// NLP enrichment: sentiment, emotion, and topic extraction for open-ended
/// feedback via the OpenAI chat completions API. All calls happen on the
/// background workers; nothing on the ingest path waits for this module.
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::provider::{api_error, truncate_chars, ProviderError};

pub mod prompts;

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
/// Prompt input is truncated to this many characters (~250 tokens).
const MAX_PROMPT_TEXT_CHARS: usize = 1000;
/// Topics are capped at this many entries after normalization.
pub const MAX_TOPICS: usize = 5;

const VALID_SENTIMENTS: &[&str] = &["positive", "negative", "neutral", "mixed"];
const VALID_EMOTIONS: &[&str] = &[
    "joy",
    "anger",
    "frustration",
    "sadness",
    "confusion",
    "neutral",
];

/// Structured analysis result, normalized to the documented value sets.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Enrichment {
    pub sentiment: String,
    pub sentiment_score: f64,
    pub emotion: String,
    pub topics: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Client for the enrichment model. One instance is shared by all workers.
#[derive(Clone)]
pub struct Service {
    client: Client,
    api_key: String,
    model: String,
}

impl Service {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Analyzes `text` and returns normalized sentiment/emotion/topics.
    /// Single attempt, bounded by the provider timeout; callers treat any
    /// error as a failed job.
    pub async fn enrich(&self, text: &str) -> Result<Enrichment, ProviderError> {
        let prompt = build_prompt(text);

        let request_body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            // gpt-5-mini rejects non-default temperature; everything else is
            // pinned to 0.0 for deterministic analysis.
            temperature: (self.model != "gpt-5-mini").then_some(0.0),
        };

        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), body));
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or(ProviderError::EmptyResponse)?;

        let parsed: Enrichment = match serde_json::from_str(strip_json_fences(content)) {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, content, "failed to parse enrichment response");
                return Err(ProviderError::Parse(err));
            }
        };

        let enrichment = normalize(parsed);
        debug!(
            sentiment = %enrichment.sentiment,
            emotion = %enrichment.emotion,
            topics = enrichment.topics.len(),
            "enrichment call succeeded"
        );
        Ok(enrichment)
    }
}

fn build_prompt(text: &str) -> String {
    let text = truncate_chars(text, MAX_PROMPT_TEXT_CHARS);
    prompts::ENRICHMENT_PROMPT.replace("{feedback}", &text)
}

/// Clamps the score to [-1, 1], maps unknown sentiment/emotion values to
/// `neutral`, and truncates topics to the documented maximum.
pub fn normalize(mut e: Enrichment) -> Enrichment {
    if !VALID_SENTIMENTS.contains(&e.sentiment.as_str()) {
        e.sentiment = "neutral".to_string();
    }
    e.sentiment_score = e.sentiment_score.clamp(-1.0, 1.0);
    if !VALID_EMOTIONS.contains(&e.emotion.as_str()) {
        e.emotion = "neutral".to_string();
    }
    e.topics.truncate(MAX_TOPICS);
    e
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(sentiment: &str, score: f64, emotion: &str, topics: &[&str]) -> Enrichment {
        Enrichment {
            sentiment: sentiment.to_string(),
            sentiment_score: score,
            emotion: emotion.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_normalize_passes_valid_values() {
        let e = normalize(raw("negative", -0.8, "frustration", &["checkout"]));
        assert_eq!(e.sentiment, "negative");
        assert_eq!(e.sentiment_score, -0.8);
        assert_eq!(e.emotion, "frustration");
        assert_eq!(e.topics, vec!["checkout"]);
    }

    #[test]
    fn test_normalize_unknown_sentiment_becomes_neutral() {
        let e = normalize(raw("ecstatic", 0.5, "joy", &[]));
        assert_eq!(e.sentiment, "neutral");
    }

    #[test]
    fn test_normalize_unknown_emotion_becomes_neutral() {
        let e = normalize(raw("positive", 0.5, "elation", &[]));
        assert_eq!(e.emotion, "neutral");
    }

    #[test]
    fn test_normalize_accepts_mixed_and_confusion() {
        let e = normalize(raw("mixed", 0.0, "confusion", &[]));
        assert_eq!(e.sentiment, "mixed");
        assert_eq!(e.emotion, "confusion");
    }

    #[test]
    fn test_normalize_clamps_score() {
        assert_eq!(normalize(raw("positive", 3.5, "joy", &[])).sentiment_score, 1.0);
        assert_eq!(
            normalize(raw("negative", -2.0, "anger", &[])).sentiment_score,
            -1.0
        );
    }

    #[test]
    fn test_normalize_truncates_topics() {
        let e = normalize(raw("neutral", 0.0, "neutral", &["a", "b", "c", "d", "e", "f", "g"]));
        assert_eq!(e.topics.len(), MAX_TOPICS);
        assert_eq!(e.topics, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_build_prompt_embeds_feedback() {
        let prompt = build_prompt("Checkout is slow");
        assert!(prompt.contains("Checkout is slow"));
        assert!(!prompt.contains("{feedback}"));
    }

    #[test]
    fn test_build_prompt_truncates_long_text() {
        let long = "x".repeat(5000);
        let prompt = build_prompt(&long);
        assert!(prompt.contains(&format!("{}...", "x".repeat(MAX_PROMPT_TEXT_CHARS))));
        assert!(!prompt.contains(&"x".repeat(MAX_PROMPT_TEXT_CHARS + 1)));
    }

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_parse_enrichment_response() {
        let content = r#"{"sentiment":"negative","sentiment_score":-0.8,"emotion":"frustration","topics":["checkout","performance"]}"#;
        let e: Enrichment = serde_json::from_str(content).unwrap();
        assert_eq!(e.sentiment, "negative");
        assert_eq!(e.topics.len(), 2);
    }
}
