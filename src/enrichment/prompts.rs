/// Prompt for the feedback-analysis call. `{feedback}` is replaced with the
/// (truncated) response text, question context included when available.
pub const ENRICHMENT_PROMPT: &str = r#"You are a feedback analysis assistant. Analyze the following feedback and output JSON with these exact keys:

{
  "sentiment": "positive" | "negative" | "neutral" | "mixed",
  "sentiment_score": number between -1.0 (very negative) and 1.0 (very positive),
  "emotion": "joy" | "anger" | "frustration" | "sadness" | "confusion" | "neutral",
  "topics": array of 2-4 short topic keywords (e.g., ["pricing", "UI", "performance"])
}

Rules:
- Output ONLY valid JSON, no additional text
- Use lowercase for sentiment and emotion
- Topics should be concise keywords, not full sentences
- If unclear, default to "neutral" sentiment and 0.0 score
- If a question is provided, use it as context for topic extraction

Feedback:
"{feedback}""#;
