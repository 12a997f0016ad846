//! LLM extraction service client.
//!
//! The service consumes one transcript chunk and the fixed output schema,
//! and returns structured JSON (or a malformed/empty response, handled at
//! the schema boundary). The trait seam allows swapping the HTTP client
//! for a mock.

use crate::error::{LongwaveError, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Fixed output schema the service is instructed to produce.
const SCHEMA_PROMPT: &str = r#"You extract structured knowledge from interview transcripts.
Reply with a single JSON object and nothing else, using exactly this shape:
{
  "entities": [{"name": "...", "type": "PERSON|ORGANIZATION|LOCATION|PRODUCT|EVENT|OTHER", "confidence": 0.0, "evidence": "..."}],
  "relationships": [{"subject": "...", "predicate": "...", "object": "...", "confidence": 0.0, "evidence": "..."}]
}"#;

/// Additional fields requested only when the whole transcript fits one chunk,
/// since they require whole-document context no partial chunk has.
const DOCUMENT_FIELDS_PROMPT: &str = r#"
Additionally include:
  "topics": ["..."],
  "key_moments": [{"description": "...", "timestamp_secs": 0.0}],
  "sentiment": "positive|neutral|negative|mixed""#;

/// Trait for the LLM extraction service.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract knowledge from one transcript chunk.
    ///
    /// Returns the raw JSON payload; schema validation happens at the
    /// caller's boundary, not here.
    async fn extract(
        &self,
        chunk_index: usize,
        chunk_text: &str,
        include_document_fields: bool,
    ) -> Result<Value>;
}

/// HTTP extraction client against an OpenAI-compatible chat completions API.
pub struct HttpExtractor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpExtractor {
    pub fn new(endpoint: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }
}

/// Request body for one extraction call.
fn build_request_body(model: &str, chunk_text: &str, include_document_fields: bool) -> Value {
    let mut system = SCHEMA_PROMPT.to_string();
    if include_document_fields {
        system.push_str(DOCUMENT_FIELDS_PROMPT);
    }
    json!({
        "model": model,
        "temperature": 0.0,
        "response_format": {"type": "json_object"},
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": chunk_text},
        ],
    })
}

/// Pull the message content out of a chat completions response and parse it
/// as JSON. Empty or non-JSON content is a schema violation.
fn parse_response(chunk_index: usize, response: &Value) -> Result<Value> {
    let content = response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| LongwaveError::ExtractionCall {
            message: format!("chunk {chunk_index}: response carried no message content"),
        })?;

    serde_json::from_str(content).map_err(|e| LongwaveError::SchemaViolation {
        message: format!("chunk {chunk_index}: content is not valid JSON: {e}"),
    })
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(
        &self,
        chunk_index: usize,
        chunk_text: &str,
        include_document_fields: bool,
    ) -> Result<Value> {
        let body = build_request_body(&self.model, chunk_text, include_document_fields);

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LongwaveError::ExtractionCall {
                message: format!("chunk {chunk_index}: request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LongwaveError::ExtractionCall {
                message: format!("chunk {chunk_index}: service returned {status}"),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LongwaveError::ExtractionCall {
                message: format!("chunk {chunk_index}: unreadable response body: {e}"),
            })?;

        parse_response(chunk_index, &payload)
    }
}

/// Scripted outcome for [`MockExtractor`].
#[derive(Debug, Clone)]
pub enum MockExtraction {
    Payload(Value),
    Fail(String),
}

/// Mock extraction service for testing.
///
/// Outcomes are scripted per chunk index and consumed in order; unscripted
/// calls return `default_payload`.
pub struct MockExtractor {
    by_chunk: Mutex<HashMap<usize, VecDeque<MockExtraction>>>,
    default_payload: Value,
    calls: AtomicU32,
    document_field_requests: AtomicU32,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            by_chunk: Mutex::new(HashMap::new()),
            default_payload: json!({"entities": [], "relationships": []}),
            calls: AtomicU32::new(0),
            document_field_requests: AtomicU32::new(0),
        }
    }

    pub fn with_default_payload(mut self, payload: Value) -> Self {
        self.default_payload = payload;
        self
    }

    pub fn push_outcome(&self, chunk_index: usize, outcome: MockExtraction) {
        self.by_chunk
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(chunk_index)
            .or_default()
            .push_back(outcome);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// How many calls requested topics/key moments/sentiment.
    pub fn document_field_request_count(&self) -> u32 {
        self.document_field_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(
        &self,
        chunk_index: usize,
        _chunk_text: &str,
        include_document_fields: bool,
    ) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if include_document_fields {
            self.document_field_requests.fetch_add(1, Ordering::SeqCst);
        }

        let outcome = self
            .by_chunk
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&chunk_index)
            .and_then(|queue| queue.pop_front());

        match outcome {
            Some(MockExtraction::Fail(message)) => Err(LongwaveError::ExtractionCall { message }),
            Some(MockExtraction::Payload(payload)) => Ok(payload),
            None => Ok(self.default_payload.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_carries_schema_and_chunk() {
        let body = build_request_body("extract-1", "[0.0s] A: hello\n", false);
        assert_eq!(body["model"], "extract-1");
        assert_eq!(body["temperature"], 0.0);

        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("entities"));
        assert!(!system.contains("key_moments"));
        assert_eq!(body["messages"][1]["content"], "[0.0s] A: hello\n");
    }

    #[test]
    fn test_document_fields_requested_only_when_asked() {
        let body = build_request_body("extract-1", "text", true);
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("key_moments"));
        assert!(system.contains("sentiment"));
    }

    #[test]
    fn test_parse_response_extracts_inner_json() {
        let response = json!({
            "choices": [{"message": {"content": "{\"entities\": []}"}}]
        });
        let payload = parse_response(0, &response).unwrap();
        assert!(payload["entities"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_parse_response_rejects_missing_content() {
        let err = parse_response(1, &json!({"choices": []})).unwrap_err();
        assert!(matches!(err, LongwaveError::ExtractionCall { .. }));
    }

    #[test]
    fn test_parse_response_rejects_non_json_content() {
        let response = json!({
            "choices": [{"message": {"content": "Sure! Here are the entities..."}}]
        });
        let err = parse_response(2, &response).unwrap_err();
        assert!(matches!(err, LongwaveError::SchemaViolation { .. }));
    }

    #[tokio::test]
    async fn test_mock_extractor_scripted_per_chunk() {
        let mock = MockExtractor::new();
        mock.push_outcome(1, MockExtraction::Fail("boom".to_string()));

        assert!(mock.extract(1, "text", false).await.is_err());
        assert!(mock.extract(1, "text", false).await.is_ok());
        assert!(mock.extract(0, "text", true).await.is_ok());
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.document_field_request_count(), 1);
    }
}
