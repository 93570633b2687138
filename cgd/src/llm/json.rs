//! Helpers for pulling structured output out of model text

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::{CompletionRequest, LlmClient, LlmError, StopReason};

static FENCE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").ok());

/// Return the body of the first markdown code fence, or the trimmed text when
/// there is none
pub fn strip_code_fences(text: &str) -> &str {
    debug!(text_len = %text.len(), "strip_code_fences: called");
    match FENCE_RE.as_ref().and_then(|re| re.captures(text)).and_then(|c| c.get(1)) {
        Some(body) => {
            debug!("strip_code_fences: fence found");
            body.as_str().trim()
        }
        None => {
            debug!("strip_code_fences: no fence");
            text.trim()
        }
    }
}

/// Parse model text as JSON, tolerating fences and chatter around the payload
pub fn parse_json_value(text: &str) -> Result<Value, LlmError> {
    debug!(text_len = %text.len(), "parse_json_value: called");
    // Fences may legitimately appear inside string values, so try the raw text first
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(value);
    }
    let body = strip_code_fences(text);
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Ok(value);
    }

    // Fall back to the outermost object or array embedded in prose
    let start = body.find(['{', '[']);
    let end = body.rfind(['}', ']']);
    if let (Some(start), Some(end)) = (start, end)
        && start < end
    {
        debug!(%start, %end, "parse_json_value: trying embedded payload");
        return serde_json::from_str::<Value>(&body[start..=end])
            .map_err(|e| LlmError::InvalidResponse(e.to_string()));
    }

    Err(LlmError::InvalidResponse(format!(
        "model output is not JSON: {}",
        truncate(body, 200)
    )))
}

/// Run a completion and return its non-empty text
pub async fn complete_text(llm: &Arc<dyn LlmClient>, request: CompletionRequest) -> Result<String, LlmError> {
    debug!("complete_text: called");
    let response = llm.complete(request).await?;
    if response.stop_reason == StopReason::MaxTokens {
        warn!(output_tokens = %response.usage.output_tokens, "complete_text: response truncated");
        return Err(LlmError::Truncated);
    }
    match response.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(LlmError::NoContent),
    }
}

/// Run a JSON-mode completion and deserialize the result
pub async fn complete_json<T: DeserializeOwned>(
    llm: &Arc<dyn LlmClient>,
    request: CompletionRequest,
) -> Result<T, LlmError> {
    debug!("complete_json: called");
    let text = complete_text(llm, request.json()).await?;
    let value = parse_json_value(&text)?;
    Ok(serde_json::from_value(value)?)
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionResponse;
    use crate::llm::client::mock::MockLlmClient;
    use serde::Deserialize;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```html\n<p>hi</p>\n```"), "<p>hi</p>");
        assert_eq!(strip_code_fences("  plain  "), "plain");
        assert_eq!(strip_code_fences("Here you go:\n```\n[1]\n```\nthanks"), "[1]");
    }

    #[test]
    fn test_parse_json_value_embedded() {
        let value = parse_json_value("Sure! {\"x\": [1, 2]} hope that helps").unwrap();
        assert_eq!(value["x"][1], 2);
    }

    #[test]
    fn test_parse_json_value_fence_inside_string() {
        let value = parse_json_value(r#"{"html":"```html\n<p>hi</p>\n```"}"#).unwrap();
        assert!(value["html"].as_str().unwrap().contains("<p>hi</p>"));
    }

    #[test]
    fn test_parse_json_value_rejects_prose() {
        assert!(parse_json_value("no json here").is_err());
    }

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
    }

    #[tokio::test]
    async fn test_complete_json() {
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::from_texts(["```json\n{\"name\":\"vip\"}\n```"]));
        let sample: Sample = complete_json(&llm, CompletionRequest::single("s", "u", 100)).await.unwrap();
        assert_eq!(sample.name, "vip");
    }

    #[tokio::test]
    async fn test_complete_text_rejects_empty() {
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::from_texts(["   "]));
        assert!(matches!(
            complete_text(&llm, CompletionRequest::single("s", "u", 100)).await,
            Err(LlmError::NoContent)
        ));
    }

    #[tokio::test]
    async fn test_complete_text_rejects_truncated() {
        let mut response = CompletionResponse::text("<html><body><p>Hi");
        response.stop_reason = StopReason::MaxTokens;
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new(vec![response]));
        assert!(matches!(
            complete_text(&llm, CompletionRequest::single("s", "u", 100)).await,
            Err(LlmError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_complete_json_wrong_shape_is_schema_error() {
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::from_texts(["{\"name\": 7}"]));
        let result: Result<Sample, _> = complete_json(&llm, CompletionRequest::single("s", "u", 100)).await;
        assert!(matches!(result, Err(LlmError::Schema(_))));
    }
}
