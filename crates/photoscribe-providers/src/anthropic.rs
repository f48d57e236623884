//! Anthropic messages-API vision provider.

use async_trait::async_trait;

use photoscribe_types::TokenUsage;

use crate::types::{
    DescribeRequest, DescribeResult, FailureKind, VisionProvider, classify_http_status,
    classify_transport_error, recognized_knobs,
};

const BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    id: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(id: impl Into<String>, api_key: Option<String>) -> Self {
        let api_key = api_key.or_else(|| std::env::var("ANTHROPIC_API_KEY").ok());
        Self {
            id: id.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, req: &DescribeRequest) -> serde_json::Value {
        let base64_data =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &req.image);
        let (temperature, max_tokens) = recognized_knobs(&req.options);

        let mut body = serde_json::json!({
            "model": req.model,
            "max_tokens": max_tokens.unwrap_or(1024),
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": req.mime_type,
                            "data": base64_data
                        }
                    },
                    {
                        "type": "text",
                        "text": req.prompt
                    }
                ]
            }]
        });
        if let Some(t) = temperature {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }
}

#[async_trait]
impl VisionProvider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No API key configured for provider '{}'", self.id))?;

        let resp = self
            .client
            .get(format!("{BASE_URL}/models"))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await?
            .error_for_status()?;

        let json: serde_json::Value = resp.json().await?;
        let models = json
            .get("data")
            .and_then(|d| d.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("id").and_then(|id| id.as_str()))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn describe(&self, req: DescribeRequest) -> DescribeResult {
        let Some(key) = self.api_key.as_deref() else {
            return DescribeResult::failed(
                FailureKind::Auth,
                format!("No API key configured for provider '{}'", self.id),
            );
        };

        let body = self.build_body(&req);

        let resp = match self
            .client
            .post(format!("{BASE_URL}/messages"))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return DescribeResult::failed(classify_transport_error(&e), e.to_string()),
        };

        let status = resp.status();
        let json: serde_json::Value = match resp.json().await {
            Ok(json) => json,
            Err(e) => return DescribeResult::failed(classify_transport_error(&e), e.to_string()),
        };

        parse_messages_response(status.as_u16(), &json)
    }
}

fn parse_messages_response(status: u16, json: &serde_json::Value) -> DescribeResult {
    if !(200..300).contains(&status) {
        let msg = json
            .pointer("/error/message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error");
        let kind = match json.pointer("/error/type").and_then(|t| t.as_str()) {
            Some("not_found_error") => FailureKind::ModelNotFound,
            Some("authentication_error") => FailureKind::Auth,
            Some("rate_limit_error") => FailureKind::RateLimited,
            Some("overloaded_error") => FailureKind::ServerError,
            _ => classify_http_status(status),
        };
        return DescribeResult::failed(kind, format!("HTTP {status}: {msg}"));
    }

    // Concatenate text blocks; non-text blocks are skipped.
    let text = json
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let usage = json.get("usage").map(|u| TokenUsage {
        input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        output_tokens: u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
    });

    DescribeResult::success(text).with_usage(usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_blocks() {
        let json = serde_json::json!({
            "content": [{"type": "text", "text": "A mountain lake at dusk."}],
            "usage": {"input_tokens": 1200, "output_tokens": 9}
        });
        let result = parse_messages_response(200, &json);
        assert!(result.is_success());
        assert_eq!(result.text, "A mountain lake at dusk.");
        assert_eq!(result.token_usage.unwrap().input_tokens, 1200);
    }

    #[test]
    fn test_parse_empty_content_blocks() {
        let json = serde_json::json!({
            "content": [],
            "usage": {"input_tokens": 1200, "output_tokens": 0}
        });
        let result = parse_messages_response(200, &json);
        assert!(result.is_success());
        assert!(result.text.is_empty());
    }

    #[test]
    fn test_parse_typed_errors() {
        let json = serde_json::json!({
            "error": {"type": "rate_limit_error", "message": "Too many requests"}
        });
        let result = parse_messages_response(429, &json);
        assert_eq!(result.failure.unwrap().kind, FailureKind::RateLimited);

        let json = serde_json::json!({
            "error": {"type": "authentication_error", "message": "invalid x-api-key"}
        });
        let result = parse_messages_response(401, &json);
        assert_eq!(result.failure.unwrap().kind, FailureKind::Auth);

        let json = serde_json::json!({
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        });
        let result = parse_messages_response(529, &json);
        assert_eq!(result.failure.unwrap().kind, FailureKind::ServerError);
    }

    #[test]
    fn test_body_shape() {
        let provider = AnthropicProvider {
            id: "anthropic".into(),
            api_key: Some("key".into()),
            client: reqwest::Client::new(),
        };
        let req = DescribeRequest {
            image: vec![0xFF, 0xD8],
            mime_type: "image/jpeg".into(),
            model: "claude-3-5-haiku-latest".into(),
            prompt: "Describe.".into(),
            options: Default::default(),
        };
        let body = provider.build_body(&req);
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(
            body.pointer("/messages/0/content/0/source/media_type")
                .and_then(|v| v.as_str()),
            Some("image/jpeg")
        );
    }
}
