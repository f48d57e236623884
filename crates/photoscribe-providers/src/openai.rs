//! OpenAI-compatible vision provider.

use async_trait::async_trait;

use photoscribe_types::TokenUsage;

use crate::types::{
    DescribeRequest, DescribeResult, FailureKind, VisionProvider, classify_http_status,
    classify_transport_error, recognized_knobs,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat-completions vision provider. Also covers OpenAI-compatible
/// servers via a custom base URL.
pub struct OpenAiProvider {
    id: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(id: impl Into<String>, api_key: Option<String>, base_url: Option<String>) -> Self {
        let api_key = api_key.or_else(|| std::env::var("OPENAI_API_KEY").ok());
        Self {
            id: id.into(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, req: &DescribeRequest) -> serde_json::Value {
        let base64_data =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &req.image);
        let (temperature, max_tokens) = recognized_knobs(&req.options);

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "text",
                        "text": req.prompt
                    },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", req.mime_type, base64_data)
                        }
                    }
                ]
            }],
            "max_tokens": max_tokens.unwrap_or(1024)
        });
        if let Some(t) = temperature {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }
}

#[async_trait]
impl VisionProvider for OpenAiProvider {
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
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {key}"))
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
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {key}"))
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

        parse_chat_response(status.as_u16(), &json)
    }
}

/// Parse a chat-completions response into a describe outcome.
///
/// Empty content with a successful status is a valid result, including the
/// `finish_reason: "length"` case where the token budget was spent before
/// any visible text was produced.
fn parse_chat_response(status: u16, json: &serde_json::Value) -> DescribeResult {
    if !(200..300).contains(&status) {
        let msg = json
            .pointer("/error/message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error");
        let kind = match json.pointer("/error/code").and_then(|c| c.as_str()) {
            Some("model_not_found") => FailureKind::ModelNotFound,
            _ => classify_http_status(status),
        };
        return DescribeResult::failed(kind, format!("HTTP {status}: {msg}"));
    }

    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    if text.is_empty() {
        let finish = json
            .pointer("/choices/0/finish_reason")
            .and_then(|f| f.as_str())
            .unwrap_or("unknown");
        tracing::debug!(finish_reason = finish, "Provider returned empty content");
    }

    DescribeResult::success(text).with_usage(parse_usage(json))
}

fn parse_usage(json: &serde_json::Value) -> Option<TokenUsage> {
    let usage = json.get("usage")?;
    Some(TokenUsage {
        input_tokens: usage.get("prompt_tokens").and_then(|v| v.as_u64())?,
        output_tokens: usage
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_with_usage() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": "A dog on a beach."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 850, "completion_tokens": 12}
        });
        let result = parse_chat_response(200, &json);
        assert!(result.is_success());
        assert_eq!(result.text, "A dog on a beach.");
        assert_eq!(
            result.token_usage,
            Some(TokenUsage {
                input_tokens: 850,
                output_tokens: 12
            })
        );
    }

    #[test]
    fn test_parse_empty_content_is_success() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": ""}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 850, "completion_tokens": 0}
        });
        let result = parse_chat_response(200, &json);
        assert!(result.is_success());
        assert!(result.text.is_empty());
    }

    #[test]
    fn test_parse_rate_limit_error() {
        let json = serde_json::json!({
            "error": {"message": "Rate limit reached", "code": "rate_limit_exceeded"}
        });
        let result = parse_chat_response(429, &json);
        let failure = result.failure.expect("should be a failure");
        assert_eq!(failure.kind, FailureKind::RateLimited);
        assert!(failure.message.contains("Rate limit reached"));
    }

    #[test]
    fn test_parse_model_not_found_error() {
        let json = serde_json::json!({
            "error": {"message": "The model does not exist", "code": "model_not_found"}
        });
        let result = parse_chat_response(404, &json);
        assert_eq!(result.failure.unwrap().kind, FailureKind::ModelNotFound);
    }

    #[test]
    fn test_body_includes_options() {
        let provider = OpenAiProvider::new("openai", Some("sk-test".into()), None);
        let req = DescribeRequest {
            image: vec![1, 2, 3],
            mime_type: "image/jpeg".into(),
            model: "gpt-4o-mini".into(),
            prompt: "Describe.".into(),
            options: photoscribe_types::ProviderOptions {
                temperature: Some(0.3),
                max_tokens: Some(256),
                ..Default::default()
            },
        };
        let body = provider.build_body(&req);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"], 0.3);
    }

    #[test]
    fn test_unavailable_without_key() {
        // Construct with an explicit empty override so the env var cannot
        // leak into the test.
        let provider = OpenAiProvider {
            id: "openai".into(),
            api_key: None,
            base_url: DEFAULT_BASE_URL.into(),
            client: reqwest::Client::new(),
        };
        assert!(!provider.is_available());
    }
}
