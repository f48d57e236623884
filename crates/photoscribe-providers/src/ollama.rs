//! Local Ollama model-server provider.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use async_trait::async_trait;

use photoscribe_types::TokenUsage;

use crate::types::{
    DescribeRequest, DescribeResult, FailureKind, VisionProvider, classify_http_status,
    classify_transport_error, recognized_knobs,
};

pub struct OllamaProvider {
    id: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, req: &DescribeRequest) -> serde_json::Value {
        let base64_data =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &req.image);
        let (temperature, max_tokens) = recognized_knobs(&req.options);

        let mut options = serde_json::Map::new();
        if let Some(t) = temperature {
            options.insert("temperature".into(), serde_json::json!(t));
        }
        if let Some(n) = max_tokens {
            options.insert("num_predict".into(), serde_json::json!(n));
        }
        // Pass provider-specific knobs straight through (num_ctx, seed, ...).
        for (k, v) in &req.options.extra {
            options.insert(k.clone(), v.clone());
        }

        serde_json::json!({
            "model": req.model,
            "prompt": req.prompt,
            "images": [base64_data],
            "stream": false,
            "options": options
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        let trimmed = self
            .base_url
            .trim_start_matches("http://")
            .trim_start_matches("https://");
        let host_port = trimmed.split('/').next()?;
        host_port.to_socket_addrs().ok()?.next()
    }
}

#[async_trait]
impl VisionProvider for OllamaProvider {
    fn id(&self) -> &str {
        &self.id
    }

    /// Fast TCP probe of the local server socket. Bounded at 300ms so an
    /// absent daemon fails the check quickly.
    fn is_available(&self) -> bool {
        match self.local_addr() {
            Some(addr) => {
                std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(300)).is_ok()
            }
            None => false,
        }
    }

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        let json: serde_json::Value = resp.json().await?;
        let models = json
            .get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn describe(&self, req: DescribeRequest) -> DescribeResult {
        let body = self.build_body(&req);

        let resp = match self
            .client
            .post(format!("{}/api/generate", self.base_url))
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

        parse_generate_response(status.as_u16(), &json)
    }
}

fn parse_generate_response(status: u16, json: &serde_json::Value) -> DescribeResult {
    if !(200..300).contains(&status) {
        let msg = json
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("Unknown error");
        let kind = if msg.contains("not found") {
            FailureKind::ModelNotFound
        } else {
            classify_http_status(status)
        };
        return DescribeResult::failed(kind, format!("HTTP {status}: {msg}"));
    }

    let text = json
        .get("response")
        .and_then(|r| r.as_str())
        .unwrap_or("")
        .to_string();

    let usage = match (
        json.get("prompt_eval_count").and_then(|v| v.as_u64()),
        json.get("eval_count").and_then(|v| v.as_u64()),
    ) {
        (None, None) => None,
        (input, output) => Some(TokenUsage {
            input_tokens: input.unwrap_or(0),
            output_tokens: output.unwrap_or(0),
        }),
    };

    DescribeResult::success(text).with_usage(usage)
}
