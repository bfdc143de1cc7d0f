//! # LLM 提供商实现
//!
//! - OpenRouter / OpenAI：chat completions 接口，固定系统角色，用户消息为提示词 + 文档
//! - Anthropic：messages 接口，提示词作为 `system`，文档作为用户消息

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;

use super::LlmClient;
use crate::error::LlmError;
use crate::types::RawModelReply;

/// OpenAI 兼容接口使用的系统角色
const SYSTEM_ROLE: &str = "你是一个专业的考研英语真题内容提取助手，擅长将考研英语真题文档解析为结构化的JSON数据。";

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// 用户消息：提示词在前，文档在后
pub fn compose_user_message(prompt: &str, document_text: &str) -> String {
    format!("{}\n\n文档内容：\n{}", prompt, document_text)
}

fn build_http_client(timeout_seconds: u64, provider: &str) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| LlmError::Transport {
            provider: provider.to_string(),
            error: format!("HTTP 客户端创建失败: {}", e),
        })
}

fn map_request_error(provider: &str, error: reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout {
            provider: provider.to_string(),
        }
    } else {
        LlmError::Transport {
            provider: provider.to_string(),
            error: error.to_string(),
        }
    }
}

/// 读取响应体，非 2xx 状态转为 `ApiStatus`，无法解码的 JSON 转为 `MalformedResponse`
async fn read_json_body(provider: &str, response: reqwest::Response) -> Result<serde_json::Value, LlmError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::ApiStatus {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    let text = response.text().await.map_err(|e| map_request_error(provider, e))?;
    serde_json::from_str(&text).map_err(|e| LlmError::MalformedResponse {
        provider: provider.to_string(),
        error: format!("响应解析失败: {}", e),
    })
}

/// OpenRouter / OpenAI 客户端
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    provider: String,
    model: String,
    api_key: String,
    base_url: String,
    app_url: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn openrouter(
        model: &str,
        api_key: String,
        base_url: Option<String>,
        timeout_seconds: u64,
        app_url: Option<String>,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_http_client(timeout_seconds, "openrouter")?,
            provider: "openrouter".to_string(),
            model: model.to_string(),
            api_key,
            base_url: base_url.unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
            app_url,
        })
    }

    pub fn openai(
        model: &str,
        api_key: String,
        base_url: Option<String>,
        timeout_seconds: u64,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_http_client(timeout_seconds, "openai")?,
            provider: "openai".to_string(),
            model: model.to_string(),
            api_key,
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            app_url: None,
        })
    }

    fn request_body(&self, prompt: &str, document_text: &str, max_tokens: u32, temperature: f32) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_ROLE },
                { "role": "user", "content": compose_user_message(prompt, document_text) }
            ],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        if self.provider == "openrouter" {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        body
    }

    fn extract_content(&self, data: &serde_json::Value) -> Result<String, LlmError> {
        data["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .and_then(|choice| choice["message"]["content"].as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: self.provider.clone(),
                error: "响应中没有选择项".to_string(),
            })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(
        &self,
        prompt: &str,
        document_text: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<RawModelReply, LlmError> {
        let started = Instant::now();
        let body = self.request_body(prompt, document_text, max_tokens, temperature);

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");

        if let Some(app_url) = &self.app_url {
            request = request
                .header("HTTP-Referer", app_url)
                .header("X-Title", "Exam Extractor");
        }

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| map_request_error(&self.provider, e))?;

        let data = read_json_body(&self.provider, response).await?;
        let text = self.extract_content(&data)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        debug!(provider = %self.provider, model = %self.model, elapsed_ms, chars = text.chars().count(), "收到模型回复");

        Ok(RawModelReply { text, elapsed_ms })
    }
}

/// Anthropic Claude 客户端
pub struct AnthropicClient {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(
        model: &str,
        api_key: String,
        base_url: Option<String>,
        timeout_seconds: u64,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_http_client(timeout_seconds, "anthropic")?,
            model: model.to_string(),
            api_key,
            base_url: base_url.unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
        })
    }

    fn request_body(&self, prompt: &str, document_text: &str, max_tokens: u32, temperature: f32) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "system": prompt,
            "messages": [
                { "role": "user", "content": document_text }
            ],
            "max_tokens": max_tokens,
            "temperature": temperature,
        })
    }
}

/// 拼接 Anthropic 响应中的所有文本块
fn anthropic_text(data: &serde_json::Value) -> Option<String> {
    let blocks = data["content"].as_array()?;
    let text: String = blocks
        .iter()
        .filter_map(|block| block["text"].as_str())
        .collect();
    Some(text)
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(
        &self,
        prompt: &str,
        document_text: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<RawModelReply, LlmError> {
        let started = Instant::now();
        let body = self.request_body(prompt, document_text, max_tokens, temperature);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_request_error("anthropic", e))?;

        let data = read_json_body("anthropic", response).await?;
        let text = anthropic_text(&data).ok_or_else(|| LlmError::MalformedResponse {
            provider: "anthropic".to_string(),
            error: "响应中没有内容块".to_string(),
        })?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        debug!(provider = "anthropic", model = %self.model, elapsed_ms, chars = text.chars().count(), "收到模型回复");

        Ok(RawModelReply { text, elapsed_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openrouter_request_layout() {
        let client = OpenAiCompatibleClient::openrouter(
            "anthropic/claude-3.5-haiku",
            "key".to_string(),
            None,
            30,
            None,
        )
        .unwrap();

        let body = client.request_body("提取元数据", "2024年考研英语", 8192, 0.1);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");

        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.starts_with("提取元数据"));
        assert!(user.ends_with("2024年考研英语"));
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_openai_request_has_no_response_format() {
        let client = OpenAiCompatibleClient::openai("gpt-4o", "key".to_string(), None, 30).unwrap();
        let body = client.request_body("p", "d", 100, 0.0);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_anthropic_request_layout() {
        let client = AnthropicClient::new("claude-3-5-haiku-20241022", "key".to_string(), None, 30).unwrap();
        let body = client.request_body("提取题目", "文档正文", 4000, 0.1);

        assert_eq!(body["system"], "提取题目");
        assert_eq!(body["messages"][0]["content"], "文档正文");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_openai_content_extraction() {
        let client = OpenAiCompatibleClient::openai("gpt-4o", "key".to_string(), None, 30).unwrap();

        let data = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"questions\": []}" } }]
        });
        assert_eq!(client.extract_content(&data).unwrap(), "{\"questions\": []}");

        let empty = serde_json::json!({ "choices": [] });
        assert!(matches!(
            client.extract_content(&empty),
            Err(LlmError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_anthropic_text_joins_blocks() {
        let data = serde_json::json!({
            "content": [
                { "type": "text", "text": "{\"a\":" },
                { "type": "text", "text": " 1}" }
            ]
        });
        assert_eq!(anthropic_text(&data).as_deref(), Some("{\"a\": 1}"));
        assert_eq!(anthropic_text(&serde_json::json!({})), None);
    }
}
