use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{self, HeaderValue};
use serde::{Deserialize, Serialize};

use docgen_core::config::{Config, LlmConfig};
use docgen_core::llm::{LanguageModel, LanguageModelError};

use crate::base_url::check_base_url;
use crate::error::AdapterError;
use crate::retry::{call_with_retry, RetryConfig};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub fn create_llm_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let profile = config.get_llm_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown LLM profile `{}`", profile_name))
    })?;
    create_llm_adapter_from_profile(profile)
}

/// 根据 profile 构建聊天补全适配器。各家 OpenAI 兼容服务只在默认
/// base_url 上有差异。
pub fn create_llm_adapter_from_profile(
    profile: &LlmConfig,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let format = profile.interface_format.trim().to_lowercase();
    let default_base = match format.as_str() {
        "openai" | "" => "https://api.openai.com/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "compatible" => "",
        other => {
            return Err(AdapterError::InvalidConfig(format!(
                "unknown interface_format: {}",
                other
            )))
        }
    };

    Ok(Box::new(ChatCompletionAdapter::new(
        resolve_base_url(&profile.base_url, default_base),
        optional_string(&profile.api_key),
        profile.model_name.clone(),
        profile.max_tokens,
        profile.timeout.max(1),
    )?))
}

fn optional_string(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn resolve_base_url(base_url: &str, default: &str) -> String {
    let raw = if base_url.trim().is_empty() {
        default.to_string()
    } else {
        base_url.to_string()
    };
    check_base_url(&raw)
}

struct ChatCompletionAdapter {
    client: Client,
    url: String,
    api_key: Option<String>,
    model_name: String,
    default_max_tokens: Option<u32>,
    retry: RetryConfig,
}

impl ChatCompletionAdapter {
    fn new(
        base_url: String,
        api_key: Option<String>,
        model_name: String,
        max_tokens: u32,
        timeout: u64,
    ) -> Result<Self, AdapterError> {
        if base_url.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }
        if model_name.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "model_name must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model_name,
            default_max_tokens: if max_tokens == 0 {
                None
            } else {
                Some(max_tokens)
            },
            retry: RetryConfig::default(),
        })
    }

    fn invoke_once(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String, AdapterError> {
        let body = ChatCompletionRequest {
            model: self.model_name.as_str(),
            messages: vec![
                ChatMessageRequest {
                    role: "system",
                    content: DEFAULT_SYSTEM_PROMPT,
                },
                ChatMessageRequest {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: max_tokens.or(self.default_max_tokens),
            temperature,
        };

        let mut request = self.client.post(&self.url).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.json(&body).send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }

        let parsed: ChatCompletionResponse = response.json()?;
        extract_choice_content(parsed).ok_or(AdapterError::EmptyResponse)
    }
}

impl LanguageModel for ChatCompletionAdapter {
    fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String, LanguageModelError> {
        call_with_retry(
            || self.invoke_once(prompt, temperature, max_tokens),
            &self.retry,
        )
        .map_err(LanguageModelError::new)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageRequest<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    for choice in response.choices {
        if let Some(message) = choice.message {
            if let Some(content) = message.content {
                if !content.trim().is_empty() {
                    return Some(content);
                }
            }
        }
        if let Some(content) = choice.content {
            if !content.trim().is_empty() {
                return Some(content);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_interface_format() {
        let profile = LlmConfig {
            interface_format: "telepathy".into(),
            model_name: "any".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_llm_adapter_from_profile(&profile),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_missing_model_name() {
        let profile = LlmConfig {
            interface_format: "openai".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_llm_adapter_from_profile(&profile),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn compatible_format_requires_base_url() {
        let profile = LlmConfig {
            interface_format: "compatible".into(),
            model_name: "local-model".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_llm_adapter_from_profile(&profile),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn extracts_message_content_variants() {
        let parsed: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": "回答文本"}}]}"#,
        )
        .expect("parse");
        assert_eq!(extract_choice_content(parsed).as_deref(), Some("回答文本"));

        let parsed: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices": [{"content": "裸字段"}]}"#).expect("parse");
        assert_eq!(extract_choice_content(parsed).as_deref(), Some("裸字段"));

        let parsed: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices": []}"#).expect("parse");
        assert_eq!(extract_choice_content(parsed), None);
    }
}
