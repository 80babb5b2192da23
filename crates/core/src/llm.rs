use std::error::Error as StdError;
use std::fmt;

/// 大语言模型网关。实现方负责网络与重试，引擎只关心一次
/// `generate` 往返；返回文本可能不是合法 JSON，调用方必须容错。
pub trait LanguageModel: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String, LanguageModelError>;
}

#[derive(Debug)]
pub struct LanguageModelError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl LanguageModelError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            inner: message.into().into(),
        }
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.inner
    }

    pub fn as_inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Display for LanguageModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for LanguageModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// 宽容的 JSON 抽取：模型经常把负载包在 ```json 围栏里，或在前后
/// 附带说明文字。
pub mod json {
    use serde_json::Value;

    /// Strip a fenced code block if the whole payload lives inside one.
    pub fn extract_payload(text: &str) -> &str {
        let trimmed = text.trim();
        let Some(fence_start) = trimmed.find("```") else {
            return trimmed;
        };

        let after_fence = &trimmed[fence_start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        match body.find("```") {
            Some(end) => body[..end].trim(),
            None => body.trim(),
        }
    }

    /// Parse the model response into a JSON value, tolerating fences and
    /// surrounding prose. Returns `None` when nothing parseable remains.
    pub fn parse_value(text: &str) -> Option<Value> {
        let payload = extract_payload(text);
        if payload.is_empty() {
            return None;
        }

        if let Ok(value) = serde_json::from_str::<Value>(payload) {
            return Some(value);
        }

        for (open, close) in [('{', '}'), ('[', ']')] {
            if let (Some(start), Some(end)) = (payload.find(open), payload.rfind(close)) {
                if end > start {
                    if let Ok(value) = serde_json::from_str::<Value>(&payload[start..=end]) {
                        return Some(value);
                    }
                }
            }
        }

        None
    }

    pub fn string_field(value: &Value, key: &str) -> Option<String> {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn positive_int_field(value: &Value, key: &str) -> Option<u32> {
        value
            .get(key)
            .and_then(Value::as_i64)
            .filter(|n| *n > 0)
            .map(|n| n.min(u32::MAX as i64) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::json;

    #[test]
    fn extracts_fenced_payload() {
        let text = "说明文字\n```json\n{\"a\": 1}\n```\n结尾";
        assert_eq!(json::extract_payload(text), "{\"a\": 1}");
    }

    #[test]
    fn parses_bare_object() {
        let value = json::parse_value("{\"title\": \"绪论\"}").expect("value");
        assert_eq!(json::string_field(&value, "title").as_deref(), Some("绪论"));
    }

    #[test]
    fn parses_object_with_leading_prose() {
        let value = json::parse_value("好的，结果如下：{\"count\": 3} 希望有帮助")
            .expect("value");
        assert_eq!(json::positive_int_field(&value, "count"), Some(3));
    }

    #[test]
    fn rejects_unparseable_text() {
        assert!(json::parse_value("抱歉，我无法完成该请求。").is_none());
    }

    #[test]
    fn positive_int_ignores_non_positive() {
        let value = json::parse_value("{\"n\": 0, \"m\": -2}").expect("value");
        assert_eq!(json::positive_int_field(&value, "n"), None);
        assert_eq!(json::positive_int_field(&value, "m"), None);
    }
}
