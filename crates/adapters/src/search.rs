use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use docgen_core::config::RetrievalConfig;
use docgen_core::retrieval::{KnowledgeSearch, KnowledgeSearchError};

use crate::error::AdapterError;

/// RAG 检索服务的 HTTP 客户端。返回可直接注入提示词的上下文文本；
/// 引擎侧把任何失败降级为空上下文。
pub struct HttpKnowledgeSearch {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpKnowledgeSearch {
    pub fn from_config(config: &RetrievalConfig) -> Result<Self, AdapterError> {
        let base = config.base_url.trim();
        if base.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "retrieval base_url must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout.max(1)))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/retrieval/query", base.trim_end_matches('/')),
            api_key: if config.api_key.trim().is_empty() {
                None
            } else {
                Some(config.api_key.trim().to_string())
            },
        })
    }

    fn query_once(
        &self,
        question: &str,
        knowledge_base_ids: &[String],
    ) -> Result<String, AdapterError> {
        let body = SearchRequest {
            question,
            knowledge_base_ids,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }

        let parsed: SearchResponse = response.json()?;
        Ok(parsed.into_context())
    }
}

impl KnowledgeSearch for HttpKnowledgeSearch {
    fn query(
        &self,
        question: &str,
        knowledge_base_ids: &[String],
    ) -> Result<String, KnowledgeSearchError> {
        if knowledge_base_ids.is_empty() {
            return Ok(String::new());
        }
        self.query_once(question, knowledge_base_ids)
            .map_err(KnowledgeSearchError::new)
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    question: &'a str,
    knowledge_base_ids: &'a [String],
}

/// 服务端返回要么是拼好的 context 字段，要么是文档片段数组，
/// 两种都接。
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    documents: Vec<String>,
}

impl SearchResponse {
    fn into_context(self) -> String {
        if let Some(context) = self.context {
            let trimmed = context.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.documents
            .iter()
            .map(|doc| doc.trim())
            .filter(|doc| !doc.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_base_url() {
        let config = RetrievalConfig::default();
        assert!(matches!(
            HttpKnowledgeSearch::from_config(&config),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_knowledge_base_list_short_circuits() {
        let config = RetrievalConfig {
            base_url: "https://rag.example.com".into(),
            ..RetrievalConfig::default()
        };
        let search = HttpKnowledgeSearch::from_config(&config).expect("client");
        let context = search.query("问题", &[]).expect("context");
        assert!(context.is_empty());
    }

    #[test]
    fn response_prefers_context_field() {
        let parsed: SearchResponse = serde_json::from_str(
            r#"{"context": "拼好的上下文", "documents": ["片段一"]}"#,
        )
        .expect("parse");
        assert_eq!(parsed.into_context(), "拼好的上下文");

        let parsed: SearchResponse =
            serde_json::from_str(r#"{"documents": ["片段一", " ", "片段二"]}"#).expect("parse");
        assert_eq!(parsed.into_context(), "片段一\n\n片段二");
    }
}
