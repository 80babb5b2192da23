use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct KnowledgeSearchError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl KnowledgeSearchError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.inner
    }
}

impl fmt::Display for KnowledgeSearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for KnowledgeSearchError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// 知识库检索协作方。返回可直接拼进提示词的上下文文本；检索失败
/// 时引擎按空上下文降级，不中断生成。
pub trait KnowledgeSearch: Send + Sync {
    fn query(
        &self,
        question: &str,
        knowledge_base_ids: &[String],
    ) -> Result<String, KnowledgeSearchError>;
}

/// 未配置知识库时的空实现。
#[derive(Default)]
pub struct NoRetrieval;

impl KnowledgeSearch for NoRetrieval {
    fn query(
        &self,
        _question: &str,
        _knowledge_base_ids: &[String],
    ) -> Result<String, KnowledgeSearchError> {
        Ok(String::new())
    }
}
