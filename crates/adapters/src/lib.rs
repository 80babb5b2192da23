mod base_url;
mod checkpoint;
mod error;
mod llm;
mod retry;
mod search;

pub use base_url::check_base_url;
pub use checkpoint::FileCheckpointStore;
pub use error::AdapterError;
pub use llm::{create_llm_adapter, create_llm_adapter_from_profile};
pub use retry::{call_with_retry, RetryConfig};
pub use search::HttpKnowledgeSearch;

pub use docgen_core::config::{Config, ConfigStore, LlmConfig, RetrievalConfig};
pub use docgen_core::llm::{LanguageModel, LanguageModelError};
pub use docgen_core::retrieval::{KnowledgeSearch, KnowledgeSearchError};
