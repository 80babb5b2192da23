pub mod checkpoint;
pub mod config;
pub mod content;
pub mod llm;
pub mod logging;
pub mod outline;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod requirements;
pub mod retrieval;

pub use checkpoint::{CheckpointError, CheckpointStore, MemoryCheckpointStore, NullCheckpointStore};
pub use config::{
    Config, ConfigError, ConfigStore, GenerationConfig, LlmConfig, OutputConfig, PromptConfig,
    RetrievalConfig,
};
pub use content::{
    ContentError, ContentSynthesizer, GenerationContext, SynthesisOptions, SynthesizedDocument,
};
pub use llm::{LanguageModel, LanguageModelError};
pub use logging::{
    LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, StdoutLogSink, VecLogSink,
};
pub use outline::{
    distribute_word_budget, repair_tree, BudgetOptions, ChapterExpander, CountStyle, ExpandRequest,
    OutlineError, OutlineNode, OutlineTree, RepairReport, SkeletonBuilder, SkeletonRequest,
};
pub use pipeline::{DocumentGenerator, DocumentRequest, GenerateError, GeneratedDocument};
pub use progress::{
    NullProgress, ProgressError, ProgressEvent, ProgressReporter, StdoutProgress, VecProgress,
};
pub use prompts::{PromptArguments, PromptError, PromptRegistry, PromptTemplate};
pub use requirements::{RequirementExtractor, Requirements};
pub use retrieval::{KnowledgeSearch, KnowledgeSearchError, NoRetrieval};
