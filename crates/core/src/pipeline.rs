use thiserror::Error;

use crate::checkpoint::CheckpointStore;
use crate::config::GenerationConfig;
use crate::content::{ContentError, ContentSynthesizer, SynthesisOptions};
use crate::llm::LanguageModel;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::outline::{
    distribute_word_budget, repair_tree, BudgetOptions, ChapterExpander, ExpandRequest,
    OutlineError, OutlineNode, OutlineTree, SkeletonBuilder, SkeletonRequest,
};
use crate::progress::ProgressReporter;
use crate::prompts::PromptRegistry;
use crate::requirements::{RequirementExtractor, Requirements};
use crate::retrieval::KnowledgeSearch;

const PERCENT_EXTRACTING: u8 = 2;
const PERCENT_EXTRACTED: u8 = 5;
const PERCENT_SKELETON_START: u8 = 8;
const PERCENT_SKELETON_DONE: u8 = 15;
const PERCENT_EXPANDED: u8 = 45;
const PERCENT_REPAIRED: u8 = 50;
const PERCENT_BUDGETED: u8 = 55;
const PERCENT_SYNTHESIZED: u8 = 95;
const PERCENT_DONE: u8 = 100;

const FAILURE_TITLE: &str = "生成失败，请重试";

#[derive(Clone, Debug)]
pub struct DocumentRequest {
    pub prompt: String,
    pub reference_context: String,
    pub knowledge_base_ids: Vec<String>,
    /// 调用侧的层级缺省值；提示词里解析出的层级优先。
    pub required_level: Option<u32>,
}

impl DocumentRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference_context: String::new(),
            knowledge_base_ids: Vec::new(),
            required_level: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GeneratedDocument {
    pub title: String,
    pub tree: OutlineTree,
    pub markdown: String,
    pub html: String,
    pub requirements: Requirements,
    pub completed_sections: usize,
    pub skipped_sections: usize,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("大纲生成失败: {0}")]
    Outline(#[from] OutlineError),
    #[error("正文合成失败: {0}")]
    Content(#[from] ContentError),
}

/// 整条生成管线：要求解析 → 骨架 → 并行展开 → 校验修复 →
/// 字数预算 → 逐节点正文合成。每个阶段完成后上报进度。
pub struct DocumentGenerator<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    config: GenerationConfig,
}

impl<'a> DocumentGenerator<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self {
            prompts,
            sink,
            config: GenerationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn generate<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        retrieval: &dyn KnowledgeSearch,
        checkpoints: &dyn CheckpointStore,
        progress: &dyn ProgressReporter,
        request: &DocumentRequest,
    ) -> Result<GeneratedDocument, GenerateError> {
        let (tree, requirements, retrieval_context) =
            match self.prepare_outline(model, retrieval, progress, request) {
                Ok(prepared) => prepared,
                Err(err) => {
                    // 整体失败也要留下可见痕迹：持久化一个占位大纲，
                    // 让调用方有东西可展示，而不是什么都没有。
                    let placeholder = failure_outline();
                    if let Err(save_err) = checkpoints.save_outline(&placeholder) {
                        self.log(
                            LogLevel::Error,
                            format!("占位大纲持久化失败：{save_err}"),
                        );
                    }
                    self.report(
                        progress,
                        PERCENT_SKELETON_START,
                        "大纲生成失败，已保存占位大纲，请重试。",
                    );
                    return Err(err.into());
                }
            };

        if let Err(err) = checkpoints.save_outline(&tree) {
            self.log(LogLevel::Warn, format!("大纲持久化失败：{err}"));
        }

        let synthesizer = ContentSynthesizer::new(self.prompts, self.sink)
            .with_options(self.synthesis_options());
        let document = synthesizer.synthesize(
            model,
            &tree,
            &retrieval_context,
            checkpoints,
            progress,
            (PERCENT_BUDGETED, PERCENT_SYNTHESIZED),
        )?;

        self.report(
            progress,
            PERCENT_DONE,
            &format!(
                "文档《{}》生成完成，共 {} 节。",
                tree.title, document.completed_sections
            ),
        );

        Ok(GeneratedDocument {
            title: tree.title.clone(),
            tree,
            markdown: document.markdown,
            html: document.html,
            requirements,
            completed_sections: document.completed_sections,
            skipped_sections: document.skipped_sections,
        })
    }

    /// 只生成大纲，不合成正文。供上层在大纲确认后再另行发起正文
    /// 生成的场景使用。
    pub fn build_outline<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        retrieval: &dyn KnowledgeSearch,
        progress: &dyn ProgressReporter,
        request: &DocumentRequest,
    ) -> Result<(OutlineTree, Requirements), OutlineError> {
        self.prepare_outline(model, retrieval, progress, request)
            .map(|(tree, requirements, _)| (tree, requirements))
    }

    fn prepare_outline<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        retrieval: &dyn KnowledgeSearch,
        progress: &dyn ProgressReporter,
        request: &DocumentRequest,
    ) -> Result<(OutlineTree, Requirements, String), OutlineError> {
        self.report(progress, PERCENT_EXTRACTING, "正在解析生成要求。");
        let default_level = request
            .required_level
            .unwrap_or(self.config.default_required_level);
        let extractor = RequirementExtractor::new(self.prompts, self.sink);
        let requirements = extractor.extract(model, &request.prompt, default_level);
        self.report(progress, PERCENT_EXTRACTED, "生成要求解析完成。");

        let retrieval_context = match retrieval.query(&request.prompt, &request.knowledge_base_ids)
        {
            Ok(context) => context,
            Err(err) => {
                self.log(LogLevel::Warn, format!("知识库检索失败，按无上下文继续：{err}"));
                String::new()
            }
        };

        self.report(progress, PERCENT_SKELETON_START, "正在生成大纲骨架。");
        let builder = SkeletonBuilder::new(self.prompts, self.sink);
        let mut tree = builder.build(
            model,
            &SkeletonRequest {
                user_prompt: &request.prompt,
                requirements: &requirements,
                reference_context: &request.reference_context,
                retrieval_context: &retrieval_context,
            },
        )?;
        if tree.is_empty() {
            self.log(LogLevel::Warn, "大纲骨架为空，后续阶段将按空文档降级执行。");
        }
        self.report(
            progress,
            PERCENT_SKELETON_DONE,
            &format!("大纲骨架完成，共 {} 章。", tree.children.len()),
        );

        let expander = ChapterExpander::new(self.prompts, self.sink);
        let mut expand_request = ExpandRequest::new(&requirements, &retrieval_context);
        expand_request.max_children = self.config.max_children_per_node;
        expand_request.max_parallel = self.config.max_parallel_chapters;
        expander.expand_tree(
            model,
            &mut tree,
            &expand_request,
            progress,
            (PERCENT_SKELETON_DONE, PERCENT_EXPANDED),
        );

        let report = repair_tree(&mut tree, self.sink);
        self.report(
            progress,
            PERCENT_REPAIRED,
            &format!(
                "大纲校验完成：修复空标题 {} 处、重复标题 {} 处。",
                report.filled_empty, report.renamed_duplicates
            ),
        );

        match requirements.effective_word_target() {
            Some(total) => {
                distribute_word_budget(
                    &mut tree,
                    total,
                    &BudgetOptions {
                        per_node_ceiling: self.config.per_node_word_ceiling,
                    },
                    self.sink,
                );
                self.report(progress, PERCENT_BUDGETED, "字数预算分配完成。");
            }
            None => {
                self.report(progress, PERCENT_BUDGETED, "未设定字数目标，跳过预算分配。");
            }
        }

        Ok((tree, requirements, retrieval_context))
    }

    fn synthesis_options(&self) -> SynthesisOptions {
        SynthesisOptions {
            similarity_threshold: self.config.similarity_threshold,
            max_regenerations: self.config.max_regenerations,
            recent_summary_limit: self.config.recent_summary_limit,
            recent_title_limit: self.config.recent_title_limit,
            summary_digest_chars: self.config.summary_digest_chars,
            max_total_length: self.config.max_total_length,
            max_chapter_length: self.config.max_chapter_length,
        }
    }

    fn report(&self, progress: &dyn ProgressReporter, percent: u8, message: &str) {
        if let Err(err) = progress.report(percent, message, None) {
            self.log(LogLevel::Warn, format!("进度上报失败：{err}"));
        }
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

fn failure_outline() -> OutlineTree {
    let mut tree = OutlineTree::new(FAILURE_TITLE);
    tree.children.push(OutlineNode::new(
        "生成失败",
        "文档生成未能完成，请重新发起生成任务。",
        1,
    ));
    tree
}
