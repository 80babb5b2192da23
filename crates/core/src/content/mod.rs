use thiserror::Error;

use crate::checkpoint::CheckpointStore;
use crate::llm::{LanguageModel, LanguageModelError};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::outline::{OutlineNode, OutlineTree};
use crate::progress::ProgressReporter;
use crate::prompts::{PromptArguments, PromptError, PromptRegistry};

pub mod markdown;
pub mod similarity;

const CONTENT_TEMPERATURE: f32 = 0.7;
const PARENT_EXCERPT_CHARS: usize = 800;
const EMPTY_PLACEHOLDER: &str = "（无）";
const ANTI_HEADING_INSTRUCTION: &str =
    "\n\n再次强调：正文中禁止出现任何标题、编号或小节序号，只输出连续的段落文本。";

#[derive(Clone, Debug)]
pub struct SynthesisOptions {
    pub similarity_threshold: f64,
    pub max_regenerations: usize,
    pub recent_summary_limit: usize,
    pub recent_title_limit: usize,
    pub summary_digest_chars: usize,
    pub max_total_length: usize,
    pub max_chapter_length: usize,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            max_regenerations: 1,
            recent_summary_limit: 5,
            recent_title_limit: 10,
            summary_digest_chars: 200,
            max_total_length: 60_000,
            max_chapter_length: 8_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GeneratedSection {
    pub title: String,
    pub prose: String,
}

/// 单次生成运行的滚动状态。只有驱动合成的线程会写它；运行结束
/// 即销毁，不跨运行共享。
#[derive(Debug, Default)]
pub struct GenerationContext {
    previous_summary: String,
    chapter_summaries: Vec<(String, String)>,
    generated_titles: Vec<String>,
    sections: Vec<GeneratedSection>,
    total_content_length: usize,
}

impl GenerationContext {
    fn record(&mut self, title: &str, prose: &str, digest_chars: usize) {
        let digest = truncate_chars(prose, digest_chars);
        self.previous_summary = digest.clone();
        self.chapter_summaries.push((title.to_string(), digest));
        self.generated_titles.push(title.to_string());
        self.total_content_length += prose.chars().count();
        self.sections.push(GeneratedSection {
            title: title.to_string(),
            prose: prose.to_string(),
        });
    }

    fn recent_summaries(&self, limit: usize) -> String {
        if self.chapter_summaries.is_empty() || limit == 0 {
            return EMPTY_PLACEHOLDER.to_string();
        }
        let start = self.chapter_summaries.len().saturating_sub(limit);
        self.chapter_summaries[start..]
            .iter()
            .map(|(title, digest)| format!("《{title}》：{digest}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn recent_titles(&self, limit: usize) -> String {
        if self.generated_titles.is_empty() || limit == 0 {
            return EMPTY_PLACEHOLDER.to_string();
        }
        let start = self.generated_titles.len().saturating_sub(limit);
        self.generated_titles[start..].join("、")
    }
}

#[derive(Clone, Debug)]
pub struct SynthesizedDocument {
    pub markdown: String,
    pub html: String,
    pub completed_sections: usize,
    pub skipped_sections: usize,
    pub regenerated_sections: usize,
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("渲染正文提示词失败: {source}")]
    Prompt {
        #[source]
        source: PromptError,
    },
}

struct SectionPlan<'t> {
    node: &'t OutlineNode,
    parent: Option<usize>,
    position: usize,
    sibling_count: usize,
}

fn flatten(tree: &OutlineTree) -> Vec<SectionPlan<'_>> {
    fn descend<'t>(
        node: &'t OutlineNode,
        parent: Option<usize>,
        position: usize,
        sibling_count: usize,
        plans: &mut Vec<SectionPlan<'t>>,
    ) {
        plans.push(SectionPlan {
            node,
            parent,
            position,
            sibling_count,
        });
        let own_index = plans.len() - 1;
        let child_count = node.children.len();
        for (child_position, child) in node.children.iter().enumerate() {
            descend(child, Some(own_index), child_position, child_count, plans);
        }
    }

    let mut plans = Vec::new();
    let chapter_count = tree.children.len();
    for (position, chapter) in tree.children.iter().enumerate() {
        descend(chapter, None, position, chapter_count, &mut plans);
    }
    plans
}

pub struct ContentSynthesizer<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    options: SynthesisOptions,
}

impl<'a> ContentSynthesizer<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self {
            prompts,
            sink,
            options: SynthesisOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SynthesisOptions) -> Self {
        self.options = options;
        self
    }

    /// 严格按文档顺序逐节点合成正文：每个节点的提示词依赖前一节点
    /// 的摘要，因此这里没有并行。每个节点落盘一次增量 HTML 快照；
    /// 触达全局长度上限后剩余节点整体跳过，不算错误。
    pub fn synthesize<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        tree: &OutlineTree,
        retrieval_context: &str,
        checkpoints: &dyn CheckpointStore,
        progress: &dyn ProgressReporter,
        percent_range: (u8, u8),
    ) -> Result<SynthesizedDocument, ContentError> {
        let plans = flatten(tree);
        let mut context = GenerationContext::default();
        let mut proses: Vec<Option<String>> = (0..plans.len()).map(|_| None).collect();

        let mut document = SynthesizedDocument {
            markdown: format!("# {}\n\n", tree.title.trim()),
            html: String::new(),
            completed_sections: 0,
            skipped_sections: 0,
            regenerated_sections: 0,
        };

        let (start, end) = percent_range;
        let span = end.saturating_sub(start) as usize;
        let mut ceiling_announced = false;

        for (index, plan) in plans.iter().enumerate() {
            if context.total_content_length >= self.options.max_total_length {
                if !ceiling_announced {
                    ceiling_announced = true;
                    self.log(
                        LogLevel::Warn,
                        format!(
                            "全文长度已达上限 {} 字，剩余小节跳过。",
                            self.options.max_total_length
                        ),
                    );
                    self.report(
                        progress,
                        percent_for(start, span, index, plans.len()),
                        "全文长度达到上限，提前收束。",
                    );
                }
                document.skipped_sections += 1;
                continue;
            }

            let title = markdown::clean_section_title(&plan.node.title);
            let prompt = self.section_prompt(tree, plan, &proses, &context, retrieval_context)?;

            let draft = match self.generate_clean(model, &prompt) {
                Ok(draft) => draft,
                Err(err) => {
                    self.log(
                        LogLevel::Error,
                        format!("小节《{title}》生成失败，跳过：{err}"),
                    );
                    self.report(
                        progress,
                        percent_for(start, span, index + 1, plans.len()),
                        &format!("小节《{title}》生成失败，已跳过。"),
                    );
                    document.skipped_sections += 1;
                    continue;
                }
            };

            let mut prose = draft;
            for _ in 0..self.options.max_regenerations {
                let Some(colliding) = self.find_collision(&context, &prose) else {
                    break;
                };
                document.regenerated_sections += 1;
                self.log(
                    LogLevel::Warn,
                    format!("小节《{title}》与《{colliding}》内容高度相似，重新生成一次。"),
                );
                let retry_prompt = format!(
                    "{prompt}\n\n注意：上一稿与章节《{colliding}》高度相似，请围绕本节自身要点重写，不要复述该章节内容。"
                );
                // 重写结果无条件采纳，不做无限重试；重写调用本身失败
                // 则保留上一稿。
                match self.generate_clean(model, &retry_prompt) {
                    Ok(rewritten) => prose = rewritten,
                    Err(err) => self.log(
                        LogLevel::Warn,
                        format!("小节《{title}》重写失败，保留上一稿：{err}"),
                    ),
                }
            }

            let prose = truncate_chars(&prose, self.options.max_chapter_length);

            document.markdown.push_str(&format!(
                "{} {}\n\n{}\n\n",
                markdown::heading_prefix(plan.node.level),
                title,
                prose
            ));
            document.html = markdown::render_html(&document.markdown);
            if let Err(err) = checkpoints.save_content(&tree.title, &document.html) {
                self.log(LogLevel::Warn, format!("内容快照写入失败：{err}"));
            }

            context.record(&title, &prose, self.options.summary_digest_chars);
            proses[index] = Some(prose);
            document.completed_sections += 1;

            self.report(
                progress,
                percent_for(start, span, index + 1, plans.len()),
                &format!(
                    "小节《{title}》完成（{}/{}）。",
                    index + 1,
                    plans.len()
                ),
            );
        }

        if document.html.is_empty() {
            document.html = markdown::render_html(&document.markdown);
        }
        Ok(document)
    }

    fn section_prompt(
        &self,
        tree: &OutlineTree,
        plan: &SectionPlan<'_>,
        proses: &[Option<String>],
        context: &GenerationContext,
        retrieval_context: &str,
    ) -> Result<String, ContentError> {
        let parent_excerpt = plan
            .parent
            .and_then(|parent| proses[parent].as_deref())
            .map(|prose| tail_chars(prose, PARENT_EXCERPT_CHARS))
            .filter(|excerpt| !excerpt.is_empty())
            .unwrap_or_else(|| EMPTY_PLACEHOLDER.to_string());

        let mut args = PromptArguments::new();
        args.insert("document_title".into(), tree.title.clone());
        args.insert(
            "node_title".into(),
            markdown::clean_section_title(&plan.node.title),
        );
        args.insert("node_description".into(), plan.node.description.clone());
        args.insert("level".into(), plan.node.level.to_string());
        args.insert(
            "position".into(),
            format!("同级第{}节，共{}节", plan.position + 1, plan.sibling_count),
        );
        args.insert("parent_content".into(), parent_excerpt);
        args.insert(
            "previous_summary".into(),
            if context.previous_summary.is_empty() {
                EMPTY_PLACEHOLDER.to_string()
            } else {
                context.previous_summary.clone()
            },
        );
        args.insert(
            "recent_summaries".into(),
            context.recent_summaries(self.options.recent_summary_limit),
        );
        args.insert(
            "recent_titles".into(),
            context.recent_titles(self.options.recent_title_limit),
        );
        args.insert(
            "retrieval_context".into(),
            if retrieval_context.trim().is_empty() {
                EMPTY_PLACEHOLDER.to_string()
            } else {
                retrieval_context.trim().to_string()
            },
        );
        args.insert("word_hint".into(), word_target_range(plan.node));

        self.prompts
            .format("section_content", &args)
            .map_err(|source| ContentError::Prompt { source })
    }

    /// 一次生成加清洗。检测到模型违规注入标题行时，用更强的指令
    /// 重发一次；仍然有就直接用正则剔除，不再重试。
    fn generate_clean<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        prompt: &str,
    ) -> Result<String, LanguageModelError> {
        let response = model.generate(prompt, CONTENT_TEMPERATURE, None)?;
        let text = markdown::strip_filler_phrases(&response);
        if !markdown::contains_injected_heading(&text) {
            return Ok(text);
        }

        self.log(
            LogLevel::Warn,
            "正文中检测到标题样式行，以更强指令重发一次。",
        );
        let retry_prompt = format!("{prompt}{ANTI_HEADING_INSTRUCTION}");
        match model.generate(&retry_prompt, CONTENT_TEMPERATURE, None) {
            Ok(second) => {
                let second = markdown::strip_filler_phrases(&second);
                if markdown::contains_injected_heading(&second) {
                    Ok(markdown::strip_heading_lines(&second))
                } else {
                    Ok(second)
                }
            }
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    format!("标题修正重发失败，改用正则剔除：{err}"),
                );
                Ok(markdown::strip_heading_lines(&text))
            }
        }
    }

    fn find_collision(&self, context: &GenerationContext, prose: &str) -> Option<String> {
        context
            .sections
            .iter()
            .map(|section| {
                (
                    section.title.clone(),
                    similarity::max_sentence_similarity(prose, &section.prose),
                )
            })
            .filter(|(_, score)| *score > self.options.similarity_threshold)
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(title, _)| title)
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

fn percent_for(start: u8, span: usize, done: usize, total: usize) -> u8 {
    if total == 0 {
        return start;
    }
    (start as usize + span * done / total) as u8
}

/// 有子节点的节点只写导语，配额在叶子上；叶子按配额映射到粗粒度
/// 篇幅区间。
fn word_target_range(node: &OutlineNode) -> String {
    if !node.children.is_empty() {
        return "100-200字的导语".to_string();
    }
    match node.expected_word_count {
        0 => "300-500字".to_string(),
        w if w <= 300 => "约300字".to_string(),
        w if w <= 800 => "300-800字".to_string(),
        w if w <= 1500 => "800-1500字".to_string(),
        w if w <= 3000 => "1500-3000字".to_string(),
        _ => "3000-5000字".to_string(),
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}

pub(crate) fn tail_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let skip = total - max_chars;
    match text.char_indices().nth(skip) {
        Some((index, _)) => text[index..].to_string(),
        None => String::new(),
    }
}
