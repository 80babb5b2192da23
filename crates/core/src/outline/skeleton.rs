use serde_json::Value;

use crate::llm::{json, LanguageModel};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::prompts::PromptRegistry;
use crate::requirements::Requirements;

use super::{CountStyle, OutlineError, OutlineNode, OutlineStage, OutlineTree};

const SKELETON_TEMPERATURE: f32 = 0.3;
const FALLBACK_TITLE: &str = "未命名文档";
const TITLE_PREVIEW_CHARS: usize = 30;

#[derive(Clone, Debug)]
pub struct SkeletonRequest<'a> {
    pub user_prompt: &'a str,
    pub requirements: &'a Requirements,
    pub reference_context: &'a str,
    pub retrieval_context: &'a str,
}

pub struct SkeletonBuilder<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> SkeletonBuilder<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self { prompts, sink }
    }

    /// 生成一级章节骨架。预设章节走补全路径，标题与顺序不允许被
    /// 模型改写；否则整树骨架由一次模型调用产出。JSON 解析失败返回
    /// 空骨架，调用方按"没有章节"处理而不是报错。
    pub fn build<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &SkeletonRequest<'_>,
    ) -> Result<OutlineTree, OutlineError> {
        if !request.requirements.predefined_chapters.is_empty() {
            return Ok(self.build_from_predefined(model, request));
        }
        self.build_from_prompt(model, request)
    }

    fn build_from_predefined<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &SkeletonRequest<'_>,
    ) -> OutlineTree {
        let chapters = &request.requirements.predefined_chapters;
        let mut tree = OutlineTree::new(fallback_title(request.user_prompt));
        tree.children = chapters
            .iter()
            .map(|title| OutlineNode::new(title.clone(), "", 1))
            .collect();

        let chapter_list = chapters
            .iter()
            .enumerate()
            .map(|(index, title)| format!("{}. {}", index + 1, title))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = match self.prompts.format_with(
            "enrich_chapters",
            [
                ("user_prompt", request.user_prompt.trim().to_string()),
                ("chapter_list", chapter_list),
                (
                    "reference_context",
                    request.reference_context.trim().to_string(),
                ),
                (
                    "retrieval_context",
                    request.retrieval_context.trim().to_string(),
                ),
            ],
        ) {
            Ok(prompt) => prompt,
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    format!("{}提示词渲染失败，保留预设章节原样：{err}", OutlineStage::Enrich),
                );
                return tree;
            }
        };

        let response = match model.generate(&prompt, SKELETON_TEMPERATURE, None) {
            Ok(response) => response,
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    format!("{}调用失败，保留预设章节原样：{err}", OutlineStage::Enrich),
                );
                return tree;
            }
        };

        let Some(value) = json::parse_value(&response) else {
            self.log(
                LogLevel::Warn,
                format!("{}返回内容不是合法 JSON，保留预设章节原样。", OutlineStage::Enrich),
            );
            return tree;
        };

        if let Some(title) = json::string_field(&value, "title") {
            tree.title = title;
        }

        // 按位置合并：只吸收描述与篇幅风格，标题保持用户给定值；
        // 模型返回列表偏短时，尾部占位章节保持原样。
        let enriched = value
            .get("chapters")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for (node, entry) in tree.children.iter_mut().zip(enriched.iter()) {
            if let Some(description) = json::string_field(entry, "description") {
                node.description = description;
            }
            if let Some(style) = json::string_field(entry, "count_style") {
                node.count_style = CountStyle::parse_lenient(&style);
            }
        }

        self.log(
            LogLevel::Info,
            format!("预设章节补全完成，共 {} 章。", tree.children.len()),
        );
        tree
    }

    fn build_from_prompt<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &SkeletonRequest<'_>,
    ) -> Result<OutlineTree, OutlineError> {
        let word_hint = match (
            request.requirements.word_count,
            request.requirements.page_count,
        ) {
            (Some(words), _) => format!("总字数约{words}字"),
            (None, Some(pages)) => format!("总篇幅约{pages}页"),
            (None, None) => "篇幅不限".to_string(),
        };

        let prompt = self
            .prompts
            .format_with(
                "outline_skeleton",
                [
                    ("user_prompt", request.user_prompt.trim().to_string()),
                    (
                        "required_level",
                        request.requirements.required_level.to_string(),
                    ),
                    ("word_hint", word_hint),
                    (
                        "reference_context",
                        request.reference_context.trim().to_string(),
                    ),
                    (
                        "retrieval_context",
                        request.retrieval_context.trim().to_string(),
                    ),
                ],
            )
            .map_err(|source| OutlineError::Prompt {
                stage: OutlineStage::Skeleton,
                source,
            })?;

        let response = model
            .generate(&prompt, SKELETON_TEMPERATURE, None)
            .map_err(|source| OutlineError::Model {
                stage: OutlineStage::Skeleton,
                source,
            })?;

        let Some(value) = json::parse_value(&response) else {
            self.log(
                LogLevel::Warn,
                "大纲骨架返回内容不是合法 JSON，返回空骨架。",
            );
            return Ok(OutlineTree::new(fallback_title(request.user_prompt)));
        };

        let title =
            json::string_field(&value, "title").unwrap_or_else(|| fallback_title(request.user_prompt));
        let mut tree = OutlineTree::new(title);

        if let Some(chapters) = value.get("chapters").and_then(Value::as_array) {
            for entry in chapters {
                let Some(title) = json::string_field(entry, "title") else {
                    continue;
                };
                let mut node = OutlineNode::new(
                    title,
                    json::string_field(entry, "description").unwrap_or_default(),
                    1,
                );
                if let Some(style) = json::string_field(entry, "count_style") {
                    node.count_style = CountStyle::parse_lenient(&style);
                }
                tree.children.push(node);
            }
        }

        self.log(
            LogLevel::Info,
            format!(
                "大纲骨架生成完成：《{}》共 {} 章。",
                tree.title,
                tree.children.len()
            ),
        );
        Ok(tree)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

fn fallback_title(user_prompt: &str) -> String {
    let first_line = user_prompt
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    if first_line.is_empty() {
        return FALLBACK_TITLE.to_string();
    }

    let mut title: String = first_line.chars().take(TITLE_PREVIEW_CHARS).collect();
    if first_line.chars().count() > TITLE_PREVIEW_CHARS {
        title.push('…');
    }
    title
}
