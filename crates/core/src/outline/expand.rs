use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use serde_json::Value;

use crate::llm::{json, LanguageModel};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::progress::ProgressReporter;
use crate::prompts::PromptRegistry;
use crate::requirements::Requirements;

use super::{OutlineError, OutlineNode, OutlineStage, OutlineTree};

const EXPAND_TEMPERATURE: f32 = 0.4;
const MIN_TITLE_CHARS: usize = 3;
const PLACEHOLDER_PHRASES: [&str; 2] = ["详细内容", "detailed content"];

pub const DEFAULT_MAX_CHILDREN: usize = 7;
pub const DEFAULT_MAX_PARALLEL: usize = 8;

#[derive(Clone, Debug)]
pub struct ExpandRequest<'a> {
    pub requirements: &'a Requirements,
    pub retrieval_context: &'a str,
    pub max_children: usize,
    pub max_parallel: usize,
}

impl<'a> ExpandRequest<'a> {
    pub fn new(requirements: &'a Requirements, retrieval_context: &'a str) -> Self {
        Self {
            requirements,
            retrieval_context,
            max_children: DEFAULT_MAX_CHILDREN,
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }
}

pub struct ChapterExpander<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> ChapterExpander<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self { prompts, sink }
    }

    /// 把每个一级章节加深到要求层级。一级章节在有界线程池内并行展开，
    /// 单个子树内部保持顺序递归（下一层提示词依赖上一层产出）。
    /// 结果按原章节序号回填，输出顺序与完成顺序无关。
    pub fn expand_tree<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        tree: &mut OutlineTree,
        request: &ExpandRequest<'_>,
        progress: &dyn ProgressReporter,
        percent_range: (u8, u8),
    ) {
        let required_level = request.requirements.required_level;
        if required_level <= 1 || tree.children.is_empty() {
            return;
        }

        let chapters = std::mem::take(&mut tree.children);
        let chapter_count = chapters.len();
        let workers = request.max_parallel.max(1).min(chapter_count);
        let word_share = request
            .requirements
            .effective_word_target()
            .map(|total| total / chapter_count as u32);

        self.log(
            LogLevel::Info,
            format!("开始展开 {chapter_count} 个章节，工作线程 {workers} 个。"),
        );

        let next_index = AtomicUsize::new(0);
        let (sender, receiver) = mpsc::channel::<(usize, OutlineNode)>();
        let mut slots: Vec<Option<OutlineNode>> = (0..chapter_count).map(|_| None).collect();

        let document_title = tree.title.clone();
        thread::scope(|scope| {
            for _ in 0..workers {
                let sender = sender.clone();
                let next_index = &next_index;
                let chapters = &chapters;
                let document_title = document_title.as_str();
                scope.spawn(move || loop {
                    let index = next_index.fetch_add(1, Ordering::SeqCst);
                    if index >= chapters.len() {
                        break;
                    }
                    let expanded = self.expand_chapter(
                        model,
                        document_title,
                        chapters[index].clone(),
                        word_share,
                        request,
                    );
                    if sender.send((index, expanded)).is_err() {
                        break;
                    }
                });
            }
            drop(sender);

            let (start, end) = percent_range;
            let span = end.saturating_sub(start) as usize;
            let mut completed = 0usize;
            for (index, node) in receiver {
                completed += 1;
                let percent = start as usize + span * completed / chapter_count;
                let message =
                    format!("章节《{}》展开完成（{completed}/{chapter_count}）", node.title);
                slots[index] = Some(node);
                if let Err(err) = progress.report(percent as u8, &message, None) {
                    self.log(LogLevel::Warn, format!("进度上报失败：{err}"));
                }
            }
        });

        tree.children = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| stub_subtree(&chapters[index], required_level))
            })
            .collect();
    }

    fn expand_chapter<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        document_title: &str,
        mut chapter: OutlineNode,
        word_share: Option<u32>,
        request: &ExpandRequest<'_>,
    ) -> OutlineNode {
        let original = chapter.clone();
        let mut ancestry = Vec::new();
        match self.expand_node(
            model,
            document_title,
            &mut chapter,
            &mut ancestry,
            word_share,
            request,
        ) {
            Ok(()) => chapter,
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    format!("章节《{}》展开失败，使用保底子树：{err}", original.title),
                );
                stub_subtree(&original, request.requirements.required_level)
            }
        }
    }

    fn expand_node<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        document_title: &str,
        node: &mut OutlineNode,
        ancestry: &mut Vec<String>,
        word_share: Option<u32>,
        request: &ExpandRequest<'_>,
    ) -> Result<(), OutlineError> {
        if node.level >= request.requirements.required_level {
            return Ok(());
        }

        let children =
            self.request_children(model, document_title, node, ancestry, word_share, request)?;
        if children.is_empty() {
            self.log(
                LogLevel::Info,
                format!("节点《{}》无可用子节点，停止加深。", node.title),
            );
            return Ok(());
        }
        node.children = children;

        let child_share = word_share.map(|words| words / node.children.len() as u32);
        ancestry.push(node.title.clone());
        for child in &mut node.children {
            self.expand_node(model, document_title, child, ancestry, child_share, request)?;
        }
        ancestry.pop();
        Ok(())
    }

    fn request_children<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        document_title: &str,
        node: &OutlineNode,
        ancestry: &[String],
        word_share: Option<u32>,
        request: &ExpandRequest<'_>,
    ) -> Result<Vec<OutlineNode>, OutlineError> {
        let chapter_path = if ancestry.is_empty() {
            "（顶层章节）".to_string()
        } else {
            ancestry.join(" > ")
        };
        let word_hint = match word_share {
            Some(words) => format!("本章节目标约{words}字"),
            None => "篇幅适中".to_string(),
        };

        let prompt = self
            .prompts
            .format_with(
                "expand_chapter",
                [
                    ("document_title", document_title.to_string()),
                    ("chapter_path", chapter_path),
                    ("node_title", node.title.clone()),
                    ("node_description", node.description.clone()),
                    ("child_level", (node.level + 1).to_string()),
                    ("branch_range", branch_range(word_share).to_string()),
                    ("word_hint", word_hint),
                    (
                        "retrieval_context",
                        request.retrieval_context.trim().to_string(),
                    ),
                ],
            )
            .map_err(|source| OutlineError::Prompt {
                stage: OutlineStage::Expand,
                source,
            })?;

        let response = model
            .generate(&prompt, EXPAND_TEMPERATURE, None)
            .map_err(|source| OutlineError::Model {
                stage: OutlineStage::Expand,
                source,
            })?;

        let Some(value) = json::parse_value(&response) else {
            return Ok(Vec::new());
        };
        let entries = match value.get("children").and_then(Value::as_array) {
            Some(entries) => entries.clone(),
            None => value.as_array().cloned().unwrap_or_default(),
        };

        Ok(filter_children(&entries, node.level + 1, request.max_children))
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

/// 目标分支数区间，随篇幅目标放大。只是提示词措辞，不是硬性约束。
fn branch_range(word_share: Option<u32>) -> &'static str {
    match word_share {
        Some(share) if share >= 6000 => "4-6",
        Some(share) if share >= 3000 => "3-5",
        _ => "2-3",
    }
}

/// 模型产出的子节点需要后过滤：缺标题、标题过短或带占位套话的
/// 一律丢弃，并无条件截断到硬上限。
fn filter_children(entries: &[Value], child_level: u32, max_children: usize) -> Vec<OutlineNode> {
    let mut children = Vec::new();
    for entry in entries {
        let Some(title) = json::string_field(entry, "title") else {
            continue;
        };
        if title.chars().count() < MIN_TITLE_CHARS {
            continue;
        }
        let lowered = title.to_lowercase();
        if PLACEHOLDER_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase))
        {
            continue;
        }

        children.push(OutlineNode::new(
            title,
            json::string_field(entry, "description").unwrap_or_default(),
            child_level,
        ));
        if children.len() == max_children {
            break;
        }
    }
    children
}

/// 展开失败时的确定性保底子树：单个概述子节点，长度恒为 1。
fn stub_subtree(chapter: &OutlineNode, required_level: u32) -> OutlineNode {
    let mut stub = chapter.clone();
    stub.children.clear();
    if chapter.level < required_level {
        stub.children.push(OutlineNode::new(
            format!("{}概述", chapter.title),
            "围绕本章主题的概要内容".to_string(),
            chapter.level + 1,
        ));
    }
    stub
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LanguageModelError;
    use crate::logging::VecLogSink;
    use crate::progress::NullProgress;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct QueueMock {
        responses: Mutex<VecDeque<String>>,
    }

    impl QueueMock {
        fn new<I, S>(responses: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            }
        }

        fn remaining(&self) -> usize {
            self.responses.lock().expect("mock mutex poisoned").len()
        }
    }

    impl LanguageModel for QueueMock {
        fn generate(
            &self,
            _prompt: &str,
            _temperature: f32,
            _max_tokens: Option<u32>,
        ) -> Result<String, LanguageModelError> {
            self.responses
                .lock()
                .expect("mock mutex poisoned")
                .pop_front()
                .ok_or_else(|| LanguageModelError::message("no more mock responses"))
        }
    }

    /// 按提示词中出现的关键字选择响应，调度顺序无关，适合并行测试。
    struct KeywordMock {
        responses: Vec<(String, String)>,
    }

    impl KeywordMock {
        fn new<I, K, V>(responses: I) -> Self
        where
            I: IntoIterator<Item = (K, V)>,
            K: Into<String>,
            V: Into<String>,
        {
            Self {
                responses: responses
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            }
        }
    }

    impl LanguageModel for KeywordMock {
        fn generate(
            &self,
            prompt: &str,
            _temperature: f32,
            _max_tokens: Option<u32>,
        ) -> Result<String, LanguageModelError> {
            self.responses
                .iter()
                .find(|(keyword, _)| prompt.contains(keyword.as_str()))
                .map(|(_, response)| response.clone())
                .ok_or_else(|| LanguageModelError::message("no matching mock response"))
        }
    }

    fn tree_with_chapters(titles: &[&str]) -> OutlineTree {
        let mut tree = OutlineTree::new("测试文档");
        tree.children = titles
            .iter()
            .map(|title| OutlineNode::new(*title, "", 1))
            .collect();
        tree
    }

    fn children_json(titles: &[&str]) -> String {
        let entries = titles
            .iter()
            .map(|title| format!(r#"{{"title": "{title}", "description": "小节说明"}}"#))
            .collect::<Vec<_>>()
            .join(",");
        format!(r#"{{"children": [{entries}]}}"#)
    }

    #[test]
    fn expands_single_chapter_to_required_level() {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let requirements = Requirements::with_level(3);
        let mut tree = tree_with_chapters(&["技术方案"]);

        let mock = QueueMock::new([
            children_json(&["总体架构", "关键流程"]),
            children_json(&["架构分层设计"]),
            r#"{"children": []}"#.to_string(),
        ]);

        let expander = ChapterExpander::new(&prompts, &sink);
        let request = ExpandRequest::new(&requirements, "");
        expander.expand_tree(&mock, &mut tree, &request, &NullProgress, (15, 45));

        assert_eq!(tree.max_depth(), 3);
        let chapter = &tree.children[0];
        assert_eq!(chapter.children.len(), 2);
        assert_eq!(chapter.children[0].title, "总体架构");
        assert_eq!(chapter.children[0].children[0].title, "架构分层设计");
        assert_eq!(chapter.children[0].children[0].level, 3);
        assert!(chapter.children[1].children.is_empty());
        assert_eq!(mock.remaining(), 0);
    }

    #[test]
    fn filters_bad_children_and_truncates() {
        let entries: Vec<Value> = serde_json::from_str(
            r#"[
                {"title": "合格的小节一"},
                {"description": "没有标题"},
                {"title": "短"},
                {"title": "详细内容占位"},
                {"title": "合格的小节二"},
                {"title": "合格的小节三"},
                {"title": "合格的小节四"},
                {"title": "合格的小节五"},
                {"title": "合格的小节六"},
                {"title": "合格的小节七"},
                {"title": "合格的小节八"}
            ]"#,
        )
        .expect("entries");

        let children = filter_children(&entries, 2, DEFAULT_MAX_CHILDREN);
        assert_eq!(children.len(), DEFAULT_MAX_CHILDREN);
        assert!(children.iter().all(|c| c.level == 2));
        assert!(children.iter().all(|c| !c.title.contains("详细内容")));
        assert_eq!(children[0].title, "合格的小节一");
    }

    #[test]
    fn failed_chapter_falls_back_to_stub() {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let requirements = Requirements::with_level(2);
        let mut tree = tree_with_chapters(&["正常章节", "故障章节"]);

        // 只有"正常章节"有匹配响应，"故障章节"的调用会报错。
        let mock = KeywordMock::new([("正常章节", children_json(&["正常小节内容"]))]);

        let expander = ChapterExpander::new(&prompts, &sink);
        let request = ExpandRequest::new(&requirements, "");
        expander.expand_tree(&mock, &mut tree, &request, &NullProgress, (15, 45));

        assert_eq!(tree.children[0].children[0].title, "正常小节内容");
        let stub = &tree.children[1];
        assert_eq!(stub.children.len(), 1);
        assert_eq!(stub.children[0].title, "故障章节概述");
        assert!(sink.contains("使用保底子树"));
    }

    #[test]
    fn parallel_expansion_preserves_chapter_order() {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let requirements = Requirements::with_level(2);
        let titles = ["第一部分", "第二部分", "第三部分", "第四部分", "第五部分"];
        let mut tree = tree_with_chapters(&titles);

        let mock = KeywordMock::new(
            titles
                .iter()
                .map(|title| (*title, children_json(&[&format!("{title}细分")]))),
        );

        let expander = ChapterExpander::new(&prompts, &sink);
        let request = ExpandRequest::new(&requirements, "");
        expander.expand_tree(&mock, &mut tree, &request, &NullProgress, (15, 45));

        let top: Vec<&str> = tree.children.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(top, titles);
        for chapter in &tree.children {
            assert_eq!(chapter.children.len(), 1);
            assert_eq!(chapter.children[0].title, format!("{}细分", chapter.title));
        }
    }

    #[test]
    fn malformed_expansion_json_stops_branch() {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let requirements = Requirements::with_level(3);
        let mut tree = tree_with_chapters(&["独立章节"]);

        let mock = QueueMock::new(["模型没有返回 JSON"]);
        let expander = ChapterExpander::new(&prompts, &sink);
        let request = ExpandRequest::new(&requirements, "");
        expander.expand_tree(&mock, &mut tree, &request, &NullProgress, (15, 45));

        assert!(tree.children[0].children.is_empty());
        assert_eq!(mock.remaining(), 0);
    }

    #[test]
    fn branch_range_scales_with_word_share() {
        assert_eq!(branch_range(None), "2-3");
        assert_eq!(branch_range(Some(1000)), "2-3");
        assert_eq!(branch_range(Some(4000)), "3-5");
        assert_eq!(branch_range(Some(8000)), "4-6");
    }
}
