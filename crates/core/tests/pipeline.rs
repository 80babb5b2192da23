use std::collections::HashMap;
use std::sync::Mutex;

use docgen_core::{
    DocumentGenerator, DocumentRequest, LanguageModel, LanguageModelError, MemoryCheckpointStore,
    NoRetrieval, PromptRegistry, VecLogSink, VecProgress,
};

/// 按提示词内容路由响应的确定性假模型。章节展开是并行的，
/// 不能依赖调用顺序，这里完全由提示词文本决定返回什么。
struct RoutedModel {
    expansions: HashMap<String, String>,
    sections: HashMap<String, String>,
    calls: Mutex<usize>,
}

impl RoutedModel {
    fn new() -> Self {
        let mut expansions = HashMap::new();
        expansions.insert(
            "引言".to_string(),
            r#"{"children": [
                {"title": "概述", "description": "本章总览"},
                {"title": "研究意义", "description": "选题价值"}
            ]}"#
            .to_string(),
        );
        // "概述"与引言下的小节同名，考验修复阶段。
        expansions.insert(
            "方法".to_string(),
            r#"{"children": [
                {"title": "概述", "description": "方法总览"},
                {"title": "实验设计", "description": "设计细节"}
            ]}"#
            .to_string(),
        );
        expansions.insert("结论".to_string(), r#"{"children": []}"#.to_string());

        let mut sections = HashMap::new();
        sections.insert(
            "引言".to_string(),
            "这项研究源自行业内长期悬而未决的效率问题。".to_string(),
        );
        sections.insert(
            "概述".to_string(),
            "开篇首先交代选题缘起与全文的组织结构安排。".to_string(),
        );
        sections.insert(
            "研究意义".to_string(),
            "弄清这一机制有助于指导一线生产中的参数选择。".to_string(),
        );
        sections.insert(
            "方法".to_string(),
            "实验采用对照组设计并辅以双盲流程控制偏差。".to_string(),
        );
        sections.insert(
            "概述（方法相关）".to_string(),
            "方法部分先给出总体技术路线再分步展开说明。".to_string(),
        );
        sections.insert(
            "实验设计".to_string(),
            "样本划分、变量控制与测量口径在此逐一明确。".to_string(),
        );
        sections.insert(
            "结论".to_string(),
            "综合前文数据可以确认假设在主要场景下成立。".to_string(),
        );

        Self {
            expansions,
            sections,
            calls: Mutex::new(0),
        }
    }

    fn call_count(&self) -> usize {
        *self.calls.lock().expect("mock mutex poisoned")
    }
}

impl LanguageModel for RoutedModel {
    fn generate(
        &self,
        prompt: &str,
        _temperature: f32,
        _max_tokens: Option<u32>,
    ) -> Result<String, LanguageModelError> {
        *self.calls.lock().expect("mock mutex poisoned") += 1;

        if prompt.contains("提取生成要求") {
            return Ok(r#"{"required_level": 2, "word_count": 9000, "page_count": null,
                "predefined_chapters": ["引言", "方法", "结论"]}"#
                .to_string());
        }

        if prompt.contains("既定章节") {
            return Ok(r#"{"title": "实验研究报告", "chapters": [
                {"description": "研究背景与问题提出", "count_style": "medium"},
                {"description": "实验方法与数据来源", "count_style": "medium"},
                {"description": "结论与展望", "count_style": "medium"}
            ]}"#
            .to_string());
        }

        if prompt.contains("正在细化大纲") {
            for (title, response) in &self.expansions {
                if prompt.contains(&format!("节点标题：{title}\n")) {
                    return Ok(response.clone());
                }
            }
            return Err(LanguageModelError::message("no expansion response"));
        }

        if prompt.contains("撰写正文") {
            for (title, prose) in &self.sections {
                if prompt.contains(&format!("小节标题：{title}（第")) {
                    return Ok(prose.clone());
                }
            }
            return Err(LanguageModelError::message("no section response"));
        }

        Err(LanguageModelError::message("unexpected prompt"))
    }
}

#[test]
fn full_generation_run_produces_consistent_artifacts() {
    let prompts = PromptRegistry::new().expect("registry");
    let sink = VecLogSink::new();
    let checkpoints = MemoryCheckpointStore::new();
    let progress = VecProgress::new();
    let model = RoutedModel::new();

    let generator = DocumentGenerator::new(&prompts, &sink);
    let request = DocumentRequest::new("以引言、方法、结论三章写一篇9000字的实验研究报告");
    let document = generator
        .generate(&model, &NoRetrieval, &checkpoints, &progress, &request)
        .expect("generation should succeed");

    // 预设章节：标题与顺序原样保留，描述被补全。
    let tree = &document.tree;
    assert_eq!(tree.title, "实验研究报告");
    let chapter_titles: Vec<&str> = tree.children.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(chapter_titles, vec!["引言", "方法", "结论"]);
    assert!(tree
        .children
        .iter()
        .all(|chapter| !chapter.description.is_empty()));

    // 层级上限：没有节点超过要求的第 2 级。
    let mut max_level = 0;
    tree.walk(&mut |node| max_level = max_level.max(node.level));
    assert_eq!(max_level, 2);

    // 修复阶段：重名"概述"被父级上下文改名，全树标题唯一。
    let titles = tree.titles();
    let unique: std::collections::HashSet<&str> = titles.iter().copied().collect();
    assert_eq!(unique.len(), titles.len());
    assert!(titles.contains(&"概述"));
    assert!(titles.contains(&"概述（方法相关）"));

    // 预算守恒：父配额等于子配额之和，总量精确等于目标。
    let total: u32 = tree.children.iter().map(|c| c.expected_word_count).sum();
    assert_eq!(total, 9000);
    for chapter in &tree.children {
        if !chapter.children.is_empty() {
            let child_sum: u32 = chapter
                .children
                .iter()
                .map(|child| child.expected_word_count)
                .sum();
            assert_eq!(chapter.expected_word_count, child_sum);
        }
    }

    // 正文：7 个节点全部生成，每个节点落盘一次快照。
    assert_eq!(document.completed_sections, 7);
    assert_eq!(document.skipped_sections, 0);
    assert_eq!(checkpoints.checkpoint_count(), 7);

    // 标题渲染比语义层级深一级。
    assert!(document.markdown.starts_with("# 实验研究报告"));
    assert!(document.markdown.contains("## 引言"));
    assert!(document.markdown.contains("### 概述"));
    assert!(document.markdown.contains("### 概述（方法相关）"));
    assert!(document.html.contains("<h2>结论</h2>"));

    // 大纲持久化的是修复后的版本。
    let saved = checkpoints.outline().expect("outline saved");
    assert_eq!(saved.titles(), tree.titles());

    // 进度走到 100，且失败信息不该出现。
    assert_eq!(progress.last_percent(), Some(100));
    assert!(progress
        .events()
        .iter()
        .all(|event| !event.message.contains("失败")));

    // 调用量核对：1 次要求解析 + 1 次章节补全 + 3 次展开 + 7 次正文。
    assert_eq!(model.call_count(), 12);
}
