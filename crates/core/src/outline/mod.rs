use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::llm::LanguageModelError;
use crate::prompts::PromptError;

mod budget;
mod expand;
mod repair;
mod skeleton;

pub use budget::{distribute_word_budget, BudgetOptions};
pub use expand::{ChapterExpander, ExpandRequest};
pub use repair::{repair_tree, RepairReport};
pub use skeleton::{SkeletonBuilder, SkeletonRequest};

/// 级别一节点的篇幅风格，用于字数分配权重。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountStyle {
    Short,
    #[default]
    Medium,
    Long,
}

impl CountStyle {
    pub fn base_weight(&self) -> f64 {
        match self {
            CountStyle::Short => 0.5,
            CountStyle::Medium => 1.0,
            CountStyle::Long => 2.0,
        }
    }

    /// 模型返回的风格字段经常不规范，做宽容解析。
    pub fn parse_lenient(text: &str) -> Self {
        let normalized = text.trim().to_lowercase();
        if normalized.contains("short") || normalized.contains('短') {
            CountStyle::Short
        } else if normalized.contains("long") || normalized.contains('长') {
            CountStyle::Long
        } else {
            CountStyle::Medium
        }
    }
}

impl fmt::Display for CountStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CountStyle::Short => "short",
            CountStyle::Medium => "medium",
            CountStyle::Long => "long",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub level: u32,
    #[serde(default)]
    pub count_style: CountStyle,
    #[serde(default)]
    pub expected_word_count: u32,
    #[serde(default)]
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    pub fn new(title: impl Into<String>, description: impl Into<String>, level: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            level,
            count_style: CountStyle::Medium,
            expected_word_count: 0,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(OutlineNode::node_count)
            .sum::<usize>()
    }

    pub fn max_depth(&self) -> u32 {
        self.children
            .iter()
            .map(OutlineNode::max_depth)
            .max()
            .unwrap_or(self.level)
    }
}

/// 生成树的根包装：文档标题加有序的一级章节。子节点顺序即阅读顺序。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlineTree {
    pub title: String,
    #[serde(default)]
    pub children: Vec<OutlineNode>,
}

impl OutlineTree {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            children: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.children
            .iter()
            .map(OutlineNode::node_count)
            .sum::<usize>()
    }

    pub fn max_depth(&self) -> u32 {
        self.children
            .iter()
            .map(OutlineNode::max_depth)
            .max()
            .unwrap_or(0)
    }

    /// 先序遍历，文档阅读顺序。
    pub fn walk<'t>(&'t self, visit: &mut dyn FnMut(&'t OutlineNode)) {
        fn descend<'t>(node: &'t OutlineNode, visit: &mut dyn FnMut(&'t OutlineNode)) {
            visit(node);
            for child in &node.children {
                descend(child, visit);
            }
        }
        for child in &self.children {
            descend(child, visit);
        }
    }

    pub fn titles(&self) -> Vec<&str> {
        let mut titles = Vec::new();
        self.walk(&mut |node| titles.push(node.title.as_str()));
        titles
    }

    pub(crate) fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut OutlineNode> {
        let (&first, rest) = path.split_first()?;
        let mut node = self.children.get_mut(first)?;
        for &index in rest {
            node = node.children.get_mut(index)?;
        }
        Some(node)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutlineStage {
    Skeleton,
    Enrich,
    Expand,
}

impl OutlineStage {
    fn label(&self) -> &'static str {
        match self {
            Self::Skeleton => "大纲骨架",
            Self::Enrich => "章节补全",
            Self::Expand => "章节展开",
        }
    }
}

impl fmt::Display for OutlineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum OutlineError {
    #[error("渲染{stage}提示词失败: {source}")]
    Prompt {
        stage: OutlineStage,
        #[source]
        source: PromptError,
    },
    #[error("调用模型执行{stage}失败: {source}")]
    Model {
        stage: OutlineStage,
        #[source]
        source: LanguageModelError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> OutlineTree {
        let mut tree = OutlineTree::new("测试文档");
        let mut chapter = OutlineNode::new("引言", "开篇", 1);
        chapter
            .children
            .push(OutlineNode::new("背景综述", "背景", 2));
        tree.children.push(chapter);
        tree.children.push(OutlineNode::new("结论", "收束", 1));
        tree
    }

    #[test]
    fn walk_visits_in_document_order() {
        let tree = sample_tree();
        assert_eq!(tree.titles(), vec!["引言", "背景综述", "结论"]);
    }

    #[test]
    fn node_count_and_depth() {
        let tree = sample_tree();
        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.max_depth(), 2);
    }

    #[test]
    fn node_at_mut_follows_index_path() {
        let mut tree = sample_tree();
        let node = tree.node_at_mut(&[0, 0]).expect("nested node");
        assert_eq!(node.title, "背景综述");
        assert!(tree.node_at_mut(&[2]).is_none());
    }

    #[test]
    fn count_style_lenient_parse() {
        assert_eq!(CountStyle::parse_lenient("Short"), CountStyle::Short);
        assert_eq!(CountStyle::parse_lenient("较长"), CountStyle::Long);
        assert_eq!(CountStyle::parse_lenient("未知"), CountStyle::Medium);
    }
}
