use std::collections::{HashMap, HashSet};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::logging::{LogLevel, LogRecord, LogSink};

use super::{OutlineNode, OutlineTree};

/// 无父级上下文可用时按层级取修饰词。
const MODIFIER_WORDS: [&str; 6] = ["概述", "详情", "分析", "探讨", "实践", "展望"];
const RANDOM_SUFFIX_LEN: usize = 4;
const ORPHAN_TITLE: &str = "未命名段落";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RepairReport {
    pub filled_empty: usize,
    pub renamed_duplicates: usize,
    pub max_depth: u32,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        self.filled_empty > 0 || self.renamed_duplicates > 0
    }
}

/// 整树单线程修复：补空标题，再消除重复标题。完成后全树标题
/// 两两互异且非空。对自身输出再跑一遍不产生任何改动。
pub fn repair_tree(tree: &mut OutlineTree, sink: &dyn LogSink) -> RepairReport {
    let mut report = RepairReport {
        filled_empty: fill_empty_titles(tree, sink),
        ..RepairReport::default()
    };

    report.renamed_duplicates += rename_with_context(tree, sink);
    report.renamed_duplicates += force_unique(tree, sink);
    report.max_depth = tree.max_depth();

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "大纲修复完成：补空标题 {} 处，重命名 {} 处，实际最大层级 {}。",
            report.filled_empty, report.renamed_duplicates, report.max_depth
        ),
    ));
    report
}

fn fill_empty_titles(tree: &mut OutlineTree, sink: &dyn LogSink) -> usize {
    fn descend(node: &mut OutlineNode, parent_title: &str, sink: &dyn LogSink) -> usize {
        let mut filled = 0;
        if node.title.trim().is_empty() {
            node.title = if parent_title.is_empty() {
                ORPHAN_TITLE.to_string()
            } else {
                format!("{parent_title}子项")
            };
            sink.log(LogRecord::new(
                LogLevel::Warn,
                format!("发现空标题节点，已重命名为《{}》。", node.title),
            ));
            filled += 1;
        }
        let title = node.title.clone();
        for child in &mut node.children {
            filled += descend(child, &title, sink);
        }
        filled
    }

    let mut filled = 0;
    for chapter in &mut tree.children {
        filled += descend(chapter, "", sink);
    }
    filled
}

#[derive(Clone, Debug)]
struct Occurrence {
    path: Vec<usize>,
    level: u32,
    order: usize,
}

fn collect_occurrences(tree: &OutlineTree) -> Vec<(String, Occurrence)> {
    fn descend(
        node: &OutlineNode,
        path: &mut Vec<usize>,
        order: &mut usize,
        out: &mut Vec<(String, Occurrence)>,
    ) {
        out.push((
            node.title.clone(),
            Occurrence {
                path: path.clone(),
                level: node.level,
                order: *order,
            },
        ));
        *order += 1;
        for (index, child) in node.children.iter().enumerate() {
            path.push(index);
            descend(child, path, order, out);
            path.pop();
        }
    }

    let mut out = Vec::new();
    let mut order = 0;
    let mut path = Vec::new();
    for (index, chapter) in tree.children.iter().enumerate() {
        path.push(index);
        descend(chapter, &mut path, &mut order, &mut out);
        path.pop();
    }
    out
}

fn parent_title(tree: &OutlineTree, path: &[usize]) -> Option<String> {
    if path.len() < 2 {
        return None;
    }
    let mut node = tree.children.get(path[0])?;
    for &index in &path[1..path.len() - 1] {
        node = node.children.get(index)?;
    }
    Some(node.title.clone())
}

/// 重复标题第一轮：浅层出现保持原样，其余用父级路径上下文改名；
/// 没有可用上下文时退回层级修饰词。
fn rename_with_context(tree: &mut OutlineTree, sink: &dyn LogSink) -> usize {
    let mut groups: HashMap<String, Vec<Occurrence>> = HashMap::new();
    for (title, occurrence) in collect_occurrences(tree) {
        groups.entry(title).or_default().push(occurrence);
    }

    let mut duplicates: Vec<(String, Vec<Occurrence>)> = groups
        .into_iter()
        .filter(|(_, occurrences)| occurrences.len() > 1)
        .collect();
    // 处理顺序与文档顺序一致，让结果可复现。
    duplicates.sort_by_key(|(_, occurrences)| {
        occurrences.iter().map(|o| o.order).min().unwrap_or(0)
    });

    let mut renamed = 0;
    for (title, mut occurrences) in duplicates {
        occurrences.sort_by_key(|occurrence| (occurrence.level, occurrence.order));
        for occurrence in occurrences.iter().skip(1) {
            let replacement = match parent_title(tree, &occurrence.path) {
                Some(parent) if !parent.trim().is_empty() => {
                    format!("{title}（{parent}相关）")
                }
                _ => {
                    let modifier =
                        MODIFIER_WORDS[occurrence.level as usize % MODIFIER_WORDS.len()];
                    format!("{title}（{modifier}）")
                }
            };
            if let Some(node) = tree.node_at_mut(&occurrence.path) {
                sink.log(LogRecord::new(
                    LogLevel::Info,
                    format!("重复标题《{title}》重命名为《{replacement}》。"),
                ));
                node.title = replacement;
                renamed += 1;
            }
        }
    }
    renamed
}

/// 第二轮兜底：上下文改名后仍然重复的，追加短随机后缀直到唯一。
fn force_unique(tree: &mut OutlineTree, sink: &dyn LogSink) -> usize {
    let occurrences = collect_occurrences(tree);
    let mut seen: HashSet<String> = HashSet::new();
    let mut renamed = 0;

    for (title, occurrence) in occurrences {
        if seen.insert(title.clone()) {
            continue;
        }
        let mut candidate = format!("{title}_{}", random_suffix());
        while seen.contains(&candidate) {
            candidate = format!("{title}_{}", random_suffix());
        }
        if let Some(node) = tree.node_at_mut(&occurrence.path) {
            sink.log(LogRecord::new(
                LogLevel::Warn,
                format!("标题《{title}》仍然重复，追加随机后缀为《{candidate}》。"),
            ));
            node.title = candidate.clone();
            seen.insert(candidate);
            renamed += 1;
        }
    }
    renamed
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(char::from)
        .collect()
}
