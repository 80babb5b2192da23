use crate::logging::{LogLevel, LogRecord, LogSink};

use super::{OutlineNode, OutlineTree};

pub const DEFAULT_PER_NODE_CEILING: u32 = 5_000;

/// 有子节点的节点权重上浮，奖励结构更丰富的分支。
const CHILD_COUNT_BONUS: f64 = 0.1;
const SUBTREE_BOOST: f64 = 1.2;

#[derive(Clone, Copy, Debug)]
pub struct BudgetOptions {
    /// 单节点生成上限。单次模型调用写不出任意长的连贯文本，
    /// 超出部分直接截断，与比例分配无关。
    pub per_node_ceiling: u32,
}

impl Default for BudgetOptions {
    fn default() -> Self {
        Self {
            per_node_ceiling: DEFAULT_PER_NODE_CEILING,
        }
    }
}

/// 把文档级字数目标分摊到整棵树。完成后任何有子节点的节点都满足
/// 自身配额等于子节点配额之和；树容量不足时接受欠分配而不是加节点。
/// 对相同输入重复执行结果不变。
pub fn distribute_word_budget(
    tree: &mut OutlineTree,
    total_words: u32,
    options: &BudgetOptions,
    sink: &dyn LogSink,
) {
    if tree.children.is_empty() || total_words == 0 {
        return;
    }

    let weights: Vec<f64> = tree.children.iter().map(level_one_weight).collect();
    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= 0.0 {
        return;
    }

    let mut allocations: Vec<u32> = weights
        .iter()
        .map(|weight| ((total_words as f64) * weight / weight_sum).floor() as u32)
        .collect();

    // 向下取整的累积误差补到权重最高的一级章节，保证总量精确。
    let allocated: u32 = allocations.iter().sum();
    let drift = total_words as i64 - allocated as i64;
    if drift != 0 {
        let heaviest = weights
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(index, _)| index)
            .unwrap_or(0);
        allocations[heaviest] = (allocations[heaviest] as i64 + drift).max(0) as u32;
    }

    for (chapter, allocation) in tree.children.iter_mut().zip(allocations) {
        assign_allocation(chapter, allocation, options.per_node_ceiling);
    }

    let delivered: u32 = tree
        .children
        .iter()
        .map(|chapter| chapter.expected_word_count)
        .sum();
    if delivered < total_words {
        sink.log(LogRecord::new(
            LogLevel::Warn,
            format!("目标字数 {total_words} 超出大纲容量，按容量分配 {delivered} 字。"),
        ));
    } else {
        sink.log(LogRecord::new(
            LogLevel::Info,
            format!("字数预算分配完成，共 {delivered} 字。"),
        ));
    }
}

fn level_one_weight(node: &OutlineNode) -> f64 {
    node.count_style.base_weight() * (1.0 + CHILD_COUNT_BONUS * node.children.len() as f64)
}

fn child_weight(node: &OutlineNode) -> f64 {
    if node.children.is_empty() {
        1.0
    } else {
        SUBTREE_BOOST
    }
}

fn assign_allocation(node: &mut OutlineNode, amount: u32, ceiling: u32) {
    if node.children.is_empty() {
        node.expected_word_count = amount.min(ceiling);
        return;
    }

    let weights: Vec<f64> = node.children.iter().map(child_weight).collect();
    let weight_sum: f64 = weights.iter().sum();
    let count = node.children.len();
    let mut allocated = 0u32;

    for index in 0..count {
        // 末位子节点吸收余数，避免舍入误差逐层累积。
        let share = if index + 1 == count {
            amount.saturating_sub(allocated)
        } else {
            let proportional = ((amount as f64) * weights[index] / weight_sum).floor() as u32;
            proportional.min(amount.saturating_sub(allocated))
        };
        assign_allocation(&mut node.children[index], share, ceiling);
        allocated = allocated.saturating_add(share);
    }

    // 叶子截断后的缺口向上反映，维持"父等于子之和"。
    node.expected_word_count = node
        .children
        .iter()
        .map(|child| child.expected_word_count)
        .sum();
}
