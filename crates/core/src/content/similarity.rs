use std::collections::HashSet;

/// 参与比对的句子最短字符数，太短的句子（过渡句、套话）噪声太大。
pub const MIN_SENTENCE_CHARS: usize = 10;

const SENTENCE_TERMINATORS: &[char] = &['。', '！', '？', '；', '!', '?', '\n'];

pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split(SENTENCE_TERMINATORS)
        .map(str::trim)
        .filter(|sentence| sentence.chars().count() > MIN_SENTENCE_CHARS)
        .collect()
}

/// 中日韩字符逐字成词，拉丁字母与数字按连续段成词，统一小写。
pub fn token_set(sentence: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    let mut buffer = String::new();
    for ch in sentence.chars() {
        if ch.is_ascii_alphanumeric() {
            buffer.extend(ch.to_lowercase());
            continue;
        }
        if !buffer.is_empty() {
            tokens.insert(std::mem::take(&mut buffer));
        }
        if is_cjk(ch) {
            tokens.insert(ch.to_string());
        }
    }
    if !buffer.is_empty() {
        tokens.insert(buffer);
    }
    tokens
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// 两段文本的句级最大 Jaccard 相似度。任一方没有合格句子时为 0。
pub fn max_sentence_similarity(a: &str, b: &str) -> f64 {
    let sentences_a = split_sentences(a);
    if sentences_a.is_empty() {
        return 0.0;
    }
    let sets_b: Vec<HashSet<String>> = split_sentences(b)
        .into_iter()
        .map(token_set)
        .collect();
    if sets_b.is_empty() {
        return 0.0;
    }

    let mut best: f64 = 0.0;
    for sentence in sentences_a {
        let set_a = token_set(sentence);
        for set_b in &sets_b {
            best = best.max(jaccard(&set_a, set_b));
        }
    }
    best
}

fn is_cjk(ch: char) -> bool {
    matches!(ch,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sentences_score_one() {
        let text = "城市数字化转型需要统一的数据底座支撑。";
        assert!((max_sentence_similarity(text, text) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrelated_sentences_score_low() {
        let a = "城市数字化转型需要统一的数据底座支撑。";
        let b = "春天的雨水唤醒了沉睡一冬的山野与河流。";
        assert!(max_sentence_similarity(a, b) < 0.3);
    }

    #[test]
    fn short_sentences_are_ignored() {
        let a = "好的。是的。";
        let b = "好的。是的。";
        assert_eq!(max_sentence_similarity(a, b), 0.0);
    }

    #[test]
    fn mixed_language_tokens() {
        let tokens = token_set("基于 LLM 的 RAG 检索增强2024");
        assert!(tokens.contains("llm"));
        assert!(tokens.contains("rag"));
        assert!(tokens.contains("检"));
        assert!(tokens.contains("2024"));
    }

    #[test]
    fn picks_maximum_over_sentence_pairs() {
        let a = "第一句完全不同的内容表述。统一的数据底座是数字化转型的关键支撑。";
        let b = "统一的数据底座是数字化转型的关键支撑。另一句无关的内容。";
        assert!(max_sentence_similarity(a, b) > 0.9);
    }
}
