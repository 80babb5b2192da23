use once_cell::sync::Lazy;
use pulldown_cmark::{html, Options, Parser};
use regex::Regex;

/// 模型爱在正文前加的客套与总结套话，固定串替换直接去掉。
const FILLER_PHRASES: [&str; 10] = [
    "好的，",
    "当然，",
    "以下是本节内容：",
    "本节将",
    "我们将",
    "总而言之，",
    "综上所述，",
    "In conclusion, ",
    "We will ",
    "we will ",
];

/// 标题样式的行：markdown 井号、章节编号、数字/字母序号开头且整行很短。
static HEADING_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:#{1,6}\s+|第[0-9一二三四五六七八九十百]+[章节部分篇]|\d+(?:\.\d+)*[\.、．]\s*|[一二三四五六七八九十]+[、．]\s*|[A-Za-z][\.、)）]\s+)",
    )
    .expect("invalid heading line regex")
});

/// 节点标题上残留的编号前缀（如"1.2 "或"第一章 "）。
static TITLE_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:#{1,6}\s*|第[0-9一二三四五六七八九十百]+[章节部分篇]\s*|\d+(?:\.\d+)*[\.、．\s]\s*|[一二三四五六七八九十]+[、．]\s*)+",
    )
    .expect("invalid title prefix regex")
});

/// 超过这个长度的行不太可能是标题，不做剔除。
const HEADING_LINE_MAX_CHARS: usize = 30;

pub fn render_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut output = String::with_capacity(markdown.len() * 2);
    html::push_html(&mut output, parser);
    output
}

/// 文档标题占一级，节点标题比语义层级深一级。
pub fn heading_prefix(level: u32) -> String {
    "#".repeat((level as usize + 1).min(6))
}

pub fn clean_section_title(title: &str) -> String {
    TITLE_PREFIX_RE.replace(title.trim(), "").trim().to_string()
}

pub fn strip_filler_phrases(text: &str) -> String {
    let mut cleaned = text.to_string();
    for phrase in FILLER_PHRASES {
        cleaned = cleaned.replace(phrase, "");
    }
    cleaned.trim().to_string()
}

fn is_heading_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && trimmed.chars().count() <= HEADING_LINE_MAX_CHARS
        && HEADING_LINE_RE.is_match(trimmed)
}

pub fn contains_injected_heading(text: &str) -> bool {
    text.lines().any(is_heading_line)
}

pub fn strip_heading_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !is_heading_line(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
