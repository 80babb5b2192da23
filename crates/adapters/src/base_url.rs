use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/v\d+$").expect("valid regex"));

/// 规范化 OpenAI 兼容接口的 base_url：尾部 `#` 表示按原样使用，
/// 否则缺版本段时补上 `/v1`。
pub fn check_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if trimmed.ends_with('#') {
        return trimmed.trim_end_matches('#').to_string();
    }

    if !VERSION_SUFFIX_RE.is_match(trimmed) && !trimmed.contains("/v1") {
        format!("{}/v1", trimmed.trim_end_matches('/'))
    } else {
        trimmed.to_string()
    }
}
