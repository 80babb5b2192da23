use serde_json::Value;

use crate::llm::{json, LanguageModel};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::prompts::PromptRegistry;

pub const MIN_OUTLINE_LEVEL: u32 = 1;
pub const MAX_OUTLINE_LEVEL: u32 = 4;
pub const DEFAULT_OUTLINE_LEVEL: u32 = 3;

/// 页数目标折算为字数目标时采用的每页字数。
pub const WORDS_PER_PAGE: u32 = 500;

const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// 从用户写作指令中解析出的结构化生成要求。每次生成只解析一次，
/// 之后不可变。
#[derive(Clone, Debug, PartialEq)]
pub struct Requirements {
    pub required_level: u32,
    pub word_count: Option<u32>,
    pub page_count: Option<u32>,
    pub predefined_chapters: Vec<String>,
}

impl Requirements {
    pub fn with_level(level: u32) -> Self {
        Self {
            required_level: clamp_level(level),
            word_count: None,
            page_count: None,
            predefined_chapters: Vec::new(),
        }
    }

    /// 字数目标优先，缺失时由页数目标折算。
    pub fn effective_word_target(&self) -> Option<u32> {
        self.word_count
            .or_else(|| self.page_count.map(|pages| pages.saturating_mul(WORDS_PER_PAGE)))
    }
}

impl Default for Requirements {
    fn default() -> Self {
        Self::with_level(DEFAULT_OUTLINE_LEVEL)
    }
}

pub fn clamp_level(level: u32) -> u32 {
    level.clamp(MIN_OUTLINE_LEVEL, MAX_OUTLINE_LEVEL)
}

pub struct RequirementExtractor<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> RequirementExtractor<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self { prompts, sink }
    }

    /// 解析失败一律软降级为默认要求：后续管线必须在要求信息缺失时
    /// 也能继续运行。
    pub fn extract<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        user_prompt: &str,
        default_level: u32,
    ) -> Requirements {
        let fallback = Requirements::with_level(default_level);

        let prompt = match self
            .prompts
            .format_with("extract_requirements", [("user_prompt", user_prompt.trim())])
        {
            Ok(prompt) => prompt,
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    format!("要求解析提示词渲染失败，使用默认要求：{err}"),
                );
                return fallback;
            }
        };

        let response = match model.generate(&prompt, EXTRACTION_TEMPERATURE, None) {
            Ok(response) => response,
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    format!("要求解析调用失败，使用默认要求：{err}"),
                );
                return fallback;
            }
        };

        let Some(value) = json::parse_value(&response) else {
            self.log(
                LogLevel::Warn,
                "要求解析返回内容不是合法 JSON，使用默认要求。",
            );
            return fallback;
        };

        let requirements = parse_requirements(&value, default_level);
        self.log(
            LogLevel::Info,
            format!(
                "生成要求：层级 {}，字数 {:?}，页数 {:?}，预设章节 {} 个。",
                requirements.required_level,
                requirements.word_count,
                requirements.page_count,
                requirements.predefined_chapters.len()
            ),
        );
        requirements
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

fn parse_requirements(value: &Value, default_level: u32) -> Requirements {
    let required_level = value
        .get("required_level")
        .and_then(Value::as_i64)
        .filter(|n| *n > 0)
        .map(|n| clamp_level(n.min(u32::MAX as i64) as u32))
        .unwrap_or_else(|| clamp_level(default_level));

    let predefined_chapters = value
        .get("predefined_chapters")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|title| !title.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Requirements {
        required_level,
        word_count: json::positive_int_field(value, "word_count"),
        page_count: json::positive_int_field(value, "page_count"),
        predefined_chapters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LanguageModelError;
    use crate::logging::VecLogSink;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MockLanguageModel {
        responses: Mutex<VecDeque<String>>,
    }

    impl MockLanguageModel {
        fn new<I, S>(responses: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            }
        }
    }

    impl LanguageModel for MockLanguageModel {
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

    #[test]
    fn parses_structured_response() {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let mock = MockLanguageModel::new([
            r#"```json
{"required_level": 2, "word_count": 9000, "page_count": null, "predefined_chapters": ["引言", "方法", "结论"]}
```"#,
        ]);

        let extractor = RequirementExtractor::new(&prompts, &sink);
        let requirements = extractor.extract(&mock, "写一篇实验报告", DEFAULT_OUTLINE_LEVEL);

        assert_eq!(requirements.required_level, 2);
        assert_eq!(requirements.word_count, Some(9000));
        assert_eq!(requirements.page_count, None);
        assert_eq!(
            requirements.predefined_chapters,
            vec!["引言", "方法", "结论"]
        );
    }

    #[test]
    fn clamps_out_of_range_level() {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let mock = MockLanguageModel::new([r#"{"required_level": 9}"#]);

        let extractor = RequirementExtractor::new(&prompts, &sink);
        let requirements = extractor.extract(&mock, "一份超深结构的提纲", 3);
        assert_eq!(requirements.required_level, MAX_OUTLINE_LEVEL);
    }

    #[test]
    fn falls_back_on_malformed_json() {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let mock = MockLanguageModel::new(["这不是 JSON"]);

        let extractor = RequirementExtractor::new(&prompts, &sink);
        let requirements = extractor.extract(&mock, "随便写点什么", 2);

        assert_eq!(requirements, Requirements::with_level(2));
        assert!(sink.contains("不是合法 JSON"));
    }

    #[test]
    fn falls_back_on_model_error() {
        let prompts = PromptRegistry::new().expect("registry");
        let sink = VecLogSink::new();
        let mock = MockLanguageModel::new(Vec::<String>::new());

        let extractor = RequirementExtractor::new(&prompts, &sink);
        let requirements = extractor.extract(&mock, "任意指令", DEFAULT_OUTLINE_LEVEL);

        assert_eq!(requirements, Requirements::default());
        assert!(sink.contains("调用失败"));
    }
}
