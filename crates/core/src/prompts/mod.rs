use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PromptConfig;

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

pub type PromptArguments = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt `{0}` not found")]
    NotFound(String),
    #[error("missing argument `{argument}` when rendering prompt `{key}`")]
    MissingArgument { key: String, argument: String },
    #[error("failed to read prompt file `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse built-in prompt definitions: {0}")]
    ParseBuiltIn(toml::de::Error),
    #[error("failed to parse prompt file `{path}` as TOML: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse prompt file `{path}` as YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// 单个提示词模板。`{name}` 为占位符，`{{`/`}}` 转义字面花括号；
/// 渲染时所有占位符都必须给值。
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    template: String,
    description: Option<String>,
    placeholders: BTreeSet<String>,
}

impl PromptTemplate {
    fn new(key: String, raw: RawPrompt) -> Self {
        let placeholders = placeholders_in(&raw.template);
        Self {
            key,
            template: raw.template,
            description: raw.description,
            placeholders,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(String::as_str)
    }

    pub fn render(&self, arguments: &PromptArguments) -> Result<String, PromptError> {
        for placeholder in &self.placeholders {
            if !arguments.contains_key(placeholder) {
                return Err(PromptError::MissingArgument {
                    key: self.key.clone(),
                    argument: placeholder.clone(),
                });
            }
        }
        Ok(render_template(&self.template, arguments))
    }

    pub fn render_with<I, K, V>(&self, arguments: I) -> Result<String, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: PromptArguments = arguments
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self.render(&map)
    }
}

#[derive(Debug)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, PromptTemplate>,
    directories: Vec<PathBuf>,
    hot_reload: bool,
}

impl PromptRegistry {
    pub fn new() -> Result<Self, PromptError> {
        Self::from_prompt_config(&PromptConfig::default())
    }

    pub fn from_prompt_config(config: &PromptConfig) -> Result<Self, PromptError> {
        Self::with_options(config.custom_directories.clone(), config.enable_hot_reload)
    }

    pub fn with_custom_directories<P: AsRef<Path>>(directories: &[P]) -> Result<Self, PromptError> {
        let dirs = directories
            .iter()
            .map(|p| p.as_ref().to_path_buf())
            .collect();
        Self::with_options(dirs, false)
    }

    pub fn with_options(directories: Vec<PathBuf>, hot_reload: bool) -> Result<Self, PromptError> {
        let mut registry = Self {
            prompts: BTreeMap::new(),
            directories,
            hot_reload,
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn hot_reload_enabled(&self) -> bool {
        self.hot_reload
    }

    pub fn custom_directories(&self) -> &[PathBuf] {
        &self.directories
    }

    pub fn reload(&mut self) -> Result<(), PromptError> {
        let mut prompts = BTreeMap::new();

        let built_in: PromptDocument =
            toml::from_str(BUILT_IN_PROMPTS).map_err(PromptError::ParseBuiltIn)?;
        for (key, raw) in built_in.prompts {
            prompts.insert(key.clone(), PromptTemplate::new(key, raw));
        }

        for dir in &self.directories {
            load_directory(dir, &mut prompts)?;
        }

        self.prompts = prompts;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.prompts.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.prompts.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.prompts.keys().map(String::as_str)
    }

    pub fn format(&self, key: &str, args: &PromptArguments) -> Result<String, PromptError> {
        self.get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))?
            .render(args)
    }

    pub fn format_with<I, K, V>(&self, key: &str, arguments: I) -> Result<String, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))?
            .render_with(arguments)
    }
}

fn load_directory(
    dir: &Path,
    prompts: &mut BTreeMap<String, PromptTemplate>,
) -> Result<(), PromptError> {
    if !dir.is_dir() {
        return Ok(());
    }

    let read_dir = fs::read_dir(dir).map_err(|source| PromptError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    for path in files {
        let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        let document = match extension.to_ascii_lowercase().as_str() {
            "toml" => {
                let contents = fs::read_to_string(&path).map_err(|source| PromptError::Io {
                    path: path.clone(),
                    source,
                })?;
                toml::from_str::<PromptDocument>(&contents).map_err(|source| {
                    PromptError::ParseToml {
                        path: path.clone(),
                        source,
                    }
                })?
            }
            "yaml" | "yml" => {
                let contents = fs::read_to_string(&path).map_err(|source| PromptError::Io {
                    path: path.clone(),
                    source,
                })?;
                serde_yaml::from_str::<PromptDocument>(&contents).map_err(|source| {
                    PromptError::ParseYaml {
                        path: path.clone(),
                        source,
                    }
                })?
            }
            _ => continue,
        };

        for (key, raw) in document.prompts {
            prompts.insert(key.clone(), PromptTemplate::new(key, raw));
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct PromptDocument {
    #[serde(default)]
    prompts: BTreeMap<String, RawPrompt>,
}

#[derive(Debug, Deserialize)]
struct RawPrompt {
    #[serde(alias = "text")]
    template: String,
    #[serde(default)]
    description: Option<String>,
}

fn placeholders_in(template: &str) -> BTreeSet<String> {
    let mut placeholders = BTreeSet::new();
    scan_template(template, |segment| {
        if let Segment::Placeholder(name) = segment {
            placeholders.insert(name.to_string());
        }
    });
    placeholders
}

fn render_template(template: &str, arguments: &PromptArguments) -> String {
    let mut output = String::with_capacity(template.len());
    scan_template(template, |segment| match segment {
        Segment::Literal(text) => output.push_str(text),
        Segment::Placeholder(name) => {
            if let Some(value) = arguments.get(name) {
                output.push_str(value);
            }
        }
    });
    output
}

enum Segment<'t> {
    Literal(&'t str),
    Placeholder(&'t str),
}

fn scan_template<'t>(template: &'t str, mut emit: impl FnMut(Segment<'t>)) {
    let bytes = template.as_bytes();
    let mut cursor = 0;
    let mut literal_start = 0;

    while cursor < bytes.len() {
        match bytes[cursor] {
            b'{' if bytes.get(cursor + 1) == Some(&b'{') => {
                emit(Segment::Literal(&template[literal_start..cursor]));
                emit(Segment::Literal("{"));
                cursor += 2;
                literal_start = cursor;
            }
            b'}' if bytes.get(cursor + 1) == Some(&b'}') => {
                emit(Segment::Literal(&template[literal_start..cursor]));
                emit(Segment::Literal("}"));
                cursor += 2;
                literal_start = cursor;
            }
            b'{' => {
                let rest = &template[cursor + 1..];
                match rest.find('}') {
                    Some(close) => {
                        let name = rest[..close].trim();
                        if name.is_empty() {
                            cursor += 1;
                        } else {
                            emit(Segment::Literal(&template[literal_start..cursor]));
                            emit(Segment::Placeholder(&rest[..close]));
                            cursor += close + 2;
                            literal_start = cursor;
                        }
                    }
                    None => cursor += 1,
                }
            }
            _ => cursor += 1,
        }
    }

    if literal_start < template.len() {
        emit(Segment::Literal(&template[literal_start..]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn renders_builtin_prompt() {
        let registry = PromptRegistry::new().expect("registry");
        let output = registry
            .format_with("extract_requirements", [("user_prompt", "写一篇调研报告")])
            .expect("rendered");
        assert!(output.contains("写一篇调研报告"));
        assert!(output.contains("required_level"));
    }

    #[test]
    fn builtin_prompts_cover_all_stages() {
        let registry = PromptRegistry::new().expect("registry");
        for key in [
            "extract_requirements",
            "outline_skeleton",
            "enrich_chapters",
            "expand_chapter",
            "section_content",
        ] {
            assert!(registry.contains(key), "missing builtin prompt `{key}`");
        }
    }

    #[test]
    fn missing_argument_fails() {
        let registry = PromptRegistry::new().expect("registry");
        let template = registry.get("expand_chapter").expect("template");
        let error = template
            .render(&PromptArguments::new())
            .expect_err("missing args");
        assert!(matches!(error, PromptError::MissingArgument { .. }));
    }

    #[test]
    fn double_braces_render_literally() {
        let raw = RawPrompt {
            template: "输出 JSON：{{\"title\": \"{title}\"}}".to_string(),
            description: None,
        };
        let template = PromptTemplate::new("demo".to_string(), raw);
        let output = template
            .render_with([("title", "绪论")])
            .expect("rendered");
        assert_eq!(output, "输出 JSON：{\"title\": \"绪论\"}");
    }

    #[test]
    fn custom_directory_overrides_builtin() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            "[prompts.extract_requirements]\ntemplate = \"定制模板 {user_prompt}\"\n",
        )
        .expect("write");

        let registry = PromptRegistry::with_custom_directories(&[dir.path()]).expect("registry");
        let output = registry
            .format_with("extract_requirements", [("user_prompt", "示例")])
            .expect("rendered");
        assert_eq!(output, "定制模板 示例");
    }

    #[test]
    fn reload_reflects_changes() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("custom.yaml");
        fs::write(&path, "prompts:\n  greeting:\n    template: \"初始 {name}\"\n")
            .expect("write");

        let mut registry =
            PromptRegistry::with_options(vec![dir.path().to_path_buf()], true).expect("registry");
        assert_eq!(
            registry
                .format_with("greeting", [("name", "甲")])
                .expect("rendered"),
            "初始 甲"
        );

        fs::write(&path, "prompts:\n  greeting:\n    template: \"更新 {name}\"\n")
            .expect("write");
        registry.reload().expect("reload");
        assert_eq!(
            registry
                .format_with("greeting", [("name", "乙")])
                .expect("rendered"),
            "更新 乙"
        );
    }
}
