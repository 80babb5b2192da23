use clap::{Args, Parser, Subcommand};
use docgen_adapters::{
    create_llm_adapter, AdapterError, FileCheckpointStore, HttpKnowledgeSearch,
};
use docgen_core::{
    CheckpointStore, ConfigError, ConfigStore, DocumentGenerator, DocumentRequest, GenerateError,
    KnowledgeSearch, LogLevel, LogRecord, LogSink, NoRetrieval, OutlineError, OutlineNode,
    PromptError, PromptRegistry, StdoutLogSink, StdoutProgress,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let sink = StdoutLogSink::new();

    match cli.command {
        Command::Generate(args) => run_generate(&cli.config, args, &sink),
        Command::Outline(args) => run_outline(&cli.config, args, &sink),
        Command::Config(command) => match command {
            ConfigCommand::TestLlm(args) => run_test_llm(&cli.config, args, &sink),
        },
    }
}

fn run_generate(config_path: &Path, args: GenerateArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let selected_llm = select_llm_interface(&store, args.llm_interface.clone())?;
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let output_dir = resolve_output_dir(&store, args.output.clone());

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("使用 LLM 接口：{selected_llm}，输出目录：{}", output_dir.display()),
    ));

    let model = create_llm_adapter(store.config(), &selected_llm)?;
    let retrieval = build_retrieval(&store, sink)?;
    let checkpoints = FileCheckpointStore::new(&output_dir);
    let progress = StdoutProgress::new();

    let mut request = DocumentRequest::new(args.prompt);
    request.required_level = args.level;
    request.knowledge_base_ids = store.config().retrieval.knowledge_base_ids.clone();
    if let Some(path) = &args.reference_file {
        request.reference_context =
            fs::read_to_string(path).map_err(|source| CliError::Io {
                path: path.clone(),
                source,
            })?;
    }

    let generator =
        DocumentGenerator::new(&prompts, sink).with_config(store.config().generation.clone());
    let document = generator.generate(
        model.as_ref(),
        retrieval.as_ref(),
        &checkpoints,
        &progress,
        &request,
    )?;

    let markdown_path = output_dir.join("document.md");
    fs::write(&markdown_path, &document.markdown).map_err(|source| CliError::Io {
        path: markdown_path.clone(),
        source,
    })?;

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "《{}》生成完成：{} 节正文（跳过 {} 节），Markdown 已写入 {}。",
            document.title,
            document.completed_sections,
            document.skipped_sections,
            markdown_path.display()
        ),
    ));

    store.touch_llm_interface(selected_llm);
    store.save()?;
    Ok(())
}

fn run_outline(config_path: &Path, args: OutlineArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let selected_llm = select_llm_interface(&store, args.llm_interface.clone())?;
    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let output_dir = resolve_output_dir(&store, args.output.clone());

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("使用 LLM 接口：{selected_llm}"),
    ));

    let model = create_llm_adapter(store.config(), &selected_llm)?;
    let retrieval = build_retrieval(&store, sink)?;
    let progress = StdoutProgress::new();

    let mut request = DocumentRequest::new(args.prompt);
    request.required_level = args.level;
    request.knowledge_base_ids = store.config().retrieval.knowledge_base_ids.clone();

    let generator =
        DocumentGenerator::new(&prompts, sink).with_config(store.config().generation.clone());
    let (tree, requirements) =
        generator.build_outline(model.as_ref(), retrieval.as_ref(), &progress, &request)?;

    println!("《{}》（层级 {}）", tree.title, requirements.required_level);
    for chapter in &tree.children {
        print_node(chapter);
    }

    let checkpoints = FileCheckpointStore::new(&output_dir);
    if let Err(err) = checkpoints.save_outline(&tree) {
        sink.log(LogRecord::new(
            LogLevel::Warn,
            format!("大纲写入失败：{err}"),
        ));
    } else {
        sink.log(LogRecord::new(
            LogLevel::Info,
            format!("大纲已写入 {}。", checkpoints.outline_path().display()),
        ));
    }

    store.touch_llm_interface(selected_llm);
    store.save()?;
    Ok(())
}

fn run_test_llm(config_path: &Path, args: TestLlmArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let selected_llm = select_llm_interface(&store, args.llm_interface)?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("测试 LLM 接口：{selected_llm}"),
    ));

    let model = create_llm_adapter(store.config(), &selected_llm)?;
    let response = model
        .generate("请回复两个字：正常", 0.1, Some(64))
        .map_err(|err| CliError::LlmTest(err.to_string()))?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("接口返回：{}", response.trim()),
    ));

    store.touch_llm_interface(selected_llm);
    store.save()?;
    Ok(())
}

fn print_node(node: &OutlineNode) {
    let indent = "  ".repeat(node.level as usize);
    if node.expected_word_count > 0 {
        println!("{indent}- {}（约{}字）", node.title, node.expected_word_count);
    } else {
        println!("{indent}- {}", node.title);
    }
    for child in &node.children {
        print_node(child);
    }
}

fn select_llm_interface(
    store: &ConfigStore,
    requested: Option<String>,
) -> Result<String, CliError> {
    if let Some(name) = requested {
        if store.config().get_llm_profile(&name).is_none() {
            return Err(CliError::UnknownLlmProfile(name));
        }
        return Ok(name);
    }
    if let Some(name) = store.last_llm_interface() {
        return Ok(name.to_string());
    }
    store
        .config()
        .primary_llm_profile()
        .map(|(name, _)| name.clone())
        .ok_or(CliError::NoLlmProfile)
}

fn resolve_output_dir(store: &ConfigStore, requested: Option<PathBuf>) -> PathBuf {
    requested.unwrap_or_else(|| {
        let configured = store.config().output.directory.trim();
        if configured.is_empty() {
            PathBuf::from("output")
        } else {
            PathBuf::from(configured)
        }
    })
}

fn build_retrieval(
    store: &ConfigStore,
    sink: &dyn LogSink,
) -> Result<Box<dyn KnowledgeSearch>, CliError> {
    let retrieval = &store.config().retrieval;
    if !retrieval.is_meaningful() {
        return Ok(Box::new(NoRetrieval));
    }
    match HttpKnowledgeSearch::from_config(retrieval) {
        Ok(search) => Ok(Box::new(search)),
        Err(err) => {
            sink.log(LogRecord::new(
                LogLevel::Warn,
                format!("检索服务初始化失败，将不注入知识库上下文：{err}"),
            ));
            Ok(Box::new(NoRetrieval))
        }
    }
}

#[derive(Parser)]
#[command(name = "docgen", about = "AI 文档大纲与正文生成引擎", version)]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 从写作指令生成完整文档
    Generate(GenerateArgs),
    /// 只生成大纲，不写正文
    Outline(OutlineArgs),
    /// 配置相关操作
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// 测试 LLM 接口连通性
    TestLlm(TestLlmArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// 写作指令
    prompt: String,
    /// 输出目录，缺省用配置中的 output.directory
    #[arg(long)]
    output: Option<PathBuf>,
    /// 使用的 LLM profile 名称
    #[arg(long)]
    llm_interface: Option<String>,
    /// 大纲层级缺省值（1-4），指令中解析出的层级优先
    #[arg(long)]
    level: Option<u32>,
    /// 作为参考资料注入的本地文件
    #[arg(long)]
    reference_file: Option<PathBuf>,
}

#[derive(Args)]
struct OutlineArgs {
    /// 写作指令
    prompt: String,
    /// 输出目录
    #[arg(long)]
    output: Option<PathBuf>,
    /// 使用的 LLM profile 名称
    #[arg(long)]
    llm_interface: Option<String>,
    /// 大纲层级缺省值（1-4）
    #[arg(long)]
    level: Option<u32>,
}

#[derive(Args)]
struct TestLlmArgs {
    /// 使用的 LLM profile 名称
    #[arg(long)]
    llm_interface: Option<String>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("配置读写失败: {0}")]
    Config(#[from] ConfigError),
    #[error("提示词加载失败: {0}")]
    Prompt(#[from] PromptError),
    #[error("适配器初始化失败: {0}")]
    Adapter(#[from] AdapterError),
    #[error("文档生成失败: {0}")]
    Generate(#[from] GenerateError),
    #[error("大纲生成失败: {0}")]
    Outline(#[from] OutlineError),
    #[error("读写 `{path}` 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("未配置任何 LLM profile，请先在配置文件中添加 llm_profiles")]
    NoLlmProfile,
    #[error("LLM profile `{0}` 不存在")]
    UnknownLlmProfile(String),
    #[error("LLM 接口测试失败: {0}")]
    LlmTest(String),
}
