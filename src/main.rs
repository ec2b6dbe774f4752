use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ejs::template::codegen;
use ejs::{Options, ProjectConfig};
use serde_json::Value;
use std::path::{Path, PathBuf};

mod check;

#[derive(Parser)]
#[command(name = "ejs", about = "嵌入式模板编译器", version = long_version())]
struct Cli {
    /// 项目配置文件（默认读取当前目录下的 ejs.toml，不存在时忽略）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 渲染模板文件
    Render {
        file: PathBuf,

        /// JSON 数据文件，顶层对象的键作为模板变量
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// 单个变量，值按 JSON 解析，解析失败时作为字符串
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// 输出文件（默认标准输出）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 布局模板
        #[arg(long)]
        layout: Option<String>,

        /// 布局模板所在目录
        #[arg(long)]
        views: Option<PathBuf>,

        #[command(flatten)]
        syntax: SyntaxArgs,
    },

    /// 输出模板的中间过程体
    Parse {
        file: PathBuf,

        #[command(flatten)]
        syntax: SyntaxArgs,
    },

    /// 编译模板，报告语法错误
    Check {
        /// 模板文件或目录
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        syntax: SyntaxArgs,
    },
}

#[derive(Args)]
struct SyntaxArgs {
    /// 开始分隔符
    #[arg(long)]
    open: Option<String>,

    /// 结束分隔符
    #[arg(long)]
    close: Option<String>,

    /// 保留字面文本中的空白与换行
    #[arg(long)]
    keep_space: bool,

    /// 编译时输出中间过程体
    #[arg(long)]
    debug: bool,
}

impl SyntaxArgs {
    fn apply(&self, mut options: Options) -> Options {
        if let Some(open) = &self.open {
            options.open = open.clone();
        }
        if let Some(close) = &self.close {
            options.close = close.clone();
        }
        if self.keep_space {
            options.eatspace = false;
        }
        options.debug |= self.debug;
        options
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    let renderer = ejs::default_renderer();

    match cli.command {
        Commands::Render {
            file,
            data,
            set,
            output,
            layout,
            views,
            syntax,
        } => {
            let mut options = syntax.apply(config.options);
            if let Some(data) = data {
                let json = std::fs::read_to_string(&data)
                    .with_context(|| format!("读取数据文件 {} 失败", data.display()))?;
                options = options.merge(Options::from_json(&json)?);
            }
            for pair in &set {
                let (key, value) = parse_assignment(pair)?;
                options = options.set(key, value);
            }
            options.layout = layout.or(options.layout);
            options.views = views.or(options.views);

            let html = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(ejs::render_view(renderer, &file, options))?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &html).with_context(|| format!("写入 {} 失败", path.display()))?;
                    tracing::info!("已渲染 {} → {}", file.display(), path.display());
                }
                None => print!("{html}"),
            }
        }
        Commands::Parse { file, syntax } => {
            let options = syntax.apply(config.options);
            let source =
                std::fs::read_to_string(&file).with_context(|| format!("读取 {} 失败", file.display()))?;
            let body = renderer.parse(&source, &options.filename(file.display().to_string()))?;
            println!("{}", codegen::generate(&body));
        }
        Commands::Check { paths, syntax } => {
            let options = syntax.apply(config.options);
            let result = check::run(renderer, &paths, &options)?;

            for w in &result.warnings {
                tracing::warn!("{w}");
            }
            for e in &result.errors {
                tracing::error!("{e}");
            }

            if result.errors.is_empty() {
                tracing::info!("检查通过：{} 个模板（{} 个警告）", result.checked, result.warnings.len());
            } else {
                anyhow::bail!(
                    "检查未通过：{} 个错误，{} 个警告",
                    result.errors.len(),
                    result.warnings.len()
                );
            }
        }
    }

    Ok(())
}

/// 显式指定的配置文件必须存在；默认的 ejs.toml 缺失时使用默认配置
fn load_config(path: Option<&Path>) -> Result<ProjectConfig> {
    match path {
        Some(path) => ProjectConfig::load(path),
        None => {
            let default = Path::new("ejs.toml");
            if default.exists() {
                ProjectConfig::load(default)
            } else {
                Ok(ProjectConfig::default())
            }
        }
    }
}

/// 解析 `--set key=value`
fn parse_assignment(pair: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = pair.split_once('=') else {
        anyhow::bail!("--set 需要 KEY=VALUE 形式：{pair}");
    };
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("--set 的变量名不能为空：{pair}");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

const fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        "\ncommit:  ",
        env!("EJS_GIT_COMMIT"),
        "\nbuild:   ",
        env!("EJS_BUILD_TIME"),
        "\ntarget:  ",
        env!("EJS_BUILD_TARGET"),
        "\nprofile: ",
        env!("EJS_BUILD_PROFILE"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_values_parse_as_json_or_string() {
        assert_eq!(parse_assignment("n=3").unwrap(), ("n".to_string(), json!(3)));
        assert_eq!(parse_assignment("tags=[\"a\"]").unwrap().1, json!(["a"]));
        assert_eq!(parse_assignment("name=tj").unwrap().1, json!("tj"));
        assert_eq!(parse_assignment("eq=a=b").unwrap().1, json!("a=b"));
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=1").is_err());
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
