use std::path::PathBuf;
use thiserror::Error;

/// 编译与渲染阶段对外暴露的错误
#[derive(Debug, Error)]
pub enum EjsError {
    #[error("\"cache\" 选项需要同时提供 \"filename\"")]
    CacheWithoutFilename,

    #[error("标签分隔符必须非空且互不相同：open={open:?} close={close:?}")]
    InvalidDelimiters { open: String, close: String },

    #[error("{}", format_error(path, *line, context, &format!("未闭合的标签，缺少 '{}'", close)))]
    UnterminatedTag {
        path: Option<String>,
        line: usize,
        close: String,
        context: String,
    },

    #[error("{}", format_error(path, *line, context, message))]
    Syntax {
        path: Option<String>,
        line: usize,
        message: String,
        context: String,
    },

    #[error("{}", format_error(path, *line, context, &cause.to_string()))]
    Render {
        path: Option<String>,
        line: usize,
        context: String,
        #[source]
        cause: RuntimeError,
    },

    #[error("读取模板 {} 失败：{source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 模板脚本执行期间的原始错误，尚未附加源码上下文
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("{0} 未定义")]
    Undefined(String),

    #[error("未知过滤器：{0}")]
    UnknownFilter(String),

    #[error("过滤器 {name} 执行失败：{message}")]
    Filter { name: String, message: String },

    #[error("{0} 不是函数")]
    NotAFunction(String),

    #[error("函数 {name} 执行失败：{message}")]
    Function { name: String, message: String },

    #[error("无法读取 {target} 的属性 '{property}'")]
    NullProperty { target: String, property: String },

    #[error("{0}")]
    Type(String),
}

fn format_error(path: &Option<String>, line: usize, context: &str, message: &str) -> String {
    format!("{}:{}\n{}\n\n{}", path.as_deref().unwrap_or("ejs"), line, context, message)
}

impl EjsError {
    pub fn unterminated(path: Option<&str>, line: usize, close: &str, source: &str) -> Self {
        Self::UnterminatedTag {
            path: path.map(str::to_string),
            line,
            close: close.to_string(),
            context: source_frame(source, line),
        }
    }

    pub fn syntax(path: Option<&str>, line: usize, message: impl Into<String>, source: &str) -> Self {
        Self::Syntax {
            path: path.map(str::to_string),
            line,
            message: message.into(),
            context: source_frame(source, line),
        }
    }

    /// 模板来源标识（文件名），未配置时为 None
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::UnterminatedTag { path, .. } | Self::Syntax { path, .. } | Self::Render { path, .. } => {
                path.as_deref()
            }
            _ => None,
        }
    }

    /// 出错位置所在的源码行号（从 1 开始）
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::UnterminatedTag { line, .. } | Self::Syntax { line, .. } | Self::Render { line, .. } => {
                Some(*line)
            }
            _ => None,
        }
    }
}

/// 用原始源码、来源标识和出错行号改写执行错误
///
/// 结果始终返回给调用方，不做任何恢复或重试。
pub fn rethrow(cause: RuntimeError, source: &str, path: Option<&str>, line: usize) -> EjsError {
    EjsError::Render {
        path: path.map(str::to_string),
        line,
        context: source_frame(source, line),
        cause,
    }
}

/// 出错行前后各 3 行的源码摘录，出错行以 " >> " 标记
pub fn source_frame(source: &str, line: usize) -> String {
    let lines: Vec<&str> = source.split('\n').collect();
    let start = line.saturating_sub(3).max(1);
    let end = (line + 3).min(lines.len());

    (start..=end)
        .map(|n| {
            let gutter = if n == line { " >> " } else { "    " };
            format!("{gutter}{n}| {}", lines.get(n - 1).unwrap_or(&""))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
