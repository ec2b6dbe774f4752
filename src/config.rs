use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// 编译与渲染选项
///
/// 除下列已识别的键之外，其余键全部收集到 `data`，作为模板中可直接引用的变量。
#[derive(Debug, Clone, Deserialize)]
pub struct Options {
    #[serde(default = "default_open")]
    pub open: String,
    #[serde(default = "default_close")]
    pub close: String,
    /// 折叠字面文本中的空白与换行
    #[serde(default = "default_true")]
    pub eatspace: bool,
    /// 按 filename 缓存编译结果
    #[serde(default)]
    pub cache: bool,
    #[serde(default)]
    pub filename: Option<String>,
    /// 编译时通过日志输出中间过程体
    #[serde(default)]
    pub debug: bool,
    /// 后备变量表，同名时被顶层变量遮蔽
    #[serde(default)]
    pub locals: Map<String, Value>,
    /// 模板中 `this` 的取值
    #[serde(default)]
    pub scope: Value,
    /// 视图布局模板，相对 `views` 目录
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub views: Option<PathBuf>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// ejs.toml 项目配置
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub options: Options,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置一个模板变量
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn eatspace(mut self, eatspace: bool) -> Self {
        self.eatspace = eatspace;
        self
    }

    pub fn delimiters(mut self, open: impl Into<String>, close: impl Into<String>) -> Self {
        self.open = open.into();
        self.close = close.into();
        self
    }

    pub fn locals(mut self, locals: Map<String, Value>) -> Self {
        self.locals = locals;
        self
    }

    /// 模板可见的值对象：已识别的选项字段在前，`data` 中的同名键覆盖它们
    pub fn values(&self) -> Map<String, Value> {
        let mut values = Map::new();
        values.insert("open".into(), Value::String(self.open.clone()));
        values.insert("close".into(), Value::String(self.close.clone()));
        values.insert("eatspace".into(), Value::Bool(self.eatspace));
        values.insert("cache".into(), Value::Bool(self.cache));
        values.insert("debug".into(), Value::Bool(self.debug));
        if let Some(filename) = &self.filename {
            values.insert("filename".into(), Value::String(filename.clone()));
        }
        if let Some(layout) = &self.layout {
            values.insert("layout".into(), Value::String(layout.clone()));
        }
        if let Some(views) = &self.views {
            values.insert("views".into(), Value::String(views.display().to_string()));
        }
        values.extend(self.data.clone());
        values
    }

    /// 从 JSON 文本解析选项，顶层必须是对象
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("解析 JSON 选项失败")
    }

    /// 合并外部数据文件：数据中的键作为模板变量，已识别的选项键同样生效
    pub fn merge(mut self, other: Options) -> Self {
        let defaults = Options::default();
        if other.open != defaults.open {
            self.open = other.open;
        }
        if other.close != defaults.close {
            self.close = other.close;
        }
        if !other.eatspace {
            self.eatspace = false;
        }
        self.cache |= other.cache;
        self.debug |= other.debug;
        self.filename = other.filename.or(self.filename);
        self.layout = other.layout.or(self.layout);
        self.views = other.views.or(self.views);
        if !other.scope.is_null() {
            self.scope = other.scope;
        }
        self.locals.extend(other.locals);
        self.data.extend(other.data);
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            open: default_open(),
            close: default_close(),
            eatspace: true,
            cache: false,
            filename: None,
            debug: false,
            locals: Map::new(),
            scope: Value::Null,
            layout: None,
            views: None,
            data: Map::new(),
        }
    }
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("读取 {} 失败", path.display()))?;
        let config: ProjectConfig = toml::from_str(&content)
            .with_context(|| format!("解析 {} 失败", path.display()))?;
        Ok(config)
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            options: Options::default(),
        }
    }
}

// 默认值函数
fn default_open() -> String { "<%".into() }
fn default_close() -> String { "%>".into() }
fn default_true() -> bool { true }
fn default_log_level() -> String { "info".into() }

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_keys_become_template_data() {
        let opts = Options::from_json(r#"{"name": "tj", "cache": true, "filename": "a.ejs", "locals": {"x": 1}}"#)
            .unwrap();
        assert!(opts.cache);
        assert!(opts.eatspace);
        assert_eq!(opts.filename.as_deref(), Some("a.ejs"));
        assert_eq!(opts.data.get("name"), Some(&json!("tj")));
        assert_eq!(opts.locals.get("x"), Some(&json!(1)));
        assert!(!opts.data.contains_key("cache"));
    }

    #[test]
    fn project_config_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ejs.toml");
        std::fs::write(
            &path,
            "log_level = \"debug\"\n\n[options]\nopen = \"{{\"\nclose = \"}}\"\neatspace = false\ntitle = \"Home\"\n",
        )
        .unwrap();

        let config = ProjectConfig::load(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.options.open, "{{");
        assert!(!config.options.eatspace);
        assert_eq!(config.options.data.get("title"), Some(&json!("Home")));
    }

    #[test]
    fn values_include_recognised_fields() {
        let opts = Options::new().filename("a.ejs").set("cache", "shadowed");
        let values = opts.values();
        assert_eq!(values.get("filename"), Some(&json!("a.ejs")));
        assert_eq!(values.get("open"), Some(&json!("<%")));
        assert_eq!(values.get("eatspace"), Some(&json!(true)));
        assert_eq!(values.get("cache"), Some(&json!("shadowed")));
        assert!(!values.contains_key("layout"));
    }

    #[test]
    fn merge_prefers_incoming_values() {
        let base = Options::new().set("a", 1).set("b", 2);
        let merged = base.merge(Options::new().set("b", 3).filename("x.ejs"));
        assert_eq!(merged.data.get("a"), Some(&json!(1)));
        assert_eq!(merged.data.get("b"), Some(&json!(3)));
        assert_eq!(merged.filename.as_deref(), Some("x.ejs"));
    }
}
