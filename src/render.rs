pub mod cache;
pub mod view;

use crate::config::Options;
use crate::render::cache::{Cached, TemplateCache};
use crate::template::{self, EjsError, Environment, ProcedureBody, Template};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// 渲染入口：持有编译环境与模板缓存
///
/// 缓存可以在多个渲染器间共享；过滤器、函数与转义函数在编译时绑定到模板，
/// 修改它们只影响之后编译的模板。
#[derive(Debug)]
pub struct Renderer {
    env: Environment,
    cache: Arc<TemplateCache>,
    /// 实际执行的编译次数（不含缓存命中）
    compiles: AtomicUsize,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self::with_cache(Arc::new(TemplateCache::new()))
    }

    pub fn with_cache(cache: Arc<TemplateCache>) -> Self {
        Self {
            env: Environment::default(),
            cache,
            compiles: AtomicUsize::new(0),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    /// 注册或替换过滤器，模板中通过 `filters.name(...)` 或管道调用
    pub fn add_filter<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.env.filters).add(name, filter);
    }

    /// 注册辅助函数，模板中通过 `name(...)` 或 `funcs.name(...)` 调用
    pub fn add_function<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.env.functions).add(name, function);
    }

    pub fn set_escaper<F>(&mut self, escape: F)
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.env.escape = Arc::new(escape);
    }

    pub fn parse(&self, source: &str, options: &Options) -> Result<ProcedureBody, EjsError> {
        template::parse(source, options)
    }

    /// 编译模板，不经过缓存
    pub fn compile(&self, source: &str, options: &Options) -> Result<Template, EjsError> {
        self.compiles.fetch_add(1, Ordering::Relaxed);
        template::compile(source, options, &self.env)
    }

    /// 渲染模板源码；`options.cache` 为真时按 `options.filename` 复用编译结果
    pub fn render(&self, source: &str, options: &Options) -> Result<String, EjsError> {
        let template = if options.cache {
            let Some(filename) = options.filename.as_deref() else {
                return Err(EjsError::CacheWithoutFilename);
            };
            match self.cache.template(filename) {
                Some(template) => {
                    debug!(filename, "命中模板缓存");
                    template
                }
                None => {
                    let template = self.compile(source, options)?;
                    self.cache.insert(filename, Cached::Template(template.clone()));
                    template
                }
            }
        } else {
            self.compile(source, options)?
        };
        template.render(options)
    }

    /// 读取并渲染模板文件，文件路径同时作为 `filename`
    pub async fn render_file(&self, path: impl AsRef<Path>, mut options: Options) -> Result<String, EjsError> {
        let path = path.as_ref();
        let filename = path.display().to_string();
        let key = TemplateCache::source_key(&filename);
        options.filename = Some(filename);

        let cached = if options.cache { self.cache.source(&key) } else { None };
        let source = match cached {
            Some(source) => source,
            None => {
                debug!(path = %path.display(), "读取模板文件");
                let text = tokio::fs::read_to_string(path).await.map_err(|source| EjsError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let text: Arc<str> = Arc::from(text);
                if options.cache {
                    self.cache.insert(key, Cached::Source(text.clone()));
                }
                text
            }
        };

        self.render(&source, &options)
    }

    /// 回调形式的 [`Renderer::render_file`]，回调恰好执行一次
    pub async fn render_file_with<F>(&self, path: impl AsRef<Path>, options: Options, callback: F)
    where
        F: FnOnce(Result<String, EjsError>),
    {
        callback(self.render_file(path, options).await);
    }

    /// 清空缓存，之后的缓存渲染重新编译
    pub fn clear_cache(&self) {
        self.cache.clear();
        debug!("模板缓存已清空");
    }

    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::Relaxed)
    }
}
