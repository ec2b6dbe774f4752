//! 嵌入式模板编译器
//!
//! 模板是夹带 `<% %>` 标签的普通文本：`<%= expr %>` 输出转义后的值，
//! `<%- expr %>` 原样输出，`<% code %>` 只执行代码，`<%=: value | filter:arg %>`
//! 是过滤器管道。编译结果可以反复渲染，运行期错误附带出错行附近的源码。
//!
//! ```
//! let out = ejs::render("<p><%= name %></p>", &ejs::Options::new().set("name", "<tj>")).unwrap();
//! assert_eq!(out, "<p>&lt;tj&gt;</p>");
//! ```

pub mod config;
pub mod render;
pub mod template;

pub use config::{Options, ProjectConfig};
pub use render::Renderer;
pub use render::cache::TemplateCache;
pub use render::view::render_view;
pub use template::{EjsError, Environment, ProcedureBody, RuntimeError, Segment, Template};

use std::path::Path;
use std::sync::LazyLock;

/// 自由函数共用的默认渲染器
static DEFAULT: LazyLock<Renderer> = LazyLock::new(Renderer::new);

pub fn default_renderer() -> &'static Renderer {
    &DEFAULT
}

/// 扫描模板源码，返回中间过程体
pub fn parse(source: &str, options: &Options) -> Result<ProcedureBody, EjsError> {
    DEFAULT.parse(source, options)
}

pub fn compile(source: &str, options: &Options) -> Result<Template, EjsError> {
    DEFAULT.compile(source, options)
}

pub fn render(source: &str, options: &Options) -> Result<String, EjsError> {
    DEFAULT.render(source, options)
}

pub async fn render_file(path: impl AsRef<Path>, options: Options) -> Result<String, EjsError> {
    DEFAULT.render_file(path, options).await
}

pub fn clear_cache() {
    DEFAULT.clear_cache();
}
