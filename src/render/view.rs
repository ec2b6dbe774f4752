use crate::config::Options;
use crate::render::Renderer;
use crate::template::EjsError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 视图渲染：先渲染内容模板，再按需套用布局
///
/// 布局路径相对 `options.views`（默认当前目录），省略扩展名时补 `.ejs`。
/// 内容以 `body` 注入布局，布局中用 `<%- body %>` 输出。
pub async fn render_view(renderer: &Renderer, path: impl AsRef<Path>, options: Options) -> Result<String, EjsError> {
    let content = renderer.render_file(path.as_ref(), options.clone()).await?;

    let Some(layout) = options.layout.as_deref() else {
        return Ok(content);
    };
    let layout_path = resolve_layout(options.views.as_deref(), layout);
    debug!(layout = %layout_path.display(), "套用布局");

    let mut layout_options = options.clone();
    layout_options.layout = None;
    layout_options.data.insert("body".to_string(), Value::String(content));
    renderer.render_file(&layout_path, layout_options).await
}

fn resolve_layout(views: Option<&Path>, layout: &str) -> PathBuf {
    let mut path = views.unwrap_or(Path::new(".")).join(layout);
    if path.extension().is_none() {
        path.set_extension("ejs");
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        assert_eq!(resolve_layout(None, "layout"), PathBuf::from("./layout.ejs"));
        assert_eq!(
            resolve_layout(Some(Path::new("views")), "base.html"),
            PathBuf::from("views/base.html")
        );
    }

    #[tokio::test]
    async fn content_without_layout() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("page.ejs");
        std::fs::write(&page, "<h1><%= title %></h1>").unwrap();

        let out = render_view(&Renderer::new(), &page, Options::new().set("title", "Hi")).await.unwrap();
        assert_eq!(out, "<h1>Hi</h1>");
    }
}
