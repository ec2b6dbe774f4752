use ejs::{EjsError, Options, Renderer, render_view};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn renders_file_with_its_path_as_filename() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("user.ejs");
    std::fs::write(&path, "<p>\n  <%= user.name %>\n</p>").unwrap();

    let out = ejs::render_file(&path, Options::new().set("user", serde_json::json!({"name": "tj"})))
        .await
        .unwrap();
    assert_eq!(out, "<p> tj </p>");

    let err = ejs::render_file(&path, Options::new()).await.unwrap_err();
    assert_eq!(err.path(), Some(path.display().to_string().as_str()));
    assert_eq!(err.line(), Some(2));
}

#[tokio::test]
async fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ejs::render_file(dir.path().join("nope.ejs"), Options::new()).await.unwrap_err();
    assert!(matches!(err, EjsError::Io { .. }));
}

#[tokio::test]
async fn cached_source_survives_file_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.ejs");
    std::fs::write(&path, "v1").unwrap();

    let renderer = Renderer::new();
    let opts = Options::new().cache(true);
    assert_eq!(renderer.render_file(&path, opts.clone()).await.unwrap(), "v1");

    std::fs::write(&path, "v2").unwrap();
    assert_eq!(renderer.render_file(&path, opts.clone()).await.unwrap(), "v1");
    assert_eq!(renderer.compile_count(), 1);
    assert_eq!(renderer.cache().len(), 2);

    renderer.clear_cache();
    assert_eq!(renderer.render_file(&path, opts).await.unwrap(), "v2");
    assert_eq!(renderer.compile_count(), 2);
}

#[tokio::test]
async fn callback_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cb.ejs");
    std::fs::write(&path, "<%= 1 + 1 %>").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let renderer = Renderer::new();

    let counter = calls.clone();
    renderer
        .render_file_with(&path, Options::new(), move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(result.unwrap(), "2");
        })
        .await;

    let counter = calls.clone();
    renderer
        .render_file_with(dir.path().join("missing.ejs"), Options::new(), move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert!(result.is_err());
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn layout_wraps_content() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("layout.ejs"), "<main><%- body %></main><%= title %>").unwrap();
    let page = dir.path().join("index.ejs");
    std::fs::write(&page, "<h1><%= title %></h1>").unwrap();

    let mut opts = Options::new().set("title", "Home");
    opts.layout = Some("layout".into());
    opts.views = Some(dir.path().to_path_buf());

    let out = render_view(&Renderer::new(), &page, opts).await.unwrap();
    assert_eq!(out, "<main><h1>Home</h1></main>Home");
}

#[tokio::test]
async fn layout_is_skipped_when_content_fails() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("broken.ejs");
    std::fs::write(&page, "<%= nope %>").unwrap();

    let mut opts = Options::new();
    opts.layout = Some("absent.ejs".into());
    opts.views = Some(dir.path().to_path_buf());

    let err = render_view(&Renderer::new(), &page, opts).await.unwrap_err();
    assert!(matches!(err, EjsError::Render { .. }), "{err}");
}
