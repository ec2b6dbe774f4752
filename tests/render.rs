use ejs::{EjsError, Options, Renderer};
use serde_json::json;

#[test]
fn tagless_source_renders_verbatim() {
    let source = "<!doctype html><title>plain</title> text, no tags.";
    assert_eq!(ejs::render(source, &Options::new()).unwrap(), source);

    let spaced = "line one\n\tline two\n";
    assert_eq!(ejs::render(spaced, &Options::new().eatspace(false)).unwrap(), spaced);
}

#[test]
fn compiling_twice_gives_same_output() {
    let source = "<ul><% for (const u of users) { %><li><%= u %></li><% } %></ul>";
    let opts = Options::new().set("users", json!(["tj", "sven"]));
    let first = ejs::compile(source, &Options::new()).unwrap();
    let second = ejs::compile(source, &Options::new()).unwrap();
    assert!(!first.ptr_eq(&second));
    assert_eq!(first.render(&opts).unwrap(), "<ul><li>tj</li><li>sven</li></ul>");
    assert_eq!(first.render(&opts).unwrap(), second.render(&opts).unwrap());
}

#[test]
fn clear_cache_recompiles() {
    let renderer = Renderer::new();
    let opts = Options::new().cache(true).filename("greeting.ejs").set("name", "tj");

    let before = renderer.render("Hi <%= name %>", &opts).unwrap();
    renderer.render("Hi <%= name %>", &opts).unwrap();
    assert_eq!(renderer.compile_count(), 1);

    renderer.clear_cache();
    let after = renderer.render("Hi <%= name %>", &opts).unwrap();
    assert_eq!(renderer.compile_count(), 2);
    assert_eq!(before, after);
}

#[test]
fn escaped_and_raw_output() {
    let opts = Options::new().set("value", "<b>");
    let escaped = ejs::render("<%= value %>", &opts).unwrap();
    assert!(!escaped.contains("<b>"));
    assert_eq!(escaped, "&lt;b&gt;");
    assert_eq!(ejs::render("<%- value %>", &opts).unwrap(), "<b>");
}

#[test]
fn filter_pipeline() {
    let mut renderer = Renderer::new();
    renderer.add_filter("upper", |v, _| Ok(json!(ejs::template::value::display(v).to_uppercase())));
    let out = renderer.render("<%=: name | upper %>", &Options::new().set("name", "ok")).unwrap();
    assert_eq!(out, "OK");

    let out = ejs::render(
        "<%=: users | map:'name' | join:' & ' %>",
        &Options::new().set("users", json!([{"name": "a"}, {"name": "b"}])),
    )
    .unwrap();
    assert_eq!(out, "a &amp; b");
}

#[test]
fn failing_line_is_framed() {
    let source = (1..=10)
        .map(|n| if n == 5 { "<%= missing.value %>".to_string() } else { format!("line {n}") })
        .collect::<Vec<_>>()
        .join("\n");
    let err = ejs::render(&source, &Options::new().filename("ten.ejs")).unwrap_err();
    assert!(matches!(err, EjsError::Render { line: 5, .. }));

    let msg = err.to_string();
    assert!(msg.starts_with("ten.ejs:5\n"));
    assert!(msg.contains(" >> 5| <%= missing.value %>"));
    for n in [2, 3, 4, 6, 7, 8] {
        assert!(msg.contains(&format!("    {n}| line {n}")), "line {n} missing from frame:\n{msg}");
    }
    assert!(!msg.contains("1| line 1"));
    assert!(!msg.contains("9| line 9"));
    assert!(msg.ends_with("missing 未定义"));
}

#[test]
fn frame_is_clamped_near_edges() {
    let err = ejs::render("<%= nope %>\nb\nc", &Options::new()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.starts_with("ejs:1\n >> 1| <%= nope %>\n    2| b\n    3| c\n\n"));
}

#[test]
fn trim_marker_eats_newline() {
    assert_eq!(ejs::render("a<%- 1 -%>\nb", &Options::new()).unwrap(), "a1b");
    assert_eq!(ejs::render("a<%- 1 -%>\nb", &Options::new().eatspace(false)).unwrap(), "a1b");
}

#[test]
fn whitespace_collapse() {
    assert_eq!(ejs::render("a   b", &Options::new()).unwrap(), "a b");
    assert_eq!(ejs::render("a   b", &Options::new().eatspace(false)).unwrap(), "a   b");
}

#[test]
fn whitespace_around_tags_and_line_breaks() {
    let opts = Options::new().set("x", "X");
    let cases = [
        ("a <%= x %> b", "a Xb"),
        ("a <% if (true) { %> b<% } %>", "a b"),
        ("<p><%= x %>\n</p>", "<p>X</p>"),
        ("<p><% %>\n</p>", "<p></p>"),
        ("a \nb", "a  b"),
        ("a\n b", "a b"),
        ("a \r b", "a b"),
        ("a \t b", "a b"),
        ("a\t\tb", "ab"),
        ("<b>\n\n<i>", "<b><i>"),
        ("<b> \n<i>", "<b>  <i>"),
    ];
    for (source, expected) in cases {
        assert_eq!(ejs::render(source, &opts).unwrap(), expected, "{source:?}");
    }

    let keep = opts.eatspace(false);
    assert_eq!(ejs::render("a\r\n\tb", &keep).unwrap(), "a \n\tb");
    assert_eq!(ejs::render("<p><%= x %>\n</p>", &keep).unwrap(), "<p>X\n</p>");
}

#[test]
fn cache_without_filename_always_fails() {
    for source in ["", "plain", "<%= x %>", "<% if (x { %>"] {
        let err = ejs::render(source, &Options::new().cache(true)).unwrap_err();
        assert!(matches!(err, EjsError::CacheWithoutFilename), "{source:?}: {err}");
    }
}

#[test]
fn locals_and_scope() {
    let mut locals = serde_json::Map::new();
    locals.insert("site".into(), json!("blog"));
    locals.insert("title".into(), json!("fallback"));
    let mut opts = Options::new().set("title", "Home").locals(locals);
    opts.scope = json!({"user": "tj"});

    let out = ejs::render("<%= title %>|<%= site %>|<%= this.user %>", &opts).unwrap();
    assert_eq!(out, "Home|blog|tj");
}

#[test]
fn options_are_visible_to_templates() {
    let out = ejs::render("<%= filename %>", &Options::new().filename("a.ejs")).unwrap();
    assert_eq!(out, "a.ejs");

    let opts = Options::new().filename("a.ejs").set("filename", "override");
    assert_eq!(ejs::render("<%= filename %>", &opts).unwrap(), "override");
}

#[test]
fn for_each_callback_renders_items() {
    let source = "<ul><% users.forEach(function(u){ %><li><%= u %></li><% }) %></ul>";
    let out = ejs::render(source, &Options::new().set("users", json!(["tj", "sven"]))).unwrap();
    assert_eq!(out, "<ul><li>tj</li><li>sven</li></ul>");
}

#[test]
fn free_functions_share_the_default_cache() {
    let opts = Options::new().cache(true).filename("shared-default.ejs").set("n", 1);
    assert_eq!(ejs::render("<%= n %>", &opts).unwrap(), "1");
    let cached = ejs::default_renderer().cache().template("shared-default.ejs");
    assert_eq!(cached.and_then(|t| t.filename().map(str::to_string)).as_deref(), Some("shared-default.ejs"));
}

#[test]
fn unterminated_tag_is_a_scan_error() {
    let err = ejs::compile("ok\n<%= oops", &Options::new().filename("cut.ejs")).unwrap_err();
    assert_eq!(err.line(), Some(2));
    assert_eq!(err.path(), Some("cut.ejs"));
    assert!(err.to_string().contains(" >> 2| <%= oops"));
}

#[test]
fn parse_exposes_segments() {
    let body = ejs::parse("a<%= b %>", &Options::new()).unwrap();
    assert_eq!(body.segments.len(), 2);
    assert_eq!(body.to_string(), "      text    \"a\"\n0001  escape  b");
}
