//! File-backed templates: layouts, partials and includes loaded from
//! tests/fixtures/templates/.

use kasane::{Context, Engine, EngineConfig, FileSystemLoader, KasaneError, WhitespaceControl};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn templates_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("templates")
}

fn fixture_engine() -> Engine {
    let loader = FileSystemLoader::new(templates_dir()).unwrap();
    Engine::with_config(
        loader,
        EngineConfig::default().with_whitespace(WhitespaceControl::Trim),
    )
}

fn site_context(extra: serde_json::Value) -> Context {
    let mut data = json!({
        "site": "Kasane",
        "nav": [
            {"url": "/", "label": "Home"},
            {"url": "/about.html", "label": "About"}
        ]
    });
    if let (Some(data), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            data.insert(key.clone(), value.clone());
        }
    }
    Context::from_json(data).unwrap()
}

const NAV: &str = r#"<nav><a href="/">Home</a><a href="/about.html">About</a></nav>"#;

// ============================================================================
// Layout chains from disk
// ============================================================================

#[test]
fn three_level_chain_with_include() {
    let engine = fixture_engine();
    let html = engine
        .render("pages/about.tpl", &site_context(json!({"about": "Hi & bye"})))
        .unwrap();

    let expected = format!(
        "<html>\n<head><title>About - Kasane</title></head>\n<body>\n{NAV}\n<article><p>Hi &amp; bye</p></article></body>\n</html>\n"
    );
    assert_eq!(html, expected);
}

#[test]
fn include_inside_loop() {
    let engine = fixture_engine();
    let context = site_context(json!({
        "posts": [
            {"title": "A", "summary": "x"},
            {"title": "B<", "summary": ""}
        ]
    }));
    let html = engine.render("pages/index.tpl", &context).unwrap();

    let expected = format!(
        concat!(
            "<html>\n<head><title>Kasane</title></head>\n<body>\n{}\n",
            "<div class=\"card\"><h2>A</h2><p>x</p></div>\n",
            "<div class=\"card\"><h2>B&lt;</h2></div>\n",
            "</body>\n</html>\n"
        ),
        NAV
    );
    assert_eq!(html, expected);
}

#[test]
fn layout_renders_its_own_defaults() {
    let engine = fixture_engine();
    let html = engine.render("layouts/base.tpl", &site_context(json!({}))).unwrap();
    assert!(html.contains("<title>Kasane</title>"));
    assert!(html.contains("<p>empty</p>"));
}

#[test]
fn resolved_template_records_every_source() {
    let engine = fixture_engine();
    let resolved = engine.resolved("pages/about.tpl").unwrap();
    for name in [
        "pages/about.tpl",
        "layouts/article.tpl",
        "layouts/base.tpl",
        "partials/nav.tpl",
    ] {
        assert!(resolved.depends_on(name), "should depend on {name}");
    }
    assert!(!resolved.depends_on("partials/card.tpl"));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn include_cycle_across_files() {
    let engine = fixture_engine();
    match engine.render("pages/loop.tpl", &site_context(json!({}))) {
        Err(KasaneError::CyclicInclude { cycle }) => assert_eq!(
            cycle,
            vec![
                "partials/loop_a.tpl",
                "partials/loop_b.tpl",
                "partials/loop_a.tpl"
            ]
        ),
        other => panic!("Expected CyclicInclude, got {other:?}"),
    }
}

#[test]
fn include_cannot_leave_the_root() {
    let engine = fixture_engine();
    let result = engine.render("pages/escape.tpl", &site_context(json!({})));
    assert!(matches!(
        result,
        Err(KasaneError::InvalidTemplateName { name, .. }) if name == "../secret.tpl"
    ));
}

#[test]
fn traversal_and_absolute_names_are_rejected() {
    let engine = fixture_engine();
    let context = Context::new();
    for name in ["../Cargo.toml", "/etc/passwd", "pages/../../x.tpl", "pages\\about.tpl", ""] {
        assert!(
            matches!(
                engine.render(name, &context),
                Err(KasaneError::InvalidTemplateName { .. })
            ),
            "{name:?} should be rejected"
        );
    }
}

#[test]
fn missing_file_is_not_found() {
    let engine = fixture_engine();
    assert!(matches!(
        engine.render("pages/missing.tpl", &Context::new()),
        Err(KasaneError::NotFound { name }) if name == "pages/missing.tpl"
    ));
}

// ============================================================================
// Editing templates on disk
// ============================================================================

#[test]
fn invalidate_rereads_changed_parent() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("base.tpl"), "[{% block b %}{% endblock %}]").unwrap();
    fs::write(
        dir.path().join("page.tpl"),
        r#"{% extends "base.tpl" %}{% block b %}{{ x }}{% endblock %}"#,
    )
    .unwrap();

    let engine = Engine::new(FileSystemLoader::new(dir.path()).unwrap());
    let mut context = Context::new();
    context.insert("x", "page");
    assert_eq!(engine.render("page.tpl", &context).unwrap(), "[page]");

    fs::write(dir.path().join("base.tpl"), "({% block b %}{% endblock %})").unwrap();
    // Cached until told otherwise
    assert_eq!(engine.render("page.tpl", &context).unwrap(), "[page]");

    engine.invalidate("base.tpl");
    assert_eq!(engine.render("page.tpl", &context).unwrap(), "(page)");
}

#[test]
fn deleted_template_surfaces_after_clear() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("t.tpl"), "hello").unwrap();

    let engine = Engine::new(FileSystemLoader::new(dir.path()).unwrap());
    assert_eq!(engine.render("t.tpl", &Context::new()).unwrap(), "hello");

    fs::remove_file(dir.path().join("t.tpl")).unwrap();
    engine.clear();
    assert!(matches!(
        engine.render("t.tpl", &Context::new()),
        Err(KasaneError::NotFound { .. })
    ));
}
