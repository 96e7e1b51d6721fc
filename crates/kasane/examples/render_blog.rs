//! Render the bundled `simple` theme's index page for a few posts.
//!
//! ```sh
//! RUST_LOG=kasane=debug cargo run -p kasane --example render_blog
//! ```

use kasane::{Context, Engine, EngineConfig, Theme, WhitespaceControl};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> kasane::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = EngineConfig::default().with_whitespace(WhitespaceControl::Trim);
    let engine = Engine::with_config(Theme::embedded(), config);

    let context = Context::from_json(json!({
        "root": "/blog",
        "site_name": "Kasane Notes",
        "posts": [
            {"title": "Block inheritance", "url": "/posts/blocks.html", "datetime": "2024-01-01"},
            {"title": "Escaping <script> & friends", "url": "/posts/escaping.html", "datetime": "2024-02-14"}
        ]
    }))?;

    let stdout = std::io::stdout();
    engine.render_to("index.tpl", &context, &mut stdout.lock())?;
    Ok(())
}
