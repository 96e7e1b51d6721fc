//! Kasane - a template composition engine for static HTML generation
//!
//! Kasane resolves chains of templates related by `extends`, merges block
//! overrides across the chain and renders the result against a read-only
//! data context:
//! - HTML escaping by default, opt out per expression with `safe`
//! - Deterministic output with no access to host code
//! - Loops, conditionals, includes and a closed set of filters
//!
//! # Example
//!
//! ```rust
//! use kasane::{Context, Engine, MemoryLoader};
//! use serde_json::json;
//!
//! let loader = MemoryLoader::new()
//!     .with_template("base.tpl", "<main>{% block main %}<p>root</p>{% endblock %}</main>")
//!     .with_template(
//!         "index.tpl",
//!         r#"{% extends "base.tpl" %}{% block main %}{% for post in posts %}<a href="{{ root }}{{ post.url }}">{{ post.title }}</a>{% endfor %}{% endblock %}"#,
//!     );
//! let engine = Engine::new(loader);
//!
//! let context = Context::from_json(json!({
//!     "root": "/blog",
//!     "posts": [{"title": "A", "url": "/a"}],
//! })).unwrap();
//!
//! let html = engine.render("index.tpl", &context).unwrap();
//! assert_eq!(html, r#"<main><a href="/blog/a">A</a></main>"#);
//! ```

// Public modules
pub mod config;
pub mod context;
pub mod error;
pub mod html_escape;
pub mod inheritance;
pub mod loader;
pub mod registry;
pub mod renderer;
pub mod resolved;
pub mod theme;
pub mod value;

mod filters;
mod scope;

pub use config::{EngineConfig, MissingVariablePolicy, WhitespaceControl};
pub use context::Context;
pub use error::{KasaneError, Result};
pub use inheritance::BlockChain;
pub use kasane_ast::{Location, ParseError, WhitespacePolicy};
pub use loader::{FileSystemLoader, MemoryLoader, SourceLoader, TemplateSource};
pub use registry::{ParsedTemplate, Registry};
pub use renderer::{Rendered, Renderer};
pub use resolved::{ResolvedNode, ResolvedTemplate};
pub use theme::Theme;
pub use value::Value;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Registry, resolved-template cache and configuration in one place.
///
/// `Engine` is `Send + Sync`; share it between threads behind an `Arc` or by
/// reference.
pub struct Engine {
    registry: Registry,
    config: EngineConfig,
    resolved: RwLock<HashMap<String, Arc<ResolvedTemplate>>>,
    /// Bumped under the `resolved` write lock whenever entries are dropped.
    generation: AtomicU64,
}

impl Engine {
    /// Create an engine with the default configuration
    pub fn new(loader: impl SourceLoader + 'static) -> Self {
        Self::with_config(loader, EngineConfig::default())
    }

    pub fn with_config(loader: impl SourceLoader + 'static, config: EngineConfig) -> Self {
        let registry =
            Registry::new(loader, config.parse_options()).with_auto_reload(config.auto_reload);
        Self {
            registry,
            config,
            resolved: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Render the named template to a string
    pub fn render(&self, name: &str, context: &Context) -> Result<String> {
        let template = self.resolved(name)?;
        let rendered = Renderer::new(&self.config).render(&template, context)?;
        Ok(rendered.into_string())
    }

    /// Render the named template into a writer.
    ///
    /// Nothing is written when rendering fails.
    pub fn render_to<W: io::Write + ?Sized>(
        &self,
        name: &str,
        context: &Context,
        writer: &mut W,
    ) -> Result<()> {
        let template = self.resolved(name)?;
        let rendered = Renderer::new(&self.config).render(&template, context)?;
        rendered.write_to(writer)?;
        Ok(())
    }

    /// The flattened form of `name`, cached until a contributing template is
    /// invalidated (or, with `auto_reload`, changes).
    ///
    /// A build that overlaps an invalidation is returned but not cached.
    pub fn resolved(&self, name: &str) -> Result<Arc<ResolvedTemplate>> {
        let generation = self.generation.load(Ordering::Acquire);
        let cached = self.resolved.read().get(name).cloned();
        if let Some(resolved) = cached {
            if !self.config.auto_reload || self.is_current(&resolved)? {
                return Ok(resolved);
            }
        }

        let chain = inheritance::build_chain(&self.registry, name, self.config.max_chain_depth)?;
        let resolved = Arc::new(inheritance::resolve(&chain, &self.registry, &self.config)?);
        let mut cache = self.resolved.write();
        if self.generation.load(Ordering::Acquire) == generation {
            cache.insert(name.to_string(), Arc::clone(&resolved));
        } else {
            debug!(name, "invalidated while resolving, not cached");
        }
        Ok(resolved)
    }

    /// Forget a template and everything resolved from it.
    pub fn invalidate(&self, name: &str) -> bool {
        let removed = self.registry.invalidate(name);
        self.drop_dependents(&[name]);
        removed
    }

    /// Drop cached templates whose source changed, returning their names.
    pub fn refresh(&self) -> Vec<String> {
        let stale = self.registry.refresh();
        if !stale.is_empty() {
            let names: Vec<&str> = stale.iter().map(String::as_str).collect();
            self.drop_dependents(&names);
        }
        stale
    }

    pub fn clear(&self) {
        self.registry.clear();
        let mut cache = self.resolved.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        cache.clear();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether every template a resolved entry was built from is still the
    /// registry's current parse.
    fn is_current(&self, resolved: &ResolvedTemplate) -> Result<bool> {
        for source in resolved.sources() {
            let current = self.registry.resolve(source.name())?;
            if !Arc::ptr_eq(&current, source) {
                debug!(template = resolved.name(), changed = source.name(), "resolved template is stale");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn drop_dependents(&self, names: &[&str]) {
        let mut cache = self.resolved.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        cache.retain(|_, resolved| !names.iter().any(|name| resolved.depends_on(name)));
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Name under which [`render_str`] registers its template.
const INLINE_TEMPLATE: &str = "<inline>";

/// Convenience function: render a standalone template source with JSON data
///
/// # Example
///
/// ```rust
/// use serde_json::json;
///
/// let result = kasane::render_str("Hello, {{ name }}!", json!({"name": "World"})).unwrap();
/// assert_eq!(result, "Hello, World!");
/// ```
pub fn render_str(source: &str, data: serde_json::Value) -> Result<String> {
    render_str_with_config(source, data, EngineConfig::default())
}

/// [`render_str`] with an explicit configuration.
pub fn render_str_with_config(
    source: &str,
    data: serde_json::Value,
    config: EngineConfig,
) -> Result<String> {
    let engine = Engine::with_config(
        MemoryLoader::new().with_template(INLINE_TEMPLATE, source),
        config,
    );
    engine.render(INLINE_TEMPLATE, &Context::from_json(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_reuse() {
        let engine = Engine::new(MemoryLoader::new().with_template("t", "Hello, {{ name }}!"));

        let alice = Context::from_json(json!({"name": "Alice"})).unwrap();
        assert_eq!(engine.render("t", &alice).unwrap(), "Hello, Alice!");

        let bob = Context::from_json(json!({"name": "Bob"})).unwrap();
        assert_eq!(engine.render("t", &bob).unwrap(), "Hello, Bob!");
    }

    #[test]
    fn test_resolved_is_cached() {
        let engine = Engine::new(MemoryLoader::new().with_template("t", "x"));
        let first = engine.resolved("t").unwrap();
        let second = engine.resolved("t").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_invalidate_drops_dependents() {
        let loader = Arc::new(
            MemoryLoader::new()
                .with_template("base", "[{% block b %}{% endblock %}]")
                .with_template("leaf", r#"{% extends "base" %}{% block b %}leaf{% endblock %}"#),
        );
        let engine = Engine::new(Arc::clone(&loader));
        let ctx = Context::new();
        assert_eq!(engine.render("leaf", &ctx).unwrap(), "[leaf]");

        loader.insert("base", "({% block b %}{% endblock %})");
        assert_eq!(engine.render("leaf", &ctx).unwrap(), "[leaf]");

        assert!(engine.invalidate("base"));
        assert_eq!(engine.render("leaf", &ctx).unwrap(), "(leaf)");
    }

    #[test]
    fn test_render_to_writes_nothing_on_error() {
        let engine = Engine::new(MemoryLoader::new().with_template("t", "ok {{ missing }}"));
        let mut out = Vec::new();
        assert!(engine.render_to("t", &Context::new(), &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
        assert_send_sync::<ResolvedTemplate>();
        assert_send_sync::<Context>();
    }
}
