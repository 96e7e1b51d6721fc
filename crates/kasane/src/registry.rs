//! Template registry: name to parsed template, with a shared parse cache.

use crate::error::{KasaneError, Result};
use crate::loader::SourceLoader;
use kasane_ast::{ParseOptions, Template};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// A parsed template plus the identity of the source it came from.
#[derive(Debug)]
pub struct ParsedTemplate {
    name: Arc<str>,
    modified: Option<SystemTime>,
    template: Template,
}

impl ParsedTemplate {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Name of the template this one extends.
    pub fn parent(&self) -> Option<&str> {
        self.template.parent()
    }
}

/// Resolves template names to [`ParsedTemplate`]s, loading and parsing on a
/// cache miss.
///
/// Safe to share between threads. Two threads missing on the same name may
/// both parse it; the first insertion wins and both get the same `Arc`.
/// A parse whose load started before an invalidation is returned to its
/// caller but never cached.
pub struct Registry {
    loader: Box<dyn SourceLoader>,
    options: ParseOptions,
    auto_reload: bool,
    cache: RwLock<HashMap<String, Arc<ParsedTemplate>>>,
    /// Bumped under the cache write lock by every invalidation.
    generation: AtomicU64,
}

impl Registry {
    pub fn new(loader: impl SourceLoader + 'static, options: ParseOptions) -> Self {
        Self {
            loader: Box::new(loader),
            options,
            auto_reload: false,
            cache: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Check the loader's modification marker on every resolve.
    pub fn with_auto_reload(mut self, auto_reload: bool) -> Self {
        self.auto_reload = auto_reload;
        self
    }

    pub fn loader(&self) -> &dyn SourceLoader {
        self.loader.as_ref()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<ParsedTemplate>> {
        let generation = self.generation.load(Ordering::Acquire);
        let cached = self.cache.read().get(name).cloned();
        let reload = match cached {
            Some(parsed) if !self.auto_reload || !self.is_stale(&parsed) => {
                debug!(name, "template cache hit");
                return Ok(parsed);
            }
            Some(_) => true,
            None => false,
        };

        debug!(name, reload, "template cache miss");
        let parsed = Arc::new(self.load_and_parse(name)?);

        let mut cache = self.cache.write();
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(name, "template invalidated while loading, not cached");
            return Ok(parsed);
        }
        if !reload {
            if let Some(existing) = cache.get(name) {
                return Ok(Arc::clone(existing));
            }
        }
        cache.insert(name.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    /// Drop one cache entry. Returns whether it was cached.
    pub fn invalidate(&self, name: &str) -> bool {
        let removed = {
            let mut cache = self.cache.write();
            self.generation.fetch_add(1, Ordering::AcqRel);
            cache.remove(name).is_some()
        };
        if removed {
            debug!(name, "template invalidated");
        }
        removed
    }

    pub fn clear(&self) {
        let mut cache = self.cache.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        cache.clear();
    }

    /// Drop every entry whose source changed (or vanished) since it was
    /// parsed, returning the dropped names in order.
    pub fn refresh(&self) -> Vec<String> {
        let candidates: Vec<Arc<ParsedTemplate>> = self.cache.read().values().cloned().collect();
        let mut stale: Vec<String> = candidates
            .iter()
            .filter(|parsed| self.is_stale(parsed))
            .map(|parsed| parsed.name().to_string())
            .collect();
        stale.sort();

        if !stale.is_empty() {
            let mut cache = self.cache.write();
            self.generation.fetch_add(1, Ordering::AcqRel);
            for name in &stale {
                cache.remove(name);
            }
            debug!(count = stale.len(), "refreshed stale templates");
        }
        stale
    }

    /// Names currently cached, sorted.
    pub fn cached_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn is_stale(&self, parsed: &ParsedTemplate) -> bool {
        match self.loader.modified(parsed.name()) {
            Ok(current) => current != parsed.modified,
            Err(_) => true,
        }
    }

    fn load_and_parse(&self, name: &str) -> Result<ParsedTemplate> {
        let source = self.loader.load(name)?;
        let template = kasane_ast::parse_with_options(&source.text, self.options)
            .map_err(|e| KasaneError::parse(name, e))?;
        debug!(name, nodes = template.nodes().len(), "parsed template");

        Ok(ParsedTemplate {
            name: Arc::from(name),
            modified: source.modified,
            template,
        })
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("options", &self.options)
            .field("auto_reload", &self.auto_reload)
            .field("cached", &self.cached_names())
            .finish_non_exhaustive()
    }
}
