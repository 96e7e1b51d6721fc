//! Template source loaders.
//!
//! The engine never touches storage directly: a [`SourceLoader`] supplies
//! template text by name and reports modification markers so cached parses
//! can be refreshed.

use crate::error::{KasaneError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Raw template text as supplied by a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    pub name: String,
    pub text: String,
    /// Last-modified marker, when the storage has one.
    pub modified: Option<SystemTime>,
}

impl TemplateSource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            modified: None,
        }
    }
}

/// Supplies template source by name.
pub trait SourceLoader: Send + Sync {
    /// Load a template, failing with [`KasaneError::NotFound`] when absent.
    fn load(&self, name: &str) -> Result<TemplateSource>;

    /// Current modification marker for `name`, used to detect stale cache
    /// entries. Loaders without change tracking return `Ok(None)`.
    fn modified(&self, name: &str) -> Result<Option<SystemTime>> {
        let _ = name;
        Ok(None)
    }
}

impl<L: SourceLoader + ?Sized> SourceLoader for Arc<L> {
    fn load(&self, name: &str) -> Result<TemplateSource> {
        (**self).load(name)
    }

    fn modified(&self, name: &str) -> Result<Option<SystemTime>> {
        (**self).modified(name)
    }
}

impl<L: SourceLoader + ?Sized> SourceLoader for Box<L> {
    fn load(&self, name: &str) -> Result<TemplateSource> {
        (**self).load(name)
    }

    fn modified(&self, name: &str) -> Result<Option<SystemTime>> {
        (**self).modified(name)
    }
}

// ============================================================================
// MemoryLoader
// ============================================================================

/// In-memory templates. Inserting a template again bumps its marker.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    templates: RwLock<HashMap<String, (String, SystemTime)>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryLoader::insert`].
    pub fn with_template(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(name, text);
        self
    }

    /// Add or replace a template.
    pub fn insert(&self, name: impl Into<String>, text: impl Into<String>) {
        let name = name.into();
        let mut templates = self.templates.write();
        let now = SystemTime::now();
        // Markers must change on every replacement, even within one clock tick
        let modified = match templates.get(&name) {
            Some((_, previous)) if now <= *previous => *previous + Duration::from_nanos(1),
            _ => now,
        };
        templates.insert(name, (text.into(), modified));
    }

    pub fn remove(&self, name: &str) -> bool {
        self.templates.write().remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl SourceLoader for MemoryLoader {
    fn load(&self, name: &str) -> Result<TemplateSource> {
        let templates = self.templates.read();
        let (text, modified) = templates.get(name).ok_or_else(|| KasaneError::NotFound {
            name: name.to_string(),
        })?;
        Ok(TemplateSource {
            name: name.to_string(),
            text: text.clone(),
            modified: Some(*modified),
        })
    }

    fn modified(&self, name: &str) -> Result<Option<SystemTime>> {
        let templates = self.templates.read();
        templates
            .get(name)
            .map(|(_, modified)| Some(*modified))
            .ok_or_else(|| KasaneError::NotFound {
                name: name.to_string(),
            })
    }
}

// ============================================================================
// FileSystemLoader
// ============================================================================

/// Loads templates from files under a root directory.
///
/// Names are relative paths with `/` separators (`"base.tpl"`,
/// `"partials/nav.tpl"`); names that could escape the root are rejected.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    root: PathBuf,
}

impl FileSystemLoader {
    /// Create a loader for the given root directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().canonicalize().map_err(|e| KasaneError::InvalidTemplateName {
            name: root.as_ref().display().to_string(),
            reason: format!("invalid template root: {e}"),
        })?;
        debug!(root = %root.display(), "file system loader ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a template name to a path inside the root.
    fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        validate_template_name(name)?;

        let mut path = self.root.clone();
        for segment in name.split('/') {
            path.push(segment);
        }
        self.ensure_within_root(name, &path)?;
        Ok(path)
    }

    fn ensure_within_root(&self, name: &str, path: &Path) -> Result<()> {
        let candidate = canonicalize_candidate(path)?;
        if candidate == self.root || candidate.starts_with(&self.root) {
            return Ok(());
        }

        Err(KasaneError::InvalidTemplateName {
            name: name.to_string(),
            reason: format!("resolves outside the template root: {}", path.display()),
        })
    }
}

impl SourceLoader for FileSystemLoader {
    fn load(&self, name: &str) -> Result<TemplateSource> {
        let path = self.resolve_path(name)?;
        if !path.is_file() {
            return Err(KasaneError::NotFound {
                name: name.to_string(),
            });
        }

        debug!(name, path = %path.display(), "reading template");
        let text = fs::read_to_string(&path)?;
        let modified = fs::metadata(&path)?.modified().ok();
        Ok(TemplateSource {
            name: name.to_string(),
            text,
            modified,
        })
    }

    fn modified(&self, name: &str) -> Result<Option<SystemTime>> {
        let path = self.resolve_path(name)?;
        if !path.is_file() {
            return Err(KasaneError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(fs::metadata(&path)?.modified().ok())
    }
}

/// Canonicalize a path whose tail may not exist yet (symlinks in the existing
/// part are followed).
fn canonicalize_candidate(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.canonicalize()?);
    }

    let (existing_parent, missing_segments) = split_existing_parent(path);
    let mut resolved = existing_parent.canonicalize()?;
    for segment in missing_segments {
        resolved.push(segment);
    }
    Ok(resolved)
}

fn split_existing_parent(path: &Path) -> (PathBuf, Vec<String>) {
    let mut cursor = path.to_path_buf();
    let mut missing_segments = Vec::new();

    while !cursor.exists() {
        let Some(name) = cursor.file_name().and_then(|s| s.to_str()) else {
            break;
        };
        missing_segments.push(name.to_string());

        let Some(parent) = cursor.parent() else {
            break;
        };

        if parent == cursor {
            break;
        }
        cursor = parent.to_path_buf();
    }

    missing_segments.reverse();
    (cursor, missing_segments)
}

/// Reject names that are absolute, empty or could walk out of the root.
fn validate_template_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(KasaneError::InvalidTemplateName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.starts_with('/') {
        return invalid("name must be relative");
    }
    if name.contains('\\') || name.contains(':') || name.contains('\0') {
        return invalid("name contains a forbidden character");
    }
    for segment in name.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return invalid("name contains an empty or relative segment");
        }
    }

    Ok(())
}
