//! Blog themes: a named set of page templates.
//!
//! A theme lives in `<root>/<name>/templates/`. The `simple` theme is also
//! compiled into the crate and used when no such directory exists.

use crate::error::{KasaneError, Result};
use crate::loader::{FileSystemLoader, SourceLoader, TemplateSource};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// Name of the built-in theme.
pub const DEFAULT_THEME: &str = "simple";

/// Templates every theme provides.
pub const THEME_TEMPLATES: [&str; 4] = ["base.tpl", "index.tpl", "post.tpl", "tag.tpl"];

static SIMPLE_BASE: &str = include_str!("../themes/simple/templates/base.tpl");
static SIMPLE_INDEX: &str = include_str!("../themes/simple/templates/index.tpl");
static SIMPLE_POST: &str = include_str!("../themes/simple/templates/post.tpl");
static SIMPLE_TAG: &str = include_str!("../themes/simple/templates/tag.tpl");

fn embedded(name: &str) -> Option<&'static str> {
    match name {
        "base.tpl" => Some(SIMPLE_BASE),
        "index.tpl" => Some(SIMPLE_INDEX),
        "post.tpl" => Some(SIMPLE_POST),
        "tag.tpl" => Some(SIMPLE_TAG),
        _ => None,
    }
}

#[derive(Debug, Clone)]
enum ThemeSource {
    Directory(FileSystemLoader),
    Embedded,
}

/// theme object
#[derive(Debug, Clone)]
pub struct Theme {
    root: PathBuf,
    name: String,
    source: ThemeSource,
}

impl Theme {
    /// Open theme `name` under `root`, falling back to the embedded copy for
    /// the `simple` theme.
    pub fn new(root: impl AsRef<Path>, name: &str) -> Result<Self> {
        debug!("loading theme: {}", name);
        let root = root.as_ref();
        let theme_dir = root.join(name);

        let source = if theme_dir.exists() {
            let templates = theme_dir.join("templates");
            if !templates.is_dir() {
                debug!("theme({}) has no templates directory", name);
                return Err(KasaneError::ThemeNotFound {
                    name: name.to_string(),
                });
            }
            ThemeSource::Directory(FileSystemLoader::new(templates)?)
        } else if name == DEFAULT_THEME {
            debug!("theme({}) not found on disk, using the embedded copy", name);
            ThemeSource::Embedded
        } else {
            return Err(KasaneError::ThemeNotFound {
                name: name.to_string(),
            });
        };

        Ok(Self {
            root: root.to_path_buf(),
            name: name.to_string(),
            source,
        })
    }

    /// The embedded `simple` theme, without touching the file system.
    pub fn embedded() -> Self {
        Self {
            root: PathBuf::new(),
            name: DEFAULT_THEME.to_string(),
            source: ThemeSource::Embedded,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self.source, ThemeSource::Embedded)
    }

    /// Write this theme's templates to `<root>/<name>/templates/`.
    ///
    /// Does nothing when the destination already exists.
    pub fn init_dir(&self, name: &str) -> Result<()> {
        let dest_dir = self.root.join(name);
        if dest_dir.exists() {
            info!("theme({}) already existed", name);
            return Ok(());
        }

        debug!("init theme({}) ...", name);
        let templates_dir = dest_dir.join("templates");
        fs::create_dir_all(&templates_dir)?;
        for file in THEME_TEMPLATES {
            let source = self.load(file)?;
            fs::write(templates_dir.join(file), source.text)?;
        }
        info!("theme({}) written to {}", name, dest_dir.display());
        Ok(())
    }
}

impl SourceLoader for Theme {
    fn load(&self, name: &str) -> Result<TemplateSource> {
        match &self.source {
            ThemeSource::Directory(loader) => loader.load(name),
            ThemeSource::Embedded => embedded(name)
                .map(|text| TemplateSource::new(name, text))
                .ok_or_else(|| KasaneError::NotFound {
                    name: name.to_string(),
                }),
        }
    }

    fn modified(&self, name: &str) -> Result<Option<SystemTime>> {
        match &self.source {
            ThemeSource::Directory(loader) => loader.modified(name),
            ThemeSource::Embedded => Ok(None),
        }
    }
}
