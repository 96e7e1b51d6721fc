//! Error types for the Kasane template engine.

use thiserror::Error;

// Re-export Location from kasane-ast
pub use kasane_ast::Location;
use kasane_ast::ParseError;

/// All errors that can occur in Kasane
#[derive(Error, Debug)]
pub enum KasaneError {
    #[error("Parse error in '{template}' at line {}, column {}: {message}", location.line, location.column)]
    Parse {
        template: String,
        message: String,
        location: Location,
    },

    #[error("Template not found: '{name}'")]
    NotFound { name: String },

    #[error("Cyclic inheritance: {}", cycle.join(" -> "))]
    CyclicInheritance { cycle: Vec<String> },

    #[error("Cyclic include: {}", cycle.join(" -> "))]
    CyclicInclude { cycle: Vec<String> },

    #[error("Template chain starting at '{name}' is deeper than {limit} templates")]
    ChainTooDeep { name: String, limit: usize },

    #[error("Template '{name}' resolves to more than {limit} nodes")]
    TemplateTooLarge { name: String, limit: usize },

    #[error(
        "Render error in '{template}' at line {}, column {} ({{{{ {expression} }}}}): {message}",
        location.line,
        location.column
    )]
    Render {
        template: String,
        expression: String,
        message: String,
        location: Location,
    },

    #[error("Invalid template name '{name}': {reason}")]
    InvalidTemplateName { name: String, reason: String },

    #[error("Theme not found: '{name}'")]
    ThemeNotFound { name: String },

    #[error("Invalid context: {message}")]
    InvalidContext { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KasaneError {
    pub(crate) fn parse(template: &str, error: ParseError) -> Self {
        KasaneError::Parse {
            template: template.to_string(),
            location: error.location(),
            message: error.to_string(),
        }
    }
}

/// Result type alias for Kasane operations
pub type Result<T> = std::result::Result<T, KasaneError>;
