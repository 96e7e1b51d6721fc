//! Engine configuration.
//!
//! Every field has a default, so a partial JSON document is a valid
//! configuration:
//!
//! ```rust
//! use kasane::{EngineConfig, MissingVariablePolicy};
//!
//! let config = EngineConfig::from_json_str(r#"{"missing_variable": "empty"}"#).unwrap();
//! assert_eq!(config.missing_variable, MissingVariablePolicy::Empty);
//! assert!(config.autoescape);
//! ```

use crate::error::{KasaneError, Result};
use kasane_ast::{ParseOptions, WhitespacePolicy};
use serde::{Deserialize, Serialize};

/// What an output expression or loop target that names a missing variable
/// produces.
///
/// Conditional tests are not affected: an absent value is always false there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingVariablePolicy {
    /// Missing values are null: they render as the empty string and iterate
    /// zero times, as does a present null loop target.
    Empty,
    /// Missing values in output and loop targets are a render error, unless a
    /// `default` filter follows. Null loop targets are an error too.
    #[default]
    Strict,
}

/// Default for [`EngineConfig::max_resolved_nodes`].
pub const DEFAULT_MAX_RESOLVED_NODES: usize = 100_000;

/// Whitespace handling around statement tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhitespaceControl {
    #[default]
    Preserve,
    Trim,
}

impl From<WhitespaceControl> for WhitespacePolicy {
    fn from(control: WhitespaceControl) -> Self {
        match control {
            WhitespaceControl::Preserve => WhitespacePolicy::Preserve,
            WhitespaceControl::Trim => WhitespacePolicy::Trim,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// HTML-escape expression output unless marked safe.
    pub autoescape: bool,
    pub missing_variable: MissingVariablePolicy,
    /// Upper bound on templates in one `extends` chain, also applied to
    /// include nesting.
    pub max_chain_depth: usize,
    pub whitespace: WhitespaceControl,
    /// Upper bound on the length of any sequence a loop walks.
    pub max_loop_iterations: Option<usize>,
    /// Upper bound on the nodes one flattened template may contain, counting
    /// every copy that includes produce.
    pub max_resolved_nodes: Option<usize>,
    /// Check the loader for modified sources on every resolve.
    pub auto_reload: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autoescape: true,
            missing_variable: MissingVariablePolicy::Strict,
            max_chain_depth: 16,
            whitespace: WhitespaceControl::Preserve,
            max_loop_iterations: None,
            max_resolved_nodes: Some(DEFAULT_MAX_RESOLVED_NODES),
            auto_reload: false,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chain_depth == 0 {
            return Err(KasaneError::InvalidConfig {
                message: "max_chain_depth must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_autoescape(mut self, autoescape: bool) -> Self {
        self.autoescape = autoescape;
        self
    }

    pub fn with_missing_variable(mut self, policy: MissingVariablePolicy) -> Self {
        self.missing_variable = policy;
        self
    }

    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth;
        self
    }

    pub fn with_whitespace(mut self, whitespace: WhitespaceControl) -> Self {
        self.whitespace = whitespace;
        self
    }

    pub fn with_max_loop_iterations(mut self, limit: usize) -> Self {
        self.max_loop_iterations = Some(limit);
        self
    }

    /// `None` lifts the bound.
    pub fn with_max_resolved_nodes(mut self, limit: Option<usize>) -> Self {
        self.max_resolved_nodes = limit;
        self
    }

    pub fn with_auto_reload(mut self, auto_reload: bool) -> Self {
        self.auto_reload = auto_reload;
        self
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            whitespace: self.whitespace.into(),
        }
    }
}
