//! Flattened render programs.

use crate::registry::ParsedTemplate;
use kasane_ast::{Expr, Location, Test};
use std::sync::Arc;

/// A template with inheritance and includes already applied.
///
/// Only literals, expressions, loops and conditionals remain. Every node that
/// can fail at render time remembers which template authored it.
#[derive(Debug)]
pub struct ResolvedTemplate {
    name: Arc<str>,
    nodes: Vec<ResolvedNode>,
    sources: Vec<Arc<ParsedTemplate>>,
}

impl ResolvedTemplate {
    pub(crate) fn new(name: Arc<str>, nodes: Vec<ResolvedNode>, sources: Vec<Arc<ParsedTemplate>>) -> Self {
        Self {
            name,
            nodes,
            sources,
        }
    }

    /// Name of the leaf template this was resolved for.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[ResolvedNode] {
        &self.nodes
    }

    /// Every parsed template that contributed, in first-use order.
    pub fn sources(&self) -> &[Arc<ParsedTemplate>] {
        &self.sources
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.sources.iter().any(|s| s.name() == name)
    }
}

#[derive(Debug, Clone)]
pub enum ResolvedNode {
    Literal(String),
    Output(OutputNode),
    Loop(ResolvedLoop),
    Conditional(ResolvedConditional),
}

/// `{{ expr }}`
#[derive(Debug, Clone)]
pub struct OutputNode {
    pub expr: Expr,
    pub origin: Arc<str>,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct ResolvedLoop {
    pub binding: String,
    pub iterable: Expr,
    pub body: Vec<ResolvedNode>,
    pub origin: Arc<str>,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct ResolvedConditional {
    pub test: Test,
    pub then_body: Vec<ResolvedNode>,
    pub else_body: Vec<ResolvedNode>,
    pub origin: Arc<str>,
    pub location: Location,
}
