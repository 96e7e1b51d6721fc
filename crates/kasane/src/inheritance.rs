//! Inheritance resolution: follow `extends` from a leaf to its root, then
//! flatten the root's nodes with the nearest block overrides substituted.
//!
//! Flattening is a pure function of the chain, so its result can be cached
//! per leaf until one of the contributing templates changes.

use crate::config::EngineConfig;
use crate::error::{KasaneError, Result};
use crate::registry::{ParsedTemplate, Registry};
use crate::resolved::{
    OutputNode, ResolvedConditional, ResolvedLoop, ResolvedNode, ResolvedTemplate,
};
use kasane_ast::Node;
use std::sync::Arc;
use tracing::debug;

/// Ancestors of a template, leaf first and root last. Never empty.
#[derive(Debug, Clone)]
pub struct BlockChain {
    templates: Vec<Arc<ParsedTemplate>>,
}

impl BlockChain {
    pub fn leaf(&self) -> &Arc<ParsedTemplate> {
        &self.templates[0]
    }

    pub fn root(&self) -> &Arc<ParsedTemplate> {
        &self.templates[self.templates.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ParsedTemplate>> {
        self.templates.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.iter().map(|t| t.name()).collect()
    }

    /// The nearest definition of a block, searching from the leaf.
    fn find_block(&self, name: &str) -> Option<(&Arc<str>, &[Node])> {
        self.templates.iter().find_map(|parsed| {
            parsed
                .template()
                .block(name)
                .map(|block| (parsed.shared_name(), &block.body[..]))
        })
    }
}

/// Follow `extends` references from `leaf` up to a template without one.
pub fn build_chain(registry: &Registry, leaf: &str, max_depth: usize) -> Result<BlockChain> {
    let mut templates: Vec<Arc<ParsedTemplate>> = Vec::new();
    let mut next = leaf.to_string();

    loop {
        if let Some(pos) = templates.iter().position(|t| t.name() == next) {
            let mut cycle: Vec<String> = templates[pos..]
                .iter()
                .map(|t| t.name().to_string())
                .collect();
            cycle.push(next);
            return Err(KasaneError::CyclicInheritance { cycle });
        }
        if templates.len() >= max_depth {
            return Err(KasaneError::ChainTooDeep {
                name: leaf.to_string(),
                limit: max_depth,
            });
        }

        let parsed = registry.resolve(&next)?;
        let parent = parsed.parent().map(str::to_string);
        templates.push(parsed);

        match parent {
            Some(parent) => next = parent,
            None => break,
        }
    }

    let chain = BlockChain { templates };
    debug!(leaf, chain = ?chain.names(), "built inheritance chain");
    Ok(chain)
}

/// Flatten a chain into a [`ResolvedTemplate`], expanding includes.
pub fn resolve(
    chain: &BlockChain,
    registry: &Registry,
    config: &EngineConfig,
) -> Result<ResolvedTemplate> {
    let leaf = chain.leaf().shared_name().clone();
    let mut flattener = Flattener {
        registry,
        max_depth: config.max_chain_depth,
        include_stack: vec![leaf.to_string()],
        sources: Vec::new(),
        budget: NodeBudget {
            leaf: Arc::clone(&leaf),
            used: 0,
            limit: config.max_resolved_nodes,
        },
    };

    let mut nodes = Vec::new();
    flattener.flatten_chain(chain, &mut nodes)?;
    debug!(leaf = %leaf, nodes = nodes.len(), "resolved template");
    Ok(ResolvedTemplate::new(leaf, nodes, flattener.sources))
}

/// Counts emitted nodes and include expansions against
/// `max_resolved_nodes`.
struct NodeBudget {
    leaf: Arc<str>,
    used: usize,
    limit: Option<usize>,
}

impl NodeBudget {
    fn charge(&mut self) -> Result<()> {
        self.used += 1;
        match self.limit {
            Some(limit) if self.used > limit => Err(KasaneError::TemplateTooLarge {
                name: self.leaf.to_string(),
                limit,
            }),
            _ => Ok(()),
        }
    }
}

struct Flattener<'r> {
    registry: &'r Registry,
    max_depth: usize,
    /// Templates whose includes are being expanded, outermost first.
    include_stack: Vec<String>,
    sources: Vec<Arc<ParsedTemplate>>,
    budget: NodeBudget,
}

impl Flattener<'_> {
    fn flatten_chain(&mut self, chain: &BlockChain, out: &mut Vec<ResolvedNode>) -> Result<()> {
        for parsed in chain.iter() {
            if !self.sources.iter().any(|s| Arc::ptr_eq(s, parsed)) {
                self.sources.push(Arc::clone(parsed));
            }
        }

        let root = chain.root();
        self.flatten_nodes(root.template().nodes(), root.shared_name(), chain, out)
    }

    fn flatten_nodes(
        &mut self,
        nodes: &[Node],
        origin: &Arc<str>,
        chain: &BlockChain,
        out: &mut Vec<ResolvedNode>,
    ) -> Result<()> {
        for node in nodes {
            if !matches!(node, Node::Block(_) | Node::Extends(_)) {
                self.budget.charge()?;
            }
            match node {
                Node::Literal(n) => push_literal(out, &n.text),
                Node::Expression(n) => out.push(ResolvedNode::Output(OutputNode {
                    expr: n.expr.clone(),
                    origin: Arc::clone(origin),
                    location: n.location,
                })),
                Node::Block(n) => {
                    let (owner, body) = chain
                        .find_block(&n.name)
                        .unwrap_or((origin, &n.body[..]));
                    self.flatten_nodes(body, owner, chain, out)?;
                }
                Node::Loop(n) => {
                    let mut body = Vec::new();
                    self.flatten_nodes(&n.body, origin, chain, &mut body)?;
                    out.push(ResolvedNode::Loop(ResolvedLoop {
                        binding: n.binding.clone(),
                        iterable: n.iterable.clone(),
                        body,
                        origin: Arc::clone(origin),
                        location: n.location,
                    }));
                }
                Node::Conditional(n) => {
                    let mut then_body = Vec::new();
                    self.flatten_nodes(&n.then_body, origin, chain, &mut then_body)?;
                    let mut else_body = Vec::new();
                    self.flatten_nodes(&n.else_body, origin, chain, &mut else_body)?;
                    out.push(ResolvedNode::Conditional(ResolvedConditional {
                        test: n.test.clone(),
                        then_body,
                        else_body,
                        origin: Arc::clone(origin),
                        location: n.location,
                    }));
                }
                Node::Extends(_) => {}
                Node::Include(n) => self.flatten_include(&n.name, out)?,
            }
        }
        Ok(())
    }

    /// Splice the fully resolved nodes of another template in place.
    fn flatten_include(&mut self, name: &str, out: &mut Vec<ResolvedNode>) -> Result<()> {
        if let Some(pos) = self.include_stack.iter().position(|n| n == name) {
            let mut cycle = self.include_stack[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(KasaneError::CyclicInclude { cycle });
        }
        if self.include_stack.len() > self.max_depth {
            return Err(KasaneError::ChainTooDeep {
                name: name.to_string(),
                limit: self.max_depth,
            });
        }

        let chain = build_chain(self.registry, name, self.max_depth)?;
        self.include_stack.push(name.to_string());
        let result = self.flatten_chain(&chain, out);
        self.include_stack.pop();
        result
    }
}

/// Append literal text, merging with a preceding literal.
fn push_literal(out: &mut Vec<ResolvedNode>, text: &str) {
    if let Some(ResolvedNode::Literal(last)) = out.last_mut() {
        last.push_str(text);
    } else {
        out.push(ResolvedNode::Literal(text.to_string()));
    }
}
