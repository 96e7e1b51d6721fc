//! Renderer for evaluating resolved templates.
//!
//! Since inheritance and includes are flattened beforehand and the token
//! processor handles whitespace control, the renderer only walks literals,
//! expressions, loops and conditionals.

use crate::config::{EngineConfig, MissingVariablePolicy};
use crate::context::Context;
use crate::error::{KasaneError, Result};
use crate::filters::{self, Evaluated};
use crate::html_escape;
use crate::resolved::{OutputNode, ResolvedConditional, ResolvedLoop, ResolvedNode, ResolvedTemplate};
use crate::scope::Scope;
use crate::value::Value;
use kasane_ast::{Expr, Filter, Location};
use std::borrow::Cow;
use std::fmt;
use std::io;
use tracing::trace;

/// Output of one render: chunks in document order.
///
/// Literal chunks borrow from the [`ResolvedTemplate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered<'t> {
    chunks: Vec<Cow<'t, str>>,
}

impl<'t> Rendered<'t> {
    pub fn chunks(&self) -> &[Cow<'t, str>] {
        &self.chunks
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(|c| c.as_ref())
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.is_empty())
    }

    pub fn write_to<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        for chunk in &self.chunks {
            writer.write_all(chunk.as_bytes())?;
        }
        Ok(())
    }

    pub fn into_string(self) -> String {
        let mut output = String::with_capacity(self.len());
        for chunk in self.chunks {
            output.push_str(&chunk);
        }
        output
    }
}

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in &self.chunks {
            f.write_str(chunk)?;
        }
        Ok(())
    }
}

impl<'t> IntoIterator for Rendered<'t> {
    type Item = Cow<'t, str>;
    type IntoIter = std::vec::IntoIter<Cow<'t, str>>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.into_iter()
    }
}

impl<'a, 't> IntoIterator for &'a Rendered<'t> {
    type Item = &'a Cow<'t, str>;
    type IntoIter = std::slice::Iter<'a, Cow<'t, str>>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}

/// Renderer for evaluating resolved templates
#[derive(Debug, Clone, Copy)]
pub struct Renderer<'c> {
    config: &'c EngineConfig,
}

impl<'c> Renderer<'c> {
    /// Create a new renderer
    pub fn new(config: &'c EngineConfig) -> Self {
        Self { config }
    }

    /// Render a template against a context.
    ///
    /// Either the whole output is produced or an error is returned; partial
    /// output is never exposed.
    pub fn render<'t>(&self, template: &'t ResolvedTemplate, context: &Context) -> Result<Rendered<'t>> {
        let mut scope = Scope::new(context);
        let mut chunks = Vec::new();
        self.render_nodes(template.nodes(), &mut scope, &mut chunks)?;
        trace!(template = template.name(), chunks = chunks.len(), "rendered");
        Ok(Rendered { chunks })
    }

    fn render_nodes<'t: 's, 's>(
        &self,
        nodes: &'t [ResolvedNode],
        scope: &mut Scope<'s>,
        out: &mut Vec<Cow<'t, str>>,
    ) -> Result<()> {
        for node in nodes {
            match node {
                ResolvedNode::Literal(text) => out.push(Cow::Borrowed(text.as_str())),
                ResolvedNode::Output(n) => out.push(Cow::Owned(self.render_output(n, scope)?)),
                ResolvedNode::Loop(n) => self.render_loop(n, scope, out)?,
                ResolvedNode::Conditional(n) => self.render_conditional(n, scope, out)?,
            }
        }
        Ok(())
    }

    fn render_output(&self, node: &OutputNode, scope: &Scope<'_>) -> Result<String> {
        let evaluated =
            self.evaluate(&node.expr, scope, &node.origin, node.location, self.strict())?;
        let text = evaluated.value.stringify().ok_or_else(|| {
            render_error(
                &node.expr,
                &node.origin,
                node.location,
                format!("cannot render {} directly", evaluated.value.type_name()),
            )
        })?;

        if self.config.autoescape && !evaluated.safe {
            Ok(html_escape::escape(&text).into_owned())
        } else {
            Ok(text.into_owned())
        }
    }

    fn render_loop<'t: 's, 's>(
        &self,
        node: &'t ResolvedLoop,
        scope: &mut Scope<'s>,
        out: &mut Vec<Cow<'t, str>>,
    ) -> Result<()> {
        let items = {
            let evaluated =
                self.evaluate(&node.iterable, scope, &node.origin, node.location, self.strict())?;
            match evaluated.value.into_owned() {
                Value::Array(items) => items,
                Value::Null if !self.strict() => Vec::new(),
                other => {
                    return Err(render_error(
                        &node.iterable,
                        &node.origin,
                        node.location,
                        format!("cannot iterate over {}", other.type_name()),
                    ))
                }
            }
        };

        if let Some(limit) = self.config.max_loop_iterations {
            if items.len() > limit {
                return Err(render_error(
                    &node.iterable,
                    &node.origin,
                    node.location,
                    format!("sequence of {} items exceeds the loop limit of {limit}", items.len()),
                ));
            }
        }

        let length = items.len();
        for (index0, item) in items.into_iter().enumerate() {
            scope.push(&node.binding, item, index0, length);
            let result = self.render_nodes(&node.body, scope, out);
            scope.pop();
            result?;
        }
        Ok(())
    }

    fn render_conditional<'t: 's, 's>(
        &self,
        node: &'t ResolvedConditional,
        scope: &mut Scope<'s>,
        out: &mut Vec<Cow<'t, str>>,
    ) -> Result<()> {
        // Absent values are false here under either policy
        let truthy = {
            let evaluated =
                self.evaluate(&node.test.expr, scope, &node.origin, node.location, false)?;
            evaluated.value.is_truthy() != node.test.negated
        };

        let branch = if truthy {
            &node.then_body
        } else {
            &node.else_body
        };
        self.render_nodes(branch, scope, out)
    }

    fn strict(&self) -> bool {
        self.config.missing_variable == MissingVariablePolicy::Strict
    }

    /// Resolve the path and run the filter chain.
    ///
    /// With `strict_missing`, a path that resolves to nothing is an error
    /// unless the chain contains `default`. Otherwise it becomes null.
    fn evaluate<'s>(
        &self,
        expr: &Expr,
        scope: &'s Scope<'_>,
        origin: &str,
        location: Location,
        strict_missing: bool,
    ) -> Result<Evaluated<'s>> {
        let value = match scope.lookup(&expr.path) {
            Some(value) => value,
            None => {
                let has_default = expr.filters.iter().any(|f| f.filter == Filter::Default);
                if strict_missing && !has_default {
                    return Err(render_error(
                        expr,
                        origin,
                        location,
                        format!("undefined variable '{}'", expr.path),
                    ));
                }
                Cow::Owned(Value::Null)
            }
        };

        let mut evaluated = Evaluated::new(value);
        for call in &expr.filters {
            evaluated = filters::apply(call, evaluated)
                .map_err(|e| render_error(expr, origin, call.location, e.to_string()))?;
        }
        Ok(evaluated)
    }
}

fn render_error(expr: &Expr, origin: &str, location: Location, message: String) -> KasaneError {
    KasaneError::Render {
        template: origin.to_string(),
        expression: expr.to_string(),
        message,
        location,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inheritance::{build_chain, resolve};
    use crate::loader::MemoryLoader;
    use crate::registry::Registry;
    use serde_json::json;

    fn resolved(source: &str, config: &EngineConfig) -> ResolvedTemplate {
        let registry = Registry::new(
            MemoryLoader::new().with_template("t", source),
            config.parse_options(),
        );
        let chain = build_chain(&registry, "t", config.max_chain_depth).unwrap();
        resolve(&chain, &registry, config).unwrap()
    }

    fn render_with(source: &str, data: serde_json::Value, config: &EngineConfig) -> Result<String> {
        let template = resolved(source, config);
        let context = Context::from_json(data).unwrap();
        Renderer::new(config)
            .render(&template, &context)
            .map(Rendered::into_string)
    }

    fn render(source: &str, data: serde_json::Value) -> Result<String> {
        render_with(source, data, &EngineConfig::default())
    }

    #[test]
    fn test_variable_and_escape() {
        assert_eq!(
            render("Hello, {{ name }}!", json!({"name": "<World>"})).unwrap(),
            "Hello, &lt;World&gt;!"
        );
        assert_eq!(
            render("{{ html | safe }}", json!({"html": "<b>&</b>"})).unwrap(),
            "<b>&</b>"
        );
    }

    #[test]
    fn test_autoescape_off() {
        let config = EngineConfig::default().with_autoescape(false);
        assert_eq!(
            render_with("{{ x }}|{{ x | escape }}", json!({"x": "<"}), &config).unwrap(),
            "<|&lt;"
        );
    }

    #[test]
    fn test_escape_filter_is_not_doubled() {
        assert_eq!(render("{{ x | e }}", json!({"x": "&"})).unwrap(), "&amp;");
    }

    #[test]
    fn test_loop_with_metadata() {
        let source = "{% for p in posts %}{{ loop.index }}:{{ p }}{% if not loop.last %},{% endif %}{% endfor %}";
        assert_eq!(
            render(source, json!({"posts": ["a", "b", "c"]})).unwrap(),
            "1:a,2:b,3:c"
        );
    }

    #[test]
    fn test_loop_binding_shadows_for_body_only() {
        let source = "{% for name in names %}{{ name }}{% endfor %}/{{ name }}";
        assert_eq!(
            render(source, json!({"name": "outer", "names": ["x", "y"]})).unwrap(),
            "xy/outer"
        );
    }

    #[test]
    fn test_nested_loops() {
        let source = "{% for row in rows %}[{% for c in row %}{{ c }}{{ loop.length }}{% endfor %}]{% endfor %}";
        assert_eq!(
            render(source, json!({"rows": [[1, 2], [3]]})).unwrap(),
            "[1222][31]"
        );
    }

    #[test]
    fn test_empty_loop_matches_removed_loop() {
        let with_loop = render("a{% for x in xs %}<{{ x }}>{% endfor %}b", json!({"xs": []})).unwrap();
        let without = render("ab", json!({})).unwrap();
        assert_eq!(with_loop, without);
    }

    #[test]
    fn test_non_iterable_loop_target() {
        let err = render("{% for x in n %}{% endfor %}", json!({"n": 5})).unwrap_err();
        match err {
            KasaneError::Render {
                template,
                expression,
                message,
                ..
            } => {
                assert_eq!(template, "t");
                assert_eq!(expression, "n");
                assert!(message.contains("integer"));
            }
            other => panic!("Expected Render, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_variable_policies() {
        let strict = render("{{ missing }}", json!({}));
        assert!(matches!(strict, Err(KasaneError::Render { .. })));

        let config = EngineConfig::default().with_missing_variable(MissingVariablePolicy::Empty);
        assert_eq!(
            render_with("[{{ missing.deep }}]{% for x in nope %}x{% endfor %}", json!({}), &config)
                .unwrap(),
            "[]"
        );
    }

    #[test]
    fn test_default_filter_covers_missing_in_strict_mode() {
        assert_eq!(
            render(r#"{{ title | default("Untitled") }}"#, json!({})).unwrap(),
            "Untitled"
        );
    }

    #[test]
    fn test_conditional_branches() {
        let source = "{% if a %}A{% elif b %}B{% else %}C{% endif %}";
        assert_eq!(render(source, json!({"a": 1, "b": 1})).unwrap(), "A");
        assert_eq!(render(source, json!({"a": 0, "b": "x"})).unwrap(), "B");
        assert_eq!(render(source, json!({"a": [], "b": {}})).unwrap(), "C");
    }

    #[test]
    fn test_absent_test_is_false_in_strict_mode() {
        assert_eq!(
            render("{% if nope %}x{% else %}y{% endif %}", json!({})).unwrap(),
            "y"
        );
        assert_eq!(
            render("{% if not drafts %}none{% endif %}", json!({})).unwrap(),
            "none"
        );
        assert_eq!(
            render("{% if post.tags %}T{% else %}-{% endif %}", json!({"post": {}})).unwrap(),
            "-"
        );
    }

    #[test]
    fn test_null_loop_target_depends_on_policy() {
        let source = "{% for x in xs %}x{% endfor %}done";
        match render(source, json!({"xs": null})) {
            Err(KasaneError::Render {
                expression, message, ..
            }) => {
                assert_eq!(expression, "xs");
                assert_eq!(message, "cannot iterate over null");
            }
            other => panic!("Expected Render, got {other:?}"),
        }

        let config = EngineConfig::default().with_missing_variable(MissingVariablePolicy::Empty);
        assert_eq!(render_with(source, json!({"xs": null}), &config).unwrap(), "done");
    }

    #[test]
    fn test_unrenderable_value() {
        let err = render("{{ items }}", json!({"items": [1]})).unwrap_err();
        assert!(matches!(err, KasaneError::Render { .. }));
    }

    #[test]
    fn test_loop_limit() {
        let config = EngineConfig::default().with_max_loop_iterations(2);
        let result = render_with("{% for x in xs %}{% endfor %}", json!({"xs": [1, 2, 3]}), &config);
        assert!(matches!(result, Err(KasaneError::Render { .. })));
        assert!(render_with("{% for x in xs %}{% endfor %}", json!({"xs": [1, 2]}), &config).is_ok());
    }

    #[test]
    fn test_literal_chunks_are_borrowed() {
        let config = EngineConfig::default();
        let template = resolved("<p>{{ x }}</p>", &config);
        let context = Context::from_json(json!({"x": "y"})).unwrap();
        let rendered = Renderer::new(&config).render(&template, &context).unwrap();
        assert!(matches!(rendered.chunks()[0], Cow::Borrowed("<p>")));
        assert_eq!(rendered.to_string(), "<p>y</p>");
        assert_eq!(rendered.len(), 8);

        let mut buf = Vec::new();
        rendered.write_to(&mut buf).unwrap();
        assert_eq!(buf, b"<p>y</p>");
    }
}
