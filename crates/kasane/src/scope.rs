//! Variable resolution during rendering: loop scopes over a read-only context.

use crate::context::Context;
use crate::value::Value;
use kasane_ast::Path;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Name under which loop metadata is visible inside a loop body.
pub(crate) const LOOP_VARIABLE: &str = "loop";

/// One loop iteration's bindings.
struct Frame<'a> {
    binding: &'a str,
    item: Value,
    index0: usize,
    length: usize,
}

impl Frame<'_> {
    fn metadata(&self) -> Value {
        let mut meta = BTreeMap::new();
        meta.insert("index".to_string(), Value::Integer(self.index0 as i64 + 1));
        meta.insert("index0".to_string(), Value::Integer(self.index0 as i64));
        meta.insert("first".to_string(), Value::Bool(self.index0 == 0));
        meta.insert("last".to_string(), Value::Bool(self.index0 + 1 == self.length));
        meta.insert("length".to_string(), Value::Integer(self.length as i64));
        Value::Object(meta)
    }
}

/// Scope stack for variable resolution, innermost frame last.
pub(crate) struct Scope<'a> {
    context: &'a Context,
    frames: Vec<Frame<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new(context: &'a Context) -> Self {
        Self {
            context,
            frames: Vec::new(),
        }
    }

    /// Push a loop iteration. The binding shadows outer names until popped.
    pub fn push(&mut self, binding: &'a str, item: Value, index0: usize, length: usize) {
        self.frames.push(Frame {
            binding,
            item,
            index0,
            length,
        });
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Resolve a path, returning `None` when any step is missing.
    pub fn lookup(&self, path: &Path) -> Option<Cow<'_, Value>> {
        let root = self.lookup_root(path.root())?;

        path.segments()
            .iter()
            .try_fold(root, |value, segment| match value {
                Cow::Borrowed(value) => value.get(segment).map(Cow::Borrowed),
                Cow::Owned(value) => value.get(segment).cloned().map(Cow::Owned),
            })
    }

    fn lookup_root(&self, name: &str) -> Option<Cow<'_, Value>> {
        // Search frames from innermost to outermost
        for frame in self.frames.iter().rev() {
            if frame.binding == name {
                return Some(Cow::Borrowed(&frame.item));
            }
        }

        if name == LOOP_VARIABLE {
            if let Some(frame) = self.frames.last() {
                return Some(Cow::Owned(frame.metadata()));
            }
        }

        self.context.get(name).map(Cow::Borrowed)
    }
}
