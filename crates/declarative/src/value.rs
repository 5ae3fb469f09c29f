//! Attribute values and references between resources
//!
//! An input attribute is either a literal, a reference to another
//! resource's output, or a computed value derived from one or more
//! references. References are plain `(node, key)` lookups resolved through
//! the graph; they never point at the producing node directly.

use crate::error::Error;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Pointer from an input to another resource's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    /// Id of the producing node
    pub node: String,
    /// Output key on the producing node
    pub key: String,
}

impl Reference {
    pub fn new(node: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.key)
    }
}

/// Function applied to the resolved values of a computed attribute's
/// references, in declaration order.
pub type ComputeFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// A value derived from other resources' outputs.
#[derive(Clone)]
pub struct Computed {
    name: String,
    dependencies: Vec<Reference>,
    func: ComputeFn,
}

impl Computed {
    pub fn new(
        name: impl Into<String>,
        dependencies: Vec<Reference>,
        func: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            dependencies,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[Reference] {
        &self.dependencies
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

// Functions cannot be compared, so two computations are the same when they
// have the same name over the same references.
impl PartialEq for Computed {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.dependencies == other.dependencies
    }
}

/// A (possibly nested) input attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Literal(Value),
    Reference(Reference),
    Computed(Computed),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

/// Why an attribute could not be resolved to a literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The referenced output is not (yet) available
    Unresolved(Reference),
    /// A computed value rejected its inputs
    Compute { function: String, message: String },
}

impl ResolveError {
    /// Attach the id of the node being resolved.
    pub fn into_error(self, node: &str) -> Error {
        match self {
            ResolveError::Unresolved(r) => Error::UnresolvedReference {
                node: node.to_string(),
                source_id: r.node,
                key: r.key,
            },
            ResolveError::Compute { function, message } => Error::Compute {
                node: node.to_string(),
                function,
                message,
            },
        }
    }
}

impl AttrValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        AttrValue::Literal(value.into())
    }

    pub fn reference(node: impl Into<String>, key: impl Into<String>) -> Self {
        AttrValue::Reference(Reference::new(node, key))
    }

    pub fn computed(
        name: impl Into<String>,
        dependencies: Vec<Reference>,
        func: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        AttrValue::Computed(Computed::new(name, dependencies, func))
    }

    /// Concatenate literal text and references into a single string.
    pub fn concat(parts: Vec<AttrValue>) -> Self {
        let mut segments = Vec::with_capacity(parts.len());
        let mut dependencies = Vec::new();
        for part in parts {
            match part {
                AttrValue::Reference(r) => {
                    segments.push(Segment::Ref(dependencies.len()));
                    dependencies.push(r);
                }
                AttrValue::Literal(v) => segments.push(Segment::Text(render(&v))),
                AttrValue::Computed(c) => {
                    let start = dependencies.len();
                    dependencies.extend(c.dependencies.iter().cloned());
                    segments.push(Segment::Nested(c, start..dependencies.len()));
                }
                tree => {
                    let start = dependencies.len();
                    let refs: Vec<Reference> = tree.references().into_iter().cloned().collect();
                    dependencies.extend(refs.iter().cloned());
                    segments.push(Segment::Tree(tree, refs, start..dependencies.len()));
                }
            }
        }
        Self::from_segments("concat", segments, dependencies)
    }

    /// Extract a value from a structured output, e.g. `statuses[0].url`.
    pub fn pluck(reference: Reference, path: &str) -> std::result::Result<Self, String> {
        let path = parse_path(path)?;
        let name = format!("{reference}{}", display_path(&path));
        Ok(AttrValue::computed(name, vec![reference], move |values| {
            walk_path(&values[0], &path)
        }))
    }

    /// Parse a template string containing `${node.key}` references.
    ///
    /// A template that is exactly one reference becomes a `Reference` (or a
    /// path extraction when it carries one). Text mixed with references
    /// becomes an interpolating `Computed`. Text without references stays a
    /// literal string.
    pub fn template(text: &str) -> std::result::Result<Self, String> {
        let mut segments = Vec::new();
        let mut dependencies = Vec::new();
        let mut paths = Vec::new();
        let mut last = 0;

        for caps in TEMPLATE_RE.captures_iter(text) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
            if whole.start > last {
                segments.push(Segment::Text(text[last..whole.start].to_string()));
            }
            let reference = Reference::new(&caps[1], &caps[2]);
            let path = parse_path(caps.get(3).map_or("", |m| m.as_str()))?;
            segments.push(Segment::Ref(dependencies.len()));
            dependencies.push(reference);
            paths.push(path);
            last = whole.end;
        }

        if dependencies.is_empty() {
            return Ok(AttrValue::literal(text));
        }
        if last < text.len() {
            segments.push(Segment::Text(text[last..].to_string()));
        }

        if segments.len() == 1 {
            let reference = dependencies.remove(0);
            let path = paths.remove(0);
            if path.is_empty() {
                return Ok(AttrValue::Reference(reference));
            }
            let name = format!("{reference}{}", display_path(&path));
            return Ok(AttrValue::computed(name, vec![reference], move |values| {
                walk_path(&values[0], &path)
            }));
        }

        let segments: Vec<_> = segments
            .into_iter()
            .map(|s| match s {
                Segment::Ref(i) => Segment::PathRef(i, paths[i].clone()),
                other => other,
            })
            .collect();
        Ok(Self::from_segments("interpolate", segments, dependencies))
    }

    fn from_segments(name: &str, segments: Vec<Segment>, dependencies: Vec<Reference>) -> Self {
        AttrValue::computed(name, dependencies, move |values| {
            let mut out = String::new();
            for segment in &segments {
                match segment {
                    Segment::Text(t) => out.push_str(t),
                    Segment::Ref(i) => out.push_str(&render(&values[*i])),
                    Segment::PathRef(i, path) => {
                        out.push_str(&render(&walk_path(&values[*i], path)?));
                    }
                    Segment::Nested(c, range) => {
                        let value = (c.func)(&values[range.clone()])
                            .map_err(|e| format!("{}: {e}", c.name))?;
                        out.push_str(&render(&value));
                    }
                    Segment::Tree(tree, refs, range) => {
                        let resolved = &values[range.clone()];
                        let lookup = |r: &Reference| {
                            refs.iter()
                                .position(|x| x == r)
                                .map(|i| resolved[i].clone())
                        };
                        let value = tree.resolve(&lookup).map_err(|e| match e {
                            ResolveError::Unresolved(r) => format!("{r} is not available"),
                            ResolveError::Compute { function, message } => {
                                format!("{function}: {message}")
                            }
                        })?;
                        out.push_str(&render(&value));
                    }
                }
            }
            Ok(Value::String(out))
        })
    }

    /// Visit every reference in this value, including computed dependencies.
    pub fn visit_references<'a>(&'a self, visit: &mut impl FnMut(&'a Reference)) {
        match self {
            AttrValue::Literal(_) => {}
            AttrValue::Reference(r) => visit(r),
            AttrValue::Computed(c) => c.dependencies.iter().for_each(|r| visit(r)),
            AttrValue::List(items) => items.iter().for_each(|v| v.visit_references(visit)),
            AttrValue::Map(map) => map.values().for_each(|v| v.visit_references(visit)),
        }
    }

    /// Collect every reference in this value.
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.visit_references(&mut |r| refs.push(r));
        refs
    }

    /// Resolve to a literal using `lookup` for referenced outputs.
    pub fn resolve<F>(&self, lookup: &F) -> std::result::Result<Value, ResolveError>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            AttrValue::Literal(v) => Ok(v.clone()),
            AttrValue::Reference(r) => lookup(r).ok_or_else(|| ResolveError::Unresolved(r.clone())),
            AttrValue::Computed(c) => {
                let values = c
                    .dependencies
                    .iter()
                    .map(|r| lookup(r).ok_or_else(|| ResolveError::Unresolved(r.clone())))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                (c.func)(&values).map_err(|message| ResolveError::Compute {
                    function: c.name.clone(),
                    message,
                })
            }
            AttrValue::List(items) => items
                .iter()
                .map(|v| v.resolve(lookup))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::Array),
            AttrValue::Map(map) => map
                .iter()
                .map(|(k, v)| v.resolve(lookup).map(|v| (k.clone(), v)))
                .collect::<std::result::Result<serde_json::Map<_, _>, _>>()
                .map(Value::Object),
        }
    }

    /// Render unresolved references as `${node.key}` for display.
    pub fn describe(&self) -> Value {
        match self {
            AttrValue::Literal(v) => v.clone(),
            AttrValue::List(items) => Value::Array(items.iter().map(Self::describe).collect()),
            AttrValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.describe()))
                    .collect(),
            ),
            other => Value::String(other.to_string()),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Reference(r) => write!(f, "${{{r}}}"),
            AttrValue::Computed(c) => {
                let deps: Vec<String> = c.dependencies.iter().map(ToString::to_string).collect();
                write!(f, "${{{}({})}}", c.name, deps.join(", "))
            }
            other => write!(f, "{}", other.describe()),
        }
    }
}

impl From<Value> for AttrValue {
    /// Convert a JSON tree, keeping containers walkable.
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => AttrValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                AttrValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            other => AttrValue::Literal(other),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::literal(value)
    }
}

impl From<Reference> for AttrValue {
    fn from(value: Reference) -> Self {
        AttrValue::Reference(value)
    }
}

// ============================================================================
// Templates and paths
// ============================================================================

static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_-]+)\.([A-Za-z0-9_-]+)((?:\.[A-Za-z0-9_-]+|\[[0-9]+\])*)\}")
        .expect("template pattern is valid")
});

#[derive(Clone)]
enum Segment {
    Text(String),
    Ref(usize),
    PathRef(usize, Vec<PathStep>),
    Nested(Computed, std::ops::Range<usize>),
    /// List or map part, resolved with its own references
    Tree(AttrValue, Vec<Reference>, std::ops::Range<usize>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathStep {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> std::result::Result<Vec<PathStep>, String> {
    let mut steps = Vec::new();
    let mut rest = path;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let end = after
                .find(']')
                .ok_or_else(|| format!("unclosed index in path `{path}`"))?;
            let index = after[..end]
                .parse()
                .map_err(|_| format!("invalid index in path `{path}`"))?;
            steps.push(PathStep::Index(index));
            rest = &after[end + 1..];
        } else {
            let after = rest.strip_prefix('.').unwrap_or(rest);
            let end = after.find(['.', '[']).unwrap_or(after.len());
            if end == 0 {
                return Err(format!("empty key in path `{path}`"));
            }
            steps.push(PathStep::Key(after[..end].to_string()));
            rest = &after[end..];
        }
    }
    Ok(steps)
}

fn display_path(path: &[PathStep]) -> String {
    path.iter()
        .map(|step| match step {
            PathStep::Key(k) => format!(".{k}"),
            PathStep::Index(i) => format!("[{i}]"),
        })
        .collect()
}

fn walk_path(value: &Value, path: &[PathStep]) -> std::result::Result<Value, String> {
    let mut current = value;
    for step in path {
        current = match step {
            PathStep::Key(k) => current.get(k.as_str()),
            PathStep::Index(i) => current.get(*i),
        }
        .ok_or_else(|| format!("`{}` not found", display_path(path)))?;
    }
    Ok(current.clone())
}

/// Render a value as template text: strings without quotes, the rest as JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
