//! Shape compilation
//!
//! Compiles a parsed template into its *shape*: the immutable skeleton every
//! render of that template shares. A shape is a flat arena of nodes with
//! child edges as indices, so the renderer and differ walk plain `Vec`s and
//! no pointer cycles can form. Each node records its static segments, one
//! [`SlotKind`] per dynamic slot, and a fragment ID derived purely from the
//! node's location in the shape (`"root"`, then `"<parent>.<slot>"`),
//! deterministic across runs and independent of data.
//!
//! Compositions (`{{template}}`/`{{block}}`) are inlined here with their
//! data scope rewritten into the including shape; mutual recursion is a
//! compile error.

use std::sync::Arc;

use crate::error::TemplateError;
use crate::template::{parse, ParsedTemplate, Path, TemplateNode};

/// Index of a shape node inside its [`CompiledTemplate`] arena.
pub type ShapeId = usize;

/// The root shape's arena index.
pub const ROOT_SHAPE: ShapeId = 0;

/// A compiled template: the shared, immutable shape of every render.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    shapes: Vec<ShapeNode>,
}

/// One static/dynamic node of the compiled shape.
#[derive(Debug, Clone)]
pub struct ShapeNode {
    /// Fragment identity; stable across process restarts
    pub fragment_id: Arc<str>,
    /// Static segments; always `slots.len() + 1` entries
    pub statics: Arc<[String]>,
    /// What fills each dynamic slot
    pub slots: Vec<SlotKind>,
}

/// The compiled form of one dynamic slot.
#[derive(Debug, Clone)]
pub enum SlotKind {
    /// A stringified expression
    Expr {
        /// Data path producing the value
        path: Path,
        /// Skip HTML escaping when true
        raw: bool,
    },
    /// A conditional sub-tree; the untaken side renders as the empty string
    Cond {
        /// Branch selector
        cond: Path,
        /// Shape wrapped when `cond` is truthy
        then_shape: ShapeId,
        /// Shape wrapped when falsy; `None` renders empty
        else_shape: Option<ShapeId>,
    },
    /// A context switch; falsy context renders as the empty string
    With {
        /// New data context, also the truthiness gate
        context: Path,
        /// Body shape
        body: ShapeId,
    },
    /// An iterated collection of same-shape children
    Range {
        /// The collection to iterate
        over: Path,
        /// Shared child shape
        child: ShapeId,
        /// How each child's stable key is produced
        key: KeyRule,
    },
}

/// Key extraction rule for one range slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRule {
    /// The child's `data-key="{{expr}}"` attribute expression
    Attr(Path),
    /// No declared key: the iteration index
    Index,
}

impl CompiledTemplate {
    /// Parse and compile a template source in one step.
    ///
    /// # Example
    /// ```rust
    /// use lvt::compile::CompiledTemplate;
    ///
    /// let tmpl = CompiledTemplate::compile("<p>Count: {{.N}}</p>").unwrap();
    /// assert_eq!(tmpl.root().statics.as_ref(), ["<p>Count: ", "</p>"]);
    /// ```
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let parsed = parse(source)?;
        Self::from_parsed(&parsed)
    }

    /// Compile an already parsed template.
    pub fn from_parsed(parsed: &ParsedTemplate) -> Result<Self, TemplateError> {
        let inlined = inline_includes(&parsed.root, parsed, &mut Vec::new())?;
        let mut compiler = Compiler { shapes: Vec::new() };
        compiler.build(&inlined, "root".to_string());
        Ok(CompiledTemplate { shapes: compiler.shapes })
    }

    /// The root shape node.
    pub fn root(&self) -> &ShapeNode {
        &self.shapes[ROOT_SHAPE]
    }

    /// Look up a shape node by arena index.
    pub fn shape(&self, id: ShapeId) -> &ShapeNode {
        &self.shapes[id]
    }

    /// Number of nodes in the arena.
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Every fragment ID in the shape, in arena order.
    pub fn fragment_ids(&self) -> impl Iterator<Item = &str> {
        self.shapes.iter().map(|s| s.fragment_id.as_ref())
    }
}

struct Compiler {
    shapes: Vec<ShapeNode>,
}

impl Compiler {
    /// Compile one node body into a shape, reserving the arena slot first so
    /// parents always sit before their children.
    fn build(&mut self, nodes: &[TemplateNode], fragment_id: String) -> ShapeId {
        let id = self.shapes.len();
        self.shapes.push(ShapeNode {
            fragment_id: fragment_id.clone().into(),
            statics: Arc::from(Vec::<String>::new()),
            slots: Vec::new(),
        });

        let mut statics: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut slots: Vec<SlotKind> = Vec::new();

        for node in nodes {
            match node {
                TemplateNode::Text(text) => current.push_str(text),
                TemplateNode::Expr { path, raw } => {
                    statics.push(std::mem::take(&mut current));
                    slots.push(SlotKind::Expr { path: path.clone(), raw: *raw });
                }
                TemplateNode::If { cond, then_body, else_body } => {
                    let child_id = format!("{fragment_id}.{}", slots.len());
                    let then_shape = self.build(then_body, child_id.clone());
                    let else_shape = if else_body.is_empty() {
                        None
                    } else {
                        Some(self.build(else_body, child_id))
                    };
                    statics.push(std::mem::take(&mut current));
                    slots.push(SlotKind::Cond {
                        cond: cond.clone(),
                        then_shape,
                        else_shape,
                    });
                }
                TemplateNode::With { context, body } => {
                    let child_id = format!("{fragment_id}.{}", slots.len());
                    let body = self.build(body, child_id);
                    statics.push(std::mem::take(&mut current));
                    slots.push(SlotKind::With { context: context.clone(), body });
                }
                TemplateNode::Range { over, body } => {
                    let child_id = format!("{fragment_id}.{}", slots.len());
                    let child = self.build(body, child_id);
                    let key = key_rule(&self.shapes[child]);
                    statics.push(std::mem::take(&mut current));
                    slots.push(SlotKind::Range { over: over.clone(), child, key });
                }
                TemplateNode::Include { .. } => {
                    unreachable!("includes are inlined before shape building")
                }
            }
        }
        statics.push(current);

        self.shapes[id].statics = Arc::from(statics);
        self.shapes[id].slots = slots;
        id
    }
}

/// Detect `data-key="{{expr}}"` on a range child's opening tag.
///
/// The attribute compiles to a static segment ending in `data-key="`
/// immediately followed by a substitution slot; that slot's path becomes
/// the key rule.
fn key_rule(child: &ShapeNode) -> KeyRule {
    match (child.statics.first(), child.slots.first()) {
        (Some(first), Some(SlotKind::Expr { path, .. }))
            if first.ends_with("data-key=\"") =>
        {
            KeyRule::Attr(path.clone())
        }
        _ => KeyRule::Index,
    }
}

/// Replace every `Include` with the named body, scoped to its data argument.
fn inline_includes(
    nodes: &[TemplateNode],
    parsed: &ParsedTemplate,
    stack: &mut Vec<String>,
) -> Result<Vec<TemplateNode>, TemplateError> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            TemplateNode::Include { name, data } => {
                if stack.iter().any(|n| n == name) {
                    let mut cycle = stack.join(" -> ");
                    cycle.push_str(" -> ");
                    cycle.push_str(name);
                    return Err(TemplateError::RecursiveInclude { cycle });
                }
                let body = parsed
                    .defines
                    .get(name)
                    .ok_or_else(|| TemplateError::UnknownTemplate(name.clone()))?;
                stack.push(name.clone());
                let mut inlined = inline_includes(body, parsed, stack)?;
                stack.pop();
                if let Some(prefix) = data.as_ref().filter(|p| !p.is_context()) {
                    inlined = inlined.into_iter().map(|n| rescope(n, prefix)).collect();
                }
                out.extend(inlined);
            }
            TemplateNode::If { cond, then_body, else_body } => out.push(TemplateNode::If {
                cond: cond.clone(),
                then_body: inline_includes(then_body, parsed, stack)?,
                else_body: inline_includes(else_body, parsed, stack)?,
            }),
            TemplateNode::Range { over, body } => out.push(TemplateNode::Range {
                over: over.clone(),
                body: inline_includes(body, parsed, stack)?,
            }),
            TemplateNode::With { context, body } => out.push(TemplateNode::With {
                context: context.clone(),
                body: inline_includes(body, parsed, stack)?,
            }),
            other => out.push(other.clone()),
        }
    }
    Ok(out)
}

/// Prefix every path that resolves against the inclusion's root context.
///
/// Bodies of `range`/`with` rebind the context, so only their head
/// expressions are rewritten; `if` branches keep the context and recurse.
fn rescope(node: TemplateNode, prefix: &Path) -> TemplateNode {
    match node {
        TemplateNode::Text(text) => TemplateNode::Text(text),
        TemplateNode::Expr { path, raw } => TemplateNode::Expr {
            path: path.scoped_under(prefix),
            raw,
        },
        TemplateNode::If { cond, then_body, else_body } => TemplateNode::If {
            cond: cond.scoped_under(prefix),
            then_body: then_body.into_iter().map(|n| rescope(n, prefix)).collect(),
            else_body: else_body.into_iter().map(|n| rescope(n, prefix)).collect(),
        },
        TemplateNode::Range { over, body } => TemplateNode::Range {
            over: over.scoped_under(prefix),
            body,
        },
        TemplateNode::With { context, body } => TemplateNode::With {
            context: context.scoped_under(prefix),
            body,
        },
        TemplateNode::Include { .. } => {
            unreachable!("includes are resolved before rescoping")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_shape() {
        let tmpl = CompiledTemplate::compile("<p>Count: {{.N}}</p>").unwrap();
        let root = tmpl.root();
        assert_eq!(root.statics.as_ref(), ["<p>Count: ", "</p>"]);
        assert_eq!(root.slots.len(), 1);
        assert_eq!(root.fragment_id.as_ref(), "root");
    }

    #[test]
    fn test_fragment_ids_follow_slot_paths() {
        let tmpl = CompiledTemplate::compile(
            "<div>{{.A}}{{if .Show}}<b>{{.Msg}}</b>{{end}}</div>",
        )
        .unwrap();
        let ids: Vec<&str> = tmpl.fragment_ids().collect();
        assert_eq!(ids, ["root", "root.1"]);
    }

    #[test]
    fn test_branches_share_fragment_id() {
        let tmpl =
            CompiledTemplate::compile("{{if .On}}<b>{{.A}}</b>{{else}}<i>{{.B}}</i>{{end}}")
                .unwrap();
        let SlotKind::Cond { then_shape, else_shape, .. } = &tmpl.root().slots[0] else {
            panic!("expected cond slot");
        };
        assert_eq!(
            tmpl.shape(*then_shape).fragment_id,
            tmpl.shape((*else_shape).unwrap()).fragment_id
        );
    }

    #[test]
    fn test_range_key_rule_from_data_key() {
        let tmpl = CompiledTemplate::compile(
            "<ul>{{range .Items}}<li data-key=\"{{.ID}}\">{{.Name}}</li>{{end}}</ul>",
        )
        .unwrap();
        let SlotKind::Range { key, child, .. } = &tmpl.root().slots[0] else {
            panic!("expected range slot");
        };
        assert!(matches!(key, KeyRule::Attr(p) if p.to_string() == ".ID"));
        assert_eq!(
            tmpl.shape(*child).statics.as_ref(),
            ["<li data-key=\"", "\">", "</li>"]
        );
    }

    #[test]
    fn test_keyless_range_falls_back_to_index() {
        let tmpl =
            CompiledTemplate::compile("{{range .Items}}<li>{{.Name}}</li>{{end}}").unwrap();
        let SlotKind::Range { key, .. } = &tmpl.root().slots[0] else {
            panic!("expected range slot");
        };
        assert_eq!(*key, KeyRule::Index);
    }

    #[test]
    fn test_include_inlines_with_scope() {
        let tmpl = CompiledTemplate::compile(
            "{{block \"badge\" .User}}<b>{{.Name}}</b>{{end}}",
        )
        .unwrap();
        // The include inlined into the root shape with `.User` prefixing.
        let root = tmpl.root();
        assert_eq!(root.statics.as_ref(), ["<b>", "</b>"]);
        let SlotKind::Expr { path, .. } = &root.slots[0] else {
            panic!("expected expr slot");
        };
        assert_eq!(path.to_string(), ".User.Name");
    }

    #[test]
    fn test_recursive_include_is_an_error() {
        let err = CompiledTemplate::compile("{{block \"a\" .}}{{template \"a\"}}{{end}}")
            .unwrap_err();
        assert!(matches!(err, TemplateError::RecursiveInclude { .. }));
    }

    #[test]
    fn test_unknown_template_is_an_error() {
        let err = CompiledTemplate::compile("{{template \"missing\"}}").unwrap_err();
        assert_eq!(err, TemplateError::UnknownTemplate("missing".into()));
    }
}
