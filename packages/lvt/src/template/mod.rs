//! Template sources and their AST
//!
//! The template syntax is taken as given: literal HTML interleaved with
//! `{{...}}` tags for substitution (`{{.Path}}`, `{{raw .Path}}`),
//! conditionals (`{{if}}`/`{{else}}`/`{{end}}`), iteration
//! (`{{range}}`/`{{end}}`), context switches (`{{with}}`/`{{end}}`) and
//! composition (`{{template "name" .Expr}}`, `{{block "name" .Expr}}`).
//! Parsing is AST-level, never regex: nested conditionals inside ranges
//! inside conditionals locate correctly because the parser keeps a block
//! stack with source positions.

mod parser;

pub use parser::parse;

use std::collections::HashMap;
use std::fmt;

/// A dot-path expression, evaluated against the current data context.
///
/// `.` is the context itself (empty segment list); `.A.B` walks nested
/// objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    /// Field names, outermost first; empty for `.`
    pub segments: Vec<String>,
}

impl Path {
    /// The bare-context path `.`.
    pub fn context() -> Self {
        Path { segments: Vec::new() }
    }

    /// True for the bare-context path.
    pub fn is_context(&self) -> bool {
        self.segments.is_empty()
    }

    /// Prefix this path with another (used when inlining compositions).
    pub fn scoped_under(&self, prefix: &Path) -> Path {
        let mut segments = prefix.segments.clone();
        segments.extend(self.segments.iter().cloned());
        Path { segments }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".")?;
        write!(f, "{}", self.segments.join("."))
    }
}

/// One node of the parsed template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    /// Literal HTML text
    Text(String),
    /// `{{.Path}}` or `{{raw .Path}}`
    Expr {
        /// The value to stringify into the slot
        path: Path,
        /// Skip HTML escaping when true
        raw: bool,
    },
    /// `{{if .Cond}} … {{else}} … {{end}}`
    If {
        /// Branch selector
        cond: Path,
        /// Taken when `cond` is truthy
        then_body: Vec<TemplateNode>,
        /// Taken otherwise; empty when no `{{else}}`
        else_body: Vec<TemplateNode>,
    },
    /// `{{range .Items}} … {{end}}`
    Range {
        /// The collection to iterate
        over: Path,
        /// Body rendered once per element, with the element as context
        body: Vec<TemplateNode>,
    },
    /// `{{with .Expr}} … {{end}}`, first-class: falsy renders empty
    With {
        /// The new context; also the truthiness gate
        context: Path,
        /// Body rendered with the switched context
        body: Vec<TemplateNode>,
    },
    /// `{{template "name" .Expr}}` (or the include half of `{{block}}`)
    Include {
        /// Name of the referenced template
        name: String,
        /// Data scope for the inclusion; `None` keeps the current context
        data: Option<Path>,
    },
}

/// A parsed template: the root body plus named definitions from
/// `{{block "name" …}}` tags.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedTemplate {
    /// The template's own body
    pub root: Vec<TemplateNode>,
    /// Named bodies available to `{{template}}` inclusion
    pub defines: HashMap<String, Vec<TemplateNode>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_display_and_scoping() {
        let path = Path { segments: vec!["User".into(), "Name".into()] };
        assert_eq!(path.to_string(), ".User.Name");

        let scoped = Path { segments: vec!["Name".into()] }
            .scoped_under(&Path { segments: vec!["User".into()] });
        assert_eq!(scoped.to_string(), ".User.Name");

        assert!(Path::context().is_context());
        assert_eq!(Path::context().to_string(), ".");
    }
}
