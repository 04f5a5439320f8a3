//! Template parser
//!
//! A single forward pass over the source. Text between tags is kept
//! verbatim; `{{…}}` tags are tokenized and matched against a block stack
//! so every error carries the line/column of the tag that caused it.

use std::collections::HashMap;

use crate::error::TemplateError;

use super::{ParsedTemplate, Path, TemplateNode};

/// Parse a template source string.
///
/// # Example
/// ```rust
/// let parsed = lvt::template::parse("<p>Count: {{.N}}</p>").unwrap();
/// assert_eq!(parsed.root.len(), 3);
/// ```
pub fn parse(source: &str) -> Result<ParsedTemplate, TemplateError> {
    Parser::new(source).run()
}

struct Parser<'a> {
    source: &'a str,
    offset: usize,
    line: usize,
    col: usize,
    defines: HashMap<String, Vec<TemplateNode>>,
    stack: Vec<Frame>,
}

/// An open block and where it started, for unclosed-block errors.
struct Frame {
    kind: FrameKind,
    line: usize,
    col: usize,
    body: Vec<TemplateNode>,
}

enum FrameKind {
    Root,
    If { cond: Path, then_body: Option<Vec<TemplateNode>> },
    Range { over: Path },
    With { context: Path },
    Block { name: String, data: Option<Path> },
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Parser {
            source,
            offset: 0,
            line: 1,
            col: 1,
            defines: HashMap::new(),
            stack: vec![Frame {
                kind: FrameKind::Root,
                line: 1,
                col: 1,
                body: Vec::new(),
            }],
        }
    }

    fn run(mut self) -> Result<ParsedTemplate, TemplateError> {
        while self.offset < self.source.len() {
            let rest = &self.source[self.offset..];
            match rest.find("{{") {
                None => {
                    let text = rest.to_string();
                    let len = text.len();
                    self.push_text(text);
                    self.advance(len);
                }
                Some(text_len) => {
                    if text_len > 0 {
                        let text = rest[..text_len].to_string();
                        self.push_text(text);
                        self.advance(text_len);
                    }
                    self.consume_tag()?;
                }
            }
        }
        match self.stack.pop() {
            Some(frame) if matches!(frame.kind, FrameKind::Root) => Ok(ParsedTemplate {
                root: frame.body,
                defines: self.defines,
            }),
            Some(frame) => Err(TemplateError::parse(
                frame.line,
                frame.col,
                format!("unclosed {} block", frame.kind.name()),
            )),
            None => unreachable!("root frame is never popped early"),
        }
    }

    /// Consume one `{{…}}` tag; `self.offset` sits on the `{{`.
    fn consume_tag(&mut self) -> Result<(), TemplateError> {
        let (tag_line, tag_col) = (self.line, self.col);
        let rest = &self.source[self.offset..];
        let close = rest.find("}}").ok_or_else(|| {
            TemplateError::parse(tag_line, tag_col, "unclosed tag: missing }}")
        })?;
        let content = rest[2..close].trim().to_string();
        self.advance(close + 2);

        let words = split_words(&content)
            .map_err(|message| TemplateError::parse(tag_line, tag_col, message))?;
        let Some(head) = words.first() else {
            return Err(TemplateError::parse(tag_line, tag_col, "empty tag"));
        };

        match head.as_str() {
            "if" => {
                let cond = self.expect_path(&words, 1, tag_line, tag_col, "if")?;
                self.expect_arity(&words, 2, tag_line, tag_col)?;
                self.stack.push(Frame {
                    kind: FrameKind::If { cond, then_body: None },
                    line: tag_line,
                    col: tag_col,
                    body: Vec::new(),
                });
            }
            "range" => {
                let over = self.expect_path(&words, 1, tag_line, tag_col, "range")?;
                self.expect_arity(&words, 2, tag_line, tag_col)?;
                self.stack.push(Frame {
                    kind: FrameKind::Range { over },
                    line: tag_line,
                    col: tag_col,
                    body: Vec::new(),
                });
            }
            "with" => {
                let context = self.expect_path(&words, 1, tag_line, tag_col, "with")?;
                self.expect_arity(&words, 2, tag_line, tag_col)?;
                self.stack.push(Frame {
                    kind: FrameKind::With { context },
                    line: tag_line,
                    col: tag_col,
                    body: Vec::new(),
                });
            }
            "block" => {
                let name = expect_name(&words, 1)
                    .ok_or_else(|| {
                        TemplateError::parse(tag_line, tag_col, "block needs a quoted name")
                    })?;
                let data = match words.get(2) {
                    Some(word) => Some(parse_path(word).map_err(|message| {
                        TemplateError::parse(tag_line, tag_col, message)
                    })?),
                    None => None,
                };
                self.expect_arity(&words, 3, tag_line, tag_col)?;
                self.stack.push(Frame {
                    kind: FrameKind::Block { name, data },
                    line: tag_line,
                    col: tag_col,
                    body: Vec::new(),
                });
            }
            "template" => {
                let name = expect_name(&words, 1)
                    .ok_or_else(|| {
                        TemplateError::parse(tag_line, tag_col, "template needs a quoted name")
                    })?;
                let data = match words.get(2) {
                    Some(word) => Some(parse_path(word).map_err(|message| {
                        TemplateError::parse(tag_line, tag_col, message)
                    })?),
                    None => None,
                };
                self.expect_arity(&words, 3, tag_line, tag_col)?;
                self.push_node(TemplateNode::Include { name, data });
            }
            "raw" => {
                let path = self.expect_path(&words, 1, tag_line, tag_col, "raw")?;
                self.expect_arity(&words, 2, tag_line, tag_col)?;
                self.push_node(TemplateNode::Expr { path, raw: true });
            }
            "else" => {
                self.expect_arity(&words, 1, tag_line, tag_col)?;
                let frame = self.stack.last_mut().expect("stack never empty");
                match &mut frame.kind {
                    FrameKind::If { then_body, .. } if then_body.is_none() => {
                        *then_body = Some(std::mem::take(&mut frame.body));
                    }
                    FrameKind::If { .. } => {
                        return Err(TemplateError::parse(
                            tag_line,
                            tag_col,
                            "duplicate {{else}}",
                        ));
                    }
                    _ => {
                        return Err(TemplateError::parse(
                            tag_line,
                            tag_col,
                            "{{else}} outside {{if}}",
                        ));
                    }
                }
            }
            "end" => {
                self.expect_arity(&words, 1, tag_line, tag_col)?;
                if self.stack.len() == 1 {
                    return Err(TemplateError::parse(
                        tag_line,
                        tag_col,
                        "{{end}} without an open block",
                    ));
                }
                let frame = self.stack.pop().expect("checked above");
                let node = match frame.kind {
                    FrameKind::If { cond, then_body } => match then_body {
                        Some(then_body) => TemplateNode::If {
                            cond,
                            then_body,
                            else_body: frame.body,
                        },
                        None => TemplateNode::If {
                            cond,
                            then_body: frame.body,
                            else_body: Vec::new(),
                        },
                    },
                    FrameKind::Range { over } => TemplateNode::Range { over, body: frame.body },
                    FrameKind::With { context } => {
                        TemplateNode::With { context, body: frame.body }
                    }
                    FrameKind::Block { name, data } => {
                        self.defines.insert(name.clone(), frame.body);
                        TemplateNode::Include { name, data }
                    }
                    FrameKind::Root => unreachable!("root is guarded above"),
                };
                self.push_node(node);
            }
            word if word.starts_with('.') => {
                self.expect_arity(&words, 1, tag_line, tag_col)?;
                let path = parse_path(word)
                    .map_err(|message| TemplateError::parse(tag_line, tag_col, message))?;
                self.push_node(TemplateNode::Expr { path, raw: false });
            }
            other => {
                return Err(TemplateError::parse(
                    tag_line,
                    tag_col,
                    format!("unknown tag {other:?}"),
                ));
            }
        }
        Ok(())
    }

    fn expect_path(
        &self,
        words: &[String],
        at: usize,
        line: usize,
        col: usize,
        tag: &str,
    ) -> Result<Path, TemplateError> {
        let word = words
            .get(at)
            .ok_or_else(|| TemplateError::parse(line, col, format!("{tag} needs an expression")))?;
        parse_path(word).map_err(|message| TemplateError::parse(line, col, message))
    }

    fn expect_arity(
        &self,
        words: &[String],
        max: usize,
        line: usize,
        col: usize,
    ) -> Result<(), TemplateError> {
        if words.len() > max {
            return Err(TemplateError::parse(
                line,
                col,
                format!("unexpected argument {:?}", words[max]),
            ));
        }
        Ok(())
    }

    fn push_text(&mut self, text: String) {
        self.push_node(TemplateNode::Text(text));
    }

    fn push_node(&mut self, node: TemplateNode) {
        self.stack
            .last_mut()
            .expect("stack never empty")
            .body
            .push(node);
    }

    /// Move past `len` bytes, tracking line/column.
    fn advance(&mut self, len: usize) {
        for b in self.source[self.offset..self.offset + len].bytes() {
            if b == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.offset += len;
    }
}

impl FrameKind {
    fn name(&self) -> &'static str {
        match self {
            FrameKind::Root => "root",
            FrameKind::If { .. } => "if",
            FrameKind::Range { .. } => "range",
            FrameKind::With { .. } => "with",
            FrameKind::Block { .. } => "block",
        }
    }
}

/// Split tag content on whitespace, keeping `"quoted names"` whole.
fn split_words(content: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut chars = content.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut word = String::from("\"");
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(c) => word.push(c),
                    None => return Err("unterminated string in tag".into()),
                }
            }
            word.push('"');
            words.push(word);
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
            words.push(word);
        }
    }
    Ok(words)
}

/// `"name"` → `name`, for `{{template}}`/`{{block}}` arguments.
fn expect_name(words: &[String], at: usize) -> Option<String> {
    let word = words.get(at)?;
    let inner = word.strip_prefix('"')?.strip_suffix('"')?;
    if inner.is_empty() {
        return None;
    }
    Some(inner.to_string())
}

fn parse_path(word: &str) -> Result<Path, String> {
    let Some(rest) = word.strip_prefix('.') else {
        return Err(format!("expected a dot-path expression, got {word:?}"));
    };
    if rest.is_empty() {
        return Ok(Path::context());
    }
    let mut segments = Vec::new();
    for segment in rest.split('.') {
        if segment.is_empty() {
            return Err(format!("empty path segment in {word:?}"));
        }
        let mut chars = segment.chars();
        let first = chars.next().expect("segment is non-empty");
        if !(first.is_ascii_alphabetic() || first == '_')
            || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(format!("invalid path segment {segment:?}"));
        }
        segments.push(segment.to_string());
    }
    Ok(Path { segments })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Path {
        parse_path(s).unwrap()
    }

    #[test]
    fn test_text_and_substitution() {
        let parsed = parse("<p>Count: {{.N}}</p>").unwrap();
        assert_eq!(
            parsed.root,
            vec![
                TemplateNode::Text("<p>Count: ".into()),
                TemplateNode::Expr { path: path(".N"), raw: false },
                TemplateNode::Text("</p>".into()),
            ]
        );
    }

    #[test]
    fn test_nested_blocks() {
        let parsed = parse(
            "{{if .Show}}{{range .Items}}<li>{{if .Done}}x{{else}}o{{end}}</li>{{end}}{{end}}",
        )
        .unwrap();
        let TemplateNode::If { then_body, else_body, .. } = &parsed.root[0] else {
            panic!("expected if");
        };
        assert!(else_body.is_empty());
        let TemplateNode::Range { body, .. } = &then_body[0] else {
            panic!("expected range");
        };
        assert!(matches!(body[1], TemplateNode::If { .. }));
    }

    #[test]
    fn test_with_and_raw() {
        let parsed = parse("{{with .User}}{{raw .Bio}}{{end}}").unwrap();
        let TemplateNode::With { context, body } = &parsed.root[0] else {
            panic!("expected with");
        };
        assert_eq!(*context, path(".User"));
        assert_eq!(body[0], TemplateNode::Expr { path: path(".Bio"), raw: true });
    }

    #[test]
    fn test_block_defines_and_includes() {
        let parsed = parse("{{block \"row\" .Item}}<td>{{.Name}}</td>{{end}}").unwrap();
        assert!(parsed.defines.contains_key("row"));
        assert_eq!(
            parsed.root[0],
            TemplateNode::Include { name: "row".into(), data: Some(path(".Item")) }
        );
    }

    #[test]
    fn test_error_positions() {
        let err = parse("<div>\n  {{if .A}}</div>").unwrap_err();
        assert_eq!(
            err,
            TemplateError::parse(2, 3, "unclosed if block")
        );

        let err = parse("{{bogus}}").unwrap_err();
        assert!(matches!(err, TemplateError::Parse { line: 1, col: 1, .. }));

        let err = parse("{{.N").unwrap_err();
        assert!(matches!(err, TemplateError::Parse { .. }));
    }

    #[test]
    fn test_else_outside_if_is_rejected() {
        let err = parse("{{range .Items}}{{else}}{{end}}").unwrap_err();
        assert!(matches!(err, TemplateError::Parse { .. }));
    }
}
