//! Template parser.
//!
//! Parses the small template language components render from:
//!
//! - static attributes: `class="greeting"`
//! - property bindings: `[name]="user.name"`, `[attr.aria-label]="label"`
//! - event bindings: `(click)="select($event)"`
//! - text interpolation: `Hello {{ name }}!`
//!
//! Expressions are field paths, zero-argument calls, literals and `!`.
//! Structural directives are not supported.

use crate::result::{SettleError, SettleResult};
use serde_json::Value;

/// Elements that never have children or a closing tag
pub const VOID_ELEMENTS: [&str; 6] = ["input", "br", "img", "hr", "meta", "link"];

/// Binding expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Field path (`user.name`)
    Field(Vec<String>),
    /// Zero-argument method call (`getName()`), read like a field
    Call(String),
    /// Literal value
    Literal(Value),
    /// Logical negation
    Not(Box<Expr>),
}

fn template_error(message: impl Into<String>) -> SettleError {
    SettleError::Template {
        message: message.into(),
    }
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'
}

impl Expr {
    /// Parse an expression
    ///
    /// # Errors
    ///
    /// Returns `Template` for anything outside the expression subset
    pub fn parse(text: &str) -> SettleResult<Self> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix('!') {
            return Ok(Self::Not(Box::new(Self::parse(rest)?)));
        }
        match text {
            "" => return Err(template_error("empty expression")),
            "true" => return Ok(Self::Literal(Value::Bool(true))),
            "false" => return Ok(Self::Literal(Value::Bool(false))),
            "null" | "undefined" => return Ok(Self::Literal(Value::Null)),
            _ => {}
        }
        let quoted = |q: char| text.len() >= 2 && text.starts_with(q) && text.ends_with(q);
        if quoted('\'') || quoted('"') {
            return Ok(Self::Literal(Value::String(text[1..text.len() - 1].to_string())));
        }
        if text.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
            return serde_json::from_str::<serde_json::Number>(text)
                .map(|n| Self::Literal(Value::Number(n)))
                .map_err(|_| template_error(format!("invalid number '{text}'")));
        }
        if let Some(name) = text.strip_suffix("()") {
            if !name.is_empty() && name.chars().all(|c| is_path_char(c) && c != '.') {
                return Ok(Self::Call(name.to_string()));
            }
        }
        if text.chars().all(is_path_char) && !text.starts_with('.') && !text.ends_with('.') {
            return Ok(Self::Field(text.split('.').map(str::to_string).collect()));
        }
        Err(template_error(format!("unsupported expression '{text}'")))
    }

    /// Evaluate against a field lookup. Missing fields evaluate to `null`.
    pub fn eval(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Call(name) => lookup(name).unwrap_or(Value::Null),
            Self::Not(inner) => Value::Bool(!truthy(&inner.eval(lookup))),
            Self::Field(path) => {
                let mut segments = path.iter();
                let Some(first) = segments.next() else {
                    return Value::Null;
                };
                let mut value = lookup(first).unwrap_or(Value::Null);
                for segment in segments {
                    value = value.get(segment).cloned().unwrap_or(Value::Null);
                }
                value
            }
        }
    }

    /// Root field names the expression reads
    #[must_use]
    pub fn root_field(&self) -> Option<&str> {
        match self {
            Self::Field(path) => path.first().map(String::as_str),
            Self::Call(name) => Some(name),
            Self::Not(inner) => inner.root_field(),
            Self::Literal(_) => None,
        }
    }
}

/// JavaScript-style truthiness
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text form of an interpolated value
#[must_use]
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Argument of an event handler call
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerArg {
    /// `$event`
    Event,
    /// Any other expression
    Expr(Expr),
}

/// Event handler call (`select($event, 'a')`)
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerCall {
    /// Handler name
    pub name: String,
    /// Arguments
    pub args: Vec<HandlerArg>,
}

impl HandlerCall {
    /// Parse `name`, `name()` or `name(arg, ...)`
    ///
    /// # Errors
    ///
    /// Returns `Template` if the call or an argument is malformed
    pub fn parse(text: &str) -> SettleResult<Self> {
        let text = text.trim().trim_end_matches(';').trim();
        let (name, args) = match text.split_once('(') {
            Some((name, rest)) => {
                let inner = rest
                    .strip_suffix(')')
                    .ok_or_else(|| template_error(format!("unclosed handler call '{text}'")))?;
                (name.trim(), inner.trim())
            }
            None => (text, ""),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(template_error(format!("invalid handler '{text}'")));
        }
        let args = if args.is_empty() {
            Vec::new()
        } else {
            args.split(',')
                .map(|arg| match arg.trim() {
                    "$event" => Ok(HandlerArg::Event),
                    other => Expr::parse(other).map(HandlerArg::Expr),
                })
                .collect::<SettleResult<Vec<_>>>()?
        };
        Ok(Self {
            name: name.to_string(),
            args,
        })
    }

    /// Whether `$event` is passed
    #[must_use]
    pub fn passes_event(&self) -> bool {
        self.args.iter().any(|a| matches!(a, HandlerArg::Event))
    }
}

/// Piece of a text node
#[derive(Debug, Clone, PartialEq)]
pub enum TextPart {
    /// Literal text
    Literal(String),
    /// `{{ expr }}`
    Interp(Expr),
}

/// Parsed element
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementNode {
    /// Lowercase tag
    pub tag: String,
    /// Static attributes in source order
    pub attributes: Vec<(String, String)>,
    /// `[name]="expr"` bindings
    pub properties: Vec<(String, Expr)>,
    /// `(event)="handler()"` bindings
    pub events: Vec<(String, HandlerCall)>,
    /// Child nodes
    pub children: Vec<TemplateNode>,
}

/// Parsed template node
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    /// Element
    Element(ElementNode),
    /// Text with optional interpolations
    Text(Vec<TextPart>),
}

impl TemplateNode {
    /// Whether the text node has bindings
    #[must_use]
    pub fn is_dynamic_text(&self) -> bool {
        matches!(self, Self::Text(parts) if parts.iter().any(|p| matches!(p, TextPart::Interp(_))))
    }
}

/// Parse a template into its top-level nodes
///
/// # Errors
///
/// Returns `Template` for unterminated tags, comments or interpolations and
/// for malformed bindings
pub fn parse_template(source: &str) -> SettleResult<Vec<TemplateNode>> {
    Parser { src: source, pos: 0 }.parse()
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn parse(mut self) -> SettleResult<Vec<TemplateNode>> {
        let mut roots = Vec::new();
        let mut stack: Vec<ElementNode> = Vec::new();

        while self.pos < self.src.len() {
            let rest = self.rest();
            if rest.starts_with("<!--") {
                let end = rest
                    .find("-->")
                    .ok_or_else(|| template_error("unclosed comment"))?;
                self.pos += end + 3;
            } else if let Some(close) = rest.strip_prefix("</") {
                let end = close
                    .find('>')
                    .ok_or_else(|| template_error("unterminated closing tag"))?;
                let tag = close[..end].trim().to_ascii_lowercase();
                self.pos += 2 + end + 1;
                if stack.iter().any(|el| el.tag == tag) {
                    while let Some(el) = stack.pop() {
                        let done = el.tag == tag;
                        push_node(&mut stack, &mut roots, TemplateNode::Element(el));
                        if done {
                            break;
                        }
                    }
                }
            } else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
                let (el, self_closing) = self.parse_open_tag()?;
                if self_closing || VOID_ELEMENTS.contains(&el.tag.as_str()) {
                    push_node(&mut stack, &mut roots, TemplateNode::Element(el));
                } else {
                    stack.push(el);
                }
            } else {
                let text = self.take_text();
                let parts = parse_text(text)?;
                if !parts.is_empty() {
                    push_node(&mut stack, &mut roots, TemplateNode::Text(parts));
                }
            }
        }

        while let Some(el) = stack.pop() {
            push_node(&mut stack, &mut roots, TemplateNode::Element(el));
        }
        Ok(roots)
    }

    fn take_text(&mut self) -> &'a str {
        let rest = self.rest();
        let mut end = rest.len();
        // A '<' in first position is literal text, or it would have parsed as markup.
        let mut search = 1;
        while let Some(idx) = rest[search.min(rest.len())..].find('<') {
            let at = search + idx;
            let next = &rest[at + 1..];
            if next.starts_with(|c: char| c.is_ascii_alphabetic() || c == '/' || c == '!') {
                end = at;
                break;
            }
            search = at + 1;
        }
        let text = &self.src[self.pos..self.pos + end];
        self.pos += end;
        text
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn parse_open_tag(&mut self) -> SettleResult<(ElementNode, bool)> {
        self.pos += 1;
        let name_len = self
            .rest()
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':'))
            .unwrap_or(self.rest().len());
        let mut el = ElementNode {
            tag: self.rest()[..name_len].to_ascii_lowercase(),
            ..ElementNode::default()
        };
        self.pos += name_len;

        loop {
            self.skip_ws();
            let rest = self.rest();
            if rest.is_empty() {
                return Err(template_error(format!("unterminated tag <{}", el.tag)));
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok((el, true));
            }
            if rest.starts_with('>') {
                self.pos += 1;
                return Ok((el, false));
            }
            let (name, value) = self.parse_attribute()?;
            classify_attribute(&mut el, name, value)?;
        }
    }

    fn parse_attribute(&mut self) -> SettleResult<(String, Option<String>)> {
        let rest = self.rest();
        let name_len = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
            .unwrap_or(rest.len())
            .max(1);
        let name = rest[..name_len].to_string();
        self.pos += name_len;
        self.skip_ws();
        if !self.rest().starts_with('=') {
            return Ok((name, None));
        }
        self.pos += 1;
        self.skip_ws();
        let rest = self.rest();
        let value = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let end = rest[1..]
                    .find(q)
                    .ok_or_else(|| template_error(format!("unterminated value for '{name}'")))?;
                self.pos += end + 2;
                rest[1..=end].to_string()
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                self.pos += end;
                rest[..end].to_string()
            }
        };
        Ok((name, Some(value)))
    }
}

fn push_node(stack: &mut [ElementNode], roots: &mut Vec<TemplateNode>, node: TemplateNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

fn classify_attribute(el: &mut ElementNode, name: String, value: Option<String>) -> SettleResult<()> {
    let value = value.unwrap_or_default();
    if let Some(prop) = name.strip_prefix('[').and_then(|n| n.strip_suffix(']')) {
        el.properties.push((prop.to_string(), Expr::parse(&value)?));
    } else if let Some(event) = name.strip_prefix('(').and_then(|n| n.strip_suffix(')')) {
        el.events.push((event.to_string(), HandlerCall::parse(&value)?));
    } else if !name.starts_with('#') {
        el.attributes.push((name.to_ascii_lowercase(), decode_entities(&value)));
    }
    Ok(())
}

fn parse_text(text: &str) -> SettleResult<Vec<TextPart>> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        if start > 0 {
            parts.push(TextPart::Literal(decode_entities(&rest[..start])));
        }
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| template_error("unclosed interpolation"))?;
        parts.push(TextPart::Interp(Expr::parse(&after[..end])?));
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        parts.push(TextPart::Literal(decode_entities(rest)));
    }
    Ok(parts)
}

/// Decode the handful of named and numeric entities templates use
#[must_use]
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let entity = &tail[1..semi];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix('#')
                    .and_then(|n| n.parse::<u32>().ok())
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn element(node: &TemplateNode) -> &ElementNode {
        match node {
            TemplateNode::Element(el) => el,
            TemplateNode::Text(_) => panic!("expected element"),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    mod expr_tests {
        use super::*;

        #[test]
        fn test_literals() {
            assert_eq!(Expr::parse("'a b'").unwrap(), Expr::Literal(json!("a b")));
            assert_eq!(Expr::parse("42").unwrap(), Expr::Literal(json!(42)));
            assert_eq!(Expr::parse("-1.5").unwrap(), Expr::Literal(json!(-1.5)));
            assert_eq!(Expr::parse("true").unwrap(), Expr::Literal(json!(true)));
        }

        #[test]
        fn test_paths_and_calls() {
            let lookup = |name: &str| match name {
                "user" => Some(json!({"name": "Ada"})),
                "getName" => Some(json!("World")),
                _ => None,
            };
            assert_eq!(Expr::parse("user.name").unwrap().eval(&lookup), json!("Ada"));
            assert_eq!(Expr::parse("user.age").unwrap().eval(&lookup), Value::Null);
            assert_eq!(Expr::parse("getName()").unwrap().eval(&lookup), json!("World"));
            assert_eq!(Expr::parse("!missing").unwrap().eval(&lookup), json!(true));
        }

        #[test]
        fn test_rejects_operators() {
            assert!(Expr::parse("a + b").is_err());
            assert!(Expr::parse("").is_err());
            assert!(Expr::parse("a.").is_err());
        }

        #[test]
        fn test_render_value() {
            assert_eq!(render_value(&json!("x")), "x");
            assert_eq!(render_value(&Value::Null), "");
            assert_eq!(render_value(&json!(3)), "3");
            assert_eq!(render_value(&json!(true)), "true");
        }
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    #[test]
    fn test_handler_calls() {
        let call = HandlerCall::parse("select($event, 'x')").unwrap();
        assert_eq!(call.name, "select");
        assert!(call.passes_event());
        assert_eq!(call.args.len(), 2);
        assert_eq!(HandlerCall::parse("click()").unwrap().args.len(), 0);
        assert_eq!(HandlerCall::parse("click").unwrap().name, "click");
        assert!(HandlerCall::parse("a(b").is_err());
        assert!(HandlerCall::parse("x = 1").is_err());
    }

    // =========================================================================
    // Markup
    // =========================================================================

    #[test]
    fn test_parse_bindings() {
        let nodes = parse_template(
            r#"<p class="greeting" (click)="click()" [title]="name" #ref>Hello {{name}}</p>"#,
        )
        .unwrap();
        assert_eq!(nodes.len(), 1);
        let p = element(&nodes[0]);
        assert_eq!(p.tag, "p");
        assert_eq!(p.attributes, vec![("class".to_string(), "greeting".to_string())]);
        assert_eq!(p.properties[0].0, "title");
        assert_eq!(p.events[0].0, "click");
        assert_eq!(
            p.children,
            vec![TemplateNode::Text(vec![
                TextPart::Literal("Hello ".to_string()),
                TextPart::Interp(Expr::Field(vec!["name".to_string()])),
            ])]
        );
        assert!(p.children[0].is_dynamic_text());
    }

    #[test]
    fn test_void_and_self_closing() {
        let nodes = parse_template("<div><input disabled><br/><child-cmp /></div>").unwrap();
        let div = element(&nodes[0]);
        let tags: Vec<_> = div.children.iter().map(|n| element(n).tag.clone()).collect();
        assert_eq!(tags, vec!["input", "br", "child-cmp"]);
        assert_eq!(
            element(&div.children[0]).attributes,
            vec![("disabled".to_string(), String::new())]
        );
    }

    #[test]
    fn test_unclosed_tags_close_at_end() {
        let nodes = parse_template("<ul><li>One<li>Two</ul><p>tail").unwrap();
        assert_eq!(nodes.len(), 2);
        let ul = element(&nodes[0]);
        assert_eq!(ul.children.len(), 1);
        assert_eq!(element(&nodes[1]).tag, "p");
    }

    #[test]
    fn test_comments_and_entities() {
        let nodes = parse_template("<!-- note --><b>a &amp; b &lt; c&#33; &bogus</b>").unwrap();
        assert_eq!(nodes.len(), 1);
        let b = element(&nodes[0]);
        assert_eq!(
            b.children,
            vec![TemplateNode::Text(vec![TextPart::Literal("a & b < c! &bogus".to_string())])]
        );
    }

    #[test]
    fn test_multiline_component_tag() {
        let nodes = parse_template(
            "<example-component\n    [an-input]=\"value\"\n    (an-output)=\"spy($event)\">\n</example-component>",
        )
        .unwrap();
        let el = element(&nodes[0]);
        assert_eq!(el.tag, "example-component");
        assert_eq!(el.properties.len(), 1);
        assert_eq!(el.events.len(), 1);
    }

    #[test]
    fn test_errors() {
        assert!(parse_template("<p>{{ name </p>").is_err());
        assert!(parse_template("<!-- open").is_err());
        assert!(parse_template("<p class=\"x").is_err());
        assert!(parse_template("<p [x]=\"a b\"></p>").is_err());
        let err = parse_template("<div").unwrap_err();
        assert_eq!(err.to_string(), "Template parse error: unterminated tag <div");
    }

    #[test]
    fn test_literal_angle_bracket() {
        let nodes = parse_template("1 < 2").unwrap();
        assert_eq!(
            nodes,
            vec![TemplateNode::Text(vec![TextPart::Literal("1 < 2".to_string())])]
        );
    }
}
