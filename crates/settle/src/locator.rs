//! Selector engine for element queries.
//!
//! Supports the CSS subset component tests use: type, `#id`, `.class`,
//! `[attr]`, `[attr=value]`, `*`, descendant and child combinators, and
//! comma-separated lists.

use crate::result::{SettleError, SettleResult};
use crate::view::dom::Element;

/// Attribute condition
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrMatch {
    Exists(String),
    Equals(String, String),
}

/// Conditions on a single element (`div.a#b[c]`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

impl Compound {
    fn matches(&self, el: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if tag != el.tag() {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if el.id().as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.iter().all(|c| el.has_class(c)) {
            return false;
        }
        self.attrs.iter().all(|attr| match attr {
            AttrMatch::Exists(name) => el.attribute(name).is_some(),
            AttrMatch::Equals(name, value) => el.attribute(name).as_deref() == Some(value.as_str()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

/// One complex selector, rightmost compound last
#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    parts: Vec<(Combinator, Compound)>,
}

impl Complex {
    fn matches(&self, el: &Element) -> bool {
        self.matches_at(el, self.parts.len() - 1)
    }

    fn matches_at(&self, el: &Element, idx: usize) -> bool {
        let (combinator, compound) = &self.parts[idx];
        if !compound.matches(el) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match combinator {
            Combinator::Child => el.parent().is_some_and(|p| self.matches_at(&p, idx - 1)),
            Combinator::Descendant => {
                let mut current = el.parent();
                while let Some(ancestor) = current {
                    if self.matches_at(&ancestor, idx - 1) {
                        return true;
                    }
                    current = ancestor.parent();
                }
                false
            }
        }
    }
}

/// Parsed comma-separated selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    selectors: Vec<Complex>,
}

impl SelectorList {
    /// Parse a selector list
    ///
    /// # Errors
    ///
    /// Returns `InvalidSelector` for empty or malformed input
    pub fn parse(text: &str) -> SettleResult<Self> {
        let invalid = |reason: &str| SettleError::InvalidSelector {
            selector: text.to_string(),
            reason: reason.to_string(),
        };
        let selectors = text
            .split(',')
            .map(|part| parse_complex(part.trim()).map_err(|reason| invalid(&reason)))
            .collect::<SettleResult<Vec<_>>>()?;
        Ok(Self { selectors })
    }

    /// Whether any selector in the list matches
    #[must_use]
    pub fn matches(&self, el: &Element) -> bool {
        self.selectors.iter().any(|s| s.matches(el))
    }

    /// Matching descendants of `root` in document order
    #[must_use]
    pub fn find_all(&self, root: &Element) -> Vec<Element> {
        root.descendants()
            .into_iter()
            .filter(|e| self.matches(e))
            .collect()
    }
}

fn parse_complex(text: &str) -> Result<Complex, String> {
    if text.is_empty() {
        return Err("empty selector".to_string());
    }
    let mut parts = Vec::new();
    let mut pending = Combinator::Descendant;
    let spaced = text.replace('>', " > ");
    for token in spaced.split_whitespace() {
        if token == ">" {
            if parts.is_empty() {
                return Err("leading combinator".to_string());
            }
            pending = Combinator::Child;
            continue;
        }
        parts.push((pending, parse_compound(token)?));
        pending = Combinator::Descendant;
    }
    if pending == Combinator::Child {
        return Err("trailing combinator".to_string());
    }
    if parts.is_empty() {
        return Err("empty selector".to_string());
    }
    Ok(Complex { parts })
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn parse_compound(token: &str) -> Result<Compound, String> {
    let mut compound = Compound::default();
    let chars: Vec<char> = token.chars().collect();
    let mut i = 0;

    let read_ident = |i: &mut usize| -> String {
        let start = *i;
        while *i < chars.len() && is_ident(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };

    if i < chars.len() && chars[i] == '*' {
        i += 1;
    } else if i < chars.len() && is_ident(chars[i]) {
        compound.tag = Some(read_ident(&mut i).to_ascii_lowercase());
    }

    while i < chars.len() {
        match chars[i] {
            '#' => {
                i += 1;
                let id = read_ident(&mut i);
                if id.is_empty() {
                    return Err("empty id".to_string());
                }
                compound.id = Some(id);
            }
            '.' => {
                i += 1;
                let class = read_ident(&mut i);
                if class.is_empty() {
                    return Err("empty class".to_string());
                }
                compound.classes.push(class);
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|&c| c == ']')
                    .ok_or_else(|| "unclosed attribute".to_string())?;
                let body: String = chars[i + 1..i + close].iter().collect();
                compound.attrs.push(parse_attr(&body)?);
                i += close + 1;
            }
            c => return Err(format!("unexpected '{c}'")),
        }
    }
    Ok(compound)
}

fn parse_attr(body: &str) -> Result<AttrMatch, String> {
    match body.split_once('=') {
        Some((name, value)) => {
            let name = name.trim();
            if name.is_empty() {
                return Err("empty attribute name".to_string());
            }
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            Ok(AttrMatch::Equals(name.to_string(), value.to_string()))
        }
        None if !body.trim().is_empty() => Ok(AttrMatch::Exists(body.trim().to_string())),
        None => Err("empty attribute".to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::view::dom::{Document, Node};

    fn fixture() -> Element {
        // <div class="card" id="main"><ul><li class="item a">One</li>
        // <li class="item" data-testid="two">Two</li></ul><p>Three</p></div>
        let doc = Document::new();
        let root = doc.create_element("section");
        let card = doc.create_element("div");
        card.set_attribute("class", "card");
        card.set_attribute("id", "main");
        let list = doc.create_element("ul");
        for (class, text, test_id) in [("item a", "One", None), ("item", "Two", Some("two"))] {
            let li = doc.create_element("li");
            li.set_attribute("class", class);
            if let Some(id) = test_id {
                li.set_attribute("data-testid", id);
            }
            li.append_text(text);
            list.append_child(Node::Element(li));
        }
        card.append_child(Node::Element(list));
        let p = doc.create_element("p");
        p.append_text("Three");
        card.append_child(Node::Element(p));
        root.append_child(Node::Element(card));
        root
    }

    fn texts(els: &[Element]) -> Vec<String> {
        els.iter().map(Element::text_content).collect()
    }

    #[test]
    fn test_simple_selectors() {
        let root = fixture();
        let list = SelectorList::parse("li").unwrap();
        assert_eq!(texts(&list.find_all(&root)), vec!["One", "Two"]);
        let list = SelectorList::parse(".a").unwrap();
        assert_eq!(texts(&list.find_all(&root)), vec!["One"]);
        let list = SelectorList::parse("#main").unwrap();
        assert_eq!(list.find_all(&root).len(), 1);
        let list = SelectorList::parse("[data-testid=two]").unwrap();
        assert_eq!(texts(&list.find_all(&root)), vec!["Two"]);
    }

    #[test]
    fn test_combinators() {
        let root = fixture();
        let list = SelectorList::parse("div li.item").unwrap();
        assert_eq!(list.find_all(&root).len(), 2);
        let list = SelectorList::parse("div > li").unwrap();
        assert!(list.find_all(&root).is_empty());
        let list = SelectorList::parse("div>ul>li.a").unwrap();
        assert_eq!(texts(&list.find_all(&root)), vec!["One"]);
    }

    #[test]
    fn test_lists_keep_document_order() {
        let root = fixture();
        let list = SelectorList::parse("p, li.a").unwrap();
        assert_eq!(texts(&list.find_all(&root)), vec!["One", "Three"]);
    }

    #[test]
    fn test_invalid_selectors() {
        assert!(SelectorList::parse("").is_err());
        assert!(SelectorList::parse("div >").is_err());
        assert!(SelectorList::parse("a[b").is_err());
        assert!(SelectorList::parse("a..b").is_err());
        let err = SelectorList::parse("> a").unwrap_err();
        assert!(err.to_string().contains("leading combinator"));
    }
}
