//! `outerHTML` / `innerHTML` serialization with per-character origins.
//!
//! Characters the serializer synthesizes (default `=""`, added quotes, end
//! tags nobody wrote) carry no origin. Escapes inherit the origin of the
//! character they encode, so every character of `&amp;` points at the
//! single `&` that produced it.

use crate::dom::{Document, ElementData, NodeData, NodeId};
use crate::error::Result;
use crate::html::{CharOrigin, escapes_text, is_void};

/// Serialized markup and the origin of each of its characters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rendered {
    pub text: String,
    pub origins: Vec<Option<CharOrigin>>,
}

impl Rendered {
    /// Length in characters.
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    fn push(&mut self, c: char, origin: Option<CharOrigin>) {
        self.text.push(c);
        self.origins.push(origin);
    }

    fn push_str(&mut self, s: &str, origin: Option<CharOrigin>) {
        for c in s.chars() {
            self.push(c, origin);
        }
    }

    /// Push `s` with per-character origins; missing origins become `None`.
    fn push_run(&mut self, s: &str, origins: &[Option<CharOrigin>]) {
        let mut origins = origins.iter().copied();
        for c in s.chars() {
            self.push(c, origins.next().flatten());
        }
    }
}

pub fn outer_html(doc: &Document, node: NodeId) -> Result<Rendered> {
    let mut out = Rendered::default();
    write_node(doc, node, true, &mut out)?;
    Ok(out)
}

pub fn inner_html(doc: &Document, node: NodeId) -> Result<Rendered> {
    let mut out = Rendered::default();
    let escape = match doc.data(node)? {
        NodeData::Element(el) => escapes_text(&el.name),
        _ => true,
    };
    for child in doc.children(node)? {
        write_node(doc, *child, escape, &mut out)?;
    }
    Ok(out)
}

/// The text a character offset on `node` refers to: markup for elements,
/// comments and the root, the raw data for text nodes.
pub fn render_node(doc: &Document, node: NodeId) -> Result<Rendered> {
    match doc.data(node)? {
        NodeData::Root => inner_html(doc, node),
        NodeData::Text(text) => {
            let mut out = Rendered::default();
            out.push_run(&text.data, &text.origins);
            Ok(out)
        }
        NodeData::Element(_) | NodeData::Comment(_) => outer_html(doc, node),
    }
}

fn write_node(doc: &Document, node: NodeId, escape_text: bool, out: &mut Rendered) -> Result<()> {
    match doc.data(node)? {
        NodeData::Root => {
            for child in doc.children(node)? {
                write_node(doc, *child, true, out)?;
            }
        }
        NodeData::Element(el) => write_element(doc, node, el, out)?,
        NodeData::Text(text) => {
            if escape_text {
                for (c, origin) in text.data.chars().zip(padded(&text.origins)) {
                    match c {
                        '&' => out.push_str("&amp;", origin),
                        '<' => out.push_str("&lt;", origin),
                        '>' => out.push_str("&gt;", origin),
                        '\u{00A0}' => out.push_str("&nbsp;", origin),
                        c => out.push(c, origin),
                    }
                }
            } else {
                out.push_run(&text.data, &text.origins);
            }
        }
        NodeData::Comment(comment) => {
            out.push_run("<!--", &comment.origin.start);
            out.push_run(&comment.data, &comment.origin.data);
            out.push_run("-->", &comment.origin.end);
        }
    }
    Ok(())
}

fn write_element(doc: &Document, node: NodeId, el: &ElementData, out: &mut Rendered) -> Result<()> {
    let origin = &el.origin;
    out.push('<', origin.open_bracket);
    out.push_run(&el.name, &origin.name);
    for attr in &el.attributes {
        out.push(' ', attr.origin.leading_space);
        out.push_run(&attr.name, &attr.origin.name);
        out.push('=', attr.origin.equals);
        out.push('"', attr.origin.open_quote);
        for (c, origin) in attr.value.chars().zip(padded(&attr.origin.value)) {
            match c {
                '&' => out.push_str("&amp;", origin),
                '"' => out.push_str("&quot;", origin),
                '\u{00A0}' => out.push_str("&nbsp;", origin),
                c => out.push(c, origin),
            }
        }
        out.push('"', attr.origin.close_quote);
    }
    out.push('>', origin.open_end);
    if is_void(&el.name) {
        return Ok(());
    }

    let escape = escapes_text(&el.name);
    for child in doc.children(node)? {
        write_node(doc, *child, escape, out)?;
    }

    let close = format!("</{}>", el.name);
    if origin.close.len() == close.chars().count() {
        out.push_run(&close, &origin.close);
    } else {
        out.push_str(&close, None);
    }
    Ok(())
}

fn padded(origins: &[Option<CharOrigin>]) -> impl Iterator<Item = Option<CharOrigin>> + '_ {
    origins.iter().copied().chain(std::iter::repeat(None))
}
